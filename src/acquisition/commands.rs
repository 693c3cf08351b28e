//! Pass recipes for each recovery mode.

use super::modes::RecoveryMode;
use crate::parsers::Dialect;
use crate::process::{shell_quote, CommandSpec, FailurePolicy};
use std::path::{Path, PathBuf};

/// Block size of the Standard mode dd pass.
pub const STANDARD_BLOCK_SIZE: &str = "4M";
pub const STANDARD_BLOCK_BYTES: u64 = 4 * 1024 * 1024;

/// When a pass is worth running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PassCondition {
    Always,
    /// Only while the recovery rate is below this percentage
    RateBelow(f64),
}

impl PassCondition {
    pub fn holds(self, rate: f64) -> bool {
        match self {
            PassCondition::Always => true,
            PassCondition::RateBelow(threshold) => rate < threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PassPlan {
    pub label: String,
    pub command: CommandSpec,
    pub condition: PassCondition,
    pub policy: FailurePolicy,
    pub dialect: Dialect,
}

impl PassPlan {
    fn required(label: impl Into<String>, command: CommandSpec, condition: PassCondition, dialect: Dialect) -> Self {
        Self {
            label: label.into(),
            command,
            condition,
            policy: FailurePolicy::Required,
            dialect,
        }
    }

    pub fn is_ddrescue(&self) -> bool {
        self.dialect == Dialect::Ddrescue
    }
}

/// Builds the commands for one source/destination pair.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    source: String,
    destination: PathBuf,
    map_file: PathBuf,
    /// ddrescue sector size (`-b`)
    block_size: u64,
    retries: u32,
    destination_is_device: bool,
    /// Source size, used to cut dd's block padding from compressed images
    source_size: Option<u64>,
}

impl CommandBuilder {
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        let map_file = map_file_for(&destination);
        Self {
            source: source.into(),
            destination,
            map_file,
            block_size: 4096,
            retries: 3,
            destination_is_device: false,
            source_size: None,
        }
    }

    pub fn with_block_size(mut self, block_size: u64) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// ddrescue refuses to overwrite a block device without `-f`.
    pub fn with_device_destination(mut self, is_device: bool) -> Self {
        self.destination_is_device = is_device;
        self
    }

    pub fn with_source_size(mut self, size: u64) -> Self {
        self.source_size = Some(size);
        self
    }

    pub fn map_file(&self) -> &Path {
        &self.map_file
    }

    fn dest(&self) -> String {
        self.destination.to_string_lossy().into_owned()
    }

    fn block_fraction(&self, divisor: u64) -> String {
        (self.block_size / divisor).max(512).to_string()
    }

    /// `ddrescue FLAGS [-f] SOURCE DEST MAP`
    pub fn ddrescue(&self, flags: &[&str]) -> CommandSpec {
        let mut cmd = CommandSpec::new("ddrescue").args(flags.iter().copied());
        if self.destination_is_device {
            cmd = cmd.arg("-f");
        }
        cmd.arg(self.source.clone())
            .arg(self.dest())
            .arg(self.map_file.to_string_lossy().into_owned())
    }

    /// Standard mode: one `dd conv=noerror,sync` pass, optionally gzipped.
    ///
    /// `discard` adds a best-effort `blkdiscard` of the destination first.
    pub fn standard_passes(&self, compress: bool, discard: bool) -> Vec<PassPlan> {
        let mut passes = Vec::new();

        if discard {
            passes.push(PassPlan {
                label: "Discard destination".to_string(),
                command: CommandSpec::new("blkdiscard").args(["-f".to_string(), self.dest()]),
                condition: PassCondition::Always,
                policy: FailurePolicy::BestEffort,
                dialect: Dialect::Plain,
            });
        }

        let dd = if compress {
            // conv=sync pads the last short block; keep exactly the source
            // size and drain the rest so dd never sees SIGPIPE.
            let trim = match self.source_size {
                Some(size) => format!(" | {{ head -c {}; cat > /dev/null; }}", size),
                None => String::new(),
            };
            CommandSpec::pipeline(format!(
                "dd if={} bs={} status=progress conv=noerror,sync{} | gzip -c > {}",
                shell_quote(&self.source),
                STANDARD_BLOCK_SIZE,
                trim,
                shell_quote(&self.dest())
            ))
        } else {
            CommandSpec::new("dd").args([
                format!("if={}", self.source),
                format!("of={}", self.dest()),
                format!("bs={}", STANDARD_BLOCK_SIZE),
                "status=progress".to_string(),
                "conv=noerror,sync".to_string(),
            ])
        };
        passes.push(PassPlan::required("Imaging with dd", dd, PassCondition::Always, Dialect::Dd));
        passes
    }

    /// Every pass of `mode`, in order. Conditions are evaluated at run time.
    pub fn plan(&self, mode: RecoveryMode, compress: bool, discard: bool) -> Vec<PassPlan> {
        let bs_owned = self.block_size.to_string();
        let bs = bs_owned.as_str();
        let retry_owned = format!("-r{}", self.retries);
        let retry = retry_owned.as_str();
        let rescue = |label: &str, flags: &[&str], condition| {
            PassPlan::required(label, self.ddrescue(flags), condition, Dialect::Ddrescue)
        };
        let quick = || rescue("Quick scan", &["-d", "-n", "-b", bs], PassCondition::Always);

        match mode {
            RecoveryMode::Standard => self.standard_passes(compress, discard),
            RecoveryMode::LightRecovery => vec![
                quick(),
                rescue("Retry pass", &["-d", retry, "-b", bs], PassCondition::RateBelow(99.99)),
            ],
            RecoveryMode::AggressiveRecovery => {
                let half_owned = self.block_fraction(2);
                let half = half_owned.as_str();
                vec![
                    quick(),
                    rescue(
                        "Retry with half block size",
                        &["-d", retry, "-b", half],
                        PassCondition::RateBelow(99.99),
                    ),
                    rescue("Scraping pass", &["-d", "-r2", "-b", bs], PassCondition::RateBelow(99.5)),
                ]
            }
            RecoveryMode::DeepRecovery => {
                let quarter_owned = self.block_fraction(4);
                let quarter = quarter_owned.as_str();
                vec![
                    quick(),
                    rescue(
                        "Retry with quarter block size",
                        &["-d", retry, "-b", quarter],
                        PassCondition::RateBelow(99.99),
                    ),
                    rescue(
                        "Reverse pass",
                        &["-d", retry, "-R", "-b", bs],
                        PassCondition::RateBelow(99.5),
                    ),
                    rescue(
                        "Sector-level scraping",
                        &["-d", "-r5", "-b", "512"],
                        PassCondition::RateBelow(99.0),
                    ),
                ]
            }
            RecoveryMode::ForensicRecovery => {
                let keep_going = PassCondition::RateBelow(99.99);
                vec![
                    rescue(
                        "Cluster scan without direct access",
                        &["-n", "-b", "4096", "-c", "64"],
                        PassCondition::Always,
                    ),
                    rescue("Small-block retry", &["-r3", "-b", "1024", "-c", "16"], keep_going),
                    rescue("Direct-access retry", &["-d", "-r3", "-b", bs], keep_going),
                    rescue("Retrim pass", &["-d", "-r2", "-M", "-b", bs], keep_going),
                    rescue("Reverse scraping pass", &["-r5", "-R", "-b", bs], keep_going),
                    rescue("Sector-level direct scraping", &["-d", "-r7", "-b", "512"], keep_going),
                ]
            }
        }
    }
}

/// `<image>.map`
pub fn map_file_for(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".map");
    PathBuf::from(name)
}

/// Final image path: compressed images always end in `.gz`.
pub fn image_path(destination: &Path, compress: bool) -> PathBuf {
    if compress && destination.extension().map_or(true, |ext| ext != "gz") {
        let mut name = destination.as_os_str().to_os_string();
        name.push(".gz");
        PathBuf::from(name)
    } else {
        destination.to_path_buf()
    }
}

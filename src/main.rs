use anyhow::{anyhow, Context, Result};
use blackstorm_engine::acquisition::RecoveryMode;
use blackstorm_engine::erase::{parse_pattern, VerificationMode};
use blackstorm_engine::logging::{self, LogConfig};
use blackstorm_engine::size::{human_size, parse_size};
use blackstorm_engine::verification::HashAlgorithm;
use blackstorm_engine::*;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "blackstorm")]
#[command(about = "Adaptive disk acquisition and secure erasure")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Configuration file (TOML)
    #[arg(long, global = true, env = "BLACKSTORM_CONFIG")]
    config: Option<PathBuf>,

    /// Disable safety checks (DANGEROUS!)
    #[arg(long, global = true)]
    unsafe_mode: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Image a device, escalating recovery modes as needed
    Acquire {
        /// Source device or image (e.g., /dev/sdb)
        source: String,

        /// Destination image file or device
        destination: PathBuf,

        /// Starting mode (0-4 or standard, light, aggressive, deep, forensic)
        #[arg(short, long, default_value = "standard")]
        mode: RecoveryMode,

        /// Stay in the starting mode
        #[arg(long)]
        no_auto: bool,

        /// Skip post-acquisition verification
        #[arg(long)]
        no_verify: bool,

        /// Hash algorithms for verification
        #[arg(long = "hash", value_delimiter = ',', default_value = "sha256")]
        hashes: Vec<HashAlgorithm>,

        /// ddrescue sector size in bytes
        #[arg(long, default_value = "4096")]
        block_size: String,

        /// Retry passes for the ddrescue retry steps
        #[arg(long, default_value_t = 3)]
        retries: u32,

        /// gzip the image (Standard mode without escalation only)
        #[arg(long)]
        compress: bool,

        /// Do not write a bad sector table
        #[arg(long)]
        no_bad_sector_log: bool,

        /// Discard a flash destination device before writing
        #[arg(long)]
        discard: bool,

        /// Minimum acceptable recovery rate in percent
        #[arg(long)]
        min_rate: Option<f64>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Wipe one or more devices
    Wipe {
        /// Device paths (e.g., /dev/sdb /dev/sdc)
        #[arg(required = true)]
        devices: Vec<String>,

        /// Wipe method (quick, dod, nist, gutmann, custom, nulldrive)
        #[arg(short, long, default_value = "quick")]
        method: String,

        /// Byte pattern for custom wipes (e.g., "AA 55")
        #[arg(long)]
        pattern: Option<String>,

        /// Pass count for custom wipes
        #[arg(long, default_value_t = 1)]
        passes: u32,

        /// Skip verification
        #[arg(long)]
        no_verify: bool,

        /// Verification (auto, sample, entropy)
        #[arg(long, default_value = "auto")]
        verification: VerificationMode,

        /// Entropy threshold in bits per byte
        #[arg(long)]
        entropy_threshold: Option<f64>,

        /// dd block size
        #[arg(long, default_value = "1M")]
        block_size: String,

        /// Write with O_DIRECT
        #[arg(long)]
        direct_io: bool,

        /// fsync each pass
        #[arg(long)]
        sync_writes: bool,

        /// Keep writing past write errors
        #[arg(long)]
        quick_erase: bool,

        /// Do not discard flash media before writing
        #[arg(long)]
        no_discard: bool,

        /// Erase LUKS key slots first
        #[arg(long)]
        key_wipe: bool,

        /// Zero the boot sectors after the wipe
        #[arg(long)]
        bootloader_wipe: bool,

        /// Flush and drop the page cache before wiping
        #[arg(long)]
        memory_wipe: bool,

        /// Run fio random I/O against the drive before wiping
        #[arg(long)]
        thermal_stress: bool,

        /// Thermal stress duration in seconds
        #[arg(long, default_value_t = 300, value_parser = clap::value_parser!(u64).range(60..=3600))]
        stress_duration: u64,

        /// Target drive temperature for the stress test (°C)
        #[arg(long, default_value_t = 70, value_parser = clap::value_parser!(u32).range(40..=100))]
        stress_temp: u32,

        /// Lock the drive with an ATA password after a hardware erase
        #[arg(long, conflicts_with = "brick")]
        lock: bool,

        /// Permanently lock the drive after a hardware erase
        #[arg(long)]
        brick: bool,

        /// ATA password for --lock/--brick
        #[arg(long, env = "BLACKSTORM_LOCK_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Do not record tamper log events
        #[arg(long)]
        no_tamper_log: bool,

        /// Location recorded with tamper log events
        #[arg(long)]
        location: Option<String>,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show which external tools are installed
    Tools {
        #[arg(long)]
        json: bool,
    },

    /// Convert between byte counts and human sizes
    Size {
        /// A byte count ("1536") or a size ("2M", "1.5G")
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if !cfg!(feature = "color-output") {
        colored::control::set_override(false);
    }

    let config = EngineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _guard = logging::init(LogConfig {
        json: cli.json_logs,
        debug: cli.debug,
        file_dir: None,
    })?;

    match &cli.command {
        Commands::Tools { json } => return show_tools(&Engine::new(config), *json),
        Commands::Size { value } => {
            show_size(value);
            return Ok(());
        }
        _ => {}
    }

    // Check for root privileges
    if !cli.unsafe_mode && !is_root() {
        eprintln!("{}", "Error: This program requires root privileges.".red());
        eprintln!("Please run with sudo or as root user.");
        std::process::exit(1);
    }

    let engine = Engine::new(config);
    let success = match cli.command {
        Commands::Acquire {
            source,
            destination,
            mode,
            no_auto,
            no_verify,
            hashes,
            block_size,
            retries,
            compress,
            no_bad_sector_log,
            discard,
            min_rate,
            json,
        } => {
            let block_size = parse_size(&block_size);
            if block_size == 0 {
                return Err(anyhow!("invalid block size"));
            }
            let options = AcquisitionOptions {
                starting_mode: mode,
                auto_mode: !no_auto,
                verify: !no_verify,
                hash_algorithms: hashes,
                block_size,
                retries,
                compress,
                log_bad_sectors: !no_bad_sector_log,
                discard_destination: discard,
                min_acceptable_rate: min_rate,
            };
            let request = AcquisitionRequest::new(source, destination).with_options(options);
            let outcome = run_job(engine.start_acquisition(request)?).await?;
            if json {
                print_json(&outcome)?;
            } else {
                print_acquisition_summary(&outcome);
            }
            outcome.success
        }
        Commands::Wipe {
            devices,
            method,
            pattern,
            passes,
            no_verify,
            verification,
            entropy_threshold,
            block_size,
            direct_io,
            sync_writes,
            quick_erase,
            no_discard,
            key_wipe,
            bootloader_wipe,
            memory_wipe,
            thermal_stress,
            stress_duration,
            stress_temp,
            lock,
            brick,
            password,
            no_tamper_log,
            location,
            yes,
            json,
        } => {
            let mut method: WipeMethod = method.parse()?;
            if let WipeMethod::Custom { .. } = method {
                method = WipeMethod::Custom {
                    pattern: pattern.as_deref().map(parse_pattern).transpose()?,
                    passes,
                };
            }

            let post_erase = if brick {
                PostErase::Brick
            } else if lock {
                PostErase::Lock
            } else {
                PostErase::None
            };

            if !yes && !confirm_wipe(&devices, &method, post_erase)? {
                println!("Wipe cancelled.");
                return Ok(());
            }

            let options = WipeOptions {
                block_size,
                direct_io,
                sync_writes,
                quick_erase,
                verify: !no_verify,
                verification_mode: verification,
                entropy_threshold,
                discard: !no_discard,
                key_wipe,
                bootloader_wipe,
                memory_wipe,
                thermal_stress,
                stress_duration_secs: stress_duration,
                stress_temp_c: stress_temp,
                post_erase,
                lock_password: password,
                tamper_log: !no_tamper_log,
                location,
            };
            let request = WipeRequest::new(devices, method).with_options(options);
            let outcome = run_job(engine.start_wipe(request)?).await?;
            if json {
                print_json(&outcome)?;
            } else {
                print_wipe_summary(&outcome);
            }
            outcome.success
        }
        Commands::Tools { .. } | Commands::Size { .. } => true,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Forward SIGINT and SIGTERM to the running job's cancel token.
fn setup_signal_handlers(cancel: CancelToken) -> Result<()> {
    use signal_hook::{
        consts::{SIGINT, SIGTERM},
        iterator::Signals,
    };

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            if sig == SIGINT || sig == SIGTERM {
                eprintln!("\n\n{}", "Interrupt received! Stopping the current operation...".yellow());
                cancel.cancel();
            }
        }
    });

    Ok(())
}

/// Renders a job's event stream on the terminal.
struct Reporter {
    bar: ProgressBar,
}

impl Reporter {
    fn new() -> Result<Self> {
        let bar = if cfg!(feature = "progress-bars") {
            let bar = ProgressBar::new(100);
            bar.set_style(
                ProgressStyle::with_template("{spinner} [{elapsed_precise}] [{bar:40}] {pos:>3}% {wide_msg}")?
                    .progress_chars("=> "),
            );
            bar
        } else {
            ProgressBar::hidden()
        };
        Ok(Self { bar })
    }

    fn line(&self, text: impl AsRef<str>) {
        if self.bar.is_hidden() {
            eprintln!("{}", text.as_ref());
        } else {
            self.bar.println(text.as_ref());
        }
    }

    fn handle(&self, event: JobEvent) {
        match event {
            JobEvent::Progress { percent, message } => {
                self.bar.set_position(percent as u64);
                self.bar.set_message(message);
            }
            JobEvent::Log { message } => {
                if message.starts_with("Warning:") {
                    self.line(message.yellow().to_string());
                } else {
                    self.line(message);
                }
            }
            JobEvent::Stats { stats } => {
                if !self.bar.is_hidden() {
                    self.bar.set_message(format!(
                        "{:.2}% recovered, {} bad sectors",
                        stats.recovery_rate, stats.bad_sectors
                    ));
                }
            }
            JobEvent::ModeChanged { mode, level, reason } => {
                self.line(
                    format!("Switching to {} mode (level {}): {}", mode.name(), level, reason)
                        .cyan()
                        .to_string(),
                );
            }
            JobEvent::FrozenDrive { device } => {
                self.line(format!("{} is frozen", device).red().bold().to_string());
            }
            JobEvent::DeviceFinished {
                device,
                success,
                message,
            } => {
                let status = if success { "OK".green() } else { "FAILED".red() };
                self.line(format!("[{}] {}: {}", status, device, message));
            }
            JobEvent::Finished { .. } => self.bar.finish_and_clear(),
        }
    }
}

async fn run_job<T: Send + 'static>(mut handle: JobHandle<T>) -> Result<T> {
    setup_signal_handlers(handle.cancel_token())?;
    let reporter = Reporter::new()?;

    while let Some(event) = handle.next_event().await {
        reporter.handle(event);
    }

    let outcome = tokio::task::spawn_blocking(move || handle.join())
        .await
        .context("Worker join task failed")??;
    Ok(outcome)
}

fn confirm_wipe(devices: &[String], method: &WipeMethod, post_erase: PostErase) -> Result<bool> {
    println!("{}", "WARNING: ALL DATA ON THE FOLLOWING DEVICES WILL BE DESTROYED".red().bold());
    for device in devices {
        println!("  {}", device);
    }
    println!("Method: {}", method);
    if post_erase == PostErase::Brick {
        println!("{}", "The drives will be PERMANENTLY locked afterwards.".red().bold());
    }
    print!("Type 'YES' to continue: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim() == "YES")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status_line(success: bool, message: &str) {
    if success {
        println!("{} {}", "✓".green().bold(), message.green());
    } else {
        println!("{} {}", "✗".red().bold(), message.red());
    }
}

fn print_acquisition_summary(outcome: &AcquisitionOutcome) {
    status_line(outcome.success, &outcome.message);
    println!("Image: {}", outcome.image_path.display());
    println!("Final mode: {}", outcome.final_mode.name());
    if let Some(stats) = &outcome.stats {
        println!(
            "Recovered: {} of {} ({:.4}%)",
            human_size(stats.recovered),
            human_size(stats.total_size),
            stats.recovery_rate
        );
        println!("Bad sectors: {}", stats.bad_sectors);
        println!(
            "Elapsed: {}",
            humantime::format_duration(std::time::Duration::from_secs(stats.elapsed_time as u64))
        );
    }
    for transition in &outcome.transitions {
        println!(
            "  {} -> {}: {}",
            transition.from.name(),
            transition.to.name(),
            transition.reason
        );
    }
    if let Some(verification) = &outcome.verification {
        println!("Verification: {}", verification.detail);
        for hash in &verification.hashes {
            println!("  {}: {}", hash.algorithm, hash.destination);
        }
    }
    if let Some(log) = &outcome.bad_sector_log {
        println!("Bad sector table: {}", log.display());
    }
}

fn print_wipe_summary(outcome: &WipeOutcome) {
    for result in &outcome.results {
        let status = if result.success { "OK".green() } else { "FAILED".red() };
        println!("[{}] {}: {}", status, result.device, result.message);
    }
    status_line(outcome.success, &outcome.message);
}

fn show_tools(engine: &Engine, json: bool) -> Result<()> {
    let tools = engine.tools();
    if json {
        return print_json(&tools);
    }
    for tool in tools {
        let mark = if tool.available { "✓".green() } else { "✗".red() };
        println!("{} {:<12} {}", mark, tool.name, tool.purpose);
    }
    Ok(())
}

fn show_size(value: &str) {
    match value.trim().parse::<u64>() {
        Ok(bytes) => println!("{} bytes = {}", bytes, human_size(bytes)),
        Err(_) => {
            let bytes = parse_size(value);
            println!("{} = {} bytes", value.trim(), bytes);
        }
    }
}

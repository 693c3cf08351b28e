use super::{OutputParser, ToolEvent};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // "shred: /dev/sdb: pass 3/35 (random)...1.2GiB/10GiB 12%"
    static ref PASS: Regex = Regex::new(r"pass\s+(\d+)/(\d+)").expect("shred pass pattern is valid");
    static ref PERCENT: Regex = Regex::new(r"(\d+(?:\.\d+)?)%\s*$").expect("shred percent pattern is valid");
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShredParser;

impl OutputParser for ShredParser {
    fn parse(&self, line: &str) -> Option<ToolEvent> {
        if !line.contains("shred") {
            return None;
        }

        let percent = PERCENT
            .captures(line)
            .and_then(|caps| caps[1].parse::<f64>().ok());

        match PASS.captures(line) {
            Some(caps) => {
                let pass = caps[1].parse().ok()?;
                let total = caps[2].parse().ok()?;
                Some(ToolEvent::ShredPass {
                    pass,
                    total,
                    percent,
                })
            }
            None => percent.map(ToolEvent::PassPercent),
        }
    }
}

/// Folds shred events into an overall percent across all passes.
#[derive(Debug, Clone, Default)]
pub struct ShredProgress {
    pass: u32,
    total: u32,
    pass_percent: f64,
}

impl ShredProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update from `event`, returning the new overall percent.
    pub fn update(&mut self, event: &ToolEvent) -> Option<f64> {
        match *event {
            ToolEvent::ShredPass {
                pass,
                total,
                percent,
            } => {
                if pass != self.pass {
                    self.pass_percent = 0.0;
                }
                self.pass = pass;
                self.total = total;
                if let Some(percent) = percent {
                    self.pass_percent = percent;
                }
            }
            ToolEvent::PassPercent(percent) => self.pass_percent = percent,
            _ => return None,
        }
        Some(self.overall())
    }

    pub fn overall(&self) -> f64 {
        crate::stats::weighted_percent(self.pass, self.total, self.pass_percent)
    }

    pub fn pass(&self) -> (u32, u32) {
        (self.pass, self.total)
    }
}

use super::{OutputParser, ToolEvent};
use crate::size::parse_size;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Pre-1.20 single status line: "rescued:  500000000B,  errsize:  1024B, ..."
    static ref LEGACY: Regex = Regex::new(
        r"rescued:\s*([\d.]+\s*[kKMGT]?)B.*errsize:\s*([\d.]+\s*[kKMGT]?)B"
    )
    .expect("ddrescue legacy pattern is valid");

    // Newer releases print each figure on its own line
    static ref RESCUED: Regex = Regex::new(r"^\s*rescued:\s*([\d.]+\s*[kKMGT]?)B")
        .expect("ddrescue rescued pattern is valid");
    static ref BAD_SECTOR: Regex = Regex::new(r"bad-sector:\s*([\d.]+\s*[kKMGT]?)B")
        .expect("ddrescue bad-sector pattern is valid");
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DdrescueParser;

impl OutputParser for DdrescueParser {
    fn parse(&self, line: &str) -> Option<ToolEvent> {
        if let Some(caps) = LEGACY.captures(line) {
            return Some(ToolEvent::Rescued {
                rescued: parse_size(&caps[1]),
                errsize: parse_size(&caps[2]),
            });
        }
        if let Some(caps) = RESCUED.captures(line) {
            return Some(ToolEvent::RescuedBytes(parse_size(&caps[1])));
        }
        BAD_SECTOR
            .captures(line)
            .map(|caps| ToolEvent::BadSectorBytes(parse_size(&caps[1])))
    }
}

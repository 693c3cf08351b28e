use super::{OutputParser, ToolEvent};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // "5000000000 bytes (5.0 GB, 4.7 GiB) copied, 10 s, 500 MB/s"
    static ref COPIED: Regex =
        Regex::new(r"(\d+)\s+bytes\b.*\bcopied").expect("dd progress pattern is valid");
    static ref READ_ERROR: Regex =
        Regex::new(r"^dd: error reading\b").expect("dd error pattern is valid");
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DdParser;

impl OutputParser for DdParser {
    fn parse(&self, line: &str) -> Option<ToolEvent> {
        let line = line.trim();
        if READ_ERROR.is_match(line) {
            return Some(ToolEvent::ReadError);
        }
        let caps = COPIED.captures(line)?;
        caps[1].parse().ok().map(ToolEvent::BytesCopied)
    }
}

//! Parsers for the streaming output of dd, ddrescue and shred, plus the
//! one-shot output of the query tools (`hdparm -I`, `nvme id-ctrl`, `ent`,
//! hash utilities).
//!
//! Streaming parsers are pure: one line in, at most one [`ToolEvent`] out.

pub mod capture;
pub mod dd;
pub mod ddrescue;
pub mod shred;

pub use capture::{AtaSecurityState, NvmeCapabilities, SanitizeStatus};
pub use dd::DdParser;
pub use ddrescue::DdrescueParser;
pub use shred::ShredParser;

/// Something a tool reported while running.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToolEvent {
    /// dd: total bytes written so far
    BytesCopied(u64),
    /// dd: a read failed and the block was padded
    ReadError,
    /// ddrescue (legacy status line): rescued and error bytes
    Rescued { rescued: u64, errsize: u64 },
    /// ddrescue: rescued bytes on their own line
    RescuedBytes(u64),
    /// ddrescue: bad-sector bytes on their own line
    BadSectorBytes(u64),
    /// shred: a new pass started, optionally with its in-pass percent
    ShredPass {
        pass: u32,
        total: u32,
        percent: Option<f64>,
    },
    /// shred: in-pass percent without a pass marker
    PassPercent(f64),
}

pub trait OutputParser {
    fn parse(&self, line: &str) -> Option<ToolEvent>;
}

/// Which parser a streaming command's output goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Dd,
    Ddrescue,
    Shred,
    /// Output is logged but not interpreted
    Plain,
}

impl Dialect {
    pub fn parse(self, line: &str) -> Option<ToolEvent> {
        match self {
            Dialect::Dd => DdParser.parse(line),
            Dialect::Ddrescue => DdrescueParser.parse(line),
            Dialect::Shred => ShredParser.parse(line),
            Dialect::Plain => None,
        }
    }
}

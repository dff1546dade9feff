use std::path::PathBuf;

use chrono::NaiveDate;

pub const COMMAND_VERB: &str = "DOWNLOAD";

/// One-line request read by the export agent:
/// `DOWNLOAD;<instrument>;<YYYY-MM-DD>;<YYYY-MM-DD>;<export path>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFile {
    pub instrument: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub export_path: PathBuf,
}

impl CommandFile {
    pub fn to_line(&self) -> String {
        [
            COMMAND_VERB.to_string(),
            self.instrument.clone(),
            self.start.format("%Y-%m-%d").to_string(),
            self.end.format("%Y-%m-%d").to_string(),
            self.export_path.to_string_lossy().replace('\\', "/"),
        ]
        .join(";")
    }

    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.trim().splitn(5, ';');
        if parts.next()? != COMMAND_VERB {
            return None;
        }
        let instrument = parts.next()?.to_string();
        let start = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
        let end = NaiveDate::parse_from_str(parts.next()?, "%Y-%m-%d").ok()?;
        let export_path = PathBuf::from(parts.next()?);
        Some(Self {
            instrument,
            start,
            end,
            export_path,
        })
    }
}

//! The pipe-delimited diagnostic log written beside each session.

use crate::error::LoadError;
use crate::logfile::LogFile;
use crate::screen::Cursor;
use chrono::Local;
use std::io;
use std::path::Path;

pub const DIAGNOSTIC_HEADER: &str =
    "SessionID|Command_Seq|Function_Name|Actual|Expected|Cursor_Y|Cursor_X|Prev_Cursor_Y|Prev_Cursor_X|";

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[derive(Debug)]
pub struct DiagnosticLog {
    session_id: String,
    file: Option<LogFile>,
}

impl DiagnosticLog {
    /// Open the log and write its header and start row. `None` disables it.
    pub fn open(path: Option<&Path>, session_id: &str) -> Result<Self, LoadError> {
        let file = path.map(LogFile::create).transpose()?;
        let mut log = Self {
            session_id: session_id.to_string(),
            file,
        };
        let start = format!(
            "{}\n{}|{}|Starting|\n",
            DIAGNOSTIC_HEADER,
            log.session_id,
            timestamp()
        );
        log.write(&start).map_err(|source| LoadError::CreateLog {
            path: path.map(Path::to_path_buf).unwrap_or_default(),
            source,
        })?;
        Ok(log)
    }

    pub fn disabled(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            file: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(LogFile::path)
    }

    /// One row per driver event.
    pub fn event(
        &mut self,
        line: usize,
        event: &str,
        actual: &str,
        expected: &str,
        cursor: Cursor,
        prev: Cursor,
    ) -> io::Result<()> {
        let row = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|\n",
            self.session_id, line, event, actual, expected, cursor.row, cursor.col, prev.row, prev.col
        );
        self.write(&row)
    }

    /// The closing summary. `total` is the script length, if a script ran.
    pub fn summary(&mut self, processed: usize, total: Option<usize>) -> io::Result<()> {
        let text = match total {
            Some(total) => format!("Processed {} of {} Commands", processed, total),
            None => format!("Processed {} Commands", processed),
        };
        let row = format!("{}|{}|{}|\n", self.session_id, timestamp(), text);
        self.write(&row)
    }

    fn write(&mut self, s: &str) -> io::Result<()> {
        match &mut self.file {
            Some(file) => file.write_str(s),
            None => Ok(()),
        }
    }
}

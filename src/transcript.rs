//! Session transcript: per-line input and processed records, screen captures,
//! and the replayable inputs log.
//!
//! Records accumulate in a [`Cycle`] and are written out at the next screen
//! capture, so that each flushed block is followed by the screen it produced.

use crate::error::LoadError;
use crate::logfile::LogFile;
use crate::screen::Screen;
use chrono::Local;
use std::fmt::Write as _;
use std::io;
use std::path::Path;

/// Stands in for hidden input in every record.
pub const PRIVATE_INPUT: &str = "##private##";

/// Raw remote bytes kept per cycle.
const MAX_RAW_BYTES: usize = 64 * 1024;

/// Render control characters as `\xNN` so records stay on one line.
pub fn escape_field(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_control() {
            let _ = write!(out, "\\x{:02X}", c as u32);
        } else {
            out.push(c);
        }
    }
    out
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for chunk in bytes.utf8_chunks() {
        out.push_str(&escape_field(chunk.valid()));
        for b in chunk.invalid() {
            let _ = write!(out, "\\x{:02X}", b);
        }
    }
    out
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Everything recorded about one completed line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedLine {
    pub line: usize,
    pub seq: u32,
    /// Typed by hand after the script ran out.
    pub manual: bool,
    pub screen_identifier: String,
    pub screen_identifier_at: String,
    pub identifier_found_at: String,
    pub capture: String,
    pub prompt: String,
    pub prompt_at: String,
    pub prompt_found_at: String,
    pub cursor_at: String,
    pub sent_cursor: String,
    /// The text the line meant to send.
    pub sent: String,
    /// The echoed input with the submit key split off.
    pub processed: String,
    pub hidden: bool,
    pub submit_key: String,
    pub prompt_ok: String,
    pub pause: u64,
    pub script_id: String,
}

impl CompletedLine {
    fn redact<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        if self.hidden {
            PRIVATE_INPUT.into()
        } else {
            escape_field(text).into()
        }
    }

    fn hidden_field(&self) -> &'static str {
        if self.hidden { "Yes" } else { "No" }
    }

    /// `<Command_Input_Script>` or, for manual input, `<Command_Input_User>`.
    pub fn input_record(&self, session_id: &str) -> String {
        let tag = if self.manual {
            "Command_Input_User"
        } else {
            "Command_Input_Script"
        };
        format!(
            "<{tag}>{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|</{tag}>\n",
            session_id,
            self.line,
            escape_field(&self.screen_identifier),
            self.screen_identifier_at,
            self.capture,
            escape_field(&self.prompt),
            self.prompt_at,
            self.cursor_at,
            self.redact(&self.sent),
            self.hidden_field(),
            self.submit_key,
            self.pause,
            self.script_id,
        )
    }

    pub fn processed_record(&self, session_id: &str) -> String {
        format!(
            "<Command_Processed>{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|</Command_Processed>\n",
            session_id,
            self.line,
            escape_field(&self.screen_identifier),
            self.identifier_found_at,
            self.capture,
            escape_field(&self.prompt),
            self.prompt_found_at,
            self.sent_cursor,
            self.redact(&self.processed),
            self.hidden_field(),
            self.submit_key,
            self.prompt_ok,
            self.pause,
            self.script_id,
        )
    }

    /// The line in script format, so an inputs log can be replayed.
    pub fn script_line(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|\n",
            self.seq,
            escape_field(&self.screen_identifier),
            self.screen_identifier_at,
            self.capture,
            escape_field(&self.prompt),
            self.prompt_at,
            self.cursor_at,
            self.redact(&self.processed),
            self.hidden_field(),
            self.submit_key,
            self.pause,
            self.script_id,
        )
    }
}

/// Records buffered between two screen captures.
#[derive(Debug, Default)]
pub struct Cycle {
    records: String,
    inputs: String,
    raw: Vec<u8>,
    lines: Option<(usize, usize)>,
    screen_wanted: bool,
}

impl Cycle {
    pub fn is_empty(&self) -> bool {
        self.lines.is_none()
    }

    /// First and last line completed this cycle.
    pub fn lines(&self) -> Option<(usize, usize)> {
        self.lines
    }
}

/// Header fields of the capture log.
#[derive(Debug, Clone, Default)]
pub struct TranscriptHeader<'a> {
    pub user: &'a str,
    pub server: &'a str,
    pub script: &'a str,
}

#[derive(Debug)]
pub struct Transcript {
    session_id: String,
    capture: Option<LogFile>,
    inputs: Option<LogFile>,
    capture_raw: bool,
    cycle: Cycle,
}

impl Transcript {
    /// Create the capture and inputs logs. A `None` path disables that log.
    pub fn open(
        session_id: &str,
        capture: Option<&Path>,
        inputs: Option<&Path>,
        header: &TranscriptHeader<'_>,
    ) -> Result<Self, LoadError> {
        let mut transcript = Self {
            session_id: session_id.to_string(),
            capture: capture.map(LogFile::create).transpose()?,
            inputs: inputs.map(LogFile::create).transpose()?,
            capture_raw: false,
            cycle: Cycle::default(),
        };
        let head = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <events_log session_id=\"{}\">\n\
             <user>{}</user>\n\
             <server>{}</server>\n\
             <script>{}</script>\n\
             <process_start>{}</process_start>\n",
            session_id,
            header.user,
            header.server,
            header.script,
            timestamp()
        );
        transcript
            .write_capture(&head)
            .map_err(|source| LoadError::CreateLog {
                path: capture.map(Path::to_path_buf).unwrap_or_default(),
                source,
            })?;
        Ok(transcript)
    }

    pub fn with_raw_capture(mut self, enabled: bool) -> Self {
        self.capture_raw = enabled;
        self
    }

    pub fn capture_path(&self) -> Option<&Path> {
        self.capture.as_ref().map(LogFile::path)
    }

    pub fn inputs_path(&self) -> Option<&Path> {
        self.inputs.as_ref().map(LogFile::path)
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Buffer the records of a completed line.
    pub fn push(&mut self, done: &CompletedLine, records_screen: bool) {
        self.cycle.records.push_str(&done.input_record(&self.session_id));
        self.cycle.records.push_str(&done.processed_record(&self.session_id));
        self.cycle.inputs.push_str(&done.script_line());
        self.cycle.screen_wanted |= records_screen;
        self.cycle.lines = Some(match self.cycle.lines {
            Some((first, _)) => (first, done.line),
            None => (done.line, done.line),
        });
    }

    pub fn push_raw(&mut self, bytes: &[u8]) {
        if !self.capture_raw {
            return;
        }
        self.cycle.raw.extend_from_slice(bytes);
        if self.cycle.raw.len() > MAX_RAW_BYTES {
            let excess = self.cycle.raw.len() - MAX_RAW_BYTES;
            self.cycle.raw.drain(..excess);
        }
    }

    /// Write the buffered records, followed by the screen when any completed
    /// line asked for it, then start a new cycle.
    pub fn flush(&mut self, screen: &Screen) -> io::Result<()> {
        let cycle = std::mem::take(&mut self.cycle);
        let Some((first, last)) = cycle.lines else {
            return Ok(());
        };

        let mut out = cycle.records;
        if cycle.screen_wanted {
            let _ = write!(
                out,
                "<Commands_Processed_Screen>{}|{}|{}|</Commands_Processed_Screen>\n<Screen>\n{}\n</Screen>\n",
                self.session_id,
                first,
                last,
                screen.transcript_text()
            );
            if self.capture_raw && !cycle.raw.is_empty() {
                let _ = write!(out, "<Screen_Raw>\n{}\n</Screen_Raw>\n", escape_bytes(&cycle.raw));
            }
        }
        self.write_capture(&out)?;
        if let Some(inputs) = &mut self.inputs {
            inputs.write_str(&cycle.inputs)?;
        }
        Ok(())
    }

    /// Flush what is left and write the footer.
    pub fn close(mut self, screen: &Screen) -> io::Result<()> {
        self.flush(screen)?;
        let footer = format!("<process_finish>{}</process_finish>\n</events_log>\n", timestamp());
        self.write_capture(&footer)
    }

    fn write_capture(&mut self, s: &str) -> io::Result<()> {
        match &mut self.capture {
            Some(file) => file.write_str(s),
            None => Ok(()),
        }
    }
}

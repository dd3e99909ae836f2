//! Script lines and the typed screen positions they expect.

use anyhow::{Result, anyhow};
use std::fmt;
use std::path::{Path, PathBuf};

/// One coordinate of an expected position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coord {
    /// `*` (or a negative number): any value satisfies the check.
    Any,
    At(usize),
}

impl Coord {
    pub fn matches(self, actual: usize) -> bool {
        match self {
            Coord::Any => true,
            Coord::At(expected) => expected == actual,
        }
    }

    fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Coord::Any);
        }
        let value: i64 = s
            .parse()
            .map_err(|_| anyhow!("Invalid coordinate: '{}'", s))?;
        Ok(usize::try_from(value).map_or(Coord::Any, Coord::At))
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Coord::Any => f.write_str("*"),
            Coord::At(v) => write!(f, "{}", v),
        }
    }
}

/// An expected `row,col` position, either coordinate possibly wildcarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub row: Coord,
    pub col: Coord,
}

impl Position {
    pub fn at(row: usize, col: usize) -> Self {
        Self {
            row: Coord::At(row),
            col: Coord::At(col),
        }
    }

    /// Parse a `"row,col"` field. An empty field means "no expectation".
    ///
    /// A missing column (`"5"`) is a wildcard column.
    pub fn parse(field: &str) -> Result<Option<Self>> {
        let field = field.trim();
        if field.is_empty() {
            return Ok(None);
        }
        let (row, col) = field.split_once(',').unwrap_or((field, "*"));
        Ok(Some(Self {
            row: Coord::parse(row)?,
            col: Coord::parse(col)?,
        }))
    }

    pub fn matches(&self, row: usize, col: usize) -> bool {
        self.row.matches(row) && self.col.matches(col)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

/// Render an optional position the way transcript fields carry it.
pub(crate) fn position_field(pos: Option<Position>) -> String {
    pos.map(|p| p.to_string()).unwrap_or_default()
}

/// One scripted command and the screen state expected before it is sent.
///
/// Lines are immutable once a [`Script`] is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    /// 1-based position of this line in its script.
    pub line: usize,
    /// The sequence number written in the script file.
    pub seq: u32,
    pub screen_identifier: String,
    pub screen_identifier_at: Option<Position>,
    /// Screen capture flag: `No` disables capture, `Yes` forces a full-screen
    /// replace on the next capture, anything else records the screen.
    pub capture: String,
    pub prompt: String,
    pub prompt_at: Option<Position>,
    /// Cursor position required before anything is sent.
    pub cursor_at: Option<Position>,
    pub send: String,
    pub hidden: bool,
    pub submit_key: String,
    /// Seconds to wait after the line becomes active before sending.
    pub pause: u64,
    pub script_id: String,
}

impl ScriptLine {
    /// A line that sends `text` with no expectations, no submit key and no pause.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            line: 0,
            seq: 0,
            screen_identifier: String::new(),
            screen_identifier_at: None,
            capture: "No".to_string(),
            prompt: String::new(),
            prompt_at: None,
            cursor_at: None,
            send: text.into(),
            hidden: false,
            submit_key: String::new(),
            pause: 0,
            script_id: "0".to_string(),
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>, at: Option<Position>) -> Self {
        self.prompt = prompt.into();
        self.prompt_at = at;
        self
    }

    pub fn with_screen_identifier(mut self, identifier: impl Into<String>, at: Option<Position>) -> Self {
        self.screen_identifier = identifier.into();
        self.screen_identifier_at = at;
        self
    }

    pub fn with_cursor_at(mut self, at: Position) -> Self {
        self.cursor_at = Some(at);
        self
    }

    pub fn with_submit_key(mut self, key: impl Into<String>) -> Self {
        self.submit_key = key.into();
        self
    }

    pub fn with_capture(mut self, capture: impl Into<String>) -> Self {
        self.capture = capture.into();
        self
    }

    pub fn with_pause(mut self, secs: u64) -> Self {
        self.pause = secs;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn wants_full_capture(&self) -> bool {
        self.capture.trim().eq_ignore_ascii_case("yes")
    }

    pub fn records_screen(&self) -> bool {
        !self.capture.trim().eq_ignore_ascii_case("no")
    }

    /// True if the line expects anything on screen before sending.
    pub fn needs_screen(&self) -> bool {
        !self.screen_identifier.is_empty() || !self.prompt.is_empty()
    }
}

/// The loaded script: lines numbered from 1.
#[derive(Debug, Clone, Default)]
pub struct Script {
    lines: Vec<ScriptLine>,
    source: Option<PathBuf>,
}

impl Script {
    /// Build a script from lines, renumbering them from 1.
    pub fn new(lines: impl IntoIterator<Item = ScriptLine>) -> Self {
        let lines = lines
            .into_iter()
            .enumerate()
            .map(|(i, mut l)| {
                l.line = i + 1;
                l
            })
            .collect();
        Self {
            lines,
            source: None,
        }
    }

    pub(crate) fn with_source(mut self, path: &Path) -> Self {
        self.source = Some(path.to_path_buf());
        self
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Line `n`, 1-based.
    pub fn get(&self, n: usize) -> Option<&ScriptLine> {
        n.checked_sub(1).and_then(|i| self.lines.get(i))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

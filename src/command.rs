//! Per-line command state: the phase of the active line, its queued input,
//! the echo received so far, and the screen checks that gate sending.

use crate::keys::{KeyCodeTable, KeyFeed};
use crate::screen::{Cursor, Located, Screen};
use crate::script::{Coord, Position, ScriptLine};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Longest a line waits for an expected identifier or prompt to appear.
pub const MAX_COMMAND_WAIT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the pause, the cursor and the screen checks.
    Idle,
    /// Checks passed; input is being transmitted.
    Sending,
    /// Everything went out; waiting for the echo to complete.
    AwaitingEcho,
    Matched,
    /// Latched. Nothing more is sent this session.
    Mismatched,
    /// Script exhausted; typed commands are recorded.
    Manual,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Sending => "sending",
            Phase::AwaitingEcho => "awaiting-echo",
            Phase::Matched => "matched",
            Phase::Mismatched => "mismatched",
            Phase::Manual => "manual",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MismatchKind {
    ScreenIdentifier,
    ScreenIdentifierRow,
    ScreenIdentifierCol,
    Prompt,
    PromptRow,
    PromptCol,
}

impl MismatchKind {
    /// The expected text is absent rather than misplaced.
    pub fn is_absent(self) -> bool {
        matches!(self, MismatchKind::ScreenIdentifier | MismatchKind::Prompt)
    }

    pub fn is_prompt(self) -> bool {
        matches!(
            self,
            MismatchKind::Prompt | MismatchKind::PromptRow | MismatchKind::PromptCol
        )
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MismatchKind::ScreenIdentifier => "Screen Identifier Mismatch",
            MismatchKind::ScreenIdentifierRow => "Screen Identifier Position Mismatch (Y)",
            MismatchKind::ScreenIdentifierCol => "Screen Identifier Position Mismatch (X)",
            MismatchKind::Prompt => "Command Prompt Mismatch",
            MismatchKind::PromptRow => "Command Prompt Position Mismatch (Y)",
            MismatchKind::PromptCol => "Command Prompt Position Mismatch (X)",
        };
        f.write_str(name)
    }
}

/// Why a line's screen expectations failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    pub kind: MismatchKind,
    pub line: usize,
    pub expected: String,
    pub actual: String,
    /// "password" was visible when a prompt check failed past line 1.
    pub password_visible: bool,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on line {}: expected '{}', found '{}'",
            self.kind, self.line, self.expected, self.actual
        )
    }
}

/// Where a line's expected text was found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenMatch {
    pub identifier: Option<Located>,
    pub prompt: Option<Located>,
}

/// Check a line's screen identifier, then its prompt.
pub fn check_screen(line: &ScriptLine, screen: &Screen) -> Result<ScreenMatch, Mismatch> {
    let mut found = ScreenMatch::default();

    if !line.screen_identifier.is_empty() {
        let at = screen.locate(&line.screen_identifier).ok_or_else(|| Mismatch {
            kind: MismatchKind::ScreenIdentifier,
            line: line.line,
            expected: line.screen_identifier.clone(),
            actual: String::new(),
            password_visible: false,
        })?;
        check_position(
            line,
            line.screen_identifier_at,
            &at,
            MismatchKind::ScreenIdentifierRow,
            MismatchKind::ScreenIdentifierCol,
        )?;
        found.identifier = Some(at);
    }

    if !line.prompt.is_empty() {
        // Past the last accepted prompt the position is checked; an older
        // occurrence still counts as present.
        if let Some(at) = screen.locate_prompt(&line.prompt) {
            check_position(
                line,
                line.prompt_at,
                &at,
                MismatchKind::PromptRow,
                MismatchKind::PromptCol,
            )?;
            found.prompt = Some(at);
        } else {
            let at = screen.locate(&line.prompt).ok_or_else(|| Mismatch {
                kind: MismatchKind::Prompt,
                line: line.line,
                expected: line.prompt.clone(),
                actual: String::new(),
                password_visible: false,
            })?;
            found.prompt = Some(at);
        }
    }

    Ok(found)
}

fn check_position(
    line: &ScriptLine,
    expected: Option<Position>,
    at: &Located,
    row_kind: MismatchKind,
    col_kind: MismatchKind,
) -> Result<(), Mismatch> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let row_ok = match (expected.row, at.row) {
        (Coord::Any, _) => true,
        (Coord::At(want), Some(row)) => want == row,
        (Coord::At(_), None) => false,
    };
    if !row_ok {
        return Err(Mismatch {
            kind: row_kind,
            line: line.line,
            expected: expected.row.to_string(),
            actual: at.row.map_or_else(|| "-".to_string(), |r| r.to_string()),
            password_visible: false,
        });
    }
    if !expected.col.matches(at.col) {
        return Err(Mismatch {
            kind: col_kind,
            line: line.line,
            expected: expected.col.to_string(),
            actual: at.col.to_string(),
            password_visible: false,
        });
    }
    Ok(())
}

/// State of the active line, rebuilt whenever the line changes.
#[derive(Debug, Clone)]
pub struct CommandState {
    /// `None` in manual mode.
    pub(crate) line: Option<ScriptLine>,
    pub(crate) phase: Phase,
    pub(crate) feed: KeyFeed,
    /// Echoed bytes accumulated since sending began.
    pub(crate) echoed: Vec<u8>,
    pub(crate) wait_until: Option<Instant>,
    pub(crate) activated_at: Instant,
    /// Expected prompt, text or submit key present.
    pub(crate) actionable: bool,
    pub(crate) prompt_ok: &'static str,
    /// Cursor when the first echoed byte arrived.
    pub(crate) sent_cursor: Option<Cursor>,
    pub(crate) found: ScreenMatch,
    /// Manual mode: prompt inferred at the first keystroke.
    pub(crate) inferred_prompt: Option<(String, Cursor)>,
}

impl CommandState {
    pub fn for_line(line: &ScriptLine, keys: &KeyCodeTable, now: Instant) -> Self {
        let feed = KeyFeed::new(line.send.clone(), keys.resolve(&line.submit_key));
        let actionable = line.prompt.len() + line.send.len() + line.submit_key.len() > 0;
        Self {
            line: Some(line.clone()),
            phase: Phase::Idle,
            feed,
            echoed: Vec::new(),
            wait_until: (line.pause > 0).then(|| now + Duration::from_secs(line.pause)),
            activated_at: now,
            actionable,
            prompt_ok: "",
            sent_cursor: None,
            found: ScreenMatch::default(),
            inferred_prompt: None,
        }
    }

    pub fn manual(now: Instant) -> Self {
        Self {
            line: None,
            phase: Phase::Manual,
            feed: KeyFeed::default(),
            echoed: Vec::new(),
            wait_until: None,
            activated_at: now,
            actionable: false,
            prompt_ok: "N/A",
            sent_cursor: None,
            found: ScreenMatch::default(),
            inferred_prompt: None,
        }
    }

    pub fn line(&self) -> Option<&ScriptLine> {
        self.line.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_manual(&self) -> bool {
        self.line.is_none()
    }

    /// The pause before sending has elapsed.
    pub fn ready(&self, now: Instant) -> bool {
        self.wait_until.is_none_or(|until| now >= until)
    }

    /// The line has been waiting at least [`MAX_COMMAND_WAIT`].
    pub fn overdue(&self, now: Instant) -> bool {
        now >= self.activated_at + MAX_COMMAND_WAIT
    }

    /// The echo has caught up with everything transmitted so far.
    pub fn echo_caught_up(&self) -> bool {
        self.echoed.len() >= self.feed.sent_text().len()
    }

    /// The echo shows the whole line went through: the submit key at the
    /// tail, or without one, exactly the command text.
    pub fn echo_complete(&self) -> bool {
        if self.phase != Phase::AwaitingEcho {
            return false;
        }
        let submit = self.feed.submit();
        if submit.is_empty() {
            self.echoed == self.feed.text().as_bytes()
        } else {
            self.echoed.ends_with(submit)
        }
    }

    /// The processed input with any trailing submit key split off, and the
    /// submit key's name.
    pub fn split_processed(&self, keys: &KeyCodeTable) -> (String, String) {
        let (body, key) = match &self.line {
            Some(line) => {
                let submit = self.feed.submit();
                if !submit.is_empty() && self.echoed.ends_with(submit) {
                    (
                        &self.echoed[..self.echoed.len() - submit.len()],
                        line.submit_key.clone(),
                    )
                } else {
                    (&self.echoed[..], String::new())
                }
            }
            None => match keys.trailing_key(&self.echoed) {
                Some((name, len)) => (&self.echoed[..self.echoed.len() - len], name.to_string()),
                None => (&self.echoed[..], String::new()),
            },
        };
        (String::from_utf8_lossy(body).into_owned(), key)
    }
}

//! Loaders for script files and key-code files.
//!
//! The top-level entry points are [`parse_script_str`] / [`parse_script_file`]
//! and [`parse_keycodes_str`] / [`parse_keycodes_file`].
//!
//! A script line holds 12 `|`-separated fields, optionally followed by a
//! trailing `|`:
//!
//! ```text
//! seq|screen_id|screen_id_at|capture|prompt|prompt_at|cursor_at|send|hidden|submit_key|pause|script_id|
//! ```

use crate::error::LoadError;
use crate::keys::{KeyCode, KeyCodeTable};
use crate::script::{Position, Script, ScriptLine};
use anyhow::{Context as _, Result, anyhow};
use std::path::Path;

pub const SCRIPT_FIELDS: usize = 12;
pub const MAX_SCRIPT_LINES: usize = 250;
pub const MAX_KEY_CODES: usize = 1024;

/// Script lines shorter than this are blank or comments.
const MIN_SCRIPT_LINE_LEN: usize = SCRIPT_FIELDS;

const ESC_TOKEN: &str = "<esc>";

/// Parse a script from a string slice.
///
/// Lines shorter than 12 characters and lines starting with `#` are skipped.
///
/// # Errors
///
/// Returns an error if a line does not carry exactly 12 fields, if a numeric
/// or position field is malformed, or if the script holds more than
/// [`MAX_SCRIPT_LINES`] lines.
///
/// # Example
///
/// ```
/// use vtdriver::parse_script_str;
///
/// let script = parse_script_str("1||||$ |||ls -l|No|Enter|0|0|\n").unwrap();
/// assert_eq!(script.len(), 1);
/// assert_eq!(script.get(1).unwrap().send, "ls -l");
/// ```
pub fn parse_script_str(content: &str) -> Result<Script> {
    let mut lines = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.len() < MIN_SCRIPT_LINE_LEN || line.starts_with('#') {
            continue;
        }
        if lines.len() == MAX_SCRIPT_LINES {
            return Err(LoadError::TooManyEntries {
                kind: "script",
                max: MAX_SCRIPT_LINES,
            }
            .into());
        }
        let parsed = parse_script_line(line, line_num + 1)
            .with_context(|| format!("Failed to parse line {}: {}", line_num + 1, line))?;
        lines.push(parsed);
    }
    Ok(Script::new(lines))
}

/// Parse a script file.
///
/// A path that does not exist is retried under `Scripts/` in the working
/// directory before giving up.
pub fn parse_script_file(path: impl AsRef<Path>) -> Result<Script> {
    let path = path.as_ref();
    let resolved = if path.exists() {
        path.to_path_buf()
    } else {
        Path::new("Scripts").join(path)
    };
    let content = read_table(&resolved, "script")?;
    let script = parse_script_str(&content)
        .with_context(|| format!("Failed to parse script file: {}", resolved.display()))?;
    Ok(script.with_source(&resolved))
}

/// Parse a key-code table from a string slice: one `name|ansi` pair per line.
///
/// # Errors
///
/// Returns an error if a non-blank line has no `|` separator or if the table
/// holds more than [`MAX_KEY_CODES`] entries.
pub fn parse_keycodes_str(content: &str) -> Result<KeyCodeTable> {
    let mut entries = Vec::new();
    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        if entries.len() == MAX_KEY_CODES {
            return Err(LoadError::TooManyEntries {
                kind: "key codes",
                max: MAX_KEY_CODES,
            }
            .into());
        }
        let mut fields = line.split('|');
        let name = fields.next().unwrap_or_default();
        let ansi = fields.next().ok_or(LoadError::FieldCount {
            kind: "key codes",
            line: line_num + 1,
            expected: 2,
            found: 1,
        })?;
        entries.push(KeyCode {
            name: if name.is_empty() { "0".to_string() } else { name.to_string() },
            ansi: rewrite_esc(ansi),
        });
    }
    Ok(KeyCodeTable::new(entries))
}

/// Parse a key-code file.
pub fn parse_keycodes_file(path: impl AsRef<Path>) -> Result<KeyCodeTable> {
    let path = path.as_ref();
    let content = read_table(path, "key codes")?;
    parse_keycodes_str(&content)
        .with_context(|| format!("Failed to parse key codes file: {}", path.display()))
}

fn read_table(path: &Path, kind: &'static str) -> Result<String> {
    if !path.exists() {
        return Err(LoadError::MissingFile {
            kind,
            path: path.to_path_buf(),
        }
        .into());
    }
    std::fs::read_to_string(path).map_err(|source| {
        LoadError::Unreadable {
            kind,
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

fn parse_script_line(line: &str, line_num: usize) -> Result<ScriptLine> {
    let body = line.strip_suffix('|').unwrap_or(line);
    let fields: Vec<&str> = body.split('|').collect();
    if fields.len() != SCRIPT_FIELDS {
        return Err(LoadError::FieldCount {
            kind: "script",
            line: line_num,
            expected: SCRIPT_FIELDS,
            found: fields.len(),
        }
        .into());
    }

    Ok(ScriptLine {
        line: 0,
        seq: parse_number(fields[0], "sequence")?,
        screen_identifier: fields[1].to_string(),
        screen_identifier_at: Position::parse(fields[2]).context("Invalid screen identifier position")?,
        capture: fields[3].to_string(),
        prompt: fields[4].to_string(),
        prompt_at: Position::parse(fields[5]).context("Invalid command prompt position")?,
        cursor_at: Position::parse(fields[6]).context("Invalid input cursor position")?,
        send: fields[7].to_string(),
        hidden: fields[8].trim().eq_ignore_ascii_case("yes"),
        submit_key: fields[9].trim().to_string(),
        pause: parse_number(fields[10], "pause")?,
        script_id: match fields[11].trim() {
            "" => "0".to_string(),
            id => id.to_string(),
        },
    })
}

fn parse_number<T: std::str::FromStr>(s: &str, what: &str) -> Result<T> {
    let s = s.trim();
    let s = if s.is_empty() { "0" } else { s };
    s.parse()
        .map_err(|_| anyhow!("Invalid {} value: '{}'", what, s))
}

/// Rewrite a leading `<esc>` token to the escape byte.
fn rewrite_esc(ansi: &str) -> String {
    match ansi.strip_prefix(ESC_TOKEN) {
        Some(rest) => format!("\x1b{}", rest),
        None => ansi.to_string(),
    }
}

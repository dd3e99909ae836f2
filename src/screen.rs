//! Reconstructed screen text.
//!
//! Every capture the terminal hands back is the currently visible screen. The
//! [`Screen`] splices each capture onto the rows it already knows, so that
//! substring checks see a stable logical buffer that also covers content that
//! has scrolled off the top.

use std::fmt;

pub const MAX_SCREEN_ROWS: usize = 2048;
pub const MAX_SCREEN_COLS: usize = 256;

/// A `(row, col)` terminal position, 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
}

impl Cursor {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

/// Split captured text into bounded rows.
///
/// Carriage returns are dropped. Rows beyond [`MAX_SCREEN_COLS`] characters
/// and captures beyond [`MAX_SCREEN_ROWS`] rows are truncated.
pub fn split_rows(raw: &str) -> Vec<String> {
    raw.lines()
        .take(MAX_SCREEN_ROWS)
        .map(|row| {
            row.chars()
                .filter(|&c| c != '\r')
                .take(MAX_SCREEN_COLS)
                .collect()
        })
        .collect()
}

/// Where a new capture lines up with the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Overlap {
    /// No reliable overlap: the new capture is a different screen.
    Disjoint,
    /// Row `old` of the previous capture is row `new` of the new one.
    At { old: usize, new: usize },
}

/// Line up the tail of `old` with `new`.
///
/// The last non-blank row of `old` is looked for in `new`, newest row first.
/// Each candidate is confirmed by walking both tables backwards while rows
/// are equal; a candidate that reaches the top of either table wins.
pub fn find_overlap(old: &[String], new: &[String]) -> Overlap {
    let Some(p) = old.iter().rposition(|row| !row.trim().is_empty()) else {
        return Overlap::Disjoint;
    };
    let anchor = old[p].trim_end();

    for q in (0..new.len()).rev() {
        if !new[q].contains(anchor) {
            continue;
        }
        let (mut i, mut j) = (p, q);
        let confirmed = loop {
            if i == 0 || j == 0 {
                break true;
            }
            i -= 1;
            j -= 1;
            if old[i].trim_end() != new[j].trim_end() {
                break false;
            }
        };
        if confirmed {
            return Overlap::At { old: p, new: q };
        }
    }
    Overlap::Disjoint
}

/// How a capture was merged into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenUpdate {
    Replaced,
    /// The first `kept` buffer rows were preserved.
    Spliced { kept: usize },
}

/// Text found on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Located {
    /// Index into the reconciled buffer.
    pub buffer_row: usize,
    /// Character offset within the buffer row.
    pub offset: usize,
    /// Display row on the visible screen; `None` once scrolled off.
    pub row: Option<usize>,
    /// Display column.
    pub col: usize,
}

impl Located {
    /// The `row,col` form written to transcripts.
    pub fn field(&self) -> String {
        match self.row {
            Some(row) => format!("{},{}", row, self.col),
            None => format!("-,{}", self.col),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Screen {
    /// Reconciled rows, oldest first.
    buffer: Vec<String>,
    /// Rows of the latest capture; always the tail of `buffer`.
    capture: Vec<String>,
    cursor: Cursor,
    prev_cursor: Cursor,
    /// Terminal width, for placing wrapped rows.
    cols: usize,
    /// Buffer position of the last accepted prompt. Prompt searches only
    /// accept occurrences after it.
    floor: Option<(usize, usize)>,
}

impl Screen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a new capture into the buffer.
    ///
    /// `full` forces the capture to replace everything.
    pub fn update(&mut self, raw: &str, full: bool) -> ScreenUpdate {
        let new = split_rows(raw);
        let overlap = if full {
            Overlap::Disjoint
        } else {
            find_overlap(&self.capture, &new)
        };

        let result = match overlap {
            Overlap::Disjoint => {
                self.buffer = new.clone();
                self.floor = None;
                ScreenUpdate::Replaced
            }
            Overlap::At { old, new: q } => {
                let base = self.buffer.len() - self.capture.len();
                let split = (base + old).checked_sub(q);
                let kept = split.unwrap_or(0);
                if split.is_none() {
                    self.floor = None;
                }
                self.buffer.truncate(kept);
                self.buffer.extend(new.iter().cloned());
                ScreenUpdate::Spliced { kept }
            }
        };
        self.capture = new;

        if self.buffer.len() > MAX_SCREEN_ROWS {
            let dropped = self.buffer.len() - MAX_SCREEN_ROWS;
            self.buffer.drain(..dropped);
            self.floor = self
                .floor
                .and_then(|(row, col)| row.checked_sub(dropped).map(|row| (row, col)));
        }
        self.prev_cursor = self.cursor;
        result
    }

    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    pub fn set_width(&mut self, cols: usize) {
        self.cols = cols;
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Cursor position when the last capture was merged.
    pub fn prev_cursor(&self) -> Cursor {
        self.prev_cursor
    }

    /// Reconciled rows, oldest first.
    pub fn rows(&self) -> &[String] {
        &self.buffer
    }

    /// The flattened buffer, one row per line.
    pub fn text(&self) -> String {
        self.buffer.join("\n")
    }

    /// The buffer as written to a capture log: carriage returns replaced by
    /// spaces and trailing whitespace trimmed.
    pub fn transcript_text(&self) -> String {
        self.buffer
            .iter()
            .map(|row| row.replace('\r', " ").trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Find the most recent occurrence of `needle`, searching from the bottom.
    pub fn locate(&self, needle: &str) -> Option<Located> {
        self.locate_after(needle, None)
    }

    /// Like [`locate`](Self::locate), ignoring anything at or before the
    /// last accepted prompt.
    pub fn locate_prompt(&self, needle: &str) -> Option<Located> {
        self.locate_after(needle, self.floor)
    }

    /// Accept a prompt occurrence; later prompt searches must find a newer one.
    /// The floor never moves back.
    pub fn accept_prompt(&mut self, found: &Located) {
        self.floor = self.floor.max(Some((found.buffer_row, found.offset)));
    }

    fn locate_after(&self, needle: &str, floor: Option<(usize, usize)>) -> Option<Located> {
        if needle.is_empty() {
            return None;
        }
        let lowest = floor.map_or(0, |(row, _)| row);
        for r in (lowest..self.buffer.len()).rev() {
            let row = &self.buffer[r];
            let Some(byte_idx) = row.rfind(needle) else {
                continue;
            };
            let offset = row[..byte_idx].chars().count();
            if let Some((floor_row, floor_col)) = floor {
                if r == floor_row && offset <= floor_col {
                    return None;
                }
            }
            return Some(self.position_of(r, offset));
        }
        None
    }

    fn position_of(&self, buffer_row: usize, offset: usize) -> Located {
        let top = self.buffer.len() - self.capture.len();
        let Some(index) = buffer_row.checked_sub(top) else {
            return Located {
                buffer_row,
                offset,
                row: None,
                col: offset,
            };
        };
        let wrapped: usize = self.capture[..index]
            .iter()
            .map(|row| self.extra_rows(row))
            .sum();
        let (row, col) = if self.cols > 0 {
            (index + wrapped + offset / self.cols, offset % self.cols)
        } else {
            (index, offset)
        };
        Located {
            buffer_row,
            offset,
            row: Some(row),
            col,
        }
    }

    /// Display rows a logical row occupies beyond its first.
    fn extra_rows(&self, row: &str) -> usize {
        let len = row.chars().count();
        if self.cols == 0 || len == 0 {
            0
        } else {
            (len - 1) / self.cols
        }
    }

    /// The text shown on display row `row` of the visible screen.
    pub fn display_row(&self, row: usize) -> Option<String> {
        let mut top = 0;
        for line in &self.capture {
            let span = 1 + self.extra_rows(line);
            if row < top + span {
                let part = row - top;
                return Some(match self.cols {
                    0 => line.clone(),
                    cols => line.chars().skip(part * cols).take(cols).collect(),
                });
            }
            top += span;
        }
        None
    }

    /// The prompt left of the cursor: text on the cursor row back to the
    /// last double space. Returns the prompt and its display position.
    pub fn prompt_before_cursor(&self) -> Option<(String, Cursor)> {
        let line = self.display_row(self.cursor.row)?;
        let left: String = line.chars().take(self.cursor.col).collect();
        let start = left.rfind("  ").map_or(0, |i| i + 2);
        let prompt = &left[start..];
        if prompt.trim().is_empty() {
            return None;
        }
        let col = left[..start].chars().count();
        Some((prompt.to_string(), Cursor::new(self.cursor.row, col)))
    }
}

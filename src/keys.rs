//! Key-code table and the keystroke feed that transmits a line's input.
//!
//! A key-code file maps symbolic names (`Enter`, `Tab`, `Up`) to the bytes the
//! terminal expects. The ANSI side is either a decimal character code (`13`)
//! or a literal sequence, where a leading `<esc>` token stands for 0x1B.

/// One `name|ansi` entry from the key-code file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCode {
    pub name: String,
    /// The ANSI side with any `<esc>` prefix already rewritten.
    pub ansi: String,
}

impl KeyCode {
    /// Bytes to transmit for this key.
    pub fn bytes(&self) -> Vec<u8> {
        match decimal_code(&self.ansi) {
            Some(code) => vec![code],
            None => self.ansi.as_bytes().to_vec(),
        }
    }

    fn matches(&self, seq: &[u8]) -> bool {
        match decimal_code(&self.ansi) {
            Some(code) => seq == [code],
            None => self.ansi.as_bytes() == seq,
        }
    }

    /// Whether typing this key ends a command line. Printable characters and
    /// the editing keys (backspace, delete) are part of the line being typed.
    pub fn ends_command(&self) -> bool {
        match self.bytes().as_slice() {
            [] => false,
            [b] => !matches!(*b, 0x20..=0x7E | 0x08 | 0x7F),
            _ => true,
        }
    }
}

/// Key codes in file order. Lookups return the first match.
#[derive(Debug, Clone, Default)]
pub struct KeyCodeTable {
    entries: Vec<KeyCode>,
}

impl KeyCodeTable {
    pub fn new(entries: Vec<KeyCode>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolve a symbolic key name to the bytes to transmit.
    ///
    /// A purely numeric name is a character code. Unknown names resolve to an
    /// empty sequence, which transmits nothing.
    pub fn resolve(&self, name: &str) -> Vec<u8> {
        let name = name.trim();
        if name.is_empty() {
            return Vec::new();
        }
        if let Some(code) = decimal_code(name) {
            return vec![code];
        }
        self.entries
            .iter()
            .find(|k| k.name == name)
            .map(KeyCode::bytes)
            .unwrap_or_default()
    }

    /// Reverse lookup: the name of the key whose sequence is `seq`.
    ///
    /// An entry whose ANSI side is a decimal code matches only the single
    /// byte with that code.
    pub fn name_for(&self, seq: &[u8]) -> Option<&str> {
        if seq.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|k| k.matches(seq))
            .map(|k| k.name.as_str())
    }

    fn terminator_for(&self, seq: &[u8]) -> Option<&str> {
        self.entries
            .iter()
            .find(|k| k.ends_command() && k.matches(seq))
            .map(|k| k.name.as_str())
    }

    /// Find a key that ends a command at the end of `input`.
    ///
    /// Tries the tail starting at the last escape byte, then the final byte.
    /// Keys that type text or edit the line never match. Returns the key name
    /// and the length of the matched tail.
    pub fn trailing_key(&self, input: &[u8]) -> Option<(&str, usize)> {
        if let Some(esc) = input.iter().rposition(|&b| b == 0x1B) {
            let tail = &input[esc..];
            if let Some(name) = self.terminator_for(tail) {
                return Some((name, tail.len()));
            }
        }
        let last = input.len().checked_sub(1)?;
        self.terminator_for(&input[last..]).map(|name| (name, 1))
    }
}

fn decimal_code(s: &str) -> Option<u8> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// How command text is handed to the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// The whole remaining text in one write.
    Atomic,
    /// One character per tick, emulating live typing.
    Drip,
}

/// Queued input for the active line: command text, then the submit key.
#[derive(Debug, Clone, Default)]
pub struct KeyFeed {
    text: String,
    pos: usize,
    submit: Vec<u8>,
    submit_sent: bool,
}

impl KeyFeed {
    pub fn new(text: impl Into<String>, submit: Vec<u8>) -> Self {
        Self {
            text: text.into(),
            pos: 0,
            submit,
            submit_sent: false,
        }
    }

    /// The next bytes to transmit, or `None` once everything has gone out.
    pub fn next_chunk(&mut self, mode: SendMode) -> Option<Vec<u8>> {
        if self.pos < self.text.len() {
            let rest = &self.text[self.pos..];
            let take = match mode {
                SendMode::Atomic => rest.len(),
                SendMode::Drip => rest.chars().next().map_or(0, char::len_utf8),
            };
            self.pos += take;
            return Some(rest.as_bytes()[..take].to_vec());
        }
        if !self.submit.is_empty() && !self.submit_sent {
            self.submit_sent = true;
            return Some(self.submit.clone());
        }
        None
    }

    /// Command text transmitted so far.
    pub fn sent_text(&self) -> &str {
        &self.text[..self.pos]
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn text_done(&self) -> bool {
        self.pos >= self.text.len()
    }

    pub fn submit(&self) -> &[u8] {
        &self.submit
    }

    pub fn is_done(&self) -> bool {
        self.text_done() && (self.submit.is_empty() || self.submit_sent)
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.submit.is_empty()
    }
}

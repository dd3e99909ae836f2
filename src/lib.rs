//! # vtdriver
//!
//! A terminal-automation driver. It replays a pipe-delimited command script
//! against a live terminal session: for each line it waits for the expected
//! screen identifier and prompt to appear at their expected positions, types
//! the command, waits for the echo, and records everything in a transcript.
//! Once the script runs out, manually typed commands are recorded in the same
//! format, so a session can be captured once and replayed later.
//!
//! ## Quick start
//!
//! The `vtdriver` binary runs a program in a PTY and drives it:
//!
//! ```text
//! vtdriver --script login.txt --keycodes Scripts/KeyCodes_Default.txt --command ssh db01
//! ```
//!
//! ## Driving a terminal of your own
//!
//! A [`Session`] never blocks and never spawns anything. Implement
//! [`Terminal`] for whatever carries the keystrokes, then call the three entry
//! points as events arrive:
//!
//! ```no_run
//! use vtdriver::{DataKind, DriverConfig, Session, Terminal, Viewport};
//! use vtdriver::{parse_keycodes_str, parse_script_str};
//!
//! struct Recorder {
//!     sent: Vec<u8>,
//!     wants_capture: bool,
//! }
//!
//! impl Terminal for Recorder {
//!     fn send_keys(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
//!         self.sent.extend_from_slice(bytes);
//!         Ok(())
//!     }
//!
//!     fn request_screen_capture(&mut self) -> anyhow::Result<()> {
//!         self.wants_capture = true;
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let script = parse_script_str("1||||$ |||whoami|No|Enter|0|0|\n")?;
//!     let keys = parse_keycodes_str("Enter|13|\n")?;
//!     let terminal = Recorder { sent: Vec::new(), wants_capture: false };
//!     let mut session = Session::start(&DriverConfig::quiet(), script, keys, terminal)?;
//!
//!     session.on_viewport(Viewport::new(0, 2, 80, 24))?;
//!     if session.terminal().wants_capture {
//!         session.screen_capture_result("$ ")?;
//!     }
//!     let sent = session.terminal().sent.clone();
//!     session.on_data(&sent, DataKind::Echoed)?;
//!
//!     let summary = session.finish()?;
//!     println!("processed {} of {}", summary.processed, summary.total);
//!     Ok(())
//! }
//! ```
//!
//! ## Script format
//!
//! Twelve `|`-separated fields per line, with an optional trailing `|`:
//!
//! | # | Field | Meaning |
//! |---|-------|---------|
//! | 1 | sequence | Number copied into records |
//! | 2 | screen identifier | Text that must be on screen |
//! | 3 | identifier position | `row,col`; either may be `*` |
//! | 4 | capture | `No`, `Yes` (full-screen capture) or anything else |
//! | 5 | prompt | Text that must appear after the last accepted prompt |
//! | 6 | prompt position | `row,col` |
//! | 7 | cursor position | Cursor required before sending |
//! | 8 | input | Text to type |
//! | 9 | hidden | `Yes` keeps the input out of every log |
//! | 10 | submit key | Key name from the key-code file, or a character code |
//! | 11 | pause | Seconds to wait before sending |
//! | 12 | script id | Copied into records |
//!
//! Lines shorter than 12 characters and lines starting with `#` are skipped.

pub mod command;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod host;
pub mod keys;
pub(crate) mod logfile;
pub mod parser;
pub(crate) mod pty;
pub(crate) mod pty_reader;
pub mod screen;
pub mod script;
pub mod session;
pub mod terminal;
pub mod transcript;

pub use command::{Mismatch, MismatchKind, Phase};
pub use config::{DriverConfig, LogTarget};
pub use error::LoadError;
pub use keys::{KeyCode, KeyCodeTable};
pub use parser::{parse_keycodes_file, parse_keycodes_str, parse_script_file, parse_script_str};
pub use screen::{Cursor, Screen};
pub use script::{Coord, Position, Script, ScriptLine};
pub use session::{Session, Summary};
pub use terminal::{DataKind, Terminal, Viewport};

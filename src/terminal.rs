//! The seam between a [`Session`](crate::Session) and the terminal it drives.

use crate::screen::Cursor;
use anyhow::Result;

/// The terminal side of a session.
///
/// Implementations must not call back into the session from these methods.
/// Capture requests are answered later through
/// [`Session::screen_capture_result`](crate::Session::screen_capture_result),
/// and bytes sent are reported back through
/// [`Session::on_data`](crate::Session::on_data) once the handler returns.
pub trait Terminal {
    /// Push literal bytes or escape sequences to the terminal input.
    fn send_keys(&mut self, bytes: &[u8]) -> Result<()>;

    /// Ask for a copy of the visible screen text.
    fn request_screen_capture(&mut self) -> Result<()>;
}

/// Classification of bytes passed to [`Session::on_data`](crate::Session::on_data).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Input written to the terminal, whether sent by the driver or typed.
    Echoed,
    /// Output produced by the remote side.
    Remote,
}

/// Cursor and size reported on every tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub cursor: Cursor,
    pub cols: usize,
    pub rows: usize,
    /// The terminal is still busy repainting; screen checks wait.
    pub command_in_progress: bool,
}

impl Viewport {
    pub fn new(row: usize, col: usize, cols: usize, rows: usize) -> Self {
        Self {
            cursor: Cursor::new(row, col),
            cols,
            rows,
            command_in_progress: false,
        }
    }

    pub fn busy(mut self) -> Self {
        self.command_in_progress = true;
        self
    }
}

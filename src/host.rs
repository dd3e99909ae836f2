//! Runs a program in a PTY and plays the terminal side of a [`Session`].
//!
//! Output from the program is mirrored to stdout and rendered with `vt100`;
//! stdin is forwarded to the program. Every byte written to the PTY is
//! reported back to the session as [`DataKind::Echoed`], program output as
//! [`DataKind::Remote`], and capture requests are answered from the rendered
//! screen.

use crate::config::DriverConfig;
use crate::keys::KeyCodeTable;
use crate::pty::PtySession;
use crate::pty_reader::spawn_reader;
use crate::script::Script;
use crate::session::{Session, Summary};
use crate::terminal::{DataKind, Terminal, Viewport};
use anyhow::{Context as _, Result};
use std::io::{self, IsTerminal, Write};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, TryRecvError};
use tracing::{debug, info};

/// Echo and capture round trips handled per tick.
const MAX_PUMP_ROUNDS: usize = 4;

/// [`Terminal`] backed by a PTY.
///
/// Sent bytes and capture requests are queued and handed to the session by
/// the host loop once the session returns.
pub struct PtyLink {
    pty: PtySession,
    echo: Vec<u8>,
    capture_requested: bool,
}

impl PtyLink {
    pub(crate) fn new(pty: PtySession) -> Self {
        Self {
            pty,
            echo: Vec::new(),
            capture_requested: false,
        }
    }

    /// Forward typed input without queueing it as echo.
    fn write_through(&mut self, data: &[u8]) -> Result<()> {
        self.pty.write(data)
    }
}

impl Terminal for PtyLink {
    fn send_keys(&mut self, bytes: &[u8]) -> Result<()> {
        self.pty.write(bytes)?;
        self.echo.extend_from_slice(bytes);
        Ok(())
    }

    fn request_screen_capture(&mut self) -> Result<()> {
        self.capture_requested = true;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct HostOptions {
    pub command: String,
    pub args: Vec<String>,
    /// Stop once the script is exhausted or halted.
    pub exit_on_complete: bool,
}

/// Restores cooked mode on drop.
struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    fn enable() -> Result<Self> {
        if !io::stdin().is_terminal() {
            return Ok(Self { enabled: false });
        }
        crossterm::terminal::enable_raw_mode().context("Failed to enable raw mode")?;
        Ok(Self { enabled: true })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            let _ = crossterm::terminal::disable_raw_mode();
        }
    }
}

/// Spawn the program, drive the session until it ends, and finish it.
pub async fn run(
    config: DriverConfig,
    script: Script,
    keys: KeyCodeTable,
    options: HostOptions,
) -> Result<Summary> {
    let (cols, rows) = crossterm::terminal::size().unwrap_or((80, 24));
    let (pty, reader) = PtySession::spawn(&options.command, &options.args, rows, cols)?;
    let output_rx = spawn_reader(reader);

    let mut session = Session::start(&config, script, keys, PtyLink::new(pty))?;

    let stop = session.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.store(true, Ordering::Relaxed);
        }
    });

    let raw_mode = RawModeGuard::enable()?;
    let input_rx = spawn_reader(io::stdin());
    let mut parser = vt100::Parser::new(rows, cols, 0);

    let outcome = drive(
        &mut session,
        &mut parser,
        &output_rx,
        &input_rx,
        &config,
        options.exit_on_complete,
    )
    .await;
    drop(raw_mode);

    if options.exit_on_complete {
        let link = session.terminal_mut();
        if link.pty.exited().is_none() {
            if let Err(e) = link.pty.kill() {
                debug!(error = %e, "could not stop program");
            }
        }
    }
    let summary = session.finish()?;
    outcome?;
    Ok(summary)
}

async fn drive(
    session: &mut Session<PtyLink>,
    parser: &mut vt100::Parser,
    output_rx: &Receiver<Vec<u8>>,
    input_rx: &Receiver<Vec<u8>>,
    config: &DriverConfig,
    exit_on_complete: bool,
) -> Result<()> {
    let mut ticker = tokio::time::interval(config.screen_speed);
    let mut stdout = io::stdout();

    loop {
        ticker.tick().await;
        if session.is_stopped() {
            info!("interrupted");
            return Ok(());
        }

        let mut busy = false;
        let mut closed = false;
        loop {
            match output_rx.try_recv() {
                Ok(data) => {
                    stdout.write_all(&data)?;
                    parser.process(&data);
                    session.on_data(&data, DataKind::Remote)?;
                    busy = true;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }
        stdout.flush()?;

        while let Ok(data) = input_rx.try_recv() {
            session.terminal_mut().write_through(&data)?;
            session.on_data(&data, DataKind::Echoed)?;
        }

        follow_resize(session, parser)?;
        let screen = parser.screen();
        let (row, col) = screen.cursor_position();
        let (rows, cols) = screen.size();
        let viewport = Viewport::new(row.into(), col.into(), cols.into(), rows.into());
        session.on_viewport(if busy { viewport.busy() } else { viewport })?;
        pump(session, parser)?;

        if let Some(code) = session.terminal_mut().pty.exited() {
            info!(code, "program exited");
            return Ok(());
        }
        if closed {
            info!("program output closed");
            return Ok(());
        }
        if exit_on_complete && (session.mismatch().is_some() || session.is_script_finished()) {
            debug!(line = session.current_line(), "script done, leaving");
            return Ok(());
        }
    }
}

/// Keep the PTY and the rendered screen at the size of the local terminal.
fn follow_resize(session: &mut Session<PtyLink>, parser: &mut vt100::Parser) -> Result<()> {
    let Ok((cols, rows)) = crossterm::terminal::size() else {
        return Ok(());
    };
    if (rows, cols) == parser.screen().size() || rows == 0 || cols == 0 {
        return Ok(());
    }
    debug!(rows, cols, "terminal resized");
    session.terminal_mut().pty.resize(rows, cols)?;
    parser.set_size(rows, cols);
    Ok(())
}

/// Hand queued echo and capture requests back to the session.
fn pump(session: &mut Session<PtyLink>, parser: &vt100::Parser) -> Result<()> {
    for _ in 0..MAX_PUMP_ROUNDS {
        let link = session.terminal_mut();
        let echo = std::mem::take(&mut link.echo);
        let capture = std::mem::take(&mut link.capture_requested);
        if echo.is_empty() && !capture {
            break;
        }
        if !echo.is_empty() {
            session.on_data(&echo, DataKind::Echoed)?;
        }
        if capture {
            session.screen_capture_result(&capture_text(parser.screen()))?;
        }
    }
    Ok(())
}

/// The visible screen, one line per row.
///
/// `vt100` drops trailing blanks; the cursor row is padded out to the cursor
/// so a prompt ending in a space stays visible.
fn capture_text(screen: &vt100::Screen) -> String {
    let (cursor_row, cursor_col) = screen.cursor_position();
    let (_, cols) = screen.size();
    let mut rows: Vec<String> = screen.rows(0, cols).collect();
    if let Some(row) = rows.get_mut(usize::from(cursor_row)) {
        let len = row.chars().count();
        let want = usize::from(cursor_col);
        if len < want {
            row.extend(std::iter::repeat_n(' ', want - len));
        }
    }
    rows.join("\n")
}

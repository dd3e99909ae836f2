use anyhow::{Context, Result};
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};

/// Terminal type announced to the program; matches what `vt100` renders.
const TERM: &str = "xterm";

/// A program running inside a PTY.
pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
}

fn pty_size(rows: u16, cols: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

impl PtySession {
    /// Spawn `command` in a PTY of the given size, returning the session and
    /// its output reader separately.
    pub fn spawn(command: &str, args: &[String], rows: u16, cols: u16) -> Result<(Self, Box<dyn Read + Send>)> {
        let pair = portable_pty::native_pty_system()
            .openpty(pty_size(rows, cols))
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        cmd.env("TERM", TERM);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn command: {}", command))?;
        let writer = pair
            .master
            .take_writer()
            .context("Failed to get PTY writer")?;
        let reader = pair
            .master
            .try_clone_reader()
            .context("Failed to get PTY reader")?;

        Ok((
            PtySession {
                master: pair.master,
                child,
                writer,
            },
            reader,
        ))
    }

    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        self.writer.flush()?;
        Ok(())
    }

    /// The exit code, once the program has exited.
    pub fn exited(&mut self) -> Option<u32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status.exit_code()),
            Ok(None) => None,
            Err(_) => Some(u32::MAX),
        }
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        self.master
            .resize(pty_size(rows, cols))
            .context("Failed to resize PTY")
    }

    pub fn kill(&mut self) -> Result<()> {
        self.child.kill().context("Failed to kill child process")
    }
}

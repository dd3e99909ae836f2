//! The driver session: owns the screen, the active line and the logs, and is
//! advanced only by the terminal calling its entry points.
//!
//! A host calls [`Session::on_viewport`] on every tick, [`Session::on_data`]
//! for every chunk of input or output, and [`Session::screen_capture_result`]
//! when a capture it was asked for is ready. None of these block.

use crate::command::{CommandState, MAX_COMMAND_WAIT, Mismatch, Phase, ScreenMatch, check_screen};
use crate::config::DriverConfig;
use crate::diagnostics::DiagnosticLog;
use crate::keys::{KeyCodeTable, SendMode};
use crate::screen::{Cursor, Screen};
use crate::script::{Script, ScriptLine, position_field};
use crate::terminal::{DataKind, Terminal, Viewport};
use crate::transcript::{CompletedLine, PRIVATE_INPUT, Transcript, TranscriptHeader};
use anyhow::{Context as _, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// What the screen looked like when a capture was requested.
#[derive(Debug, Clone, Copy)]
struct CaptureStamp {
    line: usize,
    cursor: Cursor,
    remote_seq: u64,
    requested_at: Instant,
}

/// Outcome of a finished session.
#[derive(Debug, Clone)]
pub struct Summary {
    /// Script lines completed.
    pub processed: usize,
    pub total: usize,
    /// Commands recorded after the script ran out.
    pub manual: usize,
    pub mismatch: Option<Mismatch>,
}

pub struct Session<T: Terminal> {
    terminal: T,
    script: Script,
    keys: KeyCodeTable,
    screen: Screen,
    cmd: CommandState,
    /// 1-based; past the end of the script means manual mode.
    current: usize,
    mismatch: Option<Mismatch>,
    key_press_sync: bool,
    stop: Arc<AtomicBool>,
    pending: Option<CaptureStamp>,
    screen_stamp: Option<CaptureStamp>,
    remote_seq: u64,
    busy: bool,
    /// One-shot: the next capture replaces the whole screen.
    full_capture: bool,
    manual_count: usize,
    transitions: Vec<(usize, Phase)>,
    transcript: Transcript,
    diagnostics: DiagnosticLog,
}

impl<T: Terminal> Session<T> {
    /// Open the session logs and activate the first line.
    ///
    /// # Errors
    ///
    /// Fails if a log file cannot be created: its folder is missing, the file
    /// already exists, or the create itself fails.
    pub fn start(config: &DriverConfig, script: Script, keys: KeyCodeTable, terminal: T) -> Result<Self> {
        let sid = config.session_label();
        let diagnostics = DiagnosticLog::open(config.log_path().as_deref(), sid)?;
        let script_name = script
            .source()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let header = TranscriptHeader {
            user: &config.user,
            server: &config.host,
            script: &script_name,
        };
        let transcript = Transcript::open(
            sid,
            config.capture_path().as_deref(),
            config.inputs_path().as_deref(),
            &header,
        )?
        .with_raw_capture(config.capture_raw);

        info!(
            session = sid,
            lines = script.len(),
            keys = keys.len(),
            capture = ?transcript.capture_path(),
            inputs = ?transcript.inputs_path(),
            log = ?diagnostics.path(),
            "session started"
        );

        let now = Instant::now();
        let mut session = Self {
            terminal,
            cmd: CommandState::manual(now),
            script,
            keys,
            screen: Screen::new(),
            current: 1,
            mismatch: None,
            key_press_sync: config.key_press_sync,
            stop: Arc::new(AtomicBool::new(false)),
            pending: None,
            screen_stamp: None,
            remote_seq: 0,
            busy: false,
            full_capture: false,
            manual_count: 0,
            transitions: Vec::new(),
            transcript,
            diagnostics,
        };
        session.activate();
        Ok(session)
    }

    pub fn terminal(&self) -> &T {
        &self.terminal
    }

    pub fn terminal_mut(&mut self) -> &mut T {
        &mut self.terminal
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    /// The line counter: the active line, or past the script in manual mode.
    pub fn current_line(&self) -> usize {
        self.current
    }

    pub fn phase(&self) -> Phase {
        self.cmd.phase()
    }

    /// Every phase entered, with the line it was entered on.
    pub fn transitions(&self) -> &[(usize, Phase)] {
        &self.transitions
    }

    /// The latched mismatch, if any.
    pub fn mismatch(&self) -> Option<&Mismatch> {
        self.mismatch.as_ref()
    }

    pub fn is_script_finished(&self) -> bool {
        self.current > self.script.len()
    }

    /// Setting the returned flag makes every entry point a no-op.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Bytes arrived: input written to the terminal, or remote output.
    pub fn on_data(&mut self, bytes: &[u8], kind: DataKind) -> Result<()> {
        if self.is_stopped() || bytes.is_empty() {
            return Ok(());
        }
        match kind {
            DataKind::Remote => {
                self.remote_seq += 1;
                self.transcript.push_raw(bytes);
                Ok(())
            }
            DataKind::Echoed => self.on_echo(bytes),
        }
    }

    /// Periodic tick with the current cursor and size.
    pub fn on_viewport(&mut self, viewport: Viewport) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        self.screen.set_width(viewport.cols);
        self.screen.set_cursor(viewport.cursor);
        self.busy = viewport.command_in_progress;

        if self.cmd.phase() == Phase::Manual && self.manual_jump() {
            self.complete_line()?;
        }
        self.ensure_capture()?;
        self.try_send()
    }

    /// The text of a capture requested through [`Terminal::request_screen_capture`].
    pub fn screen_capture_result(&mut self, text: &str) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }
        let full = std::mem::take(&mut self.full_capture);
        let update = self.screen.update(text, full);
        self.screen_stamp = self.pending.take();
        trace!(?update, rows = self.screen.rows().len(), "screen captured");

        if !self.transcript.cycle().is_empty() {
            self.transcript
                .flush(&self.screen)
                .context("Failed to write capture log")?;
        }
        self.try_send()
    }

    /// Flush the transcript, write the summary and close the logs.
    pub fn finish(self) -> Result<Summary> {
        self.stop.store(true, Ordering::Relaxed);
        let Session {
            script,
            screen,
            current,
            mismatch,
            manual_count,
            transcript,
            mut diagnostics,
            ..
        } = self;

        let processed = (current - 1).min(script.len());
        transcript
            .close(&screen)
            .context("Failed to write capture log")?;
        let total = (!script.is_empty()).then_some(script.len());
        diagnostics
            .summary(total.map_or(manual_count, |_| processed), total)
            .context("Failed to write diagnostic log")?;

        info!(processed, total = script.len(), manual = manual_count, "session finished");
        Ok(Summary {
            processed,
            total: script.len(),
            manual: manual_count,
            mismatch,
        })
    }

    fn activate(&mut self) {
        let now = Instant::now();
        self.cmd = match self.script.get(self.current) {
            Some(line) => {
                self.full_capture |= line.wants_full_capture();
                debug!(line = self.current, seq = line.seq, "line active");
                CommandState::for_line(line, &self.keys, now)
            }
            None => {
                if self.current == self.script.len() + 1 && !self.script.is_empty() {
                    info!(lines = self.script.len(), "script finished, recording manual input");
                }
                CommandState::manual(now)
            }
        };
        self.transitions.push((self.current, self.cmd.phase()));
    }

    fn set_phase(&mut self, phase: Phase) {
        trace!(line = self.current, from = %self.cmd.phase, to = %phase, "phase");
        self.cmd.phase = phase;
        self.transitions.push((self.current, phase));
    }

    fn screen_fresh(&self) -> bool {
        self.screen_stamp.is_some_and(|s| {
            s.line == self.current
                && s.cursor == self.screen.cursor()
                && s.remote_seq == self.remote_seq
        })
    }

    /// Request a capture unless the screen is fresh or one is outstanding.
    /// An outstanding request older than the command wait is re-issued.
    fn ensure_capture(&mut self) -> Result<()> {
        let now = Instant::now();
        match &self.pending {
            Some(p) if now < p.requested_at + MAX_COMMAND_WAIT => return Ok(()),
            Some(_) => {
                warn!(line = self.current, "screen capture timed out, requesting again");
                let (cursor, prev) = (self.screen.cursor(), self.screen.prev_cursor());
                self.diagnostics
                    .event(self.current, "Capture Timeout", "", "", cursor, prev)?;
            }
            None if self.screen_fresh() => return Ok(()),
            None => {}
        }
        self.pending = Some(CaptureStamp {
            line: self.current,
            cursor: self.screen.cursor(),
            remote_seq: self.remote_seq,
            requested_at: now,
        });
        self.terminal
            .request_screen_capture()
            .context("Failed to request screen capture")
    }

    fn on_echo(&mut self, bytes: &[u8]) -> Result<()> {
        if self.mismatch.is_some() {
            return Ok(());
        }
        match self.cmd.phase() {
            Phase::Manual => {
                if self.cmd.echoed.is_empty() {
                    self.cmd.sent_cursor = Some(self.screen.cursor());
                    self.cmd.inferred_prompt = self.screen.prompt_before_cursor();
                }
                self.cmd.echoed.extend_from_slice(bytes);
                if self.keys.trailing_key(&self.cmd.echoed).is_some() {
                    self.complete_line()?;
                }
            }
            Phase::Sending | Phase::AwaitingEcho => {
                self.cmd.sent_cursor.get_or_insert(self.screen.cursor());
                self.cmd.echoed.extend_from_slice(bytes);
                if self.cmd.echo_complete() {
                    self.complete_line()?;
                }
            }
            Phase::Idle if !self.cmd.actionable => {
                self.cmd.sent_cursor = Some(self.screen.cursor());
                self.cmd.echoed.extend_from_slice(bytes);
                self.complete_line()?;
            }
            _ => trace!(line = self.current, len = bytes.len(), "input ignored"),
        }
        Ok(())
    }

    /// Manual mode: one keystroke moved the cursor somewhere other than the
    /// next column.
    fn manual_jump(&self) -> bool {
        let Some(sent) = self.cmd.sent_cursor else {
            return false;
        };
        let now = self.screen.cursor();
        self.cmd.echoed.len() == 1 && now != sent && now != Cursor::new(sent.row, sent.col + 1)
    }

    fn try_send(&mut self) -> Result<()> {
        if self.is_stopped() || self.mismatch.is_some() {
            return Ok(());
        }
        match self.cmd.phase() {
            Phase::Sending => return self.transmit(),
            Phase::Idle => {}
            _ => return Ok(()),
        }
        let Some(line) = self.cmd.line().cloned() else {
            return Ok(());
        };
        let now = Instant::now();
        if !self.cmd.actionable || !self.cmd.ready(now) {
            return Ok(());
        }
        let cursor = self.screen.cursor();
        if line.cursor_at.is_some_and(|at| !at.matches(cursor.row, cursor.col)) {
            return Ok(());
        }

        if line.needs_screen() {
            if self.busy || self.pending.is_some() {
                return Ok(());
            }
            let fresh = self.screen_fresh();
            match check_screen(&line, &self.screen) {
                Err(mismatch) => return self.raise_mismatch(mismatch, fresh, now),
                Ok(_) if !fresh => return self.ensure_capture(),
                Ok(found) => {
                    if let Some(prompt) = &found.prompt {
                        self.screen.accept_prompt(prompt);
                    }
                    self.cmd.found = found;
                }
            }
        }

        self.cmd.prompt_ok = "Yes";
        if self.cmd.feed.is_empty() {
            return self.complete_line();
        }
        let shown = if line.hidden { PRIVATE_INPUT } else { line.send.as_str() };
        self.diagnostics.event(
            self.current,
            "Command Sent",
            shown,
            &line.prompt,
            cursor,
            self.screen.prev_cursor(),
        )?;
        self.set_phase(Phase::Sending);
        self.transmit()
    }

    fn transmit(&mut self) -> Result<()> {
        let hidden = self.cmd.line().is_some_and(|l| l.hidden);
        let mode = if self.key_press_sync && !hidden {
            SendMode::Drip
        } else {
            SendMode::Atomic
        };
        let caught_up = self.cmd.echo_caught_up();

        let chunk = if !self.cmd.feed.text_done() {
            if mode == SendMode::Drip && !caught_up {
                return Ok(());
            }
            self.cmd.feed.next_chunk(mode)
        } else if !self.cmd.feed.is_done() && caught_up {
            self.cmd.feed.next_chunk(mode)
        } else {
            None
        };
        if let Some(chunk) = chunk {
            trace!(line = self.current, len = chunk.len(), "send");
            self.terminal
                .send_keys(&chunk)
                .context("Failed to send keys")?;
        }

        if self.cmd.feed.is_done() {
            self.set_phase(Phase::AwaitingEcho);
            if self.cmd.echo_complete() {
                self.complete_line()?;
            }
        }
        Ok(())
    }

    fn raise_mismatch(&mut self, mut mismatch: Mismatch, fresh: bool, now: Instant) -> Result<()> {
        self.cmd.prompt_ok = "No";
        if !fresh {
            debug!(line = self.current, kind = %mismatch.kind, "screen not current, capturing again");
            return self.ensure_capture();
        }
        if mismatch.kind.is_absent() && !self.cmd.overdue(now) {
            return Ok(());
        }

        if mismatch.kind.is_prompt() && self.current > 1 {
            mismatch.password_visible = self.screen.text().to_lowercase().contains("password");
            if mismatch.password_visible {
                info!(line = self.current, "password prompt on screen");
            }
        }
        warn!(
            line = self.current,
            kind = %mismatch.kind,
            expected = %mismatch.expected,
            actual = %mismatch.actual,
            "screen mismatch, script halted"
        );
        let (cursor, prev) = (self.screen.cursor(), self.screen.prev_cursor());
        self.diagnostics.event(
            self.current,
            &mismatch.kind.to_string(),
            &mismatch.actual,
            &mismatch.expected,
            cursor,
            prev,
        )?;
        self.set_phase(Phase::Mismatched);
        self.mismatch = Some(mismatch);
        Ok(())
    }

    fn complete_line(&mut self) -> Result<()> {
        let (processed, submit_key) = self.cmd.split_processed(&self.keys);
        let done = match self.cmd.line() {
            Some(line) => self.script_record(line, processed, submit_key),
            None => self.manual_record(processed, submit_key),
        };
        let records_screen = self.cmd.line().is_none_or(ScriptLine::records_screen);
        if !self.cmd.is_manual() {
            self.set_phase(Phase::Matched);
        } else {
            self.manual_count += 1;
        }

        self.transcript.push(&done, records_screen);
        let (shown, expected) = if done.hidden {
            (PRIVATE_INPUT, PRIVATE_INPUT)
        } else {
            (done.processed.as_str(), done.sent.as_str())
        };
        let (cursor, prev) = (self.screen.cursor(), self.screen.prev_cursor());
        self.diagnostics
            .event(self.current, "Command Processed", shown, expected, cursor, prev)?;
        info!(line = self.current, manual = done.manual, key = %done.submit_key, "command processed");

        self.current += 1;
        self.activate();
        Ok(())
    }

    fn script_record(&self, line: &ScriptLine, processed: String, submit_key: String) -> CompletedLine {
        let ScreenMatch { identifier, prompt } = self.cmd.found;
        let prompt_ok = match self.cmd.prompt_ok {
            "" => "Yes",
            ok => ok,
        };
        CompletedLine {
            line: line.line,
            seq: line.seq,
            manual: false,
            screen_identifier: line.screen_identifier.clone(),
            screen_identifier_at: position_field(line.screen_identifier_at),
            identifier_found_at: identifier.map(|l| l.field()).unwrap_or_default(),
            capture: line.capture.clone(),
            prompt: line.prompt.clone(),
            prompt_at: position_field(line.prompt_at),
            prompt_found_at: prompt.map(|l| l.field()).unwrap_or_default(),
            cursor_at: position_field(line.cursor_at),
            sent_cursor: self.cmd.sent_cursor.map(|c| c.to_string()).unwrap_or_default(),
            sent: line.send.clone(),
            processed,
            hidden: line.hidden,
            submit_key,
            prompt_ok: prompt_ok.to_string(),
            pause: line.pause,
            script_id: line.script_id.clone(),
        }
    }

    fn manual_record(&self, processed: String, submit_key: String) -> CompletedLine {
        let (prompt, prompt_at) = match &self.cmd.inferred_prompt {
            Some((prompt, at)) => (prompt.clone(), at.to_string()),
            None => (String::new(), String::new()),
        };
        CompletedLine {
            line: self.current,
            seq: u32::try_from(self.current).unwrap_or(u32::MAX),
            manual: true,
            prompt,
            prompt_at,
            cursor_at: self.cmd.sent_cursor.map(|c| c.to_string()).unwrap_or_default(),
            sent_cursor: self.cmd.sent_cursor.map(|c| c.to_string()).unwrap_or_default(),
            sent: processed.clone(),
            processed,
            submit_key,
            prompt_ok: self.cmd.prompt_ok.to_string(),
            script_id: "0".to_string(),
            ..CompletedLine::default()
        }
    }
}

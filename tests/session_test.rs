use std::fs;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;
use vtdriver::{
    DataKind, DriverConfig, KeyCodeTable, LoadError, LogTarget, MismatchKind, Phase, Position,
    Script, ScriptLine, Session, Terminal, Viewport, parse_keycodes_file, parse_keycodes_str,
    parse_script_str,
};

/// Records everything the session asks of the terminal.
#[derive(Debug, Default)]
struct MockTerminal {
    sent: Vec<Vec<u8>>,
    captures_requested: usize,
    /// Bytes sent but not yet echoed back.
    outbox: Vec<u8>,
    capture_pending: bool,
}

impl Terminal for MockTerminal {
    fn send_keys(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.sent.push(bytes.to_vec());
        self.outbox.extend_from_slice(bytes);
        Ok(())
    }

    fn request_screen_capture(&mut self) -> anyhow::Result<()> {
        self.captures_requested += 1;
        self.capture_pending = true;
        Ok(())
    }
}

/// A line-oriented shell: echoes typed bytes and answers every command with
/// one line of output and a fresh prompt.
struct FakeShell {
    rows: Vec<String>,
    prompt: String,
}

impl FakeShell {
    fn new(prompt: &str) -> Self {
        Self {
            rows: vec![prompt.to_string()],
            prompt: prompt.to_string(),
        }
    }

    fn viewport(&self) -> Viewport {
        let row = self.rows.len() - 1;
        Viewport::new(row, self.rows[row].chars().count(), 80, 24)
    }

    fn text(&self) -> String {
        self.rows.join("\n")
    }

    fn type_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            if b == b'\r' {
                let last = self.rows.last().cloned().unwrap_or_default();
                let cmd = last.strip_prefix(&self.prompt).unwrap_or(&last).to_string();
                self.rows.push(format!("out:{}", cmd));
                self.rows.push(self.prompt.clone());
            } else if let Some(last) = self.rows.last_mut() {
                last.push(b as char);
            }
        }
    }
}

fn keys() -> KeyCodeTable {
    parse_keycodes_str("Enter|13|\nTab|9|\nUp|<esc>[A|\n").unwrap()
}

fn start(script: Script) -> Session<MockTerminal> {
    Session::start(&DriverConfig::quiet(), script, keys(), MockTerminal::default()).unwrap()
}

fn logged(dir: &Path) -> DriverConfig {
    DriverConfig {
        session_id: Some("7".into()),
        host: "db01".into(),
        log: LogTarget::Path(dir.join("diag.log")),
        capture: LogTarget::Path(dir.join("out.log")),
        inputs: LogTarget::Path(dir.join("in.log")),
        ..DriverConfig::quiet()
    }
}

/// One host tick against the fake shell.
fn tick(session: &mut Session<MockTerminal>, shell: &mut FakeShell) {
    session.on_viewport(shell.viewport()).unwrap();
    pump(session, shell);
}

/// Feed queued echo and capture requests back, as a host would.
fn pump(session: &mut Session<MockTerminal>, shell: &mut FakeShell) {
    for _ in 0..4 {
        let out = std::mem::take(&mut session.terminal_mut().outbox);
        let capture = std::mem::take(&mut session.terminal_mut().capture_pending);
        if out.is_empty() && !capture {
            break;
        }
        if !out.is_empty() {
            shell.type_bytes(&out);
            session.on_data(&out, DataKind::Echoed).unwrap();
            session.on_data(&out, DataKind::Remote).unwrap();
        }
        if capture {
            session.screen_capture_result(&shell.text()).unwrap();
        }
    }
}

fn login_screen(row: usize, col: usize) -> String {
    let mut text = "\n".repeat(row);
    text.push_str(&" ".repeat(col));
    text.push_str("login: ");
    text
}

fn login_line() -> ScriptLine {
    ScriptLine::new("user1")
        .with_screen_identifier("login:", Some(Position::parse("5,*").unwrap().unwrap()))
        .with_submit_key("Enter")
}

#[test]
fn test_sends_raw_text_and_records_processed_line() {
    let dir = TempDir::new().unwrap();
    let script = Script::new([ScriptLine::new("whoami\n").with_cursor_at(Position::at(0, 0))]);
    let mut session =
        Session::start(&logged(dir.path()), script, keys(), MockTerminal::default()).unwrap();

    session.on_viewport(Viewport::new(0, 0, 80, 24)).unwrap();
    assert_eq!(session.terminal().sent, vec![b"whoami\n".to_vec()]);
    assert_eq!(session.terminal().sent[0].len(), 7);
    assert_eq!(session.phase(), Phase::AwaitingEcho);

    session.on_data(b"whoami\n", DataKind::Echoed).unwrap();
    assert_eq!(session.current_line(), 2);
    assert!(session.is_script_finished());
    assert_eq!(
        session.transitions(),
        &[
            (1, Phase::Idle),
            (1, Phase::Sending),
            (1, Phase::AwaitingEcho),
            (1, Phase::Matched),
            (2, Phase::Manual),
        ]
    );

    let summary = session.finish().unwrap();
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.total, 1);
    assert!(summary.mismatch.is_none());

    let capture = fs::read_to_string(dir.path().join("out.log")).unwrap();
    assert!(
        capture.contains("<Command_Processed>7|1|||No|||0,0|whoami\\x0A|No||Yes|0|0|</Command_Processed>"),
        "{}",
        capture
    );
    let diag = fs::read_to_string(dir.path().join("diag.log")).unwrap();
    assert!(diag.contains("|Command Sent|"));
    assert!(diag.contains("Processed 1 of 1 Commands"));
}

#[test]
fn test_identifier_with_wildcard_column() {
    for col in [0, 3, 12, 40] {
        let mut session = start(Script::new([login_line()]));
        session.on_viewport(Viewport::new(5, col + 7, 80, 24)).unwrap();
        session.screen_capture_result(&login_screen(5, col)).unwrap();
        assert_eq!(session.terminal().sent, vec![b"user1".to_vec()], "col {}", col);
        assert!(session.mismatch().is_none());
    }
}

#[test]
fn test_identifier_on_wrong_row_latches() {
    let mut session = start(Script::new([login_line()]));
    session.on_viewport(Viewport::new(6, 19, 80, 24)).unwrap();
    session.screen_capture_result(&login_screen(6, 12)).unwrap();

    let mismatch = session.mismatch().expect("latched");
    assert_eq!(mismatch.kind, MismatchKind::ScreenIdentifierRow);
    assert_eq!(mismatch.expected, "5");
    assert_eq!(mismatch.actual, "6");
    assert_eq!(mismatch.line, 1);
    assert_eq!(session.phase(), Phase::Mismatched);
    assert!(session.terminal().sent.is_empty());
}

#[test]
fn test_nothing_sent_after_latch() {
    let mut session = start(Script::new([login_line(), ScriptLine::new("ls")]));
    session.on_viewport(Viewport::new(6, 19, 80, 24)).unwrap();
    session.screen_capture_result(&login_screen(6, 12)).unwrap();
    assert!(session.mismatch().is_some());

    // A screen that would now match changes nothing.
    for _ in 0..5 {
        session.on_viewport(Viewport::new(5, 19, 80, 24)).unwrap();
        session.screen_capture_result(&login_screen(5, 12)).unwrap();
        session.on_data(b"user1\r", DataKind::Echoed).unwrap();
    }
    assert!(session.terminal().sent.is_empty());
    assert_eq!(session.current_line(), 1);
    assert_eq!(session.phase(), Phase::Mismatched);

    let summary = session.finish().unwrap();
    assert_eq!(summary.processed, 0);
    assert_eq!(
        summary.mismatch.map(|m| m.kind),
        Some(MismatchKind::ScreenIdentifierRow)
    );
}

#[test]
fn test_stale_capture_is_retried_not_latched() {
    let mut session = start(Script::new([login_line()]));
    session.on_viewport(Viewport::new(5, 19, 80, 24)).unwrap();
    assert_eq!(session.terminal().captures_requested, 1);

    // The cursor moves before the capture comes back.
    session.on_viewport(Viewport::new(6, 0, 80, 24)).unwrap();
    assert_eq!(session.terminal().captures_requested, 1);
    session.screen_capture_result(&login_screen(6, 12)).unwrap();
    assert!(session.mismatch().is_none());
    assert_eq!(session.terminal().captures_requested, 2);

    session.screen_capture_result(&login_screen(5, 12)).unwrap();
    assert!(session.mismatch().is_none());
    assert_eq!(session.terminal().sent, vec![b"user1".to_vec()]);
}

#[test]
fn test_each_line_advances_exactly_once() {
    let dir = TempDir::new().unwrap();
    let script = parse_script_str(
        "1|||No|$ |||ls|No|Enter|0|0|\n\
         2|||Screen|$ |||pwd|No|Enter|0|0|\n\
         3|||No|$ |||id|No|Enter|0|0|\n",
    )
    .unwrap();
    let mut session =
        Session::start(&logged(dir.path()), script, keys(), MockTerminal::default()).unwrap();
    let mut shell = FakeShell::new("$ ");

    let mut seen = vec![session.current_line()];
    for _ in 0..100 {
        if session.is_script_finished() {
            break;
        }
        tick(&mut session, &mut shell);
        seen.push(session.current_line());
    }
    seen.dedup();
    assert_eq!(seen, vec![1, 2, 3, 4]);
    assert!(session.mismatch().is_none());

    let sent: Vec<u8> = session.terminal().sent.concat();
    assert_eq!(sent, b"ls\rpwd\rid\r");

    let summary = session.finish().unwrap();
    assert_eq!(summary.processed, 3);

    let capture = fs::read_to_string(dir.path().join("out.log")).unwrap();
    assert_eq!(capture.matches("<Command_Processed>").count(), 3);
    assert!(
        capture.contains("<Command_Processed>7|1|||No|$ |0,0|0,2|ls|No|Enter|Yes|0|0|</Command_Processed>"),
        "{}",
        capture
    );
    let first = capture.find("|ls|").unwrap();
    let second = capture.find("|pwd|").unwrap();
    let third = capture.find("|id|").unwrap();
    assert!(first < second && second < third);
    // Only the line asking for a screen record gets one.
    assert_eq!(capture.matches("<Screen>").count(), 1);
    assert!(capture.contains("<Commands_Processed_Screen>7|2|2|"));
}

#[test]
fn test_repeated_ticks_are_idempotent() {
    let mut session = start(Script::new([
        ScriptLine::new("ls").with_prompt("# ", None).with_submit_key("Enter"),
    ]));
    let mut shell = FakeShell::new("$ ");
    for _ in 0..5 {
        tick(&mut session, &mut shell);
    }
    let captures = session.terminal().captures_requested;

    for _ in 0..50 {
        tick(&mut session, &mut shell);
    }
    assert_eq!(session.terminal().captures_requested, captures);
    assert!(session.terminal().sent.is_empty());
    assert_eq!(session.current_line(), 1);
    assert_eq!(session.phase(), Phase::Idle);
    assert!(session.mismatch().is_none());
}

#[test]
fn test_finished_script_ignores_ticks() {
    let mut session = start(Script::new([ScriptLine::new("ls").with_submit_key("Enter")]));
    let mut shell = FakeShell::new("$ ");
    for _ in 0..4 {
        tick(&mut session, &mut shell);
    }
    assert!(session.is_script_finished());
    let sent = session.terminal().sent.len();

    for _ in 0..20 {
        tick(&mut session, &mut shell);
    }
    assert_eq!(session.terminal().sent.len(), sent);
    assert_eq!(session.current_line(), 2);
    assert_eq!(session.phase(), Phase::Manual);
}

#[tokio::test(start_paused = true)]
async fn test_pause_defers_sending() {
    let mut session = start(Script::new([ScriptLine::new("ls").with_pause(2)]));
    let vp = Viewport::new(0, 0, 80, 24);

    session.on_viewport(vp).unwrap();
    assert!(session.terminal().sent.is_empty());

    tokio::time::advance(Duration::from_millis(1999)).await;
    session.on_viewport(vp).unwrap();
    assert!(session.terminal().sent.is_empty());

    tokio::time::advance(Duration::from_millis(1)).await;
    session.on_viewport(vp).unwrap();
    assert_eq!(session.terminal().sent, vec![b"ls".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn test_absent_prompt_waits_then_latches_with_password_hint() {
    let mut session = start(Script::new([
        ScriptLine::new("admin"),
        ScriptLine::new("ls").with_prompt("$ ", None).with_submit_key("Enter"),
    ]));
    let vp = Viewport::new(0, 10, 80, 24);

    session.on_viewport(vp).unwrap();
    assert_eq!(session.terminal().sent, vec![b"admin".to_vec()]);
    session.on_data(b"admin", DataKind::Echoed).unwrap();
    assert_eq!(session.current_line(), 2);

    // Stamped for line 1, so line 2 asks again.
    session.screen_capture_result("Password: ").unwrap();
    session.screen_capture_result("Password: ").unwrap();
    assert!(session.mismatch().is_none());

    tokio::time::advance(Duration::from_secs(14)).await;
    session.on_viewport(vp).unwrap();
    assert!(session.mismatch().is_none());

    tokio::time::advance(Duration::from_secs(1)).await;
    session.on_viewport(vp).unwrap();
    let mismatch = session.mismatch().expect("latched");
    assert_eq!(mismatch.kind, MismatchKind::Prompt);
    assert!(mismatch.password_visible);
    assert_eq!(session.phase(), Phase::Mismatched);
    assert_eq!(session.terminal().sent, vec![b"admin".to_vec()]);
}

#[test]
fn test_submit_key_resolution() {
    let table = keys();
    assert_eq!(table.resolve("13"), vec![13]);
    assert_eq!(table.resolve("Up"), b"\x1b[A".to_vec());
    assert!(table.resolve("NoSuchKey").is_empty());

    // A numeric submit key is a character code.
    let mut session = start(Script::new([ScriptLine::new("ls").with_submit_key("9")]));
    session.on_viewport(Viewport::new(0, 0, 80, 24)).unwrap();
    session.on_data(b"ls", DataKind::Echoed).unwrap();
    session.on_viewport(Viewport::new(0, 2, 80, 24)).unwrap();
    assert_eq!(session.terminal().sent, vec![b"ls".to_vec(), vec![9]]);
    session.on_data(&[9], DataKind::Echoed).unwrap();
    assert!(session.is_script_finished());
}

#[test]
fn test_unknown_submit_key_sends_nothing_extra() {
    let mut session = start(Script::new([ScriptLine::new("ls").with_submit_key("Hyper")]));
    session.on_viewport(Viewport::new(0, 0, 80, 24)).unwrap();
    session.on_data(b"ls", DataKind::Echoed).unwrap();
    session.on_viewport(Viewport::new(0, 2, 80, 24)).unwrap();

    assert_eq!(session.terminal().sent, vec![b"ls".to_vec()]);
    assert!(session.is_script_finished());
}

#[test]
fn test_key_press_sync_waits_for_each_echo() {
    let config = DriverConfig {
        key_press_sync: true,
        ..DriverConfig::quiet()
    };
    let script = Script::new([ScriptLine::new("abc").with_submit_key("Enter")]);
    let mut session = Session::start(&config, script, keys(), MockTerminal::default()).unwrap();
    let vp = Viewport::new(0, 0, 80, 24);

    session.on_viewport(vp).unwrap();
    session.on_viewport(vp).unwrap();
    assert_eq!(session.terminal().sent, vec![b"a".to_vec()]);

    for echo in [&b"a"[..], b"b", b"c"] {
        session.on_data(echo, DataKind::Echoed).unwrap();
        session.on_viewport(vp).unwrap();
    }
    assert_eq!(
        session.terminal().sent,
        vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec(), vec![13]]
    );
    session.on_data(b"\r", DataKind::Echoed).unwrap();
    assert!(session.is_script_finished());
}

#[test]
fn test_hidden_input_never_logged() {
    let dir = TempDir::new().unwrap();
    let config = DriverConfig {
        key_press_sync: true,
        ..logged(dir.path())
    };
    let script = Script::new([ScriptLine::new("hunter2").hidden().with_submit_key("Enter")]);
    let mut session = Session::start(&config, script, keys(), MockTerminal::default()).unwrap();

    session.on_viewport(Viewport::new(0, 0, 80, 24)).unwrap();
    // Hidden input goes out in one write even with key-press sync.
    assert_eq!(session.terminal().sent, vec![b"hunter2".to_vec()]);
    session.on_data(b"hunter2", DataKind::Echoed).unwrap();
    session.on_viewport(Viewport::new(0, 7, 80, 24)).unwrap();
    session.on_data(b"\r", DataKind::Echoed).unwrap();
    assert!(session.is_script_finished());
    session.finish().unwrap();

    for name in ["out.log", "in.log", "diag.log"] {
        let text = fs::read_to_string(dir.path().join(name)).unwrap();
        assert!(!text.contains("hunter2"), "{} leaked: {}", name, text);
    }
    let capture = fs::read_to_string(dir.path().join("out.log")).unwrap();
    assert!(capture.contains("##private##"));
}

#[test]
fn test_manual_commands_are_recorded_and_replayable() {
    let dir = TempDir::new().unwrap();
    let mut session =
        Session::start(&logged(dir.path()), Script::default(), keys(), MockTerminal::default())
            .unwrap();
    assert_eq!(session.phase(), Phase::Manual);

    session.on_viewport(Viewport::new(0, 6, 80, 24)).unwrap();
    assert_eq!(session.terminal().captures_requested, 1);
    session.screen_capture_result("host$ ").unwrap();

    session.on_data(b"ls", DataKind::Echoed).unwrap();
    assert_eq!(session.current_line(), 1);
    session.on_data(b"\r", DataKind::Echoed).unwrap();
    assert_eq!(session.current_line(), 2);
    assert!(session.terminal().sent.is_empty());

    let summary = session.finish().unwrap();
    assert_eq!(summary.manual, 1);
    assert_eq!(summary.processed, 0);

    let capture = fs::read_to_string(dir.path().join("out.log")).unwrap();
    assert!(
        capture.contains("<Command_Input_User>7|1||||host$ |0,0|0,6|ls|No|Enter|0|0|</Command_Input_User>"),
        "{}",
        capture
    );

    let inputs = fs::read_to_string(dir.path().join("in.log")).unwrap();
    assert_eq!(inputs, "1||||host$ |0,0|0,6|ls|No|Enter|0|0|\n");
    let replay = parse_script_str(&inputs).unwrap();
    assert_eq!(replay.len(), 1);
    let line = replay.get(1).unwrap();
    assert_eq!(line.prompt, "host$ ");
    assert_eq!(line.send, "ls");
    assert_eq!(line.submit_key, "Enter");

    let diag = fs::read_to_string(dir.path().join("diag.log")).unwrap();
    assert!(diag.contains("|Processed 1 Commands|"), "{}", diag);
}

#[test]
fn test_manual_spaces_are_part_of_the_command() {
    let dir = TempDir::new().unwrap();
    let keys = parse_keycodes_file(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/Scripts/KeyCodes_Default.txt"
    ))
    .unwrap();
    let mut session =
        Session::start(&logged(dir.path()), Script::default(), keys, MockTerminal::default())
            .unwrap();
    session.on_viewport(Viewport::new(0, 2, 80, 24)).unwrap();
    session.screen_capture_result("$ ").unwrap();

    for (i, byte) in b"ls -l".iter().enumerate() {
        session.on_data(&[*byte], DataKind::Echoed).unwrap();
        session.on_viewport(Viewport::new(0, 3 + i, 80, 24)).unwrap();
        assert_eq!(session.current_line(), 1, "completed after {:?}", *byte as char);
    }
    session.on_data(b"\r", DataKind::Echoed).unwrap();
    assert_eq!(session.current_line(), 2);
    assert_eq!(session.finish().unwrap().manual, 1);

    let inputs = fs::read_to_string(dir.path().join("in.log")).unwrap();
    assert_eq!(inputs, "1||||$ |0,0|0,2|ls -l|No|Enter|0|0|\n");
}

#[test]
fn test_manual_keystroke_that_jumps_the_cursor_completes() {
    let mut session = start(Script::default());
    session.on_viewport(Viewport::new(0, 2, 80, 24)).unwrap();
    session.screen_capture_result("$ ").unwrap();

    // An ordinary character moves one column.
    session.on_data(b"l", DataKind::Echoed).unwrap();
    session.on_viewport(Viewport::new(0, 3, 80, 24)).unwrap();
    assert_eq!(session.current_line(), 1);

    let mut session = start(Script::default());
    session.on_viewport(Viewport::new(0, 2, 80, 24)).unwrap();
    session.screen_capture_result("$ ").unwrap();
    session.on_data(b"\x01", DataKind::Echoed).unwrap();
    session.on_viewport(Viewport::new(0, 0, 80, 24)).unwrap();
    assert_eq!(session.current_line(), 2);
    assert_eq!(session.finish().unwrap().manual, 1);
}

#[test]
fn test_stop_flag_makes_entry_points_no_ops() {
    let mut session = start(Script::new([ScriptLine::new("ls")]));
    session.stop_handle().store(true, Ordering::Relaxed);
    assert!(session.is_stopped());

    session.on_viewport(Viewport::new(0, 0, 80, 24)).unwrap();
    session.on_data(b"ls", DataKind::Echoed).unwrap();
    session.screen_capture_result("$ ").unwrap();

    assert!(session.terminal().sent.is_empty());
    assert_eq!(session.terminal().captures_requested, 0);
    assert_eq!(session.current_line(), 1);
}

#[test]
fn test_existing_log_file_is_refused() {
    let dir = TempDir::new().unwrap();
    let config = logged(dir.path());
    fs::write(dir.path().join("diag.log"), "old").unwrap();

    let err = Session::start(&config, Script::default(), keys(), MockTerminal::default())
        .err()
        .expect("refused");
    assert!(matches!(
        err.downcast_ref::<LoadError>(),
        Some(LoadError::LogExists(_))
    ));
    assert_eq!(fs::read_to_string(dir.path().join("diag.log")).unwrap(), "old");
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_capture_is_requested_again() {
    let mut session = start(Script::new([ScriptLine::new("ls").with_prompt("$ ", None)]));
    let vp = Viewport::new(0, 2, 80, 24);

    session.on_viewport(vp).unwrap();
    assert_eq!(session.terminal().captures_requested, 1);

    tokio::time::advance(Duration::from_secs(14)).await;
    session.on_viewport(vp).unwrap();
    assert_eq!(session.terminal().captures_requested, 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    session.on_viewport(vp).unwrap();
    assert_eq!(session.terminal().captures_requested, 2);
    assert!(session.terminal().sent.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_prompt_only_line_then_same_prompt_sends() {
    let mut session = start(Script::new([
        ScriptLine::new("").with_prompt("$ ", None),
        ScriptLine::new("ls").with_prompt("$ ", None).with_submit_key("Enter"),
    ]));
    let vp = Viewport::new(0, 2, 80, 24);

    for _ in 0..40 {
        tokio::time::advance(Duration::from_secs(1)).await;
        session.on_viewport(vp).unwrap();
        if std::mem::take(&mut session.terminal_mut().capture_pending) {
            session.screen_capture_result("$ ").unwrap();
        }
    }
    assert!(session.mismatch().is_none(), "{:?}", session.mismatch());
    assert_eq!(session.current_line(), 2);
    assert_eq!(session.terminal().sent.first(), Some(&b"ls".to_vec()));
}

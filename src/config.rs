//! Resolved driver settings and the naming of session log files.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_KEYCODES: &str = "Scripts/KeyCodes_Default.txt";
pub const LOG_FOLDER: &str = "Logs";
pub const CAPTURE_FOLDER: &str = "Capture";

/// Tick period for `--screen-speed slow`.
pub const SLOW_SCREEN_SPEED: Duration = Duration::from_millis(50);
pub const FAST_SCREEN_SPEED: Duration = Duration::from_millis(10);

/// Where a session log goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// A timestamped name in the default folder.
    Auto,
    Path(PathBuf),
    Disabled,
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub session_id: Option<String>,
    /// Host label used in file names and the capture header.
    pub host: String,
    pub user: String,
    pub script: Option<PathBuf>,
    pub keycodes: PathBuf,
    pub log: LogTarget,
    pub capture: LogTarget,
    pub inputs: LogTarget,
    /// Send one character at a time, waiting for each echo.
    pub key_press_sync: bool,
    /// Write remote bytes next to each screen capture.
    pub capture_raw: bool,
    pub screen_speed: Duration,
    pub started: DateTime<Local>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            host: "localhost".to_string(),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_default(),
            script: None,
            keycodes: PathBuf::from(DEFAULT_KEYCODES),
            log: LogTarget::Auto,
            capture: LogTarget::Auto,
            inputs: LogTarget::Disabled,
            key_press_sync: false,
            capture_raw: false,
            screen_speed: FAST_SCREEN_SPEED,
            started: Local::now(),
        }
    }
}

impl DriverConfig {
    /// A configuration that writes no files.
    pub fn quiet() -> Self {
        Self {
            log: LogTarget::Disabled,
            capture: LogTarget::Disabled,
            inputs: LogTarget::Disabled,
            ..Self::default()
        }
    }

    /// Session id as written into records; `0` when none was given.
    pub fn session_label(&self) -> &str {
        self.session_id.as_deref().unwrap_or("0")
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.resolve(&self.log, LOG_FOLDER, "")
    }

    pub fn capture_path(&self) -> Option<PathBuf> {
        self.resolve(&self.capture, CAPTURE_FOLDER, "_outputs")
    }

    pub fn inputs_path(&self) -> Option<PathBuf> {
        self.resolve(&self.inputs, CAPTURE_FOLDER, "_inputs")
    }

    fn resolve(&self, target: &LogTarget, folder: &str, infix: &str) -> Option<PathBuf> {
        match target {
            LogTarget::Disabled => None,
            LogTarget::Path(path) => Some(path.clone()),
            LogTarget::Auto => {
                let sid = self
                    .session_id
                    .as_deref()
                    .map(|s| format!("_{}", s))
                    .unwrap_or_default();
                let stamp = self.started.format("%y%m%d_%H%M%S");
                Some(Path::new(folder).join(format!("{}{}{}_{}.log", self.host, sid, infix, stamp)))
            }
        }
    }
}

/// Parse a screen speed: `slow`, `fast`, or a tick period in milliseconds.
pub fn parse_screen_speed(s: &str) -> Result<Duration> {
    match s.trim().to_ascii_lowercase().as_str() {
        "slow" => Ok(SLOW_SCREEN_SPEED),
        "fast" | "" => Ok(FAST_SCREEN_SPEED),
        ms => ms
            .parse::<u64>()
            .ok()
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
            .ok_or_else(|| anyhow!("Invalid screen speed: '{}'", s)),
    }
}

/// `yes`/`on` style switches.
pub fn parse_switch(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "yes" | "on" | "true" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config() -> DriverConfig {
        DriverConfig {
            host: "db01".into(),
            started: Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            ..DriverConfig::default()
        }
    }

    #[test]
    fn test_auto_names() {
        let mut cfg = config();
        assert_eq!(cfg.log_path().unwrap(), Path::new("Logs/db01_240309_140507.log"));
        assert_eq!(
            cfg.capture_path().unwrap(),
            Path::new("Capture/db01_outputs_240309_140507.log")
        );
        assert_eq!(cfg.inputs_path(), None);

        cfg.session_id = Some("42".into());
        cfg.inputs = LogTarget::Auto;
        assert_eq!(cfg.log_path().unwrap(), Path::new("Logs/db01_42_240309_140507.log"));
        assert_eq!(
            cfg.inputs_path().unwrap(),
            Path::new("Capture/db01_42_inputs_240309_140507.log")
        );
    }

    #[test]
    fn test_explicit_and_disabled() {
        let mut cfg = config();
        cfg.log = LogTarget::Path("/tmp/x.log".into());
        cfg.capture = LogTarget::Disabled;
        assert_eq!(cfg.log_path().unwrap(), Path::new("/tmp/x.log"));
        assert_eq!(cfg.capture_path(), None);
    }

    #[test]
    fn test_session_label() {
        let mut cfg = config();
        assert_eq!(cfg.session_label(), "0");
        cfg.session_id = Some("7".into());
        assert_eq!(cfg.session_label(), "7");
    }

    #[test]
    fn test_screen_speed() {
        assert_eq!(parse_screen_speed("slow").unwrap(), Duration::from_millis(50));
        assert_eq!(parse_screen_speed("Fast").unwrap(), FAST_SCREEN_SPEED);
        assert_eq!(parse_screen_speed("25").unwrap(), Duration::from_millis(25));
        assert!(parse_screen_speed("0").is_err());
        assert!(parse_screen_speed("warp").is_err());
    }

    #[test]
    fn test_switch() {
        assert!(parse_switch("Yes"));
        assert!(parse_switch("on"));
        assert!(!parse_switch("no"));
        assert!(!parse_switch(""));
    }
}

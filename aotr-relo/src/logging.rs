use owo_colors::OwoColorize;
use std::fmt::Write as _;
use std::sync::{Mutex, MutexGuard, OnceLock};
use supports_color::Stream;
use tracing_subscriber::EnvFilter;

use crate::error::ReloFailure;

static ANSI_ENABLED: OnceLock<bool> = OnceLock::new();

/// Level at which every applied record is printed.
pub const RECORD_LEVEL: u8 = 6;
/// Level for per-location patch details.
pub const DETAIL_LEVEL: u8 = 7;
/// Level for body and group summaries.
pub const SUMMARY_LEVEL: u8 = 1;

pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let ansi = detect_ansi();
    let _ = ANSI_ENABLED.set(ansi);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| std::io::Error::other(err.to_string()))?;
    Ok(())
}

pub fn category_relo() -> String {
    if ansi_enabled() {
        format!("{}", "RELO".bright_cyan().bold())
    } else {
        "RELO".to_string()
    }
}

pub fn category_validation() -> String {
    if ansi_enabled() {
        format!("{}", "SVM".bright_magenta().bold())
    } else {
        "SVM".to_string()
    }
}

pub fn failure_label(failure: ReloFailure) -> String {
    let text = failure.to_string();
    if !ansi_enabled() {
        return text;
    }
    if failure.is_retryable() {
        format!("{}", text.bright_yellow())
    } else {
        format!("{}", text.bright_red())
    }
}

fn ansi_enabled() -> bool {
    *ANSI_ENABLED.get_or_init(detect_ansi)
}

fn detect_ansi() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    if std::env::var_os("FORCE_COLOR").is_some() {
        let _ = enable_ansi_support();
        return true;
    }

    let windows_vt = enable_ansi_support().is_ok();
    windows_vt || supports_color::on_cached(Stream::Stdout).is_some()
}

#[cfg(windows)]
fn enable_ansi_support() -> windows::core::Result<()> {
    use windows::Win32::Foundation::HANDLE;
    use windows::Win32::System::Console::{
        ENABLE_VIRTUAL_TERMINAL_PROCESSING, GetConsoleMode, GetStdHandle, STD_OUTPUT_HANDLE,
        SetConsoleMode,
    };

    unsafe {
        let handle = GetStdHandle(STD_OUTPUT_HANDLE)?;
        if handle == HANDLE::default() {
            return Ok(());
        }

        let mut mode = std::mem::zeroed();
        GetConsoleMode(handle, &mut mode)?;
        SetConsoleMode(handle, mode | ENABLE_VIRTUAL_TERMINAL_PROCESSING)?;
        Ok(())
    }
}

#[cfg(not(windows))]
fn enable_ansi_support() -> Result<(), ()> {
    Err(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Verbosity-gated relocation log. Lines go to `tracing` and, when capturing, to a buffer.
#[derive(Debug, Default)]
pub struct RelocationLogger {
    verbosity: u8,
    lock: Mutex<()>,
    capture: Option<Mutex<String>>,
}

impl RelocationLogger {
    pub fn new(verbosity: u8) -> Self {
        Self {
            verbosity,
            lock: Mutex::new(()),
            capture: None,
        }
    }

    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Keeps a copy of every emitted line for `captured()`.
    pub fn capturing(verbosity: u8) -> Self {
        Self {
            verbosity,
            lock: Mutex::new(()),
            capture: Some(Mutex::new(String::new())),
        }
    }

    pub fn verbosity(&self) -> u8 {
        self.verbosity
    }

    pub fn enabled(&self, level: u8) -> bool {
        self.verbosity > 0 && level <= self.verbosity
    }

    pub fn log(&self, level: u8, args: std::fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }
        let _held = lock(&self.lock);
        self.emit(&args.to_string());
    }

    /// Holds the log for a multi-line dump so other threads cannot interleave with it.
    pub fn lock_log(&self) -> LogSection<'_> {
        LogSection {
            logger: self,
            _held: lock(&self.lock),
        }
    }

    pub fn captured(&self) -> String {
        match &self.capture {
            Some(buffer) => lock(buffer).clone(),
            None => String::new(),
        }
    }

    fn emit(&self, text: &str) {
        for line in text.lines() {
            tracing::debug!("[{}] {}", category_relo(), line);
        }
        if let Some(buffer) = &self.capture {
            let mut buffer = lock(buffer);
            let _ = writeln!(buffer, "{}", text.trim_end_matches('\n'));
        }
    }
}

pub struct LogSection<'a> {
    logger: &'a RelocationLogger,
    _held: MutexGuard<'a, ()>,
}

impl LogSection<'_> {
    pub fn write(&self, level: u8, text: &str) {
        if self.logger.enabled(level) {
            self.logger.emit(text);
        }
    }
}

#[macro_export]
macro_rules! relo_log {
    ($logger:expr, $level:expr, $($arg:tt)*) => {
        $logger.log($level, format_args!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_gates_lines() {
        let logger = RelocationLogger::capturing(RECORD_LEVEL);
        logger.log(SUMMARY_LEVEL, format_args!("summary {}", 1));
        logger.log(DETAIL_LEVEL, format_args!("detail"));
        assert_eq!(logger.captured(), "summary 1\n");
    }

    #[test]
    fn disabled_logger_emits_nothing() {
        let logger = RelocationLogger::disabled();
        assert!(!logger.enabled(SUMMARY_LEVEL));
        let section = logger.lock_log();
        section.write(SUMMARY_LEVEL, "ignored");
        drop(section);
        assert!(logger.captured().is_empty());
    }

    #[test]
    fn section_writes_multi_line_dump() {
        let logger = RelocationLogger::capturing(DETAIL_LEVEL);
        {
            let section = logger.lock_log();
            section.write(RECORD_LEVEL, "HelperAddress\n\thelper_id 0x7\n");
        }
        assert_eq!(logger.captured(), "HelperAddress\n\thelper_id 0x7\n");
    }
}

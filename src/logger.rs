//! Level-filtered diagnostic sink, usable directly or as the `log` backend.

use std::fmt;
use std::io::{self, Write};
use std::sync::Mutex;

/// Highest verbosity level: everything is written.
pub const MAX_LEVEL: u8 = 3;

/// Outcome of a [`Logger::write`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStatus {
    /// The line was written; carries the number of bytes.
    Written(usize),
    /// The level was above the configured verbosity; nothing was written.
    Suppressed,
}

/// Process-wide log sink with a verbosity in `0..=3`.
///
/// Level 0 messages are always written, level 3 only in the most verbose
/// mode. Every call formats its whole message before taking the sink lock, so
/// lines written from different threads never interleave.
pub struct Logger {
    level: u8,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger").field("level", &self.level).finish()
    }
}

fn clamp_level(level: i64) -> u8 {
    level.clamp(0, MAX_LEVEL as i64) as u8
}

/// Map a `log` facade level onto a verbosity level.
pub fn verbosity_of(level: log::Level) -> u8 {
    match level {
        log::Level::Error => 0,
        log::Level::Warn => 1,
        log::Level::Info => 2,
        log::Level::Debug | log::Level::Trace => 3,
    }
}

fn level_filter_of(level: u8) -> log::LevelFilter {
    match level {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        _ => log::LevelFilter::Trace,
    }
}

impl Logger {
    /// Create a logger writing to standard error. The level is clamped to
    /// `0..=3`.
    pub fn new(level: i64) -> Self {
        Self::with_sink(level, io::stderr())
    }

    /// Create a logger writing to `sink`.
    pub fn with_sink(level: i64, sink: impl Write + Send + 'static) -> Self {
        Self {
            level: clamp_level(level),
            sink: Mutex::new(Box::new(sink)),
        }
    }

    /// The clamped verbosity level.
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Whether a message at `level` would be written.
    pub fn enabled_for(&self, level: u8) -> bool {
        level <= self.level
    }

    /// Redirect subsequent writes to `sink`.
    pub fn redirect(&self, sink: impl Write + Send + 'static) {
        let mut guard = match self.sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Box::new(sink);
    }

    /// Write a formatted message if `level` is within the verbosity.
    ///
    /// # Errors
    ///
    /// * If the underlying sink fails to write
    pub fn write(&self, level: u8, args: fmt::Arguments<'_>) -> io::Result<LogStatus> {
        if !self.enabled_for(level) {
            return Ok(LogStatus::Suppressed);
        }

        let line = fmt::format(args);
        let mut sink = match self.sink.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        sink.write_all(line.as_bytes())?;
        sink.flush()?;
        Ok(LogStatus::Written(line.len()))
    }

    /// Install this logger as the `log` facade backend.
    ///
    /// # Errors
    ///
    /// * If another logger was already installed
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        let filter = level_filter_of(self.level);
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(filter);
        Ok(())
    }
}

impl log::Log for Logger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        self.enabled_for(verbosity_of(metadata.level()))
    }

    fn log(&self, record: &log::Record<'_>) {
        let level = verbosity_of(record.level());
        // Nowhere to report a failing sink from inside the backend.
        let _ = self.write(
            level,
            format_args!("[{}] {}\n", record.level(), record.args()),
        );
    }

    fn flush(&self) {
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Shared {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn level_is_clamped() {
        assert_eq!(Logger::new(-4).level(), 0);
        assert_eq!(Logger::new(2).level(), 2);
        assert_eq!(Logger::new(42).level(), 3);
    }

    #[test]
    fn suppressed_write_is_not_an_error() {
        let sink = Shared::default();
        let logger = Logger::with_sink(1, sink.clone());
        let status = logger.write(3, format_args!("hidden {}\n", 1)).unwrap();
        assert_eq!(status, LogStatus::Suppressed);
        assert!(sink.text().is_empty());
    }

    #[test]
    fn written_lines_report_their_size() {
        let sink = Shared::default();
        let logger = Logger::with_sink(3, sink.clone());
        let status = logger.write(0, format_args!("rank {}\n", 7)).unwrap();
        assert_eq!(status, LogStatus::Written("rank 7\n".len()));
        assert_eq!(sink.text(), "rank 7\n");
    }

    #[test]
    fn redirect_switches_sink() {
        let first = Shared::default();
        let second = Shared::default();
        let logger = Logger::with_sink(3, first.clone());
        logger.write(0, format_args!("a\n")).unwrap();
        logger.redirect(second.clone());
        logger.write(0, format_args!("b\n")).unwrap();
        assert_eq!(first.text(), "a\n");
        assert_eq!(second.text(), "b\n");
    }

    #[test]
    fn concurrent_writes_keep_lines_whole() {
        let sink = Shared::default();
        let logger = Arc::new(Logger::with_sink(3, sink.clone()));
        std::thread::scope(|s| {
            for t in 0..4 {
                let logger = Arc::clone(&logger);
                s.spawn(move || {
                    for i in 0..50 {
                        logger
                            .write(2, format_args!("thread-{t}-line-{i}-end\n"))
                            .unwrap();
                    }
                });
            }
        });
        let text = sink.text();
        assert_eq!(text.lines().count(), 200);
        for line in text.lines() {
            assert!(line.starts_with("thread-") && line.ends_with("-end"), "{line}");
        }
    }

    #[test]
    fn facade_levels_map_to_verbosity() {
        assert_eq!(verbosity_of(log::Level::Error), 0);
        assert_eq!(verbosity_of(log::Level::Warn), 1);
        assert_eq!(verbosity_of(log::Level::Info), 2);
        assert_eq!(verbosity_of(log::Level::Trace), 3);
    }
}

#[cfg(debug_assertions)]
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use simplelog::{CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, WriteLogger};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Log file writer that reopens its file when something deletes it while the
/// app is running.
struct ResilientFileWriter {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl ResilientFileWriter {
    fn new(path: PathBuf) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    fn with_file<T>(&self, op: impl FnOnce(&mut File) -> io::Result<T>) -> io::Result<T> {
        let mut guard = self
            .file
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if !self.path.exists() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *guard = Some(
                OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?,
            );
        }

        match guard.as_mut() {
            Some(file) => op(file),
            None => Err(io::Error::other("log file not available")),
        }
    }
}

impl Write for ResilientFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with_file(|file| file.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.with_file(File::flush)
    }
}

/// Cut `log_path` down to the newest whole lines fitting in half of
/// `max_log_size`. Returns how many bytes were dropped, or `None` when the
/// file was missing or small enough.
fn trim_log_file(log_path: &Path, max_log_size: u64) -> io::Result<Option<u64>> {
    let len = match std::fs::metadata(log_path) {
        Ok(metadata) => metadata.len(),
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(error) => return Err(error),
    };
    if len <= max_log_size {
        return Ok(None);
    }

    // Read from one byte early so a line starting exactly at the cut survives.
    let keep_from = len - max_log_size / 2;
    let mut file = File::open(log_path)?;
    file.seek(SeekFrom::Start(keep_from.saturating_sub(1)))?;
    let mut tail = Vec::new();
    file.read_to_end(&mut tail)?;
    drop(file);

    let first_line = tail
        .iter()
        .position(|&b| b == b'\n')
        .map_or(tail.len(), |pos| pos + 1);
    let kept = &tail[first_line..];
    std::fs::write(log_path, kept)?;
    Ok(Some(len - kept.len() as u64))
}

pub fn init_logging(log_path: &Path, debug_enabled: bool, max_log_size: u64) {
    let trimmed = trim_log_file(log_path, max_log_size);

    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .add_filter_allow_str("lexicon")
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    #[cfg(debug_assertions)]
    loggers.push(TermLogger::new(
        LevelFilter::Debug,
        config.clone(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ));
    match ResilientFileWriter::new(log_path.to_path_buf()) {
        Ok(writer) => loggers.push(WriteLogger::new(LevelFilter::Debug, config, writer)),
        Err(error) => eprintln!(
            "lexicon: cannot write log file {}: {error}",
            log_path.display()
        ),
    }
    if !loggers.is_empty() {
        let _ = CombinedLogger::init(loggers);
    }

    set_logging_enabled(debug_enabled);
    match trimmed {
        Ok(Some(dropped)) => log::info!("Dropped {dropped} old bytes from {}", log_path.display()),
        Ok(None) => {}
        Err(error) => log::warn!("Could not trim {}: {error}", log_path.display()),
    }
    log::debug!(
        "Lexicon {} logging to {}",
        env!("CARGO_PKG_VERSION"),
        log_path.display()
    );
}

/// Debug logging records everything; otherwise only warnings and errors are
/// kept so update failures still leave a trace.
pub fn set_logging_enabled(enabled: bool) {
    if enabled {
        log::set_max_level(LevelFilter::Debug);
    } else {
        log::set_max_level(LevelFilter::Warn);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::{ResilientFileWriter, set_logging_enabled, trim_log_file};

    const FIVE_CHECKS: &str = "check-1\ncheck-2\ncheck-3\ncheck-4\ncheck-5\n";

    #[test]
    fn writer_comes_back_after_log_directory_is_removed() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let log_dir = temp_dir.path().join("logs");
        let log_path = log_dir.join("debug.log");
        let mut writer = ResilientFileWriter::new(log_path.clone()).expect("writer opens");

        writeln!(writer, "update check started").expect("first write");
        std::fs::remove_dir_all(&log_dir).expect("log dir removed");
        writeln!(writer, "update installed").expect("write after removal");
        writer.flush().expect("flush after removal");

        assert_eq!(
            std::fs::read_to_string(&log_path).expect("log readable"),
            "update installed\n"
        );
    }

    #[test]
    fn trim_keeps_whole_lines_within_half_the_limit() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let log_path = temp_dir.path().join("debug.log");
        std::fs::write(&log_path, FIVE_CHECKS).expect("log written");

        // Half of 20 is 10 bytes: only the last 8-byte line fits whole.
        let dropped = trim_log_file(&log_path, 20).expect("trim succeeds");

        assert_eq!(dropped, Some(32));
        assert_eq!(
            std::fs::read_to_string(&log_path).expect("log readable"),
            "check-5\n"
        );
    }

    #[test]
    fn trim_keeps_line_that_starts_exactly_at_the_cut() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let log_path = temp_dir.path().join("debug.log");
        std::fs::write(&log_path, FIVE_CHECKS).expect("log written");

        let dropped = trim_log_file(&log_path, 32).expect("trim succeeds");

        assert_eq!(dropped, Some(24));
        assert_eq!(
            std::fs::read_to_string(&log_path).expect("log readable"),
            "check-4\ncheck-5\n"
        );
    }

    #[test]
    fn trim_ignores_small_or_missing_logs() {
        let temp_dir = tempfile::tempdir().expect("tempdir should be created");
        let log_path = temp_dir.path().join("debug.log");

        assert_eq!(trim_log_file(&log_path, 16).expect("missing is fine"), None);

        std::fs::write(&log_path, FIVE_CHECKS).expect("log written");
        assert_eq!(trim_log_file(&log_path, 1024).expect("trim succeeds"), None);
        assert_eq!(
            std::fs::read_to_string(&log_path).expect("log readable"),
            FIVE_CHECKS
        );
    }

    #[test]
    fn disabling_debug_still_keeps_warnings() {
        set_logging_enabled(true);
        assert_eq!(log::max_level(), log::LevelFilter::Debug);

        set_logging_enabled(false);
        assert_eq!(log::max_level(), log::LevelFilter::Warn);
    }
}

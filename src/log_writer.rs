//! Rotating daily log writer
//!
//! Writes LF-terminated lines to `adsb_YYYY-MM-DD.log` in a configured
//! directory, rotating at UTC or local midnight and gzipping the file that
//! just rotated out.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use chrono::{Local, NaiveDate, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{error, warn};

use crate::stats::Stats;

/// Contract for anything that accepts LF-terminated SBS lines.
pub trait LogWriter {
    fn write_line(&mut self, line: &str) -> io::Result<()>;
}

/// Writes to a daily-rotating file and gzips the previous day's file once
/// rotation occurs.
pub struct RotatingFileWriter {
    dir: PathBuf,
    utc: bool,
    current_date: Option<NaiveDate>,
    writer: Option<BufWriter<File>>,
}

impl RotatingFileWriter {
    pub fn new(dir: impl Into<PathBuf>, utc: bool) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            utc,
            current_date: None,
            writer: None,
        })
    }

    fn today(&self) -> NaiveDate {
        if self.utc {
            Utc::now().date_naive()
        } else {
            Local::now().date_naive()
        }
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("adsb_{}.log", date.format("%Y-%m-%d")))
    }

    fn rotate_if_needed(&mut self) -> io::Result<()> {
        let today = self.today();
        if self.current_date == Some(today) {
            return Ok(());
        }

        if let Some(writer) = self.writer.take() {
            drop(writer);
            if let Some(old_date) = self.current_date {
                let old_path = self.path_for(old_date);
                gzip_and_remove(&old_path);
            }
        }

        let path = self.path_for(today);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.writer = Some(BufWriter::new(file));
        self.current_date = Some(today);
        Ok(())
    }
}

impl LogWriter for RotatingFileWriter {
    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.rotate_if_needed()?;
        let writer = self.writer.as_mut().expect("rotate_if_needed always sets writer");
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

/// Compress a completed log file to `.log.gz` and remove the uncompressed
/// copy. Failures here are logged but never propagated: log rotation must
/// not stall the decode pipeline.
fn gzip_and_remove(path: &Path) {
    let result: io::Result<()> = (|| {
        let input = fs::read(path)?;
        let gz_path = path.with_extension("log.gz");
        let gz_file = File::create(&gz_path)?;
        let mut encoder = GzEncoder::new(gz_file, Compression::default());
        encoder.write_all(&input)?;
        encoder.finish()?;
        fs::remove_file(path)?;
        Ok(())
    })();

    if let Err(e) = result {
        warn!("failed to compress rotated log {:?}: {}", path, e);
    }
}

/// A no-op writer for runs without `--log-dir`.
pub struct NullWriter;

impl LogWriter for NullWriter {
    fn write_line(&mut self, _line: &str) -> io::Result<()> {
        Ok(())
    }
}

/// Count and log a failed log write. Write failures are one of the non-fatal
/// kinds tracked in `Stats` rather than a reason to stall the pipeline.
pub fn report_write_failure(e: &io::Error, stats: &Stats) {
    stats.write_failures.fetch_add(1, Ordering::Relaxed);
    error!("log write failed: {}", e);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_dir() -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("modes1090-test-{}-{}", std::process::id(), n));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_rotating_writer_creates_dated_file() {
        let dir = temp_dir();
        let mut writer = RotatingFileWriter::new(&dir, true).unwrap();
        writer.write_line("MSG,3,1,1,4840D6,1,x,x,x,x,,,,,,,,,,0,,0,0").unwrap();

        let today = Utc::now().date_naive();
        let expected = dir.join(format!("adsb_{}.log", today.format("%Y-%m-%d")));
        assert!(expected.exists());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_null_writer_never_fails() {
        let mut w = NullWriter;
        assert!(w.write_line("anything").is_ok());
    }
}

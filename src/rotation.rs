//! Log file rotation and retention
//!
//! `RotationManager` owns the *decisions*: when the active file must be
//! replaced (`should_rotate` is a pure predicate over its arguments) and how
//! the on-disk set is pruned (`cleanup_old_files`). The audit writer owns the
//! actual file handle and calls in here before every write.
//!
//! Files are named `<prefix>-YYYY-MM-DD.log`, one per UTC calendar day;
//! retention may gzip non-current files to `<prefix>-YYYY-MM-DD.log.gz`.

use crate::error::{Result, VigilError};
use chrono::NaiveDate;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Retention policy for rotated log files
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Rotate the active file once it reaches this many bytes
    pub max_file_size: u64,

    /// Keep at most this many files (0 = unlimited)
    pub max_files: usize,

    /// Delete files older than this many days (0 = never)
    pub max_age_days: u32,

    /// Gzip non-current files during cleanup
    pub compress_old: bool,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_files: 30,
            max_age_days: 90,
            compress_old: true,
        }
    }
}

impl RetentionPolicy {
    /// Validate policy values, failing fast on nonsense
    pub fn validate(&self) -> Result<()> {
        if self.max_file_size == 0 {
            return Err(VigilError::Config(
                "max_file_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why a rotation was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotateReason {
    /// No file is currently open
    NoActiveFile,
    /// The active file reached `max_file_size`
    SizeExceeded,
    /// The UTC calendar day changed since the file was opened
    DateChanged,
}

impl std::fmt::Display for RotateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RotateReason::NoActiveFile => "no active file",
            RotateReason::SizeExceeded => "size limit reached",
            RotateReason::DateChanged => "calendar day changed",
        };
        f.write_str(s)
    }
}

/// The open, append-only log file owned by the audit writer
#[derive(Debug)]
pub struct ActiveLogFile {
    writer: BufWriter<File>,
    path: PathBuf,
    date: NaiveDate,
    size: u64,
}

impl ActiveLogFile {
    /// Append one serialized record plus a trailing newline
    pub fn write_record(&mut self, record: &[u8]) -> std::io::Result<()> {
        self.writer.write_all(record)?;
        self.writer.write_all(b"\n")?;
        self.size += record.len() as u64 + 1;
        Ok(())
    }

    /// Flush buffered records to the OS
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Current size in bytes, including buffered records
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Counts from one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub deleted_by_age: usize,
    pub deleted_by_count: usize,
    pub compressed: usize,
}

/// Rotation and retention decisions for a directory of dated log files
#[derive(Debug)]
pub struct RotationManager {
    dir: PathBuf,
    prefix: String,
    policy: RetentionPolicy,
}

impl RotationManager {
    /// Create a manager, validating the policy and creating the directory
    ///
    /// Directory creation failure is fatal — the service must not start
    /// without a writable log location.
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        policy: RetentionPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            VigilError::Io(format!(
                "Failed to create log directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        if policy.max_files == 0 && policy.max_age_days == 0 {
            tracing::warn!(
                dir = %dir.display(),
                "Log retention disabled (max_files=0, max_age_days=0): files are never cleaned up"
            );
        }

        Ok(Self {
            dir,
            prefix: prefix.into(),
            policy,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// File name for a given day
    pub fn file_name_for(&self, date: NaiveDate) -> String {
        format!("{}-{}.log", self.prefix, date.format("%Y-%m-%d"))
    }

    /// Full path for a given day
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(self.file_name_for(date))
    }

    /// Decide whether the active file must be replaced
    ///
    /// Pure over its arguments: with an unchanged file and the same `today`,
    /// repeated calls return the same answer.
    pub fn should_rotate(
        &self,
        current: Option<&ActiveLogFile>,
        today: NaiveDate,
    ) -> Option<RotateReason> {
        let current = match current {
            Some(f) => f,
            None => return Some(RotateReason::NoActiveFile),
        };
        if current.size() >= self.policy.max_file_size {
            return Some(RotateReason::SizeExceeded);
        }
        if current.date() != today {
            return Some(RotateReason::DateChanged);
        }
        None
    }

    /// Open (append) the dated file for `today`
    pub fn open_for(&self, today: NaiveDate) -> Result<ActiveLogFile> {
        let path = self.path_for(today);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                VigilError::Io(format!("Failed to open log file {}: {}", path.display(), e))
            })?;
        let size = file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| {
                VigilError::Io(format!("Failed to stat log file {}: {}", path.display(), e))
            })?;

        Ok(ActiveLogFile {
            writer: BufWriter::new(file),
            path,
            date: today,
            size,
        })
    }

    /// Close the current file, prune old files, open the new dated file
    ///
    /// A size-triggered rotation lands on the same calendar day, so the full
    /// file is renamed aside to `<prefix>-<date>.N.log` (smallest free N)
    /// before the dated path is reopened. Cleanup and compression failures
    /// are diagnostic-only; only the open of the replacement file can fail
    /// the rotation.
    pub fn rotate(
        &self,
        current: Option<ActiveLogFile>,
        today: NaiveDate,
    ) -> Result<ActiveLogFile> {
        if let Some(mut file) = current {
            if let Err(e) = file.flush() {
                tracing::warn!(path = %file.path().display(), error = %e, "Flush before rotation failed");
            }
            if file.path() == self.path_for(today) {
                let aside = self.next_sequence_path(today);
                if let Err(e) = fs::rename(file.path(), &aside) {
                    // Keep appending to the oversized file rather than lose it
                    tracing::warn!(
                        path = %file.path().display(),
                        error = %e,
                        "Failed to set aside full log file"
                    );
                }
            }
            // Handle closes on drop
        }

        match self.cleanup_old_files() {
            Ok(stats) if stats != CleanupStats::default() => {
                tracing::info!(
                    deleted_by_age = stats.deleted_by_age,
                    deleted_by_count = stats.deleted_by_count,
                    compressed = stats.compressed,
                    "Log retention pass completed"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Log retention pass failed, continuing");
            }
        }

        self.open_for(today)
    }

    /// Enforce the retention policy over the log directory
    ///
    /// Order: (1) delete files older than `max_age_days`; (2) oldest-first
    /// deletion until at most `max_files` remain; (3) best-effort gzip of
    /// remaining non-current plain files.
    pub fn cleanup_old_files(&self) -> Result<CleanupStats> {
        let mut stats = CleanupStats::default();
        let today = chrono::Utc::now().date_naive();
        let mut files = self.list_log_files()?;

        if self.policy.max_age_days > 0 {
            let cutoff = today - chrono::Duration::days(i64::from(self.policy.max_age_days));
            files.retain(|(path, date)| {
                if *date < cutoff {
                    match fs::remove_file(path) {
                        Ok(()) => {
                            tracing::debug!(path = %path.display(), "Deleted expired log file");
                            stats.deleted_by_age += 1;
                        }
                        Err(e) => {
                            tracing::warn!(path = %path.display(), error = %e, "Failed to delete expired log file");
                        }
                    }
                    false
                } else {
                    true
                }
            });
        }

        if self.policy.max_files > 0 && files.len() > self.policy.max_files {
            files.sort_by_key(|(_, date)| *date);
            let excess = files.len() - self.policy.max_files;
            for (path, _) in files.drain(..excess) {
                match fs::remove_file(&path) {
                    Ok(()) => {
                        tracing::debug!(path = %path.display(), "Deleted log file over count limit");
                        stats.deleted_by_count += 1;
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Failed to delete log file over count limit");
                    }
                }
            }
        }

        if self.policy.compress_old {
            for (path, date) in &files {
                if *date == today {
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) == Some("gz") {
                    continue;
                }
                match compress_file(path) {
                    Ok(()) => stats.compressed += 1,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Log compression failed, file kept uncompressed");
                    }
                }
            }
        }

        Ok(stats)
    }

    /// List `<prefix>-<date>.log[.gz]` files in the directory with their dates
    fn list_log_files(&self) -> Result<Vec<(PathBuf, NaiveDate)>> {
        let entries = fs::read_dir(&self.dir).map_err(|e| {
            VigilError::Io(format!(
                "Failed to read log directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(n) => n,
                None => continue,
            };
            if let Some(date) = self.parse_file_date(name) {
                files.push((path, date));
            }
        }
        Ok(files)
    }

    /// First free `<prefix>-<date>.N.log` path for a set-aside full file
    fn next_sequence_path(&self, date: NaiveDate) -> PathBuf {
        let mut n = 1u32;
        loop {
            let candidate = self
                .dir
                .join(format!("{}-{}.{}.log", self.prefix, date.format("%Y-%m-%d"), n));
            let compressed = PathBuf::from(format!("{}.gz", candidate.display()));
            if !candidate.exists() && !compressed.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    /// Extract the date segment from a managed file name
    ///
    /// Accepts both the active form `<prefix>-<date>.log[.gz]` and set-aside
    /// full files `<prefix>-<date>.N.log[.gz]`.
    fn parse_file_date(&self, name: &str) -> Option<NaiveDate> {
        let rest = name.strip_prefix(&self.prefix)?.strip_prefix('-')?;
        let rest = rest
            .strip_suffix(".log.gz")
            .or_else(|| rest.strip_suffix(".log"))?;
        let date_part = rest.split('.').next()?;
        if let Some(seq) = rest.strip_prefix(date_part).and_then(|s| s.strip_prefix('.')) {
            seq.parse::<u32>().ok()?;
        }
        NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
    }
}

/// Gzip `path` to `path.gz` and remove the original
fn compress_file(path: &Path) -> std::io::Result<()> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let mut input = File::open(path)?;
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));
    let output = File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    std::io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)?;
    tracing::debug!(path = %gz_path.display(), "Compressed rotated log file");
    Ok(())
}

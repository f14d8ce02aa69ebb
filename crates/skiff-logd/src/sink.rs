//! Per-name rotating log files.
//!
//! This module provides:
//! - [`RotatingFile`]: one `<name>.log` rolled over to `<name>.log.1..N`
//! - [`SinkRegistry`]: lazily opened sinks keyed by name

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;
use crate::record::{LOGGER_NAME, OpenMode, Target};

/// Size at which a sink rolls over.
pub const DEFAULT_MAX_BYTES: u64 = 20_000_000;

/// Number of rolled-over files kept.
pub const DEFAULT_BACKUP_COUNT: usize = 5;

/// A size-rotated log file.
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    file: File,
    size: u64,
    max_bytes: u64,
    backups: usize,
}

impl RotatingFile {
    /// Opens `path` with the given mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(
        path: impl Into<PathBuf>,
        mode: OpenMode,
        max_bytes: u64,
        backups: usize,
    ) -> Result<Self> {
        let path = path.into();
        let file = match mode {
            OpenMode::Append => OpenOptions::new().create(true).append(true).open(&path)?,
            OpenMode::Overwrite => OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&path)?,
        };
        let size = file.metadata()?.len();
        Ok(Self {
            path,
            file,
            size,
            max_bytes,
            backups,
        })
    }

    /// Path of the live file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes in the live file.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Writes `message` followed by a newline, rolling over first if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if rotation or the write fails.
    pub fn write_line(&mut self, message: &str) -> Result<()> {
        let len = message.len() as u64 + 1;
        if self.max_bytes > 0 && self.size > 0 && self.size + len >= self.max_bytes {
            self.rollover()?;
        }
        self.file.write_all(message.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.flush()?;
        self.size += len;
        Ok(())
    }

    /// Shifts `name.log.i` to `name.log.i+1`, then `name.log` to `name.log.1`.
    ///
    /// # Errors
    ///
    /// Returns an error if a rename or the reopen fails.
    pub fn rollover(&mut self) -> Result<()> {
        if self.backups > 0 {
            for i in (1..self.backups).rev() {
                let src = self.backup_path(i);
                if src.exists() {
                    let dst = self.backup_path(i + 1);
                    if dst.exists() {
                        fs::remove_file(&dst)?;
                    }
                    fs::rename(&src, &dst)?;
                }
            }
            let first = self.backup_path(1);
            if first.exists() {
                fs::remove_file(&first)?;
            }
            fs::rename(&self.path, &first)?;
        }

        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        self.size = 0;
        debug!(path = %self.path.display(), "rolled over log file");
        Ok(())
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{index}"));
        PathBuf::from(name)
    }
}

/// Sinks keyed by name, opened on first use.
#[derive(Debug)]
pub struct SinkRegistry {
    dir: PathBuf,
    max_bytes: u64,
    backups: usize,
    sinks: Mutex<HashMap<String, RotatingFile>>,
}

impl SinkRegistry {
    /// Creates a registry writing under `dir`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            max_bytes: DEFAULT_MAX_BYTES,
            backups: DEFAULT_BACKUP_COUNT,
            sinks: Mutex::new(HashMap::new()),
        })
    }

    /// Sets the rotation policy for sinks opened from now on.
    #[must_use]
    pub const fn with_rotation(mut self, max_bytes: u64, backups: usize) -> Self {
        self.max_bytes = max_bytes;
        self.backups = backups;
        self
    }

    /// Directory holding the log files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing the sink called `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.log"))
    }

    /// Writes a line to the target's sink, opening it with the target's mode
    /// the first time.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot be opened or written.
    pub fn write(&self, target: &Target, message: &str) -> Result<()> {
        let mut sinks = self.sinks.lock();
        if !sinks.contains_key(&target.name) {
            let path = self.path_for(&target.name);
            debug!(name = %target.name, path = %path.display(), "opening log sink");
            let sink = RotatingFile::open(path, target.mode, self.max_bytes, self.backups)?;
            sinks.insert(target.name.clone(), sink);
        }
        match sinks.get_mut(&target.name) {
            Some(sink) => sink.write_line(message),
            None => Ok(()),
        }
    }

    /// Writes a line to the `logger` sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink cannot be opened or written.
    pub fn write_logger(&self, message: &str) -> Result<()> {
        self.write(&Target::append(LOGGER_NAME), message)
    }

    /// Names of the open sinks, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.sinks.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

//! Incremental on-disk spill of raw geometry
//!
//! Geometries are written in batches as newline-delimited JSON part files
//! (`part_00000.jsonl`, `part_00001.jsonl`, ...) and read back lazily in the
//! same order.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::{RawGeometry, SpillError};

const PART_PREFIX: &str = "part_";
const PART_SUFFIX: &str = ".jsonl";

/// Buffers geometries and flushes them to part files of `batch_size` records
#[derive(Debug)]
pub struct SpillWriter {
    dir: PathBuf,
    batch_size: usize,
    buffer: Vec<RawGeometry>,
    parts: usize,
    written: usize,
}

/// What a finished writer left on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpillSummary {
    pub dir: PathBuf,
    pub parts: usize,
    pub geometries: usize,
}

impl SpillSummary {
    /// Delete the spill directory and its part files
    pub fn discard(&self) -> Result<(), SpillError> {
        remove_spill_dir(&self.dir)
    }
}

/// Remove a spill directory tree; a directory that is already gone is fine
pub fn remove_spill_dir(dir: &Path) -> Result<(), SpillError> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(SpillError::Io {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

impl SpillWriter {
    pub fn create(dir: &Path, batch_size: usize) -> Result<Self, SpillError> {
        std::fs::create_dir_all(dir).map_err(|source| SpillError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            batch_size: batch_size.max(1),
            buffer: Vec::with_capacity(batch_size.max(1)),
            parts: 0,
            written: 0,
        })
    }

    pub fn push(&mut self, geometry: RawGeometry) -> Result<(), SpillError> {
        self.buffer.push(geometry);
        if self.buffer.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Write buffered geometries as a new part file
    pub fn flush(&mut self) -> Result<(), SpillError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let path = self.dir.join(format!("{}{:05}{}", PART_PREFIX, self.parts, PART_SUFFIX));
        let io_err = |source| SpillError::Io {
            path: path.clone(),
            source,
        };
        let file = File::create(&path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        for geometry in &self.buffer {
            serde_json::to_writer(&mut writer, geometry)?;
            writer.write_all(b"\n").map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;

        debug!("Spilled {} geometries to {:?}", self.buffer.len(), path);
        self.written += self.buffer.len();
        self.parts += 1;
        self.buffer.clear();
        Ok(())
    }

    pub fn finish(mut self) -> Result<SpillSummary, SpillError> {
        self.flush()?;
        Ok(SpillSummary {
            dir: self.dir,
            parts: self.parts,
            geometries: self.written,
        })
    }
}

/// One-pass reader over the part files of a spill directory
pub struct SpillReader {
    parts: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, Lines<BufReader<File>>)>,
}

impl SpillReader {
    pub fn open(dir: &Path) -> Result<Self, SpillError> {
        let entries = std::fs::read_dir(dir).map_err(|source| SpillError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut parts: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(PART_PREFIX) && n.ends_with(PART_SUFFIX))
            })
            .collect();
        parts.sort();

        Ok(Self {
            parts: parts.into_iter(),
            current: None,
        })
    }
}

impl Iterator for SpillReader {
    type Item = Result<RawGeometry, SpillError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((path, lines)) = self.current.as_mut() {
                match lines.next() {
                    Some(Ok(line)) if line.trim().is_empty() => continue,
                    Some(Ok(line)) => {
                        return Some(serde_json::from_str(&line).map_err(|source| SpillError::Decode {
                            path: path.clone(),
                            source,
                        }));
                    }
                    Some(Err(source)) => {
                        return Some(Err(SpillError::Io {
                            path: path.clone(),
                            source,
                        }));
                    }
                    None => self.current = None,
                }
            }

            let path = self.parts.next()?;
            match File::open(&path) {
                Ok(file) => self.current = Some((path, BufReader::new(file).lines())),
                Err(source) => return Some(Err(SpillError::Io { path, source })),
            }
        }
    }
}

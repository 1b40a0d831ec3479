//! Rotating deploy logs.
//!
//! Each deploy truncates `<name>.log` after shifting the existing generations
//! up by one. With `max_generations = N` at most N previous logs survive next
//! to the current one; the oldest is overwritten by the rename.

use std::io::ErrorKind;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, Take};

use crate::errors::{PployError, Result};
use crate::runner::FileSink;
use crate::workdir::Workdir;

#[derive(Debug, Clone)]
pub struct DeployLogs {
    workdir: Workdir,
    max_generations: usize,
    head_bytes: u64,
}

/// An open log ready to be streamed back.
pub enum LogReader {
    Full(File),
    Head(Take<File>),
}

impl DeployLogs {
    pub fn new(workdir: Workdir, max_generations: usize, head_bytes: u64) -> Self {
        Self {
            workdir,
            max_generations,
            head_bytes,
        }
    }

    pub fn max_generations(&self) -> usize {
        self.max_generations
    }

    /// Shift `.log.(k-1)` to `.log.k` for k = max..1. Missing generations are skipped.
    pub async fn rotate(&self, name: &str) -> Result<()> {
        for generation in (1..=self.max_generations).rev() {
            let from = self.workdir.log_file(name, generation - 1);
            let to = self.workdir.log_file(name, generation);
            match tokio::fs::rename(&from, &to).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(PployError::io(
                        format!("failed to rotate {}", from.display()),
                        e,
                    ));
                }
            }
        }
        Ok(())
    }

    /// Rotate, then open a fresh current log for writing.
    pub async fn create(&self, name: &str) -> Result<FileSink> {
        self.rotate(name).await?;
        let path = self.workdir.log_file(name, 0);
        let file = File::create(&path)
            .await
            .map_err(|e| PployError::io(format!("failed to create {}", path.display()), e))?;
        Ok(FileSink::new(file))
    }

    /// Open a log generation for reading. `None` when it does not exist.
    pub async fn open(&self, name: &str, generation: usize, full: bool) -> Result<Option<LogReader>> {
        if generation > self.max_generations {
            return Ok(None);
        }
        let path = self.workdir.log_file(name, generation);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PployError::io(format!("failed to open {}", path.display()), e));
            }
        };
        Ok(Some(if full {
            LogReader::Full(file)
        } else {
            LogReader::Head(file.take(self.head_bytes))
        }))
    }

    /// Read a whole generation into memory (or its head). Missing logs read as empty.
    pub async fn read(&self, name: &str, generation: usize, full: bool) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let result = match self.open(name, generation, full).await? {
            None => return Ok(buf),
            Some(LogReader::Full(mut file)) => file.read_to_end(&mut buf).await,
            Some(LogReader::Head(mut head)) => head.read_to_end(&mut buf).await,
        };
        result.map_err(|e| PployError::io(format!("failed to read log of {}", name), e))?;
        Ok(buf)
    }
}

//! Job logfiles written by Upstart

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::wait::POLL_INTERVAL;

/// An Upstart job logfile. Call [`LogFile::destroy`] when done with it.
#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the logfile, ignoring errors
    pub fn destroy(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            log::debug!("Not removing logfile {}: {}", self.path.display(), e);
        }
    }

    /// Read the logfile, waiting up to `timeout` for it to be created.
    ///
    /// The job may produce no output, or produce it late, so this polls
    /// rather than blocking. Lines are returned without terminators and
    /// with any pty carriage returns removed. Returns `None` if the file
    /// did not appear in time.
    pub async fn readlines(&self, timeout: Duration) -> std::io::Result<Option<Vec<String>>> {
        let until = Instant::now() + timeout;

        while Instant::now() < until {
            match tokio::fs::read_to_string(&self.path).await {
                Ok(content) => return Ok(Some(split_lines(&content))),
                Err(e) if e.kind() == ErrorKind::NotFound => sleep(POLL_INTERVAL).await,
                Err(e) => return Err(e),
            }
        }

        Ok(None)
    }
}

fn split_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_lines_strips_pty_returns() {
        assert_eq!(
            split_lines("hello world\r\nsecond\r\n"),
            vec!["hello world", "second"]
        );
        assert!(split_lines("").is_empty());
    }

    #[tokio::test]
    async fn test_readlines_existing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        std::fs::write(&path, "got file /tmp/foo\n").unwrap();

        let log = LogFile::new(&path);
        assert!(log.exists());
        let lines = log.readlines(Duration::from_secs(1)).await.unwrap();
        assert_eq!(lines, Some(vec!["got file /tmp/foo".to_string()]));
    }

    #[tokio::test]
    async fn test_readlines_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let log = LogFile::new(dir.path().join("never.log"));

        let lines = log.readlines(Duration::from_millis(250)).await.unwrap();
        assert!(lines.is_none());
    }

    #[test]
    fn test_destroy_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("job.log");
        std::fs::write(&path, "x").unwrap();

        let log = LogFile::new(&path);
        log.destroy();
        assert!(!log.exists());
        // second destroy is a no-op
        log.destroy();
    }
}

//! Test utilities for creating temporary log files that grow during a test.

#[cfg(test)]
use std::fs::{File, OpenOptions};
#[cfg(test)]
use std::io::Write;
#[cfg(test)]
use std::path::{Path, PathBuf};

#[cfg(test)]
pub struct TempLogFile {
    pub path: PathBuf,
    _temp_dir: tempfile::TempDir,
}

#[cfg(test)]
impl TempLogFile {
    /// Create a new, empty temporary log file
    pub fn new() -> std::io::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("test.log");

        File::create(&path)?;

        Ok(Self {
            path,
            _temp_dir: temp_dir,
        })
    }

    /// Create a temporary log file holding one terminated line
    pub fn with_content(line: &str) -> std::io::Result<Self> {
        let temp_file = Self::new()?;
        temp_file.append_line(line)?;
        Ok(temp_file)
    }

    /// Append raw bytes, without adding a terminator
    pub fn append(&self, content: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(content.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Append a line followed by `\n`
    pub fn append_line(&self, line: &str) -> std::io::Result<()> {
        self.append(&format!("{line}\n"))
    }

    /// Delete the file, keeping the directory around
    pub fn remove(&self) -> std::io::Result<()> {
        std::fs::remove_file(&self.path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_log_file_creation() {
        let temp_file = TempLogFile::new().unwrap();
        assert!(temp_file.path().exists());
        assert_eq!(std::fs::read_to_string(temp_file.path()).unwrap(), "");
    }

    #[test]
    fn test_temp_log_file_with_content() {
        let temp_file = TempLogFile::with_content("test line").unwrap();

        let file_content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert_eq!(file_content, "test line\n");
    }

    #[test]
    fn test_append_without_terminator() {
        let temp_file = TempLogFile::new().unwrap();
        temp_file.append("half").unwrap();
        temp_file.append(" line").unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert_eq!(content, "half line");
    }

    #[test]
    fn test_remove() {
        let temp_file = TempLogFile::with_content("gone soon").unwrap();
        temp_file.remove().unwrap();
        assert!(!temp_file.path().exists());
    }
}

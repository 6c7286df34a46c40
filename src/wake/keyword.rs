use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};

/// Keyword resource read by the engine when a listening session begins.
#[derive(Debug, Clone)]
pub struct KeywordFile {
    path: PathBuf,
}

impl KeywordFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored keyword, or None if the file is missing or blank.
    pub fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                let keyword = contents.trim();
                Ok((!keyword.is_empty()).then(|| keyword.to_string()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the stored keyword, creating parent directories.
    pub fn write(&self, keyword: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, keyword)?;
        tracing::debug!(path = %self.path.display(), keyword, "keyword file written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let file = KeywordFile::new(dir.path().join("keyword.txt"));
        assert_eq!(file.read().unwrap(), None);
    }

    #[test]
    fn write_creates_directories_and_read_trims() {
        let dir = TempDir::new().unwrap();
        let file = KeywordFile::new(dir.path().join("ivw").join("keyword.txt"));

        file.write("你好天天").unwrap();
        assert_eq!(file.read().unwrap(), Some("你好天天".to_string()));

        fs::write(file.path(), "  hey lumi \n").unwrap();
        assert_eq!(file.read().unwrap(), Some("hey lumi".to_string()));
    }

    #[test]
    fn blank_file_reads_as_none() {
        let dir = TempDir::new().unwrap();
        let file = KeywordFile::new(dir.path().join("keyword.txt"));
        file.write("   ").unwrap();
        assert_eq!(file.read().unwrap(), None);
    }
}

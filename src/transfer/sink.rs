//! Writing received files to a download directory

use std::path::PathBuf;
use tracing::info;

use crate::error::Result;

/// Stores completed files under one directory without overwriting
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `data` under a name derived from the sender's `name`
    pub async fn store(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.unused_path(&safe_file_name(name)).await;
        tokio::fs::write(&path, data).await?;
        info!("Saved {} ({} bytes)", path.display(), data.len());
        Ok(path)
    }

    /// `name`, or `name (1).ext`, `name (2).ext`, ... if taken
    async fn unused_path(&self, name: &str) -> PathBuf {
        let candidate = self.dir.join(name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }

        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (name, None),
        };
        let mut n = 1u32;
        loop {
            let numbered = match ext {
                Some(ext) => format!("{} ({}).{}", stem, n, ext),
                None => format!("{} ({})", stem, n),
            };
            let candidate = self.dir.join(numbered);
            if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Final path component of a peer-supplied name, never empty or a dot entry
pub fn safe_file_name(name: &str) -> String {
    let last = name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or("")
        .trim();
    match last {
        "" | "." | ".." => "received-file".to_string(),
        other => other.to_string(),
    }
}

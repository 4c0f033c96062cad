//! Node access key and its on-disk form
//!
//! The key file holds a single `ID:SECRET` line. It is only ever replaced
//! as a whole: writes go to a sibling temp file which is then renamed over
//! the old one.

use std::fmt;
use std::path::Path;

use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, thiserror::Error)]
pub enum AccessKeyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed access key file: {0}")]
    Malformed(&'static str),
}

/// Credential identifying this node to the control plane
#[derive(Clone, PartialEq, Eq)]
pub struct AccessKey {
    pub id: String,
    pub secret: String,
}

impl AccessKey {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }

    /// Parse the `ID:SECRET` file format
    pub fn parse(contents: &str) -> Result<Self, AccessKeyError> {
        let (id, secret) = contents
            .trim()
            .split_once(':')
            .ok_or(AccessKeyError::Malformed("missing ':' separator"))?;
        let (id, secret) = (id.trim(), secret.trim());
        if id.is_empty() || secret.is_empty() {
            return Err(AccessKeyError::Malformed("empty id or secret"));
        }
        Ok(Self::new(id, secret))
    }

    pub async fn load_from_file(path: &Path) -> Result<Self, AccessKeyError> {
        let contents = fs::read_to_string(path).await?;
        Self::parse(&contents)
    }

    /// Atomically replace the key file (mode 0600)
    pub async fn save_to_file(&self, path: &Path) -> Result<(), AccessKeyError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let temp_path = path.with_extension("tmp");
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true).mode(0o600);

        let mut file = options.open(&temp_path).await?;
        file.write_all(format!("{}:{}", self.id, self.secret).as_bytes())
            .await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKey")
            .field("id", &self.id)
            .field("secret", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse() {
        let key = AccessKey::parse("  6b1f:9d7c-secret\n").unwrap();
        assert_eq!(key, AccessKey::new("6b1f", "9d7c-secret"));

        assert!(matches!(
            AccessKey::parse("no-separator"),
            Err(AccessKeyError::Malformed(_))
        ));
        assert!(AccessKey::parse(":secret").is_err());
        assert!(AccessKey::parse("id:").is_err());
        assert!(AccessKey::parse("").is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("data/keys/.access_key");
        let key = AccessKey::new("6b1f", "9d7c");

        key.save_to_file(&path).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "6b1f:9d7c");
        assert_eq!(AccessKey::load_from_file(&path).await.unwrap(), key);

        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_save_overwrites_whole_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join(".access_key");

        AccessKey::new("a-very-long-old-id", "a-very-long-old-secret")
            .save_to_file(&path)
            .await
            .unwrap();
        AccessKey::new("new", "key").save_to_file(&path).await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new:key");
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let temp = tempdir().unwrap();
        let err = AccessKey::load_from_file(&temp.path().join("absent"))
            .await
            .unwrap_err();
        assert!(matches!(err, AccessKeyError::Io(_)));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let key = AccessKey::new("6b1f", "hunter2");
        let debug = format!("{:?}", key);
        assert!(debug.contains("6b1f"));
        assert!(!debug.contains("hunter2"));
    }
}

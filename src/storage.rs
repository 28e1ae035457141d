use std::path::{Path, PathBuf};

use log::warn;
use tokio::io::AsyncWriteExt;

use crate::error::AppError;

const KEY_LEN: usize = 32;
const KEY_CHARSET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Flat filesystem blob store. Every write mints a fresh random key and
/// hands it back to the caller; nothing ever looks up a blob by directory
/// listing or modification time.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(root)?;

        Ok(Self {
            root: root.to_owned(),
        })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Writes `bytes` under a newly generated key and returns that key once
    /// the data is on disk. Two concurrent calls always end up with
    /// distinct keys (`create_new` makes a collision retry instead of
    /// clobbering).
    pub async fn put(&self, bytes: &[u8]) -> Result<String, AppError> {
        loop {
            let key = random_string::generate(KEY_LEN, KEY_CHARSET);

            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.path(&key))
                .await;

            let mut file = match file {
                Ok(x) => x,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            };

            file.write_all(bytes).await?;
            file.flush().await?;

            return Ok(key);
        }
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, AppError> {
        match tokio::fs::read(self.path(key)).await {
            Ok(x) => Ok(x),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal; a blob that is already gone is not an error.
    pub async fn remove(&self, key: &str) {
        if let Err(e) = tokio::fs::remove_file(self.path(key)).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove blob {key}: {e:?}");
            }
        }
    }
}

#[actix_web::test]
async fn put_read_remove() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path()).unwrap();

    let key = storage.put(b"hello blob").await.unwrap();

    assert_eq!(key.len(), KEY_LEN);
    assert_eq!(storage.read(&key).await.unwrap(), b"hello blob");

    storage.remove(&key).await;

    assert!(matches!(
        storage.read(&key).await,
        Err(AppError::NotFound)
    ));

    // removing again stays quiet
    storage.remove(&key).await;
}

#[actix_web::test]
async fn concurrent_puts_get_distinct_keys() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path()).unwrap();

    let (a, b) = tokio::join!(storage.put(b"first upload"), storage.put(b"second upload"));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a, b);
    assert_eq!(storage.read(&a).await.unwrap(), b"first upload");
    assert_eq!(storage.read(&b).await.unwrap(), b"second upload");
}

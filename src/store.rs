//! Blob store for transcripts, summaries and batch archives.
//!
//! [`BlobStore`] is the seam between the batch loop and wherever files live.
//! [`LocalStore`] maps folder and file ids onto paths below a root directory;
//! the remote drive client lives in [`crate::google`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
pub const DOCUMENT_MIME: &str = "application/vnd.google-apps.document";
pub const TEXT_MIME: &str = "text/plain";
pub const JSON_MIME: &str = "application/json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid id: {0}")]
    InvalidId(String),
    #[error("missing access token (set MINUTA_ACCESS_TOKEN)")]
    MissingToken,
}

/// Throttling, request timeouts and server errors.
pub fn is_transient_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500..=599)
}

impl StoreError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Http(e) => e.is_timeout() || e.is_connect(),
            StoreError::Api { status, .. } => is_transient_status(*status),
            StoreError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

/// A file or folder listed in a folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub id: String,
    pub name: String,
    pub mime_type: String,
}

impl FileEntry {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Children of `folder_id`, optionally restricted to one mime type.
    async fn list_children(
        &self,
        folder_id: &str,
        mime_filter: Option<&str>,
    ) -> Result<Vec<FileEntry>, StoreError>;

    /// File content as text. Native documents are exported as plain text.
    async fn get_content(&self, file_id: &str) -> Result<String, StoreError>;

    async fn create(
        &self,
        name: &str,
        content: &[u8],
        mime_type: &str,
        parent_id: &str,
    ) -> Result<String, StoreError>;

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, StoreError>;

    async fn move_file(&self, file_id: &str, new_parent_id: &str) -> Result<(), StoreError>;

    async fn copy(
        &self,
        file_id: &str,
        new_parent_id: &str,
        new_name: Option<&str>,
    ) -> Result<String, StoreError>;

    /// Link a reader can follow to the file.
    fn file_url(&self, file_id: &str) -> String;

    /// Mime type of the transcripts this store holds.
    fn transcript_mime(&self) -> &'static str;
}

/// Find a child folder by name, creating it when absent.
pub async fn ensure_folder(
    store: &dyn BlobStore,
    parent_id: &str,
    name: &str,
) -> Result<String, StoreError> {
    let existing = store.list_children(parent_id, Some(FOLDER_MIME)).await?;
    if let Some(folder) = existing.into_iter().find(|f| f.name == name) {
        return Ok(folder.id);
    }
    debug!(parent = parent_id, name, "creating folder");
    store.create_folder(name, parent_id).await
}

/// Filesystem-backed store. Ids are `/`-separated paths relative to the root;
/// the root folder itself is `""`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, id: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(id);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn child_id(parent_id: &str, name: &str) -> String {
        let parent = parent_id.trim_matches('/');
        if parent.is_empty() {
            name.to_string()
        } else {
            format!("{parent}/{name}")
        }
    }

    fn check_name(name: &str) -> Result<(), StoreError> {
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(StoreError::InvalidId(name.to_string()));
        }
        Ok(())
    }

    fn file_name(id: &str) -> Result<&str, StoreError> {
        id.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StoreError::InvalidId(id.to_string()))
    }

    fn mime_for(path: &Path, is_dir: bool) -> &'static str {
        if is_dir {
            return FOLDER_MIME;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") | Some("jsonl") => JSON_MIME,
            Some("txt") | Some("md") | Some("vtt") => TEXT_MIME,
            _ => "application/octet-stream",
        }
    }
}

#[async_trait]
impl BlobStore for LocalStore {
    async fn list_children(
        &self,
        folder_id: &str,
        mime_filter: Option<&str>,
    ) -> Result<Vec<FileEntry>, StoreError> {
        let dir = self.resolve(folder_id)?;
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(r) => r,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(folder_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await?.is_dir();
            let mime_type = Self::mime_for(&entry.path(), is_dir);
            if mime_filter.is_some_and(|m| m != mime_type) {
                continue;
            }
            entries.push(FileEntry {
                id: Self::child_id(folder_id, &name),
                name,
                mime_type: mime_type.to_string(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn get_content(&self, file_id: &str) -> Result<String, StoreError> {
        let path = self.resolve(file_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(file_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create(
        &self,
        name: &str,
        content: &[u8],
        _mime_type: &str,
        parent_id: &str,
    ) -> Result<String, StoreError> {
        Self::check_name(name)?;
        let id = Self::child_id(parent_id, name);
        let path = self.resolve(&id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(id)
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String, StoreError> {
        Self::check_name(name)?;
        let id = Self::child_id(parent_id, name);
        tokio::fs::create_dir_all(self.resolve(&id)?).await?;
        Ok(id)
    }

    async fn move_file(&self, file_id: &str, new_parent_id: &str) -> Result<(), StoreError> {
        let from = self.resolve(file_id)?;
        if !tokio::fs::try_exists(&from).await? {
            return Err(StoreError::NotFound(file_id.to_string()));
        }
        let target = Self::child_id(new_parent_id, Self::file_name(file_id)?);
        let to = self.resolve(&target)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(from, to).await?;
        Ok(())
    }

    async fn copy(
        &self,
        file_id: &str,
        new_parent_id: &str,
        new_name: Option<&str>,
    ) -> Result<String, StoreError> {
        let name = match new_name {
            Some(n) => {
                Self::check_name(n)?;
                n
            }
            None => Self::file_name(file_id)?,
        };
        let target = Self::child_id(new_parent_id, name);
        let to = self.resolve(&target)?;
        if let Some(parent) = to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(self.resolve(file_id)?, to).await?;
        Ok(target)
    }

    fn file_url(&self, file_id: &str) -> String {
        format!("file://{}", self.root.join(file_id).display())
    }

    fn transcript_mime(&self) -> &'static str {
        TEXT_MIME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_store_round_trip() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path());

        let inbox = store.create_folder("inbox", "").await.unwrap();
        let id = store
            .create("standup.txt", b"hello", TEXT_MIME, &inbox)
            .await
            .unwrap();
        assert_eq!(id, "inbox/standup.txt");
        assert_eq!(store.get_content(&id).await.unwrap(), "hello");

        let listed = store.list_children(&inbox, Some(TEXT_MIME)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "standup.txt");
        assert!(store
            .list_children(&inbox, Some(FOLDER_MIME))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_move_and_ensure_folder() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let id = store.create("a.txt", b"x", TEXT_MIME, "in").await.unwrap();

        let archive = ensure_folder(&store, "in", "archive").await.unwrap();
        assert_eq!(ensure_folder(&store, "in", "archive").await.unwrap(), archive);

        store.move_file(&id, &archive).await.unwrap();
        assert!(matches!(
            store.get_content(&id).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.get_content("in/archive/a.txt").await.unwrap(), "x");
    }

    #[tokio::test]
    async fn test_rejects_escaping_ids() {
        let dir = tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        assert!(matches!(
            store.get_content("../etc/passwd").await,
            Err(StoreError::InvalidId(_))
        ));
        assert!(store.create("../x", b"", TEXT_MIME, "").await.is_err());
    }

    #[test]
    fn test_retryable_classes() {
        let throttled = StoreError::Api {
            status: 429,
            message: "slow down".into(),
        };
        assert!(throttled.is_retryable());
        let missing = StoreError::Api {
            status: 404,
            message: "gone".into(),
        };
        assert!(!missing.is_retryable());
        assert!(!StoreError::MissingToken.is_retryable());
        assert!(is_transient_status(503));
        assert!(!is_transient_status(403));
    }
}

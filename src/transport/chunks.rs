use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::model::{Record, RootEnvelope, SessionResult};

use super::{assemble, RecordSink, SessionSource, TransportError};

const ROOT_FILE: &str = "root.json";

/// Filesystem store: one directory per session holding `root.json` and one
/// `<first record id>.json` file per submitted chunk.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    dir: PathBuf,
}

impl ChunkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf, TransportError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !session_id.starts_with('.');
        if !valid {
            return Err(TransportError::Rejected(format!("invalid session id {session_id:?}")));
        }
        Ok(self.dir.join(session_id))
    }

    /// Session ids currently stored, sorted.
    pub async fn sessions(&self) -> Result<Vec<String>, TransportError> {
        let mut out = Vec::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        out.sort();
        Ok(out)
    }
}

/// `<digits>.json` → first record id of the chunk.
fn chunk_start(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".json")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[async_trait]
impl RecordSink for ChunkStore {
    /// A new root replaces whatever was stored under the same session id.
    async fn submit_root(&self, root: &RootEnvelope) -> Result<(), TransportError> {
        let dir = self.session_dir(&root.session_id)?;
        if fs::try_exists(&dir).await? {
            fs::remove_dir_all(&dir).await?;
        }
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(ROOT_FILE), serde_json::to_vec(root)?).await?;
        tracing::debug!(session_id = %root.session_id, "stored root");
        Ok(())
    }

    async fn submit_records(&self, session_id: &str, records: Vec<Record>) -> Result<(), TransportError> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let dir = self.session_dir(session_id)?;
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.json", first.record_id));
        fs::write(&path, serde_json::to_vec(&records)?).await?;
        tracing::debug!(session_id, first_record = first.record_id, records = records.len(), "stored chunk");
        Ok(())
    }

    fn notify_stopped(&self, session_id: &str) {
        tracing::debug!(session_id, "recording stopped");
    }
}

#[async_trait]
impl SessionSource for ChunkStore {
    async fn fetch_session(&self, session_id: &str, lenient: bool) -> Result<SessionResult, TransportError> {
        let dir = self.session_dir(session_id)?;
        if !fs::try_exists(&dir).await? {
            return Err(TransportError::NotFound(format!(
                "cannot find directory for session {session_id}"
            )));
        }
        let root_path = dir.join(ROOT_FILE);
        if !fs::try_exists(&root_path).await? {
            return Err(TransportError::NotFound(format!(
                "cannot find root file for session {session_id}"
            )));
        }
        let root: RootEnvelope = serde_json::from_slice(&fs::read(&root_path).await?)?;

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(start) = chunk_start(&name) {
                files.push((start, entry.path()));
            }
        }
        files.sort_by_key(|(start, _)| *start);

        let mut chunks = Vec::with_capacity(files.len());
        for (_, path) in files {
            let bytes = fs::read(&path).await?;
            let chunk: Vec<Record> = serde_json::from_slice(&bytes).map_err(|e| {
                tracing::error!(path = %path.display(), error = %e, "unreadable chunk");
                e
            })?;
            chunks.push(chunk);
        }
        assemble(root, chunks, lenient)
    }
}

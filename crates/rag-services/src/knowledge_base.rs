//! Knowledge-base sources
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use rag_core::{KnowledgeBase, KnowledgeRecord, ServiceError};

/// Reads every `*.json` file in a directory. Each file holds an array of
/// `{id, content, metadata}` records; files are read in name order.
#[derive(Debug, Clone)]
pub struct JsonDirKnowledgeBase {
    dir: PathBuf,
}

impl JsonDirKnowledgeBase {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn json_files(&self) -> Result<Vec<PathBuf>, ServiceError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| kb_error(&self.dir, e))?;
        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| kb_error(&self.dir, e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl KnowledgeBase for JsonDirKnowledgeBase {
    async fn load_all(&self) -> Result<Vec<KnowledgeRecord>, ServiceError> {
        let mut records = Vec::new();
        for path in self.json_files().await? {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| kb_error(&path, e))?;
            let batch: Vec<KnowledgeRecord> =
                serde_json::from_str(&raw).map_err(|e| kb_error(&path, e))?;
            debug!(file = %path.display(), records = batch.len(), "loaded knowledge file");
            records.extend(batch);
        }
        info!(dir = %self.dir.display(), records = records.len(), "knowledge base loaded");
        Ok(records)
    }
}

fn kb_error(path: &Path, err: impl std::fmt::Display) -> ServiceError {
    ServiceError::KnowledgeBase(format!("{}: {}", path.display(), err))
}

/// Fixed in-memory records
#[derive(Debug, Clone, Default)]
pub struct StaticKnowledgeBase {
    records: Vec<KnowledgeRecord>,
}

impl StaticKnowledgeBase {
    pub fn new(records: Vec<KnowledgeRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl KnowledgeBase for StaticKnowledgeBase {
    async fn load_all(&self) -> Result<Vec<KnowledgeRecord>, ServiceError> {
        Ok(self.records.clone())
    }
}

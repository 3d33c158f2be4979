//! Persistence collaborator for observed items.

use std::path::PathBuf;

use async_trait::async_trait;

use super::item::ContentItem;
use crate::Result;

#[async_trait]
pub trait ContentArchive: Send + Sync {
    /// Store one version of an item. Storing the same version twice is a no-op.
    async fn store(&self, item: &ContentItem) -> Result<()>;
}

/// Writes `{dir}/{source}/{id}-v{version}.json`.
pub struct JsonFileArchive {
    dir: PathBuf,
}

impl JsonFileArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, item: &ContentItem) -> PathBuf {
        self.dir
            .join(sanitize(&item.source))
            .join(format!("{}-v{}.json", sanitize(&item.id), item.version))
    }
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[async_trait]
impl ContentArchive for JsonFileArchive {
    async fn store(&self, item: &ContentItem) -> Result<()> {
        let path = self.path_for(item);
        if tokio::fs::try_exists(&path).await? {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(item)?;
        tokio::fs::write(&path, json).await?;
        Ok(())
    }
}

/// Drops everything.
pub struct NullArchive;

#[async_trait]
impl ContentArchive for NullArchive {
    async fn store(&self, _item: &ContentItem) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn test_json_archive_writes_one_file_per_version() {
        let dir = tempfile::tempdir().unwrap();
        let archive = JsonFileArchive::new(dir.path());
        let mut item = ContentItem {
            id: "50/01".into(),
            version: 0,
            source: "weibo".into(),
            published_at: Utc::now(),
            parent_id: None,
            author: None,
            headline: "h".into(),
            url: None,
            payload: serde_json::json!({"k": 1}),
        };

        archive.store(&item).await.unwrap();
        item.version = 1;
        archive.store(&item).await.unwrap();

        let written = std::fs::read_dir(dir.path().join("weibo")).unwrap().count();
        assert_eq!(written, 2);
        let stored: ContentItem =
            serde_json::from_slice(&std::fs::read(archive.path_for(&item)).unwrap()).unwrap();
        assert_eq!(stored, item);
    }
}

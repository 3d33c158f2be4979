//! Emitted item versions (SQLx).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

use crate::Result;
use crate::database::time::{datetime_to_ms, ms_to_datetime, now_ms};
use crate::ingest::{ContentArchive, ContentItem};

/// Highest stored version of an item and when it was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVersion {
    pub item_id: String,
    pub version: u64,
    pub first_seen_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SqlxContentRepository {
    pool: SqlitePool,
}

impl SqlxContentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Latest version per item first stored at or after `since`.
    pub async fn latest_versions(&self, since: DateTime<Utc>) -> Result<Vec<StoredVersion>> {
        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT item_id, MAX(version), MAX(first_seen_at)
            FROM content_items
            WHERE first_seen_at >= ?
            GROUP BY item_id
            "#,
        )
        .bind(datetime_to_ms(since))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(item_id, version, first_seen_at)| StoredVersion {
                item_id,
                version: u64::try_from(version).unwrap_or(0),
                first_seen_at: ms_to_datetime(first_seen_at),
            })
            .collect())
    }

    /// Stored versions of one item, oldest first.
    pub async fn versions(&self, item_id: &str) -> Result<Vec<ContentItem>> {
        let rows: Vec<ContentRow> = sqlx::query_as(
            r#"
            SELECT item_id, version, source, parent_id, published_at, headline, author, url, payload
            FROM content_items
            WHERE item_id = ?
            ORDER BY version
            "#,
        )
        .bind(item_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ContentRow::into_item).collect()
    }

    /// Ids of items that reference `parent_id`.
    pub async fn children_of(&self, parent_id: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT item_id FROM content_items WHERE parent_id = ? ORDER BY item_id",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[derive(sqlx::FromRow)]
struct ContentRow {
    item_id: String,
    version: i64,
    source: String,
    parent_id: Option<String>,
    published_at: i64,
    headline: String,
    author: Option<String>,
    url: Option<String>,
    payload: String,
}

impl ContentRow {
    fn into_item(self) -> Result<ContentItem> {
        Ok(ContentItem {
            id: self.item_id,
            version: u64::try_from(self.version).unwrap_or(0),
            source: self.source,
            published_at: ms_to_datetime(self.published_at),
            parent_id: self.parent_id,
            author: self.author,
            headline: self.headline,
            url: self.url,
            payload: serde_json::from_str(&self.payload)?,
        })
    }
}

#[async_trait]
impl ContentArchive for SqlxContentRepository {
    async fn store(&self, item: &ContentItem) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO content_items
                (item_id, version, source, parent_id, published_at, headline, author, url, payload, first_seen_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(i64::try_from(item.version).unwrap_or(i64::MAX))
        .bind(&item.source)
        .bind(item.parent_id.as_deref())
        .bind(datetime_to_ms(item.published_at))
        .bind(&item.headline)
        .bind(item.author.as_deref())
        .bind(item.url.as_deref())
        .bind(serde_json::to_string(&item.payload)?)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        debug!(
            item_id = %item.id,
            version = item.version,
            inserted = result.rows_affected() > 0,
            "Content item stored"
        );
        Ok(())
    }
}

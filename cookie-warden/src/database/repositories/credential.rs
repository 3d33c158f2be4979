//! Credential persistence (SQLx).

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use crate::credentials::{Credential, CredentialError, CredentialPersistence};
use crate::database::time::{datetime_to_ms, ms_to_datetime};

/// One `credentials` row per target.
pub struct SqlxCredentialPersistence {
    pool: SqlitePool,
}

impl SqlxCredentialPersistence {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialPersistence for SqlxCredentialPersistence {
    #[instrument(skip(self))]
    async fn load(&self, target_id: &str) -> Result<Option<Credential>, CredentialError> {
        let row: Option<(String, Option<String>, i64)> = sqlx::query_as(
            r#"
            SELECT cookies, refresh_token, updated_at
            FROM credentials
            WHERE target_id = ?
            "#,
        )
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(cookies, refresh_token, updated_at)| {
            let mut credential = Credential::from_cookie_header(target_id, &cookies);
            // The column wins over a token left embedded in the cookie string.
            if refresh_token.is_some() {
                credential = credential.with_refresh_token(refresh_token);
            }
            credential.updated_at = ms_to_datetime(updated_at);
            credential
        }))
    }

    async fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        sqlx::query(
            r#"
            INSERT INTO credentials (target_id, cookies, refresh_token, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(target_id) DO UPDATE SET
                cookies = excluded.cookies,
                refresh_token = excluded.refresh_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&credential.target_id)
        .bind(credential.cookie_header())
        .bind(credential.refresh_token.as_deref())
        .bind(datetime_to_ms(credential.updated_at))
        .execute(&self.pool)
        .await?;

        debug!(target_id = %credential.target_id, "Credential row written");
        Ok(())
    }
}

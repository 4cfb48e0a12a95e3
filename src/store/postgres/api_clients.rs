//! API client store (H2H peers)

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::domain::ApiClient;
use crate::store::{ApiClientStore, StoreError};

pub struct PgApiClientStore {
    pool: PgPool,
}

impl PgApiClientStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_client(row: &PgRow) -> ApiClient {
    ApiClient {
        id: row.get("id"),
        client_id: row.get("client_id"),
        api_key: row.get("api_key"),
        secret: row.get("secret"),
        user_id: row.get("user_id"),
        ip_whitelist: row.get("ip_whitelist"),
        is_active: row.get("is_active"),
        max_requests_per_minute: row.get("max_requests_per_minute"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_used_at: row.get("last_used_at"),
    }
}

#[async_trait]
impl ApiClientStore for PgApiClientStore {
    async fn get_by_client_id(&self, client_id: &str) -> Result<ApiClient, StoreError> {
        let row = sqlx::query(
            "SELECT id, client_id, api_key, secret, user_id, ip_whitelist, is_active, \
                    max_requests_per_minute, created_at, updated_at, last_used_at \
             FROM api_clients WHERE client_id = $1",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::ApiClientNotFound)?;
        Ok(row_to_client(&row))
    }

    async fn touch_last_used(&self, client_id: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE api_clients SET last_used_at = NOW() WHERE client_id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

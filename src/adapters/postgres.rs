//! PostgreSQL storage adapter
//!
//! Holds the position table (single-row, status-guarded updates — the
//! status gate is what makes lifecycle steps idempotent) and the shared
//! token row that every cooperating process reads and upserts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::domain::{NewPosition, Position, PositionStatus};
use crate::error::{Result, ScoopError};
use crate::services::traits::PositionStore;

/// The shared token row is a singleton; writers race with upsert-overwrite
/// semantics and the last successful issuance wins.
const TOKEN_ROW_ID: i16 = 1;

/// Shared brokerage credential as stored
#[derive(Debug, Clone)]
pub struct SharedToken {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Reuse an existing connection pool
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // ==================== Positions ====================

    pub async fn create_position(&self, new: &NewPosition) -> Result<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO positions (symbol, name, target_price, stop_price, status)
            VALUES ($1, $2, $3, $4, 'pending')
            RETURNING id
            "#,
        )
        .bind(&new.symbol)
        .bind(&new.name)
        .bind(new.target_price)
        .bind(new.stop_price)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.get("id");
        info!(%id, symbol = %new.symbol, "created pending position");
        Ok(id)
    }

    pub async fn get_position(&self, id: i64) -> Result<Option<Position>> {
        let row = sqlx::query(
            r#"
            SELECT id, symbol, name, quantity, average_price, target_price, stop_price,
                   status, exit_price, created_at, opened_at, liquidated_at
            FROM positions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_position).transpose()
    }

    pub async fn list_by_status(&self, status: PositionStatus) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, name, quantity, average_price, target_price, stop_price,
                   status, exit_price, created_at, opened_at, liquidated_at
            FROM positions
            WHERE status = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        let positions = rows
            .into_iter()
            .map(row_to_position)
            .collect::<Result<Vec<_>>>()?;
        debug!(status = %status, count = positions.len(), "listed positions");
        Ok(positions)
    }

    /// Move a position along one lifecycle edge.
    ///
    /// The update is guarded on the expected current status, so a stale
    /// caller (or a concurrent pass over the same row) simply loses the
    /// race and gets `false` back instead of corrupting the lifecycle.
    pub async fn transition(
        &self,
        id: i64,
        from: PositionStatus,
        to: PositionStatus,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(ScoopError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() == 1;
        if applied {
            debug!(%id, %from, %to, "position transitioned");
        } else {
            debug!(%id, %from, %to, "transition skipped, status changed underneath");
        }
        Ok(applied)
    }

    /// Record a completed buy: quantity, fill price, Buying -> Open.
    pub async fn record_fill(&self, id: i64, quantity: i64, avg_price: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET quantity = $2, average_price = $3,
                status = 'open', opened_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'buying'
            "#,
        )
        .bind(id)
        .bind(quantity)
        .bind(avg_price)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Record a completed sell: exit price, Selling -> Liquidated.
    pub async fn record_liquidation(&self, id: i64, exit_price: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET status = 'liquidated', exit_price = $2,
                liquidated_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'selling'
            "#,
        )
        .bind(id)
        .bind(exit_price)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    // ==================== Shared token ====================

    /// Read the shared token row, expired or not; the broker applies the
    /// safety margin.
    pub async fn read_token(&self) -> Result<Option<SharedToken>> {
        let row = sqlx::query(
            r#"
            SELECT access_token, expires_at
            FROM shared_tokens
            WHERE id = $1
            "#,
        )
        .bind(TOKEN_ROW_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SharedToken {
            access_token: r.get("access_token"),
            expires_at: r.get("expires_at"),
        }))
    }

    /// Insert-or-replace the shared token. Always wins on conflict:
    /// any valid token is as good as any other.
    pub async fn upsert_token(&self, access_token: &str, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO shared_tokens (id, access_token, expires_at, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (id) DO UPDATE SET
                access_token = EXCLUDED.access_token,
                expires_at = EXCLUDED.expires_at,
                updated_at = NOW()
            "#,
        )
        .bind(TOKEN_ROW_ID)
        .bind(access_token)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        info!("Saved shared token, expires at {expires_at}");
        Ok(())
    }
}

fn row_to_position(row: PgRow) -> Result<Position> {
    let status: String = row.get("status");
    Ok(Position {
        id: row.get("id"),
        symbol: row.get("symbol"),
        name: row.get("name"),
        quantity: row.get("quantity"),
        average_price: row.get("average_price"),
        target_price: row.get("target_price"),
        stop_price: row.get("stop_price"),
        status: PositionStatus::parse(&status)?,
        exit_price: row.get("exit_price"),
        created_at: row.get("created_at"),
        opened_at: row.get("opened_at"),
        liquidated_at: row.get("liquidated_at"),
    })
}

#[async_trait]
impl crate::auth::TokenStore for PostgresStore {
    async fn read_token(&self) -> Result<Option<SharedToken>> {
        PostgresStore::read_token(self).await
    }

    async fn upsert_token(&self, access_token: &str, expires_at: DateTime<Utc>) -> Result<()> {
        PostgresStore::upsert_token(self, access_token, expires_at).await
    }
}

#[async_trait]
impl PositionStore for PostgresStore {
    async fn create_position(&self, new: &NewPosition) -> Result<i64> {
        PostgresStore::create_position(self, new).await
    }

    async fn list_pending(&self) -> Result<Vec<Position>> {
        self.list_by_status(PositionStatus::Pending).await
    }

    async fn list_open(&self) -> Result<Vec<Position>> {
        self.list_by_status(PositionStatus::Open).await
    }

    async fn transition(&self, id: i64, from: PositionStatus, to: PositionStatus) -> Result<bool> {
        PostgresStore::transition(self, id, from, to).await
    }

    async fn record_fill(&self, id: i64, quantity: i64, avg_price: i64) -> Result<bool> {
        PostgresStore::record_fill(self, id, quantity, avg_price).await
    }

    async fn record_liquidation(&self, id: i64, exit_price: i64) -> Result<bool> {
        PostgresStore::record_liquidation(self, id, exit_price).await
    }
}

#[cfg(test)]
mod tests {
    // Store behavior is covered through the status-guard logic in
    // domain::position and the executor tests with in-memory doubles.
    // DB-backed round trips require a running PostgreSQL instance.

    #[tokio::test]
    #[ignore] // Requires database
    async fn token_upsert_round_trip() {}
}

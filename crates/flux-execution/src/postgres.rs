//! Postgres 저장소 구현.
//!
//! sqlx 기반의 단순한 테이블 매핑입니다. 포지션은
//! `(strategy_id, symbol)` 복합 키로 유니크하며, upsert는
//! `ON CONFLICT DO UPDATE`로 처리합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool, Row};

use flux_core::{Order, Position, Side};

use crate::store::{Store, StoreError, StoreResult};

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// 포지션 테이블 행.
#[derive(Debug, Clone, FromRow)]
struct PositionRow {
    strategy_id: String,
    symbol: String,
    side: String,
    amount: Decimal,
    entry_price: Decimal,
    current_price: Decimal,
    unrealized_pnl: Decimal,
    realized_pnl: Decimal,
    opened_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    metadata: String,
}

impl PositionRow {
    fn into_position(self) -> StoreResult<Position> {
        let side = Side::parse(&self.side)
            .ok_or_else(|| StoreError::Serialization(format!("unknown side: {}", self.side)))?;
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        Ok(Position {
            strategy_id: self.strategy_id,
            symbol: self.symbol,
            side,
            amount: self.amount,
            entry_price: self.entry_price,
            current_price: self.current_price,
            unrealized_pnl: self.unrealized_pnl,
            realized_pnl: self.realized_pnl,
            opened_at: self.opened_at,
            updated_at: self.updated_at,
            metadata,
        })
    }
}

/// Postgres 기반 저장소.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// 연결 풀로 저장소를 생성한다.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 필요한 테이블을 생성한다 (존재하면 무시).
    pub async fn init_schema(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                client_order_id UUID PRIMARY KEY,
                order_id        TEXT,
                strategy_id     TEXT NOT NULL,
                symbol          TEXT NOT NULL,
                side            TEXT NOT NULL,
                order_type      TEXT NOT NULL,
                amount          NUMERIC NOT NULL,
                price           NUMERIC NOT NULL,
                filled_amount   NUMERIC NOT NULL DEFAULT 0,
                status          TEXT NOT NULL,
                created_at      TIMESTAMPTZ NOT NULL,
                updated_at      TIMESTAMPTZ NOT NULL,
                metadata        TEXT NOT NULL DEFAULT 'null'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                strategy_id    TEXT NOT NULL,
                symbol         TEXT NOT NULL,
                side           TEXT NOT NULL,
                amount         NUMERIC NOT NULL,
                entry_price    NUMERIC NOT NULL,
                current_price  NUMERIC NOT NULL,
                unrealized_pnl NUMERIC NOT NULL DEFAULT 0,
                realized_pnl   NUMERIC NOT NULL DEFAULT 0,
                opened_at      TIMESTAMPTZ NOT NULL,
                updated_at     TIMESTAMPTZ NOT NULL,
                metadata       TEXT NOT NULL DEFAULT 'null',
                PRIMARY KEY (strategy_id, symbol)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        let metadata = serde_json::to_string(&order.metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO orders (
                client_order_id, order_id, strategy_id, symbol, side, order_type,
                amount, price, filled_amount, status, created_at, updated_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(order.client_order_id)
        .bind(&order.order_id)
        .bind(&order.strategy_id)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.amount)
        .bind(order.price)
        .bind(order.filled_amount)
        .bind(order.status.to_string())
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_position(&self, position: &Position) -> StoreResult<()> {
        let metadata = serde_json::to_string(&position.metadata)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO positions (
                strategy_id, symbol, side, amount, entry_price, current_price,
                unrealized_pnl, realized_pnl, opened_at, updated_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (strategy_id, symbol) DO UPDATE SET
                side           = EXCLUDED.side,
                amount         = EXCLUDED.amount,
                entry_price    = EXCLUDED.entry_price,
                current_price  = EXCLUDED.current_price,
                unrealized_pnl = EXCLUDED.unrealized_pnl,
                realized_pnl   = EXCLUDED.realized_pnl,
                updated_at     = EXCLUDED.updated_at,
                metadata       = EXCLUDED.metadata
            "#,
        )
        .bind(&position.strategy_id)
        .bind(&position.symbol)
        .bind(position.side.to_string())
        .bind(position.amount)
        .bind(position.entry_price)
        .bind(position.current_price)
        .bind(position.unrealized_pnl)
        .bind(position.realized_pnl)
        .bind(position.opened_at)
        .bind(position.updated_at)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_position(&self, strategy_id: &str, symbol: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM positions WHERE strategy_id = $1 AND symbol = $2")
            .bind(strategy_id)
            .bind(flux_core::normalize_symbol(symbol))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_position(&self, strategy_id: &str, symbol: &str) -> StoreResult<Option<Position>> {
        let row: Option<PositionRow> = sqlx::query_as(
            "SELECT * FROM positions WHERE strategy_id = $1 AND symbol = $2",
        )
        .bind(strategy_id)
        .bind(flux_core::normalize_symbol(symbol))
        .fetch_optional(&self.pool)
        .await?;

        row.map(PositionRow::into_position).transpose()
    }

    async fn list_positions(&self, strategy_id: &str) -> StoreResult<Vec<Position>> {
        let rows: Vec<PositionRow> =
            sqlx::query_as("SELECT * FROM positions WHERE strategy_id = $1")
                .bind(strategy_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(PositionRow::into_position).collect()
    }

    async fn realized_pnl_today(&self, strategy_id: &str) -> StoreResult<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(realized_pnl), 0) AS pnl
            FROM positions
            WHERE strategy_id = $1 AND updated_at >= date_trunc('day', now() AT TIME ZONE 'utc') AT TIME ZONE 'utc'
            "#,
        )
        .bind(strategy_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<Decimal, _>("pnl")?)
    }

    async fn cumulative_realized_pnl(&self, strategy_id: &str) -> StoreResult<Decimal> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(realized_pnl), 0) AS pnl FROM positions WHERE strategy_id = $1",
        )
        .bind(strategy_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<Decimal, _>("pnl")?)
    }

    async fn total_unrealized_pnl(&self, strategy_id: &str) -> StoreResult<Decimal> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(unrealized_pnl), 0) AS pnl FROM positions WHERE strategy_id = $1",
        )
        .bind(strategy_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<Decimal, _>("pnl")?)
    }
}

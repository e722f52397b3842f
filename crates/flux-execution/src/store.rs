//! 주문/포지션 영속화.
//!
//! 포지션은 `(strategy_id, symbol)`당 한 행으로 유지됩니다. 로컬 저장소는
//! 캐시이며 거래소가 진실의 원천입니다. 제출 성공 후 저장이 실패하면
//! 원장/거래소 불일치가 생기고, 이는 다음 정합화가 치유할 때까지
//! 시끄럽게 로그로 드러나야 합니다.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use flux_core::{normalize_symbol, FluxError, FluxResult, Order, Position};
use flux_risk::PortfolioReader;

/// 저장소 에러 타입.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// 저장소 작업을 위한 Result 타입.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for FluxError {
    fn from(err: StoreError) -> Self {
        FluxError::Database(err.to_string())
    }
}

/// 주문/포지션 영속화 인터페이스.
#[async_trait]
pub trait Store: Send + Sync {
    // === 주문 ===

    /// 주문을 저장한다.
    async fn insert_order(&self, order: &Order) -> StoreResult<()>;

    // === 포지션 ===

    /// 포지션을 추가하거나 갱신한다.
    async fn upsert_position(&self, position: &Position) -> StoreResult<()>;

    /// 포지션을 삭제한다.
    async fn delete_position(&self, strategy_id: &str, symbol: &str) -> StoreResult<()>;

    /// 단일 포지션을 조회한다.
    async fn get_position(&self, strategy_id: &str, symbol: &str) -> StoreResult<Option<Position>>;

    /// 전략의 모든 포지션을 조회한다.
    async fn list_positions(&self, strategy_id: &str) -> StoreResult<Vec<Position>>;

    // === 손익 집계 ===

    /// 오늘(UTC) 갱신된 포지션의 실현 손익 합계.
    async fn realized_pnl_today(&self, strategy_id: &str) -> StoreResult<Decimal>;

    /// 누적 실현 손익 합계.
    async fn cumulative_realized_pnl(&self, strategy_id: &str) -> StoreResult<Decimal>;

    /// 열린 포지션의 미실현 손익 합계.
    async fn total_unrealized_pnl(&self, strategy_id: &str) -> StoreResult<Decimal>;
}

// =============================================================================
// 인메모리 구현
// =============================================================================

/// 테스트 및 모의 거래용 인메모리 저장소.
#[derive(Debug, Default)]
pub struct MemoryStore {
    positions: RwLock<HashMap<(String, String), Position>>,
    orders: RwLock<Vec<Order>>,
}

impl MemoryStore {
    /// 빈 저장소를 생성한다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 저장된 주문 개수를 반환한다.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }

    /// 저장된 주문의 사본을 반환한다.
    pub async fn orders(&self) -> Vec<Order> {
        self.orders.read().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        self.orders.write().await.push(order.clone());
        Ok(())
    }

    async fn upsert_position(&self, position: &Position) -> StoreResult<()> {
        let key = (position.strategy_id.clone(), position.symbol.clone());
        self.positions.write().await.insert(key, position.clone());
        Ok(())
    }

    async fn delete_position(&self, strategy_id: &str, symbol: &str) -> StoreResult<()> {
        let key = (strategy_id.to_string(), normalize_symbol(symbol));
        self.positions.write().await.remove(&key);
        Ok(())
    }

    async fn get_position(&self, strategy_id: &str, symbol: &str) -> StoreResult<Option<Position>> {
        let key = (strategy_id.to_string(), normalize_symbol(symbol));
        Ok(self.positions.read().await.get(&key).cloned())
    }

    async fn list_positions(&self, strategy_id: &str) -> StoreResult<Vec<Position>> {
        Ok(self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.strategy_id == strategy_id)
            .cloned()
            .collect())
    }

    async fn realized_pnl_today(&self, strategy_id: &str) -> StoreResult<Decimal> {
        let today_start = Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("valid midnight")
            .and_utc();

        Ok(self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.strategy_id == strategy_id && p.updated_at >= today_start)
            .map(|p| p.realized_pnl)
            .sum())
    }

    async fn cumulative_realized_pnl(&self, strategy_id: &str) -> StoreResult<Decimal> {
        Ok(self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.strategy_id == strategy_id)
            .map(|p| p.realized_pnl)
            .sum())
    }

    async fn total_unrealized_pnl(&self, strategy_id: &str) -> StoreResult<Decimal> {
        Ok(self
            .positions
            .read()
            .await
            .values()
            .filter(|p| p.strategy_id == strategy_id)
            .map(|p| p.unrealized_pnl)
            .sum())
    }
}

// =============================================================================
// 게이트용 포트폴리오 뷰
// =============================================================================

/// 저장소 위에 포트폴리오 가치/손익 계산을 얹은 뷰.
///
/// 포트폴리오 가치 = 초기 자본 + 누적 실현 손익 + 미실현 손익,
/// 음수가 되지 않도록 0에서 바닥 처리합니다.
pub struct StorePortfolio {
    store: Arc<dyn Store>,
    initial_cash: Decimal,
}

impl StorePortfolio {
    /// 새 포트폴리오 뷰를 생성한다.
    pub fn new(store: Arc<dyn Store>, initial_cash: Decimal) -> Self {
        Self {
            store,
            initial_cash,
        }
    }
}

#[async_trait]
impl PortfolioReader for StorePortfolio {
    async fn portfolio_value(&self, strategy_id: &str) -> FluxResult<Decimal> {
        let realized = self.store.cumulative_realized_pnl(strategy_id).await?;
        let unrealized = self.store.total_unrealized_pnl(strategy_id).await?;
        Ok((self.initial_cash + realized + unrealized).max(Decimal::ZERO))
    }

    async fn daily_pnl(&self, strategy_id: &str) -> FluxResult<Decimal> {
        let realized_today = self.store.realized_pnl_today(strategy_id).await?;
        let unrealized = self.store.total_unrealized_pnl(strategy_id).await?;
        Ok(realized_today + unrealized)
    }

    async fn open_positions(&self, strategy_id: &str) -> FluxResult<Vec<Position>> {
        Ok(self.store.list_positions(strategy_id).await?)
    }
}

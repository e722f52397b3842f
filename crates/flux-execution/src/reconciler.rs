//! 거래소 우선 포지션 정합화.
//!
//! 거래소가 보고하는 포지션 집합이 진실의 원천입니다. 로컬 원장은 한
//! 사이클 이상 어긋난 채로 남아서는 안 됩니다.
//!
//! 심볼 기준 3분할:
//! - 로컬에만 존재 (유령 포지션) → 로컬 삭제
//! - 거래소에만 존재 → 거래소 값으로 로컬 생성
//! - 양쪽 존재 → 거래소 값으로 덮어쓰기 (병합 없음, 충돌은 경고 로그)
//!
//! 거래소 상태가 변하지 않았다면 재실행은 no-op입니다 (멱등).

use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use flux_core::{FluxError, FluxResult, Position};
use flux_exchange::{ExchangePosition, PerpExchange};
use rust_decimal::Decimal;

use crate::store::Store;

/// 정합화 결과 보고.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ReconcileReport {
    /// 거래소 값으로 새로 생성된 포지션 수
    pub created: usize,
    /// 거래소 값으로 덮어쓴 포지션 수
    pub updated: usize,
    /// 삭제된 유령 포지션 수
    pub deleted: usize,
}

impl ReconcileReport {
    /// 아무 변경도 없었는지 확인한다.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// 포지션 정합화기.
pub struct Reconciler {
    exchange: Arc<dyn PerpExchange>,
    store: Arc<dyn Store>,
}

impl Reconciler {
    /// 새 정합화기를 생성한다.
    pub fn new(exchange: Arc<dyn PerpExchange>, store: Arc<dyn Store>) -> Self {
        Self { exchange, store }
    }

    /// 전략의 로컬 포지션을 거래소 상태와 정합화한다.
    ///
    /// 독립 실행 작업으로도, 사이클 시작 단계로도 사용됩니다.
    pub async fn reconcile(&self, strategy_id: &str) -> FluxResult<ReconcileReport> {
        let remote_positions = self
            .exchange
            .get_positions()
            .await
            .map_err(|e| FluxError::Exchange(e.to_string()))?;

        // 수량 0인 항목은 종료된 포지션이다
        let remote: HashMap<String, ExchangePosition> = remote_positions
            .into_iter()
            .filter(|p| p.amount > Decimal::ZERO)
            .map(|p| (p.symbol.clone(), p))
            .collect();

        let local = self.store.list_positions(strategy_id).await?;
        let mut report = ReconcileReport::default();

        // 로컬에만 있는 유령 포지션 삭제
        for position in &local {
            if !remote.contains_key(&position.symbol) {
                info!(
                    symbol = %position.symbol,
                    amount = %position.amount,
                    entry_price = %position.entry_price,
                    "Removing ghost position no longer reported by exchange"
                );
                self.store
                    .delete_position(strategy_id, &position.symbol)
                    .await?;
                report.deleted += 1;
            }
        }

        let local_by_symbol: HashMap<&str, &Position> =
            local.iter().map(|p| (p.symbol.as_str(), p)).collect();

        // 거래소 포지션을 생성하거나 덮어쓴다
        for (symbol, remote_pos) in &remote {
            match local_by_symbol.get(symbol.as_str()) {
                Some(local_pos) => {
                    let in_sync = local_pos.side == remote_pos.side
                        && local_pos.amount == remote_pos.amount
                        && local_pos.entry_price == remote_pos.entry_price;
                    if in_sync {
                        continue;
                    }

                    // 충돌은 항상 거래소 우선으로 해소하고 경고로 남긴다
                    warn!(
                        symbol = %symbol,
                        local_side = %local_pos.side,
                        local_amount = %local_pos.amount,
                        remote_side = %remote_pos.side,
                        remote_amount = %remote_pos.amount,
                        "Position conflict, exchange wins"
                    );

                    let mut updated = (*local_pos).clone();
                    updated.overwrite_from_exchange(
                        remote_pos.side,
                        remote_pos.amount,
                        remote_pos.entry_price,
                    );
                    self.store.upsert_position(&updated).await?;
                    report.updated += 1;
                }
                None => {
                    info!(
                        symbol = %symbol,
                        amount = %remote_pos.amount,
                        entry_price = %remote_pos.entry_price,
                        "Creating position from exchange state"
                    );

                    let position = Position::new(
                        strategy_id,
                        symbol,
                        remote_pos.side,
                        remote_pos.amount,
                        remote_pos.entry_price,
                    )
                    .with_metadata(json!({ "synced_from_exchange": true }));
                    self.store.upsert_position(&position).await?;
                    report.created += 1;
                }
            }
        }

        info!(
            active = remote.len(),
            created = report.created,
            updated = report.updated,
            deleted = report.deleted,
            "Position reconciliation complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use flux_core::Side;
    use flux_exchange::{
        ExchangeResult, LimitOrderRequest, MarketOrderRequest, OrderAck, OrderStatusInfo,
        SymbolFilters,
    };
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// 포지션 목록을 고정으로 돌려주는 테스트 거래소.
    struct FixedExchange {
        positions: Mutex<Vec<ExchangePosition>>,
    }

    impl FixedExchange {
        fn new(positions: Vec<ExchangePosition>) -> Self {
            Self {
                positions: Mutex::new(positions),
            }
        }
    }

    #[async_trait::async_trait]
    impl PerpExchange for FixedExchange {
        fn name(&self) -> &str {
            "fixed"
        }

        fn filters(&self, symbol: &str) -> SymbolFilters {
            SymbolFilters::for_symbol(symbol)
        }

        async fn create_market_order(
            &self,
            _request: &MarketOrderRequest,
        ) -> ExchangeResult<OrderAck> {
            unimplemented!("not used in reconciler tests")
        }

        async fn create_limit_order(
            &self,
            _request: &LimitOrderRequest,
        ) -> ExchangeResult<OrderAck> {
            unimplemented!("not used in reconciler tests")
        }

        async fn cancel_order(&self, _order_id: &str) -> ExchangeResult<()> {
            unimplemented!("not used in reconciler tests")
        }

        async fn get_order_status(&self, _order_id: &str) -> ExchangeResult<OrderStatusInfo> {
            unimplemented!("not used in reconciler tests")
        }

        async fn get_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
            Ok(self.positions.lock().unwrap().clone())
        }

        async fn set_position_tpsl(
            &self,
            _symbol: &str,
            _side: Side,
            _stop_loss: Option<rust_decimal::Decimal>,
            _take_profit: Option<rust_decimal::Decimal>,
        ) -> ExchangeResult<()> {
            unimplemented!("not used in reconciler tests")
        }
    }

    fn remote(symbol: &str, side: Side, amount: Decimal, entry: Decimal) -> ExchangePosition {
        ExchangePosition {
            symbol: symbol.to_string(),
            side,
            amount,
            entry_price: entry,
        }
    }

    #[tokio::test]
    async fn test_ghost_position_deleted() {
        // local={BTC:1}, exchange={} => BTC는 로컬에서 제거
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_position(&Position::new("s1", "BTC", Side::Bid, dec!(1), dec!(50000)))
            .await
            .unwrap();

        let exchange = Arc::new(FixedExchange::new(vec![]));
        let reconciler = Reconciler::new(exchange, store.clone());

        let report = reconciler.reconcile("s1").await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(store.get_position("s1", "BTC").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_position_created() {
        // local={}, exchange={ETH:2@3000} => ETH가 로컬에 생성
        let store = Arc::new(MemoryStore::new());
        let exchange = Arc::new(FixedExchange::new(vec![remote(
            "ETH",
            Side::Bid,
            dec!(2),
            dec!(3000),
        )]));
        let reconciler = Reconciler::new(exchange, store.clone());

        let report = reconciler.reconcile("s1").await.unwrap();

        assert_eq!(report.created, 1);
        let position = store.get_position("s1", "ETH").await.unwrap().unwrap();
        assert_eq!(position.amount, dec!(2));
        assert_eq!(position.entry_price, dec!(3000));
    }

    #[tokio::test]
    async fn test_conflict_exchange_wins() {
        // local={SOL:5}, exchange={SOL:7} => 로컬 SOL은 7이 된다
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_position(&Position::new("s1", "SOL", Side::Bid, dec!(5), dec!(100)))
            .await
            .unwrap();

        let exchange = Arc::new(FixedExchange::new(vec![remote(
            "SOL",
            Side::Bid,
            dec!(7),
            dec!(100),
        )]));
        let reconciler = Reconciler::new(exchange, store.clone());

        let report = reconciler.reconcile("s1").await.unwrap();

        assert_eq!(report.updated, 1);
        let position = store.get_position("s1", "SOL").await.unwrap().unwrap();
        assert_eq!(position.amount, dec!(7));
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_position(&Position::new("s1", "BTC", Side::Bid, dec!(1), dec!(50000)))
            .await
            .unwrap();

        let exchange = Arc::new(FixedExchange::new(vec![
            remote("BTC", Side::Bid, dec!(2), dec!(51000)),
            remote("ETH", Side::Ask, dec!(3), dec!(3000)),
        ]));
        let reconciler = Reconciler::new(exchange, store.clone());

        let first = reconciler.reconcile("s1").await.unwrap();
        assert_eq!(first.updated, 1);
        assert_eq!(first.created, 1);

        // 거래소 상태가 그대로면 두 번째 실행은 no-op이어야 한다
        let second = reconciler.reconcile("s1").await.unwrap();
        assert!(second.is_noop());
    }

    #[tokio::test]
    async fn test_zero_amount_treated_as_closed() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_position(&Position::new("s1", "BTC", Side::Bid, dec!(1), dec!(50000)))
            .await
            .unwrap();

        // 거래소가 수량 0으로 보고하면 종료된 포지션이다
        let exchange = Arc::new(FixedExchange::new(vec![remote(
            "BTC",
            Side::Bid,
            Decimal::ZERO,
            dec!(50000),
        )]));
        let reconciler = Reconciler::new(exchange, store.clone());

        let report = reconciler.reconcile("s1").await.unwrap();

        assert_eq!(report.deleted, 1);
        assert!(store.get_position("s1", "BTC").await.unwrap().is_none());
    }
}

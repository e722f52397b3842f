//! 실행 엔진.
//!
//! 고정 간격 스케줄러가 한 번에 하나의 사이클만 구동합니다:
//! 1. 리스크 한도 핫 리로드
//! 2. 포지션 정합화 (거래소 우선)
//! 3. 마크-투-마켓 및 미실현 손익 갱신
//! 4. 시장 국면 조회로 활성 전략 패밀리 선택
//! 5. 모멘텀 전략 시그널 처리 (게이트 → 정규화 → 제출 → 영속화 →
//!    보호 주문)
//! 6. 노출 재계산 후 헤지 패밀리 재평가
//!
//! 사이클은 절대 겹치지 않으며, 사이클 내부의 예상치 못한 오류는
//! 기록된 뒤 다음 사이클로 넘어갑니다. 일시적 장애로 프로세스가
//! 종료되지 않습니다.

use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use flux_core::{
    normalize_symbol, EngineConfig, FluxError, FluxResult, MarketDataSource, Order, OrderType,
    Position, Price, RegimeSource, Side, Strategy, StrategyFamily, TradingSignal,
};
use flux_exchange::{MarketOrderRequest, PerpExchange};
use flux_portfolio::{ExposureLedger, HedgeAction, HedgeBreaker, HedgeTrigger};
use flux_risk::{LimitsWatcher, PortfolioReader, RiskGate};

use crate::reconciler::Reconciler;
use crate::store::{Store, StorePortfolio};

/// 포지션 오픈 확인 최대 시도 횟수.
const TPSL_CONFIRM_ATTEMPTS: u32 = 5;

/// 포지션 오픈 확인 재시도 간격.
const TPSL_CONFIRM_DELAY: Duration = Duration::from_millis(500);

/// 엔진이 사용하는 외부 협력자 묶음.
pub struct EngineDeps {
    /// 거래소 어댑터
    pub exchange: Arc<dyn PerpExchange>,
    /// 영속화 저장소
    pub store: Arc<dyn Store>,
    /// 시장 데이터 협력자
    pub market_data: Arc<dyn MarketDataSource>,
    /// 시장 국면 협력자
    pub regime: Arc<dyn RegimeSource>,
    /// 전략 인스턴스 (모멘텀 + 헤지 패밀리)
    pub strategies: Vec<Arc<dyn Strategy>>,
}

/// 주기 실행 엔진.
pub struct ExecutionEngine {
    strategy_id: String,
    paper_trading: bool,
    cycle_interval: Duration,

    exchange: Arc<dyn PerpExchange>,
    store: Arc<dyn Store>,
    market_data: Arc<dyn MarketDataSource>,
    regime: Arc<dyn RegimeSource>,
    strategies: Vec<Arc<dyn Strategy>>,

    limits: LimitsWatcher,
    gate: RiskGate,
    portfolio: Arc<StorePortfolio>,
    reconciler: Reconciler,
    ledger: ExposureLedger,
    hedge_trigger: HedgeTrigger,
    hedge_breaker: HedgeBreaker,
}

impl ExecutionEngine {
    /// 새 실행 엔진을 생성한다.
    pub fn new(config: &EngineConfig, deps: EngineDeps, limits: LimitsWatcher) -> Self {
        let portfolio = Arc::new(StorePortfolio::new(
            deps.store.clone(),
            config.portfolio_value,
        ));
        let gate = RiskGate::new(limits.shared(), portfolio.clone());
        let reconciler = Reconciler::new(deps.exchange.clone(), deps.store.clone());
        let ledger = ExposureLedger::new(config.portfolio_value);

        Self {
            strategy_id: config.strategy_id.clone(),
            paper_trading: config.paper_trading,
            cycle_interval: Duration::from_secs(config.cycle_interval_secs),
            exchange: deps.exchange,
            store: deps.store,
            market_data: deps.market_data,
            regime: deps.regime,
            strategies: deps.strategies,
            limits,
            gate,
            portfolio,
            reconciler,
            ledger,
            hedge_trigger: HedgeTrigger::default(),
            hedge_breaker: HedgeBreaker::default(),
        }
    }

    /// 헤지 트리거/차단기를 교체한다.
    pub fn with_hedging(mut self, trigger: HedgeTrigger, breaker: HedgeBreaker) -> Self {
        self.hedge_trigger = trigger;
        self.hedge_breaker = breaker;
        self
    }

    /// 메인 실행 루프.
    ///
    /// 다음 사이클은 이전 사이클이 완전히 끝난 뒤에만 시작됩니다.
    pub async fn run(&mut self) -> FluxResult<()> {
        info!(
            strategy_id = %self.strategy_id,
            paper_trading = self.paper_trading,
            interval_secs = self.cycle_interval.as_secs(),
            strategies = self.strategies.len(),
            "Starting execution engine"
        );

        let mut interval = tokio::time::interval(self.cycle_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.run_cycle().await {
                // 사이클 경계에서 잡아 기록하고 루프는 계속된다
                error!(error = %e, "Cycle failed, continuing");
            }
        }
    }

    /// 단일 실행 사이클.
    pub async fn run_cycle(&mut self) -> FluxResult<()> {
        // 1. 리스크 한도 핫 리로드
        self.limits.reload_if_changed();

        // 2. 거래소 우선 정합화
        self.reconciler.reconcile(&self.strategy_id).await?;

        // 3. 마크-투-마켓
        let positions = self.mark_to_market().await?;

        // 4. 노출 원장 재구성
        self.rebuild_ledger(&positions).await?;

        // 5. 시장 국면 조회
        let regime = self
            .regime
            .detect()
            .await
            .map_err(|e| FluxError::Strategy(format!("regime detection failed: {}", e)))?;
        info!(regime = %regime, "Market regime detected");

        // 6. 모멘텀 전략 처리
        let momentum: Vec<_> = self
            .strategies
            .iter()
            .filter(|s| s.family() == StrategyFamily::Momentum && s.active_in(regime))
            .cloned()
            .collect();
        for strategy in momentum {
            if let Err(e) = self.process_strategy(&strategy).await {
                error!(strategy = %strategy.id(), error = %e, "Strategy processing failed");
            }
        }

        // 7. 헤지 재평가 (차단기를 거친 판정)
        let exposure = self.ledger.state();
        let action = self.hedge_trigger.evaluate(&exposure);
        let action = self.hedge_breaker.apply(action, Instant::now());
        if action != HedgeAction::None {
            info!(action = %action, "Hedge family activated");
            let family = match action {
                HedgeAction::ActivateMrLongs => StrategyFamily::MrLongHedge,
                HedgeAction::ActivateMrShorts => StrategyFamily::MrShortHedge,
                HedgeAction::None => unreachable!(),
            };

            let hedgers: Vec<_> = self
                .strategies
                .iter()
                .filter(|s| s.family() == family)
                .cloned()
                .collect();
            for strategy in hedgers {
                if let Err(e) = self.process_strategy(&strategy).await {
                    error!(strategy = %strategy.id(), error = %e, "Hedge strategy processing failed");
                }
            }
        }

        Ok(())
    }

    /// 모든 로컬 포지션의 마크 가격과 미실현 손익을 갱신한다.
    async fn mark_to_market(&self) -> FluxResult<Vec<Position>> {
        let mut positions = self.store.list_positions(&self.strategy_id).await?;

        for position in &mut positions {
            match self.market_data.snapshot(&position.symbol).await {
                Ok(Some(snapshot)) if snapshot.price > Decimal::ZERO => {
                    position.update_mark(snapshot.price);
                    self.store.upsert_position(position).await?;
                }
                Ok(_) => {
                    debug!(symbol = %position.symbol, "No market data, skipping mark update");
                }
                Err(e) => {
                    warn!(symbol = %position.symbol, error = %e, "Market data query failed");
                }
            }
        }

        Ok(positions)
    }

    /// 포지션 집합에서 노출 원장을 재구성한다.
    async fn rebuild_ledger(&mut self, positions: &[Position]) -> FluxResult<()> {
        let portfolio_value = self.portfolio.portfolio_value(&self.strategy_id).await?;

        self.ledger.set_portfolio_value(portfolio_value);
        self.ledger.clear();
        for position in positions {
            self.ledger
                .update_position(&position.symbol, position.side, position.amount, position.entry_price);
        }
        self.ledger.set_long_pnl_pct(long_pnl_pct(positions));

        Ok(())
    }

    /// 단일 전략 인스턴스를 처리한다.
    async fn process_strategy(&mut self, strategy: &Arc<dyn Strategy>) -> FluxResult<()> {
        let symbol = normalize_symbol(strategy.symbol());

        let snapshot = self
            .market_data
            .snapshot(&symbol)
            .await
            .map_err(|e| FluxError::Strategy(format!("market data for {}: {}", symbol, e)))?;
        let Some(snapshot) = snapshot else {
            debug!(symbol = %symbol, "No market data for strategy, skipping");
            return Ok(());
        };

        let position = self.store.get_position(&self.strategy_id, &symbol).await?;
        let signal = strategy.generate_signal(&snapshot, position.as_ref()).await?;

        if let Some(signal) = signal {
            self.execute_signal(&signal, strategy.id()).await?;
        }

        Ok(())
    }

    /// 승인된 시그널을 주문으로 전환한다.
    ///
    /// 거부·실패 시 부수 효과가 없어야 하고, 쿨다운/일일 예산은 실제
    /// 제출 성공 후에만 소모됩니다.
    async fn execute_signal(
        &mut self,
        signal: &TradingSignal,
        instance_id: &str,
    ) -> FluxResult<Option<Uuid>> {
        let symbol = signal.symbol.clone();
        let side = signal.signal_type.order_side();

        // 리스크 게이트. 거부는 로그만 남기고 끝난다
        let decision = self
            .gate
            .evaluate(
                &self.strategy_id,
                &symbol,
                side,
                signal.amount,
                signal.price,
                OrderType::Market,
            )
            .await?;
        if !decision.approved {
            warn!(
                symbol = %symbol,
                signal_type = %signal.signal_type,
                instance = instance_id,
                reason = %decision.reason,
                "Order rejected by risk gate"
            );
            return Ok(None);
        }
        debug!(symbol = %symbol, details = ?decision.details, "Risk gate approved");

        // 멱등성 키는 어떤 네트워크 호출보다 먼저 생성한다 - 재시도된
        // 사이클이 같은 승인 시그널을 이중 제출하지 않도록
        let client_order_id = Uuid::new_v4();

        // 수량을 로트 그리드로 내림 (절대 올림하지 않음)
        let filters = self.exchange.filters(&symbol);
        let amount = filters.floor_to_lot(signal.amount);
        if amount <= Decimal::ZERO {
            warn!(
                symbol = %symbol,
                requested = %signal.amount,
                lot_size = %filters.lot_size,
                "Amount below lot size after flooring, skipping order"
            );
            return Ok(None);
        }

        let is_close = signal.signal_type.is_close();

        // 보호 주문 가격은 진입 주문에만 적용한다
        let (stop_loss, take_profit) = if is_close {
            (None, None)
        } else {
            filters.validate_tpsl(&symbol, side, signal.price, signal.stop_loss, signal.take_profit)
        };

        if self.paper_trading {
            info!(
                symbol = %symbol,
                side = %side,
                amount = %amount,
                price = %signal.price,
                "Paper trading, order not sent to exchange"
            );
            // 모의 거래도 실거래와 같은 빈도/노출 규칙을 따른다
            self.apply_ledger_update(&symbol, side, amount, signal.price, is_close);
            self.gate.record_trade(&symbol);
            return Ok(Some(client_order_id));
        }

        // close_* 시그널은 반드시 reduce_only - 청산 계산이 틀려도 반대
        // 방향 신규 포지션으로 뒤집히지 않는다
        let mut request =
            MarketOrderRequest::new(symbol.clone(), side, amount, client_order_id).reduce_only(is_close);
        if stop_loss.is_some() || take_profit.is_some() {
            request = request.with_protection(stop_loss, take_profit, signal.price);
        }

        let ack = match self.exchange.create_market_order(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                // 거래소 장애는 이 사이클에서 이 시그널의 처리를 끝낸다.
                // 다음 사이클에 새로 평가된다. 타임아웃은 미확인 제출이므로
                // 어떤 주문도 submitted로 기록하지 않는다.
                error!(
                    symbol = %symbol,
                    error = %e,
                    unconfirmed = e.is_unconfirmed_submission(),
                    "Order submission failed"
                );
                return Ok(None);
            }
        };

        info!(
            symbol = %symbol,
            side = %side,
            amount = %amount,
            order_id = %ack.order_id,
            client_order_id = %client_order_id,
            reduce_only = is_close,
            "Order submitted"
        );

        // 주문 영속화 (명시적 성공 응답을 받았을 때만 submitted)
        let order = Order::new(
            client_order_id,
            &self.strategy_id,
            &symbol,
            side,
            OrderType::Market,
            amount,
            signal.price,
        )
        .with_metadata(json!({
            "signal_type": signal.signal_type,
            "confidence": signal.confidence,
            "instance": instance_id,
        }))
        .mark_submitted(&ack.order_id);

        if let Err(e) = self.store.insert_order(&order).await {
            // 제출은 이미 성공했다 - 저장 실패는 정합화가 치유할 때까지
            // 원장/거래소 불일치를 만들므로 크게 드러낸다
            error!(
                symbol = %symbol,
                client_order_id = %client_order_id,
                error = %e,
                "Order persistence failed after successful submission"
            );
        }

        // 진입 주문이면 포지션 생성
        if !is_close {
            match self.store.get_position(&self.strategy_id, &symbol).await {
                Ok(Some(_)) => {
                    // 기존 포지션의 정확한 평균가는 다음 정합화가 거래소
                    // 값으로 맞춘다
                    debug!(symbol = %symbol, "Position exists, reconciliation will absorb the fill");
                }
                Ok(None) => {
                    let position =
                        Position::new(&self.strategy_id, &symbol, side, amount, signal.price)
                            .with_metadata(json!({
                                "order_id": ack.order_id,
                                "signal_confidence": signal.confidence,
                            }));
                    if let Err(e) = self.store.upsert_position(&position).await {
                        error!(
                            symbol = %symbol,
                            error = %e,
                            "Position persistence failed after successful submission"
                        );
                    }
                }
                Err(e) => {
                    error!(symbol = %symbol, error = %e, "Position lookup failed after submission");
                }
            }
        }

        self.apply_ledger_update(&symbol, side, amount, signal.price, is_close);

        // 실제 제출이 성공했으므로 이제서야 빈도 예산을 소모한다
        self.gate.record_trade(&symbol);

        // 2단계 보호 주문 부착: 체결 확인 후 포지션에 부착
        if !is_close && (stop_loss.is_some() || take_profit.is_some()) {
            self.attach_protection(&symbol, side, stop_loss, take_profit)
                .await;
        }

        Ok(Some(client_order_id))
    }

    /// 노출 원장에 주문 결과를 반영한다.
    fn apply_ledger_update(
        &mut self,
        symbol: &str,
        side: Side,
        amount: Decimal,
        price: Price,
        is_close: bool,
    ) {
        if is_close {
            self.ledger.remove_position(symbol);
        } else {
            self.ledger.update_position(symbol, side, amount, price);
        }
    }

    /// 포지션 오픈을 확인한 뒤 보호 주문을 부착한다 (best-effort).
    ///
    /// 고정 대기 대신 거래소가 포지션을 보고할 때까지 제한된 횟수만큼
    /// 폴링합니다. 실패해도 주문 자체는 이미 성공했으므로 치명적이지
    /// 않습니다.
    async fn attach_protection(
        &self,
        symbol: &str,
        side: Side,
        stop_loss: Option<Price>,
        take_profit: Option<Price>,
    ) {
        for attempt in 1..=TPSL_CONFIRM_ATTEMPTS {
            match self.exchange.get_positions().await {
                Ok(positions)
                    if positions
                        .iter()
                        .any(|p| p.symbol == symbol && p.amount > Decimal::ZERO) =>
                {
                    match self
                        .exchange
                        .set_position_tpsl(symbol, side, stop_loss, take_profit)
                        .await
                    {
                        Ok(()) => {
                            info!(
                                symbol = %symbol,
                                stop_loss = ?stop_loss,
                                take_profit = ?take_profit,
                                "Protective orders attached to position"
                            );
                        }
                        Err(e) => {
                            warn!(
                                symbol = %symbol,
                                error = %e,
                                "TP/SL attachment failed (order itself already succeeded)"
                            );
                        }
                    }
                    return;
                }
                Ok(_) => {
                    debug!(symbol = %symbol, attempt, "Position not confirmed open yet");
                }
                Err(e) => {
                    warn!(symbol = %symbol, attempt, error = %e, "Position confirmation query failed");
                }
            }

            tokio::time::sleep(TPSL_CONFIRM_DELAY).await;
        }

        warn!(
            symbol = %symbol,
            attempts = TPSL_CONFIRM_ATTEMPTS,
            "Position never confirmed open, protective orders not attached"
        );
    }
}

/// 롱 북의 손익률을 계산한다 (진입 명목 가치 대비 미실현 손익).
fn long_pnl_pct(positions: &[Position]) -> Decimal {
    let longs: Vec<_> = positions.iter().filter(|p| p.side.is_long()).collect();

    let entry_notional: Decimal = longs.iter().map(|p| p.entry_price * p.amount).sum();
    if entry_notional <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let unrealized: Decimal = longs.iter().map(|p| p.unrealized_pnl).sum();
    unrealized / entry_notional
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_long_pnl_pct() {
        let mut winning = Position::new("s1", "BTC", Side::Bid, dec!(1), dec!(50000));
        winning.update_mark(dec!(55000)); // +5000 / 50000 = 10%

        let short = Position::new("s1", "SOL", Side::Ask, dec!(100), dec!(200));

        assert_eq!(long_pnl_pct(&[winning, short]), dec!(0.1));
    }

    #[test]
    fn test_long_pnl_pct_no_longs() {
        let short = Position::new("s1", "SOL", Side::Ask, dec!(100), dec!(200));
        assert_eq!(long_pnl_pct(&[short]), Decimal::ZERO);
    }
}

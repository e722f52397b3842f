//! 주문 리스크 게이트.
//!
//! 후보 주문에 대한 고정 순서의 단락 평가 파이프라인:
//! 1. 블랙리스트
//! 2. 거래 빈도 (쿨다운 + 일일 횟수 제한)
//! 3. 일일 손실 한도
//! 4. 주문 명목 가치 범위
//! 5. 수익 실현 가능성 (수수료 대비)
//! 6. 심볼별 포지션 한도
//! 7. 포트폴리오 레버리지
//!
//! `evaluate`는 읽기 전용입니다. 쿨다운/일일 횟수 예산은 실제 제출이
//! 성공한 뒤 `record_trade`로만 소모됩니다. 거부되거나 실패한 주문이
//! 예산을 소모해서는 안 됩니다. 평가 중 내부 장애는 승인으로 조용히
//! 풀리지 않고 반드시 에러로 전파됩니다 (fail-closed).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use flux_core::{normalize_symbol, FluxResult, OrderType, Position, Price, Quantity, Side};

use crate::limits::{RiskLimits, SharedLimits};

/// 왕복(진입 + 청산) 기준 단방향 테이커 수수료율.
const TAKER_FEE_RATE: Decimal = dec!(0.0004);

/// 수익 실현에 허용되는 최대 필요 가격 변동률 (%).
const MAX_REQUIRED_MOVE_PCT: Decimal = dec!(5);

/// 리스크 판정 결과.
#[derive(Debug, Clone, Serialize)]
pub struct RiskDecision {
    /// 주문 승인 여부
    pub approved: bool,
    /// 판정 사유 (거부 시 첫 번째로 위반된 규칙)
    pub reason: String,
    /// 감사용 상세 스냅샷
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl RiskDecision {
    /// 승인 결과를 생성한다.
    pub fn approve(reason: impl Into<String>) -> Self {
        Self {
            approved: true,
            reason: reason.into(),
            details: None,
        }
    }

    /// 거부 결과를 생성한다.
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
            details: None,
        }
    }

    /// 상세 스냅샷을 첨부한다.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// 게이트가 포트폴리오 상태를 읽기 위한 인터페이스.
///
/// 저장소(flux-execution)가 구현합니다. 조회 실패는 그대로 전파되어
/// 평가를 실패시킵니다.
#[async_trait]
pub trait PortfolioReader: Send + Sync {
    /// 전략의 현재 포트폴리오 가치 (초기 자본 + 누적 실현 손익 + 미실현 손익).
    async fn portfolio_value(&self, strategy_id: &str) -> FluxResult<Decimal>;

    /// 전략의 오늘(UTC) 실현 손익 + 현재 미실현 손익.
    async fn daily_pnl(&self, strategy_id: &str) -> FluxResult<Decimal>;

    /// 전략의 열린 포지션 목록.
    async fn open_positions(&self, strategy_id: &str) -> FluxResult<Vec<Position>>;
}

/// 심볼별 거래 빈도 추적기.
///
/// 쿨다운 타이머와 일일 횟수를 관리하며, UTC 자정에 일일 횟수를
/// 리셋합니다. 프로세스 재시작 시 상태가 초기화되는 것은 알려진
/// 제품 결정입니다 (DESIGN.md 참조).
#[derive(Debug)]
struct FrequencyTracker {
    last_trade: HashMap<String, DateTime<Utc>>,
    daily_count: HashMap<String, u32>,
    current_date: NaiveDate,
}

impl FrequencyTracker {
    fn new() -> Self {
        Self {
            last_trade: HashMap::new(),
            daily_count: HashMap::new(),
            current_date: Utc::now().date_naive(),
        }
    }

    /// 날짜가 바뀌었으면 일일 횟수를 리셋한다.
    fn reset_if_new_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.current_date {
            debug!(date = %today, "Resetting daily trade counts");
            self.daily_count.clear();
            self.current_date = today;
        }
    }

    /// 빈도 제한 검사. 위반 시 거부 사유를 반환한다.
    fn check(&mut self, symbol: &str, limits: &RiskLimits, now: DateTime<Utc>) -> Option<String> {
        self.reset_if_new_day(now);

        if let Some(last) = self.last_trade.get(symbol) {
            let elapsed = (now - *last).num_seconds();
            if elapsed >= 0 && (elapsed as u64) < limits.trade_cooldown_secs {
                let remaining = limits.trade_cooldown_secs - elapsed as u64;
                return Some(format!(
                    "Trade cooldown active for {}: {}s remaining (min {}s between trades)",
                    symbol, remaining, limits.trade_cooldown_secs
                ));
            }
        }

        let count = self.daily_count.get(symbol).copied().unwrap_or(0);
        if count >= limits.max_trades_per_symbol_per_day {
            return Some(format!(
                "Daily trade limit reached for {}: {}/{}",
                symbol, count, limits.max_trades_per_symbol_per_day
            ));
        }

        None
    }

    /// 거래를 기록한다 (제출 성공 후에만 호출).
    fn record(&mut self, symbol: &str, now: DateTime<Utc>) {
        self.reset_if_new_day(now);
        self.last_trade.insert(symbol.to_string(), now);
        *self.daily_count.entry(symbol.to_string()).or_insert(0) += 1;
    }
}

/// 주문 검증 리스크 게이트.
///
/// 전역 싱글톤이 아니라 명시적으로 생성되는 인스턴스이며, 빈도 상태를
/// 스스로 소유합니다. 독립적인 전략 그룹마다 별도의 게이트를 둘 수
/// 있습니다.
pub struct RiskGate {
    limits: SharedLimits,
    portfolio: Arc<dyn PortfolioReader>,
    frequency: Mutex<FrequencyTracker>,
}

impl RiskGate {
    /// 새 리스크 게이트를 생성한다.
    pub fn new(limits: SharedLimits, portfolio: Arc<dyn PortfolioReader>) -> Self {
        Self {
            limits,
            portfolio,
            frequency: Mutex::new(FrequencyTracker::new()),
        }
    }

    /// 후보 주문을 평가한다.
    ///
    /// 읽기 전용이며 부수 효과가 없습니다. 거부는 `approved=false`인
    /// 정상 반환값이고, `Err`는 평가 자체가 불가능한 내부 장애입니다.
    pub async fn evaluate(
        &self,
        strategy_id: &str,
        symbol: &str,
        side: Side,
        amount: Quantity,
        price: Price,
        order_type: OrderType,
    ) -> FluxResult<RiskDecision> {
        let limits = self.limits.load();
        let symbol = normalize_symbol(symbol);

        // 1. 블랙리스트 (정적 거부)
        if limits.is_blacklisted(&symbol) {
            return Ok(RiskDecision::reject(format!(
                "Symbol {} is blacklisted (historical losses, low win rate)",
                symbol
            )));
        }

        // 2. 거래 빈도 (쿨다운 + 일일 횟수)
        let frequency_violation = {
            let mut tracker = self.frequency.lock().expect("frequency lock poisoned");
            tracker.check(&symbol, &limits, Utc::now())
        };
        if let Some(reason) = frequency_violation {
            return Ok(RiskDecision::reject(reason));
        }

        // 3. 일일 손실 한도
        let portfolio_value = self.portfolio.portfolio_value(strategy_id).await?;
        if portfolio_value <= Decimal::ZERO {
            return Ok(RiskDecision::reject("Invalid portfolio value"));
        }

        let daily_pnl = self.portfolio.daily_pnl(strategy_id).await?;
        let daily_pnl_pct = daily_pnl / portfolio_value * dec!(100);
        if daily_pnl_pct <= -limits.daily_loss_limit_pct {
            return Ok(RiskDecision::reject(format!(
                "Daily loss limit exceeded: {:.2}% <= -{}%",
                daily_pnl_pct, limits.daily_loss_limit_pct
            ))
            .with_details(serde_json::json!({
                "daily_pnl": daily_pnl,
                "daily_pnl_pct": daily_pnl_pct,
            })));
        }

        // 4. 주문 명목 가치 범위
        let notional = amount * price;
        if notional < limits.min_order_size_usd {
            return Ok(RiskDecision::reject(format!(
                "Order size too small: ${:.2} < ${:.2}",
                notional, limits.min_order_size_usd
            )));
        }
        if notional > limits.max_order_size_usd {
            return Ok(RiskDecision::reject(format!(
                "Order size too large: ${:.2} > ${:.2}",
                notional, limits.max_order_size_usd
            )));
        }

        // 5. 수익 실현 가능성 (왕복 수수료 + 최소 목표 수익)
        let estimated_fees = notional * TAKER_FEE_RATE * dec!(2);
        let min_profit_needed = limits.min_profit_target_usd + estimated_fees;
        let required_move_pct = min_profit_needed / notional * dec!(100);
        if required_move_pct > MAX_REQUIRED_MOVE_PCT {
            return Ok(RiskDecision::reject(format!(
                "Trade requires unrealistic {:.2}% price move for ${} profit (after fees)",
                required_move_pct, limits.min_profit_target_usd
            ))
            .with_details(serde_json::json!({
                "order_notional": notional,
                "estimated_fees": estimated_fees,
                "min_profit_needed": min_profit_needed,
                "required_move_pct": required_move_pct,
            })));
        }

        // 6, 7번 검사는 포지션 집합이 필요하다
        let positions = self.portfolio.open_positions(strategy_id).await?;

        // 6. 심볼별 포지션 한도 (마크 가격 기준 명목 가치)
        let symbol_notional: Decimal = positions
            .iter()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.notional())
            .sum();
        let total_symbol_notional = symbol_notional + notional;
        if total_symbol_notional > limits.max_position_size_usd {
            return Ok(RiskDecision::reject(format!(
                "Position limit exceeded for {}: ${:.0} > ${:.0}",
                symbol, total_symbol_notional, limits.max_position_size_usd
            ))
            .with_details(serde_json::json!({
                "current": symbol_notional,
                "new_total": total_symbol_notional,
            })));
        }

        // 7. 포트폴리오 레버리지 (정확히 한도값은 승인, 초과만 거부)
        let total_exposure: Decimal = positions.iter().map(|p| p.notional()).sum();
        let total_exposure = total_exposure + notional;
        let leverage = total_exposure / portfolio_value;
        if leverage > limits.max_leverage {
            return Ok(RiskDecision::reject(format!(
                "Leverage too high: {:.2}x > {:.2}x",
                leverage, limits.max_leverage
            ))
            .with_details(serde_json::json!({
                "leverage": leverage,
                "exposure": total_exposure,
                "portfolio_value": portfolio_value,
            })));
        }

        // 모든 검사 통과
        Ok(RiskDecision::approve("All risk checks passed").with_details(serde_json::json!({
            "order_notional": notional,
            "symbol": symbol,
            "side": side,
            "order_type": order_type,
            "leverage": leverage,
            "portfolio_value": portfolio_value,
        })))
    }

    /// 제출 성공한 거래를 빈도 추적에 기록한다.
    ///
    /// `evaluate`와 분리되어 있어 거부/실패한 주문은 쿨다운과 일일
    /// 횟수 예산을 소모하지 않습니다.
    pub fn record_trade(&self, symbol: &str) {
        let symbol = normalize_symbol(symbol);
        let mut tracker = self.frequency.lock().expect("frequency lock poisoned");
        tracker.record(&symbol, Utc::now());

        let limits = self.limits.load();
        debug!(
            symbol = %symbol,
            count = tracker.daily_count.get(&symbol).copied().unwrap_or(0),
            max = limits.max_trades_per_symbol_per_day,
            "Trade recorded"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    /// 고정된 값을 돌려주는 테스트용 포트폴리오 리더.
    struct FixedPortfolio {
        value: Decimal,
        daily_pnl: Decimal,
        positions: Vec<Position>,
    }

    impl FixedPortfolio {
        fn flat(value: Decimal) -> Self {
            Self {
                value,
                daily_pnl: Decimal::ZERO,
                positions: vec![],
            }
        }
    }

    #[async_trait]
    impl PortfolioReader for FixedPortfolio {
        async fn portfolio_value(&self, _strategy_id: &str) -> FluxResult<Decimal> {
            Ok(self.value)
        }

        async fn daily_pnl(&self, _strategy_id: &str) -> FluxResult<Decimal> {
            Ok(self.daily_pnl)
        }

        async fn open_positions(&self, _strategy_id: &str) -> FluxResult<Vec<Position>> {
            Ok(self.positions.clone())
        }
    }

    /// 조회가 실패하는 포트폴리오 리더 (fail-closed 검증용).
    struct FailingPortfolio;

    #[async_trait]
    impl PortfolioReader for FailingPortfolio {
        async fn portfolio_value(&self, _strategy_id: &str) -> FluxResult<Decimal> {
            Err(flux_core::FluxError::Database("connection lost".to_string()))
        }

        async fn daily_pnl(&self, _strategy_id: &str) -> FluxResult<Decimal> {
            Err(flux_core::FluxError::Database("connection lost".to_string()))
        }

        async fn open_positions(&self, _strategy_id: &str) -> FluxResult<Vec<Position>> {
            Err(flux_core::FluxError::Database("connection lost".to_string()))
        }
    }

    fn gate_with(limits: RiskLimits, portfolio: impl PortfolioReader + 'static) -> RiskGate {
        RiskGate::new(SharedLimits::new(limits), Arc::new(portfolio))
    }

    async fn evaluate(gate: &RiskGate, symbol: &str, amount: Decimal, price: Decimal) -> RiskDecision {
        gate.evaluate("test_strategy", symbol, Side::Bid, amount, price, OrderType::Market)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_blacklisted_symbol_always_rejected() {
        let mut limits = RiskLimits::default();
        limits.symbol_blacklist.insert("doge".to_string());
        let gate = gate_with(limits.normalized(), FixedPortfolio::flat(dec!(100000)));

        // 다른 파라미터와 무관하게 거부되어야 한다
        let decision = evaluate(&gate, "DOGE", dec!(100), dec!(0.5)).await;
        assert!(!decision.approved);
        assert!(decision.reason.contains("blacklisted"));

        let decision = evaluate(&gate, "doge", dec!(1), dec!(100)).await;
        assert!(!decision.approved);
    }

    #[tokio::test]
    async fn test_blacklist_checked_before_other_rules() {
        let mut limits = RiskLimits::default();
        limits.symbol_blacklist.insert("BTC".to_string());
        let gate = gate_with(limits.normalized(), FixedPortfolio::flat(dec!(100000)));

        // 명목 가치도 한도를 벗어나지만, 첫 번째 위반 규칙인 블랙리스트
        // 사유가 나와야 한다
        let decision = evaluate(&gate, "BTC", dec!(100), dec!(50000)).await;
        assert!(decision.reason.contains("blacklisted"));
    }

    #[tokio::test]
    async fn test_cooldown_rejects_within_window() {
        let limits = RiskLimits::default(); // 쿨다운 300초
        let gate = gate_with(limits, FixedPortfolio::flat(dec!(100000)));

        gate.record_trade("BTC");

        let decision = evaluate(&gate, "BTC", dec!(0.01), dec!(50000)).await;
        assert!(!decision.approved);
        assert!(decision.reason.contains("cooldown"));

        // 다른 심볼에는 영향이 없어야 한다
        let decision = evaluate(&gate, "ETH", dec!(0.1), dec!(3000)).await;
        assert!(decision.approved);
    }

    #[tokio::test]
    async fn test_cooldown_expires_after_window() {
        let limits = RiskLimits::default();
        let gate = gate_with(limits, FixedPortfolio::flat(dec!(100000)));

        // 쿨다운보다 오래전에 기록된 거래
        {
            let mut tracker = gate.frequency.lock().unwrap();
            tracker.record("BTC", Utc::now() - Duration::seconds(301));
        }

        let decision = evaluate(&gate, "BTC", dec!(0.01), dec!(50000)).await;
        assert!(decision.approved);
    }

    #[tokio::test]
    async fn test_daily_cap_rejects_next_trade() {
        let mut limits = RiskLimits::default();
        limits.max_trades_per_symbol_per_day = 3;
        limits.trade_cooldown_secs = 0;
        let gate = gate_with(limits, FixedPortfolio::flat(dec!(100000)));

        for _ in 0..3 {
            gate.record_trade("SOL");
        }

        // (N+1)번째 거래는 거부
        let decision = evaluate(&gate, "SOL", dec!(1), dec!(200)).await;
        assert!(!decision.approved);
        assert!(decision.reason.contains("Daily trade limit"));
    }

    #[tokio::test]
    async fn test_prior_day_trades_do_not_count() {
        let mut limits = RiskLimits::default();
        limits.max_trades_per_symbol_per_day = 1;
        limits.trade_cooldown_secs = 0;
        let gate = gate_with(limits, FixedPortfolio::flat(dec!(100000)));

        // 어제(UTC) 기록된 거래로 일일 한도를 채운다
        {
            let mut tracker = gate.frequency.lock().unwrap();
            let yesterday = Utc::now() - Duration::days(1);
            tracker.reset_if_new_day(yesterday);
            tracker.record("SOL", yesterday);
            assert_eq!(tracker.daily_count.get("SOL"), Some(&1));
        }

        // 오늘 평가 시 어제 횟수는 리셋되어 통과해야 한다
        let decision = evaluate(&gate, "SOL", dec!(1), dec!(200)).await;
        assert!(decision.approved);
    }

    #[tokio::test]
    async fn test_daily_loss_limit() {
        let mut limits = RiskLimits::default();
        limits.daily_loss_limit_pct = dec!(5);
        let portfolio = FixedPortfolio {
            value: dec!(100000),
            daily_pnl: dec!(-5000), // 정확히 -5%
            positions: vec![],
        };
        let gate = gate_with(limits, portfolio);

        let decision = evaluate(&gate, "BTC", dec!(0.01), dec!(50000)).await;
        assert!(!decision.approved);
        assert!(decision.reason.contains("Daily loss limit"));
    }

    #[tokio::test]
    async fn test_notional_bounds() {
        let limits = RiskLimits::default(); // min 10, max 10000
        let gate = gate_with(limits, FixedPortfolio::flat(dec!(100000)));

        // 너무 작은 주문
        let decision = evaluate(&gate, "DOGE", dec!(10), dec!(0.5)).await;
        assert!(!decision.approved);
        assert!(decision.reason.contains("too small"));

        // 너무 큰 주문
        let decision = evaluate(&gate, "BTC", dec!(1), dec!(50000)).await;
        assert!(!decision.approved);
        assert!(decision.reason.contains("too large"));

        // 경계값 포함 범위 내 주문
        let decision = evaluate(&gate, "BTC", dec!(0.1), dec!(50000)).await;
        assert!(decision.approved);
    }

    #[tokio::test]
    async fn test_approval_implies_notional_within_bounds() {
        let limits = RiskLimits::default();
        let (min, max) = (limits.min_order_size_usd, limits.max_order_size_usd);
        let gate = gate_with(limits, FixedPortfolio::flat(dec!(100000)));

        for (amount, price) in [
            (dec!(0.001), dec!(50000)),
            (dec!(0.1), dec!(3000)),
            (dec!(500), dec!(1)),
            (dec!(3), dec!(3000)),
        ] {
            let decision = evaluate(&gate, "ETH", amount, price).await;
            if decision.approved {
                let notional = amount * price;
                assert!(notional >= min && notional <= max);
            }
        }
    }

    #[tokio::test]
    async fn test_profit_viability() {
        let mut limits = RiskLimits::default();
        limits.min_order_size_usd = dec!(1);
        limits.min_profit_target_usd = dec!(5);
        let gate = gate_with(limits, FixedPortfolio::flat(dec!(100000)));

        // $20 주문으로 $5 수익을 내려면 25% 이상 움직여야 한다 - 거부
        let decision = evaluate(&gate, "SOL", dec!(0.1), dec!(200)).await;
        assert!(!decision.approved);
        assert!(decision.reason.contains("unrealistic"));
    }

    #[tokio::test]
    async fn test_position_cap_counts_existing_notional() {
        let mut limits = RiskLimits::default();
        limits.max_position_size_usd = dec!(10000);
        let mut position = Position::new("test_strategy", "BTC", Side::Bid, dec!(0.1), dec!(50000));
        position.update_mark(dec!(60000)); // 마크 기준 $6000
        let portfolio = FixedPortfolio {
            value: dec!(100000),
            daily_pnl: Decimal::ZERO,
            positions: vec![position],
        };
        let gate = gate_with(limits, portfolio);

        // 기존 $6000 + 신규 $5000 > $10000 - 거부
        let decision = evaluate(&gate, "BTC", dec!(0.1), dec!(50000)).await;
        assert!(!decision.approved);
        assert!(decision.reason.contains("Position limit"));

        // 다른 심볼은 무관
        let decision = evaluate(&gate, "ETH", dec!(1), dec!(5000)).await;
        assert!(decision.approved);
    }

    #[tokio::test]
    async fn test_leverage_boundary() {
        let mut limits = RiskLimits::default();
        limits.max_order_size_usd = dec!(1000000);
        limits.max_position_size_usd = dec!(1000000);
        limits.max_leverage = dec!(5);
        let gate = gate_with(limits, FixedPortfolio::flat(dec!(100000)));

        // 명목 600,000 = 6배 레버리지 - 거부
        let decision = evaluate(&gate, "BTC", dec!(12), dec!(50000)).await;
        assert!(!decision.approved);
        assert!(decision.reason.contains("Leverage"));

        // 명목 400,000 = 4배 - 승인
        let decision = evaluate(&gate, "BTC", dec!(8), dec!(50000)).await;
        assert!(decision.approved);

        // 정확히 5배는 승인 (초과만 거부)
        let decision = evaluate(&gate, "BTC", dec!(10), dec!(50000)).await;
        assert!(decision.approved);
    }

    #[tokio::test]
    async fn test_evaluate_is_read_only() {
        let limits = RiskLimits::default();
        let gate = gate_with(limits, FixedPortfolio::flat(dec!(100000)));

        // 평가만으로는 쿨다운이 소모되지 않는다
        let first = evaluate(&gate, "BTC", dec!(0.01), dec!(50000)).await;
        let second = evaluate(&gate, "BTC", dec!(0.01), dec!(50000)).await;
        assert!(first.approved);
        assert!(second.approved);
    }

    #[tokio::test]
    async fn test_portfolio_fault_fails_closed() {
        let gate = gate_with(RiskLimits::default(), FailingPortfolio);

        // 내부 장애는 승인으로 풀리지 않고 에러로 전파되어야 한다
        let result = gate
            .evaluate("test_strategy", "BTC", Side::Bid, dec!(0.01), dec!(50000), OrderType::Market)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_approval_details_snapshot() {
        let gate = gate_with(RiskLimits::default(), FixedPortfolio::flat(dec!(100000)));

        let decision = evaluate(&gate, "BTC", dec!(0.01), dec!(50000)).await;
        assert!(decision.approved);

        let details = decision.details.unwrap();
        assert_eq!(details["symbol"], "BTC");
        assert_eq!(details["order_type"], "market");
    }
}

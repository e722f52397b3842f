//! 리스크 한도 정의.
//!
//! 한도는 모든 판정 시점마다 새로 읽히며, 업데이트는 항상 스냅샷 전체의
//! 원자적 교체로만 이루어집니다. 부분 쓰기가 없으므로 별도의 잠금 규율이
//! 필요하지 않습니다.

use flux_core::normalize_symbol;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// 리스크 한도 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    /// 거래 금지 심볼 (과거 손실/저승률 이력)
    #[serde(default)]
    pub symbol_blacklist: HashSet<String>,

    /// 호가 통화 기준 최소 주문 크기
    #[serde(default = "default_min_order_size_usd")]
    pub min_order_size_usd: Decimal,

    /// 호가 통화 기준 최대 주문 크기
    #[serde(default = "default_max_order_size_usd")]
    pub max_order_size_usd: Decimal,

    /// 심볼당 최대 포지션 크기 (명목 가치)
    #[serde(default = "default_max_position_size_usd")]
    pub max_position_size_usd: Decimal,

    /// 최대 포트폴리오 레버리지
    #[serde(default = "default_max_leverage")]
    pub max_leverage: Decimal,

    /// 일일 손실 한도 (포트폴리오 대비 %, 도달 시 거래 중지)
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: Decimal,

    /// 동일 심볼 거래 간 최소 간격 (초)
    #[serde(default = "default_trade_cooldown_secs")]
    pub trade_cooldown_secs: u64,

    /// 심볼당 일일 최대 거래 횟수 (UTC 자정 리셋)
    #[serde(default = "default_max_trades_per_symbol_per_day")]
    pub max_trades_per_symbol_per_day: u32,

    /// 유지 증거금 비율
    #[serde(default = "default_maintenance_margin_ratio")]
    pub maintenance_margin_ratio: Decimal,

    /// 수수료 차감 후 최소 목표 수익 (USD)
    #[serde(default = "default_min_profit_target_usd")]
    pub min_profit_target_usd: Decimal,
}

fn default_min_order_size_usd() -> Decimal {
    dec!(10)
}

fn default_max_order_size_usd() -> Decimal {
    dec!(10000)
}

fn default_max_position_size_usd() -> Decimal {
    dec!(50000)
}

fn default_max_leverage() -> Decimal {
    dec!(5)
}

fn default_daily_loss_limit_pct() -> Decimal {
    dec!(5)
}

fn default_trade_cooldown_secs() -> u64 {
    300
}

fn default_max_trades_per_symbol_per_day() -> u32 {
    10
}

fn default_maintenance_margin_ratio() -> Decimal {
    dec!(0.05)
}

fn default_min_profit_target_usd() -> Decimal {
    dec!(5)
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            symbol_blacklist: HashSet::new(),
            min_order_size_usd: default_min_order_size_usd(),
            max_order_size_usd: default_max_order_size_usd(),
            max_position_size_usd: default_max_position_size_usd(),
            max_leverage: default_max_leverage(),
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            trade_cooldown_secs: default_trade_cooldown_secs(),
            max_trades_per_symbol_per_day: default_max_trades_per_symbol_per_day(),
            maintenance_margin_ratio: default_maintenance_margin_ratio(),
            min_profit_target_usd: default_min_profit_target_usd(),
        }
    }
}

impl RiskLimits {
    /// 블랙리스트 항목을 표준 형식으로 정규화합니다.
    ///
    /// 파일에서 로드한 직후 반드시 호출해야 비교가 대소문자 무관하게
    /// 동작합니다.
    pub fn normalized(mut self) -> Self {
        self.symbol_blacklist = self
            .symbol_blacklist
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| normalize_symbol(s))
            .collect();
        self
    }

    /// 심볼이 블랙리스트에 있는지 확인합니다.
    pub fn is_blacklisted(&self, symbol: &str) -> bool {
        self.symbol_blacklist.contains(&normalize_symbol(symbol))
    }

    /// 한도 값을 검증합니다.
    pub fn validate(&self) -> Result<(), LimitsValidationError> {
        if self.min_order_size_usd <= Decimal::ZERO {
            return Err(LimitsValidationError::InvalidValue(
                "min_order_size_usd must be greater than 0".into(),
            ));
        }

        if self.max_order_size_usd < self.min_order_size_usd {
            return Err(LimitsValidationError::InvalidValue(
                "max_order_size_usd must be >= min_order_size_usd".into(),
            ));
        }

        if self.max_position_size_usd <= Decimal::ZERO {
            return Err(LimitsValidationError::InvalidValue(
                "max_position_size_usd must be greater than 0".into(),
            ));
        }

        if self.max_leverage <= Decimal::ZERO {
            return Err(LimitsValidationError::InvalidValue(
                "max_leverage must be greater than 0".into(),
            ));
        }

        if self.daily_loss_limit_pct <= Decimal::ZERO || self.daily_loss_limit_pct > dec!(100) {
            return Err(LimitsValidationError::InvalidValue(
                "daily_loss_limit_pct must be between 0 and 100".into(),
            ));
        }

        if self.maintenance_margin_ratio < Decimal::ZERO || self.maintenance_margin_ratio >= Decimal::ONE {
            return Err(LimitsValidationError::InvalidValue(
                "maintenance_margin_ratio must be in [0, 1)".into(),
            ));
        }

        if self.min_profit_target_usd < Decimal::ZERO {
            return Err(LimitsValidationError::InvalidValue(
                "min_profit_target_usd must not be negative".into(),
            ));
        }

        Ok(())
    }
}

/// 한도 검증 오류.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LimitsValidationError {
    #[error("Invalid limits value: {0}")]
    InvalidValue(String),
}

/// 공유 한도 스냅샷.
///
/// 감시자가 새 스냅샷을 원자적으로 교체하고, 게이트는 판정마다 현재
/// 스냅샷을 새로 읽습니다.
#[derive(Clone)]
pub struct SharedLimits {
    inner: Arc<RwLock<Arc<RiskLimits>>>,
}

impl SharedLimits {
    /// 초기 스냅샷으로 생성합니다.
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(limits))),
        }
    }

    /// 현재 스냅샷을 읽습니다.
    pub fn load(&self) -> Arc<RiskLimits> {
        self.inner.read().expect("limits lock poisoned").clone()
    }

    /// 스냅샷을 원자적으로 교체합니다.
    pub fn store(&self, limits: RiskLimits) {
        *self.inner.write().expect("limits lock poisoned") = Arc::new(limits);
    }
}

impl Default for SharedLimits {
    fn default() -> Self {
        Self::new(RiskLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits_valid() {
        let limits = RiskLimits::default();
        assert!(limits.validate().is_ok());
    }

    #[test]
    fn test_blacklist_case_normalized() {
        let mut limits = RiskLimits::default();
        limits.symbol_blacklist.insert("doge ".to_string());
        limits.symbol_blacklist.insert("kPepe".to_string());
        let limits = limits.normalized();

        assert!(limits.is_blacklisted("DOGE"));
        assert!(limits.is_blacklisted("doge"));
        assert!(limits.is_blacklisted("KPEPE"));
        assert!(!limits.is_blacklisted("BTC"));
    }

    #[test]
    fn test_validation_rejects_inverted_bounds() {
        let mut limits = RiskLimits::default();
        limits.min_order_size_usd = dec!(100);
        limits.max_order_size_usd = dec!(50);

        assert!(limits.validate().is_err());
    }

    #[test]
    fn test_shared_limits_atomic_swap() {
        let shared = SharedLimits::new(RiskLimits::default());
        assert_eq!(shared.load().max_leverage, dec!(5));

        let mut updated = RiskLimits::default();
        updated.max_leverage = dec!(3);
        shared.store(updated);

        assert_eq!(shared.load().max_leverage, dec!(3));
    }

    #[test]
    fn test_limits_toml_roundtrip() {
        let toml_src = r#"
            symbol_blacklist = ["DOGE", "kpepe"]
            min_order_size_usd = 25
            max_leverage = 3
        "#;

        let limits: RiskLimits = toml::from_str(toml_src).unwrap();
        let limits = limits.normalized();

        assert_eq!(limits.min_order_size_usd, dec!(25));
        assert_eq!(limits.max_leverage, dec!(3));
        assert!(limits.is_blacklisted("KPEPE"));
        // 지정하지 않은 필드는 기본값
        assert_eq!(limits.trade_cooldown_secs, 300);
    }
}

//! 전략이 생성하는 트레이딩 시그널.
//!
//! 코어는 시그널 내부의 산출 로직을 알지 못하며, 검증된 값 타입으로만
//! 소비합니다. 필수 필드는 생성 시점에 검증되어 옵션 필드 조회를 통한
//! 조용한 None 전파를 차단합니다.

use crate::domain::Side;
use crate::error::{FluxError, FluxResult};
use crate::types::{normalize_symbol, Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 시그널 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// 롱 진입
    Buy,
    /// 숏 진입
    Sell,
    /// 롱 청산
    CloseLong,
    /// 숏 청산
    CloseShort,
}

impl SignalType {
    /// 시그널 유형을 주문 방향으로 매핑합니다.
    ///
    /// `buy`/`close_short` → bid, `sell`/`close_long` → ask.
    pub fn order_side(&self) -> Side {
        match self {
            SignalType::Buy | SignalType::CloseShort => Side::Bid,
            SignalType::Sell | SignalType::CloseLong => Side::Ask,
        }
    }

    /// 청산 시그널인지 확인합니다.
    ///
    /// 청산 시그널의 주문은 반드시 reduce_only로 제출됩니다.
    pub fn is_close(&self) -> bool {
        matches!(self, SignalType::CloseLong | SignalType::CloseShort)
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalType::Buy => write!(f, "buy"),
            SignalType::Sell => write!(f, "sell"),
            SignalType::CloseLong => write!(f, "close_long"),
            SignalType::CloseShort => write!(f, "close_short"),
        }
    }
}

/// 전략이 생성한 트레이딩 시그널.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    /// 시그널 유형
    pub signal_type: SignalType,
    /// 거래 심볼
    pub symbol: String,
    /// 기준 가격
    pub price: Price,
    /// 주문 수량 (로트 정규화 전)
    pub amount: Quantity,
    /// 제안 손절가 (선택)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<Price>,
    /// 제안 익절가 (선택)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit: Option<Price>,
    /// 신호 신뢰도 (0.0 ~ 1.0)
    pub confidence: f64,
    /// 시그널 생성 타임스탬프
    pub timestamp: DateTime<Utc>,
    /// 추가 메타데이터
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TradingSignal {
    /// 새 시그널을 생성합니다.
    ///
    /// 가격과 수량이 양수가 아니면 `FluxError::InvalidInput`을 반환합니다.
    pub fn new(
        signal_type: SignalType,
        symbol: &str,
        price: Price,
        amount: Quantity,
        confidence: f64,
    ) -> FluxResult<Self> {
        if price <= Decimal::ZERO {
            return Err(FluxError::InvalidInput(format!(
                "signal price must be positive, got {}",
                price
            )));
        }
        if amount <= Decimal::ZERO {
            return Err(FluxError::InvalidInput(format!(
                "signal amount must be positive, got {}",
                amount
            )));
        }

        Ok(Self {
            signal_type,
            symbol: normalize_symbol(symbol),
            price,
            amount,
            stop_loss: None,
            take_profit: None,
            confidence: confidence.clamp(0.0, 1.0),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        })
    }

    /// 보호 주문 가격(손절/익절)을 설정합니다.
    pub fn with_protection(mut self, stop_loss: Option<Price>, take_profit: Option<Price>) -> Self {
        self.stop_loss = stop_loss.filter(|p| *p > Decimal::ZERO);
        self.take_profit = take_profit.filter(|p| *p > Decimal::ZERO);
        self
    }

    /// 메타데이터를 추가합니다.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// 시그널의 명목 가치를 반환합니다.
    pub fn notional(&self) -> Decimal {
        self.amount * self.price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_signal_side_mapping() {
        assert_eq!(SignalType::Buy.order_side(), Side::Bid);
        assert_eq!(SignalType::CloseShort.order_side(), Side::Bid);
        assert_eq!(SignalType::Sell.order_side(), Side::Ask);
        assert_eq!(SignalType::CloseLong.order_side(), Side::Ask);

        assert!(SignalType::CloseLong.is_close());
        assert!(!SignalType::Buy.is_close());
    }

    #[test]
    fn test_signal_validation() {
        let signal = TradingSignal::new(SignalType::Buy, "btc", dec!(50000), dec!(0.1), 0.8).unwrap();
        assert_eq!(signal.symbol, "BTC");
        assert_eq!(signal.notional(), dec!(5000));

        assert!(TradingSignal::new(SignalType::Buy, "BTC", dec!(0), dec!(0.1), 0.8).is_err());
        assert!(TradingSignal::new(SignalType::Buy, "BTC", dec!(50000), dec!(-1), 0.8).is_err());
    }

    #[test]
    fn test_confidence_clamping() {
        let signal = TradingSignal::new(SignalType::Sell, "ETH", dec!(3000), dec!(1), 1.7).unwrap();
        assert_eq!(signal.confidence, 1.0);
    }

    #[test]
    fn test_non_positive_protection_dropped() {
        let signal = TradingSignal::new(SignalType::Buy, "ETH", dec!(3000), dec!(1), 0.5)
            .unwrap()
            .with_protection(Some(dec!(0)), Some(dec!(3200)));

        assert!(signal.stop_loss.is_none());
        assert_eq!(signal.take_profit, Some(dec!(3200)));
    }
}

//! 포지션 엔티티.
//!
//! 포지션은 `(strategy_id, symbol)`당 하나만 존재합니다. 거래소가 진실의
//! 원천이며, 로컬 사본은 매 사이클 정합화되는 캐시입니다.

use crate::domain::Side;
use crate::types::{normalize_symbol, Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 심볼의 보유량을 나타내는 트레이딩 포지션.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    /// 이 포지션을 연 전략
    pub strategy_id: String,
    /// 거래 심볼
    pub symbol: String,
    /// 포지션 방향 (bid = 롱, ask = 숏)
    pub side: Side,
    /// 현재 보유 수량
    pub amount: Quantity,
    /// 평균 진입 가격
    pub entry_price: Price,
    /// 현재 마크 가격
    pub current_price: Price,
    /// 미실현 손익
    pub unrealized_pnl: Decimal,
    /// 실현 손익
    pub realized_pnl: Decimal,
    /// 포지션 오픈 타임스탬프
    pub opened_at: DateTime<Utc>,
    /// 마지막 업데이트 타임스탬프
    pub updated_at: DateTime<Utc>,
    /// 추가 메타데이터
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Position {
    /// 새 포지션을 생성합니다.
    pub fn new(
        strategy_id: impl Into<String>,
        symbol: &str,
        side: Side,
        amount: Quantity,
        entry_price: Price,
    ) -> Self {
        let now = Utc::now();
        Self {
            strategy_id: strategy_id.into(),
            symbol: normalize_symbol(symbol),
            side,
            amount,
            entry_price,
            current_price: entry_price,
            unrealized_pnl: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            opened_at: now,
            updated_at: now,
            metadata: serde_json::Value::Null,
        }
    }

    /// 메타데이터를 설정합니다.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// 마크 가격을 업데이트하고 미실현 손익을 재계산합니다.
    ///
    /// 롱: `(마크 - 진입) × 수량`, 숏: `(진입 - 마크) × 수량`.
    pub fn update_mark(&mut self, mark_price: Price) {
        self.current_price = mark_price;
        let price_diff = match self.side {
            Side::Bid => mark_price - self.entry_price,
            Side::Ask => self.entry_price - mark_price,
        };
        self.unrealized_pnl = price_diff * self.amount;
        self.updated_at = Utc::now();
    }

    /// 거래소가 보고한 값으로 로컬 필드를 덮어씁니다 (거래소 우선).
    pub fn overwrite_from_exchange(&mut self, side: Side, amount: Quantity, entry_price: Price) {
        self.side = side;
        self.amount = amount;
        self.entry_price = entry_price;
        self.updated_at = Utc::now();
    }

    /// 현재 마크 가격 기준 명목 가치를 반환합니다.
    pub fn notional(&self) -> Decimal {
        self.marked_price() * self.amount
    }

    /// 마크 가격을 반환합니다. 갱신 전이면 진입 가격으로 대체합니다.
    pub fn marked_price(&self) -> Price {
        if self.current_price > Decimal::ZERO {
            self.current_price
        } else {
            self.entry_price
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_long_pnl() {
        let mut position = Position::new("stm_1", "BTC", Side::Bid, dec!(1.0), dec!(50000));

        position.update_mark(dec!(55000));
        assert_eq!(position.unrealized_pnl, dec!(5000));

        position.update_mark(dec!(48000));
        assert_eq!(position.unrealized_pnl, dec!(-2000));
    }

    #[test]
    fn test_short_pnl() {
        let mut position = Position::new("ms_1", "SOL", Side::Ask, dec!(10), dec!(200));

        // 가격 하락 - 숏 포지션 수익
        position.update_mark(dec!(180));
        assert_eq!(position.unrealized_pnl, dec!(200));
    }

    #[test]
    fn test_exchange_overwrite() {
        let mut position = Position::new("stm_1", "SOL", Side::Bid, dec!(5), dec!(100));

        position.overwrite_from_exchange(Side::Bid, dec!(7), dec!(102));
        assert_eq!(position.amount, dec!(7));
        assert_eq!(position.entry_price, dec!(102));
    }

    #[test]
    fn test_notional_falls_back_to_entry() {
        let mut position = Position::new("stm_1", "ETH", Side::Bid, dec!(2), dec!(3000));
        position.current_price = Decimal::ZERO;
        assert_eq!(position.notional(), dec!(6000));
    }
}

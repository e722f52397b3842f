//! 심볼별 호가/로트 단위 정밀도 처리.
//!
//! 거래소는 심볼마다 가격 증분(tick)과 수량 증분(lot)을 강제합니다.
//! 이 모듈은 가격/수량을 그리드에 맞게 라운딩하고, 보호 주문(TP/SL)
//! 가격이 진입가 기준 올바른 쪽에 있는지 검증합니다.
//!
//! 수량은 항상 내림(Floor)합니다. 잔고 초과를 막기 위해 절대
//! 올림하지 않습니다.

use flux_core::{Price, Quantity, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

/// 호가 단위 라운딩 방법.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMethod {
    /// 일반 반올림 (기본)
    Round,
    /// 내림
    Floor,
    /// 올림
    Ceil,
}

/// 심볼의 거래 단위 필터.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolFilters {
    /// 최소 가격 증분
    pub tick_size: Decimal,
    /// 최소 수량 증분
    pub lot_size: Decimal,
}

impl SymbolFilters {
    /// 필터를 직접 지정하여 생성합니다.
    pub fn new(tick_size: Decimal, lot_size: Decimal) -> Self {
        Self {
            tick_size,
            lot_size,
        }
    }

    /// 심볼의 기본 필터를 반환합니다.
    ///
    /// 거래소 메타데이터 API가 없을 때 사용하는 폴백 테이블입니다.
    /// 알려지지 않은 심볼은 보수적인 기본값(tick 0.0001, lot 1.0)을
    /// 사용합니다.
    pub fn for_symbol(symbol: &str) -> Self {
        let symbol = symbol.to_uppercase();
        Self {
            tick_size: default_tick_size(&symbol),
            lot_size: default_lot_size(&symbol),
        }
    }

    /// 가격을 호가 단위로 라운딩합니다.
    pub fn round_to_tick(&self, price: Price, method: RoundMethod) -> Price {
        round_to_step(price, self.tick_size, method)
    }

    /// 수량을 로트 단위로 내림합니다.
    ///
    /// 절대 올림하지 않으므로 결과가 0이 될 수 있으며, 그 경우 주문을
    /// 건너뛰어야 합니다.
    pub fn floor_to_lot(&self, amount: Quantity) -> Quantity {
        round_to_step(amount, self.lot_size, RoundMethod::Floor)
    }

    /// 가격이 호가 단위에 맞는지 검증합니다.
    pub fn is_valid_price(&self, price: Price) -> bool {
        if self.tick_size.is_zero() {
            return true;
        }
        (price % self.tick_size).is_zero()
    }

    /// TP/SL 가격을 검증하고 호가 단위로 라운딩합니다.
    ///
    /// 규칙:
    /// - 롱: SL은 진입가 아래, TP는 진입가 위
    /// - 숏: SL은 진입가 위, TP는 진입가 아래
    ///
    /// 잘못된 쪽에 있는 값은 버리고 None을 반환합니다 (조용히 수용 금지).
    /// 라운딩 결과가 진입가와 같은 쪽 경계를 넘으면 주문 전체를 버리는
    /// 대신 진입가에서 한 틱 더 먼 쪽으로 밀어냅니다.
    pub fn validate_tpsl(
        &self,
        symbol: &str,
        side: Side,
        entry_price: Price,
        stop_loss: Option<Price>,
        take_profit: Option<Price>,
    ) -> (Option<Price>, Option<Price>) {
        let is_long = side.is_long();

        let validated_sl = stop_loss.filter(|p| *p > Decimal::ZERO).and_then(|sl| {
            let wrong_side = if is_long { sl >= entry_price } else { sl <= entry_price };
            if wrong_side {
                warn!(
                    symbol = %symbol,
                    side = %side,
                    stop_loss = %sl,
                    entry = %entry_price,
                    "Stop loss on wrong side of entry, dropping"
                );
                return None;
            }
            Some(self.nudge_away(sl, entry_price, is_long, true))
        });

        let validated_tp = take_profit.filter(|p| *p > Decimal::ZERO).and_then(|tp| {
            let wrong_side = if is_long { tp <= entry_price } else { tp >= entry_price };
            if wrong_side {
                warn!(
                    symbol = %symbol,
                    side = %side,
                    take_profit = %tp,
                    entry = %entry_price,
                    "Take profit on wrong side of entry, dropping"
                );
                return None;
            }
            Some(self.nudge_away(tp, entry_price, is_long, false))
        });

        (validated_sl, validated_tp)
    }

    /// 가격을 라운딩하고, 진입가 경계를 침범하면 한 틱 밀어냅니다.
    ///
    /// `below` 조합: 롱 SL과 숏 TP는 진입가 아래에, 롱 TP와 숏 SL은
    /// 진입가 위에 있어야 합니다.
    fn nudge_away(&self, price: Price, entry_price: Price, is_long: bool, is_stop: bool) -> Price {
        let rounded = self.round_to_tick(price, RoundMethod::Round);
        let must_be_below = is_long == is_stop;

        if must_be_below && rounded >= entry_price {
            self.round_to_tick(entry_price - self.tick_size, RoundMethod::Floor)
        } else if !must_be_below && rounded <= entry_price {
            self.round_to_tick(entry_price + self.tick_size, RoundMethod::Ceil)
        } else {
            rounded
        }
    }
}

/// 값을 지정한 증분 그리드로 라운딩합니다.
fn round_to_step(value: Decimal, step: Decimal, method: RoundMethod) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }

    let steps = value / step;
    let rounded_steps = match method {
        RoundMethod::Round => steps.round(),
        RoundMethod::Floor => steps.floor(),
        RoundMethod::Ceil => steps.ceil(),
    };

    (rounded_steps * step).normalize()
}

/// 심볼별 기본 호가 단위.
fn default_tick_size(symbol: &str) -> Decimal {
    match symbol {
        // 고가 자산
        "BTC" | "ETH" | "SOL" | "BNB" | "ZEC" | "LTC" | "AAVE" | "PAXG" | "TAO" => dec!(0.01),
        // 중가 자산
        "HYPE" | "LINK" | "UNI" | "AVAX" | "SUI" => dec!(0.001),
        // 저가 자산
        "DOGE" | "XRP" | "MON" | "PENGU" | "WLFI" | "PUMP" => dec!(0.00001),
        "KPEPE" => dec!(0.000001),
        "KBONK" | "ENA" | "VIRTUAL" | "FARTCOIN" | "ASTER" | "XPL" | "LDO" | "CRV" => dec!(0.0001),
        _ => dec!(0.0001),
    }
}

/// 심볼별 기본 로트 단위.
fn default_lot_size(symbol: &str) -> Decimal {
    match symbol {
        "BTC" => dec!(0.0001),
        "ETH" | "PAXG" => dec!(0.001),
        "SOL" | "ZEC" | "BNB" | "AAVE" | "TAO" => dec!(0.01),
        "HYPE" | "ENA" | "ASTER" | "KBONK" | "KPEPE" | "VIRTUAL" | "SUI" | "FARTCOIN" | "AVAX"
        | "LINK" | "LDO" | "CRV" => dec!(0.1),
        "XRP" | "PUMP" | "LTC" | "DOGE" | "XPL" | "UNI" | "WLFI" | "PENGU" | "MON" => dec!(1.0),
        _ => dec!(1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_to_lot_never_rounds_up() {
        let filters = SymbolFilters::new(dec!(0.01), dec!(0.01));

        assert_eq!(filters.floor_to_lot(dec!(0.1234)), dec!(0.12));
        assert_eq!(filters.floor_to_lot(dec!(0.1299)), dec!(0.12));
        assert_eq!(filters.floor_to_lot(dec!(0.009)), dec!(0));
    }

    #[test]
    fn test_round_to_tick() {
        let filters = SymbolFilters::new(dec!(0.1), dec!(1));

        assert_eq!(filters.round_to_tick(dec!(100.26), RoundMethod::Round), dec!(100.3));
        assert_eq!(filters.round_to_tick(dec!(100.26), RoundMethod::Floor), dec!(100.2));
        assert_eq!(filters.round_to_tick(dec!(100.21), RoundMethod::Ceil), dec!(100.3));
    }

    #[test]
    fn test_is_valid_price() {
        let filters = SymbolFilters::new(dec!(0.01), dec!(1));

        assert!(filters.is_valid_price(dec!(50000.01)));
        assert!(!filters.is_valid_price(dec!(50000.015)));
    }

    #[test]
    fn test_tpsl_wrong_side_dropped() {
        let filters = SymbolFilters::new(dec!(0.1), dec!(0.01));

        // 롱인데 SL이 진입가 위 - 버려져야 한다
        let (sl, tp) = filters.validate_tpsl("BTC", Side::Bid, dec!(100), Some(dec!(101)), None);
        assert!(sl.is_none());
        assert!(tp.is_none());

        // 숏인데 TP가 진입가 위 - 버려져야 한다
        let (sl, tp) = filters.validate_tpsl("BTC", Side::Ask, dec!(100), None, Some(dec!(105)));
        assert!(sl.is_none());
        assert!(tp.is_none());
    }

    #[test]
    fn test_tpsl_valid_values_rounded() {
        let filters = SymbolFilters::new(dec!(0.1), dec!(0.01));

        let (sl, tp) = filters.validate_tpsl(
            "BTC",
            Side::Bid,
            dec!(100),
            Some(dec!(95.234)),
            Some(dec!(105.678)),
        );

        assert_eq!(sl, Some(dec!(95.2)));
        assert_eq!(tp, Some(dec!(105.7)));
    }

    #[test]
    fn test_tpsl_nudged_one_tick_away() {
        let filters = SymbolFilters::new(dec!(0.1), dec!(0.01));

        // SL 99.97은 유효(진입가 아래)하지만 반올림하면 100.0이 되어
        // 진입가와 겹친다 - 한 틱 아래로 밀려야 한다
        let (sl, _) = filters.validate_tpsl("BTC", Side::Bid, dec!(100), Some(dec!(99.97)), None);
        assert_eq!(sl, Some(dec!(99.9)));

        // 숏 SL 100.03도 반올림하면 진입가와 겹친다 - 한 틱 위로
        let (sl, _) = filters.validate_tpsl("BTC", Side::Ask, dec!(100), Some(dec!(100.03)), None);
        assert_eq!(sl, Some(dec!(100.1)));
    }

    #[test]
    fn test_default_filters() {
        let btc = SymbolFilters::for_symbol("btc");
        assert_eq!(btc.tick_size, dec!(0.01));
        assert_eq!(btc.lot_size, dec!(0.0001));

        // 알려지지 않은 심볼은 보수적 기본값
        let unknown = SymbolFilters::for_symbol("NEWCOIN");
        assert_eq!(unknown.tick_size, dec!(0.0001));
        assert_eq!(unknown.lot_size, dec!(1.0));
    }
}

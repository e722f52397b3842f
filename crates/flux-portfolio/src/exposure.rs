//! 포트폴리오 노출 원장.
//!
//! 열린 포지션 집합에서 롱/숏/순 노출을 집계합니다. 노출 상태는 매
//! 변이마다 재계산되며, 원장은 절대 오래된 스냅샷을 노출하지 않습니다.

use flux_core::{normalize_symbol, Price, Quantity, Side};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;

/// 파생 노출 상태 (영속화하지 않음).
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExposureState {
    /// 순 노출 (롱 - 숏)
    pub net_exposure: Decimal,
    /// 롱 포지션 가치 합계
    pub long_exposure: Decimal,
    /// 숏 포지션 가치 합계 (양의 크기)
    pub short_exposure: Decimal,
    /// 포트폴리오 가치 대비 순 롱 비율
    pub net_long: Decimal,
    /// 롱 북의 손익률 (진입 명목 가치 대비)
    pub long_pnl_pct: Decimal,
}

/// 원장에 기록된 단일 포지션.
#[derive(Debug, Clone)]
struct LedgerEntry {
    side: Side,
    size: Quantity,
    entry_price: Price,
    value: Decimal,
}

/// 포트폴리오 노출 원장.
#[derive(Debug)]
pub struct ExposureLedger {
    portfolio_value: Decimal,
    positions: HashMap<String, LedgerEntry>,
    state: ExposureState,
}

impl ExposureLedger {
    /// 새 원장을 생성한다.
    pub fn new(portfolio_value: Decimal) -> Self {
        Self {
            portfolio_value,
            positions: HashMap::new(),
            state: ExposureState::default(),
        }
    }

    /// 포지션을 추가하거나 갱신한다.
    pub fn update_position(&mut self, symbol: &str, side: Side, size: Quantity, entry_price: Price) {
        let value = size * entry_price;
        self.positions.insert(
            normalize_symbol(symbol),
            LedgerEntry {
                side,
                size,
                entry_price,
                value,
            },
        );
        self.calculate_exposure();
    }

    /// 종료된 포지션을 제거한다.
    pub fn remove_position(&mut self, symbol: &str) {
        if self.positions.remove(&normalize_symbol(symbol)).is_some() {
            self.calculate_exposure();
        }
    }

    /// 원장을 비우고 노출을 재계산한다.
    pub fn clear(&mut self) {
        self.positions.clear();
        self.calculate_exposure();
    }

    /// 포트폴리오 가치를 갱신한다.
    pub fn set_portfolio_value(&mut self, portfolio_value: Decimal) {
        self.portfolio_value = portfolio_value;
        self.calculate_exposure();
    }

    /// 롱 북 손익률을 갱신한다 (엔진이 마크-투-마켓 후 계산).
    pub fn set_long_pnl_pct(&mut self, long_pnl_pct: Decimal) {
        self.state.long_pnl_pct = long_pnl_pct;
    }

    /// 롱/숏/순 노출을 재계산한다.
    pub fn calculate_exposure(&mut self) {
        let mut long_exposure = Decimal::ZERO;
        let mut short_exposure = Decimal::ZERO;

        for entry in self.positions.values() {
            if entry.side.is_long() {
                long_exposure += entry.value;
            } else {
                short_exposure += entry.value;
            }
        }

        self.state.long_exposure = long_exposure;
        self.state.short_exposure = short_exposure;
        self.state.net_exposure = long_exposure - short_exposure;
        self.state.net_long = if self.portfolio_value > Decimal::ZERO {
            self.state.net_exposure / self.portfolio_value
        } else {
            Decimal::ZERO
        };
    }

    /// 현재 노출 상태 스냅샷을 반환한다.
    pub fn state(&self) -> ExposureState {
        self.state.clone()
    }

    /// 심볼의 원장 항목 존재 여부.
    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions.contains_key(&normalize_symbol(symbol))
    }

    /// 추적 중인 포지션 개수.
    pub fn position_count(&self) -> usize {
        self.positions.len()
    }
}

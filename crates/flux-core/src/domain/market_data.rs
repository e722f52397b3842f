//! 시장 데이터 타입.
//!
//! 시장 데이터 수집/정규화는 외부 협력자의 책임이며, 코어는 협력자가
//! 전달하는 스냅샷만 소비합니다.

use crate::types::{Price, Quantity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 단일 심볼의 시장 스냅샷.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// 현재 가격 (마크 가격으로 사용)
    pub price: Price,
    /// 최우선 매수 호가 (선택)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bid: Option<Price>,
    /// 최우선 매도 호가 (선택)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ask: Option<Price>,
    /// 거래량 (선택)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Quantity>,
    /// 스냅샷 타임스탬프
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// 가격과 타임스탬프만으로 스냅샷을 생성합니다.
    pub fn new(price: Price, timestamp: DateTime<Utc>) -> Self {
        Self {
            price,
            bid: None,
            ask: None,
            volume: None,
            timestamp,
        }
    }

    /// 호가를 설정합니다.
    pub fn with_quotes(mut self, bid: Option<Price>, ask: Option<Price>) -> Self {
        self.bid = bid;
        self.ask = ask;
        self
    }

    /// 거래량을 설정합니다.
    pub fn with_volume(mut self, volume: Quantity) -> Self {
        self.volume = Some(volume);
        self
    }
}

/// 시장 국면.
///
/// 외부 국면 감지 협력자가 산출하며, 사이클마다 어떤 전략 패밀리를
/// 실행할지 선택하는 데 사용됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketRegime {
    /// 상승장
    Bull,
    /// 하락장
    Bear,
    /// 횡보장
    Sideways,
    /// 고변동성 장세
    Volatile,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketRegime::Bull => write!(f, "bull"),
            MarketRegime::Bear => write!(f, "bear"),
            MarketRegime::Sideways => write!(f, "sideways"),
            MarketRegime::Volatile => write!(f, "volatile"),
        }
    }
}

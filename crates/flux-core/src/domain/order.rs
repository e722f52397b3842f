//! 주문 타입 및 상태.
//!
//! 이 모듈은 주문 관련 타입을 정의합니다:
//! - `Side` - 주문 방향 (bid/ask, 거래소 호가 방향 기준)
//! - `OrderType` - 주문 유형
//! - `OrderStatus` - 주문 상태
//! - `Order` - 제출된 주문 엔티티 (영속화 대상)

use crate::types::{normalize_symbol, Price, Quantity};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 주문 방향.
///
/// 무기한 선물 거래소의 호가 방향을 그대로 사용합니다.
/// `Bid`는 롱을 쌓는 방향, `Ask`는 숏을 쌓는 방향입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// 매수 (롱 방향)
    Bid,
    /// 매도 (숏 방향)
    Ask,
}

impl Side {
    /// 롱 방향인지 확인합니다.
    pub fn is_long(&self) -> bool {
        matches!(self, Side::Bid)
    }

    /// 반대 방향을 반환합니다.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }

    /// 거래소 페이로드 문자열에서 파싱합니다.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "bid" | "long" | "buy" => Some(Side::Bid),
            "ask" | "short" | "sell" => Some(Side::Ask),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Bid => write!(f, "bid"),
            Side::Ask => write!(f, "ask"),
        }
    }
}

/// 주문 유형.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// 시장가 주문
    Market,
    /// 지정가 주문
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "market"),
            OrderType::Limit => write!(f, "limit"),
        }
    }
}

/// 주문 상태.
///
/// 주문은 명시적인 성공 응답을 받은 경우에만 `Submitted`로 기록됩니다.
/// 타임아웃 등 미확인 제출은 `Failed`로 남겨 원장 오염을 막습니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// 거래소에 제출됨 (성공 응답 수신)
    Submitted,
    /// 전량 체결됨
    Filled,
    /// 취소됨
    Canceled,
    /// 거래소에서 거부됨
    Rejected,
    /// 제출 실패 또는 미확인
    Failed,
}

impl OrderStatus {
    /// 주문이 최종 상태인지 확인합니다.
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Failed
        )
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Submitted => write!(f, "submitted"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Canceled => write!(f, "canceled"),
            OrderStatus::Rejected => write!(f, "rejected"),
            OrderStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 제출된 주문을 나타내는 주문 엔티티.
///
/// 승인된 시그널당 정확히 한 번 생성되며, 체결 필드와 상태를 제외하면
/// 불변입니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// 거래소가 부여한 주문 ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// 로컬에서 생성한 멱등성 키 (UUID)
    pub client_order_id: Uuid,
    /// 이 주문을 생성한 전략
    pub strategy_id: String,
    /// 거래 심볼
    pub symbol: String,
    /// 주문 방향
    pub side: Side,
    /// 주문 유형
    pub order_type: OrderType,
    /// 주문 수량 (로트 그리드에 정규화된 값)
    pub amount: Quantity,
    /// 시그널 기준 가격
    pub price: Price,
    /// 체결된 수량
    pub filled_amount: Quantity,
    /// 현재 상태
    pub status: OrderStatus,
    /// 생성 타임스탬프
    pub created_at: DateTime<Utc>,
    /// 마지막 업데이트 타임스탬프
    pub updated_at: DateTime<Utc>,
    /// 추가 메타데이터 (시그널 유형, 신뢰도 등)
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl Order {
    /// 새 주문 엔티티를 생성합니다.
    ///
    /// `client_order_id`는 네트워크 호출 이전에 생성되어 있어야 합니다.
    pub fn new(
        client_order_id: Uuid,
        strategy_id: impl Into<String>,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        amount: Quantity,
        price: Price,
    ) -> Self {
        let now = Utc::now();
        Self {
            order_id: None,
            client_order_id,
            strategy_id: strategy_id.into(),
            symbol: normalize_symbol(symbol),
            side,
            order_type,
            amount,
            price,
            filled_amount: Decimal::ZERO,
            status: OrderStatus::Failed,
            created_at: now,
            updated_at: now,
            metadata: serde_json::Value::Null,
        }
    }

    /// 거래소 주문 ID를 받아 제출 완료 상태로 전이합니다.
    pub fn mark_submitted(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self.status = OrderStatus::Submitted;
        self.updated_at = Utc::now();
        self
    }

    /// 메타데이터를 설정합니다.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// 주문의 명목 가치를 반환합니다.
    pub fn notional(&self) -> Decimal {
        self.amount * self.price
    }
}

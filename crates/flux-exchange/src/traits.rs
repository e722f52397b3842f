//! 거래소 trait 정의.

use async_trait::async_trait;
use flux_core::{OrderStatus, Price, Quantity, Side};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use crate::error::ExchangeError;
use crate::precision::SymbolFilters;

/// 거래소 작업을 위한 Result 타입.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// 시장가 주문 요청.
#[derive(Debug, Clone)]
pub struct MarketOrderRequest {
    /// 거래 심볼
    pub symbol: String,
    /// 주문 방향
    pub side: Side,
    /// 주문 수량 (어댑터가 로트 그리드로 내림)
    pub amount: Quantity,
    /// 기존 포지션 축소/청산 전용 여부
    pub reduce_only: bool,
    /// 허용 슬리피지 (%)
    pub slippage_pct: Decimal,
    /// 로컬 멱등성 키
    pub client_order_id: Uuid,
    /// 손절가 (선택, 진입 주문 전용)
    pub stop_loss: Option<Price>,
    /// 익절가 (선택, 진입 주문 전용)
    pub take_profit: Option<Price>,
    /// TP/SL 검증 기준 진입 가격 (선택)
    pub entry_price: Option<Price>,
}

impl MarketOrderRequest {
    /// 새 시장가 주문 요청을 생성합니다.
    pub fn new(symbol: impl Into<String>, side: Side, amount: Quantity, client_order_id: Uuid) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            amount,
            reduce_only: false,
            slippage_pct: dec!(0.5),
            client_order_id,
            stop_loss: None,
            take_profit: None,
            entry_price: None,
        }
    }

    /// reduce_only 플래그를 설정합니다.
    ///
    /// 청산 주문이 반대 방향 신규 포지션으로 뒤집히는 것을 막는 유일한
    /// 안전장치입니다.
    pub fn reduce_only(mut self, reduce_only: bool) -> Self {
        self.reduce_only = reduce_only;
        self
    }

    /// 보호 주문 가격과 검증 기준 진입가를 설정합니다.
    pub fn with_protection(
        mut self,
        stop_loss: Option<Price>,
        take_profit: Option<Price>,
        entry_price: Price,
    ) -> Self {
        self.stop_loss = stop_loss;
        self.take_profit = take_profit;
        self.entry_price = Some(entry_price);
        self
    }
}

/// 지정가 주문 요청.
#[derive(Debug, Clone)]
pub struct LimitOrderRequest {
    /// 거래 심볼
    pub symbol: String,
    /// 주문 방향
    pub side: Side,
    /// 주문 수량
    pub amount: Quantity,
    /// 지정 가격
    pub price: Price,
    /// 기존 포지션 축소/청산 전용 여부
    pub reduce_only: bool,
    /// 로컬 멱등성 키
    pub client_order_id: Uuid,
}

/// 주문 접수 응답.
#[derive(Debug, Clone)]
pub struct OrderAck {
    /// 거래소가 부여한 주문 ID
    pub order_id: String,
    /// 접수 시점의 주문 상태
    pub status: OrderStatus,
}

/// 거래소 주문 상태 조회 결과.
#[derive(Debug, Clone)]
pub struct OrderStatusInfo {
    /// 거래소 주문 ID
    pub order_id: String,
    /// 현재 상태
    pub status: OrderStatus,
    /// 체결된 수량
    pub filled_amount: Quantity,
}

/// 거래소가 보고하는 포지션.
#[derive(Debug, Clone)]
pub struct ExchangePosition {
    /// 거래 심볼
    pub symbol: String,
    /// 포지션 방향
    pub side: Side,
    /// 보유 수량
    pub amount: Quantity,
    /// 평균 진입 가격
    pub entry_price: Price,
}

/// 무기한 선물 거래소 통합 인터페이스.
///
/// 실행 엔진과 테스트는 이 trait을 통해서만 거래소와 통신합니다.
#[async_trait]
pub trait PerpExchange: Send + Sync {
    /// 거래소 이름 반환.
    fn name(&self) -> &str;

    /// 심볼의 거래 단위 필터 반환.
    fn filters(&self, symbol: &str) -> SymbolFilters;

    // === 주문 작업 ===

    /// 시장가 주문 제출.
    async fn create_market_order(&self, request: &MarketOrderRequest) -> ExchangeResult<OrderAck>;

    /// 지정가 주문 제출.
    async fn create_limit_order(&self, request: &LimitOrderRequest) -> ExchangeResult<OrderAck>;

    /// 주문 취소.
    async fn cancel_order(&self, order_id: &str) -> ExchangeResult<()>;

    /// 주문 상태 조회.
    async fn get_order_status(&self, order_id: &str) -> ExchangeResult<OrderStatusInfo>;

    // === 포지션 작업 ===

    /// 현재 포지션 조회.
    async fn get_positions(&self) -> ExchangeResult<Vec<ExchangePosition>>;

    /// 기존 포지션에 손절/익절 부착.
    async fn set_position_tpsl(
        &self,
        symbol: &str,
        side: Side,
        stop_loss: Option<Price>,
        take_profit: Option<Price>,
    ) -> ExchangeResult<()>;
}

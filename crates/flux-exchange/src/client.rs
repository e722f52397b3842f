//! Pacifica 스타일 무기한 선물 DEX REST 클라이언트.
//!
//! 모든 요청은 에이전트 지갑으로 서명되며 명시적 타임아웃을 가집니다.
//! 타임아웃/네트워크 장애는 미확인 제출로 취급됩니다. 명시적인 성공
//! 응답 없이는 어떤 주문도 submitted로 기록되지 않습니다.

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

use flux_core::{normalize_symbol, OrderStatus, Price, Side};

use crate::error::ExchangeError;
use crate::precision::{RoundMethod, SymbolFilters};
use crate::signer::{AgentSigner, SignatureHeader};
use crate::traits::{
    ExchangePosition, ExchangeResult, LimitOrderRequest, MarketOrderRequest, OrderAck,
    OrderStatusInfo, PerpExchange,
};

/// 보호 주문의 지정가 오프셋 (스톱 가격 대비 0.1%).
const PROTECTIVE_LIMIT_OFFSET: &str = "0.001";

/// 주문 서명 만료 윈도우 (밀리초).
const ORDER_EXPIRY_WINDOW_MS: u64 = 5_000;

/// TP/SL 부착 서명 만료 윈도우 (밀리초).
const TPSL_EXPIRY_WINDOW_MS: u64 = 60_000;

/// Pacifica 클라이언트 설정.
///
/// # 보안
/// `Debug` 구현은 민감 정보(`api_key`, `agent_private_key`)를 마스킹합니다.
#[derive(Clone)]
pub struct PacificaConfig {
    /// REST API 기본 URL
    pub api_url: String,
    /// API 키 (선택)
    pub api_key: Option<String>,
    /// 에이전트 지갑 개인키 (base58)
    pub agent_private_key: String,
    /// 주문 요청 타임아웃 (초)
    pub order_timeout_secs: u64,
    /// 조회 요청 타임아웃 (초)
    pub query_timeout_secs: u64,
}

impl fmt::Debug for PacificaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacificaConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &self.api_key.as_deref().map(|_| "***REDACTED***"))
            .field("agent_private_key", &"***REDACTED***")
            .field("order_timeout_secs", &self.order_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .finish()
    }
}

impl PacificaConfig {
    /// 새 설정을 생성합니다.
    pub fn new(api_url: impl Into<String>, agent_private_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: None,
            agent_private_key: agent_private_key.into(),
            order_timeout_secs: 30,
            query_timeout_secs: 10,
        }
    }

    /// API 키를 설정합니다.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// 환경 변수에서 설정을 생성합니다.
    ///
    /// `FLUX_API_URL`, `FLUX_AGENT_PRIVKEY`는 필수, `FLUX_API_KEY`는
    /// 선택입니다.
    pub fn from_env() -> Option<Self> {
        let api_url = std::env::var("FLUX_API_URL").ok()?;
        let privkey = std::env::var("FLUX_AGENT_PRIVKEY").ok()?;
        let api_key = std::env::var("FLUX_API_KEY").ok();

        let mut config = Self::new(api_url, privkey);
        config.api_key = api_key;
        Some(config)
    }
}

/// API 응답 봉투.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// 거래소가 보고하는 포지션의 원시 형태.
#[derive(Debug, Deserialize)]
struct RawPosition {
    symbol: String,
    side: String,
    amount: String,
    entry_price: String,
}

/// Pacifica DEX REST 클라이언트.
pub struct PacificaClient {
    config: PacificaConfig,
    signer: AgentSigner,
    http: Client,
}

impl PacificaClient {
    /// 설정으로부터 클라이언트를 생성합니다.
    ///
    /// 개인키가 유효하지 않으면 `ExchangeError::Signing`을 반환합니다.
    pub fn new(config: PacificaConfig) -> ExchangeResult<Self> {
        let signer = AgentSigner::from_base58(&config.agent_private_key)?;
        let http = Client::builder()
            .build()
            .map_err(|e| ExchangeError::NetworkError(e.to_string()))?;

        info!(wallet = %signer.public_key(), "Pacifica client initialized");

        Ok(Self {
            config,
            signer,
            http,
        })
    }

    /// 공통 요청 헤더를 구성합니다.
    fn auth_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![("X-Agent-Wallet", self.signer.public_key())];
        if let Some(ref key) = self.config.api_key {
            headers.push(("X-API-Key", key.clone()));
        }
        headers
    }

    /// HTTP 오류 상태를 타입화된 에러로 변환합니다.
    fn map_http_error(status: u16, body: &str) -> ExchangeError {
        // 응답 본문은 민감 정보를 담을 수 있어 앞부분만 남긴다
        let message: String = body.chars().take(200).collect();
        match status {
            401 | 403 => ExchangeError::Unauthorized(message),
            429 => ExchangeError::RateLimited,
            _ => ExchangeError::ApiError { status, message },
        }
    }

    /// 서명된 POST 요청을 보내고 응답 봉투를 해석합니다.
    async fn post_signed(
        &self,
        path: &str,
        operation: &str,
        expiry_window_ms: u64,
        payload: Value,
        timeout: Duration,
    ) -> ExchangeResult<Value> {
        let header = SignatureHeader::now(operation, expiry_window_ms);
        let (_, signature) = self.signer.sign_operation(&header, &payload)?;

        // 인증 필드 + 원본 페이로드 (data로 감싸지 않음)
        let mut request_data = json!({
            "account": self.signer.public_key(),
            "signature": signature,
            "timestamp": header.timestamp,
            "expiry_window": header.expiry_window,
        });
        if let (Value::Object(base), Value::Object(fields)) = (&mut request_data, payload) {
            base.extend(fields);
        }

        let url = format!("{}{}", self.config.api_url, path);
        let mut request = self.http.post(&url).json(&request_data).timeout(timeout);
        for (name, value) in self.auth_headers() {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if status != 200 {
            return Err(Self::map_http_error(status, &body));
        }

        let envelope: ApiEnvelope = serde_json::from_str(&body)?;
        if !envelope.success {
            return Err(ExchangeError::OrderRejected(
                envelope.error.unwrap_or_else(|| "unknown rejection".to_string()),
            ));
        }

        Ok(envelope.data.unwrap_or(Value::Null))
    }

    /// 인증된 GET 요청을 보내고 응답 봉투를 해석합니다.
    async fn get_authed(&self, path: &str, timeout: Duration) -> ExchangeResult<Value> {
        let url = format!("{}{}", self.config.api_url, path);
        let mut request = self.http.get(&url).timeout(timeout);
        for (name, value) in self.auth_headers() {
            request = request.header(name, value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        if status != 200 {
            return Err(Self::map_http_error(status, &body));
        }

        let envelope: ApiEnvelope = serde_json::from_str(&body)?;
        if !envelope.success {
            return Err(ExchangeError::ApiError {
                status,
                message: envelope.error.unwrap_or_else(|| "request failed".to_string()),
            });
        }

        Ok(envelope.data.unwrap_or(Value::Null))
    }

    /// 보호 주문 페이로드(`{stop_price, limit_price}`)를 구성합니다.
    ///
    /// 지정가는 스톱 가격보다 0.1% 불리한 쪽으로 두어 스톱-지정가로
    /// 동작하게 합니다. 롱의 보호 주문은 매도이므로 지정가가 스톱 아래,
    /// 숏은 매수이므로 위에 놓입니다.
    fn protective_order_payload(&self, symbol: &str, side: Side, stop_price: Price) -> Value {
        let offset = Decimal::from_str(PROTECTIVE_LIMIT_OFFSET).expect("valid constant");
        let limit_price = if side.is_long() {
            stop_price * (Decimal::ONE - offset)
        } else {
            stop_price * (Decimal::ONE + offset)
        };

        let filters = self.filters(symbol);
        let limit_price = filters.round_to_tick(limit_price, RoundMethod::Round);

        json!({
            "stop_price": dec_str(stop_price),
            "limit_price": dec_str(limit_price),
        })
    }

    /// 주문 타임아웃을 반환합니다.
    fn order_timeout(&self) -> Duration {
        Duration::from_secs(self.config.order_timeout_secs)
    }

    /// 조회 타임아웃을 반환합니다.
    fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.config.query_timeout_secs)
    }
}

#[async_trait]
impl PerpExchange for PacificaClient {
    fn name(&self) -> &str {
        "pacifica"
    }

    fn filters(&self, symbol: &str) -> SymbolFilters {
        SymbolFilters::for_symbol(symbol)
    }

    async fn create_market_order(&self, request: &MarketOrderRequest) -> ExchangeResult<OrderAck> {
        let symbol = normalize_symbol(&request.symbol);
        let filters = self.filters(&symbol);

        // 수량을 로트 그리드로 내림 (잔고 초과 방지)
        let amount = filters.floor_to_lot(request.amount);
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidQuantity(format!(
                "{}: amount {} is below lot size {}",
                symbol, request.amount, filters.lot_size
            )));
        }
        if amount != request.amount {
            debug!(
                symbol = %symbol,
                requested = %request.amount,
                adjusted = %amount,
                lot_size = %filters.lot_size,
                "Amount floored to lot grid"
            );
        }

        let mut payload = json!({
            "symbol": symbol,
            "side": request.side.to_string(),
            "amount": dec_str(amount),
            "reduce_only": request.reduce_only,
            "slippage_percent": dec_str(request.slippage_pct),
            "client_order_id": request.client_order_id.to_string(),
        });

        // TP/SL 검증 및 라운딩
        let (stop_loss, take_profit) = match request.entry_price {
            Some(entry) => {
                filters.validate_tpsl(&symbol, request.side, entry, request.stop_loss, request.take_profit)
            }
            None => {
                if request.stop_loss.is_some() || request.take_profit.is_some() {
                    warn!(
                        symbol = %symbol,
                        "TP/SL provided without entry price, rounding without side validation"
                    );
                }
                (
                    request.stop_loss.map(|p| filters.round_to_tick(p, RoundMethod::Round)),
                    request.take_profit.map(|p| filters.round_to_tick(p, RoundMethod::Round)),
                )
            }
        };

        if let Some(sl) = stop_loss {
            payload["stop_loss"] = self.protective_order_payload(&symbol, request.side, sl);
        }
        if let Some(tp) = take_profit {
            payload["take_profit"] = self.protective_order_payload(&symbol, request.side, tp);
        }

        let data = self
            .post_signed(
                "/orders/create_market",
                "create_market_order",
                ORDER_EXPIRY_WINDOW_MS,
                payload,
                self.order_timeout(),
            )
            .await?;

        let order_id = data
            .get("order_id")
            .map(value_to_id)
            .ok_or_else(|| ExchangeError::ParseError("missing order_id in response".to_string()))?;

        info!(
            symbol = %symbol,
            side = %request.side,
            amount = %amount,
            order_id = %order_id,
            reduce_only = request.reduce_only,
            "Market order created"
        );

        Ok(OrderAck {
            order_id,
            status: OrderStatus::Submitted,
        })
    }

    async fn create_limit_order(&self, request: &LimitOrderRequest) -> ExchangeResult<OrderAck> {
        let symbol = normalize_symbol(&request.symbol);
        let filters = self.filters(&symbol);

        let amount = filters.floor_to_lot(request.amount);
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::InvalidQuantity(format!(
                "{}: amount {} is below lot size {}",
                symbol, request.amount, filters.lot_size
            )));
        }
        let price = filters.round_to_tick(request.price, RoundMethod::Round);

        let payload = json!({
            "symbol": symbol,
            "side": request.side.to_string(),
            "amount": dec_str(amount),
            "price": dec_str(price),
            "reduce_only": request.reduce_only,
            "client_order_id": request.client_order_id.to_string(),
        });

        let data = self
            .post_signed(
                "/orders/create_limit",
                "create_limit_order",
                ORDER_EXPIRY_WINDOW_MS,
                payload,
                self.order_timeout(),
            )
            .await?;

        let order_id = data
            .get("order_id")
            .map(value_to_id)
            .ok_or_else(|| ExchangeError::ParseError("missing order_id in response".to_string()))?;

        info!(symbol = %symbol, side = %request.side, amount = %amount, price = %price, order_id = %order_id, "Limit order created");

        Ok(OrderAck {
            order_id,
            status: OrderStatus::Submitted,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> ExchangeResult<()> {
        let payload = json!({ "order_id": order_id });

        self.post_signed(
            "/orders/cancel",
            "cancel_order",
            ORDER_EXPIRY_WINDOW_MS,
            payload,
            self.order_timeout(),
        )
        .await?;

        info!(order_id = %order_id, "Order canceled");
        Ok(())
    }

    async fn get_order_status(&self, order_id: &str) -> ExchangeResult<OrderStatusInfo> {
        let data = self
            .get_authed(&format!("/orders/{}", order_id), self.query_timeout())
            .await?;

        let status = data
            .get("status")
            .and_then(Value::as_str)
            .map(parse_order_status)
            .unwrap_or(OrderStatus::Submitted);

        let filled_amount = data
            .get("filled_amount")
            .and_then(Value::as_str)
            .and_then(|s| Decimal::from_str(s).ok())
            .unwrap_or(Decimal::ZERO);

        Ok(OrderStatusInfo {
            order_id: order_id.to_string(),
            status,
            filled_amount,
        })
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<ExchangePosition>> {
        let path = format!("/positions?account={}", self.signer.public_key());
        let data = self.get_authed(&path, self.query_timeout()).await?;

        // 포지션이 없으면 data가 빠질 수 있다
        if data.is_null() {
            return Ok(vec![]);
        }
        let raw_positions: Vec<RawPosition> = serde_json::from_value(data)?;

        let mut positions = Vec::with_capacity(raw_positions.len());
        for raw in raw_positions {
            let Some(side) = Side::parse(&raw.side) else {
                warn!(symbol = %raw.symbol, side = %raw.side, "Unknown position side, skipping");
                continue;
            };
            let (Ok(amount), Ok(entry_price)) = (
                Decimal::from_str(&raw.amount),
                Decimal::from_str(&raw.entry_price),
            ) else {
                warn!(symbol = %raw.symbol, "Unparseable position numbers, skipping");
                continue;
            };

            positions.push(ExchangePosition {
                symbol: normalize_symbol(&raw.symbol),
                side,
                amount,
                entry_price,
            });
        }

        Ok(positions)
    }

    async fn set_position_tpsl(
        &self,
        symbol: &str,
        side: Side,
        stop_loss: Option<Price>,
        take_profit: Option<Price>,
    ) -> ExchangeResult<()> {
        if stop_loss.is_none() && take_profit.is_none() {
            return Err(ExchangeError::InvalidQuantity(
                "at least one of stop_loss or take_profit must be provided".to_string(),
            ));
        }

        let symbol = normalize_symbol(symbol);
        let mut payload = json!({
            "symbol": symbol,
            "side": side.to_string(),
        });

        if let Some(sl) = stop_loss {
            payload["stop_loss"] = self.protective_order_payload(&symbol, side, sl);
        }
        if let Some(tp) = take_profit {
            payload["take_profit"] = self.protective_order_payload(&symbol, side, tp);
        }

        self.post_signed(
            "/positions/tpsl",
            "set_position_tpsl",
            TPSL_EXPIRY_WINDOW_MS,
            payload,
            self.query_timeout(),
        )
        .await?;

        info!(symbol = %symbol, side = %side, stop_loss = ?stop_loss, take_profit = ?take_profit, "Position TP/SL attached");
        Ok(())
    }
}

/// Decimal을 페이로드 문자열로 변환합니다 (후행 0 제거).
fn dec_str(value: Decimal) -> String {
    value.normalize().to_string()
}

/// order_id가 숫자로도 문자열로도 올 수 있어 통일합니다.
fn value_to_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// 거래소 상태 문자열을 주문 상태로 매핑합니다.
fn parse_order_status(status: &str) -> OrderStatus {
    match status.to_lowercase().as_str() {
        "filled" => OrderStatus::Filled,
        "canceled" | "cancelled" => OrderStatus::Canceled,
        "rejected" => OrderStatus::Rejected,
        "failed" => OrderStatus::Failed,
        _ => OrderStatus::Submitted,
    }
}

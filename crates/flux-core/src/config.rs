//! 설정 관리.
//!
//! 애플리케이션 설정은 TOML 파일에서 로드하고 `FLUX__` 접두사 환경
//! 변수로 재정의합니다. 리스크 한도는 별도 파일에서 핫 리로드되므로
//! 여기에는 경로만 둡니다 (flux-risk의 `LimitsWatcher` 참조).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 애플리케이션 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// 실행 엔진 설정
    pub engine: EngineConfig,
    /// 거래소 설정
    pub exchange: ExchangeConfig,
    /// 데이터베이스 설정
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 실행 엔진 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// 전략 그룹 식별자 (포지션/주문 소유자)
    pub strategy_id: String,
    /// 초기 포트폴리오 가치 (USD)
    pub portfolio_value: Decimal,
    /// 모의 거래 모드 (거래소 호출 없이 게이트까지만 실행)
    #[serde(default = "default_paper_trading")]
    pub paper_trading: bool,
    /// 사이클 간격 (초)
    #[serde(default = "default_cycle_interval_secs")]
    pub cycle_interval_secs: u64,
    /// 거래 대상 심볼 목록
    pub symbols: Vec<String>,
    /// 리스크 한도 파일 경로 (핫 리로드 대상)
    #[serde(default = "default_risk_limits_path")]
    pub risk_limits_path: String,
}

/// 거래소 설정.
///
/// # 보안
/// 서명용 개인키는 설정 파일이 아니라 환경 변수로만 전달합니다
/// (`FLUX_AGENT_PRIVKEY`). `Debug` 출력은 API 키를 마스킹합니다.
#[derive(Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    /// REST API 기본 URL
    pub api_url: String,
    /// API 키 (선택, 헤더 `X-API-Key`)
    #[serde(default)]
    pub api_key: Option<String>,
    /// 주문 요청 타임아웃 (초)
    #[serde(default = "default_order_timeout_secs")]
    pub order_timeout_secs: u64,
    /// 조회 요청 타임아웃 (초)
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl std::fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let masked_key = match &self.api_key {
            Some(key) if key.len() > 8 => format!("{}...{}", &key[..4], &key[key.len() - 4..]),
            Some(_) => "***REDACTED***".to_string(),
            None => "<none>".to_string(),
        };

        f.debug_struct("ExchangeConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &masked_key)
            .field("order_timeout_secs", &self.order_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .finish()
    }
}

/// 데이터베이스 설정.
///
/// 연결 URL은 sqlx 관례에 따라 `DATABASE_URL` 환경 변수에서 읽습니다.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// 최대 연결 수
    pub max_connections: u32,
    /// 연결 타임아웃 (초)
    pub connection_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            connection_timeout_secs: 30,
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn default_paper_trading() -> bool {
    true
}

fn default_cycle_interval_secs() -> u64 {
    60
}

fn default_risk_limits_path() -> String {
    "config/risk_limits.toml".to_string()
}

fn default_order_timeout_secs() -> u64 {
    30
}

fn default_query_timeout_secs() -> u64 {
    10
}

impl AppConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("FLUX")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 기본 경로에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        Self::load("config/default.toml")
    }
}

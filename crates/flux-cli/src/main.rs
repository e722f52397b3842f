//! 트레이딩 에이전트 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # 실행 엔진 기동 (기본 설정 파일)
//! flux run
//!
//! # 설정 파일 지정
//! flux run -c config/prod.toml
//!
//! # 로컬 원장을 거래소 상태와 1회 정합화
//! flux reconcile -c config/prod.toml
//! ```
//!
//! 시장 데이터 수집과 전략 시그널 생성은 별도 협력자 프로세스의
//! 책임입니다. 이 바이너리는 실행 코어(정합화, 리스크 게이트, 주문
//! 제출)를 구동합니다.

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{info, warn};

use flux_core::{
    init_logging, AppConfig, LogConfig, MarketDataSource, MarketRegime, MarketSnapshot,
    ProviderError, RegimeSource,
};
use flux_exchange::{PacificaClient, PacificaConfig};
use flux_execution::{EngineDeps, ExecutionEngine, MemoryStore, PgStore, Reconciler, Store};
use flux_risk::LimitsWatcher;

#[derive(Parser)]
#[command(name = "flux")]
#[command(about = "무기한 선물 트레이딩 에이전트 - 리스크 게이트 실행 코어", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 실행 엔진 기동 (주기 사이클 루프)
    Run {
        /// 설정 파일 경로
        #[arg(short, long, default_value = "config/default.toml")]
        config: String,
    },

    /// 로컬 포지션 원장을 거래소 상태와 1회 정합화
    Reconcile {
        /// 설정 파일 경로
        #[arg(short, long, default_value = "config/default.toml")]
        config: String,
    },
}

/// 협력자 미연결 환경용 시장 데이터 소스.
///
/// 항상 데이터 없음을 반환하므로 엔진은 정합화/마크 단계만 수행합니다.
struct NullMarketData;

#[async_trait::async_trait]
impl MarketDataSource for NullMarketData {
    async fn snapshot(&self, _symbol: &str) -> Result<Option<MarketSnapshot>, ProviderError> {
        Ok(None)
    }
}

/// 고정 국면 소스 (협력자 미연결 환경용).
struct StaticRegime;

#[async_trait::async_trait]
impl RegimeSource for StaticRegime {
    async fn detect(&self) -> Result<MarketRegime, ProviderError> {
        Ok(MarketRegime::Sideways)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env의 시크릿 (FLUX_AGENT_PRIVKEY, DATABASE_URL 등)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run_engine(&config).await,
        Commands::Reconcile { config } => run_reconcile(&config).await,
    }
}

/// 설정을 로드하고 로깅을 초기화한다.
fn load_config(path: &str) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load(path)?;

    let log_config = LogConfig::new(
        config.logging.level.clone(),
        config.logging.format.parse().unwrap_or_default(),
    );
    init_logging(&log_config).map_err(|e| anyhow::anyhow!("logging init failed: {}", e))?;

    Ok(config)
}

/// 거래소 클라이언트를 구성한다.
fn build_exchange(config: &AppConfig) -> anyhow::Result<Arc<PacificaClient>> {
    let privkey = std::env::var("FLUX_AGENT_PRIVKEY")
        .map_err(|_| anyhow::anyhow!("FLUX_AGENT_PRIVKEY must be set for exchange access"))?;

    let mut exchange_config = PacificaConfig::new(config.exchange.api_url.clone(), privkey);
    exchange_config.api_key = config.exchange.api_key.clone();
    exchange_config.order_timeout_secs = config.exchange.order_timeout_secs;
    exchange_config.query_timeout_secs = config.exchange.query_timeout_secs;

    Ok(Arc::new(PacificaClient::new(exchange_config)?))
}

/// 저장소를 구성한다.
///
/// `DATABASE_URL`이 있으면 Postgres, 없으면 인메모리 저장소를
/// 사용합니다 (모의 거래 전용).
async fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .acquire_timeout(std::time::Duration::from_secs(
                    config.database.connection_timeout_secs,
                ))
                .connect(&url)
                .await?;

            let store = PgStore::new(pool);
            store.init_schema().await?;
            info!("Using Postgres store");
            Ok(Arc::new(store))
        }
        Err(_) => {
            if !config.engine.paper_trading {
                anyhow::bail!("DATABASE_URL is required for live trading");
            }
            warn!("DATABASE_URL not set, using in-memory store (paper trading only)");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

async fn run_engine(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    info!(
        strategy_id = %config.engine.strategy_id,
        paper_trading = config.engine.paper_trading,
        symbols = ?config.engine.symbols,
        "Starting flux"
    );

    let exchange = build_exchange(&config)?;
    let store = build_store(&config).await?;
    let limits = LimitsWatcher::load(&config.engine.risk_limits_path)?;

    // 전략/시장 데이터 협력자는 별도 프로세스로 배포된다.
    // 연결 전까지는 정합화와 마크-투-마켓만 수행하는 빈 세트로 기동한다.
    let deps = EngineDeps {
        exchange,
        store,
        market_data: Arc::new(NullMarketData),
        regime: Arc::new(StaticRegime),
        strategies: vec![],
    };

    let mut engine = ExecutionEngine::new(&config.engine, deps, limits);
    engine.run().await?;

    Ok(())
}

async fn run_reconcile(config_path: &str) -> anyhow::Result<()> {
    let config = load_config(config_path)?;

    let exchange = build_exchange(&config)?;
    let store = build_store(&config).await?;

    let reconciler = Reconciler::new(exchange, store);
    let report = reconciler.reconcile(&config.engine.strategy_id).await?;

    info!(
        created = report.created,
        updated = report.updated,
        deleted = report.deleted,
        "Reconciliation finished"
    );

    Ok(())
}

//! 외부 협력자 추상화.
//!
//! 시장 데이터 수집, 국면 감지, 전략 신호 생성은 코어 밖의 책임입니다.
//! 이 모듈은 실행 엔진이 협력자와 통신하기 위한 거래소/구현 중립적인
//! trait을 제공합니다.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{MarketRegime, MarketSnapshot, Position, TradingSignal};
use crate::error::FluxResult;

// =============================================================================
// 에러 타입
// =============================================================================

/// 협력자 호출 에러.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 데이터 없음/비어 있음
    #[error("데이터 없음: {0}")]
    NoData(String),

    /// 파싱 에러
    #[error("파싱 에러: {0}")]
    Parse(String),

    /// 기타 에러
    #[error("기타 에러: {0}")]
    Other(String),
}

// =============================================================================
// 협력자 trait
// =============================================================================

/// 시장 데이터 협력자.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// 심볼의 최신 시장 스냅샷을 반환합니다.
    ///
    /// 데이터가 아직 없는 심볼은 `Ok(None)`을 반환하며, 엔진은 해당
    /// 심볼을 이번 사이클에서 건너뜁니다.
    async fn snapshot(&self, symbol: &str) -> Result<Option<MarketSnapshot>, ProviderError>;
}

/// 시장 국면 감지 협력자.
#[async_trait]
pub trait RegimeSource: Send + Sync {
    /// 현재 시장 국면을 반환합니다.
    async fn detect(&self) -> Result<MarketRegime, ProviderError>;
}

/// 전략 패밀리.
///
/// 모멘텀 패밀리는 매 사이클 실행되고, 평균회귀 헤지 패밀리는
/// 헤지 트리거가 선택했을 때만 실행됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyFamily {
    /// 모멘텀 전략
    Momentum,
    /// 평균회귀 롱 헤지
    MrLongHedge,
    /// 평균회귀 숏 헤지
    MrShortHedge,
}

/// 전략 협력자.
///
/// 시그널 내부 산출 로직은 불투명하며, 엔진은 `generate_signal`의 결과만
/// 소비합니다.
#[async_trait]
pub trait Strategy: Send + Sync {
    /// 전략 인스턴스 ID.
    fn id(&self) -> &str;

    /// 이 인스턴스가 담당하는 심볼.
    fn symbol(&self) -> &str;

    /// 소속 전략 패밀리.
    fn family(&self) -> StrategyFamily;

    /// 주어진 국면에서 실행 가능한지 여부.
    ///
    /// 헤지 패밀리는 국면이 아니라 노출에 의해 구동되므로 기본적으로
    /// 항상 true입니다.
    fn active_in(&self, _regime: MarketRegime) -> bool {
        true
    }

    /// 시장 스냅샷과 현재 포지션으로부터 시그널을 생성합니다.
    async fn generate_signal(
        &self,
        snapshot: &MarketSnapshot,
        position: Option<&Position>,
    ) -> FluxResult<Option<TradingSignal>>;
}

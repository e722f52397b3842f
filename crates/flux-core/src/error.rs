//! 트레이딩 시스템의 에러 타입.
//!
//! 이 모듈은 코어 전반에서 사용되는 에러 타입을 정의합니다.
//! 비즈니스상 예상되는 결과(리스크 거부 등)는 에러가 아니라 반환값으로
//! 표현하고, 여기의 에러는 예상치 못한 장애에만 사용합니다.

use thiserror::Error;

/// 핵심 트레이딩 에러.
#[derive(Debug, Error)]
pub enum FluxError {
    /// 설정 에러
    #[error("설정 에러: {0}")]
    Config(String),

    /// 거래소 에러
    #[error("거래소 에러: {0}")]
    Exchange(String),

    /// 주문 에러
    #[error("주문 에러: {0}")]
    Order(String),

    /// 포지션 에러
    #[error("포지션 에러: {0}")]
    Position(String),

    /// 리스크 관리 에러
    #[error("리스크 에러: {0}")]
    Risk(String),

    /// 전략 에러
    #[error("전략 에러: {0}")]
    Strategy(String),

    /// 네트워크 에러
    #[error("네트워크 에러: {0}")]
    Network(String),

    /// 직렬화 에러
    #[error("직렬화 에러: {0}")]
    Serialization(String),

    /// 데이터베이스 에러
    #[error("데이터베이스 에러: {0}")]
    Database(String),

    /// 잘못된 입력
    #[error("잘못된 입력: {0}")]
    InvalidInput(String),

    /// 찾을 수 없음
    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    /// 내부 에러
    #[error("내부 에러: {0}")]
    Internal(String),
}

/// 트레이딩 작업을 위한 Result 타입.
pub type FluxResult<T> = Result<T, FluxError>;

impl FluxError {
    /// 일시적 장애로 다음 사이클에 자연 회복될 수 있는 에러인지 확인합니다.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FluxError::Network(_) | FluxError::Exchange(_) | FluxError::Database(_)
        )
    }

    /// 기동을 중단해야 하는 치명적인 에러인지 확인합니다.
    pub fn is_critical(&self) -> bool {
        matches!(self, FluxError::Config(_))
    }
}

impl From<serde_json::Error> for FluxError {
    fn from(err: serde_json::Error) -> Self {
        FluxError::Serialization(err.to_string())
    }
}

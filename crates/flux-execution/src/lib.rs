//! 주문 실행 및 상태 정합화.
//!
//! 제공 기능:
//! - Store trait: 주문/포지션 영속화 (인메모리 + Postgres 구현)
//! - Reconciler: 거래소 우선 단방향 포지션 정합화
//! - ExecutionEngine: 주기 실행 사이클
//!   (한도 리로드 → 정합화 → 마크-투-마켓 → 시그널 → 게이트 → 제출 →
//!   영속화 → 보호 주문 → 헤지 재평가)

pub mod engine;
pub mod postgres;
pub mod reconciler;
pub mod store;

pub use engine::{EngineDeps, ExecutionEngine};
pub use postgres::PgStore;
pub use reconciler::{ReconcileReport, Reconciler};
pub use store::{MemoryStore, Store, StoreError, StorePortfolio, StoreResult};

//! 헤지 활성화 회로 차단기.
//!
//! 폭주 헤징을 막기 위해 패밀리별로 활성화 횟수/시간을 추적하는
//! 상태 기계입니다.
//!
//! # 상태 전이
//!
//! ```text
//! Idle ──[활성화]──> Active
//!   ↑                  │
//!   │        [윈도우 내 활성화 예산 초과]
//!   │                  ↓
//!   └──[쿨다운 경과]── Cooldown
//! ```
//!
//! Cooldown 동안의 활성화 요청은 `HedgeAction::None`으로 억제됩니다.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::hedge::HedgeAction;

/// 회로 차단기 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// 유휴 상태 - 활성화 허용
    Idle,
    /// 헤지 활성 상태 - 예산 내 재활성화 허용
    Active,
    /// 쿨다운 - 모든 활성화 억제
    Cooldown,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BreakerState::Idle => write!(f, "idle"),
            BreakerState::Active => write!(f, "active"),
            BreakerState::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// 회로 차단기 설정.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// 윈도우 내 허용되는 최대 활성화 횟수
    pub max_activations: u32,
    /// 활성화 횟수 집계 윈도우 (초)
    pub activation_window_secs: u64,
    /// 쿨다운 지속 시간 (초)
    pub cooldown_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            max_activations: 3,
            activation_window_secs: 600,
            cooldown_secs: 1800,
        }
    }
}

impl BreakerConfig {
    fn activation_window(&self) -> Duration {
        Duration::from_secs(self.activation_window_secs)
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// 패밀리별 차단기 상태.
#[derive(Debug)]
struct FamilyBreaker {
    state: BreakerState,
    activations: u32,
    window_start: Instant,
    cooldown_until: Option<Instant>,
}

impl FamilyBreaker {
    fn new(now: Instant) -> Self {
        Self {
            state: BreakerState::Idle,
            activations: 0,
            window_start: now,
            cooldown_until: None,
        }
    }
}

/// 헤지 활성화 회로 차단기.
#[derive(Debug)]
pub struct HedgeBreaker {
    config: BreakerConfig,
    families: HashMap<HedgeAction, FamilyBreaker>,
}

impl HedgeBreaker {
    /// 설정으로 차단기를 생성한다.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            families: HashMap::new(),
        }
    }

    /// 헤지 판정에 차단기를 적용한다.
    ///
    /// 현재 시각을 주입받으므로 테스트에서 시간 경과를 결정적으로
    /// 재현할 수 있습니다.
    pub fn apply(&mut self, action: HedgeAction, now: Instant) -> HedgeAction {
        if action == HedgeAction::None {
            // 액션이 없으면 윈도우가 끝난 Active 패밀리를 Idle로 되돌린다
            self.expire_windows(now);
            return HedgeAction::None;
        }

        let config = &self.config;
        let breaker = self
            .families
            .entry(action)
            .or_insert_with(|| FamilyBreaker::new(now));

        // 쿨다운 만료 처리
        if breaker.state == BreakerState::Cooldown {
            match breaker.cooldown_until {
                Some(until) if now >= until => {
                    debug!(action = %action, "Hedge breaker cooldown expired");
                    breaker.state = BreakerState::Idle;
                    breaker.activations = 0;
                    breaker.cooldown_until = None;
                }
                _ => {
                    debug!(action = %action, "Hedge activation suppressed (cooldown)");
                    return HedgeAction::None;
                }
            }
        }

        // 집계 윈도우가 지났으면 새 윈도우 시작
        if now.duration_since(breaker.window_start) > config.activation_window() {
            breaker.window_start = now;
            breaker.activations = 0;
        }

        breaker.activations += 1;
        if breaker.activations > config.max_activations {
            warn!(
                action = %action,
                activations = breaker.activations,
                max = config.max_activations,
                cooldown_secs = config.cooldown_secs,
                "Hedge activation budget exceeded, entering cooldown"
            );
            breaker.state = BreakerState::Cooldown;
            breaker.cooldown_until = Some(now + config.cooldown());
            return HedgeAction::None;
        }

        breaker.state = BreakerState::Active;
        action
    }

    /// 패밀리의 현재 차단기 상태를 반환한다.
    pub fn state(&self, action: HedgeAction) -> BreakerState {
        self.families
            .get(&action)
            .map(|b| b.state)
            .unwrap_or(BreakerState::Idle)
    }

    /// 윈도우가 끝난 Active 패밀리를 Idle로 전이한다.
    fn expire_windows(&mut self, now: Instant) {
        let window = self.config.activation_window();
        for breaker in self.families.values_mut() {
            if breaker.state == BreakerState::Active
                && now.duration_since(breaker.window_start) > window
            {
                breaker.state = BreakerState::Idle;
                breaker.activations = 0;
            }
        }
    }
}

impl Default for HedgeBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            max_activations: 2,
            activation_window_secs: 60,
            cooldown_secs: 300,
        }
    }

    #[test]
    fn test_activation_passes_through() {
        let mut breaker = HedgeBreaker::new(test_config());
        let now = Instant::now();

        let action = breaker.apply(HedgeAction::ActivateMrLongs, now);
        assert_eq!(action, HedgeAction::ActivateMrLongs);
        assert_eq!(breaker.state(HedgeAction::ActivateMrLongs), BreakerState::Active);
    }

    #[test]
    fn test_budget_exceeded_enters_cooldown() {
        let mut breaker = HedgeBreaker::new(test_config());
        let now = Instant::now();

        // 예산(2회)까지는 통과
        assert_eq!(breaker.apply(HedgeAction::ActivateMrLongs, now), HedgeAction::ActivateMrLongs);
        assert_eq!(breaker.apply(HedgeAction::ActivateMrLongs, now), HedgeAction::ActivateMrLongs);

        // 3번째는 억제 + 쿨다운 진입
        assert_eq!(breaker.apply(HedgeAction::ActivateMrLongs, now), HedgeAction::None);
        assert_eq!(breaker.state(HedgeAction::ActivateMrLongs), BreakerState::Cooldown);

        // 쿨다운 동안 계속 억제
        let later = now + Duration::from_secs(100);
        assert_eq!(breaker.apply(HedgeAction::ActivateMrLongs, later), HedgeAction::None);
    }

    #[test]
    fn test_cooldown_expires_back_to_idle() {
        let mut breaker = HedgeBreaker::new(test_config());
        let now = Instant::now();

        for _ in 0..3 {
            breaker.apply(HedgeAction::ActivateMrLongs, now);
        }
        assert_eq!(breaker.state(HedgeAction::ActivateMrLongs), BreakerState::Cooldown);

        // 쿨다운 경과 후에는 다시 활성화 가능
        let after_cooldown = now + Duration::from_secs(301);
        assert_eq!(
            breaker.apply(HedgeAction::ActivateMrLongs, after_cooldown),
            HedgeAction::ActivateMrLongs
        );
        assert_eq!(breaker.state(HedgeAction::ActivateMrLongs), BreakerState::Active);
    }

    #[test]
    fn test_families_tracked_independently() {
        let mut breaker = HedgeBreaker::new(test_config());
        let now = Instant::now();

        for _ in 0..3 {
            breaker.apply(HedgeAction::ActivateMrLongs, now);
        }

        // MR 롱은 쿨다운이지만 MR 숏은 무관하게 통과
        assert_eq!(
            breaker.apply(HedgeAction::ActivateMrShorts, now),
            HedgeAction::ActivateMrShorts
        );
    }

    #[test]
    fn test_window_reset_restores_budget() {
        let mut breaker = HedgeBreaker::new(test_config());
        let now = Instant::now();

        assert_eq!(breaker.apply(HedgeAction::ActivateMrLongs, now), HedgeAction::ActivateMrLongs);
        assert_eq!(breaker.apply(HedgeAction::ActivateMrLongs, now), HedgeAction::ActivateMrLongs);

        // 윈도우(60초)가 지나면 예산이 복구된다
        let next_window = now + Duration::from_secs(61);
        assert_eq!(
            breaker.apply(HedgeAction::ActivateMrLongs, next_window),
            HedgeAction::ActivateMrLongs
        );
    }

    #[test]
    fn test_idle_no_action_stays_idle() {
        let mut breaker = HedgeBreaker::new(test_config());
        let now = Instant::now();

        assert_eq!(breaker.apply(HedgeAction::None, now), HedgeAction::None);
        assert_eq!(breaker.state(HedgeAction::ActivateMrLongs), BreakerState::Idle);
    }
}

//! 헤지 판정.
//!
//! 노출 스냅샷에 대한 순수 함수로 어떤 헤지 전략 패밀리를 실행할지
//! 결정합니다. 상태 전이는 여기가 아니라 회로 차단기(breaker 모듈)가
//! 담당합니다.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::exposure::ExposureState;

/// 헤지 판정 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HedgeAction {
    /// 평균회귀 숏 헤지 활성화 (과열된 롱 북 페이드)
    ActivateMrShorts,
    /// 평균회귀 롱 헤지 활성화 (커지는 숏 북 페이드)
    ActivateMrLongs,
    /// 헤지 불필요
    None,
}

impl std::fmt::Display for HedgeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HedgeAction::ActivateMrShorts => write!(f, "ACTIVATE_MR_SHORTS"),
            HedgeAction::ActivateMrLongs => write!(f, "ACTIVATE_MR_LONGS"),
            HedgeAction::None => write!(f, "NONE"),
        }
    }
}

/// 헤지 활성화 임계값.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeThresholds {
    /// 롱 북 손익률 임계값 (비율, 0.1 = 10%)
    pub profit_threshold: Decimal,
    /// 순 롱 노출 임계값 (포트폴리오 대비 비율)
    pub high_long_exposure: Decimal,
    /// 숏 노출 임계값 (호가 통화 절대값)
    pub short_exposure_usd: Decimal,
}

impl Default for HedgeThresholds {
    fn default() -> Self {
        Self {
            profit_threshold: dec!(0.1),
            high_long_exposure: dec!(0.7),
            short_exposure_usd: dec!(30000),
        }
    }
}

/// 노출 기반 헤지 트리거.
#[derive(Debug, Clone, Default)]
pub struct HedgeTrigger {
    thresholds: HedgeThresholds,
}

impl HedgeTrigger {
    /// 임계값으로 트리거를 생성한다.
    pub fn new(thresholds: HedgeThresholds) -> Self {
        Self { thresholds }
    }

    /// 노출 상태를 평가해 헤지 액션을 반환한다.
    ///
    /// 순수 함수이며 상태를 바꾸지 않습니다.
    pub fn evaluate(&self, exposure: &ExposureState) -> HedgeAction {
        // 모멘텀 롱이 크게 이기는 중 - MR 숏으로 페이드
        if exposure.long_pnl_pct > self.thresholds.profit_threshold
            && exposure.net_long > self.thresholds.high_long_exposure
        {
            info!(
                long_pnl_pct = %exposure.long_pnl_pct,
                net_long = %exposure.net_long,
                "High long P&L and exposure, activating MR shorts"
            );
            return HedgeAction::ActivateMrShorts;
        }

        // 숏 북이 커지는 중 - MR 롱으로 페이드
        if exposure.short_exposure > self.thresholds.short_exposure_usd {
            info!(
                short_exposure = %exposure.short_exposure,
                threshold = %self.thresholds.short_exposure_usd,
                "High short exposure, activating MR longs"
            );
            return HedgeAction::ActivateMrLongs;
        }

        HedgeAction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exposure(net_long: Decimal, long_pnl_pct: Decimal, short_exposure: Decimal) -> ExposureState {
        ExposureState {
            net_exposure: Decimal::ZERO,
            long_exposure: Decimal::ZERO,
            short_exposure,
            net_long,
            long_pnl_pct,
        }
    }

    #[test]
    fn test_winning_long_book_activates_mr_shorts() {
        let trigger = HedgeTrigger::default();

        // net_long 0.8 > 0.7, long_pnl_pct 0.15 > 0.1
        let state = exposure(dec!(0.8), dec!(0.15), Decimal::ZERO);
        assert_eq!(trigger.evaluate(&state), HedgeAction::ActivateMrShorts);
    }

    #[test]
    fn test_both_conditions_required_for_mr_shorts() {
        let trigger = HedgeTrigger::default();

        // 손익률만 높음 - 활성화 안 됨
        let state = exposure(dec!(0.5), dec!(0.15), Decimal::ZERO);
        assert_eq!(trigger.evaluate(&state), HedgeAction::None);

        // 노출만 높음 - 활성화 안 됨
        let state = exposure(dec!(0.8), dec!(0.05), Decimal::ZERO);
        assert_eq!(trigger.evaluate(&state), HedgeAction::None);
    }

    #[test]
    fn test_short_book_activates_mr_longs() {
        let trigger = HedgeTrigger::default();

        // MR 숏 조건은 거짓, 숏 노출이 임계값 초과
        let state = exposure(dec!(0.1), dec!(0.02), dec!(40000));
        assert_eq!(trigger.evaluate(&state), HedgeAction::ActivateMrLongs);
    }

    #[test]
    fn test_no_action_below_thresholds() {
        let trigger = HedgeTrigger::default();

        let state = exposure(dec!(0.1), dec!(0.02), dec!(20000));
        assert_eq!(trigger.evaluate(&state), HedgeAction::None);
    }

    #[test]
    fn test_mr_shorts_takes_priority() {
        let trigger = HedgeTrigger::default();

        // 두 조건이 모두 참이면 먼저 평가되는 MR 숏이 선택된다
        let state = exposure(dec!(0.8), dec!(0.15), dec!(40000));
        assert_eq!(trigger.evaluate(&state), HedgeAction::ActivateMrShorts);
    }
}

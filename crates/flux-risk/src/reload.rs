//! 리스크 한도 핫 리로드.
//!
//! 한도 파일의 수정 시각을 감시하다가 변경되면 새 스냅샷으로 교체합니다.
//! 기동 시 로드 실패는 치명적이지만, 리로드 실패는 이전 스냅샷을 유지한
//! 채 경고만 남깁니다. 잘못된 파일 하나가 거래 중인 시스템의 한도를
//! 무너뜨려서는 안 됩니다.

use flux_core::{FluxError, FluxResult};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

use crate::limits::{RiskLimits, SharedLimits};

/// 한도 파일 감시자.
pub struct LimitsWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
    shared: SharedLimits,
}

impl LimitsWatcher {
    /// 파일에서 초기 스냅샷을 로드합니다.
    ///
    /// 기동 시점이므로 파일/파싱/검증 오류는 모두 치명적입니다.
    pub fn load<P: AsRef<Path>>(path: P) -> FluxResult<Self> {
        let path = path.as_ref().to_path_buf();
        let limits = Self::read_limits(&path)?;
        let last_modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();

        info!(path = %path.display(), "Risk limits loaded");

        Ok(Self {
            path,
            last_modified,
            shared: SharedLimits::new(limits),
        })
    }

    /// 파일 없이 주어진 한도로 감시자를 만듭니다 (테스트/기본값용).
    pub fn with_limits(limits: RiskLimits) -> Self {
        Self {
            path: PathBuf::new(),
            last_modified: None,
            shared: SharedLimits::new(limits),
        }
    }

    /// 게이트와 공유할 한도 핸들을 반환합니다.
    pub fn shared(&self) -> SharedLimits {
        self.shared.clone()
    }

    /// 현재 스냅샷을 반환합니다.
    pub fn current(&self) -> std::sync::Arc<RiskLimits> {
        self.shared.load()
    }

    /// 파일이 변경되었으면 새 스냅샷으로 교체합니다.
    ///
    /// # Returns
    /// 새 스냅샷이 적용되었으면 true. 파싱/검증에 실패하면 이전
    /// 스냅샷을 유지하고 false를 반환합니다.
    pub fn reload_if_changed(&mut self) -> bool {
        if self.path.as_os_str().is_empty() {
            return false;
        }

        let modified = match std::fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Cannot stat limits file, keeping previous snapshot");
                return false;
            }
        };

        if self.last_modified == Some(modified) {
            return false;
        }

        match Self::read_limits(&self.path) {
            Ok(limits) => {
                self.shared.store(limits);
                self.last_modified = Some(modified);
                info!(path = %self.path.display(), "Risk limits reloaded");
                true
            }
            Err(e) => {
                // 리로드 실패는 비치명적 - 이전 스냅샷 유지
                self.last_modified = Some(modified);
                warn!(path = %self.path.display(), error = %e, "Limits reload failed, keeping previous snapshot");
                false
            }
        }
    }

    /// 파일을 읽고 파싱/정규화/검증합니다.
    fn read_limits(path: &Path) -> FluxResult<RiskLimits> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FluxError::Config(format!("cannot read limits file {}: {}", path.display(), e)))?;

        let limits: RiskLimits = toml::from_str(&raw)
            .map_err(|e| FluxError::Config(format!("invalid limits file {}: {}", path.display(), e)))?;

        let limits = limits.normalized();
        limits
            .validate()
            .map_err(|e| FluxError::Config(e.to_string()))?;

        Ok(limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_and_reload() {
        let dir = std::env::temp_dir().join("flux_limits_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = write_file(&dir, "limits.toml", "max_leverage = 4\n");

        let mut watcher = LimitsWatcher::load(&path).unwrap();
        assert_eq!(watcher.current().max_leverage, dec!(4));

        // 수정 시각이 바뀌도록 잠시 대기 후 재작성
        std::thread::sleep(std::time::Duration::from_millis(20));
        write_file(&dir, "limits.toml", "max_leverage = 2\n");

        assert!(watcher.reload_if_changed());
        assert_eq!(watcher.current().max_leverage, dec!(2));

        // 변경이 없으면 no-op
        assert!(!watcher.reload_if_changed());
    }

    #[test]
    fn test_bad_reload_keeps_previous_snapshot() {
        let dir = std::env::temp_dir().join("flux_limits_test_bad");
        std::fs::create_dir_all(&dir).unwrap();
        let path = write_file(&dir, "limits.toml", "max_leverage = 4\n");

        let mut watcher = LimitsWatcher::load(&path).unwrap();

        std::thread::sleep(std::time::Duration::from_millis(20));
        write_file(&dir, "limits.toml", "max_leverage = \"not a number\"\n");

        // 리로드는 실패하지만 이전 스냅샷이 살아있어야 한다
        assert!(!watcher.reload_if_changed());
        assert_eq!(watcher.current().max_leverage, dec!(4));
    }

    #[test]
    fn test_startup_load_failure_is_fatal() {
        let result = LimitsWatcher::load("/nonexistent/limits.toml");
        assert!(matches!(result, Err(FluxError::Config(_))));
    }
}

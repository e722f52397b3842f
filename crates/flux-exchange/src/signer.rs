//! Ed25519 요청 서명.
//!
//! 거래소는 에이전트 지갑(Ed25519 키쌍)으로 서명된 요청만 받습니다.
//! 서명 절차:
//! 1. 서명 헤더와 페이로드를 `{헤더 필드들, "data": 페이로드}`로 결합
//! 2. 모든 레벨의 키를 재귀적으로 정렬
//! 3. 공백 없는 compact JSON 생성
//! 4. Ed25519로 서명 후 base58 인코딩

use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use serde::Serialize;
use serde_json::Value;

use crate::error::ExchangeError;

/// 서명 헤더.
///
/// 타임스탬프와 만료 윈도우로 재전송 공격을 차단합니다.
#[derive(Debug, Clone, Serialize)]
pub struct SignatureHeader {
    /// 요청 생성 시각 (밀리초)
    pub timestamp: i64,
    /// 만료 윈도우 (밀리초)
    pub expiry_window: u64,
    /// 작업 유형 (예: "create_market_order")
    #[serde(rename = "type")]
    pub operation: String,
}

impl SignatureHeader {
    /// 현재 시각 기준 서명 헤더를 생성합니다.
    pub fn now(operation: impl Into<String>, expiry_window_ms: u64) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            expiry_window: expiry_window_ms,
            operation: operation.into(),
        }
    }
}

/// 에이전트 지갑 서명기.
pub struct AgentSigner {
    signing_key: SigningKey,
}

impl AgentSigner {
    /// base58 인코딩된 개인키에서 서명기를 생성합니다.
    ///
    /// 32바이트 시드와 64바이트 전체 키쌍(시드 + 공개키) 형식을 모두
    /// 지원합니다.
    pub fn from_base58(private_key: &str) -> Result<Self, ExchangeError> {
        let key_bytes = bs58::decode(private_key.trim())
            .into_vec()
            .map_err(|e| ExchangeError::Signing(format!("invalid base58 key: {}", e)))?;

        let signing_key = match key_bytes.len() {
            32 => {
                let seed: [u8; 32] = key_bytes.as_slice().try_into().expect("length checked");
                SigningKey::from_bytes(&seed)
            }
            64 => {
                // 전체 키쌍 형식 - 앞 32바이트가 시드
                let seed: [u8; 32] = key_bytes[..32].try_into().expect("length checked");
                SigningKey::from_bytes(&seed)
            }
            len => {
                return Err(ExchangeError::Signing(format!(
                    "invalid key length: {} bytes, expected 32 (seed) or 64 (keypair)",
                    len
                )))
            }
        };

        Ok(Self { signing_key })
    }

    /// base58 인코딩된 공개키를 반환합니다.
    pub fn public_key(&self) -> String {
        let verifying_key: VerifyingKey = self.signing_key.verifying_key();
        bs58::encode(verifying_key.as_bytes()).into_string()
    }

    /// 헤더와 페이로드를 서명합니다.
    ///
    /// # Returns
    /// `(서명 대상 메시지, base58 서명)` 튜플
    pub fn sign_operation(
        &self,
        header: &SignatureHeader,
        payload: &Value,
    ) -> Result<(String, String), ExchangeError> {
        let mut message = serde_json::to_value(header)?;
        message["data"] = payload.clone();

        let sorted = sort_json_keys(&message);
        let message_str = serde_json::to_string(&sorted)?;

        let signature = self.signing_key.sign(message_str.as_bytes());
        let signature_b58 = bs58::encode(signature.to_bytes()).into_string();

        Ok((message_str, signature_b58))
    }
}

impl std::fmt::Debug for AgentSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSigner")
            .field("public_key", &self.public_key())
            .finish()
    }
}

/// JSON 값의 모든 객체 키를 재귀적으로 정렬합니다.
fn sort_json_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut sorted = serde_json::Map::new();
            for (key, val) in entries {
                sorted.insert(key.clone(), sort_json_keys(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_json_keys).collect()),
        other => other.clone(),
    }
}

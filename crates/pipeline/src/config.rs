//! 오퍼레이터 공통 설정
//!
//! 모든 오퍼레이터 설정 문서는 `id`, `type`, `output`, `on_error` 필드를
//! 공유하며, 타입별 옵션이 뒤따릅니다. [`CommonConfig`]는 각 오퍼레이터
//! 설정 구조체에 `#[serde(flatten)]`으로 포함됩니다.

use serde::{Deserialize, Serialize};

use logpost_core::operator::BuildContext;

use crate::error::OperatorError;

/// 엔트리 처리 실패 시 동작 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OnError {
    /// 엔트리를 변환 없이 다운스트림으로 전달 (기본값)
    #[default]
    Send,
    /// 엔트리를 버리고 에러를 반환
    Drop,
}

/// 오퍼레이터 공통 설정 필드
///
/// `on_error`는 Build 시 [`CommonConfig::on_error_policy`]로 검증됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommonConfig {
    /// 오퍼레이터 ID. 비어있으면 타입명이 사용됩니다.
    #[serde(default)]
    pub id: String,
    /// 다운스트림 오퍼레이터 ID 목록
    #[serde(default)]
    pub output: Vec<String>,
    /// 처리 실패 정책 ("send" 또는 "drop")
    #[serde(default = "default_on_error")]
    pub on_error: String,
}

fn default_on_error() -> String {
    "send".to_owned()
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            output: Vec::new(),
            on_error: default_on_error(),
        }
    }
}

impl CommonConfig {
    /// ID만 지정하여 설정을 생성합니다.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// `on_error` 문자열을 검증하고 정책으로 변환합니다.
    pub fn on_error_policy(&self) -> Result<OnError, OperatorError> {
        match self.on_error.as_str() {
            "send" => Ok(OnError::Send),
            "drop" => Ok(OnError::Drop),
            other => Err(OperatorError::Config {
                field: "on_error".to_owned(),
                reason: format!("'{other}' is not one of 'send' or 'drop'"),
            }),
        }
    }

    /// 빌드 컨텍스트를 반영한 최종 오퍼레이터 ID를 반환합니다.
    pub fn resolve_id(&self, ctx: &BuildContext, operator_type: &str) -> String {
        ctx.resolve_id(&self.id, operator_type)
    }
}

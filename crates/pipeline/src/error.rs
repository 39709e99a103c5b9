//! 오퍼레이터 에러 타입
//!
//! [`OperatorError`]는 오퍼레이터 구성과 실행 중 발생하는 모든 에러를
//! 표현합니다. `From<OperatorError> for LogpostError` 변환이 구현되어
//! 있어 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use logpost_core::error::{LogpostError, PipelineError};

/// 오퍼레이터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum OperatorError {
    /// 설정 값이 올바르지 않음 (Build 실패)
    #[error("invalid `{field}` field: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 실패 사유
        reason: String,
    },

    /// 필수 설정 값 누락 (Build 실패)
    #[error("missing required argument '{0}'")]
    MissingArgument(&'static str),

    /// 필드 구분자가 단일 문자가 아님 (Build 실패)
    #[error("invalid 'delimiter': '{0}'")]
    InvalidDelimiter(String),

    /// 표현식 컴파일/평가 실패
    #[error("expression error: {0}")]
    Expr(#[from] crate::expr::ExprError),

    /// 엔트리 파싱 실패
    #[error("{reason}")]
    Parse {
        /// 실패 사유 (하위 디코더 메시지 포함)
        reason: String,
    },

    /// 등록되지 않은 오퍼레이터 타입
    #[error("unsupported operator type: '{0}'")]
    UnknownType(String),

    /// 중복된 오퍼레이터 ID
    #[error("duplicate operator id: '{0}'")]
    DuplicateId(String),

    /// 존재하지 않는 출력 참조
    #[error("operator '{id}' outputs to unknown operator '{output}'")]
    UnknownOutput {
        /// 출력을 참조한 오퍼레이터
        id: String,
        /// 찾을 수 없는 출력 ID
        output: String,
    },

    /// 출력 그래프에 순환 존재
    #[error("operator graph contains a cycle through '{0}'")]
    Cycle(String),

    /// 설정 문서 역직렬화 실패
    #[error("failed to deserialize operator config: {0}")]
    Deserialize(#[from] serde_yaml::Error),
}

impl From<OperatorError> for LogpostError {
    fn from(err: OperatorError) -> Self {
        LogpostError::Pipeline(PipelineError::ProcessFailed(err.to_string()))
    }
}

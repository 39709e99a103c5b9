//! 에러 타입 -- 도메인별 에러 정의

/// logpost 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum LogpostError {
    /// 필드 경로 접근 에러
    #[error("field error: {0}")]
    Field(#[from] FieldError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 상태 저장소 에러
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 필드 경로 접근 에러
#[derive(Debug, thiserror::Error)]
pub enum FieldError {
    /// 필드가 존재하지 않음
    #[error("field '{field}' not found")]
    NotFound { field: String },

    /// 기대한 타입과 실제 값 타입이 다름
    #[error("field '{field}' expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    /// 필드 경로 문자열이 올바르지 않음
    #[error("invalid field path: '{path}'")]
    InvalidPath { path: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 엔트리 처리 실패
    #[error("process failed: {0}")]
    ProcessFailed(String),

    /// 엔트리를 처리할 수 없는 오퍼레이터 (인풋 등)
    #[error("operator '{id}' does not process entries")]
    NotProcessor { id: String },

    /// 오퍼레이터 시작 실패
    #[error("operator start failed: {0}")]
    StartFailed(String),
}

/// 상태 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// 저장 실패
    #[error("failed to store key '{key}': {reason}")]
    Store { key: String, reason: String },

    /// 조회 실패
    #[error("failed to load key '{key}': {reason}")]
    Load { key: String, reason: String },
}

#![doc = include_str!("../README.md")]

pub mod entry;
pub mod error;
pub mod field;
pub mod operator;
pub mod persister;

// --- 주요 타입 re-export ---
// 각 모듈의 핵심 타입을 크레이트 루트에서 바로 사용할 수 있도록 합니다.

// 엔트리
pub use entry::{Entry, Severity, Value};

// 필드 경로
pub use field::Field;

// 에러
pub use error::{FieldError, LogpostError, PersistError, PipelineError};

// 오퍼레이터
pub use operator::{BoxFuture, BuildContext, Operator, OutputList};

// 퍼시스터
pub use persister::{MemoryPersister, Persister, ScopedPersister};

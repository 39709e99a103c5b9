//! 트랜스포머 오퍼레이터 -- 엔트리를 변환하거나 버퍼링 후 전달
//!
//! 트랜스포머는 `process`로 받은 엔트리를 가공하여 다운스트림으로
//! 전달합니다. 처리 실패 시 동작은 공통 `on_error` 정책을 따릅니다.

pub mod recombine;

pub use recombine::{DEFAULT_SOURCE_IDENTIFIER, RecombineConfig, RecombineOperator};

use logpost_core::entry::Entry;
use logpost_core::error::LogpostError;
use logpost_core::operator::OutputList;

use crate::config::OnError;
use crate::error::OperatorError;

/// 처리에 실패한 엔트리를 `on_error` 정책에 따라 처리합니다.
///
/// - [`OnError::Send`]: 엔트리를 변환 없이 다운스트림으로 전달하고
///   성공을 반환합니다.
/// - [`OnError::Drop`]: 에러 로그를 남기고 엔트리를 버린 뒤 에러를
///   반환합니다.
pub(crate) async fn handle_entry_error(
    operator_id: &str,
    policy: OnError,
    outputs: &OutputList,
    entry: Entry,
    err: OperatorError,
) -> Result<(), LogpostError> {
    match policy {
        OnError::Send => {
            tracing::warn!(
                operator = operator_id,
                error = %err,
                "failed to process entry, sending unchanged"
            );
            outputs.write(entry).await;
            Ok(())
        }
        OnError::Drop => {
            tracing::error!(
                operator = operator_id,
                error = %err,
                "failed to process entry, dropping"
            );
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeOutput;
    use std::sync::Arc;

    #[tokio::test]
    async fn send_policy_forwards_entry() {
        let fake = Arc::new(FakeOutput::new());
        let outputs = OutputList::new();
        outputs.set(vec![fake.clone()]);

        let err = OperatorError::Parse {
            reason: "boom".to_owned(),
        };
        let result =
            handle_entry_error("t", OnError::Send, &outputs, Entry::with_body("raw"), err).await;

        assert!(result.is_ok());
        let received = fake.take_entries();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body.as_str(), Some("raw"));
    }

    #[tokio::test]
    async fn drop_policy_returns_error() {
        let fake = Arc::new(FakeOutput::new());
        let outputs = OutputList::new();
        outputs.set(vec![fake.clone()]);

        let err = OperatorError::Parse {
            reason: "boom".to_owned(),
        };
        let result =
            handle_entry_error("t", OnError::Drop, &outputs, Entry::with_body("raw"), err).await;

        assert!(result.is_err());
        assert!(fake.take_entries().is_empty());
    }
}

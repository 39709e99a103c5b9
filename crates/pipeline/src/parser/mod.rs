//! 파서 오퍼레이터 -- 엔트리 본문을 구조화된 맵으로 변환
//!
//! 파서는 문자열 본문을 해석하여 맵 본문으로 교체합니다. 파싱 실패는
//! 항상 에러로 보고되며, `on_error` 정책이 `send`이면 원본 엔트리를
//! 그대로 다운스트림에 전달한 뒤 에러를 반환합니다.

pub mod csv;

pub use csv::{CsvParser, CsvParserConfig};

use logpost_core::entry::Entry;
use logpost_core::error::LogpostError;
use logpost_core::operator::OutputList;

use crate::config::OnError;
use crate::error::OperatorError;

/// 파싱에 실패한 엔트리를 `on_error` 정책에 따라 처리합니다.
///
/// [`OnError::Send`]는 원본 엔트리를 전달하고, [`OnError::Drop`]은
/// 버립니다. 두 경우 모두 파싱 에러를 반환합니다.
pub(crate) async fn handle_parse_error(
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
                "failed to parse entry, sending unchanged"
            );
            outputs.write(entry).await;
        }
        OnError::Drop => {
            tracing::error!(
                operator = operator_id,
                error = %err,
                "failed to parse entry, dropping"
            );
        }
    }
    Err(err.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeOutput;
    use std::sync::Arc;

    #[tokio::test]
    async fn send_forwards_original_and_returns_error() {
        let fake = Arc::new(FakeOutput::new());
        let outputs = OutputList::new();
        outputs.set(vec![fake.clone()]);

        let err = OperatorError::Parse {
            reason: "bad record".to_owned(),
        };
        let result =
            handle_parse_error("p", OnError::Send, &outputs, Entry::with_body("raw"), err).await;

        assert!(result.is_err());
        let received = fake.take_entries();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].body.as_str(), Some("raw"));
    }

    #[tokio::test]
    async fn drop_discards_and_returns_error() {
        let fake = Arc::new(FakeOutput::new());
        let outputs = OutputList::new();
        outputs.set(vec![fake.clone()]);

        let err = OperatorError::Parse {
            reason: "bad record".to_owned(),
        };
        let result =
            handle_parse_error("p", OnError::Drop, &outputs, Entry::with_body("raw"), err).await;

        assert!(result.is_err());
        assert!(fake.take_entries().is_empty());
    }
}

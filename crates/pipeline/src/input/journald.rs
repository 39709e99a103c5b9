//! journald 인풋 -- journalctl 자식 프로세스에서 저널 레코드를 수집
//!
//! `journalctl --utc --output=json --follow`를 자식 프로세스로 실행하고,
//! stdout의 줄 단위 JSON 레코드를 디코딩하여 엔트리로 변환합니다.
//! 각 레코드의 커서는 다운스트림 쓰기 전에 퍼시스터에 저장되므로
//! 재시작 시 `--after-cursor`로 이어서 수집합니다 (at-least-once).
//!
//! 자식 프로세스가 스스로 종료한다고 가정하지 않으며, `stop`이 유일한
//! 종료 수단입니다.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::{Duration, SystemTime};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use logpost_core::entry::{Entry, Severity, Value};
use logpost_core::error::{LogpostError, PipelineError};
use logpost_core::operator::{BoxFuture, BuildContext, Operator, OutputList};
use logpost_core::persister::Persister;

use crate::config::CommonConfig;
use crate::error::OperatorError;

/// 저널 커서가 저장되는 퍼시스터 키
pub const LAST_READ_CURSOR_KEY: &str = "lastReadCursor";

/// PRIORITY 값(0..=7) → 심각도
const SEVERITY_MAPPING: [Severity; 8] = [
    Severity::Fatal,
    Severity::Error3,
    Severity::Error2,
    Severity::Error,
    Severity::Warn,
    Severity::Info2,
    Severity::Info,
    Severity::Debug,
];

/// PRIORITY 값(0..=7) → 심각도 원문 표기
const SEVERITY_TEXT: [&str; 8] = [
    "emerg", "alert", "crit", "err", "warning", "notice", "info", "debug",
];

/// journald 인풋 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournaldConfig {
    /// 공통 설정 (id/output/on_error)
    #[serde(flatten)]
    pub common: CommonConfig,
    /// 저널 디렉토리. 지정되면 `files`보다 우선합니다.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// 개별 저널 파일 목록. `directory`가 없을 때 사용됩니다.
    #[serde(default)]
    pub files: Vec<PathBuf>,
    /// 수집 시작 위치 ("end" 또는 "beginning")
    #[serde(default = "default_start_at")]
    pub start_at: String,
    /// systemd 유닛 필터 (없으면 전체)
    #[serde(default)]
    pub units: Vec<String>,
    /// 최소 우선순위 필터 (journalctl --priority 값)
    #[serde(default = "default_priority")]
    pub priority: String,
    /// journalctl 실행 파일 경로 재지정 (기본: PATH의 journalctl)
    #[serde(default)]
    pub journalctl_path: Option<PathBuf>,
}

fn default_start_at() -> String {
    "end".to_owned()
}

fn default_priority() -> String {
    "info".to_owned()
}

impl Default for JournaldConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            directory: None,
            files: Vec::new(),
            start_at: default_start_at(),
            units: Vec::new(),
            priority: default_priority(),
            journalctl_path: None,
        }
    }
}

impl JournaldConfig {
    /// 설정을 검증하고 journald 인풋 오퍼레이터를 생성합니다.
    pub fn build(&self, ctx: &BuildContext) -> Result<Vec<Arc<dyn Operator>>, OperatorError> {
        // on_error는 공통 문서 필드이므로 인풋에서도 검증만 합니다
        self.common.on_error_policy()?;

        if self.start_at != "end" && self.start_at != "beginning" {
            return Err(OperatorError::Config {
                field: "start_at".to_owned(),
                reason: format!("'{}' is not one of 'end' or 'beginning'", self.start_at),
            });
        }

        let operator = JournaldInput {
            id: self.common.resolve_id(ctx, "journald_input"),
            output_ids: self.common.output.clone(),
            outputs: Arc::new(OutputList::new()),
            program: self
                .journalctl_path
                .clone()
                .unwrap_or_else(|| PathBuf::from("journalctl")),
            args: self.build_args(),
            cancel: CancellationToken::new(),
            reader_task: StdMutex::new(None),
        };
        Ok(vec![Arc::new(operator)])
    }

    /// journalctl 인자 목록을 조립합니다 (커서 제외).
    fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            // UTC 타임스탬프, JSON 출력, 팔로우 모드
            "--utc".to_owned(),
            "--output=json".to_owned(),
            "--follow".to_owned(),
        ];

        if self.start_at == "beginning" {
            args.push("--no-tail".to_owned());
        }

        for unit in &self.units {
            args.push("--unit".to_owned());
            args.push(unit.clone());
        }

        args.push("--priority".to_owned());
        args.push(self.priority.clone());

        if let Some(directory) = &self.directory {
            args.push("--directory".to_owned());
            args.push(directory.display().to_string());
        } else {
            for file in &self.files {
                args.push("--file".to_owned());
                args.push(file.display().to_string());
            }
        }

        args
    }
}

/// journald 인풋 오퍼레이터
///
/// 시작 후의 모든 가변 상태는 단일 리더 태스크가 소유하며, `stop`에서
/// 취소 토큰으로 태스크를 종료하고 조인합니다.
pub struct JournaldInput {
    id: String,
    output_ids: Vec<String>,
    outputs: Arc<OutputList>,
    program: PathBuf,
    args: Vec<String>,
    cancel: CancellationToken,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Operator for JournaldInput {
    fn id(&self) -> &str {
        &self.id
    }

    fn operator_type(&self) -> &str {
        "journald_input"
    }

    fn output_ids(&self) -> &[String] {
        &self.output_ids
    }

    fn set_outputs(&self, outputs: Vec<Arc<dyn Operator>>) {
        self.outputs.set(outputs);
    }

    fn start(&self, persister: Arc<dyn Persister>) -> BoxFuture<'_, Result<(), LogpostError>> {
        Box::pin(async move {
            // 저장된 커서가 있으면 그 위치부터 이어서 수집합니다
            let cursor = persister.get(LAST_READ_CURSOR_KEY).await.map_err(|e| {
                PipelineError::StartFailed(format!("failed to get journalctl state: {e}"))
            })?;

            let mut args = self.args.clone();
            if let Some(cursor) = cursor {
                args.push("--after-cursor".to_owned());
                args.push(String::from_utf8_lossy(&cursor).into_owned());
            }

            let mut child = Command::new(&self.program)
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    PipelineError::StartFailed(format!("start journalctl: {e}"))
                })?;

            let stdout = child.stdout.take().ok_or_else(|| {
                PipelineError::StartFailed("failed to get journalctl stdout".to_owned())
            })?;

            let id = self.id.clone();
            let outputs = Arc::clone(&self.outputs);
            let cancel = self.cancel.clone();
            let handle = tokio::spawn(async move {
                read_journal(&id, BufReader::new(stdout), persister, &outputs, cancel).await;
                // 리더가 끝나면 자식 프로세스도 종료시킵니다
                let _ = child.kill().await;
            });
            *self
                .reader_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(handle);
            Ok(())
        })
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), LogpostError>> {
        Box::pin(async move {
            self.cancel.cancel();
            let handle = self
                .reader_task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(handle) = handle {
                let _ = handle.await;
            }
            Ok(())
        })
    }
}

/// 자식 프로세스 stdout의 줄 단위 레코드를 읽어 엔트리로 전달합니다.
///
/// 파싱에 실패한 줄은 경고 로그를 남기고 건너뛰며, 그 줄의 커서는
/// 저장되지 않습니다. EOF는 조용히 종료하고, 그 외 읽기 에러는 로그를
/// 남기고 종료합니다.
async fn read_journal<R>(
    operator_id: &str,
    mut reader: R,
    persister: Arc<dyn Persister>,
    outputs: &OutputList,
    cancel: CancellationToken,
) where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        tokio::select! {
            _ = cancel.cancelled() => return,
            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) => return,
                    Ok(_) => {
                        let record = line.trim_end();
                        if record.is_empty() {
                            continue;
                        }
                        match parse_journal_line(record) {
                            Ok((entry, cursor)) => {
                                if let Err(e) = persister
                                    .set(LAST_READ_CURSOR_KEY, cursor.into_bytes())
                                    .await
                                {
                                    tracing::warn!(
                                        operator = operator_id,
                                        error = %e,
                                        "failed to persist journal cursor"
                                    );
                                }
                                outputs.write(entry).await;
                            }
                            Err(e) => {
                                tracing::warn!(
                                    operator = operator_id,
                                    error = %e,
                                    "failed to parse journal entry, skipping line"
                                );
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            operator = operator_id,
                            error = %e,
                            "error reading from journalctl stdout"
                        );
                        return;
                    }
                }
            }
        }
    }
}

/// JSON 저널 레코드 한 줄을 엔트리와 커서로 디코딩합니다.
fn parse_journal_line(line: &str) -> Result<(Entry, String), OperatorError> {
    let mut record: serde_json::Map<String, serde_json::Value> = serde_json::from_str(line)
        .map_err(|e| OperatorError::Parse {
            reason: format!("invalid journal record: {e}"),
        })?;

    let timestamp = record
        .remove("__REALTIME_TIMESTAMP")
        .ok_or_else(|| OperatorError::Parse {
            reason: "journal record missing __REALTIME_TIMESTAMP field".to_owned(),
        })?;
    let micros: u64 = timestamp
        .as_str()
        .ok_or_else(|| OperatorError::Parse {
            reason: "journal timestamp is not a string".to_owned(),
        })?
        .parse()
        .map_err(|e| OperatorError::Parse {
            reason: format!("parse timestamp: {e}"),
        })?;

    // 커서는 재개 위치로만 쓰고 속성으로도 남깁니다
    let cursor = record
        .get("__CURSOR")
        .ok_or_else(|| OperatorError::Parse {
            reason: "journal record missing __CURSOR field".to_owned(),
        })?
        .as_str()
        .ok_or_else(|| OperatorError::Parse {
            reason: "journal cursor is not a string".to_owned(),
        })?
        .to_owned();

    let message = record.remove("MESSAGE").ok_or_else(|| OperatorError::Parse {
        reason: "journal record missing MESSAGE field".to_owned(),
    })?;

    let mut entry = Entry::with_body(Value::from_json(message));
    entry.timestamp = SystemTime::UNIX_EPOCH + Duration::from_micros(micros);

    if let Some(priority) = record.remove("PRIORITY") {
        add_severity(&mut entry, &priority)?;
    }

    for (key, value) in &record {
        let converted = convert_field(value);
        if !converted.is_empty() {
            entry.add_attribute(key.clone(), converted);
        }
    }

    Ok((entry, cursor))
}

/// PRIORITY 값을 심각도로 변환하여 엔트리에 기록합니다.
fn add_severity(entry: &mut Entry, priority: &serde_json::Value) -> Result<(), OperatorError> {
    let index: usize = priority
        .as_str()
        .ok_or_else(|| OperatorError::Parse {
            reason: "journal priority is not a string".to_owned(),
        })?
        .parse()
        .map_err(|_| OperatorError::Parse {
            reason: "journal priority is not an integer".to_owned(),
        })?;

    if index >= SEVERITY_MAPPING.len() {
        return Err(OperatorError::Parse {
            reason: format!("invalid journal priority '{index}'"),
        });
    }

    entry.severity = SEVERITY_MAPPING[index];
    entry.severity_text = SEVERITY_TEXT[index].to_owned();
    Ok(())
}

/// 저널 필드 값을 속성 문자열로 정규화합니다.
///
/// 바이트 시퀀스는 표준 base64로 인코딩하고, null은 빈 문자열이 되어
/// 속성에서 제외됩니다. 그 외 값은 기본 텍스트 렌더링을 사용합니다.
fn convert_field(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Array(items) => match byte_array(items) {
            Some(bytes) => BASE64_STANDARD.encode(bytes),
            None => serde_json::to_string(items).unwrap_or_default(),
        },
        other @ serde_json::Value::Object(_) => {
            serde_json::to_string(other).unwrap_or_default()
        }
    }
}

/// 배열의 모든 원소가 0..=255 정수이면 바이트 벡터로 변환합니다.
fn byte_array(items: &[serde_json::Value]) -> Option<Vec<u8>> {
    if items.is_empty() {
        return None;
    }
    items
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeOutput;
    use logpost_core::persister::MemoryPersister;

    const SAMPLE_LINE: &str = r#"{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c1","MESSAGE":"hi","PRIORITY":"3","UNIT":"foo"}"#;

    // --- 레코드 디코딩 ---

    #[test]
    fn parse_complete_record() {
        let (entry, cursor) = parse_journal_line(SAMPLE_LINE).unwrap();

        assert_eq!(entry.body.as_str(), Some("hi"));
        assert_eq!(
            entry.timestamp,
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000)
        );
        assert_eq!(entry.severity, Severity::Error);
        assert_eq!(entry.severity_text, "err");
        assert_eq!(entry.attributes.get("UNIT").map(String::as_str), Some("foo"));
        assert_eq!(cursor, "c1");
    }

    #[test]
    fn timestamp_has_nanosecond_precision() {
        let (entry, _) = parse_journal_line(SAMPLE_LINE).unwrap();
        let nanos = entry
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        assert_eq!(nanos, 1_600_000_000_000_000_000);
    }

    #[test]
    fn cursor_remains_as_attribute() {
        let (entry, _) = parse_journal_line(SAMPLE_LINE).unwrap();
        assert_eq!(
            entry.attributes.get("__CURSOR").map(String::as_str),
            Some("c1")
        );
    }

    #[test]
    fn missing_message_fails() {
        let line = r#"{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c1"}"#;
        let err = parse_journal_line(line).unwrap_err();
        assert!(err.to_string().contains("MESSAGE"));
    }

    #[test]
    fn missing_cursor_fails() {
        let line = r#"{"__REALTIME_TIMESTAMP":"1600000000000000","MESSAGE":"hi"}"#;
        let err = parse_journal_line(line).unwrap_err();
        assert!(err.to_string().contains("__CURSOR"));
    }

    #[test]
    fn missing_timestamp_fails() {
        let line = r#"{"__CURSOR":"c1","MESSAGE":"hi"}"#;
        let err = parse_journal_line(line).unwrap_err();
        assert!(err.to_string().contains("__REALTIME_TIMESTAMP"));
    }

    #[test]
    fn non_string_timestamp_fails() {
        let line = r#"{"__REALTIME_TIMESTAMP":1600000000000000,"__CURSOR":"c1","MESSAGE":"hi"}"#;
        assert!(parse_journal_line(line).is_err());
    }

    #[test]
    fn non_numeric_timestamp_fails() {
        let line = r#"{"__REALTIME_TIMESTAMP":"soon","__CURSOR":"c1","MESSAGE":"hi"}"#;
        assert!(parse_journal_line(line).is_err());
    }

    #[test]
    fn invalid_json_fails() {
        assert!(parse_journal_line("not json").is_err());
    }

    #[test]
    fn priority_out_of_range_fails() {
        let line = r#"{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c1","MESSAGE":"hi","PRIORITY":"8"}"#;
        let err = parse_journal_line(line).unwrap_err();
        assert!(err.to_string().contains("invalid journal priority"));
    }

    #[test]
    fn non_numeric_priority_fails() {
        let line = r#"{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c1","MESSAGE":"hi","PRIORITY":"high"}"#;
        assert!(parse_journal_line(line).is_err());
    }

    #[test]
    fn missing_priority_leaves_default_severity() {
        let line = r#"{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c1","MESSAGE":"hi"}"#;
        let (entry, _) = parse_journal_line(line).unwrap();
        assert_eq!(entry.severity, Severity::Default);
        assert!(entry.severity_text.is_empty());
    }

    #[test]
    fn severity_table_is_complete() {
        let cases = [
            (0, Severity::Fatal, "emerg"),
            (1, Severity::Error3, "alert"),
            (2, Severity::Error2, "crit"),
            (3, Severity::Error, "err"),
            (4, Severity::Warn, "warning"),
            (5, Severity::Info2, "notice"),
            (6, Severity::Info, "info"),
            (7, Severity::Debug, "debug"),
        ];
        for (priority, severity, text) in cases {
            let line = format!(
                r#"{{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c1","MESSAGE":"hi","PRIORITY":"{priority}"}}"#
            );
            let (entry, _) = parse_journal_line(&line).unwrap();
            assert_eq!(entry.severity, severity);
            assert_eq!(entry.severity_text, text);
        }
    }

    // --- 필드 정규화 ---

    #[test]
    fn byte_array_field_is_base64_encoded() {
        let line = r#"{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c1","MESSAGE":"hi","BLOB":[104,105]}"#;
        let (entry, _) = parse_journal_line(line).unwrap();
        assert_eq!(
            entry.attributes.get("BLOB").map(String::as_str),
            Some("aGk=")
        );
    }

    #[test]
    fn null_field_is_dropped() {
        let line = r#"{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c1","MESSAGE":"hi","EMPTY":null}"#;
        let (entry, _) = parse_journal_line(line).unwrap();
        assert!(!entry.attributes.contains_key("EMPTY"));
    }

    #[test]
    fn numeric_field_is_stringified() {
        let line = r#"{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c1","MESSAGE":"hi","PID":1234}"#;
        let (entry, _) = parse_journal_line(line).unwrap();
        assert_eq!(entry.attributes.get("PID").map(String::as_str), Some("1234"));
    }

    #[test]
    fn priority_is_not_an_attribute() {
        let (entry, _) = parse_journal_line(SAMPLE_LINE).unwrap();
        assert!(!entry.attributes.contains_key("PRIORITY"));
    }

    #[test]
    fn byte_array_message_becomes_bytes_body() {
        let line = r#"{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c1","MESSAGE":[104,105]}"#;
        let (entry, _) = parse_journal_line(line).unwrap();
        assert_eq!(entry.body, Value::Bytes(bytes::Bytes::from_static(b"hi")));
    }

    // --- 인자 조립 ---

    #[test]
    fn default_args() {
        let config = JournaldConfig::default();
        assert_eq!(
            config.build_args(),
            vec!["--utc", "--output=json", "--follow", "--priority", "info"]
        );
    }

    #[test]
    fn beginning_adds_no_tail() {
        let config = JournaldConfig {
            start_at: "beginning".to_owned(),
            ..Default::default()
        };
        let args = config.build_args();
        assert!(args.contains(&"--no-tail".to_owned()));
    }

    #[test]
    fn units_and_priority_filters() {
        let config = JournaldConfig {
            units: vec!["sshd".to_owned(), "cron".to_owned()],
            priority: "warning".to_owned(),
            ..Default::default()
        };
        let args = config.build_args();
        assert_eq!(
            args,
            vec![
                "--utc",
                "--output=json",
                "--follow",
                "--unit",
                "sshd",
                "--unit",
                "cron",
                "--priority",
                "warning"
            ]
        );
    }

    #[test]
    fn directory_takes_precedence_over_files() {
        let config = JournaldConfig {
            directory: Some(PathBuf::from("/var/log/journal")),
            files: vec![PathBuf::from("/tmp/a.journal")],
            ..Default::default()
        };
        let args = config.build_args();
        assert!(args.contains(&"--directory".to_owned()));
        assert!(!args.contains(&"--file".to_owned()));
    }

    #[test]
    fn files_are_passed_individually() {
        let config = JournaldConfig {
            files: vec![
                PathBuf::from("/tmp/a.journal"),
                PathBuf::from("/tmp/b.journal"),
            ],
            ..Default::default()
        };
        let args = config.build_args();
        let file_count = args.iter().filter(|a| *a == "--file").count();
        assert_eq!(file_count, 2);
    }

    #[test]
    fn build_fails_on_invalid_start_at() {
        let config = JournaldConfig {
            start_at: "middle".to_owned(),
            ..Default::default()
        };
        let err = config.build(&BuildContext::default()).unwrap_err();
        assert!(err.to_string().contains("start_at"));
    }

    #[test]
    fn build_fails_on_invalid_on_error() {
        let mut config = JournaldConfig::default();
        config.common.on_error = "panic".to_owned();
        assert!(config.build(&BuildContext::default()).is_err());
    }

    #[test]
    fn config_deserializes_from_yaml() {
        let yaml = r#"
id: system_logs
output: [recombine]
start_at: beginning
units: [sshd]
priority: err
"#;
        let config: JournaldConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.common.id, "system_logs");
        assert_eq!(config.units, vec!["sshd"]);
        assert_eq!(config.priority, "err");
        assert!(config.build(&BuildContext::default()).is_ok());
    }

    // --- 리더 루프 ---

    #[tokio::test]
    async fn reader_persists_cursor_and_writes_entries() {
        let data = format!(
            "{}\n{}\n{}\n",
            r#"{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c1","MESSAGE":"first"}"#,
            r#"{"this line is not a journal record"#,
            r#"{"__REALTIME_TIMESTAMP":"1600000001000000","__CURSOR":"c2","MESSAGE":"second"}"#,
        );

        let persister: Arc<dyn Persister> = Arc::new(MemoryPersister::new());
        let fake = Arc::new(FakeOutput::new());
        let outputs = OutputList::new();
        outputs.set(vec![fake.clone()]);

        read_journal(
            "journald_input",
            BufReader::new(data.as_bytes()),
            persister.clone(),
            &outputs,
            CancellationToken::new(),
        )
        .await;

        let entries = fake.take_entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].body.as_str(), Some("first"));
        assert_eq!(entries[1].body.as_str(), Some("second"));

        // 마지막으로 성공한 줄의 커서가 저장되어 있습니다
        assert_eq!(
            persister.get(LAST_READ_CURSOR_KEY).await.unwrap(),
            Some(b"c2".to_vec())
        );
    }

    #[tokio::test]
    async fn skipped_line_does_not_advance_cursor() {
        // MESSAGE가 없는 줄은 건너뛰고 커서도 저장하지 않습니다
        let data = "{\"__REALTIME_TIMESTAMP\":\"1600000000000000\",\"__CURSOR\":\"c1\"}\n";

        let persister: Arc<dyn Persister> = Arc::new(MemoryPersister::new());
        let fake = Arc::new(FakeOutput::new());
        let outputs = OutputList::new();
        outputs.set(vec![fake.clone()]);

        read_journal(
            "journald_input",
            BufReader::new(data.as_bytes()),
            persister.clone(),
            &outputs,
            CancellationToken::new(),
        )
        .await;

        assert!(fake.take_entries().is_empty());
        assert!(persister.get(LAST_READ_CURSOR_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reader_stops_on_cancellation() {
        let (_writer, reader) = tokio::io::duplex(64);
        let persister: Arc<dyn Persister> = Arc::new(MemoryPersister::new());
        let outputs = Arc::new(OutputList::new());
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let task_outputs = Arc::clone(&outputs);
        let handle = tokio::spawn(async move {
            read_journal(
                "journald_input",
                BufReader::new(reader),
                persister,
                &task_outputs,
                task_cancel,
            )
            .await;
        });

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("reader task did not stop on cancellation")
            .unwrap();
    }

    // --- 오퍼레이터 생명주기 (가짜 journalctl 스크립트) ---

    #[cfg(unix)]
    mod subprocess {
        use super::*;
        use std::io::Write as _;
        use std::os::unix::fs::PermissionsExt;

        /// 인자를 MESSAGE로 되돌려주는 가짜 journalctl을 만듭니다.
        fn fake_journalctl(dir: &tempfile::TempDir) -> PathBuf {
            let path = dir.path().join("journalctl");
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "#!/bin/sh").unwrap();
            writeln!(
                file,
                r#"printf '{{"__REALTIME_TIMESTAMP":"1600000000000000","__CURSOR":"c-sub","MESSAGE":"%s"}}\n' "$*""#
            )
            .unwrap();
            writeln!(file, "sleep 30").unwrap();
            drop(file);
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        #[tokio::test]
        async fn start_reads_child_output_and_persists_cursor() {
            let dir = tempfile::tempdir().unwrap();
            let config = JournaldConfig {
                journalctl_path: Some(fake_journalctl(&dir)),
                ..Default::default()
            };
            let ops = config.build(&BuildContext::default()).unwrap();
            let operator = ops.into_iter().next().unwrap();

            let fake = Arc::new(FakeOutput::new());
            operator.set_outputs(vec![fake.clone()]);
            let persister = Arc::new(MemoryPersister::new());
            operator.start(persister.clone()).await.unwrap();

            let entry = fake.expect_entry(Duration::from_secs(5)).await.unwrap();
            let body = entry.body.as_str().unwrap().to_owned();
            assert!(body.contains("--utc"));
            assert!(body.contains("--follow"));

            operator.stop().await.unwrap();

            assert_eq!(
                persister.get(LAST_READ_CURSOR_KEY).await.unwrap(),
                Some(b"c-sub".to_vec())
            );
        }

        #[tokio::test]
        async fn persisted_cursor_is_passed_as_after_cursor() {
            let dir = tempfile::tempdir().unwrap();
            let config = JournaldConfig {
                journalctl_path: Some(fake_journalctl(&dir)),
                ..Default::default()
            };
            let ops = config.build(&BuildContext::default()).unwrap();
            let operator = ops.into_iter().next().unwrap();

            let fake = Arc::new(FakeOutput::new());
            operator.set_outputs(vec![fake.clone()]);

            let persister = Arc::new(MemoryPersister::new());
            persister
                .set(LAST_READ_CURSOR_KEY, b"resume-here".to_vec())
                .await
                .unwrap();

            operator.start(persister).await.unwrap();

            let entry = fake.expect_entry(Duration::from_secs(5)).await.unwrap();
            let body = entry.body.as_str().unwrap();
            assert!(body.contains("--after-cursor resume-here"));

            operator.stop().await.unwrap();
        }

        #[tokio::test]
        async fn start_fails_when_binary_is_missing() {
            let config = JournaldConfig {
                journalctl_path: Some(PathBuf::from("/nonexistent/journalctl")),
                ..Default::default()
            };
            let ops = config.build(&BuildContext::default()).unwrap();
            let operator = ops.into_iter().next().unwrap();

            let persister = Arc::new(MemoryPersister::new());
            let err = operator.start(persister).await.unwrap_err();
            assert!(err.to_string().contains("start journalctl"));
        }
    }
}

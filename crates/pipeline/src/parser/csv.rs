//! CSV 파서 -- 구분자 기반 레코드를 맵 본문으로 변환
//!
//! RFC 4180 스타일의 따옴표 처리(필드 감싸기, `""` 이스케이프)를
//! 지원하며, `lazy_quotes`를 켜면 따옴표 규칙을 느슨하게 적용합니다.
//! 헤더는 설정에 고정(`header`)하거나 엔트리 속성에서 동적으로
//! (`header_attribute`) 읽을 수 있습니다.
//!
//! 본문에 논리 행이 여러 개 있으면 마지막 행만 결과로 남습니다.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use logpost_core::entry::{Entry, Value};
use logpost_core::error::LogpostError;
use logpost_core::operator::{BoxFuture, BuildContext, Operator, OutputList};

use crate::config::{CommonConfig, OnError};
use crate::error::OperatorError;

/// CSV 파서 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvParserConfig {
    /// 공통 설정 (id/output/on_error)
    #[serde(flatten)]
    pub common: CommonConfig,
    /// 고정 헤더. `header_attribute`와 택일.
    #[serde(default)]
    pub header: Option<String>,
    /// 헤더를 읽을 속성 이름. `header`와 택일.
    #[serde(default)]
    pub header_attribute: Option<String>,
    /// 필드 구분자 (단일 문자)
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    /// 느슨한 따옴표 처리 허용 여부
    #[serde(default)]
    pub lazy_quotes: bool,
}

fn default_delimiter() -> String {
    ",".to_owned()
}

impl Default for CsvParserConfig {
    fn default() -> Self {
        Self {
            common: CommonConfig::default(),
            header: None,
            header_attribute: None,
            delimiter: default_delimiter(),
            lazy_quotes: false,
        }
    }
}

/// 헤더를 얻는 방법
enum HeaderSource {
    /// Build 시 고정된 헤더
    Static(Vec<String>),
    /// 엔트리 속성에서 매번 읽는 동적 헤더
    Attribute(String),
}

impl CsvParserConfig {
    /// 설정을 검증하고 CSV 파서 오퍼레이터를 생성합니다.
    pub fn build(&self, ctx: &BuildContext) -> Result<Vec<Arc<dyn Operator>>, OperatorError> {
        let on_error = self.common.on_error_policy()?;

        let mut delimiter_chars = self.delimiter.chars();
        let delimiter = match (delimiter_chars.next(), delimiter_chars.next()) {
            (Some(c), None) => c,
            _ => return Err(OperatorError::InvalidDelimiter(self.delimiter.clone())),
        };

        let header_source = match (&self.header, &self.header_attribute) {
            (Some(_), Some(_)) => {
                return Err(OperatorError::Config {
                    field: "header".to_owned(),
                    reason: "only one header parameter can be set: 'header' or 'header_attribute'"
                        .to_owned(),
                });
            }
            (None, None) => return Err(OperatorError::MissingArgument("header")),
            (Some(header), None) => {
                if !header.contains(delimiter) {
                    return Err(OperatorError::Config {
                        field: "header".to_owned(),
                        reason: "missing field delimiter in header".to_owned(),
                    });
                }
                HeaderSource::Static(
                    header.split(delimiter).map(ToOwned::to_owned).collect(),
                )
            }
            (None, Some(attribute)) => HeaderSource::Attribute(attribute.clone()),
        };

        let operator = CsvParser {
            id: self.common.resolve_id(ctx, "csv_parser"),
            output_ids: self.common.output.clone(),
            outputs: OutputList::new(),
            on_error,
            header_source,
            delimiter,
            lazy_quotes: self.lazy_quotes,
        };
        Ok(vec![Arc::new(operator)])
    }
}

/// CSV 파서 오퍼레이터
pub struct CsvParser {
    id: String,
    output_ids: Vec<String>,
    outputs: OutputList,
    on_error: OnError,
    header_source: HeaderSource,
    delimiter: char,
    lazy_quotes: bool,
}

impl CsvParser {
    /// 엔트리 본문을 파싱하여 새 맵 본문을 만듭니다.
    fn parse_entry(&self, entry: &Entry) -> Result<HashMap<String, Value>, OperatorError> {
        let headers: Vec<String> = match &self.header_source {
            HeaderSource::Static(headers) => headers.clone(),
            HeaderSource::Attribute(attribute) => {
                let header =
                    entry
                        .attributes
                        .get(attribute)
                        .ok_or_else(|| OperatorError::Parse {
                            reason: format!(
                                "failed to read dynamic header attribute '{attribute}'"
                            ),
                        })?;
                header.split(self.delimiter).map(ToOwned::to_owned).collect()
            }
        };

        let text = match &entry.body {
            Value::String(s) => s.clone(),
            Value::Bytes(b) => {
                String::from_utf8(b.to_vec()).map_err(|_| OperatorError::Parse {
                    reason: "body is not valid utf-8, cannot be parsed as csv".to_owned(),
                })?
            }
            other => {
                let type_name = match other {
                    Value::Null => "null",
                    Value::Map(_) => "map",
                    _ => "unknown",
                };
                return Err(OperatorError::Parse {
                    reason: format!("type '{type_name}' cannot be parsed as csv"),
                });
            }
        };

        let mut last_row = None;
        for (index, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            let line_number = index + 1;
            let fields = parse_record(line, self.delimiter, self.lazy_quotes, line_number)?;
            if fields.len() != headers.len() {
                return Err(OperatorError::Parse {
                    reason: format!("record on line {line_number}: wrong number of fields"),
                });
            }
            let row: HashMap<String, Value> = headers
                .iter()
                .cloned()
                .zip(fields.into_iter().map(Value::String))
                .collect();
            last_row = Some(row);
        }

        last_row.ok_or_else(|| OperatorError::Parse {
            reason: "no csv records found in body".to_owned(),
        })
    }
}

impl Operator for CsvParser {
    fn id(&self) -> &str {
        &self.id
    }

    fn operator_type(&self) -> &str {
        "csv_parser"
    }

    fn output_ids(&self) -> &[String] {
        &self.output_ids
    }

    fn set_outputs(&self, outputs: Vec<Arc<dyn Operator>>) {
        self.outputs.set(outputs);
    }

    fn process(&self, entry: Entry) -> BoxFuture<'_, Result<(), LogpostError>> {
        Box::pin(async move {
            match self.parse_entry(&entry) {
                Ok(row) => {
                    let mut entry = entry;
                    entry.body = Value::Map(row);
                    self.outputs.write(entry).await;
                    Ok(())
                }
                Err(e) => {
                    super::handle_parse_error(&self.id, self.on_error, &self.outputs, entry, e)
                        .await
                }
            }
        })
    }
}

/// CSV 레코드 한 줄을 필드 목록으로 디코딩합니다.
fn parse_record(
    line: &str,
    delimiter: char,
    lazy_quotes: bool,
    line_number: usize,
) -> Result<Vec<String>, OperatorError> {
    enum State {
        FieldStart,
        Unquoted,
        Quoted,
        QuoteInQuoted,
    }

    let mut fields = Vec::new();
    let mut field = String::new();
    let mut state = State::FieldStart;

    for (offset, c) in line.char_indices() {
        let column = offset + 1;
        match state {
            State::FieldStart => {
                if c == '"' {
                    state = State::Quoted;
                } else if c == delimiter {
                    fields.push(std::mem::take(&mut field));
                } else {
                    field.push(c);
                    state = State::Unquoted;
                }
            }
            State::Unquoted => {
                if c == delimiter {
                    fields.push(std::mem::take(&mut field));
                    state = State::FieldStart;
                } else if c == '"' && !lazy_quotes {
                    return Err(OperatorError::Parse {
                        reason: format!(
                            "parse error on line {line_number}, column {column}: bare \" in non-quoted-field"
                        ),
                    });
                } else {
                    field.push(c);
                }
            }
            State::Quoted => {
                if c == '"' {
                    state = State::QuoteInQuoted;
                } else {
                    field.push(c);
                }
            }
            State::QuoteInQuoted => {
                if c == '"' {
                    // ""는 따옴표 리터럴입니다
                    field.push('"');
                    state = State::Quoted;
                } else if c == delimiter {
                    fields.push(std::mem::take(&mut field));
                    state = State::FieldStart;
                } else if lazy_quotes {
                    field.push('"');
                    field.push(c);
                    state = State::Quoted;
                } else {
                    return Err(OperatorError::Parse {
                        reason: format!(
                            "parse error on line {line_number}, column {column}: extraneous or missing \" in quoted-field"
                        ),
                    });
                }
            }
        }
    }

    match state {
        State::Quoted if !lazy_quotes => Err(OperatorError::Parse {
            reason: format!(
                "parse error on line {line_number}: extraneous or missing \" in quoted-field"
            ),
        }),
        _ => {
            fields.push(field);
            Ok(fields)
        }
    }
}

//! 필드 경로 -- 엔트리 내부 위치에 대한 타입 안전 접근자
//!
//! [`Field`]는 엔트리의 본문, 속성, 리소스 중 한 위치를 가리키며
//! 읽기/쓰기/삭제 연산을 제공합니다. 설정 파일에서는
//! `"body.a.b"`, `"attributes.file.path"` 형태의 문자열로 표기합니다.
//!
//! 속성/리소스 키는 점(`.`)을 포함할 수 있으므로, 루트 세그먼트 이후의
//! 나머지 전체를 하나의 키로 취급합니다.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::entry::{Entry, Value};
use crate::error::FieldError;

/// 엔트리 내부 위치를 가리키는 필드 경로
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    /// 본문 또는 본문 맵 내부 경로. 빈 경로는 본문 전체를 가리킵니다.
    Body(Vec<String>),
    /// 속성 키
    Attribute(String),
    /// 리소스 키
    Resource(String),
}

impl Field {
    /// 본문 전체를 가리키는 필드를 생성합니다.
    pub fn body() -> Self {
        Self::Body(Vec::new())
    }

    /// 본문 맵 내부 경로를 가리키는 필드를 생성합니다.
    pub fn body_path<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Body(segments.into_iter().map(Into::into).collect())
    }

    /// 속성 키를 가리키는 필드를 생성합니다.
    pub fn attribute(key: impl Into<String>) -> Self {
        Self::Attribute(key.into())
    }

    /// 리소스 키를 가리키는 필드를 생성합니다.
    pub fn resource(key: impl Into<String>) -> Self {
        Self::Resource(key.into())
    }

    /// 필드가 가리키는 값을 읽습니다. 없으면 `None`입니다.
    pub fn read(&self, entry: &Entry) -> Option<Value> {
        match self {
            Self::Body(path) => {
                let mut current = &entry.body;
                for segment in path {
                    current = current.as_map()?.get(segment)?;
                }
                Some(current.clone())
            }
            Self::Attribute(key) => entry
                .attributes
                .get(key)
                .map(|v| Value::String(v.clone())),
            Self::Resource(key) => entry.resource.get(key).map(|v| Value::String(v.clone())),
        }
    }

    /// 필드가 가리키는 문자열 값을 읽습니다.
    ///
    /// 값이 없으면 [`FieldError::NotFound`], 문자열이 아니면
    /// [`FieldError::TypeMismatch`]를 반환합니다.
    pub fn read_string(&self, entry: &Entry) -> Result<String, FieldError> {
        let value = self.read(entry).ok_or_else(|| FieldError::NotFound {
            field: self.to_string(),
        })?;
        match value {
            Value::String(s) => Ok(s),
            other => Err(FieldError::TypeMismatch {
                field: self.to_string(),
                expected: "string",
                found: value_type_name(&other),
            }),
        }
    }

    /// 필드가 가리키는 위치에 값을 씁니다.
    ///
    /// 본문 경로의 중간 맵은 자동으로 생성됩니다. 경로 도중에 맵이 아닌
    /// 값을 만나면 [`FieldError::TypeMismatch`]를 반환합니다.
    /// 속성/리소스에는 문자열 값만 쓸 수 있습니다.
    pub fn set(&self, entry: &mut Entry, value: Value) -> Result<(), FieldError> {
        match self {
            Self::Body(path) => {
                let Some((last, intermediate)) = path.split_last() else {
                    entry.body = value;
                    return Ok(());
                };

                // 비어있는 본문은 맵으로 승격합니다
                if entry.body.is_null() {
                    entry.body = Value::Map(HashMap::new());
                }

                let mut current = match &mut entry.body {
                    Value::Map(m) => m,
                    other => {
                        return Err(FieldError::TypeMismatch {
                            field: self.to_string(),
                            expected: "map",
                            found: value_type_name(other),
                        });
                    }
                };

                for segment in intermediate {
                    let next = current
                        .entry(segment.clone())
                        .or_insert_with(|| Value::Map(HashMap::new()));
                    current = match next {
                        Value::Map(m) => m,
                        other => {
                            return Err(FieldError::TypeMismatch {
                                field: self.to_string(),
                                expected: "map",
                                found: value_type_name(other),
                            });
                        }
                    };
                }
                current.insert(last.clone(), value);
                Ok(())
            }
            Self::Attribute(key) => match value {
                Value::String(s) => {
                    entry.attributes.insert(key.clone(), s);
                    Ok(())
                }
                other => Err(FieldError::TypeMismatch {
                    field: self.to_string(),
                    expected: "string",
                    found: value_type_name(&other),
                }),
            },
            Self::Resource(key) => match value {
                Value::String(s) => {
                    entry.resource.insert(key.clone(), s);
                    Ok(())
                }
                other => Err(FieldError::TypeMismatch {
                    field: self.to_string(),
                    expected: "string",
                    found: value_type_name(&other),
                }),
            },
        }
    }

    /// 필드가 가리키는 값을 삭제하고 반환합니다. 없으면 `None`입니다.
    pub fn delete(&self, entry: &mut Entry) -> Option<Value> {
        match self {
            Self::Body(path) => {
                if path.is_empty() {
                    return Some(std::mem::take(&mut entry.body));
                }
                let (last, intermediate) = path.split_last()?;
                let mut current = match &mut entry.body {
                    Value::Map(m) => m,
                    _ => return None,
                };
                for segment in intermediate {
                    current = match current.get_mut(segment) {
                        Some(Value::Map(m)) => m,
                        _ => return None,
                    };
                }
                current.remove(last)
            }
            Self::Attribute(key) => entry.attributes.remove(key).map(Value::String),
            Self::Resource(key) => entry.resource.remove(key).map(Value::String),
        }
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::String(_) => "string",
        Value::Bytes(_) => "bytes",
        Value::Map(_) => "map",
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Body(path) if path.is_empty() => write!(f, "body"),
            Self::Body(path) => write!(f, "body.{}", path.join(".")),
            Self::Attribute(key) => write!(f, "attributes.{key}"),
            Self::Resource(key) => write!(f, "resource.{key}"),
        }
    }
}

impl FromStr for Field {
    type Err = FieldError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (root, rest) = match s.split_once('.') {
            Some((root, rest)) => (root, Some(rest)),
            None => (s, None),
        };

        match (root, rest) {
            ("body", None) => Ok(Self::body()),
            ("body", Some(rest)) => Ok(Self::Body(
                rest.split('.').map(ToOwned::to_owned).collect(),
            )),
            // 속성/리소스 키는 점을 포함할 수 있으므로 나머지 전체가 키입니다
            ("attributes", Some(key)) if !key.is_empty() => Ok(Self::attribute(key)),
            ("resource", Some(key)) if !key.is_empty() => Ok(Self::resource(key)),
            _ => Err(FieldError::InvalidPath { path: s.to_owned() }),
        }
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_with_map_body() -> Entry {
        let mut entry = Entry::new();
        Field::body_path(["outer", "inner"])
            .set(&mut entry, Value::String("deep".to_owned()))
            .unwrap();
        entry.add_attribute("file.path", "/var/log/app.log");
        entry.add_resource("host", "web-01");
        entry
    }

    #[test]
    fn read_whole_body() {
        let entry = Entry::with_body("line");
        assert_eq!(
            Field::body().read(&entry),
            Some(Value::String("line".to_owned()))
        );
    }

    #[test]
    fn read_nested_body_path() {
        let entry = entry_with_map_body();
        let value = Field::body_path(["outer", "inner"]).read(&entry);
        assert_eq!(value, Some(Value::String("deep".to_owned())));
    }

    #[test]
    fn read_missing_path_returns_none() {
        let entry = entry_with_map_body();
        assert!(Field::body_path(["outer", "missing"]).read(&entry).is_none());
        assert!(Field::body_path(["nope"]).read(&entry).is_none());
    }

    #[test]
    fn read_attribute_with_dotted_key() {
        let entry = entry_with_map_body();
        assert_eq!(
            Field::attribute("file.path").read_string(&entry).unwrap(),
            "/var/log/app.log"
        );
    }

    #[test]
    fn read_string_on_missing_field_fails() {
        let entry = Entry::new();
        let err = Field::attribute("nope").read_string(&entry).unwrap_err();
        assert!(matches!(err, FieldError::NotFound { .. }));
    }

    #[test]
    fn read_string_on_map_value_fails_with_type_error() {
        let entry = entry_with_map_body();
        let err = Field::body_path(["outer"]).read_string(&entry).unwrap_err();
        assert!(matches!(err, FieldError::TypeMismatch { .. }));
    }

    #[test]
    fn set_creates_intermediate_maps() {
        let mut entry = Entry::new();
        Field::body_path(["a", "b", "c"])
            .set(&mut entry, Value::String("v".to_owned()))
            .unwrap();
        assert_eq!(
            Field::body_path(["a", "b", "c"]).read(&entry),
            Some(Value::String("v".to_owned()))
        );
    }

    #[test]
    fn set_through_non_map_segment_fails() {
        let mut entry = Entry::new();
        Field::body_path(["a"])
            .set(&mut entry, Value::String("scalar".to_owned()))
            .unwrap();
        let err = Field::body_path(["a", "b"])
            .set(&mut entry, Value::String("v".to_owned()))
            .unwrap_err();
        assert!(matches!(err, FieldError::TypeMismatch { .. }));
    }

    #[test]
    fn set_path_on_string_body_fails() {
        let mut entry = Entry::with_body("plain");
        let err = Field::body_path(["a"])
            .set(&mut entry, Value::String("v".to_owned()))
            .unwrap_err();
        assert!(matches!(err, FieldError::TypeMismatch { .. }));
    }

    #[test]
    fn set_whole_body_replaces() {
        let mut entry = Entry::with_body("old");
        Field::body()
            .set(&mut entry, Value::String("new".to_owned()))
            .unwrap();
        assert_eq!(entry.body.as_str(), Some("new"));
    }

    #[test]
    fn set_attribute_requires_string() {
        let mut entry = Entry::new();
        let err = Field::attribute("k")
            .set(&mut entry, Value::Map(HashMap::new()))
            .unwrap_err();
        assert!(matches!(err, FieldError::TypeMismatch { .. }));
    }

    #[test]
    fn delete_removes_and_returns_value() {
        let mut entry = entry_with_map_body();
        let removed = Field::body_path(["outer", "inner"]).delete(&mut entry);
        assert_eq!(removed, Some(Value::String("deep".to_owned())));
        assert!(Field::body_path(["outer", "inner"]).read(&entry).is_none());
    }

    #[test]
    fn delete_whole_body_leaves_null() {
        let mut entry = Entry::with_body("line");
        let removed = Field::body().delete(&mut entry);
        assert_eq!(removed, Some(Value::String("line".to_owned())));
        assert!(entry.body.is_null());
    }

    #[test]
    fn delete_missing_returns_none() {
        let mut entry = Entry::new();
        assert!(Field::attribute("nope").delete(&mut entry).is_none());
    }

    #[test]
    fn parse_field_strings() {
        assert_eq!("body".parse::<Field>().unwrap(), Field::body());
        assert_eq!(
            "body.a.b".parse::<Field>().unwrap(),
            Field::body_path(["a", "b"])
        );
        assert_eq!(
            "attributes.file.path".parse::<Field>().unwrap(),
            Field::attribute("file.path")
        );
        assert_eq!(
            "resource.host".parse::<Field>().unwrap(),
            Field::resource("host")
        );
    }

    #[test]
    fn parse_invalid_field_fails() {
        assert!("".parse::<Field>().is_err());
        assert!("attributes".parse::<Field>().is_err());
        assert!("resource.".parse::<Field>().is_err());
        assert!("severity".parse::<Field>().is_err());
    }

    #[test]
    fn display_roundtrip() {
        for s in ["body", "body.a.b", "attributes.file.path", "resource.host"] {
            let field: Field = s.parse().unwrap();
            assert_eq!(field.to_string(), s);
        }
    }

    #[test]
    fn deserialize_from_yaml_string() {
        let field: Field = serde_json::from_str("\"attributes.log.source\"").unwrap();
        assert_eq!(field, Field::attribute("log.source"));
    }
}

//! 불리언 술어 표현식 -- 컴파일과 평가
//!
//! 리컴바인 트랜스포머의 `is_first_entry`/`is_last_entry` 술어를
//! Build 시점에 컴파일하고, 엔트리마다 실행합니다.
//!
//! # 표현식 문법
//! ```text
//! $body matches "^Exception"
//! $attributes.log.source == 'app' and not ($body startsWith "\t")
//! body contains "panic" || $resource.host != nil
//! ```
//!
//! - 피연산자: `$body`(중첩 경로 가능), `$attributes.<key>`,
//!   `$resource.<key>`, 문자열 리터럴, `true`/`false`/`nil`.
//!   `$` 접두사는 생략할 수 있습니다.
//! - 연산자: `==` `!=` `matches`(정규식) `contains` `startsWith`
//!   `endsWith` `not`/`!` `and`/`&&` `or`/`||` 및 괄호.
//! - 정의되지 않은 식별자는 absent로 평가되며 실패하지 않습니다.
//! - `matches`의 정규식은 컴파일 시 한 번만 컴파일됩니다.
//! - 최종 결과는 불리언이어야 하며, 아니면 평가가 실패합니다.
//!
//! 평가 환경([`Env`])은 오퍼레이터 인스턴스별 [`EnvPool`]에서 재사용됩니다.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use regex::Regex;

use logpost_core::entry::{Entry, Value};

/// 표현식 컴파일/평가 에러
#[derive(Debug, thiserror::Error)]
pub enum ExprError {
    /// 토큰화/구문 분석 실패
    #[error("parse error at offset {offset}: {reason}")]
    Parse {
        /// 실패 위치 (바이트 오프셋)
        offset: usize,
        /// 실패 사유
        reason: String,
    },

    /// `matches` 정규식 컴파일 실패
    #[error("invalid regex '{pattern}': {reason}")]
    Regex {
        /// 정규식 패턴
        pattern: String,
        /// 컴파일 실패 사유
        reason: String,
    },

    /// 표현식 결과가 불리언이 아님
    #[error("expression result is not a boolean")]
    NotBoolean,
}

// --- 토큰화 ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Eq,
    Ne,
    Not,
    And,
    Or,
    LParen,
    RParen,
}

/// 식별자를 이어갈 수 있는 문자인지 확인합니다.
///
/// 속성 키는 유니코드 문자를 포함할 수 있으므로 `char` 단위로 판단합니다.
fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '$' | '.' | '-' | '/')
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {}
            '(' => tokens.push((Token::LParen, offset)),
            ')' => tokens.push((Token::RParen, offset)),
            '=' => {
                if chars.next_if(|&(_, next)| next == '=').is_some() {
                    tokens.push((Token::Eq, offset));
                } else {
                    return Err(ExprError::Parse {
                        offset,
                        reason: "expected '=='".to_owned(),
                    });
                }
            }
            '!' => {
                if chars.next_if(|&(_, next)| next == '=').is_some() {
                    tokens.push((Token::Ne, offset));
                } else {
                    tokens.push((Token::Not, offset));
                }
            }
            '&' => {
                if chars.next_if(|&(_, next)| next == '&').is_some() {
                    tokens.push((Token::And, offset));
                } else {
                    return Err(ExprError::Parse {
                        offset,
                        reason: "expected '&&'".to_owned(),
                    });
                }
            }
            '|' => {
                if chars.next_if(|&(_, next)| next == '|').is_some() {
                    tokens.push((Token::Or, offset));
                } else {
                    return Err(ExprError::Parse {
                        offset,
                        reason: "expected '||'".to_owned(),
                    });
                }
            }
            '"' | '\'' => {
                let quote = c;
                let mut literal = String::new();
                let mut closed = false;
                while let Some((escape_offset, next)) = chars.next() {
                    if next == quote {
                        closed = true;
                        break;
                    }
                    if next == '\\' {
                        // 이스케이프: 다음 문자를 그대로 취합니다
                        match chars.next() {
                            Some((_, escaped)) => {
                                let unescaped = match escaped {
                                    'n' => '\n',
                                    't' => '\t',
                                    other => other,
                                };
                                literal.push(unescaped);
                            }
                            None => {
                                return Err(ExprError::Parse {
                                    offset: escape_offset,
                                    reason: "unterminated escape sequence".to_owned(),
                                });
                            }
                        }
                    } else {
                        literal.push(next);
                    }
                }
                if !closed {
                    return Err(ExprError::Parse {
                        offset,
                        reason: "unterminated string literal".to_owned(),
                    });
                }
                tokens.push((Token::Str(literal), offset));
            }
            c if c.is_alphanumeric() || c == '_' || c == '$' => {
                let mut end = offset + c.len_utf8();
                while let Some(&(next_offset, next)) = chars.peek() {
                    if is_ident_continue(next) {
                        end = next_offset + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &source[offset..end];
                let token = match word {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word.to_owned()),
                };
                tokens.push((token, offset));
            }
            other => {
                return Err(ExprError::Parse {
                    offset,
                    reason: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    Ok(tokens)
}

// --- 구문 트리 ---

/// 엔트리에서 값을 읽는 위치
#[derive(Debug, Clone, PartialEq)]
enum FieldRef {
    Body(Vec<String>),
    Attribute(String),
    Resource(String),
    /// 알 수 없는 식별자 -- 항상 absent로 평가됩니다
    Undefined,
}

#[derive(Debug)]
enum Ast {
    Str(String),
    Bool(bool),
    Nil,
    Field(FieldRef),
    Not(Box<Ast>),
    And(Box<Ast>, Box<Ast>),
    Or(Box<Ast>, Box<Ast>),
    Eq(Box<Ast>, Box<Ast>),
    Ne(Box<Ast>, Box<Ast>),
    Contains(Box<Ast>, Box<Ast>),
    StartsWith(Box<Ast>, Box<Ast>),
    EndsWith(Box<Ast>, Box<Ast>),
    Matches(Box<Ast>, Regex),
}

fn ident_to_ast(word: &str) -> Ast {
    match word {
        "true" => return Ast::Bool(true),
        "false" => return Ast::Bool(false),
        "nil" => return Ast::Nil,
        _ => {}
    }

    let path = word.strip_prefix('$').unwrap_or(word);
    let (root, rest) = match path.split_once('.') {
        Some((root, rest)) => (root, Some(rest)),
        None => (path, None),
    };

    let field = match (root, rest) {
        ("body", None) => FieldRef::Body(Vec::new()),
        ("body", Some(rest)) => {
            FieldRef::Body(rest.split('.').map(ToOwned::to_owned).collect())
        }
        ("attributes", Some(key)) if !key.is_empty() => FieldRef::Attribute(key.to_owned()),
        ("resource", Some(key)) if !key.is_empty() => FieldRef::Resource(key.to_owned()),
        _ => FieldRef::Undefined,
    };
    Ast::Field(field)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn new(tokens: Vec<(Token, usize)>, len: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            len,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens
            .get(self.pos)
            .map(|(_, o)| *o)
            .unwrap_or(self.len)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn parse_expr(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            lhs = Ast::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Ast, ExprError> {
        let mut lhs = self.parse_not()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_not()?;
            lhs = Ast::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Ast, ExprError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            let inner = self.parse_not()?;
            return Ok(Ast::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Ast, ExprError> {
        let lhs = self.parse_primary()?;

        let op = match self.peek() {
            Some(Token::Eq) => "==",
            Some(Token::Ne) => "!=",
            Some(Token::Ident(word))
                if matches!(
                    word.as_str(),
                    "matches" | "contains" | "startsWith" | "endsWith"
                ) =>
            {
                // 식별자 토큰이 중위 연산자로 쓰인 경우
                match word.as_str() {
                    "matches" => "matches",
                    "contains" => "contains",
                    "startsWith" => "startsWith",
                    _ => "endsWith",
                }
            }
            _ => return Ok(lhs),
        };
        self.advance();

        if op == "matches" {
            let offset = self.offset();
            match self.advance() {
                Some(Token::Str(pattern)) => {
                    let regex = Regex::new(&pattern).map_err(|e| ExprError::Regex {
                        pattern,
                        reason: e.to_string(),
                    })?;
                    return Ok(Ast::Matches(Box::new(lhs), regex));
                }
                _ => {
                    return Err(ExprError::Parse {
                        offset,
                        reason: "matches requires a string literal pattern".to_owned(),
                    });
                }
            }
        }

        let rhs = self.parse_primary()?;
        let node = match op {
            "==" => Ast::Eq(Box::new(lhs), Box::new(rhs)),
            "!=" => Ast::Ne(Box::new(lhs), Box::new(rhs)),
            "contains" => Ast::Contains(Box::new(lhs), Box::new(rhs)),
            "startsWith" => Ast::StartsWith(Box::new(lhs), Box::new(rhs)),
            _ => Ast::EndsWith(Box::new(lhs), Box::new(rhs)),
        };
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Ast, ExprError> {
        let offset = self.offset();
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(ExprError::Parse {
                        offset,
                        reason: "missing closing parenthesis".to_owned(),
                    }),
                }
            }
            Some(Token::Str(s)) => Ok(Ast::Str(s)),
            Some(Token::Ident(word)) => Ok(ident_to_ast(&word)),
            Some(token) => Err(ExprError::Parse {
                offset,
                reason: format!("unexpected token {token:?}"),
            }),
            None => Err(ExprError::Parse {
                offset,
                reason: "unexpected end of expression".to_owned(),
            }),
        }
    }
}

// --- 평가 ---

/// 평가 중간 값
#[derive(Debug, Clone, Copy, PartialEq)]
enum EvalValue<'a> {
    /// 값 없음 (정의되지 않은 식별자, 누락 필드, nil)
    Absent,
    Bool(bool),
    Str(&'a str),
}

impl<'a> EvalValue<'a> {
    fn as_str(&self) -> Option<&'a str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

fn values_equal(lhs: EvalValue<'_>, rhs: EvalValue<'_>) -> bool {
    match (lhs, rhs) {
        (EvalValue::Str(a), EvalValue::Str(b)) => a == b,
        (EvalValue::Bool(a), EvalValue::Bool(b)) => a == b,
        (EvalValue::Absent, EvalValue::Absent) => true,
        _ => false,
    }
}

/// 컴파일된 술어 프로그램
///
/// Build 시 한 번 컴파일되어 엔트리마다 재실행됩니다. 평가는 엔트리에
/// 대해 읽기 전용입니다.
#[derive(Debug)]
pub struct Program {
    ast: Ast,
    source: String,
}

impl Program {
    /// 표현식 문자열을 컴파일합니다.
    pub fn compile(source: &str) -> Result<Self, ExprError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExprError::Parse {
                offset: 0,
                reason: "empty expression".to_owned(),
            });
        }
        let mut parser = Parser::new(tokens, source.len());
        let ast = parser.parse_expr()?;
        if parser.pos != parser.tokens.len() {
            return Err(ExprError::Parse {
                offset: parser.offset(),
                reason: "trailing tokens after expression".to_owned(),
            });
        }
        Ok(Self {
            ast,
            source: source.to_owned(),
        })
    }

    /// 컴파일에 사용된 원본 표현식을 반환합니다.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// 환경에 대해 프로그램을 실행하고 불리언 결과를 반환합니다.
    ///
    /// 결과가 불리언이 아니면 [`ExprError::NotBoolean`]을 반환합니다.
    pub fn run_bool(&self, env: &Env) -> Result<bool, ExprError> {
        match eval(&self.ast, env) {
            EvalValue::Bool(b) => Ok(b),
            _ => Err(ExprError::NotBoolean),
        }
    }
}

fn eval<'a>(ast: &'a Ast, env: &'a Env) -> EvalValue<'a> {
    match ast {
        Ast::Str(s) => EvalValue::Str(s),
        Ast::Bool(b) => EvalValue::Bool(*b),
        Ast::Nil => EvalValue::Absent,
        Ast::Field(field) => env.lookup(field),
        Ast::Not(inner) => match eval(inner, env) {
            EvalValue::Bool(b) => EvalValue::Bool(!b),
            // 불리언이 아닌 값의 부정은 absent 여부로 해석합니다
            EvalValue::Absent => EvalValue::Bool(true),
            EvalValue::Str(_) => EvalValue::Bool(false),
        },
        Ast::And(lhs, rhs) => {
            let l = matches!(eval(lhs, env), EvalValue::Bool(true));
            if !l {
                return EvalValue::Bool(false);
            }
            EvalValue::Bool(matches!(eval(rhs, env), EvalValue::Bool(true)))
        }
        Ast::Or(lhs, rhs) => {
            let l = matches!(eval(lhs, env), EvalValue::Bool(true));
            if l {
                return EvalValue::Bool(true);
            }
            EvalValue::Bool(matches!(eval(rhs, env), EvalValue::Bool(true)))
        }
        Ast::Eq(lhs, rhs) => EvalValue::Bool(values_equal(eval(lhs, env), eval(rhs, env))),
        Ast::Ne(lhs, rhs) => EvalValue::Bool(!values_equal(eval(lhs, env), eval(rhs, env))),
        Ast::Contains(lhs, rhs) => {
            string_op(eval(lhs, env), eval(rhs, env), |a, b| a.contains(b))
        }
        Ast::StartsWith(lhs, rhs) => {
            string_op(eval(lhs, env), eval(rhs, env), |a, b| a.starts_with(b))
        }
        Ast::EndsWith(lhs, rhs) => {
            string_op(eval(lhs, env), eval(rhs, env), |a, b| a.ends_with(b))
        }
        Ast::Matches(operand, regex) => {
            let result = eval(operand, env)
                .as_str()
                .is_some_and(|s| regex.is_match(s));
            EvalValue::Bool(result)
        }
    }
}

fn string_op<'a>(
    lhs: EvalValue<'a>,
    rhs: EvalValue<'a>,
    op: impl Fn(&str, &str) -> bool,
) -> EvalValue<'a> {
    match (lhs.as_str(), rhs.as_str()) {
        (Some(a), Some(b)) => EvalValue::Bool(op(a, b)),
        // absent 피연산자에 대한 문자열 연산은 항상 거짓입니다
        _ => EvalValue::Bool(false),
    }
}

// --- 평가 환경 ---

/// 엔트리에서 채워지는 평가 환경
///
/// 문자열 본문, 맵 본문의 문자열 리프(점 표기로 평탄화), 속성/리소스
/// 사본을 담습니다. [`EnvPool`]에서 재사용됩니다.
#[derive(Debug, Default)]
pub struct Env {
    body: Option<String>,
    body_fields: HashMap<String, String>,
    attributes: HashMap<String, String>,
    resource: HashMap<String, String>,
}

impl Env {
    fn fill(&mut self, entry: &Entry) {
        self.clear();
        match &entry.body {
            Value::String(s) => self.body = Some(s.clone()),
            Value::Map(map) => flatten_string_leaves(map, "", &mut self.body_fields),
            Value::Bytes(_) | Value::Null => {}
        }
        for (k, v) in &entry.attributes {
            self.attributes.insert(k.clone(), v.clone());
        }
        for (k, v) in &entry.resource {
            self.resource.insert(k.clone(), v.clone());
        }
    }

    fn clear(&mut self) {
        self.body = None;
        self.body_fields.clear();
        self.attributes.clear();
        self.resource.clear();
    }

    fn lookup(&self, field: &FieldRef) -> EvalValue<'_> {
        let value = match field {
            FieldRef::Body(path) if path.is_empty() => self.body.as_deref(),
            FieldRef::Body(path) => self.body_fields.get(&path.join(".")).map(String::as_str),
            FieldRef::Attribute(key) => self.attributes.get(key).map(String::as_str),
            FieldRef::Resource(key) => self.resource.get(key).map(String::as_str),
            FieldRef::Undefined => None,
        };
        match value {
            Some(s) => EvalValue::Str(s),
            None => EvalValue::Absent,
        }
    }
}

fn flatten_string_leaves(
    map: &HashMap<String, Value>,
    prefix: &str,
    out: &mut HashMap<String, String>,
) {
    for (key, value) in map {
        let name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::String(s) => {
                out.insert(name, s.clone());
            }
            Value::Map(inner) => flatten_string_leaves(inner, &name, out),
            Value::Bytes(_) | Value::Null => {}
        }
    }
}

/// 오퍼레이터 인스턴스별 평가 환경 풀
///
/// 평가 전에 [`EnvPool::acquire`]로 환경을 얻고, 평가 후
/// [`EnvPool::release`]로 반납합니다. 반납된 환경의 할당은 재사용됩니다.
#[derive(Default)]
pub struct EnvPool {
    pool: Mutex<Vec<Env>>,
}

/// 풀에 보관하는 최대 환경 수
const MAX_POOLED_ENVS: usize = 8;

impl EnvPool {
    /// 빈 풀을 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 엔트리로 채워진 환경을 얻습니다.
    pub fn acquire(&self, entry: &Entry) -> Env {
        let mut env = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_default();
        env.fill(entry);
        env
    }

    /// 환경을 비우고 풀에 반납합니다.
    pub fn release(&self, mut env: Env) {
        env.clear();
        let mut pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
        if pool.len() < MAX_POOLED_ENVS {
            pool.push(env);
        }
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

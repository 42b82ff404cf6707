//! Value parser: strict and partial decoding of streamed JSON payloads.
//!
//! `parse_final` is plain strict deserialization. `parse_partial` repairs a
//! truncated JSON prefix into a well-formed document and deserializes it into
//! the type's partial projection, whose fields are all optional.

use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A schema-shaped value that can be streamed.
///
/// `Partial` is the projection observed while the payload is still arriving:
/// every field optional, so any well-formed prefix decodes.
pub trait Generable:
    Serialize + DeserializeOwned + Clone + fmt::Debug + PartialEq + Send + Sync + 'static
{
    type Partial: Serialize
        + DeserializeOwned
        + Clone
        + fmt::Debug
        + PartialEq
        + Default
        + Send
        + Sync
        + 'static;

    /// Degrades a complete value to its partial projection.
    fn to_partial(&self) -> Self::Partial;
}

impl Generable for String {
    type Partial = String;

    fn to_partial(&self) -> String {
        self.clone()
    }
}

impl Generable for Value {
    type Partial = Value;

    fn to_partial(&self) -> Value {
        self.clone()
    }
}

/// Failure to decode a raw payload under either rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueError {
    pub message: String,
}

impl ValueError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValueError {}

impl From<serde_json::Error> for ValueError {
    fn from(err: serde_json::Error) -> Self {
        ValueError::new(err.to_string())
    }
}

/// Strictly decodes a complete payload.
pub fn parse_final<T: DeserializeOwned>(raw: &str) -> Result<T, ValueError> {
    if raw.trim().is_empty() {
        return Err(ValueError::new("empty payload"));
    }
    Ok(serde_json::from_str(raw)?)
}

/// Decodes a possibly truncated payload into the partial projection.
pub fn parse_partial<T: Generable>(raw: &str) -> Result<T::Partial, ValueError> {
    let repaired =
        repair_json(raw).ok_or_else(|| ValueError::new("payload has no decodable prefix"))?;
    Ok(serde_json::from_str(&repaired)?)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Container {
    Object,
    Array,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Expect {
    Key,
    Colon,
    Value,
    Comma,
}

#[derive(Debug)]
struct Frame {
    container: Container,
    expect: Expect,
    /// Output length where the member currently being parsed began.
    member_start: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Escape {
    None,
    Backslash,
    Unicode(u8),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Token {
    None,
    Str { key: bool, escape: Escape },
    Number,
    Literal { start: usize },
}

struct Repair {
    out: String,
    stack: Vec<Frame>,
    token: Token,
    root_done: bool,
}

impl Repair {
    fn value_done(&mut self) {
        match self.stack.last_mut() {
            Some(frame) => frame.expect = Expect::Comma,
            None => self.root_done = true,
        }
    }

    fn expects_value(&self) -> bool {
        match self.stack.last() {
            Some(frame) => frame.expect == Expect::Value,
            None => !self.root_done,
        }
    }

    fn end_literal(&mut self, start: usize) -> Option<()> {
        if !matches!(&self.out[start..], "true" | "false" | "null") {
            return None;
        }
        self.token = Token::None;
        self.value_done();
        Some(())
    }

    fn structural(&mut self, ch: char) -> Option<()> {
        if ch.is_whitespace() {
            self.out.push(ch);
            return Some(());
        }
        if self.root_done {
            return None;
        }
        if self.expects_value() {
            match ch {
                '{' | '[' => {
                    self.out.push(ch);
                    let (container, expect) = if ch == '{' {
                        (Container::Object, Expect::Key)
                    } else {
                        (Container::Array, Expect::Value)
                    };
                    self.stack.push(Frame {
                        container,
                        expect,
                        member_start: self.out.len(),
                    });
                }
                '"' => {
                    self.out.push(ch);
                    self.token = Token::Str {
                        key: false,
                        escape: Escape::None,
                    };
                }
                '-' | '0'..='9' => {
                    self.out.push(ch);
                    self.token = Token::Number;
                }
                't' | 'f' | 'n' => {
                    self.token = Token::Literal {
                        start: self.out.len(),
                    };
                    self.out.push(ch);
                }
                ']' => self.close(Container::Array)?,
                _ => return None,
            }
            return Some(());
        }

        let frame = self.stack.last_mut()?;
        match (frame.expect, ch) {
            (Expect::Key, '"') => {
                self.out.push(ch);
                self.token = Token::Str {
                    key: true,
                    escape: Escape::None,
                };
            }
            (Expect::Key, '}') => self.close(Container::Object)?,
            (Expect::Colon, ':') => {
                self.out.push(ch);
                frame.expect = Expect::Value;
            }
            (Expect::Comma, ',') => {
                self.out.push(ch);
                frame.expect = match frame.container {
                    Container::Object => Expect::Key,
                    Container::Array => Expect::Value,
                };
                frame.member_start = self.out.len();
            }
            (Expect::Comma, '}') => self.close(Container::Object)?,
            (Expect::Comma, ']') => self.close(Container::Array)?,
            _ => return None,
        }
        Some(())
    }

    fn close(&mut self, container: Container) -> Option<()> {
        let frame = self.stack.pop()?;
        if frame.container != container {
            return None;
        }
        self.out.push(match container {
            Container::Object => '}',
            Container::Array => ']',
        });
        self.value_done();
        Some(())
    }

    fn step(&mut self, ch: char) -> Option<()> {
        match self.token {
            Token::Str { key, escape } => {
                self.out.push(ch);
                let escape = match escape {
                    Escape::Backslash if ch == 'u' => Escape::Unicode(4),
                    Escape::Backslash => Escape::None,
                    Escape::Unicode(left) => {
                        if !ch.is_ascii_hexdigit() {
                            return None;
                        }
                        if left > 1 {
                            Escape::Unicode(left - 1)
                        } else {
                            Escape::None
                        }
                    }
                    Escape::None if ch == '\\' => Escape::Backslash,
                    Escape::None if ch == '"' => {
                        self.token = Token::None;
                        if key {
                            if let Some(frame) = self.stack.last_mut() {
                                frame.expect = Expect::Colon;
                            }
                        } else {
                            self.value_done();
                        }
                        return Some(());
                    }
                    Escape::None => Escape::None,
                };
                self.token = Token::Str { key, escape };
                Some(())
            }
            Token::Number => {
                if ch.is_ascii_digit() || matches!(ch, '+' | '-' | '.' | 'e' | 'E') {
                    self.out.push(ch);
                    return Some(());
                }
                self.token = Token::None;
                self.value_done();
                self.structural(ch)
            }
            Token::Literal { start } => {
                if ch.is_ascii_alphabetic() {
                    self.out.push(ch);
                    return Some(());
                }
                self.end_literal(start)?;
                self.structural(ch)
            }
            Token::None => self.structural(ch),
        }
    }

    /// Rolls back the innermost unfinished member, then closes every frame.
    fn finish(mut self) -> Option<String> {
        let token = self.token;
        match token {
            Token::None => {}
            Token::Str { key: false, escape } => {
                let drop = match escape {
                    Escape::None => 0,
                    Escape::Backslash => 1,
                    Escape::Unicode(left) => 2 + (4 - left as usize),
                };
                let keep = self.out.len() - drop;
                self.out.truncate(keep);
                self.out.push('"');
                self.value_done();
            }
            Token::Number if self.out.ends_with(|c: char| c.is_ascii_digit()) => {
                self.value_done();
            }
            Token::Literal { start } if self.end_literal(start).is_some() => {}
            Token::Str { key: true, .. } | Token::Number | Token::Literal { .. } => {
                self.rollback()?;
            }
        }

        if let Some(frame) = self.stack.last()
            && matches!(frame.expect, Expect::Colon | Expect::Value)
        {
            self.rollback()?;
        }

        let trimmed = self.out.trim_end().trim_end_matches(',').trim_end().len();
        self.out.truncate(trimmed);
        while let Some(frame) = self.stack.pop() {
            self.out.push(match frame.container {
                Container::Object => '}',
                Container::Array => ']',
            });
        }
        if self.out.trim().is_empty() {
            return None;
        }
        Some(self.out)
    }

    fn rollback(&mut self) -> Option<()> {
        let frame = self.stack.last_mut()?;
        self.out.truncate(frame.member_start);
        frame.expect = Expect::Comma;
        Some(())
    }
}

/// Repairs a truncated JSON prefix into a well-formed document.
///
/// Open strings are closed, an unfinished key or literal is dropped along
/// with its member, trailing commas are removed, and open containers are
/// closed. Returns `None` when no decodable prefix exists.
pub fn repair_json(raw: &str) -> Option<String> {
    let mut repair = Repair {
        out: String::with_capacity(raw.len() + 8),
        stack: Vec::new(),
        token: Token::None,
        root_done: false,
    };
    for ch in raw.chars() {
        repair.step(ch)?;
    }
    repair.finish()
}

//! Tokenizer for shell-compatible JSON.

use crate::error::{Error, Result};

/// A lexical token.
#[derive(Clone, Debug, PartialEq)]
pub enum JsonToken {
    BeginObject,
    EndObject,
    BeginArray,
    EndArray,
    LeftParen,
    RightParen,
    Colon,
    Comma,
    /// A quoted string with escapes resolved.
    String(String),
    /// A bare word such as `true`, `ObjectId` or an unquoted key.
    UnquotedString(String),
    Int32(i32),
    Int64(i64),
    Double(f64),
    /// A `/pattern/options` literal.
    RegularExpression { pattern: String, options: String },
    EndOfFile,
}

impl JsonToken {
    /// The lexeme as it would be quoted in an error message.
    pub(crate) fn describe(&self) -> String {
        match self {
            JsonToken::BeginObject => "{".into(),
            JsonToken::EndObject => "}".into(),
            JsonToken::BeginArray => "[".into(),
            JsonToken::EndArray => "]".into(),
            JsonToken::LeftParen => "(".into(),
            JsonToken::RightParen => ")".into(),
            JsonToken::Colon => ":".into(),
            JsonToken::Comma => ",".into(),
            JsonToken::String(s) => format!("\"{s}\""),
            JsonToken::UnquotedString(s) => s.clone(),
            JsonToken::Int32(i) => i.to_string(),
            JsonToken::Int64(i) => i.to_string(),
            JsonToken::Double(d) => d.to_string(),
            JsonToken::RegularExpression { pattern, options } => format!("/{pattern}/{options}"),
            JsonToken::EndOfFile => "<eof>".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NumberState {
    SawLeadingMinus,
    SawLeadingZero,
    SawIntegerDigits,
    SawDecimalPoint,
    SawFractionDigits,
    SawExponentLetter,
    SawExponentSign,
    SawExponentDigits,
    SawMinusI,
    Done,
    Invalid,
}

/// Splits JSON text into [`JsonToken`]s.
pub struct JsonScanner<'a> {
    input: &'a str,
    position: usize,
}

const SNIPPET_LENGTH: usize = 20;

fn is_delimiter(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => matches!(c, ',' | '}' | ']' | ')') || c.is_whitespace(),
    }
}

impl<'a> JsonScanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, position: 0 }
    }

    /// Byte offset of the next unread character.
    pub fn position(&self) -> usize {
        self.position
    }

    pub(crate) fn seek(&mut self, position: usize) {
        self.position = position;
    }

    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    fn read(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn unread(&mut self, c: Option<char>) {
        if let Some(c) = c {
            self.position -= c.len_utf8();
        }
    }

    pub(crate) fn error(&self, message: &str, start: usize) -> Error {
        let snippet: String = self.input[start.min(self.input.len())..]
            .chars()
            .take(SNIPPET_LENGTH)
            .collect();
        Error::json(format!("{message} '{snippet}'."), start)
    }

    /// Reads the next token, skipping leading whitespace.
    pub fn next_token(&mut self) -> Result<JsonToken> {
        let mut c = self.read();
        while c.is_some_and(char::is_whitespace) {
            c = self.read();
        }
        let Some(c) = c else {
            return Ok(JsonToken::EndOfFile);
        };

        Ok(match c {
            '{' => JsonToken::BeginObject,
            '}' => JsonToken::EndObject,
            '[' => JsonToken::BeginArray,
            ']' => JsonToken::EndArray,
            '(' => JsonToken::LeftParen,
            ')' => JsonToken::RightParen,
            ':' => JsonToken::Colon,
            ',' => JsonToken::Comma,
            '\'' | '"' => self.string_token(c)?,
            '/' => self.regular_expression_token()?,
            '-' => self.number_token(c)?,
            c if c.is_ascii_digit() => self.number_token(c)?,
            c if c == '$' || c == '_' || c.is_alphabetic() => self.unquoted_string_token(c),
            c => {
                self.unread(Some(c));
                return Err(self.error("Invalid JSON input", self.position));
            }
        })
    }

    fn number_token(&mut self, first: char) -> Result<JsonToken> {
        let start = self.position - first.len_utf8();
        let mut state = match first {
            '-' => NumberState::SawLeadingMinus,
            '0' => NumberState::SawLeadingZero,
            _ => NumberState::SawIntegerDigits,
        };
        let mut is_double = false;

        loop {
            let c = self.read();
            state = match state {
                NumberState::SawLeadingMinus => match c {
                    Some('0') => NumberState::SawLeadingZero,
                    Some('I') => NumberState::SawMinusI,
                    Some(d) if d.is_ascii_digit() => NumberState::SawIntegerDigits,
                    _ => NumberState::Invalid,
                },
                NumberState::SawLeadingZero => match c {
                    Some('.') => NumberState::SawDecimalPoint,
                    Some('e' | 'E') => NumberState::SawExponentLetter,
                    c if is_delimiter(c) => NumberState::Done,
                    _ => NumberState::Invalid,
                },
                NumberState::SawIntegerDigits => match c {
                    Some('.') => NumberState::SawDecimalPoint,
                    Some('e' | 'E') => NumberState::SawExponentLetter,
                    Some(d) if d.is_ascii_digit() => NumberState::SawIntegerDigits,
                    c if is_delimiter(c) => NumberState::Done,
                    _ => NumberState::Invalid,
                },
                NumberState::SawDecimalPoint => {
                    is_double = true;
                    match c {
                        Some(d) if d.is_ascii_digit() => NumberState::SawFractionDigits,
                        _ => NumberState::Invalid,
                    }
                }
                NumberState::SawFractionDigits => match c {
                    Some('e' | 'E') => NumberState::SawExponentLetter,
                    Some(d) if d.is_ascii_digit() => NumberState::SawFractionDigits,
                    c if is_delimiter(c) => NumberState::Done,
                    _ => NumberState::Invalid,
                },
                NumberState::SawExponentLetter => {
                    is_double = true;
                    match c {
                        Some('+' | '-') => NumberState::SawExponentSign,
                        Some(d) if d.is_ascii_digit() => NumberState::SawExponentDigits,
                        _ => NumberState::Invalid,
                    }
                }
                NumberState::SawExponentSign => match c {
                    Some(d) if d.is_ascii_digit() => NumberState::SawExponentDigits,
                    _ => NumberState::Invalid,
                },
                NumberState::SawExponentDigits => match c {
                    Some(d) if d.is_ascii_digit() => NumberState::SawExponentDigits,
                    c if is_delimiter(c) => NumberState::Done,
                    _ => NumberState::Invalid,
                },
                NumberState::SawMinusI => {
                    // `c` is the character after "-I"
                    self.unread(c);
                    if self.input[self.position..].starts_with("nfinity") {
                        self.position += "nfinity".len();
                        let next = self.read();
                        if is_delimiter(next) {
                            self.unread(next);
                            return Ok(JsonToken::Double(f64::NEG_INFINITY));
                        }
                    }
                    NumberState::Invalid
                }
                NumberState::Done | NumberState::Invalid => state,
            };

            match state {
                NumberState::Done => {
                    self.unread(c);
                    let lexeme = &self.input[start..self.position];
                    return if is_double {
                        lexeme
                            .parse::<f64>()
                            .map(JsonToken::Double)
                            .map_err(|_| self.error("Invalid JSON number", start))
                    } else {
                        let value = lexeme
                            .parse::<i64>()
                            .map_err(|_| self.error("Invalid JSON number", start))?;
                        Ok(match i32::try_from(value) {
                            Ok(v) => JsonToken::Int32(v),
                            Err(_) => JsonToken::Int64(value),
                        })
                    };
                }
                NumberState::Invalid => return Err(self.error("Invalid JSON number", start)),
                _ => {}
            }
        }
    }

    fn regular_expression_token(&mut self) -> Result<JsonToken> {
        let start = self.position - 1;
        let mut pattern = String::new();
        loop {
            match self.read() {
                Some('/') => break,
                Some('\\') => {
                    pattern.push('\\');
                    match self.read() {
                        Some(c) => pattern.push(c),
                        None => return Err(self.error("Invalid JSON regular expression", start)),
                    }
                }
                Some(c) => pattern.push(c),
                None => return Err(self.error("Invalid JSON regular expression", start)),
            }
        }
        let mut options = String::new();
        loop {
            let c = self.read();
            match c {
                Some(o @ ('i' | 'm' | 'x' | 's')) => options.push(o),
                c if is_delimiter(c) => {
                    self.unread(c);
                    return Ok(JsonToken::RegularExpression { pattern, options });
                }
                _ => return Err(self.error("Invalid JSON regular expression", start)),
            }
        }
    }

    fn string_token(&mut self, quote: char) -> Result<JsonToken> {
        let start = self.position - 1;
        let mut value = String::new();
        loop {
            match self.read() {
                Some('\\') => {
                    let escaped = match self.read() {
                        Some('\'') => '\'',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('b') => '\u{8}',
                        Some('f') => '\u{c}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('u') => self.unicode_escape(start)?,
                        _ => return Err(self.error("Invalid escape sequence in JSON string", start)),
                    };
                    value.push(escaped);
                }
                Some(c) if c == quote => return Ok(JsonToken::String(value)),
                Some(c) => value.push(c),
                None => return Err(self.error("End of file in JSON string", start)),
            }
        }
    }

    fn unicode_escape(&mut self, start: usize) -> Result<char> {
        let digits = self
            .input
            .get(self.position..self.position + 4)
            .ok_or_else(|| self.error("Invalid escape sequence in JSON string", start))?;
        let code = u32::from_str_radix(digits, 16)
            .map_err(|_| self.error("Invalid escape sequence in JSON string", start))?;
        self.position += 4;
        char::from_u32(code).ok_or_else(|| self.error("Invalid escape sequence in JSON string", start))
    }

    fn unquoted_string_token(&mut self, first: char) -> JsonToken {
        let start = self.position - first.len_utf8();
        while self
            .peek()
            .is_some_and(|c| c == '$' || c == '_' || c.is_alphanumeric())
        {
            self.read();
        }
        JsonToken::UnquotedString(self.input[start..self.position].to_string())
    }
}

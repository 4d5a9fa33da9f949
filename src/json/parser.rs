//! Builds [`Document`]s from shell-compatible JSON.

use crate::{
    Binary,
    Bson,
    DateTime,
    Document,
    bson::{JavaScriptCodeWithScope, Regex, Timestamp},
    error::{Error, Result},
    oid::ObjectId,
    spec::BinarySubtype,
};

use super::scanner::{JsonScanner, JsonToken};

/// Options for parsing JSON.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct JsonReaderSettings {
    /// Keep every element when a document repeats a name instead of failing.
    pub allow_duplicate_names: bool,
}

impl JsonReaderSettings {
    pub fn allow_duplicate_names(mut self, allow: bool) -> Self {
        self.allow_duplicate_names = allow;
        self
    }
}

/// A recursive-descent parser over [`JsonScanner`] tokens.
pub struct JsonParser<'a> {
    scanner: JsonScanner<'a>,
    settings: JsonReaderSettings,
}

impl<'a> JsonParser<'a> {
    pub fn new(input: &'a str, settings: JsonReaderSettings) -> Self {
        Self {
            scanner: JsonScanner::new(input),
            settings,
        }
    }

    fn error(&self, message: impl AsRef<str>) -> Error {
        Error::json(message.as_ref(), self.scanner.position())
    }

    fn next(&mut self) -> Result<JsonToken> {
        self.scanner.next_token()
    }

    fn peek(&mut self) -> Result<JsonToken> {
        let position = self.scanner.position();
        let token = self.scanner.next_token();
        self.scanner.seek(position);
        token
    }

    fn expect(&mut self, expected: JsonToken) -> Result<()> {
        let token = self.next()?;
        if token != expected {
            return Err(self.error(format!(
                "expected '{}' but found '{}'",
                expected.describe(),
                token.describe()
            )));
        }
        Ok(())
    }

    /// Parses a single top-level document and checks nothing follows it.
    pub fn parse_document(&mut self) -> Result<Document> {
        self.expect(JsonToken::BeginObject)?;
        let doc = self.parse_object_body()?;
        self.expect(JsonToken::EndOfFile)?;
        Ok(doc)
    }

    /// Parses a single value and checks nothing follows it.
    pub fn parse_value(&mut self) -> Result<Bson> {
        let token = self.next()?;
        let value = self.value_from(token)?;
        self.expect(JsonToken::EndOfFile)?;
        Ok(value)
    }

    fn parse_object_body(&mut self) -> Result<Document> {
        let mut doc = Document::new();
        if self.peek()? == JsonToken::EndObject {
            self.next()?;
            return Ok(doc);
        }
        loop {
            let name = match self.next()? {
                JsonToken::String(s) | JsonToken::UnquotedString(s) => s,
                other => {
                    return Err(self.error(format!(
                        "expected an element name but found '{}'",
                        other.describe()
                    )));
                }
            };
            self.expect(JsonToken::Colon)?;
            let token = self.next()?;
            let value = self.value_from(token).map_err(|e| e.with_key(&name))?;
            if self.settings.allow_duplicate_names {
                doc.push_duplicate(name, value);
            } else {
                doc.push(name, value)?;
            }
            match self.next()? {
                JsonToken::Comma => continue,
                JsonToken::EndObject => return Ok(doc),
                other => {
                    return Err(self.error(format!(
                        "expected ',' or '}}' but found '{}'",
                        other.describe()
                    )));
                }
            }
        }
    }

    fn parse_array_body(&mut self) -> Result<Vec<Bson>> {
        let mut array = Vec::new();
        if self.peek()? == JsonToken::EndArray {
            self.next()?;
            return Ok(array);
        }
        loop {
            let token = self.next()?;
            array.push(self.value_from(token)?);
            match self.next()? {
                JsonToken::Comma => continue,
                JsonToken::EndArray => return Ok(array),
                other => {
                    return Err(self.error(format!(
                        "expected ',' or ']' but found '{}'",
                        other.describe()
                    )));
                }
            }
        }
    }

    fn value_from(&mut self, token: JsonToken) -> Result<Bson> {
        Ok(match token {
            JsonToken::BeginObject => {
                let doc = self.parse_object_body()?;
                match extended_value(&doc)? {
                    Some(value) => value,
                    None => Bson::Document(doc),
                }
            }
            JsonToken::BeginArray => Bson::Array(self.parse_array_body()?),
            JsonToken::String(s) => Bson::String(s),
            JsonToken::Int32(i) => Bson::Int32(i),
            JsonToken::Int64(i) => Bson::Int64(i),
            JsonToken::Double(d) => Bson::Double(d),
            JsonToken::RegularExpression { pattern, options } => {
                Bson::RegularExpression(Regex::new(pattern, options))
            }
            JsonToken::UnquotedString(word) => self.keyword(&word)?,
            other => {
                return Err(self.error(format!(
                    "unexpected token '{}'",
                    other.describe()
                )));
            }
        })
    }

    fn keyword(&mut self, word: &str) -> Result<Bson> {
        Ok(match word {
            "true" => Bson::Boolean(true),
            "false" => Bson::Boolean(false),
            "null" => Bson::Null,
            "undefined" => Bson::Undefined,
            "MinKey" => Bson::MinKey,
            "MaxKey" => Bson::MaxKey,
            "NaN" => Bson::Double(f64::NAN),
            "Infinity" => Bson::Double(f64::INFINITY),
            "new" => match self.next()? {
                JsonToken::UnquotedString(ctor) => self.keyword(&ctor)?,
                other => {
                    return Err(self.error(format!(
                        "expected a constructor after 'new' but found '{}'",
                        other.describe()
                    )));
                }
            },
            "ObjectId" => {
                let hex = self.string_args1()?;
                Bson::ObjectId(ObjectId::parse_str(hex)?)
            }
            "NumberLong" => {
                self.expect(JsonToken::LeftParen)?;
                let value = match self.next()? {
                    JsonToken::Int32(i) => i64::from(i),
                    JsonToken::Int64(i) => i,
                    JsonToken::String(s) => s
                        .parse()
                        .map_err(|_| self.error(format!("invalid NumberLong '{s}'")))?,
                    other => {
                        return Err(self.error(format!(
                            "invalid NumberLong argument '{}'",
                            other.describe()
                        )));
                    }
                };
                self.expect(JsonToken::RightParen)?;
                Bson::Int64(value)
            }
            "NumberInt" => {
                self.expect(JsonToken::LeftParen)?;
                let value = match self.next()? {
                    JsonToken::Int32(i) => i,
                    JsonToken::String(s) => s
                        .parse()
                        .map_err(|_| self.error(format!("invalid NumberInt '{s}'")))?,
                    other => {
                        return Err(self.error(format!(
                            "invalid NumberInt argument '{}'",
                            other.describe()
                        )));
                    }
                };
                self.expect(JsonToken::RightParen)?;
                Bson::Int32(value)
            }
            "ISODate" | "Date" => {
                self.expect(JsonToken::LeftParen)?;
                let value = match self.next()? {
                    JsonToken::String(s) => DateTime::parse_rfc3339_str(&s)?,
                    JsonToken::Int32(i) => DateTime::from_millis(i.into()),
                    JsonToken::Int64(i) => DateTime::from_millis(i),
                    other => {
                        return Err(self.error(format!(
                            "invalid date argument '{}'",
                            other.describe()
                        )));
                    }
                };
                self.expect(JsonToken::RightParen)?;
                Bson::DateTime(value)
            }
            "Timestamp" => {
                self.expect(JsonToken::LeftParen)?;
                let time = self.u32_arg()?;
                self.expect(JsonToken::Comma)?;
                let increment = self.u32_arg()?;
                self.expect(JsonToken::RightParen)?;
                Bson::Timestamp(Timestamp { time, increment })
            }
            "BinData" | "HexData" => {
                self.expect(JsonToken::LeftParen)?;
                let subtype = match self.next()? {
                    JsonToken::Int32(i) => u8::try_from(i)
                        .map_err(|_| self.error(format!("invalid binary subtype {i}")))?,
                    other => {
                        return Err(self.error(format!(
                            "invalid binary subtype '{}'",
                            other.describe()
                        )));
                    }
                };
                self.expect(JsonToken::Comma)?;
                let payload = match self.next()? {
                    JsonToken::String(s) => s,
                    other => {
                        return Err(self.error(format!(
                            "invalid binary payload '{}'",
                            other.describe()
                        )));
                    }
                };
                self.expect(JsonToken::RightParen)?;
                let subtype = BinarySubtype::from(subtype);
                if word == "BinData" {
                    Bson::Binary(Binary::from_base64(payload, subtype)?)
                } else {
                    let bytes = hex::decode(payload)
                        .map_err(|e| self.error(format!("invalid hex data: {e}")))?;
                    Bson::Binary(Binary { subtype, bytes })
                }
            }
            other => return Err(self.error(format!("unknown keyword '{other}'"))),
        })
    }

    fn string_args1(&mut self) -> Result<String> {
        self.expect(JsonToken::LeftParen)?;
        let value = match self.next()? {
            JsonToken::String(s) => s,
            other => {
                return Err(self.error(format!(
                    "expected a string argument but found '{}'",
                    other.describe()
                )));
            }
        };
        self.expect(JsonToken::RightParen)?;
        Ok(value)
    }

    fn u32_arg(&mut self) -> Result<u32> {
        match self.next()? {
            JsonToken::Int32(i) => {
                u32::try_from(i).map_err(|_| self.error(format!("{i} is out of range for u32")))
            }
            JsonToken::Int64(i) => {
                u32::try_from(i).map_err(|_| self.error(format!("{i} is out of range for u32")))
            }
            other => Err(self.error(format!(
                "expected an integer but found '{}'",
                other.describe()
            ))),
        }
    }
}

/// Recognizes the `$`-prefixed wrapper documents used by extended JSON.
fn extended_value(doc: &Document) -> Result<Option<Bson>> {
    let Some((first, value)) = doc.get_element(0) else {
        return Ok(None);
    };
    if !first.starts_with('$') {
        return Ok(None);
    }
    Ok(Some(match (first, doc.len()) {
        ("$oid", 1) => match value {
            Bson::String(hex) => Bson::ObjectId(ObjectId::parse_str(hex)?),
            _ => return Ok(None),
        },
        ("$date", 1) => match value {
            Bson::Int32(i) => Bson::DateTime(DateTime::from_millis((*i).into())),
            Bson::Int64(i) => Bson::DateTime(DateTime::from_millis(*i)),
            Bson::String(s) => Bson::DateTime(DateTime::parse_rfc3339_str(s)?),
            Bson::Document(inner) => match inner.get_str("$numberLong") {
                Ok(s) => Bson::DateTime(DateTime::from_millis(parse_i64(s)?)),
                Err(_) => return Ok(None),
            },
            _ => return Ok(None),
        },
        ("$numberLong", 1) => match value {
            Bson::String(s) => Bson::Int64(parse_i64(s)?),
            _ => return Ok(None),
        },
        ("$symbol", 1) => match value {
            Bson::String(s) => Bson::Symbol(s.clone()),
            _ => return Ok(None),
        },
        ("$code", 1) => match value {
            Bson::String(s) => Bson::JavaScriptCode(s.clone()),
            _ => return Ok(None),
        },
        ("$code", 2) => match (value, doc.get_document("$scope")) {
            (Bson::String(code), Ok(scope)) => {
                Bson::JavaScriptCodeWithScope(JavaScriptCodeWithScope {
                    code: code.clone(),
                    scope: scope.clone(),
                })
            }
            _ => return Ok(None),
        },
        ("$regex", 2) => match (value, doc.get_str("$options")) {
            (Bson::String(pattern), Ok(options)) => {
                Bson::RegularExpression(Regex::new(pattern, options))
            }
            _ => return Ok(None),
        },
        ("$binary", 2) => match (value, doc.get_str("$type")) {
            (Bson::String(b64), Ok(subtype)) => {
                let subtype = hex::decode(subtype)
                    .ok()
                    .and_then(|b| b.first().copied())
                    .ok_or_else(|| Error::malformed_value(format!("invalid $type {subtype}")))?;
                Bson::Binary(Binary::from_base64(b64, BinarySubtype::from(subtype))?)
            }
            _ => return Ok(None),
        },
        ("$timestamp", 1) => match value {
            Bson::Document(ts) => {
                let time = ts.get("t").map(Bson::to_i64).transpose()?;
                let increment = ts.get("i").map(Bson::to_i64).transpose()?;
                match (time, increment) {
                    (Some(t), Some(i)) => Bson::Timestamp(Timestamp {
                        time: u32::try_from(t).map_err(|_| Error::overflow(t, "u32"))?,
                        increment: u32::try_from(i).map_err(|_| Error::overflow(i, "u32"))?,
                    }),
                    _ => return Ok(None),
                }
            }
            _ => return Ok(None),
        },
        ("$minKey", 1) => Bson::MinKey,
        ("$maxKey", 1) => Bson::MaxKey,
        ("$undefined", 1) => Bson::Undefined,
        _ => return Ok(None),
    }))
}

fn parse_i64(s: &str) -> Result<i64> {
    s.parse()
        .map_err(|_| Error::malformed_value(format!("invalid 64-bit integer \"{s}\"")))
}

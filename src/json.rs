//! Shell-compatible JSON text for documents.
//!
//! The parser accepts standard JSON plus the forms the mongo shell prints: single-quoted
//! strings, unquoted keys, `/regex/` literals and constructors such as `ObjectId("...")`,
//! `NumberLong(5)`, `ISODate("...")`, `Timestamp(1, 2)` and `BinData(0, "...")`. The `$oid`,
//! `$date` and `$numberLong` extended forms are also recognized.

mod parser;
mod scanner;
pub(crate) mod writer;

pub use self::{
    parser::{JsonParser, JsonReaderSettings},
    scanner::{JsonScanner, JsonToken},
};

use crate::{Bson, Document, error::Result};

/// Parses a document, rejecting duplicate element names.
pub fn parse_document(json: &str) -> Result<Document> {
    parse_document_with(json, JsonReaderSettings::default())
}

/// Parses a document with explicit settings.
pub fn parse_document_with(json: &str, settings: JsonReaderSettings) -> Result<Document> {
    JsonParser::new(json, settings).parse_document()
}

/// Parses any single value.
pub fn parse_value(json: &str) -> Result<Bson> {
    JsonParser::new(json, JsonReaderSettings::default()).parse_value()
}

// The MIT License (MIT)

// Copyright (c) 2015 Y. T. Chung <zonyitoo@gmail.com>

// Permission is hereby granted, free of charge, to any person obtaining a copy of
// this software and associated documentation files (the "Software"), to deal in
// the Software without restriction, including without limitation the rights to
// use, copy, modify, merge, publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:

// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY, FITNESS
// FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR
// COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER
// IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE SOFTWARE.

//! Streaming BSON reader

use crate::{
    Binary,
    Bson,
    DateTime,
    Document,
    bson::{JavaScriptCodeWithScope, Regex, Timestamp},
    error::{Error, Result},
    oid::ObjectId,
    spec::{BinarySubtype, ElementType},
};

use super::{MIN_BSON_DOCUMENT_SIZE, checked_add, i32_from_slice, read_len, try_to_str};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ContextKind {
    TopLevel,
    Document,
    Array,
}

#[derive(Clone, Copy, Debug)]
struct Context {
    kind: ContextKind,
    /// Offset one past the terminating null byte.
    end: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    /// Nothing has been read yet.
    Initial,
    /// The next read is an element type tag.
    Type,
    /// A type tag has been read; the next read is the element name.
    Name,
    /// The element name has been read; the next read is the value.
    Value,
    /// The terminator of the current document has been read.
    EndOfDocument,
    /// The top-level document has been closed.
    Done,
}

/// A saved reader position. See [`BsonReader::bookmark`].
#[derive(Clone, Debug)]
pub struct Bookmark {
    position: usize,
    contexts: Vec<Context>,
    state: State,
    current_type: Option<ElementType>,
    current_name: Option<(usize, usize)>,
}

/// A forward-only cursor over a BSON byte slice.
///
/// Documents are entered with [`read_start_document`](Self::read_start_document); each element
/// is then consumed as a type tag ([`read_bson_type`](Self::read_bson_type)), a name
/// ([`read_name`](Self::read_name)) and one typed value read (or
/// [`skip_value`](Self::skip_value)). Every read is bounds-checked against the innermost declared
/// document length, and a terminator that does not line up with that length is a format error.
pub struct BsonReader<'a> {
    bytes: &'a [u8],
    position: usize,
    contexts: Vec<Context>,
    state: State,
    current_type: Option<ElementType>,
    current_name: Option<(usize, usize)>,
}

impl<'a> BsonReader<'a> {
    /// Creates a reader positioned before the top-level document in `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            position: 0,
            contexts: vec![Context {
                kind: ContextKind::TopLevel,
                end: bytes.len(),
            }],
            state: State::Initial,
            current_type: None,
            current_name: None,
        }
    }

    /// The current byte offset.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The type of the element most recently announced by [`read_bson_type`](Self::read_bson_type).
    pub fn current_type(&self) -> Option<ElementType> {
        self.current_type
    }

    /// The name of the element most recently read by [`read_name`](Self::read_name).
    pub fn current_name(&self) -> Option<&'a str> {
        let (start, end) = self.current_name?;
        // validated when first read
        std::str::from_utf8(&self.bytes[start..end]).ok()
    }

    /// Whether the reader is positioned inside an array.
    pub fn in_array(&self) -> bool {
        self.context().kind == ContextKind::Array
    }

    /// Records the reader state so it can be restored with
    /// [`return_to_bookmark`](Self::return_to_bookmark). Used to look ahead for a discriminator.
    pub fn bookmark(&self) -> Bookmark {
        Bookmark {
            position: self.position,
            contexts: self.contexts.clone(),
            state: self.state,
            current_type: self.current_type,
            current_name: self.current_name,
        }
    }

    /// Restores a state captured by [`bookmark`](Self::bookmark).
    pub fn return_to_bookmark(&mut self, bookmark: Bookmark) {
        self.position = bookmark.position;
        self.contexts = bookmark.contexts;
        self.state = bookmark.state;
        self.current_type = bookmark.current_type;
        self.current_name = bookmark.current_name;
    }

    fn context(&self) -> Context {
        // the top-level context is never popped
        self.contexts
            .last()
            .copied()
            .unwrap_or(Context {
                kind: ContextKind::TopLevel,
                end: self.bytes.len(),
            })
    }

    /// The offset past which the current element's payload may not extend: the terminator of the
    /// innermost open document.
    fn limit(&self) -> usize {
        let ctx = self.context();
        match ctx.kind {
            ContextKind::TopLevel => ctx.end,
            _ => ctx.end - 1,
        }
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = checked_add(self.position, length)?;
        if end > self.limit() {
            return Err(Error::malformed_value(format!(
                "attempted to read {length} bytes at offset {} past the end of the enclosing \
                 document (offset {})",
                self.position,
                self.limit()
            )));
        }
        let slice = &self.bytes[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.take(N)?;
        let mut buf = [0; N];
        buf.copy_from_slice(slice);
        Ok(buf)
    }

    fn read_cstring_bounds(&mut self) -> Result<(usize, usize)> {
        let start = self.position;
        let limit = self.limit();
        let len = self.bytes[start..limit]
            .iter()
            .position(|b| *b == 0)
            .ok_or_else(|| Error::malformed_value("cstring missing null terminator"))?;
        try_to_str(&self.bytes[start..start + len])?;
        self.position = start + len + 1;
        Ok((start, start + len))
    }

    fn read_cstring(&mut self) -> Result<&'a str> {
        let (start, end) = self.read_cstring_bounds()?;
        try_to_str(&self.bytes[start..end])
    }

    fn read_length_prefixed_string(&mut self) -> Result<&'a str> {
        let length = read_len(self.take(4)?)?;
        let bytes = self.take(length)?;
        // read_len guarantees at least one byte
        if bytes[length - 1] != 0 {
            return Err(Error::malformed_value("string not null-terminated"));
        }
        try_to_str(&bytes[..length - 1])
    }

    fn expect_value(&mut self, expected: ElementType) -> Result<()> {
        if self.state != State::Value {
            return Err(Error::malformed_value(format!(
                "cannot read a {expected:?} value while the reader is in the {:?} state",
                self.state
            )));
        }
        match self.current_type {
            Some(t) if t == expected => {
                self.state = State::Type;
                Ok(())
            }
            other => Err(Error::value_access_unexpected_type(
                other.unwrap_or(ElementType::Null),
                expected,
            )),
        }
    }

    fn enter(&mut self, kind: ContextKind) -> Result<()> {
        let start = self.position;
        let length = i32_from_slice(self.bytes.get(start..).unwrap_or_default())?;
        if length < MIN_BSON_DOCUMENT_SIZE {
            return Err(Error::malformed_value(format!(
                "document length {length} is below the minimum of {MIN_BSON_DOCUMENT_SIZE}"
            )));
        }
        let end = checked_add(start, length as usize)?;
        if end > self.limit() {
            return Err(Error::malformed_value(format!(
                "document length {length} at offset {start} overruns the enclosing document"
            )));
        }
        if self.bytes[end - 1] != 0 {
            return Err(Error::malformed_value(
                "document not null-terminated at its declared length",
            ));
        }
        self.position += 4;
        self.contexts.push(Context { kind, end });
        self.state = State::Type;
        Ok(())
    }

    /// Enters a document, either the top-level one or an embedded document value.
    pub fn read_start_document(&mut self) -> Result<()> {
        match self.state {
            State::Initial => self.enter(ContextKind::Document),
            _ => {
                self.expect_value(ElementType::EmbeddedDocument)?;
                self.enter(ContextKind::Document)
            }
        }
    }

    /// Enters an array value.
    pub fn read_start_array(&mut self) -> Result<()> {
        self.expect_value(ElementType::Array)?;
        self.enter(ContextKind::Array)
    }

    /// Reads the next element type tag, or `None` at the end of the current document.
    pub fn read_bson_type(&mut self) -> Result<Option<ElementType>> {
        if self.state == State::Value {
            // the caller did not consume the value; skip it
            self.skip_value()?;
        }
        if self.state != State::Type {
            return Err(Error::malformed_value(format!(
                "cannot read an element type while the reader is in the {:?} state",
                self.state
            )));
        }
        let ctx = self.context();
        if self.position >= ctx.end {
            return Err(Error::malformed_value("document ended without a terminator"));
        }
        let tag = self.bytes[self.position];
        self.position += 1;
        if tag == 0 {
            if self.position != ctx.end {
                return Err(Error::malformed_value(format!(
                    "terminator at offset {} disagrees with declared document end {}",
                    self.position - 1,
                    ctx.end
                )));
            }
            self.current_type = None;
            self.state = State::EndOfDocument;
            return Ok(None);
        }
        let element_type = ElementType::from(tag).ok_or_else(|| {
            Error::malformed_value(format!("invalid element type {tag:#04x}"))
        })?;
        self.current_type = Some(element_type);
        self.state = State::Name;
        Ok(Some(element_type))
    }

    /// Reads the name of the element whose type was just read.
    pub fn read_name(&mut self) -> Result<&'a str> {
        if self.state != State::Name {
            return Err(Error::malformed_value(format!(
                "cannot read an element name while the reader is in the {:?} state",
                self.state
            )));
        }
        let bounds = self.read_cstring_bounds()?;
        self.current_name = Some(bounds);
        self.state = State::Value;
        try_to_str(&self.bytes[bounds.0..bounds.1])
    }

    fn exit(&mut self, kind: ContextKind) -> Result<()> {
        if self.state != State::EndOfDocument {
            return Err(Error::malformed_value(
                "cannot end a document before reading its terminator",
            ));
        }
        let ctx = self.context();
        if ctx.kind != kind {
            return Err(Error::malformed_value(format!(
                "expected to end {kind:?}, but the reader is in {:?}",
                ctx.kind
            )));
        }
        self.contexts.pop();
        self.state = if self.context().kind == ContextKind::TopLevel {
            State::Done
        } else {
            State::Type
        };
        Ok(())
    }

    /// Leaves the current document after [`read_bson_type`](Self::read_bson_type) returned `None`.
    pub fn read_end_document(&mut self) -> Result<()> {
        self.exit(ContextKind::Document)
    }

    /// Leaves the current array after [`read_bson_type`](Self::read_bson_type) returned `None`.
    pub fn read_end_array(&mut self) -> Result<()> {
        self.exit(ContextKind::Array)
    }

    /// Checks that the top-level document was closed and no trailing bytes remain.
    pub fn finish(&self) -> Result<()> {
        if self.state != State::Done {
            return Err(Error::malformed_value("top-level document was not fully read"));
        }
        if self.position != self.bytes.len() {
            return Err(Error::malformed_value(format!(
                "{} trailing bytes after the top-level document",
                self.bytes.len() - self.position
            )));
        }
        Ok(())
    }

    pub fn read_double(&mut self) -> Result<f64> {
        self.expect_value(ElementType::Double)?;
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    pub fn read_string(&mut self) -> Result<&'a str> {
        self.expect_value(ElementType::String)?;
        self.read_length_prefixed_string()
    }

    pub fn read_symbol(&mut self) -> Result<&'a str> {
        self.expect_value(ElementType::Symbol)?;
        self.read_length_prefixed_string()
    }

    pub fn read_javascript(&mut self) -> Result<&'a str> {
        self.expect_value(ElementType::JavaScriptCode)?;
        self.read_length_prefixed_string()
    }

    pub fn read_binary(&mut self) -> Result<Binary> {
        self.expect_value(ElementType::Binary)?;
        let length = i32_from_slice(self.take(4)?)?;
        let length = usize::try_from(length)
            .map_err(|_| Error::malformed_value(format!("negative binary length {length}")))?;
        let subtype = BinarySubtype::from(self.take(1)?[0]);
        let mut bytes = self.take(length)?;
        if subtype == BinarySubtype::BinaryOld {
            // the old subtype repeats the length inside the payload
            let inner = read_binary_old_len(bytes)?;
            bytes = &bytes[4..4 + inner];
        }
        Ok(Binary {
            subtype,
            bytes: bytes.to_vec(),
        })
    }

    pub fn read_object_id(&mut self) -> Result<ObjectId> {
        self.expect_value(ElementType::ObjectId)?;
        Ok(ObjectId::from_bytes(self.take_array()?))
    }

    pub fn read_boolean(&mut self) -> Result<bool> {
        self.expect_value(ElementType::Boolean)?;
        match self.take(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(Error::malformed_value(format!(
                "boolean must be stored as 0 or 1, got {other}"
            ))),
        }
    }

    pub fn read_datetime(&mut self) -> Result<DateTime> {
        self.expect_value(ElementType::DateTime)?;
        Ok(DateTime::from_millis(i64::from_le_bytes(self.take_array()?)))
    }

    pub fn read_null(&mut self) -> Result<()> {
        self.expect_value(ElementType::Null)
    }

    pub fn read_undefined(&mut self) -> Result<()> {
        self.expect_value(ElementType::Undefined)
    }

    pub fn read_min_key(&mut self) -> Result<()> {
        self.expect_value(ElementType::MinKey)
    }

    pub fn read_max_key(&mut self) -> Result<()> {
        self.expect_value(ElementType::MaxKey)
    }

    pub fn read_regular_expression(&mut self) -> Result<Regex> {
        self.expect_value(ElementType::RegularExpression)?;
        let pattern = self.read_cstring()?;
        let options = self.read_cstring()?;
        Ok(Regex::new(pattern, options))
    }

    pub fn read_javascript_with_scope(&mut self) -> Result<JavaScriptCodeWithScope> {
        self.expect_value(ElementType::JavaScriptCodeWithScope)?;
        let start = self.position;
        let total = read_len_unterminated(self.take(4)?)?;
        let end = checked_add(start, total)?;
        let code = self.read_length_prefixed_string()?.to_string();
        self.state = State::Value;
        self.current_type = Some(ElementType::EmbeddedDocument);
        let scope = self.read_embedded_document(false)?;
        if self.position != end {
            return Err(Error::malformed_value(format!(
                "code with scope length {total} disagrees with its contents"
            )));
        }
        Ok(JavaScriptCodeWithScope { code, scope })
    }

    pub fn read_int32(&mut self) -> Result<i32> {
        self.expect_value(ElementType::Int32)?;
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn read_timestamp(&mut self) -> Result<Timestamp> {
        self.expect_value(ElementType::Timestamp)?;
        Ok(Timestamp::from_le_bytes(self.take_array()?))
    }

    pub fn read_int64(&mut self) -> Result<i64> {
        self.expect_value(ElementType::Int64)?;
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    /// Skips the value of the current element without decoding it. Documents, arrays and other
    /// length-prefixed values are skipped by their declared length.
    pub fn skip_value(&mut self) -> Result<()> {
        if self.state != State::Value {
            return Err(Error::malformed_value(format!(
                "cannot skip a value while the reader is in the {:?} state",
                self.state
            )));
        }
        let element_type = self
            .current_type
            .ok_or_else(|| Error::malformed_value("no current element to skip"))?;
        let length = match element_type {
            ElementType::Double
            | ElementType::DateTime
            | ElementType::Int64
            | ElementType::Timestamp => 8,
            ElementType::Int32 => 4,
            ElementType::ObjectId => 12,
            ElementType::Boolean => 1,
            ElementType::Null
            | ElementType::Undefined
            | ElementType::MinKey
            | ElementType::MaxKey => 0,
            ElementType::String | ElementType::Symbol | ElementType::JavaScriptCode => {
                4 + read_len(self.peek(4)?)?
            }
            ElementType::Binary => {
                let len = i32_from_slice(self.peek(4)?)?;
                5 + usize::try_from(len)
                    .map_err(|_| Error::malformed_value(format!("negative binary length {len}")))?
            }
            ElementType::EmbeddedDocument
            | ElementType::Array
            | ElementType::JavaScriptCodeWithScope => read_len_unterminated(self.peek(4)?)?,
            ElementType::RegularExpression => {
                self.read_cstring()?;
                self.read_cstring()?;
                0
            }
        };
        self.take(length)?;
        self.state = State::Type;
        Ok(())
    }

    fn peek(&self, length: usize) -> Result<&'a [u8]> {
        let end = checked_add(self.position, length)?;
        if end > self.limit() {
            return Err(Error::malformed_value("length prefix runs past the enclosing document"));
        }
        Ok(&self.bytes[self.position..end])
    }

    /// Reads the current value into a [`Bson`], dispatching on its wire type.
    pub fn read_value(&mut self) -> Result<Bson> {
        self.read_value_inner(false)
    }

    fn read_value_inner(&mut self, allow_duplicate_names: bool) -> Result<Bson> {
        let element_type = self
            .current_type
            .ok_or_else(|| Error::malformed_value("no current element to read"))?;
        Ok(match element_type {
            ElementType::Double => Bson::Double(self.read_double()?),
            ElementType::String => Bson::String(self.read_string()?.to_string()),
            ElementType::EmbeddedDocument => {
                Bson::Document(self.read_embedded_document(allow_duplicate_names)?)
            }
            ElementType::Array => Bson::Array(self.read_array_inner(allow_duplicate_names)?),
            ElementType::Binary => Bson::Binary(self.read_binary()?),
            ElementType::Undefined => {
                self.read_undefined()?;
                Bson::Undefined
            }
            ElementType::ObjectId => Bson::ObjectId(self.read_object_id()?),
            ElementType::Boolean => Bson::Boolean(self.read_boolean()?),
            ElementType::DateTime => Bson::DateTime(self.read_datetime()?),
            ElementType::Null => {
                self.read_null()?;
                Bson::Null
            }
            ElementType::RegularExpression => {
                Bson::RegularExpression(self.read_regular_expression()?)
            }
            ElementType::JavaScriptCode => {
                Bson::JavaScriptCode(self.read_javascript()?.to_string())
            }
            ElementType::Symbol => Bson::Symbol(self.read_symbol()?.to_string()),
            ElementType::JavaScriptCodeWithScope => {
                Bson::JavaScriptCodeWithScope(self.read_javascript_with_scope()?)
            }
            ElementType::Int32 => Bson::Int32(self.read_int32()?),
            ElementType::Timestamp => Bson::Timestamp(self.read_timestamp()?),
            ElementType::Int64 => Bson::Int64(self.read_int64()?),
            ElementType::MaxKey => {
                self.read_max_key()?;
                Bson::MaxKey
            }
            ElementType::MinKey => {
                self.read_min_key()?;
                Bson::MinKey
            }
        })
    }

    fn read_elements(&mut self, allow_duplicate_names: bool) -> Result<Document> {
        let mut doc = Document::new();
        while self.read_bson_type()?.is_some() {
            let name = self.read_name()?;
            let value = self
                .read_value_inner(allow_duplicate_names)
                .map_err(|e| e.with_key(name))?;
            if allow_duplicate_names {
                doc.push_duplicate(name.to_string(), value);
            } else {
                doc.push(name, value)?;
            }
        }
        Ok(doc)
    }

    fn read_embedded_document(&mut self, allow_duplicate_names: bool) -> Result<Document> {
        self.read_start_document()?;
        let doc = self.read_elements(allow_duplicate_names)?;
        self.read_end_document()?;
        Ok(doc)
    }

    /// Reads an entire document: the top-level one when nothing has been read yet, otherwise the
    /// current embedded document value.
    pub fn read_document(&mut self, allow_duplicate_names: bool) -> Result<Document> {
        self.read_embedded_document(allow_duplicate_names)
    }

    /// Reads the current array value.
    pub fn read_array(&mut self) -> Result<Vec<Bson>> {
        self.read_array_inner(false)
    }

    fn read_array_inner(&mut self, allow_duplicate_names: bool) -> Result<Vec<Bson>> {
        self.read_start_array()?;
        let mut array = Vec::new();
        while self.read_bson_type()?.is_some() {
            self.read_name()?;
            let value = self
                .read_value_inner(allow_duplicate_names)
                .map_err(|e| e.with_index(array.len()))?;
            array.push(value);
        }
        self.read_end_array()?;
        Ok(array)
    }
}

/// Like [`read_len`] for values whose length prefix counts itself but not a separate string
/// terminator (documents, arrays and code with scope).
fn read_len_unterminated(buf: &[u8]) -> Result<usize> {
    let length = i32_from_slice(buf)?;
    if length < MIN_BSON_DOCUMENT_SIZE {
        return Err(Error::malformed_value(format!(
            "length {length} is below the minimum of {MIN_BSON_DOCUMENT_SIZE}"
        )));
    }
    Ok(length as usize)
}

fn read_binary_old_len(bytes: &[u8]) -> Result<usize> {
    let inner = i32_from_slice(bytes)?;
    let inner = usize::try_from(inner)
        .map_err(|_| Error::malformed_value(format!("negative binary length {inner}")))?;
    if checked_add(inner, 4)? != bytes.len() {
        return Err(Error::malformed_value(
            "old binary subtype length disagrees with the outer length",
        ));
    }
    Ok(inner)
}

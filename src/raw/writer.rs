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

//! Streaming BSON writer

use std::ops::{Deref, DerefMut};

use crate::{
    Binary,
    Bson,
    DateTime,
    Document,
    bson::{JavaScriptCodeWithScope, Regex, Timestamp},
    error::{Error, ErrorKind, Result},
    oid::ObjectId,
    spec::{BinarySubtype, ElementType},
};

use super::{DEFAULT_MAX_DOCUMENT_SIZE, DocWriter, MIN_BSON_DOCUMENT_SIZE};

/// Options for a [`BsonWriter`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct BsonWriterSettings {
    /// Reject element names that start with `$` or contain `.`.
    pub check_element_names: bool,

    /// Treat the top-level document as an update: if its first element name starts with `$`
    /// it is an update-operator document and names are not checked; otherwise it is a
    /// replacement and every name is checked as for `check_element_names`.
    pub check_update_document: bool,

    /// The largest encoded top-level document accepted.
    pub max_document_size: usize,
}

impl Default for BsonWriterSettings {
    fn default() -> Self {
        Self {
            check_element_names: false,
            check_update_document: false,
            max_document_size: DEFAULT_MAX_DOCUMENT_SIZE,
        }
    }
}

impl BsonWriterSettings {
    /// Settings that reject names the server reserves for operators and dotted paths.
    pub fn checked() -> Self {
        Self {
            check_element_names: true,
            ..Default::default()
        }
    }

    /// Settings for writing an update or replacement document.
    pub fn update() -> Self {
        Self {
            check_update_document: true,
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ContextKind {
    Document,
    Array,
}

#[derive(Clone, Copy, Debug)]
struct Context {
    kind: ContextKind,
    start: usize,
    next_index: usize,
    check_element_names: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Initial,
    Name,
    Value,
    Done,
}

/// Writes BSON into an owned buffer one element at a time.
///
/// Documents and arrays are opened with a placeholder length that is back-patched when they
/// are closed. [`document_scope`](Self::document_scope) returns a guard that closes any still-open
/// documents when dropped, so the length fields are always consistent even if serialization
/// bails out half way through.
pub struct BsonWriter {
    buf: Vec<u8>,
    settings: BsonWriterSettings,
    contexts: Vec<Context>,
    state: State,
    pending_name: Option<String>,
}

impl BsonWriter {
    pub fn new(settings: BsonWriterSettings) -> Self {
        Self {
            buf: Vec::new(),
            settings,
            contexts: Vec::new(),
            state: State::Initial,
            pending_name: None,
        }
    }

    pub fn settings(&self) -> &BsonWriterSettings {
        &self.settings
    }

    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the writer, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// The number of documents and arrays currently open.
    pub fn depth(&self) -> usize {
        self.contexts.len()
    }

    /// Whether the next write must be an element name.
    pub fn expects_name(&self) -> bool {
        self.state == State::Name
    }

    fn invalid_state(&self, action: &str) -> Error {
        Error::serialization(format!(
            "cannot {action} while the writer is in the {:?} state",
            self.state
        ))
    }

    fn check_name(name: &str, check_element_names: bool) -> Result<()> {
        let invalid = name.contains('\0')
            || (check_element_names && (name.starts_with('$') || name.contains('.')));
        if invalid {
            return Err(ErrorKind::InvalidElementName {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// The name check applied to the top-level document, given its first element name.
    fn top_level_check(&self, first_name: Option<&str>) -> bool {
        if self.settings.check_update_document {
            !first_name.is_some_and(|n| n.starts_with('$'))
        } else {
            self.settings.check_element_names
        }
    }

    /// Sets the name of the next element.
    pub fn write_name(&mut self, name: impl AsRef<str>) -> Result<()> {
        let name = name.as_ref();
        if self.state != State::Name {
            return Err(self.invalid_state("write an element name"));
        }
        let depth = self.contexts.len();
        let first_top_level = depth == 1 && self.buf.len() == 4;
        let top_level_check = self.top_level_check(Some(name));
        let ctx = self
            .contexts
            .last_mut()
            .ok_or_else(|| Error::serialization("no document is open"))?;
        if first_top_level {
            ctx.check_element_names = top_level_check;
        }
        Self::check_name(name, ctx.check_element_names)?;
        self.pending_name = Some(name.to_string());
        self.state = State::Value;
        Ok(())
    }

    /// Writes the type tag and name for the next value.
    fn write_key(&mut self, element_type: ElementType) -> Result<()> {
        if self.state != State::Value {
            return Err(self.invalid_state(&format!("write a {element_type:?} value")));
        }
        let ctx = self
            .contexts
            .last_mut()
            .ok_or_else(|| Error::serialization("no document is open"))?;
        self.buf.push(element_type as u8);
        match ctx.kind {
            ContextKind::Document => {
                let name = self
                    .pending_name
                    .take()
                    .ok_or_else(|| Error::serialization("element name was not written"))?;
                self.buf.extend_from_slice(name.as_bytes());
            }
            ContextKind::Array => {
                self.buf.extend_from_slice(ctx.next_index.to_string().as_bytes());
                ctx.next_index += 1;
            }
        }
        self.buf.push(0);
        Ok(())
    }

    fn after_value(&mut self) {
        self.state = match self.contexts.last() {
            Some(Context {
                kind: ContextKind::Document,
                ..
            }) => State::Name,
            Some(Context {
                kind: ContextKind::Array,
                ..
            }) => State::Value,
            None => State::Done,
        };
    }

    fn open(&mut self, kind: ContextKind) -> Result<()> {
        let check_element_names = match self.contexts.last() {
            Some(parent) => parent.check_element_names,
            None => self.top_level_check(None),
        };
        match self.state {
            State::Initial if kind == ContextKind::Document => {}
            State::Value => self.write_key(match kind {
                ContextKind::Document => ElementType::EmbeddedDocument,
                ContextKind::Array => ElementType::Array,
            })?,
            _ => return Err(self.invalid_state("start a document")),
        }
        let start = self.buf.len();
        self.buf.extend(MIN_BSON_DOCUMENT_SIZE.to_le_bytes());
        self.contexts.push(Context {
            kind,
            start,
            next_index: 0,
            check_element_names,
        });
        self.state = match kind {
            ContextKind::Document => State::Name,
            ContextKind::Array => State::Value,
        };
        Ok(())
    }

    /// Pops the innermost context, writing its terminator and back-patching its length.
    fn close_innermost(&mut self) -> Result<()> {
        let ctx = self
            .contexts
            .pop()
            .ok_or_else(|| Error::serialization("no document is open"))?;
        self.buf.push(0);
        let len = self.buf.len() - ctx.start;
        let len_bytes = i32::try_from(len)
            .map_err(|_| Error::serialization(format!("document of {len} bytes is too large")))?
            .to_le_bytes();
        self.buf[ctx.start..ctx.start + 4].copy_from_slice(&len_bytes);
        self.after_value();
        if self.contexts.is_empty() && len > self.settings.max_document_size {
            return Err(Error::serialization(format!(
                "document of {len} bytes exceeds the maximum of {}",
                self.settings.max_document_size
            )));
        }
        Ok(())
    }

    fn close(&mut self, kind: ContextKind) -> Result<()> {
        let expected_state = match kind {
            ContextKind::Document => State::Name,
            ContextKind::Array => State::Value,
        };
        match self.contexts.last() {
            Some(ctx) if ctx.kind == kind && self.state == expected_state => {
                self.close_innermost()
            }
            _ => Err(self.invalid_state(&format!("end {kind:?}"))),
        }
    }

    /// Closes every context opened at or above `depth`.
    fn close_to_depth(&mut self, depth: usize) {
        while self.contexts.len() >= depth && !self.contexts.is_empty() {
            // only fails on oversize, which the caller already sees as an error
            let _ = self.close_innermost();
        }
    }

    pub fn write_start_document(&mut self) -> Result<()> {
        self.open(ContextKind::Document)
    }

    pub fn write_end_document(&mut self) -> Result<()> {
        self.close(ContextKind::Document)
    }

    pub fn write_start_array(&mut self) -> Result<()> {
        self.open(ContextKind::Array)
    }

    pub fn write_end_array(&mut self) -> Result<()> {
        self.close(ContextKind::Array)
    }

    /// Starts a document and returns a guard that closes it, and anything opened inside it, when
    /// dropped.
    pub fn document_scope(&mut self) -> Result<DocumentScope<'_>> {
        self.write_start_document()?;
        let depth = self.contexts.len();
        Ok(DocumentScope {
            writer: self,
            depth,
            ended: false,
        })
    }

    pub fn write_double(&mut self, value: f64) -> Result<()> {
        self.write_key(ElementType::Double)?;
        self.buf.extend(value.to_le_bytes());
        self.after_value();
        Ok(())
    }

    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_key(ElementType::String)?;
        append_string(&mut self.buf, value);
        self.after_value();
        Ok(())
    }

    pub fn write_symbol(&mut self, value: &str) -> Result<()> {
        self.write_key(ElementType::Symbol)?;
        append_string(&mut self.buf, value);
        self.after_value();
        Ok(())
    }

    pub fn write_javascript(&mut self, code: &str) -> Result<()> {
        self.write_key(ElementType::JavaScriptCode)?;
        append_string(&mut self.buf, code);
        self.after_value();
        Ok(())
    }

    pub fn write_binary(&mut self, value: &Binary) -> Result<()> {
        self.write_key(ElementType::Binary)?;
        append_binary(&mut self.buf, value);
        self.after_value();
        Ok(())
    }

    pub fn write_object_id(&mut self, value: ObjectId) -> Result<()> {
        self.write_key(ElementType::ObjectId)?;
        self.buf.extend(value.bytes());
        self.after_value();
        Ok(())
    }

    pub fn write_boolean(&mut self, value: bool) -> Result<()> {
        self.write_key(ElementType::Boolean)?;
        self.buf.push(value as u8);
        self.after_value();
        Ok(())
    }

    pub fn write_datetime(&mut self, value: DateTime) -> Result<()> {
        self.write_key(ElementType::DateTime)?;
        self.buf.extend(value.timestamp_millis().to_le_bytes());
        self.after_value();
        Ok(())
    }

    fn write_marker(&mut self, element_type: ElementType) -> Result<()> {
        self.write_key(element_type)?;
        self.after_value();
        Ok(())
    }

    pub fn write_null(&mut self) -> Result<()> {
        self.write_marker(ElementType::Null)
    }

    pub fn write_undefined(&mut self) -> Result<()> {
        self.write_marker(ElementType::Undefined)
    }

    pub fn write_min_key(&mut self) -> Result<()> {
        self.write_marker(ElementType::MinKey)
    }

    pub fn write_max_key(&mut self) -> Result<()> {
        self.write_marker(ElementType::MaxKey)
    }

    pub fn write_regular_expression(&mut self, value: &Regex) -> Result<()> {
        if value.pattern.contains('\0') || value.options.contains('\0') {
            return Err(Error::serialization("regex cannot contain a null byte"));
        }
        self.write_key(ElementType::RegularExpression)?;
        append_regex(&mut self.buf, value);
        self.after_value();
        Ok(())
    }

    pub fn write_javascript_with_scope(&mut self, value: &JavaScriptCodeWithScope) -> Result<()> {
        self.write_key(ElementType::JavaScriptCodeWithScope)?;
        let check = self.current_check();
        append_code_with_scope(&mut self.buf, value, check)?;
        self.after_value();
        Ok(())
    }

    pub fn write_int32(&mut self, value: i32) -> Result<()> {
        self.write_key(ElementType::Int32)?;
        self.buf.extend(value.to_le_bytes());
        self.after_value();
        Ok(())
    }

    pub fn write_timestamp(&mut self, value: Timestamp) -> Result<()> {
        self.write_key(ElementType::Timestamp)?;
        self.buf.extend(value.to_le_bytes());
        self.after_value();
        Ok(())
    }

    pub fn write_int64(&mut self, value: i64) -> Result<()> {
        self.write_key(ElementType::Int64)?;
        self.buf.extend(value.to_le_bytes());
        self.after_value();
        Ok(())
    }

    fn current_check(&self) -> bool {
        self.contexts
            .last()
            .map(|c| c.check_element_names)
            .unwrap_or(self.settings.check_element_names)
    }

    /// Writes a whole document, either as the top-level document or as the current value.
    pub fn write_document(&mut self, doc: &Document) -> Result<()> {
        let check = match self.state {
            State::Initial => self.top_level_check(doc.keys().next().map(String::as_str)),
            State::Value => {
                self.write_key(ElementType::EmbeddedDocument)?;
                self.current_check()
            }
            _ => return Err(self.invalid_state("write a document")),
        };
        let start = self.buf.len();
        append_document(&mut self.buf, doc, check)?;
        self.after_value();
        let len = self.buf.len() - start;
        if self.contexts.is_empty() && len > self.settings.max_document_size {
            return Err(Error::serialization(format!(
                "document of {len} bytes exceeds the maximum of {}",
                self.settings.max_document_size
            )));
        }
        Ok(())
    }

    /// Writes any value as the current element.
    pub fn write_value(&mut self, value: &Bson) -> Result<()> {
        match value {
            Bson::Double(v) => self.write_double(*v),
            Bson::String(s) => self.write_string(s),
            Bson::Array(a) => {
                self.write_key(ElementType::Array)?;
                let check = self.current_check();
                append_array(&mut self.buf, a, check)?;
                self.after_value();
                Ok(())
            }
            Bson::Document(d) => self.write_document(d),
            Bson::Boolean(b) => self.write_boolean(*b),
            Bson::Null => self.write_null(),
            Bson::RegularExpression(r) => self.write_regular_expression(r),
            Bson::JavaScriptCode(c) => self.write_javascript(c),
            Bson::JavaScriptCodeWithScope(c) => self.write_javascript_with_scope(c),
            Bson::Int32(i) => self.write_int32(*i),
            Bson::Int64(i) => self.write_int64(*i),
            Bson::Timestamp(ts) => self.write_timestamp(*ts),
            Bson::Binary(b) => self.write_binary(b),
            Bson::ObjectId(oid) => self.write_object_id(*oid),
            Bson::DateTime(dt) => self.write_datetime(*dt),
            Bson::Symbol(s) => self.write_symbol(s),
            Bson::Undefined => self.write_undefined(),
            Bson::MaxKey => self.write_max_key(),
            Bson::MinKey => self.write_min_key(),
        }
    }
}

/// Guard returned by [`BsonWriter::document_scope`].
pub struct DocumentScope<'w> {
    writer: &'w mut BsonWriter,
    depth: usize,
    ended: bool,
}

impl DocumentScope<'_> {
    /// Closes the document, reporting any error from doing so.
    pub fn end(mut self) -> Result<()> {
        self.ended = true;
        self.writer.write_end_document()
    }
}

impl Deref for DocumentScope<'_> {
    type Target = BsonWriter;

    fn deref(&self) -> &BsonWriter {
        self.writer
    }
}

impl DerefMut for DocumentScope<'_> {
    fn deref_mut(&mut self) -> &mut BsonWriter {
        self.writer
    }
}

impl Drop for DocumentScope<'_> {
    fn drop(&mut self) {
        if !self.ended {
            self.writer.close_to_depth(self.depth);
        }
    }
}

fn append_binary(buf: &mut Vec<u8>, value: &Binary) {
    let len = if let BinarySubtype::BinaryOld = value.subtype {
        value.bytes.len() + 4
    } else {
        value.bytes.len()
    };
    buf.extend((len as i32).to_le_bytes());
    buf.push(value.subtype.into());
    if let BinarySubtype::BinaryOld = value.subtype {
        buf.extend((value.bytes.len() as i32).to_le_bytes());
    }
    buf.extend_from_slice(&value.bytes);
}

fn append_regex(buf: &mut Vec<u8>, value: &Regex) {
    buf.extend_from_slice(value.pattern.as_bytes());
    buf.push(0);
    // Regex::new keeps options sorted, but the fields are public
    let mut options: Vec<char> = value.options.chars().collect();
    options.sort_unstable();
    buf.extend(options.into_iter().collect::<String>().as_bytes());
    buf.push(0);
}

fn append_string(buf: &mut Vec<u8>, value: &str) {
    buf.extend(((value.len() + 1) as i32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
    buf.push(0);
}

fn append_code_with_scope(
    buf: &mut Vec<u8>,
    value: &JavaScriptCodeWithScope,
    check_element_names: bool,
) -> Result<()> {
    let start = buf.len();
    buf.extend([0; 4]);
    append_string(buf, &value.code);
    append_document(buf, &value.scope, check_element_names)?;
    let len = (buf.len() - start) as i32;
    buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

fn append_key(
    doc: &mut DocWriter<'_>,
    element_type: ElementType,
    name: &str,
    check: bool,
) -> Result<()> {
    BsonWriter::check_name(name, check)?;
    doc.append_key(element_type, name);
    Ok(())
}

pub(crate) fn append_document(buf: &mut Vec<u8>, doc: &Document, check: bool) -> Result<()> {
    let mut writer = DocWriter::open(buf);
    for (name, value) in doc {
        append_key(&mut writer, value.element_type(), name, check)?;
        append_payload(writer.buffer(), value, check).map_err(|e| e.with_key(name))?;
    }
    Ok(())
}

fn append_array(buf: &mut Vec<u8>, array: &[Bson], check: bool) -> Result<()> {
    let mut writer = DocWriter::open(buf);
    for (i, value) in array.iter().enumerate() {
        writer.append_key(value.element_type(), &i.to_string());
        append_payload(writer.buffer(), value, check).map_err(|e| e.with_index(i))?;
    }
    Ok(())
}

fn append_payload(buf: &mut Vec<u8>, value: &Bson, check: bool) -> Result<()> {
    match value {
        Bson::Double(v) => buf.extend(v.to_le_bytes()),
        Bson::String(s) | Bson::Symbol(s) | Bson::JavaScriptCode(s) => append_string(buf, s),
        Bson::Array(a) => append_array(buf, a, check)?,
        Bson::Document(d) => append_document(buf, d, check)?,
        Bson::Boolean(b) => buf.push(*b as u8),
        Bson::Null | Bson::Undefined | Bson::MaxKey | Bson::MinKey => {}
        Bson::RegularExpression(r) => {
            if r.pattern.contains('\0') || r.options.contains('\0') {
                return Err(Error::serialization("regex cannot contain a null byte"));
            }
            append_regex(buf, r)
        }
        Bson::JavaScriptCodeWithScope(c) => append_code_with_scope(buf, c, check)?,
        Bson::Int32(i) => buf.extend(i.to_le_bytes()),
        Bson::Int64(i) => buf.extend(i.to_le_bytes()),
        Bson::Timestamp(ts) => buf.extend(ts.to_le_bytes()),
        Bson::Binary(b) => append_binary(buf, b),
        Bson::ObjectId(oid) => buf.extend(oid.bytes()),
        Bson::DateTime(dt) => buf.extend(dt.timestamp_millis().to_le_bytes()),
    }
    Ok(())
}

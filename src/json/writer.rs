//! Renders BSON values as shell-compatible JSON.

use std::fmt::{self, Write};

use crate::{Bson, Document};

/// Writes `doc` in shell syntax, e.g. `{ "_id" : ObjectId("..."), "n" : NumberLong(5) }`.
pub(crate) fn write_document<W: Write + ?Sized>(out: &mut W, doc: &Document) -> fmt::Result {
    if doc.is_empty() {
        return out.write_str("{ }");
    }
    out.write_str("{ ")?;
    for (i, (name, value)) in doc.iter().enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        write_string(out, name)?;
        out.write_str(" : ")?;
        write_value(out, value)?;
    }
    out.write_str(" }")
}

fn write_array<W: Write + ?Sized>(out: &mut W, array: &[Bson]) -> fmt::Result {
    out.write_char('[')?;
    for (i, value) in array.iter().enumerate() {
        if i > 0 {
            out.write_str(", ")?;
        }
        write_value(out, value)?;
    }
    out.write_char(']')
}

fn write_string<W: Write + ?Sized>(out: &mut W, s: &str) -> fmt::Result {
    out.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => out.write_str("\\\"")?,
            '\\' => out.write_str("\\\\")?,
            '\u{8}' => out.write_str("\\b")?,
            '\u{c}' => out.write_str("\\f")?,
            '\n' => out.write_str("\\n")?,
            '\r' => out.write_str("\\r")?,
            '\t' => out.write_str("\\t")?,
            c if c.is_control() => write!(out, "\\u{:04x}", c as u32)?,
            c => out.write_char(c)?,
        }
    }
    out.write_char('"')
}

fn write_double<W: Write + ?Sized>(out: &mut W, d: f64) -> fmt::Result {
    if d.is_nan() {
        out.write_str("NaN")
    } else if d.is_infinite() {
        out.write_str(if d > 0.0 { "Infinity" } else { "-Infinity" })
    } else if d.fract() == 0.0 && d.abs() < 1e16 {
        // keep a decimal point so the value reads back as a double
        write!(out, "{d:.1}")
    } else {
        write!(out, "{d}")
    }
}

pub(crate) fn write_value<W: Write + ?Sized>(out: &mut W, value: &Bson) -> fmt::Result {
    match value {
        Bson::Double(d) => write_double(out, *d),
        Bson::String(s) => write_string(out, s),
        Bson::Array(a) => write_array(out, a),
        Bson::Document(d) => write_document(out, d),
        Bson::Boolean(b) => write!(out, "{b}"),
        Bson::Null => out.write_str("null"),
        Bson::RegularExpression(r) => {
            write!(out, "/{}/{}", r.pattern, r.options)
        }
        Bson::JavaScriptCode(code) => {
            out.write_str("{ \"$code\" : ")?;
            write_string(out, code)?;
            out.write_str(" }")
        }
        Bson::JavaScriptCodeWithScope(c) => {
            out.write_str("{ \"$code\" : ")?;
            write_string(out, &c.code)?;
            out.write_str(", \"$scope\" : ")?;
            write_document(out, &c.scope)?;
            out.write_str(" }")
        }
        Bson::Int32(i) => write!(out, "{i}"),
        Bson::Int64(i) => write!(out, "NumberLong({i})"),
        Bson::Timestamp(ts) => write!(out, "Timestamp({}, {})", ts.time, ts.increment),
        Bson::Binary(b) => write!(out, "{b}"),
        Bson::ObjectId(oid) => write!(out, "ObjectId(\"{oid}\")"),
        Bson::DateTime(dt) => match dt.is_representable().then(|| dt.try_to_rfc3339_string()) {
            Some(Ok(s)) => write!(out, "ISODate(\"{s}\")"),
            _ => write!(out, "new Date({})", dt.timestamp_millis()),
        },
        Bson::Symbol(s) => {
            out.write_str("{ \"$symbol\" : ")?;
            write_string(out, s)?;
            out.write_str(" }")
        }
        Bson::Undefined => out.write_str("undefined"),
        Bson::MaxKey => out.write_str("MaxKey"),
        Bson::MinKey => out.write_str("MinKey"),
    }
}

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

//! Core building blocks of a MongoDB client: the BSON value model and wire codec, typed
//! object mapping, connection pooling, server selection and sessions.
//!
//! ## Documents
//!
//! ```rust
//! use mongo_core::{doc, Document};
//!
//! let doc = doc! { "name": "Ada", "born": 1815 };
//! let bytes = doc.to_vec()?;
//! assert_eq!(Document::from_slice(&bytes)?, doc);
//! assert_eq!(Document::parse(r#"{ "name" : "Ada", "born" : 1815 }"#)?, doc);
//! # Ok::<(), mongo_core::error::Error>(())
//! ```
//!
//! ## Mapped types
//!
//! Types implementing [`class_map::BsonClass`] are mapped member by member, with element
//! names, id handling and defaults decided by the conventions registered on the
//! [`serializer::SerializationContext`]. Polymorphic values are Rust enums implementing
//! [`class_map::discriminator::BsonHierarchy`].
//!
//! ## Connections
//!
//! A [`sdam::Cluster`] owns one [`cmap::ConnectionPool`] per server. A
//! [`session::ClusterSession`] selects a server for each request and hands out
//! [`session::Channel`]s that run commands over OP_MSG.

pub use self::{
    binary::Binary,
    bson::{Array, Bson, JavaScriptCodeWithScope, Regex, Timestamp},
    datetime::DateTime,
    document::Document,
};

#[macro_use]
pub mod macros;
mod binary;
mod bson;
pub mod cancellation;
pub mod class_map;
pub mod cmap;
mod datetime;
pub mod document;
pub mod error;
pub mod json;
pub mod oid;
pub mod raw;
pub mod sdam;
pub mod serializer;
pub mod session;
pub mod settings;
pub mod spec;
pub mod wire;

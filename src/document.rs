//! A BSON document represented as an ordered list of named elements.

use std::{
    fmt::{self, Debug, Display, Formatter},
    iter::{Extend, FromIterator, IntoIterator},
};

use ahash::AHashMap;

use crate::{
    Binary,
    DateTime,
    bson::{Array, Bson, Timestamp},
    error::{Error, Result},
    oid::ObjectId,
    spec::{BinarySubtype, ElementType},
};

pub type ValueAccessResult<T> = Result<T>;

/// A BSON document: an ordered sequence of `(name, value)` elements.
///
/// Element names are unique through every mutating API. The one exception is documents parsed or
/// deserialized with duplicate names explicitly allowed; for those, name lookups see the first
/// element with that name and every element remains reachable by index.
#[derive(Clone, Default)]
pub struct Document {
    elements: Vec<(String, Bson)>,
    index: AHashMap<String, usize>,
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.elements == other.elements
    }
}

impl Display for Document {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        crate::json::writer::write_document(fmt, self)
    }
}

impl Debug for Document {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        write!(fmt, "Document(")?;
        fmt.debug_map()
            .entries(self.elements.iter().map(|(k, v)| (k, v)))
            .finish()?;
        write!(fmt, ")")
    }
}

/// An owning iterator over Document entries.
pub struct IntoIter {
    inner: std::vec::IntoIter<(String, Bson)>,
}

/// An iterator over Document entries.
pub struct Iter<'a> {
    inner: std::slice::Iter<'a, (String, Bson)>,
}

/// An iterator over a [`Document`]'s keys and mutable values.
pub struct IterMut<'a> {
    inner: std::slice::IterMut<'a, (String, Bson)>,
}

impl Iterator for IntoIter {
    type Item = (String, Bson);

    fn next(&mut self) -> Option<(String, Bson)> {
        self.inner.next()
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a String, &'a Bson);

    fn next(&mut self) -> Option<(&'a String, &'a Bson)> {
        self.inner.next().map(|(k, v)| (k, v))
    }
}

impl<'a> Iterator for IterMut<'a> {
    type Item = (&'a String, &'a mut Bson);

    fn next(&mut self) -> Option<(&'a String, &'a mut Bson)> {
        self.inner.next().map(|(k, v)| (&*k, v))
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            inner: self.elements.into_iter(),
        }
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Bson);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K: Into<String>, V: Into<Bson>> FromIterator<(K, V)> for Document {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut doc = Document::new();
        doc.extend(iter);
        doc
    }
}

impl<K: Into<String>, V: Into<Bson>> Extend<(K, V)> for Document {
    fn extend<T: IntoIterator<Item = (K, V)>>(&mut self, iter: T) {
        for (k, v) in iter {
            self.insert(k, v);
        }
    }
}

macro_rules! typed_getters {
    ($($(#[$m:meta])* $get:ident, $get_mut:ident, $variant:ident, $ty:ty, $expected:ident;)*) => {
        $(
            $(#[$m])*
            pub fn $get(&self, key: impl AsRef<str>) -> ValueAccessResult<&$ty> {
                match self.get(key) {
                    Some(Bson::$variant(v)) => Ok(v),
                    Some(other) => Err(Error::value_access_unexpected_type(
                        other.element_type(),
                        ElementType::$expected,
                    )),
                    None => Err(Error::value_access_not_present()),
                }
            }

            $(#[$m])*
            pub fn $get_mut(&mut self, key: impl AsRef<str>) -> ValueAccessResult<&mut $ty> {
                match self.get_mut(key) {
                    Some(Bson::$variant(v)) => Ok(v),
                    Some(other) => Err(Error::value_access_unexpected_type(
                        other.element_type(),
                        ElementType::$expected,
                    )),
                    None => Err(Error::value_access_not_present()),
                }
            }
        )*
    };
}

impl Document {
    /// Creates a new empty Document.
    pub fn new() -> Document {
        Document {
            elements: Vec::new(),
            index: AHashMap::new(),
        }
    }

    /// Gets an iterator over the entries of the map.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            inner: self.elements.iter(),
        }
    }

    /// Gets an iterator over pairs of keys and mutable values.
    pub fn iter_mut(&mut self) -> IterMut<'_> {
        IterMut {
            inner: self.elements.iter_mut(),
        }
    }

    /// Clears the document, removing all values.
    pub fn clear(&mut self) {
        self.elements.clear();
        self.index.clear();
    }

    /// Returns a reference to the Bson corresponding to the key.
    pub fn get(&self, key: impl AsRef<str>) -> Option<&Bson> {
        self.index
            .get(key.as_ref())
            .map(|&i| &self.elements[i].1)
    }

    /// Gets a mutable reference to the Bson corresponding to the key.
    pub fn get_mut(&mut self, key: impl AsRef<str>) -> Option<&mut Bson> {
        let i = *self.index.get(key.as_ref())?;
        Some(&mut self.elements[i].1)
    }

    /// Returns the element at `index` as a `(name, value)` pair.
    pub fn get_element(&self, index: usize) -> Option<(&str, &Bson)> {
        self.elements.get(index).map(|(k, v)| (k.as_str(), v))
    }

    /// Replaces the value at `index`, returning the old value. The element keeps its name.
    pub fn set(&mut self, index: usize, value: impl Into<Bson>) -> Result<Bson> {
        let len = self.elements.len();
        let slot = self.elements.get_mut(index).ok_or_else(|| {
            Error::invalid_argument(format!("index {index} out of range for length {len}"))
        })?;
        Ok(std::mem::replace(&mut slot.1, value.into()))
    }

    /// Returns the position of the first element named `key`.
    pub fn position(&self, key: impl AsRef<str>) -> Option<usize> {
        self.index.get(key.as_ref()).copied()
    }

    /// Get a floating point value for this key if it exists and has the correct type.
    pub fn get_f64(&self, key: impl AsRef<str>) -> ValueAccessResult<f64> {
        self.get_f64_ref(key).copied()
    }

    /// Get a boolean value for this key if it exists and has the correct type.
    pub fn get_bool(&self, key: impl AsRef<str>) -> ValueAccessResult<bool> {
        self.get_bool_ref(key).copied()
    }

    /// Get an i32 value for this key if it exists and has the correct type.
    pub fn get_i32(&self, key: impl AsRef<str>) -> ValueAccessResult<i32> {
        self.get_i32_ref(key).copied()
    }

    /// Get an i64 value for this key if it exists and has the correct type.
    pub fn get_i64(&self, key: impl AsRef<str>) -> ValueAccessResult<i64> {
        self.get_i64_ref(key).copied()
    }

    /// Get an object id value for this key if it exists and has the correct type.
    pub fn get_object_id(&self, key: impl AsRef<str>) -> ValueAccessResult<ObjectId> {
        self.get_object_id_ref(key).copied()
    }

    /// Get a timestamp value for this key if it exists and has the correct type.
    pub fn get_timestamp(&self, key: impl AsRef<str>) -> ValueAccessResult<Timestamp> {
        self.get_timestamp_ref(key).copied()
    }

    /// Get a string slice this key if it exists and has the correct type.
    pub fn get_str(&self, key: impl AsRef<str>) -> ValueAccessResult<&str> {
        self.get_string(key).map(String::as_str)
    }

    /// Get a reference to a generic binary value for this key if it exists and has the correct
    /// type.
    pub fn get_binary_generic(&self, key: impl AsRef<str>) -> ValueAccessResult<&Vec<u8>> {
        match self.get_binary(key)? {
            Binary {
                subtype: BinarySubtype::Generic,
                bytes,
            } => Ok(bytes),
            _ => Err(Error::value_access_unexpected_type(
                ElementType::Binary,
                ElementType::Binary,
            )),
        }
    }

    typed_getters! {
        /// Typed access to a double element.
        get_f64_ref, get_f64_mut, Double, f64, Double;
        /// Typed access to a string element.
        get_string, get_str_mut, String, String, String;
        /// Typed access to an array element.
        get_array, get_array_mut, Array, Array, Array;
        /// Typed access to an embedded document element.
        get_document, get_document_mut, Document, Document, EmbeddedDocument;
        /// Typed access to a boolean element.
        get_bool_ref, get_bool_mut, Boolean, bool, Boolean;
        /// Typed access to an Int32 element.
        get_i32_ref, get_i32_mut, Int32, i32, Int32;
        /// Typed access to an Int64 element.
        get_i64_ref, get_i64_mut, Int64, i64, Int64;
        /// Typed access to a timestamp element.
        get_timestamp_ref, get_timestamp_mut, Timestamp, Timestamp, Timestamp;
        /// Typed access to a binary element.
        get_binary, get_binary_mut, Binary, Binary, Binary;
        /// Typed access to an ObjectId element.
        get_object_id_ref, get_object_id_mut, ObjectId, ObjectId, ObjectId;
        /// Typed access to a datetime element.
        get_datetime, get_datetime_mut, DateTime, DateTime, DateTime;
    }

    /// Returns whether this key has a null value.
    pub fn is_null(&self, key: impl AsRef<str>) -> bool {
        self.get(key) == Some(&Bson::Null)
    }

    /// Returns true if the map contains a value for the specified key.
    pub fn contains_key(&self, key: impl AsRef<str>) -> bool {
        self.index.contains_key(key.as_ref())
    }

    /// Gets a collection of all keys in the document.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.elements.iter().map(|(k, _)| k)
    }

    /// Gets a collection of all values in the document.
    pub fn values(&self) -> impl Iterator<Item = &Bson> {
        self.elements.iter().map(|(_, v)| v)
    }

    /// Returns the number of elements in the document.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if the document contains no elements
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Sets the value of the entry with the OccupiedEntry's key,
    /// and returns the entry's old value. Accepts any type that
    /// can be converted into Bson.
    ///
    /// A new key is appended at the end; an existing key keeps its position.
    pub fn insert<KT: Into<String>, BT: Into<Bson>>(&mut self, key: KT, val: BT) -> Option<Bson> {
        let key = key.into();
        let val = val.into();
        match self.index.get(&key) {
            Some(&i) => Some(std::mem::replace(&mut self.elements[i].1, val)),
            None => {
                self.index.insert(key.clone(), self.elements.len());
                self.elements.push((key, val));
                None
            }
        }
    }

    /// Appends an element, failing if the name is already present.
    pub fn push(&mut self, key: impl Into<String>, val: impl Into<Bson>) -> Result<()> {
        let key = key.into();
        if self.index.contains_key(&key) {
            return Err(Error::duplicate_element_name(key));
        }
        self.insert(key, val);
        Ok(())
    }

    /// Appends an element even when the name is already present. Only parse paths that allow
    /// duplicate names use this.
    pub(crate) fn push_duplicate(&mut self, key: String, val: Bson) {
        self.index.entry(key.clone()).or_insert(self.elements.len());
        self.elements.push((key, val));
    }

    /// Inserts an element at `position`, shifting later elements. Fails if the name is present.
    pub fn insert_at(
        &mut self,
        position: usize,
        key: impl Into<String>,
        val: impl Into<Bson>,
    ) -> Result<()> {
        let key = key.into();
        if self.index.contains_key(&key) {
            return Err(Error::duplicate_element_name(key));
        }
        if position > self.elements.len() {
            return Err(Error::invalid_argument(format!(
                "index {position} out of range for length {}",
                self.elements.len()
            )));
        }
        self.elements.insert(position, (key, val.into()));
        self.reindex();
        Ok(())
    }

    /// Takes the value of the entry out of the document, and returns it.
    pub fn remove(&mut self, key: impl AsRef<str>) -> Option<Bson> {
        let i = self.position(key)?;
        self.remove_at(i).map(|(_, v)| v)
    }

    /// Removes the element at `index`, returning it.
    pub fn remove_at(&mut self, index: usize) -> Option<(String, Bson)> {
        if index >= self.elements.len() {
            return None;
        }
        let removed = self.elements.remove(index);
        self.reindex();
        Some(removed)
    }

    /// Whether two elements share a name. Only possible for documents read with duplicate names
    /// allowed.
    pub fn has_duplicate_names(&self) -> bool {
        self.index.len() != self.elements.len()
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, (k, _)) in self.elements.iter().enumerate() {
            self.index.entry(k.clone()).or_insert(i);
        }
    }

    /// Renders this document in shell-compatible JSON.
    pub fn to_json(&self) -> String {
        self.to_string()
    }

    /// Encodes this document to BSON bytes.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut writer = crate::raw::BsonWriter::new(Default::default());
        writer.write_document(self)?;
        Ok(writer.into_bytes())
    }

    /// Decodes a document from BSON bytes. Duplicate element names are rejected.
    pub fn from_slice(bytes: &[u8]) -> Result<Document> {
        let mut reader = crate::raw::BsonReader::new(bytes);
        let doc = reader.read_document(false)?;
        reader.finish()?;
        Ok(doc)
    }

    /// Parses shell-compatible JSON into a document. Duplicate element names are rejected.
    pub fn parse(json: impl AsRef<str>) -> Result<Document> {
        crate::json::parse_document(json.as_ref())
    }
}

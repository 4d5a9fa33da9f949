//! Serializers for dynamic values, documents and generic containers.

use std::{
    collections::{BTreeMap, HashMap},
    marker::PhantomData,
    sync::Arc,
};

use ahash::AHashSet;

use super::{
    BsonSerializer,
    BsonType,
    SerializationContext,
    SerializationOptions,
    primitives::unexpected_type,
};
use crate::{
    Bson,
    Document,
    error::{Error, Result},
    raw::{BsonReader, BsonWriter},
    spec::ElementType,
};

/// The element name of the document written for `None` when the inner type can itself be null.
pub const NONE_SENTINEL_ELEMENT: &str = "_none";

/// Whether the reader is positioned on a document value (or the top-level document).
fn at_document(reader: &BsonReader<'_>) -> bool {
    matches!(reader.current_type(), None | Some(ElementType::EmbeddedDocument))
}

/// Serializes [`Bson`] values, dispatching on the wire type when reading.
#[derive(Clone, Copy, Debug, Default)]
pub struct BsonValueSerializer;

impl BsonType for Bson {
    fn create_serializer(_ctx: &SerializationContext) -> Result<Arc<dyn BsonSerializer<Self>>> {
        Ok(Arc::new(BsonValueSerializer))
    }

    const NULL_IS_VALUE: bool = true;

    fn is_bson_null(&self) -> bool {
        matches!(self, Bson::Null)
    }
}

impl BsonSerializer<Bson> for BsonValueSerializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &Bson,
        _options: &SerializationOptions,
    ) -> Result<()> {
        writer.write_value(value)
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<Bson> {
        if at_document(reader) {
            return Ok(Bson::Document(
                reader.read_document(options.allow_duplicate_names)?,
            ));
        }
        reader.read_value()
    }
}

/// Serializes [`Document`] values. Duplicate element names are rejected on read unless
/// [`SerializationOptions::allow_duplicate_names`] is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct DocumentSerializer;

impl BsonType for Document {
    fn create_serializer(_ctx: &SerializationContext) -> Result<Arc<dyn BsonSerializer<Self>>> {
        Ok(Arc::new(DocumentSerializer))
    }
}

impl BsonSerializer<Document> for DocumentSerializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &Document,
        _options: &SerializationOptions,
    ) -> Result<()> {
        writer.write_document(value)
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<Document> {
        if !at_document(reader) {
            return Err(unexpected_type(reader, "Document"));
        }
        reader.read_document(options.allow_duplicate_names)
    }
}

/// Serializes `Option<T>`.
///
/// `None` is written as BSON null, unless `T` can hold a null of its own (such as [`Bson`]); then
/// `None` is written as the document `{ "_none" : true }` so that `None` and `Some(Bson::Null)`
/// stay distinguishable.
pub struct OptionSerializer<T>(PhantomData<fn() -> T>);

impl<T> Default for OptionSerializer<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: BsonType> BsonType for Option<T> {
    fn create_serializer(_ctx: &SerializationContext) -> Result<Arc<dyn BsonSerializer<Self>>> {
        Ok(Arc::new(OptionSerializer::<T>::default()))
    }

    const NULL_IS_VALUE: bool = true;

    fn is_bson_null(&self) -> bool {
        self.is_none()
    }
}

impl<T: BsonType> OptionSerializer<T> {
    fn write_sentinel(writer: &mut BsonWriter) -> Result<()> {
        writer.write_start_document()?;
        writer.write_name(NONE_SENTINEL_ELEMENT)?;
        writer.write_boolean(true)?;
        writer.write_end_document()
    }

    /// Consumes the sentinel document if the reader is on one. Leaves the reader in an
    /// unspecified position otherwise, so callers bookmark first.
    fn read_sentinel(reader: &mut BsonReader<'_>) -> Result<bool> {
        reader.read_start_document()?;
        if reader.read_bson_type()? != Some(ElementType::Boolean)
            || reader.read_name()? != NONE_SENTINEL_ELEMENT
            || !reader.read_boolean()?
        {
            return Ok(false);
        }
        if reader.read_bson_type()?.is_some() {
            return Ok(false);
        }
        reader.read_end_document()?;
        Ok(true)
    }
}

impl<T: BsonType> BsonSerializer<Option<T>> for OptionSerializer<T> {
    fn serialize(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &Option<T>,
        options: &SerializationOptions,
    ) -> Result<()> {
        match value {
            None if T::NULL_IS_VALUE => Self::write_sentinel(writer),
            None => writer.write_null(),
            Some(value) => ctx.serializer::<T>()?.serialize(ctx, writer, value, options),
        }
    }

    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<Option<T>> {
        match reader.current_type() {
            Some(ElementType::Null) if !T::NULL_IS_VALUE => {
                reader.read_null()?;
                return Ok(None);
            }
            Some(ElementType::EmbeddedDocument) if T::NULL_IS_VALUE => {
                let bookmark = reader.bookmark();
                if Self::read_sentinel(reader).unwrap_or(false) {
                    return Ok(None);
                }
                reader.return_to_bookmark(bookmark);
            }
            _ => {}
        }
        ctx.serializer::<T>()?
            .deserialize(ctx, reader, options)
            .map(Some)
    }
}

/// Serializes `Vec<T>` as an array, applying [`SerializationOptions::item_options`] to each item.
pub struct ArraySerializer<T>(PhantomData<fn() -> T>);

impl<T> Default for ArraySerializer<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: BsonType> BsonType for Vec<T> {
    fn create_serializer(_ctx: &SerializationContext) -> Result<Arc<dyn BsonSerializer<Self>>> {
        Ok(Arc::new(ArraySerializer::<T>::default()))
    }
}

impl<T: BsonType> BsonSerializer<Vec<T>> for ArraySerializer<T> {
    fn serialize(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &Vec<T>,
        options: &SerializationOptions,
    ) -> Result<()> {
        let items = ctx.serializer::<T>()?;
        let item_options = options.items();
        writer.write_start_array()?;
        for (i, item) in value.iter().enumerate() {
            items
                .serialize(ctx, writer, item, &item_options)
                .map_err(|e| e.with_index(i))?;
        }
        writer.write_end_array()
    }

    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<Vec<T>> {
        if reader.current_type() != Some(ElementType::Array) {
            return Err(unexpected_type(reader, "Vec"));
        }
        let items = ctx.serializer::<T>()?;
        let item_options = options.items();
        let mut out = Vec::new();
        reader.read_start_array()?;
        while reader.read_bson_type()?.is_some() {
            reader.read_name()?;
            let item = items
                .deserialize(ctx, reader, &item_options)
                .map_err(|e| e.with_index(out.len()))?;
            out.push(item);
        }
        reader.read_end_array()?;
        Ok(out)
    }
}

/// Serializes string-keyed maps as documents, applying
/// [`SerializationOptions::item_options`] to each value.
pub struct MapSerializer<M, T>(PhantomData<fn() -> (M, T)>);

impl<M, T> Default for MapSerializer<M, T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T: BsonType> BsonType for HashMap<String, T> {
    fn create_serializer(_ctx: &SerializationContext) -> Result<Arc<dyn BsonSerializer<Self>>> {
        Ok(Arc::new(MapSerializer::<Self, T>::default()))
    }
}

impl<T: BsonType> BsonType for BTreeMap<String, T> {
    fn create_serializer(_ctx: &SerializationContext) -> Result<Arc<dyn BsonSerializer<Self>>> {
        Ok(Arc::new(MapSerializer::<Self, T>::default()))
    }
}

impl<M, T> BsonSerializer<M> for MapSerializer<M, T>
where
    M: FromIterator<(String, T)> + Send + Sync + 'static,
    for<'a> &'a M: IntoIterator<Item = (&'a String, &'a T)>,
    T: BsonType,
{
    fn serialize(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &M,
        options: &SerializationOptions,
    ) -> Result<()> {
        let values = ctx.serializer::<T>()?;
        let item_options = options.items();
        writer.write_start_document()?;
        for (key, item) in value {
            writer.write_name(key).map_err(|e| e.with_key(key))?;
            values
                .serialize(ctx, writer, item, &item_options)
                .map_err(|e| e.with_key(key))?;
        }
        writer.write_end_document()
    }

    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<M> {
        if !at_document(reader) {
            return Err(unexpected_type(reader, "map"));
        }
        let values = ctx.serializer::<T>()?;
        let item_options = options.items();
        let mut seen = AHashSet::new();
        let mut entries = Vec::new();
        reader.read_start_document()?;
        while reader.read_bson_type()?.is_some() {
            let key = reader.read_name()?;
            if !seen.insert(key) && !options.allow_duplicate_names {
                return Err(Error::duplicate_element_name(key));
            }
            let item = values
                .deserialize(ctx, reader, &item_options)
                .map_err(|e| e.with_key(key))?;
            entries.push((key.to_string(), item));
        }
        reader.read_end_document()?;
        Ok(entries.into_iter().collect())
    }
}

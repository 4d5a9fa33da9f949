//! Typed serialization between Rust values and BSON.
//!
//! Every serializable type implements [`BsonType`], which knows how to build the
//! [`BsonSerializer`] for that type. A [`SerializationContext`] caches one serializer instance per
//! type, along with the class maps and hierarchy maps built for mapped types, and the convention
//! packs used to build them. A process-wide context backs the free functions in this module;
//! tests and embedders can create their own context instead.
//!
//! ```rust
//! use mongo_core::{doc, serializer};
//! # fn main() -> mongo_core::error::Result<()> {
//! let bytes = serializer::to_vec(&doc! { "x": 1 })?;
//! let doc: mongo_core::Document = serializer::from_slice(&bytes)?;
//! assert_eq!(doc, doc! { "x": 1 });
//! # Ok(())
//! # }
//! ```

mod options;
mod primitives;
mod values;

use std::{
    any::{Any, TypeId},
    sync::{Arc, LazyLock},
};

use ahash::AHashMap;
use parking_lot::RwLock;

pub use self::{
    options::SerializationOptions,
    primitives::{
        BinarySerializer,
        BooleanSerializer,
        DateTimeSerializer,
        DoubleSerializer,
        Int32Serializer,
        Int64Serializer,
        ObjectIdSerializer,
        RegexSerializer,
        StringSerializer,
        SystemTimeSerializer,
        TimestampSerializer,
        UInt32Serializer,
        UInt64Serializer,
        UuidSerializer,
    },
    values::{
        ArraySerializer,
        BsonValueSerializer,
        DocumentSerializer,
        MapSerializer,
        OptionSerializer,
        NONE_SENTINEL_ELEMENT,
    },
};
pub(crate) use self::{options::convert, primitives::unexpected_type};

use crate::{
    Document,
    class_map::{
        BsonClass,
        ClassMap,
        conventions::ConventionRegistry,
        discriminator::{BsonHierarchy, HierarchyMap},
        id_generators::{IdGenerator, ObjectIdGenerator, StringObjectIdGenerator, UuidGenerator},
    },
    error::{Error, Result},
    json::JsonReaderSettings,
    oid::ObjectId,
    raw::{BsonReader, BsonWriter, BsonWriterSettings},
    spec::ElementType,
};

/// Writes and reads values of one type.
///
/// `serialize` is called with the writer positioned where a value is expected: either after an
/// element name, inside an array, or before the top-level document. `deserialize` is called with
/// the reader positioned on a value whose type tag and name have been read, or before the
/// top-level document.
pub trait BsonSerializer<T>: Send + Sync {
    fn serialize(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &T,
        options: &SerializationOptions,
    ) -> Result<()>;

    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<T>;
}

/// A type that can be serialized to and from BSON.
///
/// Mapped classes get this through [`BsonClass`]; polymorphic enums implement it by returning a
/// [`HierarchySerializer`](crate::class_map::discriminator::HierarchySerializer).
pub trait BsonType: Sized + Send + Sync + 'static {
    /// Builds the serializer for this type. Called at most once per context unless two threads
    /// race on first use, in which case the first instance cached wins.
    fn create_serializer(ctx: &SerializationContext) -> Result<Arc<dyn BsonSerializer<Self>>>;

    /// Whether this type can itself hold a BSON null, making `None` and `Some(null)` different
    /// values of `Option<Self>`.
    const NULL_IS_VALUE: bool = false;

    /// Whether this value serializes as BSON null. Drives the ignore-if-null member option.
    fn is_bson_null(&self) -> bool {
        false
    }
}

impl<T: BsonClass> BsonType for T {
    fn create_serializer(ctx: &SerializationContext) -> Result<Arc<dyn BsonSerializer<Self>>> {
        Ok(Arc::new(crate::class_map::ClassMapSerializer::<T>::new(
            ctx.class_map::<T>()?,
        )))
    }
}

type Cache = RwLock<AHashMap<TypeId, Box<dyn Any + Send + Sync>>>;

/// Looks up `key`, building and caching the value on a miss. Construction happens outside the
/// lock; if two callers race, the value inserted first is returned to both.
fn get_or_create<V: Clone + Send + Sync + 'static>(
    cache: &Cache,
    key: TypeId,
    create: impl FnOnce() -> Result<V>,
) -> Result<V> {
    if let Some(v) = cache.read().get(&key).and_then(|v| v.downcast_ref::<V>()) {
        return Ok(v.clone());
    }
    let created = create()?;
    let mut guard = cache.write();
    let entry = guard.entry(key).or_insert_with(|| Box::new(created));
    entry
        .downcast_ref::<V>()
        .cloned()
        .ok_or_else(|| Error::serialization("cache entry has an unexpected type"))
}

fn default_id_generators() -> AHashMap<TypeId, Arc<dyn IdGenerator>> {
    let mut generators: AHashMap<TypeId, Arc<dyn IdGenerator>> = AHashMap::new();
    generators.insert(TypeId::of::<ObjectId>(), Arc::new(ObjectIdGenerator));
    generators.insert(TypeId::of::<Option<ObjectId>>(), Arc::new(ObjectIdGenerator));
    generators.insert(TypeId::of::<uuid::Uuid>(), Arc::new(UuidGenerator));
    generators.insert(TypeId::of::<Option<uuid::Uuid>>(), Arc::new(UuidGenerator));
    generators
}

/// A registry of serializers, class maps, id generators and conventions.
pub struct SerializationContext {
    serializers: Cache,
    class_maps: Cache,
    hierarchies: Cache,
    conventions: ConventionRegistry,
    id_generators: RwLock<AHashMap<TypeId, Arc<dyn IdGenerator>>>,
}

static GLOBAL: LazyLock<SerializationContext> = LazyLock::new(SerializationContext::new);

impl Default for SerializationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SerializationContext {
    /// Creates an empty context using the standard conventions.
    pub fn new() -> Self {
        Self {
            serializers: RwLock::new(AHashMap::new()),
            class_maps: RwLock::new(AHashMap::new()),
            hierarchies: RwLock::new(AHashMap::new()),
            conventions: ConventionRegistry::new(),
            id_generators: RwLock::new(default_id_generators()),
        }
    }

    /// The process-wide context used by the free functions in this module.
    pub fn global() -> &'static SerializationContext {
        &GLOBAL
    }

    /// The convention packs applied when building class maps in this context.
    pub fn conventions(&self) -> &ConventionRegistry {
        &self.conventions
    }

    /// Registers the id generator used for id members of type `M`.
    pub fn register_id_generator<M: 'static>(&self, generator: Arc<dyn IdGenerator>) {
        self.id_generators.write().insert(TypeId::of::<M>(), generator);
    }

    /// The id generator for an id member of the given type and representation. `String` ids
    /// stored as ObjectIds get a [`StringObjectIdGenerator`].
    pub fn lookup_id_generator(
        &self,
        member_type: TypeId,
        representation: Option<ElementType>,
    ) -> Option<Arc<dyn IdGenerator>> {
        if member_type == TypeId::of::<String>() && representation == Some(ElementType::ObjectId) {
            return Some(Arc::new(StringObjectIdGenerator));
        }
        self.id_generators.read().get(&member_type).cloned()
    }

    /// Returns the cached serializer for `T`, creating it on first use.
    pub fn serializer<T: BsonType>(&self) -> Result<Arc<dyn BsonSerializer<T>>> {
        get_or_create(&self.serializers, TypeId::of::<T>(), || T::create_serializer(self))
    }

    /// Registers a serializer for `T`, replacing the one that would otherwise be created.
    /// Returns an error if a serializer for `T` is already cached.
    pub fn register_serializer<T: BsonType>(
        &self,
        serializer: Arc<dyn BsonSerializer<T>>,
    ) -> Result<()> {
        let mut guard = self.serializers.write();
        if guard.contains_key(&TypeId::of::<T>()) {
            return Err(Error::serialization(format!(
                "there is already a serializer registered for {}",
                std::any::type_name::<T>()
            )));
        }
        guard.insert(TypeId::of::<T>(), Box::new(serializer));
        Ok(())
    }

    /// Returns the class map for `T`, building and validating it on first use. A class map that
    /// fails validation is not cached, so every use reports the error.
    pub fn class_map<T: BsonClass>(&self) -> Result<Arc<ClassMap<T>>> {
        get_or_create(&self.class_maps, TypeId::of::<T>(), || {
            ClassMap::<T>::build(self).map(Arc::new)
        })
    }

    /// Returns the hierarchy map for `H`, building it on first use.
    pub fn hierarchy<H: BsonHierarchy>(&self) -> Result<Arc<HierarchyMap<H>>> {
        get_or_create(&self.hierarchies, TypeId::of::<H>(), || {
            HierarchyMap::<H>::build(self).map(Arc::new)
        })
    }

    /// Assigns an id to `value` if its id member is empty and has a generator. Returns whether
    /// an id was generated.
    pub fn ensure_id<T: BsonClass>(&self, value: &mut T) -> Result<bool> {
        self.class_map::<T>()?.ensure_id(self, value)
    }

    /// Serializes `value` as a top-level document.
    pub fn to_vec_with<T: BsonType>(
        &self,
        value: &T,
        settings: BsonWriterSettings,
    ) -> Result<Vec<u8>> {
        let mut writer = BsonWriter::new(settings);
        self.serializer::<T>()?
            .serialize(self, &mut writer, value, &SerializationOptions::default())?;
        Ok(writer.into_bytes())
    }

    /// Serializes `value` as a top-level document.
    pub fn to_vec<T: BsonType>(&self, value: &T) -> Result<Vec<u8>> {
        self.to_vec_with(value, BsonWriterSettings::default())
    }

    /// Serializes `value` into a [`Document`].
    pub fn to_document<T: BsonType>(&self, value: &T) -> Result<Document> {
        Document::from_slice(&self.to_vec(value)?)
    }

    /// Deserializes a value from a top-level document.
    pub fn from_slice_with<T: BsonType>(
        &self,
        bytes: &[u8],
        options: &SerializationOptions,
    ) -> Result<T> {
        let mut reader = BsonReader::new(bytes);
        let value = self.serializer::<T>()?.deserialize(self, &mut reader, options)?;
        reader.finish()?;
        Ok(value)
    }

    /// Deserializes a value from a top-level document.
    pub fn from_slice<T: BsonType>(&self, bytes: &[u8]) -> Result<T> {
        self.from_slice_with(bytes, &SerializationOptions::default())
    }

    /// Deserializes a value from a [`Document`].
    pub fn from_document<T: BsonType>(&self, doc: &Document) -> Result<T> {
        self.from_slice(&doc.to_vec()?)
    }

    /// Deserializes a value from shell-compatible JSON.
    pub fn from_json_with<T: BsonType>(
        &self,
        json: &str,
        settings: JsonReaderSettings,
    ) -> Result<T> {
        let allow_duplicate_names = settings.allow_duplicate_names;
        let doc = crate::json::parse_document_with(json, settings)?;
        let mut writer = BsonWriter::new(BsonWriterSettings::default());
        writer.write_document(&doc)?;
        let options = SerializationOptions::default().allow_duplicate_names(allow_duplicate_names);
        self.from_slice_with(&writer.into_bytes(), &options)
    }

    /// Deserializes a value from shell-compatible JSON, rejecting duplicate names.
    pub fn from_json<T: BsonType>(&self, json: &str) -> Result<T> {
        self.from_json_with(json, JsonReaderSettings::default())
    }

    /// Converts one value into a standalone [`Bson`](crate::Bson) using its serializer.
    pub fn to_bson<T: BsonType>(
        &self,
        value: &T,
        options: &SerializationOptions,
    ) -> Result<crate::Bson> {
        let mut writer = BsonWriter::new(BsonWriterSettings::default());
        writer.write_start_document()?;
        writer.write_name("v")?;
        self.serializer::<T>()?
            .serialize(self, &mut writer, value, options)?;
        writer.write_end_document()?;
        let mut doc = Document::from_slice(&writer.into_bytes())?;
        doc.remove("v")
            .ok_or_else(|| Error::serialization("serializer wrote no value"))
    }

    /// Converts a standalone [`Bson`](crate::Bson) into `T` using its serializer.
    pub fn from_bson<T: BsonType>(
        &self,
        value: crate::Bson,
        options: &SerializationOptions,
    ) -> Result<T> {
        let mut doc = Document::new();
        doc.insert("v", value);
        let bytes = doc.to_vec()?;
        let mut reader = BsonReader::new(&bytes);
        reader.read_start_document()?;
        reader.read_bson_type()?;
        reader.read_name()?;
        self.serializer::<T>()?.deserialize(self, &mut reader, options)
    }
}

/// Serializes `value` as a top-level document using the global context.
pub fn to_vec<T: BsonType>(value: &T) -> Result<Vec<u8>> {
    SerializationContext::global().to_vec(value)
}

/// Serializes `value` into a [`Document`] using the global context.
pub fn to_document<T: BsonType>(value: &T) -> Result<Document> {
    SerializationContext::global().to_document(value)
}

/// Deserializes a value from BSON bytes using the global context.
pub fn from_slice<T: BsonType>(bytes: &[u8]) -> Result<T> {
    SerializationContext::global().from_slice(bytes)
}

/// Deserializes a value from a [`Document`] using the global context.
pub fn from_document<T: BsonType>(doc: &Document) -> Result<T> {
    SerializationContext::global().from_document(doc)
}

/// Deserializes a value from shell-compatible JSON using the global context.
pub fn from_json<T: BsonType>(json: &str) -> Result<T> {
    SerializationContext::global().from_json(json)
}

/// Deserializes a value from shell-compatible JSON with explicit settings using the global
/// context.
pub fn from_json_with<T: BsonType>(json: &str, settings: JsonReaderSettings) -> Result<T> {
    SerializationContext::global().from_json_with(json, settings)
}

//! Convention-driven mapping between Rust structs and BSON documents.
//!
//! A type opts in by implementing [`BsonClass`], declaring its members on a
//! [`ClassMapBuilder`]. The first time the type is used, the declared members are run through
//! the [conventions](conventions) registered for it (element naming, id detection, id
//! generators, representations), then validated and frozen into a [`ClassMap`]. Settings made
//! explicitly on the builder always win over conventions.
//!
//! ```rust
//! use mongo_core::{class_map::{BsonClass, ClassMapBuilder}, doc, oid::ObjectId, serializer};
//!
//! #[derive(Default)]
//! struct Person {
//!     id: ObjectId,
//!     name: String,
//!     age: i32,
//! }
//!
//! impl BsonClass for Person {
//!     fn map_class(cm: &mut ClassMapBuilder<Self>) {
//!         cm.map_member("Id", |p| &p.id, |p| &mut p.id);
//!         cm.map_member("Name", |p| &p.name, |p| &mut p.name);
//!         cm.map_member("Age", |p| &p.age, |p| &mut p.age).ignore_if_default(true);
//!     }
//! }
//!
//! # fn main() -> mongo_core::error::Result<()> {
//! let person = Person { id: ObjectId::EMPTY, name: "Ada".into(), age: 0 };
//! let doc = serializer::to_document(&person)?;
//! assert_eq!(doc, doc! { "_id": ObjectId::EMPTY, "Name": "Ada" });
//! # Ok(())
//! # }
//! ```

pub mod conventions;
pub mod discriminator;
pub mod id_generators;
mod member;

use std::{
    any::TypeId,
    marker::PhantomData,
    sync::Arc,
};

use indexmap::IndexMap;

use self::{
    discriminator::DISCRIMINATOR_ELEMENT,
    id_generators::IdGenerator,
    member::{FieldAccess, MemberSlot},
};
use crate::{
    Bson,
    Document,
    error::{Error, ErrorKind, Result},
    raw::{BsonReader, BsonWriter},
    serializer::{BsonSerializer, BsonType, SerializationContext, SerializationOptions},
    spec::ElementType,
};

/// A struct mapped to a BSON document through a [`ClassMap`].
pub trait BsonClass: Default + Send + Sync + 'static {
    /// Declares the members of this type.
    fn map_class(cm: &mut ClassMapBuilder<Self>);
}

/// The last path segment of a type name, without generic arguments.
pub(crate) fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[derive(Clone, Copy, Debug, Default)]
struct ExplicitMember {
    element_name: bool,
    ignore_if_null: bool,
    representation: bool,
    id_generator: bool,
}

/// The type-independent description of one mapped member. Conventions inspect and adjust these.
#[derive(Clone, Debug)]
pub struct MemberMap {
    member_name: &'static str,
    member_type: TypeId,
    member_type_name: &'static str,
    element_name: String,
    order: Option<i32>,
    required: bool,
    ignore_if_null: bool,
    ignore_if_default: bool,
    options: SerializationOptions,
    id_generator: Option<Arc<dyn IdGenerator>>,
    explicit: ExplicitMember,
}

impl MemberMap {
    fn new<M: BsonType>(member_name: &'static str) -> Self {
        Self {
            member_name,
            member_type: TypeId::of::<M>(),
            member_type_name: std::any::type_name::<M>(),
            element_name: member_name.to_string(),
            order: None,
            required: false,
            ignore_if_null: false,
            ignore_if_default: false,
            options: SerializationOptions::default(),
            id_generator: None,
            explicit: ExplicitMember::default(),
        }
    }

    /// The name the member was declared with.
    pub fn member_name(&self) -> &'static str {
        self.member_name
    }

    pub fn member_type(&self) -> TypeId {
        self.member_type
    }

    pub fn member_type_name(&self) -> &'static str {
        self.member_type_name
    }

    /// Whether the member's Rust type is `M`.
    pub fn is_type<M: 'static>(&self) -> bool {
        self.member_type == TypeId::of::<M>()
    }

    pub fn element_name(&self) -> &str {
        &self.element_name
    }

    pub fn order(&self) -> Option<i32> {
        self.order
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn ignore_if_null(&self) -> bool {
        self.ignore_if_null
    }

    pub fn ignore_if_default(&self) -> bool {
        self.ignore_if_default
    }

    pub fn options(&self) -> &SerializationOptions {
        &self.options
    }

    pub fn representation(&self) -> Option<ElementType> {
        self.options.representation
    }

    pub fn id_generator(&self) -> Option<&Arc<dyn IdGenerator>> {
        self.id_generator.as_ref()
    }

    /// Sets the element name unless one was set explicitly.
    pub fn set_element_name(&mut self, name: impl Into<String>) {
        if !self.explicit.element_name {
            self.element_name = name.into();
        }
    }

    /// Sets ignore-if-null unless it was set explicitly.
    pub fn set_ignore_if_null(&mut self, ignore: bool) {
        if !self.explicit.ignore_if_null {
            self.ignore_if_null = ignore;
        }
    }

    /// Sets the representation unless one was set explicitly.
    pub fn set_representation(&mut self, representation: ElementType) {
        if !self.explicit.representation {
            self.options.representation = Some(representation);
        }
    }

    /// Sets the id generator unless one was set explicitly.
    pub fn set_id_generator(&mut self, generator: Arc<dyn IdGenerator>) {
        if !self.explicit.id_generator {
            self.id_generator = Some(generator);
        }
    }
}

/// The type-independent description of a mapped class.
#[derive(Clone, Debug)]
pub struct ClassDefinition {
    type_id: TypeId,
    type_name: &'static str,
    members: Vec<MemberMap>,
    id_member: Option<usize>,
    extra_elements_member: Option<usize>,
    ignore_extra_elements: bool,
    discriminator: Option<String>,
    discriminator_is_required: bool,
    explicit_id_member: bool,
    explicit_extra_elements_member: bool,
    explicit_ignore_extra_elements: bool,
    explicit_discriminator: bool,
}

impl ClassDefinition {
    pub(crate) fn new<T: 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: short_type_name(std::any::type_name::<T>()),
            members: Vec::new(),
            id_member: None,
            extra_elements_member: None,
            ignore_extra_elements: false,
            discriminator: None,
            discriminator_is_required: false,
            explicit_id_member: false,
            explicit_extra_elements_member: false,
            explicit_ignore_extra_elements: false,
            explicit_discriminator: false,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The unqualified name of the mapped type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn members(&self) -> &[MemberMap] {
        &self.members
    }

    pub fn members_mut(&mut self) -> &mut [MemberMap] {
        &mut self.members
    }

    /// Looks up a member by its declared name.
    pub fn member(&self, member_name: &str) -> Option<&MemberMap> {
        self.members.iter().find(|m| m.member_name == member_name)
    }

    pub fn id_member(&self) -> Option<&MemberMap> {
        self.id_member.map(|i| &self.members[i])
    }

    pub fn id_member_mut(&mut self) -> Option<&mut MemberMap> {
        self.id_member.map(|i| &mut self.members[i])
    }

    pub fn extra_elements_member(&self) -> Option<&MemberMap> {
        self.extra_elements_member.map(|i| &self.members[i])
    }

    /// Makes the named member the id unless an id member was chosen explicitly. Returns whether
    /// a member with that name exists.
    pub fn set_id_member(&mut self, member_name: &str) -> bool {
        let Some(i) = self.members.iter().position(|m| m.member_name == member_name) else {
            return false;
        };
        if !self.explicit_id_member {
            self.id_member = Some(i);
        }
        true
    }

    /// Makes the named member hold unmapped elements unless one was chosen explicitly. Returns
    /// whether a member with that name exists.
    pub fn set_extra_elements_member(&mut self, member_name: &str) -> bool {
        let Some(i) = self.members.iter().position(|m| m.member_name == member_name) else {
            return false;
        };
        if !self.explicit_extra_elements_member {
            self.extra_elements_member = Some(i);
        }
        true
    }

    pub fn ignore_extra_elements(&self) -> bool {
        self.ignore_extra_elements
    }

    pub fn set_ignore_extra_elements(&mut self, ignore: bool) {
        if !self.explicit_ignore_extra_elements {
            self.ignore_extra_elements = ignore;
        }
    }

    /// The discriminator written for this class: the explicit one, or the type name.
    pub fn discriminator(&self) -> &str {
        self.discriminator.as_deref().unwrap_or(self.type_name)
    }

    pub fn set_discriminator(&mut self, discriminator: impl Into<String>) {
        if !self.explicit_discriminator {
            self.discriminator = Some(discriminator.into());
        }
    }

    /// Whether the discriminator is written even when the class is not used polymorphically.
    pub fn discriminator_is_required(&self) -> bool {
        self.discriminator_is_required
    }
}

/// Declares the members of a [`BsonClass`].
pub struct ClassMapBuilder<T> {
    definition: ClassDefinition,
    slots: Vec<MemberSlot<T>>,
}

impl<T: BsonClass> ClassMapBuilder<T> {
    fn new() -> Self {
        Self {
            definition: ClassDefinition::new::<T>(),
            slots: Vec::new(),
        }
    }

    fn push_member<M: BsonType>(
        &mut self,
        member_name: &'static str,
        get: fn(&T) -> &M,
        get_mut: fn(&mut T) -> &mut M,
    ) -> usize {
        self.definition.members.push(MemberMap::new::<M>(member_name));
        self.slots.push(MemberSlot {
            access: Arc::new(FieldAccess::new(get, get_mut)),
            is_default: None,
            apply_default: None,
        });
        self.definition.members.len() - 1
    }

    fn member_builder<M: BsonType>(
        &mut self,
        i: usize,
        get: fn(&T) -> &M,
        get_mut: fn(&mut T) -> &mut M,
    ) -> MemberBuilder<'_, T, M> {
        MemberBuilder {
            member: &mut self.definition.members[i],
            slot: &mut self.slots[i],
            get,
            get_mut,
            _marker: PhantomData,
        }
    }

    /// Maps a member. The element name defaults to `member_name` as transformed by the element
    /// naming convention.
    pub fn map_member<M: BsonType>(
        &mut self,
        member_name: &'static str,
        get: fn(&T) -> &M,
        get_mut: fn(&mut T) -> &mut M,
    ) -> MemberBuilder<'_, T, M> {
        let i = self.push_member(member_name, get, get_mut);
        self.member_builder(i, get, get_mut)
    }

    /// Maps a member and makes it the id, which is always written first as `_id`.
    pub fn map_id_member<M: BsonType>(
        &mut self,
        member_name: &'static str,
        get: fn(&T) -> &M,
        get_mut: fn(&mut T) -> &mut M,
    ) -> MemberBuilder<'_, T, M> {
        let i = self.push_member(member_name, get, get_mut);
        self.definition.id_member = Some(i);
        self.definition.explicit_id_member = true;
        self.member_builder(i, get, get_mut)
    }

    /// Maps a [`Document`] member that receives elements matching no other member and whose
    /// elements are written back out inline.
    pub fn map_extra_elements_member(
        &mut self,
        member_name: &'static str,
        get: fn(&T) -> &Document,
        get_mut: fn(&mut T) -> &mut Document,
    ) -> &mut Self {
        let i = self.push_member(member_name, get, get_mut);
        self.definition.extra_elements_member = Some(i);
        self.definition.explicit_extra_elements_member = true;
        self
    }

    /// Skip unknown elements instead of failing when there is no extra elements member.
    pub fn set_ignore_extra_elements(&mut self, ignore: bool) -> &mut Self {
        self.definition.ignore_extra_elements = ignore;
        self.definition.explicit_ignore_extra_elements = true;
        self
    }

    pub fn set_discriminator(&mut self, discriminator: impl Into<String>) -> &mut Self {
        self.definition.discriminator = Some(discriminator.into());
        self.definition.explicit_discriminator = true;
        self
    }

    pub fn set_discriminator_is_required(&mut self, required: bool) -> &mut Self {
        self.definition.discriminator_is_required = required;
        self
    }
}

/// Configures one member declared on a [`ClassMapBuilder`].
pub struct MemberBuilder<'b, T, M> {
    member: &'b mut MemberMap,
    slot: &'b mut MemberSlot<T>,
    get: fn(&T) -> &M,
    get_mut: fn(&mut T) -> &mut M,
    _marker: PhantomData<fn() -> M>,
}

impl<T: 'static, M: BsonType> MemberBuilder<'_, T, M> {
    pub fn element_name(self, name: impl Into<String>) -> Self {
        self.member.element_name = name.into();
        self.member.explicit.element_name = true;
        self
    }

    /// Members with an order are written before unordered ones, ascending.
    pub fn order(self, order: i32) -> Self {
        self.member.order = Some(order);
        self
    }

    /// Fail deserialization when the element is missing.
    pub fn required(self, required: bool) -> Self {
        self.member.required = required;
        self
    }

    /// Skip the element when the value serializes as null.
    pub fn ignore_if_null(self, ignore: bool) -> Self {
        self.member.ignore_if_null = ignore;
        self.member.explicit.ignore_if_null = true;
        self
    }

    pub fn representation(self, representation: ElementType) -> Self {
        self.member.options.representation = Some(representation);
        self.member.explicit.representation = true;
        self
    }

    pub fn allow_overflow(self, allow: bool) -> Self {
        self.member.options.allow_overflow = allow;
        self
    }

    pub fn allow_truncation(self, allow: bool) -> Self {
        self.member.options.allow_truncation = allow;
        self
    }

    pub fn item_options(self, options: SerializationOptions) -> Self {
        self.member.options.item_options = Some(Box::new(options));
        self
    }

    pub fn id_generator(self, generator: Arc<dyn IdGenerator>) -> Self {
        self.member.id_generator = Some(generator);
        self.member.explicit.id_generator = true;
        self
    }
}

impl<T: 'static, M: BsonType + PartialEq + Default + Clone> MemberBuilder<'_, T, M> {
    /// Skip the element when the value equals the member's default value.
    pub fn ignore_if_default(self, ignore: bool) -> Self {
        self.member.ignore_if_default = ignore;
        if self.slot.is_default.is_none() {
            let get = self.get;
            let default = M::default();
            self.slot.is_default = Some(Arc::new(move |obj: &T| *get(obj) == default));
        }
        self
    }

    /// The value assigned when the element is missing.
    pub fn default_value(self, value: M) -> Self {
        let get = self.get;
        let get_mut = self.get_mut;
        let compare = value.clone();
        self.slot.is_default = Some(Arc::new(move |obj: &T| *get(obj) == compare));
        self.slot.apply_default = Some(Arc::new(move |obj: &mut T| *get_mut(obj) = value.clone()));
        self
    }
}

/// A validated, immutable mapping for `T`.
pub struct ClassMap<T> {
    definition: ClassDefinition,
    slots: Vec<MemberSlot<T>>,
    by_element: IndexMap<String, usize>,
}

impl<T> std::fmt::Debug for ClassMap<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassMap")
            .field("type_name", &self.definition.type_name)
            .field("elements", &self.by_element.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: BsonClass> ClassMap<T> {
    pub(crate) fn build(ctx: &SerializationContext) -> Result<Self> {
        let mut builder = ClassMapBuilder::<T>::new();
        T::map_class(&mut builder);
        let pack = ctx.conventions().lookup(&builder.definition);
        pack.apply(&mut builder.definition, ctx);
        let class_map = Self::freeze(builder, ctx)?;
        tracing::debug!(
            class = class_map.definition.type_name,
            elements = class_map.by_element.len(),
            "built class map"
        );
        Ok(class_map)
    }

    fn freeze(builder: ClassMapBuilder<T>, ctx: &SerializationContext) -> Result<Self> {
        let ClassMapBuilder {
            mut definition,
            slots,
        } = builder;
        let type_name = definition.type_name;

        for (i, member) in definition.members.iter().enumerate() {
            if definition.members[..i]
                .iter()
                .any(|m| m.member_name == member.member_name)
            {
                return Err(Error::serialization(format!(
                    "member {} is mapped more than once in class {type_name}",
                    member.member_name
                )));
            }
        }
        if let Some(extra) = definition.extra_elements_member() {
            if !extra.is_type::<Document>() {
                return Err(Error::serialization(format!(
                    "extra elements member {} of class {type_name} must be a Document, not {}",
                    extra.member_name, extra.member_type_name
                )));
            }
        }
        if let Some(id) = definition.id_member_mut() {
            id.element_name = "_id".to_string();
        }

        let id_name = definition.id_member().map(|m| m.member_name);
        let extra_name = definition.extra_elements_member().map(|m| m.member_name);
        let mut paired: Vec<_> = definition.members.drain(..).zip(slots).collect();
        paired.sort_by_key(|(m, _)| {
            (
                Some(m.member_name) != id_name,
                m.order.unwrap_or(i32::MAX),
            )
        });
        let (members, mut slots): (Vec<_>, Vec<_>) = paired.into_iter().unzip();
        for (member, slot) in members.iter().zip(&mut slots) {
            slot.access = slot
                .access
                .resolve(ctx)
                .map_err(|e| e.with_key(member.element_name.clone()))?;
        }
        definition.members = members;
        definition.id_member = id_name.and_then(|n| definition.members.iter().position(|m| m.member_name == n));
        definition.extra_elements_member =
            extra_name.and_then(|n| definition.members.iter().position(|m| m.member_name == n));

        let mut by_element = IndexMap::new();
        for (i, member) in definition.members.iter().enumerate() {
            if Some(i) == definition.extra_elements_member {
                continue;
            }
            if by_element.insert(member.element_name.clone(), i).is_some() {
                return Err(Error::serialization(format!(
                    "element name \"{}\" is used by more than one member of class {type_name}",
                    member.element_name
                )));
            }
        }

        Ok(Self {
            definition,
            slots,
            by_element,
        })
    }
}

impl<T> ClassMap<T> {
    #[cfg(test)]
    pub(crate) fn members_resolved(&self) -> bool {
        self.slots.iter().all(|slot| slot.access.is_resolved())
    }

    pub fn definition(&self) -> &ClassDefinition {
        &self.definition
    }

    pub fn type_name(&self) -> &'static str {
        self.definition.type_name
    }

    pub fn discriminator(&self) -> &str {
        self.definition.discriminator()
    }

    /// Element names in the order they are written.
    pub fn element_names(&self) -> impl Iterator<Item = &str> {
        self.by_element.keys().map(String::as_str)
    }

    /// Looks up a member by element name.
    pub fn member(&self, element_name: &str) -> Option<&MemberMap> {
        self.by_element
            .get(element_name)
            .map(|&i| &self.definition.members[i])
    }

    /// Assigns a generated id if the id member is empty. Returns whether an id was generated.
    pub(crate) fn ensure_id(&self, ctx: &SerializationContext, obj: &mut T) -> Result<bool> {
        let Some(i) = self.definition.id_member else {
            return Ok(false);
        };
        let member = &self.definition.members[i];
        let access = &self.slots[i].access;
        let current = access.to_bson(ctx, obj)?;
        let Some(generator) = &member.id_generator else {
            if current == Bson::Null {
                return Err(Error::serialization(format!(
                    "id member {} of class {} is empty and has no id generator",
                    member.member_name, self.definition.type_name
                )));
            }
            return Ok(false);
        };
        if !generator.is_empty(&current) {
            return Ok(false);
        }
        access.set_bson(ctx, obj, generator.generate())?;
        Ok(true)
    }

    pub(crate) fn serialize_with_discriminator(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &T,
        discriminator: Option<&Bson>,
    ) -> Result<()> {
        let own = Bson::String(self.definition.discriminator().to_string());
        let discriminator = discriminator.or(self
            .definition
            .discriminator_is_required
            .then_some(&own));

        writer.write_start_document()?;
        if let Some(discriminator) = discriminator {
            writer.write_name(DISCRIMINATOR_ELEMENT)?;
            writer.write_value(discriminator)?;
        }
        for (element_name, &i) in &self.by_element {
            let member = &self.definition.members[i];
            let slot = &self.slots[i];
            if member.ignore_if_null && slot.access.is_null(value) {
                continue;
            }
            if member.ignore_if_default && slot.is_default.as_ref().is_some_and(|f| f(value)) {
                continue;
            }
            writer
                .write_name(element_name)
                .map_err(|e| e.with_key(element_name))?;
            slot.access
                .serialize(ctx, writer, value, &member.options)
                .map_err(|e| e.with_key(element_name))?;
        }
        if let Some(i) = self.definition.extra_elements_member {
            if let Some(extra) = self.slots[i].access.document(value) {
                for (name, element) in extra {
                    writer.write_name(name).map_err(|e| e.with_key(name))?;
                    writer.write_value(element).map_err(|e| e.with_key(name))?;
                }
            }
        }
        writer.write_end_document()
    }
}

impl<T: BsonClass> ClassMap<T> {
    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<T> {
        if !matches!(reader.current_type(), None | Some(ElementType::EmbeddedDocument)) {
            return Err(crate::serializer::unexpected_type(
                reader,
                self.definition.type_name,
            ));
        }
        let class = self.definition.type_name;
        let mut value = T::default();
        let mut found = vec![false; self.definition.members.len()];

        reader.read_start_document()?;
        while reader.read_bson_type()?.is_some() {
            let name = reader.read_name()?;
            if let Some(&i) = self.by_element.get(name) {
                if found[i] && !options.allow_duplicate_names {
                    return Err(Error::duplicate_element_name(name));
                }
                let member = &self.definition.members[i];
                self.slots[i]
                    .access
                    .deserialize(ctx, reader, &mut value, &member.options)
                    .map_err(|e| e.with_key(name))?;
                found[i] = true;
            } else if name == DISCRIMINATOR_ELEMENT {
                reader.skip_value()?;
            } else if let Some(i) = self.definition.extra_elements_member {
                let element = reader.read_value().map_err(|e| e.with_key(name))?;
                if let Some(extra) = self.slots[i].access.document_mut(&mut value) {
                    extra.push_duplicate(name.to_string(), element);
                }
            } else if self.definition.ignore_extra_elements {
                reader.skip_value()?;
            } else {
                return Err(ErrorKind::UnknownElement {
                    name: name.to_string(),
                    class,
                }
                .into());
            }
        }
        reader.read_end_document()?;

        for (&i, member) in self
            .by_element
            .values()
            .map(|i| (i, &self.definition.members[*i]))
        {
            if found[i] {
                continue;
            }
            if member.required {
                return Err(ErrorKind::MissingElement {
                    name: member.element_name.clone(),
                    class,
                }
                .into());
            }
            if let Some(apply) = &self.slots[i].apply_default {
                apply(&mut value);
            }
        }
        Ok(value)
    }
}

/// Serializes a [`BsonClass`] through its [`ClassMap`].
pub struct ClassMapSerializer<T> {
    class_map: Arc<ClassMap<T>>,
}

impl<T: BsonClass> ClassMapSerializer<T> {
    pub fn new(class_map: Arc<ClassMap<T>>) -> Self {
        Self { class_map }
    }

    pub fn class_map(&self) -> &Arc<ClassMap<T>> {
        &self.class_map
    }
}

impl<T: BsonClass> BsonSerializer<T> for ClassMapSerializer<T> {
    fn serialize(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &T,
        _options: &SerializationOptions,
    ) -> Result<()> {
        self.class_map
            .serialize_with_discriminator(ctx, writer, value, None)
    }

    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<T> {
        self.class_map.deserialize(ctx, reader, options)
    }
}

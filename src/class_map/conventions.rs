//! Rules applied to every class map when it is built.
//!
//! A [`ConventionPack`] is an ordered list of conventions. When a class map is built, the
//! class conventions run first, then every member convention runs over each member in
//! declaration order, then the post-processing conventions run. Conventions later in the list
//! see, and may overwrite, what earlier ones did; neither may overwrite a setting made
//! explicitly on the [`ClassMapBuilder`](super::ClassMapBuilder).
//!
//! A [`ConventionRegistry`] holds named packs with a filter deciding which classes they apply
//! to. Every registry starts with the [standard pack](ConventionPack::standard) applied to all
//! classes. Packs registered later are appended after it, so a later element naming convention
//! replaces the default one. Class maps are built once and cached, so register conventions
//! before the first use of the classes they should affect.

use std::{any::TypeId, fmt, sync::Arc};

use parking_lot::RwLock;

use super::{ClassDefinition, MemberMap};
use crate::{serializer::SerializationContext, spec::ElementType};

/// A convention applied to the class as a whole, before member conventions.
pub trait ClassConvention: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, class: &mut ClassDefinition);
}

/// A convention applied to each member.
pub trait MemberConvention: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, member: &mut MemberMap);
}

/// A convention applied after all class and member conventions.
pub trait PostProcessingConvention: Send + Sync {
    fn name(&self) -> &str;

    fn post_process(&self, class: &mut ClassDefinition, ctx: &SerializationContext);
}

/// One entry in a [`ConventionPack`].
#[derive(Clone)]
pub enum Convention {
    Class(Arc<dyn ClassConvention>),
    Member(Arc<dyn MemberConvention>),
    PostProcessing(Arc<dyn PostProcessingConvention>),
}

impl Convention {
    pub fn class(convention: impl ClassConvention + 'static) -> Self {
        Self::Class(Arc::new(convention))
    }

    pub fn member(convention: impl MemberConvention + 'static) -> Self {
        Self::Member(Arc::new(convention))
    }

    pub fn post_processing(convention: impl PostProcessingConvention + 'static) -> Self {
        Self::PostProcessing(Arc::new(convention))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Class(c) => c.name(),
            Self::Member(c) => c.name(),
            Self::PostProcessing(c) => c.name(),
        }
    }
}

impl fmt::Debug for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Convention").field(&self.name()).finish()
    }
}

/// An ordered list of conventions.
#[derive(Clone, Debug, Default)]
pub struct ConventionPack {
    conventions: Vec<Convention>,
}

impl ConventionPack {
    pub fn new() -> Self {
        Self::default()
    }

    /// The conventions every registry starts with: element names equal member names, an id
    /// member named `Id`, `id`, `_id` or `<TypeName>Id`, an extra elements member named
    /// `ExtraElements`, and id generators looked up by id member type.
    pub fn standard() -> Self {
        Self::new()
            .with(Convention::member(MemberNameElementNameConvention))
            .with(Convention::class(NamedIdMemberConvention::default()))
            .with(Convention::class(NamedExtraElementsMemberConvention::default()))
            .with(Convention::post_processing(LookupIdGeneratorConvention))
    }

    pub fn with(mut self, convention: Convention) -> Self {
        self.conventions.push(convention);
        self
    }

    pub fn push(&mut self, convention: Convention) {
        self.conventions.push(convention);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Convention> {
        self.conventions.iter()
    }

    pub fn len(&self) -> usize {
        self.conventions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conventions.is_empty()
    }

    /// Runs the pack over `class`.
    pub fn apply(&self, class: &mut ClassDefinition, ctx: &SerializationContext) {
        for convention in &self.conventions {
            if let Convention::Class(c) = convention {
                c.apply(class);
            }
        }
        for member in class.members_mut() {
            for convention in &self.conventions {
                if let Convention::Member(c) = convention {
                    c.apply(member);
                }
            }
        }
        for convention in &self.conventions {
            if let Convention::PostProcessing(c) = convention {
                c.post_process(class, ctx);
            }
        }
    }
}

impl Extend<Convention> for ConventionPack {
    fn extend<I: IntoIterator<Item = Convention>>(&mut self, iter: I) {
        self.conventions.extend(iter);
    }
}

type ClassFilter = Arc<dyn Fn(&ClassDefinition) -> bool + Send + Sync>;

struct Registration {
    name: String,
    pack: ConventionPack,
    filter: ClassFilter,
}

/// Named convention packs and the classes they apply to.
pub struct ConventionRegistry {
    registrations: RwLock<Vec<Registration>>,
}

/// The name of the standard pack in every registry.
pub const DEFAULT_CONVENTIONS: &str = "__defaults__";

impl Default for ConventionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConventionRegistry {
    pub fn new() -> Self {
        Self {
            registrations: RwLock::new(vec![Registration {
                name: DEFAULT_CONVENTIONS.to_string(),
                pack: ConventionPack::standard(),
                filter: Arc::new(|_| true),
            }]),
        }
    }

    /// Registers `pack` for every class accepted by `filter`. A pack registered under an
    /// existing name replaces it in place.
    pub fn register(
        &self,
        name: impl Into<String>,
        pack: ConventionPack,
        filter: impl Fn(&ClassDefinition) -> bool + Send + Sync + 'static,
    ) {
        let registration = Registration {
            name: name.into(),
            pack,
            filter: Arc::new(filter),
        };
        let mut registrations = self.registrations.write();
        match registrations.iter_mut().find(|r| r.name == registration.name) {
            Some(existing) => *existing = registration,
            None => registrations.push(registration),
        }
    }

    /// Registers `pack` for the single class `T`.
    pub fn register_for<T: 'static>(&self, name: impl Into<String>, pack: ConventionPack) {
        self.register(name, pack, |class| class.type_id() == TypeId::of::<T>());
    }

    /// Removes the pack registered under `name`. Returns whether one was removed.
    pub fn remove(&self, name: &str) -> bool {
        let mut registrations = self.registrations.write();
        let before = registrations.len();
        registrations.retain(|r| r.name != name);
        registrations.len() != before
    }

    /// The combined pack for `class`: every matching registration in registration order.
    pub fn lookup(&self, class: &ClassDefinition) -> ConventionPack {
        let mut pack = ConventionPack::new();
        for registration in self.registrations.read().iter() {
            if (registration.filter)(class) {
                pack.extend(registration.pack.iter().cloned());
            }
        }
        pack
    }
}

/// Uses the declared member name as the element name.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemberNameElementNameConvention;

impl MemberConvention for MemberNameElementNameConvention {
    fn name(&self) -> &str {
        "MemberNameElementName"
    }

    fn apply(&self, member: &mut MemberMap) {
        member.set_element_name(member.member_name());
    }
}

/// Lowercases the leading character of the member name, or with
/// `handle_variable_length_prefixes` the whole leading run of capitals that forms a prefix, so
/// that `TCPIOStatus` becomes `tcpioStatus`.
#[derive(Clone, Copy, Debug, Default)]
pub struct CamelCaseElementNameConvention {
    handle_variable_length_prefixes: bool,
}

impl CamelCaseElementNameConvention {
    pub fn new(handle_variable_length_prefixes: bool) -> Self {
        Self {
            handle_variable_length_prefixes,
        }
    }

    pub fn element_name(&self, member_name: &str) -> String {
        let chars: Vec<char> = member_name.chars().collect();
        if !self.handle_variable_length_prefixes {
            let mut chars = chars.into_iter();
            return match chars.next() {
                Some(first) => first.to_lowercase().chain(chars).collect(),
                None => String::new(),
            };
        }
        // a character is part of the prefix if it is first, last, or followed by a capital
        let prefix_len = (0..chars.len())
            .find(|&i| i != 0 && i != chars.len() - 1 && !chars[i + 1].is_uppercase())
            .unwrap_or(chars.len());
        chars[..prefix_len]
            .iter()
            .flat_map(|c| c.to_lowercase())
            .chain(chars[prefix_len..].iter().copied())
            .collect()
    }
}

impl MemberConvention for CamelCaseElementNameConvention {
    fn name(&self) -> &str {
        "CamelCaseElementName"
    }

    fn apply(&self, member: &mut MemberMap) {
        let name = self.element_name(member.member_name());
        member.set_element_name(name);
    }
}

/// Sets ignore-if-null on every member.
#[derive(Clone, Copy, Debug)]
pub struct IgnoreIfNullConvention(pub bool);

impl MemberConvention for IgnoreIfNullConvention {
    fn name(&self) -> &str {
        "IgnoreIfNull"
    }

    fn apply(&self, member: &mut MemberMap) {
        member.set_ignore_if_null(self.0);
    }
}

/// Gives every member of one Rust type the same wire representation.
#[derive(Clone, Copy, Debug)]
pub struct TypeRepresentationConvention {
    member_type: TypeId,
    representation: ElementType,
}

impl TypeRepresentationConvention {
    pub fn new<M: 'static>(representation: ElementType) -> Self {
        Self {
            member_type: TypeId::of::<M>(),
            representation,
        }
    }
}

impl MemberConvention for TypeRepresentationConvention {
    fn name(&self) -> &str {
        "TypeRepresentation"
    }

    fn apply(&self, member: &mut MemberMap) {
        if member.member_type() == self.member_type {
            member.set_representation(self.representation);
        }
    }
}

/// Picks the id member by name: the first of `names` that is a mapped member, else
/// `<TypeName>Id`.
#[derive(Clone, Debug)]
pub struct NamedIdMemberConvention {
    names: Vec<String>,
}

impl Default for NamedIdMemberConvention {
    fn default() -> Self {
        Self::new(["Id", "id", "_id"])
    }
}

impl NamedIdMemberConvention {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ClassConvention for NamedIdMemberConvention {
    fn name(&self) -> &str {
        "NamedIdMember"
    }

    fn apply(&self, class: &mut ClassDefinition) {
        if class.id_member().is_some() {
            return;
        }
        let type_name_id = format!("{}Id", class.type_name());
        for name in self.names.iter().chain(std::iter::once(&type_name_id)) {
            if class.set_id_member(name) {
                return;
            }
        }
    }
}

/// Picks the extra elements member by name.
#[derive(Clone, Debug)]
pub struct NamedExtraElementsMemberConvention {
    names: Vec<String>,
}

impl Default for NamedExtraElementsMemberConvention {
    fn default() -> Self {
        Self::new(["ExtraElements"])
    }
}

impl NamedExtraElementsMemberConvention {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ClassConvention for NamedExtraElementsMemberConvention {
    fn name(&self) -> &str {
        "NamedExtraElementsMember"
    }

    fn apply(&self, class: &mut ClassDefinition) {
        if class.extra_elements_member().is_some() {
            return;
        }
        for name in &self.names {
            let is_document = class
                .member(name)
                .is_some_and(|m| m.is_type::<crate::Document>());
            if is_document && class.set_extra_elements_member(name) {
                return;
            }
        }
    }
}

/// Sets ignore-extra-elements on every class.
#[derive(Clone, Copy, Debug)]
pub struct IgnoreExtraElementsConvention(pub bool);

impl ClassConvention for IgnoreExtraElementsConvention {
    fn name(&self) -> &str {
        "IgnoreExtraElements"
    }

    fn apply(&self, class: &mut ClassDefinition) {
        class.set_ignore_extra_elements(self.0);
    }
}

/// Assigns the id generator registered in the context for the id member's type.
#[derive(Clone, Copy, Debug, Default)]
pub struct LookupIdGeneratorConvention;

impl PostProcessingConvention for LookupIdGeneratorConvention {
    fn name(&self) -> &str {
        "LookupIdGenerator"
    }

    fn post_process(&self, class: &mut ClassDefinition, ctx: &SerializationContext) {
        let Some(id) = class.id_member_mut() else {
            return;
        };
        if id.id_generator().is_some() {
            return;
        }
        if let Some(generator) = ctx.lookup_id_generator(id.member_type(), id.representation()) {
            id.set_id_generator(generator);
        }
    }
}

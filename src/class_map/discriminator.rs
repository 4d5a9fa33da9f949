//! Polymorphic values and their discriminators.
//!
//! A polymorphic slot is a Rust enum implementing [`BsonHierarchy`], with one variant per
//! concrete class. Each variant's document carries a `_t` element naming its class. In the
//! default (scalar) mode `_t` holds the class's own discriminator, and the root class is written
//! without one. In root-class mode `_t` holds the chain of discriminators from the root class
//! down to the concrete class, so a query on any class in the chain matches instances of its
//! subclasses; a chain of one is written as a scalar.
//!
//! When reading, the serializer looks ahead for `_t` before choosing the variant, then rewinds
//! and lets that variant's class map read the document.

use std::{marker::PhantomData, sync::Arc};

use ahash::AHashMap;

use super::{BsonClass, ClassMapSerializer};
use crate::{
    Bson,
    Document,
    error::{Error, Result},
    raw::{BsonReader, BsonWriter},
    serializer::{BsonSerializer, SerializationContext, SerializationOptions, unexpected_type},
    spec::ElementType,
};

/// The element holding the discriminator.
pub const DISCRIMINATOR_ELEMENT: &str = "_t";

/// An enum whose variants are [`BsonClass`]es sharing one polymorphic slot.
///
/// ```rust
/// use std::sync::Arc;
/// use mongo_core::{
///     class_map::{BsonClass, ClassMapBuilder, discriminator::{BsonHierarchy, HierarchyBuilder, HierarchySerializer}},
///     error::Result,
///     serializer::{BsonSerializer, BsonType, SerializationContext},
/// };
///
/// #[derive(Default)]
/// struct Circle { radius: f64 }
///
/// impl BsonClass for Circle {
///     fn map_class(cm: &mut ClassMapBuilder<Self>) {
///         cm.map_member("radius", |c| &c.radius, |c| &mut c.radius);
///     }
/// }
///
/// enum Shape { Circle(Circle) }
///
/// impl BsonHierarchy for Shape {
///     fn map_hierarchy(h: &mut HierarchyBuilder<Self>) {
///         h.abstract_class("Shape", None);
///         h.variant(Some("Shape"), Shape::Circle, |s| match s { Shape::Circle(c) => Some(c) });
///     }
/// }
///
/// impl BsonType for Shape {
///     fn create_serializer(ctx: &SerializationContext) -> Result<Arc<dyn BsonSerializer<Self>>> {
///         HierarchySerializer::<Self>::create(ctx)
///     }
/// }
/// ```
pub trait BsonHierarchy: Sized + Send + Sync + 'static {
    fn map_hierarchy(h: &mut HierarchyBuilder<Self>);
}

trait VariantAccess<H>: Send + Sync {
    fn discriminator(&self, ctx: &SerializationContext) -> Result<String>;

    fn matches(&self, value: &H) -> bool;

    fn serialize(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &H,
        discriminator: Option<&Bson>,
    ) -> Result<()>;

    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<H>;
}

struct TypedVariant<H, M> {
    wrap: fn(M) -> H,
    unwrap: fn(&H) -> Option<&M>,
    _marker: PhantomData<fn() -> M>,
}

impl<H: BsonHierarchy, M: BsonClass> VariantAccess<H> for TypedVariant<H, M> {
    fn discriminator(&self, ctx: &SerializationContext) -> Result<String> {
        Ok(ctx.class_map::<M>()?.discriminator().to_string())
    }

    fn matches(&self, value: &H) -> bool {
        (self.unwrap)(value).is_some()
    }

    fn serialize(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &H,
        discriminator: Option<&Bson>,
    ) -> Result<()> {
        let inner = (self.unwrap)(value)
            .ok_or_else(|| Error::discriminator("value does not belong to this variant"))?;
        ctx.class_map::<M>()?
            .serialize_with_discriminator(ctx, writer, inner, discriminator)
    }

    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<H> {
        ClassMapSerializer::new(ctx.class_map::<M>()?)
            .deserialize(ctx, reader, options)
            .map(self.wrap)
    }
}

struct PendingNode<H> {
    discriminator: Option<String>,
    parent: Option<String>,
    variant: Option<Arc<dyn VariantAccess<H>>>,
}

/// Declares the classes of a [`BsonHierarchy`].
pub struct HierarchyBuilder<H> {
    root_class: bool,
    nodes: Vec<PendingNode<H>>,
}

impl<H: BsonHierarchy> HierarchyBuilder<H> {
    fn new() -> Self {
        Self {
            root_class: false,
            nodes: Vec::new(),
        }
    }

    /// Write the full discriminator chain from the root class instead of a single name.
    pub fn set_root_class(&mut self, root_class: bool) -> &mut Self {
        self.root_class = root_class;
        self
    }

    /// Declares a class with no instances of its own, such as a shared base.
    pub fn abstract_class(
        &mut self,
        discriminator: impl Into<String>,
        parent: Option<&str>,
    ) -> &mut Self {
        self.nodes.push(PendingNode {
            discriminator: Some(discriminator.into()),
            parent: parent.map(str::to_string),
            variant: None,
        });
        self
    }

    /// Declares a concrete class `M` deriving from the class whose discriminator is `parent`.
    /// Its discriminator comes from `M`'s class map.
    pub fn variant<M: BsonClass>(
        &mut self,
        parent: Option<&str>,
        wrap: fn(M) -> H,
        unwrap: fn(&H) -> Option<&M>,
    ) -> &mut Self {
        self.nodes.push(PendingNode {
            discriminator: None,
            parent: parent.map(str::to_string),
            variant: Some(Arc::new(TypedVariant {
                wrap,
                unwrap,
                _marker: PhantomData,
            })),
        });
        self
    }
}

struct Node<H> {
    discriminator: String,
    chain: Vec<String>,
    variant: Option<Arc<dyn VariantAccess<H>>>,
}

/// The resolved classes of a [`BsonHierarchy`].
pub struct HierarchyMap<H> {
    root_class: bool,
    nodes: Vec<Node<H>>,
    by_discriminator: AHashMap<String, usize>,
    default_variant: Option<usize>,
}

impl<H: BsonHierarchy> HierarchyMap<H> {
    pub(crate) fn build(ctx: &SerializationContext) -> Result<Self> {
        let name = super::short_type_name(std::any::type_name::<H>());
        let mut builder = HierarchyBuilder::<H>::new();
        H::map_hierarchy(&mut builder);

        let mut discriminators = Vec::with_capacity(builder.nodes.len());
        let mut by_discriminator = AHashMap::new();
        for (i, node) in builder.nodes.iter().enumerate() {
            let discriminator = match (&node.discriminator, &node.variant) {
                (Some(d), _) => d.clone(),
                (None, Some(variant)) => variant.discriminator(ctx)?,
                (None, None) => {
                    return Err(Error::discriminator(format!(
                        "class {i} of hierarchy {name} has no discriminator"
                    )));
                }
            };
            if by_discriminator.insert(discriminator.clone(), i).is_some() {
                return Err(Error::discriminator(format!(
                    "ambiguous discriminator \"{discriminator}\" in hierarchy {name}"
                )));
            }
            discriminators.push(discriminator);
        }

        let mut parents = Vec::with_capacity(builder.nodes.len());
        for node in &builder.nodes {
            let parent = match &node.parent {
                Some(parent) => Some(*by_discriminator.get(parent).ok_or_else(|| {
                    Error::discriminator(format!(
                        "unknown parent class \"{parent}\" in hierarchy {name}"
                    ))
                })?),
                None => None,
            };
            parents.push(parent);
        }

        let roots: Vec<usize> = (0..parents.len()).filter(|&i| parents[i].is_none()).collect();
        if builder.root_class && roots.len() != 1 {
            return Err(Error::discriminator(format!(
                "hierarchy {name} is marked as a root class hierarchy but has {} root classes",
                roots.len()
            )));
        }

        let mut nodes = Vec::with_capacity(builder.nodes.len());
        for (i, pending) in builder.nodes.into_iter().enumerate() {
            let mut chain = vec![discriminators[i].clone()];
            let mut current = parents[i];
            while let Some(p) = current {
                if chain.len() > parents.len() {
                    return Err(Error::discriminator(format!(
                        "cycle in the parents of \"{}\" in hierarchy {name}",
                        discriminators[i]
                    )));
                }
                chain.push(discriminators[p].clone());
                current = parents[p];
            }
            chain.reverse();
            nodes.push(Node {
                discriminator: discriminators[i].clone(),
                chain,
                variant: pending.variant,
            });
        }

        let default_variant = match roots.as_slice() {
            [root] if nodes[*root].variant.is_some() => Some(*root),
            _ => None,
        };
        tracing::debug!(
            hierarchy = name,
            classes = nodes.len(),
            root_class = builder.root_class,
            "built hierarchy map"
        );
        Ok(Self {
            root_class: builder.root_class,
            nodes,
            by_discriminator,
            default_variant,
        })
    }
}

impl<H> HierarchyMap<H> {
    /// Whether full discriminator chains are written.
    pub fn is_root_class(&self) -> bool {
        self.root_class
    }

    pub fn discriminators(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.discriminator.as_str())
    }

    /// The chain of discriminators from the root class to `discriminator`.
    pub fn chain(&self, discriminator: &str) -> Option<&[String]> {
        self.node(discriminator).ok().map(|n| n.chain.as_slice())
    }

    fn node(&self, discriminator: &str) -> Result<&Node<H>> {
        self.by_discriminator
            .get(discriminator)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| Error::discriminator(format!("unknown discriminator \"{discriminator}\"")))
    }

    /// The value written to `_t` for the node at `index`, if any.
    fn discriminator_value(&self, index: usize) -> Option<Bson> {
        let node = &self.nodes[index];
        if self.root_class {
            return Some(match node.chain.as_slice() {
                [single] => Bson::String(single.clone()),
                chain => Bson::Array(chain.iter().cloned().map(Bson::String).collect()),
            });
        }
        if Some(index) == self.default_variant {
            return None;
        }
        Some(Bson::String(node.discriminator.clone()))
    }

    /// A query matching documents of the class `discriminator` or any of its subclasses.
    pub fn type_filter(&self, discriminator: &str) -> Result<Document> {
        let node = self.node(discriminator)?;
        let mut filter = Document::new();
        if self.root_class {
            filter.insert(DISCRIMINATOR_ELEMENT, node.discriminator.as_str());
            return Ok(filter);
        }
        let matching: Vec<Bson> = self
            .nodes
            .iter()
            .filter(|n| n.chain.iter().any(|c| *c == node.discriminator))
            .map(|n| Bson::String(n.discriminator.clone()))
            .collect();
        match <[Bson; 1]>::try_from(matching) {
            Ok([single]) => filter.insert(DISCRIMINATOR_ELEMENT, single),
            Err(many) => {
                let mut any_of = Document::new();
                any_of.insert("$in", many);
                filter.insert(DISCRIMINATOR_ELEMENT, any_of)
            }
        };
        Ok(filter)
    }

    /// A query matching documents of exactly the class `discriminator`, excluding subclasses.
    pub fn exact_type_filter(&self, discriminator: &str) -> Result<Document> {
        let node = self.node(discriminator)?;
        let mut filter = Document::new();
        if !self.root_class {
            filter.insert(DISCRIMINATOR_ELEMENT, node.discriminator.as_str());
            return Ok(filter);
        }
        if let [root] = node.chain.as_slice() {
            let mut not_exists = Document::new();
            not_exists.insert("$exists", false);
            filter.insert(format!("{DISCRIMINATOR_ELEMENT}.0"), not_exists);
            filter.insert(DISCRIMINATOR_ELEMENT, root.as_str());
            return Ok(filter);
        }
        let mut size = Document::new();
        size.insert("$size", node.chain.len() as i32);
        filter.insert(DISCRIMINATOR_ELEMENT, size);
        for (i, discriminator) in node.chain.iter().enumerate() {
            filter.insert(format!("{DISCRIMINATOR_ELEMENT}.{i}"), discriminator.as_str());
        }
        Ok(filter)
    }

    fn resolve(&self, found: Option<Bson>) -> Result<usize> {
        let discriminator = match found {
            None => {
                return self.default_variant.ok_or_else(|| {
                    Error::discriminator("document has no discriminator and there is no default class")
                });
            }
            Some(Bson::String(s)) => s,
            Some(Bson::Array(chain)) => match chain.last() {
                Some(Bson::String(s)) => s.clone(),
                _ => return Err(Error::discriminator("discriminator chain is empty or not strings")),
            },
            Some(other) => {
                return Err(Error::discriminator(format!(
                    "discriminator has unsupported type {:?}",
                    other.element_type()
                )));
            }
        };
        let index = *self.by_discriminator.get(&discriminator).ok_or_else(|| {
            Error::discriminator(format!("unknown discriminator \"{discriminator}\""))
        })?;
        if self.nodes[index].variant.is_none() {
            return Err(Error::discriminator(format!(
                "cannot create an instance of abstract class \"{discriminator}\""
            )));
        }
        Ok(index)
    }
}

/// Looks ahead through the current document for the discriminator element.
fn find_discriminator(reader: &mut BsonReader<'_>) -> Result<Option<Bson>> {
    reader.read_start_document()?;
    while reader.read_bson_type()?.is_some() {
        if reader.read_name()? == DISCRIMINATOR_ELEMENT {
            return reader.read_value().map(Some);
        }
        reader.skip_value()?;
    }
    Ok(None)
}

/// Serializes a [`BsonHierarchy`] by dispatching to the variant's class map.
pub struct HierarchySerializer<H> {
    map: Arc<HierarchyMap<H>>,
}

impl<H: BsonHierarchy> HierarchySerializer<H> {
    pub fn new(map: Arc<HierarchyMap<H>>) -> Self {
        Self { map }
    }

    /// Builds the serializer for `H` from the hierarchy map cached in `ctx`.
    pub fn create(ctx: &SerializationContext) -> Result<Arc<dyn BsonSerializer<H>>> {
        Ok(Arc::new(Self::new(ctx.hierarchy::<H>()?)))
    }
}

impl<H: BsonHierarchy> BsonSerializer<H> for HierarchySerializer<H> {
    fn serialize(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &H,
        _options: &SerializationOptions,
    ) -> Result<()> {
        let (index, variant) = self
            .map
            .nodes
            .iter()
            .enumerate()
            .find_map(|(i, n)| n.variant.as_ref().filter(|v| v.matches(value)).map(|v| (i, v)))
            .ok_or_else(|| Error::discriminator("value matches no registered class"))?;
        let discriminator = self.map.discriminator_value(index);
        variant.serialize(ctx, writer, value, discriminator.as_ref())
    }

    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<H> {
        if !matches!(reader.current_type(), None | Some(ElementType::EmbeddedDocument)) {
            return Err(unexpected_type(reader, "polymorphic value"));
        }
        let bookmark = reader.bookmark();
        let found = find_discriminator(reader)?;
        reader.return_to_bookmark(bookmark);
        let index = self.map.resolve(found)?;
        match &self.map.nodes[index].variant {
            Some(variant) => variant.deserialize(ctx, reader, options),
            None => Err(Error::discriminator("cannot deserialize an abstract class")),
        }
    }
}

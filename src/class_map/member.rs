use std::{any::Any, marker::PhantomData, sync::Arc};

use crate::{
    Bson,
    Document,
    error::Result,
    raw::{BsonReader, BsonWriter},
    serializer::{BsonSerializer, BsonType, SerializationContext, SerializationOptions},
};

/// Type-erased access to one member of `T`.
pub(crate) trait MemberAccess<T>: Send + Sync {
    /// Returns an accessor bound to the member type's serializer in `ctx`.
    fn resolve(&self, ctx: &SerializationContext) -> Result<Arc<dyn MemberAccess<T>>>;

    #[cfg(test)]
    fn is_resolved(&self) -> bool;

    fn serialize(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        obj: &T,
        options: &SerializationOptions,
    ) -> Result<()>;

    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        obj: &mut T,
        options: &SerializationOptions,
    ) -> Result<()>;

    fn is_null(&self, obj: &T) -> bool;

    fn to_bson(&self, ctx: &SerializationContext, obj: &T) -> Result<Bson>;

    fn set_bson(&self, ctx: &SerializationContext, obj: &mut T, value: Bson) -> Result<()>;

    /// The member as a [`Document`], if that is its type.
    fn document<'a>(&self, obj: &'a T) -> Option<&'a Document>;

    fn document_mut<'a>(&self, obj: &'a mut T) -> Option<&'a mut Document>;
}

/// A member reached through a pair of field projections.
///
/// Accessors created while mapping a class have no serializer yet; the class map resolves
/// them when it is frozen.
pub(crate) struct FieldAccess<T, M> {
    get: fn(&T) -> &M,
    get_mut: fn(&mut T) -> &mut M,
    serializer: Option<Arc<dyn BsonSerializer<M>>>,
    _marker: PhantomData<fn() -> M>,
}

impl<T, M> FieldAccess<T, M> {
    pub(crate) fn new(get: fn(&T) -> &M, get_mut: fn(&mut T) -> &mut M) -> Self {
        Self {
            get,
            get_mut,
            serializer: None,
            _marker: PhantomData,
        }
    }
}

impl<T: 'static, M: BsonType> FieldAccess<T, M> {
    fn serializer(&self, ctx: &SerializationContext) -> Result<Arc<dyn BsonSerializer<M>>> {
        match &self.serializer {
            Some(serializer) => Ok(Arc::clone(serializer)),
            None => ctx.serializer::<M>(),
        }
    }
}

impl<T: 'static, M: BsonType> MemberAccess<T> for FieldAccess<T, M> {
    fn resolve(&self, ctx: &SerializationContext) -> Result<Arc<dyn MemberAccess<T>>> {
        Ok(Arc::new(Self {
            get: self.get,
            get_mut: self.get_mut,
            serializer: Some(self.serializer(ctx)?),
            _marker: PhantomData,
        }))
    }

    #[cfg(test)]
    fn is_resolved(&self) -> bool {
        self.serializer.is_some()
    }

    fn serialize(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        obj: &T,
        options: &SerializationOptions,
    ) -> Result<()> {
        match &self.serializer {
            Some(serializer) => serializer.serialize(ctx, writer, (self.get)(obj), options),
            None => ctx
                .serializer::<M>()?
                .serialize(ctx, writer, (self.get)(obj), options),
        }
    }

    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        obj: &mut T,
        options: &SerializationOptions,
    ) -> Result<()> {
        *(self.get_mut)(obj) = match &self.serializer {
            Some(serializer) => serializer.deserialize(ctx, reader, options)?,
            None => ctx.serializer::<M>()?.deserialize(ctx, reader, options)?,
        };
        Ok(())
    }

    fn is_null(&self, obj: &T) -> bool {
        (self.get)(obj).is_bson_null()
    }

    fn to_bson(&self, ctx: &SerializationContext, obj: &T) -> Result<Bson> {
        ctx.to_bson((self.get)(obj), &SerializationOptions::default())
    }

    fn set_bson(&self, ctx: &SerializationContext, obj: &mut T, value: Bson) -> Result<()> {
        *(self.get_mut)(obj) = ctx.from_bson(value, &SerializationOptions::default())?;
        Ok(())
    }

    fn document<'a>(&self, obj: &'a T) -> Option<&'a Document> {
        ((self.get)(obj) as &dyn Any).downcast_ref()
    }

    fn document_mut<'a>(&self, obj: &'a mut T) -> Option<&'a mut Document> {
        ((self.get_mut)(obj) as &mut dyn Any).downcast_mut()
    }
}

pub(crate) type DefaultCheck<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
pub(crate) type DefaultApply<T> = Arc<dyn Fn(&mut T) + Send + Sync>;

/// The typed half of a mapped member: how to reach it, and its default-value hooks.
pub(crate) struct MemberSlot<T> {
    pub(crate) access: Arc<dyn MemberAccess<T>>,
    pub(crate) is_default: Option<DefaultCheck<T>>,
    pub(crate) apply_default: Option<DefaultApply<T>>,
}

impl<T> Clone for MemberSlot<T> {
    fn clone(&self) -> Self {
        Self {
            access: self.access.clone(),
            is_default: self.is_default.clone(),
            apply_default: self.apply_default.clone(),
        }
    }
}

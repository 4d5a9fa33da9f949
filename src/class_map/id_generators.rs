//! Generators for empty id members.

use std::fmt::Debug;

use uuid::Uuid;

use crate::{Binary, Bson, oid::ObjectId, spec::BinarySubtype};

/// Produces new ids and recognizes ids that have not been assigned yet.
///
/// Ids are exchanged as [`Bson`] values in the member type's default representation, so a
/// generator for `String` ids produces `Bson::String`.
pub trait IdGenerator: Send + Sync + Debug {
    fn generate(&self) -> Bson;

    fn is_empty(&self, id: &Bson) -> bool;
}

/// Generates [`ObjectId`]s. Null and the all-zero id count as empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectIdGenerator;

impl IdGenerator for ObjectIdGenerator {
    fn generate(&self) -> Bson {
        Bson::ObjectId(ObjectId::new())
    }

    fn is_empty(&self, id: &Bson) -> bool {
        match id {
            Bson::Null => true,
            Bson::ObjectId(oid) => oid.is_empty(),
            _ => false,
        }
    }
}

/// Generates ObjectId hex strings for `String` ids stored with an ObjectId representation.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringObjectIdGenerator;

impl IdGenerator for StringObjectIdGenerator {
    fn generate(&self) -> Bson {
        Bson::String(ObjectId::new().to_hex())
    }

    fn is_empty(&self, id: &Bson) -> bool {
        match id {
            Bson::Null => true,
            Bson::String(s) => s.is_empty(),
            _ => false,
        }
    }
}

/// Generates random (version 4) UUIDs. Null and the nil UUID count as empty.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> Bson {
        Bson::Binary(Binary::from_uuid(Uuid::new_v4()))
    }

    fn is_empty(&self, id: &Bson) -> bool {
        match id {
            Bson::Null => true,
            Bson::Binary(b) => {
                matches!(b.subtype, BinarySubtype::Uuid | BinarySubtype::UuidOld)
                    && b.bytes.iter().all(|byte| *byte == 0)
            }
            _ => false,
        }
    }
}

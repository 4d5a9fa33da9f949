//! Serializers for scalar Rust types.

use std::{sync::Arc, time::SystemTime};

use uuid::Uuid;

use super::{BsonSerializer, BsonType, SerializationContext, SerializationOptions, convert};
use crate::{
    Binary,
    DateTime,
    bson::{Regex, Timestamp},
    error::{Error, Result},
    oid::ObjectId,
    raw::{BsonReader, BsonWriter},
    spec::{BinarySubtype, ElementType},
};

pub(crate) fn unsupported_representation(target: &str, representation: ElementType) -> Error {
    Error::serialization(format!(
        "{representation:?} is not a valid representation for {target}"
    ))
}

pub(crate) fn unexpected_type(reader: &BsonReader<'_>, target: &str) -> Error {
    match reader.current_type() {
        Some(actual) => Error::serialization(format!("cannot deserialize {target} from BSON type {actual:?}")),
        None => Error::serialization(format!("cannot deserialize {target} from a top-level document")),
    }
}

fn parse_string<T: std::str::FromStr>(value: &str, target: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::serialization(format!("cannot parse \"{value}\" as {target}")))
}

macro_rules! bson_type {
    ($ty:ty => $serializer:ident) => {
        impl BsonType for $ty {
            fn create_serializer(
                _ctx: &SerializationContext,
            ) -> Result<Arc<dyn BsonSerializer<Self>>> {
                Ok(Arc::new($serializer))
            }
        }
    };
}

/// Serializes `bool` as Boolean, Int32, Int64, Double or String.
#[derive(Clone, Copy, Debug, Default)]
pub struct BooleanSerializer;

bson_type!(bool => BooleanSerializer);

impl BsonSerializer<bool> for BooleanSerializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &bool,
        options: &SerializationOptions,
    ) -> Result<()> {
        match options.representation.unwrap_or(ElementType::Boolean) {
            ElementType::Boolean => writer.write_boolean(*value),
            ElementType::Int32 => writer.write_int32(*value as i32),
            ElementType::Int64 => writer.write_int64(*value as i64),
            ElementType::Double => writer.write_double(if *value { 1.0 } else { 0.0 }),
            ElementType::String => writer.write_string(if *value { "true" } else { "false" }),
            other => Err(unsupported_representation("bool", other)),
        }
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        _options: &SerializationOptions,
    ) -> Result<bool> {
        match reader.current_type() {
            Some(ElementType::Boolean) => reader.read_boolean(),
            Some(ElementType::Int32) => Ok(reader.read_int32()? != 0),
            Some(ElementType::Int64) => Ok(reader.read_int64()? != 0),
            Some(ElementType::Double) => Ok(reader.read_double()? != 0.0),
            Some(ElementType::String) => parse_string(reader.read_string()?, "bool"),
            _ => Err(unexpected_type(reader, "bool")),
        }
    }
}

/// Serializes `i32` as Int32 (default), Int64, Double or String.
#[derive(Clone, Copy, Debug, Default)]
pub struct Int32Serializer;

bson_type!(i32 => Int32Serializer);

impl BsonSerializer<i32> for Int32Serializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &i32,
        options: &SerializationOptions,
    ) -> Result<()> {
        match options.representation.unwrap_or(ElementType::Int32) {
            ElementType::Int32 => writer.write_int32(*value),
            ElementType::Int64 => writer.write_int64(i64::from(*value)),
            ElementType::Double => writer.write_double(f64::from(*value)),
            ElementType::String => writer.write_string(&value.to_string()),
            other => Err(unsupported_representation("i32", other)),
        }
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<i32> {
        match reader.current_type() {
            Some(ElementType::Int32) => reader.read_int32(),
            Some(ElementType::Int64) => convert::i64_to_i32(reader.read_int64()?, options),
            Some(ElementType::Double) => convert::f64_to_i32(reader.read_double()?, options),
            Some(ElementType::String) => parse_string(reader.read_string()?, "i32"),
            _ => Err(unexpected_type(reader, "i32")),
        }
    }
}

/// Serializes `i64` as Int64 (default), Int32, Double or String.
#[derive(Clone, Copy, Debug, Default)]
pub struct Int64Serializer;

bson_type!(i64 => Int64Serializer);

impl BsonSerializer<i64> for Int64Serializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &i64,
        options: &SerializationOptions,
    ) -> Result<()> {
        match options.representation.unwrap_or(ElementType::Int64) {
            ElementType::Int64 => writer.write_int64(*value),
            ElementType::Int32 => writer.write_int32(convert::i64_to_i32(*value, options)?),
            ElementType::Double => writer.write_double(convert::i64_to_f64(*value, options)?),
            ElementType::String => writer.write_string(&value.to_string()),
            other => Err(unsupported_representation("i64", other)),
        }
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<i64> {
        match reader.current_type() {
            Some(ElementType::Int64) => reader.read_int64(),
            Some(ElementType::Int32) => Ok(i64::from(reader.read_int32()?)),
            Some(ElementType::Double) => convert::f64_to_i64(reader.read_double()?, options),
            Some(ElementType::String) => parse_string(reader.read_string()?, "i64"),
            _ => Err(unexpected_type(reader, "i64")),
        }
    }
}

/// Serializes `u32`. BSON has no unsigned types, so the default representation is Int32 and
/// values above `i32::MAX` are rejected unless `allow_overflow` is set, in which case they wrap.
#[derive(Clone, Copy, Debug, Default)]
pub struct UInt32Serializer;

bson_type!(u32 => UInt32Serializer);

impl BsonSerializer<u32> for UInt32Serializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &u32,
        options: &SerializationOptions,
    ) -> Result<()> {
        match options.representation.unwrap_or(ElementType::Int32) {
            ElementType::Int32 => writer.write_int32(convert::u32_to_i32(*value, options)?),
            ElementType::Int64 => writer.write_int64(i64::from(*value)),
            ElementType::Double => writer.write_double(f64::from(*value)),
            ElementType::String => writer.write_string(&value.to_string()),
            other => Err(unsupported_representation("u32", other)),
        }
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<u32> {
        match reader.current_type() {
            Some(ElementType::Int32) => {
                convert::i64_to_u32(i64::from(reader.read_int32()?), options)
            }
            Some(ElementType::Int64) => convert::i64_to_u32(reader.read_int64()?, options),
            Some(ElementType::Double) => {
                let value = convert::f64_to_i64(reader.read_double()?, options)?;
                convert::i64_to_u32(value, options)
            }
            Some(ElementType::String) => parse_string(reader.read_string()?, "u32"),
            _ => Err(unexpected_type(reader, "u32")),
        }
    }
}

/// Serializes `u64` as Int64 (default), Double or String. Values above `i64::MAX` wrap only when
/// `allow_overflow` is set.
#[derive(Clone, Copy, Debug, Default)]
pub struct UInt64Serializer;

bson_type!(u64 => UInt64Serializer);

impl BsonSerializer<u64> for UInt64Serializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &u64,
        options: &SerializationOptions,
    ) -> Result<()> {
        match options.representation.unwrap_or(ElementType::Int64) {
            ElementType::Int64 => writer.write_int64(convert::u64_to_i64(*value, options)?),
            ElementType::Int32 => {
                let value = convert::u64_to_i64(*value, options)?;
                writer.write_int32(convert::i64_to_i32(value, options)?)
            }
            ElementType::Double => {
                let value = convert::u64_to_i64(*value, options)?;
                writer.write_double(convert::i64_to_f64(value, options)?)
            }
            ElementType::String => writer.write_string(&value.to_string()),
            other => Err(unsupported_representation("u64", other)),
        }
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<u64> {
        match reader.current_type() {
            Some(ElementType::Int64) => convert::i64_to_u64(reader.read_int64()?, options),
            Some(ElementType::Int32) => {
                convert::i64_to_u64(i64::from(reader.read_int32()?), options)
            }
            Some(ElementType::Double) => {
                let value = convert::f64_to_i64(reader.read_double()?, options)?;
                convert::i64_to_u64(value, options)
            }
            Some(ElementType::String) => parse_string(reader.read_string()?, "u64"),
            _ => Err(unexpected_type(reader, "u64")),
        }
    }
}

/// Serializes `f64` as Double (default), Int32, Int64 or String.
#[derive(Clone, Copy, Debug, Default)]
pub struct DoubleSerializer;

bson_type!(f64 => DoubleSerializer);

impl BsonSerializer<f64> for DoubleSerializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &f64,
        options: &SerializationOptions,
    ) -> Result<()> {
        match options.representation.unwrap_or(ElementType::Double) {
            ElementType::Double => writer.write_double(*value),
            ElementType::Int32 => writer.write_int32(convert::f64_to_i32(*value, options)?),
            ElementType::Int64 => writer.write_int64(convert::f64_to_i64(*value, options)?),
            ElementType::String => writer.write_string(&value.to_string()),
            other => Err(unsupported_representation("f64", other)),
        }
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<f64> {
        match reader.current_type() {
            Some(ElementType::Double) => reader.read_double(),
            Some(ElementType::Int32) => Ok(f64::from(reader.read_int32()?)),
            Some(ElementType::Int64) => convert::i64_to_f64(reader.read_int64()?, options),
            Some(ElementType::String) => parse_string(reader.read_string()?, "f64"),
            _ => Err(unexpected_type(reader, "f64")),
        }
    }
}

/// Serializes `String` as String (default), ObjectId, Symbol or JavaScript code.
#[derive(Clone, Copy, Debug, Default)]
pub struct StringSerializer;

bson_type!(String => StringSerializer);

impl BsonSerializer<String> for StringSerializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &String,
        options: &SerializationOptions,
    ) -> Result<()> {
        match options.representation.unwrap_or(ElementType::String) {
            ElementType::String => writer.write_string(value),
            ElementType::ObjectId => writer.write_object_id(ObjectId::parse_str(value)?),
            ElementType::Symbol => writer.write_symbol(value),
            ElementType::JavaScriptCode => writer.write_javascript(value),
            other => Err(unsupported_representation("String", other)),
        }
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        _options: &SerializationOptions,
    ) -> Result<String> {
        match reader.current_type() {
            Some(ElementType::String) => Ok(reader.read_string()?.to_string()),
            Some(ElementType::ObjectId) => Ok(reader.read_object_id()?.to_hex()),
            Some(ElementType::Symbol) => Ok(reader.read_symbol()?.to_string()),
            Some(ElementType::JavaScriptCode) => Ok(reader.read_javascript()?.to_string()),
            _ => Err(unexpected_type(reader, "String")),
        }
    }
}

/// Serializes [`ObjectId`] as ObjectId (default) or its hex String.
#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectIdSerializer;

bson_type!(ObjectId => ObjectIdSerializer);

impl BsonSerializer<ObjectId> for ObjectIdSerializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &ObjectId,
        options: &SerializationOptions,
    ) -> Result<()> {
        match options.representation.unwrap_or(ElementType::ObjectId) {
            ElementType::ObjectId => writer.write_object_id(*value),
            ElementType::String => writer.write_string(&value.to_hex()),
            other => Err(unsupported_representation("ObjectId", other)),
        }
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        _options: &SerializationOptions,
    ) -> Result<ObjectId> {
        match reader.current_type() {
            Some(ElementType::ObjectId) => reader.read_object_id(),
            Some(ElementType::String) => ObjectId::parse_str(reader.read_string()?),
            _ => Err(unexpected_type(reader, "ObjectId")),
        }
    }
}

/// Serializes [`DateTime`] as DateTime (default), Int64 milliseconds or an RFC 3339 String.
#[derive(Clone, Copy, Debug, Default)]
pub struct DateTimeSerializer;

bson_type!(DateTime => DateTimeSerializer);

impl BsonSerializer<DateTime> for DateTimeSerializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &DateTime,
        options: &SerializationOptions,
    ) -> Result<()> {
        match options.representation.unwrap_or(ElementType::DateTime) {
            ElementType::DateTime => writer.write_datetime(*value),
            ElementType::Int64 => writer.write_int64(value.timestamp_millis()),
            ElementType::String => writer.write_string(&value.try_to_rfc3339_string()?),
            other => Err(unsupported_representation("DateTime", other)),
        }
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        _options: &SerializationOptions,
    ) -> Result<DateTime> {
        match reader.current_type() {
            Some(ElementType::DateTime) => reader.read_datetime(),
            Some(ElementType::Int64) => Ok(DateTime::from_millis(reader.read_int64()?)),
            Some(ElementType::String) => DateTime::parse_rfc3339_str(reader.read_string()?),
            _ => Err(unexpected_type(reader, "DateTime")),
        }
    }
}

/// Serializes [`SystemTime`] through [`DateTime`], clamping to its representable range.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSerializer;

bson_type!(SystemTime => SystemTimeSerializer);

impl BsonSerializer<SystemTime> for SystemTimeSerializer {
    fn serialize(
        &self,
        ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &SystemTime,
        options: &SerializationOptions,
    ) -> Result<()> {
        DateTimeSerializer.serialize(ctx, writer, &DateTime::from_system_time(*value), options)
    }

    fn deserialize(
        &self,
        ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        options: &SerializationOptions,
    ) -> Result<SystemTime> {
        Ok(DateTimeSerializer
            .deserialize(ctx, reader, options)?
            .to_system_time())
    }
}

/// Serializes [`Uuid`] as Binary subtype 4 (default) or its hyphenated String.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidSerializer;

bson_type!(Uuid => UuidSerializer);

impl BsonSerializer<Uuid> for UuidSerializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &Uuid,
        options: &SerializationOptions,
    ) -> Result<()> {
        match options.representation.unwrap_or(ElementType::Binary) {
            ElementType::Binary => writer.write_binary(&Binary::from_uuid(*value)),
            ElementType::String => writer.write_string(&value.hyphenated().to_string()),
            other => Err(unsupported_representation("Uuid", other)),
        }
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        _options: &SerializationOptions,
    ) -> Result<Uuid> {
        match reader.current_type() {
            Some(ElementType::Binary) => {
                let binary = reader.read_binary()?;
                match binary.subtype {
                    BinarySubtype::Uuid | BinarySubtype::UuidOld => {
                        Uuid::from_slice(&binary.bytes).map_err(Error::serialization)
                    }
                    other => Err(Error::serialization(format!(
                        "cannot deserialize Uuid from binary subtype {other:?}"
                    ))),
                }
            }
            Some(ElementType::String) => {
                Uuid::parse_str(reader.read_string()?).map_err(Error::serialization)
            }
            _ => Err(unexpected_type(reader, "Uuid")),
        }
    }
}

/// Serializes [`Binary`] values unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct BinarySerializer;

bson_type!(Binary => BinarySerializer);

impl BsonSerializer<Binary> for BinarySerializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &Binary,
        _options: &SerializationOptions,
    ) -> Result<()> {
        writer.write_binary(value)
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        _options: &SerializationOptions,
    ) -> Result<Binary> {
        match reader.current_type() {
            Some(ElementType::Binary) => reader.read_binary(),
            _ => Err(unexpected_type(reader, "Binary")),
        }
    }
}

/// Serializes [`Timestamp`] as Timestamp (default) or its packed Int64 form.
#[derive(Clone, Copy, Debug, Default)]
pub struct TimestampSerializer;

bson_type!(Timestamp => TimestampSerializer);

impl BsonSerializer<Timestamp> for TimestampSerializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &Timestamp,
        options: &SerializationOptions,
    ) -> Result<()> {
        match options.representation.unwrap_or(ElementType::Timestamp) {
            ElementType::Timestamp => writer.write_timestamp(*value),
            ElementType::Int64 => writer.write_int64(i64::from_le_bytes(value.to_le_bytes())),
            other => Err(unsupported_representation("Timestamp", other)),
        }
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        _options: &SerializationOptions,
    ) -> Result<Timestamp> {
        match reader.current_type() {
            Some(ElementType::Timestamp) => reader.read_timestamp(),
            Some(ElementType::Int64) => {
                Ok(Timestamp::from_le_bytes(reader.read_int64()?.to_le_bytes()))
            }
            _ => Err(unexpected_type(reader, "Timestamp")),
        }
    }
}

/// Serializes [`Regex`] as a RegularExpression value.
#[derive(Clone, Copy, Debug, Default)]
pub struct RegexSerializer;

bson_type!(Regex => RegexSerializer);

impl BsonSerializer<Regex> for RegexSerializer {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &Regex,
        _options: &SerializationOptions,
    ) -> Result<()> {
        writer.write_regular_expression(value)
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        _options: &SerializationOptions,
    ) -> Result<Regex> {
        match reader.current_type() {
            Some(ElementType::RegularExpression) => reader.read_regular_expression(),
            Some(ElementType::String) => Ok(Regex::new(reader.read_string()?, "")),
            _ => Err(unexpected_type(reader, "Regex")),
        }
    }
}

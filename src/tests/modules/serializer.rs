use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use uuid::Uuid;

use crate::{
    Bson,
    DateTime,
    Document,
    doc,
    error::{ErrorKind, Result},
    oid::ObjectId,
    raw::{BsonReader, BsonWriter},
    serializer::{
        BsonSerializer,
        NONE_SENTINEL_ELEMENT,
        SerializationContext,
        SerializationOptions,
    },
    spec::{BinarySubtype, ElementType},
};

fn options() -> SerializationOptions {
    SerializationOptions::default()
}

fn as_type(representation: ElementType) -> SerializationOptions {
    options().representation(representation)
}

#[test]
fn documents_pass_through() {
    let ctx = SerializationContext::new();
    let doc = doc! { "a": 1, "b": { "c": [1, 2] } };
    let bytes = ctx.to_vec(&doc).unwrap();
    assert_eq!(bytes, doc.to_vec().unwrap());
    assert_eq!(ctx.from_slice::<Document>(&bytes).unwrap(), doc);
}

#[test]
fn documents_reject_duplicates_unless_allowed() {
    let ctx = SerializationContext::new();
    let err = ctx.from_json::<Document>(r#"{ "a": 1, "a": 2 }"#);
    assert!(err.is_err());

    let mut doc = Document::new();
    doc.push_duplicate("a".into(), Bson::Int32(1));
    doc.push_duplicate("a".into(), Bson::Int32(2));
    let mut writer = BsonWriter::new(Default::default());
    writer.write_document(&doc).unwrap();
    let bytes = writer.into_bytes();

    assert_matches!(
        ctx.from_slice::<Document>(&bytes).unwrap_err().kind,
        ErrorKind::DuplicateElementName { .. }
    );
    let read = ctx
        .from_slice_with::<Document>(&bytes, &options().allow_duplicate_names(true))
        .unwrap();
    assert_eq!(read.len(), 2);
}

#[test]
fn narrowing_integers_checks_overflow() {
    let ctx = SerializationContext::new();
    let big = i64::from(i32::MAX) + 1;

    let err = ctx.from_bson::<i32>(Bson::Int64(big), &options()).unwrap_err();
    assert_matches!(err.kind, ErrorKind::Overflow { target: "Int32", .. });

    let wrapped = ctx
        .from_bson::<i32>(Bson::Int64(big), &options().allow_overflow(true))
        .unwrap();
    assert_eq!(wrapped, i32::MIN);

    assert!(ctx.to_bson(&big, &as_type(ElementType::Int32)).is_err());
    assert_eq!(
        ctx.to_bson(&42i64, &as_type(ElementType::Int32)).unwrap(),
        Bson::Int32(42)
    );
}

#[test]
fn unsigned_integers() {
    let ctx = SerializationContext::new();
    assert_eq!(ctx.to_bson(&7u32, &options()).unwrap(), Bson::Int32(7));
    assert!(ctx.to_bson(&u32::MAX, &options()).is_err());
    assert_eq!(
        ctx.to_bson(&u32::MAX, &options().allow_overflow(true)).unwrap(),
        Bson::Int32(-1)
    );
    assert_eq!(
        ctx.to_bson(&u32::MAX, &as_type(ElementType::Int64)).unwrap(),
        Bson::Int64(u32::MAX.into())
    );
    assert!(ctx.from_bson::<u32>(Bson::Int32(-1), &options()).is_err());

    assert!(ctx.to_bson(&u64::MAX, &options()).is_err());
    assert_eq!(
        ctx.to_bson(&u64::MAX, &options().allow_overflow(true)).unwrap(),
        Bson::Int64(-1)
    );
    assert_eq!(
        ctx.from_bson::<u64>(Bson::Int64(-1), &options().allow_overflow(true))
            .unwrap(),
        u64::MAX
    );
}

#[test]
fn doubles_and_truncation() {
    let ctx = SerializationContext::new();
    assert_eq!(ctx.from_bson::<i64>(Bson::Double(3.0), &options()).unwrap(), 3);
    assert!(ctx.from_bson::<i64>(Bson::Double(3.5), &options()).is_err());
    assert_eq!(
        ctx.from_bson::<i64>(Bson::Double(3.5), &options().allow_truncation(true))
            .unwrap(),
        3
    );
    assert!(ctx.from_bson::<i32>(Bson::Double(1e10), &options()).is_err());

    let precise = (1i64 << 53) + 1;
    assert!(ctx.from_bson::<f64>(Bson::Int64(precise), &options()).is_err());
    assert!(
        ctx.from_bson::<f64>(Bson::Int64(precise), &options().allow_truncation(true))
            .is_ok()
    );
}

#[test]
fn string_representations() {
    let ctx = SerializationContext::new();
    assert_eq!(
        ctx.to_bson(&12i32, &as_type(ElementType::String)).unwrap(),
        Bson::String("12".into())
    );
    assert_eq!(ctx.from_bson::<i32>(Bson::String("12".into()), &options()).unwrap(), 12);
    assert!(ctx.from_bson::<i32>(Bson::String("twelve".into()), &options()).is_err());
    assert_eq!(
        ctx.to_bson(&true, &as_type(ElementType::Int32)).unwrap(),
        Bson::Int32(1)
    );

    let hex = "507f1f77bcf86cd799439011".to_string();
    assert_eq!(
        ctx.to_bson(&hex, &as_type(ElementType::ObjectId)).unwrap(),
        Bson::ObjectId(ObjectId::parse_str(&hex).unwrap())
    );
    assert!(
        ctx.to_bson(&"zz".to_string(), &as_type(ElementType::ObjectId))
            .is_err()
    );
}

#[test]
fn unsupported_representation() {
    let ctx = SerializationContext::new();
    let err = ctx
        .to_bson(&1i32, &as_type(ElementType::RegularExpression))
        .unwrap_err();
    assert!(err.is_serialization_error());
}

#[test]
fn wrong_wire_type() {
    let ctx = SerializationContext::new();
    let err = ctx.from_bson::<i32>(Bson::Boolean(true), &options()).unwrap_err();
    assert_matches!(err.kind, ErrorKind::Serialization { ref message } if message.contains("Boolean"));
}

#[test]
fn datetimes_and_uuids() {
    let ctx = SerializationContext::new();
    let when = DateTime::from_millis(1_000);
    assert_eq!(
        ctx.to_bson(&when, &as_type(ElementType::Int64)).unwrap(),
        Bson::Int64(1_000)
    );
    assert_eq!(ctx.from_bson::<DateTime>(Bson::Int64(1_000), &options()).unwrap(), when);

    let uuid = Uuid::new_v4();
    let bson = ctx.to_bson(&uuid, &options()).unwrap();
    assert_matches!(bson, Bson::Binary(ref b) if b.subtype == BinarySubtype::Uuid);
    assert_eq!(ctx.from_bson::<Uuid>(bson, &options()).unwrap(), uuid);
    assert_eq!(
        ctx.to_bson(&uuid, &as_type(ElementType::String)).unwrap(),
        Bson::String(uuid.hyphenated().to_string())
    );
}

#[test]
fn options_write_null_for_none() {
    let ctx = SerializationContext::new();
    assert_eq!(ctx.to_bson(&None::<i32>, &options()).unwrap(), Bson::Null);
    assert_eq!(ctx.to_bson(&Some(3), &options()).unwrap(), Bson::Int32(3));
    assert_eq!(ctx.from_bson::<Option<i32>>(Bson::Null, &options()).unwrap(), None);
    assert_eq!(
        ctx.from_bson::<Option<i32>>(Bson::Int32(3), &options()).unwrap(),
        Some(3)
    );
}

#[test]
fn nullable_inner_types_use_a_sentinel() {
    let ctx = SerializationContext::new();
    let none = ctx.to_bson(&None::<Bson>, &options()).unwrap();
    assert_eq!(none, Bson::Document(doc! { NONE_SENTINEL_ELEMENT: true }));
    assert_eq!(ctx.from_bson::<Option<Bson>>(none, &options()).unwrap(), None);

    let null = ctx.to_bson(&Some(Bson::Null), &options()).unwrap();
    assert_eq!(null, Bson::Null);
    assert_eq!(
        ctx.from_bson::<Option<Bson>>(null, &options()).unwrap(),
        Some(Bson::Null)
    );

    // a document that merely starts like the sentinel is a value
    let lookalike = Bson::Document(doc! { NONE_SENTINEL_ELEMENT: true, "x": 1 });
    assert_eq!(
        ctx.from_bson::<Option<Bson>>(lookalike.clone(), &options()).unwrap(),
        Some(lookalike)
    );

    let outer_none = ctx.to_bson(&None::<Option<i32>>, &options()).unwrap();
    assert_eq!(outer_none, Bson::Document(doc! { NONE_SENTINEL_ELEMENT: true }));
    assert_eq!(ctx.to_bson(&Some(None::<i32>), &options()).unwrap(), Bson::Null);
    assert_eq!(
        ctx.from_bson::<Option<Option<i32>>>(Bson::Null, &options()).unwrap(),
        Some(None)
    );
}

#[test]
fn arrays_apply_item_options() {
    let ctx = SerializationContext::new();
    let values = vec![1i64, 2, 3];
    assert_eq!(
        ctx.to_bson(&values, &options()).unwrap(),
        Bson::Array(vec![Bson::Int64(1), Bson::Int64(2), Bson::Int64(3)])
    );

    let as_strings = options().item_options(as_type(ElementType::String));
    assert_eq!(
        ctx.to_bson(&values, &as_strings).unwrap(),
        Bson::Array(vec!["1".into(), "2".into(), "3".into()])
    );

    let err = ctx
        .from_bson::<Vec<i32>>(Bson::Array(vec![Bson::Int32(1), Bson::Boolean(true)]), &options())
        .unwrap_err();
    assert_eq!(err.index, Some(1));
}

#[test]
fn maps() {
    let ctx = SerializationContext::new();
    let mut sorted = BTreeMap::new();
    sorted.insert("b".to_string(), 2);
    sorted.insert("a".to_string(), 1);
    assert_eq!(ctx.to_document(&sorted).unwrap(), doc! { "a": 1, "b": 2 });

    let hashed: HashMap<String, i32> = ctx.from_document(&doc! { "x": 1, "y": 2 }).unwrap();
    assert_eq!(hashed.len(), 2);
    assert_eq!(hashed["y"], 2);

    let err = ctx
        .from_document::<BTreeMap<String, i32>>(&doc! { "x": "not a number" })
        .unwrap_err();
    assert_eq!(err.key.as_deref(), Some("x"));
}

struct YesNo;

impl BsonSerializer<bool> for YesNo {
    fn serialize(
        &self,
        _ctx: &SerializationContext,
        writer: &mut BsonWriter,
        value: &bool,
        _options: &SerializationOptions,
    ) -> Result<()> {
        writer.write_string(if *value { "yes" } else { "no" })
    }

    fn deserialize(
        &self,
        _ctx: &SerializationContext,
        reader: &mut BsonReader<'_>,
        _options: &SerializationOptions,
    ) -> Result<bool> {
        Ok(reader.read_string()? == "yes")
    }
}

#[test]
fn registered_serializers_replace_defaults() {
    let ctx = SerializationContext::new();
    ctx.register_serializer::<bool>(Arc::new(YesNo)).unwrap();
    assert_eq!(ctx.to_bson(&true, &options()).unwrap(), Bson::String("yes".into()));
    assert!(!ctx.from_bson::<bool>(Bson::String("no".into()), &options()).unwrap());

    // lists of the type pick up the registered serializer
    assert_eq!(
        ctx.to_bson(&vec![false], &options()).unwrap(),
        Bson::Array(vec!["no".into()])
    );

    let err = ctx.register_serializer::<bool>(Arc::new(YesNo)).unwrap_err();
    assert!(err.is_serialization_error());
}

#[test]
fn registering_after_first_use_fails() {
    let ctx = SerializationContext::new();
    ctx.serializer::<bool>().unwrap();
    assert!(ctx.register_serializer::<bool>(Arc::new(YesNo)).is_err());
}

#[test]
fn serializers_are_cached_per_context() {
    let ctx = SerializationContext::new();
    let first = ctx.serializer::<Vec<String>>().unwrap();
    let second = ctx.serializer::<Vec<String>>().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let other = SerializationContext::new();
    assert!(!Arc::ptr_eq(&first, &other.serializer::<Vec<String>>().unwrap()));
}

#[test]
fn global_functions() {
    let doc = doc! { "k": "v" };
    let bytes = crate::serializer::to_vec(&doc).unwrap();
    assert_eq!(crate::serializer::from_slice::<Document>(&bytes).unwrap(), doc);
    assert_eq!(
        crate::serializer::from_json::<Document>(r#"{ "k": "v" }"#).unwrap(),
        doc
    );
}

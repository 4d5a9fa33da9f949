use mongo_core::{
    Binary,
    Bson,
    DateTime,
    Document,
    Regex,
    Timestamp,
    json,
    oid::ObjectId,
    raw::BsonReader,
    spec::{BinarySubtype, ElementType},
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn leaf() -> impl Strategy<Value = Bson> {
    prop_oneof![
        (-1e300..1e300f64).prop_map(Bson::Double),
        "[a-zA-Z0-9 _.]{0,12}".prop_map(Bson::String),
        any::<bool>().prop_map(Bson::Boolean),
        Just(Bson::Null),
        any::<i32>().prop_map(Bson::Int32),
        any::<i64>().prop_map(Bson::Int64),
        any::<[u8; 12]>().prop_map(|bytes| Bson::ObjectId(ObjectId::from_bytes(bytes))),
        any::<i64>().prop_map(|millis| Bson::DateTime(DateTime::from_millis(millis))),
        (any::<u32>(), any::<u32>())
            .prop_map(|(time, increment)| Bson::Timestamp(Timestamp { time, increment })),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(|bytes| {
            Bson::Binary(Binary {
                subtype: BinarySubtype::Generic,
                bytes,
            })
        }),
        ("[a-z]{1,6}", "[imsx]{0,4}")
            .prop_map(|(pattern, options)| Bson::RegularExpression(Regex::new(pattern, options))),
        "[a-z ;()]{0,10}".prop_map(Bson::JavaScriptCode),
        "[a-z]{0,6}".prop_map(Bson::Symbol),
        Just(Bson::Undefined),
        Just(Bson::MinKey),
        Just(Bson::MaxKey),
    ]
}

fn document(value: impl Strategy<Value = Bson>) -> impl Strategy<Value = Document> {
    prop::collection::vec(("[a-z]{1,6}", value), 0..6).prop_map(|elements| {
        let mut doc = Document::new();
        for (key, value) in elements {
            doc.insert(key, value);
        }
        doc
    })
}

fn value() -> impl Strategy<Value = Bson> {
    leaf().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Bson::Array),
            document(inner).prop_map(Bson::Document),
        ]
    })
}

/// Values whose shell JSON form reads back as the same value.
fn json_value() -> impl Strategy<Value = Bson> {
    let leaf = prop_oneof![
        "[a-zA-Z0-9 _]{0,12}".prop_map(Bson::String),
        any::<bool>().prop_map(Bson::Boolean),
        Just(Bson::Null),
        any::<i32>().prop_map(Bson::Int32),
        any::<i64>().prop_map(Bson::Int64),
        any::<[u8; 12]>().prop_map(|bytes| Bson::ObjectId(ObjectId::from_bytes(bytes))),
        (any::<u32>(), any::<u32>())
            .prop_map(|(time, increment)| Bson::Timestamp(Timestamp { time, increment })),
        Just(Bson::MinKey),
        Just(Bson::MaxKey),
    ];
    leaf.prop_recursive(3, 24, 5, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Bson::Array),
            document(inner).prop_map(Bson::Document),
        ]
    })
}

/// Walks a document with the streaming reader, skipping every other value.
fn count_top_level(bytes: &[u8]) -> usize {
    let mut reader = BsonReader::new(bytes);
    reader.read_start_document().unwrap();
    let mut count = 0;
    while reader.read_bson_type().unwrap().is_some() {
        reader.read_name().unwrap();
        if count % 2 == 0 {
            reader.skip_value().unwrap();
        } else {
            reader.read_value().unwrap();
        }
        count += 1;
    }
    reader.read_end_document().unwrap();
    reader.finish().unwrap();
    count
}

proptest! {
    #[test]
    fn binary_round_trip(doc in document(value())) {
        let bytes = doc.to_vec().unwrap();
        let len = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        prop_assert_eq!(len as usize, bytes.len());
        prop_assert_eq!(Document::from_slice(&bytes).unwrap(), doc.clone());
        prop_assert_eq!(count_top_level(&bytes), doc.len());
    }

    #[test]
    fn json_round_trip(doc in document(json_value())) {
        let json = doc.to_json();
        prop_assert_eq!(json::parse_document(&json).unwrap(), doc);
    }

    #[test]
    fn truncated_documents_are_rejected(doc in document(value()), cut in 1usize..64) {
        let bytes = doc.to_vec().unwrap();
        let cut = cut.min(bytes.len() - 1);
        prop_assert!(Document::from_slice(&bytes[..bytes.len() - cut]).is_err());
    }
}

#[test]
fn element_types_are_reported() {
    let doc = mongo_core::doc! { "a": 1, "b": "two", "c": [] };
    let bytes = doc.to_vec().unwrap();
    let mut reader = BsonReader::new(&bytes);
    reader.read_start_document().unwrap();

    let mut seen = Vec::new();
    while let Some(element_type) = reader.read_bson_type().unwrap() {
        seen.push((reader.read_name().unwrap().to_string(), element_type));
        reader.skip_value().unwrap();
    }
    assert_eq!(
        seen,
        vec![
            ("a".to_string(), ElementType::Int32),
            ("b".to_string(), ElementType::String),
            ("c".to_string(), ElementType::Array),
        ]
    );
}

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use crate::{
    Binary,
    Bson,
    Document,
    Timestamp,
    doc,
    error::ErrorKind,
    oid::ObjectId,
    spec::BinarySubtype,
};

#[test]
fn ordered_insert() {
    let mut doc = Document::new();
    doc.insert("first".to_owned(), Bson::Int32(1));
    doc.insert("second".to_owned(), Bson::String("foo".to_owned()));
    doc.insert("alphanumeric".to_owned(), Bson::String("bar".to_owned()));

    let keys: Vec<_> = doc.iter().map(|(key, _)| key.to_owned()).collect();
    assert_eq!(vec!["first", "second", "alphanumeric"], keys);
}

#[test]
fn insert_existing_keeps_position() {
    let mut doc = doc! { "a": 1, "b": 2, "c": 3 };
    assert_eq!(doc.insert("a", "replaced"), Some(Bson::Int32(1)));
    assert_eq!(doc.position("a"), Some(0));
    assert_eq!(doc.get_str("a").unwrap(), "replaced");
    assert_eq!(doc.len(), 3);
}

#[test]
fn push_rejects_duplicate_names() {
    let mut doc = doc! { "a": 1 };
    doc.push("b", 2).unwrap();
    let err = doc.push("a", 3).unwrap_err();
    assert_matches!(err.kind, ErrorKind::DuplicateElementName { ref name, .. } if name == "a");
    assert!(err.is_format_error());
    assert_eq!(doc, doc! { "a": 1, "b": 2 });
}

#[test]
fn insert_at_and_remove_reindex() {
    let mut doc = doc! { "a": 1, "c": 3 };
    doc.insert_at(1, "b", 2).unwrap();
    assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    assert_eq!(doc.position("c"), Some(2));

    assert!(doc.insert_at(5, "z", 0).is_err());
    assert!(doc.insert_at(0, "c", 0).is_err());

    assert_eq!(doc.remove("b"), Some(Bson::Int32(2)));
    assert_eq!(doc.position("c"), Some(1));
    assert_eq!(doc.remove_at(0), Some(("a".to_string(), Bson::Int32(1))));
    assert_eq!(doc.remove_at(3), None);
    assert_eq!(doc, doc! { "c": 3 });
}

#[test]
fn element_access_by_index() {
    let mut doc = doc! { "x": 1, "y": "two" };
    assert_eq!(doc.get_element(1), Some(("y", &Bson::String("two".into()))));
    assert_eq!(doc.get_element(2), None);

    let old = doc.set(0, 10).unwrap();
    assert_eq!(old, Bson::Int32(1));
    assert_eq!(doc.get_i32("x").unwrap(), 10);
    assert!(doc.set(9, 0).is_err());
}

#[test]
fn typed_getters() {
    let oid = ObjectId::new();
    let ts = Timestamp { time: 1, increment: 2 };
    let bin = Binary { subtype: BinarySubtype::Generic, bytes: vec![1, 2, 3] };
    let doc = doc! {
        "f": 1.5,
        "s": "str",
        "b": true,
        "i": 7,
        "l": 8i64,
        "o": oid,
        "t": ts,
        "bin": bin,
        "n": Bson::Null,
        "arr": [1, 2],
        "sub": { "k": "v" },
    };

    assert_eq!(doc.get_f64("f").unwrap(), 1.5);
    assert_eq!(doc.get_str("s").unwrap(), "str");
    assert!(doc.get_bool("b").unwrap());
    assert_eq!(doc.get_i32("i").unwrap(), 7);
    assert_eq!(doc.get_i64("l").unwrap(), 8);
    assert_eq!(doc.get_object_id("o").unwrap(), oid);
    assert_eq!(doc.get_timestamp("t").unwrap().increment, 2);
    assert_eq!(doc.get_binary_generic("bin").unwrap(), &vec![1, 2, 3]);
    assert!(doc.is_null("n"));
    assert_eq!(doc.get_array("arr").unwrap().len(), 2);
    assert_eq!(doc.get_document("sub").unwrap().get_str("k").unwrap(), "v");

    assert!(doc.get_i32("missing").unwrap_err().is_value_access_not_present());
    assert!(doc.get_i32("s").unwrap_err().is_value_access_unexpected_type());
}

#[test]
fn equality_is_order_sensitive() {
    assert_eq!(doc! { "a": 1, "b": 2 }, doc! { "a": 1, "b": 2 });
    assert_ne!(doc! { "a": 1, "b": 2 }, doc! { "b": 2, "a": 1 });
}

#[test]
fn bytes_round_trip() {
    let doc = doc! {
        "_id": ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap(),
        "name": "widget",
        "tags": ["a", "b"],
        "dims": { "w": 1.5, "h": 2 },
        "count": 10i64,
    };
    let bytes = doc.to_vec().unwrap();
    assert_eq!(Document::from_slice(&bytes).unwrap(), doc);
}

#[test]
fn empty_document_bytes() {
    assert_eq!(Document::new().to_vec().unwrap(), vec![5, 0, 0, 0, 0]);
    assert_eq!(Document::from_slice(&[5, 0, 0, 0, 0]).unwrap(), Document::new());
}

#[test]
fn display_uses_shell_syntax() {
    let doc = doc! { "a": 1, "b": "x", "n": 5i64 };
    assert_eq!(doc.to_json(), r#"{ "a" : 1, "b" : "x", "n" : NumberLong(5) }"#);
    assert_eq!(Document::new().to_string(), "{ }");
}

#[test]
fn collect_and_extend() {
    let mut doc: Document = vec![("a", 1), ("b", 2)].into_iter().collect();
    doc.extend(vec![("c", 3)]);
    assert_eq!(doc, doc! { "a": 1, "b": 2, "c": 3 });
    assert!(!doc.has_duplicate_names());
}

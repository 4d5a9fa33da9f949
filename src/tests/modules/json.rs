use assert_matches::assert_matches;
use pretty_assertions::assert_eq;

use crate::{
    Binary,
    Bson,
    DateTime,
    Document,
    Regex,
    Timestamp,
    doc,
    error::ErrorKind,
    json::{self, JsonReaderSettings, JsonScanner, JsonToken},
    oid::ObjectId,
    spec::BinarySubtype,
};

fn tokens(input: &str) -> Vec<JsonToken> {
    let mut scanner = JsonScanner::new(input);
    let mut tokens = Vec::new();
    loop {
        let token = scanner.next_token().unwrap();
        if token == JsonToken::EndOfFile {
            return tokens;
        }
        tokens.push(token);
    }
}

#[test]
fn scanner_numbers() {
    assert_eq!(
        tokens("0 -12 5000000000 1.5 -2e3 -Infinity"),
        vec![
            JsonToken::Int32(0),
            JsonToken::Int32(-12),
            JsonToken::Int64(5_000_000_000),
            JsonToken::Double(1.5),
            JsonToken::Double(-2000.0),
            JsonToken::Double(f64::NEG_INFINITY),
        ]
    );
}

#[test]
fn scanner_rejects_bad_numbers() {
    for input in ["01", "1.", "-", "1e", "12abc"] {
        let err = JsonScanner::new(input).next_token().unwrap_err();
        assert_matches!(err.kind, ErrorKind::Json { position: 0, .. }, "{input}");
    }
}

#[test]
fn scanner_strings_and_punctuation() {
    assert_eq!(
        tokens(r#"{ 'a': "b\nA" }"#),
        vec![
            JsonToken::BeginObject,
            JsonToken::String("a".into()),
            JsonToken::Colon,
            JsonToken::String("b\nA".into()),
            JsonToken::EndObject,
        ]
    );
    assert_eq!(
        tokens("/ab\\/c/im, x$1"),
        vec![
            JsonToken::RegularExpression {
                pattern: "ab\\/c".into(),
                options: "im".into(),
            },
            JsonToken::Comma,
            JsonToken::UnquotedString("x$1".into()),
        ]
    );
}

#[test]
fn unterminated_string_reports_its_start() {
    let err = json::parse_document(r#"{ "a": "oops }"#).unwrap_err();
    assert_matches!(err.kind, ErrorKind::Json { position: 7, .. });
    assert!(err.is_format_error());
}

#[test]
fn plain_json() {
    let doc = json::parse_document(r#"{"a": 1, "b": [true, null, 2.5], "c": {"d": "e"}}"#).unwrap();
    assert_eq!(
        doc,
        doc! { "a": 1, "b": [true, Bson::Null, 2.5], "c": { "d": "e" } }
    );
}

#[test]
fn shell_forms() {
    let doc = json::parse_document(
        r#"{
            _id: ObjectId("507f1f77bcf86cd799439011"),
            n: NumberLong(5),
            s: NumberLong("6"),
            i: NumberInt(7),
            when: ISODate("2020-01-02T03:04:05.678Z"),
            epoch: new Date(0),
            ts: Timestamp(1, 2),
            bin: BinData(0, "AQID"),
            hex: HexData(0, "0a0b"),
            re: /^ab/i,
            lo: MinKey,
            hi: MaxKey,
            u: undefined
        }"#,
    )
    .unwrap();

    assert_eq!(
        doc.get_object_id("_id").unwrap(),
        ObjectId::parse_str("507f1f77bcf86cd799439011").unwrap()
    );
    assert_eq!(doc.get("n"), Some(&Bson::Int64(5)));
    assert_eq!(doc.get("s"), Some(&Bson::Int64(6)));
    assert_eq!(doc.get("i"), Some(&Bson::Int32(7)));
    assert_eq!(
        doc.get_datetime("when").unwrap(),
        &DateTime::parse_rfc3339_str("2020-01-02T03:04:05.678Z").unwrap()
    );
    assert_eq!(doc.get_datetime("epoch").unwrap(), &DateTime::from_millis(0));
    assert_eq!(
        doc.get_timestamp("ts").unwrap(),
        Timestamp {
            time: 1,
            increment: 2
        }
    );
    assert_eq!(
        doc.get("bin"),
        Some(&Bson::Binary(Binary {
            subtype: BinarySubtype::Generic,
            bytes: vec![1, 2, 3]
        }))
    );
    assert_eq!(doc.get_binary_generic("hex").unwrap(), &vec![0x0a, 0x0b]);
    assert_eq!(
        doc.get("re"),
        Some(&Bson::RegularExpression(Regex::new("^ab", "i")))
    );
    assert_eq!(doc.get("lo"), Some(&Bson::MinKey));
    assert_eq!(doc.get("hi"), Some(&Bson::MaxKey));
    assert_eq!(doc.get("u"), Some(&Bson::Undefined));
}

#[test]
fn dollar_wrappers() {
    let doc = json::parse_document(
        r#"{
            "o": { "$oid": "507f1f77bcf86cd799439011" },
            "d": { "$date": { "$numberLong": "1000" } },
            "l": { "$numberLong": "9" },
            "r": { "$regex": "x", "$options": "mi" },
            "b": { "$binary": "AQID", "$type": "04" },
            "t": { "$timestamp": { "t": 3, "i": 4 } },
            "plain": { "$set": 1, "other": 2 }
        }"#,
    )
    .unwrap();

    assert_matches!(doc.get("o"), Some(Bson::ObjectId(_)));
    assert_eq!(doc.get_datetime("d").unwrap(), &DateTime::from_millis(1000));
    assert_eq!(doc.get("l"), Some(&Bson::Int64(9)));
    assert_eq!(doc.get("r"), Some(&Bson::RegularExpression(Regex::new("x", "im"))));
    assert_matches!(
        doc.get("b"),
        Some(Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            ..
        }))
    );
    assert_eq!(
        doc.get_timestamp("t").unwrap(),
        Timestamp {
            time: 3,
            increment: 4
        }
    );
    // not a recognized wrapper shape, so it stays a document
    assert_eq!(doc.get_document("plain").unwrap(), &doc! { "$set": 1, "other": 2 });
}

#[test]
fn duplicate_names() {
    let input = r#"{ "a": 1, "a": 2 }"#;
    let err = json::parse_document(input).unwrap_err();
    assert_matches!(err.kind, ErrorKind::DuplicateElementName { ref name, .. } if name == "a");

    let doc = json::parse_document_with(input, JsonReaderSettings::default().allow_duplicate_names(true))
        .unwrap();
    assert_eq!(doc.len(), 2);
    assert!(doc.has_duplicate_names());
}

#[test]
fn trailing_content_is_rejected() {
    assert!(json::parse_document("{} {}").is_err());
    assert!(json::parse_document("[1]").is_err());
    assert!(json::parse_value("1 2").is_err());
}

#[test]
fn unknown_keyword() {
    let err = json::parse_value("Frobnicate(1)").unwrap_err();
    assert_matches!(err.kind, ErrorKind::Json { ref message, .. } if message.contains("Frobnicate"));
}

#[test]
fn nested_errors_carry_the_key() {
    let err = json::parse_document(r#"{ "outer": ObjectId("zz") }"#).unwrap_err();
    assert_eq!(err.key.as_deref(), Some("outer"));
}

#[test]
fn writer_output_parses_back() {
    let timestamp = Timestamp {
        time: 5,
        increment: 6,
    };
    let doc = doc! {
        "_id": ObjectId::from_bytes([7; 12]),
        "f": 2.0,
        "l": 10i64,
        "s": "quote\" and \\ slash",
        "when": DateTime::from_millis(1_577_934_245_678),
        "ts": timestamp,
        "re": Regex::new("a+", "i"),
        "arr": [1, { "x": Bson::Null }],
        "code": Bson::JavaScriptCode("f()".into()),
        "sym": Bson::Symbol("s".into()),
        "min": Bson::MinKey,
    };
    let text = doc.to_json();
    assert_eq!(Document::parse(&text).unwrap(), doc);
}

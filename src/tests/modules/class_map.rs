use std::{
    sync::{Arc, Barrier},
    thread,
};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use uuid::Uuid;

use crate::{
    Bson,
    Document,
    class_map::{BsonClass, ClassMapBuilder},
    doc,
    error::ErrorKind,
    oid::ObjectId,
    serializer::{SerializationContext, SerializationOptions},
    spec::ElementType,
};

#[derive(Debug, Default, PartialEq)]
struct Person {
    id: ObjectId,
    name: String,
    age: i32,
    nickname: Option<String>,
}

impl BsonClass for Person {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("Name", |p| &p.name, |p| &mut p.name)
            .required(true);
        cm.map_member("Age", |p| &p.age, |p| &mut p.age)
            .ignore_if_default(true);
        cm.map_member("Nickname", |p| &p.nickname, |p| &mut p.nickname)
            .ignore_if_null(true);
        cm.map_member("Id", |p| &p.id, |p| &mut p.id);
    }
}

fn ada(id: ObjectId) -> Person {
    Person {
        id,
        name: "Ada".into(),
        age: 36,
        nickname: None,
    }
}

#[test]
fn id_is_written_first() {
    let ctx = SerializationContext::new();
    let id = ObjectId::new();
    let doc = ctx.to_document(&ada(id)).unwrap();
    assert_eq!(doc, doc! { "_id": id, "Name": "Ada", "Age": 36 });

    let map = ctx.class_map::<Person>().unwrap();
    assert_eq!(
        map.element_names().collect::<Vec<_>>(),
        vec!["_id", "Name", "Age", "Nickname"]
    );
    assert_eq!(map.definition().id_member().unwrap().member_name(), "Id");
}

#[test]
fn round_trip() {
    let ctx = SerializationContext::new();
    let mut person = ada(ObjectId::new());
    person.nickname = Some("Countess".into());
    let bytes = ctx.to_vec(&person).unwrap();
    assert_eq!(ctx.from_slice::<Person>(&bytes).unwrap(), person);
}

#[test]
fn default_and_null_members_are_skipped() {
    let ctx = SerializationContext::new();
    let person = Person {
        age: 0,
        ..ada(ObjectId::EMPTY)
    };
    assert_eq!(
        ctx.to_document(&person).unwrap(),
        doc! { "_id": ObjectId::EMPTY, "Name": "Ada" }
    );
}

#[test]
fn missing_required_element() {
    let ctx = SerializationContext::new();
    let err = ctx
        .from_document::<Person>(&doc! { "_id": ObjectId::new() })
        .unwrap_err();
    assert_matches!(
        err.kind,
        ErrorKind::MissingElement { ref name, class: "Person" } if name == "Name"
    );
    assert!(err.is_serialization_error());
}

#[test]
fn unknown_element() {
    let ctx = SerializationContext::new();
    let err = ctx
        .from_document::<Person>(&doc! { "Name": "Ada", "Height": 1.7 })
        .unwrap_err();
    assert_matches!(
        err.kind,
        ErrorKind::UnknownElement { ref name, class: "Person" } if name == "Height"
    );
}

#[test]
fn repeated_element() {
    let ctx = SerializationContext::new();
    let mut doc = doc! { "Name": "Ada" };
    doc.push_duplicate("Name".into(), Bson::String("Grace".into()));
    let bytes = doc.to_vec().unwrap();

    let err = ctx.from_slice::<Person>(&bytes).unwrap_err();
    assert_matches!(err.kind, ErrorKind::DuplicateElementName { .. });

    let person = ctx
        .from_slice_with::<Person>(&bytes, &SerializationOptions::default().allow_duplicate_names(true))
        .unwrap();
    assert_eq!(person.name, "Grace");
}

#[test]
fn not_a_document() {
    let ctx = SerializationContext::new();
    let err = ctx
        .from_bson::<Person>(Bson::Int32(1), &SerializationOptions::default())
        .unwrap_err();
    assert!(err.is_serialization_error());
}

#[derive(Debug, Default, PartialEq)]
struct Flexible {
    id: i32,
    extra: Document,
}

impl BsonClass for Flexible {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("Id", |f| &f.id, |f| &mut f.id);
        cm.map_member("ExtraElements", |f| &f.extra, |f| &mut f.extra);
    }
}

#[test]
fn extra_elements_are_captured_and_written_inline() {
    let ctx = SerializationContext::new();
    let doc = doc! { "_id": 1, "a": 2, "b": { "c": "x" } };
    let flexible: Flexible = ctx.from_document(&doc).unwrap();
    assert_eq!(flexible.extra, doc! { "a": 2, "b": { "c": "x" } });
    assert_eq!(ctx.to_document(&flexible).unwrap(), doc);

    let map = ctx.class_map::<Flexible>().unwrap();
    assert!(map.member("ExtraElements").is_none());
    assert_eq!(
        map.definition().extra_elements_member().unwrap().member_name(),
        "ExtraElements"
    );
}

#[derive(Debug, Default)]
struct Lenient {
    id: i32,
}

impl BsonClass for Lenient {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_id_member("Key", |l| &l.id, |l| &mut l.id);
        cm.set_ignore_extra_elements(true);
    }
}

#[test]
fn extra_elements_can_be_ignored() {
    let ctx = SerializationContext::new();
    let lenient: Lenient = ctx
        .from_document(&doc! { "whatever": [1, 2], "_id": 9, "more": Bson::Null })
        .unwrap();
    assert_eq!(lenient.id, 9);
}

#[derive(Debug, Default)]
struct Ordered {
    a: i32,
    b: i32,
    c: i64,
    d: i32,
}

impl BsonClass for Ordered {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("A", |o| &o.a, |o| &mut o.a);
        cm.map_member("B", |o| &o.b, |o| &mut o.b).order(2);
        cm.map_member("C", |o| &o.c, |o| &mut o.c)
            .order(1)
            .element_name("see")
            .representation(ElementType::Int32);
        cm.map_member("D", |o| &o.d, |o| &mut o.d).default_value(5);
    }
}

#[test]
fn member_order_names_and_defaults() {
    let ctx = SerializationContext::new();
    let map = ctx.class_map::<Ordered>().unwrap();
    assert_eq!(
        map.element_names().collect::<Vec<_>>(),
        vec!["see", "B", "A", "D"]
    );
    assert_eq!(map.member("see").unwrap().representation(), Some(ElementType::Int32));

    let value = Ordered {
        a: 1,
        b: 2,
        c: 3,
        d: 4,
    };
    assert_eq!(
        ctx.to_document(&value).unwrap(),
        doc! { "see": 3, "B": 2, "A": 1, "D": 4 }
    );

    let big = Ordered {
        c: i64::MAX,
        ..Default::default()
    };
    let err = ctx.to_document(&big).unwrap_err();
    assert_eq!(err.key.as_deref(), Some("see"));

    let read: Ordered = ctx.from_document(&doc! { "A": 1 }).unwrap();
    assert_eq!(read.d, 5);
    assert_eq!(read.b, 0);
}

#[derive(Debug, Default)]
struct Clashing {
    first: i32,
    second: i32,
}

impl BsonClass for Clashing {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("First", |c| &c.first, |c| &mut c.first)
            .element_name("x");
        cm.map_member("Second", |c| &c.second, |c| &mut c.second)
            .element_name("x");
    }
}

#[derive(Debug, Default)]
struct MappedTwice {
    value: i32,
}

impl BsonClass for MappedTwice {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("Value", |m| &m.value, |m| &mut m.value);
        cm.map_member("Value", |m| &m.value, |m| &mut m.value);
    }
}

#[test]
fn invalid_class_maps_fail_on_every_use() {
    let ctx = SerializationContext::new();
    for _ in 0..2 {
        let err = ctx.to_document(&Clashing::default()).unwrap_err();
        assert!(err.to_string().contains("\"x\""), "{err}");
    }
    assert!(ctx.class_map::<MappedTwice>().is_err());
}

#[test]
fn ensure_object_id() {
    let ctx = SerializationContext::new();
    let mut person = ada(ObjectId::EMPTY);
    assert!(ctx.ensure_id(&mut person).unwrap());
    assert!(!person.id.is_empty());
    let assigned = person.id;
    assert!(!ctx.ensure_id(&mut person).unwrap());
    assert_eq!(person.id, assigned);
}

#[derive(Debug, Default)]
struct UuidKeyed {
    id: Uuid,
}

impl BsonClass for UuidKeyed {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("_id", |u| &u.id, |u| &mut u.id);
    }
}

#[derive(Debug, Default)]
struct StringKeyed {
    id: String,
}

impl BsonClass for StringKeyed {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("id", |s| &s.id, |s| &mut s.id)
            .representation(ElementType::ObjectId);
    }
}

#[derive(Debug, Default)]
struct OptionalKey {
    id: Option<i32>,
}

impl BsonClass for OptionalKey {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("Id", |o| &o.id, |o| &mut o.id);
    }
}

#[test]
fn ensure_other_ids() {
    let ctx = SerializationContext::new();

    let mut keyed = UuidKeyed::default();
    assert!(ctx.ensure_id(&mut keyed).unwrap());
    assert!(!keyed.id.is_nil());

    let mut keyed = StringKeyed::default();
    assert!(ctx.ensure_id(&mut keyed).unwrap());
    let id = ObjectId::parse_str(&keyed.id).unwrap();
    assert_eq!(ctx.to_document(&keyed).unwrap(), doc! { "_id": id });

    // no generator for i32, and null ids cannot be filled in
    let mut keyed = OptionalKey::default();
    assert!(ctx.ensure_id(&mut keyed).is_err());
    keyed.id = Some(3);
    assert!(!ctx.ensure_id(&mut keyed).unwrap());
}

#[test]
fn registered_id_generators() {
    use crate::class_map::id_generators::IdGenerator;
    use std::sync::Arc;

    #[derive(Debug)]
    struct Counter;

    impl IdGenerator for Counter {
        fn generate(&self) -> Bson {
            Bson::Int32(42)
        }

        fn is_empty(&self, id: &Bson) -> bool {
            id == &Bson::Null || id == &Bson::Int32(0)
        }
    }

    let ctx = SerializationContext::new();
    ctx.register_id_generator::<Option<i32>>(Arc::new(Counter));
    let mut keyed = OptionalKey::default();
    assert!(ctx.ensure_id(&mut keyed).unwrap());
    assert_eq!(keyed.id, Some(42));
}

#[derive(Debug, Default, PartialEq)]
struct Team {
    id: i32,
    people: Vec<Person>,
    lead: Option<Person>,
}

impl BsonClass for Team {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("Id", |t| &t.id, |t| &mut t.id);
        cm.map_member("People", |t| &t.people, |t| &mut t.people);
        cm.map_member("Lead", |t| &t.lead, |t| &mut t.lead);
    }
}

#[test]
fn nested_classes() {
    let ctx = SerializationContext::new();
    let team = Team {
        id: 1,
        people: vec![ada(ObjectId::new()), ada(ObjectId::new())],
        lead: None,
    };
    let doc = ctx.to_document(&team).unwrap();
    assert_eq!(doc.get_array("People").unwrap().len(), 2);
    assert_eq!(doc.get("Lead"), Some(&Bson::Null));
    assert_eq!(ctx.from_document::<Team>(&doc).unwrap(), team);

    let err = ctx
        .from_document::<Team>(&doc! { "People": [{ "Name": "Ada" }, { "Age": 3 }] })
        .unwrap_err();
    assert_matches!(err.kind, ErrorKind::MissingElement { .. });
    assert_eq!(err.index, Some(1));
}

#[derive(Debug, Default, PartialEq)]
struct Category {
    name: String,
    children: Vec<Category>,
}

impl BsonClass for Category {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("Name", |c| &c.name, |c| &mut c.name);
        cm.map_member("Children", |c| &c.children, |c| &mut c.children);
    }
}

#[derive(Debug, Default)]
struct HoldsClashing {
    inner: Clashing,
}

impl BsonClass for HoldsClashing {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("Inner", |h| &h.inner, |h| &mut h.inner);
    }
}

#[test]
fn member_serializers_are_resolved_when_the_map_is_built() {
    let ctx = SerializationContext::new();
    assert!(ctx.class_map::<Team>().unwrap().members_resolved());
    // the nested class was mapped along the way
    assert!(ctx.class_map::<Person>().unwrap().members_resolved());
    assert!(
        ctx.register_serializer::<String>(ctx.serializer::<String>().unwrap())
            .is_err()
    );

    let tree = Category {
        name: "root".into(),
        children: vec![Category {
            name: "leaf".into(),
            children: vec![],
        }],
    };
    let doc = ctx.to_document(&tree).unwrap();
    assert_eq!(
        doc,
        doc! { "Name": "root", "Children": [{ "Name": "leaf", "Children": [] }] }
    );
    assert_eq!(ctx.from_document::<Category>(&doc).unwrap(), tree);

    let err = ctx.class_map::<HoldsClashing>().unwrap_err();
    assert_eq!(err.key.as_deref(), Some("Inner"));
}

#[test]
fn concurrent_first_use_shares_one_instance() {
    const THREADS: usize = 8;
    let ctx = SerializationContext::new();
    let barrier = Barrier::new(THREADS);

    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                s.spawn(|| {
                    barrier.wait();
                    (
                        ctx.class_map::<Team>().unwrap(),
                        ctx.serializer::<Team>().unwrap(),
                        ctx.serializer::<Vec<Person>>().unwrap(),
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let class_map = ctx.class_map::<Team>().unwrap();
    let serializer = ctx.serializer::<Team>().unwrap();
    let people = ctx.serializer::<Vec<Person>>().unwrap();
    for (m, s, p) in &results {
        assert!(Arc::ptr_eq(m, &class_map));
        assert!(Arc::ptr_eq(s, &serializer));
        assert!(Arc::ptr_eq(p, &people));
    }

    let team = Team {
        id: 3,
        people: vec![ada(ObjectId::new())],
        lead: None,
    };
    let doc = ctx.to_document(&team).unwrap();
    assert_eq!(ctx.from_document::<Team>(&doc).unwrap(), team);
}

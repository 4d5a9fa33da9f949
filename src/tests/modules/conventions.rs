use pretty_assertions::assert_eq;

use crate::{
    Bson,
    Document,
    class_map::{
        BsonClass,
        ClassDefinition,
        ClassMapBuilder,
        conventions::{
            CamelCaseElementNameConvention,
            ClassConvention,
            Convention,
            ConventionPack,
            ConventionRegistry,
            IgnoreExtraElementsConvention,
            IgnoreIfNullConvention,
            NamedIdMemberConvention,
            TypeRepresentationConvention,
        },
    },
    doc,
    serializer::SerializationContext,
    spec::ElementType,
};

#[test]
fn camel_case_names() {
    let simple = CamelCaseElementNameConvention::new(false);
    assert_eq!(simple.element_name("FirstName"), "firstName");
    assert_eq!(simple.element_name("TCPIOStatus"), "tCPIOStatus");
    assert_eq!(simple.element_name("X"), "x");
    assert_eq!(simple.element_name("XY"), "xY");
    assert_eq!(simple.element_name("IOStatus"), "iOStatus");
    assert_eq!(simple.element_name("firstName"), "firstName");
    assert_eq!(simple.element_name(""), "");

    let prefixes = CamelCaseElementNameConvention::new(true);
    assert_eq!(prefixes.element_name("FirstName"), "firstName");
    assert_eq!(prefixes.element_name("TCPIOStatus"), "tcpioStatus");
    assert_eq!(prefixes.element_name("XY"), "xy");
    assert_eq!(prefixes.element_name("IOStatus"), "ioStatus");
    assert_eq!(prefixes.element_name("ID"), "id");
    assert_eq!(prefixes.element_name("URL"), "url");
    assert_eq!(prefixes.element_name("already"), "already");
    assert_eq!(prefixes.element_name("A"), "a");
}

#[derive(Debug, Default, PartialEq)]
struct Account {
    account_id: i32,
    display_name: String,
    ip_address: Option<String>,
    login_count: i32,
    legacy_code: String,
}

impl BsonClass for Account {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("AccountId", |a| &a.account_id, |a| &mut a.account_id);
        cm.map_member("DisplayName", |a| &a.display_name, |a| &mut a.display_name);
        cm.map_member("IPAddress", |a| &a.ip_address, |a| &mut a.ip_address);
        cm.map_member("LoginCount", |a| &a.login_count, |a| &mut a.login_count);
        cm.map_member("LegacyCode", |a| &a.legacy_code, |a| &mut a.legacy_code)
            .element_name("LEGACY");
    }
}

fn account() -> Account {
    Account {
        account_id: 7,
        display_name: "Grace".into(),
        ip_address: None,
        login_count: 3,
        legacy_code: "G1".into(),
    }
}

#[test]
fn standard_conventions() {
    let ctx = SerializationContext::new();
    assert_eq!(
        ctx.to_document(&account()).unwrap(),
        doc! {
            "_id": 7,
            "DisplayName": "Grace",
            "IPAddress": Bson::Null,
            "LoginCount": 3,
            "LEGACY": "G1",
        }
    );
}

#[test]
fn registered_packs_apply_to_matching_classes() {
    let ctx = SerializationContext::new();
    ctx.conventions().register_for::<Account>(
        "account",
        ConventionPack::new()
            .with(Convention::member(CamelCaseElementNameConvention::new(true)))
            .with(Convention::member(IgnoreIfNullConvention(true)))
            .with(Convention::member(TypeRepresentationConvention::new::<i32>(
                ElementType::String,
            ))),
    );

    let doc = ctx.to_document(&account()).unwrap();
    assert_eq!(
        doc,
        doc! {
            "_id": "7",
            "displayName": "Grace",
            "loginCount": "3",
            "LEGACY": "G1",
        }
    );
    assert_eq!(ctx.from_document::<Account>(&doc).unwrap(), account());

    // other classes keep the standard names
    let tagged = ctx.to_document(&Tagged::default()).unwrap();
    assert_eq!(tagged, doc! { "Label": "" });
}

#[test]
fn conventions_registered_after_first_use_have_no_effect() {
    let ctx = SerializationContext::new();
    let before = ctx.to_document(&account()).unwrap();
    ctx.conventions().register(
        "camel",
        ConventionPack::new().with(Convention::member(CamelCaseElementNameConvention::new(
            false,
        ))),
        |_| true,
    );
    assert_eq!(ctx.to_document(&account()).unwrap(), before);
}

#[derive(Debug, Default, PartialEq)]
struct Tagged {
    label: String,
}

impl BsonClass for Tagged {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("Label", |t| &t.label, |t| &mut t.label);
    }
}

#[test]
fn ignore_extra_elements_convention() {
    let ctx = SerializationContext::new();
    ctx.conventions().register(
        "lenient",
        ConventionPack::new().with(Convention::class(IgnoreExtraElementsConvention(true))),
        |class| class.type_name() == "Tagged",
    );
    let tagged: Tagged = ctx
        .from_document(&doc! { "Label": "x", "Unknown": 1 })
        .unwrap();
    assert_eq!(tagged.label, "x");

    let strict = SerializationContext::new();
    assert!(
        strict
            .from_document::<Tagged>(&doc! { "Label": "x", "Unknown": 1 })
            .is_err()
    );
}

#[derive(Debug, Default, PartialEq)]
struct Keyed {
    key: String,
    value: i32,
}

impl BsonClass for Keyed {
    fn map_class(cm: &mut ClassMapBuilder<Self>) {
        cm.map_member("Value", |k| &k.value, |k| &mut k.value);
        cm.map_member("Key", |k| &k.key, |k| &mut k.key);
    }
}

#[test]
fn named_id_member_convention() {
    let ctx = SerializationContext::new();
    ctx.conventions().register_for::<Keyed>(
        "keys",
        ConventionPack::new().with(Convention::class(NamedIdMemberConvention::new(["Key"]))),
    );
    let keyed = Keyed {
        key: "k1".into(),
        value: 2,
    };
    assert_eq!(
        ctx.to_document(&keyed).unwrap(),
        doc! { "_id": "k1", "Value": 2 }
    );
}

struct Tracer;

impl ClassConvention for Tracer {
    fn name(&self) -> &str {
        "Tracer"
    }

    fn apply(&self, class: &mut ClassDefinition) {
        if let Some(member) = class.members_mut().first_mut() {
            let traced = format!("{}_traced", member.member_name());
            member.set_element_name(traced);
        }
    }
}

#[test]
fn registry_management() {
    let registry = ConventionRegistry::new();
    let class = ClassDefinition::new::<Tagged>();
    let names = |registry: &ConventionRegistry| {
        registry
            .lookup(&class)
            .iter()
            .map(|c| c.name().to_string())
            .collect::<Vec<_>>()
    };
    let standard = vec![
        "MemberNameElementName",
        "NamedIdMember",
        "NamedExtraElementsMember",
        "LookupIdGenerator",
    ];
    assert_eq!(names(&registry), standard);

    registry.register(
        "tracing",
        ConventionPack::new().with(Convention::class(Tracer)),
        |_| true,
    );
    registry.register_for::<Document>(
        "documents",
        ConventionPack::new().with(Convention::member(IgnoreIfNullConvention(true))),
    );
    let mut expected = standard.clone();
    expected.push("Tracer");
    assert_eq!(names(&registry), expected);

    // re-registering a name replaces the pack in place
    registry.register(
        "tracing",
        ConventionPack::new().with(Convention::class(IgnoreExtraElementsConvention(false))),
        |_| true,
    );
    expected.pop();
    expected.push("IgnoreExtraElements");
    assert_eq!(names(&registry), expected);

    assert!(registry.remove("tracing"));
    assert!(!registry.remove("tracing"));
    assert_eq!(names(&registry), standard);
}

#[test]
fn custom_class_conventions_run_before_member_conventions() {
    let ctx = SerializationContext::new();
    ctx.conventions().register_for::<Tagged>(
        "tracer",
        ConventionPack::new().with(Convention::class(Tracer)),
    );
    // the member naming convention runs after the class convention and wins
    assert_eq!(
        ctx.to_document(&Tagged { label: "l".into() }).unwrap(),
        doc! { "Label": "l" }
    );
}

use std::sync::Arc;

use serde_json::json;
use tal_api::ScriptedTransport;
use tal_engine::{EngineError, FetchMethod, Lang, Session};
use tal_registry::entities::{COURSE, COURSE_EDITION, FACULTY, TERM, THESIS, USER};
use tal_types::{Entity, Scalar, pack_id};

fn session(transport: &Arc<ScriptedTransport>) -> Session {
    tal_registry::session(transport.clone()).unwrap().with_lang(Lang::En)
}

fn name(entity: &Entity) -> Option<&str> {
    entity.get("name").ok().and_then(|value| value.as_str())
}

#[test]
fn catalog_registers_every_surface() {
    let catalog = tal_registry::catalog().unwrap();
    let schema = catalog.schema();

    let edition = schema.class_id(COURSE_EDITION).unwrap();
    assert_eq!(catalog.list_domains(edition), ["user", "user_all"]);
    for class in [USER, THESIS, FACULTY, COURSE] {
        assert!(catalog.search_method(schema.class_id(class).unwrap()).is_some(), "{class} search");
    }
    let term = schema.class_id(TERM).unwrap();
    let getters: Vec<&str> = catalog.getters(term).iter().map(|method| method.name()).collect();
    assert_eq!(getters, ["services/terms/term", "services/terms/terms"]);
    assert!(Arc::ptr_eq(&catalog, &tal_registry::catalog().unwrap()));
}

#[test]
fn faculty_ancestors_come_from_the_path() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/fac/faculty",
        [("fac_id", "10000000"), ("fields", "name|path[id|name]")],
        json!({
            "name": {"pl": "Wydział Matematyki", "en": "Faculty of Mathematics"},
            "path": [
                {"id": "00000000", "name": {"pl": "Uniwersytet", "en": "University"}},
                {"id": "01000000", "name": {"pl": "Nauki ścisłe", "en": "Sciences"}},
            ],
        }),
    );

    let faculty = session(&transport).get("Faculty", "10000000", Some("name|parent*")).unwrap();

    assert_eq!(name(&faculty), Some("Faculty of Mathematics"));
    let parent = faculty.get("parent").unwrap().as_entity().unwrap();
    assert_eq!((parent.id(), name(parent)), (Some("01000000"), Some("Sciences")));
    let root = parent.get("parent").unwrap().as_entity().unwrap();
    assert_eq!((root.id(), name(root)), (Some("00000000"), Some("University")));
    assert_eq!(root.get("parent").unwrap().as_entity(), None);
    assert_eq!(transport.call_count(), 1);
}

#[test]
fn test_node_tree_is_loaded_recursively() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/crstests/node",
        [
            ("node_id", "7"),
            ("recursive", "true"),
            (
                "fields",
                "node_id|parent_id|order|name|type|course_edition|description|points_min|points_max|points_precision|grade_type|subnodes",
            ),
        ],
        json!({
            "node_id": 7,
            "name": {"pl": "Kolokwia", "en": "Tests"},
            "subnodes": [{
                "node_id": 8,
                "name": {"pl": "Kolokwium 1", "en": "Test 1"},
                "subnodes": [
                    {"node_id": 9, "name": {"pl": "Zadanie 1", "en": "Task 1"}, "subnodes": []},
                ],
            }],
        }),
    );

    let node = session(&transport).get("CourseTestNode", "7", Some("name|subnodes*")).unwrap();

    let children = node.get("subnodes").unwrap().as_list().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!((children[0].id(), name(&children[0])), (Some("8"), Some("Test 1")));
    let grandchildren = children[0].get("subnodes").unwrap().as_list().unwrap();
    assert_eq!((grandchildren[0].id(), name(&grandchildren[0])), (Some("9"), Some("Task 1")));
    assert_eq!(grandchildren[0].get("subnodes").unwrap().as_list(), Some(&[][..]));
}

#[test]
fn absent_variant_field_is_missing() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/crstests/node",
        [("node_id", "7"), ("recursive", "false"), ("fields", "name|points_min")],
        json!({"name": {"pl": "Ocena końcowa", "en": "Final grade"}}),
    );

    let node = session(&transport).get("CourseTestNode", "7", Some("name|min_points")).unwrap();

    assert_eq!(name(&node), Some("Final grade"));
    assert!(node.get("min_points").unwrap().is_missing());
}

#[test]
fn exam_sessions_receive_the_exam_id() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/examrep/exam",
        [("id", "55"), ("fields", "description|id|sessions[description|number]")],
        json!({
            "description": {"pl": "Egzamin", "en": "Exam"},
            "id": 55,
            "sessions": [
                {"number": 1, "description": {"pl": "Pierwszy termin", "en": "First attempt"}},
                {"number": 2, "description": {"pl": "Drugi termin", "en": "Second attempt"}},
            ],
        }),
    );

    let exam = session(&transport).get("Exam", "55", Some("name|sessions")).unwrap();

    let sessions: Vec<(Option<&str>, Option<&str>)> = exam
        .get("sessions")
        .unwrap()
        .as_list()
        .unwrap()
        .iter()
        .map(|session| (session.id(), name(session)))
        .collect();
    let first = pack_id(["55", "1"]);
    let second = pack_id(["55", "2"]);
    assert_eq!(
        sessions,
        [(Some(first.as_str()), Some("First attempt")), (Some(second.as_str()), Some("Second attempt"))]
    );
}

#[test]
fn course_edition_list_batches_term_names() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/courses/user",
        [
            ("active_terms_only", "true"),
            ("fields", "course_editions[course_id|course_name|term_id]"),
        ],
        json!({
            "course_editions": {
                "2023Z": [{"course_id": "1000-A", "course_name": {"pl": "Analiza", "en": "Analysis"}, "term_id": "2023Z"}],
                "2024L": [{"course_id": "1000-B", "course_name": {"pl": "Algebra", "en": "Algebra"}, "term_id": "2024L"}],
            }
        }),
    );
    transport.expect(
        "services/terms/terms",
        [("term_ids", "2023Z|2024L")],
        json!({
            "2023Z": {"name": {"pl": "Semestr zimowy 2023", "en": "Winter 2023"}, "order_key": 1},
            "2024L": {"name": {"pl": "Semestr letni 2024", "en": "Summer 2024"}, "order_key": 2},
        }),
    );
    let session = session(&transport);

    let editions = session.list("CourseEdition", "user", None).unwrap();

    let summary: Vec<(Option<&str>, Option<&str>)> = editions
        .iter()
        .map(|edition| {
            let course = edition.get("course").unwrap().as_entity().unwrap();
            let term = edition.get("term").unwrap().as_entity().unwrap();
            (name(course), name(term))
        })
        .collect();
    assert_eq!(summary, [(Some("Analysis"), Some("Winter 2023")), (Some("Algebra"), Some("Summer 2024"))]);
    assert_eq!(editions[0].id(), Some(pack_id(["1000-A", "2023Z"]).as_str()));
    assert_eq!(session.last_run_stats().remote_calls, 2);
    assert_eq!(transport.pending(), 0);
}

#[test]
fn cards_are_listed_without_fields_param() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/cards/user",
        std::iter::empty::<(&str, &str)>(),
        json!([{
            "barcode_number": "B-0042",
            "contact_chip_uid": null,
            "contactless_chip_uid": "04A1",
            "type": "student",
            "expiration_date": "2027-09-30",
        }]),
    );

    let cards = session(&transport).list("Card", "user", Some("barcode_number|expiration_date")).unwrap();

    assert_eq!(cards.len(), 1);
    assert_eq!(cards[0].id(), Some("B-0042"));
    assert!(matches!(cards[0].get("expiration_date").unwrap().as_scalar(), Some(Scalar::Date(_))));
}

#[test]
fn user_search_wraps_fields_in_items() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/users/search2",
        [
            ("lang", "en"),
            ("query", "kowal"),
            ("num", "20"),
            ("fields", "items[match|user[id|first_name|last_name]]"),
        ],
        json!({
            "items": [{
                "match": "Jan <b>Kowal</b>ski",
                "user": {"id": "12", "first_name": "Jan", "last_name": "Kowalski"},
            }],
            "next_page": false,
        }),
    );

    let results = session(&transport).search("User", "kowal", None).unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].entity.id(), Some("12"));
    assert_eq!(results[0].entity.get("last_name").unwrap().as_str(), Some("Kowalski"));
    assert_eq!(results[0].highlight.text(), "Jan Kowalski");
}

#[test]
fn faculty_search_reads_inline_items() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/fac/search",
        [("lang", "en"), ("query", "mat"), ("num", "20"), ("fields", "match|id|name")],
        json!({
            "items": [{
                "match": "Faculty of <b>Mat</b>hematics",
                "id": "10000000",
                "name": {"pl": "Wydział Matematyki", "en": "Faculty of Mathematics"},
            }]
        }),
    );

    let results = session(&transport).search("Faculty", "mat", None).unwrap();

    assert_eq!(results[0].entity.id(), Some("10000000"));
    assert_eq!(name(&results[0].entity), Some("Faculty of Mathematics"));
}

#[test]
fn course_search_fetches_names_afterwards() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/courses/search",
        [("lang", "en"), ("name", "alg"), ("num", "20")],
        json!({"items": [{"course_id": "1000-B", "match": "<b>Alg</b>ebra"}]}),
    );
    transport.expect(
        "services/courses/course",
        [("course_id", "1000-B"), ("fields", "name")],
        json!({"name": {"pl": "Algebra", "en": "Algebra"}}),
    );

    let results = session(&transport).search("Course", "alg", None).unwrap();

    assert_eq!(results[0].entity.id(), Some("1000-B"));
    assert_eq!(name(&results[0].entity), Some("Algebra"));
    assert_eq!(transport.pending(), 0);
}

#[test]
fn missing_list_and_search_methods_are_errors() {
    let transport = Arc::new(ScriptedTransport::new());
    let session = session(&transport);

    assert!(matches!(
        session.list("Card", "public", None),
        Err(EngineError::NoSuchListMethod { ref domain, .. }) if domain == "public"
    ));
    assert!(matches!(session.search("Term", "winter", None), Err(EngineError::NoSuchSearchMethod { .. })));
    assert_eq!(transport.call_count(), 0);
}

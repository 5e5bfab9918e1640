use std::sync::Arc;

use serde_json::json;
use tal_api::ScriptedTransport;
use tal_engine::{EngineError, Lang, Session};
use tal_types::Scalar;

fn session(transport: &Arc<ScriptedTransport>) -> Session {
    tal_registry::session(transport.clone()).unwrap().with_lang(Lang::En)
}

#[test]
fn default_fields() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/users/user",
        [("fields", "first_name|last_name"), ("user_id", "169934")],
        json!({"first_name": "Krzysztof", "last_name": "Rusek"}),
    );

    let user = session(&transport).get("User", "169934", None).unwrap();

    assert_eq!(user.id(), Some("169934"));
    assert_eq!(user.get("first_name").unwrap().as_str(), Some("Krzysztof"));
    assert_eq!(user.get("last_name").unwrap().as_str(), Some("Rusek"));
    assert_eq!(transport.pending(), 0);
}

#[test]
fn fields_from_users_user() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/users/user",
        [
            (
                "fields",
                "first_name|last_name|room[id|building_id|number|building_name]|sex|homepage_url|mobile_numbers|phone_numbers|profile_url",
            ),
            ("user_id", "777"),
        ],
        json!({
            "first_name": "AAAA",
            "last_name": "BBBBBBBBBB",
            "room": {
                "building_id": "33",
                "number": "50000",
                "id": "20000",
                "building_name": {"en": "", "pl": "Some building name"},
            },
            "sex": "M",
            "homepage_url": "http://www.mimuw.edu.pl/~XXXXXXXXXXXXX",
            "mobile_numbers": [],
            "phone_numbers": null,
            "profile_url": "https://usosweb.uw.edu.pl/kontroler.php?_action=actionx:katalog2/osoby/pokazOsobe(os_id:777)",
        }),
    );

    let user = session(&transport)
        .get(
            "User",
            "777",
            Some("first_name|last_name|sex|profile_url|homepage_url|phone_numbers|mobile_numbers|room"),
        )
        .unwrap();

    assert_eq!(user.get("first_name").unwrap().as_str(), Some("AAAA"));
    assert_eq!(user.get("sex").unwrap().as_str(), Some("male"));
    assert_eq!(
        user.get("profile_url").unwrap().as_str(),
        Some("https://usosweb.uw.edu.pl/kontroler.php?_action=actionx:katalog2/osoby/pokazOsobe(os_id:777)&lang=2")
    );
    assert_eq!(user.get("homepage_url").unwrap().as_str(), Some("http://www.mimuw.edu.pl/~XXXXXXXXXXXXX"));
    assert_eq!(user.get("phone_numbers").unwrap().as_scalar(), Some(&Scalar::List(Vec::new())));
    assert_eq!(user.get("mobile_numbers").unwrap().as_scalar(), Some(&Scalar::List(Vec::new())));

    let room = user.get("room").unwrap().as_entity().unwrap();
    assert_eq!(room.id(), Some("20000"));
    assert_eq!(room.get("number").unwrap().as_str(), Some("50000"));
    let building = room.get("building").unwrap().as_entity().unwrap();
    assert_eq!(building.id(), Some("33"));
    assert_eq!(building.get("name").unwrap().as_str(), Some("Some building name"));
    assert_eq!(transport.call_count(), 1);
}

#[test]
fn authored_theses() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/theses/user",
        [("fields", "authored_theses[titles|id]"), ("user_id", "55")],
        json!({
            "authored_theses": [
                {"titles": {"en": "Show me 1", "pl": "Hide me 1"}, "id": "666345"},
                {"titles": {"en": "Show me 2", "pl": "Hide me 2"}, "id": "26393"},
            ]
        }),
    );

    let user = session(&transport).get("User", "55", Some("authored_theses")).unwrap();

    let theses = user.get("authored_theses").unwrap().as_list().unwrap();
    let summary: Vec<(Option<&str>, Option<&str>)> = theses
        .iter()
        .map(|thesis| (thesis.id(), thesis.get("name").unwrap().as_str()))
        .collect();
    assert_eq!(summary, [(Some("666345"), Some("Show me 1")), (Some("26393"), Some("Show me 2"))]);
}

#[test]
fn user_not_found() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/users/user",
        [("fields", "first_name|last_name"), ("user_id", "5555555555")],
        json!(null),
    );

    let result = session(&transport).get("User", "5555555555", None);

    assert!(matches!(result, Err(EngineError::EntityNotFound { ref class, ref id }) if class == "User" && id == "5555555555"));
}

#[test]
fn batch_get_leaves_out_absent_users() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/users/users",
        [("fields", "first_name|last_name"), ("user_ids", "1|2")],
        json!({
            "1": {"first_name": "Anna", "last_name": "Nowak"},
            "2": null,
        }),
    );
    let session = session(&transport);

    let users = session.get_many("User", ["1", "2", "1"], None).unwrap();

    assert_eq!(users.keys().collect::<Vec<_>>(), ["1"]);
    assert_eq!(users["1"].get("last_name").unwrap().as_str(), Some("Nowak"));
    assert_eq!(session.last_run_stats().remote_calls, 1);
}

#[test]
fn unknown_field_is_rejected_before_any_call() {
    let transport = Arc::new(ScriptedTransport::new());

    let result = session(&transport).get("User", "1", Some("first_name|nickname"));

    assert!(matches!(result, Err(EngineError::InvalidSelector(_))));
    assert_eq!(transport.call_count(), 0);
}

#[test]
fn current_user_is_fetched_without_an_id() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/users/user",
        [("fields", "id|first_name|last_name")],
        json!({"id": "42", "first_name": "Anna", "last_name": "Nowak"}),
    );
    let session = session(&transport);

    let user = session.get_current_user(None).unwrap();

    assert_eq!(user.id(), Some("42"));
    assert_eq!(user.get("last_name").unwrap().as_str(), Some("Nowak"));
    assert_eq!(session.last_run_stats().remote_calls, 1);
}

#[test]
fn current_user_fields_beyond_the_call_are_resolved_by_id() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/users/user",
        [("fields", "id|first_name")],
        json!({"id": "42", "first_name": "Anna"}),
    );
    transport.expect(
        "services/theses/user",
        [("fields", "authored_theses[titles|id]"), ("user_id", "42")],
        json!({"authored_theses": []}),
    );

    let user = session(&transport).get_current_user(Some("first_name|authored_theses")).unwrap();

    assert_eq!(user.get("first_name").unwrap().as_str(), Some("Anna"));
    assert_eq!(user.get("authored_theses").unwrap().as_list(), Some(&[][..]));
    assert_eq!(transport.pending(), 0);
}

#[test]
fn server_time_is_parsed() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect("services/apisrv/now", std::iter::empty::<(&str, &str)>(), json!("2026-10-18 09:30:00.123456"));

    let now = session(&transport).now().unwrap();

    assert_eq!(now.to_string(), "2026-10-18 09:30:00.123456");
}

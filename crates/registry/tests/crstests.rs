use std::sync::Arc;

use serde_json::json;
use tal_api::ScriptedTransport;
use tal_engine::{Lang, Session};
use tal_types::Scalar;

fn session(transport: &Arc<ScriptedTransport>) -> Session {
    tal_registry::session(transport.clone()).unwrap().with_lang(Lang::En)
}

#[test]
fn user_points_are_matched_to_nodes_by_id() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/crstests/user_points",
        [("node_ids", "1|2")],
        json!([
            {"node_id": 1, "points": "4.5", "comment": "ok", "last_changed": "2024-01-10 12:00:00", "grader_id": "9"},
            {"node_id": 77, "points": "1.0", "comment": null, "last_changed": null, "grader_id": null},
        ]),
    );
    let session = session(&transport);

    let nodes = session.get_many("CourseTestNode", ["1", "2"], Some("test_points[points|comment]")).unwrap();

    assert_eq!(nodes.keys().collect::<Vec<_>>(), ["1", "2"]);
    let points = nodes["1"].get("test_points").unwrap().as_entity().unwrap();
    assert_eq!(points.id(), Some("1"));
    assert_eq!(points.get("points").unwrap().as_scalar(), Some(&Scalar::Decimal(4.5)));
    assert_eq!(points.get("comment").unwrap().as_str(), Some("ok"));
    assert_eq!(nodes["2"].get("test_points").unwrap().as_entity(), None);
    assert_eq!(session.last_run_stats().remote_calls, 1);
}

#[test]
fn user_grades_carry_the_grade_inline() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.expect(
        "services/crstests/user_grades",
        [("node_ids", "3")],
        json!([{
            "node_id": "3",
            "grade": {"symbol": "5", "name": {"pl": "bardzo dobry", "en": "very good"}},
            "private_comment": "well done",
            "last_changed": null,
            "grader_id": null,
        }]),
    );

    let node = session(&transport).get("CourseTestNode", "3", Some("test_grade[grade|comment]")).unwrap();

    let test_grade = node.get("test_grade").unwrap().as_entity().unwrap();
    assert_eq!(test_grade.get("comment").unwrap().as_str(), Some("well done"));
    let grade = test_grade.get("grade").unwrap().as_entity().unwrap();
    assert_eq!(grade.id(), Some("5"));
    assert_eq!(grade.get("name").unwrap().as_str(), Some("very good"));
    assert_eq!(transport.pending(), 0);
}

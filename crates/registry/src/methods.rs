//! Fetch methods of the USOS API and the pickers they share.
//!
//! Picker sets are named after the role they play: `primary_*` sets are served by both the
//! single and the batch getter of a class, `secondary_*` sets only by the single getter.

use serde_json::{Value, json};
use tal_engine::{
    CatalogBuilder, Result,
    methods::{
        CurrentUserMethod, EntityPickers, FieldPickers, GetManyMethod, GetMethod, IdListSpec, IdSpec, ListMethod, ListStep, Picker,
        SearchFieldsMode, SearchMethod,
    },
};
use tal_types::Schema;
use tracing::debug;

use crate::entities::*;

fn primary_room() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("id"))
        .with("number", Picker::simple("number"))
        .with(
            "building",
            EntityPickers::new(IdSpec::elementary("building_id"))
                .with("name", Picker::lang_dict("building_name"))
                .make_inline_picker(),
        )
        .with("capacity", Picker::simple("capacity"))
}

fn primary_building() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("id"))
        .with("name", Picker::lang_dict("name"))
        .with("location", Picker::coords("location"))
}

/// Faculty fields available on the ancestor path of a faculty.
fn path_faculty() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("id"))
        .with("name", Picker::lang_dict("name"))
        .with("profile_url", Picker::usosweb_url("profile_url"))
}

fn primary_faculty() -> EntityPickers {
    path_faculty()
        .with("homepage_url", Picker::url("homepage_url"))
        .with("parent", path_faculty().make_ancestor_picker("path"))
}

fn default_user() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("id"))
        .with("first_name", Picker::simple("first_name"))
        .with("last_name", Picker::simple("last_name"))
}

fn primary_user() -> EntityPickers {
    default_user()
        .with("sex", Picker::mapping("sex", [("M", "male"), ("F", "female")]))
        .with("profile_url", Picker::usosweb_url("profile_url"))
        .with("homepage_url", Picker::url("homepage_url"))
        .with("phone_numbers", Picker::open_mapping("phone_numbers", [(Value::Null, json!([]))]))
        .with("mobile_numbers", Picker::simple("mobile_numbers"))
        .with("room", primary_room().make_picker("room"))
}

/// Course edition keys as they appear flat in unit and group objects.
fn inline_course_edition() -> Picker {
    EntityPickers::new(IdSpec::composite(["course_id", "term_id"]))
        .with(
            "course",
            EntityPickers::new(IdSpec::elementary("course_id"))
                .with("name", Picker::lang_dict("course_name"))
                .make_inline_picker(),
        )
        .with("term", Picker::entity_id("term_id"))
        .make_inline_picker()
}

fn primary_course_group() -> EntityPickers {
    EntityPickers::new(IdSpec::composite(["course_unit_id", "group_number"]))
        .with(
            "course_unit",
            EntityPickers::new(IdSpec::elementary("course_unit_id"))
                .with("course_edition", inline_course_edition())
                .with(
                    "class_type",
                    EntityPickers::new(IdSpec::elementary("class_type_id"))
                        .with("name", Picker::lang_dict("class_type"))
                        .make_inline_picker(),
                )
                .make_inline_picker(),
        )
        .with("group_number", Picker::simple("group_number"))
        .with("lecturers", default_user().make_list_picker("lecturers").without_subfield_selector())
        .with("participants", default_user().make_list_picker("participants").without_subfield_selector())
        .with("homepage_url", Picker::url("group_url"))
}

fn secondary_course_group() -> FieldPickers {
    FieldPickers::new()
        .with("description", Picker::lang_dict("group_description"))
        .with("literature", Picker::lang_dict("group_literature"))
}

fn primary_thesis() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("id"))
        .with("type", Picker::simple("type"))
        .with("name", Picker::lang_dict("titles"))
        .with("authors", primary_user().make_list_picker("authors"))
        .with("supervisors", primary_user().make_list_picker("supervisors"))
        .with("faculty", primary_faculty().make_picker("faculty"))
}

fn primary_programme() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("id"))
        .with("name", Picker::lang_dict("description"))
        .with("mode_of_studies", Picker::lang_dict("mode_of_studies"))
        .with("level_of_studies", Picker::lang_dict("level_of_studies"))
        .with("duration", Picker::lang_dict("duration"))
        .with("professional_status", Picker::lang_dict("professional_status"))
}

fn primary_term() -> FieldPickers {
    FieldPickers::new()
        .with("order_key", Picker::simple("order_key"))
        .with("name", Picker::lang_dict("name"))
        .with("start_date", Picker::date("start_date"))
        .with("end_date", Picker::date("end_date"))
}

fn primary_course() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("id"))
        .with("name", Picker::lang_dict("name"))
        .with("profile_url", Picker::usosweb_url("profile_url"))
        .with("homepage_url", Picker::url("homepage_url"))
        .with("currently_conducted", Picker::simple("is_currently_conducted"))
        .with("faculty", Picker::entity_id("fac_id"))
}

fn secondary_course() -> FieldPickers {
    FieldPickers::new()
        .with("description", Picker::lang_dict("description"))
        .with("bibliography", Picker::lang_dict("bibliography"))
        .with("learning_outcomes", Picker::lang_dict("learning_outcomes"))
        .with("assessment_criteria", Picker::lang_dict("assessment_criteria"))
        .with("practical_placement", Picker::lang_dict("practical_placement"))
}

/// Course edition fields reachable from course test nodes.
fn crstests_course_edition() -> EntityPickers {
    EntityPickers::new(IdSpec::composite(["course_id", "term_id"]))
        .with(
            "course",
            EntityPickers::new(IdSpec::elementary("course_id"))
                .with("name", Picker::lang_dict("course_name"))
                .make_inline_picker(),
        )
        .with("term", Picker::entity_id("term_id"))
        .with("profile_url", Picker::usosweb_url("profile_url"))
        .with("homepage_url", Picker::url("homepage_url"))
}

fn primary_course_edition() -> EntityPickers {
    crstests_course_edition()
        .with("coordinators", default_user().make_list_picker("coordinators").without_subfield_selector())
        .with(
            "lecturers",
            default_user().make_list_picker("lecturers").without_subfield_selector().unique(),
        )
}

fn secondary_course_edition() -> FieldPickers {
    FieldPickers::new()
        .with("participants", default_user().make_list_picker("participants").without_subfield_selector())
        .with("description", Picker::lang_dict("description"))
        .with("bibliography", Picker::lang_dict("bibliography"))
        .with("notes", Picker::lang_dict("notes"))
        .with("course_units", Picker::entity_id_list("course_units_ids"))
}

fn primary_course_unit() -> FieldPickers {
    FieldPickers::new()
        .with("profile_url", Picker::usosweb_url("profile_url"))
        .with("homepage_url", Picker::url("homepage_url"))
        .with("class_type", Picker::entity_id("classtype_id"))
        .with("course_edition", inline_course_edition())
}

fn secondary_course_unit() -> FieldPickers {
    FieldPickers::new()
        .with("learning_outcomes", Picker::lang_dict("learning_outcomes"))
        .with("assessment_criteria", Picker::lang_dict("assessment_criteria"))
        .with("topics", Picker::lang_dict("topics"))
        .with("teaching_methods", Picker::lang_dict("teaching_methods"))
        .with("bibliography", Picker::lang_dict("bibliography"))
        .with("groups", primary_course_group().make_list_picker("groups"))
}

fn grade() -> EntityPickers {
    EntityPickers::new(IdSpec::composite(["grade_type_id", "symbol"]))
        .with("symbol", Picker::simple("symbol"))
        .with("name", Picker::lang_dict("name"))
        .with("passes", Picker::simple("passes"))
        .with("decimal_value", Picker::decimal("decimal_value"))
        .with("order_key", Picker::simple("order_key"))
        .with("grade_type", Picker::entity_id("grade_type_id"))
}

fn primary_course_test_root_node() -> EntityPickers {
    let types = [
        ("root", "root"),
        ("fld", "folder"),
        ("folder", "folder"),
        ("pkt", "task"),
        ("task", "task"),
        ("oc", "grade"),
        ("grade", "grade"),
    ];
    EntityPickers::new(IdSpec::elementary("node_id"))
        .with("name", Picker::lang_dict("name"))
        .with("type", Picker::mapping("type", types))
        .with("order_key", Picker::simple("order"))
        .with("description", Picker::simple("description"))
        .with(
            "course_edition",
            crstests_course_edition().make_picker("course_edition").without_subfield_selector(),
        )
        .with("parent", Picker::entity_id("parent_id"))
}

fn primary_course_test_node() -> EntityPickers {
    primary_course_test_root_node()
        .with("min_points", Picker::simple("points_min"))
        .with("max_points", Picker::simple("points_max"))
        .with("precision", Picker::simple("points_precision"))
        .with(
            "grade_type",
            EntityPickers::new(IdSpec::elementary("id")).make_picker("grade_type").without_subfield_selector(),
        )
}

fn secondary_course_test_node() -> FieldPickers {
    FieldPickers::new().with(
        "algorithm",
        EntityPickers::new(IdSpec::elementary("node_id"))
            .with("dependencies", Picker::entity_id_map("dependencies", true))
            .with("variables", Picker::simple("variables"))
            .with("source", Picker::simple("algorithm"))
            .with("description", Picker::simple("description"))
            .make_inline_picker(),
    )
}

/// Points of the current user, one record per node.
fn user_points() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("node_id")).with(
        "test_points",
        EntityPickers::new(IdSpec::elementary("node_id"))
            .with("points", Picker::decimal("points"))
            .with("comment", Picker::simple("comment"))
            .with("last_modified", Picker::date_time("last_changed"))
            .with("grader", Picker::entity_id("grader_id"))
            .make_inline_picker(),
    )
}

/// Grades of the current user, one record per node.
fn user_grades() -> EntityPickers {
    // Grade records here carry no grade type, so the symbol alone identifies the grade.
    let grade = EntityPickers::new(IdSpec::elementary("symbol")).merged(grade().into_fields());
    EntityPickers::new(IdSpec::elementary("node_id")).with(
        "test_grade",
        EntityPickers::new(IdSpec::elementary("node_id"))
            .with("grade", grade.make_picker("grade"))
            .with("comment", Picker::simple("private_comment"))
            .with("last_modified", Picker::date_time("last_changed"))
            .with("grader", Picker::entity_id("grader_id"))
            .make_inline_picker(),
    )
}

fn primary_grade_type() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("id"))
        .with("name", Picker::lang_dict("name"))
        .with(
            "values",
            grade().make_list_picker("values").without_subfield_selector().lifting("id", "grade_type_id"),
        )
}

fn primary_exam_grade() -> EntityPickers {
    EntityPickers::new(IdSpec::composite(["exam_id", "exam_session_number"]))
        .with(
            "grade",
            EntityPickers::new(IdSpec::composite(["grade_type_id", "value_symbol"]))
                .with("symbol", Picker::simple("value_symbol"))
                .with("name", Picker::lang_dict("value_description"))
                .with("grade_type", Picker::entity_id("grade_type_id"))
                .make_inline_picker(),
        )
        .with("exam_session", Picker::composite_entity_id(["exam_id", "exam_session_number"]))
        .with("comment", Picker::simple("comment"))
        .with("modified_date", Picker::date_time("date_modified"))
        .with(
            "modified_by",
            default_user().make_picker("modification_author").without_subfield_selector(),
        )
}

fn secondary_exam_grade() -> FieldPickers {
    FieldPickers::new().with("course_edition", primary_course_edition().make_picker("course_edition"))
}

fn primary_exam_session() -> EntityPickers {
    EntityPickers::new(IdSpec::composite(["exam_id", "number"]))
        .with("number", Picker::simple("number"))
        .with("status", Picker::simple("status"))
        .with("name", Picker::lang_dict("description"))
        .with("deadline", Picker::date_time("deadline"))
}

fn primary_exam() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("id"))
        .with("name", Picker::lang_dict("description"))
        .with("editable", Picker::simple("is_editable"))
}

fn secondary_exam() -> FieldPickers {
    FieldPickers::new()
        .with("sessions", primary_exam_session().make_list_picker("sessions").lifting("id", "exam_id"))
        .with(
            "course_edition",
            EntityPickers::new(IdSpec::composite(["id", "term_id"]))
                .with("term", Picker::entity_id("term_id"))
                .with("course", primary_course().make_inline_picker())
                .make_picker("course")
                .lifting("term_id", "term_id"),
        )
}

fn card() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("barcode_number"))
        .with("barcode_number", Picker::simple("barcode_number"))
        .with("contact_chip_uid", Picker::simple("contact_chip_uid"))
        .with("contactless_chip_uid", Picker::simple("contactless_chip_uid"))
        .with("type", Picker::simple("type"))
        .with("expiration_date", Picker::date("expiration_date"))
}

fn installation() -> EntityPickers {
    EntityPickers::new(IdSpec::elementary("base_url"))
        .with("name", Picker::lang_dict("institution_name"))
        .with("base_url", Picker::simple("base_url"))
        .with("version", Picker::simple("version"))
        .with("contact_emails", Picker::simple("contact_emails"))
}

/// Fields the recursive node endpoint returns for each node of the tree.
const RECURSIVE_NODE_FIELDS: &str =
    "node_id|parent_id|order|name|type|course_edition|description|points_min|points_max|points_precision|grade_type|subnodes";

fn elementary_ids(name: &str) -> IdListSpec {
    IdListSpec::Elementary(name.to_string())
}

/// Registers every method of the API into `builder`.
pub fn register(builder: &mut CatalogBuilder, schema: &Schema) -> Result<()> {
    let class = |name: &str| schema.class_id(name);

    let programme = class(PROGRAMME)?;
    builder.register_getter(GetMethod::new(
        "services/progs/programme",
        programme,
        IdSpec::elementary("programme_id"),
        primary_programme().into_fields(),
    ))?;
    builder.register_getter(GetManyMethod::new(
        "services/progs/programmes",
        programme,
        elementary_ids("programme_ids"),
        primary_programme().into_fields(),
    ))?;

    let user = class(USER)?;
    builder.register_getter(GetMethod::new("services/users/user", user, IdSpec::elementary("user_id"), primary_user().into_fields()))?;
    builder.register_getter(
        GetManyMethod::new("services/users/users", user, elementary_ids("user_ids"), primary_user().into_fields()).limit(30),
    )?;
    builder.register_current_user(CurrentUserMethod::new("services/users/user", user, primary_user()))?;

    let faculty = class(FACULTY)?;
    builder.register_getter(GetMethod::new("services/fac/faculty", faculty, IdSpec::elementary("fac_id"), primary_faculty().into_fields()))?;
    builder.register_getter(
        GetManyMethod::new("services/fac/faculties", faculty, elementary_ids("fac_ids"), primary_faculty().into_fields()).limit(100),
    )?;

    let term = class(TERM)?;
    builder.register_getter(GetMethod::new("services/terms/term", term, IdSpec::elementary("term_id"), primary_term()).without_fields_param())?;
    builder.register_getter(
        GetManyMethod::new("services/terms/terms", term, elementary_ids("term_ids"), primary_term()).without_fields_param(),
    )?;

    let course = class(COURSE)?;
    builder.register_getter(GetMethod::new(
        "services/courses/course",
        course,
        IdSpec::elementary("course_id"),
        primary_course().into_fields().merged(secondary_course()),
    ))?;
    builder.register_getter(GetManyMethod::new(
        "services/courses/courses",
        course,
        elementary_ids("course_ids"),
        primary_course().into_fields(),
    ))?;

    let course_edition = class(COURSE_EDITION)?;
    builder.register_getter(GetMethod::new(
        "services/courses/course_edition",
        course_edition,
        IdSpec::composite(["course_id", "term_id"]),
        primary_course_edition().into_fields().merged(secondary_course_edition()),
    ))?;

    let course_unit = class(COURSE_UNIT)?;
    builder.register_getter(GetMethod::new(
        "services/courses/unit",
        course_unit,
        IdSpec::elementary("unit_id"),
        primary_course_unit().merged(secondary_course_unit()),
    ))?;
    builder.register_getter(GetManyMethod::new(
        "services/courses/units",
        course_unit,
        elementary_ids("unit_ids"),
        primary_course_unit(),
    ))?;

    builder.register_getter(GetManyMethod::new(
        "services/courses/classtypes_index",
        class(CLASS_TYPE)?,
        elementary_ids("_"),
        FieldPickers::new().with("name", Picker::lang_dict("name")),
    ))?;

    let course_group = class(COURSE_GROUP)?;
    builder.register_getter(GetMethod::new(
        "services/groups/group",
        course_group,
        IdSpec::composite(["course_unit_id", "group_number"]),
        primary_course_group().into_fields().merged(secondary_course_group()),
    ))?;
    builder.register_getter(GetManyMethod::new(
        "services/groups/groups",
        course_group,
        IdListSpec::CompositeTuple("group_ids".to_string()),
        primary_course_group().into_fields(),
    ))?;

    let room = class(ROOM)?;
    builder.register_getter(GetMethod::new("services/geo/room", room, IdSpec::elementary("room_id"), primary_room().into_fields()))?;
    builder.register_getter(GetManyMethod::new("services/geo/rooms", room, elementary_ids("room_ids"), primary_room().into_fields()))?;

    let building = class(BUILDING)?;
    builder.register_getter(GetMethod::new(
        "services/geo/building2",
        building,
        IdSpec::elementary("building_id"),
        primary_building().into_fields(),
    ))?;
    builder.register_getter(GetManyMethod::new(
        "services/geo/buildings2",
        building,
        elementary_ids("building_ids"),
        primary_building().into_fields(),
    ))?;

    let thesis = class(THESIS)?;
    builder.register_getter(GetMethod::new("services/theses/thesis", thesis, IdSpec::elementary("ths_id"), primary_thesis().into_fields()))?;
    builder.register_getter(GetManyMethod::new(
        "services/theses/theses",
        thesis,
        elementary_ids("ths_ids"),
        primary_thesis().into_fields(),
    ))?;

    let authored_theses = || FieldPickers::new().with("authored_theses", primary_thesis().make_list_picker("authored_theses"));
    builder.register_getter(GetMethod::new("services/theses/user", user, IdSpec::elementary("user_id"), authored_theses()))?;
    builder.register_getter(GetManyMethod::new("services/theses/users", user, elementary_ids("user_ids"), authored_theses()))?;

    builder.register_search(SearchMethod::new("services/users/search2", user, primary_user().make_picker("user")))?;
    builder.register_search(SearchMethod::new("services/theses/search", thesis, primary_thesis().make_picker("thesis")))?;
    builder.register_search(
        SearchMethod::new("services/fac/search", faculty, primary_faculty().make_inline_picker()).fields_mode(SearchFieldsMode::Partial),
    )?;
    builder.register_search(
        SearchMethod::new("services/courses/search", course, Picker::entity_id("course_id"))
            .fields_mode(SearchFieldsMode::None)
            .query_param("name"),
    )?;

    for (domain, active) in [("student", "true"), ("student_all", "false")] {
        builder.register_list(
            ListMethod::new(domain, "services/groups/participant", course_group, primary_course_group(), ListStep::path(["groups", "*", "*"]))
                .extra_param("active_terms", active),
        )?;
    }

    for (domain, active) in [("user", "true"), ("user_all", "false")] {
        builder.register_list(
            ListMethod::new(
                domain,
                "services/courses/user",
                course_edition,
                primary_course_edition(),
                ListStep::path(["course_editions", "*", "*"]),
            )
            .extra_param("active_terms_only", active)
            .fields_wrapper("course_editions[{}]"),
        )?;
    }

    for (domain, active) in [("student", "true"), ("student_all", "false")] {
        builder.register_list(
            ListMethod::new(domain, "services/progs/student", programme, primary_programme(), ListStep::path(["*", "programme"]))
                .extra_param("active_only", active)
                .fields_wrapper("programme[{}]"),
        )?;
    }

    let node = class(COURSE_TEST_NODE)?;
    builder.register_getter(
        GetMethod::new(
            "services/crstests/node",
            node,
            IdSpec::elementary("node_id"),
            primary_course_test_node().into_fields().merged(secondary_course_test_node()),
        )
        .extra_param("recursive", "false"),
    )?;
    builder.register_getter(
        GetManyMethod::listed("services/crstests/user_points", node, elementary_ids("node_ids"), user_points())
            .without_fields_param(),
    )?;
    builder.register_getter(
        GetManyMethod::listed("services/crstests/user_grades", node, elementary_ids("node_ids"), user_grades())
            .without_fields_param(),
    )?;
    // The nested fields of a whole tree cannot be expressed as a selector; ask for a fixed set.
    builder.register_getter(
        GetMethod::new(
            "services/crstests/node",
            node,
            IdSpec::elementary("node_id"),
            primary_course_test_node()
                .into_fields()
                .with("subnodes", primary_course_test_node().make_list_picker("subnodes")),
        )
        .without_fields_param()
        .extra_param("recursive", "true")
        .extra_param("fields", RECURSIVE_NODE_FIELDS),
    )?;
    builder.register_list(
        ListMethod::new(
            "student_all",
            "services/crstests/participant",
            node,
            primary_course_test_root_node(),
            ListStep::path(["tests", "*", "*"]),
        )
        .without_fields_param(),
    )?;

    builder.register_getter(GetMethod::new(
        "services/grades/grade_type",
        class(GRADE_TYPE)?,
        IdSpec::elementary("grade_type_id"),
        primary_grade_type().into_fields(),
    ))?;

    builder.register_getter(GetMethod::new(
        "services/examrep/exam_session",
        class(EXAM_SESSION)?,
        IdSpec::composite(["exam_id", "number"]),
        primary_exam_session().into_fields(),
    ))?;
    builder.register_getter(GetMethod::new(
        "services/grades/grade",
        class(EXAM_GRADE)?,
        IdSpec::composite(["exam_id", "exam_session_number"]),
        primary_exam_grade().into_fields().merged(secondary_exam_grade()),
    ))?;

    let exam = class(EXAM)?;
    builder.register_getter(GetMethod::new(
        "services/grades/exam",
        exam,
        IdSpec::elementary("exam_id"),
        FieldPickers::new().with("exam_grades", primary_exam_grade().make_inline_list_picker()),
    ))?;
    builder.register_getter(GetMethod::new(
        "services/examrep/exam",
        exam,
        IdSpec::elementary("id"),
        primary_exam().into_fields().merged(secondary_exam()),
    ))?;

    builder.register_list(ListMethod::new("user", "services/cards/user", class(CARD)?, card(), ListStep::path(["*"])).without_fields_param())?;
    builder.register_list(
        ListMethod::new("public", "services/apisrv/installations", class(INSTALLATION)?, installation(), ListStep::path(["*"]))
            .without_fields_param(),
    )?;

    builder.register_server_time("services/apisrv/now");

    debug!("registered USOS API methods");
    Ok(())
}

//! Entity classes of the USOS API.

use tal_types::{DataType, EntityClassDecl, FieldDecl, Schema, SchemaError};

pub const INSTALLATION: &str = "Installation";
pub const CARD: &str = "Card";
pub const BUILDING: &str = "Building";
pub const PROGRAMME: &str = "Programme";
pub const ROOM: &str = "Room";
pub const USER: &str = "User";
pub const GRADE: &str = "Grade";
pub const GRADE_TYPE: &str = "GradeType";
pub const EXAM: &str = "Exam";
pub const EXAM_SESSION: &str = "ExamSession";
pub const EXAM_GRADE: &str = "ExamGrade";
pub const TERM: &str = "Term";
pub const FACULTY: &str = "Faculty";
pub const THESIS: &str = "Thesis";
pub const COURSE: &str = "Course";
pub const COURSE_TEST_ALGORITHM: &str = "CourseTestAlgorithm";
pub const COURSE_TEST_POINTS: &str = "CourseTestPoints";
pub const COURSE_TEST_GRADE: &str = "CourseTestGrade";
pub const COURSE_TEST_NODE: &str = "CourseTestNode";
pub const COURSE_EDITION: &str = "CourseEdition";
pub const CLASS_TYPE: &str = "ClassType";
pub const COURSE_UNIT: &str = "CourseUnit";
pub const COURSE_GROUP: &str = "CourseGroup";

fn string(name: &str) -> FieldDecl {
    FieldDecl::scalar(name, DataType::String)
}

fn optional_url(name: &str) -> FieldDecl {
    FieldDecl::scalar(name, DataType::optional(DataType::Url))
}

/// Builds the schema of every class the catalog serves.
pub fn schema() -> Result<Schema, SchemaError> {
    Schema::builder()
        .class(
            EntityClassDecl::new(INSTALLATION)
                .field(string("name").default())
                .field(FieldDecl::scalar("base_url", DataType::Url))
                .field(string("version"))
                .field(FieldDecl::scalar("contact_emails", DataType::list(DataType::Email))),
        )
        .class(
            EntityClassDecl::new(CARD)
                .field(string("barcode_number").default())
                .field(string("contact_chip_uid"))
                .field(string("contactless_chip_uid"))
                .field(FieldDecl::scalar("type", DataType::enumeration(["student", "phd", "staff"])))
                .field(FieldDecl::scalar("expiration_date", DataType::Date)),
        )
        .class(
            EntityClassDecl::new(BUILDING)
                .field(string("name").default())
                .field(FieldDecl::scalar("location", DataType::optional(DataType::Coords))),
        )
        .class(
            EntityClassDecl::new(PROGRAMME)
                .field(string("name").default())
                .field(string("mode_of_studies"))
                .field(string("level_of_studies"))
                .field(string("duration"))
                .field(string("professional_status")),
        )
        .class(
            EntityClassDecl::new(ROOM)
                .field(string("number").default())
                .field(FieldDecl::entity("building", BUILDING).default())
                .field(FieldDecl::scalar("capacity", DataType::optional(DataType::Int))),
        )
        .class(
            EntityClassDecl::new(USER)
                .searchable()
                .field(string("first_name").default())
                .field(string("last_name").default())
                .field(FieldDecl::scalar("sex", DataType::enumeration(["male", "female"])))
                .field(FieldDecl::scalar("profile_url", DataType::Url))
                .field(optional_url("homepage_url"))
                .field(FieldDecl::scalar("phone_numbers", DataType::list(DataType::PhoneNumber)))
                .field(FieldDecl::scalar("mobile_numbers", DataType::list(DataType::PhoneNumber)))
                .field(FieldDecl::optional_entity("room", ROOM))
                .field(FieldDecl::entity_list("authored_theses", THESIS)),
        )
        .class(
            EntityClassDecl::new(GRADE)
                .field(string("symbol").default())
                .field(string("name").default())
                .field(FieldDecl::entity("grade_type", GRADE_TYPE))
                .field(FieldDecl::scalar("passes", DataType::Bool))
                .field(FieldDecl::scalar("decimal_value", DataType::Decimal))
                .field(FieldDecl::scalar("order_key", DataType::Int)),
        )
        .class(
            EntityClassDecl::new(GRADE_TYPE)
                .field(string("name").default())
                .field(FieldDecl::entity_list("values", GRADE)),
        )
        .class(
            EntityClassDecl::new(EXAM)
                .field(string("name").default())
                .field(FieldDecl::entity_list("exam_grades", EXAM_GRADE))
                .field(FieldDecl::entity_list("sessions", EXAM_SESSION))
                .field(FieldDecl::entity("course_edition", COURSE_EDITION))
                .field(FieldDecl::scalar("editable", DataType::Bool))
                .field(FieldDecl::entity("grade_type", GRADE_TYPE)),
        )
        .class(
            EntityClassDecl::new(EXAM_SESSION)
                .field(string("name").default())
                .field(FieldDecl::scalar("number", DataType::Int))
                .field(string("status"))
                .field(FieldDecl::scalar("deadline", DataType::DateTime)),
        )
        .class(
            EntityClassDecl::new(EXAM_GRADE)
                .field(FieldDecl::entity("grade", GRADE).default())
                .field(FieldDecl::entity("exam_session", EXAM_SESSION))
                .field(string("comment"))
                .field(FieldDecl::entity("course_edition", COURSE_EDITION))
                .field(FieldDecl::scalar("modified_date", DataType::DateTime))
                .field(FieldDecl::entity("modified_by", USER)),
        )
        .class(
            EntityClassDecl::new(TERM)
                .field(string("name").default())
                .field(FieldDecl::scalar("order_key", DataType::Int))
                .field(FieldDecl::scalar("start_date", DataType::Date))
                .field(FieldDecl::scalar("end_date", DataType::Date)),
        )
        .class(
            EntityClassDecl::new(FACULTY)
                .searchable()
                .field(string("name").default())
                .field(FieldDecl::scalar("profile_url", DataType::Url))
                .field(optional_url("homepage_url"))
                .field(FieldDecl::optional_entity("parent", FACULTY)),
        )
        .class(
            EntityClassDecl::new(THESIS)
                .searchable()
                .field(string("name").default())
                .field(FieldDecl::scalar(
                    "type",
                    DataType::open_enumeration(["doctoral", "master", "licentiate", "engineer"]),
                ))
                .field(FieldDecl::entity_list("authors", USER))
                .field(FieldDecl::entity_list("supervisors", USER))
                .field(FieldDecl::entity("faculty", FACULTY)),
        )
        .class(
            EntityClassDecl::new(COURSE)
                .searchable()
                .field(string("name").default())
                .field(FieldDecl::scalar("profile_url", DataType::Url))
                .field(optional_url("homepage_url"))
                .field(FieldDecl::scalar("currently_conducted", DataType::Bool))
                .field(FieldDecl::entity("faculty", FACULTY))
                .field(string("description"))
                .field(string("bibliography"))
                .field(string("learning_outcomes"))
                .field(string("assessment_criteria"))
                .field(string("practical_placement")),
        )
        .class(
            EntityClassDecl::new(COURSE_TEST_ALGORITHM)
                .field(FieldDecl::entity_map("dependencies", COURSE_TEST_NODE).variant())
                .field(string("variables").variant())
                .field(string("source").variant())
                .field(string("description").variant()),
        )
        .class(
            EntityClassDecl::new(COURSE_TEST_POINTS)
                .field(FieldDecl::scalar("points", DataType::optional(DataType::Decimal)).default())
                .field(string("comment"))
                .field(FieldDecl::scalar("last_modified", DataType::optional(DataType::DateTime)))
                .field(FieldDecl::entity("grader", USER)),
        )
        .class(
            EntityClassDecl::new(COURSE_TEST_GRADE)
                .field(FieldDecl::entity("grade", GRADE))
                .field(string("comment"))
                .field(FieldDecl::scalar("last_modified", DataType::optional(DataType::DateTime)))
                .field(FieldDecl::entity("grader", USER)),
        )
        .class(
            EntityClassDecl::new(COURSE_TEST_NODE)
                .field(string("name").default())
                .field(FieldDecl::entity_list("subnodes", COURSE_TEST_NODE))
                .field(FieldDecl::scalar("type", DataType::enumeration(["root", "folder", "task", "grade"])))
                .field(FieldDecl::scalar("order_key", DataType::Int))
                .field(FieldDecl::optional_entity("parent", COURSE_TEST_NODE))
                .field(string("description").variant())
                .field(FieldDecl::optional_entity("course_edition", COURSE_EDITION).variant())
                .field(FieldDecl::scalar("min_points", DataType::Decimal).variant())
                .field(FieldDecl::scalar("max_points", DataType::Decimal).variant())
                .field(FieldDecl::scalar("precision", DataType::Int).variant())
                .field(FieldDecl::optional_entity("test_points", COURSE_TEST_POINTS).variant())
                .field(FieldDecl::optional_entity("grade_type", GRADE_TYPE).variant())
                .field(FieldDecl::optional_entity("test_grade", COURSE_TEST_GRADE).variant())
                .field(FieldDecl::optional_entity("algorithm", COURSE_TEST_ALGORITHM).variant()),
        )
        .class(
            EntityClassDecl::new(COURSE_EDITION)
                .field(FieldDecl::entity("course", COURSE).default())
                .field(FieldDecl::entity("term", TERM).default())
                .field(FieldDecl::scalar("profile_url", DataType::Url))
                .field(optional_url("homepage_url"))
                .field(FieldDecl::entity_list("coordinators", USER))
                .field(FieldDecl::entity_list("lecturers", USER))
                .field(FieldDecl::entity_list("participants", USER))
                .field(string("description"))
                .field(string("bibliography"))
                .field(string("notes"))
                .field(FieldDecl::entity_list("course_units", COURSE_UNIT)),
        )
        .class(EntityClassDecl::new(CLASS_TYPE).field(string("name").default()))
        .class(
            EntityClassDecl::new(COURSE_UNIT)
                .field(FieldDecl::entity("course_edition", COURSE_EDITION).default())
                .field(FieldDecl::entity("class_type", CLASS_TYPE).default())
                .field(FieldDecl::scalar("profile_url", DataType::Url))
                .field(optional_url("homepage_url"))
                .field(string("learning_outcomes"))
                .field(string("assessment_criteria"))
                .field(string("topics"))
                .field(string("teaching_methods"))
                .field(string("bibliography"))
                .field(FieldDecl::entity_list("groups", COURSE_GROUP)),
        )
        .class(
            EntityClassDecl::new(COURSE_GROUP)
                .field(FieldDecl::entity("course_unit", COURSE_UNIT).default())
                .field(FieldDecl::scalar("group_number", DataType::Int).default())
                .field(FieldDecl::scalar("homepage_url", DataType::Url))
                .field(FieldDecl::entity_list("lecturers", USER))
                .field(FieldDecl::entity_list("participants", USER))
                .field(string("description"))
                .field(string("literature")),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use tal_types::stringify;

    use super::*;

    #[test]
    fn default_selectors_follow_entity_defaults() {
        let schema = schema().unwrap();
        let group = schema.class_id(COURSE_GROUP).unwrap();
        assert_eq!(
            stringify(schema.default_selector(group)),
            "course_unit[course_edition[course[name]|term[name]]|class_type[name]]|group_number"
        );
    }

    #[test]
    fn searchable_classes_get_search_items() {
        let schema = schema().unwrap();
        for name in [USER, FACULTY, THESIS, COURSE] {
            let class = schema.class_by_name(name).unwrap();
            let item = schema.class(class.search_item_class().unwrap());
            assert_eq!(item.name, format!("{name}SearchItem"));
        }
        let item = schema.class_by_name("CourseSearchItem").unwrap();
        assert_eq!(item.search_entity_field(), Some("course"));
        assert!(schema.class_by_name(TERM).unwrap().search_item_class().is_none());
    }
}

//! Change-set files compiled end to end.

use std::io::Write;

use graphmap_cli::changeset::ChangeSet;
use graphmap_context::MappingContext;
use graphmap_core::Value;
use graphmap_session::EntityGraphMapper;

fn write_change_set(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_change_set_file_compiles_to_one_statement() {
    let file = write_change_set(
        r#"{
            "schema": [
                {"name": "Person", "labels": ["Person"], "identity_field": "id"},
                {"name": "Rating", "kind": "relationship", "labels": ["RATED"],
                 "identity_field": "id"}
            ],
            "nodes": [
                {"key": "a", "type_name": "Person", "properties": {"name": "a"}},
                {"key": "b", "type_name": "Person", "properties": {"name": "b"}}
            ],
            "relationships": [
                {"start": "a", "type": "RATED", "end": "b",
                 "entity": {"type_name": "Rating", "properties": {"stars": 5}}}
            ]
        }"#,
    );

    let loaded = ChangeSet::from_path(file.path()).unwrap().load().unwrap();
    let context = MappingContext::new(loaded.schema);
    let compiled = EntityGraphMapper::new(&context, 0)
        .map(&loaded.graph)
        .unwrap();
    let statement = compiled.statement().unwrap();

    assert_eq!(
        statement.cypher,
        "CREATE (_0:`Person` $_0_props), (_1:`Person` $_1_props)\n\
         CREATE (_0)-[_2:`RATED` $_2_props]->(_1)\n\
         RETURN ID(_0) AS _0, ID(_1) AS _1, ID(_2) AS _2"
    );
    let rating = statement.parameters.get("_2_props").unwrap().as_map().unwrap();
    assert_eq!(rating.get("stars"), Some(&Value::from(5)));
}

#[test]
fn test_malformed_file_is_a_parse_error() {
    let file = write_change_set("{ not json");
    let err = ChangeSet::from_path(file.path()).unwrap_err();
    assert!(err.to_string().starts_with("Invalid change set"));
}

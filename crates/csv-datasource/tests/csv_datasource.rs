//! Reading, writing and managing tables of a CSV directory

use std::fs;
use std::path::Path;

use magma_core::{
    Attribute, AttributeAware, Category, Datasource, Locale, MagmaError, ValueTable,
    ValueType, Variable, VariableEntity,
};
use magma_csv_datasource::{CsvDatasource, CsvDatasourceConfig, CsvVariableStrategy};

fn datasource(dir: &Path) -> CsvDatasource {
    datasource_with(CsvDatasourceConfig::new(dir))
}

fn datasource_with(config: CsvDatasourceConfig) -> CsvDatasource {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let ds = CsvDatasource::new("files", config);
    ds.initialise().unwrap();
    ds
}

fn sex() -> Variable {
    Variable::builder("sex", ValueType::Text, "Participant")
        .add_attribute(Attribute::builder("label").locale("en").text("Sex").build().unwrap())
        .add_category(Category::builder("F").code("1").build().unwrap())
        .add_category(Category::builder("M").code("2").build().unwrap())
        .add_category(Category::builder("DK").missing(true).build().unwrap())
        .build()
        .unwrap()
}

fn weight() -> Variable {
    Variable::builder("weight", ValueType::Decimal, "Participant")
        .unit("kg")
        .index(1)
        .build()
        .unwrap()
}

fn visits() -> Variable {
    Variable::builder("visits", ValueType::Date, "Participant")
        .repeatable(true)
        .occurrence_group("Visit")
        .index(2)
        .build()
        .unwrap()
}

fn participant(id: &str) -> VariableEntity {
    VariableEntity::new("Participant", id).unwrap()
}

fn write_people(ds: &CsvDatasource) {
    let mut writer = ds.create_writer("people", "Participant").unwrap();
    {
        let mut variables = writer.write_variables().unwrap();
        for v in [sex(), weight(), visits()] {
            variables.write_variable(&v).unwrap();
        }
        variables.close().unwrap();
    }
    {
        let mut row = writer.write_value_set(participant("1")).unwrap();
        row.write_value(&sex(), ValueType::Text.value_of("F").unwrap()).unwrap();
        row.write_value(&weight(), ValueType::Decimal.parse("61.5").unwrap())
            .unwrap();
        row.write_value(
            &visits(),
            ValueType::Date.parse_sequence("2024-01-02,2024-06-30").unwrap(),
        )
        .unwrap();
        row.close().unwrap();
    }
    {
        let mut row = writer.write_value_set(participant("2")).unwrap();
        row.write_value(&sex(), ValueType::Text.value_of("DK").unwrap()).unwrap();
        row.close().unwrap();
    }
    writer.close().unwrap();
}

#[test]
fn test_writer_roundtrip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datasource(dir.path());
    write_people(&ds);

    assert!(dir.path().join("people.csv").is_file());
    assert!(dir.path().join("people.variables.csv").is_file());
    assert!(dir.path().join("people.categories.csv").is_file());

    // a fresh datasource over the same directory sees the same table
    let reopened = datasource(dir.path());
    assert_eq!(reopened.value_table_names().unwrap(), vec!["people"]);
    let table = reopened.value_table("people").unwrap();
    assert_eq!(table.variables().unwrap(), vec![sex(), weight(), visits()]);

    let vs = table.value_set(&participant("1")).unwrap();
    assert_eq!(
        table.value("weight", &vs).unwrap(),
        ValueType::Decimal.parse("61.5").unwrap()
    );
    assert_eq!(table.value("visits", &vs).unwrap().size(), 2);

    let vs = table.value_set(&participant("2")).unwrap();
    let sex_value = table.value("sex", &vs).unwrap();
    assert!(table.variable("sex").unwrap().is_missing_value(&sex_value));
    assert!(table.value("weight", &vs).unwrap().is_null());
    assert!(table.value("visits", &vs).unwrap().is_sequence());

    let en = Locale::parse("en").unwrap();
    assert_eq!(
        table
            .variable("sex")
            .unwrap()
            .attribute_text("label", Some(&en))
            .as_deref(),
        Some("Sex")
    );
}

#[test]
fn test_column_strategy_with_typed_columns() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("visits.csv"),
        "site;num;score;comment\nA;1;12;first\nA;2;;\n",
    )
    .unwrap();
    let mut config = CsvDatasourceConfig::new(dir.path());
    config.delimiter = ';';
    config.entity_type = "Visit".to_string();
    config.id_columns = vec!["site".to_string(), "num".to_string()];
    config.column_types.insert("score".to_string(), ValueType::Integer);
    let ds = datasource_with(config);

    let table = ds.csv_table("visits").unwrap();
    assert_eq!(table.strategy(), CsvVariableStrategy::Columns);
    assert_eq!(table.entity_type(), "Visit");

    let entity = VariableEntity::from_components("Visit", ["A", "1"]).unwrap();
    let vs = table.value_set(&entity).unwrap();
    assert_eq!(table.value("score", &vs).unwrap(), ValueType::Integer.value_of(12).unwrap());
    assert_eq!(table.value("comment", &vs).unwrap(), ValueType::Text.value_of("first").unwrap());

    let entity = VariableEntity::from_components("Visit", ["A", "2"]).unwrap();
    let vs = table.value_set(&entity).unwrap();
    assert!(table.value("score", &vs).unwrap().is_null());
}

#[test]
fn test_writing_values_keeps_column_strategy() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("people.csv"), "id,name\n1,Ada\n").unwrap();
    let ds = datasource(dir.path());
    let name = ds.value_table("people").unwrap().variable("name").unwrap();

    let mut writer = ds.create_writer("people", "Participant").unwrap();
    {
        let mut row = writer.write_value_set(participant("2")).unwrap();
        row.write_value(&name, ValueType::Text.value_of("Grace").unwrap()).unwrap();
        row.close().unwrap();
    }
    writer.close().unwrap();

    assert!(!dir.path().join("people.variables.csv").exists());
    assert_eq!(
        fs::read_to_string(dir.path().join("people.csv")).unwrap(),
        "id,name\n1,Ada\n2,Grace\n"
    );
    let table = ds.csv_table("people").unwrap();
    assert_eq!(table.strategy(), CsvVariableStrategy::Columns);
    assert_eq!(table.variable_entities().unwrap().len(), 2);
}

#[test]
fn test_changes_visible_at_session_close() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datasource(dir.path());
    write_people(&ds);
    let table = ds.value_table("people").unwrap();

    let mut writer = ds.create_writer("people", "Participant").unwrap();
    {
        let mut row = writer.write_value_set(participant("3")).unwrap();
        row.write_value(&sex(), ValueType::Text.value_of("M").unwrap()).unwrap();
        row.close().unwrap();
    }
    assert!(!table.has_value_set(&participant("3")).unwrap());
    writer.close().unwrap();
    assert!(table.has_value_set(&participant("3")).unwrap());
}

#[test]
fn test_failed_row_is_not_written() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datasource(dir.path());
    write_people(&ds);

    let mut writer = ds.create_writer("people", "Participant").unwrap();
    {
        let mut row = writer.write_value_set(participant("3")).unwrap();
        row.write_value(&sex(), ValueType::Text.value_of("M").unwrap()).unwrap();
        assert!(row.write_value(&weight(), ValueType::Text.value_of("heavy").unwrap()).is_err());
        assert!(matches!(
            row.close(),
            Err(MagmaError::WriteRolledBack { .. })
        ));
    }
    {
        let mut row = writer.write_value_set(participant("4")).unwrap();
        row.write_value(&sex(), ValueType::Text.value_of("F").unwrap()).unwrap();
        row.close().unwrap();
    }
    match writer.close() {
        Err(MagmaError::PartialWrite { failed, .. }) => assert_eq!(failed, 1),
        other => panic!("unexpected {other:?}"),
    }

    let table = ds.value_table("people").unwrap();
    assert!(!table.has_value_set(&participant("3")).unwrap());
    assert!(table.has_value_set(&participant("4")).unwrap());
}

#[test]
fn test_value_shape_follows_stored_variable() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datasource(dir.path());
    write_people(&ds);
    let weights = weight()
        .to_builder()
        .repeatable(true)
        .occurrence_group("Visit")
        .build()
        .unwrap();

    let mut writer = ds.create_writer("people", "Participant").unwrap();
    {
        let mut row = writer.write_value_set(participant("1")).unwrap();
        let values = ValueType::Decimal.parse_sequence("60,62.5").unwrap();
        assert!(matches!(
            row.write_value(&weights, values),
            Err(MagmaError::ValueConversion { .. })
        ));
        assert!(row.close().is_err());
    }
    assert!(matches!(
        writer.close(),
        Err(MagmaError::PartialWrite { failed: 1, .. })
    ));

    let table = ds.value_table("people").unwrap();
    let vs = table.value_set(&participant("1")).unwrap();
    let stored = table.value("weight", &vs).unwrap();
    assert!(!stored.is_sequence());
    assert_eq!(stored, ValueType::Decimal.parse("61.5").unwrap());
}

#[test]
fn test_empty_text_reads_back_as_null() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("people.csv"), "id,name\n1,Ada\n").unwrap();
    let ds = datasource(dir.path());
    let name = ds.value_table("people").unwrap().variable("name").unwrap();

    let mut writer = ds.create_writer("people", "Participant").unwrap();
    {
        let mut row = writer.write_value_set(participant("1")).unwrap();
        row.write_value(&name, ValueType::Text.value_of("").unwrap()).unwrap();
        row.close().unwrap();
    }
    writer.close().unwrap();

    assert_eq!(
        fs::read_to_string(dir.path().join("people.csv")).unwrap(),
        "id,name\n1,\n"
    );
    let table = ds.value_table("people").unwrap();
    let vs = table.value_set(&participant("1")).unwrap();
    assert!(table.value("name", &vs).unwrap().is_null());
}

#[test]
fn test_concurrent_first_writers_share_new_table() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datasource(dir.path());
    let attempts = 6;
    let created = std::sync::Barrier::new(attempts);
    let opened = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..attempts)
            .map(|_| {
                scope.spawn(|| {
                    let writer = ds.create_writer("fresh", "Participant");
                    created.wait();
                    writer.is_ok()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Vec<_>>()
    });
    assert_eq!(opened.iter().filter(|ok| **ok).count(), 1);
}

#[test]
fn test_new_table_appears_after_commit() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datasource(dir.path());

    let writer = ds.create_writer("people", "Participant").unwrap();
    assert!(!ds.has_value_table("people").unwrap());
    drop(writer);
    assert!(!ds.has_value_table("people").unwrap());
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());

    write_people(&ds);
    assert!(ds.has_value_table("people").unwrap());
}

#[test]
fn test_one_writer_per_table() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datasource(dir.path());
    write_people(&ds);

    let first = ds.create_writer("people", "Participant").unwrap();
    assert!(matches!(
        ds.create_writer("people", "Participant"),
        Err(MagmaError::TableLocked { .. })
    ));
    drop(first);
    ds.create_writer("people", "Participant").unwrap();
}

#[test]
fn test_composite_identifier_must_match_id_columns() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = CsvDatasourceConfig::new(dir.path());
    config.id_columns = vec!["site".to_string(), "num".to_string()];
    let ds = datasource_with(config);

    let mut writer = ds.create_writer("people", "Participant").unwrap();
    assert!(matches!(
        writer.write_value_set(participant("A")),
        Err(MagmaError::InvalidArgument(_))
    ));
    {
        let mut variables = writer.write_variables().unwrap();
        variables.write_variable(&sex()).unwrap();
        variables.close().unwrap();
    }
    {
        let entity = VariableEntity::from_components("Participant", ["A", "7"]).unwrap();
        let mut row = writer.write_value_set(entity).unwrap();
        row.write_value(&sex(), ValueType::Text.value_of("F").unwrap()).unwrap();
        row.close().unwrap();
    }
    writer.close().unwrap();

    let data = fs::read_to_string(dir.path().join("people.csv")).unwrap();
    assert_eq!(data, "site,num,sex\nA,7,F\n");
}

#[test]
fn test_remove_variable_rewrites_files() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datasource(dir.path());
    write_people(&ds);

    let mut writer = ds.create_writer("people", "Participant").unwrap();
    {
        let mut variables = writer.write_variables().unwrap();
        variables.remove_variable("sex").unwrap();
        variables.close().unwrap();
    }
    writer.close().unwrap();

    let table = ds.value_table("people").unwrap();
    assert!(!table.has_variable("sex").unwrap());
    assert!(!dir.path().join("people.categories.csv").exists());
    let data = fs::read_to_string(dir.path().join("people.csv")).unwrap();
    assert!(data.starts_with("id,weight,visits\n"));
}

#[test]
fn test_invalid_files_raise_parsing_errors() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("dup.csv"), "id,name\n1,a\n1,b\n").unwrap();
    let ds = datasource(dir.path());
    match ds.value_table("dup") {
        Err(MagmaError::DatasourceParsing(e)) => {
            assert_eq!(e.code, "CsvDuplicateIdentifier");
            assert_eq!(e.parameters, vec!["dup.csv", "3"]);
        }
        other => panic!("unexpected {:?}", other.err()),
    }
    assert!(matches!(
        ds.value_table("missing"),
        Err(MagmaError::NoSuchValueTable { .. })
    ));
}

#[test]
fn test_drop_and_rename_move_files() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datasource(dir.path());
    write_people(&ds);

    ds.rename_table("people", "cohort").unwrap();
    assert_eq!(ds.value_table_names().unwrap(), vec!["cohort"]);
    assert!(dir.path().join("cohort.variables.csv").is_file());
    assert!(!dir.path().join("people.csv").exists());
    let table = ds.value_table("cohort").unwrap();
    assert_eq!(table.name(), "cohort");
    assert!(table.has_value_set(&participant("1")).unwrap());

    let writer = ds.create_writer("cohort", "Participant").unwrap();
    assert!(matches!(
        ds.drop_table("cohort"),
        Err(MagmaError::TableLocked { .. })
    ));
    drop(writer);

    ds.drop_table("cohort").unwrap();
    assert!(ds.value_table_names().unwrap().is_empty());
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn test_timestamps_follow_data_file() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datasource(dir.path());
    write_people(&ds);
    let table = ds.value_table("people").unwrap();
    let timestamps = table.timestamps();
    assert!(timestamps.created().is_null());
    assert_eq!(timestamps.last_update().value_type(), ValueType::DateTime);
    assert!(!timestamps.last_update().is_null());
}

#[test]
fn test_dispose() {
    let dir = tempfile::tempdir().unwrap();
    let ds = datasource(dir.path());
    write_people(&ds);
    let table = ds.value_table("people").unwrap();
    ds.dispose().unwrap();
    assert!(ds.value_table_names().is_err());
    assert!(table.variables().is_err());
}

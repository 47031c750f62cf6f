//! Bootstrap from a configuration file and copy tables between backends

use std::fs;

use magma::{Magma, MagmaConfig, TableCopier};
use magma_core::{Datasource, ValueTable, ValueType, Variable, VariableEntity};

fn bootstrap(dir: &std::path::Path) -> Magma {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let path = dir.join("magma.yaml");
    fs::write(
        &path,
        r#"
datasource:
  - name: study
    type: csv
    directory: study
    column_types:
      age: integer
  - name: archive
    type: csv
    directory: archive
  - name: scratch
    type: memory
"#,
    )
    .unwrap();
    let config = MagmaConfig::from_file(&path).unwrap();
    Magma::from_config(&config).unwrap()
}

fn participant(id: &str) -> VariableEntity {
    VariableEntity::new("Participant", id).unwrap()
}

#[test]
fn test_csv_to_memory_copy() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("study")).unwrap();
    fs::write(
        dir.path().join("study/people.csv"),
        "id,name,age\n1,Ada,36\n2,Grace,\n",
    )
    .unwrap();
    let magma = bootstrap(dir.path());

    let study = magma.datasource("study").unwrap();
    let scratch = magma.datasource("scratch").unwrap();
    let people = study.value_table("people").unwrap();
    let report = TableCopier::new(people.as_ref(), scratch.as_ref())
        .copy()
        .unwrap();
    assert_eq!(report.value_sets, 2);
    assert_eq!(report.values, 3);

    let copied = scratch.value_table("people").unwrap();
    let age = copied.variable("age").unwrap();
    assert_eq!(age.value_type(), ValueType::Integer);
    let vs = copied.value_set(&participant("1")).unwrap();
    assert_eq!(copied.value("age", &vs).unwrap(), ValueType::Integer.value_of(36).unwrap());

    magma.shutdown().unwrap();
}

#[test]
fn test_memory_to_csv_copy_under_new_name() {
    let dir = tempfile::tempdir().unwrap();
    let magma = bootstrap(dir.path());
    let scratch = magma.datasource("scratch").unwrap();

    let score = Variable::builder("score", ValueType::Decimal, "Participant")
        .unit("points")
        .build()
        .unwrap();
    let mut writer = scratch.create_writer("scores", "Participant").unwrap();
    {
        let mut variables = writer.write_variables().unwrap();
        variables.write_variable(&score).unwrap();
        variables.close().unwrap();
    }
    {
        let mut row = writer.write_value_set(participant("7")).unwrap();
        row.write_value(&score, ValueType::Decimal.parse("12.50").unwrap())
            .unwrap();
        row.close().unwrap();
    }
    writer.close().unwrap();

    let archive = magma.datasource("archive").unwrap();
    let source = scratch.value_table("scores").unwrap();
    TableCopier::new(source.as_ref(), archive.as_ref())
        .with_name("scores_2024")
        .copy()
        .unwrap();
    magma.shutdown().unwrap();

    // the files alone carry the copied table
    let magma = bootstrap(dir.path());
    let archive = magma.datasource("archive").unwrap();
    assert_eq!(archive.value_table_names().unwrap(), vec!["scores_2024"]);
    let table = archive.value_table("scores_2024").unwrap();
    assert_eq!(table.variable("score").unwrap(), score);
    let vs = table.value_set(&participant("7")).unwrap();
    assert_eq!(
        table.value("score", &vs).unwrap(),
        ValueType::Decimal.parse("12.50").unwrap()
    );
    magma.shutdown().unwrap();
}

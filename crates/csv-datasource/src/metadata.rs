//! Variables and categories sheets.
//!
//! Variables sheet columns: `name` (required), `valueType`, `entityType`,
//! `repeatable`, `occurrenceGroup`, `mimeType`, `unit`, `index`,
//! `referencedEntityType`; any other column is an attribute header.
//!
//! Categories sheet columns: `variable`, `name` (required), `code`,
//! `missing`; any other column is an attribute header.

use std::collections::BTreeMap;
use std::path::Path;

use magma_core::{
    AttributeAware, Category, DatasourceParsingError, MagmaError, Result, ValueType, Variable,
};
use magma_csv_types::AttributeHeader;

use crate::files::file_name;

const VARIABLE_COLUMNS: [&str; 9] = [
    "name",
    "valueType",
    "entityType",
    "repeatable",
    "occurrenceGroup",
    "mimeType",
    "unit",
    "index",
    "referencedEntityType",
];

const CATEGORY_COLUMNS: [&str; 4] = ["variable", "name", "code", "missing"];

/// One parsed sheet: headers and records with their line numbers.
pub(crate) struct Sheet {
    pub file: String,
    pub headers: Vec<String>,
    pub records: Vec<(u64, csv::StringRecord)>,
}

impl Sheet {
    pub fn read(path: &Path, delimiter: u8) -> Result<Self> {
        let file = file_name(path);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .delimiter(delimiter)
            .from_path(path)
            .map_err(|e| MagmaError::runtime_with(format!("Cannot open {file}"), e))?;
        let headers = reader
            .headers()
            .map_err(|e| MagmaError::runtime_with(format!("Cannot read headers of {file}"), e))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();
        let mut records = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record =
                record.map_err(|e| MagmaError::runtime_with(format!("Cannot read {file}"), e))?;
            let line = record.position().map_or(i as u64 + 2, |p| p.line());
            records.push((line, record));
        }
        Ok(Self {
            file,
            headers,
            records,
        })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn require(&self, name: &str) -> Result<usize> {
        self.column(name).ok_or_else(|| {
            DatasourceParsingError::new(
                format!("Column '{name}' is missing"),
                "CsvMissingColumn",
            )
            .with_parameters([self.file.clone(), name.to_string()])
            .into()
        })
    }

    pub fn invalid(&self, line: u64, reason: impl std::fmt::Display) -> MagmaError {
        DatasourceParsingError::new(format!("Invalid metadata: {reason}"), "CsvInvalidVariable")
            .with_parameters([self.file.clone(), line.to_string()])
            .into()
    }

    /// Attribute headers, by column position.
    fn attribute_columns(&self, reserved: &[&str]) -> Result<Vec<(usize, AttributeHeader)>> {
        let mut columns = Vec::new();
        for (i, header) in self.headers.iter().enumerate() {
            if header.is_empty() || reserved.contains(&header.as_str()) {
                continue;
            }
            let parsed = AttributeHeader::parse(header).map_err(|e| self.invalid(1, e))?;
            columns.push((i, parsed));
        }
        Ok(columns)
    }
}

pub(crate) fn cell<'r>(record: &'r csv::StringRecord, column: Option<usize>) -> &'r str {
    column.and_then(|i| record.get(i)).unwrap_or("").trim()
}

fn flag(sheet: &Sheet, line: u64, text: &str) -> Result<bool> {
    if text.is_empty() {
        return Ok(false);
    }
    ValueType::Boolean
        .parse(text)
        .ok()
        .and_then(|v| v.as_bool())
        .ok_or_else(|| sheet.invalid(line, format!("'{text}' is not a boolean")))
}

/// Entity type declared by the first row of a variables sheet.
pub(crate) fn sheet_entity_type(path: &Path, delimiter: u8) -> Result<Option<String>> {
    let sheet = Sheet::read(path, delimiter)?;
    let column = sheet.column("entityType");
    Ok(sheet
        .records
        .first()
        .map(|(_, record)| cell(record, column))
        .filter(|t| !t.is_empty())
        .map(str::to_string))
}

/// Parse the categories sheet, grouped by variable name.
pub(crate) fn read_categories(path: &Path, delimiter: u8) -> Result<BTreeMap<String, Vec<Category>>> {
    let sheet = Sheet::read(path, delimiter)?;
    let variable_col = sheet.require("variable")?;
    let name_col = sheet.require("name")?;
    let code_col = sheet.column("code");
    let missing_col = sheet.column("missing");
    let attributes = sheet.attribute_columns(&CATEGORY_COLUMNS)?;

    let mut categories: BTreeMap<String, Vec<Category>> = BTreeMap::new();
    for (line, record) in &sheet.records {
        let variable = cell(record, Some(variable_col));
        if variable.is_empty() {
            return Err(sheet.invalid(*line, "category without variable"));
        }
        let mut builder = Category::builder(cell(record, Some(name_col)))
            .missing(flag(&sheet, *line, cell(record, missing_col))?);
        let code = cell(record, code_col);
        if !code.is_empty() {
            builder = builder.code(code);
        }
        for (i, header) in &attributes {
            if let Some(attribute) = header.to_attribute(cell(record, Some(*i)))? {
                builder = builder.add_attribute(attribute);
            }
        }
        let category = builder.build().map_err(|e| sheet.invalid(*line, e))?;
        categories.entry(variable.to_string()).or_default().push(category);
    }
    Ok(categories)
}

/// Parse the variables sheet of a table of `entity_type`.
pub(crate) fn read_variables(
    path: &Path,
    delimiter: u8,
    entity_type: &str,
    mut categories: BTreeMap<String, Vec<Category>>,
) -> Result<Vec<Variable>> {
    let sheet = Sheet::read(path, delimiter)?;
    let name_col = sheet.require("name")?;
    let col = |name: &str| sheet.column(name);
    let (type_col, entity_col, repeatable_col) =
        (col("valueType"), col("entityType"), col("repeatable"));
    let (group_col, mime_col, unit_col) = (col("occurrenceGroup"), col("mimeType"), col("unit"));
    let (index_col, referenced_col) = (col("index"), col("referencedEntityType"));
    let attributes = sheet.attribute_columns(&VARIABLE_COLUMNS)?;

    let mut variables = Vec::with_capacity(sheet.records.len());
    for (position, (line, record)) in sheet.records.iter().enumerate() {
        let name = cell(record, Some(name_col));
        let value_type = match cell(record, type_col) {
            "" => ValueType::Text,
            t => ValueType::for_name(t).map_err(|e| sheet.invalid(*line, e))?,
        };
        let variable_entity_type = match cell(record, entity_col) {
            "" => entity_type,
            t => t,
        };
        if variable_entity_type != entity_type {
            return Err(sheet.invalid(
                *line,
                format!("variable '{name}' is of entity type {variable_entity_type}, table holds {entity_type}"),
            ));
        }
        let index = match cell(record, index_col) {
            "" => position as u32,
            i => i
                .parse::<u32>()
                .map_err(|_| sheet.invalid(*line, format!("'{i}' is not an index")))?,
        };

        let mut builder = Variable::builder(name, value_type, entity_type)
            .repeatable(flag(&sheet, *line, cell(record, repeatable_col))?)
            .index(index);
        for (column, set) in [
            (group_col, VariableField::OccurrenceGroup),
            (mime_col, VariableField::MimeType),
            (unit_col, VariableField::Unit),
            (referenced_col, VariableField::ReferencedEntityType),
        ] {
            let text = cell(record, column);
            if !text.is_empty() {
                builder = set.apply(builder, text);
            }
        }
        for (i, header) in &attributes {
            if let Some(attribute) = header.to_attribute(cell(record, Some(*i)))? {
                builder = builder.add_attribute(attribute);
            }
        }
        if let Some(categories) = categories.remove(name) {
            builder = builder.add_categories(categories);
        }
        variables.push(builder.build().map_err(|e| sheet.invalid(*line, e))?);
    }
    if let Some(orphan) = categories.keys().next() {
        return Err(DatasourceParsingError::new(
            format!("Categories reference unknown variable '{orphan}'"),
            "CsvUnknownVariable",
        )
        .with_parameters([sheet.file.clone(), orphan.clone()])
        .into());
    }
    Ok(variables)
}

#[derive(Clone, Copy)]
enum VariableField {
    OccurrenceGroup,
    MimeType,
    Unit,
    ReferencedEntityType,
}

impl VariableField {
    fn apply(self, builder: magma_core::VariableBuilder, text: &str) -> magma_core::VariableBuilder {
        match self {
            VariableField::OccurrenceGroup => builder.occurrence_group(text),
            VariableField::MimeType => builder.mime_type(text),
            VariableField::Unit => builder.unit(text),
            VariableField::ReferencedEntityType => builder.referenced_entity_type(text),
        }
    }
}

/// Attribute headers used by `owners`, in first-seen order.
fn attribute_headers<'a, T: AttributeAware + 'a>(
    owners: impl IntoIterator<Item = &'a T>,
) -> Vec<AttributeHeader> {
    let mut headers: Vec<AttributeHeader> = Vec::new();
    for owner in owners {
        for attribute in owner.attributes() {
            let header = AttributeHeader::of(attribute);
            if !headers.contains(&header) {
                headers.push(header);
            }
        }
    }
    headers
}

fn attribute_cell<T: AttributeAware>(owner: &T, header: &AttributeHeader) -> String {
    owner
        .attributes()
        .iter()
        .find(|a| AttributeHeader::of(a) == *header)
        .and_then(|a| a.value().to_literal())
        .unwrap_or_default()
}

fn opt(text: Option<&str>) -> String {
    text.unwrap_or_default().to_string()
}

fn to_bytes(writer: csv::Writer<Vec<u8>>) -> Result<Vec<u8>> {
    writer
        .into_inner()
        .map_err(|e| MagmaError::runtime(format!("Cannot flush CSV buffer: {e}")))
}

fn csv_error(e: csv::Error) -> MagmaError {
    MagmaError::runtime_with("Cannot write CSV record", e)
}

/// Render the variables sheet.
pub(crate) fn write_variables(variables: &[Variable], delimiter: u8) -> Result<Vec<u8>> {
    let headers = attribute_headers(variables);
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    let mut header_row: Vec<String> = VARIABLE_COLUMNS.iter().map(|c| c.to_string()).collect();
    header_row.extend(headers.iter().map(ToString::to_string));
    writer.write_record(&header_row).map_err(csv_error)?;

    for v in variables {
        let mut row = vec![
            v.name().to_string(),
            v.value_type().name().to_string(),
            v.entity_type().to_string(),
            v.is_repeatable().to_string(),
            opt(v.occurrence_group()),
            opt(v.mime_type()),
            opt(v.unit()),
            v.index().to_string(),
            opt(v.referenced_entity_type()),
        ];
        row.extend(headers.iter().map(|h| attribute_cell(v, h)));
        writer.write_record(&row).map_err(csv_error)?;
    }
    to_bytes(writer)
}

/// Render the categories sheet; `None` when no variable has categories.
pub(crate) fn write_categories(variables: &[Variable], delimiter: u8) -> Result<Option<Vec<u8>>> {
    if !variables.iter().any(Variable::has_categories) {
        return Ok(None);
    }
    let headers = attribute_headers(variables.iter().flat_map(|v| v.categories()));
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    let mut header_row: Vec<String> = CATEGORY_COLUMNS.iter().map(|c| c.to_string()).collect();
    header_row.extend(headers.iter().map(ToString::to_string));
    writer.write_record(&header_row).map_err(csv_error)?;

    for v in variables {
        for c in v.categories() {
            let mut row = vec![
                v.name().to_string(),
                c.name().to_string(),
                opt(c.code()),
                c.is_missing().to_string(),
            ];
            row.extend(headers.iter().map(|h| attribute_cell(c, h)));
            writer.write_record(&row).map_err(csv_error)?;
        }
    }
    to_bytes(writer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use magma_core::{Attribute, Locale};
    use std::fs;

    fn sex() -> Variable {
        Variable::builder("sex", ValueType::Text, "Participant")
            .index(1)
            .add_attribute(Attribute::builder("label").locale("en").text("Sex").build().unwrap())
            .add_attribute(
                Attribute::builder("label")
                    .namespace("maelstrom")
                    .locale("fr")
                    .text("Sexe")
                    .build()
                    .unwrap(),
            )
            .add_category(Category::builder("M").code("1").build().unwrap())
            .add_category(
                Category::builder("DK")
                    .missing(true)
                    .add_attribute(Attribute::builder("label").locale("en").text("Don't know").build().unwrap())
                    .build()
                    .unwrap(),
            )
            .build()
            .unwrap()
    }

    fn visits() -> Variable {
        Variable::builder("visits", ValueType::Date, "Participant")
            .repeatable(true)
            .occurrence_group("Visit")
            .index(2)
            .unit("day")
            .build()
            .unwrap()
    }

    #[test]
    fn test_sheets_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let variables_path = dir.path().join("t.variables.csv");
        let categories_path = dir.path().join("t.categories.csv");
        let variables = vec![sex(), visits()];
        fs::write(&variables_path, write_variables(&variables, b',').unwrap()).unwrap();
        fs::write(
            &categories_path,
            write_categories(&variables, b',').unwrap().unwrap(),
        )
        .unwrap();

        let categories = read_categories(&categories_path, b',').unwrap();
        let read = read_variables(&variables_path, b',', "Participant", categories).unwrap();
        assert_eq!(read, variables);
        let en = Locale::parse("en").unwrap();
        assert_eq!(
            read[0].category("DK").unwrap().attribute_text("label", Some(&en)).as_deref(),
            Some("Don't know")
        );
    }

    #[test]
    fn test_minimal_sheet() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.variables.csv");
        fs::write(&path, "name,valueType,label:en\nage,integer,Age\nnote,,\n").unwrap();
        let read = read_variables(&path, b',', "Participant", BTreeMap::new()).unwrap();
        assert_eq!(read[0].value_type(), ValueType::Integer);
        assert_eq!(read[0].index(), 0);
        assert_eq!(read[1].value_type(), ValueType::Text);
        assert!(!read[1].has_attributes());
        assert!(write_categories(&read, b',').unwrap().is_none());
    }

    #[test]
    fn test_invalid_sheets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.variables.csv");

        fs::write(&path, "label\nAge\n").unwrap();
        let err = read_variables(&path, b',', "Participant", BTreeMap::new()).unwrap_err();
        assert!(matches!(err, MagmaError::DatasourceParsing(ref e) if e.code == "CsvMissingColumn"));

        fs::write(&path, "name,valueType\nage,number\n").unwrap();
        let err = read_variables(&path, b',', "Participant", BTreeMap::new()).unwrap_err();
        match err {
            MagmaError::DatasourceParsing(e) => {
                assert_eq!(e.code, "CsvInvalidVariable");
                assert_eq!(e.parameters, vec!["t.variables.csv", "2"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        fs::write(&path, "name,repeatable\nvisits,true\n").unwrap();
        assert!(read_variables(&path, b',', "Participant", BTreeMap::new()).is_err());

        fs::write(&path, "name,entityType\nbarcode,Sample\n").unwrap();
        assert!(read_variables(&path, b',', "Participant", BTreeMap::new()).is_err());
    }

    #[test]
    fn test_orphan_categories() {
        let dir = tempfile::tempdir().unwrap();
        let variables = dir.path().join("t.variables.csv");
        let categories = dir.path().join("t.categories.csv");
        fs::write(&variables, "name\nsex\n").unwrap();
        fs::write(&categories, "variable,name\ngender,M\n").unwrap();
        let parsed = read_categories(&categories, b',').unwrap();
        let err = read_variables(&variables, b',', "Participant", parsed).unwrap_err();
        assert!(matches!(err, MagmaError::DatasourceParsing(ref e) if e.code == "CsvUnknownVariable"));
    }
}

//! Warehouse/schema/table/column catalog model and its round-trip
//! serialization to/from a declarative YAML document.
//!
//! Grounded on `original_source/src/blazel/base.py` (`Column`, `TableMeta`,
//! `BaseTable`, `BaseSchema`, `BaseWarehouse`) and
//! `original_source/src/blazel/serializable.py` (`Serializable.as_dict`
//! default-elision rule), re-expressed as explicit Rust types instead of
//! a reflection-based dataclass mixin.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as Yaml};

use crate::config;
use crate::error::{OrchestratorError, Result};

/// A scalar cell value produced by an extractor and consumed by the
/// stage encoder. Kept deliberately small: stratum moves data, it does
/// not transform it, so there is no need for nested or repeated types.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Microseconds since the Unix epoch, matching the Parquet
    /// `datetime` column convention described in the load engine.
    Timestamp(i64),
}

impl Value {
    /// Render as a CSV field using the default dialect's textual
    /// conventions (empty string for NULL; RFC 3339-ish for timestamps
    /// is left to callers since CSV never encodes the microsecond
    /// timestamp type directly for `datetime` columns in this pipeline).
    pub fn to_csv_field(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Timestamp(us) => us.to_string(),
        }
    }
}

/// A single column in a table's catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub dtype: String,
    pub description: Option<String>,
    pub source: Option<String>,
    pub meta: Option<serde_json::Value>,
    pub tests: Option<Vec<serde_json::Value>>,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            dtype: dtype.into().to_lowercase(),
            description: None,
            source: None,
            meta: None,
            tests: None,
        }
    }

    /// Declarative form: the bare dtype string when nothing else is
    /// set, otherwise a mapping of the non-default fields.
    fn to_document(&self) -> Yaml {
        let mut map = Mapping::new();
        if let Some(d) = &self.description {
            map.insert("description".into(), Yaml::String(d.clone()));
        }
        if let Some(s) = &self.source {
            map.insert("source".into(), Yaml::String(s.clone()));
        }
        if let Some(m) = &self.meta {
            map.insert("meta".into(), json_to_yaml(m));
        }
        if let Some(t) = &self.tests {
            map.insert(
                "tests".into(),
                Yaml::Sequence(t.iter().map(json_to_yaml).collect()),
            );
        }
        if map.is_empty() {
            Yaml::String(self.dtype.clone())
        } else {
            map.insert("dtype".into(), Yaml::String(self.dtype.clone()));
            Yaml::Mapping(map)
        }
    }

    fn from_document(name: &str, doc: &Yaml) -> Result<Self> {
        match doc {
            Yaml::String(dtype) => Ok(Column::new(name, dtype.clone())),
            Yaml::Mapping(map) => {
                let dtype = map
                    .get(Yaml::String("dtype".into()))
                    .and_then(Yaml::as_str)
                    .ok_or_else(|| {
                        OrchestratorError::CatalogParseError(format!(
                            "column {name} is missing required key 'dtype'"
                        ))
                    })?
                    .to_string();
                let description = map
                    .get(Yaml::String("description".into()))
                    .and_then(Yaml::as_str)
                    .map(str::to_string);
                let source = map
                    .get(Yaml::String("source".into()))
                    .and_then(Yaml::as_str)
                    .map(str::to_string);
                let meta = map
                    .get(Yaml::String("meta".into()))
                    .map(yaml_to_json);
                let tests = map
                    .get(Yaml::String("tests".into()))
                    .and_then(Yaml::as_sequence)
                    .map(|seq| seq.iter().map(yaml_to_json).collect());
                Ok(Column {
                    name: name.to_string(),
                    dtype: dtype.to_lowercase(),
                    description,
                    source,
                    meta,
                    tests,
                })
            }
            other => Err(OrchestratorError::CatalogParseError(format!(
                "column {name} has unsupported shape: {other:?}"
            ))),
        }
    }
}

/// Per-table ingestion policy. Every field has a default so the
/// document only needs to spell out the options that differ from it
/// (see [`TableMeta::to_document`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableMeta {
    pub ignore: bool,
    pub batches: u32,
    pub total_rows: u64,
    pub file_format: FileFormat,
    pub primary_key: Option<String>,
    pub timestamp_key: Option<String>,
    pub batch_key: Option<String>,
    pub source: Option<String>,
    pub where_clause: Option<String>,
    pub look_back_days: Option<u32>,
    pub timestamp_field: Option<String>,
    pub timezone: String,
    pub truncate: Option<bool>,
    pub stage_file_format: Option<String>,
    /// Progress-reporting hint recovered from the original's
    /// `TableMeta.avg_row_size`; unused by any invariant, purely
    /// informational like `total_rows`.
    pub avg_row_size: u64,
    /// Explicit staged object basename override, recovered from the
    /// original's `file_name` / `stage_file_name`. Defaults to the
    /// table name when unset.
    pub file_name: Option<String>,
}

impl Default for TableMeta {
    fn default() -> Self {
        TableMeta {
            ignore: false,
            batches: 1,
            total_rows: 0,
            file_format: FileFormat::Csv,
            primary_key: None,
            timestamp_key: None,
            batch_key: None,
            source: None,
            where_clause: None,
            look_back_days: None,
            timestamp_field: None,
            timezone: config::DEFAULT_TIMEZONE.to_string(),
            truncate: None,
            stage_file_format: None,
            avg_row_size: 0,
            file_name: None,
        }
    }
}

impl TableMeta {
    /// Emit only the fields that differ from their default, matching
    /// `BaseOptions.as_dict` in the original implementation.
    fn to_document(&self) -> Mapping {
        let default = TableMeta::default();
        let mut map = Mapping::new();
        macro_rules! put {
            ($field:ident, $to_yaml:expr) => {
                if self.$field != default.$field {
                    map.insert(stringify!($field).into(), $to_yaml(&self.$field));
                }
            };
        }
        put!(ignore, |v: &bool| Yaml::Bool(*v));
        put!(batches, |v: &u32| Yaml::Number((*v).into()));
        put!(total_rows, |v: &u64| Yaml::Number((*v).into()));
        put!(file_format, |v: &FileFormat| Yaml::String(v.as_str().to_string()));
        put!(primary_key, opt_str_to_yaml);
        put!(timestamp_key, opt_str_to_yaml);
        put!(batch_key, opt_str_to_yaml);
        put!(source, opt_str_to_yaml);
        put!(where_clause, opt_str_to_yaml);
        put!(look_back_days, |v: &Option<u32>| v
            .map(|n| Yaml::Number(n.into()))
            .unwrap_or(Yaml::Null));
        put!(timestamp_field, opt_str_to_yaml);
        put!(timezone, |v: &String| Yaml::String(v.clone()));
        put!(truncate, |v: &Option<bool>| v
            .map(Yaml::Bool)
            .unwrap_or(Yaml::Null));
        put!(stage_file_format, opt_str_to_yaml);
        put!(avg_row_size, |v: &u64| Yaml::Number((*v).into()));
        put!(file_name, opt_str_to_yaml);
        map
    }

    fn from_document(map: &Mapping) -> Result<Self> {
        let mut meta = TableMeta::default();
        for (k, v) in map {
            let key = k.as_str().unwrap_or_default();
            match key {
                "ignore" => meta.ignore = v.as_bool().unwrap_or_default(),
                "batches" => meta.batches = v.as_u64().unwrap_or(1) as u32,
                "total_rows" => meta.total_rows = v.as_u64().unwrap_or_default(),
                "file_format" => {
                    meta.file_format = FileFormat::parse(v.as_str().unwrap_or("csv"))?
                }
                "primary_key" => meta.primary_key = v.as_str().map(str::to_string),
                "timestamp_key" => meta.timestamp_key = v.as_str().map(str::to_string),
                "batch_key" => meta.batch_key = v.as_str().map(str::to_string),
                "source" => meta.source = v.as_str().map(str::to_string),
                "where_clause" => meta.where_clause = v.as_str().map(str::to_string),
                "look_back_days" => meta.look_back_days = v.as_u64().map(|n| n as u32),
                "timestamp_field" => meta.timestamp_field = v.as_str().map(str::to_string),
                "timezone" => meta.timezone = v.as_str().unwrap_or(config::DEFAULT_TIMEZONE).to_string(),
                "truncate" => meta.truncate = v.as_bool(),
                "stage_file_format" => meta.stage_file_format = v.as_str().map(str::to_string),
                "avg_row_size" => meta.avg_row_size = v.as_u64().unwrap_or_default(),
                "file_name" => meta.file_name = v.as_str().map(str::to_string),
                unknown => {
                    return Err(OrchestratorError::CatalogParseError(format!(
                        "unknown table option key: {unknown}"
                    )))
                }
            }
        }
        Ok(meta)
    }
}

fn opt_str_to_yaml(v: &Option<String>) -> Yaml {
    v.clone().map(Yaml::String).unwrap_or(Yaml::Null)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Parquet,
}

impl Default for FileFormat {
    fn default() -> Self {
        FileFormat::Csv
    }
}

impl FileFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            FileFormat::Csv => "csv",
            FileFormat::Parquet => "parquet",
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            FileFormat::Csv => "csv.gz",
            FileFormat::Parquet => "parquet",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "csv" => Ok(FileFormat::Csv),
            "parquet" => Ok(FileFormat::Parquet),
            other => Err(OrchestratorError::CatalogParseError(format!(
                "unsupported file_format '{other}'"
            ))),
        }
    }
}

/// A table's catalog entry: policy plus ordered columns.
///
/// `schema_name` / `database_name` are denormalized copies stamped in
/// when the table is attached to a [`Schema`] and the schema to a
/// [`Warehouse`] — a non-owning "lookup by name" reference realized as
/// a plain `String` rather than a pointer, avoiding the Table→Schema→
/// Warehouse ownership cycle the source's object graph has.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    pub description: Option<String>,
    pub meta: TableMeta,
    pub columns: IndexMap<String, Column>,
    pub(crate) schema_name: String,
    pub(crate) database_name: String,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Table {
            name: name.into(),
            description: None,
            meta: TableMeta::default(),
            columns: IndexMap::new(),
            schema_name: String::new(),
            database_name: String::new(),
        }
    }

    pub fn add_column(&mut self, column: Column) {
        self.columns.insert(column.name.clone(), column);
    }

    pub fn drop_column(&mut self, name: &str) {
        self.columns.shift_remove(name);
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.values().map(|c| c.name.as_str()).collect()
    }

    pub fn table_uri(&self) -> String {
        format!("{}.{}.{}", self.database_name, self.schema_name, self.name)
    }

    pub fn schema_name(&self) -> &str {
        &self.schema_name
    }

    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// The basename used for staged objects, honoring
    /// `meta.stage_file_name` / `meta.file_name` before falling back to
    /// the table name.
    pub fn stage_basename(&self) -> &str {
        self.meta
            .file_name
            .as_deref()
            .unwrap_or(self.name.as_str())
    }

    fn to_document(&self) -> Yaml {
        let mut map = Mapping::new();
        if let Some(d) = &self.description {
            map.insert("_description".into(), Yaml::String(d.clone()));
        }
        let meta_doc = self.meta.to_document();
        if !meta_doc.is_empty() {
            map.insert("_meta".into(), Yaml::Mapping(meta_doc));
        }
        for column in self.columns.values() {
            map.insert(Yaml::String(column.name.clone()), column.to_document());
        }
        Yaml::Mapping(map)
    }

    fn from_document(name: &str, doc: &Yaml) -> Result<Self> {
        let map = doc.as_mapping().ok_or_else(|| {
            OrchestratorError::CatalogParseError(format!("table {name} must be a mapping"))
        })?;
        let description = map
            .get(Yaml::String("_description".into()))
            .and_then(Yaml::as_str)
            .map(str::to_string);
        let meta = match map.get(Yaml::String("_meta".into())) {
            Some(Yaml::Mapping(m)) => TableMeta::from_document(m)?,
            _ => TableMeta::default(),
        };
        let mut table = Table {
            name: name.to_string(),
            description,
            meta,
            columns: IndexMap::new(),
            schema_name: String::new(),
            database_name: String::new(),
        };
        for (k, v) in map {
            let key = k.as_str().unwrap_or_default();
            if key == "_description" || key == "_meta" {
                continue;
            }
            table.add_column(Column::from_document(key, v)?);
        }
        Ok(table)
    }
}

/// A schema's catalog entry: an ordered map of tables.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    pub name: String,
    pub description: Option<String>,
    pub tables: IndexMap<String, Table>,
    pub(crate) database_name: String,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Schema {
            name: name.into(),
            description: None,
            tables: IndexMap::new(),
            database_name: String::new(),
        }
    }

    pub fn add_table(&mut self, mut table: Table) {
        table.schema_name = self.name.clone();
        table.database_name = self.database_name.clone();
        self.tables.insert(table.name.clone(), table);
    }

    pub fn drop_table(&mut self, name: &str) {
        self.tables.shift_remove(name);
    }

    pub fn get(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| OrchestratorError::TableNotFound {
            schema: self.name.clone(),
            table: name.to_string(),
        })
    }

    /// `table_names=None` keeps every non-`ignore`d table; an explicit
    /// list (even empty) overrides the ignore flag entirely.
    pub fn filter_tables(&self, table_names: Option<&[String]>) -> Vec<&Table> {
        let lowered: Option<Vec<String>> =
            table_names.map(|names| names.iter().map(|n| n.to_lowercase()).collect());
        self.tables
            .values()
            .filter(|table| match &lowered {
                None => !table.meta.ignore,
                Some(names) => names.iter().any(|n| n == &table.name),
            })
            .collect()
    }

    fn to_document(&self) -> Yaml {
        let mut map = Mapping::new();
        if let Some(d) = &self.description {
            map.insert("_description".into(), Yaml::String(d.clone()));
        }
        for table in self.tables.values() {
            map.insert(Yaml::String(table.name.clone()), table.to_document());
        }
        Yaml::Mapping(map)
    }

    fn from_document(name: &str, doc: &Yaml) -> Result<Self> {
        let map = doc.as_mapping().ok_or_else(|| {
            OrchestratorError::CatalogParseError(format!("schema {name} must be a mapping"))
        })?;
        let mut schema = Schema::new(name);
        for (k, v) in map {
            let key = k.as_str().unwrap_or_default();
            if key == "_description" {
                schema.description = v.as_str().map(str::to_string);
                continue;
            }
            if key == "_meta" {
                continue;
            }
            schema.tables.insert(
                key.to_string(),
                {
                    let mut t = Table::from_document(key, v)?;
                    t.schema_name = name.to_string();
                    t
                },
            );
        }
        Ok(schema)
    }
}

/// The root catalog entity: an ordered map of schemas, each an ordered
/// map of tables.
#[derive(Debug, Clone, Default)]
pub struct Warehouse {
    pub schemas: IndexMap<String, Schema>,
    pub source_file: Option<PathBuf>,
}

impl Warehouse {
    pub fn new() -> Self {
        Warehouse::default()
    }

    pub fn database_name(&self) -> String {
        config::database_name()
    }

    pub fn add_schema(&mut self, mut schema: Schema) {
        let db = self.database_name();
        schema.database_name = db.clone();
        for table in schema.tables.values_mut() {
            table.database_name = db.clone();
        }
        self.schemas.insert(schema.name.clone(), schema);
    }

    pub fn drop_schema(&mut self, name: &str) {
        self.schemas.shift_remove(name);
    }

    pub fn get(&self, schema: &str, table: &str) -> Result<&Table> {
        self.schemas
            .get(schema)
            .ok_or_else(|| OrchestratorError::SchemaNotFound(schema.to_string()))?
            .get(table)
    }

    pub fn filter_schemas(&self, schema_names: Option<&[String]>) -> Vec<&Schema> {
        let lowered: Option<Vec<String>> =
            schema_names.map(|names| names.iter().map(|n| n.to_lowercase()).collect());
        self.schemas
            .values()
            .filter(|schema| match &lowered {
                None => true,
                Some(names) => names.iter().any(|n| n == &schema.name),
            })
            .collect()
    }

    /// Filter schemas and tables. `stratify=true` interleaves tables
    /// across schemas round-robin (schema0.t0, schema1.t0, ...,
    /// schema0.t1, ...) instead of emitting each schema's tables
    /// contiguously.
    pub fn filter(
        &self,
        schema_names: Option<&[String]>,
        table_names: Option<&[String]>,
        stratify: bool,
    ) -> Vec<&Table> {
        let mut per_schema: Vec<Vec<&Table>> = self
            .filter_schemas(schema_names)
            .into_iter()
            .map(|schema| schema.filter_tables(table_names))
            .collect();

        let mut result = Vec::new();
        loop {
            let mut any_left = false;
            for bucket in per_schema.iter_mut() {
                if bucket.is_empty() {
                    continue;
                }
                any_left = true;
                if stratify {
                    result.push(bucket.remove(0));
                } else {
                    result.append(bucket);
                }
            }
            if !any_left {
                break;
            }
        }
        result
    }

    pub fn to_document(&self) -> Yaml {
        let mut map = Mapping::new();
        for schema in self.schemas.values() {
            map.insert(Yaml::String(schema.name.clone()), schema.to_document());
        }
        Yaml::Mapping(map)
    }

    pub fn from_document(doc: &Yaml) -> Result<Self> {
        let map = doc
            .as_mapping()
            .ok_or_else(|| OrchestratorError::CatalogParseError("catalog document must be a mapping".into()))?;
        let mut warehouse = Warehouse::new();
        for (k, v) in map {
            let name = k.as_str().ok_or_else(|| {
                OrchestratorError::CatalogParseError("schema name must be a string".into())
            })?;
            let schema = Schema::from_document(name, v)?;
            warehouse.add_schema(schema);
        }
        Ok(warehouse)
    }

    pub fn from_yaml_str(yaml_str: &str) -> Result<Self> {
        let doc: Yaml = serde_yaml::from_str(yaml_str)
            .map_err(|e| OrchestratorError::CatalogParseError(e.to_string()))?;
        Warehouse::from_document(&doc)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml::to_string(&self.to_document())
            .map_err(|e| OrchestratorError::CatalogParseError(e.to_string()))
    }
}

impl PartialEq for Warehouse {
    fn eq(&self, other: &Self) -> bool {
        self.schemas == other.schemas
    }
}

fn json_to_yaml(v: &serde_json::Value) -> Yaml {
    serde_yaml::to_value(v).unwrap_or(Yaml::Null)
}

fn yaml_to_json(v: &Yaml) -> serde_json::Value {
    serde_json::to_value(v).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
schema0:
  table0:
    column0: varchar
    column1:
      dtype: datetime
      description: "when the event happened"
  table1:
    _description: "second table"
    _meta:
      batches: 4
      primary_key: id
    id: int
schema1:
  table0:
    column0: varchar
"#
    }

    #[test]
    fn round_trips_through_document() {
        let warehouse = Warehouse::from_yaml_str(sample_yaml()).unwrap();
        let doc = warehouse.to_document();
        let reparsed = Warehouse::from_document(&doc).unwrap();
        assert_eq!(warehouse, reparsed);
    }

    #[test]
    fn column_dtype_is_lowercased() {
        let warehouse = Warehouse::from_yaml_str(sample_yaml()).unwrap();
        let table = warehouse.get("schema0", "table0").unwrap();
        assert_eq!(table.columns["column1"].dtype, "datetime");
    }

    #[test]
    fn table_meta_round_trips_non_default_fields() {
        let warehouse = Warehouse::from_yaml_str(sample_yaml()).unwrap();
        let table = warehouse.get("schema0", "table1").unwrap();
        assert_eq!(table.meta.batches, 4);
        assert_eq!(table.meta.primary_key.as_deref(), Some("id"));
        assert_eq!(table.meta.timestamp_key, None);
    }

    #[test]
    fn filter_without_explicit_tables_excludes_ignored() {
        let mut warehouse = Warehouse::new();
        let mut schema = Schema::new("s");
        let mut ignored = Table::new("ignored");
        ignored.meta.ignore = true;
        schema.add_table(ignored);
        schema.add_table(Table::new("kept"));
        warehouse.add_schema(schema);

        let tables = warehouse.filter(None, None, false);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "kept");
    }

    #[test]
    fn filter_with_explicit_tables_overrides_ignore() {
        let mut warehouse = Warehouse::new();
        let mut schema = Schema::new("s");
        let mut ignored = Table::new("ignored");
        ignored.meta.ignore = true;
        schema.add_table(ignored);
        warehouse.add_schema(schema);

        let names = vec!["ignored".to_string()];
        let tables = warehouse.filter(None, Some(&names), false);
        assert_eq!(tables.len(), 1);
    }

    #[test]
    fn filter_empty_schema_list_returns_none() {
        let mut warehouse = Warehouse::new();
        warehouse.add_schema(Schema::new("s"));
        let tables = warehouse.filter(Some(&[]), None, false);
        assert!(tables.is_empty());
    }

    #[test]
    fn stratify_interleaves_across_schemas() {
        let mut warehouse = Warehouse::new();
        for schema_i in [1, 3, 5] {
            let mut schema = Schema::new(format!("schema{schema_i}"));
            for table_i in [1, 3, 5] {
                schema.add_table(Table::new(format!("table{table_i}")));
            }
            warehouse.add_schema(schema);
        }
        let schema_names = vec![
            "schema1".to_string(),
            "schema3".to_string(),
            "schema5".to_string(),
        ];
        let table_names = vec![
            "table1".to_string(),
            "table3".to_string(),
            "table5".to_string(),
        ];
        let tables = warehouse.filter(Some(&schema_names), Some(&table_names), true);
        let got: Vec<String> = tables
            .iter()
            .map(|t| format!("{}.{}", t.schema_name(), t.name))
            .collect();
        assert_eq!(
            got,
            vec![
                "schema1.table1",
                "schema3.table1",
                "schema5.table1",
                "schema1.table3",
                "schema3.table3",
                "schema5.table3",
                "schema1.table5",
                "schema3.table5",
                "schema5.table5",
            ]
        );
    }

    #[test]
    fn table_uri_is_fully_qualified() {
        let mut warehouse = Warehouse::new();
        let mut schema = Schema::new("schema0");
        schema.add_table(Table::new("table0"));
        warehouse.add_schema(schema);
        let table = warehouse.get("schema0", "table0").unwrap();
        assert!(table.table_uri().ends_with(".schema0.table0"));
    }

    #[test]
    fn unknown_meta_key_is_a_parse_error() {
        let bad = "schema0:\n  table0:\n    _meta:\n      not_a_real_option: 1\n    c: int\n";
        let err = Warehouse::from_yaml_str(bad).unwrap_err();
        assert!(matches!(err, OrchestratorError::CatalogParseError(_)));
    }
}

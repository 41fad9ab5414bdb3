//! Declarative ingestion configuration
//!
//! A configuration document describes where the rows of an incoming delimited
//! file end up: the destination dataset and table, how the file is laid out,
//! which columns it carries and which extra columns are computed on the way in.
//!
//! The document is YAML and is parsed once per invocation into
//! [`JobConfiguration`]. Structural problems are reported at load time through
//! [`ConfigError`] so that nothing is submitted to the warehouse for a broken
//! configuration.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Default field delimiter for incoming files
pub const DEFAULT_FIELD_DELIMITER: &str = ";";

/// Default quote character for incoming files
pub const DEFAULT_QUOTE_CHARACTER: &str = "'";

/// Default processing location of the query jobs
pub const DEFAULT_LOCATION: &str = "EU";

const MILLIS_PER_DAY: u64 = 86_400_000;

/// Errors raised while loading a configuration document
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Configuration field '{0}' cannot be empty")]
    EmptyField(&'static str),

    #[error("Configuration declares no file_schema fields")]
    NoFields,

    #[error("Column '{0}' is declared more than once")]
    DuplicateColumn(String),

    #[error("Additional column '{0}' is not in the request and has no transformation expression")]
    MissingExpression(String),

    #[error("Partition expiration of {0} days is out of range")]
    InvalidExpiration(u64),
}

/// Table write mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WriteMode {
    /// Rows are appended to the destination table
    Append,
    /// The destination table content is replaced
    Truncate,
}

impl WriteMode {
    /// Write disposition understood by the warehouse
    pub fn write_disposition(&self) -> &'static str {
        match self {
            Self::Append => "WRITE_APPEND",
            Self::Truncate => "WRITE_TRUNCATE",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Append => "APPEND",
            Self::Truncate => "TRUNCATE",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A column read directly from the incoming file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    /// Type of the column as it appears in the file
    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default, deserialize_with = "nullable_bool")]
    pub required: bool,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub transformation: Option<FieldTransformation>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            required: false,
            description: None,
            transformation: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_transformation(
        mut self,
        target_type: Option<&str>,
        expression: Option<&str>,
    ) -> Self {
        self.transformation = Some(FieldTransformation {
            target_type: target_type.map(str::to_string),
            expression: expression.map(str::to_string),
        });
        self
    }

    /// Type of the column in the destination table
    pub fn effective_type(&self) -> &str {
        self.transformation
            .as_ref()
            .and_then(|t| t.target_type.as_deref())
            .unwrap_or(&self.field_type)
    }

    /// Expression projected instead of the raw column, if any
    pub fn expression(&self) -> Option<&str> {
        self.transformation
            .as_ref()
            .and_then(|t| t.expression.as_deref())
    }
}

/// Transformation applied to a file column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldTransformation {
    /// Overrides the destination type of the column
    #[serde(rename = "type", default)]
    pub target_type: Option<String>,

    #[serde(default)]
    pub expression: Option<String>,
}

/// A column that is not part of the incoming file
///
/// Its value either comes from a static expression or from a value supplied
/// with the request (`in_request`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalColumnSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub column_type: String,

    #[serde(default, deserialize_with = "nullable_bool")]
    pub required: bool,

    #[serde(default, deserialize_with = "nullable_bool")]
    pub in_request: bool,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub transformation: Option<ColumnTransformation>,
}

impl AdditionalColumnSpec {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            required: false,
            in_request: false,
            description: None,
            transformation: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn in_request(mut self) -> Self {
        self.in_request = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.transformation = Some(ColumnTransformation {
            expression: Some(expression.into()),
        });
        self
    }

    pub fn expression(&self) -> Option<&str> {
        self.transformation
            .as_ref()
            .and_then(|t| t.expression.as_deref())
    }
}

/// Transformation applied to an additional column
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnTransformation {
    #[serde(default)]
    pub expression: Option<String>,
}

/// Time partitioning of the destination table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePartitioningSpec {
    /// Partition granularity (DAY, HOUR, MONTH, YEAR)
    #[serde(rename = "type")]
    pub partition_type: String,

    /// Partitioning column, ingestion time when absent
    #[serde(default)]
    pub field: Option<String>,

    /// Partition expiration in days
    #[serde(default)]
    pub expiration_day: Option<u64>,
}

impl TimePartitioningSpec {
    /// Expiration in milliseconds, `None` when unset or not representable as
    /// a signed 64-bit count
    pub fn expiration_ms(&self) -> Option<u64> {
        self.expiration_day
            .and_then(|days| days.checked_mul(MILLIS_PER_DAY))
            .filter(|ms| i64::try_from(*ms).is_ok())
    }
}

/// Value of an additional column supplied with a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Integer(i64),
    Text(String),
}

impl ColumnValue {
    /// SQL literal form of the value
    ///
    /// Strings are single-quoted with backslash escapes, integers are bare.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Self::Integer(value) => value.to_string(),
            Self::Text(value) => {
                let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
                format!("'{}'", escaped)
            }
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(value) => write!(f, "{}", value),
            Self::Text(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

/// Named additional column value supplied with a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalColumnValue {
    pub name: String,
    pub value: ColumnValue,
}

impl AdditionalColumnValue {
    pub fn new(name: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Parsed ingestion configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobConfiguration {
    pub dataset: String,

    pub table: String,

    #[serde(default = "default_field_delimiter")]
    pub field_delimiter: String,

    /// Leading rows skipped in each file
    #[serde(default)]
    pub header_rows: u32,

    /// Trailing rows, tolerated as bad records
    #[serde(default)]
    pub footer_rows: u32,

    #[serde(default = "default_quote_character")]
    pub quote_character: String,

    pub file_schema: Vec<FieldSpec>,

    pub mode: WriteMode,

    #[serde(default = "default_location", deserialize_with = "location_or_default")]
    pub location: String,

    #[serde(default)]
    pub time_partitioning: Option<TimePartitioningSpec>,

    #[serde(default)]
    pub additional_columns: Vec<AdditionalColumnSpec>,
}

impl Default for JobConfiguration {
    fn default() -> Self {
        Self {
            dataset: String::new(),
            table: String::new(),
            field_delimiter: default_field_delimiter(),
            header_rows: 0,
            footer_rows: 0,
            quote_character: default_quote_character(),
            file_schema: Vec::new(),
            mode: WriteMode::Append,
            location: default_location(),
            time_partitioning: None,
            additional_columns: Vec::new(),
        }
    }
}

impl JobConfiguration {
    /// Parse and validate a YAML configuration document
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        let configuration: Self = serde_yaml::from_str(document)?;
        configuration.validate()?;
        Ok(configuration)
    }

    /// Validate structural invariants that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.trim().is_empty() {
            return Err(ConfigError::EmptyField("dataset"));
        }
        if self.table.trim().is_empty() {
            return Err(ConfigError::EmptyField("table"));
        }
        if self.field_delimiter.is_empty() {
            return Err(ConfigError::EmptyField("field_delimiter"));
        }
        if self.file_schema.is_empty() {
            return Err(ConfigError::NoFields);
        }

        // File fields and additional columns share the projection namespace
        let mut seen = HashSet::new();
        let names = self
            .file_schema
            .iter()
            .map(|f| f.name.as_str())
            .chain(self.additional_columns.iter().map(|c| c.name.as_str()));
        for name in names {
            if name.trim().is_empty() {
                return Err(ConfigError::EmptyField("name"));
            }
            if !seen.insert(name) {
                return Err(ConfigError::DuplicateColumn(name.to_string()));
            }
        }

        for column in &self.additional_columns {
            if !column.in_request && column.expression().is_none() {
                return Err(ConfigError::MissingExpression(column.name.clone()));
            }
        }

        if let Some(partitioning) = &self.time_partitioning {
            if let Some(days) = partitioning.expiration_day {
                if partitioning.expiration_ms().is_none() {
                    return Err(ConfigError::InvalidExpiration(days));
                }
            }
        }

        Ok(())
    }

    /// Name under which the incoming files are exposed to the query
    pub fn temporary_table_name(&self) -> String {
        format!("{}_tmp", self.table)
    }
}

fn default_field_delimiter() -> String {
    DEFAULT_FIELD_DELIMITER.to_string()
}

fn default_quote_character() -> String {
    DEFAULT_QUOTE_CHARACTER.to_string()
}

fn default_location() -> String {
    DEFAULT_LOCATION.to_string()
}

// An explicit `location: ~` or `location: ""` also falls back to the default
fn location_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let location: Option<String> = Option::deserialize(deserializer)?;
    Ok(location
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(default_location))
}

fn nullable_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(false))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_DOCUMENT: &str = r#"
dataset: sales
table: orders
field_delimiter: ","
header_rows: 1
footer_rows: 2
quote_character: '"'
mode: TRUNCATE
location: US
file_schema:
  - name: id
    type: INTEGER
    required: true
    description: Order identifier
  - name: amount
    type: STRING
    transformation:
      type: NUMERIC
      expression: CAST(REPLACE(amount, ',', '.') AS NUMERIC)
time_partitioning:
  type: DAY
  field: ingest_date
  expiration_day: 30
additional_columns:
  - name: ingest_date
    type: DATE
    transformation:
      expression: CURRENT_DATE()
  - name: source
    type: STRING
    required: true
    in_request: true
"#;

    const MINIMAL_DOCUMENT: &str = r#"
dataset: sales
table: orders
mode: APPEND
file_schema:
  - name: id
    type: INTEGER
"#;

    #[test]
    fn test_out_of_range_expiration_is_rejected() {
        let document = FULL_DOCUMENT.replace("expiration_day: 30", "expiration_day: 300000000000");
        assert!(matches!(
            JobConfiguration::from_yaml(&document),
            Err(ConfigError::InvalidExpiration(300_000_000_000))
        ));

        // Largest day count whose millisecond value still fits an i64
        let max_days = i64::MAX as u64 / MILLIS_PER_DAY;
        let document = FULL_DOCUMENT.replace(
            "expiration_day: 30",
            &format!("expiration_day: {}", max_days),
        );
        let config = JobConfiguration::from_yaml(&document).unwrap();
        assert_eq!(
            config.time_partitioning.unwrap().expiration_ms(),
            Some(max_days * MILLIS_PER_DAY)
        );
    }

    #[test]
    fn test_parse_full_document() {
        let config = JobConfiguration::from_yaml(FULL_DOCUMENT).unwrap();

        assert_eq!(config.dataset, "sales");
        assert_eq!(config.table, "orders");
        assert_eq!(config.field_delimiter, ",");
        assert_eq!(config.header_rows, 1);
        assert_eq!(config.footer_rows, 2);
        assert_eq!(config.quote_character, "\"");
        assert_eq!(config.mode, WriteMode::Truncate);
        assert_eq!(config.location, "US");
        assert_eq!(config.file_schema.len(), 2);
        assert!(config.file_schema[0].required);
        assert_eq!(config.file_schema[1].effective_type(), "NUMERIC");
        assert_eq!(config.additional_columns.len(), 2);
        assert!(config.additional_columns[1].in_request);

        let partitioning = config.time_partitioning.unwrap();
        assert_eq!(partitioning.partition_type, "DAY");
        assert_eq!(partitioning.field.as_deref(), Some("ingest_date"));
        assert_eq!(partitioning.expiration_ms(), Some(30 * 86_400_000));
    }

    #[test]
    fn test_defaults_applied() {
        let config = JobConfiguration::from_yaml(MINIMAL_DOCUMENT).unwrap();

        assert_eq!(config.field_delimiter, ";");
        assert_eq!(config.header_rows, 0);
        assert_eq!(config.footer_rows, 0);
        assert_eq!(config.quote_character, "'");
        assert_eq!(config.location, "EU");
        assert!(config.time_partitioning.is_none());
        assert!(config.additional_columns.is_empty());
        assert!(!config.file_schema[0].required);
        assert_eq!(config.temporary_table_name(), "orders_tmp");
    }

    #[test]
    fn test_null_location_falls_back_to_default() {
        let document = format!("{}location: ~\n", MINIMAL_DOCUMENT);
        let config = JobConfiguration::from_yaml(&document).unwrap();
        assert_eq!(config.location, "EU");

        let document = format!("{}location: \"\"\n", MINIMAL_DOCUMENT);
        let config = JobConfiguration::from_yaml(&document).unwrap();
        assert_eq!(config.location, "EU");
    }

    #[test]
    fn test_null_required_is_false() {
        let document = r#"
dataset: d
table: t
mode: APPEND
file_schema:
  - name: id
    type: INTEGER
    required: ~
"#;
        let config = JobConfiguration::from_yaml(document).unwrap();
        assert!(!config.file_schema[0].required);
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let document = MINIMAL_DOCUMENT.replace("APPEND", "MERGE");
        let err = JobConfiguration::from_yaml(&document).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_schema_rejected() {
        let document = "dataset: d\ntable: t\nmode: APPEND\n";
        assert!(matches!(
            JobConfiguration::from_yaml(document),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_empty_file_schema_rejected() {
        let document = "dataset: d\ntable: t\nmode: APPEND\nfile_schema: []\n";
        assert!(matches!(
            JobConfiguration::from_yaml(document),
            Err(ConfigError::NoFields)
        ));
    }

    #[test]
    fn test_empty_dataset_rejected() {
        let document = MINIMAL_DOCUMENT.replace("dataset: sales", "dataset: \"\"");
        assert!(matches!(
            JobConfiguration::from_yaml(&document),
            Err(ConfigError::EmptyField("dataset"))
        ));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let document = r#"
dataset: d
table: t
mode: APPEND
file_schema:
  - name: id
    type: INTEGER
  - name: id
    type: STRING
"#;
        let err = JobConfiguration::from_yaml(document).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateColumn(name) if name == "id"));
    }

    #[test]
    fn test_additional_column_clashing_with_field_rejected() {
        let document = r#"
dataset: d
table: t
mode: APPEND
file_schema:
  - name: id
    type: INTEGER
additional_columns:
  - name: id
    type: INTEGER
    in_request: true
"#;
        let err = JobConfiguration::from_yaml(document).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateColumn(_)));
    }

    #[test]
    fn test_static_column_without_expression_rejected() {
        let document = r#"
dataset: d
table: t
mode: APPEND
file_schema:
  - name: id
    type: INTEGER
additional_columns:
  - name: loaded_at
    type: TIMESTAMP
"#;
        let err = JobConfiguration::from_yaml(document).unwrap_err();
        assert!(matches!(err, ConfigError::MissingExpression(name) if name == "loaded_at"));
    }

    #[test]
    fn test_write_mode_dispositions() {
        assert_eq!(WriteMode::Append.write_disposition(), "WRITE_APPEND");
        assert_eq!(WriteMode::Truncate.write_disposition(), "WRITE_TRUNCATE");
        assert_eq!(WriteMode::Truncate.to_string(), "TRUNCATE");
    }

    #[test]
    fn test_column_value_from_json() {
        let values: Vec<AdditionalColumnValue> = serde_json::from_str(
            r#"[{"name": "source", "value": "upload-api"}, {"name": "batch", "value": 42}]"#,
        )
        .unwrap();

        assert_eq!(values[0].value, ColumnValue::Text("upload-api".to_string()));
        assert_eq!(values[1].value, ColumnValue::Integer(42));
    }

    #[test]
    fn test_column_value_literals() {
        assert_eq!(ColumnValue::from("upload-api").to_sql_literal(), "'upload-api'");
        assert_eq!(ColumnValue::from("it's").to_sql_literal(), "'it\\'s'");
        assert_eq!(ColumnValue::from(42).to_sql_literal(), "42");
        assert_eq!(ColumnValue::from("raw").to_string(), "raw");
    }
}

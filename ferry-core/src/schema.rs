//! Schema compilation
//!
//! Two schemas are derived from a configuration: the schema used to read the
//! incoming files (external source schema) and the schema of the destination
//! table. Column order of the destination schema is the physical column order
//! of the table: file fields first, then additional columns.

use crate::configuration::{AdditionalColumnSpec, FieldSpec};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column mode in a table schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnMode {
    Required,
    Nullable,
}

impl ColumnMode {
    pub fn from_required(required: bool) -> Self {
        if required {
            Self::Required
        } else {
            Self::Nullable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Required => "REQUIRED",
            Self::Nullable => "NULLABLE",
        }
    }
}

impl fmt::Display for ColumnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Column of the external source schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
}

/// Column of the destination table schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableColumn {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    pub mode: ColumnMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Schema used to read the incoming files, one column per file field
pub fn build_external_schema(fields: &[FieldSpec]) -> Vec<SourceColumn> {
    fields
        .iter()
        .map(|field| SourceColumn {
            name: field.name.clone(),
            column_type: field.field_type.clone(),
        })
        .collect()
}

/// Schema of the destination table
///
/// File fields use their transformation type override when one is declared.
pub fn build_table_schema(
    fields: &[FieldSpec],
    additional_columns: &[AdditionalColumnSpec],
) -> Vec<TableColumn> {
    let file_columns = fields.iter().map(|field| TableColumn {
        name: field.name.clone(),
        column_type: field.effective_type().to_string(),
        mode: ColumnMode::from_required(field.required),
        description: field.description.clone(),
    });

    let additional = additional_columns.iter().map(|column| TableColumn {
        name: column.name.clone(),
        column_type: column.column_type.clone(),
        mode: ColumnMode::from_required(column.required),
        description: column.description.clone(),
    });

    file_columns.chain(additional).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::new("id", "INTEGER")
                .required()
                .with_description("Identifier"),
            FieldSpec::new("amount", "STRING").with_transformation(
                Some("NUMERIC"),
                Some("CAST(amount AS NUMERIC)"),
            ),
            FieldSpec::new("label", "STRING").with_transformation(None, Some("TRIM(label)")),
        ]
    }

    #[test]
    fn test_external_schema_keeps_declared_types_in_order() {
        let fields = sample_fields();
        let schema = build_external_schema(&fields);

        assert_eq!(schema.len(), fields.len());
        let names: Vec<_> = schema.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "amount", "label"]);
        // The override only applies to the destination
        assert_eq!(schema[1].column_type, "STRING");
    }

    #[test]
    fn test_external_schema_empty_input() {
        assert!(build_external_schema(&[]).is_empty());
    }

    #[test]
    fn test_table_schema_uses_type_override_and_modes() {
        let schema = build_table_schema(&sample_fields(), &[]);

        assert_eq!(schema[0].mode, ColumnMode::Required);
        assert_eq!(schema[0].description.as_deref(), Some("Identifier"));
        assert_eq!(schema[1].column_type, "NUMERIC");
        assert_eq!(schema[1].mode, ColumnMode::Nullable);
        assert_eq!(schema[2].column_type, "STRING");
    }

    #[test]
    fn test_table_schema_places_additional_columns_last() {
        let additional = vec![
            AdditionalColumnSpec::new("ingest_date", "DATE").with_expression("CURRENT_DATE()"),
            AdditionalColumnSpec::new("source", "STRING")
                .required()
                .in_request()
                .with_description("Uploader"),
        ];
        let schema = build_table_schema(&sample_fields(), &additional);

        let names: Vec<_> = schema.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "amount", "label", "ingest_date", "source"]);
        assert_eq!(schema[3].mode, ColumnMode::Nullable);
        assert_eq!(schema[4].mode, ColumnMode::Required);
        assert_eq!(schema[4].description.as_deref(), Some("Uploader"));
    }

    #[test]
    fn test_table_column_serialization() {
        let column = TableColumn {
            name: "id".to_string(),
            column_type: "INTEGER".to_string(),
            mode: ColumnMode::Required,
            description: None,
        };
        let json = serde_json::to_value(&column).unwrap();
        assert_eq!(json, serde_json::json!({"name": "id", "type": "INTEGER", "mode": "REQUIRED"}));
    }
}

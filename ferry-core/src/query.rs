//! Query compilation
//!
//! Builds the projection that moves rows from the external source into the
//! destination table. The generated text is a pure function of its inputs so
//! the same configuration and request always yield byte-identical queries.

use crate::configuration::{AdditionalColumnSpec, AdditionalColumnValue, FieldSpec};
use thiserror::Error;

/// Alias of the probe row count column
pub const ROW_COUNT_COLUMN: &str = "nb_lines";

/// Errors that can occur during query compilation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("No value supplied in the request for additional column '{0}'")]
    MissingRequestValue(String),

    #[error("Additional column '{0}' has no transformation expression")]
    MissingExpression(String),
}

/// Build the transformation query over `source_relation`
///
/// Projection order is file fields then additional columns, each in
/// declaration order.
///
/// Request values are matched by column name; when several values carry the
/// same name the first one is used. A transformation expression of an
/// in-request column has every occurrence of the column name replaced by the
/// raw value. The replacement is textual, so a column name that is also a
/// substring of another identifier in the expression gets replaced there too.
pub fn build_query(
    fields: &[FieldSpec],
    additional_columns: &[AdditionalColumnSpec],
    request_values: &[AdditionalColumnValue],
    source_relation: &str,
) -> Result<String, CompileError> {
    let mut projections: Vec<String> = fields
        .iter()
        .map(|field| match field.expression() {
            Some(expression) => format!("{} AS {}", expression, field.name),
            None => field.name.clone(),
        })
        .collect();

    for column in additional_columns {
        projections.push(project_additional_column(column, request_values)?);
    }

    Ok(format!(
        "SELECT \n  {} \nFROM {}",
        projections.join(", \n  "),
        source_relation
    ))
}

/// Build the probe query counting the rows of `source_relation`
pub fn build_count_query(source_relation: &str) -> String {
    format!(
        "SELECT COUNT(*) as {} FROM {}",
        ROW_COUNT_COLUMN, source_relation
    )
}

fn project_additional_column(
    column: &AdditionalColumnSpec,
    request_values: &[AdditionalColumnValue],
) -> Result<String, CompileError> {
    if !column.in_request {
        let expression = column
            .expression()
            .ok_or_else(|| CompileError::MissingExpression(column.name.clone()))?;
        return Ok(format!("{} AS {}", expression, column.name));
    }

    let supplied = request_values
        .iter()
        .find(|value| value.name == column.name)
        .ok_or_else(|| CompileError::MissingRequestValue(column.name.clone()))?;

    let expression = match column.expression() {
        Some(template) => template.replace(&column.name, &supplied.value.to_string()),
        None => supplied.value.to_sql_literal(),
    };

    Ok(format!("{} AS {}", expression, column.name))
}

//! Dataset shape descriptions
//!
//! - `TableSchema` / `ColumnSchema`: curated or discovered description of a table
//! - `DataType`: coarse column type used for result coercion
//! - `ColumnInfo`: one row of the store's column catalog

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse column type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Date and time (timestamp, timestamptz, date)
    DateTime,
    /// Text labels (subsystem, plant name)
    String,
    /// Floating point and numeric measurements
    Float,
    /// Integral counts and identifiers
    Integer,
    Boolean,
    /// Anything else, carrying the store's own type name
    Other(String),
}

impl DataType {
    /// Map an information-schema or SQLite declared type name
    pub fn from_sql_type(name: &str) -> Self {
        let lower = name.trim().to_ascii_lowercase();

        if lower.starts_with("timestamp") || lower == "date" || lower == "datetime" {
            DataType::DateTime
        } else if lower.starts_with("character")
            || lower.starts_with("varchar")
            || lower.starts_with("char")
            || lower == "text"
            || lower == "user-defined"
        {
            DataType::String
        } else if lower == "double precision"
            || lower == "real"
            || lower.starts_with("numeric")
            || lower.starts_with("decimal")
            || lower.starts_with("float")
            || lower == "double"
        {
            DataType::Float
        } else if matches!(
            lower.as_str(),
            "integer" | "int" | "int2" | "int4" | "int8" | "smallint" | "bigint" | "tinyint"
                | "serial" | "bigserial"
        ) {
            DataType::Integer
        } else if lower.starts_with("bool") {
            DataType::Boolean
        } else {
            DataType::Other(name.trim().to_string())
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::DateTime => write!(f, "datetime"),
            DataType::String => write!(f, "string"),
            DataType::Float => write!(f, "float"),
            DataType::Integer => write!(f, "integer"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Other(name) => write!(f, "{}", name),
        }
    }
}

/// Description of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub description: String,
    /// Physical unit (R$/MWh, MWmonth, %)
    pub unit: Option<String>,
    pub data_type: DataType,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: None,
            data_type,
        }
    }

    /// Builder method: set description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder method: set unit
    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Description of one dataset table. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Globally unique table name
    pub table_name: String,
    /// Publishing organization (CCEE, ONS)
    pub organization: String,
    /// Human-readable dataset name
    pub dataset_name: String,
    pub description: String,
    pub columns: Vec<ColumnSchema>,
}

impl TableSchema {
    pub fn new(
        table_name: impl Into<String>,
        organization: impl Into<String>,
        dataset_name: impl Into<String>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            organization: organization.into(),
            dataset_name: dataset_name.into(),
            description: String::new(),
            columns: Vec::new(),
        }
    }

    /// Builder method: set description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder method: append a column
    pub fn column(mut self, column: ColumnSchema) -> Self {
        self.columns.push(column);
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.get_column(name).is_some()
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// One row of the store's column catalog
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub column_name: String,
    pub data_type: String,
    pub is_nullable: bool,
    pub character_maximum_length: Option<i64>,
}

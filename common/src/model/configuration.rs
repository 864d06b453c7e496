use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How the destination table schema is obtained when a transfer loads data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SchemaMode {
    /// The warehouse infers column types from the loaded rows.
    #[default]
    AutoDetect,
    /// Columns are declared up front through `Configuration::schema_definition`.
    Custom,
}

impl SchemaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaMode::AutoDetect => "auto_detect",
            SchemaMode::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "auto_detect" => Some(SchemaMode::AutoDetect),
            "custom" => Some(SchemaMode::Custom),
            _ => None,
        }
    }
}

fn default_field_type() -> String {
    "STRING".to_string()
}

fn default_field_mode() -> String {
    "NULLABLE".to_string()
}

/// One column of a custom destination schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default = "default_field_mode")]
    pub mode: String,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, field_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: field_type.into(),
            mode: default_field_mode(),
        }
    }
}

/// Locates the spreadsheet a transfer reads from. Never interpreted by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReference {
    pub sheet_url: String,
    #[serde(default)]
    pub tab_name: Option<String>,
}

/// Locates the warehouse table a transfer writes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetReference {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

/// Outcome of the most recent dispatch, as written back by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "succeeded" => Some(RunStatus::Succeeded),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// A recurring (or manual-only) spreadsheet-to-warehouse transfer task.
///
/// Rows are created and edited by the administration side. The orchestrator
/// only ever writes `last_run`, `status` and `last_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub id: i64,
    pub name: String,
    pub source_reference: SourceReference,
    pub target_reference: TargetReference,
    #[serde(default)]
    pub schema_mode: SchemaMode,
    #[serde(default)]
    pub schema_definition: Option<Vec<SchemaField>>,
    pub is_active: bool,
    /// Hours between automatic runs. `0` means the configuration only runs when triggered by hand.
    pub run_frequency_hours: u32,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default)]
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("configuration name must not be empty")]
    EmptyName,
    #[error("custom schema mode requires a non-empty schema definition")]
    MissingSchemaDefinition,
    #[error("schema field {0} has an empty name")]
    EmptyFieldName(usize),
}

impl Configuration {
    /// Builds an active auto-detect configuration that has never run.
    pub fn new(
        id: i64,
        name: impl Into<String>,
        source_reference: SourceReference,
        target_reference: TargetReference,
        run_frequency_hours: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            source_reference,
            target_reference,
            schema_mode: SchemaMode::AutoDetect,
            schema_definition: None,
            is_active: true,
            run_frequency_hours,
            last_run: None,
            status: None,
            last_error: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Checks the structural rules a configuration must satisfy before it is stored or dispatched.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.schema_mode == SchemaMode::Custom {
            match &self.schema_definition {
                Some(fields) if !fields.is_empty() => {
                    if let Some(idx) = fields.iter().position(|f| f.name.trim().is_empty()) {
                        return Err(ValidationError::EmptyFieldName(idx));
                    }
                }
                _ => return Err(ValidationError::MissingSchemaDefinition),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Configuration {
        Configuration::new(
            1,
            "orders",
            SourceReference {
                sheet_url: "https://docs.google.com/spreadsheets/d/abc/edit".to_string(),
                tab_name: Some("Sheet1".to_string()),
            },
            TargetReference {
                project_id: "reporting".to_string(),
                dataset_id: "sales".to_string(),
                table_id: "orders".to_string(),
            },
            24,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn custom_mode_requires_fields() {
        let mut config = sample();
        config.schema_mode = SchemaMode::Custom;
        assert_eq!(config.validate(), Err(ValidationError::MissingSchemaDefinition));

        config.schema_definition = Some(Vec::new());
        assert_eq!(config.validate(), Err(ValidationError::MissingSchemaDefinition));

        config.schema_definition = Some(vec![SchemaField::new("order_id", "INTEGER")]);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn auto_detect_ignores_missing_fields() {
        assert_eq!(sample().validate(), Ok(()));
    }

    #[test]
    fn blank_name_is_rejected() {
        let mut config = sample();
        config.name = "  ".to_string();
        assert_eq!(config.validate(), Err(ValidationError::EmptyName));
    }

    #[test]
    fn schema_field_defaults_when_deserialized() {
        let field: SchemaField = serde_json::from_str(r#"{"name":"column1"}"#).unwrap();
        assert_eq!(field.field_type, "STRING");
        assert_eq!(field.mode, "NULLABLE");
    }
}

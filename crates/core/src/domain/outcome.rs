use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::entity::{EntityReference, EntityType};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Create => "created",
            Self::Update => "updated",
            Self::Delete => "deleted",
        }
    }
}

/// Result of a successful (2xx) create, update or delete.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MutationOutcome {
    pub operation: Operation,
    pub entity: EntityType,
    pub reference: EntityReference,
    pub fields: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub id: String,
    pub title: String,
    pub details: Vec<(String, String)>,
}

impl RecordSummary {
    /// Flattens a SOQL row into title plus the non-empty list columns.
    pub fn from_record(entity: EntityType, record: &Value) -> Self {
        let id = record.get("Id").and_then(Value::as_str).unwrap_or_default().to_owned();
        let title = entity.record_title(record);
        let title_fields: &[&str] = match entity {
            EntityType::Lead | EntityType::Contact => &["FirstName", "LastName", "Name"],
            EntityType::Opportunity | EntityType::Account => &["Name"],
            EntityType::Task | EntityType::Meeting => &["Subject"],
        };

        let details = entity
            .list_fields()
            .iter()
            .filter(|field| **field != "Id" && !title_fields.contains(*field))
            .filter_map(|field| {
                let value = match record.get(*field)? {
                    Value::Null => return None,
                    Value::String(text) if text.is_empty() => return None,
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                };
                Some(((*field).to_owned(), value))
            })
            .collect();

        Self { id, title, details }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPage {
    pub entity: EntityType,
    pub records: Vec<RecordSummary>,
}

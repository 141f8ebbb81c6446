use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ValidationError;

/// Salesforce record types the bot can manage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Lead,
    Opportunity,
    Account,
    Contact,
    Task,
    Meeting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Date,
    DateTime,
    RecordId,
}

/// Maps a planner parameter onto a Salesforce field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldSpec {
    pub parameter: &'static str,
    pub api_name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

const fn text(parameter: &'static str, api_name: &'static str) -> FieldSpec {
    FieldSpec { parameter, api_name, kind: FieldKind::Text, required: false }
}

const fn required(parameter: &'static str, api_name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { parameter, api_name, kind, required: true }
}

const fn typed(parameter: &'static str, api_name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { parameter, api_name, kind, required: false }
}

const LEAD_FIELDS: &[FieldSpec] = &[
    text("firstName", "FirstName"),
    required("lastName", "LastName", FieldKind::Text),
    required("company", "Company", FieldKind::Text),
    text("email", "Email"),
    text("phone", "Phone"),
    text("status", "Status"),
    text("title", "Title"),
    text("leadSource", "LeadSource"),
    text("industry", "Industry"),
    text("description", "Description"),
];

const OPPORTUNITY_FIELDS: &[FieldSpec] = &[
    required("name", "Name", FieldKind::Text),
    required("stageName", "StageName", FieldKind::Text),
    required("closeDate", "CloseDate", FieldKind::Date),
    typed("amount", "Amount", FieldKind::Number),
    typed("probability", "Probability", FieldKind::Number),
    typed("accountId", "AccountId", FieldKind::RecordId),
    text("nextStep", "NextStep"),
    text("leadSource", "LeadSource"),
    text("description", "Description"),
];

const ACCOUNT_FIELDS: &[FieldSpec] = &[
    required("name", "Name", FieldKind::Text),
    text("industry", "Industry"),
    text("phone", "Phone"),
    text("website", "Website"),
    text("type", "Type"),
    text("billingCity", "BillingCity"),
    typed("numberOfEmployees", "NumberOfEmployees", FieldKind::Number),
    text("description", "Description"),
];

const CONTACT_FIELDS: &[FieldSpec] = &[
    text("firstName", "FirstName"),
    required("lastName", "LastName", FieldKind::Text),
    text("email", "Email"),
    text("phone", "Phone"),
    text("title", "Title"),
    text("department", "Department"),
    typed("accountId", "AccountId", FieldKind::RecordId),
    text("description", "Description"),
];

const TASK_FIELDS: &[FieldSpec] = &[
    required("subject", "Subject", FieldKind::Text),
    text("status", "Status"),
    text("priority", "Priority"),
    typed("dueDate", "ActivityDate", FieldKind::Date),
    typed("whoId", "WhoId", FieldKind::RecordId),
    typed("whatId", "WhatId", FieldKind::RecordId),
    text("description", "Description"),
];

const MEETING_FIELDS: &[FieldSpec] = &[
    required("subject", "Subject", FieldKind::Text),
    required("startDateTime", "StartDateTime", FieldKind::DateTime),
    required("endDateTime", "EndDateTime", FieldKind::DateTime),
    text("location", "Location"),
    typed("whoId", "WhoId", FieldKind::RecordId),
    typed("whatId", "WhatId", FieldKind::RecordId),
    text("description", "Description"),
];

impl EntityType {
    pub const ALL: [EntityType; 6] = [
        EntityType::Lead,
        EntityType::Opportunity,
        EntityType::Account,
        EntityType::Contact,
        EntityType::Task,
        EntityType::Meeting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Opportunity => "opportunity",
            Self::Account => "account",
            Self::Contact => "contact",
            Self::Task => "task",
            Self::Meeting => "meeting",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Lead => "Lead",
            Self::Opportunity => "Opportunity",
            Self::Account => "Account",
            Self::Contact => "Contact",
            Self::Task => "Task",
            Self::Meeting => "Meeting",
        }
    }

    pub fn plural_label(self) -> &'static str {
        match self {
            Self::Lead => "Leads",
            Self::Opportunity => "Opportunities",
            Self::Account => "Accounts",
            Self::Contact => "Contacts",
            Self::Task => "Tasks",
            Self::Meeting => "Meetings",
        }
    }

    pub fn sobject(self) -> &'static str {
        match self {
            Self::Lead => "Lead",
            Self::Opportunity => "Opportunity",
            Self::Account => "Account",
            Self::Contact => "Contact",
            Self::Task => "Task",
            Self::Meeting => "Event",
        }
    }

    /// Field matched by partial-name lookups.
    pub fn search_field(self) -> &'static str {
        match self {
            Self::Lead | Self::Opportunity | Self::Account | Self::Contact => "Name",
            Self::Task | Self::Meeting => "Subject",
        }
    }

    pub fn list_fields(self) -> &'static [&'static str] {
        match self {
            Self::Lead => &["Id", "FirstName", "LastName", "Company", "Status", "Email", "Phone"],
            Self::Opportunity => &["Id", "Name", "StageName", "CloseDate", "Amount"],
            Self::Account => &["Id", "Name", "Industry", "Phone", "Website"],
            Self::Contact => &["Id", "FirstName", "LastName", "Email", "Phone", "Title"],
            Self::Task => &["Id", "Subject", "Status", "Priority", "ActivityDate"],
            Self::Meeting => &["Id", "Subject", "StartDateTime", "EndDateTime", "Location"],
        }
    }

    pub fn fields(self) -> &'static [FieldSpec] {
        match self {
            Self::Lead => LEAD_FIELDS,
            Self::Opportunity => OPPORTUNITY_FIELDS,
            Self::Account => ACCOUNT_FIELDS,
            Self::Contact => CONTACT_FIELDS,
            Self::Task => TASK_FIELDS,
            Self::Meeting => MEETING_FIELDS,
        }
    }

    /// Values Salesforce requires on insert that users rarely say out loud.
    pub fn create_defaults(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Self::Task => &[("Status", "Not Started"), ("Priority", "Normal")],
            _ => &[],
        }
    }

    /// Planner parameter holding a record id, e.g. `leadId`.
    pub fn id_parameter(self) -> &'static str {
        match self {
            Self::Lead => "leadId",
            Self::Opportunity => "opportunityId",
            Self::Account => "accountId",
            Self::Contact => "contactId",
            Self::Task => "taskId",
            Self::Meeting => "meetingId",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let singular = normalized.strip_suffix('s').unwrap_or(&normalized);
        match singular {
            "lead" => Some(Self::Lead),
            "opportunity" | "opportunitie" | "opp" | "deal" => Some(Self::Opportunity),
            "account" | "company" | "companie" => Some(Self::Account),
            "contact" => Some(Self::Contact),
            "task" | "todo" => Some(Self::Task),
            "meeting" | "event" => Some(Self::Meeting),
            _ => None,
        }
    }

    pub fn from_sobject(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|entity| entity.sobject().eq_ignore_ascii_case(value))
    }

    /// Human-readable title of a record returned by a SOQL query.
    pub fn record_title(self, record: &Value) -> String {
        let field = |name: &str| record.get(name).and_then(Value::as_str).unwrap_or_default();
        let title = match self {
            Self::Lead | Self::Contact => {
                let joined = format!("{} {}", field("FirstName"), field("LastName"));
                if joined.trim().is_empty() {
                    field("Name").to_owned()
                } else {
                    joined.trim().to_owned()
                }
            }
            Self::Opportunity | Self::Account => field("Name").to_owned(),
            Self::Task | Self::Meeting => field("Subject").to_owned(),
        };
        if title.is_empty() {
            "(untitled)".to_owned()
        } else {
            title
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A CRM record identity resolved from an id or a name fragment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityReference {
    pub id: String,
    pub display_name: String,
}

impl EntityReference {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self { id: id.into(), display_name: display_name.into() }
    }
}

/// Validated Salesforce field values, keyed by API name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldSet {
    values: BTreeMap<String, Value>,
}

impl FieldSet {
    pub fn for_create(
        entity: EntityType,
        parameters: &Map<String, Value>,
    ) -> Result<Self, ValidationError> {
        let mut set = Self::collect(entity, parameters)?;
        for (api_name, value) in entity.create_defaults() {
            set.values.entry((*api_name).to_owned()).or_insert_with(|| Value::from(*value));
        }

        let missing: Vec<String> = entity
            .fields()
            .iter()
            .filter(|spec| spec.required && !set.values.contains_key(spec.api_name))
            .map(|spec| spec.parameter.to_owned())
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingFields { entity, fields: missing });
        }

        Ok(set)
    }

    pub fn for_update(
        entity: EntityType,
        parameters: &Map<String, Value>,
    ) -> Result<Self, ValidationError> {
        let set = Self::collect(entity, parameters)?;
        if set.values.is_empty() {
            return Err(ValidationError::NoUpdateFields { entity });
        }
        Ok(set)
    }

    /// Keeps known fields, accepting either the planner name or the API name.
    /// Blank and null values count as absent.
    fn collect(entity: EntityType, parameters: &Map<String, Value>) -> Result<Self, ValidationError> {
        let mut values = BTreeMap::new();
        for spec in entity.fields() {
            let raw = parameters.iter().find_map(|(key, value)| {
                (key.eq_ignore_ascii_case(spec.parameter) || key == spec.api_name).then_some(value)
            });
            let Some(raw) = raw else { continue };
            if let Some(value) = normalize_value(spec, raw)? {
                values.insert(spec.api_name.to_owned(), value);
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, api_name: &str) -> Option<&Value> {
        self.values.get(api_name)
    }

    pub fn insert(&mut self, api_name: impl Into<String>, value: Value) {
        self.values.insert(api_name.into(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.values.keys().cloned().collect()
    }

    pub fn to_json(&self) -> Value {
        Value::Object(self.values.clone().into_iter().collect())
    }
}

fn normalize_value(spec: &FieldSpec, raw: &Value) -> Result<Option<Value>, ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidField {
        field: spec.parameter.to_owned(),
        reason: reason.to_owned(),
    };

    match raw {
        Value::Null => Ok(None),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => {
            let text = text.trim();
            match spec.kind {
                FieldKind::Text | FieldKind::RecordId => Ok(Some(Value::from(text))),
                FieldKind::Number => text
                    .replace([',', '$'], "")
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(|number| Some(Value::Number(number)))
                    .ok_or_else(|| invalid("expected a number")),
                FieldKind::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
                    .map(|_| Some(Value::from(text)))
                    .map_err(|_| invalid("expected a date like 2026-03-31")),
                FieldKind::DateTime => DateTime::parse_from_rfc3339(text)
                    .map(|_| Some(Value::from(text)))
                    .map_err(|_| invalid("expected an ISO-8601 timestamp like 2026-03-31T15:00:00Z")),
            }
        }
        Value::Number(_) if spec.kind == FieldKind::Number => Ok(Some(raw.clone())),
        Value::Number(number) if spec.kind == FieldKind::Text => {
            Ok(Some(Value::from(number.to_string())))
        }
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => {
            Err(invalid("unsupported value type"))
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{EntityType, FieldSet};
    use crate::errors::ValidationError;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn create_reports_every_missing_required_field() {
        let error = FieldSet::for_create(EntityType::Opportunity, &params(json!({"name": "Q3"})))
            .expect_err("stage and close date are missing");

        assert_eq!(
            error,
            ValidationError::MissingFields {
                entity: EntityType::Opportunity,
                fields: vec!["stageName".to_owned(), "closeDate".to_owned()],
            }
        );
    }

    #[test]
    fn create_maps_parameters_to_api_names_and_applies_defaults() {
        let fields = FieldSet::for_create(
            EntityType::Task,
            &params(json!({"subject": "Call back", "DueDate": "2026-04-01", "unknown": "x"})),
        )
        .expect("valid task");

        assert_eq!(fields.get("Subject"), Some(&json!("Call back")));
        assert_eq!(fields.get("ActivityDate"), Some(&json!("2026-04-01")));
        assert_eq!(fields.get("Status"), Some(&json!("Not Started")));
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn blank_values_count_as_missing() {
        let error = FieldSet::for_create(
            EntityType::Lead,
            &params(json!({"lastName": "Ng", "company": "  "})),
        )
        .expect_err("company is blank");

        assert!(matches!(
            error,
            ValidationError::MissingFields { ref fields, .. } if fields == &["company".to_owned()]
        ));
    }

    #[test]
    fn update_without_fields_is_rejected() {
        let error = FieldSet::for_update(EntityType::Lead, &params(json!({"leadId": "00Q1"})))
            .expect_err("id alone is not an update");
        assert_eq!(error, ValidationError::NoUpdateFields { entity: EntityType::Lead });
    }

    #[test]
    fn invalid_dates_and_numbers_fail_before_any_call() {
        let bad_date = FieldSet::for_update(
            EntityType::Opportunity,
            &params(json!({"closeDate": "next friday"})),
        );
        assert!(matches!(bad_date, Err(ValidationError::InvalidField { ref field, .. }) if field == "closeDate"));

        let amount = FieldSet::for_update(EntityType::Opportunity, &params(json!({"amount": "$12,500"})))
            .expect("currency text parses");
        assert_eq!(amount.get("Amount").and_then(Value::as_f64), Some(12500.0));
    }

    #[test]
    fn entity_aliases_and_sobjects() {
        assert_eq!(EntityType::parse("Deals"), Some(EntityType::Opportunity));
        assert_eq!(EntityType::parse("opportunities"), Some(EntityType::Opportunity));
        assert_eq!(EntityType::parse("events"), Some(EntityType::Meeting));
        assert_eq!(EntityType::Meeting.sobject(), "Event");
        assert_eq!(EntityType::from_sobject("event"), Some(EntityType::Meeting));
    }

    #[test]
    fn record_title_prefers_person_name() {
        let lead = json!({"Id": "00Q1", "FirstName": "Ada", "LastName": "Lovelace"});
        assert_eq!(EntityType::Lead.record_title(&lead), "Ada Lovelace");
        let task = json!({"Id": "00T1"});
        assert_eq!(EntityType::Task.record_title(&task), "(untitled)");
    }
}

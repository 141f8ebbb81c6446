//! Turns a received Outlook message into create parameters for a CRM record.

use serde_json::{Map, Value};

use teamsforce_core::conversation::ConversationState;
use teamsforce_core::domain::email::EmailMessage;
use teamsforce_core::domain::entity::EntityType;
use teamsforce_core::errors::ValidationError;

use crate::actions::string_param;

/// Where the user pointed at the email to use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EmailSelector {
    /// One-based position in the last email listing.
    Position(usize),
    MessageId(String),
}

impl EmailSelector {
    pub fn from_parameters(parameters: &Map<String, Value>) -> Result<Self, ValidationError> {
        if let Some(id) = string_param(parameters, "messageId") {
            return Ok(Self::MessageId(id));
        }
        let raw = string_param(parameters, "emailIndex").ok_or_else(|| {
            ValidationError::NotAllowed(
                "Tell me which email to use, e.g. \"email 2\" from your recent emails.".to_owned(),
            )
        })?;
        raw.trim_start_matches('#').parse::<usize>().map(Self::Position).map_err(|_| {
            ValidationError::InvalidField {
                field: "emailIndex".to_owned(),
                reason: "expected the email's number in the list".to_owned(),
            }
        })
    }

    /// Finds the email in the chat's last listing.
    pub fn find_cached<'a>(&self, state: &'a ConversationState) -> Option<&'a EmailMessage> {
        match self {
            Self::Position(position) => state.email_at(*position),
            Self::MessageId(id) => state.email_by_id(id),
        }
    }
}

/// Create parameters derived from `email`; explicit `overrides` win.
pub fn email_parameters(
    entity: EntityType,
    email: &EmailMessage,
    overrides: &Map<String, Value>,
) -> Map<String, Value> {
    let mut derived = Map::new();
    let mut put = |key: &str, value: Option<String>| {
        if let Some(value) = value.filter(|value| !value.trim().is_empty()) {
            derived.insert(key.to_owned(), Value::String(value));
        }
    };

    let (first_name, last_name) = email.sender_name_parts();
    match entity {
        EntityType::Lead => {
            put("firstName", first_name);
            put("lastName", last_name);
            put("email", email.from_address.clone());
            put("company", email.sender_company());
            put("leadSource", Some("Email".to_owned()));
            put("description", Some(email_summary(email)));
        }
        EntityType::Contact => {
            put("firstName", first_name);
            put("lastName", last_name);
            put("email", email.from_address.clone());
            put("description", Some(email_summary(email)));
        }
        EntityType::Task | EntityType::Meeting => {
            put("subject", Some(email.subject.clone()));
            put("description", Some(email.body_preview.clone()));
        }
        EntityType::Opportunity | EntityType::Account => {}
    }

    for (key, value) in overrides {
        if matches!(key.as_str(), "emailIndex" | "messageId") || is_blank(value) {
            continue;
        }
        derived.insert(key.clone(), value.clone());
    }
    derived
}

/// Empty overrides must not erase a value taken from the email.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn email_summary(email: &EmailMessage) -> String {
    let mut summary = format!("From email: {}", email.subject);
    if !email.body_preview.trim().is_empty() {
        summary.push_str("\n\n");
        summary.push_str(email.body_preview.trim());
    }
    summary
}

//! The action catalog the planner chooses from.

use serde_json::{Map, Value};

use teamsforce_core::domain::entity::EntityType;
use teamsforce_core::domain::outcome::Operation;
use teamsforce_core::domain::token::Provider;
use teamsforce_core::errors::ValidationError;

/// Entity types a received email can be turned into.
pub const EMAIL_TARGETS: [EntityType; 4] =
    [EntityType::Lead, EntityType::Contact, EntityType::Task, EntityType::Meeting];

#[derive(Clone, Debug, PartialEq)]
pub enum AgentAction {
    Mutate { operation: Operation, entity: EntityType, parameters: Map<String, Value> },
    List { entity: EntityType, limit: Option<u32> },
    RecentEmails { limit: Option<u32> },
    CreateFromEmail { entity: EntityType, parameters: Map<String, Value> },
    Login(Provider),
    Logout(Vec<Provider>),
    Help,
    Reply(String),
}

impl AgentAction {
    /// Builds an action from a catalog name such as `DeleteSalesforceAccount`.
    pub fn from_plan(name: &str, parameters: Map<String, Value>) -> Result<Self, ValidationError> {
        let name = name.trim();
        match name {
            "Reply" => {
                let text = string_param(&parameters, "text").unwrap_or_default();
                return Ok(Self::Reply(text));
            }
            "Help" => return Ok(Self::Help),
            "GetRecentEmails" => {
                return Ok(Self::RecentEmails { limit: limit_param(&parameters)? });
            }
            "Login" => {
                let provider = string_param(&parameters, "provider")
                    .and_then(|raw| Provider::parse(&raw))
                    .unwrap_or(Provider::Salesforce);
                return Ok(Self::Login(provider));
            }
            "Logout" => {
                let providers = match string_param(&parameters, "provider") {
                    Some(raw) => vec![Provider::parse(&raw)
                        .ok_or_else(|| ValidationError::NotAllowed(format!("unknown provider `{raw}`")))?],
                    None => Provider::ALL.to_vec(),
                };
                return Ok(Self::Logout(providers));
            }
            _ => {}
        }

        let unknown = || ValidationError::UnknownEntity(name.to_owned());
        let (verb, rest) = ["Create", "Update", "Delete", "Get"]
            .into_iter()
            .find_map(|verb| name.strip_prefix(verb).map(|rest| (verb, rest)))
            .ok_or_else(unknown)?;
        let rest = rest.strip_prefix("Salesforce").ok_or_else(unknown)?;

        if verb == "Create" {
            if let Some(target) = rest.strip_suffix("FromEmail") {
                let entity = EntityType::parse(target).ok_or_else(unknown)?;
                if !EMAIL_TARGETS.contains(&entity) {
                    return Err(ValidationError::NotAllowed(format!(
                        "a {} cannot be created from an email",
                        entity.label()
                    )));
                }
                return Ok(Self::CreateFromEmail { entity, parameters });
            }
        }

        let entity = EntityType::parse(rest).ok_or_else(unknown)?;
        let operation = match verb {
            "Create" => Operation::Create,
            "Update" => Operation::Update,
            "Delete" => Operation::Delete,
            _ => return Ok(Self::List { entity, limit: limit_param(&parameters)? }),
        };
        Ok(Self::Mutate { operation, entity, parameters })
    }

    /// Stable name used in logs and audit events.
    pub fn name(&self) -> String {
        match self {
            Self::Mutate { operation, entity, .. } => {
                let verb = match operation {
                    Operation::Create => "Create",
                    Operation::Update => "Update",
                    Operation::Delete => "Delete",
                };
                format!("{verb}Salesforce{}", entity.label())
            }
            Self::List { entity, .. } => format!("GetSalesforce{}", entity.plural_label()),
            Self::RecentEmails { .. } => "GetRecentEmails".to_owned(),
            Self::CreateFromEmail { entity, .. } => format!("CreateSalesforce{}FromEmail", entity.label()),
            Self::Login(_) => "Login".to_owned(),
            Self::Logout(_) => "Logout".to_owned(),
            Self::Help => "Help".to_owned(),
            Self::Reply(_) => "Reply".to_owned(),
        }
    }

    pub fn provider(&self) -> Option<Provider> {
        match self {
            Self::Mutate { .. } | Self::List { .. } | Self::CreateFromEmail { .. } => {
                Some(Provider::Salesforce)
            }
            Self::RecentEmails { .. } => Some(Provider::Outlook),
            Self::Login(provider) => Some(*provider),
            Self::Logout(_) | Self::Help | Self::Reply(_) => None,
        }
    }
}

/// Slash commands handled without the planner.
pub fn parse_command(text: &str) -> Option<AgentAction> {
    let mut words = text.trim().split_whitespace();
    let command = words.next()?.to_ascii_lowercase();
    match command.as_str() {
        "/salesforce" | "/login" => Some(AgentAction::Login(Provider::Salesforce)),
        "/outlook" => Some(AgentAction::Login(Provider::Outlook)),
        "/help" => Some(AgentAction::Help),
        "/logout" => Some(AgentAction::Logout(match words.next().and_then(Provider::parse) {
            Some(provider) => vec![provider],
            None => Provider::ALL.to_vec(),
        })),
        _ => None,
    }
}

pub(crate) fn string_param(parameters: &Map<String, Value>, key: &str) -> Option<String> {
    parameters
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(key))
        .and_then(|(_, value)| match value {
            Value::String(text) => Some(text.trim().to_owned()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
        .filter(|text| !text.is_empty())
}

fn limit_param(parameters: &Map<String, Value>) -> Result<Option<u32>, ValidationError> {
    let Some(raw) = string_param(parameters, "limit") else { return Ok(None) };
    raw.parse::<u32>().map(Some).map_err(|_| ValidationError::InvalidField {
        field: "limit".to_owned(),
        reason: "expected a whole number".to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{parse_command, AgentAction};
    use teamsforce_core::domain::entity::EntityType;
    use teamsforce_core::domain::outcome::Operation;
    use teamsforce_core::domain::token::Provider;
    use teamsforce_core::errors::ValidationError;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn catalog_names_map_to_actions() {
        let delete = AgentAction::from_plan("DeleteSalesforceAccount", params(json!({"identifier": "Acme"})))
            .expect("delete");
        assert!(matches!(
            delete,
            AgentAction::Mutate { operation: Operation::Delete, entity: EntityType::Account, .. }
        ));

        let list = AgentAction::from_plan("GetSalesforceOpportunities", params(json!({"limit": 5})))
            .expect("list");
        assert_eq!(list, AgentAction::List { entity: EntityType::Opportunity, limit: Some(5) });
        assert_eq!(list.name(), "GetSalesforceOpportunities");

        let meeting = AgentAction::from_plan("CreateSalesforceMeetingFromEmail", Map::new())
            .expect("from email");
        assert!(matches!(meeting, AgentAction::CreateFromEmail { entity: EntityType::Meeting, .. }));
    }

    #[test]
    fn unknown_names_and_targets_are_rejected() {
        assert_eq!(
            AgentAction::from_plan("ArchiveSalesforceLead", Map::new()),
            Err(ValidationError::UnknownEntity("ArchiveSalesforceLead".to_owned()))
        );
        assert!(matches!(
            AgentAction::from_plan("CreateSalesforceAccountFromEmail", Map::new()),
            Err(ValidationError::NotAllowed(_))
        ));
        assert!(matches!(
            AgentAction::from_plan("GetRecentEmails", params(json!({"limit": "lots"}))),
            Err(ValidationError::InvalidField { .. })
        ));
    }

    #[test]
    fn slash_commands_skip_the_planner() {
        assert_eq!(parse_command("/outlook"), Some(AgentAction::Login(Provider::Outlook)));
        assert_eq!(
            parse_command("/logout salesforce"),
            Some(AgentAction::Logout(vec![Provider::Salesforce]))
        );
        assert_eq!(parse_command("/logout"), Some(AgentAction::Logout(Provider::ALL.to_vec())));
        assert_eq!(parse_command("show my leads"), None);
    }
}

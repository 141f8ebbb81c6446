use teamsforce_core::config::GuardrailConfig;
use teamsforce_core::domain::outcome::Operation;

use crate::actions::AgentAction;

/// Emails fetched per listing when the user gives no count.
pub const DEFAULT_EMAIL_LIMIT: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String, fallback_path: &'static str },
    Degrade { reason_code: &'static str, user_message: String, fallback_path: &'static str },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub deletes_enabled: bool,
    pub default_list_limit: u32,
    pub max_list_limit: u32,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { deletes_enabled: true, default_list_limit: 20, max_list_limit: 200 }
    }
}

impl From<&GuardrailConfig> for GuardrailPolicy {
    fn from(config: &GuardrailConfig) -> Self {
        Self {
            deletes_enabled: config.deletes_enabled,
            default_list_limit: config.default_list_limit,
            max_list_limit: config.max_list_limit,
        }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, action: &AgentAction) -> GuardrailDecision {
        match action {
            AgentAction::Mutate { operation: Operation::Delete, .. } if !self.deletes_enabled => {
                GuardrailDecision::Deny {
                    reason_code: "delete_disabled",
                    user_message: "Deleting records from chat is turned off for this workspace. \
                                   Please delete it in Salesforce directly."
                        .to_string(),
                    fallback_path: "salesforce_ui",
                }
            }
            AgentAction::List { limit: Some(limit), entity } if *limit > self.max_list_limit => {
                GuardrailDecision::Degrade {
                    reason_code: "list_limit_clamped",
                    user_message: format!(
                        "I can show at most {} {} at a time.",
                        self.max_list_limit,
                        entity.plural_label().to_lowercase()
                    ),
                    fallback_path: "clamped_listing",
                }
            }
            _ => GuardrailDecision::Allow,
        }
    }

    /// Requested listing size, defaulted and clamped to `1..=max_list_limit`.
    pub fn list_limit(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default_list_limit).clamp(1, self.max_list_limit.max(1))
    }
}

//! Turns a chat message into an [`AgentAction`] with the LLM.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tera::{Context, Tera};
use tracing::warn;

use teamsforce_core::conversation::ConversationState;
use teamsforce_core::domain::entity::EntityType;
use teamsforce_core::errors::ValidationError;

use crate::actions::{AgentAction, EMAIL_TARGETS};
use crate::llm::LlmClient;

const PLANNER_TEMPLATE: &str = "planner.tera";
const PLANNER_UNAVAILABLE: &str =
    "I couldn't work out what to do just now. Try again, or type /help to see what I can do.";

#[derive(Debug, thiserror::Error)]
#[error("planner prompt failed: {0}")]
pub struct PromptError(#[from] tera::Error);

#[derive(Serialize)]
struct EntityCatalog {
    label: &'static str,
    plural: &'static str,
    id_parameter: &'static str,
    search_field: &'static str,
    required: Vec<&'static str>,
    optional: Vec<&'static str>,
}

#[derive(Serialize)]
struct RecordLine {
    id: String,
    title: String,
}

#[derive(Serialize)]
struct ListedRecords {
    plural: &'static str,
    records: Vec<RecordLine>,
}

#[derive(Serialize)]
struct LastRecord {
    entity: &'static str,
    id: String,
    title: String,
}

#[derive(Serialize)]
struct EmailLine {
    id: String,
    subject: String,
    from: String,
}

#[derive(Deserialize)]
struct PlanOutput {
    action: String,
    #[serde(default)]
    parameters: Map<String, Value>,
}

pub struct Planner {
    llm: Arc<dyn LlmClient>,
    tera: Tera,
    outlook_enabled: bool,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>, outlook_enabled: bool) -> Result<Self, PromptError> {
        let mut tera = Tera::default();
        tera.add_raw_template(
            PLANNER_TEMPLATE,
            include_str!("../../../templates/prompts/planner.tera"),
        )?;
        Ok(Self { llm, tera, outlook_enabled })
    }

    pub fn system_prompt(
        &self,
        state: &ConversationState,
        today: NaiveDate,
    ) -> Result<String, PromptError> {
        let entities: Vec<EntityCatalog> = EntityType::ALL
            .into_iter()
            .map(|entity| EntityCatalog {
                label: entity.label(),
                plural: entity.plural_label(),
                id_parameter: entity.id_parameter(),
                search_field: entity.search_field(),
                required: entity
                    .fields()
                    .iter()
                    .filter(|spec| spec.required)
                    .map(|spec| spec.parameter)
                    .collect(),
                optional: entity
                    .fields()
                    .iter()
                    .filter(|spec| !spec.required)
                    .map(|spec| spec.parameter)
                    .collect(),
            })
            .collect();

        let last_records = state.last_records.as_ref().map(|page| ListedRecords {
            plural: page.entity.plural_label(),
            records: page
                .records
                .iter()
                .map(|record| RecordLine { id: record.id.clone(), title: record.title.clone() })
                .collect(),
        });
        let last_record = state.last_record.as_ref().map(|recent| LastRecord {
            entity: recent.entity.label(),
            id: recent.reference.id.clone(),
            title: recent.reference.display_name.clone(),
        });
        let recent_emails: Vec<EmailLine> = state
            .recent_emails
            .iter()
            .map(|email| EmailLine {
                id: email.id.clone(),
                subject: email.subject.clone(),
                from: email
                    .from_name
                    .clone()
                    .or_else(|| email.from_address.clone())
                    .unwrap_or_else(|| "unknown sender".to_owned()),
            })
            .collect();

        let mut context = Context::new();
        context.insert("today", &today.format("%Y-%m-%d").to_string());
        context.insert("user_name", &state.user_name);
        context.insert("entities", &entities);
        context.insert("outlook_enabled", &self.outlook_enabled);
        context.insert(
            "email_targets",
            &EMAIL_TARGETS.iter().map(|entity| entity.label()).collect::<Vec<_>>(),
        );
        context.insert("salesforce_connected", &state.salesforce_authenticated);
        context.insert("outlook_connected", &state.outlook_authenticated);
        context.insert("last_record", &last_record);
        context.insert("last_records", &last_records);
        context.insert("recent_emails", &recent_emails);

        Ok(self.tera.render(PLANNER_TEMPLATE, &context)?)
    }

    /// Asks the model for the next action. Model failures become a plain reply.
    pub async fn plan(
        &self,
        text: &str,
        state: &ConversationState,
        today: NaiveDate,
    ) -> Result<AgentAction, ValidationError> {
        let system = match self.system_prompt(state, today) {
            Ok(system) => system,
            Err(error) => {
                warn!(event_name = "agent.planner.prompt_failed", error = %error, "prompt render failed");
                return Ok(AgentAction::Reply(PLANNER_UNAVAILABLE.to_owned()));
            }
        };

        let raw = match self.llm.complete(&system, text).await {
            Ok(raw) => raw,
            Err(error) => {
                warn!(event_name = "agent.planner.llm_failed", error = %error, "llm call failed");
                return Ok(AgentAction::Reply(PLANNER_UNAVAILABLE.to_owned()));
            }
        };

        match parse_plan(&raw) {
            Some(plan) => AgentAction::from_plan(&plan.action, plan.parameters),
            None => Ok(AgentAction::Reply(raw.trim().to_owned())),
        }
    }
}

/// Extracts the JSON object from model output, tolerating code fences and chatter.
fn parse_plan(raw: &str) -> Option<PlanOutput> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&raw[start..=end]).ok()
}

//! Record operations run as `validate → resolve → call → format → update state`.
//!
//! Field values are validated and mapped before any network call, and each
//! CRM write is a single request, so a failed turn never leaves a partial
//! record behind.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use teamsforce_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use teamsforce_core::conversation::{ConversationState, PendingChoice, RecentRecord};
use teamsforce_core::domain::email::EmailMessage;
use teamsforce_core::domain::entity::{EntityReference, EntityType, FieldSet};
use teamsforce_core::domain::outcome::{MutationOutcome, Operation, RecordPage};
use teamsforce_core::domain::token::{ChatId, Provider};
use teamsforce_core::errors::{CrmError, ValidationError};
use teamsforce_crm::{CrmServices, GraphClient};

use crate::actions::string_param;
use crate::email::{email_parameters, EmailSelector};
use crate::guardrails::{GuardrailPolicy, DEFAULT_EMAIL_LIMIT};

/// Parameters naming the record to act on when no id is given.
const UPDATE_TARGET_PARAMETERS: &[&str] = &["identifier", "search"];
const DELETE_TARGET_PARAMETERS: &[&str] = &["identifier", "search", "name", "subject"];

/// Who is asking, for logs and audit events.
#[derive(Clone, Debug)]
pub struct Turn {
    pub chat_id: ChatId,
    pub correlation_id: String,
    pub actor: String,
}

pub struct ActionHandlers {
    services: CrmServices,
    guardrails: GuardrailPolicy,
    audit: Arc<dyn AuditSink>,
}

impl ActionHandlers {
    pub fn new(services: CrmServices, guardrails: GuardrailPolicy, audit: Arc<dyn AuditSink>) -> Self {
        Self { services, guardrails, audit }
    }

    pub fn services(&self) -> &CrmServices {
        &self.services
    }

    pub fn guardrails(&self) -> &GuardrailPolicy {
        &self.guardrails
    }

    /// Runs a create, update or delete. Ambiguous lookups are parked in
    /// `state.pending_choice` so the user can answer with a number.
    pub async fn mutate(
        &self,
        turn: &Turn,
        state: &mut ConversationState,
        operation: Operation,
        entity: EntityType,
        parameters: &Map<String, Value>,
    ) -> Result<MutationOutcome, CrmError> {
        let result = match operation {
            Operation::Create => self.create(turn, entity, parameters).await,
            Operation::Update => self.update(turn, entity, parameters).await,
            Operation::Delete => self.delete(turn, entity, parameters).await,
        };

        match &result {
            Ok(outcome) => {
                state.set_authenticated(Provider::Salesforce, true);
                state.pending_choice = None;
                state.last_record = match outcome.operation {
                    Operation::Delete => state
                        .last_record
                        .take()
                        .filter(|recent| recent.reference.id != outcome.reference.id),
                    Operation::Create | Operation::Update => Some(RecentRecord {
                        entity,
                        reference: outcome.reference.clone(),
                    }),
                };
                self.audit_mutation(turn, outcome);
            }
            Err(CrmError::AmbiguousMatch { entity: matched, fragment, candidates }) => {
                state.pending_choice = Some(PendingChoice {
                    entity: *matched,
                    operation: Some(operation),
                    fragment: fragment.clone(),
                    candidates: candidates.clone(),
                    parameters: parameters.clone(),
                });
            }
            Err(error) if operation != Operation::Create => {
                self.audit.emit(
                    AuditEvent::new(
                        Some(turn.chat_id.clone()),
                        turn.correlation_id.clone(),
                        format!("crm.record.{}_failed", operation.as_str()),
                        AuditCategory::Crm,
                        turn.actor.clone(),
                        AuditOutcome::Failed,
                    )
                    .with_metadata("entity", entity.as_str())
                    .with_metadata("error_kind", error.kind()),
                );
            }
            Err(_) => {}
        }
        result
    }

    async fn create(
        &self,
        turn: &Turn,
        entity: EntityType,
        parameters: &Map<String, Value>,
    ) -> Result<MutationOutcome, CrmError> {
        let fields = FieldSet::for_create(entity, parameters)?;
        self.services.salesforce.create(&turn.chat_id, entity, &fields).await
    }

    async fn update(
        &self,
        turn: &Turn,
        entity: EntityType,
        parameters: &Map<String, Value>,
    ) -> Result<MutationOutcome, CrmError> {
        let fields = FieldSet::for_update(entity, parameters)?;
        let target = self.target(turn, entity, parameters, UPDATE_TARGET_PARAMETERS).await?;
        self.services.salesforce.update(&turn.chat_id, entity, &target, &fields).await
    }

    async fn delete(
        &self,
        turn: &Turn,
        entity: EntityType,
        parameters: &Map<String, Value>,
    ) -> Result<MutationOutcome, CrmError> {
        let target = self.target(turn, entity, parameters, DELETE_TARGET_PARAMETERS).await?;
        self.services.salesforce.delete(&turn.chat_id, entity, &target).await
    }

    async fn target(
        &self,
        turn: &Turn,
        entity: EntityType,
        parameters: &Map<String, Value>,
        fragment_keys: &[&str],
    ) -> Result<EntityReference, CrmError> {
        let id = string_param(parameters, entity.id_parameter())
            .or_else(|| string_param(parameters, "id"));
        let fragment = fragment_keys.iter().find_map(|key| string_param(parameters, key));
        self.services
            .resolver
            .resolve_target(&turn.chat_id, entity, id.as_deref(), fragment.as_deref())
            .await
    }

    pub async fn list(
        &self,
        turn: &Turn,
        state: &mut ConversationState,
        entity: EntityType,
        requested: Option<u32>,
    ) -> Result<RecordPage, CrmError> {
        let limit = self.guardrails.list_limit(requested);
        let page = self.services.salesforce.list_recent(&turn.chat_id, entity, limit).await?;

        info!(
            event_name = "agent.records.listed",
            correlation_id = %turn.correlation_id,
            chat_id = %turn.chat_id,
            entity = entity.as_str(),
            count = page.records.len(),
            "records listed"
        );
        state.set_authenticated(Provider::Salesforce, true);
        state.last_records = Some(page.clone());
        Ok(page)
    }

    pub async fn recent_emails(
        &self,
        turn: &Turn,
        state: &mut ConversationState,
        requested: Option<u32>,
    ) -> Result<Vec<EmailMessage>, CrmError> {
        let graph = self.graph()?;
        let emails = graph
            .recent_messages(&turn.chat_id, requested.unwrap_or(DEFAULT_EMAIL_LIMIT))
            .await?;

        state.set_authenticated(Provider::Outlook, true);
        state.recent_emails = emails.clone();
        Ok(emails)
    }

    /// Creates `entity` from an email picked by position or message id.
    pub async fn create_from_email(
        &self,
        turn: &Turn,
        state: &mut ConversationState,
        entity: EntityType,
        parameters: &Map<String, Value>,
    ) -> Result<MutationOutcome, CrmError> {
        let selector = EmailSelector::from_parameters(parameters)?;
        let email = match (selector.find_cached(state), &selector) {
            (Some(email), _) => email.clone(),
            (None, EmailSelector::MessageId(id)) => {
                let email = self.graph()?.message(&turn.chat_id, id).await?;
                state.set_authenticated(Provider::Outlook, true);
                email
            }
            (None, EmailSelector::Position(position)) => {
                return Err(ValidationError::NotAllowed(if state.recent_emails.is_empty() {
                    "List your recent emails first, then tell me which one to use.".to_owned()
                } else {
                    format!(
                        "There is no email {position}; the last list had {}.",
                        state.recent_emails.len()
                    )
                })
                .into());
            }
        };

        let derived = email_parameters(entity, &email, parameters);
        self.mutate(turn, state, Operation::Create, entity, &derived).await
    }

    pub fn outlook_enabled(&self) -> bool {
        self.services.graph.is_some()
    }

    fn graph(&self) -> Result<&Arc<GraphClient>, CrmError> {
        self.services.graph.as_ref().ok_or_else(|| {
            ValidationError::NotAllowed("Outlook is not enabled for this bot.".to_owned()).into()
        })
    }

    fn audit_mutation(&self, turn: &Turn, outcome: &MutationOutcome) {
        self.audit.emit(
            AuditEvent::new(
                Some(turn.chat_id.clone()),
                turn.correlation_id.clone(),
                format!("crm.record.{}", outcome.operation.past_tense()),
                AuditCategory::Crm,
                turn.actor.clone(),
                AuditOutcome::Success,
            )
            .with_metadata("entity", outcome.entity.as_str())
            .with_metadata("record_id", outcome.reference.id.clone()),
        );
    }
}

/// Parameters for replaying an interrupted action against the chosen record.
pub fn replay_parameters(choice: &PendingChoice, picked: &EntityReference) -> Map<String, Value> {
    let mut parameters = choice.parameters.clone();
    for key in DELETE_TARGET_PARAMETERS {
        if choice.operation == Some(Operation::Update) && matches!(*key, "name" | "subject") {
            continue;
        }
        parameters.remove(*key);
    }
    parameters.insert(choice.entity.id_parameter().to_owned(), Value::String(picked.id.clone()));
    parameters
}

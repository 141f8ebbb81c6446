use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use teamsforce_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use teamsforce_core::conversation::{ConversationState, SessionStore};
use teamsforce_core::domain::entity::EntityReference;
use teamsforce_core::domain::token::Provider;
use teamsforce_core::errors::{AuthFailure, CrmError, ValidationError};
use teamsforce_teams::cards::{
    ambiguous_match_message, email_list_message, error_message, help_message, logged_out_message,
    mutation_message, not_found_message, record_page_message,
};
use teamsforce_teams::{
    Activity, ActivityHandler, ActivityHandlerError, ActivityKind, HandlerResult, ReplyMessage,
    TurnContext,
};

use crate::actions::{parse_command, AgentAction};
use crate::guardrails::GuardrailDecision;
use crate::handlers::{replay_parameters, ActionHandlers, Turn};
use crate::login::LoginService;
use crate::planner::Planner;

const EMPTY_MESSAGE_REPLY: &str = "Send me a message, or type /help to see what I can do.";

/// A planned action plus the candidate picked from an earlier ambiguous lookup.
struct Planned {
    action: AgentAction,
    picked: Option<EntityReference>,
}

/// Handles Teams messages: plan an action, run it, reply, persist chat state.
pub struct AgentRuntime {
    sessions: SessionStore,
    planner: Planner,
    handlers: ActionHandlers,
    login: LoginService,
    audit: Arc<dyn AuditSink>,
}

impl AgentRuntime {
    pub fn new(
        sessions: SessionStore,
        planner: Planner,
        handlers: ActionHandlers,
        login: LoginService,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self { sessions, planner, handlers, login, audit }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn handle_message(
        &self,
        activity: &Activity,
        ctx: &TurnContext,
    ) -> Result<ReplyMessage, ActivityHandlerError> {
        let chat_id = activity.chat_id().ok_or(ActivityHandlerError::MissingField("from.id"))?;
        let turn = Turn {
            actor: activity.user_id().unwrap_or(chat_id.as_str()).to_owned(),
            chat_id,
            correlation_id: ctx.correlation_id.clone(),
        };

        let mut state = self.sessions.load(&turn.chat_id);
        state.turns += 1;
        if let Some(user_id) = activity.user_id() {
            state.user_id = Some(user_id.to_owned());
        }
        if let Some(name) = activity.user_name() {
            state.user_name = Some(name.to_owned());
        }

        let text = message_text(activity);
        let reply = if text.is_empty() {
            ReplyMessage::text(EMPTY_MESSAGE_REPLY)
        } else {
            match self.next_action(&text, &mut state).await {
                Ok(planned) => self.run(&turn, &mut state, planned, activity).await,
                Err(error) => self.failure_reply(error.into(), &turn, &mut state, activity).await,
            }
        };

        self.sessions.save(&turn.chat_id, state);
        Ok(reply)
    }

    async fn next_action(
        &self,
        text: &str,
        state: &mut ConversationState,
    ) -> Result<Planned, ValidationError> {
        if let Some(choice) = state.pending_choice.take() {
            if let (Some(picked), Some(operation)) = (choice.pick(text), choice.operation) {
                let parameters = replay_parameters(&choice, picked);
                return Ok(Planned {
                    picked: Some(picked.clone()),
                    action: AgentAction::Mutate { operation, entity: choice.entity, parameters },
                });
            }
            if text.trim().trim_end_matches('.').parse::<usize>().is_ok() {
                let message = format!("Please pick a number between 1 and {}.", choice.candidates.len());
                state.pending_choice = Some(choice);
                return Ok(Planned { action: AgentAction::Reply(message), picked: None });
            }
        }

        if let Some(action) = parse_command(text) {
            return Ok(Planned { action, picked: None });
        }
        let action = self.planner.plan(text, state, Utc::now().date_naive()).await?;
        Ok(Planned { action, picked: None })
    }

    async fn run(
        &self,
        turn: &Turn,
        state: &mut ConversationState,
        planned: Planned,
        activity: &Activity,
    ) -> ReplyMessage {
        let Planned { action, picked } = planned;
        info!(
            event_name = "agent.action.planned",
            correlation_id = %turn.correlation_id,
            chat_id = %turn.chat_id,
            action = %action.name(),
            "action planned"
        );

        let note = match self.handlers.guardrails().evaluate(&action) {
            GuardrailDecision::Allow => None,
            GuardrailDecision::Deny { reason_code, user_message, fallback_path } => {
                warn!(
                    event_name = "agent.guardrail.denied",
                    correlation_id = %turn.correlation_id,
                    reason_code,
                    fallback_path,
                    "action denied by guardrail"
                );
                return ReplyMessage::text(user_message);
            }
            GuardrailDecision::Degrade { reason_code, user_message, .. } => {
                info!(event_name = "agent.guardrail.degraded", reason_code, "action degraded");
                Some(user_message)
            }
        };

        let result = self.execute(turn, state, action, picked, activity).await;
        let mut reply = match result {
            Ok(reply) => reply,
            Err(error) => self.failure_reply(error, turn, state, activity).await,
        };
        if let Some(note) = note {
            reply.text = format!("{note}\n{}", reply.text);
        }
        reply
    }

    async fn execute(
        &self,
        turn: &Turn,
        state: &mut ConversationState,
        action: AgentAction,
        picked: Option<EntityReference>,
        activity: &Activity,
    ) -> Result<ReplyMessage, CrmError> {
        match action {
            AgentAction::Mutate { operation, entity, parameters } => {
                let mut outcome =
                    self.handlers.mutate(turn, state, operation, entity, &parameters).await?;
                if let Some(picked) = picked.filter(|picked| picked.id == outcome.reference.id) {
                    outcome.reference.display_name = picked.display_name;
                    if let Some(recent) = state.last_record.as_mut() {
                        if recent.reference.id == outcome.reference.id {
                            recent.reference.display_name = outcome.reference.display_name.clone();
                        }
                    }
                }
                Ok(mutation_message(&outcome))
            }
            AgentAction::List { entity, limit } => {
                let page = self.handlers.list(turn, state, entity, limit).await?;
                Ok(record_page_message(&page))
            }
            AgentAction::RecentEmails { limit } => {
                let emails = self.handlers.recent_emails(turn, state, limit).await?;
                Ok(email_list_message(&emails))
            }
            AgentAction::CreateFromEmail { entity, parameters } => {
                let outcome =
                    self.handlers.create_from_email(turn, state, entity, &parameters).await?;
                Ok(mutation_message(&outcome))
            }
            AgentAction::Login(provider) => {
                if !self.login.is_enabled(provider) {
                    return Ok(ReplyMessage::text(format!(
                        "{} is not enabled for this bot.",
                        provider.display_name()
                    )));
                }
                self.login.login_card(provider, &turn.chat_id, activity).await
            }
            AgentAction::Logout(providers) => self.logout(turn, state, &providers).await,
            AgentAction::Help => Ok(help_message()),
            AgentAction::Reply(text) if text.trim().is_empty() => Ok(help_message()),
            AgentAction::Reply(text) => Ok(ReplyMessage::text(text)),
        }
    }

    async fn logout(
        &self,
        turn: &Turn,
        state: &mut ConversationState,
        providers: &[Provider],
    ) -> Result<ReplyMessage, CrmError> {
        let mut removed = Vec::new();
        for provider in providers {
            let existed = self
                .handlers
                .services()
                .tokens
                .delete(&turn.chat_id, *provider)
                .await
                .map_err(|error| CrmError::Persistence(error.to_string()))?;
            state.set_authenticated(*provider, false);
            if existed {
                removed.push(*provider);
                self.audit.emit(
                    AuditEvent::new(
                        Some(turn.chat_id.clone()),
                        turn.correlation_id.clone(),
                        "auth.token.revoked",
                        AuditCategory::Auth,
                        turn.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("provider", provider.as_str()),
                );
            }
        }
        Ok(logged_out_message(&removed))
    }

    async fn failure_reply(
        &self,
        error: CrmError,
        turn: &Turn,
        state: &mut ConversationState,
        activity: &Activity,
    ) -> ReplyMessage {
        warn!(
            event_name = "agent.action.failed",
            correlation_id = %turn.correlation_id,
            chat_id = %turn.chat_id,
            error_kind = error.kind(),
            error = %error,
            "action failed"
        );

        match error {
            CrmError::AuthenticationRequired { provider, reason } => {
                state.set_authenticated(provider, false);
                let intro = match reason {
                    AuthFailure::NoToken => {
                        format!("You need to connect {} first.", provider.display_name())
                    }
                    _ => format!(
                        "Your {} session has expired. Please sign in again.",
                        provider.display_name()
                    ),
                };
                match self.login.login_card(provider, &turn.chat_id, activity).await {
                    Ok(mut card) => {
                        card.text = format!("{intro}\n{}", card.text);
                        card
                    }
                    Err(error) => {
                        let interface = error.into_interface(turn.correlation_id.clone());
                        error_message(interface.user_message(), &turn.correlation_id)
                    }
                }
            }
            CrmError::AmbiguousMatch { entity, fragment, candidates } => {
                let operation = state.pending_choice.as_ref().and_then(|choice| choice.operation);
                ambiguous_match_message(entity, &fragment, operation, &candidates)
            }
            CrmError::NotFound { entity, fragment } => not_found_message(entity, &fragment),
            CrmError::Upstream { provider, message, .. } => error_message(
                &format!("{} returned an error: {message}", provider.display_name()),
                &turn.correlation_id,
            ),
            CrmError::Validation(validation) => ReplyMessage::text(sentence(&validation.to_string())),
            error @ CrmError::Persistence(_) => {
                let interface = error.into_interface(turn.correlation_id.clone());
                error_message(interface.user_message(), &turn.correlation_id)
            }
        }
    }
}

#[async_trait]
impl ActivityHandler for AgentRuntime {
    fn kind(&self) -> ActivityKind {
        ActivityKind::Message
    }

    async fn handle(
        &self,
        activity: &Activity,
        ctx: &TurnContext,
    ) -> Result<HandlerResult, ActivityHandlerError> {
        self.handle_message(activity, ctx).await.map(HandlerResult::Responded)
    }
}

/// Typed text, or the `choice` submitted from a card button.
fn message_text(activity: &Activity) -> String {
    let text = activity.clean_text();
    if !text.is_empty() {
        return text;
    }
    activity
        .value
        .as_ref()
        .and_then(|value| value.get("choice"))
        .and_then(|choice| choice.as_str())
        .map(|choice| choice.trim().to_owned())
        .unwrap_or_default()
}

fn sentence(message: &str) -> String {
    let mut chars = message.chars();
    match chars.next() {
        Some(first) => {
            let mut text = first.to_uppercase().collect::<String>() + chars.as_str();
            if !text.ends_with(['.', '?', '!']) {
                text.push('.');
            }
            text
        }
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{message_text, sentence};
    use teamsforce_teams::Activity;

    #[test]
    fn card_choice_stands_in_for_text() {
        let activity: Activity = serde_json::from_value(json!({
            "type": "message",
            "value": {"choice": "001A000000000001"}
        }))
        .expect("activity");
        assert_eq!(message_text(&activity), "001A000000000001");
    }

    #[test]
    fn validation_text_reads_as_a_sentence() {
        assert_eq!(
            sentence("missing required Lead fields: lastName, company"),
            "Missing required Lead fields: lastName, company."
        );
        assert_eq!(sentence(""), "");
    }
}

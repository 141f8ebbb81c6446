use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::activity::{Activity, ActivityKind};
use crate::cards::{welcome_message, ReplyMessage};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnContext {
    pub correlation_id: String,
}

impl Default for TurnContext {
    fn default() -> Self {
        Self { correlation_id: "unknown-correlation-id".to_owned() }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum HandlerResult {
    Responded(ReplyMessage),
    Processed,
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ActivityHandlerError {
    #[error("activity is missing `{0}`")]
    MissingField(&'static str),
    #[error("message handler failure: {0}")]
    Message(String),
}

#[async_trait]
pub trait ActivityHandler: Send + Sync {
    fn kind(&self) -> ActivityKind;

    async fn handle(
        &self,
        activity: &Activity,
        ctx: &TurnContext,
    ) -> Result<HandlerResult, ActivityHandlerError>;
}

/// Routes an inbound activity to the handler registered for its kind.
#[derive(Default)]
pub struct ActivityDispatcher {
    handlers: HashMap<ActivityKind, Arc<dyn ActivityHandler>>,
}

impl ActivityDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: ActivityHandler + 'static,
    {
        self.handlers.insert(handler.kind(), Arc::new(handler));
    }

    pub fn register_shared(&mut self, handler: Arc<dyn ActivityHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub async fn dispatch(
        &self,
        activity: &Activity,
        ctx: &TurnContext,
    ) -> Result<HandlerResult, ActivityHandlerError> {
        let Some(handler) = self.handlers.get(&activity.kind()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(activity, ctx).await
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

/// Greets users added to a conversation with the help card.
pub struct WelcomeHandler;

#[async_trait]
impl ActivityHandler for WelcomeHandler {
    fn kind(&self) -> ActivityKind {
        ActivityKind::ConversationUpdate
    }

    async fn handle(
        &self,
        activity: &Activity,
        _ctx: &TurnContext,
    ) -> Result<HandlerResult, ActivityHandlerError> {
        if !activity.has_new_members() {
            return Ok(HandlerResult::Ignored);
        }

        let bot_id = activity.recipient.as_ref().map(|bot| bot.id.as_str());
        let name = activity
            .members_added
            .iter()
            .find(|member| Some(member.id.as_str()) != bot_id)
            .and_then(|member| member.name.as_deref());
        Ok(HandlerResult::Responded(welcome_message(name)))
    }
}

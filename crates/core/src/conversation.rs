//! Per-chat conversation state.
//!
//! State lives in an explicit map keyed by chat id. The first access for a chat
//! inserts `ConversationState::default()`, so handlers always see every field.
//! Two concurrent turns in the same chat are not serialised; the later `save`
//! wins.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::email::EmailMessage;
use crate::domain::entity::{EntityReference, EntityType};
use crate::domain::outcome::{Operation, RecordPage};
use crate::domain::token::{ChatId, Provider};

/// Candidates offered after an ambiguous lookup, kept so the user can answer by number.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingChoice {
    pub entity: EntityType,
    pub operation: Option<Operation>,
    pub fragment: String,
    pub candidates: Vec<EntityReference>,
    /// Parameters of the interrupted action, replayed once the user picks.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl PendingChoice {
    /// Matches a reply of `2` or a candidate id.
    pub fn pick(&self, answer: &str) -> Option<&EntityReference> {
        let answer = answer.trim().trim_end_matches('.');
        if let Ok(position) = answer.parse::<usize>() {
            return position.checked_sub(1).and_then(|index| self.candidates.get(index));
        }
        self.candidates.iter().find(|candidate| candidate.id.eq_ignore_ascii_case(answer))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentRecord {
    pub entity: EntityType,
    pub reference: EntityReference,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationState {
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub salesforce_authenticated: bool,
    pub outlook_authenticated: bool,
    pub last_records: Option<RecordPage>,
    pub recent_emails: Vec<EmailMessage>,
    pub pending_choice: Option<PendingChoice>,
    pub last_record: Option<RecentRecord>,
    pub turns: u64,
}

impl ConversationState {
    pub fn is_authenticated(&self, provider: Provider) -> bool {
        match provider {
            Provider::Salesforce => self.salesforce_authenticated,
            Provider::Outlook => self.outlook_authenticated,
        }
    }

    pub fn set_authenticated(&mut self, provider: Provider, authenticated: bool) {
        match provider {
            Provider::Salesforce => self.salesforce_authenticated = authenticated,
            Provider::Outlook => self.outlook_authenticated = authenticated,
        }
        if !authenticated {
            match provider {
                Provider::Salesforce => {
                    self.last_records = None;
                    self.pending_choice = None;
                    self.last_record = None;
                }
                Provider::Outlook => self.recent_emails.clear(),
            }
        }
    }

    /// One-based lookup into the last email listing.
    pub fn email_at(&self, position: usize) -> Option<&EmailMessage> {
        position.checked_sub(1).and_then(|index| self.recent_emails.get(index))
    }

    pub fn email_by_id(&self, id: &str) -> Option<&EmailMessage> {
        self.recent_emails.iter().find(|email| email.id == id)
    }

    /// One-based lookup into pending candidates of the given type.
    pub fn pending_candidate(&self, entity: EntityType, position: usize) -> Option<&EntityReference> {
        let choice = self.pending_choice.as_ref().filter(|choice| choice.entity == entity)?;
        position.checked_sub(1).and_then(|index| choice.candidates.get(index))
    }
}

struct Session {
    state: ConversationState,
    touched_at: DateTime<Utc>,
}

impl Session {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self { state: ConversationState::default(), touched_at: now }
    }
}

#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<ChatId, Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the chat's state, inserting defaults on first access.
    pub fn load(&self, chat_id: &ChatId) -> ConversationState {
        let now = Utc::now();
        let mut sessions = self.write();
        let session = sessions.entry(chat_id.clone()).or_insert_with(|| Session::fresh(now));
        session.touched_at = now;
        session.state.clone()
    }

    pub fn save(&self, chat_id: &ChatId, state: ConversationState) {
        self.write().insert(chat_id.clone(), Session { state, touched_at: Utc::now() });
    }

    pub fn update<R>(&self, chat_id: &ChatId, apply: impl FnOnce(&mut ConversationState) -> R) -> R {
        let now = Utc::now();
        let mut sessions = self.write();
        let session = sessions.entry(chat_id.clone()).or_insert_with(|| Session::fresh(now));
        session.touched_at = now;
        apply(&mut session.state)
    }

    pub fn remove(&self, chat_id: &ChatId) -> Option<ConversationState> {
        self.write().remove(chat_id).map(|session| session.state)
    }

    /// Drops chats not touched since `cutoff`. Tokens stay in the token
    /// store, so an evicted chat only loses its conversational context.
    pub fn purge_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, session| session.touched_at >= cutoff);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ChatId, Session>> {
        match self.sessions.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<ChatId, Session>> {
        match self.sessions.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{ConversationState, PendingChoice, SessionStore};
    use crate::domain::entity::{EntityReference, EntityType};
    use crate::domain::token::{ChatId, Provider};

    #[test]
    fn first_access_merges_defaults() {
        let store = SessionStore::new();
        let chat = ChatId::from("19:chat");

        let state = store.load(&chat);
        assert_eq!(state, ConversationState::default());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn partial_serialized_state_gets_defaults() {
        let state: ConversationState =
            serde_json::from_str(r#"{"salesforce_authenticated": true}"#).expect("partial state");
        assert!(state.salesforce_authenticated);
        assert!(!state.outlook_authenticated);
        assert!(state.recent_emails.is_empty());
    }

    #[test]
    fn idle_chats_are_evicted() {
        let store = SessionStore::new();
        let idle = ChatId::from("19:idle");
        let active = ChatId::from("19:active");

        store.load(&idle);
        let cutoff = Utc::now() + Duration::milliseconds(1);
        assert_eq!(store.purge_idle(Utc::now() - Duration::hours(1)), 0);

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.update(&active, |state| state.turns = 3);

        assert_eq!(store.purge_idle(cutoff), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.load(&active).turns, 3);
        assert_eq!(store.load(&idle), ConversationState::default());
    }

    #[test]
    fn save_is_last_write_wins() {
        let store = SessionStore::new();
        let chat = ChatId::from("19:chat");

        let mut first = store.load(&chat);
        let mut second = store.load(&chat);
        first.turns = 1;
        second.turns = 2;
        store.save(&chat, first);
        store.save(&chat, second);

        assert_eq!(store.load(&chat).turns, 2);
    }

    #[test]
    fn logging_out_clears_provider_scoped_state() {
        let store = SessionStore::new();
        let chat = ChatId::from("19:chat");

        store.update(&chat, |state| {
            state.set_authenticated(Provider::Salesforce, true);
            state.pending_choice = Some(PendingChoice {
                entity: EntityType::Account,
                operation: None,
                fragment: "Acme".to_owned(),
                candidates: vec![EntityReference::new("001A", "Acme Inc")],
                parameters: Default::default(),
            });
        });
        assert!(store.load(&chat).pending_candidate(EntityType::Account, 1).is_some());
        assert!(store.load(&chat).pending_candidate(EntityType::Account, 0).is_none());
        assert!(store.load(&chat).pending_candidate(EntityType::Lead, 1).is_none());

        let choice = store.load(&chat).pending_choice.expect("pending choice");
        assert_eq!(choice.pick("1.").map(|c| c.id.as_str()), Some("001A"));
        assert_eq!(choice.pick("001a").map(|c| c.display_name.as_str()), Some("Acme Inc"));
        assert!(choice.pick("2").is_none());

        store.update(&chat, |state| state.set_authenticated(Provider::Salesforce, false));
        let state = store.load(&chat);
        assert!(!state.is_authenticated(Provider::Salesforce));
        assert!(state.pending_choice.is_none());
    }
}

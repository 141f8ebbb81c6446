pub mod audit;
pub mod config;
pub mod conversation;
pub mod domain;
pub mod errors;
pub mod soql;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use conversation::{ConversationState, PendingChoice, SessionStore};
pub use domain::email::EmailMessage;
pub use domain::entity::{EntityReference, EntityType, FieldSet};
pub use domain::outcome::{MutationOutcome, Operation, RecordPage, RecordSummary};
pub use domain::token::{ChatId, Provider, TokenGrant, TokenRecord, MAX_TOKEN_TTL_SECS};
pub use errors::{AuthFailure, CrmError, InterfaceError, ValidationError};
pub use soql::{SoqlQuery, SortOrder};

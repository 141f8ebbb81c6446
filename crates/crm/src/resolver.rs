//! Finds the Salesforce record a user means when they name it instead of
//! giving its id.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use teamsforce_core::domain::entity::{EntityReference, EntityType};
use teamsforce_core::domain::token::ChatId;
use teamsforce_core::errors::{CrmError, ValidationError};
use teamsforce_core::soql::{SoqlQuery, MAX_QUERY_LIMIT};

/// Runs a resolution query and returns every matching record.
#[async_trait]
pub trait RecordSearch: Send + Sync {
    async fn search(
        &self,
        chat_id: &ChatId,
        entity: EntityType,
        query: &SoqlQuery,
    ) -> Result<Vec<EntityReference>, CrmError>;
}

/// `SELECT Id, <search field> FROM <sObject> WHERE <search field> LIKE '%fragment%' LIMIT 200`.
pub fn resolution_query(entity: EntityType, fragment: &str) -> Result<SoqlQuery, CrmError> {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return Err(ValidationError::BlankSearch { entity }.into());
    }

    let field = entity.search_field();
    SoqlQuery::builder()
        .select(["Id", field])
        .from(entity.sobject())
        .where_contains(field, fragment)
        .limit(MAX_QUERY_LIMIT)
        .build()
        .map_err(|error| {
            ValidationError::InvalidField { field: field.to_owned(), reason: error.to_string() }
                .into()
        })
}

/// Applies the match policy: exactly one candidate or an error.
pub fn select_single(
    entity: EntityType,
    fragment: &str,
    mut candidates: Vec<EntityReference>,
) -> Result<EntityReference, CrmError> {
    match candidates.len() {
        0 => Err(CrmError::NotFound { entity, fragment: fragment.trim().to_owned() }),
        1 => Ok(candidates.remove(0)),
        _ => Err(CrmError::AmbiguousMatch {
            entity,
            fragment: fragment.trim().to_owned(),
            candidates,
        }),
    }
}

/// Salesforce ids are 15 (case-sensitive) or 18 (case-insensitive) alphanumerics.
pub fn is_record_id(value: &str) -> bool {
    matches!(value.len(), 15 | 18) && value.chars().all(|ch| ch.is_ascii_alphanumeric())
}

pub struct EntityResolver {
    search: Arc<dyn RecordSearch>,
}

impl EntityResolver {
    pub fn new(search: Arc<dyn RecordSearch>) -> Self {
        Self { search }
    }

    pub async fn resolve(
        &self,
        chat_id: &ChatId,
        entity: EntityType,
        fragment: &str,
    ) -> Result<EntityReference, CrmError> {
        let query = resolution_query(entity, fragment)?;
        let candidates = self.search.search(chat_id, entity, &query).await?;

        debug!(
            event_name = "crm.resolver.searched",
            entity = entity.as_str(),
            chat_id = %chat_id,
            matches = candidates.len(),
            "entity resolution query completed"
        );
        select_single(entity, fragment, candidates)
    }

    /// Uses `id` when present, otherwise resolves `fragment`.
    pub async fn resolve_target(
        &self,
        chat_id: &ChatId,
        entity: EntityType,
        id: Option<&str>,
        fragment: Option<&str>,
    ) -> Result<EntityReference, CrmError> {
        if let Some(id) = id.map(str::trim).filter(|id| !id.is_empty()) {
            if !is_record_id(id) {
                return Err(ValidationError::InvalidField {
                    field: entity.id_parameter().to_owned(),
                    reason: "expected a 15 or 18 character Salesforce id".to_owned(),
                }
                .into());
            }
            return Ok(EntityReference::new(id, id));
        }

        match fragment {
            Some(fragment) => self.resolve(chat_id, entity, fragment).await,
            None => Err(ValidationError::MissingTarget { entity }.into()),
        }
    }
}

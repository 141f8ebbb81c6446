//! Salesforce REST: SOQL queries and sObject create, update and delete.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use teamsforce_core::domain::entity::{EntityReference, EntityType, FieldSet};
use teamsforce_core::domain::outcome::{MutationOutcome, Operation, RecordPage, RecordSummary};
use teamsforce_core::domain::token::{ChatId, Provider};
use teamsforce_core::errors::{CrmError, ValidationError};
use teamsforce_core::soql::{SoqlQuery, SortOrder};

use crate::client::AuthorizedClient;
use crate::resolver::{is_record_id, RecordSearch};
use crate::transport::ApiRequest;

pub struct SalesforceClient {
    client: Arc<AuthorizedClient>,
    api_version: String,
}

impl SalesforceClient {
    pub fn new(client: Arc<AuthorizedClient>, api_version: impl Into<String>) -> Self {
        Self { client, api_version: api_version.into() }
    }

    fn data_path(&self, suffix: &str) -> String {
        format!("/services/data/{}/{}", self.api_version, suffix.trim_start_matches('/'))
    }

    pub async fn query(&self, chat_id: &ChatId, query: &SoqlQuery) -> Result<Vec<Value>, CrmError> {
        let request = ApiRequest::get(self.data_path("query")).with_query("q", query.as_str());
        let response = self.client.execute(chat_id, &request).await?;

        let records = response
            .body
            .as_ref()
            .and_then(|body| body.get("records"))
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| {
                CrmError::upstream(
                    Provider::Salesforce,
                    Some(response.status),
                    "query response had no records array",
                )
            })?;
        Ok(records)
    }

    pub async fn create(
        &self,
        chat_id: &ChatId,
        entity: EntityType,
        fields: &FieldSet,
    ) -> Result<MutationOutcome, CrmError> {
        let request = ApiRequest::post(
            self.data_path(&format!("sobjects/{}", entity.sobject())),
            fields.to_json(),
        );
        let response = self.client.execute(chat_id, &request).await?;

        let id = response
            .body
            .as_ref()
            .and_then(|body| body.get("id"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                CrmError::upstream(
                    Provider::Salesforce,
                    Some(response.status),
                    format!("{} was not created: the response carried no id", entity.label()),
                )
            })?;

        let outcome = MutationOutcome {
            operation: Operation::Create,
            entity,
            reference: EntityReference::new(id, display_name(entity, fields, id)),
            fields: fields.field_names(),
        };
        log_mutation(chat_id, &outcome);
        Ok(outcome)
    }

    pub async fn update(
        &self,
        chat_id: &ChatId,
        entity: EntityType,
        target: &EntityReference,
        fields: &FieldSet,
    ) -> Result<MutationOutcome, CrmError> {
        let path = self.record_path(entity, &target.id)?;
        let request = ApiRequest::patch(path, fields.to_json());
        self.client.execute(chat_id, &request).await.map_err(|error| missing_record(error, entity, target))?;

        let outcome = MutationOutcome {
            operation: Operation::Update,
            entity,
            reference: target.clone(),
            fields: fields.field_names(),
        };
        log_mutation(chat_id, &outcome);
        Ok(outcome)
    }

    pub async fn delete(
        &self,
        chat_id: &ChatId,
        entity: EntityType,
        target: &EntityReference,
    ) -> Result<MutationOutcome, CrmError> {
        let path = self.record_path(entity, &target.id)?;
        self.client
            .execute(chat_id, &ApiRequest::delete(path))
            .await
            .map_err(|error| missing_record(error, entity, target))?;

        let outcome = MutationOutcome {
            operation: Operation::Delete,
            entity,
            reference: target.clone(),
            fields: Vec::new(),
        };
        log_mutation(chat_id, &outcome);
        Ok(outcome)
    }

    /// Newest records first.
    pub async fn list_recent(
        &self,
        chat_id: &ChatId,
        entity: EntityType,
        limit: u32,
    ) -> Result<RecordPage, CrmError> {
        let query = SoqlQuery::builder()
            .select(entity.list_fields().iter().copied())
            .from(entity.sobject())
            .order_by("CreatedDate", SortOrder::Desc)
            .limit(limit)
            .build()
            .map_err(|error| CrmError::upstream(Provider::Salesforce, None, error.to_string()))?;

        let records = self.query(chat_id, &query).await?;
        Ok(RecordPage {
            entity,
            records: records.iter().map(|record| RecordSummary::from_record(entity, record)).collect(),
        })
    }

    fn record_path(&self, entity: EntityType, id: &str) -> Result<String, CrmError> {
        if !is_record_id(id) {
            return Err(ValidationError::InvalidField {
                field: entity.id_parameter().to_owned(),
                reason: "expected a 15 or 18 character Salesforce id".to_owned(),
            }
            .into());
        }
        Ok(self.data_path(&format!("sobjects/{}/{id}", entity.sobject())))
    }
}

#[async_trait]
impl RecordSearch for SalesforceClient {
    async fn search(
        &self,
        chat_id: &ChatId,
        entity: EntityType,
        query: &SoqlQuery,
    ) -> Result<Vec<EntityReference>, CrmError> {
        let records = self.query(chat_id, query).await?;
        Ok(records
            .iter()
            .filter_map(|record| {
                let id = record.get("Id").and_then(Value::as_str)?;
                Some(EntityReference::new(id, entity.record_title(record)))
            })
            .collect())
    }
}

fn display_name(entity: EntityType, fields: &FieldSet, fallback: &str) -> String {
    let value = |name: &str| fields.get(name).and_then(Value::as_str).unwrap_or_default();
    let name = match entity {
        EntityType::Lead | EntityType::Contact => {
            format!("{} {}", value("FirstName"), value("LastName")).trim().to_owned()
        }
        EntityType::Opportunity | EntityType::Account => value("Name").to_owned(),
        EntityType::Task | EntityType::Meeting => value("Subject").to_owned(),
    };
    if name.is_empty() {
        fallback.to_owned()
    } else {
        name
    }
}

fn missing_record(error: CrmError, entity: EntityType, target: &EntityReference) -> CrmError {
    match error {
        CrmError::Upstream { status: Some(404), .. } => {
            CrmError::NotFound { entity, fragment: target.display_name.clone() }
        }
        other => other,
    }
}

fn log_mutation(chat_id: &ChatId, outcome: &MutationOutcome) {
    info!(
        event_name = "crm.record.mutated",
        operation = outcome.operation.as_str(),
        entity = outcome.entity.as_str(),
        record_id = %outcome.reference.id,
        chat_id = %chat_id,
        field_count = outcome.fields.len(),
        "salesforce record {}",
        outcome.operation.past_tense()
    );
}

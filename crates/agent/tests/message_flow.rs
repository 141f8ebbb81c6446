use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use teamsforce_agent::{
    ActionHandlers, AgentRuntime, GuardrailPolicy, LlmClient, LoginService, Planner,
};
use teamsforce_core::audit::{AuditSink, InMemoryAuditSink};
use teamsforce_core::config::AppConfig;
use teamsforce_core::conversation::SessionStore;
use teamsforce_core::domain::token::{ChatId, Provider, TokenGrant, TokenRecord};
use teamsforce_crm::transport::HttpMethod;
use teamsforce_crm::{
    ApiRequest, ApiResponse, ApiTransport, CrmServices, OAuthClients, OAuthError, TokenExchanger,
    TransportError,
};
use teamsforce_db::{InMemoryAuthStateRepository, InMemoryTokenRepository, TokenRepository};
use teamsforce_teams::{Activity, ReplyMessage, TurnContext};

const CHAT: &str = "19:chat@thread.v2";
const INSTANCE: &str = "https://acme.my.salesforce.com";
const ACME_INC: &str = "001000000000001AAA";
const ACME_CORP: &str = "001000000000002AAA";

struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .expect("llm lock")
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted plan left"))
    }
}

#[derive(Default)]
struct ScriptedTransport {
    responses: Mutex<VecDeque<ApiResponse>>,
    sent: Mutex<Vec<(String, ApiRequest)>>,
}

impl ScriptedTransport {
    fn push(&self, status: u16, body: Option<Value>) {
        self.responses.lock().expect("responses lock").push_back(ApiResponse::new(status, body));
    }

    fn sent(&self) -> Vec<(String, ApiRequest)> {
        self.sent.lock().expect("sent lock").clone()
    }
}

#[async_trait]
impl ApiTransport for ScriptedTransport {
    async fn send(
        &self,
        base_url: &str,
        _bearer_token: &str,
        request: &ApiRequest,
    ) -> Result<ApiResponse, TransportError> {
        self.sent.lock().expect("sent lock").push((base_url.to_owned(), request.clone()));
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .ok_or_else(|| TransportError::Request("no scripted response left".to_owned()))
    }
}

struct NoRefresh;

#[async_trait]
impl TokenExchanger for NoRefresh {
    async fn exchange_code(&self, _provider: Provider, _code: &str) -> Result<TokenGrant, OAuthError> {
        Err(OAuthError::Request("not used".to_owned()))
    }

    async fn refresh(&self, _provider: Provider, _token: &str) -> Result<TokenGrant, OAuthError> {
        Err(OAuthError::Request("not used".to_owned()))
    }
}

struct Harness {
    runtime: AgentRuntime,
    llm: Arc<ScriptedLlm>,
    transport: Arc<ScriptedTransport>,
    tokens: Arc<InMemoryTokenRepository>,
    audit: InMemoryAuditSink,
}

impl Harness {
    async fn new(plans: &[Value], connected: &[Provider], outlook: bool) -> Self {
        let mut config = AppConfig::default();
        config.outlook.enabled = outlook;

        let now = Utc::now();
        let records = connected.iter().map(|provider| TokenRecord {
            chat_id: ChatId::from(CHAT),
            provider: *provider,
            access_token: format!("{provider}-access"),
            refresh_token: None,
            instance_url: (*provider == Provider::Salesforce).then(|| INSTANCE.to_owned()),
            token_type: "Bearer".to_owned(),
            scope: None,
            expires_at: now + Duration::hours(1),
            updated_at: now,
        });
        let tokens = Arc::new(InMemoryTokenRepository::with_records(records).await);
        let transport = Arc::new(ScriptedTransport::default());
        let oauth = OAuthClients::from_config(&config.salesforce, &config.outlook);
        let services = CrmServices::assemble(
            &config,
            oauth.clone(),
            tokens.clone(),
            Arc::new(NoRefresh),
            transport.clone(),
        );

        let llm = Arc::new(ScriptedLlm {
            replies: Mutex::new(plans.iter().map(Value::to_string).collect()),
            calls: AtomicUsize::new(0),
        });
        let audit = InMemoryAuditSink::default();
        let sink: Arc<dyn AuditSink> = Arc::new(audit.clone());
        let runtime = AgentRuntime::new(
            SessionStore::new(),
            Planner::new(llm.clone(), outlook).expect("planner"),
            ActionHandlers::new(services, GuardrailPolicy::from(&config.guardrails), sink.clone()),
            LoginService::new(oauth, Arc::new(InMemoryAuthStateRepository::default())),
            sink,
        );

        Self { runtime, llm, transport, tokens, audit }
    }

    async fn say(&self, text: &str) -> ReplyMessage {
        let activity: Activity = serde_json::from_value(json!({
            "type": "message",
            "id": "act-1",
            "serviceUrl": "https://smba.trafficmanager.net/amer/",
            "from": {"id": "29:ada", "name": "Ada"},
            "recipient": {"id": "28:bot"},
            "conversation": {"id": "a:1"},
            "channelData": {"teamsChatId": CHAT},
            "text": text
        }))
        .expect("activity");
        self.runtime
            .handle_message(&activity, &TurnContext { correlation_id: "req-1".to_owned() })
            .await
            .expect("handled")
    }

    fn methods(&self) -> Vec<HttpMethod> {
        self.transport.sent().into_iter().map(|(_, request)| request.method).collect()
    }
}

fn acme_matches() -> Value {
    json!({
        "totalSize": 2,
        "done": true,
        "records": [
            {"attributes": {"type": "Account"}, "Id": ACME_INC, "Name": "Acme Inc"},
            {"attributes": {"type": "Account"}, "Id": ACME_CORP, "Name": "Acme Corp"}
        ]
    })
}

#[tokio::test]
async fn ambiguous_delete_lists_candidates_and_deletes_nothing() {
    let harness = Harness::new(
        &[json!({"action": "DeleteSalesforceAccount", "parameters": {"identifier": "Acme"}})],
        &[Provider::Salesforce],
        false,
    )
    .await;
    harness.transport.push(200, Some(acme_matches()));

    let reply = harness.say("delete the Acme account").await;

    assert!(reply.text.contains("1. Acme Inc (ID: 001000000000001AAA)"), "{}", reply.text);
    assert!(reply.text.contains("2. Acme Corp (ID: 001000000000002AAA)"), "{}", reply.text);
    assert_eq!(harness.methods(), vec![HttpMethod::Get]);
    let (base_url, query) = &harness.transport.sent()[0];
    assert_eq!(base_url, INSTANCE);
    let soql = query.query.iter().find(|(key, _)| key == "q").map(|(_, q)| q.clone());
    assert_eq!(
        soql.as_deref(),
        Some("SELECT Id, Name FROM Account WHERE Name LIKE '%Acme%' LIMIT 200")
    );
    assert!(harness.audit.events().is_empty());

    let pending = harness.runtime.sessions().load(&ChatId::from(CHAT)).pending_choice;
    assert_eq!(pending.map(|choice| choice.candidates.len()), Some(2));
}

#[tokio::test]
async fn numbered_answer_replays_the_delete_on_that_record() {
    let harness = Harness::new(
        &[json!({"action": "DeleteSalesforceAccount", "parameters": {"identifier": "Acme"}})],
        &[Provider::Salesforce],
        false,
    )
    .await;
    harness.transport.push(200, Some(acme_matches()));
    harness.transport.push(204, None);

    harness.say("delete the Acme account").await;
    let reply = harness.say("2").await;

    assert!(reply.text.contains("Account deleted: Acme Corp"), "{}", reply.text);
    assert_eq!(harness.llm.calls.load(Ordering::SeqCst), 1);
    let sent = harness.transport.sent();
    assert_eq!(sent[1].1.method, HttpMethod::Delete);
    assert_eq!(sent[1].1.path, "/services/data/v60.0/sobjects/Account/001000000000002AAA");

    let events = harness.audit.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "crm.record.deleted");
    assert_eq!(events[0].metadata.get("record_id").map(String::as_str), Some(ACME_CORP));
    assert!(harness.runtime.sessions().load(&ChatId::from(CHAT)).pending_choice.is_none());
}

#[tokio::test]
async fn missing_token_replies_with_login_card() {
    let harness = Harness::new(
        &[json!({"action": "GetSalesforceLeads", "parameters": {}})],
        &[],
        false,
    )
    .await;

    let reply = harness.say("show my leads").await;

    assert!(reply.text.starts_with("You need to connect Salesforce first."), "{}", reply.text);
    let activity = reply.to_activity();
    assert_eq!(activity["attachments"][0]["content"]["actions"][0]["type"], "Action.OpenUrl");
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn missing_required_fields_fail_before_any_call() {
    let harness = Harness::new(
        &[json!({"action": "CreateSalesforceLead", "parameters": {"lastName": "Ng"}})],
        &[Provider::Salesforce],
        false,
    )
    .await;

    let reply = harness.say("add a lead called Ng").await;

    assert_eq!(reply.text, "Missing required Lead fields: company.");
    assert!(harness.transport.sent().is_empty());
}

#[tokio::test]
async fn listing_stores_records_in_conversation_state() {
    let harness = Harness::new(
        &[json!({"action": "GetSalesforceOpportunities", "parameters": {"limit": 2}})],
        &[Provider::Salesforce],
        false,
    )
    .await;
    harness.transport.push(
        200,
        Some(json!({"records": [
            {"Id": "006000000000001AAA", "Name": "Renewal", "StageName": "Prospecting", "Amount": 1200},
            {"Id": "006000000000002AAA", "Name": "Expansion", "StageName": "Closed Won"}
        ]})),
    );

    let reply = harness.say("my latest two deals").await;

    assert!(reply.text.contains("1. Renewal (ID: 006000000000001AAA)"), "{}", reply.text);
    let soql = harness.transport.sent()[0]
        .1
        .query
        .iter()
        .find(|(key, _)| key == "q")
        .map(|(_, q)| q.clone())
        .expect("soql");
    assert!(soql.ends_with("ORDER BY CreatedDate DESC LIMIT 2"), "{soql}");

    let state = harness.runtime.sessions().load(&ChatId::from(CHAT));
    assert_eq!(state.last_records.map(|page| page.records.len()), Some(2));
    assert!(state.salesforce_authenticated);
}

#[tokio::test]
async fn lead_is_created_from_a_listed_email() {
    let harness = Harness::new(
        &[
            json!({"action": "GetRecentEmails", "parameters": {}}),
            json!({"action": "CreateSalesforceLeadFromEmail", "parameters": {"emailIndex": 1}}),
        ],
        &[Provider::Salesforce, Provider::Outlook],
        true,
    )
    .await;
    harness.transport.push(
        200,
        Some(json!({"value": [{
            "id": "AAMkAGI2-1",
            "subject": "Volume pricing",
            "from": {"emailAddress": {"name": "Grace Hopper", "address": "grace@navy-labs.com"}},
            "receivedDateTime": "2026-03-01T09:30:00Z",
            "bodyPreview": "Could we get a quote for 500 seats?"
        }]})),
    );
    harness.transport.push(201, Some(json!({"id": "00Q000000000001AAA", "success": true})));

    let listing = harness.say("what's in my inbox").await;
    assert!(listing.text.contains("1. Volume pricing from Grace Hopper"), "{}", listing.text);

    let created = harness.say("make the first one a lead").await;
    assert!(created.text.contains("Lead created: Grace Hopper"), "{}", created.text);

    let sent = harness.transport.sent();
    assert_eq!(sent[0].0, "https://graph.microsoft.com/v1.0");
    assert_eq!(sent[1].1.method, HttpMethod::Post);
    let body = sent[1].1.body.clone().expect("lead body");
    assert_eq!(body["Company"], "Navy Labs");
    assert_eq!(body["Email"], "grace@navy-labs.com");
    assert_eq!(body["LastName"], "Hopper");
}

#[tokio::test]
async fn logout_command_skips_the_planner_and_drops_tokens() {
    let harness = Harness::new(&[], &[Provider::Salesforce], false).await;

    let reply = harness.say("/logout salesforce").await;

    assert_eq!(reply.text, "Signed out of Salesforce.");
    assert_eq!(harness.llm.calls.load(Ordering::SeqCst), 0);
    let stored = harness.tokens.find(&ChatId::from(CHAT), Provider::Salesforce).await.expect("find");
    assert!(stored.is_none());
    assert_eq!(harness.audit.events()[0].event_type, "auth.token.revoked");
}

#[tokio::test]
async fn disabled_deletes_are_refused_without_lookup() {
    let mut harness = Harness::new(
        &[json!({"action": "DeleteSalesforceLead", "parameters": {"leadId": "00Q000000000001AAA"}})],
        &[Provider::Salesforce],
        false,
    )
    .await;
    let mut config = AppConfig::default();
    config.guardrails.deletes_enabled = false;
    let oauth = OAuthClients::from_config(&config.salesforce, &config.outlook);
    let sink: Arc<dyn AuditSink> = Arc::new(harness.audit.clone());
    harness.runtime = AgentRuntime::new(
        SessionStore::new(),
        Planner::new(harness.llm.clone(), false).expect("planner"),
        ActionHandlers::new(
            CrmServices::assemble(
                &config,
                oauth.clone(),
                harness.tokens.clone(),
                Arc::new(NoRefresh),
                harness.transport.clone(),
            ),
            GuardrailPolicy::from(&config.guardrails),
            sink.clone(),
        ),
        LoginService::new(oauth, Arc::new(InMemoryAuthStateRepository::default())),
        sink,
    );

    let reply = harness.say("delete lead 00Q000000000001AAA").await;

    assert!(reply.text.contains("turned off"), "{}", reply.text);
    assert!(harness.transport.sent().is_empty());
}

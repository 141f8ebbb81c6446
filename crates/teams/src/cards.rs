use serde::Serialize;
use serde_json::{json, Value};

use teamsforce_core::domain::email::EmailMessage;
use teamsforce_core::domain::entity::{EntityReference, EntityType};
use teamsforce_core::domain::outcome::{MutationOutcome, Operation, RecordPage};
use teamsforce_core::domain::token::Provider;

pub const ADAPTIVE_CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.adaptive";
const ADAPTIVE_CARD_VERSION: &str = "1.4";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Fact {
    pub title: String,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum CardElement {
    TextBlock {
        text: String,
        wrap: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        weight: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        size: Option<String>,
        #[serde(rename = "isSubtle", skip_serializing_if = "std::ops::Not::not")]
        is_subtle: bool,
    },
    FactSet {
        facts: Vec<Fact>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum CardAction {
    #[serde(rename = "Action.OpenUrl")]
    OpenUrl { title: String, url: String },
    #[serde(rename = "Action.Submit")]
    Submit { title: String, data: Value },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AdaptiveCard {
    #[serde(rename = "type")]
    pub card_type: &'static str,
    pub version: &'static str,
    pub body: Vec<CardElement>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<CardAction>,
}

/// An outgoing reply: plain text plus optional adaptive card.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplyMessage {
    pub text: String,
    pub card: Option<AdaptiveCard>,
}

impl ReplyMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), card: None }
    }

    /// Bot Framework `message` activity body.
    pub fn to_activity(&self) -> Value {
        let mut activity = json!({"type": "message", "text": self.text});
        if let Some(card) = &self.card {
            activity["attachments"] = json!([{
                "contentType": ADAPTIVE_CARD_CONTENT_TYPE,
                "content": card,
            }]);
        }
        activity
    }
}

pub struct CardBuilder {
    fallback_text: String,
    body: Vec<CardElement>,
    actions: Vec<CardAction>,
}

impl CardBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), body: Vec::new(), actions: Vec::new() }
    }

    pub fn heading(mut self, text: impl Into<String>) -> Self {
        self.body.push(CardElement::TextBlock {
            text: text.into(),
            wrap: true,
            weight: Some("Bolder".to_owned()),
            size: Some("Medium".to_owned()),
            is_subtle: false,
        });
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body.push(CardElement::TextBlock {
            text: text.into(),
            wrap: true,
            weight: None,
            size: None,
            is_subtle: false,
        });
        self
    }

    pub fn subtle(mut self, text: impl Into<String>) -> Self {
        self.body.push(CardElement::TextBlock {
            text: text.into(),
            wrap: true,
            weight: None,
            size: Some("Small".to_owned()),
            is_subtle: true,
        });
        self
    }

    pub fn facts<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut FactSetBuilder),
    {
        let mut builder = FactSetBuilder::default();
        build(&mut builder);
        if !builder.facts.is_empty() {
            self.body.push(CardElement::FactSet { facts: builder.facts });
        }
        self
    }

    pub fn open_url(mut self, title: impl Into<String>, url: impl Into<String>) -> Self {
        self.actions.push(CardAction::OpenUrl { title: title.into(), url: url.into() });
        self
    }

    pub fn submit(mut self, title: impl Into<String>, data: Value) -> Self {
        self.actions.push(CardAction::Submit { title: title.into(), data });
        self
    }

    pub fn build(self) -> ReplyMessage {
        ReplyMessage {
            text: self.fallback_text,
            card: Some(AdaptiveCard {
                card_type: "AdaptiveCard",
                version: ADAPTIVE_CARD_VERSION,
                body: self.body,
                actions: self.actions,
            }),
        }
    }
}

#[derive(Default)]
pub struct FactSetBuilder {
    facts: Vec<Fact>,
}

impl FactSetBuilder {
    pub fn fact(&mut self, title: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.facts.push(Fact { title: title.into(), value: value.into() });
        self
    }
}

pub fn login_card(provider: Provider, authorize_url: &str) -> ReplyMessage {
    let name = provider.display_name();
    let purpose = match provider {
        Provider::Salesforce => {
            "manage your leads, opportunities, accounts, contacts, tasks and meetings"
        }
        Provider::Outlook => "read your recent emails and turn them into CRM records",
    };
    CardBuilder::new(format!("Sign in to {name}: {authorize_url}"))
        .heading(format!("Connect {name}"))
        .text(format!("Sign in so I can {purpose}."))
        .subtle("The sign-in link expires in 10 minutes.")
        .open_url(format!("Sign in to {name}"), authorize_url)
        .build()
}

pub fn connected_message(provider: Provider) -> ReplyMessage {
    ReplyMessage::text(format!(
        "You are connected to {}. What would you like to do?",
        provider.display_name()
    ))
}

pub fn logged_out_message(providers: &[Provider]) -> ReplyMessage {
    if providers.is_empty() {
        return ReplyMessage::text("You were not signed in to anything.");
    }
    let names: Vec<&str> = providers.iter().map(|provider| provider.display_name()).collect();
    ReplyMessage::text(format!("Signed out of {}.", names.join(" and ")))
}

pub fn error_message(message: &str, correlation_id: &str) -> ReplyMessage {
    CardBuilder::new(message.to_owned())
        .text(message.to_owned())
        .subtle(format!("Reference: {correlation_id}"))
        .build()
}

pub fn not_found_message(entity: EntityType, fragment: &str) -> ReplyMessage {
    ReplyMessage::text(format!("I couldn't find any {} matching \"{fragment}\".", entity.label()))
}

/// Numbered candidate list; the user answers with a number or an id.
pub fn ambiguous_match_message(
    entity: EntityType,
    fragment: &str,
    operation: Option<Operation>,
    candidates: &[EntityReference],
) -> ReplyMessage {
    let verb = operation.map(Operation::as_str).unwrap_or("use");
    let mut lines = vec![format!(
        "{} {} records match \"{fragment}\". Which one should I {verb}?",
        candidates.len(),
        entity.label()
    )];
    lines.extend(
        candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| {
                format!("{}. {} (ID: {})", index + 1, candidate.display_name, candidate.id)
            }),
    );
    lines.push("Reply with the number or the ID.".to_owned());

    let mut builder = CardBuilder::new(lines.join("\n"))
        .heading(format!("Several {} match \"{fragment}\"", entity.plural_label()))
        .facts(|facts| {
            for (index, candidate) in candidates.iter().enumerate() {
                facts.fact(
                    format!("{}.", index + 1),
                    format!("{} (ID: {})", candidate.display_name, candidate.id),
                );
            }
        })
        .subtle("Reply with the number or the ID.");
    // Button clicks come back as `value.choice`.
    for (index, candidate) in candidates.iter().enumerate() {
        builder = builder.submit(
            format!("{}. {}", index + 1, candidate.display_name),
            json!({"choice": candidate.id}),
        );
    }
    builder.build()
}

pub fn mutation_message(outcome: &MutationOutcome) -> ReplyMessage {
    let summary = format!(
        "{} {}: {}",
        outcome.entity.label(),
        outcome.operation.past_tense(),
        outcome.reference.display_name
    );
    CardBuilder::new(format!("{summary} (ID: {})", outcome.reference.id))
        .heading(format!("{} {}", outcome.entity.label(), outcome.operation.past_tense()))
        .facts(|facts| {
            facts.fact("Name", outcome.reference.display_name.clone());
            facts.fact("ID", outcome.reference.id.clone());
            if !outcome.fields.is_empty() {
                facts.fact("Fields", outcome.fields.join(", "));
            }
        })
        .build()
}

pub fn record_page_message(page: &RecordPage) -> ReplyMessage {
    if page.records.is_empty() {
        return ReplyMessage::text(format!("No {} found.", page.entity.plural_label()));
    }

    let mut fallback = vec![format!("Your recent {}:", page.entity.plural_label())];
    let mut builder = CardBuilder::new(String::new())
        .heading(format!("Recent {} ({})", page.entity.plural_label(), page.records.len()));
    for (index, record) in page.records.iter().enumerate() {
        fallback.push(format!("{}. {} (ID: {})", index + 1, record.title, record.id));
        builder = builder.text(format!("**{}. {}**", index + 1, record.title)).facts(|facts| {
            facts.fact("ID", record.id.clone());
            for (name, value) in &record.details {
                facts.fact(name.clone(), value.clone());
            }
        });
    }

    let mut reply = builder.build();
    reply.text = fallback.join("\n");
    reply
}

pub fn email_list_message(emails: &[EmailMessage]) -> ReplyMessage {
    if emails.is_empty() {
        return ReplyMessage::text("Your inbox has no recent messages.");
    }

    let mut fallback = vec!["Your recent emails:".to_owned()];
    let mut builder = CardBuilder::new(String::new()).heading("Recent emails");
    for (index, email) in emails.iter().enumerate() {
        let sender = email
            .from_name
            .clone()
            .or_else(|| email.from_address.clone())
            .unwrap_or_else(|| "unknown sender".to_owned());
        fallback.push(format!("{}. {} from {sender}", index + 1, email.subject));
        builder = builder.text(format!("**{}. {}**", index + 1, email.subject)).facts(|facts| {
            facts.fact("From", sender.clone());
            if let Some(received) = email.received_at {
                facts.fact("Received", received.format("%Y-%m-%d %H:%M UTC").to_string());
            }
            if !email.body_preview.is_empty() {
                facts.fact("Preview", email.body_preview.chars().take(140).collect::<String>());
            }
        });
    }
    builder = builder.subtle("Say \"create a lead from email 1\" to add a sender to Salesforce.");

    let mut reply = builder.build();
    reply.text = fallback.join("\n");
    reply
}

pub fn help_message() -> ReplyMessage {
    CardBuilder::new("I can manage Salesforce records and create them from Outlook emails.")
        .heading("What I can do")
        .facts(|facts| {
            facts
                .fact("Records", "Create, update, delete and list leads, opportunities, accounts, contacts, tasks and meetings")
                .fact("Email", "Show recent Outlook emails and create leads, contacts, tasks or meetings from them")
                .fact("/salesforce", "Connect your Salesforce account")
                .fact("/outlook", "Connect your Outlook mailbox")
                .fact("/logout", "Sign out of Salesforce, Outlook, or both");
        })
        .subtle("Try \"create a lead for Ada Lovelace at Analytical Engines\".")
        .build()
}

pub fn welcome_message(user_name: Option<&str>) -> ReplyMessage {
    let greeting = match user_name {
        Some(name) => format!("Hi {name}! I'm your Salesforce assistant."),
        None => "Hi! I'm your Salesforce assistant.".to_owned(),
    };
    let mut reply = help_message();
    reply.text = format!("{greeting} {}", reply.text);
    if let Some(card) = reply.card.as_mut() {
        card.body.insert(
            0,
            CardElement::TextBlock {
                text: greeting,
                wrap: true,
                weight: None,
                size: None,
                is_subtle: false,
            },
        );
    }
    reply
}

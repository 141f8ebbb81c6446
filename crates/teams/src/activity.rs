//! Bot Framework activity model, limited to the fields the bot reads or echoes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use teamsforce_core::domain::token::ChatId;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aad_object_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_group: Option<bool>,
}

/// Enough of an activity to post into the same conversation later.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot: Option<ChannelAccount>,
    pub conversation: ConversationAccount,
    pub channel_id: String,
    pub service_url: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Message,
    ConversationUpdate,
    Invoke,
    Unsupported,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members_added: Vec<ChannelAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_data: Option<Value>,
}

impl Activity {
    pub fn kind(&self) -> ActivityKind {
        match self.activity_type.as_str() {
            "message" => ActivityKind::Message,
            "conversationUpdate" => ActivityKind::ConversationUpdate,
            "invoke" => ActivityKind::Invoke,
            _ => ActivityKind::Unsupported,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.from.as_ref().map(|from| from.id.as_str()).filter(|id| !id.is_empty())
    }

    pub fn user_name(&self) -> Option<&str> {
        self.from.as_ref().and_then(|from| from.name.as_deref())
    }

    /// `channelData.teamsChatId` when Teams supplies it, otherwise the sender id.
    pub fn chat_id(&self) -> Option<ChatId> {
        self.channel_data
            .as_ref()
            .and_then(|data| data.get("teamsChatId"))
            .and_then(Value::as_str)
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.user_id())
            .map(ChatId::from)
    }

    /// Message text with Teams `<at>bot</at>` mentions removed.
    pub fn clean_text(&self) -> String {
        let raw = self.text.as_deref().unwrap_or_default();
        let mut cleaned = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(start) = rest.find("<at>") {
            cleaned.push_str(&rest[..start]);
            match rest[start..].find("</at>") {
                Some(end) => rest = &rest[start + end + "</at>".len()..],
                None => {
                    rest = "";
                }
            }
        }
        cleaned.push_str(rest);
        cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// True when someone other than the bot joined the conversation.
    pub fn has_new_members(&self) -> bool {
        let bot_id = self.recipient.as_ref().map(|bot| bot.id.as_str());
        self.members_added.iter().any(|member| Some(member.id.as_str()) != bot_id)
    }

    pub fn conversation_reference(&self) -> Option<ConversationReference> {
        Some(ConversationReference {
            activity_id: self.id.clone(),
            user: self.from.clone(),
            bot: self.recipient.clone(),
            conversation: self.conversation.clone()?,
            channel_id: self.channel_id.clone().unwrap_or_else(|| "msteams".to_owned()),
            service_url: self.service_url.clone()?,
        })
    }
}

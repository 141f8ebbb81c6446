use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound for any token lifetime reported by a provider.
pub const MAX_TOKEN_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// Converts a provider-reported `expires_in` into a lifetime, clamped to
/// `0..=MAX_TOKEN_TTL_SECS`.
pub fn bounded_lifetime(seconds: i64) -> Duration {
    Duration::seconds(seconds.clamp(0, MAX_TOKEN_TTL_SECS))
}

/// Identity a token is bound to: the Teams chat id, or the user id when the
/// activity carries no chat id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChatId(pub String);

impl ChatId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Salesforce,
    Outlook,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Salesforce, Provider::Outlook];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Salesforce => "salesforce",
            Self::Outlook => "outlook",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::Salesforce => "Salesforce",
            Self::Outlook => "Outlook",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "salesforce" | "sf" | "sfdc" => Some(Self::Salesforce),
            "outlook" | "microsoft" | "graph" | "email" => Some(Self::Outlook),
            _ => None,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a successful OAuth2 token endpoint response.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub instance_url: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl fmt::Debug for TokenGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenGrant")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("instance_url", &self.instance_url)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub chat_id: ChatId,
    pub provider: Provider,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub instance_url: Option<String>,
    pub token_type: String,
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TokenRecord {
    /// Builds the record to persist after a code exchange or refresh.
    ///
    /// Values the grant omits fall back to `previous`: Salesforce refresh
    /// responses carry no refresh token, and the instance URL only changes on
    /// a fresh login. `fallback_ttl` applies when the grant has no `expires_in`.
    pub fn from_grant(
        chat_id: ChatId,
        provider: Provider,
        grant: TokenGrant,
        previous: Option<&TokenRecord>,
        fallback_ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = grant
            .expires_in
            .filter(|seconds| *seconds > 0)
            .map(bounded_lifetime)
            .unwrap_or(fallback_ttl);
        // An unrepresentable expiry is stored as already expired so the next
        // call refreshes.
        let expires_at = now.checked_add_signed(ttl).unwrap_or(now);

        let refresh_token = grant
            .refresh_token
            .filter(|token| !token.is_empty())
            .or_else(|| previous.and_then(|record| record.refresh_token.clone()));
        let instance_url =
            grant.instance_url.or_else(|| previous.and_then(|record| record.instance_url.clone()));
        let scope = grant.scope.or_else(|| previous.and_then(|record| record.scope.clone()));

        Self {
            chat_id,
            provider,
            access_token: grant.access_token,
            refresh_token,
            instance_url,
            token_type: grant.token_type.unwrap_or_else(|| "Bearer".to_owned()),
            scope,
            expires_at,
            updated_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|token| !token.is_empty())
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("chat_id", &self.chat_id)
            .field("provider", &self.provider)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("instance_url", &self.instance_url)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use super::{ChatId, Provider, TokenGrant, TokenRecord, MAX_TOKEN_TTL_SECS};

    fn grant(refresh: Option<&str>, instance_url: Option<&str>, expires_in: Option<i64>) -> TokenGrant {
        TokenGrant {
            access_token: "access-new".to_owned(),
            refresh_token: refresh.map(str::to_owned),
            instance_url: instance_url.map(str::to_owned),
            token_type: None,
            scope: None,
            expires_in,
        }
    }

    #[test]
    fn refresh_grant_keeps_previous_refresh_token_and_instance() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp");
        let first = TokenRecord::from_grant(
            ChatId::from("chat-1"),
            Provider::Salesforce,
            grant(Some("refresh-1"), Some("https://acme.my.salesforce.com"), None),
            None,
            Duration::hours(2),
            now,
        );

        let refreshed = TokenRecord::from_grant(
            ChatId::from("chat-1"),
            Provider::Salesforce,
            grant(None, None, None),
            Some(&first),
            Duration::hours(2),
            now + Duration::hours(3),
        );

        assert_eq!(refreshed.access_token, "access-new");
        assert_eq!(refreshed.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(refreshed.instance_url.as_deref(), Some("https://acme.my.salesforce.com"));
        assert_eq!(refreshed.expires_at, now + Duration::hours(5));
    }

    #[test]
    fn expires_in_wins_over_fallback_ttl() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp");
        let record = TokenRecord::from_grant(
            ChatId::from("chat-1"),
            Provider::Outlook,
            grant(Some("refresh-1"), None, Some(3599)),
            None,
            Duration::hours(2),
            now,
        );

        assert_eq!(record.expires_at, now + Duration::seconds(3599));
        assert!(!record.is_expired(now + Duration::seconds(3598)));
        assert!(record.is_expired(now + Duration::seconds(3599)));
        assert_eq!(record.token_type, "Bearer");
    }

    #[test]
    fn oversized_expires_in_is_capped_at_one_year() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single().expect("valid timestamp");
        for expires_in in [i64::MAX, 100_000_000_000_000] {
            let record = TokenRecord::from_grant(
                ChatId::from("chat-1"),
                Provider::Salesforce,
                grant(Some("refresh-1"), None, Some(expires_in)),
                None,
                Duration::hours(2),
                now,
            );
            assert_eq!(record.expires_at, now + Duration::seconds(MAX_TOKEN_TTL_SECS));
        }
    }

    #[test]
    fn unrepresentable_expiry_is_stored_as_expired() {
        let now = chrono::DateTime::<Utc>::MAX_UTC - Duration::hours(1);
        let record = TokenRecord::from_grant(
            ChatId::from("chat-1"),
            Provider::Outlook,
            grant(Some("refresh-1"), None, Some(86_400)),
            None,
            Duration::hours(2),
            now,
        );
        assert_eq!(record.expires_at, now);
        assert!(record.is_expired(now));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let record = TokenRecord::from_grant(
            ChatId::from("chat-1"),
            Provider::Outlook,
            grant(Some("refresh-secret"), None, Some(60)),
            None,
            Duration::hours(1),
            Utc::now(),
        );

        let debug = format!("{record:?}");
        assert!(!debug.contains("access-new"));
        assert!(!debug.contains("refresh-secret"));
        assert!(record.can_refresh());
    }

    #[test]
    fn provider_aliases_parse() {
        assert_eq!(Provider::parse("SF"), Some(Provider::Salesforce));
        assert_eq!(Provider::parse(" outlook "), Some(Provider::Outlook));
        assert_eq!(Provider::parse("hubspot"), None);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub id: String,
    pub subject: String,
    pub from_name: Option<String>,
    pub from_address: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub body_preview: String,
}

impl EmailMessage {
    /// Sender name split into first and last name; a bare address yields its local part.
    pub fn sender_name_parts(&self) -> (Option<String>, Option<String>) {
        let name = self
            .from_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty() && !name.contains('@'))
            .map(str::to_owned)
            .or_else(|| {
                self.from_address
                    .as_deref()
                    .and_then(|address| address.split('@').next())
                    .map(|local| local.replace(['.', '_'], " "))
            });

        let Some(name) = name else { return (None, None) };
        let mut parts: Vec<&str> = name.split_whitespace().collect();
        match parts.len() {
            0 => (None, None),
            1 => (None, Some(parts[0].to_owned())),
            _ => {
                let last = parts.pop().map(str::to_owned);
                (Some(parts.join(" ")), last)
            }
        }
    }

    /// Organisation guessed from the sender's domain, e.g. `acme-corp.com` → `Acme Corp`.
    pub fn sender_company(&self) -> Option<String> {
        let domain = self.from_address.as_deref()?.split('@').nth(1)?;
        let label = domain.split('.').next().filter(|label| !label.is_empty())?;
        let company = label
            .split(['-', '_'])
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        (!company.is_empty()).then_some(company)
    }
}

#[cfg(test)]
mod tests {
    use super::EmailMessage;

    fn message(name: Option<&str>, address: Option<&str>) -> EmailMessage {
        EmailMessage {
            id: "AAMk-1".to_owned(),
            subject: "Pricing follow-up".to_owned(),
            from_name: name.map(str::to_owned),
            from_address: address.map(str::to_owned),
            received_at: None,
            body_preview: "Can we talk about volume pricing?".to_owned(),
        }
    }

    #[test]
    fn splits_display_name_into_first_and_last() {
        let email = message(Some("Mary Ann Smith"), Some("mary@acme-corp.com"));
        assert_eq!(
            email.sender_name_parts(),
            (Some("Mary Ann".to_owned()), Some("Smith".to_owned()))
        );
        assert_eq!(email.sender_company().as_deref(), Some("Acme Corp"));
    }

    #[test]
    fn falls_back_to_address_local_part() {
        let email = message(None, Some("john.doe@globex.io"));
        assert_eq!(email.sender_name_parts(), (Some("john".to_owned()), Some("doe".to_owned())));
        assert_eq!(email.sender_company().as_deref(), Some("Globex"));
    }

    #[test]
    fn missing_sender_yields_nothing() {
        let email = message(None, None);
        assert_eq!(email.sender_name_parts(), (None, None));
        assert_eq!(email.sender_company(), None);
    }
}

//! SOQL construction.
//!
//! User text only reaches a query through [`SoqlBuilder`], which escapes every
//! literal. Identifiers (fields, sObjects) are validated instead of escaped.

use std::fmt;

use thiserror::Error;

/// Upper bound on rows fetched by a single query.
pub const MAX_QUERY_LIMIT: u32 = 200;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SoqlError {
    #[error("`{0}` is not a valid SOQL identifier")]
    InvalidIdentifier(String),
    #[error("query selects no fields")]
    NoFields,
    #[error("query has no FROM object")]
    NoObject,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Condition {
    Contains { field: String, fragment: String },
    Equals { field: String, value: String },
}

#[derive(Clone, Debug, Default)]
pub struct SoqlBuilder {
    fields: Vec<String>,
    object: Option<String>,
    conditions: Vec<Condition>,
    order_by: Option<(String, SortOrder)>,
    limit: Option<u32>,
}

/// A fully rendered, escaped SOQL statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SoqlQuery(String);

impl SoqlQuery {
    pub fn builder() -> SoqlBuilder {
        SoqlBuilder::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SoqlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SoqlBuilder {
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn from(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// `field LIKE '%fragment%'`, with LIKE wildcards in the fragment escaped.
    pub fn where_contains(mut self, field: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.conditions.push(Condition::Contains { field: field.into(), fragment: fragment.into() });
        self
    }

    pub fn where_equals(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push(Condition::Equals { field: field.into(), value: value.into() });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((field.into(), order));
        self
    }

    /// Clamped to `1..=MAX_QUERY_LIMIT`.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit.clamp(1, MAX_QUERY_LIMIT));
        self
    }

    pub fn build(self) -> Result<SoqlQuery, SoqlError> {
        if self.fields.is_empty() {
            return Err(SoqlError::NoFields);
        }
        for field in &self.fields {
            check_identifier(field)?;
        }
        let object = self.object.ok_or(SoqlError::NoObject)?;
        check_identifier(&object)?;

        let mut statement = format!("SELECT {} FROM {object}", self.fields.join(", "));

        let mut clauses = Vec::with_capacity(self.conditions.len());
        for condition in &self.conditions {
            match condition {
                Condition::Contains { field, fragment } => {
                    check_identifier(field)?;
                    clauses.push(format!("{field} LIKE '%{}%'", escape_like(fragment)));
                }
                Condition::Equals { field, value } => {
                    check_identifier(field)?;
                    clauses.push(format!("{field} = '{}'", escape_literal(value)));
                }
            }
        }
        if !clauses.is_empty() {
            statement.push_str(" WHERE ");
            statement.push_str(&clauses.join(" AND "));
        }

        if let Some((field, order)) = &self.order_by {
            check_identifier(field)?;
            let direction = match order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            statement.push_str(&format!(" ORDER BY {field} {direction}"));
        }

        if let Some(limit) = self.limit {
            statement.push_str(&format!(" LIMIT {limit}"));
        }

        Ok(SoqlQuery(statement))
    }
}

/// Escapes a value for use inside a single-quoted SOQL string literal.
pub fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 8);
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '\'' => escaped.push_str("\\'"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '\u{8}' => escaped.push_str("\\b"),
            '\u{c}' => escaped.push_str("\\f"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Like [`escape_literal`], additionally neutralising `%` and `_`.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 8);
    for ch in escape_literal(value).chars() {
        match ch {
            '%' => escaped.push_str("\\%"),
            '_' => escaped.push_str("\\_"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn check_identifier(value: &str) -> Result<(), SoqlError> {
    let mut chars = value.chars();
    let valid_start = chars.next().is_some_and(|ch| ch.is_ascii_alphabetic());
    let valid_rest = chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '.');
    if valid_start && valid_rest {
        Ok(())
    } else {
        Err(SoqlError::InvalidIdentifier(value.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::{escape_like, escape_literal, SoqlError, SoqlQuery, SortOrder};

    #[test]
    fn renders_resolver_style_query() {
        let query = SoqlQuery::builder()
            .select(["Id", "Name"])
            .from("Account")
            .where_contains("Name", "Acme")
            .limit(200)
            .build()
            .expect("valid query");

        assert_eq!(query.as_str(), "SELECT Id, Name FROM Account WHERE Name LIKE '%Acme%' LIMIT 200");
    }

    #[test]
    fn quotes_and_backslashes_cannot_break_out_of_literals() {
        let query = SoqlQuery::builder()
            .select(["Id"])
            .from("Lead")
            .where_contains("Name", "O'Brien' OR Name LIKE '%")
            .build()
            .expect("valid query");

        assert_eq!(
            query.as_str(),
            "SELECT Id FROM Lead WHERE Name LIKE '%O\\'Brien\\' OR Name LIKE \\'\\%%'"
        );
        assert_eq!(escape_literal(r"a\'b"), r"a\\\'b");
    }

    #[test]
    fn like_wildcards_are_escaped_but_equals_keeps_them() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");

        let query = SoqlQuery::builder()
            .select(["Id"])
            .from("Task")
            .where_equals("Subject", "50%_off")
            .order_by("CreatedDate", SortOrder::Desc)
            .limit(5000)
            .build()
            .expect("valid query");
        assert_eq!(
            query.as_str(),
            "SELECT Id FROM Task WHERE Subject = '50%_off' ORDER BY CreatedDate DESC LIMIT 200"
        );
    }

    #[test]
    fn identifiers_are_validated() {
        let error = SoqlQuery::builder()
            .select(["Id", "Name FROM User --"])
            .from("Lead")
            .build()
            .expect_err("field with spaces is rejected");
        assert!(matches!(error, SoqlError::InvalidIdentifier(_)));

        let missing = SoqlQuery::builder().from("Lead").build();
        assert_eq!(missing, Err(SoqlError::NoFields));
    }
}

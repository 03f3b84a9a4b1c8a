use crate::error::Result;
use crate::message::CachedMessage;
use chrono::{DateTime, Utc};

/// Predicate algebra for searching cached messages.
///
/// Evaluated locally against cache contents unless the active mode is
/// server-authoritative and the whole predicate lowers to a remote query.
#[derive(Debug, Clone)]
pub enum Predicate {
    SenderContains(String),
    SubjectContains(String),
    SentDateBetween(DateTime<Utc>, DateTime<Utc>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    /// Evaluate against one message, hydrating the attributes it needs.
    pub fn matches(&self, message: &CachedMessage) -> Result<bool> {
        match self {
            Predicate::SenderContains(needle) => {
                let from = message.from()?.unwrap_or_default();
                Ok(contains_ci(&from, needle))
            }
            Predicate::SubjectContains(needle) => {
                let subject = message.subject()?.unwrap_or_default();
                Ok(contains_ci(&subject, needle))
            }
            Predicate::SentDateBetween(start, end) => match message.sent_date()? {
                Some(date) => {
                    let date = date.with_timezone(&Utc);
                    Ok(date >= *start && date <= *end)
                }
                None => Ok(false),
            },
            Predicate::And(terms) => {
                for term in terms {
                    if !term.matches(message)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Predicate::Or(terms) => {
                for term in terms {
                    if term.matches(message)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Not(term) => Ok(!term.matches(message)?),
        }
    }

    /// Lower to a remote query if every node is remote-expressible.
    /// `Or` and `Not` always stay local.
    pub fn lower(&self) -> Option<RemoteQuery> {
        match self {
            Predicate::SenderContains(s) => Some(RemoteQuery::SenderContains(s.clone())),
            Predicate::SubjectContains(s) => Some(RemoteQuery::SubjectContains(s.clone())),
            Predicate::SentDateBetween(a, b) => Some(RemoteQuery::SentDateBetween(*a, *b)),
            Predicate::And(terms) => {
                let lowered: Option<Vec<RemoteQuery>> = terms.iter().map(|t| t.lower()).collect();
                lowered.map(RemoteQuery::And)
            }
            Predicate::Or(_) | Predicate::Not(_) => None,
        }
    }
}

/// The remote-expressible subset of the predicate algebra, consumed by
/// `RemoteStore::search`.
#[derive(Debug, Clone)]
pub enum RemoteQuery {
    SenderContains(String),
    SubjectContains(String),
    SentDateBetween(DateTime<Utc>, DateTime<Utc>),
    And(Vec<RemoteQuery>),
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

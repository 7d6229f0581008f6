//! Resource records and their provider-independent identity.
//!
//! A record's [`RecordId`] is derived from its natural key: the provider-assigned identifier(s)
//! plus the region. Rows that have not reached the provider yet have no natural key and get a
//! pending id built from their surrogate row id, which never matches a cloud record.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::StratusError;

const SEPARATOR: char = '|';
const ESCAPE: char = '\\';
const PENDING_PREFIX: &str = "~pending";

/// Opaque identity used to match a db record with its cloud counterpart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Encodes natural key fields; `fields()` is the inverse.
    pub fn generate<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = String::new();
        for (idx, field) in fields.into_iter().enumerate() {
            if idx > 0 {
                out.push(SEPARATOR);
            }
            for c in field.as_ref().chars() {
                if c == SEPARATOR || c == ESCAPE {
                    out.push(ESCAPE);
                }
                out.push(c);
            }
        }
        Self(out)
    }

    /// Id for a row the provider has not assigned a key to yet.
    pub fn pending(kind: &str, surrogate: Option<i64>) -> Self {
        let surrogate = surrogate.map_or_else(|| "new".to_string(), |id| id.to_string());
        Self::generate([PENDING_PREFIX, kind, surrogate.as_str()])
    }

    pub fn is_pending(&self) -> bool {
        self.0.starts_with(PENDING_PREFIX)
    }

    /// Surrogate row id carried by a pending id.
    pub fn pending_surrogate(&self) -> Option<i64> {
        if !self.is_pending() {
            return None;
        }
        self.fields().get(2).and_then(|raw| raw.parse().ok())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decodes the natural key fields.
    pub fn fields(&self) -> Vec<String> {
        let mut fields = vec![String::new()];
        let mut chars = self.0.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => {
                    if let Some(next) = chars.next()
                        && let Some(last) = fields.last_mut()
                    {
                        last.push(next);
                    }
                }
                SEPARATOR => fields.push(String::new()),
                other => {
                    if let Some(last) = fields.last_mut() {
                        last.push(other);
                    }
                }
            }
        }
        fields
    }

    /// Decodes exactly `N` fields, as each record kind knows its own key arity.
    pub fn fields_exact<const N: usize>(&self) -> Result<[String; N], StratusError> {
        let fields = self.fields();
        let found = fields.len();
        <[String; N]>::try_from(fields).map_err(|_| {
            StratusError::validation(format!(
                "record id '{}' has {found} fields, expected {N}",
                self.0
            ))
        })
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One typed resource row, comparable across the db and cloud sides.
pub trait Record: Clone + fmt::Debug + Send + Sync + 'static {
    /// Stable kind name; also used as the memo namespace and in log lines.
    const KIND: &'static str;

    /// Natural key fields in encoding order, or `None` until the provider assigned them.
    fn natural_key(&self) -> Option<Vec<String>>;

    fn region(&self) -> &str;

    /// Local row id used for referential integrity inside the target database.
    fn surrogate_id(&self) -> Option<i64>;

    fn set_surrogate_id(&mut self, id: Option<i64>);

    fn record_id(&self) -> RecordId {
        match self.natural_key() {
            Some(fields) => RecordId::generate(fields),
            None => RecordId::pending(Self::KIND, self.surrogate_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_invert_generate() {
        let id = RecordId::generate(["arn:aws:sns:us-east-1:1:orders", "ops@example.com", "us-east-1"]);
        assert_eq!(
            id.fields(),
            vec!["arn:aws:sns:us-east-1:1:orders", "ops@example.com", "us-east-1"]
        );
    }

    #[test]
    fn separators_inside_fields_are_escaped() {
        let id = RecordId::generate(["a|b", "c\\d", ""]);
        assert_eq!(id.as_str(), "a\\|b|c\\\\d|");
        assert_eq!(id.fields(), vec!["a|b", "c\\d", ""]);
    }

    #[test]
    fn fields_exact_checks_arity() {
        let id = RecordId::generate(["vpc-1", "us-east-1"]);
        let [vpc_id, region] = id.fields_exact::<2>().unwrap();
        assert_eq!(vpc_id, "vpc-1");
        assert_eq!(region, "us-east-1");
        assert!(id.fields_exact::<3>().is_err());
    }

    #[test]
    fn pending_ids_never_collide_with_natural_keys() {
        let pending = RecordId::pending("vpc", Some(7));
        assert!(pending.is_pending());
        assert_ne!(pending, RecordId::generate(["7", "us-east-1"]));
        assert_ne!(pending, RecordId::pending("subnet", Some(7)));
        assert_eq!(pending.pending_surrogate(), Some(7));
        assert_eq!(RecordId::pending("vpc", None).pending_surrogate(), None);
    }
}

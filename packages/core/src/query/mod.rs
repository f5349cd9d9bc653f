//! Declarative queries: a key-prefix scope plus an optional condition
//! tree evaluated against record attributes.

pub mod accessor;
pub mod condition;

use crate::error::Error;
use crate::record::Record;

pub use accessor::Accessor;
pub use condition::{Condition, IsValue, Operand, Operator};

/// A query over one database: a key prefix and an optional predicate.
///
/// Built with [`Query::new`], optionally narrowed with
/// [`Query::filter`], and validated with [`Query::check`] before use.
#[derive(Debug, Clone)]
pub struct Query {
    database_name: String,
    database_key_prefix: String,
    condition: Option<Condition>,
    checked: bool,
}

impl Query {
    /// Creates a query scoped to a key prefix.
    ///
    /// `prefix` is either `"<dbName>"` (whole database) or
    /// `"<dbName>:<keyPrefix>"`.
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let (name, key_prefix) = match prefix.split_once(':') {
            Some((name, key_prefix)) => (name, key_prefix),
            None => (prefix, ""),
        };
        Self {
            database_name: name.to_string(),
            database_key_prefix: key_prefix.to_string(),
            condition: None,
            checked: false,
        }
    }

    /// Narrows the query with a condition. Multiple calls conjoin.
    #[must_use]
    pub fn filter(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            None => condition,
            Some(Condition::And(mut children)) => {
                children.push(condition);
                Condition::And(children)
            }
            Some(existing) => Condition::And(vec![existing, condition]),
        });
        self.checked = false;
        self
    }

    /// Validates the condition tree and compiles its regexes.
    ///
    /// # Errors
    ///
    /// `InvalidQuery` on an empty database name, a mismatched
    /// operator/operand pairing, or a malformed regex.
    pub fn check(mut self) -> Result<Self, Error> {
        if self.database_name.is_empty() {
            return Err(Error::InvalidQuery("missing database name".to_string()));
        }
        if let Some(condition) = &mut self.condition {
            condition.check()?;
        }
        self.checked = true;
        Ok(self)
    }

    /// Whether `check()` has validated this query.
    #[must_use]
    pub fn is_checked(&self) -> bool {
        self.checked
    }

    /// The database this query targets.
    #[must_use]
    pub fn database_name(&self) -> &str {
        &self.database_name
    }

    /// The intra-database key prefix.
    #[must_use]
    pub fn database_key_prefix(&self) -> &str {
        &self.database_key_prefix
    }

    /// Whether an intra-database key falls inside the query's prefix.
    #[must_use]
    pub fn matches_db_key(&self, database_key: &str) -> bool {
        database_key.starts_with(&self.database_key_prefix)
    }

    /// Whether a full `<dbName>:<dbKey>` pair falls inside the query's
    /// scope.
    #[must_use]
    pub fn matches_key(&self, database_name: &str, database_key: &str) -> bool {
        database_name == self.database_name && self.matches_db_key(database_key)
    }

    /// Whether the record's attributes satisfy the condition tree.
    ///
    /// A record without an attribute view only matches condition-free
    /// queries.
    #[must_use]
    pub fn matches_record(&self, record: &dyn Record) -> bool {
        let Some(condition) = &self.condition else {
            return true;
        };
        let Some(attributes) = record.attributes() else {
            return false;
        };
        condition.matches(&Accessor::new(&attributes))
    }

    /// Whether the record matches scope and conditions.
    #[must_use]
    pub fn matches(&self, record: &dyn Record) -> bool {
        let Some(key) = record.base().key() else {
            return false;
        };
        self.matches_key(key.database_name(), key.database_key()) && self.matches_record(record)
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use crate::dsd::{self, Format};
    use crate::record::Base;

    use super::*;

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Player {
        #[serde(skip)]
        base: Base,
        name: String,
        score: i64,
    }

    impl Record for Player {
        fn base(&self) -> &Base {
            &self.base
        }

        fn payload(&self, format: Format) -> Result<Vec<u8>, Error> {
            dsd::dump(self, format)
        }

        fn attributes(&self) -> Option<serde_json::Value> {
            serde_json::to_value(self).ok()
        }
    }

    fn player(key: &str, name: &str, score: i64) -> Player {
        let player = Player {
            name: name.to_string(),
            score,
            ..Player::default()
        };
        player.set_key(key).unwrap();
        player
    }

    #[test]
    fn prefix_parsing() {
        let q = Query::new("t1:profiles/");
        assert_eq!(q.database_name(), "t1");
        assert_eq!(q.database_key_prefix(), "profiles/");

        let q = Query::new("t1");
        assert_eq!(q.database_name(), "t1");
        assert_eq!(q.database_key_prefix(), "");
    }

    #[test]
    fn matches_key_requires_database_and_prefix() {
        let q = Query::new("t1:profiles/");
        assert!(q.matches_key("t1", "profiles/alice"));
        assert!(!q.matches_key("t1", "settings/alice"));
        assert!(!q.matches_key("t2", "profiles/alice"));
    }

    #[test]
    fn check_requires_database_name() {
        assert!(Query::new(":broken").check().is_err());
        assert!(Query::new("t1").check().is_ok());
    }

    #[test]
    fn filter_conjoins_conditions() {
        let q = Query::new("t1")
            .filter(Condition::field("name", Operator::EndsWith, "bert"))
            .filter(Condition::field("score", Operator::GreaterThan, 100))
            .check()
            .unwrap();
        assert!(q.is_checked());

        assert!(q.matches(&player("t1:a", "Herbert", 411)));
        assert!(q.matches(&player("t1:b", "Norbert", 217)));
        assert!(!q.matches(&player("t1:c", "Fritz", 347)));
        assert!(!q.matches(&player("t1:d", "Herbert", 50)));
    }

    #[test]
    fn check_rejects_mixed_operands_in_tree() {
        let q = Query::new("t1").filter(Condition::field("score", Operator::GreaterThan, 1.5));
        assert!(matches!(q.check(), Err(Error::InvalidQuery(_))));
    }

    #[test]
    fn unkeyed_record_never_matches() {
        let q = Query::new("t1").check().unwrap();
        let unkeyed = Player {
            name: "x".to_string(),
            score: 0,
            ..Player::default()
        };
        assert!(!q.matches(&unkeyed));
    }

    #[test]
    fn condition_free_query_matches_any_record_in_scope() {
        let q = Query::new("t1:").check().unwrap();
        assert!(q.matches(&player("t1:any", "x", 0)));
        assert!(!q.matches(&player("t2:any", "x", 0)));
    }
}

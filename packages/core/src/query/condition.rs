//! Condition tree: typed operators over dotted attribute paths.

use regex::Regex;

use crate::error::Error;

use super::accessor::Accessor;

/// Comparison operator of a field condition.
///
/// Integer and float comparisons are distinct kinds; `check()` rejects an
/// operator paired with an operand of the other numeric type instead of
/// coercing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Integer equality.
    Equals,
    /// Integer `>`.
    GreaterThan,
    /// Integer `>=`.
    GreaterThanOrEqual,
    /// Integer `<`.
    LessThan,
    /// Integer `<=`.
    LessThanOrEqual,
    /// Float equality.
    FloatEquals,
    /// Float `>`.
    FloatGreaterThan,
    /// Float `>=`.
    FloatGreaterThanOrEqual,
    /// Float `<`.
    FloatLessThan,
    /// Float `<=`.
    FloatLessThanOrEqual,
    /// String equality.
    SameAs,
    /// Substring match.
    Contains,
    /// String prefix match.
    StartsWith,
    /// String suffix match.
    EndsWith,
    /// Membership in a string list.
    In,
    /// Regular expression match.
    Matches,
}

impl Operator {
    fn wants_int(self) -> bool {
        matches!(
            self,
            Operator::Equals
                | Operator::GreaterThan
                | Operator::GreaterThanOrEqual
                | Operator::LessThan
                | Operator::LessThanOrEqual
        )
    }

    fn wants_float(self) -> bool {
        matches!(
            self,
            Operator::FloatEquals
                | Operator::FloatGreaterThan
                | Operator::FloatGreaterThanOrEqual
                | Operator::FloatLessThan
                | Operator::FloatLessThanOrEqual
        )
    }

    fn wants_text(self) -> bool {
        matches!(
            self,
            Operator::SameAs
                | Operator::Contains
                | Operator::StartsWith
                | Operator::EndsWith
                | Operator::Matches
        )
    }
}

/// Literal operand of a field condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl From<i64> for Operand {
    fn from(v: i64) -> Self {
        Operand::Int(v)
    }
}

impl From<i32> for Operand {
    fn from(v: i32) -> Self {
        Operand::Int(i64::from(v))
    }
}

impl From<f64> for Operand {
    fn from(v: f64) -> Self {
        Operand::Float(v)
    }
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Operand::Text(v.to_string())
    }
}

impl From<String> for Operand {
    fn from(v: String) -> Self {
        Operand::Text(v)
    }
}

impl From<Vec<String>> for Operand {
    fn from(v: Vec<String>) -> Self {
        Operand::List(v)
    }
}

impl From<Vec<&str>> for Operand {
    fn from(v: Vec<&str>) -> Self {
        Operand::List(v.into_iter().map(str::to_string).collect())
    }
}

/// Literal checked by an `Is` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsValue {
    True,
    False,
    /// Null, or an absent attribute.
    Nil,
}

/// A node of the predicate tree.
#[derive(Debug, Clone)]
pub enum Condition {
    /// All children must match.
    And(Vec<Condition>),
    /// At least one child must match.
    Or(Vec<Condition>),
    /// The child must not match.
    Not(Box<Condition>),
    /// A typed comparison of one attribute.
    Field {
        key: String,
        op: Operator,
        operand: Operand,
        /// Compiled by `check()` for `Matches` conditions.
        regex: Option<Regex>,
    },
    /// Attribute is true / false / nil.
    Is { key: String, value: IsValue },
    /// Attribute is present.
    Exists { key: String },
}

impl Condition {
    /// A field comparison condition.
    pub fn field(key: impl Into<String>, op: Operator, operand: impl Into<Operand>) -> Self {
        Condition::Field {
            key: key.into(),
            op,
            operand: operand.into(),
            regex: None,
        }
    }

    /// An `Is` condition.
    pub fn is(key: impl Into<String>, value: IsValue) -> Self {
        Condition::Is {
            key: key.into(),
            value,
        }
    }

    /// An `Exists` condition.
    pub fn exists(key: impl Into<String>) -> Self {
        Condition::Exists { key: key.into() }
    }

    /// Conjunction.
    #[must_use]
    pub fn and(children: Vec<Condition>) -> Self {
        Condition::And(children)
    }

    /// Disjunction.
    #[must_use]
    pub fn or(children: Vec<Condition>) -> Self {
        Condition::Or(children)
    }

    /// Negation.
    #[must_use]
    pub fn not(child: Condition) -> Self {
        Condition::Not(Box::new(child))
    }

    /// Validates operator/operand pairings and compiles regexes.
    ///
    /// # Errors
    ///
    /// `InvalidQuery` on a mismatched pairing or a malformed regex.
    pub fn check(&mut self) -> Result<(), Error> {
        match self {
            Condition::And(children) | Condition::Or(children) => {
                for child in children {
                    child.check()?;
                }
                Ok(())
            }
            Condition::Not(child) => child.check(),
            Condition::Is { .. } | Condition::Exists { .. } => Ok(()),
            Condition::Field {
                key,
                op,
                operand,
                regex,
            } => {
                match (*op, &*operand) {
                    (op, Operand::Int(_)) if op.wants_int() => Ok(()),
                    (op, Operand::Float(_)) if op.wants_float() => Ok(()),
                    (op, Operand::Text(_)) if op.wants_text() => Ok(()),
                    (Operator::In, Operand::List(_)) => Ok(()),
                    (op, operand) => Err(Error::InvalidQuery(format!(
                        "operator {op:?} does not accept operand {operand:?} (key {key})"
                    ))),
                }?;
                if *op == Operator::Matches {
                    if let Operand::Text(pattern) = operand {
                        *regex = Some(Regex::new(pattern).map_err(|err| {
                            Error::InvalidQuery(format!("bad regex for key {key}: {err}"))
                        })?);
                    }
                }
                Ok(())
            }
        }
    }

    /// Evaluates the condition against an attribute accessor.
    ///
    /// Unresolvable or type-mismatched attributes make the condition
    /// false (and `Not` of it true).
    #[must_use]
    pub fn matches(&self, acc: &Accessor<'_>) -> bool {
        match self {
            Condition::And(children) => children.iter().all(|c| c.matches(acc)),
            Condition::Or(children) => children.iter().any(|c| c.matches(acc)),
            Condition::Not(child) => !child.matches(acc),
            Condition::Exists { key } => acc.exists(key),
            Condition::Is { key, value } => match value {
                IsValue::True => acc.get_bool(key) == Some(true),
                IsValue::False => acc.get_bool(key) == Some(false),
                IsValue::Nil => match acc.get(key) {
                    None => true,
                    Some(v) => v.is_null(),
                },
            },
            Condition::Field {
                key,
                op,
                operand,
                regex,
            } => Self::matches_field(acc, key, *op, operand, regex.as_ref()),
        }
    }

    fn matches_field(
        acc: &Accessor<'_>,
        key: &str,
        op: Operator,
        operand: &Operand,
        regex: Option<&Regex>,
    ) -> bool {
        match (op, operand) {
            (Operator::Equals, Operand::Int(want)) => acc.get_int(key) == Some(*want),
            (Operator::GreaterThan, Operand::Int(want)) => {
                acc.get_int(key).is_some_and(|v| v > *want)
            }
            (Operator::GreaterThanOrEqual, Operand::Int(want)) => {
                acc.get_int(key).is_some_and(|v| v >= *want)
            }
            (Operator::LessThan, Operand::Int(want)) => {
                acc.get_int(key).is_some_and(|v| v < *want)
            }
            (Operator::LessThanOrEqual, Operand::Int(want)) => {
                acc.get_int(key).is_some_and(|v| v <= *want)
            }
            (Operator::FloatEquals, Operand::Float(want)) => {
                acc.get_float(key).is_some_and(|v| (v - *want).abs() < f64::EPSILON)
            }
            (Operator::FloatGreaterThan, Operand::Float(want)) => {
                acc.get_float(key).is_some_and(|v| v > *want)
            }
            (Operator::FloatGreaterThanOrEqual, Operand::Float(want)) => {
                acc.get_float(key).is_some_and(|v| v >= *want)
            }
            (Operator::FloatLessThan, Operand::Float(want)) => {
                acc.get_float(key).is_some_and(|v| v < *want)
            }
            (Operator::FloatLessThanOrEqual, Operand::Float(want)) => {
                acc.get_float(key).is_some_and(|v| v <= *want)
            }
            (Operator::SameAs, Operand::Text(want)) => acc.get_str(key) == Some(want.as_str()),
            (Operator::Contains, Operand::Text(want)) => {
                acc.get_str(key).is_some_and(|v| v.contains(want.as_str()))
            }
            (Operator::StartsWith, Operand::Text(want)) => {
                acc.get_str(key).is_some_and(|v| v.starts_with(want.as_str()))
            }
            (Operator::EndsWith, Operand::Text(want)) => {
                acc.get_str(key).is_some_and(|v| v.ends_with(want.as_str()))
            }
            (Operator::In, Operand::List(list)) => {
                acc.get_str(key).is_some_and(|v| list.iter().any(|e| e == v))
            }
            (Operator::Matches, Operand::Text(pattern)) => {
                let Some(value) = acc.get_str(key) else {
                    return false;
                };
                match regex {
                    Some(re) => re.is_match(value),
                    // Unchecked query: compile on the fly.
                    None => {
                        tracing::trace!(key, "evaluating regex condition of unchecked query");
                        Regex::new(pattern).is_ok_and(|re| re.is_match(value))
                    }
                }
            }
            _ => false,
        }
    }
}

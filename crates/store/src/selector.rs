//! Query selectors: a conjunction of field predicates.
//!
//! Field names may be dotted paths into nested objects (`message.id`).
//! A missing field satisfies `Ne` and `Nin` but never `Eq`.

use serde_json::Value;

use courier_common::types::Document;

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    /// `{field: value}`
    Eq(Value),
    /// `{field: {$ne: value}}`
    Ne(Value),
    /// `{field: {$nin: [values]}}`
    Nin(Vec<Value>),
}

impl Predicate {
    fn matches(&self, field: Option<&Value>) -> bool {
        match self {
            Predicate::Eq(expected) => field == Some(expected),
            Predicate::Ne(excluded) => field != Some(excluded),
            Predicate::Nin(excluded) => field.is_none_or(|value| !excluded.contains(value)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    clauses: Vec<(String, Predicate)>,
}

impl Selector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), Predicate::Eq(value.into())));
        self
    }

    pub fn ne(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), Predicate::Ne(value.into())));
        self
    }

    pub fn nin<I, V>(mut self, field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.clauses.push((field.into(), Predicate::Nin(values)));
        self
    }

    /// String value of the first equality clause on `field`, if any.
    /// Backends use it to narrow their scan.
    pub fn equality(&self, field: &str) -> Option<&str> {
        self.clauses.iter().find_map(|(name, predicate)| match predicate {
            Predicate::Eq(Value::String(s)) if name == field => Some(s.as_str()),
            _ => None,
        })
    }

    /// Whether `doc` satisfies every clause.
    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(field, predicate)| predicate.matches(lookup(doc, field)))
    }
}

fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

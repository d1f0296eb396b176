//! Ordered v5 request arguments.

use std::fmt;

pub const PROTOCOL_PRODUCT: &str = "GIMPS";
pub const PROTOCOL_VERSION: &str = "0.95";

/// The v5 transactions the agent issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transaction {
    UpdateComputer,
    ProgramOptions,
    GetAssignment,
    RegisterAssignment,
    AssignmentUnreserve,
    AssignmentProgress,
    AssignmentResult,
}

impl Transaction {
    pub fn code(self) -> &'static str {
        match self {
            Self::UpdateComputer => "uc",
            Self::ProgramOptions => "po",
            Self::GetAssignment => "ga",
            Self::RegisterAssignment => "ra",
            Self::AssignmentUnreserve => "au",
            Self::AssignmentProgress => "ap",
            Self::AssignmentResult => "ar",
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Insertion-ordered key/value pairs. The encoded form is the exact query
/// string that gets hashed and sent, so ordering is part of the contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionArgs {
    pairs: Vec<(String, String)>,
}

impl TransactionArgs {
    /// Base arguments (`px`, `v`) followed by the transaction type.
    pub fn new(transaction: Transaction) -> Self {
        let mut args = Self::default();
        args.insert("px", PROTOCOL_PRODUCT);
        args.insert("v", PROTOCOL_VERSION);
        args.insert("t", transaction.code());
        args
    }

    /// Sets `key`, keeping the position of an existing entry.
    pub fn insert(&mut self, key: &str, value: impl ToString) -> &mut Self {
        let value = value.to_string();
        match self.pairs.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.pairs.push((key.to_owned(), value)),
        }
        self
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    pub fn with_opt<V: ToString>(mut self, key: &str, value: Option<V>) -> Self {
        if let Some(value) = value {
            self.insert(key, value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn transaction(&self) -> &str {
        self.get("t").unwrap_or("?")
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Form-urlencodes the pairs in insertion order.
    pub fn encode(&self) -> String {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.pairs {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

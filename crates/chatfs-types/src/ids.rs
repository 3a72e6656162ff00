//! Typed identifiers for clusters and store messages.
//!
//! A cluster is addressed by the store-native chat id that backs it, so
//! `ClusterId` doubles as the chat handle passed back to the blob store.
//! `MessageId` is whatever the store hands out for an upload; the core never
//! looks inside it and only compares it for equality.

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Message id carried by folder rows at the persistence boundary.
pub const FOLDER_MESSAGE_ID: &str = "-1";

/// A cluster identifier (the store-native chat id).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(i64);

impl ClusterId {
    /// Wrap a raw chat id.
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw chat id.
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for ClusterId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl From<ClusterId> for i64 {
    fn from(id: ClusterId) -> i64 {
        id.0
    }
}

impl FromStr for ClusterId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<i64>().map(Self)
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A store message identifier. Opaque: compared, never parsed.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Wrap a store-issued id.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the raw id.
    pub fn into_string(self) -> String {
        self.0
    }

    /// True for the legacy folder sentinel (`"-1"`).
    pub fn is_folder_sentinel(&self) -> bool {
        self.0 == FOLDER_MESSAGE_ID
    }
}

impl From<String> for MessageId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for MessageId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl AsRef<str> for MessageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_id_parse_and_display() {
        let id: ClusterId = " -1002003 ".parse().unwrap();
        assert_eq!(id.get(), -1002003);
        assert_eq!(id.to_string(), "-1002003");
        assert!("chat".parse::<ClusterId>().is_err());
    }

    #[test]
    fn test_message_id_is_opaque_string() {
        let id = MessageId::from("00042");
        assert_eq!(id.as_str(), "00042");
        assert_ne!(id, MessageId::from("42"));
        assert!(!id.is_folder_sentinel());
        assert!(MessageId::from(FOLDER_MESSAGE_ID).is_folder_sentinel());
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&ClusterId::new(7)).unwrap();
        assert_eq!(json, "7");
        let json = serde_json::to_string(&MessageId::new("12")).unwrap();
        assert_eq!(json, "\"12\"");
    }
}

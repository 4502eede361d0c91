/// Shared record types exposed by the store

pub mod jid;

pub use jid::Jid;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contact record as stored per account.
///
/// `found` is false when no row exists for the contact; the name
/// fields are empty strings in that case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub found: bool,
    pub first_name: String,
    pub full_name: String,
    pub push_name: String,
    pub business_name: String,
}

/// One entry of a bulk contact-name import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactEntry {
    pub jid: Jid,
    pub first_name: String,
    pub full_name: String,
}

/// Local settings of a single chat.
///
/// `muted_until` is epoch seconds; zero means not muted. `found` is
/// false when the chat has no settings row (all fields default).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    pub found: bool,
    pub muted_until: i64,
    pub pinned: bool,
    pub archived: bool,
}

/// Privacy token received from a peer, required for certain message
/// types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivacyToken {
    pub user: Jid,
    pub token: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

/// One message secret to insert; first write wins.
#[derive(Debug, Clone)]
pub struct MessageSecretInsert {
    pub chat: Jid,
    pub sender: Jid,
    pub id: String,
    pub secret: Vec<u8>,
}

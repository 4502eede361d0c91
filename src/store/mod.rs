use crate::{
    error::Result,
    types::{ChatSettings, ContactEntry, ContactInfo, Jid, MessageSecretInsert, PrivacyToken},
    util::keys::{KeyPair, PreKey, SignedPreKey},
};
use async_trait::async_trait;
use std::collections::HashMap;
use uuid::Uuid;

/// Signed device identity received from the server during pairing.
///
/// This mirrors the ADV identity payload; the store only needs its raw
/// signature material, so it is kept as a plain struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvSignedDeviceIdentity {
    pub details: Vec<u8>,
    pub account_signature: [u8; 64],
    pub account_signature_key: [u8; 32],
    pub device_signature: [u8; 64],
}

/// All durable state of one registered (or registering) device.
#[derive(Debug, Clone)]
pub struct Device {
    /// Set once the device has paired; rows cannot be saved without it.
    pub jid: Option<Jid>,
    pub registration_id: u32,
    pub noise_key: KeyPair,
    pub identity_key: KeyPair,
    pub signed_pre_key: SignedPreKey,
    /// 32-byte secret used for ADV payload verification.
    pub adv_secret_key: [u8; 32],
    /// Signed identity, set during pairing.
    pub account: Option<AdvSignedDeviceIdentity>,
    pub platform: String,
    pub business_name: String,
    pub push_name: String,
    pub facebook_uuid: Option<Uuid>,
}

impl Device {
    /// Create a fresh, unregistered device with new key material.
    pub fn new() -> Self {
        use rand::RngCore;
        let identity_key = KeyPair::generate();
        let signed_pre_key = SignedPreKey::generate(&identity_key, 1);
        let mut adv_secret_key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut adv_secret_key);

        Self {
            jid: None,
            registration_id: rand::random(),
            noise_key: KeyPair::generate(),
            identity_key,
            signed_pre_key,
            adv_secret_key,
            account: None,
            platform: String::new(),
            business_name: String::new(),
            push_name: String::new(),
            facebook_uuid: None,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.jid.is_some() && self.account.is_some()
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

/// App-state sync key material with its replacement timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStateSyncKey {
    pub data: Vec<u8>,
    pub fingerprint: Vec<u8>,
    pub timestamp: i64,
}

/// MAC pair authenticating one app-state mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStateMutationMAC {
    pub index_mac: Vec<u8>,
    pub value_mac: Vec<u8>,
}

/// Identity key storage for the Signal protocol.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Store the 32-byte public identity of a peer, overwriting any
    /// previous value.
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()>;

    /// Delete the identity of exactly one peer address.
    async fn delete_identity(&self, address: &str) -> Result<()>;

    /// Delete the identities of every device of the given phone.
    async fn delete_all_identities(&self, phone: &str) -> Result<()>;

    /// Trust-on-first-use check: true when no identity is stored for
    /// the address, or when the stored key equals the given one.
    async fn is_trusted_identity(&self, address: &str, key: &[u8; 32]) -> Result<bool>;
}

/// Signal session storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>>;
    async fn has_session(&self, address: &str) -> Result<bool>;
    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()>;
    async fn delete_session(&self, address: &str) -> Result<()>;
    /// Delete the sessions of every device of the given phone.
    async fn delete_all_sessions(&self, phone: &str) -> Result<()>;
}

/// One-time pre-key storage and allocation.
#[async_trait]
pub trait PreKeyStore: Send + Sync {
    /// Allocate and store a single fresh pre-key, already marked as
    /// uploaded.
    async fn gen_one_pre_key(&self) -> Result<PreKey>;

    /// Return `count` pre-keys that have not been uploaded yet,
    /// generating new ones as needed.
    async fn get_or_gen_pre_keys(&self, count: u32) -> Result<Vec<PreKey>>;

    async fn get_pre_key(&self, id: u32) -> Result<Option<PreKey>>;
    async fn remove_pre_key(&self, id: u32) -> Result<()>;
    async fn mark_pre_keys_as_uploaded(&self, up_to_id: u32) -> Result<()>;
    async fn uploaded_pre_key_count(&self) -> Result<usize>;
}

/// Group sender-key storage.
#[async_trait]
pub trait SenderKeyStore: Send + Sync {
    async fn put_sender_key(&self, group: &str, user: &str, session: &[u8]) -> Result<()>;
    async fn get_sender_key(&self, group: &str, user: &str) -> Result<Option<Vec<u8>>>;
}

/// App-state sync key storage with monotonic replacement.
#[async_trait]
pub trait AppStateSyncKeyStore: Send + Sync {
    /// Store a sync key. An existing row is only overwritten when the
    /// incoming timestamp is strictly newer.
    async fn put_app_state_sync_key(&self, id: &[u8], key: AppStateSyncKey) -> Result<()>;
    async fn get_app_state_sync_key(&self, id: &[u8]) -> Result<Option<AppStateSyncKey>>;
    /// The key id with the most recent timestamp, if any.
    async fn get_latest_app_state_sync_key_id(&self) -> Result<Option<Vec<u8>>>;
}

/// App-state version hashes and mutation MACs.
#[async_trait]
pub trait AppStateStore: Send + Sync {
    async fn put_app_state_version(&self, name: &str, version: u64, hash: [u8; 128])
        -> Result<()>;
    /// Missing rows read as version 0 with a zeroed hash.
    async fn get_app_state_version(&self, name: &str) -> Result<(u64, [u8; 128])>;
    async fn delete_app_state_version(&self, name: &str) -> Result<()>;

    async fn put_app_state_mutation_macs(
        &self,
        name: &str,
        version: u64,
        mutations: &[AppStateMutationMAC],
    ) -> Result<()>;
    async fn delete_app_state_mutation_macs(
        &self,
        name: &str,
        index_macs: &[Vec<u8>],
    ) -> Result<()>;
    /// Latest value MAC for the index MAC, by version descending.
    async fn get_app_state_mutation_mac(
        &self,
        name: &str,
        index_mac: &[u8],
    ) -> Result<Option<Vec<u8>>>;
}

/// Contact names with a write-through cache.
#[async_trait]
pub trait ContactStore: Send + Sync {
    /// Returns `(changed, previous_name)`.
    async fn put_push_name(&self, user: &Jid, push_name: &str) -> Result<(bool, String)>;
    /// Returns `(changed, previous_name)`.
    async fn put_business_name(&self, user: &Jid, business_name: &str)
        -> Result<(bool, String)>;
    /// Returns whether the stored names changed.
    async fn put_contact_name(&self, user: &Jid, first_name: &str, full_name: &str)
        -> Result<bool>;
    async fn put_all_contact_names(&self, contacts: &[ContactEntry]) -> Result<()>;
    async fn get_contact(&self, user: &Jid) -> Result<ContactInfo>;
    async fn get_all_contacts(&self) -> Result<HashMap<Jid, ContactInfo>>;
}

/// Per-chat local settings, column-scoped upserts.
#[async_trait]
pub trait ChatSettingsStore: Send + Sync {
    /// `muted_until` is epoch seconds; zero clears the mute.
    async fn put_muted_until(&self, chat: &Jid, muted_until: i64) -> Result<()>;
    async fn put_pinned(&self, chat: &Jid, pinned: bool) -> Result<()>;
    async fn put_archived(&self, chat: &Jid, archived: bool) -> Result<()>;
    async fn get_chat_settings(&self, chat: &Jid) -> Result<ChatSettings>;
}

/// Per-message secrets; first write wins.
#[async_trait]
pub trait MsgSecretStore: Send + Sync {
    async fn put_message_secrets(&self, inserts: &[MessageSecretInsert]) -> Result<()>;
    async fn put_message_secret(
        &self,
        chat: &Jid,
        sender: &Jid,
        id: &str,
        secret: &[u8],
    ) -> Result<()>;
    async fn get_message_secret(
        &self,
        chat: &Jid,
        sender: &Jid,
        id: &str,
    ) -> Result<Option<Vec<u8>>>;
}

/// Privacy tokens exchanged with peers.
#[async_trait]
pub trait PrivacyTokenStore: Send + Sync {
    async fn put_privacy_tokens(&self, tokens: &[PrivacyToken]) -> Result<()>;
    async fn get_privacy_token(&self, user: &Jid) -> Result<Option<PrivacyToken>>;
}

/// Everything a per-account store implements.
pub trait AccountStore:
    IdentityStore
    + SessionStore
    + PreKeyStore
    + SenderKeyStore
    + AppStateSyncKeyStore
    + AppStateStore
    + ContactStore
    + ChatSettingsStore
    + MsgSecretStore
    + PrivacyTokenStore
{
}

impl<T> AccountStore for T where
    T: IdentityStore
        + SessionStore
        + PreKeyStore
        + SenderKeyStore
        + AppStateSyncKeyStore
        + AppStateStore
        + ContactStore
        + ChatSettingsStore
        + MsgSecretStore
        + PrivacyTokenStore
{
}

/// Per-account store implementation
///
/// One `SqlStore` serves one account JID. All operations render a
/// canonical SQL template through the dialect layer and run against
/// the container's shared pool. The only in-memory state is the
/// contact cache and the pre-key allocation lock.
use super::{col, dialect::Dialect, retry, to_fixed, Container, DatabasePool, PgArrayWrapper};
use crate::{
    error::{Error, Result},
    store::{
        AppStateMutationMAC, AppStateStore, AppStateSyncKey, AppStateSyncKeyStore,
        ChatSettingsStore, ContactStore, IdentityStore, MsgSecretStore, PreKeyStore,
        PrivacyTokenStore, SenderKeyStore, SessionStore,
    },
    types::{ChatSettings, ContactEntry, ContactInfo, Jid, MessageSecretInsert, PrivacyToken},
    util::keys::{KeyPair, PreKey},
};
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::any::AnyRow;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

const MUTATION_MAC_CHUNK_SIZE: usize = 400;
const CONTACT_CHUNK_SIZE: usize = 300;
const MESSAGE_SECRET_CHUNK_SIZE: usize = 50;

const PUT_CONTACT_NAMES: &str =
    "INSERT INTO whatsmeow_contacts (our_jid, their_jid, first_name, full_name) \
     VALUES ($1, $2, $3, $4) \
     ON CONFLICT (our_jid, their_jid) DO UPDATE \
     SET first_name=excluded.first_name, full_name=excluded.full_name";

const PUT_PUSH_NAME: &str = "INSERT INTO whatsmeow_contacts (our_jid, their_jid, push_name) \
     VALUES ($1, $2, $3) \
     ON CONFLICT (our_jid, their_jid) DO UPDATE SET push_name=excluded.push_name";

const PUT_BUSINESS_NAME: &str =
    "INSERT INTO whatsmeow_contacts (our_jid, their_jid, business_name) \
     VALUES ($1, $2, $3) \
     ON CONFLICT (our_jid, their_jid) DO UPDATE SET business_name=excluded.business_name";

const PUT_MESSAGE_SECRET: &str =
    "INSERT INTO whatsmeow_message_secrets (our_jid, chat_jid, sender_jid, message_id, key) \
     VALUES ($1, $2, $3, $4, $5) \
     ON CONFLICT (our_jid, chat_jid, sender_jid, message_id) DO NOTHING";

const PUT_PRIVACY_TOKEN: &str =
    "INSERT INTO whatsmeow_privacy_tokens (our_jid, their_jid, token, timestamp) \
     VALUES ($1, $2, $3, $4) \
     ON CONFLICT (our_jid, their_jid) DO UPDATE \
     SET token=excluded.token, timestamp=excluded.timestamp";

/// Store handle scoped to one account JID.
pub struct SqlStore {
    pool: DatabasePool,
    dialect: Dialect,
    pg_array_wrapper: Option<PgArrayWrapper>,
    jid: String,
    contact_cache: Mutex<HashMap<Jid, ContactInfo>>,
    pre_key_lock: Mutex<()>,
}

impl SqlStore {
    pub(crate) fn new(container: &Container, jid: String) -> Self {
        Self {
            pool: container.pool().clone(),
            dialect: container.dialect(),
            pg_array_wrapper: container.pg_array_wrapper(),
            jid,
            contact_cache: Mutex::new(HashMap::new()),
            pre_key_lock: Mutex::new(()),
        }
    }

    /// The account JID this store is scoped to.
    pub fn jid(&self) -> &str {
        &self.jid
    }

    async fn next_pre_key_id(&self) -> Result<u32> {
        let sql = self
            .dialect
            .rewrite("SELECT MAX(key_id) FROM whatsmeow_pre_keys WHERE our_jid=$1");
        let max: Option<i64> = sqlx::query_scalar(&sql)
            .bind(&self.jid)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::db("query max pre-key id", e))?;
        Ok(max.unwrap_or(0) as u32 + 1)
    }

    /// Cache read-through for one contact; the caller holds the cache
    /// mutex for its whole read-modify-write cycle.
    async fn get_contact_locked(
        &self,
        cache: &mut HashMap<Jid, ContactInfo>,
        user: &Jid,
    ) -> Result<ContactInfo> {
        if let Some(cached) = cache.get(user) {
            return Ok(cached.clone());
        }
        let sql = self.dialect.rewrite(
            "SELECT first_name, full_name, push_name, business_name \
             FROM whatsmeow_contacts WHERE our_jid=$1 AND their_jid=$2",
        );
        let row = sqlx::query(&sql)
            .bind(&self.jid)
            .bind(user.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get contact", e))?;
        let info = match row {
            Some(row) => scan_contact(&row)?,
            None => ContactInfo::default(),
        };
        cache.insert(user.clone(), info.clone());
        Ok(info)
    }

    async fn try_put_message_secret_chunk(
        &self,
        chunk: &[MessageSecretInsert],
    ) -> std::result::Result<(), sqlx::Error> {
        let sql = self.dialect.rewrite(PUT_MESSAGE_SECRET);
        let mut tx = self.pool.begin().await?;
        for insert in chunk {
            sqlx::query(&sql)
                .bind(&self.jid)
                .bind(insert.chat.to_string())
                .bind(insert.sender.to_non_ad().to_string())
                .bind(&insert.id)
                .bind(insert.secret.clone())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

fn check_len(column: &'static str, expected: usize, value: &[u8]) -> Result<()> {
    if value.len() != expected {
        return Err(Error::InvalidLength {
            column,
            expected,
            got: value.len(),
        });
    }
    Ok(())
}

fn scan_pre_key(row: &AnyRow) -> Result<PreKey> {
    let key_id: i64 = col(row, 0)?;
    let key = to_fixed::<32>("key", col(row, 1)?)?;
    Ok(PreKey {
        key_pair: KeyPair::from_private_bytes(&key)?,
        key_id: key_id as u32,
    })
}

fn scan_sync_key(row: &AnyRow) -> Result<AppStateSyncKey> {
    Ok(AppStateSyncKey {
        data: col(row, 0)?,
        timestamp: col(row, 1)?,
        fingerprint: col(row, 2)?,
    })
}

fn scan_contact(row: &AnyRow) -> Result<ContactInfo> {
    Ok(ContactInfo {
        found: true,
        first_name: col::<Option<String>>(row, 0)?.unwrap_or_default(),
        full_name: col::<Option<String>>(row, 1)?.unwrap_or_default(),
        push_name: col::<Option<String>>(row, 2)?.unwrap_or_default(),
        business_name: col::<Option<String>>(row, 3)?.unwrap_or_default(),
    })
}

#[async_trait]
impl IdentityStore for SqlStore {
    async fn put_identity(&self, address: &str, key: [u8; 32]) -> Result<()> {
        let sql = self.dialect.rewrite(
            "INSERT INTO whatsmeow_identity_keys (our_jid, their_id, identity) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (our_jid, their_id) DO UPDATE SET identity=excluded.identity",
        );
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(address)
            .bind(key.to_vec())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("put identity", e))?;
        Ok(())
    }

    async fn delete_identity(&self, address: &str) -> Result<()> {
        let sql = self
            .dialect
            .rewrite("DELETE FROM whatsmeow_identity_keys WHERE our_jid=$1 AND their_id=$2");
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("delete identity", e))?;
        Ok(())
    }

    async fn delete_all_identities(&self, phone: &str) -> Result<()> {
        let sql = self
            .dialect
            .rewrite("DELETE FROM whatsmeow_identity_keys WHERE our_jid=$1 AND their_id LIKE $2");
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(format!("{phone}:%"))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("delete all identities", e))?;
        Ok(())
    }

    async fn is_trusted_identity(&self, address: &str, key: &[u8; 32]) -> Result<bool> {
        let sql = self
            .dialect
            .rewrite("SELECT identity FROM whatsmeow_identity_keys WHERE our_jid=$1 AND their_id=$2");
        let stored: Option<Vec<u8>> = sqlx::query_scalar(&sql)
            .bind(&self.jid)
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get identity", e))?;
        match stored {
            // Trust on first use
            None => Ok(true),
            Some(stored) => Ok(to_fixed::<32>("identity", stored)? == *key),
        }
    }
}

#[async_trait]
impl SessionStore for SqlStore {
    async fn get_session(&self, address: &str) -> Result<Option<Vec<u8>>> {
        let sql = self
            .dialect
            .rewrite("SELECT session FROM whatsmeow_sessions WHERE our_jid=$1 AND their_id=$2");
        let session: Option<Option<Vec<u8>>> = sqlx::query_scalar(&sql)
            .bind(&self.jid)
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get session", e))?;
        Ok(session.flatten())
    }

    async fn has_session(&self, address: &str) -> Result<bool> {
        let sql = self
            .dialect
            .rewrite("SELECT COUNT(*) FROM whatsmeow_sessions WHERE our_jid=$1 AND their_id=$2");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(&self.jid)
            .bind(address)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::db("check session", e))?;
        Ok(count > 0)
    }

    async fn put_session(&self, address: &str, session: &[u8]) -> Result<()> {
        let sql = self.dialect.rewrite(
            "INSERT INTO whatsmeow_sessions (our_jid, their_id, session) VALUES ($1, $2, $3) \
             ON CONFLICT (our_jid, their_id) DO UPDATE SET session=excluded.session",
        );
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(address)
            .bind(session.to_vec())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("put session", e))?;
        Ok(())
    }

    async fn delete_session(&self, address: &str) -> Result<()> {
        let sql = self
            .dialect
            .rewrite("DELETE FROM whatsmeow_sessions WHERE our_jid=$1 AND their_id=$2");
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("delete session", e))?;
        Ok(())
    }

    async fn delete_all_sessions(&self, phone: &str) -> Result<()> {
        let sql = self
            .dialect
            .rewrite("DELETE FROM whatsmeow_sessions WHERE our_jid=$1 AND their_id LIKE $2");
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(format!("{phone}:%"))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("delete all sessions", e))?;
        Ok(())
    }
}

#[async_trait]
impl PreKeyStore for SqlStore {
    async fn gen_one_pre_key(&self) -> Result<PreKey> {
        let _guard = self.pre_key_lock.lock().await;
        let key = PreKey::generate(self.next_pre_key_id().await?);
        let sql = self.dialect.rewrite(
            "INSERT INTO whatsmeow_pre_keys (our_jid, key_id, key, uploaded) VALUES ($1, $2, $3, $4)",
        );
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(key.key_id as i64)
            .bind(key.key_pair.private_key.to_vec())
            .bind(true)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("insert pre-key", e))?;
        Ok(key)
    }

    async fn get_or_gen_pre_keys(&self, count: u32) -> Result<Vec<PreKey>> {
        let _guard = self.pre_key_lock.lock().await;

        let sql = self.dialect.rewrite(
            "SELECT key_id, key FROM whatsmeow_pre_keys \
             WHERE our_jid=$1 AND uploaded=false ORDER BY key_id LIMIT $2",
        );
        let rows = sqlx::query(&sql)
            .bind(&self.jid)
            .bind(count as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::db("query unuploaded pre-keys", e))?;

        let mut keys = Vec::with_capacity(count as usize);
        for row in &rows {
            keys.push(scan_pre_key(row)?);
        }

        if keys.len() < count as usize {
            let mut next_id = self.next_pre_key_id().await?;
            let insert = self.dialect.rewrite(
                "INSERT INTO whatsmeow_pre_keys (our_jid, key_id, key, uploaded) VALUES ($1, $2, $3, $4)",
            );
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| Error::db("begin pre-key transaction", e))?;
            while keys.len() < count as usize {
                let key = PreKey::generate(next_id);
                sqlx::query(&insert)
                    .bind(&self.jid)
                    .bind(key.key_id as i64)
                    .bind(key.key_pair.private_key.to_vec())
                    .bind(false)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| Error::db("insert pre-key", e))?;
                keys.push(key);
                next_id += 1;
            }
            tx.commit()
                .await
                .map_err(|e| Error::db("commit pre-key transaction", e))?;
        }
        Ok(keys)
    }

    async fn get_pre_key(&self, id: u32) -> Result<Option<PreKey>> {
        let sql = self
            .dialect
            .rewrite("SELECT key_id, key FROM whatsmeow_pre_keys WHERE our_jid=$1 AND key_id=$2");
        let row = sqlx::query(&sql)
            .bind(&self.jid)
            .bind(id as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get pre-key", e))?;
        row.map(|row| scan_pre_key(&row)).transpose()
    }

    async fn remove_pre_key(&self, id: u32) -> Result<()> {
        let sql = self
            .dialect
            .rewrite("DELETE FROM whatsmeow_pre_keys WHERE our_jid=$1 AND key_id=$2");
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("delete pre-key", e))?;
        Ok(())
    }

    async fn mark_pre_keys_as_uploaded(&self, up_to_id: u32) -> Result<()> {
        let sql = self
            .dialect
            .rewrite("UPDATE whatsmeow_pre_keys SET uploaded=true WHERE our_jid=$1 AND key_id<=$2");
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(up_to_id as i64)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("mark pre-keys uploaded", e))?;
        Ok(())
    }

    async fn uploaded_pre_key_count(&self) -> Result<usize> {
        let sql = self
            .dialect
            .rewrite("SELECT COUNT(*) FROM whatsmeow_pre_keys WHERE our_jid=$1 AND uploaded=true");
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(&self.jid)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::db("count uploaded pre-keys", e))?;
        Ok(count as usize)
    }
}

#[async_trait]
impl SenderKeyStore for SqlStore {
    async fn put_sender_key(&self, group: &str, user: &str, session: &[u8]) -> Result<()> {
        let sql = self.dialect.rewrite(
            "INSERT INTO whatsmeow_sender_keys (our_jid, chat_id, sender_id, sender_key) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (our_jid, chat_id, sender_id) DO UPDATE SET sender_key=excluded.sender_key",
        );
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(group)
            .bind(user)
            .bind(session.to_vec())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("put sender key", e))?;
        Ok(())
    }

    async fn get_sender_key(&self, group: &str, user: &str) -> Result<Option<Vec<u8>>> {
        let sql = self.dialect.rewrite(
            "SELECT sender_key FROM whatsmeow_sender_keys \
             WHERE our_jid=$1 AND chat_id=$2 AND sender_id=$3",
        );
        let key: Option<Vec<u8>> = sqlx::query_scalar(&sql)
            .bind(&self.jid)
            .bind(group)
            .bind(user)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get sender key", e))?;
        Ok(key)
    }
}

#[async_trait]
impl AppStateSyncKeyStore for SqlStore {
    async fn put_app_state_sync_key(&self, id: &[u8], key: AppStateSyncKey) -> Result<()> {
        let sql = self.dialect.rewrite(
            "INSERT INTO whatsmeow_app_state_sync_keys (jid, key_id, key_data, timestamp, fingerprint) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (jid, key_id) DO UPDATE \
             SET key_data=excluded.key_data, timestamp=excluded.timestamp, fingerprint=excluded.fingerprint \
             WHERE excluded.timestamp > whatsmeow_app_state_sync_keys.timestamp",
        );
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(id.to_vec())
            .bind(key.data)
            .bind(key.timestamp)
            .bind(key.fingerprint)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("put app state sync key", e))?;
        Ok(())
    }

    async fn get_app_state_sync_key(&self, id: &[u8]) -> Result<Option<AppStateSyncKey>> {
        let sql = self.dialect.rewrite(
            "SELECT key_data, timestamp, fingerprint FROM whatsmeow_app_state_sync_keys \
             WHERE jid=$1 AND key_id=$2",
        );
        let row = sqlx::query(&sql)
            .bind(&self.jid)
            .bind(id.to_vec())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get app state sync key", e))?;
        if let Some(row) = row {
            return Ok(Some(scan_sync_key(&row)?));
        }

        // Binary key lookups are unreliable on the MySQL family; retry
        // hex-encoded before declaring the key absent.
        if self.dialect == Dialect::Mysql {
            let sql = self.dialect.rewrite(
                "SELECT key_data, timestamp, fingerprint FROM whatsmeow_app_state_sync_keys \
                 WHERE jid=$1 AND LOWER(HEX(key_id))=$2",
            );
            let row = sqlx::query(&sql)
                .bind(&self.jid)
                .bind(hex::encode(id))
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::db("get app state sync key by hex", e))?;
            return row.map(|row| scan_sync_key(&row)).transpose();
        }
        Ok(None)
    }

    async fn get_latest_app_state_sync_key_id(&self) -> Result<Option<Vec<u8>>> {
        let sql = self.dialect.rewrite(
            "SELECT key_id FROM whatsmeow_app_state_sync_keys \
             WHERE jid=$1 ORDER BY timestamp DESC LIMIT 1",
        );
        let id: Option<Vec<u8>> = sqlx::query_scalar(&sql)
            .bind(&self.jid)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get latest app state sync key id", e))?;
        Ok(id)
    }
}

#[async_trait]
impl AppStateStore for SqlStore {
    async fn put_app_state_version(
        &self,
        name: &str,
        version: u64,
        hash: [u8; 128],
    ) -> Result<()> {
        let sql = self.dialect.rewrite(
            "INSERT INTO whatsmeow_app_state_version (jid, name, version, hash) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (jid, name) DO UPDATE SET version=excluded.version, hash=excluded.hash",
        );
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(name)
            .bind(version as i64)
            .bind(hash.to_vec())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("put app state version", e))?;
        Ok(())
    }

    async fn get_app_state_version(&self, name: &str) -> Result<(u64, [u8; 128])> {
        let sql = self
            .dialect
            .rewrite("SELECT version, hash FROM whatsmeow_app_state_version WHERE jid=$1 AND name=$2");
        let row = sqlx::query(&sql)
            .bind(&self.jid)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get app state version", e))?;
        match row {
            None => Ok((0, [0u8; 128])),
            Some(row) => {
                let version: i64 = col(&row, 0)?;
                let hash = to_fixed::<128>("hash", col(&row, 1)?)?;
                Ok((version as u64, hash))
            }
        }
    }

    async fn delete_app_state_version(&self, name: &str) -> Result<()> {
        let sql = self
            .dialect
            .rewrite("DELETE FROM whatsmeow_app_state_version WHERE jid=$1 AND name=$2");
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("delete app state version", e))?;
        Ok(())
    }

    async fn put_app_state_mutation_macs(
        &self,
        name: &str,
        version: u64,
        mutations: &[AppStateMutationMAC],
    ) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        for mutation in mutations {
            check_len("index_mac", 32, &mutation.index_mac)?;
            check_len("value_mac", 32, &mutation.value_mac)?;
        }

        for chunk in mutations.chunks(MUTATION_MAC_CHUNK_SIZE) {
            // Every row binds its own five parameters so the
            // positional rewrite stays order-preserving.
            let mut placeholders = Vec::with_capacity(chunk.len());
            let mut n = 1;
            for _ in chunk {
                placeholders.push(format!(
                    "(${}, ${}, ${}, ${}, ${})",
                    n,
                    n + 1,
                    n + 2,
                    n + 3,
                    n + 4
                ));
                n += 5;
            }
            let template = format!(
                "INSERT INTO whatsmeow_app_state_mutation_macs (jid, name, version, index_mac, value_mac) \
                 VALUES {} \
                 ON CONFLICT (jid, name, version, index_mac) DO NOTHING",
                placeholders.join(", ")
            );
            let sql = self.dialect.rewrite(&template);

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| Error::db("begin mutation MAC transaction", e))?;
            let mut query = sqlx::query(&sql);
            for mutation in chunk {
                query = query
                    .bind(&self.jid)
                    .bind(name)
                    .bind(version as i64)
                    .bind(mutation.index_mac.clone())
                    .bind(mutation.value_mac.clone());
            }
            query
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::db("insert app state mutation MACs", e))?;
            tx.commit()
                .await
                .map_err(|e| Error::db("commit mutation MAC transaction", e))?;
        }
        Ok(())
    }

    async fn delete_app_state_mutation_macs(
        &self,
        name: &str,
        index_macs: &[Vec<u8>],
    ) -> Result<()> {
        if index_macs.is_empty() {
            return Ok(());
        }

        if self.dialect.supports_array_params() {
            if let Some(wrapper) = self.pg_array_wrapper {
                sqlx::query(
                    "DELETE FROM whatsmeow_app_state_mutation_macs \
                     WHERE jid=$1 AND name=$2 AND index_mac = ANY($3::bytea[])",
                )
                .bind(&self.jid)
                .bind(name)
                .bind(wrapper(index_macs))
                .execute(&self.pool)
                .await
                .map_err(|e| Error::db("delete app state mutation MACs", e))?;
                return Ok(());
            }
        }

        let placeholders: Vec<String> =
            (0..index_macs.len()).map(|i| format!("${}", i + 3)).collect();
        let template = format!(
            "DELETE FROM whatsmeow_app_state_mutation_macs \
             WHERE jid=$1 AND name=$2 AND index_mac IN ({})",
            placeholders.join(", ")
        );
        let sql = self.dialect.rewrite(&template);
        let mut query = sqlx::query(&sql).bind(&self.jid).bind(name);
        for mac in index_macs {
            query = query.bind(mac.clone());
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("delete app state mutation MACs", e))?;
        Ok(())
    }

    async fn get_app_state_mutation_mac(
        &self,
        name: &str,
        index_mac: &[u8],
    ) -> Result<Option<Vec<u8>>> {
        let sql = self.dialect.rewrite(
            "SELECT value_mac FROM whatsmeow_app_state_mutation_macs \
             WHERE jid=$1 AND name=$2 AND index_mac=$3 ORDER BY version DESC LIMIT 1",
        );
        let mac: Option<Vec<u8>> = sqlx::query_scalar(&sql)
            .bind(&self.jid)
            .bind(name)
            .bind(index_mac.to_vec())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get app state mutation MAC", e))?;
        Ok(mac)
    }
}

#[async_trait]
impl ContactStore for SqlStore {
    async fn put_push_name(&self, user: &Jid, push_name: &str) -> Result<(bool, String)> {
        let mut cache = self.contact_cache.lock().await;
        let cached = self.get_contact_locked(&mut cache, user).await?;
        if cached.push_name == push_name {
            return Ok((false, String::new()));
        }

        let sql = self.dialect.rewrite(PUT_PUSH_NAME);
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(user.to_string())
            .bind(push_name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("put push name", e))?;

        let entry = cache.entry(user.clone()).or_default();
        entry.found = true;
        let previous = std::mem::replace(&mut entry.push_name, push_name.to_string());
        Ok((true, previous))
    }

    async fn put_business_name(
        &self,
        user: &Jid,
        business_name: &str,
    ) -> Result<(bool, String)> {
        let mut cache = self.contact_cache.lock().await;
        let cached = self.get_contact_locked(&mut cache, user).await?;
        if cached.business_name == business_name {
            return Ok((false, String::new()));
        }

        let sql = self.dialect.rewrite(PUT_BUSINESS_NAME);
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(user.to_string())
            .bind(business_name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("put business name", e))?;

        let entry = cache.entry(user.clone()).or_default();
        entry.found = true;
        let previous = std::mem::replace(&mut entry.business_name, business_name.to_string());
        Ok((true, previous))
    }

    async fn put_contact_name(
        &self,
        user: &Jid,
        first_name: &str,
        full_name: &str,
    ) -> Result<bool> {
        let mut cache = self.contact_cache.lock().await;
        let cached = self.get_contact_locked(&mut cache, user).await?;
        if cached.found && cached.first_name == first_name && cached.full_name == full_name {
            return Ok(false);
        }

        let sql = self.dialect.rewrite(PUT_CONTACT_NAMES);
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(user.to_string())
            .bind(first_name)
            .bind(full_name)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("put contact name", e))?;

        let entry = cache.entry(user.clone()).or_default();
        entry.found = true;
        entry.first_name = first_name.to_string();
        entry.full_name = full_name.to_string();
        Ok(true)
    }

    async fn put_all_contact_names(&self, contacts: &[ContactEntry]) -> Result<()> {
        if contacts.is_empty() {
            return Ok(());
        }

        for chunk in contacts.chunks(CONTACT_CHUNK_SIZE) {
            let mut seen = HashSet::with_capacity(chunk.len());
            let mut deduped = Vec::with_capacity(chunk.len());
            for entry in chunk {
                if !seen.insert(entry.jid.clone()) {
                    tracing::warn!("Duplicate contact {} in bulk name update, skipping", entry.jid);
                    continue;
                }
                deduped.push(entry);
            }

            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| Error::db("begin contact transaction", e))?;
            match self.dialect {
                // Multi-row VALUES() upserts are deprecated on recent
                // MySQL releases; one statement per contact instead.
                Dialect::Mysql => {
                    let sql = self.dialect.rewrite(PUT_CONTACT_NAMES);
                    for entry in &deduped {
                        sqlx::query(&sql)
                            .bind(&self.jid)
                            .bind(entry.jid.to_string())
                            .bind(&entry.first_name)
                            .bind(&entry.full_name)
                            .execute(&mut *tx)
                            .await
                            .map_err(|e| Error::db("put contact names", e))?;
                    }
                }
                _ => {
                    let mut placeholders = Vec::with_capacity(deduped.len());
                    let mut n = 1;
                    for _ in &deduped {
                        placeholders.push(format!("(${}, ${}, ${}, ${})", n, n + 1, n + 2, n + 3));
                        n += 4;
                    }
                    let template = format!(
                        "INSERT INTO whatsmeow_contacts (our_jid, their_jid, first_name, full_name) \
                         VALUES {} \
                         ON CONFLICT (our_jid, their_jid) DO UPDATE \
                         SET first_name=excluded.first_name, full_name=excluded.full_name",
                        placeholders.join(", ")
                    );
                    let sql = self.dialect.rewrite(&template);
                    let mut query = sqlx::query(&sql);
                    for entry in &deduped {
                        query = query
                            .bind(&self.jid)
                            .bind(entry.jid.to_string())
                            .bind(&entry.first_name)
                            .bind(&entry.full_name);
                    }
                    query
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| Error::db("put contact names", e))?;
                }
            }
            tx.commit()
                .await
                .map_err(|e| Error::db("commit contact transaction", e))?;
        }

        // A bulk replace invalidates the whole cache rather than
        // patching it entry by entry.
        let mut cache = self.contact_cache.lock().await;
        cache.clear();
        tracing::debug!("Invalidated contact cache after bulk name update");
        Ok(())
    }

    async fn get_contact(&self, user: &Jid) -> Result<ContactInfo> {
        let mut cache = self.contact_cache.lock().await;
        self.get_contact_locked(&mut cache, user).await
    }

    async fn get_all_contacts(&self) -> Result<HashMap<Jid, ContactInfo>> {
        let sql = self.dialect.rewrite(
            "SELECT their_jid, first_name, full_name, push_name, business_name \
             FROM whatsmeow_contacts WHERE our_jid=$1",
        );
        let rows = sqlx::query(&sql)
            .bind(&self.jid)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::db("get all contacts", e))?;

        let mut cache = self.contact_cache.lock().await;
        let mut contacts = HashMap::with_capacity(rows.len());
        for row in &rows {
            let jid_str: String = col(row, 0)?;
            let jid = match Jid::parse(&jid_str) {
                Ok(jid) => jid,
                Err(e) => {
                    tracing::warn!("Skipping contact with malformed JID {}: {}", jid_str, e);
                    continue;
                }
            };
            let info = ContactInfo {
                found: true,
                first_name: col::<Option<String>>(row, 1)?.unwrap_or_default(),
                full_name: col::<Option<String>>(row, 2)?.unwrap_or_default(),
                push_name: col::<Option<String>>(row, 3)?.unwrap_or_default(),
                business_name: col::<Option<String>>(row, 4)?.unwrap_or_default(),
            };
            cache.insert(jid.clone(), info.clone());
            contacts.insert(jid, info);
        }
        Ok(contacts)
    }
}

#[async_trait]
impl ChatSettingsStore for SqlStore {
    async fn put_muted_until(&self, chat: &Jid, muted_until: i64) -> Result<()> {
        let sql = self.dialect.rewrite(
            "INSERT INTO whatsmeow_chat_settings (our_jid, chat_jid, muted_until) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (our_jid, chat_jid) DO UPDATE SET muted_until=excluded.muted_until",
        );
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(chat.to_string())
            .bind(muted_until)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("put muted until", e))?;
        Ok(())
    }

    async fn put_pinned(&self, chat: &Jid, pinned: bool) -> Result<()> {
        let sql = self.dialect.rewrite(
            "INSERT INTO whatsmeow_chat_settings (our_jid, chat_jid, pinned) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (our_jid, chat_jid) DO UPDATE SET pinned=excluded.pinned",
        );
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(chat.to_string())
            .bind(pinned)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("put pinned", e))?;
        Ok(())
    }

    async fn put_archived(&self, chat: &Jid, archived: bool) -> Result<()> {
        let sql = self.dialect.rewrite(
            "INSERT INTO whatsmeow_chat_settings (our_jid, chat_jid, archived) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (our_jid, chat_jid) DO UPDATE SET archived=excluded.archived",
        );
        sqlx::query(&sql)
            .bind(&self.jid)
            .bind(chat.to_string())
            .bind(archived)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("put archived", e))?;
        Ok(())
    }

    async fn get_chat_settings(&self, chat: &Jid) -> Result<ChatSettings> {
        // CASE normalizes the engine-native boolean representations
        // into integers the unified driver decodes everywhere.
        let sql = self.dialect.rewrite(
            "SELECT muted_until, \
             CASE WHEN pinned THEN 1 ELSE 0 END, \
             CASE WHEN archived THEN 1 ELSE 0 END \
             FROM whatsmeow_chat_settings WHERE our_jid=$1 AND chat_jid=$2",
        );
        let row = sqlx::query(&sql)
            .bind(&self.jid)
            .bind(chat.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get chat settings", e))?;
        match row {
            None => Ok(ChatSettings::default()),
            Some(row) => Ok(ChatSettings {
                found: true,
                muted_until: col(&row, 0)?,
                pinned: col::<i64>(&row, 1)? != 0,
                archived: col::<i64>(&row, 2)? != 0,
            }),
        }
    }
}

#[async_trait]
impl MsgSecretStore for SqlStore {
    async fn put_message_secrets(&self, inserts: &[MessageSecretInsert]) -> Result<()> {
        if inserts.is_empty() {
            return Ok(());
        }
        for chunk in inserts.chunks(MESSAGE_SECRET_CHUNK_SIZE) {
            let mut attempt = 1u32;
            loop {
                match self.try_put_message_secret_chunk(chunk).await {
                    Ok(()) => break,
                    Err(e) => {
                        if retry::classify_lock_error(self.dialect, &e) == retry::Verdict::Permanent
                        {
                            return Err(Error::db("insert message secrets", e));
                        }
                        if attempt >= retry::MAX_ATTEMPTS {
                            return Err(Error::RetryExhausted {
                                attempts: attempt,
                                message: e.to_string(),
                            });
                        }
                        tracing::warn!(
                            "Lock wait timeout inserting message secrets (attempt {}/{}), retrying",
                            attempt,
                            retry::MAX_ATTEMPTS
                        );
                        tokio::time::sleep(retry::backoff(attempt)).await;
                        attempt += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn put_message_secret(
        &self,
        chat: &Jid,
        sender: &Jid,
        id: &str,
        secret: &[u8],
    ) -> Result<()> {
        let insert = MessageSecretInsert {
            chat: chat.clone(),
            sender: sender.clone(),
            id: id.to_string(),
            secret: secret.to_vec(),
        };
        self.put_message_secrets(std::slice::from_ref(&insert)).await
    }

    async fn get_message_secret(
        &self,
        chat: &Jid,
        sender: &Jid,
        id: &str,
    ) -> Result<Option<Vec<u8>>> {
        let sql = self.dialect.rewrite(
            "SELECT key FROM whatsmeow_message_secrets \
             WHERE our_jid=$1 AND chat_jid=$2 AND sender_jid=$3 AND message_id=$4",
        );
        let secret: Option<Vec<u8>> = sqlx::query_scalar(&sql)
            .bind(&self.jid)
            .bind(chat.to_string())
            .bind(sender.to_non_ad().to_string())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get message secret", e))?;
        Ok(secret)
    }
}

#[async_trait]
impl PrivacyTokenStore for SqlStore {
    async fn put_privacy_tokens(&self, tokens: &[PrivacyToken]) -> Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }

        match self.dialect {
            // See put_all_contact_names for why MySQL gets one
            // statement per token.
            Dialect::Mysql => {
                let sql = self.dialect.rewrite(PUT_PRIVACY_TOKEN);
                let mut tx = self
                    .pool
                    .begin()
                    .await
                    .map_err(|e| Error::db("begin privacy token transaction", e))?;
                for token in tokens {
                    sqlx::query(&sql)
                        .bind(&self.jid)
                        .bind(token.user.to_string())
                        .bind(token.token.clone())
                        .bind(token.timestamp.timestamp())
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| Error::db("put privacy token", e))?;
                }
                tx.commit()
                    .await
                    .map_err(|e| Error::db("commit privacy token transaction", e))?;
            }
            _ => {
                let mut placeholders = Vec::with_capacity(tokens.len());
                let mut n = 1;
                for _ in tokens {
                    placeholders.push(format!("(${}, ${}, ${}, ${})", n, n + 1, n + 2, n + 3));
                    n += 4;
                }
                let template = format!(
                    "INSERT INTO whatsmeow_privacy_tokens (our_jid, their_jid, token, timestamp) \
                     VALUES {} \
                     ON CONFLICT (our_jid, their_jid) DO UPDATE \
                     SET token=excluded.token, timestamp=excluded.timestamp",
                    placeholders.join(", ")
                );
                let sql = self.dialect.rewrite(&template);
                let mut query = sqlx::query(&sql);
                for token in tokens {
                    query = query
                        .bind(&self.jid)
                        .bind(token.user.to_string())
                        .bind(token.token.clone())
                        .bind(token.timestamp.timestamp());
                }
                query
                    .execute(&self.pool)
                    .await
                    .map_err(|e| Error::db("put privacy tokens", e))?;
            }
        }
        Ok(())
    }

    async fn get_privacy_token(&self, user: &Jid) -> Result<Option<PrivacyToken>> {
        let sql = self.dialect.rewrite(
            "SELECT token, timestamp FROM whatsmeow_privacy_tokens \
             WHERE our_jid=$1 AND their_jid=$2",
        );
        let row = sqlx::query(&sql)
            .bind(&self.jid)
            .bind(user.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("get privacy token", e))?;
        match row {
            None => Ok(None),
            Some(row) => {
                let token: Vec<u8> = col(&row, 0)?;
                let timestamp: i64 = col(&row, 1)?;
                Ok(Some(PrivacyToken {
                    user: user.clone(),
                    token,
                    timestamp: DateTime::from_timestamp(timestamp, 0)
                        .unwrap_or(DateTime::UNIX_EPOCH),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::tests::{memory_container, registered_device};
    use crate::database::Container;
    use std::sync::Arc;

    async fn store_fixture() -> (Container, SqlStore) {
        let container = memory_container().await;
        let device = registered_device("111:1@s.whatsapp.net");
        container.put_device(&device).await.unwrap();
        let store = container.device_store(device.jid.as_ref().unwrap());
        (container, store)
    }

    #[tokio::test]
    async fn test_identity_trust_on_first_use() {
        let (_container, store) = store_fixture().await;
        let key = [3u8; 32];

        // Unknown peers are trusted
        assert!(store.is_trusted_identity("222:0", &key).await.unwrap());

        store.put_identity("222:0", key).await.unwrap();
        assert!(store.is_trusted_identity("222:0", &key).await.unwrap());
        assert!(!store.is_trusted_identity("222:0", &[4u8; 32]).await.unwrap());

        // Overwrite rotates the trusted key
        store.put_identity("222:0", [4u8; 32]).await.unwrap();
        assert!(store.is_trusted_identity("222:0", &[4u8; 32]).await.unwrap());
    }

    #[tokio::test]
    async fn test_identity_deletes() {
        let (_container, store) = store_fixture().await;
        store.put_identity("222:0", [1u8; 32]).await.unwrap();
        store.put_identity("222:1", [2u8; 32]).await.unwrap();
        store.put_identity("333:0", [3u8; 32]).await.unwrap();

        // Exact-match delete leaves the other devices alone
        store.delete_identity("222:0").await.unwrap();
        assert!(store.is_trusted_identity("222:0", &[9u8; 32]).await.unwrap());
        assert!(!store.is_trusted_identity("222:1", &[9u8; 32]).await.unwrap());

        store.delete_all_identities("222").await.unwrap();
        assert!(store.is_trusted_identity("222:1", &[9u8; 32]).await.unwrap());
        assert!(!store.is_trusted_identity("333:0", &[9u8; 32]).await.unwrap());
    }

    #[tokio::test]
    async fn test_identity_invalid_length_is_surfaced() {
        let (container, store) = store_fixture().await;

        // Bypass the length CHECK to simulate a corrupted row
        sqlx::query("PRAGMA ignore_check_constraints = ON")
            .execute(container.pool())
            .await
            .unwrap();
        sqlx::query("INSERT INTO whatsmeow_identity_keys (our_jid, their_id, identity) VALUES (?, ?, ?)")
            .bind("111:1@s.whatsapp.net")
            .bind("444:0")
            .bind(vec![1u8; 31])
            .execute(container.pool())
            .await
            .unwrap();

        let err = store.is_trusted_identity("444:0", &[1u8; 32]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidLength { column: "identity", expected: 32, got: 31 }
        ));
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let (_container, store) = store_fixture().await;
        assert_eq!(store.get_session("222:0").await.unwrap(), None);
        assert!(!store.has_session("222:0").await.unwrap());

        store.put_session("222:0", &[1, 2, 3]).await.unwrap();
        assert_eq!(store.get_session("222:0").await.unwrap(), Some(vec![1, 2, 3]));
        assert!(store.has_session("222:0").await.unwrap());

        store.put_session("222:0", &[4, 5]).await.unwrap();
        assert_eq!(store.get_session("222:0").await.unwrap(), Some(vec![4, 5]));

        store.delete_session("222:0").await.unwrap();
        assert_eq!(store.get_session("222:0").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_all_sessions_by_phone() {
        let (_container, store) = store_fixture().await;
        store.put_session("222:0", &[1]).await.unwrap();
        store.put_session("222:5", &[2]).await.unwrap();
        store.put_session("333:0", &[3]).await.unwrap();

        store.delete_all_sessions("222").await.unwrap();
        assert!(!store.has_session("222:0").await.unwrap());
        assert!(!store.has_session("222:5").await.unwrap());
        assert!(store.has_session("333:0").await.unwrap());
    }

    #[tokio::test]
    async fn test_pre_key_allocation() {
        let (_container, store) = store_fixture().await;

        let first = store.gen_one_pre_key().await.unwrap();
        let second = store.gen_one_pre_key().await.unwrap();
        let third = store.gen_one_pre_key().await.unwrap();
        assert_eq!(first.key_id, 1);
        assert_eq!(second.key_id, 2);
        assert_eq!(third.key_id, 3);
        assert_eq!(store.uploaded_pre_key_count().await.unwrap(), 3);

        let fetched = store.get_pre_key(2).await.unwrap().unwrap();
        assert_eq!(fetched.key_pair, second.key_pair);
        assert_eq!(store.get_pre_key(99).await.unwrap(), None);

        store.remove_pre_key(2).await.unwrap();
        assert_eq!(store.get_pre_key(2).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_or_gen_pre_keys() {
        let (_container, store) = store_fixture().await;

        let batch = store.get_or_gen_pre_keys(5).await.unwrap();
        assert_eq!(batch.len(), 5);
        let ids: Vec<u32> = batch.iter().map(|k| k.key_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.uploaded_pre_key_count().await.unwrap(), 0);

        // Unuploaded keys are returned again, not regenerated
        let again = store.get_or_gen_pre_keys(5).await.unwrap();
        let again_ids: Vec<u32> = again.iter().map(|k| k.key_id).collect();
        assert_eq!(again_ids, ids);

        store.mark_pre_keys_as_uploaded(5).await.unwrap();
        assert_eq!(store.uploaded_pre_key_count().await.unwrap(), 5);
        // Marking again is a no-op
        store.mark_pre_keys_as_uploaded(5).await.unwrap();
        assert_eq!(store.uploaded_pre_key_count().await.unwrap(), 5);

        let fresh = store.get_or_gen_pre_keys(3).await.unwrap();
        let fresh_ids: Vec<u32> = fresh.iter().map(|k| k.key_id).collect();
        assert_eq!(fresh_ids, vec![6, 7, 8]);
    }

    #[tokio::test]
    async fn test_concurrent_pre_key_allocation() {
        let (_container, store) = store_fixture().await;
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..5 {
                    ids.push(store.gen_one_pre_key().await.unwrap().key_id);
                }
                ids
            }));
        }

        let mut all_ids = Vec::new();
        for handle in handles {
            all_ids.extend(handle.await.unwrap());
        }
        all_ids.sort_unstable();
        // Gap-free and unique across concurrent allocators
        assert_eq!(all_ids, (1..=20).collect::<Vec<u32>>());
    }

    #[tokio::test]
    async fn test_sender_key_roundtrip() {
        let (_container, store) = store_fixture().await;
        assert_eq!(store.get_sender_key("group@g.us", "222:0").await.unwrap(), None);

        store.put_sender_key("group@g.us", "222:0", &[1, 2]).await.unwrap();
        assert_eq!(
            store.get_sender_key("group@g.us", "222:0").await.unwrap(),
            Some(vec![1, 2])
        );

        store.put_sender_key("group@g.us", "222:0", &[3]).await.unwrap();
        assert_eq!(
            store.get_sender_key("group@g.us", "222:0").await.unwrap(),
            Some(vec![3])
        );
    }

    #[tokio::test]
    async fn test_app_state_sync_key_monotonic_timestamp() {
        let (_container, store) = store_fixture().await;
        let id = [0xAB];

        store
            .put_app_state_sync_key(
                &id,
                AppStateSyncKey { data: vec![1], fingerprint: vec![9], timestamp: 100 },
            )
            .await
            .unwrap();

        // Stale write is retained, not applied
        store
            .put_app_state_sync_key(
                &id,
                AppStateSyncKey { data: vec![2], fingerprint: vec![8], timestamp: 50 },
            )
            .await
            .unwrap();
        let key = store.get_app_state_sync_key(&id).await.unwrap().unwrap();
        assert_eq!(key.data, vec![1]);
        assert_eq!(key.timestamp, 100);

        store
            .put_app_state_sync_key(
                &id,
                AppStateSyncKey { data: vec![3], fingerprint: vec![7], timestamp: 150 },
            )
            .await
            .unwrap();
        let key = store.get_app_state_sync_key(&id).await.unwrap().unwrap();
        assert_eq!(key.data, vec![3]);
        assert_eq!(key.timestamp, 150);
    }

    #[tokio::test]
    async fn test_latest_app_state_sync_key_id() {
        let (_container, store) = store_fixture().await;
        assert_eq!(store.get_latest_app_state_sync_key_id().await.unwrap(), None);

        store
            .put_app_state_sync_key(
                &[1],
                AppStateSyncKey { data: vec![1], fingerprint: vec![], timestamp: 10 },
            )
            .await
            .unwrap();
        store
            .put_app_state_sync_key(
                &[2],
                AppStateSyncKey { data: vec![2], fingerprint: vec![], timestamp: 20 },
            )
            .await
            .unwrap();

        assert_eq!(
            store.get_latest_app_state_sync_key_id().await.unwrap(),
            Some(vec![2])
        );
    }

    #[tokio::test]
    async fn test_app_state_version_roundtrip() {
        let (_container, store) = store_fixture().await;

        let (version, hash) = store.get_app_state_version("critical_block").await.unwrap();
        assert_eq!(version, 0);
        assert_eq!(hash, [0u8; 128]);

        store
            .put_app_state_version("critical_block", 7, [5u8; 128])
            .await
            .unwrap();
        let (version, hash) = store.get_app_state_version("critical_block").await.unwrap();
        assert_eq!(version, 7);
        assert_eq!(hash, [5u8; 128]);

        store.delete_app_state_version("critical_block").await.unwrap();
        let (version, _) = store.get_app_state_version("critical_block").await.unwrap();
        assert_eq!(version, 0);
    }

    #[tokio::test]
    async fn test_mutation_macs() {
        let (_container, store) = store_fixture().await;
        store
            .put_app_state_version("regular_high", 1, [0u8; 128])
            .await
            .unwrap();

        // Empty input is a no-op
        store.put_app_state_mutation_macs("regular_high", 1, &[]).await.unwrap();
        store.delete_app_state_mutation_macs("regular_high", &[]).await.unwrap();

        let macs = vec![
            AppStateMutationMAC { index_mac: vec![1u8; 32], value_mac: vec![10u8; 32] },
            AppStateMutationMAC { index_mac: vec![2u8; 32], value_mac: vec![20u8; 32] },
        ];
        store.put_app_state_mutation_macs("regular_high", 1, &macs).await.unwrap();

        assert_eq!(
            store
                .get_app_state_mutation_mac("regular_high", &[1u8; 32])
                .await
                .unwrap(),
            Some(vec![10u8; 32])
        );

        // A newer version wins the lookup
        store.put_app_state_version("regular_high", 2, [0u8; 128]).await.unwrap();
        store
            .put_app_state_mutation_macs(
                "regular_high",
                2,
                &[AppStateMutationMAC { index_mac: vec![1u8; 32], value_mac: vec![11u8; 32] }],
            )
            .await
            .unwrap();
        assert_eq!(
            store
                .get_app_state_mutation_mac("regular_high", &[1u8; 32])
                .await
                .unwrap(),
            Some(vec![11u8; 32])
        );

        store
            .delete_app_state_mutation_macs("regular_high", &[vec![1u8; 32], vec![2u8; 32]])
            .await
            .unwrap();
        assert_eq!(
            store
                .get_app_state_mutation_mac("regular_high", &[1u8; 32])
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_mutation_mac_length_is_validated() {
        let (_container, store) = store_fixture().await;
        let bad = vec![AppStateMutationMAC { index_mac: vec![1u8; 31], value_mac: vec![2u8; 32] }];
        let err = store
            .put_app_state_mutation_macs("regular_low", 1, &bad)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidLength { column: "index_mac", .. }));
    }

    #[tokio::test]
    async fn test_contact_name_diffing() {
        let (_container, store) = store_fixture().await;
        let user = Jid::parse("555@s.whatsapp.net").unwrap();

        assert!(store.put_contact_name(&user, "Al", "Alice").await.unwrap());
        assert!(!store.put_contact_name(&user, "Al", "Alice").await.unwrap());

        let (changed, previous) = store.put_push_name(&user, "alice").await.unwrap();
        assert!(changed);
        assert_eq!(previous, "");
        let (changed, _) = store.put_push_name(&user, "alice").await.unwrap();
        assert!(!changed);

        let (changed, previous) = store.put_push_name(&user, "alice2").await.unwrap();
        assert!(changed);
        assert_eq!(previous, "alice");

        let contact = store.get_contact(&user).await.unwrap();
        assert!(contact.found);
        assert_eq!(contact.first_name, "Al");
        assert_eq!(contact.full_name, "Alice");
        assert_eq!(contact.push_name, "alice2");

        let (changed, previous) = store.put_business_name(&user, "Alice Inc").await.unwrap();
        assert!(changed);
        assert_eq!(previous, "");
        // Field-scoped upserts leave the other columns alone
        let contact = store.get_contact(&user).await.unwrap();
        assert_eq!(contact.full_name, "Alice");
        assert_eq!(contact.business_name, "Alice Inc");
    }

    #[tokio::test]
    async fn test_get_contact_missing() {
        let (_container, store) = store_fixture().await;
        let user = Jid::parse("404@s.whatsapp.net").unwrap();
        let contact = store.get_contact(&user).await.unwrap();
        assert!(!contact.found);
        assert_eq!(contact, ContactInfo::default());
    }

    #[tokio::test]
    async fn test_put_all_contact_names() {
        let (_container, store) = store_fixture().await;

        // Empty input is a no-op
        store.put_all_contact_names(&[]).await.unwrap();

        let alice = Jid::parse("555@s.whatsapp.net").unwrap();
        let bob = Jid::parse("666@s.whatsapp.net").unwrap();
        let entries = vec![
            ContactEntry {
                jid: alice.clone(),
                first_name: "Al".to_string(),
                full_name: "Alice".to_string(),
            },
            ContactEntry {
                jid: bob.clone(),
                first_name: "Bo".to_string(),
                full_name: "Bob".to_string(),
            },
            // Duplicate entry is dropped with a warning
            ContactEntry {
                jid: alice.clone(),
                first_name: "Dup".to_string(),
                full_name: "Duplicate".to_string(),
            },
        ];
        store.put_all_contact_names(&entries).await.unwrap();

        let contacts = store.get_all_contacts().await.unwrap();
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts.get(&alice).unwrap().full_name, "Alice");
        assert_eq!(contacts.get(&bob).unwrap().first_name, "Bo");
    }

    #[tokio::test]
    async fn test_chat_settings_partial_updates() {
        let (_container, store) = store_fixture().await;
        let chat = Jid::parse("group@g.us").unwrap();

        let settings = store.get_chat_settings(&chat).await.unwrap();
        assert!(!settings.found);
        assert_eq!(settings.muted_until, 0);

        store.put_muted_until(&chat, 4102444800).await.unwrap();
        store.put_pinned(&chat, true).await.unwrap();

        let settings = store.get_chat_settings(&chat).await.unwrap();
        assert!(settings.found);
        assert_eq!(settings.muted_until, 4102444800);
        assert!(settings.pinned);
        assert!(!settings.archived);

        // Updating one column leaves the others untouched
        store.put_archived(&chat, true).await.unwrap();
        let settings = store.get_chat_settings(&chat).await.unwrap();
        assert_eq!(settings.muted_until, 4102444800);
        assert!(settings.pinned);
        assert!(settings.archived);

        store.put_muted_until(&chat, 0).await.unwrap();
        let settings = store.get_chat_settings(&chat).await.unwrap();
        assert_eq!(settings.muted_until, 0);
        assert!(settings.pinned);
    }

    #[tokio::test]
    async fn test_message_secret_first_write_wins() {
        let (_container, store) = store_fixture().await;
        let chat = Jid::parse("group@g.us").unwrap();
        let sender = Jid::parse("222:4@s.whatsapp.net").unwrap();

        assert_eq!(store.get_message_secret(&chat, &sender, "MSG1").await.unwrap(), None);

        store.put_message_secret(&chat, &sender, "MSG1", &[1, 1, 1]).await.unwrap();
        store.put_message_secret(&chat, &sender, "MSG1", &[2, 2, 2]).await.unwrap();
        assert_eq!(
            store.get_message_secret(&chat, &sender, "MSG1").await.unwrap(),
            Some(vec![1, 1, 1])
        );

        // The batch path is keyed on the sender's bare JID
        assert_eq!(
            store
                .get_message_secret(&chat, &sender.to_non_ad(), "MSG1")
                .await
                .unwrap(),
            Some(vec![1, 1, 1])
        );

        // Empty input is a no-op
        store.put_message_secrets(&[]).await.unwrap();
    }

    #[tokio::test]
    async fn test_message_secret_batch_chunking() {
        let (_container, store) = store_fixture().await;
        let chat = Jid::parse("group@g.us").unwrap();
        let sender = Jid::parse("222@s.whatsapp.net").unwrap();

        // Exceed the chunk threshold so the batch spans transactions
        let inserts: Vec<MessageSecretInsert> = (0..120)
            .map(|i| MessageSecretInsert {
                chat: chat.clone(),
                sender: sender.clone(),
                id: format!("MSG{i}"),
                secret: vec![i as u8],
            })
            .collect();
        store.put_message_secrets(&inserts).await.unwrap();

        assert_eq!(
            store.get_message_secret(&chat, &sender, "MSG0").await.unwrap(),
            Some(vec![0])
        );
        assert_eq!(
            store.get_message_secret(&chat, &sender, "MSG119").await.unwrap(),
            Some(vec![119])
        );
    }

    #[tokio::test]
    async fn test_privacy_tokens() {
        let (_container, store) = store_fixture().await;
        let user = Jid::parse("777@s.whatsapp.net").unwrap();

        assert_eq!(store.get_privacy_token(&user).await.unwrap(), None);
        // Empty input is a no-op
        store.put_privacy_tokens(&[]).await.unwrap();

        let token = PrivacyToken {
            user: user.clone(),
            token: vec![1, 2, 3],
            timestamp: DateTime::from_timestamp(1700000000, 0).unwrap(),
        };
        store.put_privacy_tokens(std::slice::from_ref(&token)).await.unwrap();
        assert_eq!(store.get_privacy_token(&user).await.unwrap(), Some(token.clone()));

        // Upsert overwrites both token and timestamp
        let newer = PrivacyToken {
            user: user.clone(),
            token: vec![9],
            timestamp: DateTime::from_timestamp(1800000000, 0).unwrap(),
        };
        store.put_privacy_tokens(std::slice::from_ref(&newer)).await.unwrap();
        assert_eq!(store.get_privacy_token(&user).await.unwrap(), Some(newer));
    }
}

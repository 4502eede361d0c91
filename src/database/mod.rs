/// Multi-backend SQL persistence for device and account state

pub mod dialect;
pub mod migrations;
pub mod retry;
pub mod schema;
pub mod store;

pub use dialect::Dialect;
pub use store::SqlStore;

use crate::{
    error::{Error, Result},
    store::{AdvSignedDeviceIdentity, Device},
    types::Jid,
    util::keys::{KeyPair, SignedPreKey},
};
use sqlx::{any::AnyRow, Executor, Row};
use std::time::Duration;
use uuid::Uuid;

/// Database connection pool type shared by all per-account stores.
pub type DatabasePool = sqlx::AnyPool;

/// Optional wrapper turning a list of byte blobs into an array-valued
/// parameter for the PostgreSQL family. When registered, bulk deletes
/// use a single `= ANY(...)` statement instead of an `IN` list.
pub type PgArrayWrapper = fn(&[Vec<u8>]) -> String;

/// Render byte blobs as a PostgreSQL `bytea[]` literal. This is the
/// stock [`PgArrayWrapper`] implementation.
pub fn pg_bytea_array(items: &[Vec<u8>]) -> String {
    let elements: Vec<String> = items
        .iter()
        .map(|item| format!("\"\\\\x{}\"", hex::encode(item)))
        .collect();
    format!("{{{}}}", elements.join(","))
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL; the scheme selects the dialect
    pub database_url: String,
    /// Maximum number of connections in pool
    pub max_connections: u32,
    /// Connection acquire timeout in seconds
    pub connection_timeout: u64,
    /// Enable WAL mode for better concurrency (SQLite only)
    pub enable_wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:whatsmeow.db".to_string(),
            max_connections: 10,
            connection_timeout: 30,
            enable_wal: true,
        }
    }
}

/// Owner of the shared database handle.
///
/// The container connects (or adopts) the pool, runs migrations once
/// at construction, and hands out per-account [`SqlStore`] handles
/// that borrow the pool for their operations.
pub struct Container {
    pool: DatabasePool,
    dialect: Dialect,
    pg_array_wrapper: Option<PgArrayWrapper>,
}

impl Container {
    /// Connect and migrate.
    pub async fn new(config: DatabaseConfig) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let dialect = Dialect::from_url(&config.database_url);
        let enable_wal = config.enable_wal;

        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    match dialect {
                        Dialect::Sqlite => {
                            conn.execute("PRAGMA foreign_keys = ON").await?;
                            if enable_wal {
                                conn.execute("PRAGMA journal_mode = WAL").await?;
                            }
                        }
                        Dialect::Mysql => {
                            conn.execute("SET SESSION foreign_key_checks=1").await?;
                        }
                        _ => {}
                    }
                    Ok(())
                })
            })
            .connect(&config.database_url)
            .await
            .map_err(|e| Error::db("connect to database", e))?;

        Self::with_pool(pool, dialect, None).await
    }

    /// Adopt an existing pool and migrate. The array wrapper is the
    /// construction-time injection point for PostgreSQL array
    /// parameters; pass [`pg_bytea_array`] to enable them.
    pub async fn with_pool(
        pool: DatabasePool,
        dialect: Dialect,
        pg_array_wrapper: Option<PgArrayWrapper>,
    ) -> Result<Self> {
        let container = Self {
            pool,
            dialect,
            pg_array_wrapper,
        };
        migrations::upgrade(&container).await?;
        Ok(container)
    }

    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub(crate) fn pg_array_wrapper(&self) -> Option<PgArrayWrapper> {
        self.pg_array_wrapper
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create a fresh, unregistered device.
    pub fn new_device(&self) -> Device {
        Device::new()
    }

    /// Per-account store handle for a registered device JID.
    pub fn device_store(&self, jid: &Jid) -> SqlStore {
        SqlStore::new(self, jid.to_string())
    }

    fn device_columns(&self) -> String {
        // The unified driver has no uuid decoding; PostgreSQL's native
        // uuid column is read back as text.
        let facebook_uuid = match self.dialect {
            Dialect::Postgres => "facebook_uuid::text",
            _ => "facebook_uuid",
        };
        format!(
            "jid, registration_id, noise_key, identity_key, signed_pre_key, \
             signed_pre_key_id, signed_pre_key_sig, adv_key, adv_details, adv_account_sig, \
             adv_account_sig_key, adv_device_sig, platform, business_name, push_name, \
             {facebook_uuid}"
        )
    }

    /// Persist a registered device, inserting or refreshing its row.
    /// Key material is never overwritten for an existing JID.
    pub async fn put_device(&self, device: &Device) -> Result<()> {
        let (Some(jid), Some(account)) = (&device.jid, &device.account) else {
            return Err(Error::DeviceNotRegistered);
        };

        let facebook_uuid_param = match self.dialect {
            Dialect::Postgres => "$16::uuid",
            _ => "$16",
        };
        let template = format!(
            "INSERT INTO whatsmeow_device (jid, registration_id, noise_key, identity_key, \
             signed_pre_key, signed_pre_key_id, signed_pre_key_sig, adv_key, adv_details, \
             adv_account_sig, adv_account_sig_key, adv_device_sig, platform, business_name, \
             push_name, facebook_uuid) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, {facebook_uuid_param}) \
             ON CONFLICT (jid) DO UPDATE \
             SET platform=excluded.platform, business_name=excluded.business_name, \
             push_name=excluded.push_name, facebook_uuid=excluded.facebook_uuid"
        );
        let sql = self.dialect.rewrite(&template);

        sqlx::query(&sql)
            .bind(jid.to_string())
            .bind(device.registration_id as i64)
            .bind(device.noise_key.private_key.to_vec())
            .bind(device.identity_key.private_key.to_vec())
            .bind(device.signed_pre_key.key_pair.private_key.to_vec())
            .bind(device.signed_pre_key.key_id as i64)
            .bind(device.signed_pre_key.signature.to_vec())
            .bind(device.adv_secret_key.to_vec())
            .bind(account.details.clone())
            .bind(account.account_signature.to_vec())
            .bind(account.account_signature_key.to_vec())
            .bind(account.device_signature.to_vec())
            .bind(device.platform.clone())
            .bind(device.business_name.clone())
            .bind(device.push_name.clone())
            .bind(device.facebook_uuid.map(|u| u.to_string()))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("save device", e))?;
        Ok(())
    }

    /// Load one device by JID.
    pub async fn get_device(&self, jid: &Jid) -> Result<Option<Device>> {
        let template = format!(
            "SELECT {} FROM whatsmeow_device WHERE jid=$1",
            self.device_columns()
        );
        let sql = self.dialect.rewrite(&template);
        let row = sqlx::query(&sql)
            .bind(jid.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::db("load device", e))?;
        row.map(|row| scan_device(&row)).transpose()
    }

    /// Load the first stored device, if any.
    pub async fn get_first_device(&self) -> Result<Option<Device>> {
        Ok(self.get_all_devices().await?.into_iter().next())
    }

    /// Load every stored device.
    pub async fn get_all_devices(&self) -> Result<Vec<Device>> {
        let sql = format!("SELECT {} FROM whatsmeow_device", self.device_columns());
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::db("load devices", e))?;
        rows.iter().map(scan_device).collect()
    }

    /// Delete a device and, by cascade, all of its account-scoped
    /// rows.
    pub async fn delete_device(&self, jid: &Jid) -> Result<()> {
        let sql = self.dialect.rewrite("DELETE FROM whatsmeow_device WHERE jid=$1");
        sqlx::query(&sql)
            .bind(jid.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::db("delete device", e))?;
        Ok(())
    }
}

/// Decode one column, wrapping driver errors with context.
pub(crate) fn col<'r, T>(row: &'r AnyRow, index: usize) -> Result<T>
where
    T: sqlx::Decode<'r, sqlx::Any> + sqlx::Type<sqlx::Any>,
{
    row.try_get::<T, _>(index)
        .map_err(|e| Error::Database(format!("Failed to decode column {}: {}", index, e)))
}

/// Enforce the declared width of a fixed-size blob column.
pub(crate) fn to_fixed<const N: usize>(column: &'static str, value: Vec<u8>) -> Result<[u8; N]> {
    let got = value.len();
    value.try_into().map_err(|_| Error::InvalidLength {
        column,
        expected: N,
        got,
    })
}

fn scan_device(row: &AnyRow) -> Result<Device> {
    let jid_str: String = col(row, 0)?;
    let jid = Jid::parse(&jid_str)?;
    let registration_id: i64 = col(row, 1)?;
    let noise_key = to_fixed::<32>("noise_key", col(row, 2)?)?;
    let identity_key = to_fixed::<32>("identity_key", col(row, 3)?)?;
    let signed_pre_key = to_fixed::<32>("signed_pre_key", col(row, 4)?)?;
    let signed_pre_key_id: i64 = col(row, 5)?;
    let signed_pre_key_sig = to_fixed::<64>("signed_pre_key_sig", col(row, 6)?)?;
    let adv_secret_key = to_fixed::<32>("adv_key", col(row, 7)?)?;

    let account = AdvSignedDeviceIdentity {
        details: col(row, 8)?,
        account_signature: to_fixed::<64>("adv_account_sig", col(row, 9)?)?,
        account_signature_key: to_fixed::<32>(
            "adv_account_sig_key",
            col::<Option<Vec<u8>>>(row, 10)?.unwrap_or_default(),
        )?,
        device_signature: to_fixed::<64>("adv_device_sig", col(row, 11)?)?,
    };

    let facebook_uuid = col::<Option<String>>(row, 15)?
        .map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| Error::Database(format!("Failed to parse facebook_uuid: {}", e)))?;

    Ok(Device {
        jid: Some(jid),
        registration_id: registration_id as u32,
        noise_key: KeyPair::from_private_bytes(&noise_key)?,
        identity_key: KeyPair::from_private_bytes(&identity_key)?,
        signed_pre_key: SignedPreKey {
            key_pair: KeyPair::from_private_bytes(&signed_pre_key)?,
            key_id: signed_pre_key_id as u32,
            signature: signed_pre_key_sig,
        },
        adv_secret_key,
        account: Some(account),
        platform: col(row, 12)?,
        business_name: col(row, 13)?,
        push_name: col(row, 14)?,
        facebook_uuid,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) async fn memory_container() -> Container {
        let config = DatabaseConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            connection_timeout: 10,
            enable_wal: false,
        };
        Container::new(config).await.unwrap()
    }

    pub(crate) fn registered_device(jid: &str) -> Device {
        let mut device = Device::new();
        device.jid = Some(Jid::parse(jid).unwrap());
        device.account = Some(AdvSignedDeviceIdentity {
            details: vec![1, 2, 3, 4],
            account_signature: [7u8; 64],
            account_signature_key: [8u8; 32],
            device_signature: [9u8; 64],
        });
        device
    }

    #[tokio::test]
    async fn test_unregistered_device_is_rejected() {
        let container = memory_container().await;
        let device = container.new_device();
        assert!(matches!(
            container.put_device(&device).await,
            Err(Error::DeviceNotRegistered)
        ));
    }

    #[tokio::test]
    async fn test_device_roundtrip() {
        let container = memory_container().await;
        let mut device = registered_device("111:1@s.whatsapp.net");
        device.registration_id = 42;
        device.push_name = "tester".to_string();
        device.facebook_uuid = Some(Uuid::new_v4());
        container.put_device(&device).await.unwrap();

        let loaded = container
            .get_device(device.jid.as_ref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.jid, device.jid);
        assert_eq!(loaded.registration_id, 42);
        assert_eq!(loaded.noise_key, device.noise_key);
        assert_eq!(loaded.identity_key, device.identity_key);
        assert_eq!(loaded.signed_pre_key, device.signed_pre_key);
        assert_eq!(loaded.adv_secret_key, device.adv_secret_key);
        assert_eq!(loaded.account, device.account);
        assert_eq!(loaded.push_name, "tester");
        assert_eq!(loaded.facebook_uuid, device.facebook_uuid);
    }

    #[tokio::test]
    async fn test_get_first_and_all_devices() {
        let container = memory_container().await;
        assert!(container.get_first_device().await.unwrap().is_none());

        container
            .put_device(&registered_device("111:1@s.whatsapp.net"))
            .await
            .unwrap();
        container
            .put_device(&registered_device("222:2@s.whatsapp.net"))
            .await
            .unwrap();

        assert!(container.get_first_device().await.unwrap().is_some());
        assert_eq!(container.get_all_devices().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_delete_device() {
        let container = memory_container().await;
        let device = registered_device("111:1@s.whatsapp.net");
        container.put_device(&device).await.unwrap();

        let jid = device.jid.as_ref().unwrap();
        container.delete_device(jid).await.unwrap();
        assert!(container.get_device(jid).await.unwrap().is_none());
    }

    #[test]
    fn test_pg_bytea_array_literal() {
        let rendered = pg_bytea_array(&[vec![0x01, 0x02], vec![0xAB]]);
        assert_eq!(rendered, "{\"\\\\x0102\",\"\\\\xab\"}");
    }
}

/// Schema definitions for the account store
///
/// Two DDL variants exist: a shared one for PostgreSQL and SQLite
/// (both accept the `bytea` spelling and `TEXT` primary keys) and a
/// MySQL one with sized key columns and `VARBINARY` blobs. Statement
/// order matters; referenced tables come first.
use super::dialect::Dialect;

/// Current schema version; the migration engine upgrades to this.
pub const LATEST_VERSION: i32 = 7;

/// Core tables created by migration step 1, PostgreSQL/SQLite form.
pub const CREATE_TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_device (
        jid TEXT PRIMARY KEY,
        registration_id BIGINT NOT NULL CHECK ( registration_id >= 0 AND registration_id < 4294967296 ),
        noise_key bytea NOT NULL CHECK ( length(noise_key) = 32 ),
        identity_key bytea NOT NULL CHECK ( length(identity_key) = 32 ),
        signed_pre_key bytea NOT NULL CHECK ( length(signed_pre_key) = 32 ),
        signed_pre_key_id INTEGER NOT NULL CHECK ( signed_pre_key_id >= 0 AND signed_pre_key_id < 16777216 ),
        signed_pre_key_sig bytea NOT NULL CHECK ( length(signed_pre_key_sig) = 64 ),
        adv_key bytea NOT NULL,
        adv_details bytea NOT NULL,
        adv_account_sig bytea NOT NULL CHECK ( length(adv_account_sig) = 64 ),
        adv_device_sig bytea NOT NULL CHECK ( length(adv_device_sig) = 64 ),
        platform TEXT NOT NULL DEFAULT '',
        business_name TEXT NOT NULL DEFAULT '',
        push_name TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_identity_keys (
        our_jid TEXT,
        their_id TEXT,
        identity bytea NOT NULL CHECK ( length(identity) = 32 ),
        PRIMARY KEY (our_jid, their_id),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_pre_keys (
        our_jid TEXT,
        key_id INTEGER CHECK ( key_id >= 0 AND key_id < 16777216 ),
        key bytea NOT NULL CHECK ( length(key) = 32 ),
        uploaded BOOLEAN NOT NULL,
        PRIMARY KEY (our_jid, key_id),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_sessions (
        our_jid TEXT,
        their_id TEXT,
        session bytea,
        PRIMARY KEY (our_jid, their_id),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_sender_keys (
        our_jid TEXT,
        chat_id TEXT,
        sender_id TEXT,
        sender_key bytea NOT NULL,
        PRIMARY KEY (our_jid, chat_id, sender_id),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_app_state_sync_keys (
        jid TEXT,
        key_id bytea,
        key_data bytea NOT NULL,
        timestamp BIGINT NOT NULL,
        fingerprint bytea NOT NULL,
        PRIMARY KEY (jid, key_id),
        FOREIGN KEY (jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_app_state_version (
        jid TEXT,
        name TEXT,
        version BIGINT NOT NULL,
        hash bytea NOT NULL CHECK ( length(hash) = 128 ),
        PRIMARY KEY (jid, name),
        FOREIGN KEY (jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_app_state_mutation_macs (
        jid TEXT,
        name TEXT,
        version BIGINT,
        index_mac bytea CHECK ( length(index_mac) = 32 ),
        value_mac bytea NOT NULL CHECK ( length(value_mac) = 32 ),
        PRIMARY KEY (jid, name, version, index_mac),
        FOREIGN KEY (jid, name) REFERENCES whatsmeow_app_state_version(jid, name) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_contacts (
        our_jid TEXT,
        their_jid TEXT,
        first_name TEXT,
        full_name TEXT,
        push_name TEXT,
        business_name TEXT,
        PRIMARY KEY (our_jid, their_jid),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_chat_settings (
        our_jid TEXT,
        chat_jid TEXT,
        muted_until BIGINT NOT NULL DEFAULT 0,
        pinned BOOLEAN NOT NULL DEFAULT false,
        archived BOOLEAN NOT NULL DEFAULT false,
        PRIMARY KEY (our_jid, chat_jid),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
];

/// Core tables created by migration step 1, MySQL form.
pub const CREATE_TABLES_MYSQL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_device (
        jid VARCHAR(255) PRIMARY KEY,
        registration_id BIGINT NOT NULL CHECK ( registration_id >= 0 AND registration_id < 4294967296 ),
        noise_key VARBINARY(32) NOT NULL CHECK ( length(noise_key) = 32 ),
        identity_key VARBINARY(32) NOT NULL CHECK ( length(identity_key) = 32 ),
        signed_pre_key VARBINARY(32) NOT NULL CHECK ( length(signed_pre_key) = 32 ),
        signed_pre_key_id INTEGER NOT NULL CHECK ( signed_pre_key_id >= 0 AND signed_pre_key_id < 16777216 ),
        signed_pre_key_sig VARBINARY(64) NOT NULL CHECK ( length(signed_pre_key_sig) = 64 ),
        adv_key VARBINARY(32) NOT NULL,
        adv_details LONGBLOB NOT NULL,
        adv_account_sig VARBINARY(64) NOT NULL CHECK ( length(adv_account_sig) = 64 ),
        adv_device_sig VARBINARY(64) NOT NULL CHECK ( length(adv_device_sig) = 64 ),
        platform VARCHAR(255) NOT NULL DEFAULT '',
        business_name VARCHAR(255) NOT NULL DEFAULT '',
        push_name VARCHAR(255) NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_identity_keys (
        our_jid VARCHAR(255),
        their_id VARCHAR(255),
        identity VARBINARY(32) NOT NULL CHECK ( length(identity) = 32 ),
        PRIMARY KEY (our_jid, their_id),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_pre_keys (
        our_jid VARCHAR(255),
        key_id INTEGER CHECK ( key_id >= 0 AND key_id < 16777216 ),
        `key` VARBINARY(32) NOT NULL CHECK ( length(`key`) = 32 ),
        uploaded BOOLEAN NOT NULL,
        PRIMARY KEY (our_jid, key_id),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_sessions (
        our_jid VARCHAR(255),
        their_id VARCHAR(255),
        session LONGBLOB,
        PRIMARY KEY (our_jid, their_id),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_sender_keys (
        our_jid VARCHAR(255),
        chat_id VARCHAR(255),
        sender_id VARCHAR(255),
        sender_key LONGBLOB NOT NULL,
        PRIMARY KEY (our_jid, chat_id, sender_id),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_app_state_sync_keys (
        jid VARCHAR(255),
        key_id VARBINARY(255),
        key_data LONGBLOB NOT NULL,
        timestamp BIGINT NOT NULL,
        fingerprint LONGBLOB NOT NULL,
        PRIMARY KEY (jid, key_id),
        FOREIGN KEY (jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_app_state_version (
        jid VARCHAR(255),
        name VARCHAR(255),
        version BIGINT NOT NULL,
        hash VARBINARY(128) NOT NULL CHECK ( length(hash) = 128 ),
        PRIMARY KEY (jid, name),
        FOREIGN KEY (jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_app_state_mutation_macs (
        jid VARCHAR(255),
        name VARCHAR(255),
        version BIGINT,
        index_mac VARBINARY(32) CHECK ( length(index_mac) = 32 ),
        value_mac VARBINARY(32) NOT NULL CHECK ( length(value_mac) = 32 ),
        PRIMARY KEY (jid, name, version, index_mac),
        FOREIGN KEY (jid, name) REFERENCES whatsmeow_app_state_version(jid, name) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_contacts (
        our_jid VARCHAR(255),
        their_jid VARCHAR(255),
        first_name VARCHAR(255),
        full_name VARCHAR(255),
        push_name VARCHAR(255),
        business_name VARCHAR(255),
        PRIMARY KEY (our_jid, their_jid),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_chat_settings (
        our_jid VARCHAR(255),
        chat_jid VARCHAR(255),
        muted_until BIGINT NOT NULL DEFAULT 0,
        pinned BOOLEAN NOT NULL DEFAULT false,
        archived BOOLEAN NOT NULL DEFAULT false,
        PRIMARY KEY (our_jid, chat_jid),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
];

const MESSAGE_SECRETS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_message_secrets (
        our_jid TEXT,
        chat_jid TEXT,
        sender_jid TEXT,
        message_id TEXT,
        key bytea NOT NULL,
        PRIMARY KEY (our_jid, chat_jid, sender_jid, message_id),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#;

const MESSAGE_SECRETS_TABLE_MYSQL: &str = r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_message_secrets (
        our_jid VARCHAR(255),
        chat_jid VARCHAR(255),
        sender_jid VARCHAR(255),
        message_id VARCHAR(255),
        `key` LONGBLOB NOT NULL,
        PRIMARY KEY (our_jid, chat_jid, sender_jid, message_id),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#;

const PRIVACY_TOKENS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_privacy_tokens (
        our_jid TEXT,
        their_jid TEXT,
        token bytea NOT NULL,
        timestamp BIGINT NOT NULL,
        PRIMARY KEY (our_jid, their_jid),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#;

const PRIVACY_TOKENS_TABLE_MYSQL: &str = r#"
    CREATE TABLE IF NOT EXISTS whatsmeow_privacy_tokens (
        our_jid VARCHAR(255),
        their_jid VARCHAR(255),
        token LONGBLOB NOT NULL,
        timestamp BIGINT NOT NULL,
        PRIMARY KEY (our_jid, their_jid),
        FOREIGN KEY (our_jid) REFERENCES whatsmeow_device(jid) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#;

/// All store tables, for maintenance passes over the whole schema.
pub const ALL_TABLES: &[&str] = &[
    "whatsmeow_device",
    "whatsmeow_identity_keys",
    "whatsmeow_pre_keys",
    "whatsmeow_sessions",
    "whatsmeow_sender_keys",
    "whatsmeow_app_state_sync_keys",
    "whatsmeow_app_state_version",
    "whatsmeow_app_state_mutation_macs",
    "whatsmeow_contacts",
    "whatsmeow_chat_settings",
    "whatsmeow_message_secrets",
    "whatsmeow_privacy_tokens",
    "whatsmeow_version",
];

pub fn create_tables(dialect: Dialect) -> &'static [&'static str] {
    match dialect {
        Dialect::Mysql => CREATE_TABLES_MYSQL,
        _ => CREATE_TABLES,
    }
}

pub fn message_secrets_table(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Mysql => MESSAGE_SECRETS_TABLE_MYSQL,
        _ => MESSAGE_SECRETS_TABLE,
    }
}

pub fn privacy_tokens_table(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Mysql => PRIVACY_TOKENS_TABLE_MYSQL,
        _ => PRIVACY_TOKENS_TABLE,
    }
}

/// Schema migrations for the account store
///
/// Upgrades are applied linearly, one transaction per step, and the
/// single-row `whatsmeow_version` counter is bumped inside the same
/// transaction as the step it records. A failed step rolls back and
/// leaves the counter untouched. The engine refuses to run when the
/// back-end does not enforce foreign keys, since every account-scoped
/// table relies on cascade deletes from the device table.
use super::{dialect::Dialect, schema, Container};
use crate::error::{Error, Result};
use sqlx::{Any, Transaction};

/// Run all pending migrations.
pub async fn upgrade(container: &Container) -> Result<()> {
    check_foreign_keys(container).await?;
    ensure_version_table(container).await?;

    let mut version = get_version(container).await?;
    if version >= schema::LATEST_VERSION {
        tracing::debug!("Database schema is up to date (version {})", version);
        return Ok(());
    }

    tracing::info!(
        "Upgrading database schema from version {} to {}",
        version,
        schema::LATEST_VERSION
    );
    while version < schema::LATEST_VERSION {
        let target = version + 1;
        apply_step(container, target).await?;
        version = target;
    }
    Ok(())
}

/// Verify that referential integrity is enforced before touching the
/// schema. PostgreSQL always enforces; the embedded and MySQL-family
/// engines only do so when the pragma / session variable is set.
async fn check_foreign_keys(container: &Container) -> Result<()> {
    let enabled: i64 = match container.dialect() {
        Dialect::Sqlite => sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(container.pool())
            .await
            .map_err(|e| Error::db("check foreign_keys pragma", e))?,
        Dialect::Mysql => sqlx::query_scalar("SELECT @@foreign_key_checks")
            .fetch_one(container.pool())
            .await
            .map_err(|e| Error::db("check foreign_key_checks variable", e))?,
        _ => 1,
    };
    if enabled == 0 {
        return Err(Error::MigrationPrecondition);
    }
    Ok(())
}

async fn ensure_version_table(container: &Container) -> Result<()> {
    sqlx::query("CREATE TABLE IF NOT EXISTS whatsmeow_version (version INTEGER)")
        .execute(container.pool())
        .await
        .map_err(|e| Error::db("create version table", e))?;
    Ok(())
}

/// Current schema version, 0 for a fresh database.
pub async fn get_version(container: &Container) -> Result<i32> {
    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM whatsmeow_version LIMIT 1")
        .fetch_optional(container.pool())
        .await
        .map_err(|e| Error::db("read schema version", e))?;
    Ok(version.unwrap_or(0) as i32)
}

async fn set_version(tx: &mut Transaction<'_, Any>, dialect: Dialect, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM whatsmeow_version")
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::db("clear schema version", e))?;
    sqlx::query(&dialect.rewrite("INSERT INTO whatsmeow_version (version) VALUES ($1)"))
        .bind(version as i64)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::db("write schema version", e))?;
    Ok(())
}

async fn apply_step(container: &Container, target: i32) -> Result<()> {
    let dialect = container.dialect();
    let mut tx = container
        .pool()
        .begin()
        .await
        .map_err(|e| Error::db("begin migration transaction", e))?;

    let step = run_step(&mut tx, dialect, target).await;
    let step = match step {
        Ok(()) => set_version(&mut tx, dialect, target).await,
        Err(e) => Err(e),
    };

    match step {
        Ok(()) => {
            tx.commit()
                .await
                .map_err(|e| Error::db("commit migration transaction", e))?;
            tracing::info!("Migrated database schema to version {}", target);
            Ok(())
        }
        Err(e) => {
            let _ = tx.rollback().await;
            Err(Error::MigrationFailed {
                version: target,
                message: e.to_string(),
            })
        }
    }
}

async fn run_step(tx: &mut Transaction<'_, Any>, dialect: Dialect, target: i32) -> Result<()> {
    match target {
        1 => upgrade_v1(tx, dialect).await,
        2 => upgrade_v2(tx, dialect).await,
        3 => upgrade_v3(tx, dialect).await,
        4 => upgrade_v4(tx, dialect).await,
        5 => upgrade_v5(tx).await,
        6 => upgrade_v6(tx, dialect).await,
        7 => upgrade_v7(tx, dialect).await,
        _ => Err(Error::Database(format!(
            "no migration step for version {}",
            target
        ))),
    }
}

async fn exec(tx: &mut Transaction<'_, Any>, sql: &str) -> Result<()> {
    sqlx::query(sql)
        .execute(&mut **tx)
        .await
        .map_err(|e| Error::Database(format!("Migration statement failed: {}", e)))?;
    Ok(())
}

/// Run a DDL statement, treating "already exists" as success. Needed
/// for back-ends whose DDL commits implicitly and can leave partial
/// artifacts behind after an aborted upgrade.
async fn exec_tolerating_existing(tx: &mut Transaction<'_, Any>, sql: &str) -> Result<()> {
    match sqlx::query(sql).execute(&mut **tx).await {
        Ok(_) => Ok(()),
        Err(e) if is_already_exists(&e) => {
            tracing::debug!("Skipping migration statement, artifact already exists: {}", e);
            Ok(())
        }
        Err(e) => Err(Error::Database(format!("Migration statement failed: {}", e))),
    }
}

fn is_already_exists(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db_err) = err else {
        return false;
    };
    if let Some(code) = db_err.code() {
        // PostgreSQL duplicate_column / duplicate_table, MySQL
        // ER_DUP_FIELDNAME / ER_TABLE_EXISTS_ERROR
        if matches!(code.as_ref(), "42701" | "42P07" | "1060" | "1050") {
            return true;
        }
    }
    let message = db_err.message();
    message.contains("duplicate column name") || message.contains("already exists")
}

/// Step 1: create all core tables.
async fn upgrade_v1(tx: &mut Transaction<'_, Any>, dialect: Dialect) -> Result<()> {
    for sql in schema::create_tables(dialect) {
        exec(tx, sql).await?;
    }
    Ok(())
}

/// Step 2: add the ADV account signature key column and backfill it
/// from the self-identity row (`<local user>:0`). Devices whose
/// backfill fails are deleted on every back-end.
async fn upgrade_v2(tx: &mut Transaction<'_, Any>, dialect: Dialect) -> Result<()> {
    match dialect {
        Dialect::Postgres => {
            exec(
                tx,
                "ALTER TABLE whatsmeow_device ADD COLUMN IF NOT EXISTS adv_account_sig_key bytea CHECK ( length(adv_account_sig_key) = 32 )",
            )
            .await?;
        }
        Dialect::Mysql => {
            exec_tolerating_existing(
                tx,
                "ALTER TABLE whatsmeow_device ADD COLUMN adv_account_sig_key VARBINARY(32) CHECK ( length(adv_account_sig_key) = 32 )",
            )
            .await?;
        }
        _ => {
            exec_tolerating_existing(
                tx,
                "ALTER TABLE whatsmeow_device ADD COLUMN adv_account_sig_key bytea CHECK ( length(adv_account_sig_key) = 32 )",
            )
            .await?;
        }
    }

    let self_identity = match dialect {
        Dialect::Postgres => "concat(split_part(whatsmeow_device.jid, ':', 1), ':0')",
        Dialect::Mysql => "CONCAT(SUBSTRING_INDEX(whatsmeow_device.jid, ':', 1), ':0')",
        _ => "substr(whatsmeow_device.jid, 1, instr(whatsmeow_device.jid, ':') - 1) || ':0'",
    };
    exec(
        tx,
        &format!(
            "UPDATE whatsmeow_device SET adv_account_sig_key=( \
                SELECT identity \
                FROM whatsmeow_identity_keys \
                WHERE our_jid=whatsmeow_device.jid AND their_id={self_identity} \
            )"
        ),
    )
    .await?;
    exec(tx, "DELETE FROM whatsmeow_device WHERE adv_account_sig_key IS NULL").await?;

    match dialect {
        Dialect::Postgres => {
            exec(
                tx,
                "ALTER TABLE whatsmeow_device ALTER COLUMN adv_account_sig_key SET NOT NULL",
            )
            .await?;
        }
        Dialect::Mysql => {
            exec(
                tx,
                "ALTER TABLE whatsmeow_device MODIFY adv_account_sig_key VARBINARY(32) NOT NULL",
            )
            .await?;
        }
        // SQLite cannot alter nullability in place; reads enforce the
        // 32-byte length instead.
        _ => {}
    }
    Ok(())
}

/// Step 3: create the message secrets table.
async fn upgrade_v3(tx: &mut Transaction<'_, Any>, dialect: Dialect) -> Result<()> {
    exec(tx, schema::message_secrets_table(dialect)).await
}

/// Step 4: create the privacy tokens table.
async fn upgrade_v4(tx: &mut Transaction<'_, Any>, dialect: Dialect) -> Result<()> {
    exec(tx, schema::privacy_tokens_table(dialect)).await
}

/// Step 5: normalize device JIDs by stripping the legacy `.0` agent
/// suffix; child rows follow through ON UPDATE CASCADE.
async fn upgrade_v5(tx: &mut Transaction<'_, Any>) -> Result<()> {
    exec(tx, "UPDATE whatsmeow_device SET jid=REPLACE(jid, '.0', '')").await
}

/// Step 6: add the Facebook UUID column, using the native UUID type
/// where one exists.
async fn upgrade_v6(tx: &mut Transaction<'_, Any>, dialect: Dialect) -> Result<()> {
    match dialect {
        Dialect::Postgres => {
            exec(
                tx,
                "ALTER TABLE whatsmeow_device ADD COLUMN IF NOT EXISTS facebook_uuid uuid",
            )
            .await
        }
        Dialect::Mysql => {
            exec_tolerating_existing(
                tx,
                "ALTER TABLE whatsmeow_device ADD COLUMN facebook_uuid CHAR(36)",
            )
            .await
        }
        _ => {
            exec_tolerating_existing(
                tx,
                "ALTER TABLE whatsmeow_device ADD COLUMN facebook_uuid TEXT",
            )
            .await
        }
    }
}

/// Step 7: convert MySQL string columns to a full-Unicode collation.
/// Foreign-key enforcement is relaxed around the conversion and
/// restored on every exit path. A no-op on other back-ends and on
/// databases already defaulting to utf8mb4.
async fn upgrade_v7(tx: &mut Transaction<'_, Any>, dialect: Dialect) -> Result<()> {
    if dialect != Dialect::Mysql {
        return Ok(());
    }

    let charset: String = sqlx::query_scalar("SELECT @@character_set_database")
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| Error::db("read database charset", e))?;
    if charset.starts_with("utf8mb4") {
        tracing::debug!("Database charset is already {}, skipping conversion", charset);
        return Ok(());
    }

    exec(tx, "SET FOREIGN_KEY_CHECKS=0").await?;
    let converted = convert_charsets(tx).await;
    let restored = exec(tx, "SET FOREIGN_KEY_CHECKS=1").await;
    converted?;
    restored
}

async fn convert_charsets(tx: &mut Transaction<'_, Any>) -> Result<()> {
    for table in schema::ALL_TABLES {
        exec(
            tx,
            &format!("ALTER TABLE {table} CONVERT TO CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci"),
        )
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Container, DatabaseConfig};

    async fn memory_container() -> Container {
        let config = DatabaseConfig {
            database_url: "sqlite::memory:".to_string(),
            max_connections: 1,
            connection_timeout: 10,
            enable_wal: false,
        };
        Container::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_fresh_database_reaches_latest_version() {
        let container = memory_container().await;
        let version = get_version(&container).await.unwrap();
        assert_eq!(version, schema::LATEST_VERSION);
    }

    #[tokio::test]
    async fn test_all_tables_created() {
        let container = memory_container().await;

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name LIKE 'whatsmeow_%'",
        )
        .fetch_all(container.pool())
        .await
        .unwrap();

        for expected in schema::ALL_TABLES {
            assert!(tables.contains(&expected.to_string()), "Table {} not found", expected);
        }
    }

    #[tokio::test]
    async fn test_upgrade_is_idempotent_on_existing_database() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());

        let config = DatabaseConfig {
            database_url: url.clone(),
            max_connections: 1,
            connection_timeout: 10,
            enable_wal: false,
        };
        let first = Container::new(config.clone()).await.unwrap();
        assert_eq!(get_version(&first).await.unwrap(), schema::LATEST_VERSION);
        first.close().await;

        // Reopening runs the migration entry point again as a no-op.
        let second = Container::new(config).await.unwrap();
        assert_eq!(get_version(&second).await.unwrap(), schema::LATEST_VERSION);
        second.close().await;
    }
}

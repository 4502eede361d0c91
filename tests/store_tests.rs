use whatsmeow_sqlstore::{
    database::{Container, DatabaseConfig},
    store::{
        AdvSignedDeviceIdentity, AppStateSyncKey, AppStateSyncKeyStore, ContactStore, Device,
        IdentityStore, MsgSecretStore, PreKeyStore, SessionStore,
    },
    Error, Jid,
};

async fn memory_container() -> Container {
    let config = DatabaseConfig {
        database_url: "sqlite::memory:".to_string(),
        max_connections: 1,
        connection_timeout: 10,
        enable_wal: false,
    };
    Container::new(config).await.unwrap()
}

fn registered_device(jid: &str, registration_id: u32) -> Device {
    let mut device = Device::new();
    device.jid = Some(Jid::parse(jid).unwrap());
    device.registration_id = registration_id;
    device.account = Some(AdvSignedDeviceIdentity {
        details: vec![1, 2, 3],
        account_signature: [1u8; 64],
        account_signature_key: [2u8; 32],
        device_signature: [3u8; 64],
    });
    device
}

#[tokio::test]
async fn fresh_account_pre_key_allocation() {
    let container = memory_container().await;
    let device = registered_device("111:1@s.whatsapp.net", 42);
    container.put_device(&device).await.unwrap();

    let store = container.device_store(device.jid.as_ref().unwrap());
    let ids = [
        store.gen_one_pre_key().await.unwrap().key_id,
        store.gen_one_pre_key().await.unwrap().key_id,
        store.gen_one_pre_key().await.unwrap().key_id,
    ];
    assert_eq!(ids, [1, 2, 3]);
    assert_eq!(store.uploaded_pre_key_count().await.unwrap(), 3);
}

#[tokio::test]
async fn sync_key_timestamps_are_monotonic() {
    let container = memory_container().await;
    let device = registered_device("111:1@s.whatsapp.net", 42);
    container.put_device(&device).await.unwrap();
    let store = container.device_store(device.jid.as_ref().unwrap());

    store
        .put_app_state_sync_key(
            &[0xAB],
            AppStateSyncKey {
                data: b"D1".to_vec(),
                fingerprint: vec![1],
                timestamp: 100,
            },
        )
        .await
        .unwrap();
    store
        .put_app_state_sync_key(
            &[0xAB],
            AppStateSyncKey {
                data: b"D2".to_vec(),
                fingerprint: vec![2],
                timestamp: 50,
            },
        )
        .await
        .unwrap();

    let key = store.get_app_state_sync_key(&[0xAB]).await.unwrap().unwrap();
    assert_eq!(key.data, b"D1".to_vec());
}

#[tokio::test]
async fn contact_upserts_report_diffs() {
    let container = memory_container().await;
    let device = registered_device("111:1@s.whatsapp.net", 42);
    container.put_device(&device).await.unwrap();
    let store = container.device_store(device.jid.as_ref().unwrap());

    let user = Jid::parse("555@s.whatsapp.net").unwrap();
    assert!(store.put_contact_name(&user, "Al", "Alice").await.unwrap());
    assert!(!store.put_contact_name(&user, "Al", "Alice").await.unwrap());

    let (changed, previous) = store.put_push_name(&user, "alice").await.unwrap();
    assert!(changed);
    assert_eq!(previous, "");

    let contact = store.get_contact(&user).await.unwrap();
    assert!(contact.found);
    assert_eq!(contact.first_name, "Al");
    assert_eq!(contact.full_name, "Alice");
    assert_eq!(contact.push_name, "alice");
}

#[tokio::test]
async fn truncated_identity_fails_with_invalid_length() {
    let container = memory_container().await;
    let device = registered_device("111:1@s.whatsapp.net", 42);
    container.put_device(&device).await.unwrap();
    let store = container.device_store(device.jid.as_ref().unwrap());

    sqlx::query("PRAGMA ignore_check_constraints = ON")
        .execute(container.pool())
        .await
        .unwrap();
    sqlx::query("INSERT INTO whatsmeow_identity_keys (our_jid, their_id, identity) VALUES (?, ?, ?)")
        .bind("111:1@s.whatsapp.net")
        .bind("222:0")
        .bind(vec![0u8; 31])
        .execute(container.pool())
        .await
        .unwrap();

    let err = store.is_trusted_identity("222:0", &[0u8; 32]).await.unwrap_err();
    assert!(matches!(err, Error::InvalidLength { expected: 32, got: 31, .. }));
}

#[tokio::test]
async fn message_secrets_are_first_write_wins() {
    let container = memory_container().await;
    let device = registered_device("111:1@s.whatsapp.net", 42);
    container.put_device(&device).await.unwrap();
    let store = container.device_store(device.jid.as_ref().unwrap());

    let chat = Jid::parse("group@g.us").unwrap();
    let sender = Jid::parse("222@s.whatsapp.net").unwrap();
    store.put_message_secret(&chat, &sender, "MSG", b"k1").await.unwrap();
    store.put_message_secret(&chat, &sender, "MSG", b"k2").await.unwrap();

    assert_eq!(
        store.get_message_secret(&chat, &sender, "MSG").await.unwrap(),
        Some(b"k1".to_vec())
    );
}

#[tokio::test]
async fn deleting_a_device_cascades_to_account_rows() {
    let container = memory_container().await;
    let device = registered_device("111:1@s.whatsapp.net", 42);
    container.put_device(&device).await.unwrap();
    let jid = device.jid.as_ref().unwrap();

    let store = container.device_store(jid);
    store.put_session("222:0", &[1, 2, 3]).await.unwrap();
    store.put_identity("222:0", [5u8; 32]).await.unwrap();
    assert!(store.has_session("222:0").await.unwrap());

    container.delete_device(jid).await.unwrap();

    // Dependent rows are gone; reads report benign absence
    assert_eq!(store.get_session("222:0").await.unwrap(), None);
    assert!(!store.has_session("222:0").await.unwrap());

    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM whatsmeow_identity_keys WHERE our_jid = ?")
            .bind(jid.to_string())
            .fetch_one(container.pool())
            .await
            .unwrap();
    assert_eq!(count, 0);
}

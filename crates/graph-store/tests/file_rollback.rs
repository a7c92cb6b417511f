//! File backend and file backups working together: snapshot, overwrite,
//! restore.

use std::collections::BTreeMap;
use std::fs;

use graph_store::{
    BackupManager, FileBackupManager, FileStore, FileStoreConfig, StoreBackend, StoreDocument,
    StoreError, StoreMetadata, StoreRecord,
};

fn metadata(version: &str, hash: &str) -> StoreMetadata {
    StoreMetadata {
        model_name: Some("Notes".into()),
        version_identifier: Some(version.into()),
        entity_hashes: BTreeMap::from([("Note".to_string(), hash.to_string())]),
    }
}

#[test]
fn snapshot_overwrite_restore() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data").join("notes.json");
    let store = FileStore::with_config(FileStoreConfig {
        pretty: true,
        ..FileStoreConfig::default()
    });
    let backups = FileBackupManager::new(dir.path().join("backups"));

    let mut original = StoreDocument::new(metadata("V1_0_0", "aaa"));
    original.insert("Note", StoreRecord::new("n1").with("title", "groceries"));
    store.commit(&path, &original).unwrap();

    let backup = backups.create_snapshot(&path).unwrap();

    let mut migrated = StoreDocument::new(metadata("V1_1_0", "bbb"));
    migrated.insert(
        "Note",
        StoreRecord::new("n1")
            .with("title", "groceries")
            .with("pinned", false),
    );
    store.commit(&path, &migrated).unwrap();
    assert_eq!(
        store.read_metadata(&path).unwrap().unwrap().version_identifier.as_deref(),
        Some("V1_1_0")
    );

    backups.restore(&backup, &path).unwrap();
    assert_eq!(store.load(&path).unwrap(), original);
    assert_eq!(backups.snapshots().unwrap(), vec![backup]);
}

#[test]
fn malformed_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.json");
    fs::write(&path, b"{ not json").unwrap();

    let store = FileStore::new();
    assert!(store.exists(&path));
    assert!(matches!(store.load(&path), Err(StoreError::Malformed { .. })));
    assert!(matches!(
        store.read_metadata(&path),
        Err(StoreError::Malformed { .. })
    ));
}

#[test]
fn metadata_only_header() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.json");
    fs::write(
        &path,
        br#"{"metadata":{"entity_hashes":{"Note":"abc"}},"entities":{"Note":[{"id":"n1"}]}}"#,
    )
    .unwrap();

    let store = FileStore::new();
    let header = store.read_metadata(&path).unwrap().unwrap();
    assert_eq!(header.entity_hashes["Note"], "abc");
    assert!(header.model_name.is_none());

    let doc = store.load(&path).unwrap();
    assert_eq!(doc.records("Note")[0].id, "n1");
    assert!(doc.records("Note")[0].attributes.is_empty());
}

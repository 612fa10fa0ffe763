use chrono::Utc;
use tempfile::TempDir;

use depot::db::queries;
use depot::sync;

use crate::common::{test_conn, test_state, test_state_vcs, write_plugin_zip};

#[test]
fn lock_is_single_winner() {
    let conn = test_conn();
    let now = Utc::now().timestamp();

    assert!(queries::try_acquire_lock(&conn, "acme-plugin", now, 10).unwrap());
    // A concurrent worker loses without blocking.
    assert!(!queries::try_acquire_lock(&conn, "acme-plugin", now, 10).unwrap());
    // Another slug is unaffected.
    assert!(queries::try_acquire_lock(&conn, "other-pkg", now, 10).unwrap());
}

#[test]
fn expired_lock_can_be_stolen() {
    let conn = test_conn();
    let now = Utc::now().timestamp();

    // A holder that acquired 20 seconds ago with a 10 second deadline.
    assert!(queries::try_acquire_lock(&conn, "acme-plugin", now - 20, 10).unwrap());
    assert!(queries::try_acquire_lock(&conn, "acme-plugin", now, 10).unwrap());
}

#[test]
fn release_frees_the_slug() {
    let conn = test_conn();
    let now = Utc::now().timestamp();

    assert!(queries::try_acquire_lock(&conn, "acme-plugin", now, 10).unwrap());
    assert!(queries::release_lock(&conn, "acme-plugin").unwrap());
    assert!(queries::try_acquire_lock(&conn, "acme-plugin", now, 10).unwrap());
}

#[tokio::test]
async fn find_package_reads_local_archives() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    write_plugin_zip(&state.config.archive_path("acme-plugin"), "acme-plugin");

    let found = sync::find_package(&state, "acme-plugin", true)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.slug, "acme-plugin");
    assert_eq!(found.metadata.name, "Acme Plugin");
    assert!(found.file_size > 0);
}

#[tokio::test]
async fn find_package_misses_without_vcs() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    let found = sync::find_package(&state, "no-such-package", true).await.unwrap();
    assert!(found.is_none());
}

#[tokio::test]
async fn find_package_sanitizes_slugs() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    write_plugin_zip(&state.config.archive_path("acme-plugin"), "acme-plugin");

    // Characters outside the safe filename alphabet are stripped before
    // the slug touches the filesystem.
    let found = sync::find_package(&state, "acme-*plugin", true)
        .await
        .unwrap();
    assert!(found.is_some());

    let empty = sync::find_package(&state, "///", true).await.unwrap();
    assert!(empty.is_none());
}

#[tokio::test]
async fn local_archive_is_served_when_remote_is_unreachable() {
    let dir = TempDir::new().unwrap();
    let state = test_state_vcs(dir.path());

    write_plugin_zip(&state.config.archive_path("acme-plugin"), "acme-plugin");

    // The VCS host refuses connections, but a present archive must still
    // resolve without touching the remote.
    let found = sync::find_package(&state, "acme-plugin", true)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(found.slug, "acme-plugin");
    assert_eq!(found.metadata.version, "1.2.3");
}

#[tokio::test]
async fn forced_sync_clears_a_held_lock() {
    let dir = TempDir::new().unwrap();
    let state = test_state_vcs(dir.path());

    {
        let conn = state.db.get().unwrap();
        let now = Utc::now().timestamp();
        assert!(queries::try_acquire_lock(&conn, "acme-plugin", now, 600).unwrap());
    }

    // An unforced sync yields to the holder.
    let synced = sync::sync_from_remote(&state, "acme-plugin", false)
        .await
        .unwrap();
    assert!(!synced);

    // A forced sync steals the lock and proceeds to the remote, which
    // refuses connections here.
    let result = sync::sync_from_remote(&state, "acme-plugin", true).await;
    assert!(result.is_err());

    // The stolen lock came off again despite the failure.
    let conn = state.db.get().unwrap();
    let now = Utc::now().timestamp();
    assert!(queries::try_acquire_lock(&conn, "acme-plugin", now, 600).unwrap());
}

#[tokio::test]
async fn corrupt_archive_reads_as_absent() {
    let dir = TempDir::new().unwrap();
    let state = test_state(dir.path());

    let path = state.config.archive_path("broken");
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"this is not a zip file").unwrap();

    let found = sync::find_package(&state, "broken", true).await.unwrap();
    assert!(found.is_none());
}

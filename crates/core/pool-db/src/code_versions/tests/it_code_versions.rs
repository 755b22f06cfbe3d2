//! In-tree DB integration tests for the code version store

use pgtemp::PgTempDB;

use crate::{
    PoolConfig, PoolDb,
    code_versions::{FileMap, Published, version_hash_of},
};

async fn connect(temp_db: &PgTempDB) -> PoolDb {
    PoolDb::connect(temp_db.connection_uri(), &PoolConfig::default())
        .await
        .expect("Failed to connect to pool db")
}

fn file_map(entries: &[(&str, &str)]) -> FileMap {
    entries
        .iter()
        .map(|(path, contents)| (path.to_string(), contents.to_string()))
        .collect()
}

#[tokio::test]
async fn publishing_identical_content_inserts_one_row() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let files = file_map(&[("worker.py", "print('v1')"), ("lib/util.py", "x = 1")]);
    let hash = version_hash_of(&files);

    //* When
    let first = db
        .publish_code_version(&hash, &files, "host-a")
        .await
        .expect("First publish failed");
    let second = db
        .publish_code_version(&hash, &files, "host-b")
        .await
        .expect("Second publish failed");

    //* Then
    assert_eq!(first, Published::New);
    assert_eq!(second, Published::Unchanged);

    let latest = db
        .latest_code_version()
        .await
        .expect("Failed to get latest version")
        .expect("No version stored");
    assert_eq!(latest.version_hash, hash);
    assert_eq!(latest.published_by, "host-a");
}

#[tokio::test]
async fn latest_tracks_the_most_recent_publish() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let v1 = file_map(&[("worker.py", "print('v1')")]);
    let v2 = file_map(&[("worker.py", "print('v2')")]);
    let hash_v1 = version_hash_of(&v1);
    let hash_v2 = version_hash_of(&v2);
    assert_ne!(hash_v1, hash_v2);

    db.publish_code_version(&hash_v1, &v1, "host-a")
        .await
        .expect("Publish v1 failed");
    // Keep published_at strictly ordered.
    sqlx::query("UPDATE code_versions SET published_at = published_at - interval '1 minute'")
        .execute(db.pool())
        .await
        .expect("Failed to backdate v1");

    //* When
    db.publish_code_version(&hash_v2, &v2, "host-a")
        .await
        .expect("Publish v2 failed");

    //* Then
    let latest = db
        .latest_code_version()
        .await
        .expect("Failed to get latest version")
        .expect("No version stored");
    assert_eq!(latest.version_hash, hash_v2);
}

#[tokio::test]
async fn republishing_an_older_version_makes_it_latest_again() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let v1 = file_map(&[("worker.py", "print('v1')")]);
    let v2 = file_map(&[("worker.py", "print('v2')")]);
    let hash_v1 = version_hash_of(&v1);
    let hash_v2 = version_hash_of(&v2);

    db.publish_code_version(&hash_v1, &v1, "host-a")
        .await
        .expect("Publish v1 failed");
    // Keep published_at strictly ordered.
    sqlx::query("UPDATE code_versions SET published_at = published_at - interval '1 minute'")
        .execute(db.pool())
        .await
        .expect("Failed to backdate v1");
    db.publish_code_version(&hash_v2, &v2, "host-a")
        .await
        .expect("Publish v2 failed");
    sqlx::query("UPDATE code_versions SET published_at = published_at - interval '1 minute'")
        .execute(db.pool())
        .await
        .expect("Failed to backdate v2");

    //* When the publisher rolls its files back to v1
    let republished = db
        .publish_code_version(&hash_v1, &v1, "host-a")
        .await
        .expect("Republish failed");

    //* Then v1 is the latest version again and pullers stay in sync
    assert_eq!(republished, Published::New);
    let latest = db
        .latest_code_version()
        .await
        .expect("Failed to get latest version")
        .expect("No version stored");
    assert_eq!(latest.version_hash, hash_v1);
}

#[tokio::test]
async fn stored_file_map_round_trips() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    let files = file_map(&[
        ("worker.py", "import sys\nprint('hello')\n"),
        ("lib/util.py", ""),
    ]);
    let hash = version_hash_of(&files);
    db.publish_code_version(&hash, &files, "host-a")
        .await
        .expect("Publish failed");

    //* When
    let fetched = db
        .code_version_files(&hash)
        .await
        .expect("Fetch failed")
        .expect("Version not found");

    //* Then
    assert_eq!(fetched, files);

    let missing = db
        .code_version_files(&version_hash_of(&file_map(&[("other.py", "y")])))
        .await
        .expect("Fetch failed");
    assert!(missing.is_none());
}

//! Content-addressed code version store
//!
//! Workers distribute their own managed source files through the database:
//! a publisher stamps the current file set with a content hash and stores
//! the full file map as one row; pullers compare hashes and fetch the file
//! map when they drift. The version hash is the primary key and identical
//! content maps to the same row; file contents are never rewritten, only
//! the publish timestamp moves when a stored version is published again.

use std::collections::BTreeMap;

use sqlx::{
    Executor, Postgres,
    types::{
        JsonValue,
        chrono::{DateTime, Utc},
    },
};

mod version_hash;

pub use self::version_hash::{VersionHash, VersionHashConvError, version_hash_of};

/// Mapping of relative file path to full file contents.
///
/// Ordered so that hashing and serialization are deterministic.
pub type FileMap = BTreeMap<String, String>;

/// Code version metadata, without the file contents.
///
/// Pullers poll this cheaply to detect drift; the file map itself is only
/// fetched when an update is actually applied.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CodeVersionMeta {
    pub version_hash: VersionHash,
    pub published_by: String,
    pub published_at: DateTime<Utc>,
}

/// Outcome of a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    /// The published content is now the latest version
    New,
    /// The content already was the latest version, nothing was written
    Unchanged,
}

/// Store a code version row for the given hash and file map
///
/// The hash must have been computed from `files` with [`version_hash_of`].
/// Publishing the content that is already the latest version is a no-op and
/// reports [`Published::Unchanged`]. Re-publishing an *older* stored version
/// refreshes its timestamp so it becomes the latest again, letting a
/// publisher roll back without pullers fetching the unwanted newer version.
#[tracing::instrument(skip(db, files), err)]
pub async fn publish(
    db: &crate::PoolDb,
    hash: &VersionHash,
    files: &FileMap,
    published_by: &str,
) -> Result<Published, crate::Error> {
    let files = serde_json::to_value(files).map_err(crate::Error::FileMapEncoding)?;
    let mut tx = db.pool().begin().await?;

    let current = latest(&mut *tx).await?;
    if current.is_some_and(|meta| meta.version_hash == *hash) {
        return Ok(Published::Unchanged);
    }

    let query = indoc::indoc! {r#"
        INSERT INTO code_versions (version_hash, files, published_by)
        VALUES ($1, $2, $3)
        ON CONFLICT (version_hash)
        DO UPDATE SET published_by = EXCLUDED.published_by, published_at = now()
    "#};
    sqlx::query(query)
        .bind(hash)
        .bind(files)
        .bind(published_by)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Published::New)
}

/// Returns the most recently published code version, if any
#[tracing::instrument(skip(exe), err)]
pub async fn latest<'c, E>(exe: E) -> Result<Option<CodeVersionMeta>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT version_hash, published_by, published_at
        FROM code_versions
        ORDER BY published_at DESC, version_hash
        LIMIT 1
    "#};
    sqlx::query_as(query).fetch_optional(exe).await
}

/// Returns the file map stored for the given version hash
#[tracing::instrument(skip(exe), err)]
pub async fn get_files<'c, E>(
    exe: E,
    hash: &VersionHash,
) -> Result<Option<FileMap>, crate::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let query = indoc::indoc! {r#"
        SELECT files FROM code_versions WHERE version_hash = $1
    "#};
    let files: Option<JsonValue> = sqlx::query_scalar(query)
        .bind(hash)
        .fetch_optional(exe)
        .await?;

    files
        .map(|value| serde_json::from_value(value).map_err(crate::Error::FileMapEncoding))
        .transpose()
}

/// In-tree integration tests
#[cfg(test)]
mod tests {
    mod it_code_versions;
}

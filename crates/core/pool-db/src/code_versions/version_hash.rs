use sha2::{Digest as _, Sha256};

use super::FileMap;

/// Content hash identifying a code version.
///
/// Lowercase hex SHA-256, 64 characters. Produced by [`version_hash_of`];
/// parsing is validated so malformed strings never reach the database.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionHash(String);

impl VersionHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

/// Computes the version hash of a file map
///
/// The hash covers the sorted sequence of (relative path, per-file content
/// hash) pairs, so it is a pure function of the file contents: identical
/// maps always hash identically, and changing a single byte in any file
/// changes the result. Hashing path and per-file digest rather than raw
/// contents keeps the outer digest independent of file sizes.
pub fn version_hash_of(files: &FileMap) -> VersionHash {
    let mut hasher = Sha256::new();
    for (path, contents) in files {
        let file_hash = hex::encode(Sha256::digest(contents.as_bytes()));
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        hasher.update(file_hash.as_bytes());
        hasher.update([0u8]);
    }
    VersionHash(hex::encode(hasher.finalize()))
}

impl std::fmt::Display for VersionHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for VersionHash {
    type Error = VersionHashConvError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.len() != 64 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(VersionHashConvError::Malformed);
        }
        Ok(Self(value.to_ascii_lowercase()))
    }
}

impl std::str::FromStr for VersionHash {
    type Err = VersionHashConvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.to_owned().try_into()
    }
}

/// Error for conversions into [`VersionHash`].
#[derive(Debug, thiserror::Error)]
pub enum VersionHashConvError {
    #[error("version hash must be 64 hex characters")]
    Malformed,
}

impl sqlx::Type<sqlx::Postgres> for VersionHash {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::postgres::PgHasArrayType for VersionHash {
    fn array_type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::postgres::PgHasArrayType>::array_type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for VersionHash {
    fn decode(
        value: sqlx::postgres::PgValueRef<'r>,
    ) -> Result<Self, Box<dyn std::error::Error + Send + Sync + 'static>> {
        let value = <String as sqlx::Decode<'r, sqlx::Postgres>>::decode(value)?;
        Ok(value.try_into()?)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Postgres> for VersionHash {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>> {
        <String as sqlx::Encode<'q, sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

impl serde::Serialize for VersionHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for VersionHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.try_into().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_map(entries: &[(&str, &str)]) -> FileMap {
        entries
            .iter()
            .map(|(path, contents)| (path.to_string(), contents.to_string()))
            .collect()
    }

    #[test]
    fn identical_file_maps_hash_identically() {
        //* Given
        let a = file_map(&[("worker.py", "print('a')"), ("lib/util.py", "x = 1")]);
        let b = file_map(&[("lib/util.py", "x = 1"), ("worker.py", "print('a')")]);

        //* When
        let hash_a = version_hash_of(&a);
        let hash_b = version_hash_of(&b);

        //* Then
        assert_eq!(hash_a, hash_b);
    }

    #[test]
    fn single_byte_change_changes_the_hash() {
        //* Given
        let a = file_map(&[("worker.py", "print('a')")]);
        let b = file_map(&[("worker.py", "print('b')")]);

        //* When
        let hash_a = version_hash_of(&a);
        let hash_b = version_hash_of(&b);

        //* Then
        assert_ne!(hash_a, hash_b);
    }

    #[test]
    fn moving_content_between_files_changes_the_hash() {
        //* Given
        let a = file_map(&[("a.py", "x"), ("b.py", "")]);
        let b = file_map(&[("a.py", ""), ("b.py", "x")]);

        //* When
        let hash_a = version_hash_of(&a);
        let hash_b = version_hash_of(&b);

        //* Then
        assert_ne!(hash_a, hash_b);
    }

    #[test]
    fn parses_only_well_formed_hashes() {
        //* Given
        let valid = version_hash_of(&file_map(&[("a", "b")])).to_string();

        //* When
        let parsed: Result<VersionHash, _> = valid.parse();
        let too_short: Result<VersionHash, _> = "abc123".parse();
        let bad_chars: Result<VersionHash, _> = "z".repeat(64).parse();

        //* Then
        assert!(parsed.is_ok());
        assert!(too_short.is_err());
        assert!(bad_chars.is_err());
    }
}

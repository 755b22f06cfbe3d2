//! Worker identity claim tag
//!
//! The store never interprets a worker identity beyond equality and logging:
//! it is an opaque tag recorded in `claimed_by` while a job is running. The
//! worker runtime is responsible for producing a meaningful value
//! (`hostname:pid:index`); at this layer any non-empty string is accepted.

use std::borrow::Cow;

/// An owned worker identity, as returned from database reads.
pub type WorkerIdOwned = WorkerId<'static>;

/// An opaque worker identity used as a claim tag.
///
/// Copy-on-write over the underlying string so claim calls can borrow the
/// runtime's identity without allocating per batch.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId<'a>(Cow<'a, str>);

impl<'a> WorkerId<'a> {
    /// Get a reference to the inner str
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get an owned version of this identity
    pub fn to_owned(&self) -> WorkerIdOwned {
        WorkerId(Cow::Owned(self.0.to_string()))
    }

    /// Consume and return the inner String
    pub fn into_inner(self) -> String {
        self.0.into_owned()
    }
}

impl<'a> std::ops::Deref for WorkerId<'a> {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'a> AsRef<str> for WorkerId<'a> {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'a> PartialEq<&str> for WorkerId<'a> {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl<'a> PartialEq<WorkerId<'a>> for &str {
    fn eq(&self, other: &WorkerId<'a>) -> bool {
        *self == other.as_str()
    }
}

impl<'a> std::fmt::Display for WorkerId<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<'a> std::fmt::Debug for WorkerId<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl<'a> From<&'a str> for WorkerId<'a> {
    fn from(s: &'a str) -> Self {
        Self(Cow::Borrowed(s))
    }
}

impl From<String> for WorkerIdOwned {
    fn from(s: String) -> Self {
        WorkerId(Cow::Owned(s))
    }
}

impl<'a, 'b> From<&'a WorkerId<'b>> for WorkerId<'a> {
    fn from(value: &'a WorkerId<'b>) -> Self {
        Self(Cow::Borrowed(value.as_str()))
    }
}

impl sqlx::Type<sqlx::Postgres> for WorkerId<'_> {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl<'a> sqlx::Encode<'_, sqlx::Postgres> for WorkerId<'a> {
    fn encode_by_ref(
        &self,
        buf: &mut <sqlx::Postgres as sqlx::Database>::ArgumentBuffer<'_>,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <&str as sqlx::Encode<'_, sqlx::Postgres>>::encode_by_ref(&self.as_str(), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for WorkerIdOwned {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(WorkerId(Cow::Owned(s)))
    }
}

//! Worker identity.

/// A validated worker identity.
///
/// Workers tag their job claims with this identity so that late results can
/// be matched against the current claim holder. The canonical form is
/// `<hostname>:<pid>:<index>`, produced by [`WorkerId::generate`]; the index
/// distinguishes multiple worker processes on the same host.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    /// Builds the identity for this process.
    pub fn generate(index: u32) -> Self {
        let hostname = sysinfo::System::host_name().unwrap_or_else(|| "unknown-host".to_string());
        // The hostname feeds the claim tag, keep it within the valid charset.
        let hostname: String = hostname
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '_' || c == '-' || c == '.' {
                    c
                } else {
                    '-'
                }
            })
            .collect();
        WorkerId(format!("{}:{}:{}", hostname, std::process::id(), index))
    }

    /// Returns the worker ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the [`WorkerId`] and returns the inner String
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl PartialEq<str> for WorkerId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<WorkerId> for str {
    fn eq(&self, other: &WorkerId) -> bool {
        *self == other.0
    }
}

impl PartialEq<&str> for WorkerId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == **other
    }
}

impl AsRef<str> for WorkerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for WorkerId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl TryFrom<String> for WorkerId {
    type Error = InvalidIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        validate_worker_id(&value)?;
        Ok(WorkerId(value))
    }
}

impl From<WorkerId> for String {
    fn from(id: WorkerId) -> Self {
        id.0
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for WorkerId {
    type Err = InvalidIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_worker_id(s)?;
        Ok(WorkerId(s.to_string()))
    }
}

impl From<WorkerId> for pool_db::WorkerIdOwned {
    fn from(value: WorkerId) -> Self {
        value.0.into()
    }
}

impl<'a> From<&'a WorkerId> for pool_db::WorkerId<'a> {
    fn from(value: &'a WorkerId) -> Self {
        value.as_str().into()
    }
}

/// Validates that a worker ID follows the required format:
/// - Must start with a letter or digit
/// - Can only contain alphanumeric characters, underscores, hyphens, dots,
///   and colons
/// - Must not be empty
fn validate_worker_id(id: &str) -> Result<(), InvalidIdError> {
    if id.is_empty() {
        return Err(InvalidIdError {
            id: id.to_string(),
            reason: "empty string".into(),
        });
    }

    if let Some(c) = id.chars().next()
        && !c.is_alphanumeric()
    {
        return Err(InvalidIdError {
            id: id.to_string(),
            reason: "must start with a letter or digit".into(),
        });
    }

    if let Some(c) = id
        .chars()
        .find(|c| !c.is_alphanumeric() && !matches!(c, '_' | '-' | '.' | ':'))
    {
        return Err(InvalidIdError {
            id: id.to_string(),
            reason: format!("invalid character '{c}'").into(),
        });
    }

    Ok(())
}

/// Error returned when a worker ID is invalid.
#[derive(Debug, thiserror::Error)]
#[error("Invalid worker ID '{id}': {reason}")]
pub struct InvalidIdError {
    id: String,
    #[source]
    reason: Box<dyn std::error::Error + Send + Sync>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_valid() {
        //* When
        let id = WorkerId::generate(0);

        //* Then
        assert!(id.as_str().parse::<WorkerId>().is_ok());
        assert!(id.as_str().ends_with(":0"));
    }

    #[test]
    fn distinct_indexes_produce_distinct_ids() {
        assert_ne!(WorkerId::generate(0), WorkerId::generate(1));
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!("".parse::<WorkerId>().is_err());
        assert!("-leading-dash".parse::<WorkerId>().is_err());
        assert!("has space".parse::<WorkerId>().is_err());
        assert!("host:123:0".parse::<WorkerId>().is_ok());
    }
}

//! Parsing for Pulumi URNs.
//!
//! A URN has the shape
//! `urn:pulumi:<stack>::<project>::<qualified-type>::<name>` where the
//! qualified type may chain parent types with `$`
//! (e.g. `aws:s3/bucket:Bucket$aws:s3/bucketPolicy:BucketPolicy`).

use std::fmt;

use thiserror::Error;

use crate::types::PulumiToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrnError {
    #[error("URN {0:?} does not start with \"urn:pulumi:\"")]
    MissingPrefix(String),

    #[error("URN {0:?} does not have the expected stack::project::type::name segments")]
    MalformedSegments(String),
}

/// A parsed Pulumi unique resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Urn {
    raw: String,
    stack: String,
    project: String,
    qualified_type: String,
    name: String,
}

impl Urn {
    pub fn parse(raw: &str) -> Result<Self, UrnError> {
        let rest = raw
            .strip_prefix("urn:pulumi:")
            .ok_or_else(|| UrnError::MissingPrefix(raw.to_string()))?;
        // The name is everything after the third separator; it may itself
        // contain "::".
        let parts: Vec<&str> = rest.splitn(4, "::").collect();
        if parts.len() != 4 || parts.iter().any(|p| p.is_empty()) {
            return Err(UrnError::MalformedSegments(raw.to_string()));
        }
        Ok(Self {
            raw: raw.to_string(),
            stack: parts[0].to_string(),
            project: parts[1].to_string(),
            qualified_type: parts[2].to_string(),
            name: parts[3].to_string(),
        })
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// The full type chain, parents included.
    pub fn qualified_type(&self) -> &str {
        &self.qualified_type
    }

    /// The resource's own token: the last `$`-separated segment of the
    /// qualified type.
    pub fn token(&self) -> PulumiToken {
        let tok = self
            .qualified_type
            .rsplit('$')
            .next()
            .unwrap_or(&self.qualified_type);
        PulumiToken::new(tok)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Urn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

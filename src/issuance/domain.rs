use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigurationError;

/// The (sub)domain a certificate is issued for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Domain(String);

impl Domain {
    pub fn parse(raw: &str) -> Result<Self, ConfigurationError> {
        let domain = raw.trim().trim_end_matches('.').to_ascii_lowercase();

        // Also used as a directory name under cert_dir
        if domain.is_empty()
            || domain.contains(['/', '\\', ':'])
            || domain.chars().any(char::is_whitespace)
            || domain.starts_with('.')
            || domain.contains("..")
        {
            return Err(ConfigurationError::InvalidDomain(raw.to_string()));
        }

        Ok(Self(domain))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Domain {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Domain {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Domain::parse(&value)
    }
}

impl From<Domain> for String {
    fn from(domain: Domain) -> Self {
        domain.0
    }
}

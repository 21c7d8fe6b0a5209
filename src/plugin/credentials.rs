use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

type Lookup = Box<dyn Fn(&str) -> Option<String>>;

/// Source of provider secrets such as API keys. Read at the moment a feature
/// is used, never at configuration load, so a missing key only breaks the
/// feature that needs it.
pub struct Credentials {
    lookup: Lookup,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self {
            lookup: Box::new(|variable| std::env::var(variable).ok()),
        }
    }

    /// Fixed values; handy for hosts that keep secrets elsewhere.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let values: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            lookup: Box::new(move |variable| values.get(variable).cloned()),
        }
    }

    /// Returns the value, treating blank values as missing.
    pub fn require(&self, variable: &str) -> Result<String> {
        match (self.lookup)(variable) {
            Some(value) if !value.trim().is_empty() => Ok(value),
            _ => Err(Error::MissingCredential {
                variable: variable.to_string(),
            }),
        }
    }

    /// Checks every variable, failing on the first missing one.
    pub fn require_all<'a, I>(&self, variables: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a String>,
    {
        for variable in variables {
            self.require(variable)?;
        }
        Ok(())
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self::from_env()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_and_blank_values_fail() {
        let creds = Credentials::from_pairs([("OPENAI_API_KEY", "sk-test"), ("EMPTY", "  ")]);
        assert_eq!(creds.require("OPENAI_API_KEY").unwrap(), "sk-test");
        assert!(matches!(
            creds.require("EMPTY"),
            Err(Error::MissingCredential { ref variable }) if variable == "EMPTY"
        ));
        assert!(creds.require("ANTHROPIC_API_KEY").is_err());
    }

    #[test]
    fn require_all_stops_at_first_gap() {
        let creds = Credentials::from_pairs([("A", "1")]);
        let needed = vec!["A".to_string(), "B".to_string(), "C".to_string()];
        let err = creds.require_all(&needed).unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing credential: environment variable B is not set"
        );
    }

    #[test]
    fn env_lookup_reads_process_environment() {
        let creds = Credentials::from_env();
        assert!(creds.require("LAZYDECK_SURELY_UNSET_VARIABLE_93f1").is_err());
    }
}

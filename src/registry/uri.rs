// src/registry/uri.rs

//! Catalog source arguments of the form `url[?alias=ALIAS]`

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogUri {
    pub url: String,
    pub alias: Option<String>,
}

impl CatalogUri {
    /// Parse a source argument
    ///
    /// Absolute paths are turned into `file:` URLs. Anything else must carry
    /// a URL scheme. The only recognized query parameter is `alias`.
    pub fn parse(input: &str) -> Result<Self> {
        let fail = |reason: &str| Error::InvalidCatalogUri {
            uri: input.to_string(),
            reason: reason.to_string(),
        };

        let input = input.trim();
        if input.is_empty() {
            return Err(fail("empty"));
        }

        let (base, query) = match input.split_once('?') {
            Some((base, query)) => (base, Some(query)),
            None => (input, None),
        };

        let alias = match query {
            None => None,
            Some(q) => match q.split_once('=') {
                Some(("alias", value)) if !value.is_empty() => Some(value.to_string()),
                Some(("alias", _)) => return Err(fail("empty alias")),
                _ => return Err(fail("unsupported query, expected 'alias=NAME'")),
            },
        };

        let url = if base.starts_with('/') {
            format!("file:{}", base)
        } else {
            base.to_string()
        };

        let scheme = url.split_once(':').map(|(s, _)| s).unwrap_or("");
        let scheme_ok = scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !scheme_ok {
            return Err(fail("missing URL scheme"));
        }

        Ok(Self { url, alias })
    }
}

impl FromStr for CatalogUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for CatalogUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)?;
        if let Some(alias) = &self.alias {
            write!(f, "?alias={}", alias)?;
        }
        Ok(())
    }
}

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod repository;

pub use repository::{RepositoryDescriptor, RepositoryPath};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Missing {component} name in catalog entry {context}")]
    MissingName {
        component: &'static str,
        context: String,
    },
    #[error("Invalid transport `{0}`, expected `https` or `ssh`")]
    InvalidTransport(String),
}

/// The version-control system a catalog entry is stored in.
///
/// `Unsupported` keeps the raw catalog tag of a kind this crate has no backend
/// for, so that repository fails on its own instead of aborting the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum VcsKind {
    Mercurial,
    Git,
    Unsupported(i64),
}

impl VcsKind {
    pub fn from_tag(tag: i64) -> VcsKind {
        match tag {
            1 => VcsKind::Mercurial,
            2 => VcsKind::Git,
            other => VcsKind::Unsupported(other),
        }
    }
}

impl Display for VcsKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            VcsKind::Mercurial => f.write_str("hg"),
            VcsKind::Git => f.write_str("git"),
            VcsKind::Unsupported(tag) => write!(f, "vcs#{tag}"),
        }
    }
}

/// Which of the catalog's clone URLs is used for a repository.
#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub enum Transport {
    #[serde(rename = "https")]
    #[default]
    Https,
    #[serde(rename = "ssh")]
    Ssh,
}

impl FromStr for Transport {
    type Err = ParseError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.to_ascii_lowercase();
        match value.as_str() {
            "https" => Ok(Transport::Https),
            "ssh" => Ok(Transport::Ssh),
            _ => Err(ParseError::InvalidTransport(value)),
        }
    }
}

impl Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Transport::Https => f.write_str("https"),
            Transport::Ssh => f.write_str("ssh"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn vcs_tags() {
        assert_eq!(VcsKind::from_tag(1), VcsKind::Mercurial);
        assert_eq!(VcsKind::from_tag(2), VcsKind::Git);
        assert_eq!(VcsKind::from_tag(7), VcsKind::Unsupported(7));
        assert_eq!(VcsKind::Unsupported(7).to_string(), "vcs#7");
    }

    #[test]
    fn parse_transport() {
        assert_eq!(Transport::from_str("SSH").unwrap(), Transport::Ssh);
        assert_eq!(Transport::from_str("https").unwrap(), Transport::Https);
        assert_eq!(Transport::Ssh.to_string(), "ssh");
        assert!(matches!(
            Transport::from_str("ftp"),
            Err(ParseError::InvalidTransport(value)) if value == "ftp"
        ));
    }
}

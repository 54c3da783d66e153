//! Connection URL parsing.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const SCHEME: &str = "sqlite:";
const MEMORY: &str = ":memory:";

/// Errors produced while parsing a connection URL.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    /// The URL was empty or whitespace.
    #[error("database url is empty")]
    Empty,

    /// The URL names a scheme other than `sqlite`.
    #[error("unsupported database url scheme: {0}")]
    UnsupportedScheme(String),
}

/// A parsed SQLite connection URL.
///
/// Accepts `sqlite://<path>`, `sqlite:<path>`, `sqlite::memory:`, `:memory:`
/// or a bare filesystem path. Query strings (`?mode=rwc`) are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseUrl {
    /// An in-memory database. A pool built from it shares one database
    /// across its connections.
    Memory,
    /// A database file on disk.
    File(PathBuf),
}

impl DatabaseUrl {
    /// Builds a file URL.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    /// The filesystem path, if this is a file URL.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Memory => None,
            Self::File(path) => Some(path),
        }
    }
}

impl FromStr for DatabaseUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(UrlError::Empty);
        }

        let rest = match s.strip_prefix(SCHEME) {
            Some(rest) => rest.strip_prefix("//").unwrap_or(rest),
            None => {
                if let Some((scheme, _)) = s.split_once("://") {
                    return Err(UrlError::UnsupportedScheme(scheme.to_string()));
                }
                s
            }
        };

        let rest = rest.split_once('?').map_or(rest, |(path, _)| path);
        if rest.is_empty() {
            return Err(UrlError::Empty);
        }
        if rest == MEMORY {
            return Ok(Self::Memory);
        }

        Ok(Self::File(PathBuf::from(rest)))
    }
}

impl fmt::Display for DatabaseUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => write!(f, "{SCHEME}{MEMORY}"),
            Self::File(path) => write!(f, "{SCHEME}//{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_accepted_forms() {
        assert_eq!(
            "sqlite:///tmp/kiln/app.db".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::file("/tmp/kiln/app.db")
        );
        assert_eq!(
            "sqlite:data/app.db".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::file("data/app.db")
        );
        assert_eq!(
            "sqlite::memory:".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::Memory
        );
        assert_eq!(":memory:".parse::<DatabaseUrl>().unwrap(), DatabaseUrl::Memory);
        assert_eq!(
            "kiln.db".parse::<DatabaseUrl>().unwrap(),
            DatabaseUrl::file("kiln.db")
        );
    }

    #[test]
    fn strips_query_string() {
        let url: DatabaseUrl = "sqlite:///tmp/app.db?mode=rwc".parse().unwrap();
        assert_eq!(url.path(), Some(Path::new("/tmp/app.db")));
    }

    #[test]
    fn rejects_empty_and_foreign_schemes() {
        assert_eq!("  ".parse::<DatabaseUrl>(), Err(UrlError::Empty));
        assert_eq!("sqlite://".parse::<DatabaseUrl>(), Err(UrlError::Empty));
        assert_eq!(
            "postgres://localhost/app".parse::<DatabaseUrl>(),
            Err(UrlError::UnsupportedScheme("postgres".to_string()))
        );
    }

    #[test]
    fn display_round_trips_through_parse() {
        let url = DatabaseUrl::file("/var/lib/kiln/app.db");
        assert_eq!(url.to_string(), "sqlite:///var/lib/kiln/app.db");
        assert_eq!(url.to_string().parse::<DatabaseUrl>().unwrap(), url);
        assert_eq!(DatabaseUrl::Memory.to_string(), "sqlite::memory:");
    }
}

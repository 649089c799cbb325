//! Database URIs of the form `scheme://hostname/databaseName[?options]`.

use crate::error::DbError;

/// Database name used when none is configured.
pub const DEFAULT_DATABASE: &str = "test";

/// Hostname used when none is configured.
pub const DEFAULT_HOSTNAME: &str = "127.0.0.1";

/// Scheme used when none is configured.
pub const DEFAULT_SCHEME: &str = "postgres";

/// A parsed `scheme://hostname/databaseName` URI.
///
/// `hostname` may carry a `:port` suffix; it is passed to the driver
/// untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseUri {
    /// Backend scheme (`postgres`, `postgresql`, `memory`).
    pub scheme: String,
    /// Host (optionally `host:port`).
    pub hostname: String,
    /// Database name.
    pub database: String,
    /// Driver options (`sslmode=require&...`) passed through verbatim.
    pub query: Option<String>,
}

impl DatabaseUri {
    /// Build a URI, filling in defaults for missing or empty pieces.
    pub fn build(scheme: Option<&str>, hostname: Option<&str>, database: Option<&str>) -> Self {
        fn or_default(value: Option<&str>, default: &str) -> String {
            value
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_owned()
        }

        Self {
            scheme: or_default(scheme, DEFAULT_SCHEME),
            hostname: or_default(hostname, DEFAULT_HOSTNAME),
            database: or_default(database, DEFAULT_DATABASE),
            query: None,
        }
    }

    /// Parse `scheme://hostname[/databaseName][?options]`.
    ///
    /// Credentials (`user:pass@`) are rejected: they belong in the connect
    /// options, not in the URI. The query string is kept for the driver.
    pub fn parse(uri: &str) -> Result<Self, DbError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| DbError::InvalidUri(format!("missing scheme in {uri:?}")))?;
        if scheme.is_empty() {
            return Err(DbError::InvalidUri(format!("empty scheme in {uri:?}")));
        }
        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query).filter(|q| !q.is_empty())),
            None => (rest, None),
        };
        if rest.contains('@') {
            return Err(DbError::InvalidUri(format!(
                "credentials are not allowed in {uri:?}"
            )));
        }

        let (hostname, database) = match rest.split_once('/') {
            Some((host, db)) => (host, Some(db.trim_end_matches('/'))),
            None => (rest, None),
        };

        let mut parsed = Self::build(Some(scheme), Some(hostname), database);
        parsed.query = query.map(str::to_owned);
        Ok(parsed)
    }
}

impl core::fmt::Display for DatabaseUri {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.hostname, self.database)?;
        match &self.query {
            Some(query) => write!(f, "?{query}"),
            None => Ok(()),
        }
    }
}

impl Default for DatabaseUri {
    fn default() -> Self {
        Self::build(None, None, None)
    }
}

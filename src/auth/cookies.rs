//! Netscape cookie-jar parser and reqwest jar loader.
//!
//! Parses the browser-exportable Netscape cookie format (TAB-separated
//! `domain, flag, path, secure, expiry, name, value`) and loads the result
//! into a `reqwest::cookie::Jar` for the browsing session.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use reqwest::cookie::Jar;
use tracing::{debug, instrument, warn};

/// Number of TAB-separated fields in a Netscape cookie line.
const FIELD_COUNT: usize = 7;

/// A single parsed cookie.
///
/// The value is redacted in `Debug` output so cookies can be logged safely.
#[derive(Clone, PartialEq, Eq)]
pub struct CookieLine {
    /// Domain the cookie belongs to (e.g. `.example.com`).
    pub domain: String,
    /// Whether subdomains match.
    pub tailmatch: bool,
    /// URL path scope.
    pub path: String,
    /// Only send over HTTPS.
    pub secure: bool,
    /// Unix expiry timestamp; `None` for a session-only cookie.
    pub expires: Option<u64>,
    pub name: String,
    value: String,
}

impl CookieLine {
    /// Creates a new cookie entry.
    #[must_use]
    pub fn new(
        domain: String,
        tailmatch: bool,
        path: String,
        secure: bool,
        expires: Option<u64>,
        name: String,
        value: String,
    ) -> Self {
        Self {
            domain,
            tailmatch,
            path,
            secure,
            expires,
            name,
            value,
        }
    }

    /// Returns the cookie value. Never log the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for CookieLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieLine")
            .field("domain", &self.domain)
            .field("tailmatch", &self.tailmatch)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("expires", &self.expires)
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Errors that can occur while reading a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum CookieError {
    /// A line could not be parsed. Collected as a warning, never fatal.
    #[error("line {line_number}: {reason}")]
    InvalidLine {
        /// 1-based line number in the cookie file.
        line_number: usize,
        /// What was wrong.
        reason: String,
    },

    /// I/O error reading the cookie file.
    #[error("failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),
}

/// Cookies parsed from a file, plus warnings for skipped lines.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub cookies: Vec<CookieLine>,
    /// Line number and reason for every malformed line that was skipped.
    pub warnings: Vec<(usize, String)>,
}

/// Reads and parses a Netscape cookie file from disk.
///
/// # Errors
///
/// Returns [`CookieError::Io`] if the file cannot be opened or read.
#[instrument(level = "debug", fields(path = %path.display()))]
pub fn load_cookie_file(path: &Path) -> Result<ParseResult, CookieError> {
    let file = File::open(path)?;
    parse_netscape_cookies(BufReader::new(file))
}

/// Parses Netscape-format cookies from a buffered reader.
///
/// Blank lines and lines starting with `#` are skipped. Lines with fewer
/// than seven TAB-separated fields, or with a non-numeric expiry, are
/// skipped with a warning; the rest of the file still parses. Extra fields
/// past the seventh are ignored. An expiry of `0` (or empty) marks a
/// session cookie.
///
/// # Errors
///
/// Returns [`CookieError::Io`] on read failure only.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(reader: impl BufRead) -> Result<ParseResult, CookieError> {
    let mut result = ParseResult::default();

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_cookie_line(line, line_number) {
            Ok(cookie) => {
                debug!(
                    line = line_number,
                    domain = %cookie.domain,
                    name = %cookie.name,
                    "parsed cookie"
                );
                result.cookies.push(cookie);
            }
            Err(e) => {
                warn!(line = line_number, reason = %e, "skipping malformed cookie line");
                result.warnings.push((line_number, e.to_string()));
            }
        }
    }

    Ok(result)
}

fn parse_cookie_line(line: &str, line_number: usize) -> Result<CookieLine, CookieError> {
    let fields: Vec<&str> = line.split('\t').collect();

    if fields.len() < FIELD_COUNT {
        return Err(CookieError::InvalidLine {
            line_number,
            reason: format!("expected {FIELD_COUNT} TAB-separated fields, found {}", fields.len()),
        });
    }

    let expires = match fields[4].trim() {
        "" | "0" => None,
        raw => Some(raw.parse::<u64>().map_err(|_| CookieError::InvalidLine {
            line_number,
            reason: format!("expiry must be a non-negative integer, got '{raw}'"),
        })?),
    };

    if fields[5].is_empty() {
        return Err(CookieError::InvalidLine {
            line_number,
            reason: "cookie name field is empty".to_string(),
        });
    }

    Ok(CookieLine::new(
        fields[0].to_string(),
        parse_flag(fields[1]),
        fields[2].to_string(),
        parse_flag(fields[3]),
        expires,
        fields[5].to_string(),
        fields[6].to_string(),
    ))
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("TRUE")
}

/// Loads parsed cookies into a `reqwest::cookie::Jar`.
///
/// Each cookie is added as a `Set-Cookie` string against an origin URL
/// built from its domain, scheme and path.
#[instrument(level = "debug", skip(cookies), fields(count = cookies.len()))]
pub fn load_cookies_into_jar(cookies: &[CookieLine]) -> Arc<Jar> {
    let jar = Arc::new(Jar::default());

    for cookie in cookies {
        let set_cookie = build_set_cookie_string(cookie);
        match build_origin_url(cookie).parse::<url::Url>() {
            Ok(url) => jar.add_cookie_str(&set_cookie, &url),
            Err(_) => warn!(
                domain = %cookie.domain,
                name = %cookie.name,
                "skipping cookie with unparseable domain"
            ),
        }
    }

    jar
}

fn build_set_cookie_string(cookie: &CookieLine) -> String {
    let mut parts = vec![
        format!("{}={}", cookie.name, cookie.value()),
        format!("Domain={}", cookie.domain),
        format!("Path={}", cookie.path),
    ];

    if cookie.secure {
        parts.push("Secure".to_string());
    }

    if let Some(expires) = cookie.expires {
        if let Some(expires_str) = unix_to_http_date(expires) {
            parts.push(format!("Expires={expires_str}"));
        } else {
            warn!(
                domain = %cookie.domain,
                name = %cookie.name,
                expires,
                "cookie expiry overflows SystemTime; treating as session cookie"
            );
        }
    }

    parts.join("; ")
}

/// Uses `https://` for secure cookies and strips the leading dot of the domain.
fn build_origin_url(cookie: &CookieLine) -> String {
    let scheme = if cookie.secure { "https" } else { "http" };
    let domain = cookie.domain.strip_prefix('.').unwrap_or(&cookie.domain);
    format!("{scheme}://{domain}{}", cookie.path)
}

fn unix_to_http_date(timestamp: u64) -> Option<String> {
    use std::time::{Duration, UNIX_EPOCH};

    let time = UNIX_EPOCH.checked_add(Duration::from_secs(timestamp))?;
    Some(httpdate::fmt_http_date(time))
}

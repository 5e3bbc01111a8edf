//! Host and operator identity.
//!
//! The gate binds licenses to a host name and records who toggled the panic
//! override. Both come from the environment, never from request input.

use reqwest::Url;
use std::env;

/// Machine hostname, or `"unknown"` when the OS does not report one.
pub fn machine_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Operating-system user running the current process.
pub fn current_actor() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Host component of an absolute URL, spelled as written in `url`.
///
/// The URL parser lowercases hosts; domain binding is case-sensitive, so the
/// original spelling is recovered from the input. Trailing slashes are
/// ignored; relative or unparseable URLs yield `None`.
pub fn url_host(url: &str) -> Option<String> {
    let url = url.trim().trim_end_matches('/');
    if url.is_empty() {
        return None;
    }
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str().filter(|h| !h.is_empty())?;

    let authority_start = url.find("://").map_or(0, |i| i + 3);
    let written = url.get(authority_start..).and_then(|rest| {
        let at = rest.to_ascii_lowercase().find(host)?;
        rest.get(at..at + host.len())
    });
    Some(written.unwrap_or(host).to_string())
}

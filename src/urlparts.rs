//! Destination URL parsing and classification.
//!
//! Splits `scheme://[user@]host[:port][/path][?query][#fragment]`, grounded
//! on `xrsr_utils.c::xrsr_url_parse`. Defaults the port from the scheme
//! (`80` for `ws`/`http`/`sdt`, `443` for `wss`/`https`) exactly as the
//! original does, and — like the original — treats "has a `?` with nothing
//! after it" as `has_query` but not `has_param`.

use crate::model::Protocol;
use std::fmt;
use std::net::IpAddr;

/// Address family a host string resolves to, used only for classification —
/// this crate does not perform DNS resolution itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
    /// Host is a name, not a literal address (family determined at connect time).
    Unresolved,
}

/// The parsed pieces of a destination URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    pub protocol: Protocol,
    pub user: Option<String>,
    pub host: String,
    pub port: u16,
    /// Path including the leading `/`; empty string if the URL had none.
    pub path: String,
    pub has_query: bool,
    /// `has_query` is true but there was nothing after the `?`.
    pub has_param: bool,
    pub has_fragment: bool,
}

impl UrlParts {
    /// Parse a destination URL. Returns `None` on an unrecognized scheme or
    /// an out-of-range port, matching the original's `false` return paths.
    pub fn parse(url: &str) -> Option<Self> {
        let (scheme, rest) = url.split_once("://")?;
        let protocol = Protocol::from_scheme(scheme)?;
        let default_port = match protocol {
            Protocol::Wss | Protocol::Https => 443,
            Protocol::Ws | Protocol::Http | Protocol::Sdt => 80,
        };

        let path_start = rest.find('/').unwrap_or(rest.len());
        let (user_host_port, path) = rest.split_at(path_start);

        let has_query = url.contains('?');
        let has_param = has_query && !url.ends_with('?');
        let has_fragment = url.contains('#');

        let (user, host_port) = match user_host_port.split_once('@') {
            Some((u, hp)) => (Some(u.to_string()), hp),
            None => (None, user_host_port),
        };

        let (host, port) = match host_port.rsplit_once(':') {
            // IPv6 literals like `[::1]` contain `:` themselves; only treat
            // the split as a port separator if what follows is all digits.
            Some((h, p)) if !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()) => {
                let port: u32 = p.parse().ok()?;
                if port > u16::MAX as u32 {
                    return None;
                }
                (h.to_string(), port as u16)
            }
            _ => (host_port.to_string(), default_port),
        };

        if host.is_empty() {
            return None;
        }

        Some(Self {
            protocol,
            user,
            host,
            port,
            path: path.to_string(),
            has_query,
            has_param,
            has_fragment,
        })
    }

    /// Classify the host as an IPv4/IPv6 literal, or `Unresolved` for a name.
    pub fn address_family(&self) -> AddressFamily {
        let bare = self.host.trim_start_matches('[').trim_end_matches(']');
        match bare.parse::<IpAddr>() {
            Ok(IpAddr::V4(_)) => AddressFamily::Ipv4,
            Ok(IpAddr::V6(_)) => AddressFamily::Ipv6,
            Err(_) => AddressFamily::Unresolved,
        }
    }

    /// Whether the default port for this URL's protocol was used (no explicit
    /// `:port` in the original string). Re-derived rather than stored, since
    /// we don't keep the raw string around.
    fn port_is_default(&self) -> bool {
        let default_port = match self.protocol {
            Protocol::Wss | Protocol::Https => 443,
            Protocol::Ws | Protocol::Http | Protocol::Sdt => 80,
        };
        self.port == default_port
    }
}

impl fmt::Display for UrlParts {
    /// Reconstructs `scheme://[user@]host[:port]<path>` — the round-trip
    /// target from spec.md §8 ("reconstructing ... yields a string parsed to
    /// an equivalent structure").
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.protocol.to_string().to_lowercase())?;
        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }
        f.write_str(&self.host)?;
        if !self.port_is_default() {
            write!(f, ":{}", self.port)?;
        }
        f.write_str(&self.path)
    }
}

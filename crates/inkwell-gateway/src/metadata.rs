//! Translation between HTTP headers and call metadata.

use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, HOST, TRAILER};
use inkwell_core::Metadata;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Prefix of inbound headers forwarded as metadata, and of outbound metadata headers
pub const METADATA_HEADER_PREFIX: &str = "Grpc-Metadata-";

/// Prefix of outbound trailer headers
pub const METADATA_TRAILER_PREFIX: &str = "Grpc-Trailer-";

/// Prefix given to permanent HTTP headers forwarded as metadata
pub const METADATA_PREFIX: &str = "grpcgateway-";

/// Call timeout header
pub const TIMEOUT_HEADER: &str = "grpc-timeout";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";

const MAX_TIMEOUT_DIGITS: usize = 8;

const PERMANENT_HEADERS: &[&str] = &[
    "accept",
    "accept-charset",
    "accept-language",
    "accept-ranges",
    "cache-control",
    "content-type",
    "cookie",
    "date",
    "expect",
    "from",
    "host",
    "if-match",
    "if-modified-since",
    "if-none-match",
    "if-schedule-tag-match",
    "if-unmodified-since",
    "max-forwards",
    "origin",
    "pragma",
    "referer",
    "user-agent",
    "via",
    "warning",
];

/// Maps a header or metadata key to its translated name, or `None` to drop it
pub type HeaderMatcher = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Malformed `Grpc-Timeout` header
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid grpc-timeout value: {0:?}")]
pub struct InvalidTimeout(pub String);

/// Default inbound rule
///
/// `Grpc-Metadata-<Key>` becomes `<key>`, permanent HTTP headers become
/// `grpcgateway-<name>`; everything else is dropped.
pub fn default_incoming_matcher(name: &str) -> Option<String> {
    let name = name.to_ascii_lowercase();
    if let Some(key) = name.strip_prefix(&METADATA_HEADER_PREFIX.to_ascii_lowercase()) {
        return (!key.is_empty()).then(|| key.to_string());
    }
    if PERMANENT_HEADERS.contains(&name.as_str()) {
        return Some(format!("{}{}", METADATA_PREFIX, name));
    }
    None
}

pub fn default_outgoing_header_matcher(key: &str) -> Option<String> {
    Some(format!("{}{}", METADATA_HEADER_PREFIX, key))
}

pub fn default_outgoing_trailer_matcher(key: &str) -> Option<String> {
    Some(format!("{}{}", METADATA_TRAILER_PREFIX, key))
}

/// Parse a timeout such as `10m` (ten milliseconds) or `2S`
///
/// Units: `H` hours, `M` minutes, `S` seconds, `m` milliseconds,
/// `u` microseconds, `n` nanoseconds.
pub fn parse_timeout(value: &str) -> Result<Duration, InvalidTimeout> {
    let invalid = || InvalidTimeout(value.to_string());

    let unit = value.chars().last().ok_or_else(invalid)?;
    let digits = &value[..value.len() - unit.len_utf8()];
    if digits.is_empty() || digits.len() > MAX_TIMEOUT_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    let timeout = match unit {
        'H' => Duration::from_secs(amount * 3600),
        'M' => Duration::from_secs(amount * 60),
        'S' => Duration::from_secs(amount),
        'm' => Duration::from_millis(amount),
        'u' => Duration::from_micros(amount),
        'n' => Duration::from_nanos(amount),
        _ => return Err(invalid()),
    };
    Ok(timeout)
}

/// Stateless translator between HTTP headers and call metadata
#[derive(Clone)]
pub struct MetadataMapper {
    incoming: HeaderMatcher,
    outgoing_header: HeaderMatcher,
    outgoing_trailer: HeaderMatcher,
}

impl MetadataMapper {
    pub fn new(incoming: HeaderMatcher, outgoing_header: HeaderMatcher, outgoing_trailer: HeaderMatcher) -> Self {
        Self {
            incoming,
            outgoing_header,
            outgoing_trailer,
        }
    }

    /// Build call metadata and the call timeout from request headers
    pub fn inbound(
        &self,
        headers: &HeaderMap,
        peer: Option<SocketAddr>,
    ) -> Result<(Metadata, Option<Duration>), InvalidTimeout> {
        let mut metadata = Metadata::new();
        let mut timeout = None;

        for (name, value) in headers {
            let Ok(value) = value.to_str() else {
                debug!(header = %name, "Skipping non-text header");
                continue;
            };
            if name.as_str() == TIMEOUT_HEADER {
                timeout = Some(parse_timeout(value)?);
                continue;
            }
            if *name == AUTHORIZATION {
                metadata.append("authorization", value);
                continue;
            }
            if let Some(key) = (self.incoming)(name.as_str()) {
                metadata.append(key, value);
            }
        }

        if let Some(host) = headers.get(HOST).and_then(|h| h.to_str().ok()) {
            metadata.insert(X_FORWARDED_HOST, host);
        }
        if let Some(peer) = peer {
            let ip = peer.ip().to_string();
            let forwarded = match headers.get(X_FORWARDED_FOR).and_then(|h| h.to_str().ok()) {
                Some(existing) if !existing.is_empty() => format!("{}, {}", existing, ip),
                _ => ip,
            };
            metadata.insert(X_FORWARDED_FOR, forwarded);
        }

        Ok((metadata, timeout))
    }

    /// Render response metadata as headers
    pub fn outbound_headers(&self, metadata: &Metadata, headers: &mut HeaderMap) {
        render(metadata, &self.outgoing_header, headers);
    }

    /// Render response trailer metadata as a trailer map
    pub fn outbound_trailers(&self, trailer: &Metadata) -> HeaderMap {
        let mut trailers = HeaderMap::new();
        render(trailer, &self.outgoing_trailer, &mut trailers);
        trailers
    }

    /// Announce trailer names in the `Trailer` response header
    pub fn declare_trailers(&self, trailer: &Metadata, headers: &mut HeaderMap) {
        for (key, _) in trailer.iter() {
            let Some(name) = (self.outgoing_trailer)(key) else {
                continue;
            };
            if let Ok(value) = HeaderValue::from_str(&name) {
                headers.append(TRAILER, value);
            }
        }
    }
}

impl Default for MetadataMapper {
    fn default() -> Self {
        Self::new(
            Arc::new(default_incoming_matcher),
            Arc::new(default_outgoing_header_matcher),
            Arc::new(default_outgoing_trailer_matcher),
        )
    }
}

impl fmt::Debug for MetadataMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataMapper").finish_non_exhaustive()
    }
}

fn render(metadata: &Metadata, matcher: &HeaderMatcher, headers: &mut HeaderMap) {
    for (key, values) in metadata.iter() {
        let Some(name) = matcher(key) else {
            continue;
        };
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            debug!(key = %key, "Skipping metadata key that is not a valid header name");
            continue;
        };
        for value in values {
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.append(name.clone(), value);
                }
                Err(_) => debug!(key = %key, "Skipping metadata value that is not a valid header value"),
            }
        }
    }
}

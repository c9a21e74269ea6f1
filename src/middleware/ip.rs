//! Client identity resolution.
//!
//! The rate limiter keys its table by client IP, so the identity has to be
//! the real origin of the request rather than the address of a reverse
//! proxy in front of the gateway.
//!
//! # Resolution Order
//!
//! With `trust_proxy` enabled and the socket peer allowed to forward:
//!
//! 1. First address in `X-Forwarded-For`
//! 2. `X-Real-IP`
//! 3. Socket peer address (`ConnectInfo<SocketAddr>`)
//! 4. [`UNKNOWN_IP`]
//!
//! With `trust_proxy` disabled, forwarding headers are ignored entirely and
//! only steps 3 and 4 apply.
//!
//! # IP Spoofing
//!
//! Forwarding headers are client-controlled. When the gateway is reachable
//! directly, configure `TRUSTED_PROXIES` so that only your proxies' networks
//! may set them; requests from any other peer fall back to the peer address.

use std::borrow::Cow;
use std::net::{IpAddr, SocketAddr};

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, warn};

/// Identity shared by all requests whose origin cannot be determined.
pub const UNKNOWN_IP: &str = "unknown";

/// Resolved client identity, stored in request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

/// Parsed CIDR network range.
#[derive(Debug, Clone)]
pub struct CidrRange {
    network: IpAddr,
    prefix_len: u8,
}

impl CidrRange {
    /// Parse `"10.0.0.0/8"`, `"::1/128"` or a bare address (full-length prefix).
    pub fn parse(cidr: &str) -> Option<Self> {
        let (addr, prefix) = match cidr.trim().split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (cidr.trim(), None),
        };

        let network: IpAddr = addr.parse().ok()?;
        let max_prefix = match network {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };

        let prefix_len = match prefix {
            Some(p) => p.parse().ok().filter(|len| *len <= max_prefix)?,
            None => max_prefix,
        };

        Some(Self {
            network,
            prefix_len,
        })
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (&self.network, ip) {
            (IpAddr::V4(net), IpAddr::V4(addr)) => {
                let mask = u32::MAX
                    .checked_shl(32 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u32::from(*net) & mask) == (u32::from(*addr) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(addr)) => {
                let mask = u128::MAX
                    .checked_shl(128 - u32::from(self.prefix_len))
                    .unwrap_or(0);
                (u128::from(*net) & mask) == (u128::from(*addr) & mask)
            }
            _ => false,
        }
    }
}

/// Reverse-proxy trust policy for identity resolution.
#[derive(Debug, Clone, Default)]
pub struct ProxyTrust {
    trust_proxy: bool,
    /// Set when a proxy list was configured, even if no entry parsed.
    restricted: bool,
    ranges: Vec<CidrRange>,
}

impl ProxyTrust {
    /// Invalid CIDR strings are logged and skipped. A list with no valid
    /// entry trusts no peer.
    pub fn new(trust_proxy: bool, trusted_proxies: &[String]) -> Self {
        let ranges: Vec<CidrRange> = trusted_proxies
            .iter()
            .filter_map(|cidr| {
                let parsed = CidrRange::parse(cidr);
                if parsed.is_none() {
                    warn!(cidr = %cidr, "Invalid CIDR range in TRUSTED_PROXIES, skipping");
                }
                parsed
            })
            .collect();

        Self {
            trust_proxy,
            restricted: !trusted_proxies.is_empty(),
            ranges,
        }
    }

    /// Ignore forwarding headers; identify clients by socket peer only.
    pub fn peer_only() -> Self {
        Self::default()
    }

    pub fn trusts_proxy(&self) -> bool {
        self.trust_proxy
    }

    /// Whether forwarding headers sent by `peer` are honored.
    pub fn honors_headers_from(&self, peer: Option<IpAddr>) -> bool {
        if !self.trust_proxy {
            return false;
        }
        if !self.restricted {
            return true;
        }
        peer.is_some_and(|ip| self.ranges.iter().any(|range| range.contains(&ip)))
    }
}

/// Where a forwarded address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Forwarded<'a> {
    Xff(&'a str),
    RealIp(&'a str),
}

fn forwarded_ip<B>(req: &Request<B>) -> Option<Forwarded<'_>> {
    // "client, proxy1, proxy2" - the first entry is the origin
    if let Some(value) = req.headers().get("x-forwarded-for")
        && let Ok(value) = value.to_str()
        && let Some(first) = value.split(',').next().map(str::trim)
        && !first.is_empty()
    {
        return Some(Forwarded::Xff(first));
    }

    if let Some(value) = req.headers().get("x-real-ip")
        && let Ok(value) = value.to_str()
        && !value.trim().is_empty()
    {
        return Some(Forwarded::RealIp(value.trim()));
    }

    None
}

fn peer_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Resolve the client identity for a request under `trust`.
///
/// Returns a borrowed [`UNKNOWN_IP`] when nothing identifies the client.
pub fn resolve_client_ip<B>(req: &Request<B>, trust: &ProxyTrust) -> Cow<'static, str> {
    let peer = peer_ip(req);

    if trust.honors_headers_from(peer) {
        match forwarded_ip(req) {
            Some(Forwarded::Xff(ip)) => return Cow::Owned(ip.to_string()),
            Some(Forwarded::RealIp(ip)) => return Cow::Owned(ip.to_string()),
            None => {}
        }
    } else if trust.trusts_proxy() && forwarded_ip(req).is_some() {
        debug!(
            peer = ?peer,
            "Ignoring forwarding headers from peer outside TRUSTED_PROXIES"
        );
    }

    match peer {
        Some(ip) => Cow::Owned(ip.to_string()),
        None => Cow::Borrowed(UNKNOWN_IP),
    }
}

/// Middleware storing the resolved [`ClientIp`] for later stages.
pub async fn identify_client(
    State(trust): State<ProxyTrust>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let client_ip = resolve_client_ip(&request, &trust).into_owned();
    request.extensions_mut().insert(ClientIp(client_ip));
    next.run(request).await
}

//! Client identity extraction.

use crate::domain::key::ClientId;
use axum::extract::{ConnectInfo, Request};
use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use thiserror::Error;

/// Where the client address is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientIpSource {
    /// The TCP peer address (`ConnectInfo<SocketAddr>`)
    #[default]
    ConnectInfo,
    /// The first entry of `X-Forwarded-For`, then `X-Real-IP`, then the
    /// peer address. Only for services behind a trusted proxy.
    XForwardedFor,
}

impl ClientIpSource {
    /// `XForwardedFor` when the service trusts its proxy.
    pub fn from_trust_proxy(trust_proxy: bool) -> Self {
        if trust_proxy {
            ClientIpSource::XForwardedFor
        } else {
            ClientIpSource::ConnectInfo
        }
    }

    /// Identify the client that sent `req`.
    ///
    /// Falls back to [`ClientId::unknown`] when no address is available,
    /// which puts every such request in one shared budget.
    pub fn client_id(&self, req: &Request) -> ClientId {
        let peer = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        match self {
            ClientIpSource::ConnectInfo => peer.map(ClientId::from_ip).unwrap_or_else(ClientId::unknown),
            ClientIpSource::XForwardedFor => forwarded_ip(req.headers())
                .or(peer)
                .map(ClientId::from_ip)
                .unwrap_or_else(ClientId::unknown),
        }
    }
}

/// Error returned when parsing an unknown client address source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown client ip source: {0} (expected `connect-info` or `x-forwarded-for`)")]
pub struct UnknownClientIpSource(pub String);

impl FromStr for ClientIpSource {
    type Err = UnknownClientIpSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connect-info" | "peer" => Ok(ClientIpSource::ConnectInfo),
            "x-forwarded-for" | "forwarded" => Ok(ClientIpSource::XForwardedFor),
            other => Err(UnknownClientIpSource(other.to_string())),
        }
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    // "client, proxy1, proxy2": the first entry is the original client
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .and_then(parse_ip);

    forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|value| value.to_str().ok())
            .and_then(parse_ip)
    })
}

fn parse_ip(raw: &str) -> Option<IpAddr> {
    let raw = raw.trim().trim_start_matches('[').trim_end_matches(']');
    raw.parse::<IpAddr>().ok()
}

//! Client identity and store keys.
//!
//! Budgets are keyed by `(tier, client)`. The client identity is normally the
//! source address of the request; it is normalized so that the same peer
//! always maps to the same key.

use crate::domain::tier::Tier;
use std::fmt;
use std::net::IpAddr;

/// Normalized client identity.
///
/// IP addresses are canonicalized: brackets are stripped and IPv4-mapped
/// IPv6 addresses collapse to their IPv4 form. Anything else is kept
/// verbatim (trimmed).
///
/// # Example
/// ```
/// use admission_relay::ClientId;
///
/// assert_eq!(ClientId::new("[::ffff:10.0.0.1]").as_str(), "10.0.0.1");
/// assert_eq!(ClientId::new(" 10.0.0.1 ").as_str(), "10.0.0.1");
/// assert_eq!(ClientId::new("").as_str(), "unknown");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(String);

impl ClientId {
    const UNKNOWN: &'static str = "unknown";

    /// Build a client identity from a raw string.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let trimmed = raw.as_ref().trim();
        let unbracketed = trimmed.trim_start_matches('[').trim_end_matches(']');

        if unbracketed.is_empty() {
            return Self::unknown();
        }

        match unbracketed.parse::<IpAddr>() {
            Ok(ip) => Self::from_ip(ip),
            Err(_) => ClientId(unbracketed.to_string()),
        }
    }

    /// Build a client identity from an address.
    pub fn from_ip(ip: IpAddr) -> Self {
        ClientId(ip.to_canonical().to_string())
    }

    /// Identity used when the peer cannot be determined.
    ///
    /// All such requests share one budget.
    pub fn unknown() -> Self {
        ClientId(Self::UNKNOWN.to_string())
    }

    /// The normalized identity.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<IpAddr> for ClientId {
    fn from(ip: IpAddr) -> Self {
        Self::from_ip(ip)
    }
}

/// Key of one budget in the counting store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BudgetKey {
    tier: Tier,
    client: ClientId,
}

impl BudgetKey {
    /// Create a key.
    pub fn new(tier: Tier, client: ClientId) -> Self {
        Self { tier, client }
    }

    /// The tier component.
    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// The client component.
    pub fn client(&self) -> &ClientId {
        &self.client
    }

    /// Render as a store key: `{prefix}{tier}:{client}`.
    pub fn storage_key(&self, prefix: &str) -> String {
        format!("{}{}:{}", prefix, self.tier, self.client)
    }
}

impl fmt::Display for BudgetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tier, self.client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_ipv4_mapped_collapses() {
        let mapped = IpAddr::V6(Ipv4Addr::new(192, 168, 1, 7).to_ipv6_mapped());
        assert_eq!(ClientId::from_ip(mapped).as_str(), "192.168.1.7");
        assert_eq!(ClientId::new("::ffff:192.168.1.7").as_str(), "192.168.1.7");
    }

    #[test]
    fn test_ipv6_kept() {
        let ip = IpAddr::V6(Ipv6Addr::LOCALHOST);
        assert_eq!(ClientId::from_ip(ip).as_str(), "::1");
        assert_eq!(ClientId::new("[::1]").as_str(), "::1");
    }

    #[test]
    fn test_non_ip_identity() {
        assert_eq!(ClientId::new("api-key-42").as_str(), "api-key-42");
        assert_eq!(ClientId::new("   ").as_str(), "unknown");
    }

    #[test]
    fn test_storage_key() {
        let key = BudgetKey::new(Tier::Sensitive, ClientId::new("10.1.2.3"));
        assert_eq!(key.storage_key("rate:"), "rate:sensitive:10.1.2.3");
        assert_eq!(key.to_string(), "sensitive:10.1.2.3");
    }

    #[test]
    fn test_tiers_have_distinct_keys() {
        let client = ClientId::new("10.1.2.3");
        let global = BudgetKey::new(Tier::Global, client.clone());
        let sensitive = BudgetKey::new(Tier::Sensitive, client);
        assert_ne!(global.storage_key(""), sensitive.storage_key(""));
    }
}

//! Address discovery (§4.8): peers are dialed at stored addresses, unioned
//! with whatever a live discovery mechanism (mDNS, in a full build) turns
//! up on the local network. No mDNS implementation ships here — that is
//! genuinely out of scope — but the trait seam is real so a daemon can
//! plug one in without touching the scheduler.

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub url: String,
}

impl PeerAddress {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

pub trait PeerDiscovery: Send + Sync {
    /// Addresses discovered for `peer_device_id` since the last call.
    /// Implementations should be cheap and non-blocking; this runs on every
    /// scheduler tick for every peer.
    fn discover(&self, peer_device_id: &str) -> Vec<PeerAddress>;
}

/// No-op discovery: the scheduler dials only the addresses already on file
/// for a peer. This is the default until a real mDNS backend is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDiscovery;

impl PeerDiscovery for NullDiscovery {
    fn discover(&self, _peer_device_id: &str) -> Vec<PeerAddress> {
        Vec::new()
    }
}

/// Union stored addresses with freshly-discovered ones, stored-first and
/// preserving order, deduping exact string matches.
pub fn union_addresses(stored: &[String], discovered: &[PeerAddress]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut result = Vec::new();
    for addr in stored.iter().cloned().chain(discovered.iter().map(|a| a.url.clone())) {
        if seen.insert(addr.clone()) {
            result.push(addr);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_discovery_returns_nothing() {
        assert!(NullDiscovery.discover("peer-a").is_empty());
    }

    #[test]
    fn union_addresses_dedupes_and_preserves_stored_order() {
        let stored = vec!["https://a.local:9876".to_string(), "https://b.local:9876".to_string()];
        let discovered =
            vec![PeerAddress::new("https://b.local:9876"), PeerAddress::new("https://c.local:9876")];
        let union = union_addresses(&stored, &discovered);
        assert_eq!(
            union,
            vec![
                "https://a.local:9876".to_string(),
                "https://b.local:9876".to_string(),
                "https://c.local:9876".to_string(),
            ]
        );
    }
}

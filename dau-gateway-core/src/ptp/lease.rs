use dashmap::DashMap;
use serde::Serialize;
use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    time::Duration,
};
use tokio::time::Instant;

use super::wire::PtpMessageType;

#[derive(Debug, Clone)]
pub struct ClientLease {
    pub address: SocketAddr,
    pub last_request: Instant,
    pub grants: HashMap<PtpMessageType, Instant>,
}

impl ClientLease {
    fn is_live(&self, now: Instant) -> bool {
        self.grants.values().any(|expiry| *expiry > now)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GrantInfo {
    pub message_type: PtpMessageType,
    pub remaining_s: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaseInfo {
    pub device_id: String,
    pub address: String,
    pub last_request_age_s: u64,
    pub grants: Vec<GrantInfo>,
}

/// Unicast leases keyed by device identity.
pub struct LeaseTable {
    leases: DashMap<String, ClientLease>,
    min_duration_s: u32,
    max_duration_s: u32,
}

impl LeaseTable {
    pub fn new(min_duration_s: u32, max_duration_s: u32) -> Self {
        Self {
            leases: DashMap::new(),
            min_duration_s,
            max_duration_s: max_duration_s.max(min_duration_s),
        }
    }

    pub fn clamp(&self, requested_s: u32) -> u32 {
        requested_s.clamp(self.min_duration_s, self.max_duration_s)
    }

    /// Records a grant; returns the clamped duration actually granted.
    pub fn grant(
        &self,
        device_id: &str,
        address: SocketAddr,
        message_type: PtpMessageType,
        requested_s: u32,
        now: Instant,
    ) -> u32 {
        let duration_s = self.clamp(requested_s);
        let expiry = now + Duration::from_secs(duration_s as u64);
        self.leases
            .entry(device_id.to_string())
            .and_modify(|lease| {
                lease.address = address;
                lease.last_request = now;
                lease.grants.insert(message_type, expiry);
            })
            .or_insert_with(|| ClientLease {
                address,
                last_request: now,
                grants: HashMap::from([(message_type, expiry)]),
            });
        duration_s
    }

    /// Drops expired grants and every device left without one. Returns the removed device ids.
    pub fn sweep(&self, now: Instant) -> Vec<String> {
        let mut removed = Vec::new();
        self.leases.retain(|device_id, lease| {
            lease.grants.retain(|_, expiry| *expiry > now);
            if lease.grants.is_empty() {
                removed.push(device_id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Addresses holding at least one unexpired grant, sorted and unique.
    pub fn destinations(&self, now: Instant) -> Vec<IpAddr> {
        let mut addresses: Vec<IpAddr> = self
            .leases
            .iter()
            .filter(|entry| entry.value().is_live(now))
            .map(|entry| entry.value().address.ip())
            .collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }

    pub fn snapshot(&self, now: Instant) -> Vec<LeaseInfo> {
        let mut leases: Vec<LeaseInfo> = self
            .leases
            .iter()
            .map(|entry| {
                let lease = entry.value();
                let mut grants: Vec<GrantInfo> = lease
                    .grants
                    .iter()
                    .map(|(message_type, expiry)| GrantInfo {
                        message_type: *message_type,
                        remaining_s: expiry.saturating_duration_since(now).as_secs(),
                    })
                    .collect();
                grants.sort_by_key(|grant| grant.message_type);
                LeaseInfo {
                    device_id: entry.key().clone(),
                    address: lease.address.to_string(),
                    last_request_age_s: now.saturating_duration_since(lease.last_request).as_secs(),
                    grants,
                }
            })
            .collect();
        leases.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        leases
    }

    pub fn len(&self) -> usize {
        self.leases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 320))
    }

    #[test]
    fn durations_are_clamped() {
        let table = LeaseTable::new(60, 3600);
        assert_eq!(table.clamp(10), 60);
        assert_eq!(table.clamp(9999), 3600);
        assert_eq!(table.clamp(300), 300);
    }

    #[tokio::test(start_paused = true)]
    async fn destination_requires_an_unexpired_grant() {
        let table = LeaseTable::new(60, 3600);
        let start = Instant::now();
        assert_eq!(table.grant("10.0.0.9", addr(9), PtpMessageType::Sync, 10, start), 60);
        table.grant("10.0.0.2", addr(2), PtpMessageType::Announce, 600, start);
        table.grant("10.0.0.2", addr(2), PtpMessageType::Sync, 60, start);

        assert_eq!(
            table.destinations(start),
            vec![addr(2).ip(), addr(9).ip()]
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        let now = Instant::now();
        // expired but not yet swept: already excluded
        assert_eq!(table.destinations(now), vec![addr(2).ip()]);

        assert_eq!(table.sweep(now), vec!["10.0.0.9".to_string()]);
        assert_eq!(table.len(), 1);
        let snapshot = table.snapshot(now);
        assert_eq!(snapshot[0].grants.len(), 1);
        assert_eq!(snapshot[0].grants[0].message_type, PtpMessageType::Announce);
        assert_eq!(snapshot[0].last_request_age_s, 61);
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_extends_the_grant() {
        let table = LeaseTable::new(60, 3600);
        table.grant("10.0.0.3", addr(3), PtpMessageType::Sync, 60, Instant::now());
        tokio::time::advance(Duration::from_secs(50)).await;
        table.grant("10.0.0.3", addr(3), PtpMessageType::Sync, 60, Instant::now());
        tokio::time::advance(Duration::from_secs(50)).await;

        assert!(table.sweep(Instant::now()).is_empty());
        assert_eq!(table.destinations(Instant::now()), vec![addr(3).ip()]);
    }
}

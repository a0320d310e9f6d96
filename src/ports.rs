//! Port allocation for session backend processes.
//!
//! Each session's ttyd instance listens on its own local port taken from a
//! bounded range. The allocator tracks leases in memory and additionally
//! bind-probes every candidate, so ports grabbed by unrelated processes on
//! the host are skipped instead of handed out.

use std::collections::HashSet;
use std::ops::RangeInclusive;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::debug;

/// The configured range contained no usable port.
#[derive(Debug, Error)]
#[error("no available ports in range {start}-{end}")]
pub struct NoPortsAvailable {
    pub start: u16,
    pub end: u16,
}

/// Hands out ports from an inclusive range, one lease per port.
#[derive(Debug)]
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    leased: Mutex<HashSet<u16>>,
}

impl PortAllocator {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            range: start..=end,
            leased: Mutex::new(HashSet::new()),
        }
    }

    /// Lease the lowest free port in the range.
    ///
    /// Scans in ascending order, skipping leased ports and ports some other
    /// process already listens on. The leased set stays locked for the whole
    /// scan, so two concurrent calls can never commit the same port.
    pub async fn allocate(&self) -> Result<u16, NoPortsAvailable> {
        let mut leased = self.leased.lock().await;
        for port in self.range.clone() {
            if leased.contains(&port) {
                continue;
            }
            if Self::probe(port).await {
                leased.insert(port);
                debug!(port, "leased backend port");
                return Ok(port);
            }
        }
        Err(NoPortsAvailable {
            start: *self.range.start(),
            end: *self.range.end(),
        })
    }

    /// Return a port to the pool. Releasing a port that is not leased is a
    /// no-op.
    pub async fn release(&self, port: u16) {
        if self.leased.lock().await.remove(&port) {
            debug!(port, "released backend port");
        }
    }

    /// Bind a throwaway listener to check the port is actually free.
    async fn probe(port: u16) -> bool {
        TcpListener::bind(("0.0.0.0", port)).await.is_ok()
    }

    #[cfg(test)]
    pub(crate) async fn mark_leased(&self, port: u16) {
        self.leased.lock().await.insert(port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Find a port that is currently free by binding an ephemeral listener.
    async fn free_port() -> u16 {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn allocates_distinct_ports_in_range() {
        let start = free_port().await;
        let allocator = PortAllocator::new(start, start.saturating_add(20));
        let a = allocator.allocate().await.unwrap();
        let b = allocator.allocate().await.unwrap();
        assert_ne!(a, b);
        assert!(a >= start && a <= start.saturating_add(20));
        assert!(b >= start && b <= start.saturating_add(20));
    }

    #[tokio::test]
    async fn released_port_can_be_reallocated() {
        let port = free_port().await;
        let allocator = PortAllocator::new(port, port);
        assert_eq!(allocator.allocate().await.unwrap(), port);

        allocator.release(port).await;
        assert_eq!(allocator.allocate().await.unwrap(), port);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let port = free_port().await;
        let allocator = PortAllocator::new(port, port);
        let leased = allocator.allocate().await.unwrap();
        allocator.release(leased).await;
        allocator.release(leased).await;
        allocator.release(9999).await;
        assert_eq!(allocator.allocate().await.unwrap(), leased);
    }

    #[tokio::test]
    async fn externally_occupied_range_is_exhausted() {
        // Occupy an ephemeral port ourselves, then give the allocator a
        // range containing only that port.
        let listener = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let taken = listener.local_addr().unwrap().port();

        let allocator = PortAllocator::new(taken, taken);
        let err = allocator.allocate().await.unwrap_err();
        assert_eq!(err.start, taken);
        assert_eq!(err.end, taken);
    }

    #[tokio::test]
    async fn skips_externally_occupied_ports() {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await.unwrap();
        let taken = listener.local_addr().unwrap().port();

        // Range starts at the occupied port; the allocator must move past it.
        let allocator = PortAllocator::new(taken, taken.checked_add(3).unwrap());
        let port = allocator.allocate().await.unwrap();
        assert_ne!(port, taken);
    }
}

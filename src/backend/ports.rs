//! Local port pool for backend processes.

use std::collections::BTreeSet;
use std::net::TcpListener;

use parking_lot::Mutex;

use crate::backend::BackendError;

/// Ports handed out to live backends, scanned upward from `base`.
///
/// A port stays held until [`release`](PortPool::release), so it is never
/// given to a second backend while the first one may still be bound to it.
pub struct PortPool {
    base: u16,
    range: u16,
    held: Mutex<BTreeSet<u16>>,
}

impl PortPool {
    pub fn new(base: u16, range: u16) -> Self {
        Self {
            base,
            range,
            held: Mutex::new(BTreeSet::new()),
        }
    }

    /// Reserve the lowest port that is neither held nor busy at the OS level.
    pub fn allocate(&self) -> Result<u16, BackendError> {
        let mut held = self.held.lock();

        for offset in 0..self.range {
            let Some(port) = self.base.checked_add(offset) else {
                break;
            };
            if held.contains(&port) {
                continue;
            }
            if !is_bindable(port) {
                tracing::debug!(port, "Port busy outside the pool, skipping");
                continue;
            }
            held.insert(port);
            return Ok(port);
        }

        tracing::error!(base = self.base, range = self.range, "Backend port range exhausted");
        Err(BackendError::PortExhausted {
            start: self.base,
            end: u32::from(self.base) + u32::from(self.range) - 1,
        })
    }

    /// Return a port to the pool. Returns false if it was not held.
    pub fn release(&self, port: u16) -> bool {
        self.held.lock().remove(&port)
    }

    pub fn held(&self) -> Vec<u16> {
        self.held.lock().iter().copied().collect()
    }

    pub fn clear(&self) {
        self.held.lock().clear();
    }
}

fn is_bindable(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A base port whose next few neighbours are very likely free.
    fn free_base() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port().min(60000)
    }

    #[test]
    fn allocates_upward_and_skips_held_ports() {
        let base = free_base();
        let pool = PortPool::new(base, 10);
        let first = pool.allocate().unwrap();
        let second = pool.allocate().unwrap();
        assert!(first >= base);
        assert!(second > first);
        assert_eq!(pool.held(), vec![first, second]);
    }

    #[test]
    fn released_port_is_reused() {
        let base = free_base();
        let pool = PortPool::new(base, 10);
        let first = pool.allocate().unwrap();
        assert!(pool.release(first));
        assert!(!pool.release(first));
        assert_eq!(pool.allocate().unwrap(), first);
    }

    #[test]
    fn exhaustion_is_reported() {
        let base = free_base();
        let pool = PortPool::new(base, 1);
        pool.allocate().unwrap();
        assert!(matches!(
            pool.allocate(),
            Err(BackendError::PortExhausted { .. })
        ));
    }

    #[test]
    fn ports_bound_by_other_processes_are_skipped() {
        let busy = TcpListener::bind("127.0.0.1:0").unwrap();
        let busy_port = busy.local_addr().unwrap().port();
        if busy_port == u16::MAX {
            return;
        }
        let pool = PortPool::new(busy_port, 2);
        let port = pool.allocate().unwrap();
        assert_ne!(port, busy_port);
    }

    #[test]
    fn clear_releases_everything() {
        let base = free_base();
        let pool = PortPool::new(base, 5);
        pool.allocate().unwrap();
        pool.allocate().unwrap();
        pool.clear();
        assert!(pool.held().is_empty());
    }
}

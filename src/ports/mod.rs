//! Host port allocation for runtime containers
//!
//! Process-local pool over a configured inclusive range. The daemon is the
//! sole scheduler on its host, so there is no external coordination; the set
//! is rebuilt empty on restart after stale containers are reaped.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use thiserror::Error;

/// Errors from the port allocator
#[derive(Debug, Error)]
pub enum PortError {
    #[error("No free ports in range {start}-{end}")]
    Exhausted { start: u16, end: u16 },
}

pub type PortResult<T> = Result<T, PortError>;

/// Pool of free host ports in an inclusive range
pub struct PortAllocator {
    start: u16,
    end: u16,
    allocated: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    /// Create an allocator over the inclusive range `[start, end]`
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            allocated: Mutex::new(BTreeSet::new()),
        }
    }

    /// Allocate the lowest free port in the range
    pub fn allocate(&self) -> PortResult<u16> {
        let mut allocated = self.allocated.lock();

        for port in self.start..=self.end {
            if !allocated.contains(&port) {
                allocated.insert(port);
                return Ok(port);
            }
        }

        Err(PortError::Exhausted {
            start: self.start,
            end: self.end,
        })
    }

    /// Release a previously allocated port; idempotent
    pub fn release(&self, port: u16) {
        self.allocated.lock().remove(&port);
    }

    /// Number of ports currently held
    pub fn used_count(&self) -> usize {
        self.allocated.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocates_lowest_free() {
        let pool = PortAllocator::new(3001, 3003);

        assert_eq!(pool.allocate().unwrap(), 3001);
        assert_eq!(pool.allocate().unwrap(), 3002);

        pool.release(3001);
        assert_eq!(pool.allocate().unwrap(), 3001);
        assert_eq!(pool.allocate().unwrap(), 3003);
    }

    #[test]
    fn test_exhaustion() {
        let pool = PortAllocator::new(3001, 3002);

        pool.allocate().unwrap();
        pool.allocate().unwrap();

        assert!(matches!(
            pool.allocate(),
            Err(PortError::Exhausted { start: 3001, end: 3002 })
        ));
    }

    #[test]
    fn test_release_is_idempotent() {
        let pool = PortAllocator::new(3001, 3001);

        let port = pool.allocate().unwrap();
        pool.release(port);
        pool.release(port);

        assert_eq!(pool.used_count(), 0);
        assert_eq!(pool.allocate().unwrap(), port);
    }

    #[test]
    fn test_allocate_release_restores_state() {
        let pool = PortAllocator::new(3001, 3010);

        pool.allocate().unwrap();
        let before = pool.used_count();

        let port = pool.allocate().unwrap();
        pool.release(port);

        assert_eq!(pool.used_count(), before);
        assert_eq!(pool.allocate().unwrap(), port);
    }

    #[test]
    fn test_no_duplicate_grants() {
        let pool = PortAllocator::new(3001, 3006);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..6 {
            assert!(seen.insert(pool.allocate().unwrap()));
        }
        assert_eq!(pool.used_count(), 6);
    }

    #[test]
    fn test_single_port_range() {
        let pool = PortAllocator::new(4000, 4000);

        assert_eq!(pool.allocate().unwrap(), 4000);
        assert!(pool.allocate().is_err());
    }
}

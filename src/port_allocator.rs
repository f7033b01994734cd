use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Mutex;

use crate::error_handling::types::PortError;

/// Hands out host ports for preview containers from an inclusive range.
///
/// The allocator does not own the truth about which ports are taken: callers
/// pass the registry's view (`in_use`) on every allocation. It only remembers
/// ports it handed out that have not reached the registry yet, so two
/// concurrent starts cannot pick the same port.
pub struct PortAllocator {
    start: u16,
    end: u16,
    probe_host: bool,
    reserved: Mutex<BTreeSet<u16>>,
}

impl PortAllocator {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            probe_host: false,
            reserved: Mutex::new(BTreeSet::new()),
        }
    }

    /// Also skip ports some other host process is already bound to.
    pub fn with_host_probe(mut self, probe: bool) -> Self {
        self.probe_host = probe;
        self
    }

    pub fn capacity(&self) -> usize {
        if self.end < self.start {
            return 0;
        }
        usize::from(self.end - self.start) + 1
    }

    fn reserved(&self) -> std::sync::MutexGuard<'_, BTreeSet<u16>> {
        self.reserved
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Picks the lowest port not in `in_use` and not already reserved.
    pub fn allocate(&self, in_use: &BTreeSet<u16>) -> Result<u16, PortError> {
        let mut reserved = self.reserved();
        for port in self.start..=self.end {
            if in_use.contains(&port) || reserved.contains(&port) {
                continue;
            }
            if self.probe_host && !host_port_free(port) {
                debug!("Port {} is held by another process, skipping", port);
                continue;
            }
            reserved.insert(port);
            info!("Allocated port {}", port);
            return Ok(port);
        }

        warn!(
            "No ports available in {}-{} ({} in use)",
            self.start,
            self.end,
            in_use.len()
        );
        Err(PortError::NoPortsAvailable {
            start: self.start,
            end: self.end,
        })
    }

    /// Returns `port` to the pool. Releasing a free port does nothing.
    pub fn release(&self, port: u16) -> bool {
        let released = self.reserved().remove(&port);
        if released {
            info!("Released port {}", port);
        } else {
            debug!("Port {} was not reserved", port);
        }
        released
    }

    pub fn is_reserved(&self, port: u16) -> bool {
        self.reserved().contains(&port)
    }

    /// Like [`allocate`](Self::allocate), but the port goes back to the pool
    /// when the returned guard is dropped without [`PortReservation::commit`].
    pub fn reserve(&self, in_use: &BTreeSet<u16>) -> Result<PortReservation<'_>, PortError> {
        let port = self.allocate(in_use)?;
        Ok(PortReservation {
            allocator: self,
            port,
            armed: true,
        })
    }
}

/// A freshly allocated port that nothing records yet.
///
/// Once the port is written to the registry the caller commits the
/// reservation; until then dropping it, for instance because the owning
/// future was cancelled, releases the port.
pub struct PortReservation<'a> {
    allocator: &'a PortAllocator,
    port: u16,
    armed: bool,
}

impl PortReservation<'_> {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Keeps the port reserved; releasing it is now the record owner's job.
    pub fn commit(mut self) -> u16 {
        self.armed = false;
        self.port
    }
}

impl Drop for PortReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Uncommitted reservation of port {} dropped", self.port);
            self.allocator.release(self.port);
        }
    }
}

fn host_port_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_free_port_is_chosen() {
        let allocator = PortAllocator::new(8100, 8105);
        let in_use = BTreeSet::from([8100, 8102]);

        assert_eq!(allocator.allocate(&in_use), Ok(8101));
        assert_eq!(allocator.allocate(&in_use), Ok(8103));
        assert!(allocator.is_reserved(8101));
    }

    #[test]
    fn test_exhausted_range_fails_closed() {
        let allocator = PortAllocator::new(8100, 8200);
        let in_use: BTreeSet<u16> = (8100..=8200).collect();

        assert_eq!(allocator.capacity(), 101);
        assert_eq!(
            allocator.allocate(&in_use),
            Err(PortError::NoPortsAvailable {
                start: 8100,
                end: 8200
            })
        );
    }

    #[test]
    fn test_release_is_idempotent_and_frees_the_port() {
        let allocator = PortAllocator::new(9000, 9000);
        let none = BTreeSet::new();

        let port = allocator.allocate(&none).unwrap();
        assert!(allocator.allocate(&none).is_err());
        assert!(allocator.release(port));
        assert!(!allocator.release(port));
        assert_eq!(allocator.allocate(&none), Ok(port));
    }

    #[test]
    fn test_dropped_reservation_frees_the_port() {
        let allocator = PortAllocator::new(9100, 9100);
        let none = BTreeSet::new();

        let reservation = allocator.reserve(&none).unwrap();
        assert_eq!(reservation.port(), 9100);
        assert!(allocator.reserve(&none).is_err());
        drop(reservation);
        assert!(!allocator.is_reserved(9100));

        let port = allocator.reserve(&none).unwrap().commit();
        assert_eq!(port, 9100);
        assert!(allocator.is_reserved(9100));
        assert!(allocator.reserve(&none).is_err());
    }

    #[test]
    fn test_host_probe_skips_bound_ports() {
        let holder = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let taken = holder.local_addr().unwrap().port();
        let allocator = PortAllocator::new(taken, taken).with_host_probe(true);

        assert!(allocator.allocate(&BTreeSet::new()).is_err());
        drop(holder);
        assert_eq!(allocator.allocate(&BTreeSet::new()), Ok(taken));
    }
}

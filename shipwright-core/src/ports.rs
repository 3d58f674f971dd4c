//! Port allocation for concurrent runs
//!
//! Each run gets one port from the primary (backend) range and one from the
//! secondary (frontend) range, both at the same slot offset. The preferred
//! slot is derived from the run id, so a resumed run lands on the same ports.
//! Slots are claimed by creating `slot-NN` files exclusively inside a shared
//! reservations directory; no central lock manager is involved.

use std::fs::OpenOptions;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::{Error, Result};

/// Name of the per-workspace file exposing the allocated ports
pub const PORTS_ENV_FILE: &str = ".ports.env";

/// Ports assigned to one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortAllocation {
    pub primary_port: u16,
    pub secondary_port: u16,
}

impl PortAllocation {
    /// Key/value lines written to `.ports.env`
    pub fn env_contents(&self) -> String {
        format!(
            "BACKEND_PORT={}\nFRONTEND_PORT={}\nVITE_BACKEND_URL=http://localhost:{}\n",
            self.primary_port, self.secondary_port, self.primary_port
        )
    }

    /// Write `.ports.env` into `dir`
    pub fn write_env_file(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(PORTS_ENV_FILE);
        std::fs::write(&path, self.env_contents())?;
        Ok(path)
    }
}

/// Hands out port pairs by slot
#[derive(Debug, Clone)]
pub struct PortAllocator {
    primary_start: u16,
    secondary_start: u16,
    slots: u16,
    reservations_dir: PathBuf,
}

impl PortAllocator {
    pub fn new(
        primary_start: u16,
        secondary_start: u16,
        slots: u16,
        reservations_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        if slots == 0 {
            return Err(Error::Config("ports.slots must be at least 1".to_string()));
        }
        let primary_end = primary_start as u32 + slots as u32;
        let secondary_end = secondary_start as u32 + slots as u32;
        if primary_end > u16::MAX as u32 + 1 || secondary_end > u16::MAX as u32 + 1 {
            return Err(Error::Config("port range exceeds 65535".to_string()));
        }
        let overlap = (primary_start as u32) < secondary_end && (secondary_start as u32) < primary_end;
        if overlap {
            return Err(Error::Config(format!(
                "port ranges {}..{} and {}..{} overlap",
                primary_start, primary_end, secondary_start, secondary_end
            )));
        }

        Ok(Self {
            primary_start,
            secondary_start,
            slots,
            reservations_dir: reservations_dir.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.ports.primary_start,
            config.ports.secondary_start,
            config.ports.slots,
            config.reservations_dir()?,
        )
    }

    /// Slot a run prefers when nothing else is in the way
    pub fn preferred_slot(&self, run_id: &str) -> u16 {
        (slot_seed(run_id) % self.slots as u64) as u16
    }

    /// Ports at a given slot
    pub fn ports_for_slot(&self, slot: u16) -> PortAllocation {
        PortAllocation {
            primary_port: self.primary_start + slot,
            secondary_port: self.secondary_start + slot,
        }
    }

    /// Reserve a port pair for `run_id`
    ///
    /// Returns the existing reservation if the run already holds one. Otherwise
    /// scans from the preferred slot, wrapping once through the range.
    pub fn allocate(&self, run_id: &str) -> Result<PortAllocation> {
        std::fs::create_dir_all(&self.reservations_dir)?;

        if let Some(slot) = self.find_claim(run_id)? {
            let ports = self.ports_for_slot(slot);
            debug!(run_id, slot, ?ports, "Reusing existing port reservation");
            return Ok(ports);
        }

        let start = self.preferred_slot(run_id);
        for offset in 0..self.slots {
            let slot = (start + offset) % self.slots;
            if !self.try_claim(slot, run_id)? {
                continue;
            }

            let ports = self.ports_for_slot(slot);
            if port_is_free(ports.primary_port) && port_is_free(ports.secondary_port) {
                if offset > 0 {
                    info!(run_id, slot, preferred = start, "Preferred port slot taken, using fallback");
                }
                info!(run_id, primary = ports.primary_port, secondary = ports.secondary_port, "Allocated ports");
                return Ok(ports);
            }

            debug!(run_id, slot, "Ports busy, dropping claim");
            self.remove_claim(slot)?;
        }

        Err(Error::ResourceExhausted(format!(
            "no free port pair in {} slots from {}/{}",
            self.slots, self.primary_start, self.secondary_start
        )))
    }

    /// Return the run's slot to the pool. Releasing twice is a no-op.
    pub fn release(&self, run_id: &str) -> Result<()> {
        match self.find_claim(run_id)? {
            Some(slot) => {
                self.remove_claim(slot)?;
                info!(run_id, slot, "Released ports");
            }
            None => debug!(run_id, "No port reservation to release"),
        }
        Ok(())
    }

    /// Slot currently claimed by `run_id`, if any
    pub fn find_claim(&self, run_id: &str) -> Result<Option<u16>> {
        for slot in 0..self.slots {
            let path = self.claim_path(slot);
            match std::fs::read_to_string(&path) {
                Ok(owner) if owner.trim() == run_id => return Ok(Some(slot)),
                Ok(_) => {}
                Err(e) if e.kind() == IoErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    fn claim_path(&self, slot: u16) -> PathBuf {
        self.reservations_dir.join(format!("slot-{:02}", slot))
    }

    fn try_claim(&self, slot: u16, run_id: &str) -> Result<bool> {
        let path = self.claim_path(slot);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(run_id.as_bytes())?;
                Ok(true)
            }
            Err(e) if e.kind() == IoErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_claim(&self, slot: u16) -> Result<()> {
        match std::fs::remove_file(self.claim_path(slot)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                warn!(slot, "Port claim already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Numeric seed for slot derivation: the first 8 characters read as base 36,
/// or an FNV-1a hash when they are not valid base 36
fn slot_seed(run_id: &str) -> u64 {
    let prefix: String = run_id.chars().take(8).collect();
    if let Ok(value) = u64::from_str_radix(&prefix, 36) {
        return value;
    }

    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in run_id.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn port_is_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn allocator(dir: &TempDir, primary: u16, secondary: u16, slots: u16) -> PortAllocator {
        PortAllocator::new(primary, secondary, slots, dir.path().join("ports")).unwrap()
    }

    #[test]
    fn test_slot_seed_base36() {
        assert_eq!(slot_seed("r1"), 27 * 36 + 1);
        assert_eq!(slot_seed("0000000a"), 10);
        // Only the first eight characters matter
        assert_eq!(slot_seed("0000000aZZZ"), 10);
    }

    #[test]
    fn test_slot_seed_fallback_is_stable() {
        assert_eq!(slot_seed("run_with_underscores"), slot_seed("run_with_underscores"));
    }

    #[test]
    fn test_r1_lands_in_range() {
        let dir = TempDir::new().unwrap();
        let alloc = allocator(&dir, 9100, 9200, 15);
        let slot = alloc.preferred_slot("r1");
        let ports = alloc.ports_for_slot(slot);
        assert!((9100..=9114).contains(&ports.primary_port));
        assert!((9200..=9214).contains(&ports.secondary_port));
        assert_eq!(slot, alloc.preferred_slot("r1"));
    }

    #[test]
    fn test_allocate_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let alloc = allocator(&dir, 47100, 47200, 15);

        let first = alloc.allocate("r1").unwrap();
        let second = alloc.allocate("r1").unwrap();
        assert_eq!(first, second);
        assert_eq!(first, alloc.ports_for_slot(alloc.preferred_slot("r1")));
    }

    #[test]
    fn test_concurrent_runs_get_distinct_ports() {
        let dir = TempDir::new().unwrap();
        let alloc = allocator(&dir, 47300, 47400, 15);

        // Same preferred slot: "0" and "f" are 0 and 15 in base 36
        assert_eq!(alloc.preferred_slot("0"), alloc.preferred_slot("f"));
        let a = alloc.allocate("0").unwrap();
        let b = alloc.allocate("f").unwrap();
        assert_ne!(a.primary_port, b.primary_port);
        assert_ne!(a.secondary_port, b.secondary_port);
    }

    #[test]
    fn test_exhaustion() {
        let dir = TempDir::new().unwrap();
        let alloc = allocator(&dir, 47500, 47600, 2);

        alloc.allocate("a1").unwrap();
        alloc.allocate("a2").unwrap();
        let err = alloc.allocate("a3").unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
    }

    #[test]
    fn test_release_is_idempotent_and_frees_slot() {
        let dir = TempDir::new().unwrap();
        let alloc = allocator(&dir, 47700, 47800, 1);

        let ports = alloc.allocate("a1").unwrap();
        alloc.release("a1").unwrap();
        alloc.release("a1").unwrap();
        assert_eq!(alloc.find_claim("a1").unwrap(), None);

        assert_eq!(alloc.allocate("a2").unwrap(), ports);
    }

    #[test]
    fn test_busy_port_is_skipped() {
        let dir = TempDir::new().unwrap();
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let busy = listener.local_addr().unwrap().port();
        let alloc = PortAllocator::new(busy, busy.wrapping_sub(1000), 1, dir.path()).unwrap();

        let err = alloc.allocate("r0").unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted(_)));
        // The claim for the busy slot is not leaked
        assert_eq!(alloc.find_claim("r0").unwrap(), None);
    }

    #[test]
    fn test_overlapping_ranges_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(PortAllocator::new(9100, 9110, 15, dir.path()).is_err());
        assert!(PortAllocator::new(9100, 9200, 0, dir.path()).is_err());
    }

    #[test]
    fn test_env_file() {
        let dir = TempDir::new().unwrap();
        let ports = PortAllocation {
            primary_port: 9103,
            secondary_port: 9203,
        };
        let path = ports.write_env_file(dir.path()).unwrap();
        let contents = std::fs::read_to_string(path).unwrap();
        assert_eq!(
            contents,
            "BACKEND_PORT=9103\nFRONTEND_PORT=9203\nVITE_BACKEND_URL=http://localhost:9103\n"
        );
    }
}

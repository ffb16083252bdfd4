//! Embedded transactional inventory store.
//!
//! Single-writer, multi-reader, backed by `sled`. Every mutating
//! operation goes through `Store::write_lock` so concurrent writers
//! serialize while readers never block. `sled`'s own write-ahead log
//! gives us the crash-safety `spec.md` §5 requires: a crash mid
//! mutation leaves the prior, already-flushed state in place.

mod codec;
pub mod device;
mod error;
pub mod evidence;
pub mod incident;
pub mod scan;

pub use error::{StoreError, StoreResult};

use parking_lot::Mutex;
use std::path::Path;

/// The inventory store. Cheap to clone (sled's `Db` and its `Tree`
/// handles are internally `Arc`-backed); the write lock is shared via
/// an `Arc` so clones serialize against the same guard.
#[derive(Clone)]
pub struct Store {
    pub(crate) db: sled::Db,
    pub(crate) devices: sled::Tree,
    pub(crate) devices_by_ip: sled::Tree,
    pub(crate) ports: sled::Tree,
    pub(crate) notes: sled::Tree,
    pub(crate) scans: sled::Tree,
    pub(crate) compliance_results: sled::Tree,
    pub(crate) incidents: sled::Tree,
    pub(crate) pattern_stats: sled::Tree,
    pub(crate) flap_suppressions: sled::Tree,
    pub(crate) evidence: sled::Tree,
    pub(crate) evidence_meta: sled::Tree,
    pub(crate) uploads: sled::Tree,
    pub(crate) write_lock: std::sync::Arc<Mutex<()>>,
}

impl Store {
    /// Open (creating if absent) a store rooted at `path`.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            devices: db.open_tree("devices")?,
            devices_by_ip: db.open_tree("devices_by_ip")?,
            ports: db.open_tree("ports")?,
            notes: db.open_tree("notes")?,
            scans: db.open_tree("scans")?,
            compliance_results: db.open_tree("compliance_results")?,
            incidents: db.open_tree("incidents")?,
            pattern_stats: db.open_tree("pattern_stats")?,
            flap_suppressions: db.open_tree("flap_suppressions")?,
            evidence: db.open_tree("evidence")?,
            evidence_meta: db.open_tree("evidence_meta")?,
            uploads: db.open_tree("uploads")?,
            write_lock: std::sync::Arc::new(Mutex::new(())),
            db,
        })
    }

    /// In-memory store, for tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self {
            devices: db.open_tree("devices")?,
            devices_by_ip: db.open_tree("devices_by_ip")?,
            ports: db.open_tree("ports")?,
            notes: db.open_tree("notes")?,
            scans: db.open_tree("scans")?,
            compliance_results: db.open_tree("compliance_results")?,
            incidents: db.open_tree("incidents")?,
            pattern_stats: db.open_tree("pattern_stats")?,
            flap_suppressions: db.open_tree("flap_suppressions")?,
            evidence: db.open_tree("evidence")?,
            evidence_meta: db.open_tree("evidence_meta")?,
            uploads: db.open_tree("uploads")?,
            write_lock: std::sync::Arc::new(Mutex::new(())),
            db,
        })
    }

    /// Flush all trees to disk. Callers needing durability guarantees
    /// beyond sled's own background flush should call this after a
    /// batch of mutations (e.g. at the end of a scan).
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

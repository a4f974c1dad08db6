//! Ciphertext store.
//!
//! Holds live ciphertexts behind opaque [`Handle`]s. Entries are sharded in a
//! `DashMap`, so operations on distinct handles do not contend.
//!
//! # Leases
//!
//! [`CiphertextStore::get`] returns a [`Lease`] that pins the entry.
//! [`CiphertextStore::release`] removes the entry first (new lookups fail with
//! `NotFound`) and then blocks until every outstanding lease on it has been
//! dropped, so a release never completes under a running computation.
//!
//! # Generations
//!
//! The store accepts handles of exactly one context generation at a time.
//! Deactivating a generation drops its entries, and any later use of its
//! handles fails with `StaleContext`.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::ckks::Ciphertext;
use crate::context::ContextId;
use crate::error::{HeError, Result};

/// Opaque ciphertext identifier, printed as `ct-<generation>-<id>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle {
    context: ContextId,
    id: u64,
}

impl Handle {
    /// Generation the handle was issued under.
    pub fn context(&self) -> ContextId {
        self.context
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ct-{}-{}", self.context, self.id)
    }
}

impl FromStr for Handle {
    type Err = HeError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || HeError::InvalidArgument(format!("malformed handle '{}'", s));
        let rest = s.strip_prefix("ct-").ok_or_else(invalid)?;
        let (context, id) = rest.split_once('-').ok_or_else(invalid)?;
        Ok(Handle {
            context: ContextId(context.parse().map_err(|_| invalid())?),
            id: id.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for Handle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Handle {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Metadata of a stored ciphertext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryStats {
    pub level: usize,
    pub scale: f64,
    pub size: usize,
    pub depth_consumed: usize,
    pub noise_budget_bits: f64,
}

impl From<&Ciphertext> for EntryStats {
    fn from(ct: &Ciphertext) -> Self {
        Self {
            level: ct.level(),
            scale: ct.scale(),
            size: ct.size(),
            depth_consumed: ct.depth(),
            noise_budget_bits: ct.capacity_bits(),
        }
    }
}

#[derive(Default)]
struct LeaseCount {
    count: Mutex<usize>,
    released: Condvar,
}

struct Entry {
    ciphertext: Arc<Ciphertext>,
    leases: Arc<LeaseCount>,
}

/// Shared read access to a stored ciphertext.
pub struct Lease {
    ciphertext: Arc<Ciphertext>,
    leases: Arc<LeaseCount>,
}

impl Deref for Lease {
    type Target = Ciphertext;

    fn deref(&self) -> &Ciphertext {
        &self.ciphertext
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut count = self.leases.count.lock();
        *count -= 1;
        if *count == 0 {
            self.leases.released.notify_all();
        }
    }
}

/// Sharded map of live ciphertexts.
pub struct CiphertextStore {
    entries: DashMap<Handle, Entry>,
    /// Active generation; 0 when none
    active: AtomicU64,
    /// Held shared by `put` and exclusively by `deactivate`, so no insert
    /// lands after a generation's sweep
    generation: RwLock<()>,
    next_id: AtomicU64,
}

impl CiphertextStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            active: AtomicU64::new(0),
            generation: RwLock::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Generation currently accepted, if any.
    pub fn active(&self) -> Option<ContextId> {
        match self.active.load(Ordering::Acquire) {
            0 => None,
            id => Some(ContextId(id)),
        }
    }

    pub(crate) fn activate(&self, context: ContextId) {
        self.active.store(context.0, Ordering::Release);
    }

    /// Stop accepting `context` and drop its entries.
    pub(crate) fn deactivate(&self, context: ContextId) {
        let _sweep = self.generation.write();
        let _ = self
            .active
            .compare_exchange(context.0, 0, Ordering::AcqRel, Ordering::Acquire);
        let before = self.entries.len();
        self.entries.retain(|handle, _| handle.context != context);
        debug!(context = %context, dropped = before.saturating_sub(self.entries.len()), "deactivated store generation");
    }

    fn check_generation(&self, context: ContextId) -> Result<()> {
        if self.active() != Some(context) {
            return Err(HeError::StaleContext(format!(
                "context {} is no longer active",
                context
            )));
        }
        Ok(())
    }

    /// Store a ciphertext of the active generation.
    pub fn put(&self, ciphertext: Ciphertext) -> Result<Handle> {
        let _generation = self.generation.read();
        self.check_generation(ciphertext.context_id())?;
        let handle = Handle {
            context: ciphertext.context_id(),
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        self.entries.insert(
            handle,
            Entry {
                ciphertext: Arc::new(ciphertext),
                leases: Arc::default(),
            },
        );
        Ok(handle)
    }

    /// Lease the ciphertext behind `handle`.
    pub fn get(&self, handle: &Handle) -> Result<Lease> {
        self.check_generation(handle.context)?;
        let entry = self.entries.get(handle).ok_or(HeError::NotFound(*handle))?;
        // Counted while the shard guard is held, so a concurrent release
        // either sees this lease or makes the lookup above fail.
        *entry.leases.count.lock() += 1;
        Ok(Lease {
            ciphertext: Arc::clone(&entry.ciphertext),
            leases: Arc::clone(&entry.leases),
        })
    }

    /// Metadata of the ciphertext behind `handle`.
    pub fn stats(&self, handle: &Handle) -> Result<EntryStats> {
        self.check_generation(handle.context)?;
        self.entries
            .get(handle)
            .map(|entry| EntryStats::from(entry.ciphertext.as_ref()))
            .ok_or(HeError::NotFound(*handle))
    }

    /// Remove `handle`, waiting for outstanding leases to be dropped.
    pub fn release(&self, handle: &Handle) -> Result<()> {
        self.check_generation(handle.context)?;
        let (_, entry) = self.entries.remove(handle).ok_or(HeError::NotFound(*handle))?;

        let mut count = entry.leases.count.lock();
        while *count > 0 {
            entry.leases.released.wait(&mut count);
        }
        Ok(())
    }

    pub fn contains(&self, handle: &Handle) -> bool {
        self.entries.contains_key(handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CiphertextStore {
    fn default() -> Self {
        Self::new()
    }
}

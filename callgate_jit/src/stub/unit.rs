//! Compilation units and the global region tracker.
//!
//! A [`StubUnit`] is the single strong owner of its [`CodeRegion`]. The
//! tracker only holds weak references, so it answers "which unit owns this
//! address" without ever extending a region's lifetime.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;

use super::region::CodeRegion;
use super::registry::{register, NativeMethod, Registrar, RegistrationReport};

// =============================================================================
// Unit IDs
// =============================================================================

static NEXT_UNIT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a compilation unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(u64);

impl UnitId {
    fn next() -> Self {
        UnitId(NEXT_UNIT_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit#{}", self.0)
    }
}

// =============================================================================
// Region Tracker
// =============================================================================

/// Concurrent map from unit to its region, holding weak references only.
#[derive(Debug, Default)]
pub struct RegionTracker {
    units: DashMap<UnitId, Weak<CodeRegion>>,
}

impl RegionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `region` as belonging to `unit`.
    pub fn insert(&self, unit: UnitId, region: &Arc<CodeRegion>) {
        self.units.insert(unit, Arc::downgrade(region));
    }

    /// Forget `unit`. Returns whether it was tracked.
    pub fn remove(&self, unit: UnitId) -> bool {
        self.units.remove(&unit).is_some()
    }

    /// The region of `unit`, if it is still alive.
    pub fn get(&self, unit: UnitId) -> Option<Arc<CodeRegion>> {
        self.units.get(&unit).and_then(|r| r.upgrade())
    }

    /// The live unit whose region contains `addr`.
    pub fn find_by_address(&self, addr: usize) -> Option<(UnitId, Arc<CodeRegion>)> {
        self.units.iter().find_map(|entry| {
            let region = entry.value().upgrade()?;
            region.contains(addr).then(|| (*entry.key(), region))
        })
    }

    /// Units whose region is still alive, in ascending ID order.
    pub fn live_units(&self) -> Vec<UnitId> {
        let mut ids: Vec<_> = self
            .units
            .iter()
            .filter(|e| e.value().strong_count() > 0)
            .map(|e| *e.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Remove entries whose region is gone. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.units.len();
        self.units.retain(|_, r| r.strong_count() > 0);
        before - self.units.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

static TRACKER: OnceLock<RegionTracker> = OnceLock::new();

/// The process-wide region tracker.
pub fn tracker() -> &'static RegionTracker {
    TRACKER.get_or_init(RegionTracker::new)
}

// =============================================================================
// Stub Unit
// =============================================================================

/// An attached compilation unit: its executable region plus the result of
/// publishing it.
///
/// Dropping the unit (or calling [`release`](Self::release)) gives up the
/// unit's ownership of the pages. They are unmapped once every
/// [`BoundMethod`](super::BoundMethod) guard for them is gone too.
#[derive(Debug)]
pub struct StubUnit {
    id: UnitId,
    region: Arc<CodeRegion>,
    report: RegistrationReport,
}

impl StubUnit {
    /// Track `region` under a fresh unit ID and publish it to `registrar`.
    pub(crate) fn attach(region: Arc<CodeRegion>, registrar: &dyn Registrar) -> Self {
        let id = UnitId::next();
        tracker().insert(id, &region);
        let report = register(&region, registrar);
        tracing::info!(
            unit = %id,
            stubs = region.entries().len(),
            bound = report.bound().len(),
            fallbacks = report.rejected().len(),
            "attached stub unit"
        );
        Self { id, region, report }
    }

    #[inline]
    pub fn id(&self) -> UnitId {
        self.id
    }

    #[inline]
    pub fn region(&self) -> &Arc<CodeRegion> {
        &self.region
    }

    #[inline]
    pub fn report(&self) -> &RegistrationReport {
        &self.report
    }

    /// Methods published to the registrar.
    pub fn bound(&self) -> &[NativeMethod] {
        self.report.bound()
    }

    /// Methods left on the generic path.
    pub fn fallbacks(&self) -> impl Iterator<Item = &str> {
        self.report.fallbacks()
    }

    /// Give up ownership of the region.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for StubUnit {
    fn drop(&mut self) {
        tracker().remove(self.id);
        tracing::debug!(
            unit = %self.id,
            base = format_args!("{:#x}", self.region.base()),
            "released stub unit"
        );
    }
}

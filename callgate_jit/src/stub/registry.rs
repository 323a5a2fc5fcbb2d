//! Publishing committed stubs to a dispatch registrar.
//!
//! The registrar is whatever maps method names to call targets in the
//! embedding runtime. It is injected as a [`Registrar`] trait object;
//! [`DispatchTable`] is the in-crate implementation.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::region::CodeRegion;
use crate::backend::x64::Protection;
use crate::error::RegistrarError;

/// A `(name, descriptor, address)` binding handed to a registrar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeMethod {
    /// Method name.
    pub name: String,
    /// JNI-style signature descriptor.
    pub descriptor: String,
    /// Final, executable entry address.
    pub address: usize,
}

/// Receiver of committed stub bindings.
///
/// `bind` is called once per stub, only after the region is executable. A
/// refusal discards that one stub; its method keeps using the generic path.
pub trait Registrar: Send + Sync {
    /// Bind `method`, whose code lives in `region`.
    fn bind(&self, method: &NativeMethod, region: &Arc<CodeRegion>) -> Result<(), RegistrarError>;
}

/// Outcome of publishing one region.
#[derive(Debug, Default)]
pub struct RegistrationReport {
    bound: Vec<NativeMethod>,
    rejected: Vec<(NativeMethod, RegistrarError)>,
}

impl RegistrationReport {
    /// Methods the registrar accepted.
    pub fn bound(&self) -> &[NativeMethod] {
        &self.bound
    }

    /// Methods the registrar refused, with the reason.
    pub fn rejected(&self) -> &[(NativeMethod, RegistrarError)] {
        &self.rejected
    }

    /// Names of methods that stay on the generic path.
    pub fn fallbacks(&self) -> impl Iterator<Item = &str> {
        self.rejected.iter().map(|(m, _)| m.name.as_str())
    }

    /// Whether every stub was bound.
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Publish every stub in `region` to `registrar`.
pub fn register(region: &Arc<CodeRegion>, registrar: &dyn Registrar) -> RegistrationReport {
    debug_assert_eq!(region.protection(), Protection::Executable);

    let mut report = RegistrationReport::default();
    for entry in region.entries() {
        let method = NativeMethod {
            name: entry.name().to_owned(),
            descriptor: entry.descriptor().to_owned(),
            address: region.base() + entry.offset(),
        };
        match registrar.bind(&method, region) {
            Ok(()) => report.bound.push(method),
            Err(err) => {
                tracing::warn!(
                    method = %method.name,
                    descriptor = %method.descriptor,
                    error = %err,
                    "stub binding rejected; method falls back to generic dispatch"
                );
                report.rejected.push((method, err));
            }
        }
    }
    tracing::debug!(
        bound = report.bound.len(),
        rejected = report.rejected.len(),
        "registered stub region"
    );
    report
}

// =============================================================================
// Dispatch Table
// =============================================================================

#[derive(Debug)]
struct Binding {
    method: NativeMethod,
    region: Weak<CodeRegion>,
}

/// Name-keyed table of bound stubs.
///
/// Holds only weak references to regions: a binding whose unit has been
/// released stops resolving. It is dropped by the next successful or failed
/// [`bind`](Registrar::bind), or earlier by [`purge`](Self::purge).
#[derive(Debug, Default)]
pub struct DispatchTable {
    methods: RwLock<FxHashMap<String, Binding>>,
}

impl DispatchTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `name` to a callable stub.
    ///
    /// Returns `None` if the method is unknown or its unit has been released.
    pub fn lookup(&self, name: &str) -> Option<BoundMethod> {
        let methods = self.methods.read();
        let binding = methods.get(name)?;
        let region = binding.region.upgrade()?;
        let offset = binding.method.address - region.base();
        Some(BoundMethod {
            method: binding.method.clone(),
            offset,
            region,
        })
    }

    /// Remove a binding. Returns whether one existed.
    pub fn unbind(&self, name: &str) -> bool {
        self.methods.write().remove(name).is_some()
    }

    /// Drop bindings whose region is gone. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut methods = self.methods.write();
        let before = methods.len();
        methods.retain(|_, b| b.region.strong_count() > 0);
        before - methods.len()
    }

    /// Number of bindings, live or not.
    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }

    fn validate(method: &NativeMethod, region: &CodeRegion) -> Result<(), RegistrarError> {
        let malformed = |reason| RegistrarError::Malformed {
            name: method.name.clone(),
            reason,
        };
        if method.name.is_empty() {
            return Err(malformed("empty name"));
        }
        let d = &method.descriptor;
        if !(d.starts_with('(') && d.contains(')')) || d.ends_with(')') {
            return Err(malformed("bad signature descriptor"));
        }
        if method.address == 0 || !region.contains(method.address) {
            return Err(malformed("address outside its code region"));
        }
        Ok(())
    }
}

impl Registrar for DispatchTable {
    fn bind(&self, method: &NativeMethod, region: &Arc<CodeRegion>) -> Result<(), RegistrarError> {
        Self::validate(method, region)?;

        let mut methods = self.methods.write();
        // Bindings of released units are dropped on every bind.
        methods.retain(|_, b| b.region.strong_count() > 0);
        if methods.contains_key(&method.name) {
            return Err(RegistrarError::Duplicate(method.name.clone()));
        }
        methods.insert(
            method.name.clone(),
            Binding {
                method: method.clone(),
                region: Arc::downgrade(region),
            },
        );
        Ok(())
    }
}

/// A resolved stub that keeps its region alive while held.
///
/// Hold it for the duration of a call, not longer: a guard outliving its
/// unit delays releasing the pages.
#[derive(Debug, Clone)]
pub struct BoundMethod {
    method: NativeMethod,
    offset: usize,
    region: Arc<CodeRegion>,
}

impl BoundMethod {
    #[inline]
    pub fn name(&self) -> &str {
        &self.method.name
    }

    #[inline]
    pub fn descriptor(&self) -> &str {
        &self.method.descriptor
    }

    #[inline]
    pub fn address(&self) -> usize {
        self.method.address
    }

    #[inline]
    pub fn region(&self) -> &Arc<CodeRegion> {
        &self.region
    }

    /// Typed entry point.
    ///
    /// # Safety
    /// Same contract as [`CodeRegion::as_fn`]; additionally the pointer must
    /// not be called after this guard is dropped.
    pub unsafe fn as_fn<F: Copy>(&self) -> F {
        unsafe { self.region.fn_at(self.offset) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StubConfig;
    use crate::stub::{emit, StubRequest};
    use callgate_core::{Cpu, NativeType, Os, Platform, Signature};

    const LINUX: Platform = Platform::new(Cpu::X86_64, Os::Linux, 64, 64);

    fn commit_named(names: &[&str]) -> Arc<CodeRegion> {
        let stubs = names
            .iter()
            .map(|n| {
                let sig = Signature::new(NativeType::I32, [NativeType::I32]);
                emit(&StubRequest::new(*n, sig, 0x1000), &LINUX, 0x2000).unwrap()
            })
            .collect();
        Arc::new(CodeRegion::commit(stubs, &StubConfig::default()).unwrap())
    }

    struct RejectAll;

    impl Registrar for RejectAll {
        fn bind(&self, m: &NativeMethod, _: &Arc<CodeRegion>) -> Result<(), RegistrarError> {
            Err(RegistrarError::Rejected {
                name: m.name.clone(),
                reason: "read-only".into(),
            })
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let region = commit_named(&["open", "close"]);
        let table = DispatchTable::new();
        let report = register(&region, &table);
        assert!(report.is_complete());
        assert_eq!(report.bound().len(), 2);

        let bound = table.lookup("open").unwrap();
        assert_eq!(bound.descriptor(), "(I)I");
        assert_eq!(Some(bound.address()), region.address_of("open"));
        assert!(table.lookup("read").is_none());
    }

    #[test]
    fn test_duplicate_rejected_others_unaffected() {
        let table = DispatchTable::new();
        let first = commit_named(&["a"]);
        register(&first, &table);

        let second = commit_named(&["a", "b"]);
        let report = register(&second, &table);
        assert_eq!(report.fallbacks().collect::<Vec<_>>(), ["a"]);
        assert_eq!(report.rejected()[0].1, RegistrarError::Duplicate("a".into()));
        assert_eq!(report.bound()[0].name, "b");

        // "a" still resolves into the first region
        let bound = table.lookup("a").unwrap();
        assert!(Arc::ptr_eq(bound.region(), &first));
    }

    #[test]
    fn test_malformed_bindings() {
        let region = commit_named(&["m"]);
        let table = DispatchTable::new();
        let good = NativeMethod {
            name: "m".into(),
            descriptor: "(I)I".into(),
            address: region.address_of("m").unwrap(),
        };

        let cases = [
            NativeMethod { name: String::new(), ..good.clone() },
            NativeMethod { descriptor: "I".into(), ..good.clone() },
            NativeMethod { descriptor: "(I)".into(), ..good.clone() },
            NativeMethod { address: 0, ..good.clone() },
            NativeMethod { address: region.base() + region.len(), ..good.clone() },
        ];
        for method in &cases {
            assert!(matches!(
                table.bind(method, &region),
                Err(RegistrarError::Malformed { .. })
            ));
        }
        assert!(table.is_empty());
        table.bind(&good, &region).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_custom_registrar_rejects() {
        let region = commit_named(&["x", "y"]);
        let report = register(&region, &RejectAll);
        assert!(!report.is_complete());
        assert_eq!(report.fallbacks().count(), 2);
    }

    #[test]
    fn test_released_region_stops_resolving() {
        let table = DispatchTable::new();
        let region = commit_named(&["gone"]);
        register(&region, &table);
        drop(region);

        assert!(table.lookup("gone").is_none());
        assert_eq!(table.purge(), 1);
        assert!(table.is_empty());

        // the name can be bound again
        let fresh = commit_named(&["gone"]);
        assert!(register(&fresh, &table).is_complete());
    }

    #[test]
    fn test_bind_drops_released_bindings() {
        let table = DispatchTable::new();
        let old = commit_named(&["x", "y"]);
        register(&old, &table);
        drop(old);
        assert_eq!(table.len(), 2);

        let fresh = commit_named(&["z"]);
        assert!(register(&fresh, &table).is_complete());
        assert_eq!(table.len(), 1);
        assert_eq!(table.purge(), 0);
        assert!(table.lookup("z").is_some());
    }

    #[test]
    fn test_guard_keeps_region_alive() {
        let table = DispatchTable::new();
        let region = commit_named(&["held"]);
        register(&region, &table);
        let guard = table.lookup("held").unwrap();
        let weak = Arc::downgrade(&region);
        drop(region);
        assert!(weak.upgrade().is_some());
        drop(guard);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_unbind() {
        let table = DispatchTable::new();
        let region = commit_named(&["u"]);
        register(&region, &table);
        assert!(table.unbind("u"));
        assert!(!table.unbind("u"));
    }
}

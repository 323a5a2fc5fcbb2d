//! Stub compilation units.
//!
//! A compilation unit goes through four stages:
//! 1. [`StubCompiler::can_compile`] classifies each signature.
//! 2. [`StubCompiler::compile`] emits a pending [`Stub`] per eligible one.
//! 3. [`StubCompiler::attach`] commits all pending stubs into one
//!    [`CodeRegion`], which is sealed executable before anything can call it.
//! 4. The same call publishes each final address to a [`Registrar`].
//!
//! The resulting [`StubUnit`] owns the region. Dropping it releases the pages
//! once no [`BoundMethod`] guard is still holding them.

mod region;
mod registry;
mod unit;
mod x64;

pub use region::{CodeRegion, RegionEntry};
pub use registry::{
    register, BoundMethod, DispatchTable, NativeMethod, Registrar, RegistrationReport,
};
pub use unit::{tracker, RegionTracker, StubUnit, UnitId};
pub use x64::{emit, X64StubCompiler};

use callgate_core::{Platform, Signature};

use crate::backend::x64::AssembledCode;
use crate::classify::{Classified, Ineligible};
use crate::config::StubConfig;
use crate::error::StubError;

// =============================================================================
// Requests and pending stubs
// =============================================================================

/// One native function that wants a compiled stub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubRequest {
    /// Method name; unique within a compilation unit.
    pub name: String,
    /// Native signature, excluding the two context arguments.
    pub signature: Signature,
    /// Absolute address of the native function.
    pub address: u64,
    /// Capture the OS error code after the call.
    pub capture_errno: bool,
}

impl StubRequest {
    /// A request with error capture switched on.
    pub fn new(name: impl Into<String>, signature: Signature, address: u64) -> Self {
        Self {
            name: name.into(),
            signature,
            address,
            capture_errno: true,
        }
    }

    /// Switch error capture off.
    pub fn ignore_errno(mut self) -> Self {
        self.capture_errno = false;
        self
    }
}

/// Assembled, not yet relocated stub code.
///
/// The bytes hold zero placeholders where absolute call targets go, so a
/// `Stub` is never runnable on its own. It becomes callable only once a
/// [`CodeRegion`] has copied and relocated it.
#[derive(Debug, Clone)]
pub struct Stub {
    name: String,
    signature: Signature,
    descriptor: String,
    code: AssembledCode,
}

impl Stub {
    pub(crate) fn new(
        name: String,
        signature: Signature,
        descriptor: String,
        code: AssembledCode,
    ) -> Self {
        Self {
            name,
            signature,
            descriptor,
            code,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// JNI-style descriptor handed to the registrar.
    #[inline]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    #[inline]
    pub fn code(&self) -> &AssembledCode {
        &self.code
    }

    /// Code size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.code.len()
    }
}

// =============================================================================
// Compiler interface
// =============================================================================

/// A per-platform stub compiler.
pub trait StubCompiler: Send {
    /// Decide whether `signature` can get a compiled stub.
    fn classify(&self, signature: &Signature) -> Result<Classified, Ineligible>;

    /// Shorthand for a successful [`classify`](Self::classify).
    fn can_compile(&self, signature: &Signature) -> bool {
        self.classify(signature).is_ok()
    }

    /// Emit a pending stub for `request`.
    ///
    /// Only call this for signatures [`can_compile`](Self::can_compile)
    /// accepted; anything else is reported as an internal error.
    fn compile(&mut self, request: &StubRequest) -> Result<(), StubError>;

    /// Stubs compiled since the last attach.
    fn pending(&self) -> &[Stub];

    /// Commit pending stubs and publish them to `registrar`.
    ///
    /// Returns `Ok(None)` when nothing is pending.
    fn attach(&mut self, registrar: &dyn Registrar) -> Result<Option<StubUnit>, StubError>;
}

/// Compiler for platforms without a stub backend. Every signature falls back.
#[derive(Debug, Clone, Copy)]
pub struct NullStubCompiler {
    reason: Ineligible,
}

impl NullStubCompiler {
    /// Reject everything because `platform` has no backend.
    pub fn for_platform(platform: Platform) -> Self {
        Self {
            reason: Ineligible::Platform(platform),
        }
    }

    /// Reject everything because compilation is switched off.
    pub fn disabled() -> Self {
        Self {
            reason: Ineligible::Disabled,
        }
    }
}

impl StubCompiler for NullStubCompiler {
    fn classify(&self, _signature: &Signature) -> Result<Classified, Ineligible> {
        Err(self.reason)
    }

    fn compile(&mut self, request: &StubRequest) -> Result<(), StubError> {
        Err(StubError::Ineligible {
            name: request.name.clone(),
            reason: self.reason,
        })
    }

    fn pending(&self) -> &[Stub] {
        &[]
    }

    fn attach(&mut self, _registrar: &dyn Registrar) -> Result<Option<StubUnit>, StubError> {
        Ok(None)
    }
}

/// Pick the stub compiler for `platform`.
pub fn stub_compiler_for(platform: Platform, config: StubConfig) -> Box<dyn StubCompiler> {
    if !config.enabled {
        tracing::info!("native call stubs disabled by configuration");
        return Box::new(NullStubCompiler::disabled());
    }
    if platform.is_sysv_x86_64() {
        Box::new(X64StubCompiler::new(platform, config))
    } else {
        tracing::debug!(%platform, "no stub backend for platform");
        Box::new(NullStubCompiler::for_platform(platform))
    }
}

//! Runtime compiler for native-call stubs.
//!
//! A stub sits between a managed caller that passes two context words
//! (`env`, `self`) ahead of the real arguments and a plain C function:
//! - Shifts integer arguments into their System V registers
//! - Calls the native function through an absolute, relocated address
//! - Optionally captures `errno` for the calling thread
//! - Sign-extends narrow integer results
//!
//! Stubs for one compilation unit share a page-aligned region that is
//! sealed read+execute before any address is published.
//!
//! ```no_run
//! use callgate_core::{NativeType, Platform, Signature};
//! use callgate_jit::{stub_compiler_for, DispatchTable, StubConfig, StubRequest};
//!
//! extern "C" fn add(a: i32, b: i32) -> i32 { a + b }
//!
//! let mut compiler = stub_compiler_for(Platform::host(), StubConfig::from_env());
//! let sig = Signature::new(NativeType::I32, [NativeType::I32, NativeType::I32]);
//! if compiler.can_compile(&sig) {
//!     compiler.compile(&StubRequest::new("add", sig, add as usize as u64)).unwrap();
//! }
//! let table = DispatchTable::new();
//! let unit = compiler.attach(&table).unwrap();
//! ```
#![deny(unsafe_op_in_unsafe_fn)]

pub mod backend;
pub mod classify;
pub mod config;
pub mod errno;
pub mod error;
pub mod stub;

pub use classify::{classify, ArgKind, Classified, Ineligible, RegisterClass, ReturnKind};
pub use config::StubConfig;
pub use errno::{last_error, save_errno};
pub use error::{RegistrarError, StubError};
pub use stub::{
    emit, register, stub_compiler_for, tracker, BoundMethod, CodeRegion, DispatchTable,
    NativeMethod, NullStubCompiler, RegionEntry, RegionTracker, Registrar, RegistrationReport,
    Stub, StubCompiler, StubRequest, StubUnit, UnitId, X64StubCompiler,
};

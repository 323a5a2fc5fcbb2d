//! Error types for stub compilation, commit, and registration.
//!
//! Ineligible signatures are not errors: they are a classification verdict
//! (see [`crate::classify::Ineligible`]) and simply take the generic path.
//! What remains here splits into two groups:
//!
//! - [`StubError`]: fatal for the compilation unit. Allocation failure is
//!   resource exhaustion; the rest are internal consistency defects.
//! - [`RegistrarError`]: non-fatal and scoped to one stub. The stub is
//!   discarded and its signature falls back.

use std::io;

use callgate_core::NativeType;
use thiserror::Error;

use crate::classify::{Ineligible, RegisterClass};

/// Fatal errors raised while compiling or committing a unit of stubs.
#[derive(Error, Debug)]
pub enum StubError {
    /// Executable pages could not be allocated.
    #[error("cannot allocate {pages} page(s) for {code_size} bytes of stub code")]
    OutOfMemory {
        /// Bytes of code that needed a home, including alignment slack.
        code_size: usize,
        /// Pages requested from the platform.
        pages: usize,
    },

    /// The writable-to-executable transition failed.
    #[error("cannot make stub pages executable: {0}")]
    Protect(#[source] io::Error),

    /// A request the compiler's own classification rejects reached it.
    #[error("stub `{name}` is not eligible for compilation: {reason}")]
    Ineligible {
        /// Stub name.
        name: String,
        /// Why the signature takes the generic path.
        reason: Ineligible,
    },

    /// A type the classifier should have rejected reached the emitter.
    #[error("stub `{name}`: type {ty} has no register class")]
    UnsupportedType {
        /// Stub name.
        name: String,
        /// Offending type.
        ty: NativeType,
    },

    /// More arguments of one class than the native convention has registers.
    #[error("stub `{name}`: {count} {class} arguments exceed the limit of {limit}")]
    TooManyArguments {
        /// Stub name.
        name: String,
        /// Register class that overflowed.
        class: RegisterClass,
        /// Arguments of that class in the signature.
        count: usize,
        /// Register count for that class.
        limit: usize,
    },

    /// Two stubs in one unit share a name.
    #[error("duplicate stub name `{0}` in compilation unit")]
    DuplicateStub(String),
}

impl StubError {
    /// Whether this error reports resource exhaustion rather than a defect.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, StubError::OutOfMemory { .. } | StubError::Protect(_))
    }
}

/// Reasons a registrar refuses to bind a stub.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrarError {
    /// A method with this name is already bound.
    #[error("method `{0}` is already bound")]
    Duplicate(String),

    /// The binding is structurally invalid.
    #[error("malformed binding for `{name}`: {reason}")]
    Malformed {
        /// Method name (may be empty).
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The registrar refused for its own reasons.
    #[error("binding for `{name}` rejected: {reason}")]
    Rejected {
        /// Method name.
        name: String,
        /// Registrar-supplied explanation.
        reason: String,
    },
}

impl RegistrarError {
    /// Name of the method the error refers to.
    pub fn method_name(&self) -> &str {
        match self {
            RegistrarError::Duplicate(name) => name,
            RegistrarError::Malformed { name, .. } | RegistrarError::Rejected { name, .. } => name,
        }
    }
}

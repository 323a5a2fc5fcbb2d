//! Code generation backends for stub compilation.
//!
//! - `x64`: Intel/AMD 64-bit, System V calling convention

pub mod x64;

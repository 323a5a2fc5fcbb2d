//! x64 backend modules.
pub mod assembler;
pub mod encoder;
pub mod memory;
pub mod registers;

pub use assembler::{AssembledCode, Assembler, Reloc};
pub use memory::{ExecutablePages, Protection, WritablePages};
pub use registers::{Gpr, MemOperand, Xmm};

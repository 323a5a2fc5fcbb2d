//! System V x86-64 stub emitter.
//!
//! Generated stub layout:
//!
//! ```text
//! mov rdi, rdx            ; shift integer args past (env, self)
//! mov rsi, rcx
//! mov rdx, r8
//! mov rcx, r9
//! mov r8, [rsp+8]
//! mov r9, [rsp+16]
//! sub rsp, N              ; N = 24 for float returns, 8 otherwise
//! mov rax, <native fn>    ; relocated
//! call rax
//! [mov [rsp], ret         ; only when capturing errno
//!  mov rax, <errno saver> ; relocated
//!  call rax
//!  mov ret, [rsp]]
//! [movsx eax, al|ax]      ; 8/16-bit integer returns
//! add rsp, N
//! ret
//! ```
//!
//! Float arguments are already in `xmm0..xmm7` and stay there.

use std::sync::Arc;

use callgate_core::{CallingConvention, IntWidth, Platform, Signature};
use rustc_hash::FxHashSet;

use super::region::CodeRegion;
use super::registry::Registrar;
use super::unit::StubUnit;
use super::{Stub, StubCompiler, StubRequest};
use crate::backend::x64::registers::{
    ArgSource, CALL_SCRATCH_REG, CONTEXT_INT_ARG_SOURCES, FLOAT_RETURN_REG, INT_RETURN_REG,
    SYSV_INT_ARG_REGS,
};
use crate::backend::x64::{Assembler, Gpr, MemOperand};
use crate::classify::{
    classify, ArgKind, Classified, Ineligible, RegisterClass, ReturnKind, MAX_FLOAT_ARGS,
    MAX_INT_ARGS,
};
use crate::config::StubConfig;
use crate::error::StubError;

/// Stack reserved around the native call when the result is a float.
const FLOAT_RETURN_FRAME: i32 = 24;

/// Stack reserved around the native call otherwise.
const INT_RETURN_FRAME: i32 = 8;

/// Emit a stub for `request`.
///
/// The signature is re-checked here; a platform, convention, type or
/// argument count the classifier would have rejected is an internal error
/// and no code is produced.
pub fn emit(
    request: &StubRequest,
    platform: &Platform,
    errno_saver: u64,
) -> Result<Stub, StubError> {
    let name = &request.name;
    let signature = &request.signature;

    let wrong_target = if !platform.is_sysv_x86_64() {
        Some(Ineligible::Platform(*platform))
    } else if signature.convention() != CallingConvention::Default {
        Some(Ineligible::Convention(signature.convention()))
    } else {
        None
    };
    if let Some(reason) = wrong_target {
        return Err(StubError::Ineligible {
            name: name.clone(),
            reason,
        });
    }

    let ret_slot = signature.ret();
    let ret = ReturnKind::of(&ret_slot, platform).ok_or_else(|| StubError::UnsupportedType {
        name: name.clone(),
        ty: ret_slot.ty,
    })?;

    let (mut int_args, mut float_args) = (0usize, 0usize);
    for param in signature.params() {
        let kind = ArgKind::of(param, platform).ok_or_else(|| StubError::UnsupportedType {
            name: name.clone(),
            ty: param.ty,
        })?;
        match kind.class() {
            RegisterClass::Integer => int_args += 1,
            RegisterClass::Float => float_args += 1,
        }
    }
    check_count(name, RegisterClass::Integer, int_args, MAX_INT_ARGS)?;
    check_count(name, RegisterClass::Float, float_args, MAX_FLOAT_ARGS)?;

    let mut asm = Assembler::new();

    // Must run before the frame is reserved: stack sources are entry-relative.
    for (&dst, &src) in SYSV_INT_ARG_REGS.iter().zip(&CONTEXT_INT_ARG_SOURCES).take(int_args) {
        match src {
            ArgSource::Reg(reg) => asm.mov_rr(dst, reg),
            ArgSource::Stack(offset) => asm.mov_rm(dst, MemOperand::base_disp(Gpr::Rsp, offset)),
        }
    }

    let frame = if ret.is_float() {
        FLOAT_RETURN_FRAME
    } else {
        INT_RETURN_FRAME
    };
    asm.sub_ri(Gpr::Rsp, frame);
    asm.mov_abs(CALL_SCRATCH_REG, request.address);
    asm.call_r(CALL_SCRATCH_REG);

    if request.capture_errno {
        let slot = MemOperand::base(Gpr::Rsp);
        match ret {
            ReturnKind::F32 => asm.movss_mr(slot, FLOAT_RETURN_REG),
            ReturnKind::F64 => asm.movsd_mr(slot, FLOAT_RETURN_REG),
            ReturnKind::Int(_) => asm.mov_mr(slot, INT_RETURN_REG),
            ReturnKind::Void => {}
        }
        asm.mov_abs(CALL_SCRATCH_REG, errno_saver);
        asm.call_r(CALL_SCRATCH_REG);
        match ret {
            ReturnKind::F32 => asm.movss_rm(FLOAT_RETURN_REG, slot),
            ReturnKind::F64 => asm.movsd_rm(FLOAT_RETURN_REG, slot),
            ReturnKind::Int(_) => asm.mov_rm(INT_RETURN_REG, slot),
            ReturnKind::Void => {}
        }
    }

    match ret {
        ReturnKind::Int(IntWidth::W8) => asm.movsx_rb32(INT_RETURN_REG, INT_RETURN_REG),
        ReturnKind::Int(IntWidth::W16) => asm.movsx_rw32(INT_RETURN_REG, INT_RETURN_REG),
        _ => {}
    }

    asm.add_ri(Gpr::Rsp, frame);
    asm.ret();

    let code = asm.finish();
    tracing::debug!(
        stub = %name,
        %signature,
        size = code.len(),
        ints = int_args,
        floats = float_args,
        errno = request.capture_errno,
        "emitted stub"
    );
    Ok(Stub::new(
        name.clone(),
        signature.clone(),
        signature.descriptor(platform),
        code,
    ))
}

fn check_count(
    name: &str,
    class: RegisterClass,
    count: usize,
    limit: usize,
) -> Result<(), StubError> {
    if count > limit {
        return Err(StubError::TooManyArguments {
            name: name.to_owned(),
            class,
            count,
            limit,
        });
    }
    Ok(())
}

// =============================================================================
// Compiler
// =============================================================================

/// Stub compiler for System V x86-64 hosts.
#[derive(Debug)]
pub struct X64StubCompiler {
    platform: Platform,
    config: StubConfig,
    pending: Vec<Stub>,
    names: FxHashSet<String>,
}

impl X64StubCompiler {
    /// Create a compiler for `platform`.
    pub fn new(platform: Platform, config: StubConfig) -> Self {
        Self {
            platform,
            config,
            pending: Vec::new(),
            names: FxHashSet::default(),
        }
    }

    /// Compiler for the running process, configured from the environment.
    pub fn host() -> Self {
        Self::new(Platform::host(), StubConfig::from_env())
    }

    #[inline]
    pub fn config(&self) -> &StubConfig {
        &self.config
    }

    fn abort_unit(&mut self) {
        self.pending.clear();
        self.names.clear();
    }
}

impl StubCompiler for X64StubCompiler {
    fn classify(&self, signature: &Signature) -> Result<Classified, Ineligible> {
        if !self.config.enabled {
            return Err(Ineligible::Disabled);
        }
        classify(signature, &self.platform)
    }

    fn compile(&mut self, request: &StubRequest) -> Result<(), StubError> {
        if self.names.contains(&request.name) {
            return Err(StubError::DuplicateStub(request.name.clone()));
        }
        let emitted = if self.config.enabled {
            emit(request, &self.platform, self.config.errno_saver)
        } else {
            Err(StubError::Ineligible {
                name: request.name.clone(),
                reason: Ineligible::Disabled,
            })
        };
        match emitted {
            Ok(stub) => {
                self.names.insert(request.name.clone());
                self.pending.push(stub);
                Ok(())
            }
            Err(err) => {
                tracing::error!(
                    stub = %request.name,
                    discarded = self.pending.len(),
                    error = %err,
                    "stub compilation failed; aborting unit"
                );
                self.abort_unit();
                Err(err)
            }
        }
    }

    fn pending(&self) -> &[Stub] {
        &self.pending
    }

    fn attach(&mut self, registrar: &dyn Registrar) -> Result<Option<StubUnit>, StubError> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let stubs = std::mem::take(&mut self.pending);
        self.names.clear();
        let region = Arc::new(CodeRegion::commit(stubs, &self.config)?);
        Ok(Some(StubUnit::attach(region, registrar)))
    }
}

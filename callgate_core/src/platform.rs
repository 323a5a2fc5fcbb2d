//! Description of the native platform stubs are compiled for.
//!
//! The classifier only needs a handful of facts: which CPU and OS the code
//! will run on (to pick the calling convention) and how wide native
//! addresses and C `long` are.

use std::fmt;

// =============================================================================
// CPU / OS
// =============================================================================

/// CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cpu {
    /// AMD64 / Intel 64.
    X86_64,
    /// 32-bit x86.
    X86,
    /// ARM AArch64.
    Aarch64,
    /// Anything else.
    Other,
}

impl Cpu {
    /// CPU of the running process.
    pub const fn host() -> Self {
        if cfg!(target_arch = "x86_64") {
            Cpu::X86_64
        } else if cfg!(target_arch = "x86") {
            Cpu::X86
        } else if cfg!(target_arch = "aarch64") {
            Cpu::Aarch64
        } else {
            Cpu::Other
        }
    }
}

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    /// Linux.
    Linux,
    /// macOS / Darwin.
    MacOs,
    /// FreeBSD and friends.
    FreeBsd,
    /// Microsoft Windows.
    Windows,
    /// Anything else.
    Other,
}

impl Os {
    /// OS of the running process.
    pub const fn host() -> Self {
        if cfg!(target_os = "linux") {
            Os::Linux
        } else if cfg!(target_os = "macos") {
            Os::MacOs
        } else if cfg!(any(target_os = "freebsd", target_os = "openbsd", target_os = "netbsd")) {
            Os::FreeBsd
        } else if cfg!(target_os = "windows") {
            Os::Windows
        } else {
            Os::Other
        }
    }
}

// =============================================================================
// Platform
// =============================================================================

/// Native platform facts consumed by the type classifier and marshalers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    cpu: Cpu,
    os: Os,
    address_bits: usize,
    long_bits: usize,
}

impl Platform {
    /// Describe an arbitrary platform.
    pub const fn new(cpu: Cpu, os: Os, address_bits: usize, long_bits: usize) -> Self {
        Self {
            cpu,
            os,
            address_bits,
            long_bits,
        }
    }

    /// The platform of the running process.
    pub const fn host() -> Self {
        let os = Os::host();
        let address_bits = usize::BITS as usize;
        // LLP64: Windows keeps `long` at 32 bits on 64-bit targets.
        let long_bits = match os {
            Os::Windows => 32,
            _ => address_bits,
        };
        Self::new(Cpu::host(), os, address_bits, long_bits)
    }

    /// CPU architecture.
    #[inline]
    pub const fn cpu(&self) -> Cpu {
        self.cpu
    }

    /// Operating system.
    #[inline]
    pub const fn os(&self) -> Os {
        self.os
    }

    /// Width of a native address in bits.
    #[inline]
    pub const fn address_bits(&self) -> usize {
        self.address_bits
    }

    /// Width of a native address in bytes.
    #[inline]
    pub const fn address_size(&self) -> usize {
        self.address_bits / 8
    }

    /// Width of C `long` in bits.
    #[inline]
    pub const fn long_bits(&self) -> usize {
        self.long_bits
    }

    /// Width of C `long` in bytes.
    #[inline]
    pub const fn long_size(&self) -> usize {
        self.long_bits / 8
    }

    /// Whether native calls follow the System V AMD64 convention.
    #[inline]
    pub const fn is_sysv_x86_64(&self) -> bool {
        matches!(self.cpu, Cpu::X86_64) && !matches!(self.os, Os::Windows) && self.address_bits == 64
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}-{:?} (ptr {} bits, long {} bits)",
            self.cpu, self.os, self.address_bits, self.long_bits
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_widths_match_target() {
        let host = Platform::host();
        assert_eq!(host.address_size(), std::mem::size_of::<usize>());
        assert_eq!(host.long_size(), std::mem::size_of::<std::ffi::c_long>());
    }

    #[test]
    fn test_sysv_detection() {
        assert!(Platform::new(Cpu::X86_64, Os::Linux, 64, 64).is_sysv_x86_64());
        assert!(Platform::new(Cpu::X86_64, Os::MacOs, 64, 64).is_sysv_x86_64());
        assert!(!Platform::new(Cpu::X86_64, Os::Windows, 64, 32).is_sysv_x86_64());
        assert!(!Platform::new(Cpu::Aarch64, Os::Linux, 64, 64).is_sysv_x86_64());
        assert!(!Platform::new(Cpu::X86, Os::Linux, 32, 32).is_sysv_x86_64());
    }
}

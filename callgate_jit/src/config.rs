//! Stub compiler configuration.
//!
//! Defaults suit every supported host; the environment can only switch the
//! fast path off.

use crate::backend::x64::memory;
use crate::errno;

/// Environment variable that can disable compiled stubs.
pub const STUBS_ENV_VAR: &str = "CALLGATE_STUBS";

/// Configuration for stub compilation and commit.
///
/// # Example
///
/// ```
/// use callgate_jit::StubConfig;
///
/// let config = StubConfig {
///     page_size: Some(16 * 1024),
///     ..Default::default()
/// };
/// assert_eq!(config.effective_page_size(), 16 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Master switch. When off every signature is reported ineligible.
    ///
    /// Default: true
    pub enabled: bool,

    /// Alignment of each stub's entry point inside its region.
    ///
    /// Must be a power of two. Each stub also reserves this many bytes of
    /// slack when the region is sized.
    ///
    /// Default: 8
    pub stub_alignment: usize,

    /// Address of the routine error-capturing stubs call after the native
    /// function returns.
    ///
    /// Default: [`errno::save_errno`]
    pub errno_saver: u64,

    /// Page size override. `None` asks the operating system.
    ///
    /// Default: None
    pub page_size: Option<usize>,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stub_alignment: 8,
            errno_saver: errno::save_errno_address(),
            page_size: None,
        }
    }
}

impl StubConfig {
    /// Default configuration adjusted by `CALLGATE_STUBS`.
    ///
    /// `0`, `false`, `off` and `no` (any case) disable compiled stubs. Any
    /// other value, or an unset variable, leaves them on.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(enabled) = Self::env_switch(STUBS_ENV_VAR) {
            config.enabled = enabled;
        }
        tracing::debug!(enabled = config.enabled, "resolved stub configuration");
        config
    }

    /// Page size used when sizing regions.
    pub fn effective_page_size(&self) -> usize {
        self.page_size.filter(|&p| p > 0).unwrap_or_else(memory::page_size)
    }

    /// Alignment actually applied, never below one byte.
    #[inline]
    pub fn alignment(&self) -> usize {
        self.stub_alignment.max(1).next_power_of_two()
    }

    fn env_switch(var: &str) -> Option<bool> {
        std::env::var(var).ok().map(|v| parse_switch(&v))
    }
}

fn parse_switch(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "off" | "no"
    )
}

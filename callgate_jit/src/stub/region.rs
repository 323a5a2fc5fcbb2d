//! Committed stub code.
//!
//! A [`CodeRegion`] is created from a batch of pending stubs in one step:
//! size, allocate writable pages, copy and relocate every stub at its final
//! address, then seal the pages executable. Nothing outside this module ever
//! sees the writable state.

use callgate_core::Signature;
use rustc_hash::FxHashMap;

use super::Stub;
use crate::backend::x64::memory::{pages_for, ExecutablePages, Protection, WritablePages};
use crate::config::StubConfig;
use crate::error::StubError;

/// Placement of one stub inside a region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionEntry {
    name: String,
    signature: Signature,
    descriptor: String,
    offset: usize,
    size: usize,
}

impl RegionEntry {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    /// Byte offset from the region base.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }
}

/// Executable pages holding every stub of one compilation unit.
#[derive(Debug)]
pub struct CodeRegion {
    pages: ExecutablePages,
    page_size: usize,
    entries: Vec<RegionEntry>,
    by_name: FxHashMap<String, usize>,
}

impl CodeRegion {
    /// Place `stubs` into fresh pages and make them executable.
    ///
    /// Each stub starts at an offset aligned to `config.alignment()`, and the
    /// region is sized as the sum of stub sizes plus one alignment slot per
    /// stub, rounded up to whole pages.
    pub fn commit(stubs: Vec<Stub>, config: &StubConfig) -> Result<Self, StubError> {
        let align = config.alignment();
        let page_size = config.effective_page_size();
        let code_size: usize = stubs.iter().map(|s| s.size() + align).sum();
        let page_count = pages_for(code_size, page_size);

        let mut writable = WritablePages::allocate(page_count, page_size).ok_or(
            StubError::OutOfMemory {
                code_size,
                pages: page_count,
            },
        )?;

        let base = writable.base();
        let mut entries = Vec::with_capacity(stubs.len());
        let mut by_name = FxHashMap::default();
        {
            let buf = writable.as_mut_slice();
            let mut offset = 0usize;
            for stub in stubs {
                offset = offset.next_multiple_of(align);
                let size = stub.size();
                stub.code()
                    .relocate_into(&mut buf[offset..offset + size], (base + offset) as u64);
                if by_name.insert(stub.name.clone(), entries.len()).is_some() {
                    return Err(StubError::DuplicateStub(stub.name));
                }
                entries.push(RegionEntry {
                    name: stub.name,
                    signature: stub.signature,
                    descriptor: stub.descriptor,
                    offset,
                    size,
                });
                offset += size;
            }
        }

        let pages = writable.seal().map_err(StubError::Protect)?;
        tracing::info!(
            base = format_args!("{:#x}", pages.base()),
            pages = page_count,
            stubs = entries.len(),
            bytes = code_size,
            "committed stub region"
        );

        Ok(Self {
            pages,
            page_size,
            entries,
            by_name,
        })
    }

    /// Base address of the region.
    #[inline]
    pub fn base(&self) -> usize {
        self.pages.base()
    }

    /// Region size in bytes, whole pages included.
    #[inline]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Whether the region spans no bytes. Never true for a committed region;
    /// use [`entries`](Self::entries) to count stubs.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.pages.len() / self.page_size
    }

    /// Always [`Protection::Executable`]; regions are sealed on creation.
    #[inline]
    pub fn protection(&self) -> Protection {
        self.pages.protection()
    }

    /// Stubs in placement order.
    #[inline]
    pub fn entries(&self) -> &[RegionEntry] {
        &self.entries
    }

    /// Look up a stub by name.
    pub fn entry(&self, name: &str) -> Option<&RegionEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    /// Final entry address of a stub.
    pub fn address_of(&self, name: &str) -> Option<usize> {
        self.entry(name).map(|e| self.base() + e.offset)
    }

    /// Relocated code of a stub.
    pub fn code_of(&self, name: &str) -> Option<&[u8]> {
        self.entry(name)
            .map(|e| &self.pages.as_slice()[e.offset..e.offset + e.size])
    }

    /// Whether `addr` points into this region.
    #[inline]
    pub fn contains(&self, addr: usize) -> bool {
        self.pages.contains(addr)
    }

    /// Name of the stub whose code covers `addr`.
    pub fn stub_at(&self, addr: usize) -> Option<&RegionEntry> {
        let rel = addr.checked_sub(self.base())?;
        self.entries
            .iter()
            .find(|e| rel >= e.offset && rel < e.offset + e.size)
    }

    /// Typed entry point of a stub.
    ///
    /// # Safety
    /// `F` must be an `extern "C"` function pointer whose parameters are two
    /// pointer-sized context words followed by the stub's signature. The
    /// pointer must not be called after the region is dropped.
    pub unsafe fn as_fn<F: Copy>(&self, name: &str) -> Option<F> {
        let entry = self.entry(name)?;
        Some(unsafe { self.pages.as_fn_at(entry.offset) })
    }

    /// # Safety
    /// As [`as_fn`](Self::as_fn), with `offset` the start of a stub.
    pub(crate) unsafe fn fn_at<F: Copy>(&self, offset: usize) -> F {
        unsafe { self.pages.as_fn_at(offset) }
    }
}

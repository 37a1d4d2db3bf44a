use std::{ptr::NonNull, slice};

use crate::{
    config::{HeapConfig, PAGE_SIZE},
    error::{HeapError, HeapResult},
    kernel,
};

/// One contiguous, byte addressable region that grows by whole
/// [`PAGE_SIZE`] pages and never shrinks.
///
/// The full `max_pages` range is reserved up front and only the first `pages`
/// are committed, so the base address never changes:
///
/// ```text
/// base                      base + size              base + reserved
///  |                             |                          |
///  +-----------------------------+--------------------------+
///  |   committed (read/write)    |   reserved (no access)   |
///  +-----------------------------+--------------------------+
///  |<--------- pages ---------->|
/// ```
pub struct AddressSpace {
    base: NonNull<u8>,
    /// Committed pages.
    pages: u32,
    /// Reserved pages, the growth limit.
    max_pages: u32,
}

impl AddressSpace {
    pub fn new(config: &HeapConfig) -> HeapResult<Self> {
        config.validate()?;

        if PAGE_SIZE % kernel::page_size() != 0 {
            return Err(HeapError::InvalidConfig(format!(
                "OS page size {} does not divide the heap page size {}",
                kernel::page_size(),
                PAGE_SIZE
            )));
        }

        let reserved = config.max_bytes();
        let base = unsafe { kernel::reserve(reserved) }
            .ok_or(HeapError::ReserveFailed { bytes: reserved })?;

        let mut space = Self {
            base,
            pages: 0,
            max_pages: config.max_pages,
        };
        space.grow(config.initial_pages)?;

        Ok(space)
    }

    /// Commits `pages` more pages at the end of the space. Returns the
    /// previous size in bytes, which is the offset of the first new byte.
    pub fn grow(&mut self, pages: u32) -> HeapResult<usize> {
        let old_size = self.size();

        if pages == 0 {
            return Ok(old_size);
        }

        if pages > self.max_pages - self.pages {
            tracing::warn!(
                requested = pages,
                committed = self.pages,
                max = self.max_pages,
                "address space growth refused"
            );
            return Err(HeapError::GrowthFailed {
                pages,
                reason: "reservation exhausted",
            });
        }

        let len = pages as usize * PAGE_SIZE;
        let committed = unsafe {
            let start = NonNull::new_unchecked(self.base.as_ptr().add(old_size));
            kernel::commit(start, len)
        };

        if !committed {
            tracing::warn!(requested = pages, "kernel refused to commit pages");
            return Err(HeapError::GrowthFailed {
                pages,
                reason: "commit syscall failed",
            });
        }

        self.pages += pages;
        tracing::debug!(added = pages, pages = self.pages, "address space grown");

        Ok(old_size)
    }

    /// Committed size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.pages as usize * PAGE_SIZE
    }

    #[inline]
    pub fn pages(&self) -> u32 {
        self.pages
    }

    #[inline]
    pub fn max_pages(&self) -> u32 {
        self.max_pages
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        // The first `size()` bytes are committed and only reachable through
        // this struct.
        unsafe { slice::from_raw_parts(self.base.as_ptr(), self.size()) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.base.as_ptr(), self.size()) }
    }

    #[inline]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.as_slice()[offset..offset + 4]);
        u32::from_le_bytes(word)
    }

    #[inline]
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.as_mut_slice()[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        unsafe { kernel::release(self.base, self.max_pages as usize * PAGE_SIZE) }
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("base", &self.base)
            .field("pages", &self.pages)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_initial_pages_zeroed() {
        let space = AddressSpace::new(&HeapConfig::new(2, 4)).unwrap();

        assert_eq!(space.pages(), 2);
        assert_eq!(space.size(), 2 * PAGE_SIZE);
        assert!(space.as_slice().iter().all(|b| *b == 0));
    }

    #[test]
    fn grow_keeps_contents_and_reports_old_end() {
        let mut space = AddressSpace::new(&HeapConfig::new(1, 4)).unwrap();
        space.write_u32(PAGE_SIZE - 4, 0xDEAD_BEEF);

        let old_end = space.grow(2).unwrap();

        assert_eq!(old_end, PAGE_SIZE);
        assert_eq!(space.pages(), 3);
        assert_eq!(space.read_u32(PAGE_SIZE - 4), 0xDEAD_BEEF);
        assert_eq!(space.read_u32(3 * PAGE_SIZE - 4), 0);
    }

    #[test]
    fn grow_past_reservation_fails() {
        let mut space = AddressSpace::new(&HeapConfig::new(1, 2)).unwrap();

        assert!(matches!(space.grow(2), Err(HeapError::GrowthFailed { pages: 2, .. })));
        assert_eq!(space.pages(), 1);
        assert!(space.grow(1).is_ok());
        assert!(space.grow(1).is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(
            AddressSpace::new(&HeapConfig::new(0, 1)),
            Err(HeapError::InvalidConfig(_))
        ));
    }
}

use crate::error::{HeapError, HeapResult};

/// Growth granularity of the address space: 64 KiB, same as a wasm page.
pub const PAGE_SIZE: usize = 64 * 1024;

/// Largest page count whose byte size still fits a 32-bit offset.
pub const MAX_ADDRESSABLE_PAGES: u32 = (u32::MAX as usize / PAGE_SIZE) as u32;

pub const DEFAULT_INITIAL_PAGES: u32 = 1;
pub const DEFAULT_MAX_PAGES: u32 = 16 * 1024;

const INITIAL_PAGES_VAR: &str = "LINHEAP_INITIAL_PAGES";
const MAX_PAGES_VAR: &str = "LINHEAP_MAX_PAGES";

/// Sizing of a [`crate::Heap`]'s address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Pages committed when the heap is created (default: 1)
    pub initial_pages: u32,

    /// Upper bound for the address space, reserved up front (default: 16384, 1 GiB)
    pub max_pages: u32,
}

impl HeapConfig {
    pub fn new(initial_pages: u32, max_pages: u32) -> Self {
        Self {
            initial_pages,
            max_pages,
        }
    }

    /// Defaults overridden by `LINHEAP_INITIAL_PAGES` and `LINHEAP_MAX_PAGES`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`HeapConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(pages) = env_pages(&lookup, INITIAL_PAGES_VAR) {
            config.initial_pages = pages;
        }
        if let Some(pages) = env_pages(&lookup, MAX_PAGES_VAR) {
            config.max_pages = pages;
        }

        config
    }

    pub fn validate(&self) -> HeapResult<()> {
        if self.initial_pages == 0 {
            return Err(HeapError::InvalidConfig(
                "initial_pages must be at least 1".to_string(),
            ));
        }
        if self.initial_pages > self.max_pages {
            return Err(HeapError::InvalidConfig(format!(
                "initial_pages ({}) exceeds max_pages ({})",
                self.initial_pages, self.max_pages
            )));
        }
        if self.max_pages > MAX_ADDRESSABLE_PAGES {
            return Err(HeapError::InvalidConfig(format!(
                "max_pages ({}) exceeds the 32-bit limit of {} pages",
                self.max_pages, MAX_ADDRESSABLE_PAGES
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn max_bytes(&self) -> usize {
        self.max_pages as usize * PAGE_SIZE
    }
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_PAGES, DEFAULT_MAX_PAGES)
    }
}

fn env_pages(lookup: impl Fn(&str) -> Option<String>, key: &str) -> Option<u32> {
    let value = lookup(key)?;
    match value.trim().parse() {
        Ok(pages) => Some(pages),
        Err(_) => {
            tracing::warn!(key, value = %value, "ignoring unparseable page count");
            None
        }
    }
}

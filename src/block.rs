use crate::addr::Addr;

/// Every payload size is a multiple of this, which frees the low bit of the
/// size for the `is_free` flag.
pub(crate) const ALIGNMENT: usize = 4;

/// Size of the header, and of the footer, of a block.
pub(crate) const TAG_SIZE: u32 = 4;

/// Bytes a block costs on top of its payload. A split only happens when the
/// leftover is strictly larger than this.
pub(crate) const BLOCK_OVERHEAD: u32 = 2 * TAG_SIZE;

const FREE_BIT: u32 = 1;

/// This is the structure of a block. The header and the footer hold the same
/// tag, so the heap can be walked in both directions: forwards by adding the
/// size to the header, backwards by reading the footer right before a header.
///
/// ```text
/// +---------------------+ <------ start
/// | payload_size | free |         -> Header (4 bytes)
/// +---------------------+ <------ payload (returned to the user)
/// |       Content       |
/// |         ...         |         -> payload_size bytes
/// |                     |
/// +---------------------+ <------ footer
/// | payload_size | free |         -> Footer (4 bytes)
/// +---------------------+ <------ end (start of the next block)
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Block {
    /// Offset of the header.
    pub start: u32,
    /// Payload size, a multiple of [`ALIGNMENT`].
    pub size: u32,
    /// Flag to tell whether the block is free or not.
    pub is_free: bool,
}

impl Block {
    #[inline]
    pub fn new(start: u32, size: u32, is_free: bool) -> Self {
        Self { start, size, is_free }
    }

    /// Decodes the tag found at `start`.
    #[inline]
    pub(crate) fn from_tag(start: u32, tag: u32) -> Self {
        Self {
            start,
            size: tag & !FREE_BIT,
            is_free: tag & FREE_BIT != 0,
        }
    }

    #[inline]
    pub(crate) fn tag(&self) -> u32 {
        self.size | self.is_free as u32
    }

    #[inline]
    pub fn payload(&self) -> Addr {
        Addr::new(self.start + TAG_SIZE)
    }

    #[inline]
    pub(crate) fn footer(&self) -> u32 {
        self.start + TAG_SIZE + self.size
    }

    /// Offset right after the footer.
    #[inline]
    pub fn end(&self) -> u32 {
        self.start + BLOCK_OVERHEAD + self.size
    }

    /// Header to footer, inclusive.
    #[inline]
    pub fn total_size(&self) -> u32 {
        self.size + BLOCK_OVERHEAD
    }

    /// Block whose payload starts at `payload`, before its tag is read.
    #[inline]
    pub(crate) fn start_of(payload: Addr) -> u32 {
        payload.get() - TAG_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_packs_free_bit() {
        let block = Block::new(0, 16, true);
        assert_eq!(block.tag(), 17);
        assert_eq!(Block::from_tag(0, 17), block);
        assert_eq!(Block::from_tag(8, 16), Block::new(8, 16, false));
    }

    #[test]
    fn geometry() {
        let block = Block::new(24, 12, false);
        assert_eq!(block.payload(), Addr::new(28));
        assert_eq!(block.footer(), 40);
        assert_eq!(block.end(), 44);
        assert_eq!(block.total_size(), 20);
        assert_eq!(Block::start_of(block.payload()), 24);
    }
}

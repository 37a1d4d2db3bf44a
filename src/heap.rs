use std::cmp;

use crate::{
    addr::Addr,
    block::{ALIGNMENT, BLOCK_OVERHEAD, Block, TAG_SIZE},
    config::{HeapConfig, PAGE_SIZE},
    error::{HeapError, HeapResult},
    space::AddressSpace,
    utils::{align, div_ceil},
};

/// The allocator. It owns an [`AddressSpace`] and keeps it partitioned into
/// boundary-tagged [`Block`]s with no gaps:
///
/// ```text
/// 0                                                               size
/// +----+---------+----+----+------------+----+----+---------------+----+
/// | H  | payload | F  | H  |  payload   | F  | H  |   payload     | F  |
/// +----+---------+----+----+------------+----+----+---------------+----+
///      ^ first payload is always at offset 4
/// ```
///
/// Allocation is first-fit, scanning from the base. Freed blocks are merged
/// with their free neighbours immediately, so two adjacent blocks are never
/// both free.
///
/// Every container in this crate gets its memory from here and never touches
/// the address space directly.
#[derive(Debug)]
pub struct Heap {
    space: AddressSpace,
}

/// Free neighbours of a block that has just been marked free. Coalescing is a
/// function of this state alone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Adjacency {
    /// Neither neighbour is free (or there is none).
    Isolated,
    /// Only the preceding block is free.
    Left(Block),
    /// Only the following block is free.
    Right(Block),
    /// Both neighbours are free.
    Both(Block, Block),
}

/// Snapshot of the block partitioning.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    /// Address space size in bytes.
    pub size: usize,
    pub blocks: usize,
    pub free_blocks: usize,
    /// Sum of free payloads.
    pub free_bytes: usize,
    /// Sum of allocated payloads.
    pub used_bytes: usize,
    /// Largest free payload, the biggest request served without growing.
    pub largest_free: usize,
}

impl HeapStats {
    /// Bytes spent on headers and footers.
    pub fn overhead_bytes(&self) -> usize {
        self.blocks * BLOCK_OVERHEAD as usize
    }
}

impl Heap {
    /// Creates the address space described by `config` and formats it as a
    /// single free block.
    pub fn new(config: HeapConfig) -> HeapResult<Self> {
        let space = AddressSpace::new(&config)?;
        let mut heap = Self { space };
        heap.init();

        Ok(heap)
    }

    pub fn with_defaults() -> HeapResult<Self> {
        Self::new(HeapConfig::default())
    }

    /// Marks the entire address space as one free block. Any outstanding
    /// allocation is forgotten.
    pub fn init(&mut self) {
        let size = self.space.size() as u32;
        self.write_block(Block::new(0, size - BLOCK_OVERHEAD, true));

        tracing::debug!(size, "heap initialized");
    }

    /// Grows the address space by `pages` pages and hands the new region to
    /// the allocator, merged with the trailing block if that one is free.
    pub fn extend(&mut self, pages: u32) -> HeapResult<()> {
        if pages == 0 {
            return Ok(());
        }

        let old_end = self.space.grow(pages)? as u32;
        let added = pages * PAGE_SIZE as u32;

        let block = Block::new(old_end, added - BLOCK_OVERHEAD, true);
        self.write_block(block);
        self.coalesce(block);

        Ok(())
    }

    /// Returns the payload of a block of at least `bytes` bytes, rounded up to
    /// a multiple of 4.
    ///
    /// If no free block fits, the address space grows by the fewest pages
    /// that can hold the request and the search runs once more.
    pub fn acquire(&mut self, bytes: usize) -> HeapResult<Addr> {
        let size = Self::payload_for(bytes)?;

        if let Some(block) = self.find_free_block(size) {
            let ptr = self.carve(block, size);
            tracing::trace!(bytes, ptr = ptr.get(), "acquire");
            return Ok(ptr);
        }

        let pages = div_ceil(size as usize + BLOCK_OVERHEAD as usize, PAGE_SIZE) as u32;
        self.extend(pages)?;

        match self.find_free_block(size) {
            Some(block) => {
                let ptr = self.carve(block, size);
                tracing::trace!(bytes, ptr = ptr.get(), grown = pages, "acquire");
                Ok(ptr)
            }
            None => Err(HeapError::OutOfMemory { requested: bytes }),
        }
    }

    /// Gives the block owning `ptr` back and merges it with its free
    /// neighbours. Releasing [`Addr::NULL`] does nothing.
    pub fn release(&mut self, ptr: Addr) {
        if ptr.is_null() {
            return;
        }

        let block = Block {
            is_free: true,
            ..self.block_of(ptr)
        };
        self.write_block(block);
        let merged = self.coalesce(block);

        tracing::trace!(ptr = ptr.get(), merged_size = merged.size, "release");
    }

    /// Makes the block at `ptr` hold at least `bytes` bytes.
    ///
    /// Blocks never shrink: a request that already fits returns `ptr` as is.
    /// Otherwise the following block is absorbed when it is free and large
    /// enough, and only as a last resort the payload moves to a new block.
    /// A null `ptr` behaves like [`Heap::acquire`].
    pub fn resize(&mut self, ptr: Addr, bytes: usize) -> HeapResult<Addr> {
        if ptr.is_null() {
            return self.acquire(bytes);
        }

        let block = self.block_of(ptr);
        let size = Self::payload_for(bytes)?;

        if size <= block.size {
            return Ok(ptr);
        }

        if let Some(next) = self.next_block(block).filter(|b| b.is_free) {
            let available = block.size + BLOCK_OVERHEAD + next.size;
            if available >= size {
                self.split(block.start, available, size);
                tracing::trace!(ptr = ptr.get(), bytes, "resize in place");
                return Ok(ptr);
            }
        }

        let moved = self.acquire(bytes)?;
        self.copy_bytes(moved, ptr, block.size as usize);
        self.release(ptr);

        tracing::trace!(from = ptr.get(), to = moved.get(), bytes, "resize moved");
        Ok(moved)
    }

    /// Copies `len` bytes front to back. The ranges are expected not to
    /// overlap, use [`Heap::move_bytes`] when they might.
    pub fn copy_bytes(&mut self, dst: Addr, src: Addr, len: usize) {
        let bytes = self.space.as_mut_slice();
        let (dst, src) = (dst.as_usize(), src.as_usize());

        for i in 0..len {
            bytes[dst + i] = bytes[src + i];
        }
    }

    /// Copies `len` bytes, correct for overlapping ranges.
    pub fn move_bytes(&mut self, dst: Addr, src: Addr, len: usize) {
        let src = src.as_usize();
        self.space
            .as_mut_slice()
            .copy_within(src..src + len, dst.as_usize());
    }

    pub fn zero_bytes(&mut self, dst: Addr, len: usize) {
        self.bytes_mut(dst, len).fill(0);
    }

    /// Read-only view of `len` bytes at `ptr`.
    #[inline]
    pub fn bytes(&self, ptr: Addr, len: usize) -> &[u8] {
        &self.space.as_slice()[ptr.as_usize()..ptr.as_usize() + len]
    }

    /// Mutable view of `len` bytes at `ptr`. While it lives the heap is
    /// borrowed, so nothing can move the memory underneath it.
    #[inline]
    pub fn bytes_mut(&mut self, ptr: Addr, len: usize) -> &mut [u8] {
        &mut self.space.as_mut_slice()[ptr.as_usize()..ptr.as_usize() + len]
    }

    #[inline]
    pub fn read_u32(&self, ptr: Addr) -> u32 {
        self.space.read_u32(ptr.as_usize())
    }

    #[inline]
    pub fn write_u32(&mut self, ptr: Addr, value: u32) {
        self.space.write_u32(ptr.as_usize(), value)
    }

    #[inline]
    pub(crate) fn read_addr(&self, ptr: Addr) -> Addr {
        Addr::new(self.read_u32(ptr))
    }

    #[inline]
    pub(crate) fn write_addr(&mut self, ptr: Addr, value: Addr) {
        self.write_u32(ptr, value.get())
    }

    /// Payload size of the block at `ptr`. May exceed what was requested.
    pub fn payload_size(&self, ptr: Addr) -> usize {
        self.block_of(ptr).size as usize
    }

    /// Address space size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.space.size()
    }

    #[inline]
    pub fn pages(&self) -> u32 {
        self.space.pages()
    }

    /// Every block, from the base upwards.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks { heap: self, next: 0 }
    }

    pub fn stats(&self) -> HeapStats {
        self.blocks().fold(
            HeapStats {
                size: self.size(),
                ..HeapStats::default()
            },
            |mut stats, block| {
                let size = block.size as usize;
                stats.blocks += 1;
                if block.is_free {
                    stats.free_blocks += 1;
                    stats.free_bytes += size;
                    stats.largest_free = cmp::max(stats.largest_free, size);
                } else {
                    stats.used_bytes += size;
                }
                stats
            },
        )
    }

    /// Walks the whole heap and verifies that header and footer agree, that
    /// no two adjacent blocks are free and that the blocks cover the address
    /// space exactly. Returns the offset of the first bad block.
    pub fn check(&self) -> HeapResult<()> {
        let size = self.size();
        let mut start = 0u32;
        let mut prev_free = false;

        while (start as usize) < size {
            let block = self.block_at(start);

            if block.end() as usize > size || block.size as usize % ALIGNMENT != 0 {
                return Err(HeapError::CorruptionDetected(start));
            }
            if self.space.read_u32(block.footer() as usize) != block.tag() {
                return Err(HeapError::CorruptionDetected(start));
            }
            if prev_free && block.is_free {
                return Err(HeapError::CorruptionDetected(start));
            }

            prev_free = block.is_free;
            start = block.end();
        }

        Ok(())
    }

    fn payload_for(bytes: usize) -> HeapResult<u32> {
        let limit = (u32::MAX - BLOCK_OVERHEAD) as usize & !(ALIGNMENT - 1);
        if bytes > limit {
            return Err(HeapError::OutOfMemory { requested: bytes });
        }

        Ok(align(cmp::max(bytes, ALIGNMENT), ALIGNMENT) as u32)
    }

    /// First-fit: the first free block, from the base, that can hold `size`.
    fn find_free_block(&self, size: u32) -> Option<Block> {
        self.blocks().find(|block| block.is_free && block.size >= size)
    }

    /// Allocates `size` bytes out of the free `block`.
    fn carve(&mut self, block: Block, size: u32) -> Addr {
        self.split(block.start, block.size, size).payload()
    }

    /// Writes an allocated block of `size` bytes at `start`, followed by a
    /// free block with whatever is left of `available`. When the leftover
    /// cannot pay for its own tags, the allocated block keeps all of it.
    fn split(&mut self, start: u32, available: u32, size: u32) -> Block {
        let remainder = available - size;

        if remainder > BLOCK_OVERHEAD {
            let used = Block::new(start, size, false);
            self.write_block(used);
            self.write_block(Block::new(used.end(), remainder - BLOCK_OVERHEAD, true));
            used
        } else {
            let used = Block::new(start, available, false);
            self.write_block(used);
            used
        }
    }

    pub(crate) fn adjacency(&self, block: Block) -> Adjacency {
        let left = self.prev_block(block).filter(|b| b.is_free);
        let right = self.next_block(block).filter(|b| b.is_free);

        match (left, right) {
            (None, None) => Adjacency::Isolated,
            (Some(left), None) => Adjacency::Left(left),
            (None, Some(right)) => Adjacency::Right(right),
            (Some(left), Some(right)) => Adjacency::Both(left, right),
        }
    }

    /// Merges the free `block` with its free neighbours and returns the
    /// resulting block.
    fn coalesce(&mut self, block: Block) -> Block {
        let (start, end) = match self.adjacency(block) {
            Adjacency::Isolated => return block,
            Adjacency::Left(left) => (left.start, block.end()),
            Adjacency::Right(right) => (block.start, right.end()),
            Adjacency::Both(left, right) => (left.start, right.end()),
        };

        let merged = Block::new(start, end - start - BLOCK_OVERHEAD, true);
        self.write_block(merged);
        merged
    }

    #[inline]
    fn block_at(&self, start: u32) -> Block {
        Block::from_tag(start, self.space.read_u32(start as usize))
    }

    #[inline]
    pub(crate) fn block_of(&self, ptr: Addr) -> Block {
        self.block_at(Block::start_of(ptr))
    }

    fn write_block(&mut self, block: Block) {
        let tag = block.tag();
        self.space.write_u32(block.start as usize, tag);
        self.space.write_u32(block.footer() as usize, tag);
    }

    fn prev_block(&self, block: Block) -> Option<Block> {
        if block.start == 0 {
            return None;
        }

        let tag = self.space.read_u32((block.start - TAG_SIZE) as usize);
        let size = Block::from_tag(0, tag).size;
        Some(Block::from_tag(block.start - BLOCK_OVERHEAD - size, tag))
    }

    fn next_block(&self, block: Block) -> Option<Block> {
        let end = block.end();
        if end as usize >= self.size() {
            return None;
        }

        Some(self.block_at(end))
    }
}

/// Iterator over the blocks of a [`Heap`]. See [`Heap::blocks`].
pub struct Blocks<'h> {
    heap: &'h Heap,
    next: u32,
}

impl Iterator for Blocks<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next as usize >= self.heap.size() {
            return None;
        }

        let block = self.heap.block_at(self.next);
        self.next = block.end();

        Some(block)
    }
}

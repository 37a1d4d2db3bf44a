use std::marker::PhantomData;

use crate::{
    addr::Addr,
    block::ALIGNMENT,
    element::Element,
    error::HeapResult,
    heap::Heap,
    utils::align,
};

/// Node layout. The key is padded to a word boundary so the value is word
/// aligned:
///
/// ```text
/// +------+----------+------------------+----------+-----------------+
/// | next | key_size | key (padded)     | val_size | value           |
/// +------+----------+------------------+----------+-----------------+
///  0      4          8                  8 + pad(key_size)
/// ```
const NEXT: u32 = 0;
const KEY_SIZE: u32 = 4;
const KEY: u32 = 8;

/// Size of an inline key.
const INLINE_KEY_SIZE: usize = 4;

/// Map key. Inline keys are 4-byte scalars and take a fast path for hashing
/// and comparison. `Inline(k)` and `Bytes(&k.to_le_bytes())` address the
/// same entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Key<'a> {
    Inline(u32),
    Bytes(&'a [u8]),
}

impl Key<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Key::Inline(_) => INLINE_KEY_SIZE,
            Key::Bytes(bytes) => bytes.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hash(&self) -> u32 {
        match self {
            Key::Inline(key) => mix(*key),
            Key::Bytes(bytes) => mix(fold(bytes)),
        }
    }

    fn matches(&self, heap: &Heap, node: Addr) -> bool {
        let size = heap.read_u32(node.add(KEY_SIZE)) as usize;

        match self {
            Key::Inline(key) => size == INLINE_KEY_SIZE && heap.read_u32(node.add(KEY)) == *key,
            Key::Bytes(bytes) => size == bytes.len() && heap.bytes(node.add(KEY), size) == *bytes,
        }
    }

    fn write_to(&self, bytes: &mut [u8]) {
        match self {
            Key::Inline(key) => bytes.copy_from_slice(&key.to_le_bytes()),
            Key::Bytes(key) => bytes.copy_from_slice(key),
        }
    }
}

impl From<u32> for Key<'_> {
    fn from(key: u32) -> Self {
        Key::Inline(key)
    }
}

impl<'a> From<&'a [u8]> for Key<'a> {
    fn from(key: &'a [u8]) -> Self {
        Key::Bytes(key)
    }
}

impl<'a, const N: usize> From<&'a [u8; N]> for Key<'a> {
    fn from(key: &'a [u8; N]) -> Self {
        Key::Bytes(key)
    }
}

impl<'a> From<&'a str> for Key<'a> {
    fn from(key: &'a str) -> Self {
        Key::Bytes(key.as_bytes())
    }
}

/// Xorshift integer hash.
#[inline]
pub(crate) fn mix(mut x: u32) -> u32 {
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    x
}

/// Folds a key of any length into a word: byte `i` is XORed in at bit
/// `(i % 4) * 8`.
// TODO: keys longer than 4 bytes only get XOR diffusion; a multiplicative
// step in here would spread them better but changes every bucket index.
#[inline]
pub(crate) fn fold(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .enumerate()
        .fold(0, |acc, (i, byte)| acc ^ ((*byte as u32) << ((i % 4) * 8)))
}

#[inline]
fn val_size_offset(key_size: usize) -> u32 {
    KEY + align(key_size, ALIGNMENT) as u32
}

#[inline]
fn node_size(key_size: usize, val_size: usize) -> usize {
    val_size_offset(key_size) as usize + 4 + val_size
}

/// Where a key is, or would go, in its chain.
struct Probe {
    /// Word pointing at `node`: the bucket slot or the previous node's
    /// `next`. When the key is absent this is the null word ending the chain.
    link: Addr,
    node: Option<Addr>,
}

/// Separate-chaining hash table with byte keys and byte values,
/// type-erased.
///
/// The bucket table is fixed at construction and never rehashes, so chains
/// grow with the load. The descriptor is the bucket count followed by the
/// chain heads.
///
/// Value addresses returned by [`RawMap::set`] and [`RawMap::get`] stay
/// valid until the entry is set again or removed.
#[derive(Debug, PartialEq, Eq)]
pub struct RawMap {
    desc: Addr,
}

impl RawMap {
    /// Allocates a table of `bucket_count` empty buckets (at least one).
    pub fn new(heap: &mut Heap, bucket_count: usize) -> HeapResult<Self> {
        let bucket_count = bucket_count.max(1);
        let desc = heap.acquire(4 + 4 * bucket_count)?;

        heap.write_u32(desc, bucket_count as u32);
        heap.zero_bytes(desc.add(4), 4 * bucket_count);

        Ok(Self { desc })
    }

    /// Wraps a descriptor previously obtained from [`RawMap::addr`].
    pub fn from_addr(desc: Addr) -> Self {
        Self { desc }
    }

    pub fn addr(&self) -> Addr {
        self.desc
    }

    #[inline]
    pub fn bucket_count(&self, heap: &Heap) -> usize {
        heap.read_u32(self.desc) as usize
    }

    /// Returns the value region for `key`, `val_size` bytes long.
    ///
    /// An existing entry is resized to the new value size; grown bytes are
    /// unspecified and the entry may move. A new entry is appended to the end
    /// of its chain with an uninitialized value.
    pub fn set<'k>(
        &mut self,
        heap: &mut Heap,
        key: impl Into<Key<'k>>,
        val_size: usize,
    ) -> HeapResult<Addr> {
        let key = key.into();
        let probe = self.probe(heap, &key);
        let size = node_size(key.len(), val_size);
        let val_size_at = val_size_offset(key.len());

        let node = match probe.node {
            Some(node) => {
                let moved = heap.resize(node, size)?;
                if moved != node {
                    heap.write_addr(probe.link, moved);
                }
                moved
            }
            None => {
                let node = heap.acquire(size)?;
                heap.write_addr(node.add(NEXT), Addr::NULL);
                heap.write_u32(node.add(KEY_SIZE), key.len() as u32);
                key.write_to(heap.bytes_mut(node.add(KEY), key.len()));
                heap.write_addr(probe.link, node);
                node
            }
        };

        heap.write_u32(node.add(val_size_at), val_size as u32);
        Ok(node.add(val_size_at + 4))
    }

    pub fn get<'k>(&self, heap: &Heap, key: impl Into<Key<'k>>) -> Option<Addr> {
        let key = key.into();
        self.probe(heap, &key)
            .node
            .map(|node| node.add(val_size_offset(key.len()) + 4))
    }

    pub fn contains_key<'k>(&self, heap: &Heap, key: impl Into<Key<'k>>) -> bool {
        self.get(heap, key).is_some()
    }

    /// Unlinks and releases the entry for `key`, if any.
    pub fn remove<'k>(&mut self, heap: &mut Heap, key: impl Into<Key<'k>>) {
        let key = key.into();
        let probe = self.probe(heap, &key);

        if let Some(node) = probe.node {
            let next = heap.read_addr(node.add(NEXT));
            heap.write_addr(probe.link, next);
            heap.release(node);
        }
    }

    /// Size of the value whose region starts at `val`.
    pub fn value_size(&self, heap: &Heap, val: Addr) -> usize {
        heap.read_u32(val.sub(4)) as usize
    }

    /// First entry, scanning buckets from index 0.
    pub fn iter_new(&self, heap: &Heap) -> Option<Addr> {
        self.first_from(heap, 0)
    }

    /// Entry after `iter`: the rest of its chain first, then the following
    /// buckets.
    pub fn iter_next(&self, heap: &Heap, iter: Addr) -> Option<Addr> {
        if let Some(next) = heap.read_addr(iter.add(NEXT)).non_null() {
            return Some(next);
        }

        let bucket = self.bucket_index(heap, &Key::Bytes(self.iter_key(heap, iter)));
        self.first_from(heap, bucket + 1)
    }

    pub fn iter_key<'h>(&self, heap: &'h Heap, iter: Addr) -> &'h [u8] {
        let size = heap.read_u32(iter.add(KEY_SIZE)) as usize;
        heap.bytes(iter.add(KEY), size)
    }

    /// Key of an entry stored with an inline key.
    pub fn iter_key_inline(&self, heap: &Heap, iter: Addr) -> u32 {
        heap.read_u32(iter.add(KEY))
    }

    pub fn iter_val(&self, heap: &Heap, iter: Addr) -> Addr {
        let size = heap.read_u32(iter.add(KEY_SIZE)) as usize;
        iter.add(val_size_offset(size) + 4)
    }

    /// Entry handles in bucket order.
    pub fn entries<'h>(&self, heap: &'h Heap) -> Entries<'h, '_> {
        Entries {
            heap,
            map: self,
            current: self.iter_new(heap),
        }
    }

    /// Number of entries. Walks every chain.
    pub fn len(&self, heap: &Heap) -> usize {
        self.entries(heap).count()
    }

    pub fn is_empty(&self, heap: &Heap) -> bool {
        self.iter_new(heap).is_none()
    }

    /// Releases every entry. The bucket table is kept.
    pub fn clear(&mut self, heap: &mut Heap) {
        for bucket in 0..self.bucket_count(heap) {
            let slot = self.bucket_slot(bucket);
            let mut node = heap.read_addr(slot);
            while !node.is_null() {
                let next = heap.read_addr(node.add(NEXT));
                heap.release(node);
                node = next;
            }
            heap.write_addr(slot, Addr::NULL);
        }
    }

    /// Releases every entry and the bucket table.
    pub fn free(mut self, heap: &mut Heap) {
        self.clear(heap);
        heap.release(self.desc);
    }

    #[inline]
    fn bucket_slot(&self, bucket: usize) -> Addr {
        self.desc.add(4 + 4 * bucket as u32)
    }

    #[inline]
    fn bucket_index(&self, heap: &Heap, key: &Key<'_>) -> usize {
        key.hash() as usize % self.bucket_count(heap)
    }

    fn first_from(&self, heap: &Heap, bucket: usize) -> Option<Addr> {
        (bucket..self.bucket_count(heap))
            .find_map(|b| heap.read_addr(self.bucket_slot(b)).non_null())
    }

    fn probe(&self, heap: &Heap, key: &Key<'_>) -> Probe {
        let mut link = self.bucket_slot(self.bucket_index(heap, key));

        loop {
            let node = heap.read_addr(link);
            if node.is_null() {
                return Probe { link, node: None };
            }
            if key.matches(heap, node) {
                return Probe {
                    link,
                    node: Some(node),
                };
            }
            link = node.add(NEXT);
        }
    }
}

/// Iterator over the entry handles of a [`RawMap`].
pub struct Entries<'h, 'm> {
    heap: &'h Heap,
    map: &'m RawMap,
    current: Option<Addr>,
}

impl Iterator for Entries<'_, '_> {
    type Item = Addr;

    fn next(&mut self) -> Option<Self::Item> {
        let iter = self.current?;
        self.current = self.map.iter_next(self.heap, iter);
        Some(iter)
    }
}

/// Statically typed view over a [`RawMap`] whose values are `V`s.
#[derive(Debug)]
pub struct Map<V: Element> {
    raw: RawMap,
    marker: PhantomData<V>,
}

impl<V: Element> Map<V> {
    pub fn new(heap: &mut Heap, bucket_count: usize) -> HeapResult<Self> {
        Ok(Self::from_raw(RawMap::new(heap, bucket_count)?))
    }

    /// The caller vouches that every value in `raw` is a `V`.
    pub fn from_raw(raw: RawMap) -> Self {
        Self {
            raw,
            marker: PhantomData,
        }
    }

    pub fn as_raw(&self) -> &RawMap {
        &self.raw
    }

    pub fn into_raw(self) -> RawMap {
        self.raw
    }

    pub fn free(self, heap: &mut Heap) {
        self.raw.free(heap)
    }

    pub fn insert<'k>(
        &mut self,
        heap: &mut Heap,
        key: impl Into<Key<'k>>,
        value: V,
    ) -> HeapResult<()> {
        let val = self.raw.set(heap, key, V::SIZE)?;
        value.write_to(heap.bytes_mut(val, V::SIZE));
        Ok(())
    }

    pub fn get<'k>(&self, heap: &Heap, key: impl Into<Key<'k>>) -> Option<V> {
        let val = self.raw.get(heap, key)?;
        Some(V::read_from(heap.bytes(val, V::SIZE)))
    }

    pub fn contains_key<'k>(&self, heap: &Heap, key: impl Into<Key<'k>>) -> bool {
        self.raw.contains_key(heap, key)
    }

    pub fn remove<'k>(&mut self, heap: &mut Heap, key: impl Into<Key<'k>>) -> Option<V> {
        let key = key.into();
        let value = self.get(heap, key)?;
        self.raw.remove(heap, key);
        Some(value)
    }

    pub fn len(&self, heap: &Heap) -> usize {
        self.raw.len(heap)
    }

    pub fn is_empty(&self, heap: &Heap) -> bool {
        self.raw.is_empty(heap)
    }

    pub fn clear(&mut self, heap: &mut Heap) {
        self.raw.clear(heap)
    }

    /// `(key bytes, value)` pairs in bucket order.
    pub fn iter<'h>(&'h self, heap: &'h Heap) -> impl Iterator<Item = (&'h [u8], V)> + 'h {
        self.raw.entries(heap).map(move |iter| {
            let val = self.raw.iter_val(heap, iter);
            (self.raw.iter_key(heap, iter), V::read_from(heap.bytes(val, V::SIZE)))
        })
    }
}

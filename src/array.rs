use std::marker::PhantomData;

use crate::{addr::Addr, element::Element, error::HeapResult, heap::Heap};

/// Capacity, in elements, of a fresh or cleared array.
pub const DEFAULT_CAPACITY: usize = 4;

/// The descriptor lives in the heap next to the buffer it owns:
///
/// ```text
/// +----------+----------+-----------+----------+
/// | data_ptr |  length  | elem_size | capacity |
/// +----------+----------+-----------+----------+
///  0          4          8           12
/// ```
pub(crate) const DESCRIPTOR_SIZE: usize = 16;

const DATA: u32 = 0;
const LENGTH: u32 = 4;
const ELEM_SIZE: u32 = 8;
const CAPACITY: u32 = 12;

/// Resizable sequence of fixed-size elements, type-erased.
///
/// The handle is only the descriptor's offset. All state is in the [`Heap`],
/// which every operation takes explicitly. Element addresses returned by
/// [`RawArray::push`], [`RawArray::at`] and [`RawArray::insert`] stay valid
/// until the next operation that may grow the buffer.
///
/// Indices are not checked.
#[derive(Debug, PartialEq, Eq)]
pub struct RawArray {
    desc: Addr,
}

impl RawArray {
    /// Allocates a descriptor and a buffer for [`DEFAULT_CAPACITY`] elements
    /// of `elem_size` bytes.
    pub fn new(heap: &mut Heap, elem_size: usize) -> HeapResult<Self> {
        let desc = heap.acquire(DESCRIPTOR_SIZE)?;
        let data = match heap.acquire(DEFAULT_CAPACITY * elem_size) {
            Ok(data) => data,
            Err(err) => {
                heap.release(desc);
                return Err(err);
            }
        };

        heap.write_addr(desc.add(DATA), data);
        heap.write_u32(desc.add(LENGTH), 0);
        heap.write_u32(desc.add(ELEM_SIZE), elem_size as u32);
        heap.write_u32(desc.add(CAPACITY), DEFAULT_CAPACITY as u32);

        Ok(Self { desc })
    }

    /// Wraps a descriptor previously obtained from [`RawArray::addr`].
    pub fn from_addr(desc: Addr) -> Self {
        Self { desc }
    }

    /// Offset of the descriptor, e.g. to store this array inside another
    /// container.
    pub fn addr(&self) -> Addr {
        self.desc
    }

    /// Releases the buffer and then the descriptor.
    pub fn free(self, heap: &mut Heap) {
        heap.release(self.data(heap));
        heap.release(self.desc);
    }

    pub fn len(&self, heap: &Heap) -> usize {
        heap.read_u32(self.desc.add(LENGTH)) as usize
    }

    pub fn is_empty(&self, heap: &Heap) -> bool {
        self.len(heap) == 0
    }

    pub fn elem_size(&self, heap: &Heap) -> usize {
        heap.read_u32(self.desc.add(ELEM_SIZE)) as usize
    }

    pub fn capacity(&self, heap: &Heap) -> usize {
        heap.read_u32(self.desc.add(CAPACITY)) as usize
    }

    pub fn data(&self, heap: &Heap) -> Addr {
        heap.read_addr(self.desc.add(DATA))
    }

    /// Address of element `index`: `data + index * elem_size`.
    #[inline]
    pub fn at(&self, heap: &Heap, index: usize) -> Addr {
        self.data(heap).add((index * self.elem_size(heap)) as u32)
    }

    /// Appends an uninitialized element and returns its address.
    pub fn push(&mut self, heap: &mut Heap) -> HeapResult<Addr> {
        let len = self.len(heap);
        if len == self.capacity(heap) {
            self.grow_to(heap, len + 1)?;
        }

        self.set_len(heap, len + 1);
        Ok(self.at(heap, len))
    }

    /// Shifts everything after `index` one slot to the left.
    pub fn remove(&mut self, heap: &mut Heap, index: usize) {
        let len = self.len(heap);
        let size = self.elem_size(heap);

        let dst = self.at(heap, index);
        let src = self.at(heap, index + 1);
        heap.move_bytes(dst, src, (len - index - 1) * size);

        self.set_len(heap, len - 1);
    }

    /// Drops every element and goes back to a [`DEFAULT_CAPACITY`] buffer.
    pub fn clear(&mut self, heap: &mut Heap) -> HeapResult<()> {
        heap.release(self.data(heap));
        self.set_data(heap, Addr::NULL, 0);
        self.set_len(heap, 0);

        let data = heap.acquire(DEFAULT_CAPACITY * self.elem_size(heap))?;
        self.set_data(heap, data, DEFAULT_CAPACITY);

        Ok(())
    }

    /// Appends a copy of every element of `other`, which is left untouched.
    /// Both arrays must have the same element size.
    pub fn concat(&mut self, heap: &mut Heap, other: &RawArray) -> HeapResult<()> {
        let len = self.len(heap);
        let other_len = other.len(heap);
        let size = self.elem_size(heap);

        self.grow_to(heap, len + other_len)?;

        let dst = self.at(heap, len);
        let src = other.data(heap);
        heap.copy_bytes(dst, src, other_len * size);
        self.set_len(heap, len + other_len);

        Ok(())
    }

    /// Opens an uninitialized slot at `index` and returns its address.
    pub fn insert(&mut self, heap: &mut Heap, index: usize) -> HeapResult<Addr> {
        self.push(heap)?;

        let len = self.len(heap);
        let size = self.elem_size(heap);
        let src = self.at(heap, index);
        let dst = self.at(heap, index + 1);
        heap.move_bytes(dst, src, (len - 1 - index) * size);

        Ok(src)
    }

    /// Copies the elements in `[start, end)` into a new array. Negative
    /// bounds count from the end, as in Python; bounds are clamped to the
    /// array and an inverted range gives an empty array.
    pub fn slice(&self, heap: &mut Heap, start: isize, end: isize) -> HeapResult<RawArray> {
        let len = self.len(heap);
        let size = self.elem_size(heap);
        let start = resolve_index(start, len);
        let end = resolve_index(end, len);
        let count = end.saturating_sub(start);

        let mut sliced = RawArray::new(heap, size)?;
        if let Err(err) = sliced.grow_to(heap, count) {
            sliced.free(heap);
            return Err(err);
        }

        let src = self.at(heap, start);
        let dst = sliced.data(heap);
        heap.copy_bytes(dst, src, count * size);
        sliced.set_len(heap, count);

        Ok(sliced)
    }

    /// Reverses the elements in place.
    pub fn reverse(&mut self, heap: &mut Heap) {
        let len = self.len(heap);
        let size = self.elem_size(heap);
        let data = self.data(heap);
        let bytes = heap.bytes_mut(data, len * size);

        for front in 0..len / 2 {
            let back = len - 1 - front;
            let (head, tail) = bytes.split_at_mut(back * size);
            head[front * size..(front + 1) * size].swap_with_slice(&mut tail[..size]);
        }
    }

    /// Grows the capacity by `2 * old + 1` steps until it holds `needed`.
    fn grow_to(&mut self, heap: &mut Heap, needed: usize) -> HeapResult<()> {
        let mut capacity = self.capacity(heap);
        if needed <= capacity {
            return Ok(());
        }
        while capacity < needed {
            capacity = 2 * capacity + 1;
        }

        let data = heap.resize(self.data(heap), capacity * self.elem_size(heap))?;
        self.set_data(heap, data, capacity);

        Ok(())
    }

    fn set_len(&mut self, heap: &mut Heap, len: usize) {
        heap.write_u32(self.desc.add(LENGTH), len as u32);
    }

    fn set_data(&mut self, heap: &mut Heap, data: Addr, capacity: usize) {
        heap.write_addr(self.desc.add(DATA), data);
        heap.write_u32(self.desc.add(CAPACITY), capacity as u32);
    }
}

fn resolve_index(index: isize, len: usize) -> usize {
    if index < 0 {
        (len as isize + index).max(0) as usize
    } else {
        (index as usize).min(len)
    }
}

/// Statically typed view over a [`RawArray`] holding `T`s.
#[derive(Debug)]
pub struct Array<T: Element> {
    raw: RawArray,
    marker: PhantomData<T>,
}

impl<T: Element> Array<T> {
    pub fn new(heap: &mut Heap) -> HeapResult<Self> {
        Ok(Self::from_raw(RawArray::new(heap, T::SIZE)?))
    }

    /// The caller vouches that `raw` holds `T`s.
    pub fn from_raw(raw: RawArray) -> Self {
        Self {
            raw,
            marker: PhantomData,
        }
    }

    pub fn as_raw(&self) -> &RawArray {
        &self.raw
    }

    pub fn into_raw(self) -> RawArray {
        self.raw
    }

    pub fn free(self, heap: &mut Heap) {
        self.raw.free(heap)
    }

    pub fn len(&self, heap: &Heap) -> usize {
        self.raw.len(heap)
    }

    pub fn is_empty(&self, heap: &Heap) -> bool {
        self.raw.is_empty(heap)
    }

    pub fn push(&mut self, heap: &mut Heap, value: T) -> HeapResult<()> {
        let slot = self.raw.push(heap)?;
        value.write_to(heap.bytes_mut(slot, T::SIZE));
        Ok(())
    }

    pub fn get(&self, heap: &Heap, index: usize) -> Option<T> {
        if index >= self.len(heap) {
            return None;
        }
        Some(T::read_from(heap.bytes(self.raw.at(heap, index), T::SIZE)))
    }

    /// Overwrites element `index`. Returns `false` if it is out of bounds.
    pub fn set(&mut self, heap: &mut Heap, index: usize, value: T) -> bool {
        if index >= self.len(heap) {
            return false;
        }
        let slot = self.raw.at(heap, index);
        value.write_to(heap.bytes_mut(slot, T::SIZE));
        true
    }

    /// Inserts `value` at `index`, shifting later elements right. Returns
    /// `Ok(false)` without touching the array if `index > len`.
    pub fn insert(&mut self, heap: &mut Heap, index: usize, value: T) -> HeapResult<bool> {
        if index > self.len(heap) {
            return Ok(false);
        }

        let slot = self.raw.insert(heap, index)?;
        value.write_to(heap.bytes_mut(slot, T::SIZE));
        Ok(true)
    }

    pub fn remove(&mut self, heap: &mut Heap, index: usize) -> Option<T> {
        let value = self.get(heap, index)?;
        self.raw.remove(heap, index);
        Some(value)
    }

    pub fn clear(&mut self, heap: &mut Heap) -> HeapResult<()> {
        self.raw.clear(heap)
    }

    pub fn concat(&mut self, heap: &mut Heap, other: &Array<T>) -> HeapResult<()> {
        self.raw.concat(heap, &other.raw)
    }

    pub fn slice(&self, heap: &mut Heap, start: isize, end: isize) -> HeapResult<Array<T>> {
        Ok(Array::from_raw(self.raw.slice(heap, start, end)?))
    }

    pub fn reverse(&mut self, heap: &mut Heap) {
        self.raw.reverse(heap)
    }

    pub fn iter<'h>(&self, heap: &'h Heap) -> impl Iterator<Item = T> + 'h {
        let data = self.raw.data(heap);
        (0..self.len(heap)).map(move |i| {
            let slot = data.add((i * T::SIZE) as u32);
            T::read_from(heap.bytes(slot, T::SIZE))
        })
    }

    pub fn to_vec(&self, heap: &Heap) -> Vec<T> {
        self.iter(heap).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HeapConfig;
    use proptest::prelude::*;

    fn heap() -> Heap {
        Heap::new(HeapConfig::new(1, 16)).unwrap()
    }

    fn filled(heap: &mut Heap, values: &[u32]) -> Array<u32> {
        let mut array = Array::new(heap).unwrap();
        for v in values {
            array.push(heap, *v).unwrap();
        }
        array
    }

    #[test]
    fn push_then_at_reads_back_in_order() {
        let mut heap = heap();
        let mut array = RawArray::new(&mut heap, 4).unwrap();

        for i in 0..9u32 {
            let slot = array.push(&mut heap).unwrap();
            heap.write_u32(slot, i * 100);
        }

        assert_eq!(array.len(&heap), 9);
        for i in 0..9u32 {
            assert_eq!(heap.read_u32(array.at(&heap, i as usize)), i * 100);
        }
    }

    #[test]
    fn capacity_grows_two_n_plus_one() {
        let mut heap = heap();
        let mut array = RawArray::new(&mut heap, 8).unwrap();
        assert_eq!(array.capacity(&heap), 4);

        for _ in 0..5 {
            array.push(&mut heap).unwrap();
        }
        assert_eq!(array.capacity(&heap), 9);

        for _ in 0..5 {
            array.push(&mut heap).unwrap();
        }
        assert_eq!(array.capacity(&heap), 19);
        assert!(heap.payload_size(array.data(&heap)) >= 19 * 8);
    }

    #[test]
    fn remove_and_insert_shift_elements() {
        let mut heap = heap();
        let mut array = filled(&mut heap, &[1, 2, 3, 4, 5]);

        assert_eq!(array.remove(&mut heap, 1), Some(2));
        assert_eq!(array.to_vec(&heap), vec![1, 3, 4, 5]);

        assert!(array.insert(&mut heap, 0, 9).unwrap());
        assert!(array.insert(&mut heap, 5, 7).unwrap());
        assert!(array.insert(&mut heap, 2, 8).unwrap());
        assert_eq!(array.to_vec(&heap), vec![9, 1, 8, 3, 4, 5, 7]);

        assert!(!array.insert(&mut heap, 8, 0).unwrap());
        assert_eq!(array.len(&heap), 7);

        assert_eq!(array.remove(&mut heap, 6), Some(7));
        assert_eq!(array.remove(&mut heap, 6), None);
    }

    #[test]
    fn typed_access_is_bounds_checked() {
        let mut heap = heap();
        let mut array = filled(&mut heap, &[10, 20]);

        assert_eq!(array.get(&heap, 1), Some(20));
        assert_eq!(array.get(&heap, 2), None);
        assert!(array.set(&mut heap, 0, 11));
        assert!(!array.set(&mut heap, 2, 0));
        assert_eq!(array.to_vec(&heap), vec![11, 20]);
    }

    #[test]
    fn slice_supports_negative_bounds() {
        let mut heap = heap();
        let array = filled(&mut heap, &[0, 1, 2, 3, 4, 5]);

        let middle = array.slice(&mut heap, 1, 4).unwrap();
        assert_eq!(middle.to_vec(&heap), vec![1, 2, 3]);

        let tail = array.slice(&mut heap, -2, 6).unwrap();
        assert_eq!(tail.to_vec(&heap), vec![4, 5]);

        let trimmed = array.slice(&mut heap, 1, -1).unwrap();
        assert_eq!(trimmed.to_vec(&heap), vec![1, 2, 3, 4]);

        let empty = array.slice(&mut heap, 4, 2).unwrap();
        assert!(empty.is_empty(&heap));

        let big = array.slice(&mut heap, 0, 6).unwrap();
        assert_eq!(big.to_vec(&heap), array.to_vec(&heap));
    }

    #[test]
    fn concat_copies_and_keeps_source() {
        let mut heap = heap();
        let mut a = filled(&mut heap, &[1, 2, 3]);
        let b = filled(&mut heap, &[4, 5, 6, 7, 8]);

        a.concat(&mut heap, &b).unwrap();

        assert_eq!(a.to_vec(&heap), vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(b.to_vec(&heap), vec![4, 5, 6, 7, 8]);
    }

    #[test]
    fn concat_with_itself_doubles() {
        let mut heap = heap();
        let mut a = filled(&mut heap, &[1, 2, 3]);
        let alias = Array::<u32>::from_raw(RawArray::from_addr(a.as_raw().addr()));

        a.concat(&mut heap, &alias).unwrap();

        assert_eq!(a.to_vec(&heap), vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn reverse_swaps_ends() {
        let mut heap = heap();
        let mut array = filled(&mut heap, &[1, 2, 3, 4, 5]);

        array.reverse(&mut heap);
        assert_eq!(array.to_vec(&heap), vec![5, 4, 3, 2, 1]);

        let mut even = filled(&mut heap, &[1, 2]);
        even.reverse(&mut heap);
        assert_eq!(even.to_vec(&heap), vec![2, 1]);
    }

    #[test]
    fn clear_resets_to_default_capacity() {
        let mut heap = heap();
        let mut array = filled(&mut heap, &[0; 20]);

        array.clear(&mut heap).unwrap();

        assert!(array.is_empty(&heap));
        assert_eq!(array.as_raw().capacity(&heap), DEFAULT_CAPACITY);
        array.push(&mut heap, 3).unwrap();
        assert_eq!(array.to_vec(&heap), vec![3]);
    }

    #[test]
    fn free_returns_all_memory() {
        let mut heap = heap();
        let array = filled(&mut heap, &[1; 50]);
        let slice = array.slice(&mut heap, 10, 20).unwrap();

        slice.free(&mut heap);
        array.free(&mut heap);

        assert_eq!(heap.blocks().count(), 1);
        heap.check().unwrap();
    }

    proptest! {
        #[test]
        fn reverse_twice_is_identity(values in proptest::collection::vec(any::<u64>(), 0..64)) {
            let mut heap = heap();
            let mut array = Array::<u64>::new(&mut heap).unwrap();
            for v in &values {
                array.push(&mut heap, *v).unwrap();
            }

            array.reverse(&mut heap);
            array.reverse(&mut heap);

            prop_assert_eq!(array.to_vec(&heap), values);
        }

        #[test]
        fn slice_matches_vec_slicing(
            values in proptest::collection::vec(any::<u32>(), 1..40),
            a in any::<prop::sample::Index>(),
            b in any::<prop::sample::Index>(),
        ) {
            let mut heap = heap();
            let array = filled(&mut heap, &values);
            let (i, j) = (a.index(values.len() + 1), b.index(values.len() + 1));
            let (i, j) = (i.min(j), i.max(j));

            let sliced = array.slice(&mut heap, i as isize, j as isize).unwrap();
            prop_assert_eq!(sliced.len(&heap), j - i);
            prop_assert_eq!(sliced.to_vec(&heap), values[i..j].to_vec());

            if i < values.len() {
                let start = i as isize - values.len() as isize;
                let negative = array.slice(&mut heap, start, j as isize).unwrap();
                prop_assert_eq!(negative.to_vec(&heap), values[i..j].to_vec());
            }
        }
    }
}

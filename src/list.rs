use std::marker::PhantomData;

use crate::{addr::Addr, element::Element, error::HeapResult, heap::Heap};

/// Every node starts with its links, the element follows:
///
/// ```text
/// +------+------+------------------+
/// | prev | next | data[elem_size]  |
/// +------+------+------------------+
///  0      4      8 <- handle given to the user
/// ```
pub(crate) const NODE_HEADER_SIZE: u32 = 8;

const PREV: u32 = 0;
const NEXT: u32 = 4;

/// `{head, tail, length, elem_size}`, where `head` and `tail` are node
/// offsets.
pub(crate) const DESCRIPTOR_SIZE: usize = 16;

const HEAD: u32 = 0;
const TAIL: u32 = 4;
const LENGTH: u32 = 8;
const ELEM_SIZE: u32 = 12;

/// Doubly linked list of fixed-size elements, type-erased.
///
/// Nodes are identified by the address of their data region (what
/// [`RawList::push`] and friends return). Nodes never move, so a handle stays
/// valid until its node is removed. Handles from another list are not
/// detected.
#[derive(Debug, PartialEq, Eq)]
pub struct RawList {
    desc: Addr,
}

impl RawList {
    /// Allocates an empty descriptor. No node exists until the first push.
    pub fn new(heap: &mut Heap, elem_size: usize) -> HeapResult<Self> {
        let desc = heap.acquire(DESCRIPTOR_SIZE)?;

        heap.write_addr(desc.add(HEAD), Addr::NULL);
        heap.write_addr(desc.add(TAIL), Addr::NULL);
        heap.write_u32(desc.add(LENGTH), 0);
        heap.write_u32(desc.add(ELEM_SIZE), elem_size as u32);

        Ok(Self { desc })
    }

    /// Wraps a descriptor previously obtained from [`RawList::addr`].
    pub fn from_addr(desc: Addr) -> Self {
        Self { desc }
    }

    pub fn addr(&self) -> Addr {
        self.desc
    }

    /// Releases every node, then the descriptor.
    pub fn free(mut self, heap: &mut Heap) {
        self.clear(heap);
        heap.release(self.desc);
    }

    #[inline]
    pub fn len(&self, heap: &Heap) -> usize {
        heap.read_u32(self.desc.add(LENGTH)) as usize
    }

    #[inline]
    pub fn is_empty(&self, heap: &Heap) -> bool {
        self.len(heap) == 0
    }

    #[inline]
    pub fn elem_size(&self, heap: &Heap) -> usize {
        heap.read_u32(self.desc.add(ELEM_SIZE)) as usize
    }

    pub fn head(&self, heap: &Heap) -> Option<Addr> {
        data_of(heap.read_addr(self.desc.add(HEAD)))
    }

    pub fn tail(&self, heap: &Heap) -> Option<Addr> {
        data_of(heap.read_addr(self.desc.add(TAIL)))
    }

    pub fn prev(&self, heap: &Heap, iter: Addr) -> Option<Addr> {
        data_of(heap.read_addr(node_of(iter).add(PREV)))
    }

    pub fn next(&self, heap: &Heap, iter: Addr) -> Option<Addr> {
        data_of(heap.read_addr(node_of(iter).add(NEXT)))
    }

    /// Appends a node after the tail and returns its (uninitialized) data.
    pub fn push(&mut self, heap: &mut Heap) -> HeapResult<Addr> {
        let tail = self.tail_node(heap);
        let node = self.alloc_node(heap, tail, Addr::NULL)?;

        if tail.is_null() {
            self.set_head(heap, node);
        } else {
            heap.write_addr(tail.add(NEXT), node);
        }
        self.set_tail(heap, node);
        let len = self.len(heap);
        self.set_len(heap, len + 1);

        Ok(node.add(NODE_HEADER_SIZE))
    }

    /// Inserts a node right before `iter`.
    pub fn insert_l(&mut self, heap: &mut Heap, iter: Addr) -> HeapResult<Addr> {
        let target = node_of(iter);
        let prev = heap.read_addr(target.add(PREV));
        let node = self.alloc_node(heap, prev, target)?;

        heap.write_addr(target.add(PREV), node);
        if prev.is_null() {
            self.set_head(heap, node);
        } else {
            heap.write_addr(prev.add(NEXT), node);
        }
        let len = self.len(heap);
        self.set_len(heap, len + 1);

        Ok(node.add(NODE_HEADER_SIZE))
    }

    /// Inserts a node right after `iter`.
    pub fn insert_r(&mut self, heap: &mut Heap, iter: Addr) -> HeapResult<Addr> {
        let target = node_of(iter);
        if target == self.tail_node(heap) {
            return self.push(heap);
        }

        let next = heap.read_addr(target.add(NEXT));
        let node = self.alloc_node(heap, target, next)?;

        heap.write_addr(target.add(NEXT), node);
        heap.write_addr(next.add(PREV), node);
        let len = self.len(heap);
        self.set_len(heap, len + 1);

        Ok(node.add(NODE_HEADER_SIZE))
    }

    /// Unlinks and releases the node at `iter`.
    pub fn remove(&mut self, heap: &mut Heap, iter: Addr) {
        let node = node_of(iter);
        let prev = heap.read_addr(node.add(PREV));
        let next = heap.read_addr(node.add(NEXT));

        if prev.is_null() {
            self.set_head(heap, next);
        } else {
            heap.write_addr(prev.add(NEXT), next);
        }

        if next.is_null() {
            self.set_tail(heap, prev);
        } else {
            heap.write_addr(next.add(PREV), prev);
        }

        heap.release(node);
        let len = self.len(heap);
        self.set_len(heap, len - 1);
    }

    /// Moves every node of `other` to the end of this list and releases
    /// `other`'s descriptor.
    pub fn concat(&mut self, heap: &mut Heap, other: RawList) {
        let other_head = other.head_node(heap);

        if !other_head.is_null() {
            let tail = self.tail_node(heap);
            if tail.is_null() {
                self.set_head(heap, other_head);
            } else {
                heap.write_addr(tail.add(NEXT), other_head);
            }
            heap.write_addr(other_head.add(PREV), tail);

            let other_tail = other.tail_node(heap);
            self.set_tail(heap, other_tail);
            let len = self.len(heap) + other.len(heap);
            self.set_len(heap, len);
        }

        heap.release(other.desc);
    }

    /// Releases every node.
    pub fn clear(&mut self, heap: &mut Heap) {
        let mut node = self.head_node(heap);
        while !node.is_null() {
            let next = heap.read_addr(node.add(NEXT));
            heap.release(node);
            node = next;
        }

        self.set_head(heap, Addr::NULL);
        self.set_tail(heap, Addr::NULL);
        self.set_len(heap, 0);
    }

    /// Reverses the list by swapping head with tail and every node's links.
    pub fn reverse(&mut self, heap: &mut Heap) {
        let head = self.head_node(heap);
        let tail = self.tail_node(heap);

        let mut node = head;
        while !node.is_null() {
            let prev = heap.read_addr(node.add(PREV));
            let next = heap.read_addr(node.add(NEXT));
            heap.write_addr(node.add(PREV), next);
            heap.write_addr(node.add(NEXT), prev);
            node = next;
        }

        self.set_head(heap, tail);
        self.set_tail(heap, head);
    }

    /// Handles from head to tail.
    pub fn iter<'h>(&self, heap: &'h Heap) -> Iter<'h> {
        Iter {
            heap,
            current: self.head(heap),
        }
    }

    fn alloc_node(&self, heap: &mut Heap, prev: Addr, next: Addr) -> HeapResult<Addr> {
        let node = heap.acquire(NODE_HEADER_SIZE as usize + self.elem_size(heap))?;
        heap.write_addr(node.add(PREV), prev);
        heap.write_addr(node.add(NEXT), next);
        Ok(node)
    }

    #[inline]
    fn head_node(&self, heap: &Heap) -> Addr {
        heap.read_addr(self.desc.add(HEAD))
    }

    #[inline]
    fn tail_node(&self, heap: &Heap) -> Addr {
        heap.read_addr(self.desc.add(TAIL))
    }

    fn set_head(&mut self, heap: &mut Heap, node: Addr) {
        heap.write_addr(self.desc.add(HEAD), node);
    }

    fn set_tail(&mut self, heap: &mut Heap, node: Addr) {
        heap.write_addr(self.desc.add(TAIL), node);
    }

    fn set_len(&mut self, heap: &mut Heap, len: usize) {
        heap.write_u32(self.desc.add(LENGTH), len as u32);
    }
}

#[inline]
fn node_of(iter: Addr) -> Addr {
    iter.sub(NODE_HEADER_SIZE)
}

#[inline]
fn data_of(node: Addr) -> Option<Addr> {
    node.non_null().map(|node| node.add(NODE_HEADER_SIZE))
}

/// Iterator over the element handles of a [`RawList`].
pub struct Iter<'h> {
    heap: &'h Heap,
    current: Option<Addr>,
}

impl Iterator for Iter<'_> {
    type Item = Addr;

    fn next(&mut self) -> Option<Self::Item> {
        let iter = self.current?;
        self.current = data_of(self.heap.read_addr(node_of(iter).add(NEXT)));
        Some(iter)
    }
}

/// Statically typed view over a [`RawList`] holding `T`s. Handles are the
/// same [`Addr`]s the raw list uses.
#[derive(Debug)]
pub struct List<T: Element> {
    raw: RawList,
    marker: PhantomData<T>,
}

impl<T: Element> List<T> {
    pub fn new(heap: &mut Heap) -> HeapResult<Self> {
        Ok(Self::from_raw(RawList::new(heap, T::SIZE)?))
    }

    /// The caller vouches that `raw` holds `T`s.
    pub fn from_raw(raw: RawList) -> Self {
        Self {
            raw,
            marker: PhantomData,
        }
    }

    pub fn as_raw(&self) -> &RawList {
        &self.raw
    }

    pub fn into_raw(self) -> RawList {
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

    pub fn head(&self, heap: &Heap) -> Option<Addr> {
        self.raw.head(heap)
    }

    pub fn tail(&self, heap: &Heap) -> Option<Addr> {
        self.raw.tail(heap)
    }

    pub fn prev(&self, heap: &Heap, handle: Addr) -> Option<Addr> {
        self.raw.prev(heap, handle)
    }

    pub fn next(&self, heap: &Heap, handle: Addr) -> Option<Addr> {
        self.raw.next(heap, handle)
    }

    pub fn get(&self, heap: &Heap, handle: Addr) -> T {
        T::read_from(heap.bytes(handle, T::SIZE))
    }

    pub fn set(&mut self, heap: &mut Heap, handle: Addr, value: T) {
        value.write_to(heap.bytes_mut(handle, T::SIZE));
    }

    pub fn push(&mut self, heap: &mut Heap, value: T) -> HeapResult<Addr> {
        let handle = self.raw.push(heap)?;
        self.set(heap, handle, value);
        Ok(handle)
    }

    pub fn insert_before(&mut self, heap: &mut Heap, handle: Addr, value: T) -> HeapResult<Addr> {
        let new = self.raw.insert_l(heap, handle)?;
        self.set(heap, new, value);
        Ok(new)
    }

    pub fn insert_after(&mut self, heap: &mut Heap, handle: Addr, value: T) -> HeapResult<Addr> {
        let new = self.raw.insert_r(heap, handle)?;
        self.set(heap, new, value);
        Ok(new)
    }

    pub fn remove(&mut self, heap: &mut Heap, handle: Addr) -> T {
        let value = self.get(heap, handle);
        self.raw.remove(heap, handle);
        value
    }

    pub fn concat(&mut self, heap: &mut Heap, other: List<T>) {
        self.raw.concat(heap, other.raw)
    }

    pub fn clear(&mut self, heap: &mut Heap) {
        self.raw.clear(heap)
    }

    pub fn reverse(&mut self, heap: &mut Heap) {
        self.raw.reverse(heap)
    }

    pub fn iter<'h>(&self, heap: &'h Heap) -> impl Iterator<Item = T> + 'h {
        self.raw
            .iter(heap)
            .map(move |handle| T::read_from(heap.bytes(handle, T::SIZE)))
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

    fn filled(heap: &mut Heap, values: &[u32]) -> List<u32> {
        let mut list = List::new(heap).unwrap();
        for v in values {
            list.push(heap, *v).unwrap();
        }
        list
    }

    /// Walks the list both ways and checks every link and the length.
    fn assert_consistent(heap: &Heap, list: &RawList) {
        let len = list.len(heap);
        assert_eq!(list.head(heap).is_none(), len == 0);
        assert_eq!(list.tail(heap).is_none(), len == 0);

        let mut count = 0;
        let mut prev = None;
        let mut current = list.head(heap);
        while let Some(iter) = current {
            assert_eq!(list.prev(heap, iter), prev);
            if let Some(next) = list.next(heap, iter) {
                assert_eq!(list.prev(heap, next), Some(iter));
            }
            prev = Some(iter);
            current = list.next(heap, iter);
            count += 1;
        }
        assert_eq!(prev, list.tail(heap));
        assert_eq!(count, len);
    }

    #[test]
    fn new_list_is_empty() {
        let mut heap = heap();
        let list = RawList::new(&mut heap, 4).unwrap();

        assert_eq!(list.len(&heap), 0);
        assert!(list.is_empty(&heap));
        assert!(list.iter(&heap).next().is_none());
        assert_consistent(&heap, &list);
    }

    #[test]
    fn push_appends_in_order() {
        let mut heap = heap();
        let list = filled(&mut heap, &[1, 2, 3]);

        assert_eq!(list.to_vec(&heap), vec![1, 2, 3]);
        assert_eq!(list.get(&heap, list.head(&heap).unwrap()), 1);
        assert_eq!(list.get(&heap, list.tail(&heap).unwrap()), 3);
        assert_consistent(&heap, list.as_raw());
    }

    #[test]
    fn handles_point_past_the_node_header() {
        let mut heap = heap();
        let mut list = RawList::new(&mut heap, 4).unwrap();

        let iter = list.push(&mut heap).unwrap();

        assert_eq!(Heap::payload_size(&heap, iter.sub(NODE_HEADER_SIZE)), 12);
    }

    #[test]
    fn insert_on_both_sides() {
        let mut heap = heap();
        let mut list = filled(&mut heap, &[2, 4]);
        let head = list.head(&heap).unwrap();
        let tail = list.tail(&heap).unwrap();

        list.insert_before(&mut heap, head, 1).unwrap();
        list.insert_after(&mut heap, head, 3).unwrap();
        let last = list.insert_after(&mut heap, tail, 5).unwrap();

        assert_eq!(list.to_vec(&heap), vec![1, 2, 3, 4, 5]);
        assert_eq!(list.tail(&heap), Some(last));
        assert_eq!(list.get(&heap, list.head(&heap).unwrap()), 1);
        assert_consistent(&heap, list.as_raw());
    }

    #[test]
    fn remove_boundaries_and_middle() {
        let mut heap = heap();
        let mut list = filled(&mut heap, &[1, 2, 3, 4]);
        let handles: Vec<Addr> = list.as_raw().iter(&heap).collect();

        assert_eq!(list.remove(&mut heap, handles[0]), 1);
        assert_consistent(&heap, list.as_raw());
        assert_eq!(list.remove(&mut heap, handles[3]), 4);
        assert_consistent(&heap, list.as_raw());
        assert_eq!(list.remove(&mut heap, handles[1]), 2);
        assert_eq!(list.to_vec(&heap), vec![3]);
        assert_eq!(list.remove(&mut heap, handles[2]), 3);

        assert!(list.is_empty(&heap));
        assert_consistent(&heap, list.as_raw());
    }

    #[test]
    fn concat_splices_and_consumes() {
        let mut heap = heap();
        let mut a = filled(&mut heap, &[1, 2]);
        let b = filled(&mut heap, &[3, 4, 5]);

        a.concat(&mut heap, b);

        assert_eq!(a.to_vec(&heap), vec![1, 2, 3, 4, 5]);
        assert_eq!(a.len(&heap), 5);
        assert_consistent(&heap, a.as_raw());
    }

    #[test]
    fn concat_with_empty_sides() {
        let mut heap = heap();
        let mut empty = List::<u32>::new(&mut heap).unwrap();
        let b = filled(&mut heap, &[7, 8]);
        empty.concat(&mut heap, b);
        assert_eq!(empty.to_vec(&heap), vec![7, 8]);
        assert_consistent(&heap, empty.as_raw());

        let nothing = List::<u32>::new(&mut heap).unwrap();
        empty.concat(&mut heap, nothing);
        assert_eq!(empty.to_vec(&heap), vec![7, 8]);
        assert_consistent(&heap, empty.as_raw());
    }

    #[test]
    fn reverse_flips_order() {
        let mut heap = heap();
        let mut list = filled(&mut heap, &[1, 2, 3, 4]);

        list.reverse(&mut heap);

        assert_eq!(list.to_vec(&heap), vec![4, 3, 2, 1]);
        assert_consistent(&heap, list.as_raw());
    }

    #[test]
    fn clear_and_free_release_every_node() {
        let mut heap = heap();
        let mut list = filled(&mut heap, &[1; 30]);

        list.clear(&mut heap);
        assert!(list.is_empty(&heap));
        assert_consistent(&heap, list.as_raw());

        list.push(&mut heap, 9).unwrap();
        list.free(&mut heap);

        assert_eq!(heap.blocks().count(), 1);
        heap.check().unwrap();
    }

    proptest! {
        #[test]
        fn matches_a_vec_model(
            ops in proptest::collection::vec(
                (0u8..4, any::<prop::sample::Index>(), any::<u32>()),
                1..80,
            )
        ) {
            let mut heap = heap();
            let mut list = List::<u32>::new(&mut heap).unwrap();
            let mut model: Vec<u32> = Vec::new();

            for (op, pick, value) in ops {
                let handles: Vec<Addr> = list.as_raw().iter(&heap).collect();
                match op {
                    0 => {
                        list.push(&mut heap, value).unwrap();
                        model.push(value);
                    }
                    _ if handles.is_empty() => continue,
                    1 => {
                        let i = pick.index(handles.len());
                        list.insert_before(&mut heap, handles[i], value).unwrap();
                        model.insert(i, value);
                    }
                    2 => {
                        let i = pick.index(handles.len());
                        list.insert_after(&mut heap, handles[i], value).unwrap();
                        model.insert(i + 1, value);
                    }
                    _ => {
                        let i = pick.index(handles.len());
                        prop_assert_eq!(list.remove(&mut heap, handles[i]), model.remove(i));
                    }
                }

                assert_consistent(&heap, list.as_raw());
                prop_assert_eq!(list.to_vec(&heap), model.clone());
            }
        }

        #[test]
        fn reverse_twice_is_identity(values in proptest::collection::vec(any::<u32>(), 0..40)) {
            let mut heap = heap();
            let mut list = filled(&mut heap, &values);

            list.reverse(&mut heap);
            list.reverse(&mut heap);

            prop_assert_eq!(list.to_vec(&heap), values);
            assert_consistent(&heap, list.as_raw());
        }
    }
}

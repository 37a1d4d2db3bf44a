//! # linheap
//!
//! A small heap over one growable linear address space, plus three containers
//! that live entirely inside it: a resizable array, a doubly linked list and a
//! separate-chaining hash map.
//!
//! ```text
//!   linheap
//!   ├── space     - AddressSpace: one reservation, committed in 64 KiB pages
//!   ├── heap      - Heap: first-fit allocator with boundary tags
//!   ├── array     - RawArray / Array<T>
//!   ├── list      - RawList  / List<T>
//!   └── map       - RawMap   / Map<V>, keyed by Key::{Inline, Bytes}
//! ```
//!
//! Every "pointer" is an [`Addr`], a 32-bit offset into the address space.
//! The heap is an explicit context object: containers hold only the offset
//! of their descriptor and take the [`Heap`] on every call. Any number of
//! independent heaps can coexist.
//!
//! ## Quick Start
//!
//! ```rust
//! use linheap::{Array, Heap, HeapConfig, Map};
//!
//! let mut heap = Heap::new(HeapConfig::default())?;
//!
//! let mut squares = Array::<u32>::new(&mut heap)?;
//! for i in 0..10 {
//!     squares.push(&mut heap, i * i)?;
//! }
//! assert_eq!(squares.get(&heap, 3), Some(9));
//!
//! let mut ages = Map::<u8>::new(&mut heap, 16)?;
//! ages.insert(&mut heap, "ada", 36)?;
//! assert_eq!(ages.get(&heap, "ada"), Some(36));
//!
//! squares.free(&mut heap);
//! ages.free(&mut heap);
//! # Ok::<(), linheap::HeapError>(())
//! ```
//!
//! ## Raw engines
//!
//! The `Raw*` types are type-erased. They work on element, key and value
//! sizes given at runtime and hand out [`Addr`]s of uninitialized slots for
//! the caller to fill through [`Heap::bytes_mut`] or [`Heap::write_u32`].
//! Such an address is only good until the next call that may grow or move
//! the structure. A borrowed `&mut [u8]` view keeps the heap borrowed, so
//! that rule is enforced for as long as the view lives.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: a [`Heap`] is neither `Send` nor `Sync`.
//! - **Never shrinks**: neither the address space nor a resized block.
//! - **No rehashing**: a map's bucket count is fixed at creation.

mod addr;
pub mod array;
mod block;
pub mod config;
mod element;
mod error;
pub mod heap;
mod kernel;
pub mod list;
pub mod map;
pub mod space;
mod utils;

pub use addr::Addr;
pub use array::{Array, RawArray};
pub use block::Block;
pub use config::{HeapConfig, PAGE_SIZE};
pub use element::Element;
pub use error::{HeapError, HeapResult};
pub use heap::{Heap, HeapStats};
pub use list::{List, RawList};
pub use map::{Key, Map, RawMap};
pub use space::AddressSpace;

pub mod heap;
pub mod iterator;

pub use heap::{TableHeap, TableHeapError};
pub use iterator::TableIterator;

pub mod bucket;
pub mod directory;
pub mod error;
pub mod index;
pub mod key;

pub use error::HashIndexError;
pub use index::ExtendibleHashIndex;
pub use key::{FixedCodec, Fnv1aHasher, IdentityHasher, IndexKey, KeyHasher};

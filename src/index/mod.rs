//! Content-hash index: keys, packed item descriptors, and the Robin Hood
//! hash table mapping one to the other.

pub mod item;
pub mod key;
pub mod table;

pub use item::ItemDescriptor;
pub use key::{CacheKey, KEY_LEN};
pub use table::HashIndex;

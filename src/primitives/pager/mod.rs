#![forbid(unsafe_code)]

mod file;
mod mem;
mod store;

pub use file::FileStore;
pub use mem::MemStore;
pub use store::{NullStore, PageStore};

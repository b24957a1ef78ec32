//! Object store access: bucket handles and client construction.

mod bucket;
mod store;

pub use bucket::{Bucket, ListEntry, ListPage, ListPager, StoredObject};
pub use store::open_bucket;

//! File I/O for recordings and station catalogs.

mod store;

pub use store::{read_catalog, read_recordings, write_catalog, write_recordings, Format};

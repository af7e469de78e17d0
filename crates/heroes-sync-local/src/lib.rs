//! Network-free heroes-sync backends.

mod file_kv;
pub mod local_store;
pub mod url_store;

pub use file_kv::FileKeyValueStore;
pub use local_store::{LocalEncryptedStore, LocalStoreConfig};
pub use url_store::{UrlEmbeddedStore, UrlStoreConfig};

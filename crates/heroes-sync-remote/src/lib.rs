//! Networked heroes-sync backends: JSONBin bucket, GitHub Gist snippets and the Firebase
//! Realtime Database.

pub mod bucket;
mod http;
pub mod realtime;
pub mod snippet;

pub use bucket::{JsonBinConfig, RemoteBucket};
pub use realtime::{FirebaseConfig, RealtimeStats, RealtimeStore};
pub use snippet::{GistConfig, GistInfo, SnippetStore};

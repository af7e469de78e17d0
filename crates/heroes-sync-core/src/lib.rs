//! Core traits and types for heroes-sync storage backends.
//!
//! This crate defines the abstractions shared by every transport:
//! - `Payload`: the synchronized record and its wire normalization
//! - `SyncBackend`: save / load / check-for-updates contract
//! - `SubscribableBackend` + `SubscriptionManager`: push notifications
//! - `resolve`: timestamp-based freshness resolution
//! - `CredentialProvider`: pluggable credential source
//! - `KeyValueStore`: local storage seam

mod backend;
mod credential;
mod error;
mod freshness;
mod kv;
mod naming;
mod payload;
mod subscription;
pub mod wire;

pub use backend::{
    BackendKind, ChangeCallback, ConnectionReport, SaveOutcome, SubscribableBackend, SyncBackend,
};
pub use credential::{
    require_credential, Credential, CredentialProvider, StaticCredentials, StoredCredentials,
};
pub use error::SyncError;
pub use freshness::{is_newer, resolve, Freshness};
pub use kv::{KeyValueStore, MemoryKeyValueStore};
pub use naming::{Namespace, DEFAULT_LABEL, DEFAULT_NAMESPACE};
pub use payload::{validate_tournament, Avatars, Hero, Payload, WriterClock, PAYLOAD_VERSION};
pub use subscription::{current_runtime, deliver, SubscriptionHandle, SubscriptionManager};

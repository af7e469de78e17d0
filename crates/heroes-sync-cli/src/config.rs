use std::path::PathBuf;

use clap::{Parser, Subcommand};
use heroes_sync_core::{BackendKind, Namespace, DEFAULT_LABEL, DEFAULT_NAMESPACE};
use heroes_sync_local::local_store::DEFAULT_STORAGE_KEY;
use heroes_sync_local::url_store::DEFAULT_MAX_URL_LENGTH;
use heroes_sync_local::FileKeyValueStore;
use heroes_sync_remote::bucket::DEFAULT_JSONBIN_URL;
use heroes_sync_remote::snippet::DEFAULT_GITHUB_API_URL;
use url::Url;

/// Configuration for the heroes-sync client.
#[derive(Parser, Debug, Clone)]
#[command(name = "heroes-sync")]
#[command(about = "Save, load and watch tournament hero data across storage backends")]
#[command(version)]
pub struct Config {
    /// Backend: remote_bucket (jsonbin), realtime_store (firebase), snippet_store (gist),
    /// local_encrypted_store (local) or url_embedded_store (url)
    #[arg(long, default_value = "local", env = "HEROES_SYNC_BACKEND")]
    pub backend: BackendKind,

    /// Backend token: JSONBin master key, GitHub token or Firebase auth secret
    #[arg(long, env = "HEROES_SYNC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Backend resource: bin id, gist id or Firebase database URL
    #[arg(long, env = "HEROES_SYNC_RESOURCE_ID")]
    pub resource_id: Option<String>,

    /// Namespace used in resource names and paths
    #[arg(long, default_value = DEFAULT_NAMESPACE, env = "HEROES_SYNC_NAMESPACE")]
    pub namespace: String,

    /// Display label used in gist descriptions
    #[arg(long, default_value = DEFAULT_LABEL, env = "HEROES_SYNC_LABEL")]
    pub label: String,

    /// JSONBin API root
    #[arg(long, default_value = DEFAULT_JSONBIN_URL, env = "HEROES_SYNC_JSONBIN_URL")]
    pub jsonbin_url: String,

    /// GitHub API root
    #[arg(long, default_value = DEFAULT_GITHUB_API_URL, env = "HEROES_SYNC_GITHUB_API_URL")]
    pub github_api_url: String,

    /// Local key-value file for the local backend and stored credentials
    /// (default: <data dir>/heroes-sync/local-storage.json)
    #[arg(long, env = "HEROES_SYNC_STORE_PATH")]
    pub store_path: Option<PathBuf>,

    /// Key prefix for local backend entries
    #[arg(long, default_value = DEFAULT_STORAGE_KEY, env = "HEROES_SYNC_STORAGE_KEY")]
    pub storage_key: String,

    /// Prefix of the stored credential keys
    #[arg(long, default_value = "heroes_sync", env = "HEROES_SYNC_CREDENTIALS_KEY")]
    pub credentials_key: String,

    /// Shareable URL the url backend reads from and writes to
    #[arg(long, default_value = "http://localhost/", env = "HEROES_SYNC_URL")]
    pub url: Url,

    /// Maximum length of the shareable URL
    #[arg(long, default_value_t = DEFAULT_MAX_URL_LENGTH, env = "HEROES_SYNC_MAX_URL_LENGTH")]
    pub max_url_length: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Save heroes and avatars from a JSON file
    Save {
        tournament: String,
        /// JSON file with `heroes`, `avatars` and an optional `timestamp`
        file: PathBuf,
    },
    /// Print the stored payload
    Load { tournament: String },
    /// Print the stored payload only if it is newer than --since
    Check {
        tournament: String,
        #[arg(long)]
        since: i64,
    },
    /// Print every change pushed for a tournament until Ctrl+C
    Watch { tournament: String },
    /// Check that the backend is reachable with the current credentials
    Probe,
    /// Store --token and --resource-id for later runs
    Setup,
    /// Forget stored credentials
    ClearCredentials,
}

impl Config {
    pub fn namespace(&self) -> Namespace {
        Namespace::new(self.namespace.clone(), self.label.clone())
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(FileKeyValueStore::default_path)
    }

    /// Whether credentials were given on the command line or in the environment.
    pub fn has_inline_credentials(&self) -> bool {
        self.token.is_some() || self.resource_id.is_some()
    }
}

//! Resource naming shared by every backend.
//!
//! Per-tournament resources are named `<namespace>-<tournament>`; this is what lets data
//! written by one backend be found by another.

use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "xeetflow";
pub const DEFAULT_LABEL: &str = "XeetFlow";

/// Application namespace for resource names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    /// Machine name used in keys and paths.
    pub name: String,
    /// Display name used in human-readable descriptions.
    pub label: String,
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAMESPACE.to_string(),
            label: DEFAULT_LABEL.to_string(),
        }
    }
}

impl Namespace {
    pub fn new(name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
        }
    }

    /// `<namespace>-<tournament>`
    pub fn resource_name(&self, tournament: &str) -> String {
        format!("{}-{}", self.name, tournament)
    }

    /// Bucket display name: `<namespace>-<tournament>-data`.
    pub fn bucket_name(&self, tournament: &str) -> String {
        format!("{}-data", self.resource_name(tournament))
    }

    /// Snippet file name: `<namespace>-<tournament>.json`.
    pub fn snippet_file_name(&self, tournament: &str) -> String {
        format!("{}.json", self.resource_name(tournament))
    }

    /// Realtime database path: `<namespace>/<tournament>`.
    pub fn realtime_path(&self, tournament: &str) -> String {
        format!("{}/{}", self.name, tournament)
    }
}

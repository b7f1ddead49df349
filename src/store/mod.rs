//! Versioned blob store seam. Writes can be conditioned on the object's current generation,
//! which is the only compare-and-swap primitive the index updater relies on.

pub mod gcs;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StoreError;

pub use gcs::GcsStore;

pub const CRL_CONTENT_TYPE: &str = "application/pkix-crl";
pub const CRL_CACHE_CONTROL: &str = "private, max-age=0, no-transform";

/// Opaque version token; changes on every successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub i64);

impl std::fmt::Display for Generation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadOptions {
    /// Reject the write with [`StoreError::Conflict`] unless the current generation matches.
    pub if_generation_match: Option<Generation>,
    pub content_type: Option<String>,
    pub cache_control: Option<String>,
}

impl UploadOptions {
    pub fn conditional(generation: Generation) -> Self {
        Self {
            if_generation_match: Some(generation),
            ..Self::default()
        }
    }

    pub fn crl() -> Self {
        Self {
            if_generation_match: None,
            content_type: Some(CRL_CONTENT_TYPE.to_string()),
            cache_control: Some(CRL_CACHE_CONTROL.to_string()),
        }
    }
}

#[async_trait]
pub trait VersionedStore: Send + Sync {
    async fn generation(&self, key: &str) -> Result<Generation, StoreError>;

    async fn download(&self, key: &str) -> Result<Bytes, StoreError>;

    /// Returns the generation of the newly written object.
    async fn upload(
        &self,
        key: &str,
        content: Bytes,
        options: &UploadOptions,
    ) -> Result<Generation, StoreError>;

    /// Lets `user` read the object.
    async fn grant_reader(&self, key: &str, user: &str) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Object key for a file owned by `user`.
pub fn user_object_key(user: &str, file: &str) -> String {
    format!("{user}/{file}")
}

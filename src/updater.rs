//! Compare-and-swap line editing of shared index documents.
//!
//! Several independent processes may edit the same document. Every attempt re-reads the
//! generation and content, rewrites the lines, and writes back conditioned on the generation
//! it read. A generation mismatch means another writer won; anything else is fatal.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::backoff::{retry, BackoffPolicy, JitterSource, OsJitter, RetryError};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::store::{user_object_key, Generation, UploadOptions, VersionedStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated {
        generation: Generation,
        /// Conditional writes that lost a race before this one landed.
        conflicts: u32,
        waited: Duration,
    },
    /// Every attempt conflicted until the backoff ceiling.
    Exhausted { attempts: u32, waited: Duration },
}

impl UpdateOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, UpdateOutcome::Updated { .. })
    }
}

/// Drops every line containing `remove_marker` and every empty line, keeps the rest in order,
/// and appends `replacement_line` when it is non-empty. Works on raw bytes: lines owned by
/// other writers are copied through untouched, whatever their encoding.
pub fn rewrite_lines(content: &[u8], remove_marker: &[u8], replacement_line: &[u8]) -> Vec<u8> {
    let mut rewritten = Vec::with_capacity(content.len() + replacement_line.len());
    for line in content.split(|byte| *byte == b'\n') {
        if !line.is_empty() && !contains(line, remove_marker) {
            rewritten.extend_from_slice(line);
            rewritten.push(b'\n');
        }
    }
    rewritten.extend_from_slice(replacement_line);
    rewritten
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}

pub struct IndexUpdater {
    store: Arc<dyn VersionedStore>,
    policy: BackoffPolicy,
    jitter: Arc<dyn JitterSource>,
}

impl IndexUpdater {
    pub fn new(store: Arc<dyn VersionedStore>, policy: BackoffPolicy) -> Self {
        Self {
            store,
            policy,
            jitter: Arc::new(OsJitter),
        }
    }

    pub fn from_config(store: Arc<dyn VersionedStore>, config: &StoreConfig) -> Self {
        Self::new(
            store,
            BackoffPolicy::exponential(config.backoff_unit, config.backoff_ceiling_units),
        )
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub async fn update(
        &self,
        key: &str,
        remove_marker: &str,
        replacement_line: &str,
    ) -> Result<UpdateOutcome, StoreError> {
        let result = retry(
            &self.policy,
            self.jitter.as_ref(),
            StoreError::is_conflict,
            |attempt| self.attempt(key, remove_marker, replacement_line, attempt),
        )
        .await;

        match result {
            Ok(retried) => {
                tracing::info!(
                    %key,
                    generation = %retried.value,
                    conflicts = retried.state.attempt,
                    "index updated",
                );
                Ok(UpdateOutcome::Updated {
                    generation: retried.value,
                    conflicts: retried.state.attempt,
                    waited: retried.state.elapsed,
                })
            }
            Err(RetryError::Exhausted { state, last }) => {
                tracing::error!(
                    %key,
                    attempts = state.attempt,
                    waited_ms = state.elapsed.as_millis() as u64,
                    error = %last,
                    "gave up updating index after repeated conflicts",
                );
                Ok(UpdateOutcome::Exhausted {
                    attempts: state.attempt,
                    waited: state.elapsed,
                })
            }
            Err(RetryError::Fatal(err)) => {
                tracing::error!(%key, ?err, "index update failed");
                Err(err)
            }
        }
    }

    /// Edits `"{user}/{index_file}"` and, once the write lands, lets `user` read it.
    pub async fn update_user_index(
        &self,
        user: &str,
        index_file: &str,
        remove_marker: &str,
        replacement_line: &str,
    ) -> Result<UpdateOutcome, StoreError> {
        let key = user_object_key(user, index_file);
        let outcome = self.update(&key, remove_marker, replacement_line).await?;
        if outcome.is_updated() {
            self.store.grant_reader(&key, user).await?;
        }
        Ok(outcome)
    }

    async fn attempt(
        &self,
        key: &str,
        remove_marker: &str,
        replacement_line: &str,
        attempt: u32,
    ) -> Result<Generation, StoreError> {
        // Never reuse a read across attempts: a concurrent writer may have moved both.
        let generation = self.store.generation(key).await?;
        let current = self.store.download(key).await?;
        let rewritten = rewrite_lines(
            &current,
            remove_marker.as_bytes(),
            replacement_line.as_bytes(),
        );
        tracing::debug!(%key, %generation, attempt, "writing index conditionally");
        self.store
            .upload(
                key,
                Bytes::from(rewritten),
                &UploadOptions::conditional(generation),
            )
            .await
    }
}

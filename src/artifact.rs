//! Per-attempt artifact persistence
//!
//! Every attempt's generated artifact is written keyed by (hypothesis id,
//! step id, attempt number) for audit and replay. The store is write-only
//! from the pipeline's perspective: a failed write is warned and ignored,
//! never counted against an attempt.

use anyhow::{Context, Result};
use blake3::Hasher;
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use tracing::warn;

/// On-disk form of one stored attempt.
#[derive(Debug, Serialize)]
struct StoredAttempt<'a> {
    hypothesis: &'a str,
    step: &'a str,
    attempt: u32,
    kind: &'a str,
    blake3: String,
    generated_at: DateTime<Utc>,
    artifact: &'a str,
}

/// Stores attempt artifacts under a root directory.
#[derive(Debug)]
pub struct ArtifactStore {
    root: Utf8PathBuf,
}

impl ArtifactStore {
    #[must_use]
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Utf8PathBuf {
        &self.root
    }

    /// Persist one attempt's artifact.
    ///
    /// # Errors
    /// Returns an error if the directory or file cannot be written.
    pub fn store(
        &self,
        hypothesis: &str,
        step: &str,
        attempt: u32,
        kind: &str,
        artifact: &str,
    ) -> Result<Utf8PathBuf> {
        let dir = self
            .root
            .join(safe_component(hypothesis))
            .join(safe_component(step));
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {dir}"))?;

        let mut hasher = Hasher::new();
        hasher.update(artifact.as_bytes());
        let stored = StoredAttempt {
            hypothesis,
            step,
            attempt,
            kind,
            blake3: hasher.finalize().to_hex().to_string(),
            generated_at: Utc::now(),
            artifact,
        };

        let path = dir.join(format!("{kind}-attempt-{attempt:02}.json"));
        let body = serde_json::to_string_pretty(&stored)
            .with_context(|| format!("failed to serialize attempt for {path}"))?;
        fs::write(&path, body).with_context(|| format!("failed to write {path}"))?;
        Ok(path)
    }

    /// Best-effort variant of [`store`](Self::store): warns on failure.
    pub fn record(&self, hypothesis: &str, step: &str, attempt: u32, kind: &str, artifact: &str) {
        if let Err(err) = self.store(hypothesis, step, attempt, kind, artifact) {
            warn!(
                hypothesis = %hypothesis,
                step = %step,
                attempt,
                error = %err,
                "failed to persist attempt artifact"
            );
        }
    }
}

/// Keep identifiers usable as single path components.
fn safe_component(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | '.' => '_',
            other => other,
        })
        .collect()
}

//! Similarity propagation: move near-duplicates of a snippet to a state.
//!
//! Runs on demand through [`Client::update_similar_snippets`], and after
//! every state change on a client built with [`Client::with_similarity`].

use tracing::{debug, info, warn};

use super::{Client, ClientError};
use crate::models::DiscoveryState;

impl Client {
    /// Transition every `new` discovery in scope whose snippet embedding has
    /// cosine similarity above `threshold` with `target_snippet`. Returns the
    /// number of transitions.
    ///
    /// Missing embeddings are computed and stored on the way. The threshold
    /// is used as given; range checks belong to the caller.
    pub async fn update_similar_snippets(
        &self,
        target_snippet: &str,
        new_state: &str,
        repo_url: &str,
        file_name: Option<&str>,
        threshold: f32,
    ) -> Result<usize, ClientError> {
        let state: DiscoveryState = new_state.parse()?;
        self.propagate(target_snippet, state, repo_url, file_name, threshold)
            .await
    }

    /// Follow-up of a state change when similarity propagation is enabled.
    /// Failures are logged; the change itself already succeeded.
    pub(super) async fn propagate_change(
        &self,
        repo_url: &str,
        file_name: Option<&str>,
        snippet: &str,
        state: DiscoveryState,
    ) {
        let Some(threshold) = self.similarity else {
            return;
        };
        if state == DiscoveryState::New {
            return;
        }
        if let Err(e) = self.propagate(snippet, state, repo_url, file_name, threshold).await {
            warn!(repo = repo_url, error = %e, "similarity propagation failed");
        }
    }

    async fn propagate(
        &self,
        target_snippet: &str,
        state: DiscoveryState,
        repo_url: &str,
        file_name: Option<&str>,
        threshold: f32,
    ) -> Result<usize, ClientError> {
        let target = self.embedder.embed(target_snippet)?;

        let mut similar = Vec::new();
        for discovery in self.store.get_pending_discoveries(repo_url, file_name).await? {
            let embedding = match discovery.embedding {
                Some(e) if e.len() == target.len() => e,
                _ => {
                    let e = self.embedder.embed(&discovery.snippet)?;
                    self.store.set_embedding(discovery.id, &e).await?;
                    e
                }
            };
            let score = crate::similarity::cosine_similarity(&target, &embedding);
            if score > threshold {
                debug!(id = discovery.id, score, "similar snippet");
                similar.push(discovery.id);
            }
        }

        if !similar.is_empty() {
            self.store.update_discoveries(&similar, state).await?;
        }
        info!(repo = repo_url, state = %state, updated = similar.len(), "propagated state to similar snippets");
        Ok(similar.len())
    }

    /// Compute and store embeddings for the given discoveries.
    pub(crate) async fn embed_discoveries(&self, ids: &[i64]) -> Result<(), ClientError> {
        for discovery in self.store.get_discoveries_by_ids(ids).await? {
            if discovery.embedding.is_some() {
                continue;
            }
            let embedding = self.embedder.embed(&discovery.snippet)?;
            self.store.set_embedding(discovery.id, &embedding).await?;
        }
        Ok(())
    }
}

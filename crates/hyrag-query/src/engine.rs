//! Fusion engine for hybrid retrieval.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::time::{timeout_at, Instant as Deadline};
use tracing::{debug, info, warn};

use hyrag_core::{
    Backend, DocId, FusedHit, Language, RagError, RankedHit, Result, RetrievalConfig, SearchHit,
};

use crate::fusion::{reciprocal_rank_fusion, FusionParams};
use crate::registry::{BackendBundle, BackendRegistry, DenseBackend};

/// What happened to one backend during a retrieval.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BackendOutcome {
    /// Returned `hits` results before the deadline.
    Ok { hits: usize },
    /// Did not answer before the deadline.
    TimedOut,
    /// Returned an error.
    Failed { code: &'static str, message: String },
    /// Not configured for this language.
    Disabled,
}

impl BackendOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

/// Full record of a retrieval call.
#[derive(Debug, Clone, Serialize)]
pub struct Retrieval {
    /// Resolved results, best first.
    pub hits: Vec<SearchHit>,

    /// Fused ranking after truncation, before resolution.
    pub fused: Vec<FusedHit>,

    pub sparse: BackendOutcome,
    pub dense: BackendOutcome,

    /// Ids that made the cut but could not be resolved.
    pub dropped: Vec<DocId>,

    pub latency_ms: u64,
}

/// Result of running one backend under the deadline.
enum Attempt {
    Hits(Vec<RankedHit>),
    TimedOut,
    Failed(RagError),
    Disabled,
}

impl Attempt {
    fn outcome(&self) -> BackendOutcome {
        match self {
            Self::Hits(hits) => BackendOutcome::Ok { hits: hits.len() },
            Self::TimedOut => BackendOutcome::TimedOut,
            Self::Failed(e) => BackendOutcome::Failed {
                code: e.error_code(),
                message: e.to_string(),
            },
            Self::Disabled => BackendOutcome::Disabled,
        }
    }
}

/// Hybrid retrieval over one language's backends.
///
/// Queries the sparse and dense backends concurrently, fuses their rankings
/// with weighted RRF and resolves the top results through the document
/// store. Holds no per-call state and can be shared across tasks.
pub struct FusionEngine {
    bundle: Arc<BackendBundle>,
    config: RetrievalConfig,
    params: FusionParams,
}

impl FusionEngine {
    /// Create an engine for `config.language`.
    pub fn new(registry: &BackendRegistry, config: RetrievalConfig) -> Result<Self> {
        config.validate()?;
        let bundle = registry.get(config.language)?;
        let params = FusionParams::from(&config);

        info!(
            "Fusion engine ready: language={}, sparse={}, dense={}, weights={}/{}, k={}",
            config.language,
            bundle.has(Backend::Sparse),
            bundle.has(Backend::Dense),
            params.sparse_weight,
            params.dense_weight,
            params.rank_constant
        );

        Ok(Self { bundle, config, params })
    }

    pub fn language(&self) -> Language {
        self.bundle.language()
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieve with the configured default deadline.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>> {
        self.retrieve(query, top_k, self.config.deadline()).await
    }

    /// Retrieve the `top_k` best documents for `query`.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        deadline: Duration,
    ) -> Result<Vec<SearchHit>> {
        Ok(self.retrieve_detailed(query, top_k, deadline).await?.hits)
    }

    /// Retrieve and report per-backend outcomes alongside the hits.
    ///
    /// A deadline too large to represent (such as `Duration::MAX`) means the
    /// backends are awaited without a timeout.
    pub async fn retrieve_detailed(
        &self,
        query: &str,
        top_k: usize,
        deadline: Duration,
    ) -> Result<Retrieval> {
        let start = Instant::now();
        let deadline_at = tokio::time::Instant::now().checked_add(deadline);

        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::invalid_query("query is empty"));
        }
        if top_k == 0 {
            return Err(RagError::invalid_query("top_k must be > 0"));
        }

        let candidate_k = self.config.candidate_k_for(top_k);
        info!("Retrieving top {} for {:?} ({} candidates)", top_k, query, candidate_k);

        let (sparse, dense) = tokio::join!(
            self.sparse_search(query, candidate_k, deadline_at),
            self.dense_search(query, candidate_k, deadline_at)
        );

        let (sparse_outcome, dense_outcome) = (sparse.outcome(), dense.outcome());
        let (sparse_hits, dense_hits) =
            into_rankings(sparse, dense, start.elapsed().as_millis() as u64)?;

        debug!(
            "Sparse returned {} hits, dense returned {} hits",
            sparse_hits.len(),
            dense_hits.len()
        );

        let mut fused = reciprocal_rank_fusion(&sparse_hits, &dense_hits, &self.params);
        debug!("Fused to {} candidates", fused.len());
        fused.truncate(top_k);

        let mut hits = Vec::with_capacity(fused.len());
        let mut dropped = Vec::new();

        for candidate in &fused {
            match self.bundle.store().fetch(&candidate.doc_id).await {
                Ok(Some(doc)) => hits.push(SearchHit {
                    doc_id: doc.id,
                    content: doc.content,
                    metadata: doc.metadata,
                    score: candidate.fused_score,
                }),
                Ok(None) => {
                    let err = RagError::UnresolvableDocument {
                        id: candidate.doc_id.to_string(),
                    };
                    warn!("Dropping hit: {}", err);
                    dropped.push(candidate.doc_id.clone());
                }
                Err(e) => {
                    warn!("Dropping hit {}: document store error: {}", candidate.doc_id, e);
                    dropped.push(candidate.doc_id.clone());
                }
            }
        }

        let latency_ms = start.elapsed().as_millis() as u64;

        info!(
            "Retrieval completed in {}ms, returned {} results ({} dropped)",
            latency_ms,
            hits.len(),
            dropped.len()
        );

        Ok(Retrieval {
            hits,
            fused,
            sparse: sparse_outcome,
            dense: dense_outcome,
            dropped,
            latency_ms,
        })
    }

    async fn sparse_search(&self, query: &str, k: usize, deadline_at: Option<Deadline>) -> Attempt {
        let Some(index) = self.bundle.sparse() else {
            return Attempt::Disabled;
        };

        settle(Backend::Sparse, within(deadline_at, index.search(query, k)).await)
    }

    async fn dense_search(&self, query: &str, k: usize, deadline_at: Option<Deadline>) -> Attempt {
        let Some(DenseBackend { index, encoder }) = self.bundle.dense() else {
            return Attempt::Disabled;
        };

        let search = async {
            let embedding = encoder.encode(query).await?;
            index.search(&embedding, k).await
        };

        settle(Backend::Dense, within(deadline_at, search).await)
    }
}

/// Await `search`, giving up at `deadline_at` if there is one.
///
/// `None` means the deadline passed first.
async fn within<F>(deadline_at: Option<Deadline>, search: F) -> Option<Result<Vec<RankedHit>>>
where
    F: Future<Output = Result<Vec<RankedHit>>>,
{
    match deadline_at {
        Some(at) => timeout_at(at, search).await.ok(),
        None => Some(search.await),
    }
}

fn settle(backend: Backend, result: Option<Result<Vec<RankedHit>>>) -> Attempt {
    match result {
        Some(Ok(hits)) => Attempt::Hits(hits),
        Some(Err(e)) => {
            warn!("{} search failed: {}", backend, e);
            Attempt::Failed(e)
        }
        None => {
            warn!("{} search exceeded the deadline", backend);
            Attempt::TimedOut
        }
    }
}

/// Take the rankings, failing the call when no configured backend produced
/// one.
///
/// All timeouts give `RetrievalTimeout`; otherwise the first backend error
/// is returned. A backend that failed alongside a successful one
/// contributes an empty ranking.
fn into_rankings(
    sparse: Attempt,
    dense: Attempt,
    elapsed_ms: u64,
) -> Result<(Vec<RankedHit>, Vec<RankedHit>)> {
    match (sparse, dense) {
        (Attempt::Hits(s), Attempt::Hits(d)) => Ok((s, d)),
        (Attempt::Hits(s), _) => Ok((s, Vec::new())),
        (_, Attempt::Hits(d)) => Ok((Vec::new(), d)),
        (Attempt::Failed(e), _) | (_, Attempt::Failed(e)) => Err(e),
        _ => Err(RagError::RetrievalTimeout { elapsed_ms }),
    }
}

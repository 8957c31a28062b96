//! Per-language backend bundles, resolved once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use hyrag_core::{
    Backend, DenseIndex, DocumentStore, Language, QueryEncoder, RagError, Result, SparseIndex,
};

/// A dense index paired with the encoder that produces its query vectors.
#[derive(Clone)]
pub struct DenseBackend {
    pub index: Arc<dyn DenseIndex>,
    pub encoder: Arc<dyn QueryEncoder>,
}

/// The backends serving one language.
///
/// At least one of sparse and dense is present.
#[derive(Clone)]
pub struct BackendBundle {
    language: Language,
    sparse: Option<Arc<dyn SparseIndex>>,
    dense: Option<DenseBackend>,
    store: Arc<dyn DocumentStore>,
}

impl BackendBundle {
    pub fn builder(language: Language) -> BundleBuilder {
        BundleBuilder {
            language,
            sparse: None,
            dense: None,
            store: None,
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn sparse(&self) -> Option<&Arc<dyn SparseIndex>> {
        self.sparse.as_ref()
    }

    pub fn dense(&self) -> Option<&DenseBackend> {
        self.dense.as_ref()
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn has(&self, backend: Backend) -> bool {
        match backend {
            Backend::Sparse => self.sparse.is_some(),
            Backend::Dense => self.dense.is_some(),
        }
    }
}

/// Assembles a [`BackendBundle`], degrading past backends that failed to open.
pub struct BundleBuilder {
    language: Language,
    sparse: Option<Result<(Arc<dyn SparseIndex>, Arc<dyn DocumentStore>)>>,
    dense: Option<Result<DenseBackend>>,
    store: Option<Arc<dyn DocumentStore>>,
}

impl BundleBuilder {
    /// Use `index` for sparse search. It also becomes the document store
    /// unless one is set explicitly.
    pub fn sparse<S>(self, index: Arc<S>) -> Self
    where
        S: SparseIndex + 'static,
    {
        self.sparse_result(Ok(index))
    }

    /// Like [`sparse`](Self::sparse), but record an open failure instead.
    pub fn sparse_result<S>(mut self, index: Result<Arc<S>>) -> Self
    where
        S: SparseIndex + 'static,
    {
        self.sparse = Some(index.map(|index| {
            let store: Arc<dyn DocumentStore> = index.clone();
            let index: Arc<dyn SparseIndex> = index;
            (index, store)
        }));
        self
    }

    pub fn dense<D, E>(self, index: Arc<D>, encoder: Arc<E>) -> Self
    where
        D: DenseIndex + 'static,
        E: QueryEncoder + 'static,
    {
        self.dense_result(Ok((index, encoder)))
    }

    pub fn dense_result<D, E>(mut self, backend: Result<(Arc<D>, Arc<E>)>) -> Self
    where
        D: DenseIndex + 'static,
        E: QueryEncoder + 'static,
    {
        self.dense = Some(backend.map(|(index, encoder)| DenseBackend {
            index: index as Arc<dyn DenseIndex>,
            encoder: encoder as Arc<dyn QueryEncoder>,
        }));
        self
    }

    /// Resolve hits through `store` instead of the sparse index.
    pub fn store<T>(mut self, store: Arc<T>) -> Self
    where
        T: DocumentStore + 'static,
    {
        let store: Arc<dyn DocumentStore> = store;
        self.store = Some(store);
        self
    }

    /// Finish the bundle.
    ///
    /// Backends that failed to open are logged and left out. Fails if none
    /// remain, if nothing can resolve documents, if the sparse index was
    /// analyzed for another language, or if the encoder and dense index
    /// disagree on dimension.
    pub fn build(self) -> Result<BackendBundle> {
        let language = self.language;

        let (sparse, sparse_store) = match self.sparse {
            Some(Ok((index, store))) => (Some(index), Some(store)),
            Some(Err(e)) => {
                warn!("{}", unavailable(Backend::Sparse, e));
                (None, None)
            }
            None => (None, None),
        };

        let dense = match self.dense {
            Some(Ok(dense)) => Some(dense),
            Some(Err(e)) => {
                warn!("{}", unavailable(Backend::Dense, e));
                None
            }
            None => None,
        };

        if sparse.is_none() && dense.is_none() {
            return Err(RagError::NoBackendsAvailable {
                language: language.to_string(),
            });
        }

        if let Some(index) = &sparse {
            if index.language() != language {
                return Err(RagError::config(format!(
                    "Sparse index for {} registered under {}",
                    index.language(),
                    language
                )));
            }
        }

        if let Some(dense) = &dense {
            let (expected, actual) = (dense.index.dimension(), dense.encoder.dimension());
            if expected != actual {
                return Err(RagError::DimensionMismatch { expected, actual });
            }
        }

        let store = self
            .store
            .or(sparse_store)
            .ok_or_else(|| RagError::config(format!("No document store for {}", language)))?;

        info!(
            "Backends for {}: sparse={}, dense={}",
            language,
            sparse.is_some(),
            dense.is_some()
        );

        Ok(BackendBundle {
            language,
            sparse,
            dense,
            store,
        })
    }
}

fn unavailable(backend: Backend, cause: RagError) -> RagError {
    match cause {
        e @ RagError::BackendUnavailable { .. } => e,
        e => RagError::backend_unavailable(backend, e.to_string()),
    }
}

/// Language code to backend bundle.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    bundles: HashMap<Language, Arc<BackendBundle>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bundle under its language, replacing any previous one.
    pub fn register(&mut self, bundle: BackendBundle) -> &mut Self {
        self.bundles.insert(bundle.language(), Arc::new(bundle));
        self
    }

    /// Bundle for `language`.
    pub fn get(&self, language: Language) -> Result<Arc<BackendBundle>> {
        self.bundles
            .get(&language)
            .cloned()
            .ok_or_else(|| RagError::UnsupportedLanguage {
                language: language.to_string(),
            })
    }

    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<_> = self.bundles.keys().copied().collect();
        languages.sort();
        languages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeDense, FakeEncoder, FakeSparse};

    #[test]
    fn test_full_bundle() {
        let bundle = BackendBundle::builder(Language::En)
            .sparse(Arc::new(FakeSparse::new(Language::En)))
            .dense(Arc::new(FakeDense::new(4)), Arc::new(FakeEncoder::new(4)))
            .build()
            .unwrap();

        assert!(bundle.has(Backend::Sparse));
        assert!(bundle.has(Backend::Dense));
        assert_eq!(bundle.language(), Language::En);
    }

    #[test]
    fn test_failed_dense_degrades_to_sparse_only() {
        let bundle = BackendBundle::builder(Language::En)
            .sparse(Arc::new(FakeSparse::new(Language::En)))
            .dense_result::<FakeDense, FakeEncoder>(Err(RagError::database("index not found")))
            .build()
            .unwrap();

        assert!(bundle.has(Backend::Sparse));
        assert!(!bundle.has(Backend::Dense));
    }

    #[test]
    fn test_failed_sparse_needs_explicit_store() {
        let result = BackendBundle::builder(Language::En)
            .sparse_result::<FakeSparse>(Err(RagError::database("corrupt")))
            .dense(Arc::new(FakeDense::new(4)), Arc::new(FakeEncoder::new(4)))
            .build();
        assert_eq!(result.err().unwrap().error_code(), "CONFIG_ERROR");

        let bundle = BackendBundle::builder(Language::En)
            .sparse_result::<FakeSparse>(Err(RagError::database("corrupt")))
            .dense(Arc::new(FakeDense::new(4)), Arc::new(FakeEncoder::new(4)))
            .store(Arc::new(FakeSparse::new(Language::En)))
            .build()
            .unwrap();
        assert!(!bundle.has(Backend::Sparse));
        assert!(bundle.has(Backend::Dense));
    }

    #[test]
    fn test_no_backends() {
        let err = BackendBundle::builder(Language::Zh)
            .sparse_result::<FakeSparse>(Err(RagError::database("missing")))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, RagError::NoBackendsAvailable { ref language } if language == "zh"));

        let err = BackendBundle::builder(Language::En).build().err().unwrap();
        assert_eq!(err.error_code(), "NO_BACKENDS_AVAILABLE");
    }

    #[test]
    fn test_dimension_mismatch_is_fatal() {
        let err = BackendBundle::builder(Language::En)
            .sparse(Arc::new(FakeSparse::new(Language::En)))
            .dense(Arc::new(FakeDense::new(768)), Arc::new(FakeEncoder::new(384)))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 768, actual: 384 }));
    }

    #[test]
    fn test_sparse_language_must_match() {
        let err = BackendBundle::builder(Language::En)
            .sparse(Arc::new(FakeSparse::new(Language::Zh)))
            .build()
            .err()
            .unwrap();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = BackendRegistry::new();
        registry.register(
            BackendBundle::builder(Language::Zh)
                .sparse(Arc::new(FakeSparse::new(Language::Zh)))
                .build()
                .unwrap(),
        );

        assert!(registry.get(Language::Zh).is_ok());
        assert_eq!(registry.languages(), vec![Language::Zh]);
        let err = registry.get(Language::En).err().unwrap();
        assert_eq!(err.error_code(), "UNSUPPORTED_LANGUAGE");
    }
}

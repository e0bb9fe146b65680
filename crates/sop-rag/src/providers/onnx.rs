//! Local sentence-transformers embedder on ONNX Runtime
//!
//! Serves as the fallback when the remote provider is unreachable. The
//! default model is all-MiniLM-L6-v2 (384 dims): mean pooling over the last
//! hidden state, then L2 normalisation. Model and tokenizer files are
//! fetched from HuggingFace into the cache directory on first use.

use async_trait::async_trait;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokenizers::Tokenizer;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

use super::embedding::EmbeddingProvider;

const PROVIDER_NAME: &str = "local-minilm";
const HF_BASE: &str = "https://huggingface.co/sentence-transformers";

/// Loaded model shared with blocking inference tasks
struct Model {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimensions: usize,
    max_length: usize,
}

/// Token ids, attention mask and type ids, row-major `[rows, cols]`
struct Encoded {
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
    token_type_ids: Vec<i64>,
    rows: usize,
    cols: usize,
}

/// ONNX Runtime embedding provider
#[derive(Clone)]
pub struct OnnxEmbedder {
    model: Arc<Model>,
    model_name: String,
    batch_size: usize,
}

impl OnnxEmbedder {
    /// Fetch missing model files into `fallback_cache_dir`, then load them
    pub async fn load(config: &EmbeddingConfig) -> Result<Self> {
        let dir = config.fallback_cache_dir.clone();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            Error::Config(format!("Failed to create model cache {}: {}", dir.display(), e))
        })?;

        let model_path = dir.join("model.onnx");
        let tokenizer_path = dir.join("tokenizer.json");
        if !model_path.exists() {
            download(&config.fallback_model, "onnx/model.onnx", &model_path).await?;
        }
        if !tokenizer_path.exists() {
            download(&config.fallback_model, "tokenizer.json", &tokenizer_path).await?;
        }

        let config = config.clone();
        tokio::task::spawn_blocking(move || Self::from_files(&model_path, &tokenizer_path, &config))
            .await?
    }

    /// Load an already downloaded model
    pub fn from_files(model_path: &Path, tokenizer_path: &Path, config: &EmbeddingConfig) -> Result<Self> {
        tracing::info!("Loading local embedding model from {}", model_path.display());

        let threads = std::thread::available_parallelism().map_or(1, |n| n.get()).min(4);
        let session = Session::builder()
            .map_err(|e| Error::Config(format!("ONNX session builder: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::Config(format!("ONNX optimization level: {}", e)))?
            .with_intra_threads(threads)
            .map_err(|e| Error::Config(format!("ONNX thread count: {}", e)))?
            .commit_from_file(model_path)
            .map_err(|e| Error::Config(format!("Failed to load {}: {}", model_path.display(), e)))?;

        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            Error::Config(format!("Failed to load {}: {}", tokenizer_path.display(), e))
        })?;

        Ok(Self {
            model: Arc::new(Model {
                session: Mutex::new(session),
                tokenizer,
                dimensions: config.fallback_dimensions,
                max_length: config.fallback_max_length,
            }),
            model_name: config.fallback_model.clone(),
            batch_size: config.batch_size,
        })
    }

    pub fn model(&self) -> &str {
        &self.model_name
    }
}

impl Model {
    fn encode(&self, texts: &[String]) -> Result<Encoded> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.iter().map(String::as_str).collect::<Vec<_>>(), true)
            .map_err(|e| inference_error(format!("tokenization failed: {}", e)))?;

        let rows = encodings.len();
        let cols = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0)
            .min(self.max_length)
            .max(1);

        let mut encoded = Encoded {
            input_ids: vec![0; rows * cols],
            attention_mask: vec![0; rows * cols],
            token_type_ids: vec![0; rows * cols],
            rows,
            cols,
        };
        for (row, encoding) in encodings.iter().enumerate() {
            let tokens = encoding
                .get_ids()
                .iter()
                .zip(encoding.get_attention_mask())
                .zip(encoding.get_type_ids())
                .take(cols);
            for (col, ((id, mask), type_id)) in tokens.enumerate() {
                let at = row * cols + col;
                encoded.input_ids[at] = i64::from(*id);
                encoded.attention_mask[at] = i64::from(*mask);
                encoded.token_type_ids[at] = i64::from(*type_id);
            }
        }
        Ok(encoded)
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encoded = self.encode(texts)?;
        let shape = vec![encoded.rows, encoded.cols];
        let tensor = |data: &[i64]| {
            Tensor::from_array((shape.clone(), data.to_vec().into_boxed_slice()))
                .map_err(|e| inference_error(format!("tensor creation failed: {}", e)))
        };
        let inputs = vec![
            ("input_ids", tensor(&encoded.input_ids)?.into_dyn()),
            ("attention_mask", tensor(&encoded.attention_mask)?.into_dyn()),
            ("token_type_ids", tensor(&encoded.token_type_ids)?.into_dyn()),
        ];

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| inference_error(format!("inference failed: {}", e)))?;

        let named: Vec<_> = outputs.iter().collect();
        let (_, hidden) = named
            .iter()
            .find(|(name, _)| *name == "last_hidden_state")
            .or_else(|| named.first())
            .ok_or_else(|| inference_error("model produced no output"))?;
        let (hidden_shape, hidden) = hidden
            .try_extract_tensor::<f32>()
            .map_err(|e| inference_error(format!("unexpected output tensor: {}", e)))?;

        let width = hidden_shape
            .get(2)
            .map(|&d| d as usize)
            .unwrap_or(self.dimensions);
        Ok(mean_pool(hidden, &encoded.attention_mask, encoded.rows, encoded.cols, width))
    }
}

/// Masked mean over tokens followed by L2 normalisation, one vector per row
fn mean_pool(hidden: &[f32], mask: &[i64], rows: usize, cols: usize, width: usize) -> Vec<Vec<f32>> {
    (0..rows)
        .map(|row| {
            let mut pooled = vec![0.0f32; width];
            let mut tokens = 0.0f32;

            for col in 0..cols {
                if mask[row * cols + col] == 0 {
                    continue;
                }
                let start = (row * cols + col) * width;
                if let Some(state) = hidden.get(start..start + width) {
                    pooled.iter_mut().zip(state).for_each(|(p, h)| *p += h);
                    tokens += 1.0;
                }
            }

            if tokens > 0.0 {
                pooled.iter_mut().for_each(|p| *p /= tokens);
            }
            let norm = pooled.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                pooled.iter_mut().for_each(|p| *p /= norm);
            }
            pooled
        })
        .collect()
}

fn inference_error(message: impl Into<String>) -> Error {
    Error::provider_unavailable(PROVIDER_NAME, message)
}

/// Fetch `file` of `model` from HuggingFace; written atomically
async fn download(model: &str, file: &str, dest: &Path) -> Result<()> {
    let url = format!("{}/{}/resolve/main/{}", HF_BASE, model, file);
    tracing::info!("Downloading {}", url);

    let response = reqwest::get(&url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::Config(format!("Failed to download {}: {}", url, e)))?;
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", url, e)))?;

    let partial = dest.with_extension("partial");
    tokio::fs::write(&partial, &bytes).await?;
    tokio::fs::rename(&partial, dest).await?;

    tracing::info!("Saved {} ({} bytes)", dest.display(), bytes.len());
    Ok(())
}

#[async_trait]
impl EmbeddingProvider for OnnxEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| inference_error("empty embedding result"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = Arc::clone(&self.model);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || model.embed(&texts)).await?
    }

    fn dimensions(&self) -> usize {
        self.model.dimensions
    }

    fn max_batch_size(&self) -> usize {
        self.batch_size
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.embed("health check").await.is_ok())
    }

    fn name(&self) -> &str {
        PROVIDER_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_pool_ignores_padding() {
        // Two rows of three tokens, width 2; row 1 has one padding token
        let hidden = [
            1.0, 0.0, 3.0, 0.0, 5.0, 0.0, //
            0.0, 2.0, 0.0, 4.0, 9.0, 9.0,
        ];
        let mask = [1, 1, 1, 1, 1, 0];

        let pooled = mean_pool(&hidden, &mask, 2, 3, 2);
        assert_eq!(pooled.len(), 2);
        assert_eq!(pooled[0], vec![1.0, 0.0]);
        assert_eq!(pooled[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_mean_pool_all_padding_is_zero() {
        let pooled = mean_pool(&[1.0, 1.0], &[0], 1, 1, 2);
        assert_eq!(pooled[0], vec![0.0, 0.0]);
    }

    #[test]
    fn test_missing_files_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let result = OnnxEmbedder::from_files(
            &dir.path().join("model.onnx"),
            &dir.path().join("tokenizer.json"),
            &EmbeddingConfig::default(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    #[ignore = "downloads all-MiniLM-L6-v2 from HuggingFace"]
    async fn test_minilm_embeds_384_dims() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddingConfig {
            fallback_cache_dir: dir.path().to_path_buf(),
            ..EmbeddingConfig::default()
        };
        let embedder = OnnxEmbedder::load(&config).await.unwrap();

        let vectors = embedder
            .embed_batch(&["arm the alarm area".to_string(), "export camera footage".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert!(vectors.iter().all(|v| v.len() == 384));
        assert_eq!(embedder.name(), "local-minilm");
    }
}

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tch::{nn, Device};
use tokenizer::{TokenizerError, BPE};

use crate::config::{ModelConfig, PRESETS};
use crate::error::{ModelError, Result};
use crate::safetensors_util::{load_safetensors, save_safetensors};
use crate::transformer::Seq2SeqTransformer;

pub const CONFIG_FILE: &str = "config.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Weight init seed for preset base models, so two fresh bases are identical.
const PRESET_SEED: i64 = 42;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    Preset(String),
    Directory(PathBuf),
}

/// A model together with the tokenizer it was trained with.
pub struct ModelArtifact {
    pub model: Seq2SeqTransformer,
    pub tokenizer: BPE,
    pub vs: nn::VarStore,
    pub source: ModelSource,
}

fn is_artifact_dir(path: &Path) -> bool {
    path.join(CONFIG_FILE).is_file()
}

impl ModelArtifact {
    /// Finds a saved artifact directory: `name_or_path` itself, then `model_root/<name>`.
    pub fn locate(name_or_path: &str, model_root: Option<&Path>) -> Option<PathBuf> {
        let direct = Path::new(name_or_path);
        if is_artifact_dir(direct) {
            return Some(direct.to_path_buf());
        }
        model_root
            .map(|root| root.join(name_or_path))
            .filter(|candidate| is_artifact_dir(candidate))
    }

    /// Resolves a saved directory, `model_root/<name>`, or a preset name, in that order.
    pub fn resolve(name_or_path: &str, model_root: Option<&Path>, device: Device) -> Result<Self> {
        if let Some(dir) = Self::locate(name_or_path, model_root) {
            return Self::load_dir(&dir, device);
        }

        if ModelConfig::preset(name_or_path).is_some() {
            return Self::from_preset(name_or_path, BPE::byte_level(), device);
        }

        Err(ModelError::Load {
            name: name_or_path.to_string(),
            reason: format!(
                "not a saved model directory and not a preset ({})",
                PRESETS.join(", ")
            ),
        })
    }

    /// Freshly initialized base model sized to `tokenizer`.
    pub fn from_preset(name: &str, tokenizer: BPE, device: Device) -> Result<Self> {
        let base = ModelConfig::preset(name).ok_or_else(|| ModelError::Load {
            name: name.to_string(),
            reason: "unknown preset".to_string(),
        })?;

        let pad = tokenizer.pad_id() as i64;
        let config = ModelConfig {
            vocab_size: tokenizer.vocab_size() as i64,
            pad_token_id: pad,
            eos_token_id: tokenizer.eos_id() as i64,
            decoder_start_token_id: pad,
            ..base
        };
        config.validate().map_err(ModelError::InvalidConfig)?;

        tch::manual_seed(PRESET_SEED);
        let vs = nn::VarStore::new(device);
        let model = Seq2SeqTransformer::new(&vs.root(), &config);
        tracing::info!(
            preset = name,
            vocab_size = config.vocab_size,
            ?device,
            "initialized base model"
        );

        Ok(Self {
            model,
            tokenizer,
            vs,
            source: ModelSource::Preset(name.to_string()),
        })
    }

    pub fn load_dir(dir: &Path, device: Device) -> Result<Self> {
        let load_error = |reason: String| ModelError::Load {
            name: dir.display().to_string(),
            reason,
        };

        let config_path = dir.join(CONFIG_FILE);
        let file = File::open(&config_path)
            .map_err(|e| load_error(format!("cannot open {}: {}", config_path.display(), e)))?;
        let config: ModelConfig = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| load_error(format!("invalid {}: {}", CONFIG_FILE, e)))?;
        config.validate().map_err(load_error)?;

        let tokenizer = BPE::load(dir.join(TOKENIZER_FILE))
            .map_err(|e| load_error(format!("cannot load {}: {}", TOKENIZER_FILE, e)))?;
        if tokenizer.vocab_size() as i64 != config.vocab_size {
            let mismatch = TokenizerError::VocabMismatch {
                tokenizer: tokenizer.vocab_size(),
                model: config.vocab_size as usize,
            };
            return Err(load_error(mismatch.to_string()));
        }

        let mut vs = nn::VarStore::new(device);
        let model = Seq2SeqTransformer::new(&vs.root(), &config);
        load_safetensors(&mut vs, dir.join(WEIGHTS_FILE)).map_err(|e| match e {
            ModelError::ResourceExhausted(_) => e,
            other => load_error(other.to_string()),
        })?;

        tracing::info!(dir = %dir.display(), ?device, "loaded model artifact");
        Ok(Self {
            model,
            tokenizer,
            vs,
            source: ModelSource::Directory(dir.to_path_buf()),
        })
    }

    /// Writes config, weights and tokenizer into `dir`, replacing whatever is there.
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir)?;
        fs::write(dir.join(CONFIG_FILE), serde_json::to_string_pretty(&self.model.config)?)?;
        save_safetensors(&self.vs, dir.join(WEIGHTS_FILE))?;
        self.tokenizer.save(dir.join(TOKENIZER_FILE))?;
        tracing::info!(dir = %dir.display(), "saved model artifact");
        Ok(())
    }

    /// Overwrites the live weights from a safetensors file.
    pub fn load_weights(&mut self, path: &Path) -> Result<()> {
        load_safetensors(&mut self.vs, path)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.model.config
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Tensor;

    fn logits(artifact: &ModelArtifact) -> Tensor {
        let _guard = tch::no_grad_guard();
        let input = Tensor::from_slice(&[40i64, 41, 42, 3]).view([1, 4]);
        let mask = Tensor::ones([1, 4], (tch::Kind::Int64, Device::Cpu));
        let decoder_input = Tensor::from_slice(&[0i64, 50]).view([1, 2]);
        artifact.model.forward(&input, &mask, &decoder_input, false)
    }

    #[test]
    fn test_preset_resolves_with_byte_level_tokenizer() {
        let artifact = ModelArtifact::resolve("seq2seq-tiny", None, Device::Cpu).unwrap();
        assert_eq!(artifact.source, ModelSource::Preset("seq2seq-tiny".to_string()));
        assert_eq!(artifact.config().vocab_size, artifact.tokenizer.vocab_size() as i64);
        assert_eq!(artifact.config().decoder_start_token_id, 0);
    }

    #[test]
    fn test_unknown_name_is_load_error() {
        let err = ModelArtifact::resolve("no-such-model", None, Device::Cpu).err().unwrap();
        assert!(matches!(err, ModelError::Load { .. }));
    }

    #[test]
    fn test_save_and_reload_through_model_root() {
        let root = tempfile::tempdir().unwrap();
        let artifact = ModelArtifact::resolve("seq2seq-tiny", None, Device::Cpu).unwrap();
        artifact.save(&root.path().join("final_model")).unwrap();

        let reloaded =
            ModelArtifact::resolve("final_model", Some(root.path()), Device::Cpu).unwrap();
        assert_eq!(
            reloaded.source,
            ModelSource::Directory(root.path().join("final_model"))
        );
        assert_eq!(reloaded.config(), artifact.config());

        let diff = (logits(&artifact) - logits(&reloaded)).abs().max().double_value(&[]);
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_directory_without_weights_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = ModelArtifact::resolve("seq2seq-tiny", None, Device::Cpu).unwrap();
        artifact.save(dir.path()).unwrap();
        fs::remove_file(dir.path().join(WEIGHTS_FILE)).unwrap();

        let err = ModelArtifact::load_dir(dir.path(), Device::Cpu).err().unwrap();
        assert!(matches!(err, ModelError::Load { .. }));
    }
}

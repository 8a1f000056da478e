use tch::TchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("failed to load model '{name}': {reason}")]
    Load { name: String, reason: String },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("invalid model config: {0}")]
    InvalidConfig(String),

    #[error("unsupported tensor dtype: {0}")]
    UnsupportedDtype(String),

    #[error("torch error: {0}")]
    Torch(TchError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("safetensors error: {0}")]
    Safetensors(#[from] safetensors::SafeTensorError),

    #[error("tokenizer error: {0}")]
    Tokenizer(#[from] tokenizer::TokenizerError),
}

/// libtorch reports allocation failures only through the message text.
pub fn is_out_of_memory(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("out of memory") || message.contains("cuda_error_out_of_memory")
}

impl From<TchError> for ModelError {
    fn from(err: TchError) -> Self {
        let message = err.to_string();
        if is_out_of_memory(&message) {
            ModelError::ResourceExhausted(message)
        } else {
            ModelError::Torch(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// Runs tensor code whose infallible tch ops panic on failure, and turns such a
/// panic back into an error.
pub fn catch_torch<T>(f: impl FnOnce() -> T) -> Result<T> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
            .unwrap_or_else(|| "torch operation panicked".to_string());
        TchError::Torch(message).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oom_is_resource_exhausted() {
        let err: ModelError =
            TchError::Torch("CUDA out of memory. Tried to allocate 2.00 GiB".to_string()).into();
        assert!(matches!(err, ModelError::ResourceExhausted(_)));
    }

    #[test]
    fn test_catch_torch_classifies_panics() {
        let err = catch_torch(|| -> i64 { panic!("CUDA out of memory") }).unwrap_err();
        assert!(matches!(err, ModelError::ResourceExhausted(_)));
        assert_eq!(catch_torch(|| 7).unwrap(), 7);
    }

    #[test]
    fn test_other_torch_errors_stay_torch() {
        let err: ModelError = TchError::Torch("shape '[2, 3]' is invalid".to_string()).into();
        assert!(matches!(err, ModelError::Torch(_)));
    }
}

//! Adapter between text and token ids.

use tokenizers::Tokenizer;

use crate::errors::ModelError;

/// Anything that turns text into vocabulary ids.
pub trait TokenEncoder {
    fn encode(&self, text: &str) -> Result<Vec<u32>, ModelError>;
}

impl TokenEncoder for Tokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, ModelError> {
        let encoding = (**self).encode(text, false)
            .map_err(|err| ModelError::Tokenizer(err.to_string()))?;
        Ok(encoding.get_ids().to_vec())
    }
}

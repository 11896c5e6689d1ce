pub mod block;
pub mod config;
pub mod errors;
pub mod model;
pub mod tokenizer;

pub use block::EncoderBlock;
pub use config::HyperParameters;
pub use errors::ModelError;
pub use model::Transformer;
pub use tokenizer::TokenEncoder;

mod gemini;

pub use gemini::{GeminiClient, GeminiConfig, GeminiError};

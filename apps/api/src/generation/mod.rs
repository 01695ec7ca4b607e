//! Content generation: prompt building, the generator seam, the fallback
//! library and the `POST /api/v1/generate` pipeline.

pub mod diversity;
pub mod fallback;
pub mod generator;
pub mod handlers;
pub mod prompts;
pub mod service;

pub use fallback::FallbackGenerator;
pub use generator::ContentGenerator;
pub use prompts::{GenerationMode, GenerationPrompt};
pub use service::{GenerationOutcome, GenerationService};

pub mod error;
pub mod types;
pub mod config;
pub mod provider;
pub mod router;
pub mod context;
pub mod util;

pub use context::AppContext;
pub use error::{ConfigError, ProviderError, RouterError};
pub use router::{AiRouter, RouterSettings, StatusSnapshot};
pub use types::{GenerationConfig, GenerationResult, Message, Prompt, ProviderId, StructuredResult};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

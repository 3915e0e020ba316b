//! Error types for the simulator CLI.

use busflow_core::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Invalid tracker config: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to write export: {0}")]
    Export(#[from] std::io::Error),

    #[error("{0}")]
    UnknownScenario(String),

    #[error("--export only supports a single scenario, not 'all'")]
    ExportNeedsOneScenario,
}

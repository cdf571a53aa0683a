pub mod defaults;
pub mod engine;

pub use defaults::{DefaultsConfig, SettingsTable};
pub use engine::EngineConfig;

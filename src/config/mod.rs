mod settings;

pub use settings::{Config, TomlConfig, EXAMPLE_CONFIG};

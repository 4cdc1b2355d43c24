//! Utility modules

pub mod paths;

pub use paths::{chunks_dir, config_path, data_dir, init_data_dir, log_file_path};

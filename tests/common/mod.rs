//! Common test utilities for gyazo-drain integration tests

#[allow(dead_code)]
pub mod fake_api;

pub use fake_api::*;

use gyazo_drain::Config;
use std::path::Path;
use std::time::Duration;

/// Config pointing at `api_base`, writing under `root`
#[allow(dead_code)]
pub fn test_config(api_base: &str, root: &Path) -> Config {
    let mut config = Config::default();
    config.api.base_url = api_base.to_string();
    config.api.access_token = Some(TOKEN.to_string());
    config.api.per_page = 2;
    config.download.output_dir = root.join("images");
    config.download.concurrency = 2;
    config.persistence.database_path = root.join("gyazo-drain.db");
    config.retry.max_attempts = 1;
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.jitter = false;
    config
}

/// Sorted file names directly under `dir`
#[allow(dead_code)]
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

//! Wiring for the `clipwatch-worker` binary: environment configuration
//! and provider construction.

pub mod config;

use std::sync::Arc;

use clipwatch_provider::api::PredictionsApi;
use clipwatch_provider::wait::DEFAULT_WAIT_INTERVAL;
use clipwatch_provider::{BlockingProvider, PollingProvider, ProviderClient};
use clipwatch_tracker::TrackerConfig;

use crate::config::{ProviderMode, WorkerConfig};

/// Build the provider backend selected by `config.mode`.
pub fn build_provider(config: &WorkerConfig, tracker: &TrackerConfig) -> Arc<dyn ProviderClient> {
    let api = PredictionsApi::new(&config.api_url, &config.api_token);
    let polling = Arc::new(PollingProvider::new(api, &config.model));

    match config.mode {
        ProviderMode::Poll => polling,
        ProviderMode::Blocking => Arc::new(BlockingProvider::with_timing(
            polling,
            tracker.wait_timeout,
            DEFAULT_WAIT_INTERVAL,
        )),
    }
}

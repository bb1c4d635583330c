pub mod llm;
pub mod maps;

use std::time::Duration;

use crate::error::{AppError, AppResult};

fn http_client(timeout_secs: u64) -> AppResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .pool_idle_timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(16)
        .tcp_nodelay(true)
        .build()
        .map_err(|e| AppError::Internal(e.to_string()))
}

use std::{
    net::SocketAddr,
    sync::Arc,
};

use anyhow::Context;
use axum::{
    Router,
    body::Body,
    extract::{
        ConnectInfo,
        State,
    },
    http::{
        HeaderValue,
        Request,
    },
    routing::any,
};
use maps_llm_gateway::{
    config::{APP_NAME, APP_VERSION, AppConfig, mask_key},
    gateway::Gateway,
    quota::{QuotaTracker, spawn_daily_reset},
    ratelimit::{RateLimiter, clock::SystemClock},
    routes::{self, AppState},
    services::{llm::LlmClient, maps::MapsClient},
};
use tokio::net::TcpListener;
use tower_http::cors::{
    AllowHeaders,
    AllowMethods,
    AllowOrigin,
    CorsLayer,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = AppConfig::from_env().context("failed to build app config")?;
    init_tracing(&cfg);

    tracing::info!(
        app = APP_NAME,
        version = APP_VERSION,
        environment = %cfg.environment,
        "starting"
    );
    tracing::info!(model = %cfg.llm.model, url = %cfg.llm.base_url, "llm backend");

    let quota = Arc::new(QuotaTracker::new(cfg.quota.daily_limit));
    tracing::info!(daily_limit = quota.daily_limit(), "maps quota configured");
    let llm = Arc::new(LlmClient::new(cfg.llm.clone()).context("failed to build llm client")?);
    let maps = Arc::new(
        MapsClient::new(cfg.maps.clone(), quota.clone()).context("failed to build maps client")?,
    );

    if llm.check_health().await {
        tracing::info!("llm service available");
    } else {
        tracing::warn!(
            model = %cfg.llm.model,
            "llm service not available; start ollama and pull the model"
        );
    }
    if maps.is_configured() {
        tracing::info!(key = %mask_key(&cfg.maps.api_key), "google maps api key configured");
    }

    spawn_daily_reset(quota);

    let limiter = Arc::new(RateLimiter::new(cfg.rate_limit.policy(), Arc::new(SystemClock)));
    tracing::info!(
        requests = limiter.requests_per_window(),
        window_secs = limiter.window_seconds(),
        capacity = limiter.capacity(),
        refill_per_sec = limiter.refill_rate(),
        "rate limiter configured"
    );

    let cors = cors_layer(&cfg.allowed_origins);
    let bind_addr = cfg.bind_addr;
    let state = AppState {
        config: Arc::new(cfg.clone()),
        llm,
        maps,
    };
    let gateway = Arc::new(Gateway::new(&cfg, limiter, routes::router(state)));

    let app = Router::new()
        .fallback(any(proxy_handler))
        .with_state(gateway)
        .layer(cors);

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("failed to bind listener")?;

    tracing::info!(addr = %bind_addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("server error")?;

    Ok(())
}

async fn proxy_handler(
    State(gateway): State<Arc<Gateway>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> axum::response::Response {
    gateway.handle_http(request, Some(addr.ip())).await
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

fn init_tracing(cfg: &AppConfig) {
    let default = if cfg.debug {
        "debug,hyper=warn,reqwest=warn,tower_http=warn"
    } else {
        "info,hyper=warn,reqwest=warn,tower_http=warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    if cfg.environment.eq_ignore_ascii_case("production") {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
};

use crate::{
    context::RequestContext,
    error::{AppError, AppResult},
    middleware::{ControlFlow, GatewayMiddleware},
    ratelimit::RateLimiter,
};

pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    exempt_paths: Vec<String>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>, exempt_paths: Vec<String>) -> Self {
        Self {
            limiter,
            exempt_paths,
        }
    }

    /// Exact match or a sub-path of an entry. `/` only exempts itself.
    fn is_exempt_path(&self, path: &str) -> bool {
        self.exempt_paths.iter().any(|exempt| {
            if path == exempt {
                return true;
            }
            let prefix = exempt.trim_end_matches('/');
            !prefix.is_empty()
                && path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn limited_response(&self, retry_after_secs: u64) -> Response<Body> {
        let mut response = AppError::RateLimited { retry_after_secs }.into_response();
        self.attach_window_headers(&mut response);

        response
    }

    fn attach_window_headers(&self, response: &mut Response<Body>) {
        let headers = response.headers_mut();
        headers.insert(
            HeaderName::from_static("x-ratelimit-limit"),
            HeaderValue::from(self.limiter.requests_per_window()),
        );
        headers.insert(
            HeaderName::from_static("x-ratelimit-window"),
            HeaderValue::from(self.limiter.window_seconds()),
        );
    }
}

#[async_trait]
impl GatewayMiddleware for RateLimitMiddleware {
    fn name(&self) -> &'static str {
        "rate-limit"
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> AppResult<ControlFlow> {
        if self.is_exempt_path(ctx.uri.path()) {
            return Ok(ControlFlow::Continue);
        }

        let decision = self.limiter.admit(&ctx.client_key);
        ctx.rate_limit = Some(decision);
        if decision.allowed {
            return Ok(ControlFlow::Continue);
        }

        tracing::warn!(
            request_id = %ctx.request_id,
            client_key = %ctx.client_key,
            path = %ctx.uri.path(),
            retry_after = decision.retry_after_secs,
            "rate limit exceeded"
        );
        Ok(ControlFlow::ShortCircuit(
            self.limited_response(decision.retry_after_secs),
        ))
    }

    async fn on_response(
        &self,
        ctx: &RequestContext,
        response: &mut Response<Body>,
    ) -> AppResult<()> {
        let Some(decision) = ctx.rate_limit.filter(|d| d.allowed) else {
            return Ok(());
        };

        self.attach_window_headers(response);
        response.headers_mut().insert(
            HeaderName::from_static("x-ratelimit-remaining"),
            HeaderValue::from(decision.remaining),
        );

        Ok(())
    }
}

use async_trait::async_trait;

use crate::{
    context::RequestContext,
    error::AppResult,
    middleware::{ControlFlow, GatewayMiddleware},
};

/// Records each request twice: on arrival with the resolved client key, and on
/// completion with status, latency and what the rate limiter decided.
pub struct RequestLoggingMiddleware;

/// `"unmetered"` when the limiter never saw the request (exempt path or
/// limiting disabled, or rejected before the limiter ran).
fn admission(ctx: &RequestContext) -> &'static str {
    match ctx.rate_limit {
        Some(decision) if decision.allowed => "admitted",
        Some(_) => "limited",
        None => "unmetered",
    }
}

#[async_trait]
impl GatewayMiddleware for RequestLoggingMiddleware {
    fn name(&self) -> &'static str {
        "request-logging"
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> AppResult<ControlFlow> {
        tracing::info!(
            request_id = %ctx.request_id,
            method = %ctx.method,
            path = %ctx.uri.path(),
            client_key = %ctx.client_key,
            "incoming request"
        );
        Ok(ControlFlow::Continue)
    }

    async fn on_response(
        &self,
        ctx: &RequestContext,
        response: &mut axum::response::Response,
    ) -> AppResult<()> {
        let latency_ms = ctx.started_at.elapsed().as_millis();
        let status = response.status();
        let remaining = ctx
            .rate_limit
            .filter(|d| d.allowed)
            .map(|d| d.remaining);

        if status.is_server_error() {
            tracing::warn!(
                request_id = %ctx.request_id,
                client_key = %ctx.client_key,
                path = %ctx.uri.path(),
                status = %status,
                admission = admission(ctx),
                latency_ms = latency_ms,
                "request failed"
            );
        } else {
            tracing::info!(
                request_id = %ctx.request_id,
                client_key = %ctx.client_key,
                path = %ctx.uri.path(),
                status = %status,
                admission = admission(ctx),
                tokens_left = ?remaining,
                latency_ms = latency_ms,
                "request completed"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{HeaderMap, Method, Uri};

    use super::admission;
    use crate::{context::RequestContext, ratelimit::RateLimitDecision};

    fn ctx() -> RequestContext {
        RequestContext::new(
            "req-9".to_string(),
            Method::GET,
            Uri::from_static("/api/maps/config"),
            HeaderMap::new(),
            Bytes::new(),
            None,
        )
    }

    #[test]
    fn admission_reflects_the_limiter_decision() {
        let mut ctx = ctx();
        assert_eq!(admission(&ctx), "unmetered");

        ctx.rate_limit = Some(RateLimitDecision {
            allowed: true,
            retry_after_secs: 0,
            remaining: 4,
        });
        assert_eq!(admission(&ctx), "admitted");

        ctx.rate_limit = Some(RateLimitDecision {
            allowed: false,
            retry_after_secs: 12,
            remaining: 0,
        });
        assert_eq!(admission(&ctx), "limited");
    }
}

use std::{
    net::IpAddr,
    sync::Arc,
};

use axum::{
    Router,
    body::{
        Body,
        to_bytes,
    },
    http::{
        HeaderName,
        HeaderValue,
        Request,
    },
    response::{
        IntoResponse,
        Response,
    },
};
use tower::ServiceExt;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    context::{ClientKey, RequestContext},
    error::AppError,
    middleware::{
        ControlFlow,
        GatewayMiddleware,
        logging::RequestLoggingMiddleware,
        rate_limit::RateLimitMiddleware,
        validation::RequestValidationMiddleware,
    },
    ratelimit::RateLimiter,
};

/// Runs the admission pipeline in front of the application router.
pub struct Gateway {
    middlewares: Vec<Arc<dyn GatewayMiddleware>>,
    app: Router,
    max_body_bytes: usize,
}

impl Gateway {
    pub fn new(config: &AppConfig, limiter: Arc<RateLimiter>, app: Router) -> Self {
        let mut middlewares: Vec<Arc<dyn GatewayMiddleware>> = vec![
            Arc::new(RequestLoggingMiddleware),
            Arc::new(RequestValidationMiddleware::new(config.validation.clone())),
        ];

        if config.rate_limit.enabled {
            middlewares.push(Arc::new(RateLimitMiddleware::new(
                limiter,
                config.rate_limit.exempt_paths.clone(),
            )));
        } else {
            tracing::warn!("rate limiting disabled");
        }

        Self {
            middlewares,
            app,
            max_body_bytes: config.validation.max_body_bytes,
        }
    }

    pub async fn handle_http(
        &self,
        request: Request<Body>,
        client_ip: Option<IpAddr>,
    ) -> Response<Body> {
        let (parts, body) = request.into_parts();
        let max_capture = self.max_body_bytes.saturating_add(1);
        let body = match to_bytes(body, max_capture).await {
            Ok(body) => body,
            Err(_) => {
                let mut response = AppError::PayloadTooLarge.into_response();
                self.attach_hardening_headers("unknown", &mut response);
                return response;
            }
        };

        let request_id = parts
            .headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut ctx = RequestContext::new(
            request_id,
            parts.method.clone(),
            parts.uri.clone(),
            parts.headers.clone(),
            body,
            client_ip,
        );

        let mut executed = Vec::new();

        for (idx, middleware) in self.middlewares.iter().enumerate() {
            match middleware.on_request(&mut ctx).await {
                Ok(ControlFlow::Continue) => executed.push(idx),
                Ok(ControlFlow::ShortCircuit(mut response)) => {
                    self.apply_response_middlewares(&executed, &ctx, &mut response)
                        .await;
                    self.attach_hardening_headers(&ctx.request_id, &mut response);
                    return response;
                }
                Err(err) => {
                    tracing::warn!(
                        request_id = %ctx.request_id,
                        middleware = middleware.name(),
                        error = %err,
                        "middleware rejected request"
                    );
                    let mut response = err.into_response();
                    self.apply_response_middlewares(&executed, &ctx, &mut response)
                        .await;
                    self.attach_hardening_headers(&ctx.request_id, &mut response);
                    return response;
                }
            }
        }

        let mut inner = Request::from_parts(parts, Body::from(ctx.body.clone()));
        inner
            .extensions_mut()
            .insert(ClientKey(ctx.client_key.clone()));

        let mut response = match self.app.clone().oneshot(inner).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        self.apply_response_middlewares(&executed, &ctx, &mut response)
            .await;
        self.attach_hardening_headers(&ctx.request_id, &mut response);
        response
    }

    async fn apply_response_middlewares(
        &self,
        executed: &[usize],
        ctx: &RequestContext,
        response: &mut Response<Body>,
    ) {
        for idx in executed.iter().rev() {
            let middleware = &self.middlewares[*idx];
            if let Err(err) = middleware.on_response(ctx, response).await {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    middleware = middleware.name(),
                    error = %err,
                    "middleware post-response hook failed"
                );
            }
        }
    }

    fn attach_hardening_headers(&self, request_id: &str, response: &mut Response<Body>) {
        if let Ok(value) = HeaderValue::from_str(request_id) {
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-request-id"), value);
        }

        response.headers_mut().insert(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        );
        response.headers_mut().insert(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        );
        response.headers_mut().insert(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        );
    }
}

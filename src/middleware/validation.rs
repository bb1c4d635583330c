use async_trait::async_trait;
use http::header;

use crate::{
    config::ValidationConfig,
    context::RequestContext,
    error::{AppError, AppResult},
    middleware::{ControlFlow, GatewayMiddleware},
};

pub struct RequestValidationMiddleware {
    cfg: ValidationConfig,
}

impl RequestValidationMiddleware {
    pub fn new(cfg: ValidationConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl GatewayMiddleware for RequestValidationMiddleware {
    fn name(&self) -> &'static str {
        "request-validation"
    }

    async fn on_request(&self, ctx: &mut RequestContext) -> AppResult<ControlFlow> {
        if ctx.headers.len() > self.cfg.max_headers {
            return Err(AppError::Validation(format!(
                "Too many headers: {} > {}",
                ctx.headers.len(),
                self.cfg.max_headers
            )));
        }

        let method = ctx.method.as_str().to_ascii_uppercase();
        if !self.cfg.allowed_methods.iter().any(|m| m == &method) {
            return Err(AppError::Validation(format!(
                "Method {} is not allowed",
                ctx.method
            )));
        }

        if let Some(content_length) = ctx
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
            && content_length != ctx.body.len()
        {
            return Err(AppError::Validation(
                "content-length does not match payload size".to_string(),
            ));
        }

        if ctx.body.len() > self.cfg.max_body_bytes {
            return Err(AppError::PayloadTooLarge);
        }

        if !ctx.body.is_empty() {
            let is_json = ctx
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("application/json"));
            if !is_json {
                return Err(AppError::Validation(
                    "Request bodies must be application/json".to_string(),
                ));
            }
        }

        Ok(ControlFlow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use http::{HeaderMap, HeaderValue, Method, Uri, header};

    use super::*;

    fn middleware() -> RequestValidationMiddleware {
        RequestValidationMiddleware::new(ValidationConfig {
            max_body_bytes: 16,
            allowed_methods: vec!["GET".to_string(), "POST".to_string()],
            max_headers: 4,
        })
    }

    fn ctx(method: Method, headers: HeaderMap, body: &'static [u8]) -> RequestContext {
        RequestContext::new(
            "req-1".to_string(),
            method,
            Uri::from_static("/api/chat"),
            headers,
            Bytes::from_static(body),
            None,
        )
    }

    fn json_headers(len: usize) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        headers
    }

    #[tokio::test]
    async fn accepts_small_json_posts() {
        let mut ctx = ctx(Method::POST, json_headers(2), b"{}");
        assert!(matches!(
            middleware().on_request(&mut ctx).await,
            Ok(ControlFlow::Continue)
        ));
    }

    #[tokio::test]
    async fn rejects_disallowed_methods() {
        let mut ctx = ctx(Method::DELETE, HeaderMap::new(), b"");
        let err = middleware().on_request(&mut ctx).await.err().unwrap();
        assert_eq!(err.to_string(), "Method DELETE is not allowed");
    }

    #[tokio::test]
    async fn rejects_mismatched_length_and_oversized_bodies() {
        let mut short = ctx(Method::POST, json_headers(10), b"{}");
        assert!(matches!(
            middleware().on_request(&mut short).await,
            Err(AppError::Validation(_))
        ));

        let mut big = ctx(Method::POST, json_headers(18), b"{\"m\":\"0123456789\"}");
        assert!(matches!(
            middleware().on_request(&mut big).await,
            Err(AppError::PayloadTooLarge)
        ));
    }

    #[tokio::test]
    async fn rejects_non_json_bodies() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let mut ctx = ctx(Method::POST, headers, b"hello");
        assert!(matches!(
            middleware().on_request(&mut ctx).await,
            Err(AppError::Validation(_))
        ));
    }
}

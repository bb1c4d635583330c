pub mod logging;
pub mod rate_limit;
pub mod validation;

use async_trait::async_trait;
use axum::{
    body::Body,
    response::Response,
};

use crate::{
    context::RequestContext,
    error::AppResult,
};

pub enum ControlFlow {
    Continue,
    ShortCircuit(Response<Body>),
}

/// One stage of the admission pipeline. `on_response` runs in reverse order
/// for every stage whose `on_request` returned `Continue`.
#[async_trait]
pub trait GatewayMiddleware: Send + Sync {
    fn name(&self) -> &'static str;

    async fn on_request(&self, ctx: &mut RequestContext) -> AppResult<ControlFlow>;

    async fn on_response(
        &self,
        _ctx: &RequestContext,
        _response: &mut Response<Body>,
    ) -> AppResult<()> {
        Ok(())
    }
}

//! Tower middleware wrapping the gate.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::response::Response;
use futures::future::BoxFuture;
use tower::{Layer, Service};

use super::identity::RequestMetadata;
use super::response::apply_decision_headers;
use super::{Gate, GateOutcome};

/// Applies the admission gate to every request of the wrapped service.
#[derive(Clone)]
pub struct RateLimitLayer {
    gate: Arc<Gate>,
}

impl RateLimitLayer {
    pub fn new(gate: Arc<Gate>) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            gate: self.gate.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    gate: Arc<Gate>,
}

impl<S> Service<Request> for RateLimitService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let gate = self.gate.clone();
        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let metadata = RequestMetadata::from_request(&req);

            match gate.evaluate(&metadata).await {
                GateOutcome::Bypass => inner.call(req).await,
                GateOutcome::Admitted { decision, .. } => {
                    let mut response = inner.call(req).await?;
                    apply_decision_headers(response.headers_mut(), &decision);
                    Ok(response)
                }
                GateOutcome::Rejected(rejection) => Ok(rejection.into_response_for(&metadata.path)),
            }
        })
    }
}

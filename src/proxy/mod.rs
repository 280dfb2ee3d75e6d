//! Core HTTP request forwarding.
//!
//! The [`forward_handler`] function is the Axum fallback that receives
//! every request arriving at a proxy instance and runs it through the
//! forwarding [`pipeline`]. Submodules handle header policy
//! ([`headers`]) and the outbound client seam ([`client`]).

pub mod client;
pub mod headers;
pub mod pipeline;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::Response;

use crate::server::InstanceState;

pub async fn forward_handler(
    State(state): State<Arc<InstanceState>>,
    request: Request,
) -> Response {
    let (parts, body) = request.into_parts();
    pipeline::handle(&state, &parts, body).await
}

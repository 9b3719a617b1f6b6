//! HTTP Handlers
//!
//! The routing front end. Every KV operation resolves the owner of
//! `tenant:|:key` on the ring first: non-owners forward the request
//! unchanged to the owner and relay the response verbatim, the owner
//! executes locally. Writes at the owner are acknowledged as soon as they
//! apply locally; replication to successors happens in the background.

use super::protocol::*;
use super::service::ServerContext;
use crate::cache::errors::CacheError;
use crate::cache::store::now_nanos;
use crate::cluster::ring::placement_key;
use crate::cluster::types::NodeInfo;
use crate::replication::protocol::ReplicatePayload;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query, RawQuery};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    (status, Json(body)).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn cache_error_response(e: CacheError) -> Response {
    match e {
        CacheError::TenantExists => error_response(StatusCode::CONFLICT, "tenant already exists"),
        CacheError::TenantNotFound => error_response(StatusCode::NOT_FOUND, "tenant not found"),
        CacheError::KeyNotFound => error_response(StatusCode::NOT_FOUND, "key not found"),
        CacheError::SnapshotMissing => error_response(StatusCode::NOT_FOUND, "snapshot not found"),
        other => {
            tracing::error!("Cache operation failed: {}", other);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// Reads the tenant id from `X-User-Id`, or produces the 400 to return.
fn tenant_from_headers(headers: &HeaderMap) -> Result<String, Response> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "missing user id"))
}

/// Resolves the owner for a placement key, or the error response to return
/// when the ring is empty.
fn owner_for(ctx: &ServerContext, placement: &str) -> Result<NodeInfo, Response> {
    ctx.cluster.lookup_owner(placement).ok_or_else(|| {
        error_response(StatusCode::SERVICE_UNAVAILABLE, "no cluster nodes")
    })
}

/// Replays the incoming request against the owner node and relays its
/// response verbatim. Transport failure maps to 502.
async fn forward_to_owner(
    ctx: &ServerContext,
    owner: &NodeInfo,
    method: Method,
    path: &str,
    raw_query: Option<&str>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut url = format!("http://{}{}", owner.addr, path);
    if let Some(query) = raw_query {
        url.push('?');
        url.push_str(query);
    }
    tracing::debug!("Forwarding {} {} to owner {}", method, path, owner.id);

    let mut forwarded_headers = headers;
    forwarded_headers.remove(axum::http::header::HOST);
    forwarded_headers.remove(axum::http::header::CONTENT_LENGTH);

    let sent = ctx
        .http_client
        .request(method, url)
        .headers(forwarded_headers)
        .body(body)
        .timeout(ctx.cfg.cmd_timeout)
        .send()
        .await;

    let upstream = match sent {
        Ok(resp) => resp,
        Err(e) => {
            tracing::warn!("Forward to {} failed: {}", owner.addr, e);
            return error_response(StatusCode::BAD_GATEWAY, "forward error");
        }
    };

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    response_headers.remove(axum::http::header::CONTENT_LENGTH);
    response_headers.remove(axum::http::header::TRANSFER_ENCODING);

    let body = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("Reading forwarded response from {} failed: {}", owner.addr, e);
            return error_response(StatusCode::BAD_GATEWAY, "forward error");
        }
    };

    let mut response = Response::new(axum::body::Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    response
}

pub async fn handle_ping() -> (StatusCode, Json<StatusResponse>) {
    (StatusCode::OK, Json(StatusResponse::ok()))
}

// --- Tenant lifecycle ---

pub async fn handle_user_create(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Json(req): Json<CreateUserRequest>,
) -> Response {
    if req.user_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing user_id");
    }
    match ctx.registry.create(&req.user_id) {
        Ok(()) => json_response(StatusCode::OK, &StatusResponse::ok()),
        Err(e) => cache_error_response(e),
    }
}

pub async fn handle_user_delete(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Path(user_id): Path<String>,
) -> Response {
    match ctx.registry.delete(&user_id) {
        Ok(()) => json_response(StatusCode::OK, &StatusResponse::ok()),
        Err(e) => cache_error_response(e),
    }
}

// --- KV operations (owner-routed) ---

pub async fn handle_set(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    body: Bytes,
) -> Response {
    let tenant = match tenant_from_headers(&headers) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let req: SetRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid json"),
    };
    if req.key.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing key");
    }

    let placement = placement_key(&tenant, &req.key);
    let owner = match owner_for(&ctx, &placement) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    if owner.id != ctx.cluster.self_node().id {
        return forward_to_owner(
            &ctx,
            &owner,
            Method::POST,
            "/v1/set",
            raw_query.as_deref(),
            headers,
            body,
        )
        .await;
    }

    // Owner path: apply locally with a fresh stamp, ack, replicate async.
    ctx.registry.ensure(&tenant);
    let timestamp = now_nanos();
    let ttl = if req.ttl_seconds > 0 {
        Some(Duration::from_secs(req.ttl_seconds as u64))
    } else {
        None
    };
    if let Err(e) = ctx
        .registry
        .set(&tenant, &req.key, req.value.as_bytes(), ttl, timestamp)
    {
        return cache_error_response(e);
    }

    ctx.enqueue_replication(&tenant, &req.key, req.value.as_bytes(), req.ttl_seconds, timestamp);
    json_response(StatusCode::OK, &StatusResponse::ok())
}

pub async fn handle_get(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    Query(params): Query<KeyParams>,
) -> Response {
    let tenant = match tenant_from_headers(&headers) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    if params.key.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing key");
    }

    let placement = placement_key(&tenant, &params.key);
    let owner = match owner_for(&ctx, &placement) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    if owner.id != ctx.cluster.self_node().id {
        return forward_to_owner(
            &ctx,
            &owner,
            Method::GET,
            "/v1/get",
            raw_query.as_deref(),
            headers,
            Bytes::new(),
        )
        .await;
    }

    match ctx.registry.get(&tenant, &params.key) {
        Ok(value) => json_response(
            StatusCode::OK,
            &ValueResponse {
                value: String::from_utf8_lossy(&value).into_owned(),
            },
        ),
        Err(e) => cache_error_response(e),
    }
}

pub async fn handle_delete(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
    RawQuery(raw_query): RawQuery,
    Query(params): Query<KeyParams>,
) -> Response {
    let tenant = match tenant_from_headers(&headers) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    if params.key.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing key");
    }

    let placement = placement_key(&tenant, &params.key);
    let owner = match owner_for(&ctx, &placement) {
        Ok(o) => o,
        Err(resp) => return resp,
    };
    if owner.id != ctx.cluster.self_node().id {
        return forward_to_owner(
            &ctx,
            &owner,
            Method::DELETE,
            "/v1/delete",
            raw_query.as_deref(),
            headers,
            Bytes::new(),
        )
        .await;
    }

    // Deletes are local by design; successors keep their copies until they
    // expire or are overwritten.
    match ctx.registry.delete_key(&tenant, &params.key) {
        Ok(()) => json_response(StatusCode::OK, &StatusResponse::ok()),
        Err(e) => cache_error_response(e),
    }
}

/// Lists the tenant's keys on the receiving node only; there is no cluster
/// fan-out.
pub async fn handle_keys(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
) -> Response {
    let tenant = match tenant_from_headers(&headers) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    match ctx.registry.keys(&tenant) {
        Ok(keys) => json_response(StatusCode::OK, &KeysResponse { keys }),
        Err(e) => cache_error_response(e),
    }
}

// --- Persistence ---

pub async fn handle_snapshot_save(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
) -> Response {
    let tenant = match tenant_from_headers(&headers) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let snap = match ctx.registry.snapshot(&tenant) {
        Ok(snap) => snap,
        Err(e) => return cache_error_response(e),
    };
    match ctx.registry.save(&snap) {
        Ok(_) => json_response(StatusCode::OK, &StatusResponse::ok()),
        Err(e) => cache_error_response(e),
    }
}

pub async fn handle_snapshot_restore(
    Extension(ctx): Extension<Arc<ServerContext>>,
    headers: HeaderMap,
) -> Response {
    let tenant = match tenant_from_headers(&headers) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    match ctx.registry.load(&tenant) {
        Ok(snap) => {
            ctx.registry.restore(snap);
            json_response(StatusCode::OK, &StatusResponse::ok())
        }
        Err(e) => cache_error_response(e),
    }
}

// --- Cluster ---

pub async fn handle_cluster_join(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Json(node): Json<NodeInfo>,
) -> Response {
    if !ctx.cluster.is_leader() {
        // Send the joiner to the leader candidate: first member by id.
        let members = ctx.cluster.members();
        let Some(leader) = members.first() else {
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "no leader");
        };
        return Redirect::temporary(&format!("http://{}/v1/cluster/join", leader.addr))
            .into_response();
    }

    if node.id.is_empty() || node.addr.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing node id or addr");
    }
    ctx.cluster.add(node);
    json_response(StatusCode::OK, &ctx.cluster.snapshot())
}

pub async fn handle_cluster_state(Extension(ctx): Extension<Arc<ServerContext>>) -> Response {
    json_response(StatusCode::OK, &ctx.cluster.snapshot())
}

// --- Internal replication sink ---

/// Applies a write pushed by a peer primary: the tenant is created if
/// unknown and the peer's timestamp decides the LWW outcome. Nothing is
/// re-enqueued from here.
pub async fn handle_internal_replicate(
    Extension(ctx): Extension<Arc<ServerContext>>,
    Json(payload): Json<ReplicatePayload>,
) -> Response {
    if payload.user_id.is_empty() || payload.key.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing user_id or key");
    }
    ctx.registry.apply_replicated(
        &payload.user_id,
        &payload.key,
        &payload.value,
        payload.ttl_secs,
        payload.timestamp,
    );
    json_response(StatusCode::OK, &StatusResponse::ok())
}

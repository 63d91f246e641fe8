//! HTTP API of the grant authority.
//!
//! Every `/api/v1` route requires a bearer token. Gallery-scoped routes also
//! consult the [`AccessPolicy`] and only hand out URLs for keys under the
//! caller's gallery prefix.

use crate::access::{key_in_context, AccessPolicy};
use crate::config::{ApiConfig, Config};
use crate::object_store::{ObjectStore, StoreError};
use anyhow::{Context, Result};
use axum::{
    extract::{Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use guestlens_transfer::grant_client::validate_write_request;
use guestlens_transfer::keys::object_key;
use guestlens_transfer::wire::{
    DeleteObjectRequest, DeleteObjectResponse, ErrorResponse, ListObjectsResponse, ListedObject,
    ProxyDownloadRequest, ProxyDownloadResponse, ReadGrantRequest, ReadGrantResponse,
    WriteGrantRequest, WriteGrantResponse,
};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

const DEFAULT_CONTENT_TYPE: &str = "image/jpeg";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ObjectStore>,
    pub access: Arc<dyn AccessPolicy>,
    pub config: Arc<Config>,
}

type ApiFailure = (StatusCode, Json<ErrorResponse>);

fn failure(status: StatusCode, code: &str, message: impl Into<String>) -> ApiFailure {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
            code: code.to_string(),
        }),
    )
}

fn store_failure(e: StoreError) -> ApiFailure {
    match e {
        StoreError::NotFound(key) => {
            failure(StatusCode::NOT_FOUND, "NOT_FOUND", format!("Object not found: {}", key))
        }
        StoreError::Presign(message) => {
            error!(error = %message, "Failed to sign URL");
            failure(
                StatusCode::INTERNAL_SERVER_ERROR,
                "PRESIGN_ERROR",
                "Failed to sign URL",
            )
        }
        StoreError::Backend(message) => {
            error!(error = %message, "Object store request failed");
            failure(StatusCode::BAD_GATEWAY, "STORE_ERROR", "Object store request failed")
        }
    }
}

fn access_denied(caller_identity: &str, owner_context: &str) -> ApiFailure {
    warn!(caller = %caller_identity, context = %owner_context, "Access denied");
    metrics::counter!("grants.access.denied").increment(1);
    failure(StatusCode::FORBIDDEN, "ACCESS_DENIED", "Access denied")
}

impl AppState {
    /// Caller may act in the gallery and the key belongs to it
    fn authorize_key(
        &self,
        key: &str,
        owner_context: &str,
        caller_identity: &str,
    ) -> Result<(), ApiFailure> {
        if key.is_empty() {
            return Err(failure(
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "object key is required",
            ));
        }
        if !self.access.has_access(caller_identity, owner_context)
            || !key_in_context(key, owner_context)
        {
            return Err(access_denied(caller_identity, owner_context));
        }
        Ok(())
    }
}

/// Query parameters for the object list
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub slug: String,
    #[serde(rename = "userId")]
    pub user_id: String,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let api = Router::new()
        .route("/api/v1/grants/upload", post(upload_grant))
        .route("/api/v1/grants/download", post(read_grant))
        .route("/api/v1/objects", get(list_objects))
        .route("/api/v1/objects/download", post(proxy_download))
        .route("/api/v1/objects/delete", post(delete_object))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health_check))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Reject requests without an accepted bearer token
async fn require_bearer(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiFailure> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    let Some(token) = token else {
        return Err(failure(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Missing bearer token",
        ));
    };

    let accepted = &state.config.api.bearer_tokens;
    if !accepted.is_empty() && !accepted.iter().any(|t| t == token) {
        return Err(failure(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Invalid bearer token",
        ));
    }

    Ok(next.run(request).await)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "grant-service"
    }))
}

/// Sign a PUT URL for a new upload
#[instrument(skip(state, request), fields(prefix = %request.prefix, caller = %request.caller_identity))]
async fn upload_grant(
    State(state): State<AppState>,
    Json(request): Json<WriteGrantRequest>,
) -> Result<Json<WriteGrantResponse>, ApiFailure> {
    validate_write_request(&request.file_name, &request.content_type)
        .map_err(|e| failure(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", e.to_string()))?;

    if request.prefix.is_empty()
        || request.prefix.contains('/')
        || request.caller_identity.is_empty()
        || request.caller_identity.contains('/')
    {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "prefix and callerIdentity must be single non-empty path segments",
        ));
    }

    if !state
        .access
        .has_access(&request.caller_identity, &request.prefix)
    {
        return Err(access_denied(&request.caller_identity, &request.prefix));
    }

    let key = object_key(
        &request.prefix,
        &request.caller_identity,
        Utc::now().timestamp_millis(),
        &request.file_name,
    );
    let ttl = state.config.grants.write_ttl();
    let presigned_url = state
        .store
        .presign_put(&key, &request.content_type, ttl)
        .await
        .map_err(store_failure)?;

    metrics::counter!("grants.write.issued").increment(1);
    info!(key = %key, "Write grant issued");

    Ok(Json(WriteGrantResponse {
        presigned_url,
        key,
        bucket: state.config.s3.bucket.clone(),
        expires_in: ttl.as_secs(),
    }))
}

/// Sign a GET URL for an existing object
#[instrument(skip(state, request), fields(key = %request.image_key, caller = %request.caller_identity))]
async fn read_grant(
    State(state): State<AppState>,
    Json(request): Json<ReadGrantRequest>,
) -> Result<Json<ReadGrantResponse>, ApiFailure> {
    state.authorize_key(
        &request.image_key,
        &request.owner_context,
        &request.caller_identity,
    )?;

    let ttl = state.config.grants.read_ttl(request.expires_in);
    let url = state
        .store
        .presign_get(&request.image_key, ttl)
        .await
        .map_err(store_failure)?;

    metrics::counter!("grants.read.issued").increment(1);

    Ok(Json(ReadGrantResponse {
        url,
        expires_in: ttl.as_secs(),
    }))
}

/// Stream an object back through the service, base64 encoded
#[instrument(skip(state, request), fields(key = %request.image_key, caller = %request.caller_identity))]
async fn proxy_download(
    State(state): State<AppState>,
    Json(request): Json<ProxyDownloadRequest>,
) -> Result<Json<ProxyDownloadResponse>, ApiFailure> {
    state.authorize_key(
        &request.image_key,
        &request.owner_context,
        &request.caller_identity,
    )?;

    let (data, content_type) = state
        .store
        .fetch(&request.image_key)
        .await
        .map_err(store_failure)?;

    metrics::counter!("grants.proxy.downloads").increment(1);

    Ok(Json(ProxyDownloadResponse {
        data: STANDARD.encode(&data),
        content_type: content_type
            .filter(|content_type| !content_type.is_empty())
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
    }))
}

/// List a gallery with display URLs
#[instrument(skip(state))]
async fn list_objects(
    State(state): State<AppState>,
    Query(params): Query<ListQuery>,
) -> Result<Json<ListObjectsResponse>, ApiFailure> {
    if params.slug.is_empty() || params.slug.contains('/') {
        return Err(failure(
            StatusCode::BAD_REQUEST,
            "VALIDATION_ERROR",
            "slug must be a single non-empty path segment",
        ));
    }
    if !state.access.has_access(&params.user_id, &params.slug) {
        return Err(access_denied(&params.user_id, &params.slug));
    }

    let keys = state
        .store
        .list(&format!("{}/", params.slug))
        .await
        .map_err(store_failure)?;

    let ttl = state.config.grants.list_url_ttl();
    let expires_at = Utc::now() + chrono::Duration::seconds(ttl.as_secs() as i64);

    let mut images = Vec::with_capacity(keys.len());
    for key in keys {
        let presigned_url = state
            .store
            .presign_get(&key, ttl)
            .await
            .map_err(store_failure)?;
        images.push(ListedObject {
            key,
            presigned_url,
            expires_at,
        });
    }

    Ok(Json(ListObjectsResponse { images }))
}

/// Remove one object from the caller's gallery
#[instrument(skip(state))]
async fn delete_object(
    State(state): State<AppState>,
    Json(request): Json<DeleteObjectRequest>,
) -> Result<Json<DeleteObjectResponse>, ApiFailure> {
    state.authorize_key(&request.key, &request.owner_context, &request.caller_identity)?;

    state
        .store
        .delete(&request.key)
        .await
        .map_err(store_failure)?;

    info!(key = %request.key, "Object deleted");
    Ok(Json(DeleteObjectResponse { deleted: true }))
}

/// Serve the API until `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting grant API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}

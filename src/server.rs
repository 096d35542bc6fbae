use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::construct::{QueryParams, Resource, ResourceKind};
use crate::datatype::Id;
use crate::error::CodingError;
use crate::interface::{Controllers, read_all};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: u16,
    pub error: String,
}

/// A [`CodingError`] answered with the status it maps to.
pub struct ApiError(pub CodingError);

impl From<CodingError> for ApiError {
    fn from(error: CodingError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let error = self.0.to_string();
        warn!(%error, code = status.as_u16(), "request failed");
        (status, Json(ErrorResponse { status: status.as_u16(), error })).into_response()
    }
}

type Controlled = State<Arc<Controllers>>;

/// Routes `/{kind}` and `/{kind}/{id}` for every resource kind.
pub fn router(controllers: Arc<Controllers>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);
    Router::new()
        .route("/:kind", get(list).post(create))
        .route("/:kind/:id", get(read).put(update).delete(remove))
        .layer(cors)
        .with_state(controllers)
}

/// Stores are synchronous, so every call runs on the blocking pool.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            warn!(error = %e, "join error");
            ApiError(CodingError::Persistence(format!("join error: {e}")))
        })?
        .map_err(ApiError)
}

async fn list(
    State(controllers): Controlled,
    Path(kind): Path<String>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Vec<Resource>>, ApiError> {
    let kind: ResourceKind = kind.parse()?;
    let mut params = QueryParams::new();
    for (key, value) in pairs {
        params.entry(key).or_default().push(value);
    }
    let started = std::time::Instant::now();
    let found = blocking(move || {
        let mut reader = controllers.get(kind).query(&params);
        read_all(reader.as_mut(), kind)
    })
    .await?;
    info!(%kind, rows = found.len(), ms = started.elapsed().as_secs_f64() * 1000.0, "query complete");
    Ok(Json(found))
}

async fn create(
    State(controllers): Controlled,
    Path(kind): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<Resource>), ApiError> {
    let kind: ResourceKind = kind.parse()?;
    let created = blocking(move || {
        let controller = controllers.get(kind);
        let mut resource = controller.new_resource();
        resource.decode_json(&body)?;
        controller.create(&mut resource)?;
        Ok(resource)
    })
    .await?;
    info!(%kind, id = %created.id(), "created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn read(
    State(controllers): Controlled,
    Path((kind, id)): Path<(String, String)>,
) -> Result<Json<Resource>, ApiError> {
    let kind: ResourceKind = kind.parse()?;
    let id = Id::parse(&id)?;
    let found = blocking(move || controllers.get(kind).read(id)).await?;
    Ok(Json(found))
}

async fn update(
    State(controllers): Controlled,
    Path((kind, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Resource>, ApiError> {
    let kind: ResourceKind = kind.parse()?;
    let id = Id::parse(&id)?;
    let updated = blocking(move || {
        let controller = controllers.get(kind);
        let mut resource = controller.new_resource();
        resource.decode_json(&body)?;
        resource.set_id(id);
        controller.update(&mut resource)?;
        Ok(resource)
    })
    .await?;
    info!(%kind, %id, "updated");
    Ok(Json(updated))
}

async fn remove(
    State(controllers): Controlled,
    Path((kind, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let kind: ResourceKind = kind.parse()?;
    let id = Id::parse(&id)?;
    blocking(move || controllers.get(kind).delete(id)).await?;
    info!(%kind, %id, "deleted");
    Ok(StatusCode::NO_CONTENT)
}

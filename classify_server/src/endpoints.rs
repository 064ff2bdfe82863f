//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{
    body::{Bytes, StreamBody},
    extract::{DefaultBodyLimit, Path, Query},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use common::prediction::{describe_top, Prediction};
use futures::{future, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    gallery::{content_type, Gallery},
    inferer::LiveClassifier,
    meter::METER,
    model::ModelHandle,
    page::render_index,
    pubsub::{classified_channel, NamedPubSub},
    utils::as_jpeg_stream_item,
};

/// Largest accepted image upload.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Channel used when a request does not name one.
pub const DEFAULT_CHANNEL: &str = "webcam";

/// Search parameters available to streams.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    name: Option<String>,
}

impl StreamParams {
    fn channel(self) -> String {
        self.name.unwrap_or_else(|| DEFAULT_CHANNEL.into())
    }
}

/// Parameters naming a gallery image.
#[derive(Debug, Deserialize)]
pub struct ImageParams {
    name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Status {
    pub ready: bool,
}

/// Result of classifying a single image.
#[derive(Debug, Deserialize, Serialize)]
pub struct ClassifyResponse {
    pub description: String,
    pub predictions: Vec<Prediction>,
}

impl ClassifyResponse {
    fn new(predictions: Vec<Prediction>) -> Self {
        let description =
            describe_top(&predictions).unwrap_or_else(|| "No prediction available.".into());
        Self {
            description,
            predictions,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LivePrediction {
    pub description: String,
    pub prediction: Prediction,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct EnableResponse {
    /// `false` if classification was already running on the channel.
    pub started: bool,
}

/// Errors reported to HTTP clients.
#[derive(Debug)]
pub enum ApiError {
    NotReady,
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotReady => {
                (StatusCode::SERVICE_UNAVAILABLE, "Model is still loading").into_response()
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Internal(e) => {
                log::error!("Request failed: {e:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")).into_response()
            }
        }
    }
}

/// Build the HTTP router with all endpoints.
pub fn router(
    pubsub: Arc<NamedPubSub>,
    model: Arc<ModelHandle>,
    live: Arc<LiveClassifier>,
    gallery: Arc<Gallery>,
) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route("/status", get(status))
        .route("/gallery", get(gallery_list))
        .route("/gallery/:name", get(gallery_image))
        .route("/classify_gallery", post(classify_gallery))
        .route("/classify", post(classify_upload))
        .route("/enable_cam", post(enable_cam))
        .route("/prediction", get(live_prediction))
        .route("/stream", get(named_stream))
        .route("/classified_stream", get(classified_stream))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(Extension(pubsub))
        .layer(Extension(model))
        .layer(Extension(live))
        .layer(Extension(gallery))
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

/// Whether the model finished loading.
pub async fn status(Extension(model): Extension<Arc<ModelHandle>>) -> Json<Status> {
    Json(Status {
        ready: model.is_ready(),
    })
}

/// Demo page.
pub async fn index(
    Extension(model): Extension<Arc<ModelHandle>>,
    Extension(gallery): Extension<Arc<Gallery>>,
    Query(params): Query<StreamParams>,
) -> Result<Html<String>, ApiError> {
    let images = gallery.list().map_err(ApiError::Internal)?;
    Ok(Html(render_index(
        &images,
        model.is_ready(),
        &params.channel(),
    )))
}

pub async fn gallery_list(
    Extension(gallery): Extension<Arc<Gallery>>,
) -> Result<Json<Vec<String>>, ApiError> {
    gallery.list().map(Json).map_err(ApiError::Internal)
}

pub async fn gallery_image(
    Extension(gallery): Extension<Arc<Gallery>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let data = read_gallery_image(&gallery, &name)?;
    Ok(([(header::CONTENT_TYPE, content_type(&name))], data))
}

fn read_gallery_image(gallery: &Gallery, name: &str) -> Result<Vec<u8>, ApiError> {
    gallery
        .read(name)
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound(format!("no image named {name:?} in gallery")))
}

/// Classify an image of the gallery, as if it was clicked on.
pub async fn classify_gallery(
    Extension(model): Extension<Arc<ModelHandle>>,
    Extension(gallery): Extension<Arc<Gallery>>,
    Query(params): Query<ImageParams>,
) -> Result<Json<ClassifyResponse>, ApiError> {
    // Refuse before touching the gallery, nothing happens while loading
    if !model.is_ready() {
        return Err(ApiError::NotReady);
    }
    let data = read_gallery_image(&gallery, &params.name)?;

    log::info!("Classifying gallery image {}", &params.name);
    classify_bytes(&model, Bytes::from(data)).await.map(Json)
}

/// Classify an image sent as request body.
pub async fn classify_upload(
    Extension(model): Extension<Arc<ModelHandle>>,
    body: Bytes,
) -> Result<Json<ClassifyResponse>, ApiError> {
    log::info!("Classifying uploaded image ({} bytes)", body.len());
    classify_bytes(&model, body).await.map(Json)
}

async fn classify_bytes(model: &ModelHandle, data: Bytes) -> Result<ClassifyResponse, ApiError> {
    let model = model.get().ok_or(ApiError::NotReady)?;

    let res = tokio::task::spawn_blocking(move || {
        let image = image::load_from_memory(&data)
            .map_err(|e| ApiError::BadRequest(format!("unreadable image: {e}")))?
            .to_rgb8();
        model.classify(&image).map_err(ApiError::Internal)
    })
    .await
    .map_err(|e| ApiError::Internal(e.into()))?;

    res.map(ClassifyResponse::new)
}

/// Start live classification on a stream.
pub async fn enable_cam(
    Extension(model): Extension<Arc<ModelHandle>>,
    Extension(live): Extension<Arc<LiveClassifier>>,
    Query(params): Query<StreamParams>,
) -> Result<Json<EnableResponse>, ApiError> {
    if !model.is_ready() {
        return Err(ApiError::NotReady);
    }
    let started = live.enable(&params.channel()).map_err(ApiError::Internal)?;
    Ok(Json(EnableResponse { started }))
}

/// Latest prediction of the live classification on a stream.
pub async fn live_prediction(
    Extension(live): Extension<Arc<LiveClassifier>>,
    Query(params): Query<StreamParams>,
) -> Response {
    match live.latest(&params.channel()) {
        Some(prediction) => Json(LivePrediction {
            description: prediction.describe(),
            prediction,
        })
        .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

// Endpoint of received image streams.
pub async fn named_stream(
    Extension(pubsub): Extension<Arc<NamedPubSub>>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let name = params.channel();
    log::info!("Stream for {} requested", &name);

    let rx = pubsub.get_broadcast_receiver(&name).await;
    let stream = BroadcastStream::new(rx)
        .filter_map(|res| future::ready(res.ok()))
        .map(|data| {
            METER.tick_raw();
            Ok::<_, String>(as_jpeg_stream_item(&data))
        });

    multipart_response(StreamBody::new(stream))
}

// Endpoint of annotated image streams.
pub async fn classified_stream(
    Extension(pubsub): Extension<Arc<NamedPubSub>>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let name = params.channel();
    log::info!("Classified stream for {} requested", &name);

    let rx = pubsub
        .get_broadcast_receiver(&classified_channel(&name))
        .await;
    let stream = BroadcastStream::new(rx)
        .filter_map(|res| future::ready(res.ok()))
        .map(|data| Ok::<_, String>(as_jpeg_stream_item(&data)));

    multipart_response(StreamBody::new(stream))
}

/// Set body and headers for multipart streaming
fn multipart_response(body: impl IntoResponse) -> impl IntoResponse {
    let headers = [(
        header::CONTENT_TYPE,
        "multipart/x-mixed-replace; boundary=frame",
    )];

    (headers, body)
}

use axum::{
    body::Body,
    http::{header, Response, StatusCode, Uri},
    routing::get,
    Router,
};
use rust_embed::Embed;

/// Dashboard assets
///
/// Embedded in release builds; debug builds read `web/dist` from disk.
#[derive(Embed)]
#[folder = "web/dist"]
#[prefix = ""]
pub struct StaticAssets;

/// Create router for static file serving
pub fn static_file_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(index_handler))
        .route("/*path", get(static_handler))
}

async fn index_handler() -> Response<Body> {
    try_serve_file("index.html").unwrap_or_else(not_found)
}

async fn static_handler(uri: Uri) -> Response<Body> {
    let path = uri.path().trim_start_matches('/');
    try_serve_file(path).unwrap_or_else(not_found)
}

fn try_serve_file(path: &str) -> Option<Response<Body>> {
    let asset = StaticAssets::get(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(asset.data.into_owned()))
        .ok()
}

fn not_found() -> Response<Body> {
    let mut response = Response::new(Body::from("Not Found"));
    *response.status_mut() = StatusCode::NOT_FOUND;
    response
}

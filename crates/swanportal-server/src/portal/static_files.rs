//! Static file serving from the webroot overlay.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};

use super::PortalContext;

/// Content type by file extension; everything else is served opaque.
fn content_type_for(path: &str) -> &'static str {
    if path.ends_with(".css") {
        "text/css"
    } else if path.ends_with(".html") {
        "text/html"
    } else if path.ends_with(".jpg") {
        "image/jpeg"
    } else if path.ends_with(".js") {
        "application/javascript"
    } else if path.ends_with(".png") {
        "image/png"
    } else if path.ends_with(".svg") {
        "image/svg+xml"
    } else {
        "application/octet-stream"
    }
}

/// Serve a file from the webroot overlay.
pub async fn static_handler(State(ctx): State<Arc<PortalContext>>, uri: Uri) -> Response {
    let path = uri.path().trim_start_matches('/');

    let Some(data) = ctx.webroot.read(path) else {
        ctx.app
            .log
            .error("Failed to find a file", &[("path", path)]);
        return StatusCode::NOT_FOUND.into_response();
    };

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static(content_type_for(path)),
            ),
            (
                header::CACHE_CONTROL,
                HeaderValue::from_static("private, max-age=604800"),
            ),
        ],
        data,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("static/site.css"), "text/css");
        assert_eq!(content_type_for("static/app.js"), "application/javascript");
        assert_eq!(content_type_for("favicon.ico"), "application/octet-stream");
        assert_eq!(content_type_for("static/logo.svg"), "image/svg+xml");
        assert_eq!(content_type_for("static/logo.png"), "image/png");
    }
}

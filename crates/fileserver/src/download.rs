//! Download flow: single files through the standard file responder, folders as zip streams

use std::path::Path;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::archive::stream_directory;
use crate::resolver::ResolvedPath;

/// Body sent when a resolved file cannot be opened
pub const UNABLE_TO_GET_FILE: &str = "Unable to get file";

/// Serve a resolved path: a file as an attachment, a folder as `<name>.zip`
pub async fn download(resolved: &ResolvedPath, request: Request) -> Response {
    if resolved.is_directory {
        tracing::info!(path = %resolved.requested_relative_path, "Streaming folder as zip");
        stream_directory(resolved)
    } else {
        tracing::info!(path = %resolved.requested_relative_path, "Serving file");
        serve_file(resolved, request).await
    }
}

/// Serve one file with range and conditional request support
///
/// The request's `Range`, `If-Modified-Since` and `If-Unmodified-Since`
/// headers are honored by the responder; `Content-Disposition` names the file
/// after the last segment of the requested path.
pub async fn serve_file(file: &ResolvedPath, request: Request) -> Response {
    let Some(mut response) = respond_with_file(&file.absolute_path, request).await else {
        tracing::warn!(path = %file.requested_relative_path, "Unable to get file");
        return (StatusCode::NOT_FOUND, UNABLE_TO_GET_FILE).into_response();
    };

    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        attachment_disposition(&file.file_name()),
    );
    response
}

/// Serve the favicon, or answer `204 No Content` if it is missing
pub async fn serve_favicon(icon: &Path, request: Request) -> Response {
    match respond_with_file(icon, request).await {
        Some(mut response) => {
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("image/x-icon"),
            );
            response
        }
        None => {
            tracing::warn!(icon = %icon.display(), "Favicon missing");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Run the file responder; `None` if it could not open the file
async fn respond_with_file(path: &Path, request: Request) -> Option<Response> {
    let response = match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    };

    match response.status() {
        StatusCode::NOT_FOUND | StatusCode::INTERNAL_SERVER_ERROR => None,
        _ => Some(response.map(Body::new)),
    }
}

/// Build an `attachment` disposition with an ASCII fallback and an RFC 5987 UTF-8 name
pub fn attachment_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(file_name)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::PathResolver;
    use axum::http::Request as HttpRequest;
    use std::fs as stdfs;
    use tempfile::TempDir;

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(headers: &[(&str, &str)]) -> Request {
        let mut builder = HttpRequest::builder().uri("/download/x");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn resolved_file(contents: &str) -> (TempDir, ResolvedPath) {
        let temp_dir = TempDir::new().unwrap();
        stdfs::create_dir(temp_dir.path().join("docs")).unwrap();
        stdfs::write(temp_dir.path().join("docs/report.txt"), contents).unwrap();
        let resolver = PathResolver::new(temp_dir.path()).unwrap();
        let resolved = resolver.resolve("docs/report.txt").await.unwrap();
        (temp_dir, resolved)
    }

    #[test]
    fn test_attachment_disposition() {
        assert_eq!(
            attachment_disposition("report.txt"),
            "attachment; filename=\"report.txt\"; filename*=UTF-8''report.txt"
        );
        assert_eq!(
            attachment_disposition("my \"file\".zip"),
            "attachment; filename=\"my _file_.zip\"; filename*=UTF-8''my%20%22file%22.zip"
        );
        assert_eq!(
            attachment_disposition("résumé.pdf"),
            "attachment; filename=\"r_sum_.pdf\"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"
        );
    }

    #[tokio::test]
    async fn test_serve_file_full() {
        let (_temp, resolved) = resolved_file("hello world").await;
        let response = serve_file(&resolved, get(&[])).await;

        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response.headers()[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.starts_with("attachment; filename=\"report.txt\""));
        assert!(response.headers().contains_key(header::LAST_MODIFIED));
        assert_eq!(body_string(response).await, "hello world");
    }

    #[tokio::test]
    async fn test_serve_file_range() {
        let (_temp, resolved) = resolved_file("hello world").await;
        let response = serve_file(&resolved, get(&[("range", "bytes=6-10")])).await;

        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 6-10/11");
        assert_eq!(body_string(response).await, "world");
    }

    #[tokio::test]
    async fn test_serve_file_not_modified() {
        let (_temp, resolved) = resolved_file("hello world").await;
        let response = serve_file(
            &resolved,
            get(&[("if-modified-since", "Fri, 01 Jan 2100 00:00:00 GMT")]),
        )
        .await;

        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
    }

    #[tokio::test]
    async fn test_serve_vanished_file() {
        let (temp, resolved) = resolved_file("hello").await;
        stdfs::remove_file(temp.path().join("docs/report.txt")).unwrap();

        let response = serve_file(&resolved, get(&[])).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, UNABLE_TO_GET_FILE);
    }

    #[tokio::test]
    async fn test_missing_favicon_is_silent() {
        let temp_dir = TempDir::new().unwrap();
        let response = serve_favicon(&temp_dir.path().join("favicon.ico"), get(&[])).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_favicon_served() {
        let temp_dir = TempDir::new().unwrap();
        let icon = temp_dir.path().join("favicon.ico");
        stdfs::write(&icon, [0u8, 0, 1, 0]).unwrap();

        let response = serve_favicon(&icon, get(&[])).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/x-icon");
    }
}

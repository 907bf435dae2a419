//! HTTP server: routes, handlers and the TLS serve loop

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Request, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use maud::Markup;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::auth::basic_auth;
use crate::config::ServerSettings;
use crate::download::{download, serve_favicon};
use crate::error::AppError;
use crate::listing::list_directory;
use crate::render::{home_page, listing_page};
use crate::state::ServerState;
use crate::token::token_prefix;

/// Grace period for in-flight downloads on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// File server API for building the router and running the server
#[derive(Clone)]
pub struct FileServerApi {
    state: ServerState,
}

impl FileServerApi {
    /// Create a new file server API
    ///
    /// # Arguments
    /// * `settings` - Server settings; should already be validated
    ///
    /// # Errors
    /// Fails if the root directory cannot be opened
    pub fn new(settings: ServerSettings) -> crate::Result<Self> {
        let state = ServerState::new(settings)?;
        Ok(Self { state })
    }

    /// Get the server state
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Create the axum router with all routes configured
    pub fn router(&self) -> Router {
        let settings = self.state.settings();
        let temp_link_route = format!("{}/:token", settings.temp_link_route());

        let mut router = Router::new()
            .route("/", get(home))
            .route("/walk", get(|| async { Redirect::permanent("/walk/") }))
            .route("/walk/", get(walk))
            .route("/walk/*path", get(walk))
            .route("/download/", get(download_path))
            .route("/download/*path", get(download_path))
            .route("/gettemplink/", get(mint_temp_link))
            .route("/gettemplink/*path", get(mint_temp_link))
            .route(&temp_link_route, get(consume_temp_link))
            .route("/favicon.ico", get(favicon))
            .fallback(not_found)
            .with_state(self.state.clone());

        if settings.credentials.is_enabled() {
            router = router.layer(middleware::from_fn_with_state(
                Arc::new(settings.credentials.clone()),
                basic_auth,
            ));
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Start the file server over TLS and run until a shutdown signal arrives
    ///
    /// # Errors
    /// Fails if the certificate or key cannot be loaded or the listener cannot bind
    pub async fn serve(self) -> crate::Result<()> {
        let settings = self.state.settings().clone();
        let tls = RustlsConfig::from_pem_file(&settings.cert_file, &settings.key_file).await?;

        let handle = Handle::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweeper = self
            .state
            .links()
            .spawn_sweeper(settings.sweep_interval, shutdown_rx);
        tokio::spawn(shutdown_signal(handle.clone()));

        tracing::info!(
            addr = %settings.listen_addr,
            root = %self.state.resolver().root().display(),
            temp_link_hours = settings.temp_link_hours,
            auth = settings.credentials.is_enabled(),
            "File server listening"
        );

        let result = axum_server::bind_rustls(settings.listen_addr, tls)
            .handle(handle)
            .serve(self.router().into_make_service())
            .await;

        let _ = shutdown_tx.send(true);
        let _ = sweeper.await;

        result?;
        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Received termination signal, shutting down");
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
}

fn requested(path: Option<Path<String>>) -> String {
    path.map(|Path(path)| path).unwrap_or_default()
}

async fn home() -> Markup {
    home_page()
}

async fn not_found(request: Request) -> AppError {
    tracing::warn!(path = request.uri().path(), "Error 404");
    AppError::UnknownRoute
}

/// Directory listing as HTML, or JSON when the client asks for it
async fn walk(
    State(state): State<ServerState>,
    path: Option<Path<String>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let dir = state.resolver().resolve(&requested(path)).await?;
    if !dir.is_directory {
        tracing::warn!(path = %dir.requested_relative_path, "Walk requested on a file");
        return Err(AppError::NotFoundOrDenied);
    }

    let listing = list_directory(&dir).await?;
    if wants_json(&headers) {
        return Ok(Json(listing).into_response());
    }
    Ok(listing_page(&listing).into_response())
}

async fn download_path(
    State(state): State<ServerState>,
    path: Option<Path<String>>,
    request: Request,
) -> Result<Response, AppError> {
    let resolved = state.resolver().resolve(&requested(path)).await?;
    Ok(download(&resolved, request).await)
}

async fn mint_temp_link(
    State(state): State<ServerState>,
    path: Option<Path<String>>,
    headers: HeaderMap,
) -> Result<String, AppError> {
    let target = state.resolver().resolve(&requested(path)).await?;
    let token = state.links().mint(target.requested_relative_path.clone())?;
    let url = temp_link_url(state.settings(), &headers, &token);

    tracing::info!(
        path = %target.requested_relative_path,
        token = token_prefix(&token),
        "Minted temp link"
    );

    Ok(format!(
        "File: {}\nTemporary link: {}\n\n\nOnly valid for {} hours",
        target.requested_relative_path,
        url,
        state.links().ttl().num_hours()
    ))
}

/// Serve whatever a live temp link points at, exactly like a direct download
async fn consume_temp_link(
    State(state): State<ServerState>,
    Path(token): Path<String>,
    request: Request,
) -> Result<Response, AppError> {
    let Some(target) = state.links().lookup(&token) else {
        tracing::warn!(token = token_prefix(&token), "Unknown or expired temp link");
        return Err(AppError::UnknownRoute);
    };

    let resolved = state.resolver().resolve(&target).await?;
    let response = download(&resolved, request).await;
    state.links().request_sweep();
    Ok(response)
}

async fn favicon(State(state): State<ServerState>, request: Request) -> Response {
    serve_favicon(&state.settings().favicon, request).await
}

/// Full URL of a temp link, preferring the configured public URL over the Host header
fn temp_link_url(settings: &ServerSettings, headers: &HeaderMap, token: &str) -> String {
    let base = match &settings.public_url {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => {
            let host = headers
                .get(header::HOST)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| settings.listen_addr.to_string());
            format!("https://{}", host)
        }
    };
    format!("{}{}/{}", base, settings.temp_link_route(), token)
}

fn wants_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| accept.contains("application/json") && !accept.contains("text/html"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_temp_link_url_from_host_header() {
        let settings = ServerSettings::new("/srv");
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("files.local:8090"));

        assert_eq!(
            temp_link_url(&settings, &headers, "abc"),
            "https://files.local:8090/temp/abc"
        );
    }

    #[test]
    fn test_temp_link_url_prefers_public_url() {
        let mut settings = ServerSettings::new("/srv");
        settings.public_url = Some("https://share.example.com/".to_string());
        settings.temp_link_base = "/t/".to_string();

        assert_eq!(
            temp_link_url(&settings, &HeaderMap::new(), "abc"),
            "https://share.example.com/t/abc"
        );
    }

    #[test]
    fn test_temp_link_url_without_host() {
        let settings = ServerSettings::new("/srv");
        assert_eq!(
            temp_link_url(&settings, &HeaderMap::new(), "abc"),
            "https://0.0.0.0:8090/temp/abc"
        );
    }

    #[test]
    fn test_wants_json() {
        let mut headers = HeaderMap::new();
        assert!(!wants_json(&headers));

        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert!(wants_json(&headers));

        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/json;q=0.9"),
        );
        assert!(!wants_json(&headers));
    }
}

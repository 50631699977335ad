use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use nymph_proto::state::{SessionState, StateManager};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::action::{Action, Outcome};
use crate::apps::AppLink;
use crate::core::SessionEvent;
use crate::error::{ControlError, ErrorKind};
use crate::shares::ShareKey;

#[derive(Clone)]
pub struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<SessionEvent>,
    stylesheet: PathBuf,
}

impl HttpState {
    pub fn new(
        state_manager: Arc<StateManager>,
        event_tx: mpsc::Sender<SessionEvent>,
        stylesheet: PathBuf,
    ) -> Self {
        Self {
            state_manager,
            event_tx,
            stylesheet,
        }
    }
}

#[derive(Serialize)]
struct ApiError {
    error: String,
    kind: &'static str,
}

/// Failure of one routed command.
enum RouteError {
    Control(ControlError),
    /// The controller loop is gone.
    Unavailable,
    /// An app message link followed with GET.
    MessageNeedsPost,
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            RouteError::Control(e) => {
                let (status, kind) = match e.kind() {
                    ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation"),
                    ErrorKind::NothingFound => (StatusCode::NOT_FOUND, "nothing_found"),
                    ErrorKind::Transport => (StatusCode::BAD_GATEWAY, "transport"),
                };
                (
                    status,
                    ApiError {
                        error: e.to_string(),
                        kind,
                    },
                )
            }
            RouteError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                ApiError {
                    error: "controller is not running".to_string(),
                    kind: "unavailable",
                },
            ),
            RouteError::MessageNeedsPost => (
                StatusCode::METHOD_NOT_ALLOWED,
                ApiError {
                    error: "app message links must be sent with POST".to_string(),
                    kind: "method_not_allowed",
                },
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
struct PathBody {
    path: PathBuf,
}

#[derive(Deserialize)]
struct UrlBody {
    url: String,
}

#[derive(Deserialize)]
struct RemotesBody {
    indices: Vec<usize>,
}

#[derive(Deserialize)]
struct MessageBody {
    message: String,
}

#[derive(Deserialize)]
struct PlayShareBody {
    selection: Vec<ShareKey>,
    #[serde(default)]
    receivers: Vec<usize>,
}

pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/logs", get(get_logs))
        .route("/api/about", get(about))
        .route("/api/quit", post(quit))
        .route("/api/connect/:address", post(connect))
        .route("/api/disconnect", post(disconnect))
        .route("/api/cast/file", post(cast_file))
        .route("/api/cast/url", post(cast_url))
        .route("/api/playlist", post(add_file))
        .route("/api/playlist/:index", delete(remove_file))
        .route("/api/playlist/select/:index", post(select))
        .route("/api/single-play/:enabled", post(single_play))
        .route("/api/play", post(play))
        .route("/api/stop", post(stop))
        .route("/api/pause", post(pause))
        .route("/api/forward", post(forward))
        .route("/api/rewind", post(rewind))
        .route("/api/mute", post(mute))
        .route("/api/seek/:percent", post(seek))
        .route("/api/volume/:value", post(set_volume))
        .route("/api/remotes/scan", post(scan_remotes))
        .route("/api/remotes/connect", post(connect_remotes))
        .route("/api/remotes/disconnect", post(disconnect_remote))
        .route("/api/apps", get(refresh_apps))
        .route("/api/apps/:app/message", post(send_app_message))
        .route("/apps", get(apps_home))
        .route("/apps/link/*path", get(open_link).post(follow_link))
        .route("/apps/resource/*path", get(load_resource))
        .route("/api/shares/scan", post(scan_shares))
        .route("/api/shares/play", post(play_share))
        .route("/style.css", get(stylesheet))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state: HttpState,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state);

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

/// Send `action` to the controller and wait for its result.
async fn dispatch(state: &HttpState, action: Action) -> Result<Outcome, RouteError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let event = SessionEvent::Command {
        action,
        reply: Some(reply_tx),
    };
    if state.event_tx.send(event).await.is_err() {
        error!("HTTP API: controller channel closed");
        return Err(RouteError::Unavailable);
    }
    match reply_rx.await {
        Ok(result) => result.map_err(RouteError::Control),
        Err(_) => Err(RouteError::Unavailable),
    }
}

fn respond(outcome: Outcome, content_type: &'static str) -> Response {
    match outcome {
        Outcome::Page(bytes) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        other => Json(other).into_response(),
    }
}

async fn run(state: &HttpState, action: Action) -> Result<Response, RouteError> {
    dispatch(state, action)
        .await
        .map(|outcome| respond(outcome, HTML))
}

const HTML: &str = "text/html; charset=utf-8";

fn content_type(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") => HTML,
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Wildcard captures may or may not carry the leading '/'.
fn rooted(path: &str) -> String {
    format!("/{}", path.trim_start_matches('/'))
}

// ── read-only ─────────────────────────────────────────────────────────────────

async fn get_state(State(state): State<HttpState>) -> Json<SessionState> {
    Json(state.state_manager.get_state().await)
}

async fn get_logs(State(state): State<HttpState>) -> Json<Vec<String>> {
    Json(state.state_manager.get_state().await.logs)
}

async fn stylesheet(State(state): State<HttpState>) -> Response {
    let css = match tokio::fs::read(&state.stylesheet).await {
        Ok(css) => css,
        Err(e) => {
            warn!(
                "HTTP API: stylesheet {} not readable: {}",
                state.stylesheet.display(),
                e
            );
            Vec::new()
        }
    };
    ([(header::CONTENT_TYPE, "text/css")], css).into_response()
}

// ── session ───────────────────────────────────────────────────────────────────

async fn about(State(state): State<HttpState>) -> Result<Response, RouteError> {
    run(&state, Action::About).await
}

async fn quit(State(state): State<HttpState>) -> Result<Response, RouteError> {
    info!("HTTP API: Quit");
    run(&state, Action::Quit).await
}

async fn connect(
    State(state): State<HttpState>,
    Path(address): Path<String>,
) -> Result<Response, RouteError> {
    info!("HTTP API: Connect to {}", address);
    run(&state, Action::Connect { address }).await
}

async fn disconnect(State(state): State<HttpState>) -> Result<Response, RouteError> {
    info!("HTTP API: Disconnect");
    run(&state, Action::Disconnect).await
}

async fn cast_file(
    State(state): State<HttpState>,
    Json(body): Json<PathBody>,
) -> Result<Response, RouteError> {
    info!("HTTP API: Cast file {}", body.path.display());
    run(&state, Action::CastFile { path: body.path }).await
}

async fn cast_url(
    State(state): State<HttpState>,
    Json(body): Json<UrlBody>,
) -> Result<Response, RouteError> {
    info!("HTTP API: Cast url {}", body.url);
    run(&state, Action::CastUrl { url: body.url }).await
}

// ── playlist ──────────────────────────────────────────────────────────────────

async fn add_file(
    State(state): State<HttpState>,
    Json(body): Json<PathBody>,
) -> Result<Response, RouteError> {
    info!("HTTP API: Add file {}", body.path.display());
    run(&state, Action::AddFile { path: body.path }).await
}

async fn remove_file(
    State(state): State<HttpState>,
    Path(index): Path<usize>,
) -> Result<Response, RouteError> {
    info!("HTTP API: Remove playlist entry {}", index);
    run(&state, Action::RemoveFile { index }).await
}

async fn select(
    State(state): State<HttpState>,
    Path(index): Path<usize>,
) -> Result<Response, RouteError> {
    run(&state, Action::Select { index }).await
}

async fn single_play(
    State(state): State<HttpState>,
    Path(enabled): Path<bool>,
) -> Result<Response, RouteError> {
    run(&state, Action::SetSinglePlay(enabled)).await
}

// ── transport ─────────────────────────────────────────────────────────────────

async fn play(State(state): State<HttpState>) -> Result<Response, RouteError> {
    info!("HTTP API: Play");
    run(&state, Action::Play).await
}

async fn stop(State(state): State<HttpState>) -> Result<Response, RouteError> {
    info!("HTTP API: Stop");
    run(&state, Action::Stop).await
}

async fn pause(State(state): State<HttpState>) -> Result<Response, RouteError> {
    info!("HTTP API: Pause");
    run(&state, Action::Pause).await
}

async fn forward(State(state): State<HttpState>) -> Result<Response, RouteError> {
    run(&state, Action::Forward).await
}

async fn rewind(State(state): State<HttpState>) -> Result<Response, RouteError> {
    run(&state, Action::Rewind).await
}

async fn mute(State(state): State<HttpState>) -> Result<Response, RouteError> {
    info!("HTTP API: Mute toggle");
    run(&state, Action::Mute).await
}

async fn seek(
    State(state): State<HttpState>,
    Path(percent): Path<i64>,
) -> Result<Response, RouteError> {
    info!("HTTP API: Seek to {}%", percent);
    run(&state, Action::Seek { percent }).await
}

async fn set_volume(
    State(state): State<HttpState>,
    Path(value): Path<i64>,
) -> Result<Response, RouteError> {
    info!("HTTP API: Set volume to {}", value);
    run(&state, Action::Volume { value }).await
}

// ── remotes ───────────────────────────────────────────────────────────────────

async fn scan_remotes(State(state): State<HttpState>) -> Result<Response, RouteError> {
    info!("HTTP API: Scan for remotes");
    run(&state, Action::ScanRemotes).await
}

async fn connect_remotes(
    State(state): State<HttpState>,
    Json(body): Json<RemotesBody>,
) -> Result<Response, RouteError> {
    info!("HTTP API: Connect remotes {:?}", body.indices);
    run(
        &state,
        Action::ConnectRemotes {
            indices: body.indices,
        },
    )
    .await
}

async fn disconnect_remote(State(state): State<HttpState>) -> Result<Response, RouteError> {
    run(&state, Action::DisconnectRemote).await
}

// ── apps ──────────────────────────────────────────────────────────────────────

async fn refresh_apps(State(state): State<HttpState>) -> Result<Response, RouteError> {
    run(&state, Action::RefreshApps).await
}

async fn send_app_message(
    State(state): State<HttpState>,
    Path(app_id): Path<String>,
    Json(body): Json<MessageBody>,
) -> Result<Response, RouteError> {
    info!("HTTP API: Message to app {}", app_id);
    run(
        &state,
        Action::SendAppMessage {
            app_id,
            message: body.message,
        },
    )
    .await
}

async fn apps_home(State(state): State<HttpState>) -> Result<Response, RouteError> {
    run(&state, Action::AppsHome).await
}

/// Read-only form of a link: `/start/<app>` pages load over GET, message
/// links are refused.
async fn open_link(
    State(state): State<HttpState>,
    Path(path): Path<String>,
) -> Result<Response, RouteError> {
    let path = rooted(&path);
    if matches!(AppLink::parse(&path), AppLink::Message { .. }) {
        return Err(RouteError::MessageNeedsPost);
    }
    run(&state, Action::FollowLink { path }).await
}

async fn follow_link(
    State(state): State<HttpState>,
    Path(path): Path<String>,
) -> Result<Response, RouteError> {
    run(&state, Action::FollowLink { path: rooted(&path) }).await
}

async fn load_resource(
    State(state): State<HttpState>,
    Path(path): Path<String>,
) -> Result<Response, RouteError> {
    let path = rooted(&path);
    let kind = content_type(&path);
    dispatch(&state, Action::LoadResource { path })
        .await
        .map(|outcome| respond(outcome, kind))
}

// ── shares ────────────────────────────────────────────────────────────────────

async fn scan_shares(State(state): State<HttpState>) -> Result<Response, RouteError> {
    info!("HTTP API: Scan for shares");
    run(&state, Action::ScanShares).await
}

async fn play_share(
    State(state): State<HttpState>,
    Json(body): Json<PlayShareBody>,
) -> Result<Response, RouteError> {
    info!("HTTP API: Play share {:?}", body.selection);
    run(
        &state,
        Action::PlayShare {
            selection: body.selection,
            receivers: body.receivers,
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    /// Stand-in for the controller loop with canned answers.
    fn fake_core() -> mpsc::Sender<SessionEvent> {
        let (tx, mut rx) = mpsc::channel::<SessionEvent>(16);
        tokio::spawn(async move {
            while let Some(evt) = rx.recv().await {
                let SessionEvent::Command { action, reply } = evt else {
                    continue;
                };
                let result = match action {
                    Action::Volume { value } if !(0..=128).contains(&value) => {
                        Err(ControlError::OutOfRange {
                            what: "volume",
                            value,
                            min: 0,
                            max: 128,
                        })
                    }
                    Action::ScanShares => Err(ControlError::NothingFound("media servers")),
                    Action::Connect { address } => Err(ControlError::ConnectFailed {
                        address,
                        reason: "refused".to_string(),
                    }),
                    Action::FollowLink { path } => Ok(Outcome::Page(path.into_bytes())),
                    Action::LoadResource { path } => Ok(Outcome::Page(path.into_bytes())),
                    Action::ConnectRemotes { indices } => Ok(Outcome::Remotes {
                        found: indices.len(),
                    }),
                    _ => Ok(Outcome::Done),
                };
                if let Some(reply) = reply {
                    let _ = reply.send(result);
                }
            }
        });
        tx
    }

    fn app(stylesheet: PathBuf) -> Router {
        router(HttpState::new(
            Arc::new(StateManager::new()),
            fake_core(),
            stylesheet,
        ))
    }

    async fn call(app: Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Response) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                req = req.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.oneshot(req.body(body).unwrap()).await.unwrap();
        (resp.status(), resp)
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_error_kinds_map_to_statuses() {
        let (status, _) = call(app(PathBuf::new()), "POST", "/api/volume/129", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, resp) = call(app(PathBuf::new()), "POST", "/api/shares/scan", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body_text(resp).await.contains("nothing_found"));

        let (status, _) = call(app(PathBuf::new()), "POST", "/api/connect/10.0.0.2", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);

        let (status, resp) = call(app(PathBuf::new()), "POST", "/api/volume/128", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(resp).await, r#"{"outcome":"done"}"#);
    }

    #[tokio::test]
    async fn test_json_bodies_and_state() {
        let (status, resp) = call(
            app(PathBuf::new()),
            "POST",
            "/api/remotes/connect",
            Some(r#"{"indices":[0,2]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(resp).await, r#"{"outcome":"remotes","found":2}"#);

        let (status, _) = call(
            app(PathBuf::new()),
            "POST",
            "/api/shares/play",
            Some(r#"{"selection":[{"server":0,"file":1}]}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, resp) = call(app(PathBuf::new()), "GET", "/api/state", None).await;
        assert_eq!(status, StatusCode::OK);
        let state: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert_eq!(state["connection"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_app_pages_are_served_raw() {
        let (status, resp) = call(app(PathBuf::new()), "GET", "/apps/link/start/radio", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], HTML);
        assert_eq!(body_text(resp).await, "/start/radio");

        let (_, resp) = call(
            app(PathBuf::new()),
            "GET",
            "/apps/resource/radio/logo.png",
            None,
        )
        .await;
        assert_eq!(resp.headers()[header::CONTENT_TYPE], "image/png");
        assert_eq!(body_text(resp).await, "/radio/logo.png");
    }

    #[tokio::test]
    async fn test_app_message_links_need_post() {
        let (status, resp) = call(app(PathBuf::new()), "GET", "/apps/link/radio/next", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert!(body_text(resp).await.contains("method_not_allowed"));

        let (status, resp) = call(app(PathBuf::new()), "POST", "/apps/link/radio/next", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body_text(resp).await, "/radio/next");
    }

    #[tokio::test]
    async fn test_stylesheet_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (status, resp) = call(app(dir.path().join("none.css")), "GET", "/style.css", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body_text(resp).await.is_empty());

        let css = dir.path().join("default.css");
        std::fs::write(&css, "body { color: black; }").unwrap();
        let (_, resp) = call(app(css), "GET", "/style.css", None).await;
        assert_eq!(body_text(resp).await, "body { color: black; }");
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("/radio/index.HTML"), HTML);
        assert_eq!(content_type("/radio/app.css"), "text/css");
        assert_eq!(content_type("/radio/blob"), "application/octet-stream");
    }
}

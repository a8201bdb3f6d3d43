use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path,
        State,
    },
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use orion_shared::{FlowData, ItemKind, MediaStatus, Role, ServerSettings};
use orion_store::SettingsStore;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::RelayHub;
use crate::session;
use crate::uploads::UploadStore;

#[derive(Clone)]
pub struct AppState {
    pub hub: RelayHub,
    pub settings: Arc<SettingsStore>,
    pub uploads: Arc<UploadStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // Multipart framing needs a little room on top of the file itself.
    let body_limit = state.uploads.max_size() + 64 * 1024;

    let desktop = role_routes(Role::Desktop)
        .route("/ws", get(session::desktop_ws))
        .route("/youtube-info", post(youtube_info))
        .route("/clear", post(clear_items));
    let mobile = role_routes(Role::Mobile).route("/ws", get(session::mobile_ws));

    Router::new()
        .route("/", get(health_check))
        .route("/uploads/:name", get(download))
        .route("/settings", get(get_settings).post(update_settings))
        .nest("/pc", desktop)
        .nest("/mobile", mobile)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Item routes shared by both roles; `role` becomes the items' origin.
fn role_routes(role: Role) -> Router<AppState> {
    Router::new()
        .route("/items", get(list_items))
        .route(
            "/message",
            post(
                move |state: State<AppState>, payload: Result<Json<MessageRequest>, JsonRejection>| {
                    post_message(state, role, payload)
                },
            ),
        )
        .route(
            "/file",
            post(move |state: State<AppState>, headers: HeaderMap, multipart: Multipart| {
                post_file(state, role, headers, multipart)
            }),
        )
}

#[derive(Deserialize)]
struct MessageRequest {
    text: String,
}

#[derive(Serialize)]
struct MessageResponse {
    status: &'static str,
    id: String,
}

#[derive(Serialize)]
struct FileResponse {
    status: &'static str,
    id: String,
    url: String,
}

#[derive(Serialize)]
struct StatusResponse {
    status: &'static str,
}

const SUCCESS: StatusResponse = StatusResponse { status: "success" };

async fn health_check() -> &'static str {
    "All Good"
}

async fn list_items(State(state): State<AppState>) -> Result<Json<FlowData>, ServerError> {
    Ok(Json(state.hub.items().load_all().await?))
}

async fn post_message(
    State(state): State<AppState>,
    role: Role,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ServerError> {
    let Json(request) = payload.map_err(|e| ServerError::BadRequest(format!("Invalid JSON: {e}")))?;

    let item = state
        .hub
        .items()
        .append_new(role, ItemKind::Text, request.text)
        .await?;
    state.hub.notify_items_changed();

    info!(%role, id = %item.id, "Text item added");
    Ok(Json(MessageResponse {
        status: "success",
        id: item.id,
    }))
}

async fn post_file(
    State(state): State<AppState>,
    role: Role,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Json<FileResponse>, ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(multipart_error)?
    {
        if field.name() != Some("file") {
            continue;
        }

        let display_name = field.file_name().unwrap_or("upload").to_string();
        let data = field
            .bytes()
            .await
            .map_err(multipart_error)?;

        // Remembers what was written so a failed append can take it back.
        let mut orphan: Option<String> = None;
        let slot = &mut orphan;
        let uploads = state.uploads.as_ref();
        let appended = state
            .hub
            .items()
            .append_with(role, ItemKind::File, |id| async move {
                let file_ref = uploads.store(&id, &display_name, &data).await?;
                *slot = Some(file_ref.stored_name.clone());
                Ok::<_, ServerError>(file_ref.to_content())
            })
            .await;

        let item = match appended {
            Ok(item) => item,
            Err(e) => {
                if let Some(stored_name) = orphan {
                    state.uploads.remove(&stored_name).await;
                }
                return Err(e);
            }
        };
        let file_ref = item.file_ref().ok_or_else(|| {
            ServerError::UploadStorage(format!("Malformed file item {}", item.id))
        })?;
        state.hub.notify_items_changed();

        let host = match headers.get(header::HOST).and_then(|v| v.to_str().ok()) {
            Some(host) => host.to_string(),
            None => state.settings.current().await.bind_addr(),
        };
        let url = format!("http://{}/uploads/{}", host, file_ref.stored_name);

        info!(%role, id = %item.id, name = %file_ref.display_name, "File item added");
        return Ok(Json(FileResponse {
            status: "success",
            id: item.id,
            url,
        }));
    }

    Err(ServerError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

fn multipart_error(e: MultipartError) -> ServerError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ServerError::BodyTooLarge(e.body_text())
    } else {
        ServerError::BadRequest(format!("Unable to read upload: {}", e.body_text()))
    }
}

async fn clear_items(State(state): State<AppState>) -> Result<Json<StatusResponse>, ServerError> {
    state.hub.items().clear().await?;
    state.hub.notify_items_changed();
    Ok(Json(SUCCESS))
}

async fn youtube_info(
    State(state): State<AppState>,
    payload: Result<Json<MediaStatus>, JsonRejection>,
) -> Result<Json<StatusResponse>, ServerError> {
    let Json(status) = payload.map_err(|e| ServerError::BadRequest(format!("Invalid JSON: {e}")))?;

    info!(
        video = %status.video_id,
        title = %status.title,
        position = status.current_time,
        "Media status received"
    );
    state.hub.publish_media(status);
    Ok(Json(SUCCESS))
}

async fn download(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state.uploads.read(&name).await?;
    let disposition = format!("attachment; filename=\"{}\"", name.replace('"', "_"));
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    ))
}

async fn get_settings(State(state): State<AppState>) -> Json<ServerSettings> {
    Json(state.settings.current().await)
}

async fn update_settings(
    State(state): State<AppState>,
    payload: Result<Json<ServerSettings>, JsonRejection>,
) -> Result<Json<StatusResponse>, ServerError> {
    let Json(settings) =
        payload.map_err(|e| ServerError::BadRequest(format!("Invalid JSON: {e}")))?;
    state.settings.save(settings).await?;
    info!("Settings updated; host/port changes apply on restart");
    Ok(Json(SUCCESS))
}

/// Bind the listener, walking up from the configured port when it is busy.
pub async fn bind(host: &str, port: u16, attempts: u16) -> std::io::Result<tokio::net::TcpListener> {
    let mut last_err = None;
    for offset in 0..attempts.max(1) {
        let Some(candidate) = port.checked_add(offset) else {
            break;
        };
        match tokio::net::TcpListener::bind((host, candidate)).await {
            Ok(listener) => {
                if offset > 0 {
                    info!(busy = port, using = candidate, "Configured port is busy");
                }
                return Ok(listener);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrInUse, "no free port in range")
    }))
}

pub async fn serve(state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %listener.local_addr()?, "Starting HTTP server");

    axum::serve(listener, app).await?;

    Ok(())
}

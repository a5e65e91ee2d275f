//! HTTP/REST control surface (spec §6): `/api` prefix, default port 8747.
//!
//! Grounded on the `axum::Router` + `State` + `get`/`post` pattern used by
//! the hooks server in the turn-server driver crate pulled into this
//! pack's reference material: handlers are small closures that extract
//! query/form bodies and shared state, then respond with plain text or
//! JSON. Every handler here does no routing logic itself — it packages a
//! [`Command`], sends it to the core over the shared channel, and renders
//! whatever [`CommandResult`] comes back. This keeps the single-writer
//! rule intact (spec §5): HTTP handlers never touch the cache, client
//! table, or filter flags directly.

use std::net::SocketAddr;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Form;
use axum::Router as AxumRouter;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use crate::events::{Command, CommandResult, FilterName, RouterEvent};

/// Shared state every handler closes over: just a sender into the core's
/// event channel. Cloning this is cheap (an `mpsc::UnboundedSender` clone).
#[derive(Clone)]
struct ApiState {
    router_events: mpsc::UnboundedSender<RouterEvent>,
}

async fn dispatch(state: &ApiState, command: Command) -> CommandResult {
    let (tx, rx) = oneshot::channel();
    if state.router_events.send(RouterEvent::HttpCommand(command, tx)).is_err() {
        return CommandResult::Err("router core is gone".to_string());
    }
    rx.await.unwrap_or_else(|_| CommandResult::Err("router core dropped the reply".to_string()))
}

impl IntoResponse for CommandResult {
    fn into_response(self) -> Response {
        match self {
            CommandResult::Ok(text) => (StatusCode::OK, text).into_response(),
            CommandResult::Err(text) => (StatusCode::BAD_REQUEST, text).into_response(),
            CommandResult::Json(value) => Json(value).into_response(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DisconnectForm {
    client_id: u64,
}

async fn disconnect(State(state): State<ApiState>, Form(form): Form<DisconnectForm>) -> CommandResult {
    dispatch(&state, Command::Disconnect { client_id: form.client_id }).await
}

#[derive(Debug, Deserialize)]
struct UpstreamForm {
    host: String,
    port: u16,
    #[serde(default)]
    password: String,
}

async fn get_upstream(State(state): State<ApiState>) -> CommandResult {
    dispatch(&state, Command::GetUpstream).await
}

async fn post_upstream(State(state): State<ApiState>, Form(form): Form<UpstreamForm>) -> CommandResult {
    dispatch(
        &state,
        Command::SwitchUpstream {
            host: form.host,
            port: form.port,
            password: form.password,
        },
    )
    .await
}

async fn get_stats(State(state): State<ApiState>) -> CommandResult {
    dispatch(&state, Command::GetStats).await
}

async fn get_clients(State(state): State<ApiState>) -> CommandResult {
    dispatch(&state, Command::GetClients).await
}

async fn get_routerinfo(State(state): State<ApiState>) -> CommandResult {
    dispatch(&state, Command::GetRouterInfo).await
}

async fn get_sharedinfo(State(state): State<ApiState>) -> CommandResult {
    dispatch(&state, Command::GetSharedInfo).await
}

async fn filter_toggle(
    State(state): State<ApiState>,
    Path((which, action)): Path<(String, String)>,
) -> CommandResult {
    let which = match which.as_str() {
        "elevation" => FilterName::Elevation,
        "traffic" => FilterName::Traffic,
        other => return CommandResult::Err(format!("unknown filter '{other}'")),
    };
    let enabled = match action.as_str() {
        "enable" => true,
        "disable" => false,
        other => return CommandResult::Err(format!("unknown filter action '{other}'")),
    };
    dispatch(&state, Command::SetFilter { which, enabled }).await
}

async fn get_blocklist(State(state): State<ApiState>) -> CommandResult {
    dispatch(&state, Command::GetBlocklist).await
}

#[derive(Debug, Deserialize)]
struct CidrForm {
    cidr: String,
}

async fn blocklist_add(State(state): State<ApiState>, Form(form): Form<CidrForm>) -> CommandResult {
    dispatch(&state, Command::BlocklistAdd { cidr: form.cidr }).await
}

async fn blocklist_remove(State(state): State<ApiState>, Form(form): Form<CidrForm>) -> CommandResult {
    dispatch(&state, Command::BlocklistRemove { cidr: form.cidr }).await
}

#[derive(Debug, Deserialize)]
struct VpilotPrintForm {
    message: String,
}

async fn vpilotprint_message(
    State(state): State<ApiState>,
    Form(form): Form<VpilotPrintForm>,
) -> CommandResult {
    dispatch(&state, Command::VpilotPrintMessage { text: form.message }).await
}

/// Build the router's route table (spec §6).
fn app(router_events: mpsc::UnboundedSender<RouterEvent>) -> AxumRouter {
    let state = ApiState { router_events };
    AxumRouter::new()
        .route("/api/stats", get(get_stats))
        .route("/api/clients", get(get_clients))
        .route("/api/disconnect", post(disconnect))
        .route("/api/routerinfo", get(get_routerinfo))
        .route("/api/upstream", get(get_upstream).post(post_upstream))
        .route("/api/sharedinfo", get(get_sharedinfo))
        .route("/api/filter/:which/:action", get(filter_toggle))
        .route("/api/blocklist", get(get_blocklist))
        .route("/api/blocklist/add", post(blocklist_add))
        .route("/api/blocklist/remove", post(blocklist_remove))
        .route("/api/vpilotprint/message", post(vpilotprint_message))
        .with_state(state)
}

/// Bind and serve the REST API until the process exits. The core's event
/// loop is reached exclusively through `router_events`; this task holds no
/// router state of its own (spec §9: HTTP handlers "acquire [context] via a
/// thread-safe accessor that snapshots at entry" — here, by round-tripping
/// through the single core task instead of reading shared memory).
pub async fn serve(port: u16, router_events: mpsc::UnboundedSender<RouterEvent>) -> anyhow::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr).await?;
    log::info!("[http] REST API listening on {addr}");
    axum::serve(listener, app(router_events)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn spawn_stub_core() -> mpsc::UnboundedSender<RouterEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel::<RouterEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let RouterEvent::HttpCommand(command, reply) = event {
                    let result = match command {
                        Command::GetStats => CommandResult::Json(serde_json::json!({"lines_in": 0})),
                        Command::Disconnect { client_id } => {
                            CommandResult::Ok(format!("disconnected {client_id}"))
                        }
                        Command::SetFilter { which, enabled } => {
                            CommandResult::Ok(format!("{which:?}={enabled}"))
                        }
                        _ => CommandResult::Err("unsupported in stub".into()),
                    };
                    let _ = reply.send(result);
                }
            }
        });
        tx
    }

    #[tokio::test]
    async fn stats_round_trips_through_the_core() {
        let tx = spawn_stub_core();
        let response = app(tx)
            .oneshot(Request::builder().uri("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn disconnect_posts_form_body_to_the_core() {
        let tx = spawn_stub_core();
        let response = app(tx)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/disconnect")
                    .header("content-type", "application/x-www-form-urlencoded")
                    .body(Body::from("client_id=7"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn filter_toggle_rejects_unknown_filter_name() {
        let tx = spawn_stub_core();
        let response = app(tx)
            .oneshot(
                Request::builder()
                    .uri("/api/filter/bogus/enable")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;

use crate::commands::{CommandContext, Invoker};
use crate::error::CommandError;
use crate::fetch::providers::fixture::StaticFetcher;
use crate::metrics::Metrics;
use crate::model::{Event, SourceKind, SourceRef, Subscription};
use crate::scheduler::PollController;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub commands: Arc<CommandContext>,
    /// Host-fed community feeds.
    pub community: Arc<StaticFetcher>,
    pub poller: Arc<Mutex<PollController>>,
}

pub fn create_router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/commands", post(run_command))
        .route("/sources", get(list_sources))
        .route("/sources/community/{name}/events", post(push_community_events))
        .route("/poller", get(poller_status))
        .route("/poller/start", post(poller_start))
        .route("/poller/stop", post(poller_stop))
        .layer(CorsLayer::very_permissive())
        .with_state(state);
    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}

#[derive(Deserialize)]
struct CommandReq {
    invoker: Invoker,
    text: String,
}

#[derive(Serialize)]
struct CommandResp {
    ok: bool,
    lines: Vec<String>,
}

fn command_status(e: &CommandError) -> StatusCode {
    match e {
        CommandError::PermissionDenied => StatusCode::FORBIDDEN,
        CommandError::SourceNotFound(_) | CommandError::NotSubscribed(_) => StatusCode::NOT_FOUND,
        CommandError::LimitReached(_) => StatusCode::CONFLICT,
        CommandError::Upstream(_) => StatusCode::BAD_GATEWAY,
        CommandError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

async fn run_command(State(state): State<AppState>, Json(body): Json<CommandReq>) -> Response {
    match state.commands.run(&body.invoker, &body.text).await {
        Ok(reply) => Json(CommandResp {
            ok: true,
            lines: reply.lines,
        })
        .into_response(),
        Err(e) => (
            command_status(&e),
            Json(CommandResp {
                ok: false,
                lines: vec![e.to_string()],
            }),
        )
            .into_response(),
    }
}

#[derive(Serialize)]
struct SourceOut {
    key: String,
    kind: SourceKind,
    id: String,
    label: Option<String>,
    subscriptions: Vec<Subscription>,
    seen: usize,
}

async fn list_sources(State(state): State<AppState>) -> Json<Vec<SourceOut>> {
    let out = state
        .store
        .sources()
        .await
        .into_iter()
        .map(|rec| SourceOut {
            key: rec.source.key(),
            kind: rec.source.kind,
            id: rec.source.id.clone(),
            label: rec.label,
            subscriptions: rec.subscriptions,
            seen: rec.seen.len(),
        })
        .collect();
    Json(out)
}

#[derive(Serialize)]
struct PushResp {
    source: String,
    accepted: usize,
}

/// The community fetcher is fed from outside; events pushed here are
/// picked up (and deduplicated) on the next cycle.
async fn push_community_events(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(events): Json<Vec<Event>>,
) -> Json<PushResp> {
    let source = SourceRef::new(SourceKind::Community, name);
    let accepted = events.len();
    for ev in events {
        state.community.push_event(&source.id, ev);
    }
    tracing::debug!(source = %source, accepted, "community events pushed");
    Json(PushResp {
        source: source.key(),
        accepted,
    })
}

#[derive(Serialize)]
struct PollerOut {
    running: bool,
}

async fn poller_status(State(state): State<AppState>) -> Json<PollerOut> {
    Json(PollerOut {
        running: state.poller.lock().await.is_running(),
    })
}

async fn poller_start(State(state): State<AppState>) -> Json<PollerOut> {
    let mut poller = state.poller.lock().await;
    poller.start();
    Json(PollerOut {
        running: poller.is_running(),
    })
}

async fn poller_stop(State(state): State<AppState>) -> Json<PollerOut> {
    let mut poller = state.poller.lock().await;
    poller.stop();
    Json(PollerOut {
        running: poller.is_running(),
    })
}

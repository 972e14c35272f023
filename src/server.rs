//! Web server for the live map UI.
//!
//! Hosts the map page and exposes the pipeline to it:
//! - JSON endpoints for markers, legend, view, strongest events and status
//! - selection endpoints (the page's click handler)
//! - SSE (Server-Sent Events) announcing snapshot, selection and ranking changes
//!
//! Background tasks poll the live feed and the yearly ranking feed and forward
//! their changes to connected SSE clients.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{
        Html, IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{delete, get, post},
};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::client::{EventSource, FdsnClient};
use crate::legend::LEGEND_LEN;
use crate::models::SeismicEvent;
use crate::poller::{self, PollConfig};
use crate::ranking::{RankingEngine, StrongestChanged};
use crate::snapshot::EventSnapshot;
use crate::state::{LiveMap, MapStatus};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub endpoint: String,
    pub poll: PollConfig,
    pub ranking_interval: Duration,
    pub clear_stale_selection: bool,
}

/// Message pushed to SSE clients.
#[derive(Debug, Clone)]
struct Notice {
    kind: &'static str,
    data: String,
}

impl Notice {
    const SHUTDOWN: &'static str = "shutdown";

    fn new(kind: &'static str, data: &impl Serialize) -> Self {
        Self {
            kind,
            data: serde_json::to_string(data).unwrap_or_default(),
        }
    }

    fn is_shutdown(&self) -> bool {
        self.kind == Self::SHUTDOWN
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Channel for broadcasting changes to SSE clients
    tx: broadcast::Sender<Notice>,
    map: Arc<LiveMap>,
    ranking: Arc<RankingEngine>,
}

impl AppState {
    #[must_use]
    pub fn new(map: Arc<LiveMap>, ranking: Arc<RankingEngine>) -> Self {
        let (tx, _rx) = broadcast::channel::<Notice>(100);
        Self { tx, map, ranking }
    }

    fn notify(&self, notice: Notice) {
        // no subscribers is fine
        let _ = self.tx.send(notice);
    }
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/stream", get(sse_handler))
        .route("/api/markers", get(markers_handler))
        .route("/api/legend", get(legend_handler))
        .route("/api/view", get(view_handler))
        .route("/api/strongest", get(strongest_handler))
        .route("/api/status", get(status_handler))
        .route("/api/select", delete(clear_selection_handler))
        .route("/api/select/{event_id}", post(select_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Start the pollers and the web server; runs until Ctrl+C.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let source = Arc::new(
        FdsnClient::with_endpoint(config.endpoint.clone())
            .context("failed to create feed client")?,
    );
    tracing::info!("polling {}", source.endpoint());
    let map = Arc::new(LiveMap::new(&config.poll.region, config.clear_stale_selection));
    let (ranking, strongest_rx) = RankingEngine::new(config.poll.region);
    let ranking = Arc::new(ranking);
    let state = AppState::new(Arc::clone(&map), Arc::clone(&ranking));

    let (stop_tx, stop_rx) = watch::channel(false);

    let live = tokio::spawn(poller::run_live_map(
        Arc::clone(&source) as Arc<dyn EventSource>,
        Arc::clone(&map),
        config.poll.clone(),
        stop_rx.clone(),
    ));
    let yearly = tokio::spawn(poller::run_strongest(
        source as Arc<dyn EventSource>,
        Arc::clone(&ranking),
        config.poll.region,
        config.ranking_interval,
        stop_rx.clone(),
    ));
    tokio::spawn(forward_strongest(strongest_rx, state.clone()));
    tokio::spawn(forward_snapshots(map.subscribe_snapshot(), state.clone(), stop_rx));

    let app = create_router(state.clone());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("🌍 sismicmap UI starting at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for Ctrl+C: {e}");
            }
            tracing::info!("shutting down");
            let _ = stop_tx.send(true);
            state.notify(Notice::new(Notice::SHUTDOWN, &json!({})));
        })
        .await?;

    let _ = tokio::join!(live, yearly);
    Ok(())
}

/// Relay ranking announcements to the log and to SSE clients.
async fn forward_strongest(mut rx: mpsc::UnboundedReceiver<StrongestChanged>, state: AppState) {
    while let Some(change) = rx.recv().await {
        tracing::info!(
            "strongest of the year: M{:.1} {} ({})",
            change.event.magnitude,
            change.event.place,
            change.event.event_id
        );
        state.notify(Notice::new("strongest", &change.event));
    }
}

/// Relay snapshot replacements to SSE clients.
async fn forward_snapshots(
    mut snapshots: watch::Receiver<EventSnapshot>,
    state: AppState,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            () = poller::stopped(&mut stop) => break,
        }

        let (generation, events) = {
            let snapshot = snapshots.borrow_and_update();
            (snapshot.generation(), snapshot.len())
        };
        state.notify(Notice::new(
            "snapshot",
            &json!({ "generation": generation, "events": events }),
        ));
    }
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Main page handler - serves the HTML UI.
async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// SSE stream handler for change notifications.
async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.tx.subscribe();
    let stream = BroadcastStream::new(rx)
        .take_while(|result| !matches!(result, Ok(notice) if notice.is_shutdown()))
        .filter_map(|result| match result {
            Ok(notice) => Some(Ok(Event::default().event(notice.kind).data(notice.data))),
            Err(_) => None,
        });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// All markers for the current snapshot and selection.
async fn markers_handler(State(state): State<AppState>) -> Response {
    let markers = state.map.markers();
    match serde_json::to_vec(&*markers) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// Most recent events for the side list.
async fn legend_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.map.legend(LEGEND_LEN))
}

/// Current camera.
async fn view_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.map.view())
}

/// Strongest events of the year.
async fn strongest_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ranking.top().events().to_vec())
}

#[derive(Serialize)]
struct StatusBody {
    map: MapStatus,
    strongest: Option<SeismicEvent>,
}

/// Poll phase, loading flag and counters.
async fn status_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatusBody {
        map: state.map.status(),
        strongest: state.ranking.strongest(),
    })
}

/// Select an event by ID.
async fn select_handler(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Response {
    match state.map.select(&event_id) {
        Some(event) => {
            tracing::debug!(event_id = %event.event_id, "selected via UI");
            state.notify(Notice::new("selection", &json!({ "eventId": event.event_id })));
            Json(event).into_response()
        }
        None => (StatusCode::NOT_FOUND, format!("no event {event_id} in current snapshot"))
            .into_response(),
    }
}

/// Clear the selection.
async fn clear_selection_handler(State(state): State<AppState>) -> StatusCode {
    if state.map.clear_selection() {
        state.notify(Notice::new("selection", &json!({ "eventId": null })));
    }
    StatusCode::NO_CONTENT
}

/// Health check endpoint.
async fn health_handler() -> &'static str {
    "OK"
}

// ============================================================================
// HTML Template (embedded for single-binary deployment)
// ============================================================================

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>sismicmap</title>

    <!-- Leaflet -->
    <link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css" />
    <script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>

    <style>
        :root {
            --font: -apple-system, BlinkMacSystemFont, 'Inter', sans-serif;
            --bg: #0f1115;
            --panel: #171a21;
            --text: #e6e8ee;
            --muted: #8a90a2;
            --accent: #ff7f0e;
        }
        * { box-sizing: border-box; }
        body { margin: 0; font-family: var(--font); background: var(--bg); color: var(--text); }
        .layout { display: grid; grid-template-columns: 1fr 340px; height: 100vh; }
        #map { height: 100%; }
        aside { background: var(--panel); overflow-y: auto; padding: 16px; }
        h2 { font-size: 13px; text-transform: uppercase; letter-spacing: .08em; color: var(--muted); }
        .loading { font-size: 12px; color: var(--accent); visibility: hidden; }
        .loading.on { visibility: visible; }
        ul { list-style: none; padding: 0; margin: 0 0 24px; }
        li { padding: 8px 10px; border-radius: 6px; cursor: pointer; display: flex; gap: 10px; }
        li:hover { background: #222733; }
        li.selected { background: #3a2412; }
        .mag { font-weight: 700; min-width: 36px; }
        .place { flex: 1; }
        .time { color: var(--muted); font-size: 12px; }
        .strongest { border-left: 3px solid var(--accent); padding-left: 10px; }
    </style>
</head>
<body>
<div class="layout">
    <div id="map"></div>
    <aside>
        <div id="loading" class="loading">updating…</div>
        <h2>Strongest this year</h2>
        <div id="strongest" class="strongest">–</div>
        <h2>Recent events</h2>
        <ul id="legend"></ul>
    </aside>
</div>
<script>
    const map = L.map('map');
    L.tileLayer('https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png', {
        attribution: '&copy; OpenStreetMap contributors'
    }).addTo(map);
    const layer = L.layerGroup().addTo(map);

    async function getJson(path) {
        const res = await fetch(path);
        return res.json();
    }

    async function select(id) {
        await fetch('/api/select/' + encodeURIComponent(id), { method: 'POST' });
    }

    async function drawMarkers() {
        const markers = await getJson('/api/markers');
        layer.clearLayers();
        for (const m of markers) {
            L.circle([m.latitude, m.longitude], {
                radius: m.radius,
                color: m.color,
                fillColor: m.fillColor,
                fillOpacity: m.fillOpacity,
                weight: m.weight
            })
                .bindTooltip('M' + m.magnitude.toFixed(1) + ' ' + m.place)
                .on('click', () => select(m.eventId))
                .addTo(layer);
        }
    }

    async function drawLegend() {
        const entries = await getJson('/api/legend');
        const list = document.getElementById('legend');
        list.innerHTML = '';
        for (const e of entries) {
            const li = document.createElement('li');
            if (e.selected) li.classList.add('selected');
            li.innerHTML = '<span class="mag"></span><span class="place"></span><span class="time"></span>';
            li.querySelector('.mag').textContent = e.magnitude.toFixed(1);
            li.querySelector('.place').textContent = e.place;
            li.querySelector('.time').textContent = new Date(e.occurredAt).toLocaleTimeString();
            li.onclick = () => select(e.eventId);
            list.appendChild(li);
        }
    }

    async function moveView() {
        const v = await getJson('/api/view');
        if (v.animate) {
            map.flyTo([v.latitude, v.longitude], v.zoom);
        } else {
            map.setView([v.latitude, v.longitude], v.zoom);
        }
    }

    async function drawStrongest() {
        const status = await getJson('/api/status');
        document.getElementById('loading').classList.toggle('on', status.map.loading);
        const s = status.strongest;
        document.getElementById('strongest').textContent =
            s ? 'M' + s.magnitude.toFixed(1) + ' ' + s.place : '–';
    }

    async function refreshAll() {
        await Promise.all([drawMarkers(), drawLegend(), drawStrongest()]);
    }

    moveView().then(refreshAll);

    const source = new EventSource('/stream');
    source.addEventListener('snapshot', refreshAll);
    source.addEventListener('strongest', drawStrongest);
    source.addEventListener('selection', () => {
        moveView();
        drawMarkers();
        drawLegend();
    });
    setInterval(drawStrongest, 5000);
</script>
</body>
</html>
"##;

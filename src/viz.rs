//! One-way bridge to the out-of-process map visualizer. Agents push
//! heterogeneous `update_data` batches; a socket.io namespace broadcasts
//! them to whoever is listening. No consumer, no cost.

use crate::models::VizRecord;
use axum::{extract::State, routing::get};
use dashmap::DashMap;
use log::*;
use socketioxide::{extract::SocketRef, SocketIo, TransportType};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

/// Cloneable handle agents use to publish snapshots. A disabled sender
/// swallows everything, so tests and headless runs skip the server entirely.
#[derive(Clone, Default)]
pub struct VizSender(Option<mpsc::UnboundedSender<Vec<VizRecord>>>);

impl VizSender {
    pub fn disabled() -> Self {
        Self(None)
    }

    pub fn emit(&self, batch: Vec<VizRecord>) {
        if batch.is_empty() {
            return;
        }
        if let Some(tx) = &self.0 {
            tx.send(batch).ok();
        }
    }
}

struct AppState {
    latest: Arc<DashMap<String, VizRecord>>,
}

async fn fleet_handler(State(state): State<Arc<AppState>>) -> axum::Json<Vec<VizRecord>> {
    let records = state.latest.iter().map(|r| r.value().clone()).collect();
    axum::Json(records)
}

async fn events_handler() {}

async fn forward_batches(io: SocketIo, mut rx: mpsc::UnboundedReceiver<Vec<VizRecord>>, latest: Arc<DashMap<String, VizRecord>>) {
    while let Some(batch) = rx.recv().await {
        for record in &batch {
            latest.insert(record.id.clone(), record.clone());
        }
        if let Some(ns) = io.of("/") {
            ns.emit("update_data", &batch).await.ok();
        }
    }
}

/// Start the bridge on `addr` and return the publishing handle. A failed
/// bind degrades to a disabled sender; the simulation does not need the
/// visualizer to exist.
pub fn start(addr: &str) -> VizSender {
    let (tx, rx) = mpsc::unbounded_channel();
    let addr = addr.to_string();

    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!("visualizer bridge not listening on {}: {}", addr, e);
                // keep draining so senders never accumulate
                let mut rx = rx;
                while rx.recv().await.is_some() {}
                return;
            }
        };
        info!("visualizer bridge listening on {}", addr);

        let (socketio_layer, io) = SocketIo::builder()
            .req_path("/")
            .transports([TransportType::Websocket])
            .ping_interval(Duration::from_secs(1))
            .ping_timeout(Duration::from_secs(1))
            .build_layer();

        io.ns("/", async move |s: SocketRef| {
            info!("visualizer connected");
            s.on_disconnect(async move |_s: SocketRef| {
                info!("visualizer disconnected");
            });
        });

        let latest = Arc::new(DashMap::new());
        let forward = {
            let io = io.clone();
            let latest = latest.clone();
            tokio::spawn(forward_batches(io, rx, latest))
        };

        let state = Arc::new(AppState { latest });
        let app = axum::Router::new()
            .route("/api/fleet", get(fleet_handler))
            .route("/api/events", get(events_handler).layer(socketio_layer))
            .with_state(state)
            .layer(CorsLayer::permissive());

        let server = async {
            if let Err(e) = axum::serve(listener, app).await {
                warn!("visualizer bridge stopped: {}", e);
            }
        };
        let _ = tokio::join!(forward, server);
    });

    VizSender(Some(tx))
}

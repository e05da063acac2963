//! Lifecycle of a run: warehouses up first, drones second, everything torn
//! down once the last drone's FSM reaches its terminal state.

use crate::config::SimParams;
use crate::data::WorldData;
use crate::drone::{DroneAgent, DroneReport};
use crate::mail::Directory;
use crate::models::Position;
use crate::viz::VizSender;
use crate::warehouse::{WarehouseAgent, WarehouseReport};
use anyhow::{bail, Context, Result};
use futures::future::join_all;
use log::*;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;

#[derive(Debug)]
pub struct SimReport {
    pub drones: Vec<DroneReport>,
    pub warehouses: Vec<WarehouseReport>,
}

impl SimReport {
    pub fn delivered(&self) -> u32 {
        self.drones.iter().map(|d| d.orders_delivered).sum()
    }
}

/// Run the whole simulation to completion. Warehouses never fail; drone
/// failures are recorded per drone, not raised.
pub async fn run(
    world: WorldData,
    sim: SimParams,
    viz: VizSender,
    metrics_dir: Option<PathBuf>,
) -> Result<SimReport> {
    let directory = Arc::new(Directory::new());
    let warehouse_positions: BTreeMap<String, Position> = world
        .warehouses
        .iter()
        .map(|w| (w.id.clone(), w.position))
        .collect();

    for drone in &world.drones {
        if !warehouse_positions.contains_key(&drone.initial_pos) {
            bail!(
                "drone {} starts at unknown warehouse {}",
                drone.id,
                drone.initial_pos
            );
        }
    }

    let mut warehouse_handles = Vec::new();
    let mut ready_signals = Vec::new();
    for spec in &world.warehouses {
        let mailbox = directory.register(&spec.id);
        let agent = WarehouseAgent::new(spec, directory.clone(), mailbox, sim, viz.clone());
        let (ready_tx, ready_rx) = oneshot::channel();
        warehouse_handles.push((spec.id.clone(), tokio::spawn(agent.run(ready_tx))));
        ready_signals.push(ready_rx);
    }
    for ready in ready_signals {
        ready.await.ok();
    }
    info!("{} warehouses ready", warehouse_handles.len());

    let mut drone_handles = Vec::new();
    for spec in &world.drones {
        let mailbox = directory.register(&spec.id);
        let start = warehouse_positions[&spec.initial_pos];
        let agent = DroneAgent::new(
            spec,
            start,
            warehouse_positions.clone(),
            directory.clone(),
            mailbox,
            sim,
            viz.clone(),
            metrics_dir.clone(),
        );
        drone_handles.push(tokio::spawn(agent.run()));
    }
    info!("{} drones launched", drone_handles.len());

    let drones: Vec<DroneReport> = join_all(drone_handles)
        .await
        .into_iter()
        .collect::<std::result::Result<_, _>>()
        .context("drone task panicked")?;

    // nothing can message the warehouses anymore: close their mailboxes
    for (id, _) in &warehouse_handles {
        directory.remove(id);
    }
    let mut warehouses = Vec::new();
    for (_, handle) in warehouse_handles {
        warehouses.push(handle.await.context("warehouse task panicked")?);
    }

    let report = SimReport { drones, warehouses };
    info!(
        "run complete: {} delivered, {}/{} drones finished cleanly",
        report.delivered(),
        report.drones.iter().filter(|d| d.died_successfully).count(),
        report.drones.len()
    );
    Ok(report)
}

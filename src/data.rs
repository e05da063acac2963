//! CSV ingestion for a run: one drones file plus one file per delivery
//! center. A malformed row anywhere rejects the whole run before any agent
//! starts.

use crate::models::{DeliveryOrder, DroneSpec, Position, WarehouseSpec};
use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use log::*;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

lazy_static! {
    // "25kg" / "30Km" / "20m/s"
    static ref CAPACITY_RE: Regex = Regex::new(r"^(\d+)kg$").unwrap();
    static ref AUTONOMY_RE: Regex = Regex::new(r"^(\d+)Km$").unwrap();
    static ref VELOCITY_RE: Regex = Regex::new(r"^(\d+)m/s$").unwrap();
}

pub struct WorldData {
    pub drones: Vec<DroneSpec>,
    pub warehouses: Vec<WarehouseSpec>,
}

#[derive(Debug, Deserialize)]
struct DroneRow {
    id: String,
    capacity: String,
    autonomy: String,
    velocity: String,
    #[serde(rename = "initialPos")]
    initial_pos: String,
}

#[derive(Debug, Deserialize)]
struct CenterRow {
    id: String,
    latitude: String,
    longitude: String,
    #[serde(default)]
    weight: Option<String>,
}

fn strip_unit(re: &Regex, raw: &str, what: &str) -> Result<u64> {
    let caps = re
        .captures(raw.trim())
        .with_context(|| format!("malformed {} '{}'", what, raw))?;
    Ok(caps[1].parse()?)
}

/// European decimal commas in the source data become dots.
fn parse_coordinate(raw: &str, what: &str) -> Result<f64> {
    raw.trim()
        .replace(',', ".")
        .parse()
        .with_context(|| format!("malformed {} '{}'", what, raw))
}

fn reader(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    csv::ReaderBuilder::new()
        .delimiter(b';')
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("cannot open {}", path.display()))
}

fn load_drones(path: &Path) -> Result<Vec<DroneSpec>> {
    let mut drones = Vec::new();
    for (line, row) in reader(path)?.deserialize().enumerate() {
        let row: DroneRow = row.with_context(|| format!("{} row {}", path.display(), line + 2))?;
        let capacity = strip_unit(&CAPACITY_RE, &row.capacity, "capacity")
            .with_context(|| format!("drone {}", row.id))? as u32;
        let autonomy_km = strip_unit(&AUTONOMY_RE, &row.autonomy, "autonomy")
            .with_context(|| format!("drone {}", row.id))?;
        let velocity = strip_unit(&VELOCITY_RE, &row.velocity, "velocity")
            .with_context(|| format!("drone {}", row.id))?;
        if capacity == 0 {
            bail!("drone {} has zero capacity", row.id);
        }
        drones.push(DroneSpec {
            id: row.id,
            capacity,
            autonomy: autonomy_km as f64 * 1_000.0,
            velocity: velocity as f64,
            initial_pos: row.initial_pos,
        });
    }
    Ok(drones)
}

/// First row is the warehouse itself; every following row is an order with
/// the warehouse as its origin.
fn load_center(path: &Path) -> Result<WarehouseSpec> {
    let mut rows = Vec::new();
    for (line, row) in reader(path)?.deserialize().enumerate() {
        let row: CenterRow = row.with_context(|| format!("{} row {}", path.display(), line + 2))?;
        rows.push(row);
    }
    let Some(head) = rows.first() else {
        bail!("{} has no warehouse row", path.display());
    };
    let position = Position::new(
        parse_coordinate(&head.latitude, "latitude").with_context(|| head.id.clone())?,
        parse_coordinate(&head.longitude, "longitude").with_context(|| head.id.clone())?,
    );

    let mut orders = Vec::new();
    for row in &rows[1..] {
        let destination = Position::new(
            parse_coordinate(&row.latitude, "latitude").with_context(|| row.id.clone())?,
            parse_coordinate(&row.longitude, "longitude").with_context(|| row.id.clone())?,
        );
        let weight: u32 = match &row.weight {
            Some(raw) if !raw.is_empty() => raw
                .parse()
                .with_context(|| format!("malformed weight '{}' for order {}", raw, row.id))?,
            _ => bail!("order {} has no weight", row.id),
        };
        if weight == 0 {
            bail!("order {} has zero weight", row.id);
        }
        orders.push(DeliveryOrder::new(&row.id, position, destination, weight));
    }

    Ok(WarehouseSpec { id: head.id.clone(), position, orders })
}

/// Load `delivery_drones.csv` and every `delivery_center{N}.csv` under
/// `data_dir/dataset`.
pub fn load_world(data_dir: &Path, dataset: &str) -> Result<WorldData> {
    let folder = data_dir.join(dataset);
    if !folder.is_dir() {
        bail!("no data folder at {}", folder.display());
    }

    let drones = load_drones(&folder.join("delivery_drones.csv"))?;

    let mut center_files: Vec<_> = std::fs::read_dir(&folder)
        .with_context(|| format!("cannot read {}", folder.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("delivery_center") && n.ends_with(".csv"))
                .unwrap_or(false)
        })
        .collect();
    center_files.sort();
    if center_files.is_empty() {
        bail!("no delivery_center files in {}", folder.display());
    }

    let mut warehouses = Vec::new();
    for path in center_files {
        warehouses.push(load_center(&path)?);
    }

    for drone in &drones {
        if !warehouses.iter().any(|w| w.id == drone.initial_pos) {
            bail!("drone {} starts at unknown warehouse {}", drone.id, drone.initial_pos);
        }
    }

    info!(
        "loaded {} drones and {} warehouses with {} orders from {}",
        drones.len(),
        warehouses.len(),
        warehouses.iter().map(|w| w.orders.len()).sum::<usize>(),
        folder.display()
    );
    Ok(WorldData { drones, warehouses })
}

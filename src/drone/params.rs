//! Static drone parameters plus the live metrics accumulated over a run,
//! written out as `logs/{id}.json` when the drone dies.

use crate::models::Position;
use serde_json::json;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct DroneParameters {
    pub id: String,
    /// m/s
    pub velocity: f64,
    /// kg
    pub max_capacity: u32,
    /// meters
    pub max_autonomy: f64,
    pub curr_capacity: u32,
    pub curr_autonomy: f64,

    total_trips: u32,
    /// physical meters covered, accumulated every tick
    pub total_distance: f64,
    /// sum of closed-trip distances; the per-trip average divides this, not
    /// the tick accumulator, which also counts the final unfinished leg
    closed_trip_distance: f64,
    min_distance_on_trip: f64,
    max_distance_on_trip: f64,
    avg_distance_on_trip: f64,
    pub orders_delivered: u32,
    orders_to_deliver: u32,
    /// meters covered since the last recharge
    distance_on_trip: f64,
    /// every destination and recharge point, in visit order
    path: Vec<serde_json::Value>,
}

impl DroneParameters {
    pub fn new(id: &str, capacity: u32, autonomy: f64, velocity: f64) -> Self {
        Self {
            id: id.to_string(),
            velocity,
            max_capacity: capacity,
            max_autonomy: autonomy,
            curr_capacity: 0,
            curr_autonomy: autonomy,
            total_trips: 0,
            total_distance: 0.0,
            closed_trip_distance: 0.0,
            min_distance_on_trip: f64::INFINITY,
            max_distance_on_trip: 0.0,
            avg_distance_on_trip: 0.0,
            orders_delivered: 0,
            orders_to_deliver: 0,
            distance_on_trip: 0.0,
            path: Vec::new(),
        }
    }

    pub fn free_capacity(&self) -> u32 {
        self.max_capacity - self.curr_capacity
    }

    pub fn is_out_of_autonomy(&self) -> bool {
        self.curr_autonomy < 0.0
    }

    /// Account for one tick of motion.
    pub fn travel(&mut self, covered: f64) {
        self.curr_autonomy -= covered;
        self.total_distance += covered;
        self.distance_on_trip += covered;
    }

    /// Refill at a warehouse: close out the trip that just ended and log the
    /// stop on the path.
    pub fn recharge(&mut self, warehouse_id: &str, position: Position) {
        self.curr_autonomy = self.max_autonomy;
        self.path.push(json!({
            warehouse_id: { "latitude": position.latitude, "longitude": position.longitude }
        }));
        self.total_trips += 1;
        if self.distance_on_trip > 0.0 {
            self.close_trip();
        }
    }

    fn close_trip(&mut self) {
        let distance = self.distance_on_trip;
        self.closed_trip_distance += distance;
        self.min_distance_on_trip = self.min_distance_on_trip.min(distance);
        self.max_distance_on_trip = self.max_distance_on_trip.max(distance);
        self.avg_distance_on_trip = self.closed_trip_distance / f64::from(self.total_trips);
        self.distance_on_trip = 0.0;
    }

    pub fn add_order(&mut self, weight: u32) {
        self.orders_to_deliver += 1;
        self.curr_capacity += weight;
    }

    pub fn drop_order(&mut self, weight: u32, order_id: &str, destination: Position) {
        self.orders_to_deliver -= 1;
        self.orders_delivered += 1;
        self.curr_capacity -= weight;
        self.path.push(json!({
            order_id: { "latitude": destination.latitude, "longitude": destination.longitude }
        }));
    }

    fn occupancy_rate(&self) -> f64 {
        if self.total_trips == 0 {
            return 0.0;
        }
        f64::from(self.orders_delivered) / f64::from(self.total_trips)
    }

    fn energy_consumption(&self) -> f64 {
        self.total_distance / self.max_autonomy
    }

    fn min_distance(&self) -> f64 {
        if self.min_distance_on_trip.is_finite() {
            self.min_distance_on_trip
        } else {
            0.0
        }
    }

    fn round2(x: f64) -> f64 {
        (x * 100.0).round() / 100.0
    }

    pub fn metrics_line(&self, order_ids: &[String]) -> String {
        format!(
            "{} Metrics - trips {}, distance {:.2}m, delivered {}, occupancy {:.2}, energy {:.2}%, orders {:?}",
            self.id,
            self.total_trips,
            self.total_distance,
            self.orders_delivered,
            self.occupancy_rate(),
            self.energy_consumption() * 100.0,
            order_ids,
        )
    }

    pub fn results_json(&self) -> serde_json::Value {
        json!({
            "Drone_parameters": {
                "id": self.id,
                "capacity": self.max_capacity,
                "autonomy": self.max_autonomy,
                "velocity": self.velocity,
            },
            "Metrics": {
                "Total Trips": self.total_trips,
                "Total Distance": Self::round2(self.total_distance),
                "Min Distance": Self::round2(self.min_distance()),
                "Max Distance": Self::round2(self.max_distance_on_trip),
                "Avg Distance": Self::round2(self.avg_distance_on_trip),
                "Orders Delivered": self.orders_delivered,
                "Occupiance Rate": Self::round2(self.occupancy_rate()),
                "Energy Consumption": format!("{}%", Self::round2(self.energy_consumption() * 100.0)),
            },
            "Path": self.path,
        })
    }

    pub fn store_results(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)?;
        let file = std::fs::File::create(dir.join(format!("{}.json", self.id)))?;
        serde_json::to_writer_pretty(file, &self.results_json())?;
        Ok(())
    }

    /// Snapshot for the visualizer, attached to the drone's position record.
    pub fn viz_extra(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut extra = serde_json::Map::new();
        extra.insert("capacity".to_string(), json!(self.curr_capacity));
        extra.insert("max_capacity".to_string(), json!(self.max_capacity));
        extra.insert("autonomy".to_string(), json!(Self::round2(self.curr_autonomy.max(0.0))));
        extra.insert("orders_delivered".to_string(), json!(self.orders_delivered));
        extra.insert("orders_to_deliver".to_string(), json!(self.orders_to_deliver));
        extra.insert("distance".to_string(), json!(Self::round2(self.total_distance)));
        extra
    }
}

impl std::fmt::Display for DroneParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} - capacity ({}/{}) autonomy ({:.2}/{}) delivering {} with {} completed",
            self.id,
            self.curr_capacity,
            self.max_capacity,
            self.curr_autonomy,
            self.max_autonomy,
            self.orders_to_deliver,
            self.orders_delivered,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trip_accounting() {
        let mut params = DroneParameters::new("drone1", 10, 5000.0, 20.0);
        params.travel(300.0);
        params.travel(200.0);
        assert_eq!(params.curr_autonomy, 4500.0);
        assert_eq!(params.total_distance, 500.0);

        params.recharge("wh1", Position::new(0.0, 0.0));
        assert_eq!(params.curr_autonomy, 5000.0);

        let metrics = params.results_json();
        assert_eq!(metrics["Metrics"]["Total Trips"], 1);
        assert_eq!(metrics["Metrics"]["Total Distance"], 500.0);
        assert_eq!(metrics["Metrics"]["Min Distance"], 500.0);
        assert_eq!(metrics["Metrics"]["Max Distance"], 500.0);
        assert_eq!(metrics["Metrics"]["Avg Distance"], 500.0);
    }

    #[test]
    fn avg_distance_is_the_mean_of_closed_trips() {
        let mut params = DroneParameters::new("drone1", 10, 5000.0, 20.0);
        params.travel(500.0);
        params.recharge("wh1", Position::new(0.0, 0.0));
        params.travel(300.0);
        params.recharge("wh1", Position::new(0.0, 0.0));
        // final leg, never closed by a recharge
        params.travel(200.0);

        let metrics = params.results_json();
        assert_eq!(metrics["Metrics"]["Total Trips"], 2);
        // all motion, including the open leg
        assert_eq!(metrics["Metrics"]["Total Distance"], 1000.0);
        // but the average only covers the two closed trips
        assert_eq!(metrics["Metrics"]["Avg Distance"], 400.0);
        assert_eq!(metrics["Metrics"]["Min Distance"], 300.0);
        assert_eq!(metrics["Metrics"]["Max Distance"], 500.0);
    }

    #[test]
    fn capacity_tracking() {
        let mut params = DroneParameters::new("drone1", 10, 5000.0, 20.0);
        params.add_order(4);
        params.add_order(3);
        assert_eq!(params.free_capacity(), 3);
        params.drop_order(4, "a", Position::new(0.001, 0.0));
        assert_eq!(params.curr_capacity, 3);
        assert_eq!(params.orders_delivered, 1);
    }

    #[test]
    fn metrics_with_no_trips_are_finite() {
        let params = DroneParameters::new("drone1", 10, 5000.0, 20.0);
        let metrics = params.results_json();
        assert_eq!(metrics["Metrics"]["Min Distance"], 0.0);
        assert_eq!(metrics["Metrics"]["Occupiance Rate"], 0.0);
        // must be representable JSON even before the first trip
        serde_json::to_string(&metrics).unwrap();
    }

    #[test]
    fn out_of_autonomy_detection() {
        let mut params = DroneParameters::new("drone1", 10, 100.0, 20.0);
        params.travel(99.0);
        assert!(!params.is_out_of_autonomy());
        params.travel(2.0);
        assert!(params.is_out_of_autonomy());
    }
}

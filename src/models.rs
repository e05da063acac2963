use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({:.6}, {:.6})", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Free,
    Taken,
    Delivered,
}

/// A parcel to carry from a warehouse to a destination. The serialized form
/// is the wire shape used in propose/accept bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryOrder {
    pub id: String,
    pub origin_lat: f64,
    pub origin_long: f64,
    pub dest_lat: f64,
    pub dest_long: f64,
    /// kg, immutable once created
    pub weight: u32,
    #[serde(skip)]
    pub status: OrderStatus,
}

impl DeliveryOrder {
    pub fn new(id: &str, origin: Position, dest: Position, weight: u32) -> Self {
        Self {
            id: id.to_string(),
            origin_lat: origin.latitude,
            origin_long: origin.longitude,
            dest_lat: dest.latitude,
            dest_long: dest.longitude,
            weight,
            status: OrderStatus::Free,
        }
    }

    pub fn origin(&self) -> Position {
        Position::new(self.origin_lat, self.origin_long)
    }

    pub fn destination(&self) -> Position {
        Position::new(self.dest_lat, self.dest_long)
    }

    /// Free -> Taken -> Delivered, never backwards.
    pub fn advance_status(&mut self) {
        self.status = match self.status {
            OrderStatus::Free => OrderStatus::Taken,
            OrderStatus::Taken | OrderStatus::Delivered => OrderStatus::Delivered,
        };
    }
}

impl std::fmt::Display for DeliveryOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Order {} -> {} [{}kg, {}]",
            self.id,
            self.destination(),
            self.weight,
            self.status
        )
    }
}

/// Static description of a drone, as ingested from `delivery_drones.csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroneSpec {
    pub id: String,
    /// kg
    pub capacity: u32,
    /// meters
    pub autonomy: f64,
    /// m/s
    pub velocity: f64,
    /// id of the warehouse the drone starts at
    pub initial_pos: String,
}

/// Static description of a warehouse and its initial orders, as ingested
/// from one `delivery_center{N}.csv`.
#[derive(Debug, Clone)]
pub struct WarehouseSpec {
    pub id: String,
    pub position: Position,
    pub orders: Vec<DeliveryOrder>,
}

/// One record of the heterogeneous `update_data` batches pushed to the
/// visualizer: a drone, a warehouse, or an order, plus type-specific extras.
#[derive(Debug, Clone, Serialize)]
pub struct VizRecord {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "type")]
    pub kind: VizKind,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VizKind {
    Drone,
    Warehouse,
    Order,
}

impl VizRecord {
    pub fn order(order: &DeliveryOrder) -> Self {
        let mut extra = serde_json::Map::new();
        extra.insert("status".to_string(), json!(order.status.to_string()));
        Self {
            id: order.id.clone(),
            latitude: order.dest_lat,
            longitude: order.dest_long,
            kind: VizKind::Order,
            extra,
        }
    }

    pub fn warehouse(id: &str, position: Position) -> Self {
        Self {
            id: id.to_string(),
            latitude: position.latitude,
            longitude: position.longitude,
            kind: VizKind::Warehouse,
            extra: serde_json::Map::new(),
        }
    }

    pub fn drone(id: &str, position: Position, extra: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            id: id.to_string(),
            latitude: position.latitude,
            longitude: position.longitude,
            kind: VizKind::Drone,
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_wire_shape() {
        let order = DeliveryOrder::new(
            "order1",
            Position::new(41.1579, -8.6291),
            Position::new(41.1496, -8.6109),
            3,
        );
        let value = serde_json::to_value(&order).unwrap();
        assert_eq!(value["id"], "order1");
        assert_eq!(value["origin_lat"], 41.1579);
        assert_eq!(value["dest_long"], -8.6109);
        assert_eq!(value["weight"], 3);
        // status is local state, not part of the wire shape
        assert!(value.get("status").is_none());

        let back: DeliveryOrder = serde_json::from_value(value).unwrap();
        assert_eq!(back.status, OrderStatus::Free);
    }

    #[test]
    fn order_status_is_monotone() {
        let mut order = DeliveryOrder::new("o", Position::new(0.0, 0.0), Position::new(1.0, 1.0), 1);
        assert_eq!(order.status, OrderStatus::Free);
        order.advance_status();
        assert_eq!(order.status, OrderStatus::Taken);
        order.advance_status();
        assert_eq!(order.status, OrderStatus::Delivered);
        order.advance_status();
        assert_eq!(order.status, OrderStatus::Delivered);
    }
}

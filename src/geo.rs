use crate::models::{DeliveryOrder, Position};
use std::collections::BTreeMap;

/// meters
pub const EARTH_RADIUS: f64 = 6_371_000.0;

/// Great-circle distance in meters between two lat/lon points.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS * a.sqrt().asin()
}

pub fn distance(a: Position, b: Position) -> f64 {
    haversine_distance(a.latitude, a.longitude, b.latitude, b.longitude)
}

/// Outcome of one tick of motion.
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub position: Position,
    /// great-circle meters actually covered this tick
    pub covered: f64,
}

/// Advance from `curr` towards `target` by at most `step_distance` meters.
/// Interpolation is linear in lat/lon space; the terminal tick clamps onto
/// `target` exactly, so arrival can be tested with equality.
pub fn step_towards(curr: Position, target: Position, step_distance: f64) -> Step {
    let d = distance(curr, target);
    if d == 0.0 {
        return Step { position: target, covered: 0.0 };
    }
    if step_distance >= d {
        return Step { position: target, covered: d };
    }
    let fraction = step_distance / d;
    let position = Position::new(
        curr.latitude + fraction * (target.latitude - curr.latitude),
        curr.longitude + fraction * (target.longitude - curr.longitude),
    );
    Step { position, covered: distance(curr, position) }
}

/// Order whose destination is closest to the given position.
pub fn closest_order(position: Position, orders: &[DeliveryOrder]) -> Option<&DeliveryOrder> {
    let mut min_dist = f64::INFINITY;
    let mut closest = None;
    for order in orders {
        let dist = distance(position, order.destination());
        if dist < min_dist {
            min_dist = dist;
            closest = Some(order);
        }
    }
    closest
}

/// Warehouse closest to the given position.
pub fn closest_warehouse(position: Position, warehouses: &BTreeMap<String, Position>) -> Option<String> {
    let mut min_dist = f64::INFINITY;
    let mut closest = None;
    for (id, warehouse_position) in warehouses {
        let dist = distance(position, *warehouse_position);
        if dist < min_dist {
            min_dist = dist;
            closest = Some(id.clone());
        }
    }
    closest
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_known_distance() {
        // Mumbai harbour points, ~10.53 km apart
        let d = haversine_distance(19.017584, 72.922585, 18.994237, 72.825553);
        assert!((d - 10_526.4).abs() < 10.0, "got {}", d);
    }

    #[test]
    fn haversine_zero() {
        assert_eq!(haversine_distance(41.15, -8.62, 41.15, -8.62), 0.0);
    }

    #[test]
    fn step_clamps_exactly_onto_target() {
        let curr = Position::new(0.0, 0.0);
        let target = Position::new(0.01, 0.0);
        let d = distance(curr, target);

        let step = step_towards(curr, target, d * 2.0);
        assert_eq!(step.position, target);
        assert!((step.covered - d).abs() < 1e-9);

        // already there
        let step = step_towards(target, target, 100.0);
        assert_eq!(step.position, target);
        assert_eq!(step.covered, 0.0);
    }

    #[test]
    fn step_partial_progress() {
        let curr = Position::new(0.0, 0.0);
        let target = Position::new(0.01, 0.0);
        let d = distance(curr, target);

        let step = step_towards(curr, target, d / 4.0);
        assert_ne!(step.position, target);
        assert!((step.covered - d / 4.0).abs() < 1.0);
        // moving on a meridian, latitude increases towards the target
        assert!(step.position.latitude > 0.0 && step.position.latitude < 0.01);
    }

    #[test]
    fn closest_helpers() {
        let near = DeliveryOrder::new("near", Position::new(0.0, 0.0), Position::new(0.001, 0.0), 1);
        let far = DeliveryOrder::new("far", Position::new(0.0, 0.0), Position::new(0.01, 0.0), 1);
        let orders = vec![far.clone(), near.clone()];
        assert_eq!(closest_order(Position::new(0.0, 0.0), &orders).unwrap().id, "near");
        assert!(closest_order(Position::new(0.0, 0.0), &[]).is_none());

        let mut warehouses = BTreeMap::new();
        warehouses.insert("w1".to_string(), Position::new(0.5, 0.0));
        warehouses.insert("w2".to_string(), Position::new(0.1, 0.0));
        assert_eq!(
            closest_warehouse(Position::new(0.0, 0.0), &warehouses),
            Some("w2".to_string())
        );
    }
}

//! Bundle selection for drones: nearest-neighbour tours over candidate
//! orders and the utility score that ranks them.

use crate::geo;
use crate::models::{DeliveryOrder, Position};
use std::collections::BTreeMap;

/// Proposals are capped at ~3x free capacity by the warehouse, so exhaustive
/// subset enumeration stays small. Larger proposal lists (misconfigured
/// multiplier, huge inventories) fall back to a greedy build-up.
const MAX_ENUM_ORDERS: usize = 16;

/// Nearest-neighbour tour over `orders` starting at `first`. The result has
/// the same length as the input, starts at `first`, and visits every order
/// exactly once; ties are broken by input order.
pub fn generate_path(orders: &[DeliveryOrder], first: &DeliveryOrder) -> Vec<DeliveryOrder> {
    if orders.is_empty() || !orders.iter().any(|o| o.id == first.id) {
        return vec![];
    }
    let mut path = vec![first.clone()];
    let mut current = first.destination();
    while path.len() < orders.len() {
        let mut min_distance = f64::INFINITY;
        let mut next: Option<&DeliveryOrder> = None;
        for order in orders {
            if path.iter().any(|o| o.id == order.id) {
                continue;
            }
            let dist = geo::distance(current, order.destination());
            if dist < min_distance {
                min_distance = dist;
                next = Some(order);
            }
        }
        match next {
            Some(order) => {
                current = order.destination();
                path.push(order.clone());
            }
            None => break,
        }
    }
    path
}

/// Sum of leg distances between consecutive destinations of `path`.
pub fn travel_distance(path: &[DeliveryOrder]) -> f64 {
    path.windows(2)
        .map(|pair| geo::distance(pair[0].destination(), pair[1].destination()))
        .sum()
}

pub fn bundle_weight(orders: &[DeliveryOrder]) -> u32 {
    orders.iter().map(|o| o.weight).sum()
}

/// Fraction of the drone's capacity a load fills, capped at 1.
pub fn capacity_level(total_weight: u32, max_capacity: u32) -> f64 {
    (f64::from(total_weight) / f64::from(max_capacity)).min(1.0)
}

/// Score of a bundle: capacity fill plus remaining-autonomy fraction.
/// Negative infinity marks an empty bundle or an infeasible tour.
pub fn utility(num_orders: usize, travel_distance: f64, autonomy: f64, capacity_level: f64) -> f64 {
    if num_orders == 0 || travel_distance > autonomy {
        return f64::NEG_INFINITY;
    }
    capacity_level + (1.0 - travel_distance / autonomy)
}

/// Utility of delivering `orders` when departing from `anchor`: the tour
/// starts at the order closest to the anchor.
fn bundle_utility(orders: &[DeliveryOrder], anchor: Position, max_capacity: u32, autonomy: f64) -> f64 {
    let Some(closest) = geo::closest_order(anchor, orders) else {
        return f64::NEG_INFINITY;
    };
    let first_leg = geo::distance(anchor, closest.destination());
    let path = generate_path(orders, closest);
    let travel = first_leg + travel_distance(&path);
    let cap_level = capacity_level(bundle_weight(orders), max_capacity);
    utility(orders.len(), travel, autonomy, cap_level)
}

/// Best subset of `proposals` deliverable from `anchor` within
/// `free_capacity` and `autonomy`. Empty when no subset is feasible.
///
/// The comparison uses `>=`, so among equally-scored subsets the last one
/// enumerated wins; callers must not rely on which.
pub fn best_available_orders(
    proposals: &[DeliveryOrder],
    anchor: Position,
    free_capacity: u32,
    autonomy: f64,
) -> Vec<DeliveryOrder> {
    if proposals.is_empty() || free_capacity == 0 {
        return vec![];
    }
    if proposals.len() > MAX_ENUM_ORDERS {
        return greedy_available_orders(proposals, anchor, free_capacity, autonomy);
    }

    let mut best: Vec<DeliveryOrder> = vec![];
    let mut best_utility = f64::NEG_INFINITY;
    for mask in 1u32..(1 << proposals.len()) {
        let subset: Vec<DeliveryOrder> = proposals
            .iter()
            .enumerate()
            .filter(|(i, _)| mask & (1 << i) != 0)
            .map(|(_, o)| o.clone())
            .collect();
        if bundle_weight(&subset) > free_capacity {
            continue;
        }
        let subset_utility = bundle_utility(&subset, anchor, free_capacity, autonomy);
        if subset_utility.is_finite() && subset_utility >= best_utility {
            best_utility = subset_utility;
            best = subset;
        }
    }
    best
}

/// Hill-climbing fallback for oversized proposal lists: grow the bundle one
/// order at a time, always taking the addition that raises utility most.
fn greedy_available_orders(
    proposals: &[DeliveryOrder],
    anchor: Position,
    free_capacity: u32,
    autonomy: f64,
) -> Vec<DeliveryOrder> {
    let mut bundle: Vec<DeliveryOrder> = vec![];
    let mut bundle_utility_score = f64::NEG_INFINITY;
    loop {
        let mut best_candidate: Option<(usize, f64)> = None;
        for (i, order) in proposals.iter().enumerate() {
            if bundle.iter().any(|o| o.id == order.id) {
                continue;
            }
            if bundle_weight(&bundle) + order.weight > free_capacity {
                continue;
            }
            let mut candidate = bundle.clone();
            candidate.push(order.clone());
            let score = bundle_utility(&candidate, anchor, free_capacity, autonomy);
            if score.is_finite() && score > bundle_utility_score {
                match best_candidate {
                    Some((_, best_score)) if best_score >= score => {}
                    _ => best_candidate = Some((i, score)),
                }
            }
        }
        match best_candidate {
            Some((i, score)) => {
                bundle.push(proposals[i].clone());
                bundle_utility_score = score;
            }
            None => break,
        }
    }
    bundle
}

/// Pick the warehouse whose bundle beats every other candidate, including
/// the implicit candidate of staying on the current route. `None` means no
/// warehouse wins and the drone should just deliver what it carries.
///
/// Candidates are iterated in id order; on utility ties the later id wins
/// (same `>=` rule as the subset search).
pub fn best_orders(
    candidates: &BTreeMap<String, Vec<DeliveryOrder>>,
    warehouse_positions: &BTreeMap<String, Position>,
    position: Position,
    next_orders: &[DeliveryOrder],
    curr_weight: u32,
    max_capacity: u32,
    curr_autonomy: f64,
    max_autonomy: f64,
) -> Option<String> {
    // baseline: keep flying the route we already have
    let mut best_utility = if next_orders.is_empty() {
        f64::NEG_INFINITY
    } else {
        let first_leg = geo::distance(position, next_orders[0].destination());
        let travel = first_leg + travel_distance(next_orders);
        utility(
            next_orders.len(),
            travel,
            curr_autonomy,
            capacity_level(curr_weight, max_capacity),
        )
    };
    let mut winner = None;

    for (warehouse, bundle) in candidates {
        if bundle.is_empty() {
            continue;
        }
        let Some(warehouse_position) = warehouse_positions.get(warehouse) else {
            continue;
        };
        let Some(closest) = geo::closest_order(*warehouse_position, bundle) else {
            continue;
        };
        let path = generate_path(bundle, closest);
        let travel = geo::distance(position, *warehouse_position)
            + geo::distance(*warehouse_position, closest.destination())
            + travel_distance(&path);
        let cap_level = capacity_level(curr_weight + bundle_weight(bundle), max_capacity);
        let candidate_utility = utility(bundle.len(), travel, max_autonomy, cap_level);
        if candidate_utility.is_finite() && candidate_utility >= best_utility {
            best_utility = candidate_utility;
            winner = Some(warehouse.clone());
        }
    }
    winner
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(id: &str, dest_lat: f64, weight: u32) -> DeliveryOrder {
        DeliveryOrder::new(id, Position::new(0.0, 0.0), Position::new(dest_lat, 0.0), weight)
    }

    #[test]
    fn path_visits_every_order_once() {
        let orders = vec![order("a", 0.03, 1), order("b", 0.01, 1), order("c", 0.02, 1)];
        let path = generate_path(&orders, &orders[1]);
        let ids: Vec<&str> = path.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);

        // deterministic: same input, same tour
        assert_eq!(generate_path(&orders, &orders[1]), path);

        // first not in the set
        let stray = order("x", 0.5, 1);
        assert!(generate_path(&orders, &stray).is_empty());
        assert!(generate_path(&[], &stray).is_empty());
    }

    #[test]
    fn path_breaks_ties_by_input_order() {
        // two orders at the same destination: the earlier one is visited first
        let orders = vec![order("a", 0.01, 1), order("b", 0.01, 1), order("c", 0.02, 1)];
        let path = generate_path(&orders, &orders[2]);
        let ids: Vec<&str> = path.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn utility_edge_cases() {
        assert_eq!(utility(0, 0.0, 1000.0, 0.5), f64::NEG_INFINITY);
        assert_eq!(utility(2, 2000.0, 1000.0, 0.5), f64::NEG_INFINITY);
        let u = utility(2, 500.0, 1000.0, 0.5);
        assert!((u - 1.0).abs() < 1e-12);
    }

    #[test]
    fn capacity_level_caps_at_one() {
        assert_eq!(capacity_level(5, 10), 0.5);
        assert_eq!(capacity_level(20, 10), 1.0);
    }

    #[test]
    fn rejects_order_heavier_than_capacity() {
        let proposals = vec![order("heavy", 0.001, 5)];
        let best = best_available_orders(&proposals, Position::new(0.0, 0.0), 1, 10_000.0);
        assert!(best.is_empty());
    }

    #[test]
    fn rejects_order_beyond_autonomy() {
        // ~5.6 km away, 1 km of autonomy
        let proposals = vec![order("far", 0.05, 1)];
        let best = best_available_orders(&proposals, Position::new(0.0, 0.0), 10, 1000.0);
        assert!(best.is_empty());
    }

    #[test]
    fn prefers_fuller_feasible_bundle() {
        let proposals = vec![order("a", 0.001, 2), order("b", 0.002, 2)];
        let best = best_available_orders(&proposals, Position::new(0.0, 0.0), 5, 50_000.0);
        assert_eq!(best.len(), 2);
    }

    #[test]
    fn respects_free_capacity_budget() {
        let proposals = vec![order("a", 0.001, 2), order("b", 0.002, 2), order("c", 0.003, 2)];
        let best = best_available_orders(&proposals, Position::new(0.0, 0.0), 4, 50_000.0);
        assert_eq!(best.len(), 2);
        assert!(bundle_weight(&best) <= 4);
    }

    #[test]
    fn greedy_fallback_kicks_in_for_large_proposals() {
        let proposals: Vec<DeliveryOrder> = (0..20)
            .map(|i| order(&format!("o{}", i), 0.001 * (i + 1) as f64, 1))
            .collect();
        let best = best_available_orders(&proposals, Position::new(0.0, 0.0), 5, 100_000.0);
        assert!(!best.is_empty());
        assert!(bundle_weight(&best) <= 5);
    }

    #[test]
    fn closer_warehouse_wins() {
        // same weight everywhere; warehouse "b" is closer, so its route scores higher
        let mut candidates = BTreeMap::new();
        candidates.insert("a".to_string(), vec![order("oa", 0.027, 1)]);
        candidates.insert("b".to_string(), vec![order("ob", 0.009, 1)]);
        let mut positions = BTreeMap::new();
        positions.insert("a".to_string(), Position::new(0.0, 0.0));
        positions.insert("b".to_string(), Position::new(0.0005, 0.0));

        let winner = best_orders(
            &candidates,
            &positions,
            Position::new(0.0, 0.0),
            &[],
            0,
            2,
            10_000.0,
            10_000.0,
        );
        assert_eq!(winner, Some("b".to_string()));
    }

    #[test]
    fn staying_on_route_beats_detour() {
        // carrying an order right next to us; the only candidate warehouse is far away
        let carried = vec![order("near", 0.0005, 1)];
        let mut candidates = BTreeMap::new();
        candidates.insert("w".to_string(), vec![order("ow", 0.0805, 1)]);
        let mut positions = BTreeMap::new();
        positions.insert("w".to_string(), Position::new(0.08, 0.0));

        let winner = best_orders(
            &candidates,
            &positions,
            Position::new(0.0, 0.0),
            &carried,
            1,
            2,
            8_000.0,
            12_000.0,
        );
        assert_eq!(winner, None);
    }
}

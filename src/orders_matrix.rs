//! Warehouse-side spatial index of undelivered orders, with per-drone
//! reservations rolled back on timeout.

use crate::models::{DeliveryOrder, Position};
use log::*;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

/// degrees added around the bounding box
const CORNER_BUFFER: f64 = 0.01;

#[derive(Debug, Clone, Copy)]
struct Corners {
    min_lat: f64,
    max_lat: f64,
    min_lon: f64,
    max_lon: f64,
}

/// D x D grid spanning the warehouse and every order destination. Cells own
/// their orders; reserving moves an order out of its cell into the owner's
/// reservation list, undoing moves it back. At most one owner can hold any
/// order at a time.
pub struct OrdersMatrix {
    corners: Corners,
    divisions: usize,
    capacity_multiplier: u32,
    cells: Vec<Vec<DeliveryOrder>>,
    reserved: BTreeMap<String, Vec<(DeliveryOrder, usize, usize)>>,
    reserved_at: BTreeMap<String, Instant>,
    timeout: Duration,
}

impl OrdersMatrix {
    pub fn new(
        inventory: &BTreeMap<String, DeliveryOrder>,
        warehouse_position: Position,
        divisions: usize,
        capacity_multiplier: u32,
        timeout: Duration,
    ) -> Self {
        let mut min_lat = warehouse_position.latitude;
        let mut max_lat = warehouse_position.latitude;
        let mut min_lon = warehouse_position.longitude;
        let mut max_lon = warehouse_position.longitude;
        for order in inventory.values() {
            min_lat = min_lat.min(order.dest_lat);
            max_lat = max_lat.max(order.dest_lat);
            min_lon = min_lon.min(order.dest_long);
            max_lon = max_lon.max(order.dest_long);
        }
        let corners = Corners {
            min_lat: min_lat - CORNER_BUFFER,
            max_lat: max_lat + CORNER_BUFFER,
            min_lon: min_lon - CORNER_BUFFER,
            max_lon: max_lon + CORNER_BUFFER,
        };

        let mut matrix = Self {
            corners,
            divisions,
            capacity_multiplier,
            cells: vec![Vec::new(); divisions * divisions],
            reserved: BTreeMap::new(),
            reserved_at: BTreeMap::new(),
            timeout,
        };
        for order in inventory.values() {
            let (i, j) = matrix.cell_index(order.dest_lat, order.dest_long);
            matrix.cell_mut(i, j).push(order.clone());
        }
        matrix
    }

    fn cell(&self, i: usize, j: usize) -> &Vec<DeliveryOrder> {
        &self.cells[i * self.divisions + j]
    }

    fn cell_mut(&mut self, i: usize, j: usize) -> &mut Vec<DeliveryOrder> {
        &mut self.cells[i * self.divisions + j]
    }

    /// Cell covering a point: floor of the normalized distance from the
    /// top-left corner along each axis, clamped into the grid.
    fn cell_index(&self, latitude: f64, longitude: f64) -> (usize, usize) {
        let lat_span = self.corners.max_lat - self.corners.min_lat;
        let lon_span = self.corners.max_lon - self.corners.min_lon;
        let i = (self.corners.max_lat - latitude) * self.divisions as f64 / lat_span;
        let j = (longitude - self.corners.min_lon) * self.divisions as f64 / lon_span;
        let clamp = |x: f64| (x.floor().max(0.0) as usize).min(self.divisions - 1);
        (clamp(i), clamp(j))
    }

    /// Select a bundle of orders near `(latitude, longitude)` worth up to
    /// `capacity * capacity_multiplier` kg and reserve it for `owner`.
    ///
    /// Breadth-first over the 4-neighbourhood starting at the query cell:
    /// whole cells are appended while they fit the inflated budget; the
    /// first cell that does not fit is drained order-by-order and the
    /// traversal stops there. Expired reservations are swept first.
    pub fn select_orders(
        &mut self,
        latitude: f64,
        longitude: f64,
        capacity: u32,
        owner: &str,
    ) -> Vec<DeliveryOrder> {
        self.sweep_expired();

        let budget = capacity * self.capacity_multiplier;
        let start = self.cell_index(latitude, longitude);
        let mut total_weight: u32 = 0;
        let mut picked: Vec<(usize, usize, String)> = Vec::new();

        let mut queue = VecDeque::from([start]);
        let mut visited = HashSet::from([start]);
        while let Some((i, j)) = queue.pop_front() {
            let cell_weight: u32 = self.cell(i, j).iter().map(|o| o.weight).sum();
            if total_weight + cell_weight > budget {
                for order in self.cell(i, j) {
                    if total_weight + order.weight < budget {
                        total_weight += order.weight;
                        picked.push((i, j, order.id.clone()));
                    }
                }
                break;
            }
            total_weight += cell_weight;
            for order in self.cell(i, j) {
                picked.push((i, j, order.id.clone()));
            }

            for (di, dj) in [(0i64, 1i64), (1, 0), (0, -1), (-1, 0)] {
                let (ni, nj) = (i as i64 + di, j as i64 + dj);
                if ni < 0 || nj < 0 || ni >= self.divisions as i64 || nj >= self.divisions as i64 {
                    continue;
                }
                let neighbour = (ni as usize, nj as usize);
                if visited.insert(neighbour) {
                    queue.push_back(neighbour);
                }
            }
        }

        let mut selected = Vec::with_capacity(picked.len());
        for (i, j, order_id) in picked {
            let cell = &mut self.cells[i * self.divisions + j];
            if let Some(idx) = cell.iter().position(|o| o.id == order_id) {
                let order = cell.remove(idx);
                selected.push(order.clone());
                self.reserved.entry(owner.to_string()).or_default().push((order, i, j));
            }
        }
        if !selected.is_empty() {
            self.reserved_at.insert(owner.to_string(), Instant::now());
        }
        selected
    }

    /// Drop `order_id` from `owner`'s reservation for good; the drone has
    /// committed to delivering it, so it never returns to a cell.
    pub fn remove_order(&mut self, order_id: &str, owner: &str) {
        if let Some(reserved) = self.reserved.get_mut(owner) {
            if let Some(idx) = reserved.iter().position(|(o, _, _)| o.id == order_id) {
                reserved.remove(idx);
                return;
            }
        }
        warn!("remove_order: {} holds no reservation for {}", owner, order_id);
    }

    /// Put everything `owner` still has reserved back into the cells it came
    /// from. Called on drone refusal, on timeout, and after a commit to
    /// release the orders the drone did not keep.
    pub fn undo_reservations(&mut self, owner: &str) {
        let Some(reserved) = self.reserved.remove(owner) else {
            return;
        };
        self.reserved_at.remove(owner);
        for (order, i, j) in reserved {
            self.cell_mut(i, j).push(order);
        }
    }

    fn sweep_expired(&mut self) {
        let expired: Vec<String> = self
            .reserved_at
            .iter()
            .filter(|(_, at)| at.elapsed() > self.timeout)
            .map(|(owner, _)| owner.clone())
            .collect();
        for owner in expired {
            debug!("reservation for {} timed out, rolling back", owner);
            self.undo_reservations(&owner);
        }
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.values().map(|r| r.len()).sum()
    }

    /// Orders still sitting in cells (not reserved by anyone).
    pub fn free_count(&self) -> usize {
        self.cells.iter().map(|c| c.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn world(orders: &[(&str, f64, f64, u32)]) -> (BTreeMap<String, DeliveryOrder>, Position) {
        let warehouse = Position::new(0.0, 0.0);
        let inventory = orders
            .iter()
            .map(|(id, lat, lon, weight)| {
                let order = DeliveryOrder::new(id, warehouse, Position::new(*lat, *lon), *weight);
                (id.to_string(), order)
            })
            .collect();
        (inventory, warehouse)
    }

    fn matrix(inventory: &BTreeMap<String, DeliveryOrder>, warehouse: Position) -> OrdersMatrix {
        OrdersMatrix::new(inventory, warehouse, 5, 3, Duration::from_secs(5))
    }

    #[test]
    fn places_every_order_in_a_cell() {
        let (inventory, warehouse) = world(&[
            ("a", 0.005, 0.005, 1),
            ("b", -0.005, -0.005, 1),
            ("c", 0.009, -0.009, 1),
        ]);
        let m = matrix(&inventory, warehouse);
        assert_eq!(m.free_count(), 3);
        assert_eq!(m.reserved_count(), 0);
    }

    #[test]
    fn empty_inventory_degenerates_to_warehouse_box() {
        let (inventory, warehouse) = world(&[]);
        let mut m = matrix(&inventory, warehouse);
        assert_eq!(m.free_count(), 0);
        assert!(m.select_orders(0.0, 0.0, 10, "drone1").is_empty());
    }

    #[test]
    fn select_honours_inflated_budget() {
        let (inventory, warehouse) = world(&[
            ("a", 0.001, 0.0, 2),
            ("b", 0.002, 0.0, 2),
            ("c", 0.003, 0.0, 2),
            ("d", 0.004, 0.0, 2),
        ]);
        let mut m = matrix(&inventory, warehouse);
        // budget = 2 * 3 = 6 kg: not all 8 kg fit
        let selected = m.select_orders(0.0, 0.0, 2, "drone1");
        let weight: u32 = selected.iter().map(|o| o.weight).sum();
        assert!(weight < 6, "selected {} kg", weight);
        assert!(!selected.is_empty());
        assert_eq!(m.free_count() + m.reserved_count(), 4);
    }

    #[test]
    fn reservations_are_exclusive() {
        let (inventory, warehouse) = world(&[("a", 0.001, 0.0, 1), ("b", 0.002, 0.0, 1)]);
        let mut m = matrix(&inventory, warehouse);

        let first = m.select_orders(0.0, 0.0, 5, "drone1");
        assert_eq!(first.len(), 2);
        assert_eq!(m.free_count(), 0);

        // second owner sees nothing while the reservation is live
        let second = m.select_orders(0.0, 0.0, 5, "drone2");
        assert!(second.is_empty());
    }

    #[test]
    fn undo_then_select_restores_the_pool() {
        let (inventory, warehouse) = world(&[("a", 0.001, 0.0, 1), ("b", 0.002, 0.0, 1)]);
        let mut m = matrix(&inventory, warehouse);

        let first = m.select_orders(0.0, 0.0, 5, "drone1");
        m.undo_reservations("drone1");
        assert_eq!(m.free_count(), 2);

        let again = m.select_orders(0.0, 0.0, 5, "drone1");
        let mut first_ids: Vec<String> = first.iter().map(|o| o.id.clone()).collect();
        let mut again_ids: Vec<String> = again.iter().map(|o| o.id.clone()).collect();
        first_ids.sort();
        again_ids.sort();
        assert_eq!(first_ids, again_ids);
    }

    #[test]
    fn remove_order_is_permanent() {
        let (inventory, warehouse) = world(&[("a", 0.001, 0.0, 1), ("b", 0.002, 0.0, 1)]);
        let mut m = matrix(&inventory, warehouse);

        m.select_orders(0.0, 0.0, 5, "drone1");
        m.remove_order("a", "drone1");
        // the drone kept "a"; undoing returns only "b"
        m.undo_reservations("drone1");
        assert_eq!(m.free_count(), 1);
        let left = m.select_orders(0.0, 0.0, 5, "drone2");
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, "b");
    }

    #[test]
    fn timeout_rolls_back_reservations() {
        let (inventory, warehouse) = world(&[
            ("a", 0.001, 0.0, 1),
            ("b", 0.002, 0.0, 1),
            ("c", 0.003, 0.0, 1),
        ]);
        let mut m = OrdersMatrix::new(&inventory, warehouse, 5, 3, Duration::from_millis(50));

        let first = m.select_orders(0.0, 0.0, 5, "drone1");
        assert_eq!(first.len(), 3);
        assert!(m.select_orders(0.0, 0.0, 5, "drone2").is_empty());

        std::thread::sleep(Duration::from_millis(60));

        // drone1 went silent: its reservation lapses on the next select
        let second = m.select_orders(0.0, 0.0, 5, "drone2");
        assert_eq!(second.len(), 3);
        assert_eq!(m.reserved_count(), 3);
        assert!(m.reserved.contains_key("drone2"));
        assert!(!m.reserved.contains_key("drone1"));
    }
}

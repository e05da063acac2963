//! Drone agent: a five-state FSM negotiating order bundles with warehouses
//! and tick-stepping across the map to collect and deliver them.

pub mod params;

use crate::config::SimParams;
use crate::geo;
use crate::mail::{self, Behaviour, Body, Directory, Envelope, Mailbox, Performative};
use crate::models::{DeliveryOrder, DroneSpec, OrderStatus, Position, VizRecord};
use crate::planner;
use crate::viz::VizSender;
use log::*;
use params::DroneParameters;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum State {
    Available,
    Suggest,
    Pickup,
    Deliver,
    Dead,
}

/// What the drone's task resolves to once the FSM reaches Dead.
#[derive(Debug, Clone)]
pub struct DroneReport {
    pub id: String,
    pub died_successfully: bool,
    pub orders_delivered: u32,
    /// orders confirmed but never dropped (the drone died carrying them)
    pub undelivered: usize,
    /// physical meters covered over the whole run
    pub total_distance: f64,
}

pub struct DroneAgent {
    params: DroneParameters,
    position: Position,
    warehouse_positions: BTreeMap<String, Position>,
    directory: Arc<Directory>,
    mailbox: Mailbox,
    sim: SimParams,

    /// remaining delivery route, nearest-neighbour ordered; the head is the
    /// next destination
    next_orders: Vec<DeliveryOrder>,
    orders_to_be_picked: BTreeMap<String, Vec<DeliveryOrder>>,
    next_warehouse: Option<String>,
    required_warehouse: Option<String>,
    max_deliverable_order: Option<String>,
    total_orders: Vec<String>,
    responses: Vec<Envelope>,
    died_successfully: bool,

    viz: VizSender,
    orders_to_visualize: Vec<VizRecord>,
    metrics_dir: Option<PathBuf>,
}

impl DroneAgent {
    pub fn new(
        spec: &DroneSpec,
        start: Position,
        warehouse_positions: BTreeMap<String, Position>,
        directory: Arc<Directory>,
        mailbox: Mailbox,
        sim: SimParams,
        viz: VizSender,
        metrics_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            params: DroneParameters::new(&spec.id, spec.capacity, spec.autonomy, spec.velocity),
            position: start,
            warehouse_positions,
            directory,
            mailbox,
            sim,
            next_orders: Vec::new(),
            orders_to_be_picked: BTreeMap::new(),
            next_warehouse: None,
            required_warehouse: None,
            max_deliverable_order: None,
            total_orders: Vec::new(),
            responses: Vec::new(),
            died_successfully: false,
            viz,
            orders_to_visualize: Vec::new(),
            metrics_dir,
        }
    }

    pub async fn run(mut self) -> DroneReport {
        let mut state = State::Available;
        info!("{} - FSM starting at {}", self.params.id, state);
        loop {
            debug!("{} - entering {}", self.params.id, state);
            state = match state {
                State::Available => self.available().await,
                State::Suggest => self.suggest(),
                State::Pickup => self.pickup().await,
                State::Deliver => self.deliver().await,
                State::Dead => break,
            };
        }
        self.finish()
    }

    /// Introduce ourselves to every warehouse (or only the required one) and
    /// collect their replies, retrying each on timeout.
    async fn available(&mut self) -> State {
        self.responses.clear();

        if self.warehouse_positions.is_empty() {
            return if self.next_orders.is_empty() {
                self.died_successfully = true;
                State::Dead
            } else {
                State::Deliver
            };
        }

        let targets: Vec<String> = match &self.required_warehouse {
            Some(required) if self.warehouse_positions.contains_key(required) => {
                vec![required.clone()]
            }
            _ => self.warehouse_positions.keys().cloned().collect(),
        };

        for warehouse in targets {
            let body = Body::Introduction {
                id: self.params.id.clone(),
                capacity: self.params.free_capacity(),
                autonomy: self.params.max_autonomy,
                velocity: self.params.velocity,
            };
            let mut response = None;
            for attempt in 1..=self.sim.suggest_tries {
                self.directory.send(
                    &warehouse,
                    Envelope::request(&self.params.id, Behaviour::Suggest, body.clone()),
                );
                match mail::recv_from(&mut self.mailbox, &warehouse, self.sim.response_timeout).await {
                    Some(envelope) => {
                        response = Some(envelope);
                        break;
                    }
                    None => {
                        warn!(
                            "{} - no response from {} (attempt {}/{})",
                            self.params.id, warehouse, attempt, self.sim.suggest_tries
                        );
                    }
                }
            }
            match response {
                Some(envelope) => self.responses.push(envelope),
                None => {
                    error!("{} - {} unreachable, giving up", self.params.id, warehouse);
                    self.died_successfully = false;
                    return State::Dead;
                }
            }
        }
        State::Suggest
    }

    /// Filter each proposal down to its best feasible bundle, pick the
    /// winning warehouse, and tell everyone their fate.
    fn suggest(&mut self) -> State {
        let responses = std::mem::take(&mut self.responses);
        if responses.is_empty() {
            return if self.next_orders.is_empty() {
                error!("{} - no responses from any warehouse", self.params.id);
                self.died_successfully = false;
                State::Dead
            } else {
                warn!("{} - no responses, delivering what we carry", self.params.id);
                State::Deliver
            };
        }

        let mut candidates: BTreeMap<String, Vec<DeliveryOrder>> = BTreeMap::new();
        let mut proposers: Vec<String> = Vec::new();
        for response in responses {
            let sender = response.sender;
            match response.performative {
                Performative::Propose => {
                    // every proposer holds a reservation and gets a verdict,
                    // even when nothing it offered is worth taking
                    proposers.push(sender.clone());
                    let Body::Orders(proposed) = response.body else {
                        warn!("{} - malformed proposal from {}", self.params.id, sender);
                        continue;
                    };
                    let Some(warehouse_position) = self.warehouse_positions.get(&sender) else {
                        continue;
                    };
                    debug!(
                        "{} - {} proposed {} orders, free capacity {}",
                        self.params.id,
                        sender,
                        proposed.len(),
                        self.params.free_capacity()
                    );
                    let bundle = planner::best_available_orders(
                        &proposed,
                        *warehouse_position,
                        self.params.free_capacity(),
                        self.params.max_autonomy,
                    );
                    if !bundle.is_empty() {
                        candidates.insert(sender, bundle);
                    }
                }
                Performative::Refuse => {
                    debug!("{} - {} refused, dropping it", self.params.id, sender);
                    self.remove_warehouse(&sender);
                }
                other => {
                    warn!("{} - unexpected {} from {}", self.params.id, other, sender);
                }
            }
        }

        if candidates.is_empty() {
            self.reject_proposals(proposers.iter());
            return if self.next_orders.is_empty() {
                info!("{} - no available orders anywhere, finishing", self.params.id);
                self.died_successfully = true;
                State::Dead
            } else {
                debug!("{} - no new orders, delivering the rest", self.params.id);
                State::Deliver
            };
        }

        let winner = match self.required_warehouse.take() {
            Some(required) if candidates.contains_key(&required) => Some(required),
            _ => planner::best_orders(
                &candidates,
                &self.warehouse_positions,
                self.position,
                &self.next_orders,
                self.params.curr_capacity,
                self.params.max_capacity,
                self.params.curr_autonomy,
                self.params.max_autonomy,
            ),
        };

        match winner {
            Some(winner) => {
                let bundle = candidates.remove(&winner).unwrap_or_default();
                info!(
                    "{} - accepting {} orders from {}",
                    self.params.id,
                    bundle.len(),
                    winner
                );
                self.directory.send(
                    &winner,
                    Envelope {
                        sender: self.params.id.clone(),
                        performative: Performative::AcceptProposal,
                        next_behaviour: Some(Behaviour::Decide),
                        body: Body::Orders(bundle.clone()),
                    },
                );
                self.reject_proposals(proposers.iter().filter(|p| **p != winner));
                self.next_warehouse = Some(winner.clone());
                self.orders_to_be_picked.insert(winner, bundle);
                State::Pickup
            }
            None => {
                debug!("{} - current route beats every proposal", self.params.id);
                self.reject_proposals(proposers.iter());
                State::Deliver
            }
        }
    }

    fn reject_proposals<'a>(&self, losers: impl Iterator<Item = &'a String>) {
        for loser in losers {
            self.directory.send(
                loser,
                Envelope {
                    sender: self.params.id.clone(),
                    performative: Performative::RejectProposal,
                    next_behaviour: Some(Behaviour::Decide),
                    body: Body::Empty,
                },
            );
        }
    }

    /// Fly to the winning warehouse, recharge, and collect the accepted
    /// orders.
    async fn pickup(&mut self) -> State {
        let Some(warehouse) = self.next_warehouse.take() else {
            return State::Available;
        };
        let Some(target) = self.warehouse_positions.get(&warehouse).copied() else {
            error!("{} - {} vanished before pickup", self.params.id, warehouse);
            self.died_successfully = false;
            return State::Dead;
        };

        if let Some(dead) = self.fly_to(target).await {
            return dead;
        }
        self.params.recharge(&warehouse, target);

        let Some(orders) = self.orders_to_be_picked.remove(&warehouse) else {
            if self.next_orders.is_empty() {
                return State::Available;
            }
            self.rebuild_route(target);
            self.tasks_in_range();
            return State::Deliver;
        };

        let ids: Vec<String> = orders.iter().map(|o| o.id.clone()).collect();
        self.directory.send(
            &warehouse,
            Envelope::request(&self.params.id, Behaviour::Pickup, Body::OrderIds(ids.clone())),
        );
        match mail::recv_from(&mut self.mailbox, &warehouse, self.sim.response_timeout).await {
            Some(envelope) if envelope.performative == Performative::Confirm => {
                info!(
                    "{} - picked up {} orders at {}: {:?}",
                    self.params.id,
                    orders.len(),
                    warehouse,
                    ids
                );
                for mut order in orders {
                    order.status = OrderStatus::Taken;
                    self.params.add_order(order.weight);
                    self.total_orders.push(order.id.clone());
                    self.orders_to_visualize.push(VizRecord::order(&order));
                    self.next_orders.push(order);
                }
                self.rebuild_route(target);
                self.tasks_in_range();
                State::Deliver
            }
            _ => {
                error!("{} - orders not confirmed by {} - {:?}", self.params.id, warehouse, ids);
                self.died_successfully = false;
                State::Dead
            }
        }
    }

    /// Fly to the head of the route and drop the order there.
    async fn deliver(&mut self) -> State {
        if self.next_orders.is_empty() {
            debug!("{} - no orders to deliver", self.params.id);
            return State::Available;
        }

        let target = self.next_orders[0].destination();
        if let Some(dead) = self.fly_to(target).await {
            return dead;
        }

        let mut order = self.next_orders.remove(0);
        order.advance_status();
        self.params.drop_order(order.weight, &order.id, order.destination());
        info!("{} - delivered {}", self.params.id, order.id);
        self.orders_to_visualize.push(VizRecord::order(&order));

        if self.max_deliverable_order.as_deref() == Some(order.id.as_str()) {
            // that was the furthest reachable order; refuel before the rest
            self.required_warehouse = geo::closest_warehouse(self.position, &self.warehouse_positions);
            self.max_deliverable_order = None;
        }
        if self.warehouse_positions.is_empty() {
            debug!("{} - no warehouses left, continuing deliveries", self.params.id);
        }
        State::Available
    }

    /// Tick-step towards `target`. Returns the Dead state when autonomy runs
    /// out mid-flight; the tick in which it goes negative still completes.
    async fn fly_to(&mut self, target: Position) -> Option<State> {
        loop {
            if self.params.is_out_of_autonomy() {
                error!("{} - out of battery", self.params.id);
                self.died_successfully = false;
                return Some(State::Dead);
            }
            if self.position == target {
                return None;
            }
            let step = geo::step_towards(
                self.position,
                target,
                self.sim.step_distance(self.params.velocity),
            );
            self.position = step.position;
            self.params.travel(step.covered);
            self.emit_tick();
            tokio::time::sleep(self.sim.tick_rate).await;
        }
    }

    /// Reorder the route as a nearest-neighbour tour anchored at `from`.
    fn rebuild_route(&mut self, from: Position) {
        if self.next_orders.is_empty() {
            return;
        }
        if let Some(closest) = geo::closest_order(from, &self.next_orders).cloned() {
            self.next_orders = planner::generate_path(&self.next_orders, &closest);
        }
    }

    /// Walk the route accumulating distance; the last order from which the
    /// closest warehouse is still reachable becomes max_deliverable_order.
    /// Cleared when that is the final order: no forced refuel stop then.
    fn tasks_in_range(&mut self) {
        self.max_deliverable_order = None;
        let mut travelled = 0.0;
        let mut prev = self.position;
        let mut deepest = None;
        for (idx, order) in self.next_orders.iter().enumerate() {
            travelled += geo::distance(prev, order.destination());
            prev = order.destination();
            let Some(back_id) = geo::closest_warehouse(order.destination(), &self.warehouse_positions)
            else {
                continue;
            };
            let back = geo::distance(order.destination(), self.warehouse_positions[&back_id]);
            if travelled + back <= self.params.curr_autonomy {
                deepest = Some(idx);
            }
        }
        if let Some(idx) = deepest {
            if idx + 1 < self.next_orders.len() {
                self.max_deliverable_order = Some(self.next_orders[idx].id.clone());
            }
        }
    }

    fn remove_warehouse(&mut self, warehouse: &str) {
        self.warehouse_positions.remove(warehouse);
        if self.required_warehouse.as_deref() == Some(warehouse) {
            self.required_warehouse = None;
        }
    }

    fn emit_tick(&mut self) {
        let mut batch = std::mem::take(&mut self.orders_to_visualize);
        batch.push(VizRecord::drone(&self.params.id, self.position, self.params.viz_extra()));
        self.viz.emit(batch);
    }

    fn finish(mut self) -> DroneReport {
        if self.died_successfully {
            info!("{} - mission completed", self.params.id);
        } else {
            error!("{} - something went wrong", self.params.id);
        }
        info!("{}", self.params.metrics_line(&self.total_orders));
        if let Some(dir) = &self.metrics_dir {
            if let Err(e) = self.params.store_results(dir) {
                warn!("{} - could not store metrics: {}", self.params.id, e);
            }
        }
        self.emit_tick();
        DroneReport {
            id: self.params.id.clone(),
            died_successfully: self.died_successfully,
            orders_delivered: self.params.orders_delivered,
            undelivered: self.next_orders.len(),
            total_distance: self.params.total_distance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn agent(autonomy: f64, warehouses: &[(&str, f64)]) -> DroneAgent {
        let spec = DroneSpec {
            id: "drone1".to_string(),
            capacity: 10,
            autonomy,
            velocity: 20.0,
            initial_pos: "wh1".to_string(),
        };
        let positions: BTreeMap<String, Position> = warehouses
            .iter()
            .map(|(id, lat)| (id.to_string(), Position::new(*lat, 0.0)))
            .collect();
        let directory = Arc::new(Directory::new());
        let mailbox = directory.register("drone1");
        let sim = SimParams {
            tick_rate: Duration::from_millis(1),
            time_multiplier: 2000.0,
            ..SimParams::default()
        };
        DroneAgent::new(
            &spec,
            Position::new(0.0, 0.0),
            positions,
            directory,
            mailbox,
            sim,
            VizSender::disabled(),
            None,
        )
    }

    fn route_order(id: &str, dest_lat: f64, weight: u32) -> DeliveryOrder {
        DeliveryOrder::new(id, Position::new(0.0, 0.0), Position::new(dest_lat, 0.0), weight)
    }

    #[test]
    fn tasks_in_range_marks_the_furthest_returnable_order() {
        // ~1112 m per 0.01 degrees of latitude
        let mut drone = agent(2300.0, &[("wh1", 0.0)]);
        drone.next_orders = vec![route_order("a", 0.009, 1), route_order("b", 0.0172, 1)];
        drone.tasks_in_range();
        // "a": 1001m out + 1001m back fits 2300m; "b": 1913m out + 1913m back does not
        assert_eq!(drone.max_deliverable_order, Some("a".to_string()));
    }

    #[test]
    fn tasks_in_range_clears_when_whole_route_fits() {
        let mut drone = agent(10_000.0, &[("wh1", 0.0)]);
        drone.next_orders = vec![route_order("a", 0.009, 1), route_order("b", 0.0172, 1)];
        drone.tasks_in_range();
        assert_eq!(drone.max_deliverable_order, None);
    }

    #[test]
    fn tasks_in_range_without_warehouses() {
        let mut drone = agent(10_000.0, &[]);
        drone.next_orders = vec![route_order("a", 0.009, 1)];
        drone.tasks_in_range();
        assert_eq!(drone.max_deliverable_order, None);
    }

    #[tokio::test]
    async fn flying_past_the_charge_is_fatal() {
        let mut drone = agent(500.0, &[("wh1", 0.0)]);
        // target ~2224 m away, autonomy 500 m
        let dead = drone.fly_to(Position::new(0.02, 0.0)).await;
        assert!(matches!(dead, Some(State::Dead)));
        assert!(!drone.died_successfully);
        assert!(drone.params.is_out_of_autonomy());
    }

    #[tokio::test]
    async fn flying_within_the_charge_arrives_exactly() {
        let mut drone = agent(5000.0, &[("wh1", 0.0)]);
        let target = Position::new(0.02, 0.0);
        let dead = drone.fly_to(target).await;
        assert!(dead.is_none());
        assert_eq!(drone.position, target);
        assert!(drone.params.curr_autonomy > 0.0);
    }
}

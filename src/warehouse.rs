//! Warehouse agent: an Idle receive loop dispatching suggest / decide /
//! pickup requests from drones against the spatial order index.

use crate::config::SimParams;
use crate::mail::{self, Behaviour, Body, Directory, Envelope, Mailbox, Performative};
use crate::models::{DeliveryOrder, OrderStatus, Position, VizRecord, WarehouseSpec};
use crate::orders_matrix::OrdersMatrix;
use crate::viz::VizSender;
use log::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Final snapshot returned when the agent is stopped, used by the lifecycle
/// controller for the run summary and by tests for conservation checks.
#[derive(Debug, Clone)]
pub struct WarehouseReport {
    pub id: String,
    /// orders still Free in the inventory
    pub undelivered: usize,
    /// orders accepted by a drone but never collected
    pub pending_pickup: usize,
    /// orders still reserved in the matrix
    pub reserved: usize,
}

pub struct WarehouseAgent {
    id: String,
    position: Position,
    inventory: BTreeMap<String, DeliveryOrder>,
    orders_to_be_picked: BTreeMap<String, Vec<DeliveryOrder>>,
    matrix: OrdersMatrix,
    directory: Arc<Directory>,
    mailbox: Mailbox,
    sim: SimParams,
    viz: VizSender,
    quiescent_logged: bool,
}

impl WarehouseAgent {
    pub fn new(
        spec: &WarehouseSpec,
        directory: Arc<Directory>,
        mailbox: Mailbox,
        sim: SimParams,
        viz: VizSender,
    ) -> Self {
        let inventory: BTreeMap<String, DeliveryOrder> = spec
            .orders
            .iter()
            .map(|order| (order.id.clone(), order.clone()))
            .collect();
        let matrix = OrdersMatrix::new(
            &inventory,
            spec.position,
            sim.matrix_divisions,
            sim.capacity_multiplier,
            sim.reservation_timeout,
        );
        Self {
            id: spec.id.clone(),
            position: spec.position,
            inventory,
            orders_to_be_picked: BTreeMap::new(),
            matrix,
            directory,
            mailbox,
            sim,
            viz,
            quiescent_logged: false,
        }
    }

    /// Run until the lifecycle controller closes our mailbox. `ready` fires
    /// once the matrix is built and the initial viz batch is out, so drones
    /// are only started against responsive warehouses.
    pub async fn run(mut self, ready: oneshot::Sender<()>) -> WarehouseReport {
        info!("{} - warehouse up with {} orders", self.id, self.inventory.len());
        self.emit_setup();
        ready.send(()).ok();

        loop {
            match tokio::time::timeout(self.sim.response_timeout, self.mailbox.recv()).await {
                Err(_) => {
                    debug!("{} - idle, waiting for drones", self.id);
                }
                Ok(None) => break,
                Ok(Some(envelope)) => {
                    self.dispatch(envelope);
                    if self.is_quiescent() && !self.quiescent_logged {
                        info!("{} - no orders to deliver and drones to attend to", self.id);
                        self.quiescent_logged = true;
                    }
                }
            }
        }

        info!(
            "{} - warehouse stopping ({} free, {} pending pickup, {} reserved)",
            self.id,
            self.inventory.len(),
            self.pending_pickup_count(),
            self.matrix.reserved_count()
        );
        WarehouseReport {
            id: self.id,
            undelivered: self.inventory.len(),
            pending_pickup: self
                .orders_to_be_picked
                .values()
                .map(|orders| orders.len())
                .sum(),
            reserved: self.matrix.reserved_count(),
        }
    }

    fn dispatch(&mut self, envelope: Envelope) {
        match envelope.next_behaviour {
            Some(Behaviour::Suggest) => self.handle_suggest(envelope),
            Some(Behaviour::Decide) => self.handle_decide(envelope),
            Some(Behaviour::Pickup) => self.handle_pickup(envelope),
            None => {
                warn!(
                    "{} - message from {} without a next_behaviour hint, ignoring",
                    self.id, envelope.sender
                );
            }
        }
    }

    fn handle_suggest(&mut self, envelope: Envelope) {
        let sender = envelope.sender;
        let Body::Introduction { capacity, .. } = envelope.body else {
            warn!("{} - malformed suggest request from {}, ignoring", self.id, sender);
            return;
        };

        if self.is_quiescent() {
            debug!("{} - nothing left, refusing {}", self.id, sender);
            self.directory
                .send(&sender, Envelope::reply(&self.id, Performative::Refuse, Body::Empty));
            return;
        }

        let orders = self.matrix.select_orders(
            self.position.latitude,
            self.position.longitude,
            capacity,
            &sender,
        );
        debug!("{} - proposing {} orders to {}", self.id, orders.len(), sender);
        self.directory
            .send(&sender, Envelope::reply(&self.id, Performative::Propose, Body::Orders(orders)));
    }

    fn handle_decide(&mut self, envelope: Envelope) {
        let sender = envelope.sender;
        match envelope.performative {
            Performative::AcceptProposal => {
                let Body::Orders(accepted) = envelope.body else {
                    warn!("{} - malformed accept-proposal from {}, ignoring", self.id, sender);
                    return;
                };
                debug!("{} - {} accepted {} orders", self.id, sender, accepted.len());
                for order in &accepted {
                    self.matrix.remove_order(&order.id, &sender);
                    match self.inventory.remove(&order.id) {
                        Some(mut taken) => {
                            taken.status = OrderStatus::Taken;
                            self.orders_to_be_picked
                                .entry(sender.clone())
                                .or_default()
                                .push(taken);
                        }
                        None => {
                            warn!(
                                "{} - {} accepted unknown order {}, ignoring",
                                self.id, sender, order.id
                            );
                        }
                    }
                }
                // release whatever the drone did not keep
                self.matrix.undo_reservations(&sender);
                debug!(
                    "{} - orders remaining in inventory: {}",
                    self.id,
                    self.inventory.len()
                );
            }
            Performative::RejectProposal => {
                debug!("{} - {} rejected the proposal", self.id, sender);
                self.matrix.undo_reservations(&sender);
            }
            other => {
                warn!("{} - unexpected {} with decide hint from {}", self.id, other, sender);
            }
        }
    }

    fn handle_pickup(&mut self, envelope: Envelope) {
        let sender = envelope.sender;
        let Body::OrderIds(ids) = envelope.body else {
            warn!("{} - malformed pickup from {}, ignoring", self.id, sender);
            return;
        };
        match self.orders_to_be_picked.remove(&sender) {
            Some(orders) => {
                info!("{} - {} orders picked up by {}: {:?}", self.id, orders.len(), sender, ids);
                self.directory
                    .send(&sender, Envelope::reply(&self.id, Performative::Confirm, Body::Empty));
            }
            None => {
                // drone never negotiated with us; no reply, it will time out
                warn!("{} - pickup from {} with nothing set aside", self.id, sender);
            }
        }
    }

    fn pending_pickup_count(&self) -> usize {
        self.orders_to_be_picked.values().map(|orders| orders.len()).sum()
    }

    fn is_quiescent(&self) -> bool {
        self.inventory.is_empty()
            && self.orders_to_be_picked.is_empty()
            && self.matrix.reserved_count() == 0
    }

    fn emit_setup(&self) {
        let mut batch: Vec<VizRecord> =
            self.inventory.values().map(VizRecord::order).collect();
        batch.push(VizRecord::warehouse(&self.id, self.position));
        self.viz.emit(batch);
    }
}

//! Typed message envelopes and the directory of agent mailboxes.
//!
//! Every agent owns the receiving half of an unbounded mpsc channel; the
//! sending halves live in a shared directory keyed by agent id. A single
//! mailbox per agent gives FIFO delivery per (sender, recipient) pair and
//! makes outbound sends non-blocking.

use crate::models::DeliveryOrder;
use dashmap::DashMap;
use log::*;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

pub type AgentId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Performative {
    Request,
    Propose,
    Refuse,
    AcceptProposal,
    RejectProposal,
    Confirm,
}

/// Routing hint on requests: which warehouse handler runs the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Behaviour {
    Suggest,
    Decide,
    Pickup,
}

/// Typed body, one variant per performative family. Serializes to the JSON
/// shapes the protocol defines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Body {
    /// request + suggest: the drone introduces itself with its free capacity
    Introduction {
        id: String,
        capacity: u32,
        autonomy: f64,
        velocity: f64,
    },
    /// propose / accept-proposal: full order descriptors, by value
    Orders(Vec<DeliveryOrder>),
    /// pickup: ids of the orders being collected
    OrderIds(Vec<String>),
    /// refuse / reject-proposal / confirm
    Empty,
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub sender: AgentId,
    pub performative: Performative,
    pub next_behaviour: Option<Behaviour>,
    pub body: Body,
}

impl Envelope {
    pub fn request(sender: &str, behaviour: Behaviour, body: Body) -> Self {
        Self {
            sender: sender.to_string(),
            performative: Performative::Request,
            next_behaviour: Some(behaviour),
            body,
        }
    }

    pub fn reply(sender: &str, performative: Performative, body: Body) -> Self {
        Self {
            sender: sender.to_string(),
            performative,
            next_behaviour: None,
            body,
        }
    }
}

pub type Mailbox = mpsc::UnboundedReceiver<Envelope>;

/// agent id -> mailbox sender. Shared by every agent in the simulation.
#[derive(Default)]
pub struct Directory {
    inner: DashMap<AgentId, mpsc::UnboundedSender<Envelope>>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mailbox for `id` and hand back the receiving half.
    pub fn register(&self, id: &str) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.insert(id.to_string(), tx);
        rx
    }

    /// Closing an agent's mailbox: the task drains what is queued and exits.
    pub fn remove(&self, id: &str) {
        self.inner.remove(id);
    }

    /// Deliver `envelope` to `to`. Returns false (and logs) when the
    /// recipient is unknown or already gone.
    pub fn send(&self, to: &str, envelope: Envelope) -> bool {
        match self.inner.get(to) {
            Some(tx) => match tx.send(envelope) {
                Ok(()) => true,
                Err(_) => {
                    debug!("mailbox of {} is closed", to);
                    false
                }
            },
            None => {
                debug!("no mailbox registered for {}", to);
                false
            }
        }
    }
}

/// Await a reply from `expected` for up to `timeout`. Messages from other
/// senders arriving in the meantime are logged and dropped without
/// extending the deadline.
pub async fn recv_from(
    mailbox: &mut Mailbox,
    expected: &str,
    timeout: std::time::Duration,
) -> Option<Envelope> {
    let deadline = Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, mailbox.recv()).await {
            Ok(Some(envelope)) => {
                if envelope.sender == expected {
                    return Some(envelope);
                }
                warn!(
                    "dropping unexpected {} from {} while waiting for {}",
                    envelope.performative, envelope.sender, expected
                );
            }
            Ok(None) => return None,
            Err(_) => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn delivery_is_fifo_per_pair() {
        let directory = Directory::new();
        let mut mailbox = directory.register("drone1");

        for i in 0..5 {
            let sent = directory.send(
                "drone1",
                Envelope::reply(&format!("wh{}", i % 2), Performative::Propose, Body::Orders(vec![])),
            );
            assert!(sent, "send {} failed", i);
        }
        let mut senders = Vec::new();
        for _ in 0..5 {
            senders.push(mailbox.recv().await.unwrap().sender);
        }
        assert_eq!(senders, vec!["wh0", "wh1", "wh0", "wh1", "wh0"]);
    }

    #[tokio::test]
    async fn send_to_unknown_agent_is_reported() {
        let directory = Directory::new();
        assert!(!directory.send(
            "ghost",
            Envelope::reply("wh1", Performative::Refuse, Body::Empty)
        ));
    }

    #[tokio::test]
    async fn removing_closes_the_mailbox() {
        let directory = Directory::new();
        let mut mailbox = directory.register("wh1");
        directory.send("wh1", Envelope::reply("drone1", Performative::Confirm, Body::Empty));
        directory.remove("wh1");

        // queued message still drains, then the channel reports closed
        assert!(mailbox.recv().await.is_some());
        assert!(mailbox.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_from_skips_other_senders() {
        let directory = Directory::new();
        let mut mailbox = directory.register("drone1");

        directory.send("drone1", Envelope::reply("wh2", Performative::Refuse, Body::Empty));
        directory.send("drone1", Envelope::reply("wh1", Performative::Propose, Body::Orders(vec![])));

        let envelope = recv_from(&mut mailbox, "wh1", Duration::from_millis(200)).await.unwrap();
        assert_eq!(envelope.sender, "wh1");
        assert_eq!(envelope.performative, Performative::Propose);
    }

    #[tokio::test]
    async fn recv_from_times_out() {
        let directory = Directory::new();
        let mut mailbox = directory.register("drone1");
        let got = recv_from(&mut mailbox, "wh1", Duration::from_millis(20)).await;
        assert!(got.is_none());
    }
}

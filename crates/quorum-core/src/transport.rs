//! # transport
//!
//! why: the core emits messages but never touches sockets
//! relations: implemented by quorum-server over udp; Outbox backs tests and simulations
//! what: Transmitter trait, Outbox recording transmitter

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::message::Envelope;

/// Outbound message sink.
///
/// `to` is a network address. Delivering to the node's own address as a local
/// enqueue rather than a network send is the implementation's concern.
pub trait Transmitter {
    fn send(&mut self, to: &str, envelope: Envelope);
}

/// A message waiting in an `Outbox`.
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub to: String,
    pub envelope: Envelope,
}

/// Transmitter that queues messages in memory.
///
/// Clones share one queue, so a test can keep a handle while the node owns
/// another.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    queue: Rc<RefCell<VecDeque<Outgoing>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take every queued message, oldest first.
    pub fn drain(&self) -> Vec<Outgoing> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}

impl Transmitter for Outbox {
    fn send(&mut self, to: &str, envelope: Envelope) {
        self.queue.borrow_mut().push_back(Outgoing {
            to: to.to_string(),
            envelope,
        });
    }
}

//! # transport
//!
//! why: the node emits messages synchronously, but sockets belong to their own threads
//! relations: implements quorum_core::Transmitter; its queues are drained by server.rs
//! what: ChannelTransmitter routing to the outbound queue, or inbound for loopback

use crossbeam::channel::Sender;
use quorum_core::{Envelope, Outgoing, Transmitter};
use tracing::{debug, warn};

/// Hands messages to the sender thread through a channel.
///
/// A message addressed to the node's own address never touches the network;
/// it is queued straight back into the node's inbound stream.
#[derive(Debug, Clone)]
pub struct ChannelTransmitter {
    address: String,
    inbound: Sender<Envelope>,
    outbound: Sender<Outgoing>,
}

impl ChannelTransmitter {
    pub fn new(
        address: impl Into<String>,
        inbound: Sender<Envelope>,
        outbound: Sender<Outgoing>,
    ) -> Self {
        Self {
            address: address.into(),
            inbound,
            outbound,
        }
    }
}

impl Transmitter for ChannelTransmitter {
    fn send(&mut self, to: &str, envelope: Envelope) {
        let kind = envelope.message.kind();
        let delivered = if to == self.address {
            debug!(kind, "send to local");
            self.inbound.send(envelope).is_ok()
        } else {
            debug!(kind, to, "queue for sending");
            self.outbound
                .send(Outgoing {
                    to: to.to_string(),
                    envelope,
                })
                .is_ok()
        };

        // only happens while the server is shutting down
        if !delivered {
            warn!(kind, to, "queue closed, dropping message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use quorum_core::RaftMessage;

    #[test]
    fn own_address_loops_back() {
        let (inbound_tx, inbound_rx) = unbounded();
        let (outbound_tx, outbound_rx) = unbounded();
        let mut transmitter = ChannelTransmitter::new("127.0.0.1:2358", inbound_tx, outbound_tx);

        transmitter.send("127.0.0.1:2358", Envelope::new(1, RaftMessage::Tick));

        assert_eq!(inbound_rx.try_recv().unwrap(), Envelope::new(1, RaftMessage::Tick));
        assert!(outbound_rx.is_empty());
    }

    #[test]
    fn other_addresses_go_out() {
        let (inbound_tx, inbound_rx) = unbounded();
        let (outbound_tx, outbound_rx) = unbounded();
        let mut transmitter = ChannelTransmitter::new("127.0.0.1:2358", inbound_tx, outbound_tx);

        transmitter.send("127.0.0.1:2359", Envelope::new(1, RaftMessage::Tick));

        let outgoing = outbound_rx.try_recv().unwrap();
        assert_eq!(outgoing.to, "127.0.0.1:2359");
        assert!(inbound_rx.is_empty());
    }

    #[test]
    fn closed_queue_drops_quietly() {
        let (inbound_tx, _) = unbounded();
        let (outbound_tx, outbound_rx) = unbounded::<Outgoing>();
        drop(outbound_rx);
        let mut transmitter = ChannelTransmitter::new("127.0.0.1:2358", inbound_tx, outbound_tx);

        transmitter.send("127.0.0.1:2359", Envelope::tick());
    }
}

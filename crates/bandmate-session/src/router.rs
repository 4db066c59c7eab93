//! Message router: resolves destinations and delivers synchronously.

use bandmate_core::{AgentId, Bus, DeliveryError, Destination, Message};

use crate::directory::Directory;

/// Outcome of routing one or more messages.
///
/// Failures are per recipient and never stop delivery to the others.
#[derive(Debug, Default)]
pub struct DeliveryReport {
    /// Handlers that ran to completion.
    pub delivered: usize,
    pub failures: Vec<DeliveryError>,
    /// Queued messages discarded because the settle budget ran out.
    pub dropped: usize,
}

impl DeliveryReport {
    pub fn merge(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.failures.extend(other.failures);
        self.dropped += other.dropped;
    }

    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.dropped == 0
    }
}

/// Borrowed view of a session's directory and bus that performs delivery.
pub struct Router<'a> {
    directory: &'a mut Directory,
    bus: &'a Bus,
    settle_limit: usize,
}

impl<'a> Router<'a> {
    pub const fn new(directory: &'a mut Directory, bus: &'a Bus, settle_limit: usize) -> Self {
        Self {
            directory,
            bus,
            settle_limit,
        }
    }

    /// Deliver one message to its destination. Messages enqueued by the
    /// handlers stay queued until [`Router::settle`].
    pub fn route(&mut self, message: &Message) -> DeliveryReport {
        match message.destination() {
            Destination::Direct(recipient) => {
                let mut report = DeliveryReport::default();
                self.deliver(recipient, message, &mut report);
                report
            }
            Destination::Topic(topic) => self.publish(topic, message),
            Destination::Broadcast => {
                let mut report = DeliveryReport::default();
                let sender = message.sender_id();
                for id in self.directory.ids().iter().filter(|id| *id != sender) {
                    self.deliver(id, message, &mut report);
                }
                report
            }
        }
    }

    /// Deliver to the subscribers of `topic`, in subscription order.
    ///
    /// The subscriber list is captured before the first delivery, so handlers
    /// may subscribe or unsubscribe without affecting this call.
    pub fn publish(&mut self, topic: &str, message: &Message) -> DeliveryReport {
        let subscribers = self.bus.with_topics(|topics| topics.subscribers(topic));
        let mut report = DeliveryReport::default();
        if subscribers.is_empty() {
            tracing::trace!(topic, kind = %message.kind(), "Publish to topic without subscribers");
            return report;
        }
        for id in &subscribers {
            self.deliver(id, message, &mut report);
        }
        report
    }

    /// Drain the bus queue, delivering until no handler enqueues more.
    ///
    /// At most `settle_limit` messages are delivered; the rest are dropped
    /// and counted in [`DeliveryReport::dropped`].
    pub fn settle(&mut self) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut routed = 0usize;
        while let Some(message) = self.bus.dequeue() {
            if routed >= self.settle_limit {
                let dropped = self.bus.discard_pending() + 1;
                tracing::warn!(
                    limit = self.settle_limit,
                    dropped,
                    "Settle budget exhausted, dropping queued messages"
                );
                report.dropped += dropped;
                break;
            }
            report.merge(self.route(&message));
            routed += 1;
        }
        report
    }

    fn deliver(&mut self, recipient: &AgentId, message: &Message, report: &mut DeliveryReport) {
        let Some(agent) = self.directory.get_mut(recipient) else {
            tracing::warn!(
                sender = %message.sender_id(),
                recipient = %recipient,
                kind = %message.kind(),
                "Recipient not found, dropping message"
            );
            report
                .failures
                .push(DeliveryError::RecipientNotFound(recipient.clone()));
            return;
        };

        tracing::trace!(
            sender = %message.sender_id(),
            recipient = %recipient,
            kind = %message.kind(),
            tick = message.timestamp(),
            "Delivering message"
        );
        match agent.on_message(message) {
            Ok(()) => report.delivered += 1,
            Err(source) => {
                tracing::warn!(agent = %recipient, kind = %message.kind(), error = %source, "Message handler failed");
                report.failures.push(DeliveryError::Handler {
                    agent: recipient.clone(),
                    source,
                });
            }
        }
    }
}

//! Per-process routing table.
//!
//! The only cross-thread structure in a process: fibers may run on
//! different threads, so the router hands out unbounded MPSC queues and is
//! shared as `Arc<ProcessRouter>`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;

use super::envelope::{ActorEnvelope, InboundItem};
use super::error::DispatchError;
use fibernet_core::ActorId;

/// Routes envelopes to local fibers or to the inter-process link.
#[derive(Debug)]
pub struct ProcessRouter {
    process: u32,
    fibers: RwLock<HashMap<u32, mpsc::UnboundedSender<InboundItem>>>,
    outbound: RwLock<Option<mpsc::UnboundedSender<ActorEnvelope>>>,
}

impl ProcessRouter {
    /// Create the router of process `process`.
    pub fn new(process: u32) -> Arc<Self> {
        Arc::new(Self {
            process,
            fibers: RwLock::new(HashMap::new()),
            outbound: RwLock::new(None),
        })
    }

    /// Process this router serves.
    pub fn process(&self) -> u32 {
        self.process
    }

    /// Register a fiber and return its inbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::FiberExists`] if the id is taken by a live
    /// fiber.
    pub fn register_fiber(
        &self,
        fiber: u32,
    ) -> Result<mpsc::UnboundedReceiver<InboundItem>, DispatchError> {
        let mut fibers = self.fibers.write().unwrap_or_else(PoisonError::into_inner);
        if fibers.get(&fiber).is_some_and(|tx| !tx.is_closed()) {
            return Err(DispatchError::FiberExists { fiber });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        fibers.insert(fiber, tx);
        tracing::debug!(process = self.process, fiber, "fiber registered");
        Ok(rx)
    }

    /// Remove a fiber. Items queued for it are dropped with the queue.
    pub fn unregister_fiber(&self, fiber: u32) {
        let removed = self
            .fibers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&fiber);
        if removed.is_some() {
            tracing::debug!(process = self.process, fiber, "fiber unregistered");
        }
    }

    /// Whether `fiber` is registered.
    pub fn has_fiber(&self, fiber: u32) -> bool {
        self.fibers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&fiber)
    }

    /// Install the queue that carries envelopes to other processes.
    pub fn set_outbound(&self, outbound: mpsc::UnboundedSender<ActorEnvelope>) {
        *self.outbound.write().unwrap_or_else(PoisonError::into_inner) = Some(outbound);
    }

    /// Remove the inter-process queue.
    pub fn clear_outbound(&self) {
        *self.outbound.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Deliver an envelope to its target fiber.
    ///
    /// # Errors
    ///
    /// [`DispatchError::FiberNotFound`] for an unknown local fiber,
    /// [`DispatchError::NoRoute`] for a remote target without a link.
    pub fn route(&self, envelope: ActorEnvelope) -> Result<(), DispatchError> {
        let target = envelope.target;
        if target.process() != self.process {
            let outbound = self.outbound.read().unwrap_or_else(PoisonError::into_inner);
            return match outbound.as_ref() {
                Some(tx) if tx.send(envelope).is_ok() => Ok(()),
                _ => Err(DispatchError::NoRoute {
                    process: target.process(),
                }),
            };
        }
        self.deliver(target, InboundItem::Envelope(envelope))
    }

    /// Fail a pending call of a local fiber.
    ///
    /// A fault for an unknown fiber is dropped.
    pub fn deliver_fault(&self, target: ActorId, rpc_id: u32, error: i32) {
        let item = InboundItem::Fault {
            target,
            rpc_id,
            error,
        };
        if let Err(e) = self.deliver(target, item) {
            tracing::debug!(actor = %target, rpc_id, error = %e, "fault dropped");
        }
    }

    fn deliver(&self, target: ActorId, item: InboundItem) -> Result<(), DispatchError> {
        let fibers = self.fibers.read().unwrap_or_else(PoisonError::into_inner);
        match fibers.get(&target.fiber()) {
            Some(tx) if tx.send(item).is_ok() => Ok(()),
            _ => Err(DispatchError::FiberNotFound {
                process: self.process,
                fiber: target.fiber(),
            }),
        }
    }
}

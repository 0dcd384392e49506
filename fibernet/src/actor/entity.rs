//! Entities registered on a fiber.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::rc::Rc;

/// How messages to an entity are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MailboxKind {
    /// One handler at a time, in arrival order, through the
    /// [`Mailbox`](crate::lock::CoroutineLockType::Mailbox) lock.
    #[default]
    Ordered,
    /// Handlers start immediately and may interleave at await points.
    ///
    /// Nothing orders two messages to the same entity: a handler that
    /// awaits can observe state changed by a later message. Use only for
    /// entities whose handlers tolerate that.
    UnorderedConcurrent,
}

/// A registered entity, type-erased.
#[derive(Clone)]
pub(crate) struct EntitySlot {
    pub(crate) entity: Rc<dyn Any>,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    pub(crate) mailbox: MailboxKind,
}

impl EntitySlot {
    /// Whether two slots hold the same registration.
    pub(crate) fn same_entity(&self, other: &EntitySlot) -> bool {
        Rc::ptr_eq(&self.entity, &other.entity)
    }
}

/// Entities of one fiber, keyed by instance id.
#[derive(Default)]
pub(crate) struct EntityRegistry {
    slots: HashMap<u64, EntitySlot>,
}

impl EntityRegistry {
    pub(crate) fn insert<E: 'static>(
        &mut self,
        instance_id: u64,
        entity: Rc<E>,
        mailbox: MailboxKind,
    ) {
        self.slots.insert(
            instance_id,
            EntitySlot {
                entity,
                type_id: TypeId::of::<E>(),
                type_name: std::any::type_name::<E>(),
                mailbox,
            },
        );
    }

    pub(crate) fn remove(&mut self, instance_id: u64) -> Option<EntitySlot> {
        self.slots.remove(&instance_id)
    }

    pub(crate) fn slot(&self, instance_id: u64) -> Option<EntitySlot> {
        self.slots.get(&instance_id).cloned()
    }

    pub(crate) fn get<E: 'static>(&self, instance_id: u64) -> Option<Rc<E>> {
        let slot = self.slots.get(&instance_id)?;
        slot.entity.clone().downcast::<E>().ok()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

//! Events raised by a simulation tick

use crate::core::entity::DomainEvent;
use crate::io::PersistenceEvent;
use crate::observer::BubbleEvent;

/// Everything a tick reports to consumers, in the order it was raised
#[derive(Debug, Clone, PartialEq)]
pub enum SimEvent {
    Domain(DomainEvent),
    Bubble(BubbleEvent),
    Persistence(PersistenceEvent),
}

impl From<DomainEvent> for SimEvent {
    fn from(event: DomainEvent) -> Self {
        SimEvent::Domain(event)
    }
}

impl From<BubbleEvent> for SimEvent {
    fn from(event: BubbleEvent) -> Self {
        SimEvent::Bubble(event)
    }
}

impl From<PersistenceEvent> for SimEvent {
    fn from(event: PersistenceEvent) -> Self {
        SimEvent::Persistence(event)
    }
}

pub mod alerts;
pub mod broker;
pub mod event;

pub use alerts::{format_alert, EventCreatedPayload, PipelineFailedPayload};
pub use broker::{create_message_broker, EventCallback, MessageBroker, MessageBrokerTrait};
pub use event::{EventMessage, EventType};

//! Job event fan-out: a broadcast hub, configurable sinks, and subscriber
//! streams for live progress observation.

pub mod bus;
pub mod emitter;
pub mod event;
pub mod hub;
pub mod sink;

pub use bus::EventBus;
pub use emitter::{EmitterError, EventEmitter, NullEmitter};
pub use event::{EventKind, JobEvent};
pub use hub::{EventHub, EventHubMetrics, EventStream, HubEmitter};
pub use sink::{ChannelSink, EventSink, JsonLinesSink, MemorySink, StdOutSink};

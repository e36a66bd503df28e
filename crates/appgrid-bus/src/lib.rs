//! appgrid-bus — subject-addressed publish/subscribe with request/reply.
//!
//! [`MessageBus`] is the seam every other subsystem talks to. Two
//! implementations ship here: [`NatsBus`] over a real broker and
//! [`MemoryBus`], an in-process broker with the same wildcard and queue
//! group semantics used by tests and single-process development.
//!
//! [`Rendezvous`] correlates asynchronous replies with their callers; the
//! gateway's [`ResponseWaiter`] and the manager's startup/close waiters
//! are both instances of it.

pub mod bus;
pub mod error;
pub mod memory;
pub mod message;
pub mod nats;
pub mod waiter;

pub use bus::{BusExt, MessageBus, Subscription};
pub use error::{BusError, BusResult};
pub use memory::MemoryBus;
pub use message::{BusHeaders, BusMessage, ReplyStatus, headers};
pub use nats::NatsBus;
pub use waiter::{Pending, Rendezvous, ResponseWaiter, WaiterError};

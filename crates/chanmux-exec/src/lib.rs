//! Worker and state-machine execution primitives for chanmux.
//!
//! Everything that pulls messages off a queue or a connection in chanmux runs
//! through the same small set of abstractions:
//!
//! - [`MessagePump`] — a named worker thread pulling from a [`MessageSource`]
//!   and pushing into a [`MessageSink`], with pause/resume/stop.
//! - [`SequentialExecutor`] — a single worker draining closures in submission
//!   order, used for strictly-ordered user-visible callbacks.
//! - [`FsmExecutor`] — a synchronous driver for an [`Automaton`], the generic
//!   finite-state-machine shape protocol handlers are expressed in.
//! - [`InactivityTimer`] — a re-armable one-shot timer for idle detection.

pub mod fsm;
pub mod pump;
pub mod sequential;
pub mod timer;

pub use fsm::{Automaton, Feed, FsmExecutor, Step};
pub use pump::{MessagePump, MessageSink, MessageSource, Pull};
pub use sequential::SequentialExecutor;
pub use timer::InactivityTimer;

//! Poll cycle coordination.
//!
//! The pieces fit together like this: [`transport::MqttLink`] owns the
//! broker session and feeds raw frames into a bounded channel;
//! [`driver::PollDriver`] consumes that channel plus a timer and is the
//! single owner of the [`roster::Roster`], the [`scheduler::RetryScheduler`]
//! and the [`aggregator::CycleAggregator`]. Commands flow back out through
//! the link's fire-and-forget publisher.

pub mod aggregator;
pub mod dedup;
pub mod driver;
pub mod roster;
pub mod scheduler;
pub mod transport;

pub use aggregator::{CycleAggregator, PollCycle, SettleOutcome};
pub use dedup::{classify, Novelty};
pub use driver::PollDriver;
pub use roster::{Roster, SensorRuntime};
pub use scheduler::{RetryScheduler, SweepAction};
pub use transport::{LinkState, MqttLink};

//! Domain services: balance writes, ownership, the sync pass and its scheduler.
//!
//! Layout:
//! - `balance_ops.rs`: every balance mutation together with its audit row
//! - `ownership.rs`: which balances an active connection owns
//! - `sync_pass.rs`: one sequential sweep over the active connections
//! - `scheduler_actor.rs`: ractor actor driving passes on a timer and on demand

pub mod audit;
pub mod balance_ops;
pub mod classifier;
pub mod ownership;
pub mod registry;
pub mod scheduler_actor;
pub mod sync_pass;

pub use balance_ops::BalanceOps;
pub use classifier::classify;
pub use ownership::{OwnershipChange, plan_ownership};
pub use registry::ConnectionRegistry;
pub use scheduler_actor::{ListenerId, SchedulerArgs, SchedulerHandle, StatusListener};
pub use sync_pass::{Schedule, SyncEngine};

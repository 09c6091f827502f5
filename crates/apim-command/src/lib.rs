//! Cross-node commands: the shared record, its store contract, and the
//! polling loop that reconciles the store with local listeners.

pub mod cluster;
pub mod config;
pub mod error;
pub mod fanout;
pub mod model;
pub mod refresher;
pub mod store;

pub use cluster::{ClusterOracle, StaticCluster};
pub use config::{ConfigError, RefresherConfig};
pub use error::{CommandError, ListenerError};
pub use fanout::{CommandFanout, CommandListener, FanoutReport};
pub use model::{CastMode, Command, CommandCriteria, CommandTag, MessageRecipient};
pub use refresher::{CommandRefresher, TickReport};
pub use store::{CommandStore, DynCommandStore, MemCommandStore, StoreError, StoreResult};

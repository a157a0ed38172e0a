//! Masternode registry, admission, proof-of-service verification and payment scheduling.

pub mod adapters;
pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod governance;
pub mod interfaces;
pub mod lifecycle;
pub mod manager;
pub mod payments;
pub mod persistence;
pub mod registry;
pub mod sync;
pub mod throttle;
pub mod verification;

pub use adapters::{InMemoryChain, Outbound, QueuedTransport};
pub use admission::AdmissionOutcome;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MasternodeConfig;
pub use error::MasternodeError;
pub use governance::GovernanceDirtyQueue;
pub use interfaces::{ChainView, PeerInfo, PeerTransport};
pub use lifecycle::PassReport;
pub use manager::{LocalMasternode, MasternodeManager};
pub use payments::{PaymentScheduler, ScoredMasternode};
pub use persistence::{load_cache, save_cache, RegistryCache, CACHE_FILE_NAME};
pub use registry::{MasternodeRegistry, RegistrySnapshot};
pub use sync::{SyncDriver, SyncSource};
pub use throttle::RequestThrottle;

//! Replication awareness for a ravelin client.
//!
//! A [`ReplicationInformer`] is built per primary server. It learns the
//! replicas from the primary's `Raven/Replication/Destinations` document,
//! mirrors that document to a local file, and routes operations to the next
//! healthy destination when the primary is down.
//!
//! ```no_run
//! use ravelin::ClientConfig;
//! use ravelin_replication::{HttpMethod, OperationMetadata, ReplicationInformer, ReqwestTransport};
//! use std::sync::Arc;
//!
//! # async fn run() -> ravelin::Result<()> {
//! let config = Arc::new(ClientConfig::from_env()?);
//! let transport = Arc::new(ReqwestTransport::from_config(&config));
//! let informer = Arc::new(ReplicationInformer::new(
//!     OperationMetadata::new("http://primary:8080"),
//!     config,
//!     transport,
//! ));
//! informer.update_replication_information_if_needed();
//!
//! let base = informer.read_striping_base();
//! let served_by = informer
//!     .execute_with_replication(HttpMethod::Get, informer.primary(), 1, base, |op| async move {
//!         Ok(op.url)
//!     })
//!     .await?;
//! println!("served by {}", served_by);
//! informer.close().await;
//! # Ok(())
//! # }
//! ```

pub mod destination;
pub mod failover;
pub mod failure;
pub mod informer;
pub mod local_cache;
pub mod transport;
pub mod types;

pub use destination::{
    ReplicationDestination, ReplicationDocument, TransitiveReplicationOptions,
    REPLICATION_DESTINATIONS_KEY,
};
pub use failover::{FailoverCandidate, FailoverPhase, FailoverState};
pub use failure::{check_repetition_rate, FailureCounter, FailureCounters};
pub use informer::ReplicationInformer;
pub use local_cache::LocalCache;
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::{FailoverStatusChanged, HttpMethod, OperationCredentials, OperationMetadata};

//! # Ravelin
//!
//! The replication-aware connection layer of a document database client.
//! Ravelin keeps track of which servers are alive, decides where a request
//! goes after the primary fails, and remembers the replication topology on
//! disk so a freshly started client can fail over before it has ever reached
//! the primary.
//!
//! This crate holds the pieces without network dependencies: the error type,
//! client configuration, the server hash used to key local files, and the
//! recency caches. Failover itself lives in the companion
//! `ravelin-replication` crate.
//!
//! ## Quick start
//!
//! ```rust
//! use ravelin::cache::ConcurrentLruSet;
//! use std::sync::{Arc, Mutex};
//!
//! let dropped = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&dropped);
//! let nodes = ConcurrentLruSet::new(2, move |node: String| sink.lock().unwrap().push(node));
//!
//! nodes.push("http://a:8080".to_string());
//! nodes.push("http://b:8080".to_string());
//! nodes.push("http://c:8080".to_string());
//!
//! assert_eq!(*dropped.lock().unwrap(), vec!["http://a:8080".to_string()]);
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Dependencies | Use case |
//! |---------|-------------|----------|
//! | `memory-stats` | sysinfo | [`cache::MemoryPressureProbe::system`] checks available memory |

pub mod cache;
pub mod config;
pub mod error;
pub mod hash;
pub mod types;

pub use cache::{CachedRequest, ConcurrentLruSet, MemoryPressureProbe, SimpleCache};
pub use config::{ClientConfig, FailoverBehavior};
pub use error::{RavelinError, Result};
pub use hash::server_hash;
pub use types::ServerIdentity;

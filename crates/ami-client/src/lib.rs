//! # Ringline AMI Client
//!
//! The persistent, authenticated manager session for the ringline stack.
//! This crate owns exactly one TCP connection to the PBX manager endpoint
//! and exposes it two ways:
//!
//! - [`ManagerClient`] (Clone + Send): send actions from any task, with
//!   response correlation keyed by `ActionID` and an explicit timeout
//! - a `broadcast` stream of typed [`AmiEvent`]s from a background reader
//!   task
//!
//! [`ConnectionManager`] supervises the session: on successful login it
//! marks the client live; on any transport error or EOF it marks it
//! not-live and retries on a fixed interval (5 seconds by default, a
//! deliberately simple policy with no backoff). Callers must check
//! [`ManagerClient::is_live`] before assuming they can send.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use ringline_ami_client::{AmiConfig, ConnectionManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AmiConfig {
//!     host: "pbx.internal".into(),
//!     username: "ringline".into(),
//!     secret: "s3cret".into(),
//!     ..Default::default()
//! };
//!
//! let manager = ConnectionManager::new(config);
//! let client = manager.client();
//! manager.spawn_supervisor();
//!
//! let mut events = client.events();
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod manager;

pub use client::ManagerClient;
pub use config::AmiConfig;
pub use error::{AmiClientError, Result};
pub use manager::ConnectionManager;

// Re-export the protocol layer so engine code needs only one import path.
pub use ringline_ami_core::{Action, ActionId, AmiEvent, ResponseFrame};

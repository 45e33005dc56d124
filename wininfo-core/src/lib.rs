//! # wininfo Core
//!
//! Detects Windows SDKs, Visual Studio instances and connected devices, and
//! keeps an observable snapshot of them current as the filesystem changes.
//!
//! ## Overview
//!
//! - **Detection**: Probe fan-out over configured and registry-derived
//!   roots, plus discovery through an external locator executable
//! - **Default Selection**: A default stays selected for as long as it is
//!   still detected
//! - **Watching**: One watch subscription per tracked entity, with
//!   debounced re-detection on change
//! - **Reactive Store**: Structural diffs delivered to observers only when
//!   something actually changed
//! - **Orchestration**: A per-category state machine with serialized passes
//!   and SDK-gated device polling
//!
//! ## Feature Flags
//!
//! - `notify`: Host filesystem watching through the `notify` crate
//!
//! ## Architecture
//!
//! - [`detect`]: Detection engine, default selection and locator parsing
//! - [`watch`]: Watch transport abstraction, debouncer and subscription registry
//! - [`store`]: The observable store and its diffs
//! - [`service`]: The info service tying the pieces together
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use wininfo_core::{
//!     detect::CommandLocator,
//!     service::{InfoService, InfoServiceConfig, InfoServiceDeps},
//!     types::{Candidate, CandidateKind},
//!     watch::NotifyWatchService,
//! };
//!
//! async fn run() -> wininfo_core::Result<()> {
//!     let config = InfoServiceConfig::default();
//!     let probe = Arc::new(
//!         |path: &std::path::Path| -> wininfo_core::Result<Option<Candidate>> {
//!             Ok(path.join("Include").is_dir().then(|| {
//!                 Candidate::new(CandidateKind::Sdk, path, serde_json::Value::Null)
//!             }))
//!         },
//!     );
//!     let locator = CommandLocator::new(
//!         config.ide.locator_program.clone(),
//!         config.ide.locator_args.clone(),
//!     );
//!     let deps = InfoServiceDeps::new(Arc::new(NotifyWatchService::new()), probe)
//!         .with_ide_locator(Arc::new(locator));
//!
//!     let service = InfoService::new(config, deps);
//!     service.activate().await?;
//!     println!("{}", serde_json::to_string_pretty(&service.snapshot())?);
//!     service.deactivate().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Detection passes and default selection
pub mod detect;

/// Error types
pub mod error;

/// Info service orchestration
pub mod service;

/// Observable store shared with consumers
pub mod store;

/// Candidate and identifier types
pub mod types;

/// Filesystem watch plumbing
pub mod watch;

pub use error::{InfoError, Result};
pub use service::{InfoService, InfoServiceConfig, InfoServiceDeps};
pub use store::{InfoSnapshot, ReactiveStore, StoreChange, StoreDiff, StoreValue};
pub use types::{Candidate, CandidateKind, CandidateSet, Category, EntityKey};

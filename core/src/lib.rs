//! watchd Core Library
//!
//! Hook-side core of a file integrity monitor. Handlers attached to
//! filesystem operations consult a shared watch set keyed by inode identity,
//! pair write entry with write exit, and push fixed-layout change records to
//! a bounded channel without ever blocking the operation they observe.
//!
//! # Features
//!
//! - **Policy Store**: concurrent, bounded watch set keyed by (inode, device)
//! - **Hook Handlers**: create, delete, write and rename handlers on [`Monitor`]
//! - **Event Channel**: non-blocking delivery with a drop or fallback overflow policy
//! - **Provisioning**: recursive watch-set loading with exclusion rules
//! - **Record Logging**: structured output in multiple formats (Pretty, JSON, Compact)
//!
//! # Example
//!
//! ```no_run
//! use watchd_core::{Config, Monitor, PathCache, Provisioner};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = Config::load().expect("Failed to load config");
//! let (monitor, receiver) = Monitor::from_config(&config);
//! let provisioner = Provisioner::from_config(
//!     monitor.policy().clone(),
//!     Arc::new(PathCache::new()),
//!     &config.provisioning,
//! )
//! .expect("Invalid provisioning rules");
//! provisioner.load(&config.provisioning).expect("Failed to provision");
//!
//! while let Some(record) = receiver.recv_timeout(Duration::from_secs(1)) {
//!     provisioner.follow(&record).ok();
//!     println!("{} {}", record.kind, provisioner.path_cache().resolve(&record).display());
//! }
//! ```

pub mod channel;
pub mod config;
pub mod context;
pub mod correlation;
pub mod error;
pub mod event;
pub mod hooks;
pub mod key;
pub mod logger;
pub mod path_cache;
pub mod policy;
#[cfg(unix)]
pub mod provision;

// Re-export commonly used types
pub use channel::{
    channel, ChannelCounters, CollectingFallback, Delivery, EventChannel, EventReceiver,
    FallbackSink, OverflowPolicy, TracingFallback,
};
pub use config::{
    ChannelConfig, Config, CorrelationConfig, GeneralConfig, PolicyConfig, ProvisioningConfig,
};
pub use context::{DentryView, FileView, InodeView, TaskView};
pub use correlation::{CorrelationToken, WriteCorrelationStore};
pub use error::{ConfigError, CoreError, DecodeError, PolicyError, ProvisionError, Result};
pub use event::{ChangeKind, ChangeRecord, FileName, TtyAttribution, RECORD_SIZE};
pub use hooks::{HookOutcome, Monitor, SkipReason};
pub use key::{kernel_dev, EntityKey};
pub use logger::{LogFormat, Logger, LoggerConfig, TtyDrivers};
pub use path_cache::PathCache;
pub use policy::{PolicyRecord, PolicyStore};
#[cfg(unix)]
pub use provision::{Exclusions, ProvisionSummary, Provisioner};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

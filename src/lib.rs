pub mod cli;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod export;
pub mod filter;
pub mod monitor;
pub mod notifier;
pub mod refresh;

pub use detector::{ChangeDetector, Fingerprint};
pub use error::*;
pub use events::*;
pub use filter::*;
pub use monitor::{MonitorLoop, MonitorState, MonitorWorker, StopSignal};

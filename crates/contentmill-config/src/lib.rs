//! KDL configuration parsing for the contentmill content pipeline.
//!
//! This crate handles parsing of:
//! - The system configuration file (contentmill.kdl)
//! - Wall-clock times and UTC offsets used by the daily scheduler

pub mod error;
mod nodes;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{
    CONFIG_PATH_ENV, CollaboratorConfig, GenerationConfig, PublishConfig, RenderConfig,
    ScheduleConfig, SystemConfig, VariantConfig, WorkerConfig, load_system_config, parse_clock,
    parse_system_config, parse_utc_offset,
};

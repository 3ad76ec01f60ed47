//! # Relay Runtime
//!
//! Configuration, logging, and the composition root for the Relay
//! in-process command framework.
//!
//! - **Configuration**: layered loading via figment (defaults, profile
//!   files, `relay.toml`, `RELAY_*` environment variables) with a
//!   validation pass ([`config`])
//! - **Logging**: tracing-subscriber setup driven by the logging section
//!   ([`logging`])
//! - **Composition root**: [`Runtime`] assembles pre-configured bus
//!   builders and reference middleware from the loaded config

pub mod config;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, Profile, RelayConfig};
pub use logging::{LoggingBuilder, SpanEvents, init_from_config};
pub use runtime::Runtime;

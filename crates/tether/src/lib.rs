//! Tether: remote evaluation bridge
//!
//! A console shell sends statements over one TCP connection to a host that
//! embeds an evaluator; the host replies with the formatted result. This
//! crate holds everything both ends share:
//!
//! - [`protocol`]: one-receive-one-frame framing and the control sentinels
//! - [`format`]: the text rendering of evaluator values
//! - [`deps`]: dependency ordering of resources
//! - [`eval`]: the evaluator trait and the built-in script evaluator
//! - [`resource`]: resource handles, catalogs and loaders
//! - [`config`]: host and shell settings

pub mod config;
pub mod deps;
pub mod eval;
pub mod format;
pub mod protocol;
pub mod resource;
pub mod value;

mod error;

pub use config::{BridgeConfig, DEFAULT_EXCLUSIONS, HostConfig};
pub use deps::{CycleMode, CyclicDependencyError, order_resources};
pub use error::{ConfigError, ConnectionError, ProtocolError};
pub use eval::{
    CollectingSink, DiagnosticSink, EvalError, Evaluation, Evaluator, NullSink, ScriptEvaluator,
};
pub use format::{format_value, try_format_value};
pub use protocol::{Frame, FrameReader, FrameWriter, Sentinel};
pub use resource::{
    FileCatalog, ResourceCatalog, ResourceHandle, ResourceLoadError, ResourceLoader,
    ScriptLoader, StaticCatalog,
};
pub use value::{Sequence, Value, ValueMap};

//! Overlay configuration
//!
//! Layered loading in precedence order: built-in defaults, then an optional
//! config file, then `LOOM`-prefixed environment variables with `__` as the
//! nesting separator (`LOOM_READ_ONLY=true`, `LOOM_REMOTE__BASE_URL=...`).

use crate::logging::LoggingConfig;
use crate::publish::PollPolicy;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One entry of the item-type registry: which directory name presents the
/// type, what the remote calls it, and how its definition behaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemTypeSpec {
    /// Type-folder directory name in paths.
    pub directory: String,
    /// Type name used in remote calls.
    pub remote_type: String,
    /// Some remote types cannot take definition updates; publish skips them
    /// with a notice.
    #[serde(default = "default_true")]
    pub supports_definition_update: bool,
    /// Canonical definition file name for single-file types. When set, the
    /// part is presented under the item's display name instead.
    #[serde(default)]
    pub definition_file: Option<String>,
    /// Definition format requested from the remote, for types that offer
    /// more than one.
    #[serde(default)]
    pub definition_format: Option<String>,
}

/// Remote service endpoint for the HTTP binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// URI scheme of addressable paths.
    #[serde(default = "default_scheme")]
    pub scheme: String,

    /// Reject every mutating verb with a permissions error.
    #[serde(default)]
    pub read_only: bool,

    /// Bound on waiting for another caller's in-flight load.
    #[serde(default = "default_load_wait_secs")]
    pub load_wait_secs: u64,

    /// Long-running-operation poll backoff: start and cap.
    #[serde(default = "default_poll_initial_ms")]
    pub poll_initial_ms: u64,
    #[serde(default = "default_poll_max_ms")]
    pub poll_max_ms: u64,

    /// Known item-type collections. Paths naming a directory outside this
    /// registry are invalid.
    #[serde(default = "default_item_types")]
    pub item_types: Vec<ItemTypeSpec>,

    #[serde(default)]
    pub remote: Option<RemoteEndpoint>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

fn default_scheme() -> String {
    "loom".to_string()
}

fn default_load_wait_secs() -> u64 {
    10
}

fn default_poll_initial_ms() -> u64 {
    500
}

fn default_poll_max_ms() -> u64 {
    8000
}

fn default_item_types() -> Vec<ItemTypeSpec> {
    vec![
        ItemTypeSpec {
            directory: "notebooks".into(),
            remote_type: "Notebook".into(),
            supports_definition_update: true,
            definition_file: None,
            definition_format: Some("source".into()),
        },
        ItemTypeSpec {
            directory: "pipelines".into(),
            remote_type: "DataPipeline".into(),
            supports_definition_update: true,
            definition_file: None,
            definition_format: None,
        },
        ItemTypeSpec {
            directory: "models".into(),
            remote_type: "SemanticModel".into(),
            supports_definition_update: true,
            definition_file: Some("definition.bim".into()),
            definition_format: None,
        },
        ItemTypeSpec {
            directory: "dashboards".into(),
            remote_type: "Dashboard".into(),
            supports_definition_update: false,
            definition_file: None,
            definition_format: None,
        },
    ]
}

impl Default for OverlayConfig {
    fn default() -> Self {
        OverlayConfig {
            scheme: default_scheme(),
            read_only: false,
            load_wait_secs: default_load_wait_secs(),
            poll_initial_ms: default_poll_initial_ms(),
            poll_max_ms: default_poll_max_ms(),
            item_types: default_item_types(),
            remote: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl OverlayConfig {
    /// Load configuration from defaults, an optional file, and environment.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            Config::builder().add_source(Config::try_from(&OverlayConfig::default())?);
        if let Some(path) = file {
            let path = path.to_str().ok_or_else(|| {
                ConfigError::Message(format!("non-UTF-8 config path: {}", path.display()))
            })?;
            builder = builder.add_source(File::with_name(path));
        }
        let builder = builder.add_source(
            Environment::with_prefix("LOOM")
                .separator("__")
                .try_parsing(true),
        );
        builder.build()?.try_deserialize()
    }

    /// Registry lookup by type-folder directory name.
    pub fn type_for_directory(&self, directory: &str) -> Option<&ItemTypeSpec> {
        self.item_types.iter().find(|t| t.directory == directory)
    }

    pub fn load_wait(&self) -> Duration {
        Duration::from_secs(self.load_wait_secs)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            initial: Duration::from_millis(self.poll_initial_ms),
            max: Duration::from_millis(self.poll_max_ms),
        }
    }
}

//! Server and middleware configuration.
//!
//! Every field has a default, so an empty document is a valid config:
//!
//! ```toml
//! addr = "0.0.0.0:3000"
//!
//! [recovery]
//! enabled = true
//! print_stack = false
//! stack_all = false
//!
//! [stat]
//! ignored_prefixes = ["/static", "/healthz"]
//!
//! [runtime]
//! enabled = true
//! ignored_prefixes = ["/static"]
//! ```

use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;

use crate::error::Error;
use crate::middleware::{Middleware, RecoveryWare, RuntimeWare, StatWare};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub recovery: RecoveryConfig,
    pub stat: StatConfig,
    pub runtime: RuntimeConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:3000".to_owned(),
            recovery: RecoveryConfig::default(),
            stat: StatConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Include [`RecoveryWare`] in [`ServerConfig::middlewares`].
    pub enabled: bool,
    /// Write the panic message and trace into the response body.
    pub print_stack: bool,
    /// Keep the full thread trace instead of cutting it at the request boundary.
    pub stack_all: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self { enabled: true, print_stack: false, stack_all: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatConfig {
    pub enabled: bool,
    pub ignored_prefixes: Vec<String>,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self { enabled: true, ignored_prefixes: Vec::new() }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub enabled: bool,
    pub ignored_prefixes: Vec<String>,
}

impl ServerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, Error> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// The enabled built-ins, outermost first: recovery, stat, runtime.
    pub fn middlewares(&self) -> Vec<Arc<dyn Middleware>> {
        let mut wares: Vec<Arc<dyn Middleware>> = Vec::new();
        if self.recovery.enabled {
            wares.push(Arc::new(RecoveryWare::from_config(&self.recovery)));
        }
        if self.stat.enabled {
            wares.push(Arc::new(StatWare::from_config(&self.stat)));
        }
        if self.runtime.enabled {
            wares.push(Arc::new(RuntimeWare::from_config(&self.runtime)));
        }
        wares
    }
}

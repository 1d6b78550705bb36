//! Configuration data structures for modbridge.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. They
//! include defaults so that minimal configs remain concise. Library directives
//! are kept in declaration order: that order is the order the registry tries them in.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::library::LibraryRole;

/// Default ceiling for a single response body (64 MiB)
pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 64 * 1024 * 1024;

/// The two library declaration directives.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DirectiveKind {
    /// Declares the primary handler library of a scope
    SoapLibrary,
    /// Declares a library loaded only to satisfy symbol resolution
    SupportLibrary,
}

impl DirectiveKind {
    pub fn role(self) -> LibraryRole {
        match self {
            DirectiveKind::SoapLibrary => LibraryRole::Primary,
            DirectiveKind::SupportLibrary => LibraryRole::Dependency,
        }
    }
}

/// One library declaration, e.g. `{ type = "soap_library", path = "/srv/calc.so" }`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LibraryDirective {
    #[serde(rename = "type")]
    pub kind: DirectiveKind,
    pub path: String,
}

impl LibraryDirective {
    pub fn primary(path: impl Into<String>) -> Self {
        Self {
            kind: DirectiveKind::SoapLibrary,
            path: path.into(),
        }
    }

    pub fn support(path: impl Into<String>) -> Self {
        Self {
            kind: DirectiveKind::SupportLibrary,
            path: path.into(),
        }
    }
}

/// A location block, keyed by its path prefix
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct LocationConfig {
    /// Handler name assigned to requests under this prefix; inherited from
    /// the nearest enclosing location when absent
    pub handler: Option<String>,
    /// Library directives declared in this location
    pub libraries: Vec<LibraryDirective>,
    /// Directory serving requests the handler declines
    pub document_root: Option<String>,
}

/// A name-based virtual host
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct VirtualHostConfig {
    pub libraries: Vec<LibraryDirective>,
    pub locations: HashMap<String, LocationConfig>,
    pub document_root: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest response body a handler may produce
    pub max_response_bytes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Main server configuration
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_addr: String,
    #[serde(default)]
    pub document_root: Option<String>,
    #[serde(default)]
    pub libraries: Vec<LibraryDirective>,
    #[serde(default)]
    pub locations: HashMap<String, LocationConfig>,
    #[serde(default)]
    pub virtual_hosts: HashMap<String, VirtualHostConfig>,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            document_root: None,
            libraries: Vec::new(),
            locations: HashMap::new(),
            virtual_hosts: HashMap::new(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the server-wide fallback document root
    pub fn document_root(mut self, root: impl Into<String>) -> Self {
        self.config.document_root = Some(root.into());
        self
    }

    /// Declare a server-level library
    pub fn library(mut self, directive: LibraryDirective) -> Self {
        self.config.libraries.push(directive);
        self
    }

    /// Add a location block
    pub fn location(mut self, prefix: impl Into<String>, location: LocationConfig) -> Self {
        self.config.locations.insert(prefix.into(), location);
        self
    }

    /// Add a virtual host
    pub fn virtual_host(mut self, name: impl Into<String>, host: VirtualHostConfig) -> Self {
        self.config.virtual_hosts.insert(name.into(), host);
        self
    }

    pub fn max_response_bytes(mut self, limit: u64) -> Self {
        self.config.limits.max_response_bytes = limit;
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl LocationConfig {
    /// A location assigning `handler` and declaring `libraries`
    pub fn handled_by(handler: impl Into<String>, libraries: Vec<LibraryDirective>) -> Self {
        Self {
            handler: Some(handler.into()),
            libraries,
            document_root: None,
        }
    }
}

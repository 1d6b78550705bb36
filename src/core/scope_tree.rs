//! The tree of configuration scopes built from a [`ServerConfig`].
//!
//! The tree is built once at startup. Every location ends up with its own
//! merged scope: the server scope (or the virtual host's, itself merged onto
//! the main server) followed by every enclosing location from the shortest
//! prefix to its own. Merging is done bottom-up with
//! [`ConfigurationScope::merge`], so no scope is mutated after it is built.
use std::{collections::HashMap, sync::Arc};

use crate::{
    config::models::{LibraryDirective, LocationConfig, ServerConfig},
    core::{
        error::LoadError,
        scope::{ConfigurationScope, ScopeType},
    },
};

/// What a request resolved to.
#[derive(Debug, Clone)]
pub struct ResolvedLocation {
    /// Matched location prefix; empty when only the server scope applies
    pub prefix: String,
    pub handler: Option<String>,
    pub document_root: Option<String>,
    pub scope: Arc<ConfigurationScope>,
}

#[derive(Debug)]
struct LocationEntry {
    prefix: String,
    handler: Option<String>,
    document_root: Option<String>,
    scope: Arc<ConfigurationScope>,
}

#[derive(Debug)]
struct ServerScope {
    scope: Arc<ConfigurationScope>,
    document_root: Option<String>,
    /// Longest prefix first
    locations: Vec<LocationEntry>,
}

#[derive(Debug)]
pub struct ScopeTree {
    main: ServerScope,
    virtual_hosts: HashMap<String, ServerScope>,
}

/// Whether `path` falls under the location `prefix`.
pub fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

fn declared_scope(scope_type: ScopeType, libraries: &[LibraryDirective]) -> ConfigurationScope {
    let mut scope = ConfigurationScope::new(scope_type);
    for directive in libraries {
        scope.add_library(&directive.path, directive.kind.role());
    }
    scope
}

fn build_server(
    scope: ConfigurationScope,
    document_root: Option<String>,
    locations: &HashMap<String, LocationConfig>,
) -> ServerScope {
    let mut prefixes: Vec<&String> = locations.keys().collect();
    prefixes.sort_by_key(|prefix| prefix.len());

    let mut entries = Vec::with_capacity(prefixes.len());
    for prefix in &prefixes {
        let chain = prefixes
            .iter()
            .filter(|other| prefix_matches(other, prefix))
            .map(|other| &locations[*other]);

        let mut merged: Option<ConfigurationScope> = None;
        let mut handler = None;
        let mut location_root = None;
        for location in chain {
            let directory = declared_scope(ScopeType::Directory, &location.libraries);
            let parent = merged.as_ref().unwrap_or(&scope);
            merged = Some(ConfigurationScope::merge(parent, &directory));
            if location.handler.is_some() {
                handler = location.handler.clone();
            }
            if location.document_root.is_some() {
                location_root = location.document_root.clone();
            }
        }

        let location_scope = merged.unwrap_or_else(|| ConfigurationScope::merge(&scope, &scope));
        tracing::debug!(
            "Location {} uses libraries {:?}",
            prefix,
            location_scope.library_paths()
        );
        entries.push(LocationEntry {
            prefix: prefix.to_string(),
            handler,
            document_root: location_root.or_else(|| document_root.clone()),
            scope: Arc::new(location_scope),
        });
    }
    entries.reverse();

    ServerScope {
        scope: Arc::new(scope),
        document_root,
        locations: entries,
    }
}

impl ScopeTree {
    pub fn from_config(config: &ServerConfig) -> Self {
        let main_scope = declared_scope(ScopeType::Server, &config.libraries);

        let mut virtual_hosts = HashMap::new();
        for (name, host) in &config.virtual_hosts {
            let declared = declared_scope(ScopeType::Server, &host.libraries);
            let scope = ConfigurationScope::merge_server(&main_scope, &declared);

            let mut locations = config.locations.clone();
            locations.extend(host.locations.clone());
            let document_root = host
                .document_root
                .clone()
                .or_else(|| config.document_root.clone());

            virtual_hosts.insert(
                name.to_ascii_lowercase(),
                build_server(scope, document_root, &locations),
            );
        }

        let main = build_server(main_scope, config.document_root.clone(), &config.locations);
        tracing::info!(
            "Built scope tree: {} locations, {} virtual hosts",
            main.locations.len(),
            virtual_hosts.len()
        );
        Self {
            main,
            virtual_hosts,
        }
    }

    /// Resolve the scope for a request. Unknown hosts use the main server.
    pub fn find_location(&self, host: Option<&str>, path: &str) -> ResolvedLocation {
        let server = host
            .map(|h| h.split(':').next().unwrap_or(h).to_ascii_lowercase())
            .and_then(|h| self.virtual_hosts.get(&h))
            .unwrap_or(&self.main);

        match server
            .locations
            .iter()
            .find(|entry| prefix_matches(&entry.prefix, path))
        {
            Some(entry) => ResolvedLocation {
                prefix: entry.prefix.clone(),
                handler: entry.handler.clone(),
                document_root: entry.document_root.clone(),
                scope: entry.scope.clone(),
            },
            None => ResolvedLocation {
                prefix: String::new(),
                handler: None,
                document_root: server.document_root.clone(),
                scope: server.scope.clone(),
            },
        }
    }

    fn servers(&self) -> impl Iterator<Item = &ServerScope> {
        std::iter::once(&self.main).chain(self.virtual_hosts.values())
    }

    /// Every scope in the tree.
    pub fn scopes(&self) -> impl Iterator<Item = &Arc<ConfigurationScope>> {
        self.servers().flat_map(|server| {
            std::iter::once(&server.scope).chain(server.locations.iter().map(|entry| &entry.scope))
        })
    }

    /// Unload every scope, best effort. Returns the first failure.
    pub fn unload_all(&self) -> Result<(), LoadError> {
        let mut first_error = None;
        for scope in self.scopes() {
            if let Err(e) = scope.unload() {
                tracing::warn!("Failed to unload scope: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

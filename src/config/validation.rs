use std::{collections::HashSet, net::SocketAddr};

use crate::config::models::{
    DirectiveKind, LibraryDirective, LocationConfig, ServerConfig, VirtualHostConfig,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Conflicting library declarations in {scope}: {message}")]
    LibraryConflict { scope: String, message: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        // Validate listen address
        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        errors.extend(Self::validate_libraries("server", &config.libraries));
        errors.extend(Self::validate_locations("server", &config.locations));

        for (name, host) in &config.virtual_hosts {
            errors.extend(Self::validate_virtual_host(name, host));
        }

        if config.limits.max_response_bytes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "limits.max_response_bytes".to_string(),
                message: "Response limit must be greater than zero".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:3000' or '0.0.0.0:8080')"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// Library directives of one declared scope: non-empty paths and at most
    /// one primary library
    fn validate_libraries(scope: &str, libraries: &[LibraryDirective]) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for (i, directive) in libraries.iter().enumerate() {
            if directive.path.trim().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("{scope} library {} path", i + 1),
                });
            } else if !seen.insert(directive.path.as_str()) {
                tracing::warn!(
                    "Library {} is declared more than once in {}",
                    directive.path,
                    scope
                );
            }
        }

        let primaries: Vec<&str> = libraries
            .iter()
            .filter(|d| d.kind == DirectiveKind::SoapLibrary)
            .map(|d| d.path.as_str())
            .collect();
        if primaries.len() > 1 {
            errors.push(ValidationError::LibraryConflict {
                scope: scope.to_string(),
                message: format!(
                    "only one soap_library may be declared, found {}",
                    primaries.join(", ")
                ),
            });
        }

        errors
    }

    fn validate_locations<'a>(
        scope: &str,
        locations: impl IntoIterator<Item = (&'a String, &'a LocationConfig)>,
    ) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        for (prefix, location) in locations {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidField {
                    field: format!("{scope} location: {prefix}"),
                    message: "Location prefixes must start with '/'".to_string(),
                });
            }

            if let Some(handler) = &location.handler {
                if handler.trim().is_empty() {
                    errors.push(ValidationError::InvalidField {
                        field: format!("{scope} location '{prefix}' handler"),
                        message: "Handler name must not be empty".to_string(),
                    });
                }
            }

            errors.extend(Self::validate_libraries(
                &format!("{scope} location '{prefix}'"),
                &location.libraries,
            ));
        }

        errors
    }

    fn validate_virtual_host(name: &str, host: &VirtualHostConfig) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let scope = format!("virtual host '{name}'");

        if name.trim().is_empty() || name.contains('/') {
            errors.push(ValidationError::InvalidField {
                field: "virtual host name".to_string(),
                message: format!("'{name}' is not a valid host name"),
            });
        }

        errors.extend(Self::validate_libraries(&scope, &host.libraries));
        errors.extend(Self::validate_locations(&scope, &host.locations));
        errors
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}

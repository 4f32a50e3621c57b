use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    path::Path,
};

use http::{HeaderName, HeaderValue};
use regex::Regex;

use crate::{
    config::models::{
        GatewayConfig, HealthCheckConfig, HttpServerConfig, LocationConfig, UpstreamConfig,
    },
    core::backend::BackendServer,
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

    #[error("Invalid TLS configuration: {message}")]
    InvalidTls { message: String },

    #[error("Unknown upstream '{upstream}' referenced by {location}")]
    UnknownUpstream { upstream: String, location: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
///
/// Runs before any listener binds so a misconfigured location can never fail
/// on the first request that reaches it.
pub struct GatewayConfigValidator;

impl GatewayConfigValidator {
    /// Validate the entire gateway configuration, reporting every problem at once
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        let upstreams = Self::validate_upstreams(&config.upstreams, &mut errors);

        if config.http.servers.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "http.servers".to_string(),
            });
        }
        for (i, server) in config.http.servers.iter().enumerate() {
            Self::validate_server(i, server, &upstreams, &mut errors);
        }

        Self::validate_health_check_config(&config.health_check, &mut errors);

        if config.application.processes == 0 {
            errors.push(ValidationError::InvalidField {
                field: "application.processes".to_string(),
                message: "Must be greater than 0".to_string(),
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

    /// Returns upstream id → number of servers, for location cross-checks.
    fn validate_upstreams<'a>(
        upstreams: &'a [UpstreamConfig],
        errors: &mut Vec<ValidationError>,
    ) -> HashMap<&'a str, usize> {
        let mut known = HashMap::new();

        for (i, upstream) in upstreams.iter().enumerate() {
            let id = upstream.id.trim();
            if id.is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("upstreams[{i}].id"),
                });
                continue;
            }
            if known.insert(id, upstream.servers.len()).is_some() {
                errors.push(ValidationError::InvalidField {
                    field: format!("upstreams[{i}].id"),
                    message: format!("Duplicate upstream id '{id}'"),
                });
            }
            for (j, server) in upstream.servers.iter().enumerate() {
                if let Err(e) = BackendServer::from_config(server) {
                    errors.push(ValidationError::InvalidField {
                        field: format!("upstream '{id}' servers[{j}]"),
                        message: e.to_string(),
                    });
                }
            }
        }

        known
    }

    fn validate_server(
        index: usize,
        server: &HttpServerConfig,
        upstreams: &HashMap<&str, usize>,
        errors: &mut Vec<ValidationError>,
    ) {
        if let Err(e) = Self::validate_listen_address(&server.listen) {
            errors.push(e);
        }

        if server.ssl {
            if let Err(e) = Self::validate_tls_files(server) {
                errors.push(e);
            }
        }

        for (h, host) in server.hosts.iter().enumerate() {
            if host.host_names().is_empty() {
                errors.push(ValidationError::MissingField {
                    field: format!("http.servers[{index}].hosts[{h}].host"),
                });
            }
            for (l, location) in host.locations.iter().enumerate() {
                let context = format!("http.servers[{index}].hosts[{h}].locations[{l}]");
                Self::validate_location(&context, location, upstreams, errors);
            }
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        let invalid = |reason: &str| ValidationError::InvalidListenAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        if address.trim().is_empty() {
            return Err(invalid("Listen address cannot be empty"));
        }
        if address.parse::<SocketAddr>().is_ok() {
            return Ok(());
        }

        // host names such as `localhost:8080` are resolved when binding
        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => Ok(()),
            _ => Err(invalid(
                "Must be in format 'HOST:PORT' (e.g., '127.0.0.1:3000' or 'localhost:8080')",
            )),
        }
    }

    fn validate_tls_files(server: &HttpServerConfig) -> ValidationResult<()> {
        match (&server.cert, &server.key) {
            (Some(cert), Some(key)) => {
                if !Path::new(cert).exists() {
                    return Err(ValidationError::InvalidTls {
                        message: format!("Certificate file does not exist: {cert}"),
                    });
                }
                if !Path::new(key).exists() {
                    return Err(ValidationError::InvalidTls {
                        message: format!("Private key file does not exist: {key}"),
                    });
                }
                Ok(())
            }
            _ => Err(ValidationError::InvalidTls {
                message: format!(
                    "Listener '{}' has ssl enabled but is missing cert or key",
                    server.listen
                ),
            }),
        }
    }

    fn validate_location(
        context: &str,
        location: &LocationConfig,
        upstreams: &HashMap<&str, usize>,
        errors: &mut Vec<ValidationError>,
    ) {
        if location.pattern.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("{context}.pattern"),
            });
        } else if let Err(e) = Regex::new(&location.pattern) {
            errors.push(ValidationError::InvalidField {
                field: format!("{context}.pattern"),
                message: format!("Invalid regular expression: {e}"),
            });
        }

        match (location.upstream_id(), location.static_root()) {
            (Some(_), Some(_)) => errors.push(ValidationError::InvalidField {
                field: context.to_string(),
                message: "Set either 'upstream' or 'root', not both".to_string(),
            }),
            (None, None) => errors.push(ValidationError::InvalidField {
                field: context.to_string(),
                message: "One of 'upstream' or 'root' is required".to_string(),
            }),
            (Some(id), None) => match upstreams.get(id) {
                None => errors.push(ValidationError::UnknownUpstream {
                    upstream: id.to_string(),
                    location: context.to_string(),
                }),
                Some(0) => errors.push(ValidationError::InvalidField {
                    field: format!("upstream '{id}' servers"),
                    message: "Upstream referenced by a location must list at least one server"
                        .to_string(),
                }),
                Some(_) => {}
            },
            (None, Some(_)) => {}
        }

        Self::validate_headers(&format!("{context}.request"), &location.request, errors);
        Self::validate_headers(&format!("{context}.response"), &location.response, errors);
    }

    fn validate_headers(
        context: &str,
        headers: &HashMap<String, String>,
        errors: &mut Vec<ValidationError>,
    ) {
        let mut seen = HashSet::new();
        for (name, value) in headers {
            match HeaderName::from_bytes(name.as_bytes()) {
                Ok(parsed) => {
                    if !seen.insert(parsed) {
                        errors.push(ValidationError::InvalidField {
                            field: context.to_string(),
                            message: format!("Header '{name}' is listed more than once"),
                        });
                    }
                }
                Err(_) => errors.push(ValidationError::InvalidField {
                    field: context.to_string(),
                    message: format!("Invalid header name '{name}'"),
                }),
            }
            if HeaderValue::from_str(value).is_err() {
                errors.push(ValidationError::InvalidField {
                    field: context.to_string(),
                    message: format!("Invalid value for header '{name}'"),
                });
            }
        }
    }

    fn validate_health_check_config(config: &HealthCheckConfig, errors: &mut Vec<ValidationError>) {
        if !config.enabled {
            return;
        }

        if config.interval_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check.interval_ms".to_string(),
                message: "Must be greater than 0 when health checks are enabled".to_string(),
            });
        }

        if config.timeout_ms == 0 {
            errors.push(ValidationError::InvalidField {
                field: "health_check.timeout_ms".to_string(),
                message: "Must be greater than 0 when health checks are enabled".to_string(),
            });
        }
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{HttpConfig, VirtualHostConfig};

    fn location(pattern: &str, upstream: Option<&str>, root: Option<&str>) -> LocationConfig {
        LocationConfig {
            pattern: pattern.to_string(),
            upstream: upstream.map(str::to_string),
            root: root.map(str::to_string),
            ..Default::default()
        }
    }

    fn minimal_valid_config() -> GatewayConfig {
        GatewayConfig {
            upstreams: vec![UpstreamConfig {
                id: "svc1".to_string(),
                servers: vec!["127.0.0.1:9000".into()],
                ..Default::default()
            }],
            http: HttpConfig {
                servers: vec![HttpServerConfig {
                    listen: "127.0.0.1:8080".to_string(),
                    hosts: vec![VirtualHostConfig {
                        host: "a.example".to_string(),
                        locations: vec![
                            location("^/api/", Some("svc1"), None),
                            location("^/", None, Some("/var/www")),
                        ],
                    }],
                    ..Default::default()
                }],
            },
            ..Default::default()
        }
    }

    fn report(config: &GatewayConfig) -> String {
        match GatewayConfigValidator::validate(config) {
            Err(ValidationError::ValidationFailed { message }) => message,
            other => panic!("expected a validation failure, got {other:?}"),
        }
    }

    #[test]
    fn validate_accepts_minimal_config() {
        assert!(GatewayConfigValidator::validate(&minimal_valid_config()).is_ok());
    }

    #[test]
    fn validate_accepts_hostname_listen_address() {
        let mut config = minimal_valid_config();
        config.http.servers[0].listen = "localhost:8080".to_string();
        assert!(GatewayConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn validate_rejects_empty_listen_address() {
        let mut config = minimal_valid_config();
        config.http.servers[0].listen = String::new();
        assert!(report(&config).contains("Listen address cannot be empty"));
    }

    #[test]
    fn validate_rejects_missing_servers() {
        let mut config = minimal_valid_config();
        config.http.servers.clear();
        assert!(report(&config).contains("http.servers"));
    }

    #[test]
    fn validate_rejects_unknown_upstream() {
        let mut config = minimal_valid_config();
        config.http.servers[0].hosts[0].locations[0].upstream = Some("nope".to_string());
        assert!(report(&config).contains("Unknown upstream 'nope'"));
    }

    #[test]
    fn validate_rejects_referenced_upstream_without_servers() {
        let mut config = minimal_valid_config();
        config.upstreams[0].servers.clear();
        assert!(report(&config).contains("at least one server"));
    }

    #[test]
    fn validate_rejects_location_with_both_targets() {
        let mut config = minimal_valid_config();
        config.http.servers[0].hosts[0].locations[0].root = Some("/srv".to_string());
        assert!(report(&config).contains("not both"));
    }

    #[test]
    fn validate_rejects_bad_pattern_and_headers_together() {
        let mut config = minimal_valid_config();
        let rule = &mut config.http.servers[0].hosts[0].locations[0];
        rule.pattern = "([".to_string();
        rule.request
            .insert("bad header".to_string(), "v".to_string());

        let message = report(&config);
        assert!(message.contains("Found 2 validation errors"));
        assert!(message.contains("Invalid regular expression"));
        assert!(message.contains("Invalid header name"));
    }

    #[test]
    fn validate_rejects_bad_backend_spec() {
        let mut config = minimal_valid_config();
        config.upstreams[0].servers.push("no-port-here".into());
        assert!(report(&config).contains("servers[1]"));
    }

    #[test]
    fn validate_rejects_duplicate_upstream_ids() {
        let mut config = minimal_valid_config();
        config.upstreams.push(config.upstreams[0].clone());
        assert!(report(&config).contains("Duplicate upstream id"));
    }

    #[test]
    fn validate_rejects_ssl_without_material() {
        let mut config = minimal_valid_config();
        config.http.servers[0].ssl = true;
        assert!(report(&config).contains("missing cert or key"));
    }

    #[test]
    fn validate_rejects_zero_health_check_interval_when_enabled() {
        let mut config = minimal_valid_config();
        config.health_check.interval_ms = 0;
        assert!(GatewayConfigValidator::validate(&config).is_err());

        config.health_check.enabled = false;
        assert!(GatewayConfigValidator::validate(&config).is_ok());
    }
}

//! Configuration validation for sync declarations.
//!
//! Field-level rules (ranges, lengths) come from the derived
//! [`validator::Validate`] impls on the declaration types. This module adds the
//! cross-field checks: unique names, target address shape, admin URL scheme.

use crate::error::{ConfigError, KongSyncError, Result};
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use super::spec::{AdminConfig, SyncConfig, TargetConfig, UpstreamConfig};

/// Validator for sync configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default, Serialize)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug, Serialize)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
    /// Resource kind and name, when the error is a repeated name.
    #[serde(skip)]
    duplicate: Option<(&'static str, String)>,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a sync configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found. Callers that want the full
    /// list use [`ConfigValidator::check`].
    pub fn validate(&self, config: &SyncConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            Ok(result)
        } else {
            Err(KongSyncError::Config(result.errors[0].to_config_error()))
        }
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &SyncConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        if let Err(errors) = config.validate() {
            flatten_errors("", &errors, &mut result.errors);
        }

        Self::validate_admin(&config.admin, &mut result);
        Self::validate_upstreams(&config.upstreams, &mut result);

        result
    }

    /// Validates admin connection settings.
    fn validate_admin(admin: &AdminConfig, result: &mut ValidationResult) {
        if !admin.url.starts_with("http://") && !admin.url.starts_with("https://") {
            result.errors.push(ValidationError::new(
                "admin.url",
                format!(
                    "Admin URL '{}' must start with http:// or https://",
                    admin.url
                ),
            ));
        }

        if admin.token_header.trim().is_empty() {
            result.errors.push(ValidationError::new(
                "admin.token_header",
                "Token header name cannot be empty",
            ));
        }
    }

    /// Validates all upstream declarations.
    fn validate_upstreams(upstreams: &[UpstreamConfig], result: &mut ValidationResult) {
        if upstreams.is_empty() {
            result
                .warnings
                .push(String::from("No upstreams defined in configuration"));
            return;
        }

        let mut seen_names = HashSet::new();

        for (i, upstream) in upstreams.iter().enumerate() {
            let prefix = format!("upstreams[{i}]");

            if !seen_names.insert(upstream.name.as_str()) {
                result.errors.push(ValidationError::duplicate(
                    format!("{prefix}.name"),
                    "upstream",
                    &upstream.name,
                ));
            }

            if !is_valid_name(&upstream.name) {
                result.errors.push(ValidationError::new(
                    format!("{prefix}.name"),
                    format!(
                        "Upstream name '{}' is invalid. Use letters, digits, '.', '-' or '_'.",
                        upstream.name
                    ),
                ));
            }

            if upstream.targets.is_empty() {
                result.warnings.push(format!(
                    "{prefix}: upstream '{}' has no targets and will not balance any traffic",
                    upstream.name
                ));
            }

            Self::validate_targets(&upstream.targets, &prefix, result);
        }
    }

    /// Validates the targets of one upstream.
    fn validate_targets(targets: &[TargetConfig], prefix: &str, result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (i, target) in targets.iter().enumerate() {
            let field = format!("{prefix}.targets[{i}]");

            if !seen.insert(target.target.as_str()) {
                result.errors.push(ValidationError::duplicate(
                    format!("{field}.target"),
                    "target",
                    &target.target,
                ));
            }

            if !is_valid_target(&target.target) {
                result.errors.push(ValidationError::new(
                    format!("{field}.target"),
                    format!(
                        "Target '{}' is invalid. Expected host:port.",
                        target.target
                    ),
                ));
            }

            if target.weight == 0 {
                result.warnings.push(format!(
                    "{field}: target '{}' has weight 0, which is not sent; Kong applies its default weight",
                    target.target
                ));
            }
        }
    }
}

/// Flattens derived validation errors into dotted field paths.
fn flatten_errors(prefix: &str, errors: &ValidationErrors, out: &mut Vec<ValidationError>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };

        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for error in field_errors {
                    let message = error.message.as_ref().map_or_else(
                        || format!("{path} failed '{}' check", error.code),
                        ToString::to_string,
                    );
                    out.push(ValidationError::new(path.clone(), message));
                }
            }
            ValidationErrorsKind::Struct(nested) => flatten_errors(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    flatten_errors(&format!("{path}[{index}]"), nested, out);
                }
            }
        }
    }
}

/// Validates that an upstream name is usable as a Kong hostname-like name.
/// Names start with an ASCII letter or digit and contain only letters,
/// digits, `.`, `-` and `_`.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {}
        _ => return false,
    }

    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Validates a `host:port` target address. IPv6 hosts use brackets.
#[must_use]
pub fn is_valid_target(target: &str) -> bool {
    let Some((host, port)) = target.rsplit_once(':') else {
        return false;
    };

    let host_ok = if let Some(inner) = host.strip_prefix('[') {
        inner.strip_suffix(']').is_some_and(|ip| !ip.is_empty())
    } else {
        !host.is_empty() && !host.contains(':')
    };

    host_ok && port.parse::<u16>().is_ok_and(|p| p > 0)
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            duplicate: None,
        }
    }

    fn duplicate(field: impl Into<String>, resource: &'static str, name: &str) -> Self {
        Self {
            field: field.into(),
            message: format!("Duplicate {resource} name: {name}"),
            duplicate: Some((resource, name.to_string())),
        }
    }

    /// Converts the error into the matching [`ConfigError`].
    #[must_use]
    pub fn to_config_error(&self) -> ConfigError {
        match &self.duplicate {
            Some((resource, name)) => ConfigError::DuplicateName {
                resource: (*resource).to_string(),
                name: name.clone(),
                field: self.field.clone(),
            },
            None => ConfigError::validation(self.message.clone(), self.field.clone()),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

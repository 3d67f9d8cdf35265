use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use tracing::instrument;
use validator::{Validate, ValidationErrors};

use crate::error::AppError;
use crate::models::NewPosition;

/// Field name to messages, ordered by field for stable output.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldErrors {
    errors: BTreeMap<String, Vec<String>>,
}

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: &str, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    pub fn merge_prefixed(&mut self, prefix: &str, other: FieldErrors) {
        for (field, messages) in other.errors {
            let key = format!("{}.{}", prefix, field);
            self.errors.entry(key).or_default().extend(messages);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn messages(&self, field: &str) -> Vec<&str> {
        self.errors
            .get(field)
            .map(|messages| messages.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn into_result(self) -> Result<(), AppError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(AppError::Validation(self))
        }
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .errors
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
            .collect();
        write!(f, "{}", rendered.join("; "))
    }
}

impl From<ValidationErrors> for FieldErrors {
    fn from(errors: ValidationErrors) -> Self {
        let mut field_errors = FieldErrors::new();

        for (field, errors) in errors.field_errors() {
            for error in errors {
                let message = error
                    .message
                    .clone()
                    .unwrap_or_else(|| "Invalid value".into())
                    .to_string();
                field_errors.add(&field.to_string(), message);
            }
        }

        field_errors
    }
}

/// Runs derive validation and maps the result into field detail.
pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input.validate().map_err(AppError::from)
}

/// Checks a declared position set against its formation's squad size.
///
/// Indices must be unique and fall within `0..squad_size`.
#[instrument(skip(positions), fields(count = positions.len()))]
pub fn validate_positions(positions: &[NewPosition], squad_size: i64) -> Result<(), AppError> {
    let mut errors = FieldErrors::new();
    let mut seen = HashSet::new();

    if positions.len() as i64 > squad_size {
        errors.add(
            "positions",
            format!(
                "{} positions declared for a squad of {}",
                positions.len(),
                squad_size
            ),
        );
    }

    for (i, position) in positions.iter().enumerate() {
        let prefix = format!("positions[{}]", i);

        if let Err(field_errors) = position.validate() {
            errors.merge_prefixed(&prefix, FieldErrors::from(field_errors));
        }

        if position.position_index >= squad_size {
            errors.add(
                &format!("{}.position_index", prefix),
                format!(
                    "Index {} is outside a squad of {}",
                    position.position_index, squad_size
                ),
            );
        }

        if !seen.insert(position.position_index) {
            errors.add(
                &format!("{}.position_index", prefix),
                format!("Duplicate position index {}", position.position_index),
            );
        }
    }

    errors.into_result()
}

//! Configuration validation.

use std::collections::HashSet;

use super::Config;
use crate::core::identifier::validate_identifier;
use crate::error::{EtlError, Result};
use crate::pipeline::Command;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Store validation
    if config.store.database.is_empty() {
        return Err(EtlError::Config("store.database is required".into()));
    }
    if let Some(subject) = &config.store.subject {
        if subject.is_empty() || subject.contains(['/', '\\']) {
            return Err(EtlError::Config(format!(
                "store.subject must be a plain directory name, got '{}'",
                subject
            )));
        }
    }
    for attach in &config.store.attach {
        if attach.database.is_empty() {
            return Err(EtlError::Config("store.attach[].database is required".into()));
        }
        validate_identifier(attach.alias()).map_err(|e| {
            EtlError::Config(format!("store.attach alias '{}': {}", attach.alias(), e))
        })?;
    }

    // Load validation
    if config.load.commit_threshold == 0 {
        return Err(EtlError::Config(
            "load.commit_threshold must be at least 1".into(),
        ));
    }
    if config.load.numeric_literal_max_len == 0 {
        return Err(EtlError::Config(
            "load.numeric_literal_max_len must be at least 1".into(),
        ));
    }

    // Step validation
    let mut names = HashSet::new();
    for step in &config.steps {
        if step.name.is_empty() {
            return Err(EtlError::Config("steps[].name is required".into()));
        }
        if !names.insert(step.name.as_str()) {
            return Err(EtlError::Config(format!(
                "duplicate step name '{}'",
                step.name
            )));
        }
        for db in &step.uses {
            validate_identifier(db).map_err(|e| {
                EtlError::Config(format!("step '{}' uses '{}': {}", step.name, db, e))
            })?;
        }
        if let Command::QueryToText {
            output, max_cells, ..
        } = &step.command
        {
            if output.is_empty() {
                return Err(EtlError::Config(format!(
                    "step '{}': output is required",
                    step.name
                )));
            }
            if *max_cells == Some(0) {
                return Err(EtlError::Config(format!(
                    "step '{}': max_cells must be at least 1",
                    step.name
                )));
            }
        }
    }

    Ok(())
}

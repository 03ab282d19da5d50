//! Per-operation timeouts from a resource's `timeouts` block.
//!
//! Users may override how long create, read, update and delete wait for a
//! resource to settle:
//!
//! ```text
//! timeouts {
//!   create = "30m"
//!   delete = "1h30m"
//! }
//! ```
//!
//! The block arrives as part of the resource configuration JSON. Durations use
//! the Go notation: a sequence of decimal numbers with a unit suffix, one of
//! `ns`, `us`, `µs`, `ms`, `s`, `m` or `h`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProviderError;
use crate::lifecycle::Operation;

/// Key of the timeouts block in a resource configuration.
pub const TIMEOUTS_KEY: &str = "timeouts";

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTimeouts {
    create: Option<String>,
    read: Option<String>,
    update: Option<String>,
    delete: Option<String>,
}

/// User-configured timeouts; `None` falls back to the resource default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Timeout for create.
    pub create: Option<Duration>,
    /// Timeout for read.
    pub read: Option<Duration>,
    /// Timeout for update.
    pub update: Option<Duration>,
    /// Timeout for delete.
    pub delete: Option<Duration>,
}

impl Timeouts {
    /// No overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the create timeout.
    pub fn with_create(mut self, timeout: Duration) -> Self {
        self.create = Some(timeout);
        self
    }

    /// Override the read timeout.
    pub fn with_read(mut self, timeout: Duration) -> Self {
        self.read = Some(timeout);
        self
    }

    /// Override the update timeout.
    pub fn with_update(mut self, timeout: Duration) -> Self {
        self.update = Some(timeout);
        self
    }

    /// Override the delete timeout.
    pub fn with_delete(mut self, timeout: Duration) -> Self {
        self.delete = Some(timeout);
        self
    }

    /// Parse a timeouts block such as `{"create": "30m"}`.
    pub fn from_json(block: &Value) -> Result<Self, ProviderError> {
        if block.is_null() {
            return Ok(Self::default());
        }
        if !block.is_object() {
            return Err(ProviderError::Configuration(format!(
                "{} must be a block, got {}",
                TIMEOUTS_KEY, block
            )));
        }
        let raw: RawTimeouts = serde_json::from_value(block.clone())
            .map_err(|err| ProviderError::Validation(format!("invalid timeouts block: {}", err)))?;

        Ok(Self {
            create: parse_field("create", raw.create)?,
            read: parse_field("read", raw.read)?,
            update: parse_field("update", raw.update)?,
            delete: parse_field("delete", raw.delete)?,
        })
    }

    /// Read the timeouts block out of a full resource configuration.
    ///
    /// A configuration without the block yields no overrides.
    pub fn from_config(config: &Value) -> Result<Self, ProviderError> {
        match config.get(TIMEOUTS_KEY) {
            Some(block) => Self::from_json(block),
            None => Ok(Self::default()),
        }
    }

    /// The configured timeout for `op`, or `default`.
    pub fn for_operation(&self, op: Operation, default: Duration) -> Duration {
        let configured = match op {
            Operation::Create => self.create,
            Operation::Read => self.read,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        };
        configured.unwrap_or(default)
    }
}

fn parse_field(name: &str, value: Option<String>) -> Result<Option<Duration>, ProviderError> {
    value
        .map(|text| {
            parse_duration(&text).map_err(|err| {
                ProviderError::Validation(format!("timeouts.{}: {}", name, err.message()))
            })
        })
        .transpose()
}

/// Parse a Go duration string such as `"1h30m"`, `"45s"` or `"1.5h"`.
///
/// Negative durations are rejected.
pub fn parse_duration(text: &str) -> Result<Duration, ProviderError> {
    let invalid = || ProviderError::Validation(format!("invalid duration {:?}", text));

    let body = text.strip_prefix('+').unwrap_or(text);
    if body.starts_with('-') {
        return Err(ProviderError::Validation(format!(
            "negative duration {:?}",
            text
        )));
    }
    if body == "0" {
        return Ok(Duration::ZERO);
    }
    if body.is_empty() {
        return Err(invalid());
    }

    let mut total = 0f64;
    let mut rest = body;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(invalid());
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);
        let seconds_per_unit = match unit {
            "ns" => 1e-9,
            "us" | "µs" | "μs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => {
                return Err(ProviderError::Validation(format!(
                    "missing unit in duration {:?}",
                    text
                )))
            }
            other => {
                return Err(ProviderError::Validation(format!(
                    "unknown unit {:?} in duration {:?}",
                    other, text
                )))
            }
        };

        total += value * seconds_per_unit;
        rest = tail;
    }

    Duration::try_from_secs_f64(total).map_err(|_| invalid())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Error codes surfaced by the engine's external entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineError {
    /// A device or user identifier was empty or unusable after normalization.
    InvalidId,
    /// A request body was structurally valid JSON but semantically unusable.
    InvalidPayload,
    /// The referenced device is not known to the registry.
    InvalidDevice,
    /// The operation requires an active session and none is running.
    SessionMissing,
    /// The occupant already holds a device and neither entry allows sharing.
    UserAlreadyAssigned,
    /// The persistence payload failed pre-flight validation.
    PersistValidation,
}

impl EngineError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidId => "INVALID_ID",
            Self::InvalidPayload => "INVALID_PAYLOAD",
            Self::InvalidDevice => "INVALID_DEVICE",
            Self::SessionMissing => "SESSION_MISSING",
            Self::UserAlreadyAssigned => "USER_ALREADY_ASSIGNED",
            Self::PersistValidation => "PERSIST_VALIDATION_FAIL",
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for EngineError {}

/// Response envelope returned by every external entry point.
///
/// `ok: true` carries optional `data`; `ok: false` carries a machine-readable
/// `code` plus a human-readable `message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Success envelope with a data payload.
    pub fn ok(data: T) -> Self {
        Self { ok: true, code: None, message: None, data: Some(data) }
    }

    /// Success envelope without data.
    pub fn ok_empty() -> Self {
        Self { ok: true, code: None, message: None, data: None }
    }

    /// Failure envelope from an error code and message.
    pub fn err(error: EngineError, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(error.as_str().to_owned()),
            message: Some(message.into()),
            data: None,
        }
    }
}

impl<T> From<EngineError> for Envelope<T> {
    fn from(error: EngineError) -> Self {
        Self::err(error, error.as_str().to_lowercase().replace('_', " "))
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

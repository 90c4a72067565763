// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical event envelope for the observability event bus.
//!
//! Every event that crosses the ingress boundary is stamped into an
//! [`Envelope`] by [`create_event`] before it is stored or published.
//! This is the one place envelope construction happens so every stored
//! or streamed record satisfies the schema invariants below.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Schema version stamped on every envelope. Consumers reject anything else.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Producer class for an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Emitted by a CLI command invocation.
    Cli,
    /// Emitted by an AI-assistant lifecycle hook.
    Hook,
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => f.write_str("cli"),
            Self::Hook => f.write_str("hook"),
        }
    }
}

/// Context a producer supplies when constructing an envelope.
#[derive(Debug, Clone)]
pub struct EventContext {
    /// Logical application label.
    pub app: String,
    /// Absolute path scoping key used by consumers to filter by project.
    pub app_root: String,
    /// Producer class.
    pub source: EventSource,
    /// Correlation id forwarded from the caller, if any.
    pub correlation_id: Option<String>,
}

/// The canonical, immutable record stored and streamed by the bus.
///
/// `type` is deliberately an owned `String`, not a closed enum: the bus is
/// forward-compatible with any non-empty dot-qualified discriminator a
/// producer or future hook chooses to send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub schema_version: String,
    pub id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub app: String,
    pub app_root: String,
    pub source: EventSource,
    pub correlation_id: String,
    pub data: serde_json::Value,
}

/// Failures raised while constructing or validating an [`Envelope`].
///
/// These are precondition violations on the producer side (missing
/// required context, or a non-object payload), not runtime faults.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum EnvelopeError {
    /// `type` was empty.
    #[error("event type must not be empty")]
    EmptyType,
    /// `context.app` was empty.
    #[error("app must not be empty")]
    EmptyApp,
    /// `context.app_root` was empty.
    #[error("appRoot must not be empty")]
    EmptyAppRoot,
    /// `data` was not a JSON object.
    #[error("event data must be a JSON object")]
    DataNotObject,
    /// `id` was empty.
    #[error("id must not be empty")]
    EmptyId,
    /// `correlationId` was empty.
    #[error("correlationId must not be empty")]
    EmptyCorrelationId,
    /// `schemaVersion` did not match [`SCHEMA_VERSION`].
    #[error("unsupported schemaVersion {0:?}")]
    UnsupportedSchemaVersion(String),
}

impl Envelope {
    /// Check every invariant from the data model: non-empty `id`/`type`/
    /// `app`/`appRoot`/`correlationId`, an object `data`, and a matching
    /// `schemaVersion`. Used to validate a caller-supplied full envelope
    /// the way [`create_event`] validates one it builds itself.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(EnvelopeError::UnsupportedSchemaVersion(
                self.schema_version.clone(),
            ));
        }
        if self.id.is_empty() {
            return Err(EnvelopeError::EmptyId);
        }
        if self.event_type.is_empty() {
            return Err(EnvelopeError::EmptyType);
        }
        if self.app.is_empty() {
            return Err(EnvelopeError::EmptyApp);
        }
        if self.app_root.is_empty() {
            return Err(EnvelopeError::EmptyAppRoot);
        }
        if self.correlation_id.is_empty() {
            return Err(EnvelopeError::EmptyCorrelationId);
        }
        if !self.data.is_object() {
            return Err(EnvelopeError::DataNotObject);
        }
        Ok(())
    }
}

/// Stamp `data` into a fully-formed [`Envelope`].
///
/// Assigns a fresh unique `id`, sets `timestamp` to the current UTC
/// instant, and fills `correlationId` from `context` if present or
/// generates a fresh short hex token otherwise.
pub fn create_event(
    event_type: impl Into<String>,
    data: serde_json::Value,
    context: &EventContext,
) -> Result<Envelope, EnvelopeError> {
    let correlation_id = match &context.correlation_id {
        Some(id) if !id.is_empty() => id.clone(),
        _ => fresh_token(),
    };

    let envelope = Envelope {
        schema_version: SCHEMA_VERSION.to_string(),
        id: fresh_id(),
        timestamp: chrono::Utc::now(),
        event_type: event_type.into(),
        app: context.app.clone(),
        app_root: context.app_root.clone(),
        source: context.source,
        correlation_id,
        data,
    };
    envelope.validate()?;
    Ok(envelope)
}

fn fresh_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn fresh_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> EventContext {
        EventContext {
            app: "oeb".into(),
            app_root: "/proj".into(),
            source: EventSource::Hook,
            correlation_id: None,
        }
    }

    #[test]
    fn stamps_schema_version() {
        let env = create_event("hook.stop", json!({}), &ctx()).unwrap();
        assert_eq!(env.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn generates_fresh_correlation_id_when_absent() {
        let env = create_event("hook.stop", json!({}), &ctx()).unwrap();
        assert!(!env.correlation_id.is_empty());
    }

    #[test]
    fn preserves_caller_correlation_id() {
        let mut context = ctx();
        context.correlation_id = Some("abc12345".into());
        let env = create_event("hook.stop", json!({}), &context).unwrap();
        assert_eq!(env.correlation_id, "abc12345");
    }

    #[test]
    fn two_envelopes_get_distinct_ids() {
        let a = create_event("hook.stop", json!({}), &ctx()).unwrap();
        let b = create_event("hook.stop", json!({}), &ctx()).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn rejects_empty_type() {
        assert_eq!(
            create_event("", json!({}), &ctx()).unwrap_err(),
            EnvelopeError::EmptyType
        );
    }

    #[test]
    fn rejects_non_object_data() {
        assert_eq!(
            create_event("hook.stop", json!([1, 2]), &ctx()).unwrap_err(),
            EnvelopeError::DataNotObject
        );
    }

    #[test]
    fn rejects_empty_app() {
        let mut context = ctx();
        context.app = String::new();
        assert_eq!(
            create_event("hook.stop", json!({}), &context).unwrap_err(),
            EnvelopeError::EmptyApp
        );
    }

    #[test]
    fn serializes_with_camel_case_field_names() {
        let env = create_event("hook.stop", json!({"a": 1}), &ctx()).unwrap();
        let value = serde_json::to_value(&env).unwrap();
        assert!(value.get("schemaVersion").is_some());
        assert!(value.get("appRoot").is_some());
        assert!(value.get("correlationId").is_some());
        assert!(value.get("type").is_some());
    }

    #[test]
    fn source_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&EventSource::Hook).unwrap(), "\"hook\"");
        assert_eq!(serde_json::to_string(&EventSource::Cli).unwrap(), "\"cli\"");
    }

    proptest::proptest! {
        #[test]
        fn every_non_empty_type_round_trips_through_json_with_a_unique_id(
            event_type in "[a-z][a-z_.]{0,40}",
        ) {
            let a = create_event(event_type.clone(), json!({}), &ctx()).unwrap();
            let b = create_event(event_type.clone(), json!({}), &ctx()).unwrap();
            proptest::prop_assert_ne!(a.id.clone(), b.id.clone());

            let value = serde_json::to_value(&a).unwrap();
            let round_tripped: Envelope = serde_json::from_value(value).unwrap();
            proptest::prop_assert_eq!(round_tripped.event_type, a.event_type);
            proptest::prop_assert_eq!(round_tripped.id, a.id);
        }
    }
}

//! engage.raw_event.v1 schema definition
//!
//! A `RawEventRecord` is a telemetry sample exactly as the client (or the event
//! store in front of it) delivered it. Every field is held as an untyped JSON
//! value so that one bad field never fails the whole batch; `validate` turns a
//! record into a typed [`RawEvent`] or explains why it must be excluded.
//!
//! Field names follow the event store columns. Numbers may arrive either as
//! JSON numbers or as decimal strings.

use crate::types::{RawEvent, SessionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Current schema version
pub const SCHEMA_VERSION: &str = "engage.raw_event.v1";

const FIELD_SCHEMA_VERSION: &str = "schema_version";
const FIELD_TIMESTAMP: &str = "timestamp";
const FIELD_SOURCE_URL: &str = "source_url";
const FIELD_SESSION_ID: &str = "session_id";
const FIELD_API_KEY: &str = "api_key";
const FIELD_Y_POSITION: &str = "y_position";
const FIELD_BOTTOM_OF_VIEWPORT: &str = "bottom_of_viewport";
const FIELD_IS_SCROLLING: &str = "is_scrolling";
const FIELD_IS_VISIBLE: &str = "is_visible";
const FIELD_WORD_COUNT: &str = "word_count";

/// A telemetry sample as received.
///
/// Deserialization never fails on valid JSON: fields are read from the object
/// by name (`time`, `scroll_depth` and `viewport_bottom` are accepted as
/// aliases, the canonical name wins when both appear) and a value that is not
/// an object is kept so that `validate` can report it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawEventRecord {
    /// Schema version identifier; optional, but must match when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<Value>,
    /// Sample time (RFC 3339)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    /// Page URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<Value>,
    /// Visit identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Value>,
    /// Tenant key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<Value>,
    /// Scroll depth in pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y_position: Option<Value>,
    /// Viewport bottom edge in pixels
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bottom_of_viewport: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_scrolling: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_visible: Option<Value>,
    /// Words in the content
    #[serde(skip_serializing_if = "Option::is_none")]
    pub word_count: Option<Value>,
    /// The received value, when it was not a JSON object
    #[serde(skip)]
    non_object: Option<Value>,
}

impl<'de> Deserialize<'de> for RawEventRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

impl RawEventRecord {
    /// Create a record with all required fields set
    pub fn new(
        timestamp: impl Into<String>,
        source_url: impl Into<String>,
        session_id: impl Into<String>,
        api_key: impl Into<String>,
        y_position: f64,
        bottom_of_viewport: f64,
    ) -> Self {
        RawEventRecord {
            schema_version: Some(Value::String(SCHEMA_VERSION.to_string())),
            timestamp: Some(Value::String(timestamp.into())),
            source_url: Some(Value::String(source_url.into())),
            session_id: Some(Value::String(session_id.into())),
            api_key: Some(Value::String(api_key.into())),
            y_position: Some(Value::from(y_position)),
            bottom_of_viewport: Some(Value::from(bottom_of_viewport)),
            is_scrolling: None,
            is_visible: None,
            word_count: None,
            non_object: None,
        }
    }

    /// Read a record out of an arbitrary JSON value
    pub fn from_value(value: Value) -> Self {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                return RawEventRecord {
                    non_object: Some(other),
                    ..Default::default()
                }
            }
        };

        RawEventRecord {
            schema_version: take_field(&mut fields, &[FIELD_SCHEMA_VERSION]),
            timestamp: take_field(&mut fields, &[FIELD_TIMESTAMP, "time"]),
            source_url: take_field(&mut fields, &[FIELD_SOURCE_URL]),
            session_id: take_field(&mut fields, &[FIELD_SESSION_ID]),
            api_key: take_field(&mut fields, &[FIELD_API_KEY]),
            y_position: take_field(&mut fields, &[FIELD_Y_POSITION, "scroll_depth"]),
            bottom_of_viewport: take_field(
                &mut fields,
                &[FIELD_BOTTOM_OF_VIEWPORT, "viewport_bottom"],
            ),
            is_scrolling: take_field(&mut fields, &[FIELD_IS_SCROLLING]),
            is_visible: take_field(&mut fields, &[FIELD_IS_VISIBLE]),
            word_count: take_field(&mut fields, &[FIELD_WORD_COUNT]),
            non_object: None,
        }
    }

    /// Set the scrolling and visibility flags
    pub fn with_flags(mut self, is_scrolling: bool, is_visible: bool) -> Self {
        self.is_scrolling = Some(Value::Bool(is_scrolling));
        self.is_visible = Some(Value::Bool(is_visible));
        self
    }

    /// Set the content word count
    pub fn with_word_count(mut self, word_count: f64) -> Self {
        self.word_count = Some(Value::from(word_count));
        self
    }

    /// Session key, if both key fields are readable strings
    pub fn session_key(&self) -> Option<SessionKey> {
        let source_url = required_string(&self.source_url, FIELD_SOURCE_URL).ok()?;
        let session_id = required_string(&self.session_id, FIELD_SESSION_ID).ok()?;
        Some(SessionKey::new(source_url, session_id))
    }

    /// Validate the record and convert it to a typed event
    pub fn validate(&self) -> Result<RawEvent, ValidationError> {
        if let Some(value) = &self.non_object {
            return Err(ValidationError::NotAnObject {
                value: value.to_string(),
            });
        }

        if self.schema_version.is_some() {
            let version = required_string(&self.schema_version, FIELD_SCHEMA_VERSION)?;
            if version != SCHEMA_VERSION {
                return Err(ValidationError::UnsupportedSchemaVersion {
                    expected: SCHEMA_VERSION.to_string(),
                    actual: version,
                });
            }
        }

        let timestamp = parse_timestamp(&self.timestamp)?;
        let source_url = required_string(&self.source_url, FIELD_SOURCE_URL)?;
        let session_id = required_string(&self.session_id, FIELD_SESSION_ID)?;
        let api_key = required_string(&self.api_key, FIELD_API_KEY)?;
        let scroll_depth = required_number(&self.y_position, FIELD_Y_POSITION)?;
        let viewport_bottom = required_number(&self.bottom_of_viewport, FIELD_BOTTOM_OF_VIEWPORT)?;
        let is_scrolling = optional_bool(&self.is_scrolling, FIELD_IS_SCROLLING)?;
        let is_visible = optional_bool(&self.is_visible, FIELD_IS_VISIBLE)?;

        let word_count = optional_number(&self.word_count, FIELD_WORD_COUNT)?;
        if let Some(count) = word_count {
            if count < 0.0 {
                return Err(ValidationError::NegativeWordCount { value: count });
            }
        }

        Ok(RawEvent {
            timestamp,
            session_key: SessionKey::new(source_url, session_id),
            api_key,
            scroll_depth,
            viewport_bottom,
            is_scrolling,
            is_visible,
            word_count,
        })
    }
}

/// Validation errors for raw event records
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Event must be a JSON object, got {value}")]
    NotAnObject { value: String },

    #[error("Unsupported schema version: expected {expected}, got {actual}")]
    UnsupportedSchemaVersion { expected: String, actual: String },

    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Field {field} must be a string, got {value}")]
    NotAString { field: &'static str, value: String },

    #[error("Field {field} is not numeric: {value}")]
    NonNumeric { field: &'static str, value: String },

    #[error("Field {field} is not a finite number: {value}")]
    NonFinite { field: &'static str, value: String },

    #[error("Field {field} must be a boolean, got {value}")]
    NonBoolean { field: &'static str, value: String },

    #[error("Unparsable timestamp: {value}")]
    InvalidTimestamp { value: String },

    #[error("Word count must not be negative, got {value}")]
    NegativeWordCount { value: f64 },
}

/// First non-null value stored under any of `names`
fn take_field(fields: &mut Map<String, Value>, names: &[&str]) -> Option<Value> {
    names
        .iter()
        .filter_map(|name| fields.remove(*name))
        .find(|v| !v.is_null())
}

fn required_string(value: &Option<Value>, field: &'static str) -> Result<String, ValidationError> {
    match value {
        None => Err(ValidationError::MissingField { field }),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(ValidationError::MissingField { field })
        }
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(ValidationError::NotAString {
            field,
            value: other.to_string(),
        }),
    }
}

fn required_number(value: &Option<Value>, field: &'static str) -> Result<f64, ValidationError> {
    optional_number(value, field)?.ok_or(ValidationError::MissingField { field })
}

fn optional_number(
    value: &Option<Value>,
    field: &'static str,
) -> Result<Option<f64>, ValidationError> {
    let Some(raw) = value else {
        return Ok(None);
    };
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    match parsed {
        Some(n) if n.is_finite() => Ok(Some(n)),
        Some(_) => Err(ValidationError::NonFinite {
            field,
            value: raw.to_string(),
        }),
        None => Err(ValidationError::NonNumeric {
            field,
            value: raw.to_string(),
        }),
    }
}

fn optional_bool(value: &Option<Value>, field: &'static str) -> Result<bool, ValidationError> {
    match value {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(ValidationError::NonBoolean {
            field,
            value: other.to_string(),
        }),
    }
}

fn parse_timestamp(value: &Option<Value>) -> Result<DateTime<Utc>, ValidationError> {
    match value {
        None => Err(ValidationError::MissingField {
            field: FIELD_TIMESTAMP,
        }),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s.trim())
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| ValidationError::InvalidTimestamp { value: s.clone() }),
        Some(other) => Err(ValidationError::InvalidTimestamp {
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn valid_record() -> RawEventRecord {
        RawEventRecord::new(
            "2024-01-15T14:00:00Z",
            "https://example.com/post",
            "sess-1",
            "key-1",
            120.0,
            900.0,
        )
        .with_flags(true, true)
        .with_word_count(540.0)
    }

    #[test]
    fn test_validate_builder_record() {
        let event = valid_record().validate().unwrap();

        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
        );
        assert_eq!(event.session_key.source_url, "https://example.com/post");
        assert_eq!(event.session_key.session_id, "sess-1");
        assert_eq!(event.api_key, "key-1");
        assert_eq!(event.scroll_depth, 120.0);
        assert_eq!(event.viewport_bottom, 900.0);
        assert!(event.is_scrolling && event.is_visible);
        assert_eq!(event.word_count, Some(540.0));
    }

    #[test]
    fn test_deserialize_store_row() {
        // Column names and string-encoded numbers as the event store returns them
        let json = r#"{
            "time": "2024-01-15T14:00:02+01:00",
            "source_url": "https://example.com/post",
            "session_id": "abc",
            "api_key": "key-1",
            "y_position": "250.5",
            "bottom_of_viewport": 900,
            "is_scrolling": true,
            "is_visible": false,
            "word_count": "1200"
        }"#;

        let record: RawEventRecord = serde_json::from_str(json).unwrap();
        let event = record.validate().unwrap();

        assert_eq!(
            event.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 13, 0, 2).unwrap()
        );
        assert_eq!(event.scroll_depth, 250.5);
        assert_eq!(event.viewport_bottom, 900.0);
        assert!(event.is_scrolling);
        assert!(!event.is_visible);
        assert_eq!(event.word_count, Some(1200.0));
    }

    #[test]
    fn test_deserialize_field_aliases() {
        let json = r#"{
            "timestamp": "2024-01-15T14:00:00Z",
            "source_url": "https://example.com/post",
            "session_id": "abc",
            "api_key": "key-1",
            "scroll_depth": 10,
            "viewport_bottom": 20
        }"#;

        let record: RawEventRecord = serde_json::from_str(json).unwrap();
        let event = record.validate().unwrap();
        assert_eq!(event.scroll_depth, 10.0);
        assert_eq!(event.viewport_bottom, 20.0);
        assert!(!event.is_scrolling);
        assert!(!event.is_visible);
        assert_eq!(event.word_count, None);
    }

    #[test]
    fn test_non_numeric_scroll_depth_rejected() {
        let mut record = valid_record();
        record.y_position = Some(Value::String("halfway".to_string()));

        let err = record.validate().unwrap_err();
        assert!(matches!(
            err,
            ValidationError::NonNumeric {
                field: "y_position",
                ..
            }
        ));
        // Key is still readable for reporting
        assert_eq!(record.session_key().unwrap().session_id, "sess-1");
    }

    #[test]
    fn test_non_finite_string_rejected() {
        let mut record = valid_record();
        record.bottom_of_viewport = Some(Value::String("NaN".to_string()));

        assert!(matches!(
            record.validate(),
            Err(ValidationError::NonFinite {
                field: "bottom_of_viewport",
                ..
            })
        ));
    }

    #[test]
    fn test_unparsable_timestamp_rejected() {
        let mut record = valid_record();
        record.timestamp = Some(Value::String("yesterday".to_string()));
        assert!(matches!(
            record.validate(),
            Err(ValidationError::InvalidTimestamp { .. })
        ));

        record.timestamp = Some(Value::from(1705327200));
        assert!(matches!(
            record.validate(),
            Err(ValidationError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn test_missing_and_null_fields() {
        let json = r#"{
            "timestamp": "2024-01-15T14:00:00Z",
            "source_url": "https://example.com/post",
            "session_id": null,
            "api_key": "key-1",
            "y_position": 1,
            "bottom_of_viewport": 2
        }"#;
        let record: RawEventRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            record.validate(),
            Err(ValidationError::MissingField {
                field: "session_id"
            })
        );
        assert!(record.session_key().is_none());

        let mut record = valid_record();
        record.api_key = Some(Value::String("   ".to_string()));
        assert_eq!(
            record.validate(),
            Err(ValidationError::MissingField { field: "api_key" })
        );
    }

    #[test]
    fn test_wrong_types_rejected() {
        let mut record = valid_record();
        record.api_key = Some(Value::from(42));
        assert!(matches!(
            record.validate(),
            Err(ValidationError::NotAString {
                field: "api_key",
                ..
            })
        ));

        let mut record = valid_record();
        record.is_visible = Some(Value::String("yes".to_string()));
        assert!(matches!(
            record.validate(),
            Err(ValidationError::NonBoolean {
                field: "is_visible",
                ..
            })
        ));
    }

    #[test]
    fn test_negative_word_count_rejected() {
        let record = valid_record().with_word_count(-5.0);
        assert_eq!(
            record.validate(),
            Err(ValidationError::NegativeWordCount { value: -5.0 })
        );
    }

    #[test]
    fn test_schema_version_mismatch() {
        let mut record = valid_record();
        record.schema_version = Some(Value::String("engage.raw_event.v0".to_string()));
        assert!(matches!(
            record.validate(),
            Err(ValidationError::UnsupportedSchemaVersion { .. })
        ));

        record.schema_version = Some(Value::from(1));
        assert!(matches!(
            record.validate(),
            Err(ValidationError::NotAString {
                field: "schema_version",
                ..
            })
        ));

        record.schema_version = None;
        assert!(record.validate().is_ok());
    }

    #[test]
    fn test_time_and_timestamp_together_prefer_timestamp() {
        let json = r#"{
            "time": "2024-01-15T15:00:00Z",
            "timestamp": "2024-01-15T14:00:00Z",
            "source_url": "https://example.com/post",
            "session_id": "abc",
            "api_key": "key-1",
            "y_position": 1,
            "bottom_of_viewport": 2
        }"#;

        let record: RawEventRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            record.validate().unwrap().timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_null_canonical_field_falls_back_to_alias() {
        let json = r#"{"timestamp": null, "time": "2024-01-15T14:00:00Z"}"#;
        let record: RawEventRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            record.timestamp,
            Some(Value::String("2024-01-15T14:00:00Z".to_string()))
        );
    }

    #[test]
    fn test_non_object_value_is_kept_for_validation() {
        let record: RawEventRecord = serde_json::from_str("42").unwrap();

        assert_eq!(
            record.validate(),
            Err(ValidationError::NotAnObject {
                value: "42".to_string()
            })
        );
        assert!(record.session_key().is_none());
    }

    #[test]
    fn test_serialize_round_trip_keeps_fields() {
        let record = valid_record();
        let json = serde_json::to_string(&record).unwrap();

        assert!(json.contains("engage.raw_event.v1"));
        assert!(json.contains("\"y_position\":120.0"));
        assert!(!json.contains("scroll_depth"));

        let parsed: RawEventRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_validation_error_serializes_with_kind() {
        let err = ValidationError::MissingField { field: "api_key" };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "missing_field");
        assert_eq!(json["field"], "api_key");
    }
}

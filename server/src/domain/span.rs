//! Span model
//!
//! Identity and relationship data for a single span, plus the opaque fields
//! that are carried through ingestion untouched. Built from OTLP wire spans.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use opentelemetry_proto::tonic::trace::v1::Span as OtlpSpan;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::utils::otlp::extract_attributes;

/// Maximum number of tracestate list members kept (W3C limit)
const TRACESTATE_MAX_MEMBERS: usize = 32;

/// Error converting wire data into a [`Span`]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpanError {
    #[error("invalid trace id: expected 16 bytes, got {0}")]
    InvalidTraceId(usize),

    #[error("invalid span id: expected 8 bytes, got {0}")]
    InvalidSpanId(usize),

    #[error("invalid parent span id: expected 8 bytes, got {0}")]
    InvalidParentSpanId(usize),

    #[error("trace id must not be all zeros")]
    ZeroTraceId,

    #[error("span id must not be all zeros")]
    ZeroSpanId,

    #[error("invalid hex id '{0}'")]
    InvalidHex(String),
}

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// 16-byte trace identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TraceId([u8; 16]);

/// 8-byte span identifier
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SpanId([u8; 8]);

impl TraceId {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Parse from a wire byte slice (must be exactly 16 bytes, not all zeros)
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SpanError> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| SpanError::InvalidTraceId(bytes.len()))?;
        let id = Self(arr);
        if id.is_zero() {
            return Err(SpanError::ZeroTraceId);
        }
        Ok(id)
    }
}

impl SpanId {
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Parse from a wire byte slice (must be exactly 8 bytes, not all zeros)
    pub fn from_slice(bytes: &[u8]) -> Result<Self, SpanError> {
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| SpanError::InvalidSpanId(bytes.len()))?;
        let id = Self(arr);
        if id.is_zero() {
            return Err(SpanError::ZeroSpanId);
        }
        Ok(id)
    }

    /// Parse a parent span id. Empty or all-zero input means "no parent".
    pub fn parent_from_slice(bytes: &[u8]) -> Result<Option<Self>, SpanError> {
        if bytes.is_empty() {
            return Ok(None);
        }
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| SpanError::InvalidParentSpanId(bytes.len()))?;
        let id = Self(arr);
        Ok(if id.is_zero() { None } else { Some(id) })
    }
}

macro_rules! hex_id_impls {
    ($ty:ident, $len:expr) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($ty), hex::encode(self.0))
            }
        }

        impl FromStr for $ty {
            type Err = SpanError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; $len];
                hex::decode_to_slice(s, &mut bytes)
                    .map_err(|_| SpanError::InvalidHex(s.to_string()))?;
                Ok(Self(bytes))
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }
    };
}

hex_id_impls!(TraceId, 16);
hex_id_impls!(SpanId, 8);

// ============================================================================
// TRACESTATE
// ============================================================================

/// W3C tracestate propagated alongside a span (ordered key/value members)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tracestate(Vec<(String, String)>);

impl Tracestate {
    /// Parse the `key1=value1,key2=value2` header form.
    ///
    /// Malformed members are skipped and at most 32 members are kept.
    pub fn parse(raw: &str) -> Self {
        let entries = raw
            .split(',')
            .map(str::trim)
            .filter(|member| !member.is_empty())
            .filter_map(|member| {
                let (key, value) = member.split_once('=')?;
                let (key, value) = (key.trim(), value.trim());
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), value.to_string()))
            })
            .take(TRACESTATE_MAX_MEMBERS)
            .collect();
        Self(entries)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

// ============================================================================
// SPAN
// ============================================================================

/// Span kind, mirrors the OTLP enumeration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    #[default]
    Unspecified,
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

impl From<i32> for SpanKind {
    fn from(kind: i32) -> Self {
        match kind {
            1 => Self::Internal,
            2 => Self::Server,
            3 => Self::Client,
            4 => Self::Producer,
            5 => Self::Consumer,
            _ => Self::Unspecified,
        }
    }
}

/// Span status code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}

impl From<i32> for SpanStatus {
    fn from(code: i32) -> Self {
        match code {
            1 => Self::Ok,
            2 => Self::Error,
            _ => Self::Unset,
        }
    }
}

/// A received span. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    /// `None` marks a root candidate
    pub parent_span_id: Option<SpanId>,
    pub tracestate: Tracestate,
    pub name: String,
    pub kind: SpanKind,
    pub status: SpanStatus,
    pub start_time_unix_nano: u64,
    pub end_time_unix_nano: u64,
    pub attributes: HashMap<String, String>,
}

impl Span {
    /// Create a span carrying only identity data
    pub fn new(trace_id: TraceId, span_id: SpanId, parent_span_id: Option<SpanId>) -> Self {
        Self {
            trace_id,
            span_id,
            parent_span_id,
            tracestate: Tracestate::default(),
            name: String::new(),
            kind: SpanKind::Unspecified,
            status: SpanStatus::Unset,
            start_time_unix_nano: 0,
            end_time_unix_nano: 0,
            attributes: HashMap::new(),
        }
    }

    /// Convert an OTLP wire span
    pub fn from_otlp(span: &OtlpSpan) -> Result<Self, SpanError> {
        Ok(Self {
            trace_id: TraceId::from_slice(&span.trace_id)?,
            span_id: SpanId::from_slice(&span.span_id)?,
            parent_span_id: SpanId::parent_from_slice(&span.parent_span_id)?,
            tracestate: Tracestate::parse(&span.trace_state),
            name: span.name.clone(),
            kind: SpanKind::from(span.kind),
            status: span
                .status
                .as_ref()
                .map(|st| SpanStatus::from(st.code))
                .unwrap_or_default(),
            start_time_unix_nano: span.start_time_unix_nano,
            end_time_unix_nano: span.end_time_unix_nano,
            attributes: extract_attributes(&span.attributes),
        })
    }

    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }

    /// Wall-clock duration, `None` when the timestamps are missing or inverted
    pub fn duration(&self) -> Option<Duration> {
        if self.start_time_unix_nano == 0 || self.end_time_unix_nano < self.start_time_unix_nano {
            return None;
        }
        Some(Duration::from_nanos(
            self.end_time_unix_nano - self.start_time_unix_nano,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_proto::tonic::common::v1::{AnyValue, KeyValue, any_value};
    use opentelemetry_proto::tonic::trace::v1::Status;

    fn otlp_span(trace_id: Vec<u8>, span_id: Vec<u8>, parent: Vec<u8>) -> OtlpSpan {
        OtlpSpan {
            trace_id,
            span_id,
            parent_span_id: parent,
            ..Default::default()
        }
    }

    #[test]
    fn test_from_otlp_root_with_empty_parent() {
        let span = Span::from_otlp(&otlp_span(vec![1; 16], vec![2; 8], vec![])).unwrap();
        assert_eq!(span.trace_id, TraceId::from_bytes([1; 16]));
        assert_eq!(span.span_id, SpanId::from_bytes([2; 8]));
        assert!(span.is_root());
    }

    #[test]
    fn test_from_otlp_all_zero_parent_is_root() {
        let span = Span::from_otlp(&otlp_span(vec![1; 16], vec![2; 8], vec![0; 8])).unwrap();
        assert!(span.is_root());
    }

    #[test]
    fn test_from_otlp_child() {
        let span = Span::from_otlp(&otlp_span(vec![1; 16], vec![2; 8], vec![3; 8])).unwrap();
        assert_eq!(span.parent_span_id, Some(SpanId::from_bytes([3; 8])));
        assert!(!span.is_root());
    }

    #[test]
    fn test_from_otlp_rejects_bad_lengths() {
        assert_eq!(
            Span::from_otlp(&otlp_span(vec![1; 15], vec![2; 8], vec![])),
            Err(SpanError::InvalidTraceId(15))
        );
        assert_eq!(
            Span::from_otlp(&otlp_span(vec![1; 16], vec![2; 4], vec![])),
            Err(SpanError::InvalidSpanId(4))
        );
        assert_eq!(
            Span::from_otlp(&otlp_span(vec![1; 16], vec![2; 8], vec![3; 9])),
            Err(SpanError::InvalidParentSpanId(9))
        );
    }

    #[test]
    fn test_from_otlp_rejects_zero_ids() {
        assert_eq!(
            Span::from_otlp(&otlp_span(vec![0; 16], vec![2; 8], vec![])),
            Err(SpanError::ZeroTraceId)
        );
        assert_eq!(
            Span::from_otlp(&otlp_span(vec![1; 16], vec![0; 8], vec![])),
            Err(SpanError::ZeroSpanId)
        );
    }

    #[test]
    fn test_from_otlp_carries_opaque_fields() {
        let mut wire = otlp_span(vec![1; 16], vec![2; 8], vec![]);
        wire.name = "GET /books".to_string();
        wire.kind = 2;
        wire.trace_state = "congo=t61rcWkgMzE,rojo=00f067aa0ba902b7".to_string();
        wire.status = Some(Status {
            message: "boom".to_string(),
            code: 2,
        });
        wire.start_time_unix_nano = 1_000;
        wire.end_time_unix_nano = 5_000;
        wire.attributes = vec![KeyValue {
            key: "http.method".to_string(),
            value: Some(AnyValue {
                value: Some(any_value::Value::StringValue("GET".to_string())),
            }),
        }];

        let span = Span::from_otlp(&wire).unwrap();
        assert_eq!(span.name, "GET /books");
        assert_eq!(span.kind, SpanKind::Server);
        assert_eq!(span.status, SpanStatus::Error);
        assert_eq!(span.tracestate.get("rojo"), Some("00f067aa0ba902b7"));
        assert_eq!(span.duration(), Some(Duration::from_nanos(4_000)));
        assert_eq!(span.attributes.get("http.method").map(String::as_str), Some("GET"));
    }

    #[test]
    fn test_tracestate_parse_skips_malformed_members() {
        let ts = Tracestate::parse(" a=1 , ,=x,novalue, b = 2 ");
        assert_eq!(
            ts.entries(),
            &[
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
        assert!(Tracestate::parse("").is_empty());
    }

    #[test]
    fn test_tracestate_member_limit() {
        let raw: Vec<String> = (0..40).map(|i| format!("k{}=v", i)).collect();
        assert_eq!(Tracestate::parse(&raw.join(",")).entries().len(), 32);
    }

    #[test]
    fn test_id_hex_display_and_parse() {
        let id = SpanId::from_bytes([0xab; 8]);
        assert_eq!(id.to_string(), "abababababababab");
        assert_eq!("abababababababab".parse::<SpanId>().unwrap(), id);
        assert!("xyz".parse::<TraceId>().is_err());
        assert_eq!(
            serde_json::to_string(&TraceId::from_bytes([1; 16])).unwrap(),
            "\"01010101010101010101010101010101\""
        );
    }

    #[test]
    fn test_duration_missing_timestamps() {
        let span = Span::new(TraceId::from_bytes([1; 16]), SpanId::from_bytes([1; 8]), None);
        assert_eq!(span.duration(), None);
    }
}

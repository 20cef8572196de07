//! Event rows, internal event vocabulary, and scalar comparison operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of an ingested event. Track events carry behavioral payloads,
/// identify events carry user traits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Track,
    Identify,
}

/// Which flavor of computed property an id refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputedPropertyKind {
    Segment,
    UserProperty,
}

/// One row returned by the event store. Rows may be re-delivered; all
/// downstream merges must stay idempotent under duplicate `message_id`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRow {
    pub event_type: EventType,
    pub event_name: String,
    pub event_time: DateTime<Utc>,
    pub processing_time: DateTime<Utc>,
    pub message_id: String,
    pub user_id: String,
    pub anonymous_id: Option<String>,
    pub properties: serde_json::Value,
}

/// Internal track events the engine itself understands. These are produced
/// by the messaging and subscription-management paths and consumed here to
/// back subscription-group, broadcast, email, and manual-segment nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalEvent {
    SubscriptionChange,
    BroadcastSent,
    EmailSent,
    EmailDelivered,
    EmailOpened,
    EmailClicked,
    EmailBounced,
    ManualSegmentUpdate,
}

impl InternalEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            InternalEvent::SubscriptionChange => "pulse_subscription_change",
            InternalEvent::BroadcastSent => "pulse_broadcast_sent",
            InternalEvent::EmailSent => "pulse_email_sent",
            InternalEvent::EmailDelivered => "pulse_email_delivered",
            InternalEvent::EmailOpened => "pulse_email_opened",
            InternalEvent::EmailClicked => "pulse_email_clicked",
            InternalEvent::EmailBounced => "pulse_email_bounced",
            InternalEvent::ManualSegmentUpdate => "pulse_manual_segment_update",
        }
    }
}

/// Action recorded by a subscription-change internal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionAction {
    Subscribe,
    Unsubscribe,
}

impl SubscriptionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionAction::Subscribe => "subscribe",
            SubscriptionAction::Unsubscribe => "unsubscribe",
        }
    }
}

/// Operation recorded by a manual-segment-update internal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManualSegmentOperation {
    Add,
    Remove,
}

impl ManualSegmentOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManualSegmentOperation::Add => "add",
            ManualSegmentOperation::Remove => "remove",
        }
    }
}

/// Scalar comparison operators usable in property filters and trait
/// conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueOperator {
    Equals,
    NotEquals,
    Exists,
    NotExists,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
}

/// Compares an extracted JSON value (`None` when the path was absent)
/// against an expected value. Absence satisfies `NotEquals` and
/// `NotExists`; every other operator requires a present value.
pub fn compare_values(
    actual: Option<&serde_json::Value>,
    operator: ValueOperator,
    expected: &serde_json::Value,
) -> bool {
    let actual = match actual {
        Some(v) if !v.is_null() => v,
        _ => {
            return matches!(
                operator,
                ValueOperator::NotEquals | ValueOperator::NotExists
            )
        }
    };
    match operator {
        ValueOperator::Equals => loose_eq(actual, expected),
        ValueOperator::NotEquals => !loose_eq(actual, expected),
        ValueOperator::Exists => true,
        ValueOperator::NotExists => false,
        ValueOperator::GreaterThan => {
            numeric_cmp(actual, expected) == Some(std::cmp::Ordering::Greater)
        }
        ValueOperator::GreaterThanOrEqual => {
            matches!(
                numeric_cmp(actual, expected),
                Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
            )
        }
        ValueOperator::LessThan => numeric_cmp(actual, expected) == Some(std::cmp::Ordering::Less),
        ValueOperator::LessThanOrEqual => {
            matches!(
                numeric_cmp(actual, expected),
                Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
            )
        }
    }
}

/// Equality that tolerates number-vs-string representation drift in event
/// payloads ("42" equals 42).
fn loose_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    if a == b {
        return true;
    }
    match (scalar_repr(a), scalar_repr(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

fn scalar_repr(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn numeric_cmp(a: &serde_json::Value, b: &serde_json::Value) -> Option<std::cmp::Ordering> {
    let a_num = as_f64(a)?;
    let b_num = as_f64(b)?;
    a_num.partial_cmp(&b_num)
}

fn as_f64(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_equals_tolerates_string_numbers() {
        assert!(compare_values(
            Some(&json!("42")),
            ValueOperator::Equals,
            &json!(42)
        ));
        assert!(!compare_values(
            Some(&json!("42")),
            ValueOperator::NotEquals,
            &json!(42)
        ));
    }

    #[test]
    fn test_absent_value_satisfies_only_negative_operators() {
        assert!(compare_values(None, ValueOperator::NotEquals, &json!(1)));
        assert!(compare_values(None, ValueOperator::NotExists, &json!(null)));
        assert!(!compare_values(None, ValueOperator::Equals, &json!(1)));
        assert!(!compare_values(None, ValueOperator::Exists, &json!(null)));
        assert!(!compare_values(
            None,
            ValueOperator::GreaterThan,
            &json!(0)
        ));
    }

    #[test]
    fn test_numeric_ordering() {
        assert!(compare_values(
            Some(&json!(7)),
            ValueOperator::GreaterThanOrEqual,
            &json!(7)
        ));
        assert!(compare_values(
            Some(&json!("3.5")),
            ValueOperator::LessThan,
            &json!(4)
        ));
        assert!(!compare_values(
            Some(&json!("abc")),
            ValueOperator::LessThan,
            &json!(4)
        ));
    }
}

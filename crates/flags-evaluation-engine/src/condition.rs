//! Attribute comparators and target-list matching.
//!
//! Every comparator is total: a type mismatch on either side yields `false`,
//! never an error. The negated comparators spell out their own undefined-side
//! behavior rather than blanket-inverting, matching the wire semantics.

use crate::model::{Comparator, Entities, TargetList};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;

/// Resolves an entity path (`[kind, attribute, ...]`) to a value. The first
/// two segments index the entities mapping; any remaining segments descend
/// into nested JSON objects.
pub(crate) fn resolve_path<'a>(entities: Option<&'a Entities>, path: &[String]) -> Option<&'a Value> {
    let entities = entities?;
    let (kind, rest) = path.split_first()?;
    let (attribute, nested) = rest.split_first()?;
    let mut value = entities.get(kind)?.get(attribute)?;
    for segment in nested {
        value = value.as_object()?.get(segment)?;
    }
    Some(value)
}

/// Applies one attribute comparator. `lhs` is the resolved entity value
/// (`None` when the path did not resolve), `rhs` the literal from the rule.
pub(crate) fn compare(op: Comparator, lhs: Option<&Value>, rhs: Option<&Value>) -> bool {
    match op {
        Comparator::Eq => match lhs {
            Some(l) => rhs.is_some_and(|r| primitive_eq(l, r)),
            None => false,
        },
        Comparator::NotEq => match lhs {
            Some(l) => !rhs.is_some_and(|r| primitive_eq(l, r)),
            None => true,
        },
        Comparator::OneOf => one_of(lhs, rhs),
        Comparator::NotOneOf => match lhs {
            Some(_) => rhs.is_some_and(|r| r.is_array()) && !one_of(lhs, rhs),
            None => false,
        },
        Comparator::ContainsAllOf => with_arrays(lhs, rhs, |l, r| {
            r.iter().all(|needle| l.iter().any(|v| primitive_eq(v, needle)))
        }),
        Comparator::ContainsAnyOf => with_arrays(lhs, rhs, |l, r| {
            r.iter().any(|needle| l.iter().any(|v| primitive_eq(v, needle)))
        }),
        Comparator::ContainsNoneOf => match rhs.and_then(Value::as_array) {
            Some(r) => match lhs.and_then(Value::as_array) {
                Some(l) => !r.iter().any(|needle| l.iter().any(|v| primitive_eq(v, needle))),
                None => true,
            },
            None => false,
        },
        Comparator::StartsWith => with_strings(lhs, rhs, |l, r| l.starts_with(r)),
        Comparator::NotStartsWith => with_strings(lhs, rhs, |l, r| !l.starts_with(r)),
        Comparator::EndsWith => with_strings(lhs, rhs, |l, r| l.ends_with(r)),
        Comparator::NotEndsWith => with_strings(lhs, rhs, |l, r| !l.ends_with(r)),
        Comparator::Exists => lhs.is_some_and(|l| !l.is_null()),
        Comparator::NotExists => !lhs.is_some_and(|l| !l.is_null()),
        Comparator::Gt => ordered(lhs, rhs, |o| o == std::cmp::Ordering::Greater),
        Comparator::Gte => ordered(lhs, rhs, |o| o != std::cmp::Ordering::Less),
        Comparator::Lt => ordered(lhs, rhs, |o| o == std::cmp::Ordering::Less),
        Comparator::Lte => ordered(lhs, rhs, |o| o != std::cmp::Ordering::Greater),
        Comparator::Regex => regex_match(lhs, rhs).unwrap_or(false),
        Comparator::NotRegex => regex_match(lhs, rhs).map(|m| !m).unwrap_or(false),
        Comparator::Before => datetime_ordered(lhs, rhs, |o| o == std::cmp::Ordering::Less),
        Comparator::After => datetime_ordered(lhs, rhs, |o| o == std::cmp::Ordering::Greater),
        // Segment membership is dispatched before attribute comparison.
        Comparator::SegmentOneOf | Comparator::SegmentNotOneOf => false,
    }
}

/// Strict equality on primitives only; objects and arrays never compare equal.
fn primitive_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Bool(l), Value::Bool(r)) => l == r,
        (Value::String(l), Value::String(r)) => l == r,
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => false,
        },
        _ => false,
    }
}

fn one_of(lhs: Option<&Value>, rhs: Option<&Value>) -> bool {
    match (lhs, rhs.and_then(Value::as_array)) {
        (Some(l), Some(candidates)) => candidates.iter().any(|c| primitive_eq(l, c)),
        _ => false,
    }
}

fn with_arrays(
    lhs: Option<&Value>,
    rhs: Option<&Value>,
    check: impl Fn(&[Value], &[Value]) -> bool,
) -> bool {
    match (lhs.and_then(Value::as_array), rhs.and_then(Value::as_array)) {
        (Some(l), Some(r)) => check(l, r),
        _ => false,
    }
}

fn with_strings(
    lhs: Option<&Value>,
    rhs: Option<&Value>,
    check: impl Fn(&str, &str) -> bool,
) -> bool {
    match (lhs.and_then(Value::as_str), rhs.and_then(Value::as_str)) {
        (Some(l), Some(r)) => check(l, r),
        _ => false,
    }
}

/// Strict ordering over numbers, or strings lexicographically. Mixed or
/// missing sides never order.
fn ordered(
    lhs: Option<&Value>,
    rhs: Option<&Value>,
    check: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    let (Some(l), Some(r)) = (lhs, rhs) else {
        return false;
    };
    match (l, r) {
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => l.partial_cmp(&r).map(&check).unwrap_or(false),
            _ => false,
        },
        (Value::String(l), Value::String(r)) => check(l.as_str().cmp(r.as_str())),
        _ => false,
    }
}

/// `rhs` is `{"type": "regex", "pattern": ..., "flags": ...}`. Compiled on
/// use; a pattern that fails to compile fails the condition.
fn regex_match(lhs: Option<&Value>, rhs: Option<&Value>) -> Option<bool> {
    let subject = lhs.and_then(Value::as_str)?;
    let spec = rhs.and_then(Value::as_object)?;
    let pattern = spec.get("pattern").and_then(Value::as_str)?;
    let flags = spec.get("flags").and_then(Value::as_str).unwrap_or("");

    let mut builder = regex::RegexBuilder::new(pattern);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            _ => &mut builder,
        };
    }
    let compiled = builder.build().ok()?;
    Some(compiled.is_match(subject))
}

fn datetime_ordered(
    lhs: Option<&Value>,
    rhs: Option<&Value>,
    check: impl Fn(std::cmp::Ordering) -> bool,
) -> bool {
    match (
        lhs.and_then(Value::as_str).and_then(parse_datetime),
        rhs.and_then(Value::as_str).and_then(parse_datetime),
    ) {
        (Some(l), Some(r)) => check(l.cmp(&r)),
        _ => false,
    }
}

/// RFC 3339 first, then the lenient date-time and date-only shapes producers
/// are known to emit. Naive timestamps are taken as UTC.
fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Some(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(parsed.and_utc());
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(parsed.and_utc());
    }
    if let Ok(parsed) = NaiveDate::parse_from_str(input, "%Y-%m-%d") {
        return Some(parsed.and_hms_opt(0, 0, 0)?.and_utc());
    }
    None
}

/// A target list matches when any listed `(kind, attribute)` value equals the
/// entity's string attribute. An empty target list matches nothing.
pub(crate) fn matches_target_list(target_list: &TargetList, entities: Option<&Entities>) -> bool {
    let Some(entities) = entities else {
        return false;
    };
    target_list.iter().any(|(kind, attributes)| {
        attributes.iter().any(|(attribute, values)| {
            entities
                .get(kind)
                .and_then(|attrs| attrs.get(attribute))
                .and_then(Value::as_str)
                .is_some_and(|actual| values.iter().any(|candidate| candidate == actual))
        })
    })
}

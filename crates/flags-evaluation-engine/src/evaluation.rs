//! The deterministic flag evaluator.
//!
//! [`evaluate`] is a pure function of its inputs: no I/O, no logging, and no
//! panics for expected failures. Anything that can go wrong with the
//! configuration itself (missing environment, dangling `reuse`, out-of-range
//! variant index) comes back as an error-shaped [`Evaluation`], never as a
//! panic or `Err`.

use crate::condition::{compare, matches_target_list, resolve_path};
use crate::hash::{hash32, passes_promille, weighted_bucket};
use crate::model::{
    Comparator, Condition, ConditionLhs, Entities, EnvironmentConfig, FlagDefinition, Outcome,
    Segment, SegmentOutcome, SEGMENT_KEYWORD,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// Why the evaluator chose the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Paused,
    TargetMatch,
    RuleMatch,
    Fallthrough,
    Error,
}

/// Whether a variant was chosen directly or assigned by hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Value,
    Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    FlagNotFound,
    MissingEnvironment,
    MissingReuseTarget,
    VariantOutOfRange,
}

/// Result of evaluating one flag definition under one context.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub value: Option<Value>,
    pub reason: Reason,
    pub outcome_kind: Option<OutcomeKind>,
    pub error_message: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl Evaluation {
    fn resolved(value: Value, reason: Reason, outcome_kind: OutcomeKind) -> Self {
        Self {
            value: Some(value),
            reason,
            outcome_kind: Some(outcome_kind),
            error_message: None,
            error_code: None,
        }
    }

    pub fn error(
        message: impl Into<String>,
        code: Option<ErrorCode>,
        default_value: Option<&Value>,
    ) -> Self {
        Self {
            value: default_value.cloned(),
            reason: Reason::Error,
            outcome_kind: None,
            error_message: Some(message.into()),
            error_code: code,
        }
    }

    pub fn is_error(&self) -> bool {
        self.reason == Reason::Error
    }
}

/// Reused environments may delegate exactly once; a `reuse` chain deeper than
/// this is rejected by the configuration producer and treated as an error.
const MAX_REUSE_DEPTH: usize = 1;

/// Evaluates `definition` for `environment` against the given entities and
/// segments. `default_value` only surfaces in error results.
pub fn evaluate(
    definition: &FlagDefinition,
    environment: &str,
    entities: Option<&Entities>,
    segments: Option<&HashMap<String, Segment>>,
    default_value: Option<&Value>,
) -> Evaluation {
    evaluate_at_depth(definition, environment, entities, segments, default_value, 0)
}

fn evaluate_at_depth(
    definition: &FlagDefinition,
    environment: &str,
    entities: Option<&Entities>,
    segments: Option<&HashMap<String, Segment>>,
    default_value: Option<&Value>,
    depth: usize,
) -> Evaluation {
    let Some(env) = definition.environments.get(environment) else {
        let code = if depth > 0 {
            Some(ErrorCode::MissingReuseTarget)
        } else {
            Some(ErrorCode::MissingEnvironment)
        };
        return Evaluation::error(
            format!("environment \"{environment}\" is not configured"),
            code,
            default_value,
        );
    };

    match env {
        EnvironmentConfig::Paused(index) => match definition.variants.get(*index) {
            Some(value) => Evaluation::resolved(value.clone(), Reason::Paused, OutcomeKind::Value),
            None => variant_out_of_range(*index, definition, default_value),
        },
        EnvironmentConfig::Reuse { reuse } => {
            if depth >= MAX_REUSE_DEPTH {
                return Evaluation::error(
                    format!("environment \"{environment}\" reuses \"{reuse}\", which is itself a reuse"),
                    Some(ErrorCode::MissingReuseTarget),
                    default_value,
                );
            }
            evaluate_at_depth(definition, reuse, entities, segments, default_value, depth + 1)
        }
        EnvironmentConfig::Active(config) => {
            let seed = definition.seed.unwrap_or(0);

            if let Some(targets) = &config.targets {
                for (index, target_list) in targets.iter().enumerate() {
                    if matches_target_list(target_list, entities) {
                        return handle_outcome(
                            &Outcome::Variant(index),
                            definition,
                            entities,
                            seed,
                            Reason::TargetMatch,
                            default_value,
                        );
                    }
                }
            }

            if let Some(rules) = &config.rules {
                for rule in rules {
                    if matches_conditions(&rule.conditions, entities, segments, seed) {
                        return handle_outcome(
                            &rule.outcome,
                            definition,
                            entities,
                            seed,
                            Reason::RuleMatch,
                            default_value,
                        );
                    }
                }
            }

            handle_outcome(
                &config.fallthrough,
                definition,
                entities,
                seed,
                Reason::Fallthrough,
                default_value,
            )
        }
    }
}

fn handle_outcome(
    outcome: &Outcome,
    definition: &FlagDefinition,
    entities: Option<&Entities>,
    seed: u32,
    reason: Reason,
    default_value: Option<&Value>,
) -> Evaluation {
    match outcome {
        Outcome::Variant(index) => match definition.variants.get(*index) {
            Some(value) => Evaluation::resolved(value.clone(), reason, OutcomeKind::Value),
            None => variant_out_of_range(*index, definition, default_value),
        },
        Outcome::Split(split) => {
            let index = match resolve_path(entities, &split.base).and_then(Value::as_str) {
                Some(base) => weighted_bucket(hash32(base, seed), &split.weights)
                    .unwrap_or(split.default_variant),
                None => split.default_variant,
            };
            match definition.variants.get(index) {
                Some(value) => Evaluation::resolved(value.clone(), reason, OutcomeKind::Split),
                None => variant_out_of_range(index, definition, default_value),
            }
        }
    }
}

fn variant_out_of_range(
    index: usize,
    definition: &FlagDefinition,
    default_value: Option<&Value>,
) -> Evaluation {
    Evaluation::error(
        format!(
            "variant index {index} is out of range for {} variants",
            definition.variants.len()
        ),
        Some(ErrorCode::VariantOutOfRange),
        default_value,
    )
}

pub(crate) fn matches_conditions(
    conditions: &[Condition],
    entities: Option<&Entities>,
    segments: Option<&HashMap<String, Segment>>,
    seed: u32,
) -> bool {
    conditions
        .iter()
        .all(|condition| matches_condition(condition, entities, segments, seed))
}

fn matches_condition(
    condition: &Condition,
    entities: Option<&Entities>,
    segments: Option<&HashMap<String, Segment>>,
    seed: u32,
) -> bool {
    match &condition.lhs {
        ConditionLhs::Keyword(keyword) if keyword == SEGMENT_KEYWORD => {
            matches_segment_condition(condition, entities, segments, seed)
        }
        ConditionLhs::Keyword(_) => false,
        ConditionLhs::Attribute(path) => {
            let lhs = resolve_path(entities, path);
            compare(condition.op, lhs, condition.rhs.as_ref())
        }
    }
}

/// `["segment", ONE_OF, [ids...]]` matches when any named segment matches;
/// `NOT_ONE_OF` when none does. A bare string names a single segment.
fn matches_segment_condition(
    condition: &Condition,
    entities: Option<&Entities>,
    segments: Option<&HashMap<String, Segment>>,
    seed: u32,
) -> bool {
    let names: Vec<&str> = match &condition.rhs {
        Some(Value::Array(list)) => list.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(name)) => vec![name.as_str()],
        _ => return false,
    };
    let any_matches = names.iter().any(|name| {
        segments
            .and_then(|all| all.get(*name))
            .is_some_and(|segment| matches_segment(segment, entities, segments, seed))
    });
    match condition.op {
        Comparator::SegmentOneOf | Comparator::OneOf | Comparator::Eq => any_matches,
        Comparator::SegmentNotOneOf | Comparator::NotOneOf | Comparator::NotEq => !any_matches,
        _ => false,
    }
}

/// Inclusion wins over exclusion; otherwise the first matching rule decides.
fn matches_segment(
    segment: &Segment,
    entities: Option<&Entities>,
    segments: Option<&HashMap<String, Segment>>,
    seed: u32,
) -> bool {
    if let Some(include) = &segment.include {
        if matches_target_list(include, entities) {
            return true;
        }
    }
    if let Some(exclude) = &segment.exclude {
        if matches_target_list(exclude, entities) {
            return false;
        }
    }
    if let Some(rules) = &segment.rules {
        for rule in rules {
            if matches_conditions(&rule.conditions, entities, segments, seed) {
                return match &rule.outcome {
                    SegmentOutcome::Constant(constant) => *constant != 0,
                    SegmentOutcome::Split(split) => {
                        match resolve_path(entities, &split.base).and_then(Value::as_str) {
                            Some(base) => passes_promille(hash32(base, seed), split.pass_promille),
                            None => false,
                        }
                    }
                };
            }
        }
    }
    false
}

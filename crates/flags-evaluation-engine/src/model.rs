//! Wire data model for flag configuration.
//!
//! A [`Datafile`] is the full configuration artifact for one project and
//! environment. Everything inside it is immutable for the lifetime of that
//! datafile; updates arrive as whole replacement datafiles.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;

/// Evaluation context: kind -> attribute -> value (e.g. `user.id`).
pub type Entities = HashMap<String, HashMap<String, Value>>;

/// Literal targeting: kind -> attribute -> list of matching string values.
pub type TargetList = HashMap<String, HashMap<String, Vec<String>>>;

/// The full flag configuration for one project and environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Datafile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default)]
    pub definitions: HashMap<String, FlagDefinition>,
    #[serde(default)]
    pub segments: HashMap<String, Segment>,
    /// Freshness token. Tolerated as an integer or a numeric string on the
    /// wire; anything unparseable is carried as `None`.
    #[serde(default, deserialize_with = "deserialize_config_updated_at")]
    pub config_updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

fn deserialize_config_updated_at<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(parse_updated_at))
}

/// Lenient freshness-token parse: integer, or a string holding an integer.
pub fn parse_updated_at(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Configuration for one flag: its variants and per-environment resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FlagDefinition {
    /// Ordered sequence of possible values (boolean, number, string or JSON).
    pub variants: Vec<Value>,
    pub environments: HashMap<String, EnvironmentConfig>,
    /// Diversifies split assignments across flags sharing an entity base.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u32>,
}

/// How a flag resolves in one environment.
///
/// The wire format is heterogeneous: a bare non-negative integer pauses the
/// flag on that variant, `{"reuse": "<env>"}` delegates to another
/// environment's configuration, and an object with a `fallthrough` is the
/// active targeting shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum EnvironmentConfig {
    Paused(usize),
    Reuse { reuse: String },
    Active(ActiveConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActiveConfig {
    /// Positional target lists; the index of the first match is the variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<TargetList>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
    pub fallthrough: Outcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub outcome: Outcome,
}

/// What a matched target, rule or fallthrough resolves to: a variant index,
/// or a weighted split hashed over an entity attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Outcome {
    Variant(usize),
    Split(SplitOutcome),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SplitOutcome {
    /// Entity path whose string value seeds the hash, e.g. `["user", "id"]`.
    pub base: Vec<String>,
    pub weights: Vec<f64>,
    /// Variant used when `base` does not resolve to a string.
    pub default_variant: usize,
}

/// A reusable rule-set referenceable from any flag's conditions.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<SegmentRule>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<TargetList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<TargetList>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentRule {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub outcome: SegmentOutcome,
}

/// Segment rule outcome: the constant `1` is a full match, a split gates
/// membership on a per-mille-of-100000 hash threshold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SegmentOutcome {
    Constant(u8),
    Split(SegmentSplit),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSplit {
    pub base: Vec<String>,
    /// `0` never passes, `>= 100_000` always passes.
    pub pass_promille: u32,
}

/// One targeting condition, `[lhs, comparator, rhs?]` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub lhs: ConditionLhs,
    pub op: Comparator,
    pub rhs: Option<Value>,
}

impl<'de> Deserialize<'de> for Condition {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let parts = Vec::<Value>::deserialize(deserializer)?;
        if parts.len() < 2 || parts.len() > 3 {
            return Err(D::Error::custom(format!(
                "condition must have 2 or 3 elements, got {}",
                parts.len()
            )));
        }
        let lhs = serde_json::from_value(parts[0].clone()).map_err(D::Error::custom)?;
        let op = serde_json::from_value(parts[1].clone()).map_err(D::Error::custom)?;
        Ok(Condition {
            lhs,
            op,
            rhs: parts.get(2).cloned(),
        })
    }
}

impl Serialize for Condition {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut parts = vec![
            serde_json::to_value(&self.lhs).map_err(serde::ser::Error::custom)?,
            serde_json::to_value(self.op).map_err(serde::ser::Error::custom)?,
        ];
        if let Some(rhs) = &self.rhs {
            parts.push(rhs.clone());
        }
        parts.serialize(serializer)
    }
}

/// Left-hand side of a condition: an entity path, or the `segment` keyword.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ConditionLhs {
    Attribute(Vec<String>),
    Keyword(String),
}

pub(crate) const SEGMENT_KEYWORD: &str = "segment";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Comparator {
    #[serde(rename = "eq")]
    Eq,
    #[serde(rename = "!eq")]
    NotEq,
    #[serde(rename = "oneOf")]
    OneOf,
    #[serde(rename = "!oneOf")]
    NotOneOf,
    #[serde(rename = "containsAllOf")]
    ContainsAllOf,
    #[serde(rename = "containsAnyOf")]
    ContainsAnyOf,
    #[serde(rename = "containsNoneOf")]
    ContainsNoneOf,
    #[serde(rename = "startsWith")]
    StartsWith,
    #[serde(rename = "!startsWith")]
    NotStartsWith,
    #[serde(rename = "endsWith")]
    EndsWith,
    #[serde(rename = "!endsWith")]
    NotEndsWith,
    #[serde(rename = "ex")]
    Exists,
    #[serde(rename = "!ex")]
    NotExists,
    #[serde(rename = "gt")]
    Gt,
    #[serde(rename = "gte")]
    Gte,
    #[serde(rename = "lt")]
    Lt,
    #[serde(rename = "lte")]
    Lte,
    #[serde(rename = "regex")]
    Regex,
    #[serde(rename = "!regex")]
    NotRegex,
    #[serde(rename = "before")]
    Before,
    #[serde(rename = "after")]
    After,
    /// Segment membership: `rhs` lists segment ids.
    #[serde(rename = "ONE_OF")]
    SegmentOneOf,
    #[serde(rename = "NOT_ONE_OF")]
    SegmentNotOneOf,
}

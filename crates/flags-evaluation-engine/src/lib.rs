//! # Flags Evaluation Engine
//!
//! The deterministic core of the Vercel Flags SDK: given a flag definition,
//! an environment, an evaluation context, and the segments of the owning
//! datafile, [`evaluate`] computes the flag's value.
//!
//! This crate performs no I/O and holds no state. The SDK crate owns
//! configuration delivery (streaming, polling, bundled snapshots) and calls
//! in here once it has a datafile in hand.
//!
//! ```
//! use flags_evaluation_engine::{evaluate, FlagDefinition, Reason};
//! use serde_json::json;
//!
//! let definition: FlagDefinition = serde_json::from_value(json!({
//!     "variants": [false, true],
//!     "environments": {"production": 1}
//! }))
//! .unwrap();
//!
//! let result = evaluate(&definition, "production", None, None, None);
//! assert_eq!(result.value, Some(json!(true)));
//! assert_eq!(result.reason, Reason::Paused);
//! ```

mod condition;
pub mod hash;
pub mod model;

mod evaluation;

pub use evaluation::{evaluate, ErrorCode, Evaluation, OutcomeKind, Reason};
pub use model::{
    ActiveConfig, Comparator, Condition, ConditionLhs, Datafile, Entities, EnvironmentConfig,
    FlagDefinition, Outcome, Rule, Segment, SegmentOutcome, SegmentRule, SegmentSplit,
    SplitOutcome, TargetList,
};

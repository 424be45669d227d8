//! Session log merging
//!
//! ```text
//! session_<id>.jsonl ──► reader ──► classifier ──► SessionRecord ─┐
//!                                                                 ├──► merger ──► session_<new>.jsonl
//! session_<id>.jsonl ──► reader ──► classifier ──► SessionRecord ─┘       │
//!                                     aggregate (summary_data) ◄──────────┘
//! ```

pub mod aggregate;
pub mod classifier;
pub mod merger;
pub mod reader;

pub use aggregate::{aggregate_summaries, AggregatedSummary};
pub use merger::{merge_experiment, merge_lane, LaneStatus, MergeOutcome};

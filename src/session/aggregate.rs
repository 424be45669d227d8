//! Summary metric aggregation across merged sessions.
//!
//! Counters and token totals are additive. The git change counters take the
//! maximum instead: each session observes the same working tree, so a later
//! session's counts already include an earlier one's changes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserMetrics {
    pub user_prompts: u64,
    pub tool_results: u64,
    pub system_messages: u64,
    pub total_user_events: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_creation_tokens: u64,
    pub total_cache_read_tokens: u64,
    pub total_ephemeral_5m_tokens: u64,
    pub total_ephemeral_1h_tokens: u64,
    /// Last non-empty tier seen
    pub service_tier: Option<String>,
    pub total_actual_input_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMetrics {
    pub tool_calls_by_type: BTreeMap<String, u64>,
    pub total_tool_calls: u64,
    pub total_tool_results: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThinkingMetrics {
    pub thinking_enabled_turns: u64,
    pub thinking_disabled_turns: u64,
    pub assistant_with_thinking_blocks: u64,
    pub thinking_levels: BTreeMap<String, u64>,
    pub assistant_thinking_blocks_captured: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitMetrics {
    pub files_changed_count: u64,
    pub lines_of_code_changed_count: u64,
}

/// Field-wise combination of several `summary_data` payloads.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSummary {
    pub total_duration_seconds: f64,
    pub total_messages: u64,
    pub assistant_messages: u64,
    pub user_prompts: u64,
    pub user_metrics: UserMetrics,
    pub usage_totals: UsageTotals,
    pub tool_metrics: ToolMetrics,
    pub thinking_metrics: ThinkingMetrics,
    pub git_metrics: GitMetrics,
}

/// Combine summary payloads. Missing or mistyped fields count as zero.
pub fn aggregate_summaries<'a, I>(summaries: I) -> AggregatedSummary
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut totals = AggregatedSummary::default();
    for summary in summaries {
        totals.absorb(summary);
    }
    totals
}

impl AggregatedSummary {
    /// Fold one `summary_data` payload into the running totals.
    pub fn absorb(&mut self, sd: &Value) {
        self.total_duration_seconds += float(sd, "total_duration_seconds");
        add(&mut self.total_messages, sd, "total_messages");
        add(&mut self.assistant_messages, sd, "assistant_messages");
        add(&mut self.user_prompts, sd, "user_prompts");

        let um = section(sd, "user_metrics");
        let user = &mut self.user_metrics;
        add(&mut user.user_prompts, um, "user_prompts");
        add(&mut user.tool_results, um, "tool_results");
        add(&mut user.system_messages, um, "system_messages");
        add(&mut user.total_user_events, um, "total_user_events");

        let ut = section(sd, "usage_totals");
        let usage = &mut self.usage_totals;
        add(&mut usage.total_input_tokens, ut, "total_input_tokens");
        add(&mut usage.total_output_tokens, ut, "total_output_tokens");
        add(&mut usage.total_cache_creation_tokens, ut, "total_cache_creation_tokens");
        add(&mut usage.total_cache_read_tokens, ut, "total_cache_read_tokens");
        add(&mut usage.total_ephemeral_5m_tokens, ut, "total_ephemeral_5m_tokens");
        add(&mut usage.total_ephemeral_1h_tokens, ut, "total_ephemeral_1h_tokens");
        add(&mut usage.total_actual_input_tokens, ut, "total_actual_input_tokens");
        if let Some(tier) = ut.get("service_tier").and_then(Value::as_str) {
            if !tier.is_empty() {
                usage.service_tier = Some(tier.to_string());
            }
        }

        let tm = section(sd, "tool_metrics");
        let tools = &mut self.tool_metrics;
        merge_counts(&mut tools.tool_calls_by_type, tm.get("tool_calls_by_type"));
        add(&mut tools.total_tool_calls, tm, "total_tool_calls");
        add(&mut tools.total_tool_results, tm, "total_tool_results");

        let thm = section(sd, "thinking_metrics");
        let thinking = &mut self.thinking_metrics;
        add(&mut thinking.thinking_enabled_turns, thm, "thinking_enabled_turns");
        add(&mut thinking.thinking_disabled_turns, thm, "thinking_disabled_turns");
        add(&mut thinking.assistant_with_thinking_blocks, thm, "assistant_with_thinking_blocks");
        add(&mut thinking.assistant_thinking_blocks_captured, thm, "assistant_thinking_blocks_captured");
        merge_counts(&mut thinking.thinking_levels, thm.get("thinking_levels"));

        let gm = section(sd, "git_metrics");
        let git = &mut self.git_metrics;
        git.files_changed_count = git.files_changed_count.max(count(gm, "files_changed_count"));
        git.lines_of_code_changed_count = git
            .lines_of_code_changed_count
            .max(count(gm, "lines_of_code_changed_count"));
    }
}

static EMPTY: Value = Value::Null;

fn section<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(&EMPTY)
}

/// Counters saturate rather than wrap on absurd inputs.
fn add(total: &mut u64, value: &Value, key: &str) {
    *total = total.saturating_add(count(value, key));
}

fn count(value: &Value, key: &str) -> u64 {
    match value.get(key) {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0),
        _ => 0,
    }
}

fn float(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn merge_counts(into: &mut BTreeMap<String, u64>, from: Option<&Value>) {
    let Some(Value::Object(map)) = from else {
        return;
    };
    for (key, value) in map {
        let n = value
            .as_u64()
            .or_else(|| value.as_f64().filter(|f| *f > 0.0).map(|f| f as u64))
            .unwrap_or(0);
        let total = into.entry(key.clone()).or_insert(0);
        *total = total.saturating_add(n);
    }
}

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One completed tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub latency_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub retry_count: u32,
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

/// Handle returned by `begin`; finish it to produce the record.
pub struct OperationTimer {
    tool: String,
    started_at: DateTime<Utc>,
    started: Instant,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolAggregate {
    pub count: usize,
    pub successes: usize,
    pub total_latency_ms: u64,
}

impl ToolAggregate {
    pub fn average_latency_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.count as f64
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSummary {
    pub total_operations: usize,
    pub successes: usize,
    pub average_latency_ms: f64,
    pub retries: u64,
    pub fallbacks: u64,
    pub per_tool: HashMap<String, ToolAggregate>,
}

struct MetricsInner {
    records: Vec<ToolCallRecord>,
    sink: Option<std::fs::File>,
}

/// Records every tool call, aggregates in-process, and appends each record
/// as one JSONL line in a temp-directory log file.
pub struct MetricsRecorder {
    log_path: PathBuf,
    inner: Mutex<MetricsInner>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let log_path = std::env::temp_dir().join(format!(
            "agent-metrics-{}.jsonl",
            Utc::now().format("%Y%m%dT%H%M%S%.3f")
        ));
        let sink = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| tracing::warn!("metrics log unavailable at {}: {e}", log_path.display()))
            .ok();
        Self {
            log_path,
            inner: Mutex::new(MetricsInner {
                records: Vec::new(),
                sink,
            }),
        }
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }

    pub fn begin(&self, tool: &str) -> OperationTimer {
        OperationTimer {
            tool: tool.to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    pub fn finish(
        &self,
        timer: OperationTimer,
        success: bool,
        error: Option<String>,
        retry_count: u32,
        fallback_used: bool,
        metadata: Value,
    ) {
        let record = ToolCallRecord {
            tool: timer.tool,
            started_at: timer.started_at,
            ended_at: Utc::now(),
            latency_ms: timer.started.elapsed().as_millis() as u64,
            success,
            error,
            retry_count,
            fallback_used,
            metadata,
        };

        let mut inner = self.inner.lock().expect("metrics poisoned");
        if let Some(sink) = inner.sink.as_mut() {
            if let Ok(line) = serde_json::to_string(&record) {
                let _ = writeln!(sink, "{line}");
            }
        }
        inner.records.push(record);
    }

    pub fn records(&self) -> Vec<ToolCallRecord> {
        self.inner.lock().expect("metrics poisoned").records.clone()
    }

    pub fn summary(&self) -> MetricsSummary {
        let inner = self.inner.lock().expect("metrics poisoned");
        let mut summary = MetricsSummary::default();
        let mut total_latency: u64 = 0;

        for record in &inner.records {
            summary.total_operations += 1;
            if record.success {
                summary.successes += 1;
            }
            summary.retries += record.retry_count as u64;
            if record.fallback_used {
                summary.fallbacks += 1;
            }
            total_latency += record.latency_ms;

            let agg = summary.per_tool.entry(record.tool.clone()).or_default();
            agg.count += 1;
            if record.success {
                agg.successes += 1;
            }
            agg.total_latency_ms += record.latency_ms;
        }

        if summary.total_operations > 0 {
            summary.average_latency_ms = total_latency as f64 / summary.total_operations as f64;
        }
        summary
    }

    /// Console-friendly rendering for `--verbose` runs.
    pub fn render_summary(&self) -> String {
        let summary = self.summary();
        if summary.total_operations == 0 {
            return "No tool calls recorded.".to_string();
        }
        let mut lines = vec![format!(
            "{} tool calls, {} ok, avg {:.0}ms, {} retries, {} fallbacks",
            summary.total_operations,
            summary.successes,
            summary.average_latency_ms,
            summary.retries,
            summary.fallbacks
        )];
        let mut tools: Vec<_> = summary.per_tool.iter().collect();
        tools.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.0.cmp(b.0)));
        for (tool, agg) in tools {
            lines.push(format!(
                "  {tool}: {} calls, {} ok, avg {:.0}ms",
                agg.count,
                agg.successes,
                agg.average_latency_ms()
            ));
        }
        lines.join("\n")
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_per_tool() {
        let metrics = MetricsRecorder::new();
        let t = metrics.begin("view_file");
        metrics.finish(t, true, None, 0, false, Value::Null);
        let t = metrics.begin("view_file");
        metrics.finish(t, false, Some("missing".into()), 1, true, Value::Null);
        let t = metrics.begin("bash");
        metrics.finish(t, true, None, 0, false, Value::Null);

        let summary = metrics.summary();
        assert_eq!(summary.total_operations, 3);
        assert_eq!(summary.successes, 2);
        assert_eq!(summary.retries, 1);
        assert_eq!(summary.fallbacks, 1);
        assert_eq!(summary.per_tool["view_file"].count, 2);
        assert_eq!(summary.per_tool["view_file"].successes, 1);
        assert_eq!(summary.per_tool["bash"].count, 1);
    }

    #[test]
    fn writes_jsonl_records() {
        let metrics = MetricsRecorder::new();
        let t = metrics.begin("search");
        metrics.finish(t, true, None, 0, false, serde_json::json!({"matches": 3}));

        let content = std::fs::read_to_string(metrics.log_path()).unwrap();
        let line: ToolCallRecord = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(line.tool, "search");
        assert!(line.success);
        assert_eq!(line.metadata["matches"], serde_json::json!(3));
    }

    #[test]
    fn render_summary_mentions_counts() {
        let metrics = MetricsRecorder::new();
        assert!(metrics.render_summary().contains("No tool calls"));
        let t = metrics.begin("bash");
        metrics.finish(t, true, None, 0, false, Value::Null);
        let rendered = metrics.render_summary();
        assert!(rendered.contains("1 tool calls"));
        assert!(rendered.contains("bash"));
    }
}

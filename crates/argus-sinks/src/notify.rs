//! Chat-notification sink: condensed run summaries for a messaging channel.

use argus_core::result::ScrapingResult;

/// Format a condensed summary: job id, item count, duration, link.
pub fn format_summary(job_id: &str, result: &ScrapingResult, link: Option<&str>) -> String {
    let status = if result.success {
        "completed"
    } else {
        "finished with errors"
    };
    let mut summary = format!(
        "[argus] Job {job_id} {status}: {} item(s) in {}",
        result.item_count(),
        humanize_duration(result.metadata.duration_ms),
    );
    if !result.errors.is_empty() {
        summary.push_str(&format!(" ({} error(s))", result.errors.len()));
    }
    if let Some(link) = link {
        summary.push('\n');
        summary.push_str(link);
    }
    summary
}

fn humanize_duration(ms: u64) -> String {
    if ms < 1_000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1_000.0)
    } else {
        format!("{}m{}s", ms / 60_000, (ms % 60_000) / 1_000)
    }
}

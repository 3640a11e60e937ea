//! Run report.
//!
//! Structured result of one indexing run plus its plaintext rendering, used
//! for the CLI output and the notification mail. Errors are kept complete;
//! only the rendering deduplicates and truncates them.

use std::collections::HashSet;
use std::fmt::Write;

use crate::models::IndexingMode;

/// One row per indexer run for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub title: String,
    pub incremental: bool,
    pub message: String,
    pub duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: IndexingMode,
    /// "Running indexing process in ... mode." line.
    pub mode_message: String,
    pub jobs: Vec<JobReport>,
    /// Jobs that could not be dispatched.
    pub notices: Vec<String>,
    pub cleanup: String,
    pub start_time: i64,
    pub end_time: i64,
    pub total_records: i64,
    /// Every error of the run, in the order they occurred.
    pub errors: Vec<String>,
    pub max_displayed_errors: usize,
}

impl RunReport {
    pub fn new(mode: IndexingMode, mode_message: String, start_time: i64) -> Self {
        Self {
            mode,
            mode_message,
            jobs: Vec::new(),
            notices: Vec::new(),
            cleanup: String::new(),
            start_time,
            end_time: start_time,
            total_records: 0,
            errors: Vec::new(),
            max_displayed_errors: 20,
        }
    }

    pub fn duration_secs(&self) -> i64 {
        self.end_time - self.start_time
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Distinct errors in order of first occurrence, capped for display.
    pub fn displayed_errors(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.errors
            .iter()
            .map(String::as_str)
            .filter(|e| seen.insert(*e))
            .take(self.max_displayed_errors)
            .collect()
    }

    pub fn finished_message(&self) -> String {
        format!(
            "Indexing finished at {} (took {}).",
            format_timestamp(self.end_time),
            format_time(self.duration_secs())
        )
    }

    pub fn render_plaintext(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.mode_message);
        out.push('\n');

        for job in &self.jobs {
            let _ = write!(out, "{}", job.title);
            if job.incremental {
                out.push_str(" (incremental mode)");
            }
            out.push('\n');
            for line in job.message.lines().filter(|l| !l.trim().is_empty()) {
                let _ = writeln!(out, "  {}", line.trim());
            }
            if job.duration_ms > 0 {
                let _ = writeln!(out, "  Indexing process took {}", format_duration_ms(job.duration_ms));
            }
        }
        for notice in &self.notices {
            let _ = writeln!(out, "{}", notice);
        }

        out.push_str("\nCleanup\n");
        for line in self.cleanup.lines().filter(|l| !l.trim().is_empty()) {
            let _ = writeln!(out, "  {}", line.trim());
        }

        out.push_str("\nFinished\n");
        let _ = writeln!(out, "{}", self.finished_message());
        let _ = writeln!(out, "Index contains {} entries.", self.total_records);

        if !self.errors.is_empty() {
            out.push_str("\nErrors\n");
            out.push_str("There have been errors during the indexing process:\n");
            for error in self.displayed_errors() {
                let _ = writeln!(out, "- {}", error);
            }
            let distinct = self.errors.iter().collect::<HashSet<_>>().len();
            if distinct > self.max_displayed_errors {
                let _ = writeln!(
                    out,
                    "... and {} more ({} errors in total). See the log for the full list.",
                    distinct - self.max_displayed_errors,
                    self.error_count()
                );
            }
        }
        out
    }
}

/// Indexing time in seconds as hours, minutes or seconds.
pub fn format_time(secs: i64) -> String {
    if secs > 3600 {
        format!("{:.2} hours", secs as f64 / 3600.0)
    } else if secs > 60 {
        format!("{:.2} minutes", secs as f64 / 60.0)
    } else {
        format!("{} seconds", secs)
    }
}

fn format_duration_ms(ms: i64) -> String {
    if ms > 1000 {
        format_time(ms / 1000)
    } else {
        format!("{} ms", ms)
    }
}

pub fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

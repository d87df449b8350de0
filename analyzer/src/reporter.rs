//! Report rendering
//!
//! Formats analysis reports and suite listings for humans (terminal,
//! Markdown) or machines (JSON).

use anyhow::Result;

use crate::suites::SuiteListing;
use crate::types::{Boundaries, ReleaseEvent, Report, TestCaseRef};

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Compact terminal output
    #[default]
    Terminal,
    /// Human-readable Markdown
    Markdown,
    /// Machine-readable JSON
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminal" | "term" | "console" => Ok(Self::Terminal),
            "md" | "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            _ => Err(anyhow::anyhow!("Unknown format: {}", s)),
        }
    }
}

/// How many ids to list inline before truncating in terminal output
const INLINE_LIMIT: usize = 10;

pub struct Reporter {
    format: OutputFormat,
}

impl Reporter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn report(&self, report: &Report) -> String {
        match self.format {
            OutputFormat::Terminal => self.report_terminal(report),
            OutputFormat::Markdown => self.report_markdown(report),
            OutputFormat::Json => {
                serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
            }
        }
    }

    pub fn suite(&self, listing: &SuiteListing) -> String {
        match self.format {
            OutputFormat::Terminal => self.suite_terminal(listing),
            OutputFormat::Markdown => self.suite_markdown(listing),
            OutputFormat::Json => {
                serde_json::to_string_pretty(listing).unwrap_or_else(|_| "{}".to_string())
            }
        }
    }

    // === Terminal formatters ===

    fn report_terminal(&self, report: &Report) -> String {
        let mut output = String::new();
        let summary = &report.test_case_summary;

        output.push_str(&format!(
            "\nPlan {} / Suite {}: {} release events from {} runs (min ROC {})\n",
            report.plan_id,
            report.suite_id,
            report.monthly_runs.len(),
            report.total_runs,
            report.min_roc
        ));
        output.push_str(&format!(
            "  History: {}\n",
            span_text(&report.overall_boundaries)
        ));
        output.push_str(&format!(
            "  Coverage: {}/{} test cases executed, {} never executed\n",
            summary.executed_count, summary.total_expected, summary.never_executed_count
        ));
        output.push_str(&format!(
            "  Runs: {} fetched, {} excluded by name, {} filtered, {} failed fetches\n",
            report.run_stats.fetched,
            report.run_stats.excluded_by_name,
            report.run_stats.filtered_count,
            report.run_stats.failed_fetches
        ));

        for event in &report.monthly_runs {
            let status = if event.fully_resolved { "✅" } else { "⚠️" };
            output.push_str(&format!(
                "\n{} {} | {}/{} found | buffer ±{}d | {} | pass {:.2}% -> {:.2}%\n",
                status,
                event.date,
                event.found_test_cases.len(),
                event.test_case_count,
                event.buffer_used,
                span_text(&event.boundaries),
                event.pass_rates.initial_pass_rate,
                event.pass_rates.final_pass_rate
            ));
            if !event.not_found_test_cases.is_empty() {
                output.push_str(&format!(
                    "   not found: {}\n",
                    id_list(&event.not_found_test_cases)
                ));
            }
            if !event.flaky_tests.is_empty() {
                let flaky: Vec<String> = event
                    .flaky_tests
                    .iter()
                    .take(INLINE_LIMIT)
                    .map(|t| format!("{} x{}", t.id, t.execution_count))
                    .collect();
                output.push_str(&format!("   flaky: {}\n", flaky.join(", ")));
            }
            if !event.off_suite_test_cases.is_empty() {
                output.push_str(&format!(
                    "   off-suite: {}\n",
                    id_list(&event.off_suite_test_cases)
                ));
            }
        }

        output
    }

    fn suite_terminal(&self, listing: &SuiteListing) -> String {
        let mut output = format!(
            "Plan {} / Suite {}: {} test cases in {} suites\n",
            listing.plan_id,
            listing.suite_id,
            listing.test_cases.len(),
            listing.suite_ids.len()
        );
        for case in &listing.test_cases {
            output.push_str(&format!("  {:>8}  {}\n", case.id, case.name));
        }
        if !listing.failed_suites.is_empty() {
            output.push_str(&format!(
                "⚠️ Could not load suites: {:?}\n",
                listing.failed_suites
            ));
        }
        output
    }

    // === Markdown formatters ===

    fn report_markdown(&self, report: &Report) -> String {
        let mut output = String::new();
        let summary = &report.test_case_summary;

        output.push_str(&format!(
            "# Test Run Analysis: Plan {} / Suite {}\n\n",
            report.plan_id, report.suite_id
        ));
        output.push_str(&format!(
            "**Generated:** {}\n",
            report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        output.push_str(&format!("**Runs analyzed:** {}\n", report.total_runs));
        output.push_str(&format!("**Min ROC:** {}\n", report.min_roc));
        output.push_str(&format!(
            "**History:** {}\n\n",
            span_text(&report.overall_boundaries)
        ));

        output.push_str("## Test Case Coverage\n\n");
        output.push_str(&format!("- **Expected:** {}\n", summary.total_expected));
        output.push_str(&format!("- **Executed:** {}\n", summary.executed_count));
        output.push_str(&format!(
            "- **Never executed:** {}\n\n",
            summary.never_executed_count
        ));

        output.push_str("## Release Events\n\n");
        if report.monthly_runs.is_empty() {
            output.push_str("No release events detected.\n");
            return output;
        }

        output.push_str(
            "| Date | Found | Buffer | Window | Initial Pass | Final Pass | Flaky | Off-suite |\n",
        );
        output.push_str(
            "|------|-------|--------|--------|--------------|------------|-------|-----------|\n",
        );
        for event in &report.monthly_runs {
            output.push_str(&format!(
                "| {} | {}/{} | ±{}d | {} | {:.2}% | {:.2}% | {} | {} |\n",
                event.date,
                event.found_test_cases.len(),
                event.test_case_count,
                event.buffer_used,
                span_text(&event.boundaries),
                event.pass_rates.initial_pass_rate,
                event.pass_rates.final_pass_rate,
                event.flaky_tests.len(),
                event.off_suite_test_cases.len()
            ));
        }

        for event in report.monthly_runs.iter().filter(|e| has_details(e)) {
            output.push_str(&format!("\n### {}\n\n", event.date));
            if !event.not_found_test_cases.is_empty() {
                output.push_str("**Not found:**\n");
                for case in &event.not_found_test_cases {
                    output.push_str(&format!("- {} {}\n", case.id, case.name));
                }
            }
            if !event.flaky_tests.is_empty() {
                output.push_str("\n**Flaky:**\n");
                for test in &event.flaky_tests {
                    output.push_str(&format!(
                        "- {} {} ({} executions)\n",
                        test.id, test.name, test.execution_count
                    ));
                }
            }
        }

        output
    }

    fn suite_markdown(&self, listing: &SuiteListing) -> String {
        let mut output = format!(
            "# Suite {} (plan {})\n\n| Id | Name |\n|----|------|\n",
            listing.suite_id, listing.plan_id
        );
        for case in &listing.test_cases {
            output.push_str(&format!("| {} | {} |\n", case.id, case.name));
        }
        output
    }
}

fn has_details(event: &ReleaseEvent) -> bool {
    !event.not_found_test_cases.is_empty() || !event.flaky_tests.is_empty()
}

fn span_text(boundaries: &Boundaries) -> String {
    match (boundaries.start_date, boundaries.end_date, boundaries.duration_days) {
        (Some(start), Some(end), Some(days)) => format!("{} to {} ({}d)", start, end, days),
        _ => "no executions".to_string(),
    }
}

fn id_list(refs: &[TestCaseRef]) -> String {
    let mut ids: Vec<String> = refs
        .iter()
        .take(INLINE_LIMIT)
        .map(|r| r.id.to_string())
        .collect();
    if refs.len() > INLINE_LIMIT {
        ids.push(format!("... +{}", refs.len() - INLINE_LIMIT));
    }
    ids.join(", ")
}

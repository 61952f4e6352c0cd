//! Report rendering
//!
//! Every renderer takes the finished [`Report`] as-is. Nothing here computes
//! statistics; it only formats what the engine produced.

use std::fmt::Write as _;

use anyhow::Result;
use usagerank_core::analytics::trend::format_delta;
use usagerank_core::analytics::{CohortSummary, CohortTrend, RankingItem};
use usagerank_core::{GroupBy, Report};

/// Output format selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    Text,
    Json,
    #[value(name = "md")]
    Markdown,
    Html,
}

pub fn render(reports: &[Report], format: Format) -> Result<String> {
    Ok(match format {
        Format::Text => render_text(reports),
        Format::Json => serde_json::to_string_pretty(reports)?,
        Format::Markdown => render_markdown(reports),
        Format::Html => render_html(reports),
    })
}

fn title(report: &Report) -> String {
    let per = match report.group_by {
        GroupBy::Entity => String::new(),
        GroupBy::Actor => " per actor".to_string(),
    };
    format!(
        "{} by {}{}, {} from {} to {}",
        report.metric,
        report.rank_by,
        per,
        report.period_type,
        report.start_date,
        report.end_date
    )
}

/// `poster 2, article 1`, most used first.
fn breakdown(item: &RankingItem) -> String {
    let mut parts: Vec<(&String, &i64)> = item.breakdown.iter().collect();
    parts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    parts
        .iter()
        .map(|(entity, count)| format!("{} {}", entity, count))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Name cell, with the breakdown appended for actor rankings.
fn name_with_breakdown(item: &RankingItem) -> String {
    if item.breakdown.is_empty() {
        item.entity_name.clone()
    } else {
        format!("{} ({})", item.entity_name, breakdown(item))
    }
}

fn growth(item: &RankingItem) -> String {
    item.growth_rate
        .map(format_delta)
        .unwrap_or_else(|| "-".to_string())
}

fn trend_growth(trend: &CohortTrend) -> String {
    trend
        .growth_rate
        .map(format_delta)
        .unwrap_or_else(|| "n/a".to_string())
}

fn summary_line(summary: &CohortSummary) -> String {
    format!(
        "{} records, {} users, {} entities, total {:.2}, median {:.2}",
        summary.record_count,
        summary.user_count,
        summary.entity_count,
        summary.total,
        summary.distribution.median
    )
}

// ============================================
// Terminal text
// ============================================

pub fn render_text(reports: &[Report]) -> String {
    let mut out = String::new();

    for report in reports {
        let title = title(report);
        let _ = writeln!(out);
        let _ = writeln!(out, "╭{}╮", "─".repeat(70));
        let _ = writeln!(out, "│{:^70}│", title);
        let _ = writeln!(out, "╰{}╯", "─".repeat(70));

        for bucket in &report.buckets {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", bucket.period.label);

            for (cohort, items) in bucket.cohort_rankings.iter() {
                let summary = bucket.cohort_summaries.get(cohort).cloned().unwrap_or_default();
                let _ = writeln!(out, "  [{}] {}", cohort, summary_line(&summary));
                if items.is_empty() {
                    let _ = writeln!(out, "    (no activity)");
                    continue;
                }
                let _ = writeln!(
                    out,
                    "    {:>3}  {:<24} {:>7} {:>6} {:>12} {:>7} {:>7}",
                    "#", "Name", "Count", "Users", "Value", "Share", "Growth"
                );
                for item in items {
                    let _ = writeln!(
                        out,
                        "    {:>3}  {:<24} {:>7} {:>6} {:>12.2} {:>6.1}% {:>7}",
                        item.rank,
                        truncate(&item.entity_name, 24),
                        item.usage_count,
                        item.user_count,
                        item.value,
                        item.percentage,
                        growth(item)
                    );
                    if !item.breakdown.is_empty() {
                        let _ = writeln!(out, "         {}", breakdown(item));
                    }
                }
            }
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "TRENDS");
        for trend in &report.trends {
            let _ = writeln!(
                out,
                "  {:<10} avg {:.2}  max {:.2}  min {:.2}  change {}",
                trend.cohort,
                trend.average,
                trend.max,
                trend.min,
                trend_growth(trend)
            );
        }
        if report.skipped_records > 0 {
            let _ = writeln!(
                out,
                "  ({} records without a usable value were skipped)",
                report.skipped_records
            );
        }
    }

    out
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut t: String = s.chars().take(width.saturating_sub(1)).collect();
        t.push('…');
        t
    }
}

// ============================================
// Markdown
// ============================================

pub fn render_markdown(reports: &[Report]) -> String {
    let mut out = String::new();

    for report in reports {
        let _ = writeln!(out, "# {}", title(report));
        let _ = writeln!(out);

        for bucket in &report.buckets {
            let _ = writeln!(out, "## {}", bucket.period.label);
            let _ = writeln!(out);

            for (cohort, items) in bucket.cohort_rankings.iter() {
                let _ = writeln!(out, "### {}", cohort);
                let _ = writeln!(out);
                if let Some(summary) = bucket.cohort_summaries.get(cohort) {
                    let _ = writeln!(out, "*{}*", summary_line(summary));
                    let _ = writeln!(out);
                }
                if items.is_empty() {
                    let _ = writeln!(out, "*No activity.*");
                    let _ = writeln!(out);
                    continue;
                }
                let _ = writeln!(out, "| # | Name | Count | Users | Value | Share | Growth |");
                let _ = writeln!(out, "|---|------|-------|-------|-------|-------|--------|");
                for item in items {
                    let _ = writeln!(
                        out,
                        "| {} | {} | {} | {} | {:.2} | {:.1}% | {} |",
                        item.rank,
                        name_with_breakdown(item).replace('|', "\\|"),
                        item.usage_count,
                        item.user_count,
                        item.value,
                        item.percentage,
                        growth(item)
                    );
                }
                let _ = writeln!(out);
            }
        }

        let _ = writeln!(out, "## Trends");
        let _ = writeln!(out);
        let _ = writeln!(out, "| Cohort | Average | Max | Min | Change |");
        let _ = writeln!(out, "|--------|---------|-----|-----|--------|");
        for trend in &report.trends {
            let _ = writeln!(
                out,
                "| {} | {:.2} | {:.2} | {:.2} | {} |",
                trend.cohort,
                trend.average,
                trend.max,
                trend.min,
                trend_growth(trend)
            );
        }
        let _ = writeln!(out);
    }

    out
}

// ============================================
// HTML
// ============================================

const HTML_STYLE: &str = "body{font-family:sans-serif;margin:2em;color:#222}\
table{border-collapse:collapse;margin-bottom:1.5em}\
th,td{border:1px solid #ccc;padding:4px 10px;text-align:right}\
td.name,th.name{text-align:left}\
caption{text-align:left;font-weight:bold;padding:4px 0}";

pub fn render_html(reports: &[Report]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "<!DOCTYPE html>");
    let _ = writeln!(out, "<html><head><meta charset=\"utf-8\">");
    let _ = writeln!(out, "<title>Usage rankings</title>");
    let _ = writeln!(out, "<style>{}</style>", HTML_STYLE);
    let _ = writeln!(out, "</head><body>");

    for report in reports {
        let _ = writeln!(out, "<h1>{}</h1>", escape(&title(report)));

        for bucket in &report.buckets {
            let _ = writeln!(out, "<h2>{}</h2>", escape(&bucket.period.label));
            for (cohort, items) in bucket.cohort_rankings.iter() {
                let _ = writeln!(out, "<table>");
                let summary = bucket
                    .cohort_summaries
                    .get(cohort)
                    .map(summary_line)
                    .unwrap_or_default();
                let _ = writeln!(
                    out,
                    "<caption>{} <small>{}</small></caption>",
                    escape(cohort),
                    escape(&summary)
                );
                let _ = writeln!(
                    out,
                    "<tr><th>#</th><th class=\"name\">Name</th><th>Count</th><th>Users</th>\
                     <th>Value</th><th>Share</th><th>Growth</th></tr>"
                );
                for item in items {
                    let _ = writeln!(
                        out,
                        "<tr><td>{}</td><td class=\"name\">{}</td><td>{}</td><td>{}</td>\
                         <td>{:.2}</td><td>{:.1}%</td><td>{}</td></tr>",
                        item.rank,
                        escape(&name_with_breakdown(item)),
                        item.usage_count,
                        item.user_count,
                        item.value,
                        item.percentage,
                        escape(&growth(item))
                    );
                }
                let _ = writeln!(out, "</table>");
            }
        }

        let _ = writeln!(out, "<h2>Trends</h2>");
        let _ = writeln!(out, "<table>");
        let _ = writeln!(
            out,
            "<tr><th class=\"name\">Cohort</th><th>Average</th><th>Max</th><th>Min</th><th>Change</th></tr>"
        );
        for trend in &report.trends {
            let _ = writeln!(
                out,
                "<tr><td class=\"name\">{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{}</td></tr>",
                escape(&trend.cohort),
                trend.average,
                trend.max,
                trend.min,
                escape(&trend_growth(trend))
            );
        }
        let _ = writeln!(out, "</table>");
    }

    let _ = writeln!(out, "</body></html>");
    out
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

//! Run report
//!
//! The text report lists services and dependencies section by section. The
//! JSON report carries the same data plus the run outcome of every service.

use crate::pipeline::RunSummary;
use crate::results::{Bucket, ResultSnapshot};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_REPORT_NAME: &str = "report.txt";

const SEPARATOR: &str = "----------------";

#[derive(Debug, Serialize)]
struct JsonReport<'a> {
    generated_at: DateTime<Utc>,
    version: &'static str,
    summary: &'a RunSummary,
    unknown_dependencies: Vec<String>,
    without_sources: Vec<String>,
    dependencies: &'a BTreeMap<String, Vec<String>>,
    all_dependencies: Vec<String>,
    tables: &'a ResultSnapshot,
}

/// Report file paths written by [`write_reports`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    pub text: PathBuf,
    pub json: PathBuf,
}

/// `service/gav` lines for one table, grouped by dependency.
fn service_lines(snapshot: &ResultSnapshot, bucket: Bucket) -> Vec<String> {
    let mut by_dependency: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for (service, entries) in snapshot.table(bucket) {
        for gav in entries {
            by_dependency.entry(gav).or_default().push(service);
        }
    }
    by_dependency
        .into_iter()
        .flat_map(|(gav, services)| {
            services
                .into_iter()
                .map(move |service| format!("{}/{}", service, gav))
        })
        .collect()
}

fn all_dependencies(snapshot: &ResultSnapshot) -> Vec<String> {
    snapshot
        .known
        .values()
        .flatten()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn section(out: &mut String, title: &str, lines: impl IntoIterator<Item = impl AsRef<str>>) {
    let _ = writeln!(out, "{}:\n", title);
    for line in lines {
        let _ = writeln!(out, "{}", line.as_ref());
    }
    out.push('\n');
}

/// Renders the plain text report.
pub fn render_text(snapshot: &ResultSnapshot, summary: &RunSummary) -> String {
    let mut out = String::new();

    section(&mut out, "Processed services", snapshot.known.keys());
    section(&mut out, "Failed services", summary.failed());
    section(&mut out, "Projects not found", &snapshot.unknown_projects);
    section(
        &mut out,
        "Dependencies not found (service/dependency)",
        service_lines(snapshot, Bucket::Unknown),
    );
    section(
        &mut out,
        "Dependencies without sources (service/dependency)",
        service_lines(snapshot, Bucket::WithoutSource),
    );

    out.push_str("Dependencies per service:\n");
    for (service, entries) in &snapshot.known {
        let _ = writeln!(out, "\n{}\nService: {}", SEPARATOR, service);
        for gav in entries {
            let _ = writeln!(out, "{}", gav);
        }
    }
    out.push('\n');

    section(&mut out, "All dependencies", all_dependencies(snapshot));
    out
}

/// Renders the JSON report.
pub fn render_json(snapshot: &ResultSnapshot, summary: &RunSummary) -> Result<String> {
    let report = JsonReport {
        generated_at: Utc::now(),
        version: crate::VERSION,
        summary,
        unknown_dependencies: service_lines(snapshot, Bucket::Unknown),
        without_sources: service_lines(snapshot, Bucket::WithoutSource),
        dependencies: &snapshot.known,
        all_dependencies: all_dependencies(snapshot),
        tables: snapshot,
    };
    serde_json::to_string_pretty(&report).context("Failed to serialize JSON report")
}

/// Writes `<output>/<name>` and a JSON twin next to it (`.json` extension).
pub fn write_reports(
    output_dir: &Path,
    name: &str,
    snapshot: &ResultSnapshot,
    summary: &RunSummary,
) -> Result<ReportFiles> {
    let text = output_dir.join(name);
    let json = text.with_extension("json");

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create {}", output_dir.display()))?;
    fs::write(&text, render_text(snapshot, summary))
        .with_context(|| format!("Failed to write report {}", text.display()))?;
    fs::write(&json, render_json(snapshot, summary)?)
        .with_context(|| format!("Failed to write report {}", json.display()))?;

    info!(text = %text.display(), json = %json.display(), "Reports written");
    Ok(ReportFiles { text, json })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinate::Coordinate;
    use crate::pipeline::{ServiceOutcome, Stage};
    use crate::results::ResultSet;
    use tempfile::TempDir;

    fn fixture() -> (ResultSnapshot, RunSummary) {
        let results = ResultSet::new();
        let lib = Coordinate::new("com.foo", "lib", "1.0");
        let util = Coordinate::new("org.bar", "util", "2.1");

        results.record("billing", Bucket::Known, &lib);
        results.record_all("billing", &[Bucket::Known, Bucket::Unknown], &util);
        results.record("orders", Bucket::Known, &lib);
        results.record_all("orders", &[Bucket::Known, Bucket::WithoutSource], &util);
        results.record("orders", Bucket::Known, &lib);
        results.record_unknown_project("ghost");

        let mut services = BTreeMap::new();
        services.insert(
            "billing".to_string(),
            ServiceOutcome::Done {
                archive: PathBuf::from("out/billing.tar.gz"),
                uploaded: false,
                dependency_errors: 0,
            },
        );
        services.insert(
            "payments".to_string(),
            ServiceOutcome::Failed {
                stage: Stage::Building,
                error: "exit code 1".to_string(),
            },
        );
        let summary = RunSummary {
            run_id: "run-1".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            services,
        };
        (results.snapshot(), summary)
    }

    #[test]
    fn test_text_sections_in_order() {
        let (snapshot, summary) = fixture();
        let text = render_text(&snapshot, &summary);

        let order = [
            "Processed services:",
            "Failed services:",
            "Projects not found:",
            "Dependencies not found",
            "Dependencies without sources",
            "Dependencies per service:",
            "All dependencies:",
        ];
        let positions: Vec<usize> = order
            .iter()
            .map(|title| text.find(title).unwrap_or_else(|| panic!("{}", title)))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));

        assert!(text.contains("payments\n"));
        assert!(text.contains("ghost\n"));
        assert!(text.contains("billing/org.bar:util:2.1\n"));
        assert!(text.contains("orders/org.bar:util:2.1\n"));
        assert!(text.contains("Service: orders\ncom.foo:lib:1.0\norg.bar:util:2.1\n"));
    }

    #[test]
    fn test_all_dependencies_sorted_unique() {
        let (snapshot, summary) = fixture();
        let text = render_text(&snapshot, &summary);
        let tail = text.split("All dependencies:\n\n").nth(1).unwrap();
        assert_eq!(tail.trim_end(), "com.foo:lib:1.0\norg.bar:util:2.1");
    }

    #[test]
    fn test_write_reports() {
        let tmp = TempDir::new().unwrap();
        let (snapshot, summary) = fixture();

        let files = write_reports(tmp.path(), DEFAULT_REPORT_NAME, &snapshot, &summary).unwrap();
        assert_eq!(files.text, tmp.path().join("report.txt"));
        assert_eq!(files.json, tmp.path().join("report.json"));

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&files.json).unwrap()).unwrap();
        assert_eq!(json["summary"]["run_id"], "run-1");
        assert_eq!(json["summary"]["services"]["payments"]["state"], "failed");
        assert_eq!(json["summary"]["services"]["payments"]["stage"], "building");
        assert_eq!(json["unknown_dependencies"][0], "billing/org.bar:util:2.1");
        assert_eq!(json["tables"]["unknown_projects"][0], "ghost");
        assert!(json["generated_at"].is_string());
    }
}

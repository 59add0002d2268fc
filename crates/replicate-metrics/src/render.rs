//! Output rendering for collected observations.
//!
//! Three shapes are supported: a plain line-per-observation dump, a JSON
//! array, and the Prometheus text exposition format (suitable for a
//! node-exporter textfile collector).

use std::fmt::Write as _;
use std::str::FromStr;

use crate::observation::Observation;

/// How observations are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Prometheus,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "prometheus" | "prom" => Ok(Self::Prometheus),
            other => Err(format!(
                "unknown output format '{other}' (expected text, json, or prometheus)"
            )),
        }
    }
}

/// Render observations in the requested format.
pub fn render(observations: &[Observation], format: OutputFormat) -> serde_json::Result<String> {
    match format {
        OutputFormat::Text => Ok(render_text(observations)),
        OutputFormat::Json => serde_json::to_string_pretty(observations),
        OutputFormat::Prometheus => Ok(render_prometheus(observations)),
    }
}

/// One `name value tag,tag` line per observation.
pub fn render_text(observations: &[Observation]) -> String {
    let mut out = String::new();
    for o in observations {
        let tags: Vec<String> = o.tags.iter().map(ToString::to_string).collect();
        let _ = writeln!(out, "{} {} {}", o.name, o.value, tags.join(","));
    }
    out
}

/// Render observations as Prometheus gauges.
///
/// Metric names are sanitized to `[a-zA-Z0-9_]` and each distinct name gets
/// a single `# TYPE` line, in order of first appearance. Tags become labels.
pub fn render_prometheus(observations: &[Observation]) -> String {
    let mut out = String::new();
    let mut declared: Vec<String> = Vec::new();

    for o in observations {
        let name = sanitize_name(&o.name);
        if !declared.contains(&name) {
            let _ = writeln!(out, "# TYPE {name} gauge");
            declared.push(name.clone());
        }

        let labels: Vec<String> = o
            .tags
            .iter()
            .map(|t| format!("{}=\"{}\"", sanitize_name(&t.key), escape_label(&t.value)))
            .collect();

        if labels.is_empty() {
            let _ = writeln!(out, "{name} {}", o.value);
        } else {
            let _ = writeln!(out, "{name}{{{}}} {}", labels.join(","), o.value);
        }
    }

    out
}

fn sanitize_name(raw: &str) -> String {
    let trimmed = raw.trim_end_matches(['.', '-']);
    trimmed
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn escape_label(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

//! Command line runner for topo-qa-lib
//!
//! Run with: topo-qa --scenario scenario.json [--tile-size 500] [--format json]

mod scenario;
mod settings;

use scenario::Scenario;
use settings::{OutputFormat, Settings};
use std::io::Write;
use topo_qa_lib::{NoopObserver, QaError, TestContainer};

fn setup_logging() {
    use tracing_subscriber::EnvFilter;

    if std::env::var("RUST_LOG").is_err() {
        // Safety: single-threaded at startup
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
}

fn format_text(error: &QaError) -> String {
    let code = error
        .issue_code
        .as_ref()
        .map(|c| c.as_str())
        .unwrap_or("-");
    let rows = error
        .involved_rows
        .iter()
        .map(|r| format!("{}:{}", r.table, r.oid))
        .collect::<Vec<_>>()
        .join(",");
    match &error.affected_component {
        Some(component) => format!(
            "{code}\t{}\t[{rows}]\t{} ({component})",
            error.check, error.description
        ),
        None => format!("{code}\t{}\t[{rows}]\t{}", error.check, error.description),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_cli();
    setup_logging();

    let scenario = Scenario::load(&settings.scenario)?;
    let dataset = scenario.dataset()?;
    let checks = scenario.checks(&dataset)?;

    let mut config = scenario.container.clone();
    if let Some(tile_size) = settings.tile_size {
        config.tile_size = tile_size;
    }
    if settings.extent.is_some() {
        config.extent = settings.extent;
    }
    config.keep_error_geometry = settings.keep_geometry;

    let mut container = TestContainer::new(dataset, config);
    for check in checks {
        container.add_check(check)?;
    }
    let errors = container.execute(&mut NoopObserver)?;
    tracing::info!(issues = errors.len(), "Verification finished");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match settings.format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut out, &errors)?;
            writeln!(out)?;
        }
        OutputFormat::Text => {
            for error in &errors {
                writeln!(out, "{}", format_text(error))?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use topo_qa_lib::{InvolvedRow, IssueCode};

    #[test]
    fn test_format_text() {
        let error = QaError {
            check: "PseudoNodes(roads)".to_string(),
            description: "Pseudo Node".to_string(),
            issue_code: Some(IssueCode::new("PseudoNodes", "PseudoNode")),
            involved_rows: vec![
                InvolvedRow {
                    table: "roads".to_string(),
                    oid: 1,
                },
                InvolvedRow {
                    table: "roads".to_string(),
                    oid: 2,
                },
            ],
            geometry: None,
            affected_component: None,
        };
        assert_eq!(
            format_text(&error),
            "PseudoNodes.PseudoNode\tPseudoNodes(roads)\t[roads:1,roads:2]\tPseudo Node"
        );
    }
}

use clap::{Parser, ValueEnum};
use geo::{Coord, Rect};
use std::path::PathBuf;

/// How issues are written to stdout
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One JSON array with all issues
    Json,
    /// One line per issue
    Text,
}

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Topo QA - Runs topological quality checks on the feature tables of a scenario file
pub struct Settings {
    /// JSON scenario with tables, features and checks
    #[clap(short, long, value_name = "FILE")]
    pub scenario: PathBuf,

    /// Tile edge length, overriding the scenario's container settings
    #[clap(short, long)]
    pub tile_size: Option<f64>,

    /// Output format of the issues
    #[clap(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Only verify this extent, given as xmin,ymin,xmax,ymax
    #[clap(short, long, value_parser = parse_extent, allow_hyphen_values = true)]
    pub extent: Option<Rect<f64>>,

    /// Keep the issue geometries in the output
    #[clap(long, default_value = "false")]
    pub keep_geometry: bool,
}

impl Settings {
    /// Parse the process arguments, exiting with clap's message on failure
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }
}

fn parse_extent(text: &str) -> Result<Rect<f64>, String> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>().map_err(|e| format!("'{v}': {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    let [xmin, ymin, xmax, ymax] = values[..] else {
        return Err(format!("expected xmin,ymin,xmax,ymax, got {} values", values.len()));
    };
    if !(xmin < xmax && ymin < ymax) {
        return Err(format!("empty extent {text}"));
    }
    Ok(Rect::new(Coord { x: xmin, y: ymin }, Coord { x: xmax, y: ymax }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let settings = Settings::try_parse_from([
            "topo-qa",
            "--scenario",
            "roads.json",
            "--tile-size",
            "250",
            "--format",
            "json",
            "--extent",
            "-10,0,10,5.5",
        ])
        .unwrap();
        assert_eq!(settings.scenario, PathBuf::from("roads.json"));
        assert_eq!(settings.tile_size, Some(250.0));
        assert_eq!(settings.format, OutputFormat::Json);
        assert_eq!(
            settings.extent,
            Some(Rect::new(Coord { x: -10.0, y: 0.0 }, Coord { x: 10.0, y: 5.5 }))
        );
        assert!(!settings.keep_geometry);
    }

    #[test]
    fn test_parse_extent_errors() {
        assert!(parse_extent("1,2,3").is_err());
        assert!(parse_extent("0,0,x,1").is_err());
        assert!(parse_extent("5,0,1,1").is_err());
    }
}

use chrono::{DateTime, Utc};
use clap::Parser;
use std::path::PathBuf;
use survey_core::Config;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Survey CLI - Load a road-survey bundle, apply lane edits and report the timeline model
pub struct Settings {
    /// Survey bundle (JSON) with trajectory, span and lane records
    #[clap(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// GPX trajectory replacing the bundle's trajectory records
    #[clap(short, long, value_name = "FILE")]
    pub gpx: Option<PathBuf>,

    /// Core configuration (JSON); CLI flags below override its values
    #[clap(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Write the report here instead of stdout
    #[clap(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Vehicle plate (defaults to the bundle's, then "unknown")
    #[clap(long)]
    pub plate: Option<String>,

    /// Survey file id (defaults to the bundle's, then the input file stem)
    #[clap(long)]
    pub file_id: Option<String>,

    /// Timeline width in pixels
    #[clap(long)]
    pub pixel_width: Option<f64>,

    /// Narrowest zoom window in seconds
    #[clap(long)]
    pub min_span: Option<f64>,

    /// Visible event count above which bucketed counts are reported
    #[clap(long)]
    pub aggregation_threshold: Option<usize>,

    /// Number of time buckets in the view report
    #[clap(long, default_value = "24")]
    pub buckets: usize,

    /// Zoom factor applied before reporting (> 1 zooms in)
    #[clap(long, requires = "center")]
    pub zoom: Option<f64>,

    /// Zoom center (RFC 3339)
    #[clap(long)]
    pub center: Option<DateTime<Utc>>,
}

impl Settings {
    /// Parse the process arguments, exiting with usage on error
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Apply CLI overrides on top of a base configuration
    pub fn core_config(&self, mut config: Config) -> Config {
        if let Some(pixel_width) = self.pixel_width {
            config.pixel_width = pixel_width;
        }
        if let Some(min_span) = self.min_span {
            config.min_view_span_secs = min_span;
        }
        if let Some(threshold) = self.aggregation_threshold {
            config.aggregation_threshold = threshold;
        }
        config
    }

    /// File id fallback derived from the input path
    pub fn input_stem(&self) -> Option<String> {
        self.input
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
    }
}

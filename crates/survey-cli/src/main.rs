mod bundle;
mod logging;
mod settings;

use bundle::{SurveyBundle, SurveyReport, apply_lane_actions, apply_overrides};
use settings::Settings;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::process::ExitCode;
use survey_core::{Config, GpsTrajectory, Survey, SurveyError};

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error(transparent)]
    Survey(#[from] SurveyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() -> ExitCode {
    let _guard = logging::setup_logging_and_profiling();
    let settings = Settings::from_cli();

    match run(&settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(settings: &Settings) -> Result<(), CliError> {
    profiling::scope!("run");

    let config = match &settings.config {
        Some(path) => serde_json::from_reader(BufReader::new(File::open(path)?))?,
        None => Config::default(),
    };
    let config = settings.core_config(config);
    tracing::debug!("Using {:?}", config);

    let bundle = SurveyBundle::from_reader(BufReader::new(File::open(&settings.input)?))?;

    let trajectory = match &settings.gpx {
        Some(path) => {
            if !bundle.trajectory.is_empty() {
                tracing::warn!(
                    "Ignoring {} bundle trajectory records in favour of {}",
                    bundle.trajectory.len(),
                    path.display()
                );
            }
            GpsTrajectory::read_gpx(BufReader::new(File::open(path)?))?
        }
        None => GpsTrajectory::from_records(bundle.trajectory.iter().cloned()),
    };

    let plate = settings
        .plate
        .clone()
        .or_else(|| bundle.plate.clone())
        .unwrap_or_else(|| "unknown".to_string());
    let file_id = settings
        .file_id
        .clone()
        .or_else(|| bundle.file_id.clone())
        .or_else(|| settings.input_stem())
        .unwrap_or_else(|| "survey".to_string());

    let mut survey = Survey::load(
        config,
        plate,
        file_id,
        trajectory,
        &bundle.spans,
        bundle.extent(),
    )?;

    let mut rejected = apply_lane_actions(survey.lanes_mut(), &bundle.lanes);
    let (applied, rejected_overrides) = apply_overrides(survey.lanes_mut(), &bundle.overrides);
    rejected.extend(rejected_overrides);
    if !rejected.is_empty() {
        tracing::info!("{} input steps rejected", rejected.len());
    }

    if let (Some(factor), Some(center)) = (settings.zoom, settings.center) {
        survey.viewport_mut().zoom(factor, center);
    }

    let report = SurveyReport::build(&survey, settings.buckets, applied, rejected);
    match &settings.output {
        Some(path) => {
            let mut writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(&mut writer, &report)?;
            writer.flush()?;
            tracing::info!("Report written to {}", path.display());
        }
        None => {
            let stdout = std::io::stdout();
            let mut writer = stdout.lock();
            serde_json::to_writer_pretty(&mut writer, &report)?;
            writeln!(writer)?;
        }
    }
    Ok(())
}

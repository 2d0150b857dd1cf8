//! Dengue forecasting CLI
//!
//! Trains, predicts and lists backups for one reporting unit, reading
//! weather and case data from CSV files. Responses are printed as JSON.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use dengue_forecast::{
    ForecastError, ForecastService, InMemoryCases, InMemoryWeather, OrganizationalUnit,
    PredictionRequest, Settings, TrainingRequest, UnitType,
};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Weekly dengue case forecasting
#[derive(Parser)]
#[command(name = "denguecast")]
#[command(about = "Train and query weekly dengue forecasting models", long_about = None)]
struct Cli {
    /// Settings file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Model directory, overrides the settings file
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train a model for the unit's scope
    Train {
        #[command(flatten)]
        source: Source,

        /// Training request (JSON); defaults apply when omitted
        #[arg(long)]
        request: Option<PathBuf>,
    },
    /// Forecast the weeks listed in a prediction request
    Predict {
        #[command(flatten)]
        source: Source,

        /// Prediction request (JSON)
        #[arg(long)]
        request: PathBuf,
    },
    /// List backups kept for the unit's scope
    Backups {
        #[command(flatten)]
        source: Source,
    },
}

#[derive(Args)]
struct Source {
    /// Weekly weather CSV
    #[arg(long)]
    weather: PathBuf,

    /// Case consultations CSV
    #[arg(long)]
    cases: PathBuf,

    /// Reporting unit type (RESU, PESU, CESU, NATIONAL, ...)
    #[arg(long)]
    unit_type: String,

    #[arg(long, default_value = "")]
    region: String,

    #[arg(long, default_value = "")]
    surveillance_unit: String,

    #[arg(long, default_value = "")]
    province: String,

    #[arg(long, default_value = "")]
    city: String,
}

impl Source {
    fn unit(&self) -> anyhow::Result<OrganizationalUnit> {
        Ok(OrganizationalUnit {
            unit_type: self.unit_type.parse::<UnitType>()?,
            region: self.region.clone(),
            surveillance_unit: self.surveillance_unit.clone(),
            province: self.province.clone(),
            city: self.city.clone(),
        })
    }

    /// Weather rows without a `Location` column belong to the unit's own
    /// weather scope
    fn service(&self, settings: &Settings) -> anyhow::Result<ForecastService<InMemoryWeather, InMemoryCases>> {
        let unit = self.unit()?;
        let default_location = match unit.unit_type {
            UnitType::Resu => &unit.region,
            UnitType::Pesu => &unit.province,
            _ => &unit.city,
        };

        let weather = InMemoryWeather::from_csv(&self.weather, default_location)
            .with_context(|| format!("Failed to load weather from {}", self.weather.display()))?;
        let cases = InMemoryCases::from_csv(&self.cases)
            .with_context(|| format!("Failed to load cases from {}", self.cases.display()))?;

        Ok(ForecastService::new(settings, weather, cases)?)
    }
}

fn read_request<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse request {}", path.display()))
}

fn run(cli: &Cli) -> anyhow::Result<serde_json::Value> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.model_dir {
        settings.model_dir = dir.clone();
    }
    log::debug!("Using model directory {}", settings.model_dir.display());

    let response = match &cli.command {
        Command::Train { source, request } => {
            let request: TrainingRequest = match request {
                Some(path) => read_request(path)?,
                None => TrainingRequest::default(),
            };
            let service = source.service(&settings)?;
            serde_json::to_value(service.train(&source.unit()?, &request)?)?
        }
        Command::Predict { source, request } => {
            let request: PredictionRequest = read_request(request)?;
            let service = source.service(&settings)?;
            serde_json::to_value(service.predict(&source.unit()?, &request)?)?
        }
        Command::Backups { source } => {
            let service = source.service(&settings)?;
            serde_json::json!({
                "success": true,
                "backups": service.list_backups(&source.unit()?)?,
            })
        }
    };
    Ok(response)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    log::info!("denguecast v{}", dengue_forecast::VERSION);

    match run(&cli) {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response).unwrap_or_default());
            ExitCode::SUCCESS
        }
        Err(err) => {
            let body = match err.downcast_ref::<ForecastError>() {
                Some(forecast) => forecast.to_response(),
                None => serde_json::json!({
                    "success": false,
                    "error": "cli_error",
                    "message": format!("{:#}", err),
                }),
            };
            log::error!("{:#}", err);
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
            ExitCode::FAILURE
        }
    }
}

//! Weekly series data and assembly
//!
//! Weather arrives as one record per calendar week per location. Case counts
//! come from a separate store of consultation records. The assembler joins
//! the two into an ordered series of [`WeeklyObservation`]s: one row per
//! weather week, with the number of consultations in that week's 7-day span.

use crate::error::{ForecastError, Result};
use crate::location::LocationContext;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Number of covariate columns per week
pub const FEATURE_COUNT: usize = 3;

/// One week of joined weather and case data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyObservation {
    pub week_start: NaiveDate,
    pub location_key: String,
    pub rainfall: f64,
    pub max_temperature: f64,
    pub humidity: f64,
    pub case_count: u32,
}

impl WeeklyObservation {
    /// Covariates in model column order
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        [self.rainfall, self.max_temperature, self.humidity]
    }
}

/// A weekly weather record for one location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherWeek {
    pub week_start: NaiveDate,
    pub location: String,
    pub rainfall: f64,
    pub max_temperature: f64,
    pub humidity: f64,
}

/// Caller-supplied weather for a week that has not happened yet
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FutureWeather {
    pub rainfall: f64,
    pub max_temperature: f64,
    pub humidity: f64,
}

impl FutureWeather {
    /// Covariates in model column order
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        [self.rainfall, self.max_temperature, self.humidity]
    }
}

/// Selects the weather series of one location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeatherFilter {
    pub location: String,
}

impl WeatherFilter {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
        }
    }
}

/// Selects which case records count towards a series
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseFilter {
    /// Cases reported by any unit within a region
    Region(String),
    /// Cases reported by units of one surveillance unit
    SurveillanceUnit(String),
}

/// A single case consultation, reduced to what the forecast needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub date_con: NaiveDate,
    pub region: String,
    pub surveillance_unit: String,
}

impl CaseFilter {
    /// Whether `record` falls under this filter
    pub fn matches(&self, record: &CaseRecord) -> bool {
        match self {
            CaseFilter::Region(region) => &record.region == region,
            CaseFilter::SurveillanceUnit(unit) => &record.surveillance_unit == unit,
        }
    }
}

/// Ordered weekly weather query
pub trait WeatherRepository: Send + Sync {
    /// Weather weeks for the filter, ascending by `week_start`
    fn weekly_weather(&self, filter: &WeatherFilter) -> Result<Vec<WeatherWeek>>;
}

/// Weekly case-count aggregation
pub trait CaseCounter: Send + Sync {
    /// Cases with a consultation date in `[week_start, week_start + 7 days)`
    fn count_cases(&self, week_start: NaiveDate, filter: &CaseFilter) -> Result<u32>;
}

/// Weather records held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryWeather {
    records: Vec<WeatherWeek>,
}

#[derive(Debug, Deserialize)]
struct WeatherCsvRow {
    #[serde(rename = "Time")]
    time: String,
    #[serde(rename = "Rainfall")]
    rainfall: f64,
    #[serde(rename = "MaxTemperature")]
    max_temperature: f64,
    #[serde(rename = "Humidity")]
    humidity: f64,
    #[serde(rename = "Location", default)]
    location: Option<String>,
}

impl InMemoryWeather {
    pub fn new(records: Vec<WeatherWeek>) -> Self {
        Self { records }
    }

    /// Load a `Time,Rainfall,MaxTemperature,Humidity[,Location]` CSV where
    /// `Time` reads like `2011-w1`. Rows without a location get `default_location`.
    pub fn from_csv<P: AsRef<Path>>(path: P, default_location: &str) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut records = Vec::new();
        let mut labels: HashMap<(String, NaiveDate), String> = HashMap::new();

        for row in reader.deserialize() {
            let row: WeatherCsvRow = row?;
            let location = match row.location {
                Some(loc) if !loc.trim().is_empty() => loc,
                _ => default_location.to_string(),
            };
            let week_start = parse_year_week(&row.time)?;
            if let Some(earlier) = labels.insert((location.clone(), week_start), row.time.clone()) {
                if earlier.trim() != row.time.trim() {
                    log::warn!(
                        "Weather labels '{}' and '{}' for '{}' both start on {}; only the later row is kept",
                        earlier,
                        row.time,
                        location,
                        week_start
                    );
                }
            }
            records.push(WeatherWeek {
                week_start,
                location,
                rainfall: row.rainfall,
                max_temperature: row.max_temperature,
                humidity: row.humidity,
            });
        }

        log::info!("Loaded {} weather weeks from CSV", records.len());
        Ok(Self { records })
    }

    /// Add one record
    pub fn push(&mut self, record: WeatherWeek) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl WeatherRepository for InMemoryWeather {
    fn weekly_weather(&self, filter: &WeatherFilter) -> Result<Vec<WeatherWeek>> {
        let mut weeks: Vec<WeatherWeek> = self
            .records
            .iter()
            .filter(|w| w.location == filter.location)
            .cloned()
            .collect();
        weeks.sort_by_key(|w| w.week_start);
        Ok(weeks)
    }
}

/// Case records held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCases {
    records: Vec<CaseRecord>,
}

impl InMemoryCases {
    pub fn new(records: Vec<CaseRecord>) -> Self {
        Self { records }
    }

    /// Load a `date_con,region,surveillance_unit` CSV
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let records = reader
            .deserialize()
            .collect::<std::result::Result<Vec<CaseRecord>, csv::Error>>()?;

        log::info!("Loaded {} case records from CSV", records.len());
        Ok(Self { records })
    }

    /// Add one record
    pub fn push(&mut self, record: CaseRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CaseCounter for InMemoryCases {
    fn count_cases(&self, week_start: NaiveDate, filter: &CaseFilter) -> Result<u32> {
        let week_end = week_start + Duration::days(7);
        let count = self
            .records
            .iter()
            .filter(|r| r.date_con >= week_start && r.date_con < week_end)
            .filter(|r| filter.matches(r))
            .count();
        u32::try_from(count)
            .map_err(|_| ForecastError::Validation(format!("Case count {} overflows", count)))
    }
}

/// Joins weather weeks with weekly case counts
pub struct SeriesAssembler<'a, W: ?Sized, C: ?Sized> {
    weather: &'a W,
    cases: &'a C,
}

impl<'a, W, C> SeriesAssembler<'a, W, C>
where
    W: WeatherRepository + ?Sized,
    C: CaseCounter + ?Sized,
{
    pub fn new(weather: &'a W, cases: &'a C) -> Self {
        Self { weather, cases }
    }

    /// Build the ordered weekly series for a location.
    ///
    /// Only weeks with a weather record appear; weeks are never synthesized.
    /// Duplicate weather rows for the same week keep the last one.
    pub fn assemble(&self, ctx: &LocationContext) -> Result<Vec<WeeklyObservation>> {
        let weeks = self.weather.weekly_weather(&ctx.weather_filter)?;

        let mut by_week: BTreeMap<NaiveDate, WeatherWeek> = BTreeMap::new();
        for week in weeks {
            if by_week.insert(week.week_start, week).is_some() {
                log::warn!(
                    "Duplicate weather week for '{}', keeping the latest record",
                    ctx.weather_filter.location
                );
            }
        }

        if by_week.is_empty() {
            return Err(ForecastError::DataUnavailable(format!(
                "No weekly weather records for '{}'",
                ctx.weather_filter.location
            )));
        }

        let observations = by_week
            .into_values()
            .map(|week| -> Result<WeeklyObservation> {
                let case_count = self.cases.count_cases(week.week_start, &ctx.case_filter)?;
                Ok(WeeklyObservation {
                    week_start: week.week_start,
                    location_key: ctx.location_key.as_str().to_string(),
                    rainfall: week.rainfall,
                    max_temperature: week.max_temperature,
                    humidity: week.humidity,
                    case_count,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        log::info!(
            "Assembled {} weekly observations for '{}'",
            observations.len(),
            ctx.location_key
        );
        Ok(observations)
    }
}

/// Parse a `YYYY-wN` label into the Monday starting that week, counting
/// weeks from January 1st.
///
/// The Monday can fall in the previous year: `2021-w1` and `2020-w53` both
/// map to 2020-12-28.
pub fn parse_year_week(label: &str) -> Result<NaiveDate> {
    let invalid = || ForecastError::Validation(format!("Invalid year-week label: {}", label));

    let (year, week) = label.trim().split_once("-w").ok_or_else(invalid)?;
    let year: i32 = year.parse().map_err(|_| invalid())?;
    let week: i64 = week.parse().map_err(|_| invalid())?;
    if !(1..=53).contains(&week) {
        return Err(invalid());
    }

    let first_day = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid)?;
    let start = first_day + Duration::weeks(week - 1);
    Ok(start - Duration::days(start.weekday().num_days_from_monday() as i64))
}

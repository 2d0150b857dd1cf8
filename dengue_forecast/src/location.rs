//! Organizational scope resolution
//!
//! A caller belongs to a disease reporting unit. The unit decides which case
//! records count towards its series, which weather station series applies,
//! and the key its model artifacts are stored under. The result is an
//! immutable [`LocationContext`] handed to every pipeline stage.

use crate::data::{CaseFilter, WeatherFilter};
use crate::error::{ForecastError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier for the scope a model is trained for, safe to embed in file names
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct LocationKey(String);

impl LocationKey {
    /// Normalize a display name into a key: lowercase, spaces become `_`,
    /// and anything outside `[a-z0-9_-]` becomes `_` as well
    pub fn from_name(name: &str) -> Result<Self> {
        let key: String = name
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '_' | '-' => c,
                _ => '_',
            })
            .collect();

        if key.is_empty() {
            return Err(ForecastError::Validation(
                "Location name must not be empty".to_string(),
            ));
        }
        Ok(Self(key))
    }

    /// Borrow the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LocationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a pipeline stage needs to know about the caller's scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationContext {
    pub location_key: LocationKey,
    pub case_filter: CaseFilter,
    pub weather_filter: WeatherFilter,
}

/// Kind of reporting unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitType {
    /// Regional epidemiology and surveillance unit
    Resu,
    /// Provincial epidemiology and surveillance unit
    Pesu,
    /// City epidemiology and surveillance unit
    Cesu,
    /// National office, which does not own a model
    National,
    /// Any other reporting unit (hospitals, clinics)
    Other,
}

impl FromStr for UnitType {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "RESU" => Ok(UnitType::Resu),
            "PESU" => Ok(UnitType::Pesu),
            "CESU" => Ok(UnitType::Cesu),
            "NATIONAL" => Ok(UnitType::National),
            "" => Err(ForecastError::Validation(
                "Unit type must not be empty".to_string(),
            )),
            _ => Ok(UnitType::Other),
        }
    }
}

/// The caller's reporting unit as known to the organizational hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationalUnit {
    pub unit_type: UnitType,
    pub region: String,
    pub surveillance_unit: String,
    pub province: String,
    pub city: String,
}

/// Collaborator turning a caller's unit into a pipeline context
pub trait LocationResolver: Send + Sync {
    fn resolve(&self, unit: &OrganizationalUnit) -> Result<LocationContext>;
}

/// Resolver following the surveillance hierarchy: regional units forecast
/// their whole region, every other unit forecasts its surveillance unit
/// against provincial or city weather.
#[derive(Debug, Clone, Copy, Default)]
pub struct HierarchyResolver;

impl LocationResolver for HierarchyResolver {
    fn resolve(&self, unit: &OrganizationalUnit) -> Result<LocationContext> {
        match unit.unit_type {
            UnitType::National => Err(ForecastError::Unsupported(
                "National scope has no location-specific model".to_string(),
            )),
            UnitType::Resu => Ok(LocationContext {
                location_key: LocationKey::from_name(&unit.region)?,
                case_filter: CaseFilter::Region(unit.region.clone()),
                weather_filter: WeatherFilter::new(&unit.region),
            }),
            UnitType::Pesu | UnitType::Cesu | UnitType::Other => {
                let weather_location = if unit.unit_type == UnitType::Pesu {
                    &unit.province
                } else {
                    &unit.city
                };
                Ok(LocationContext {
                    location_key: LocationKey::from_name(&unit.surveillance_unit)?,
                    case_filter: CaseFilter::SurveillanceUnit(unit.surveillance_unit.clone()),
                    weather_filter: WeatherFilter::new(weather_location),
                })
            }
        }
    }
}

#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use dengue_forecast::{
    CaseRecord, InMemoryCases, InMemoryWeather, OrganizationalUnit, UnitType, WeatherWeek,
    WeeklyObservation,
};

pub const REGION: &str = "Region X";
pub const SURVEILLANCE_UNIT: &str = "Bay Health Office";

/// Monday 2022-01-03
pub fn first_monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 1, 3).unwrap()
}

fn rainfall(i: usize) -> f64 {
    50.0 + 30.0 * (i as f64 / 4.0).sin()
}

fn max_temperature(i: usize) -> f64 {
    30.0 + 2.0 * (i as f64 / 5.0).cos()
}

fn humidity(i: usize) -> f64 {
    70.0 + 10.0 * (i as f64 / 3.0).sin()
}

/// Cases loosely follow rainfall from two weeks earlier
fn cases(i: usize) -> u32 {
    let lagged = rainfall(i.saturating_sub(2));
    (lagged / 8.0).round() as u32 + (i % 3) as u32
}

/// `n` consecutive weekly observations for `REGION`
pub fn weekly_series(n: usize) -> Vec<WeeklyObservation> {
    (0..n)
        .map(|i| WeeklyObservation {
            week_start: first_monday() + Duration::weeks(i as i64),
            location_key: "region_x".to_string(),
            rainfall: rainfall(i),
            max_temperature: max_temperature(i),
            humidity: humidity(i),
            case_count: cases(i),
        })
        .collect()
}

/// Weather and case stores backing `weekly_series(n)`
pub fn region_stores(n: usize) -> (InMemoryWeather, InMemoryCases) {
    let mut weather = InMemoryWeather::default();
    let mut records = InMemoryCases::default();

    for obs in weekly_series(n) {
        weather.push(WeatherWeek {
            week_start: obs.week_start,
            location: REGION.to_string(),
            rainfall: obs.rainfall,
            max_temperature: obs.max_temperature,
            humidity: obs.humidity,
        });
        for j in 0..obs.case_count {
            records.push(CaseRecord {
                date_con: obs.week_start + Duration::days(i64::from(j % 7)),
                region: REGION.to_string(),
                surveillance_unit: SURVEILLANCE_UNIT.to_string(),
            });
        }
    }

    (weather, records)
}

pub fn regional_unit() -> OrganizationalUnit {
    OrganizationalUnit {
        unit_type: UnitType::Resu,
        region: REGION.to_string(),
        surveillance_unit: SURVEILLANCE_UNIT.to_string(),
        province: "Laguna".to_string(),
        city: "Calamba".to_string(),
    }
}

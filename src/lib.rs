//! # Denguecast
//!
//! Umbrella crate for the denguecast workspace. It re-exports the numeric
//! building blocks of [`series_math`] and the forecasting pipeline of
//! [`dengue_forecast`] so a host only needs one dependency.
//!
//! ## Example
//!
//! ```
//! use denguecast_workspace::pipeline::LocationKey;
//!
//! let key = LocationKey::from_name("Region IV-A").unwrap();
//! assert_eq!(key.as_str(), "region_iv-a");
//! ```

pub use dengue_forecast as pipeline;
pub use series_math as math;

pub use dengue_forecast::{ForecastError, ForecastService, Settings, VERSION};

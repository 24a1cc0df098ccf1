//! Weather Sources
//!
//! Abstraction over where weather data comes from.

mod fixed;

pub use fixed::FixedWeatherSource;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::WeatherReport;

/// Weather source trait (Strategy pattern)
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Current conditions for a free-form location such as "London" or
    /// "New York, USA"
    async fn current(&self, location: &str) -> Result<WeatherReport>;

    /// Source name
    fn name(&self) -> &str;
}

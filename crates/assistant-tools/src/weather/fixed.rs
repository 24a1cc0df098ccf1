//! Fixed Weather Source
//!
//! Canned conditions for a couple of cities, with a simulated lookup delay.

use std::time::Duration;

use async_trait::async_trait;

use super::WeatherSource;
use crate::error::{Result, ToolError};
use crate::model::WeatherReport;

/// Weather source with static data
pub struct FixedWeatherSource {
    latency: Duration,
}

impl Default for FixedWeatherSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedWeatherSource {
    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(500),
        }
    }

    /// Override the simulated lookup delay
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }

    fn lookup(location: &str) -> WeatherReport {
        let needle = location.to_lowercase();
        let report = |place: &str, temperature: &str, conditions: &str| WeatherReport {
            location: place.into(),
            temperature: temperature.into(),
            conditions: conditions.into(),
            unit: "Celsius".into(),
        };

        if needle.contains("london") {
            report("London, UK", "16°C", "Partly Cloudy")
        } else if needle.contains("new york") {
            report("New York, USA", "25°C", "Sunny")
        } else {
            WeatherReport::unavailable(location)
        }
    }
}

#[async_trait]
impl WeatherSource for FixedWeatherSource {
    async fn current(&self, location: &str) -> Result<WeatherReport> {
        let location = location.trim();
        if location.is_empty() {
            return Err(ToolError::EmptyLocation);
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(Self::lookup(location))
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

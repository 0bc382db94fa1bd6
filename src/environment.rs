//! Environmental insights
//!
//! Readings from external providers (air quality, weather, traffic, disease
//! outbreaks) are turned into candidates with the same shape as the health
//! rules. Every sub-source is queried on its own: one failing provider only
//! removes its own candidates.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EnvironmentThresholds;
use crate::error::InsightError;
use crate::types::{AlertType, InsightCandidate, SourceAttribution, Tier};

pub const AIR_QUALITY_UNHEALTHY: &str = "env_air_quality_unhealthy";
pub const AIR_QUALITY_SENSITIVE: &str = "env_air_quality_sensitive";
pub const UV_HIGH: &str = "env_uv_high";
pub const HEAT: &str = "env_heat";
pub const TRAFFIC_CONGESTION: &str = "env_traffic_congestion";
pub const OUTBREAK_NEARBY: &str = "env_outbreak_nearby";

/// WGS84 position
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One reading from an environmental provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EnvironmentalReading {
    AirQuality {
        aqi: f64,
    },
    Weather {
        #[serde(default)]
        uv_index: Option<f64>,
        #[serde(default)]
        temperature_c: Option<f64>,
    },
    Traffic {
        /// 0 = free flow, 1 = standstill
        congestion_factor: f64,
    },
    Outbreak {
        #[serde(default)]
        hotspot_count: u32,
        #[serde(default)]
        cluster_count: u32,
    },
}

impl EnvironmentalReading {
    /// Reject values no provider should report
    pub fn validate(&self, source_name: &str) -> Result<(), InsightError> {
        let malformed = |message: String| InsightError::MalformedReading {
            source_name: source_name.to_string(),
            message,
        };
        let check = |label: &str, value: f64| {
            if value.is_finite() && value >= 0.0 {
                Ok(())
            } else {
                Err(malformed(format!("{label} must be a non-negative number, got {value}")))
            }
        };

        match self {
            EnvironmentalReading::AirQuality { aqi } => check("aqi", *aqi),
            EnvironmentalReading::Weather {
                uv_index,
                temperature_c,
            } => {
                if let Some(uv) = uv_index {
                    check("uv_index", *uv)?;
                }
                match temperature_c {
                    Some(t) if !t.is_finite() => {
                        Err(malformed(format!("temperature_c must be finite, got {t}")))
                    }
                    _ => Ok(()),
                }
            }
            EnvironmentalReading::Traffic { congestion_factor } => {
                check("congestion_factor", *congestion_factor)
            }
            EnvironmentalReading::Outbreak { .. } => Ok(()),
        }
    }
}

/// External environmental data provider
#[async_trait]
pub trait EnvironmentalSource: Send + Sync {
    /// Name used in logs and failure reports
    fn name(&self) -> &str;

    async fn fetch(&self, location: Coordinates) -> Result<EnvironmentalReading, InsightError>;
}

/// A sub-source that failed during collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFailure {
    pub source_name: String,
    pub message: String,
}

/// Result of querying every sub-source
#[derive(Debug, Clone, Default)]
pub struct EnvironmentalOutcome {
    pub candidates: Vec<InsightCandidate>,
    pub failures: Vec<SourceFailure>,
}

/// Applies the environmental rules to supplied and fetched readings
pub struct EnvironmentalInsightSource {
    sources: Vec<Arc<dyn EnvironmentalSource>>,
    thresholds: EnvironmentThresholds,
}

impl Default for EnvironmentalInsightSource {
    fn default() -> Self {
        Self::new(EnvironmentThresholds::default())
    }
}

impl EnvironmentalInsightSource {
    pub fn new(thresholds: EnvironmentThresholds) -> Self {
        Self {
            sources: Vec::new(),
            thresholds,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn EnvironmentalSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn add_source(&mut self, source: Arc<dyn EnvironmentalSource>) {
        self.sources.push(source);
    }

    /// Evaluate `supplied` readings, then query each registered source.
    ///
    /// Sources need a location; without one they are skipped.
    pub async fn collect(
        &self,
        location: Option<Coordinates>,
        supplied: &[EnvironmentalReading],
    ) -> EnvironmentalOutcome {
        let mut outcome = EnvironmentalOutcome::default();

        for reading in supplied {
            match reading.validate("context") {
                Ok(()) => outcome.candidates.extend(self.candidates_for(reading)),
                Err(e) => {
                    warn!(error = %e, "ignoring malformed supplied reading");
                    outcome.failures.push(SourceFailure {
                        source_name: "context".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let Some(location) = location else {
            if !self.sources.is_empty() {
                debug!("no coordinates, skipping environmental sources");
            }
            return outcome;
        };

        for source in &self.sources {
            let result = source
                .fetch(location)
                .await
                .and_then(|reading| reading.validate(source.name()).map(|()| reading));

            match result {
                Ok(reading) => {
                    let found = self.candidates_for(&reading);
                    debug!(source = source.name(), count = found.len(), "environmental source evaluated");
                    outcome.candidates.extend(found);
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "environmental source failed");
                    outcome.failures.push(SourceFailure {
                        source_name: source.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        outcome
    }

    /// Candidates produced by a single reading
    pub fn candidates_for(&self, reading: &EnvironmentalReading) -> Vec<InsightCandidate> {
        let t = &self.thresholds;
        let mut candidates = Vec::new();

        match reading {
            EnvironmentalReading::AirQuality { aqi } => {
                if *aqi >= t.aqi_unhealthy {
                    candidates.push(air_quality_unhealthy(*aqi));
                } else if *aqi >= t.aqi_sensitive {
                    candidates.push(air_quality_sensitive(*aqi));
                }
            }
            EnvironmentalReading::Weather {
                uv_index,
                temperature_c,
            } => {
                if let Some(uv) = uv_index.filter(|uv| *uv >= t.uv_high) {
                    candidates.push(uv_high(uv));
                }
                if let Some(temp) = temperature_c.filter(|temp| *temp >= t.heat_celsius) {
                    candidates.push(heat(temp));
                }
            }
            EnvironmentalReading::Traffic { congestion_factor } => {
                if *congestion_factor >= t.congestion_factor {
                    candidates.push(traffic(*congestion_factor));
                }
            }
            EnvironmentalReading::Outbreak {
                hotspot_count,
                cluster_count,
            } => {
                if *hotspot_count > 0 || *cluster_count > 0 {
                    candidates.push(outbreak(*hotspot_count, *cluster_count));
                }
            }
        }

        candidates
    }
}

fn env_candidate(
    id: &str,
    tier: Tier,
    category: AlertType,
    title: &str,
    body: String,
    source: (&str, &str),
    data_note: String,
) -> InsightCandidate {
    InsightCandidate {
        id: id.to_string(),
        tier,
        category,
        title: title.to_string(),
        body,
        source: SourceAttribution::new(source.0, source.1),
        data_note: Some(data_note),
    }
}

const AIRNOW: (&str, &str) = ("U.S. EPA AirNow", "https://www.airnow.gov/aqi/aqi-basics/");

fn air_quality_unhealthy(aqi: f64) -> InsightCandidate {
    env_candidate(
        AIR_QUALITY_UNHEALTHY,
        Tier::Moderate,
        AlertType::AirQuality,
        "Unhealthy air near you",
        format!(
            "The air quality index around you is {aqi:.0}. Limit time outdoors, keep windows \
             closed and move workouts indoors today."
        ),
        AIRNOW,
        "Air quality index for your current location.".to_string(),
    )
}

fn air_quality_sensitive(aqi: f64) -> InsightCandidate {
    env_candidate(
        AIR_QUALITY_SENSITIVE,
        Tier::Mild,
        AlertType::AirQuality,
        "Air quality is so-so today",
        format!(
            "The air quality index around you is {aqi:.0}. If you have asthma or heart \
             conditions, consider shortening outdoor exercise."
        ),
        AIRNOW,
        "Air quality index for your current location.".to_string(),
    )
}

fn uv_high(uv: f64) -> InsightCandidate {
    env_candidate(
        UV_HIGH,
        Tier::Mild,
        AlertType::Weather,
        "Strong sun today",
        format!(
            "The UV index is {uv:.0}. Use sunscreen and seek shade around midday if you're \
             heading out."
        ),
        (
            "World Health Organization",
            "https://www.who.int/news-room/questions-and-answers/item/radiation-the-ultraviolet-(uv)-index",
        ),
        "UV index forecast for your current location.".to_string(),
    )
}

fn heat(temperature_c: f64) -> InsightCandidate {
    env_candidate(
        HEAT,
        Tier::Mild,
        AlertType::Hydration,
        "It's hot out, drink up",
        format!(
            "It's {temperature_c:.0}°C near you. Drink water regularly and take breaks from \
             the heat, especially if you're active outdoors."
        ),
        ("CDC", "https://www.cdc.gov/extreme-heat/"),
        "Current temperature for your location.".to_string(),
    )
}

fn traffic(congestion_factor: f64) -> InsightCandidate {
    env_candidate(
        TRAFFIC_CONGESTION,
        Tier::Mild,
        AlertType::Traffic,
        "Heavy traffic around you",
        format!(
            "Roads nearby are {:.0}% congested. Exhaust levels rise in traffic, so pick a \
             quieter route if you're walking or cycling.",
            congestion_factor * 100.0
        ),
        (
            "U.S. EPA",
            "https://www.epa.gov/air-research/research-near-roadway-and-other-near-source-air-pollution",
        ),
        "Traffic congestion factor near your location.".to_string(),
    )
}

fn outbreak(hotspots: u32, clusters: u32) -> InsightCandidate {
    env_candidate(
        OUTBREAK_NEARBY,
        Tier::Mild,
        AlertType::Dengue,
        "Dengue activity reported nearby",
        format!(
            "Health authorities report {hotspots} hotspot(s) and {clusters} active cluster(s) \
             near you. Use repellent and clear standing water around your home."
        ),
        (
            "World Health Organization",
            "https://www.who.int/news-room/fact-sheets/detail/dengue-and-severe-dengue",
        ),
        "Outbreak hotspots and clusters near your location.".to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct FixedSource {
        name: &'static str,
        reading: Result<EnvironmentalReading, String>,
    }

    #[async_trait]
    impl EnvironmentalSource for FixedSource {
        fn name(&self) -> &str {
            self.name
        }

        async fn fetch(&self, _location: Coordinates) -> Result<EnvironmentalReading, InsightError> {
            self.reading.clone().map_err(|message| InsightError::SourceFailed {
                source_name: self.name.to_string(),
                message,
            })
        }
    }

    fn here() -> Option<Coordinates> {
        Some(Coordinates {
            latitude: 1.29,
            longitude: 103.85,
        })
    }

    fn ids(candidates: &[InsightCandidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_air_quality_bands() {
        let env = EnvironmentalInsightSource::default();

        let unhealthy = env.candidates_for(&EnvironmentalReading::AirQuality { aqi: 160.0 });
        assert_eq!(ids(&unhealthy), vec![AIR_QUALITY_UNHEALTHY]);
        assert_eq!(unhealthy[0].tier, Tier::Moderate);
        assert_eq!(unhealthy[0].category, AlertType::AirQuality);

        let sensitive = env.candidates_for(&EnvironmentalReading::AirQuality { aqi: 101.0 });
        assert_eq!(ids(&sensitive), vec![AIR_QUALITY_SENSITIVE]);
        assert_eq!(sensitive[0].tier, Tier::Mild);

        assert!(env
            .candidates_for(&EnvironmentalReading::AirQuality { aqi: 100.0 })
            .is_empty());
    }

    #[test]
    fn test_weather_can_yield_two_candidates() {
        let env = EnvironmentalInsightSource::default();
        let reading = EnvironmentalReading::Weather {
            uv_index: Some(8.0),
            temperature_c: Some(33.5),
        };
        assert_eq!(ids(&env.candidates_for(&reading)), vec![UV_HIGH, HEAT]);

        let mild = EnvironmentalReading::Weather {
            uv_index: Some(5.9),
            temperature_c: Some(29.9),
        };
        assert!(env.candidates_for(&mild).is_empty());
    }

    #[test]
    fn test_traffic_and_outbreak() {
        let env = EnvironmentalInsightSource::default();
        assert_eq!(
            ids(&env.candidates_for(&EnvironmentalReading::Traffic {
                congestion_factor: 0.6
            })),
            vec![TRAFFIC_CONGESTION]
        );
        assert_eq!(
            ids(&env.candidates_for(&EnvironmentalReading::Outbreak {
                hotspot_count: 0,
                cluster_count: 2
            })),
            vec![OUTBREAK_NEARBY]
        );
        assert!(env
            .candidates_for(&EnvironmentalReading::Outbreak {
                hotspot_count: 0,
                cluster_count: 0
            })
            .is_empty());
    }

    #[test]
    fn test_reading_json_shape() {
        let reading: EnvironmentalReading =
            serde_json::from_str(r#"{"kind": "weather", "temperature_c": 31}"#).unwrap();
        assert_eq!(
            reading,
            EnvironmentalReading::Weather {
                uv_index: None,
                temperature_c: Some(31.0)
            }
        );
    }

    #[tokio::test]
    async fn test_failing_source_does_not_block_others() {
        let env = EnvironmentalInsightSource::default()
            .with_source(Arc::new(FixedSource {
                name: "air",
                reading: Err("connection reset".to_string()),
            }))
            .with_source(Arc::new(FixedSource {
                name: "traffic",
                reading: Ok(EnvironmentalReading::Traffic {
                    congestion_factor: 0.8,
                }),
            }));

        let outcome = env.collect(here(), &[]).await;
        assert_eq!(ids(&outcome.candidates), vec![TRAFFIC_CONGESTION]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source_name, "air");
    }

    #[tokio::test]
    async fn test_malformed_reading_counts_as_failure() {
        let env = EnvironmentalInsightSource::default().with_source(Arc::new(FixedSource {
            name: "air",
            reading: Ok(EnvironmentalReading::AirQuality { aqi: f64::NAN }),
        }));

        let outcome = env.collect(here(), &[]).await;
        assert!(outcome.candidates.is_empty());
        assert_eq!(outcome.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_sources_skipped_without_location() {
        let env = EnvironmentalInsightSource::default().with_source(Arc::new(FixedSource {
            name: "traffic",
            reading: Ok(EnvironmentalReading::Traffic {
                congestion_factor: 0.9,
            }),
        }));

        let supplied = [EnvironmentalReading::AirQuality { aqi: 160.0 }];
        let outcome = env.collect(None, &supplied).await;
        assert_eq!(ids(&outcome.candidates), vec![AIR_QUALITY_UNHEALTHY]);
        assert!(outcome.failures.is_empty());
    }
}

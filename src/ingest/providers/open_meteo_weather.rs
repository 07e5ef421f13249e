// src/ingest/providers/open_meteo_weather.rs
//! Current conditions from Open-Meteo, sampled on a coarse grid over the bounds.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

use super::{join_coords, Mode};
use crate::error::SourceError;
use crate::ingest::types::{
    BoundingBox, HealthFlag, Payload, SourceCollector, SourceKind, WeatherObservation,
};

pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1/forecast";
const GRID: usize = 3;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Response {
    Many(Vec<Location>),
    One(Location),
}

#[derive(Debug, Deserialize)]
struct Location {
    latitude: f64,
    longitude: f64,
    current: Option<Current>,
}

#[derive(Debug, Deserialize)]
struct Current {
    time: Option<String>,
    temperature_2m: Option<f64>,
    relative_humidity_2m: Option<f64>,
    wind_speed_10m: Option<f64>,
    wind_direction_10m: Option<f64>,
}

pub struct OpenMeteoWeather {
    source_id: String,
    mode: Mode,
    base_url: String,
    health: HealthFlag,
}

impl OpenMeteoWeather {
    pub fn from_fixture(body: &str) -> Self {
        Self::with_mode(Mode::Fixture(body.to_string()), None)
    }

    pub fn http(base_url: Option<String>) -> Self {
        Self::with_mode(Mode::http(), base_url)
    }

    fn with_mode(mode: Mode, base_url: Option<String>) -> Self {
        Self {
            source_id: "weather".to_string(),
            mode,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            health: HealthFlag::new(),
        }
    }

    pub fn with_source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = id.into();
        self
    }

    fn url(&self, b: &BoundingBox) -> String {
        let pts = b.grid(GRID, GRID);
        format!(
            "{}?latitude={}&longitude={}&current=temperature_2m,relative_humidity_2m,wind_speed_10m,wind_direction_10m&wind_speed_unit=ms&timezone=GMT",
            self.base_url,
            join_coords(pts.iter().map(|p| p.0)),
            join_coords(pts.iter().map(|p| p.1)),
        )
    }

    /// Locations missing any current variable are skipped.
    pub fn parse(&self, body: &str, fetched_at: DateTime<Utc>) -> Result<Vec<WeatherObservation>, SourceError> {
        let resp: Response = serde_json::from_str(body)
            .map_err(|e| SourceError::invalid(format!("open-meteo weather: {e}")))?;
        let locations = match resp {
            Response::Many(v) => v,
            Response::One(l) => vec![l],
        };
        Ok(locations.into_iter().filter_map(|l| observation(l, fetched_at)).collect())
    }
}

fn observation(l: Location, fetched_at: DateTime<Utc>) -> Option<WeatherObservation> {
    let c = l.current?;
    let observed_at = c
        .time
        .as_deref()
        .and_then(|t| NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M").ok())
        .map(|t| Utc.from_utc_datetime(&t))
        .unwrap_or(fetched_at);
    Some(WeatherObservation {
        station_id: format!("open-meteo-{:.3}_{:.3}", l.latitude, l.longitude),
        latitude: l.latitude,
        longitude: l.longitude,
        temperature_c: c.temperature_2m?,
        relative_humidity_pct: c.relative_humidity_2m?,
        wind_speed_ms: c.wind_speed_10m?,
        wind_direction_deg: c.wind_direction_10m?,
        observed_at,
    })
}

#[async_trait]
impl SourceCollector for OpenMeteoWeather {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Weather
    }

    fn health(&self) -> &HealthFlag {
        &self.health
    }

    async fn collect(&self, bounds: &BoundingBox) -> Result<Payload, SourceError> {
        let body = self.mode.body("open_meteo_weather", || Ok(self.url(bounds))).await?;
        Ok(Payload::Weather(self.parse(&body, Utc::now())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE: &str = r#"{"latitude":36.0,"longitude":-119.5,"current":{"time":"2024-08-01T12:15","temperature_2m":31.2,"relative_humidity_2m":18,"wind_speed_10m":6.4,"wind_direction_10m":300}}"#;

    #[test]
    fn single_object_response() {
        let w = OpenMeteoWeather::from_fixture(ONE);
        let obs = w.parse(ONE, Utc::now()).unwrap();
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].station_id, "open-meteo-36.000_-119.500");
        assert_eq!(obs[0].relative_humidity_pct, 18.0);
        assert_eq!(obs[0].observed_at.format("%H:%M").to_string(), "12:15");
    }

    #[test]
    fn array_response_skips_incomplete_locations() {
        let body = format!(r#"[{ONE},{{"latitude":37.0,"longitude":-120.0,"current":{{"temperature_2m":20.0}}}}]"#);
        let w = OpenMeteoWeather::from_fixture(&body);
        assert_eq!(w.parse(&body, Utc::now()).unwrap().len(), 1);
    }

    #[test]
    fn garbage_is_invalid_response() {
        let w = OpenMeteoWeather::from_fixture("");
        assert_eq!(w.parse("<html>", Utc::now()).unwrap_err().label(), "invalid_response");
    }

    #[test]
    fn url_requests_metric_wind() {
        let w = OpenMeteoWeather::http(None);
        let u = w.url(&BoundingBox::default());
        assert!(u.contains("wind_speed_unit=ms"));
        assert!(u.matches(',').count() >= 16);
    }
}

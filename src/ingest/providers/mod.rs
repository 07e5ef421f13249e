// src/ingest/providers/mod.rs
pub mod firms;
pub mod open_meteo_terrain;
pub mod open_meteo_weather;

use std::time::{Duration, Instant};

use metrics::histogram;

use crate::error::SourceError;

/// Where a provider reads its body from.
#[derive(Clone)]
pub(crate) enum Mode {
    /// Static body (tests, offline runs).
    Fixture(String),
    Http { client: reqwest::Client },
}

impl Mode {
    pub(crate) fn http() -> Self {
        let client = reqwest::Client::builder()
            .user_agent("wildfire-pipeline/0.1")
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Mode::Http { client }
    }

    /// Fetch the body; `url` is only built in HTTP mode.
    pub(crate) async fn body(
        &self,
        provider: &'static str,
        url: impl FnOnce() -> Result<String, SourceError>,
    ) -> Result<String, SourceError> {
        match self {
            Mode::Fixture(s) => Ok(s.clone()),
            Mode::Http { client } => {
                let url = url()?;
                let t0 = Instant::now();
                let resp = client.get(&url).send().await?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(SourceError::unavailable(format!(
                        "{provider} http status {status}"
                    )));
                }
                let body = resp.text().await?;
                histogram!("collector_fetch_ms", "provider" => provider)
                    .record(t0.elapsed().as_secs_f64() * 1_000.0);
                Ok(body)
            }
        }
    }
}

/// Great-circle distance in metres.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const R: f64 = 6_371_000.0;
    let (p1, p2) = (lat1.to_radians(), lat2.to_radians());
    let dp = (lat2 - lat1).to_radians();
    let dl = (lon2 - lon1).to_radians();
    let a = (dp / 2.0).sin().powi(2) + p1.cos() * p2.cos() * (dl / 2.0).sin().powi(2);
    2.0 * R * a.sqrt().asin()
}

fn join_coords(values: impl Iterator<Item = f64>) -> String {
    values
        .map(|v| format!("{v:.4}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn haversine_one_degree_latitude() {
        let d = haversine_m(35.0, -120.0, 36.0, -120.0);
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }
}

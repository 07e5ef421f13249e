// src/ingest/providers/open_meteo_terrain.rs
use async_trait::async_trait;
use serde::Deserialize;

use super::{haversine_m, join_coords, Mode};
use crate::error::SourceError;
use crate::ingest::types::{BoundingBox, HealthFlag, Payload, SourceCollector, SourceKind, TerrainSample};

pub const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com/v1/elevation";
const GRID: usize = 4;

#[derive(Debug, Deserialize)]
struct ElevationResponse {
    elevation: Vec<Option<f64>>,
}

/// Elevation on a 4x4 grid; slope is derived from neighbouring samples.
pub struct OpenMeteoTerrain {
    source_id: String,
    mode: Mode,
    base_url: String,
    health: HealthFlag,
}

impl OpenMeteoTerrain {
    pub fn from_fixture(body: &str) -> Self {
        Self::with_mode(Mode::Fixture(body.to_string()), None)
    }

    pub fn http(base_url: Option<String>) -> Self {
        Self::with_mode(Mode::http(), base_url)
    }

    fn with_mode(mode: Mode, base_url: Option<String>) -> Self {
        Self {
            source_id: "terrain".to_string(),
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
            "{}?latitude={}&longitude={}",
            self.base_url,
            join_coords(pts.iter().map(|p| p.0)),
            join_coords(pts.iter().map(|p| p.1)),
        )
    }

    /// The body must carry one elevation per grid point, row-major from the south-west.
    pub fn parse(&self, body: &str, bounds: &BoundingBox) -> Result<Vec<TerrainSample>, SourceError> {
        let resp: ElevationResponse = serde_json::from_str(body)
            .map_err(|e| SourceError::invalid(format!("open-meteo elevation: {e}")))?;
        let pts = bounds.grid(GRID, GRID);
        if resp.elevation.len() != pts.len() {
            return Err(SourceError::invalid(format!(
                "open-meteo elevation: expected {} values, got {}",
                pts.len(),
                resp.elevation.len()
            )));
        }
        let elev = resp.elevation;
        let at = |r: usize, c: usize| elev[r * GRID + c].filter(|v| v.is_finite());

        let mut out = Vec::with_capacity(pts.len());
        for r in 0..GRID {
            for c in 0..GRID {
                let Some(z) = at(r, c) else { continue };
                let (lat, lon) = pts[r * GRID + c];
                let mut steepest = 0.0_f64;
                let neighbours = [
                    (r.checked_sub(1), Some(c)),
                    (Some(r + 1).filter(|&x| x < GRID), Some(c)),
                    (Some(r), c.checked_sub(1)),
                    (Some(r), Some(c + 1).filter(|&x| x < GRID)),
                ];
                for (nr, nc) in neighbours {
                    let (Some(nr), Some(nc)) = (nr, nc) else { continue };
                    let Some(nz) = at(nr, nc) else { continue };
                    let (nlat, nlon) = pts[nr * GRID + nc];
                    let dist = haversine_m(lat, lon, nlat, nlon);
                    if dist > 0.0 {
                        steepest = steepest.max((nz - z).abs() / dist);
                    }
                }
                out.push(TerrainSample {
                    latitude: lat,
                    longitude: lon,
                    elevation_m: z,
                    slope_deg: steepest.atan().to_degrees(),
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl SourceCollector for OpenMeteoTerrain {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Terrain
    }

    fn health(&self) -> &HealthFlag {
        &self.health
    }

    async fn collect(&self, bounds: &BoundingBox) -> Result<Payload, SourceError> {
        let body = self.mode.body("open_meteo_terrain", || Ok(self.url(bounds))).await?;
        Ok(Payload::Terrain(self.parse(&body, bounds)?))
    }
}

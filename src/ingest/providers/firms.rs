// src/ingest/providers/firms.rs
//! NASA FIRMS active-fire CSV (VIIRS / MODIS area endpoint).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use metrics::counter;

use super::Mode;
use crate::error::SourceError;
use crate::ingest::types::{
    BoundingBox, FireDetection, HealthFlag, Payload, SourceCollector, SourceKind,
};

pub const DEFAULT_BASE_URL: &str = "https://firms.modaps.eosdis.nasa.gov/api/area/csv";
pub const DEFAULT_PRODUCT: &str = "VIIRS_SNPP_NRT";

/// FRP (MW) at which intensity saturates to 1.0.
const FRP_SATURATION_MW: f64 = 1_000.0;

const REQUIRED_COLUMNS: [&str; 8] = [
    "latitude",
    "longitude",
    "scan",
    "track",
    "acq_date",
    "acq_time",
    "confidence",
    "frp",
];

pub struct FirmsCollector {
    source_id: String,
    mode: Mode,
    base_url: String,
    map_key: Option<String>,
    product: String,
    day_range: u8,
    health: HealthFlag,
}

impl FirmsCollector {
    pub fn from_fixture(body: &str) -> Self {
        Self::with_mode(Mode::Fixture(body.to_string()), None, None)
    }

    pub fn http(base_url: Option<String>, map_key: Option<String>) -> Self {
        Self::with_mode(Mode::http(), base_url, map_key)
    }

    fn with_mode(mode: Mode, base_url: Option<String>, map_key: Option<String>) -> Self {
        Self {
            source_id: "firms".to_string(),
            mode,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            map_key,
            product: DEFAULT_PRODUCT.to_string(),
            day_range: 1,
            health: HealthFlag::new(),
        }
    }

    pub fn with_source_id(mut self, id: impl Into<String>) -> Self {
        self.source_id = id.into();
        self
    }

    fn url(&self, b: &BoundingBox) -> Result<String, SourceError> {
        let key = self
            .map_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| SourceError::unavailable("firms map key not configured"))?;
        Ok(format!(
            "{}/{}/{}/{},{},{},{}/{}",
            self.base_url.trim_end_matches('/'),
            key,
            self.product,
            b.min_lon,
            b.min_lat,
            b.max_lon,
            b.max_lat,
            self.day_range
        ))
    }

    /// Parse the CSV body. Malformed rows are skipped; a missing header column is fatal.
    pub fn parse_csv(&self, body: &str) -> Result<Vec<FireDetection>, SourceError> {
        let mut lines = body.lines().filter(|l| !l.trim().is_empty());
        let header = lines
            .next()
            .ok_or_else(|| SourceError::invalid("firms: empty body"))?;
        let cols: HashMap<&str, usize> = header
            .split(',')
            .enumerate()
            .map(|(i, c)| (c.trim(), i))
            .collect();
        for c in REQUIRED_COLUMNS {
            if !cols.contains_key(c) {
                return Err(SourceError::invalid(format!("firms: missing column '{c}'")));
            }
        }

        let mut out = Vec::new();
        let mut skipped = 0u64;
        for line in lines {
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            match parse_row(&cols, &fields, &self.source_id) {
                Some(d) => out.push(d),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            counter!("collector_rows_skipped_total", "source" => self.source_id.clone())
                .increment(skipped);
            tracing::debug!(target: "ingest", source = %self.source_id, skipped, "malformed firms rows skipped");
        }
        Ok(out)
    }
}

fn parse_row(cols: &HashMap<&str, usize>, fields: &[&str], fallback_sat: &str) -> Option<FireDetection> {
    let get = |name: &str| cols.get(name).and_then(|&i| fields.get(i)).copied();
    let num = |name: &str| get(name)?.parse::<f64>().ok().filter(|v| v.is_finite());

    let latitude = num("latitude")?;
    let longitude = num("longitude")?;
    let scan = num("scan")?;
    let track = num("track")?;
    let frp = num("frp")?.max(0.0);
    let confidence = parse_confidence(get("confidence")?)?;
    let detected_at = parse_acq(get("acq_date")?, get("acq_time")?)?;
    let satellite = get("satellite")
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback_sat)
        .to_string();

    Some(FireDetection {
        id: format!(
            "{}-{}-{:.4}-{:.4}",
            satellite,
            detected_at.format("%Y%m%d%H%M"),
            latitude,
            longitude
        ),
        latitude,
        longitude,
        intensity: intensity_from_frp(frp),
        // scan x track is the pixel footprint in km²; 1 km² = 100 ha.
        area_hectares: (scan * track * 100.0).max(0.0),
        confidence,
        detected_at,
        satellite_or_source: satellite,
    })
}

pub fn intensity_from_frp(frp_mw: f64) -> f64 {
    ((1.0 + frp_mw.max(0.0)).ln() / (1.0 + FRP_SATURATION_MW).ln()).clamp(0.0, 1.0)
}

/// VIIRS reports `l|n|h`, MODIS a 0..=100 percentage.
pub fn parse_confidence(raw: &str) -> Option<f64> {
    match raw.to_ascii_lowercase().as_str() {
        "l" | "low" => Some(0.3),
        "n" | "nominal" => Some(0.8),
        "h" | "high" => Some(0.95),
        other => other
            .parse::<f64>()
            .ok()
            .filter(|v| (0.0..=100.0).contains(v))
            .map(|v| v / 100.0),
    }
}

/// `acq_date` is `YYYY-MM-DD`, `acq_time` is `HHMM` UTC (leading zeros sometimes dropped).
pub fn parse_acq(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let d = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    if time.is_empty() || time.len() > 4 || !time.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hhmm = format!("{time:0>4}");
    let t = NaiveTime::parse_from_str(&hhmm, "%H%M").ok()?;
    Some(Utc.from_utc_datetime(&d.and_time(t)))
}

#[async_trait]
impl SourceCollector for FirmsCollector {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Fires
    }

    fn health(&self) -> &HealthFlag {
        &self.health
    }

    async fn collect(&self, bounds: &BoundingBox) -> Result<Payload, SourceError> {
        let body = self.mode.body("firms", || self.url(bounds)).await?;
        Ok(Payload::Fires(self.parse_csv(&body)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "\
latitude,longitude,bright_ti4,scan,track,acq_date,acq_time,satellite,confidence,version,bright_ti5,frp,daynight
36.1234,-119.5678,330.5,0.39,0.36,2024-08-01,0912,N,n,2.0NRT,290.1,12.5,D
37.0000,-120.0000,340.0,0.5,0.4,2024-08-01,45,N,h,2.0NRT,291.0,999.0,N
garbage,row
38.0,-121.0,300.0,0.4,0.4,2024-08-01,1200,N,x,2.0NRT,280.0,1.0,D
";

    #[test]
    fn parses_rows_and_skips_malformed() {
        let c = FirmsCollector::from_fixture(CSV);
        let fires = c.parse_csv(CSV).unwrap();
        assert_eq!(fires.len(), 2);

        let f = &fires[0];
        assert_eq!(f.id, "N-202408010912-36.1234--119.5678");
        assert!((f.confidence - 0.8).abs() < 1e-9);
        assert!((f.area_hectares - 0.39 * 0.36 * 100.0).abs() < 1e-9);
        assert!(f.intensity > 0.0 && f.intensity < 1.0);

        // "45" is 00:45
        assert_eq!(fires[1].detected_at.format("%H%M").to_string(), "0045");
        assert!((fires[1].confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn missing_column_is_invalid_response() {
        let c = FirmsCollector::from_fixture("");
        let err = c.parse_csv("latitude,longitude\n1,2\n").unwrap_err();
        assert_eq!(err.label(), "invalid_response");
    }

    #[test]
    fn intensity_saturates() {
        assert_eq!(intensity_from_frp(0.0), 0.0);
        assert!((intensity_from_frp(1_000.0) - 1.0).abs() < 1e-12);
        assert_eq!(intensity_from_frp(50_000.0), 1.0);
    }

    #[test]
    fn numeric_confidence_is_percentage() {
        assert_eq!(parse_confidence("75"), Some(0.75));
        assert_eq!(parse_confidence("150"), None);
    }

    #[tokio::test]
    async fn http_mode_without_key_is_unavailable() {
        let c = FirmsCollector::http(None, None);
        let err = c.collect(&BoundingBox::default()).await.unwrap_err();
        assert_eq!(err.label(), "unavailable");
    }
}

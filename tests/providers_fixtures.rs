// tests/providers_fixtures.rs
//
// Real provider adapters driven by recorded response bodies, end to end
// through the pipeline.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use wildfire_pipeline::config::PipelineConfig;
use wildfire_pipeline::ingest::providers::{
    firms::FirmsCollector, open_meteo_terrain::OpenMeteoTerrain,
    open_meteo_weather::OpenMeteoWeather,
};
use wildfire_pipeline::ingest::registry::CollectorRegistry;
use wildfire_pipeline::ingest::types::{
    BoundingBox, Payload, RecordStatus, SourceCollector, SourceKind,
};
use wildfire_pipeline::pipeline::Pipeline;
use wildfire_pipeline::snapshot::QualityLevel;
use wildfire_pipeline::store::{MemoryStore, SharedStore};

const FIRMS_CSV: &str = include_str!("fixtures/firms_viirs.csv");
const WEATHER_JSON: &str = include_str!("fixtures/open_meteo_current.json");
const ELEVATION_JSON: &str = include_str!("fixtures/open_meteo_elevation.json");

#[tokio::test]
async fn firms_fixture_yields_fire_record() {
    let c = FirmsCollector::from_fixture(FIRMS_CSV);
    let rec = c.fetch(&BoundingBox::default()).await;
    assert_eq!(rec.status, RecordStatus::Ok);
    assert!(c.is_healthy());

    let Payload::Fires(fires) = rec.payload else {
        panic!("expected fires payload");
    };
    // Last row has no acquisition time.
    assert_eq!(fires.len(), 5);
    assert!(fires.iter().all(|f| f.satellite_or_source == "N"));
    let hottest = fires
        .iter()
        .max_by(|a, b| a.intensity.total_cmp(&b.intensity))
        .unwrap();
    assert!((hottest.latitude - 34.4012).abs() < 1e-9);
}

#[tokio::test]
async fn open_meteo_fixtures_yield_weather_and_terrain() {
    let b = BoundingBox::default();

    let w = OpenMeteoWeather::from_fixture(WEATHER_JSON).fetch(&b).await;
    assert_eq!(w.kind(), SourceKind::Weather);
    assert_eq!(w.payload.len(), 9);

    let t = OpenMeteoTerrain::from_fixture(ELEVATION_JSON).fetch(&b).await;
    let Payload::Terrain(samples) = t.payload else {
        panic!("expected terrain payload");
    };
    assert_eq!(samples.len(), 16);
    assert!(samples.iter().any(|s| s.slope_deg > 0.0));
    assert!(samples.iter().all(|s| (0.0..=90.0).contains(&s.slope_deg)));
}

#[tokio::test]
async fn truncated_elevation_body_marks_collector_unhealthy() {
    let c = OpenMeteoTerrain::from_fixture(r#"{"elevation":[1.0,2.0]}"#);
    let rec = c.fetch(&BoundingBox::default()).await;
    assert_eq!(rec.status, RecordStatus::Failed);
    assert!(rec.payload.is_empty());
    assert!(rec.error.is_some());
    assert!(!c.is_healthy());
}

#[tokio::test]
async fn fixture_collectors_produce_high_quality_snapshot() {
    let mut reg = CollectorRegistry::new();
    let every = policy(Duration::from_secs(300));
    reg.register(Arc::new(FirmsCollector::from_fixture(FIRMS_CSV)), every);
    reg.register(Arc::new(OpenMeteoWeather::from_fixture(WEATHER_JSON)), every);
    reg.register(Arc::new(OpenMeteoTerrain::from_fixture(ELEVATION_JSON)), every);

    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let p = Pipeline::new(PipelineConfig::default(), reg, store);
    let snap = p.run_cycle(false).await;

    assert_eq!(snap.quality, QualityLevel::High);
    assert!(snap.synthetic_sections.is_empty());
    // The Seattle detection lies outside the operational area.
    assert_eq!(snap.fires.len(), 4);
    assert_eq!(snap.weather.station_count, 9);
    assert_eq!(snap.terrain.sample_count, 16);
    assert!(snap.terrain.relief_m > 2000.0);
    assert!(snap.derived.fire_weather_index.is_finite());
    assert_eq!(snap.sources.len(), 3);
}

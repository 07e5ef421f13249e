// tests/processor_merge.rs
//
// Merge semantics: quality rules, synthetic sections, per-entry validation,
// fire de-duplication and ordering, plus a randomized invariant check.

mod common;

use std::collections::BTreeMap;

use common::*;
use rand::{Rng, SeedableRng};
use wildfire_pipeline::error::SourceError;
use wildfire_pipeline::ingest::fallback;
use wildfire_pipeline::ingest::types::{
    BoundingBox, Payload, ProviderRecord, RecordStatus, SourceKind, TerrainSample,
};
use wildfire_pipeline::processor::{self, default_terrain, default_weather};
use wildfire_pipeline::snapshot::{QualityLevel, SnapshotSection};

fn records(list: Vec<ProviderRecord>) -> BTreeMap<String, ProviderRecord> {
    list.into_iter().map(|r| (r.source_id.clone(), r)).collect()
}

fn live_all() -> BTreeMap<String, ProviderRecord> {
    records(vec![
        ProviderRecord::ok("firms", t0(), fires_payload()),
        ProviderRecord::ok("weather", t0(), weather_payload()),
        ProviderRecord::ok("terrain", t0(), terrain_payload()),
    ])
}

fn synthetic(id: &str, kind: SourceKind) -> ProviderRecord {
    fallback::synthetic_record(id, kind, t0(), Some(&SourceError::unavailable("down")))
}

#[test]
fn all_live_is_high_quality() {
    let out = processor::merge(&live_all(), &BoundingBox::default(), t0());
    let s = out.snapshot;
    assert_eq!(s.quality, QualityLevel::High);
    assert!(s.synthetic_sections.is_empty());
    assert_eq!(s.sources, vec!["firms", "terrain", "weather"]);
    assert_eq!(s.weather.station_count, 2);
    assert!((s.weather.mean_temperature_c - 30.0).abs() < 1e-9);
    assert_eq!(s.weather.max_wind_speed_ms, 8.0);
    assert_eq!(s.terrain.relief_m, 1_850.0);
    assert_eq!(s.derived.total_active_area_ha, 24.0);
    assert!(out.dropped.is_empty());
}

#[test]
fn fires_are_newest_first() {
    let s = processor::merge(&live_all(), &BoundingBox::default(), t0()).snapshot;
    let ids: Vec<&str> = s.fires.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["N-2", "N-1"]);
}

#[test]
fn failed_weather_is_filled_from_defaults_and_not_high() {
    let mut recs = live_all();
    recs.insert("weather".into(), synthetic("weather", SourceKind::Weather));
    let s = processor::merge(&recs, &BoundingBox::default(), t0()).snapshot;

    assert_eq!(s.quality, QualityLevel::Degraded);
    assert!(s.is_synthetic(SnapshotSection::Weather));
    assert_eq!(s.weather, default_weather());
    assert!(!s.sources.contains(&"weather".to_string()));
    assert_eq!(s.fires.len(), 2);
}

#[test]
fn every_source_failed_is_fallback_with_all_sections_populated() {
    let recs = records(vec![
        synthetic("firms", SourceKind::Fires),
        synthetic("weather", SourceKind::Weather),
        synthetic("terrain", SourceKind::Terrain),
    ]);
    let s = processor::merge(&recs, &BoundingBox::default(), t0()).snapshot;

    assert_eq!(s.quality, QualityLevel::Fallback);
    assert_eq!(s.synthetic_sections.len(), 3);
    assert!(s.fires.is_empty());
    assert_eq!(s.weather, default_weather());
    assert_eq!(s.terrain, default_terrain());
    assert!(s.sources.is_empty());
    assert!(s.derived.fire_weather_index.is_finite());
}

#[test]
fn degraded_record_counts_as_source_but_caps_quality() {
    let mut recs = live_all();
    let cached = ProviderRecord::ok("terrain", t0(), terrain_payload());
    recs.insert(
        "terrain".into(),
        fallback::degraded_from_cache(&cached, None),
    );
    let s = processor::merge(&recs, &BoundingBox::default(), t0()).snapshot;
    assert_eq!(s.quality, QualityLevel::Degraded);
    assert!(s.sources.contains(&"terrain".to_string()));
    assert!(!s.is_synthetic(SnapshotSection::Terrain));
}

#[test]
fn empty_fire_list_is_a_live_observation() {
    let mut recs = live_all();
    recs.insert(
        "firms".into(),
        ProviderRecord::ok("firms", t0(), Payload::Fires(vec![])),
    );
    let s = processor::merge(&recs, &BoundingBox::default(), t0()).snapshot;
    assert_eq!(s.quality, QualityLevel::High);
    assert!(s.fires.is_empty());
    assert!(s.sources.contains(&"firms".to_string()));
}

#[test]
fn invalid_entries_are_dropped_individually() {
    let mut bad_fire = fire("N-out", 10.0, 10.0, 0); // outside bounds
    bad_fire.intensity = 0.5;
    let mut bad_intensity = fire("N-hot", 36.0, -120.0, 0);
    bad_intensity.intensity = 1.7;

    let recs = records(vec![
        ProviderRecord::ok(
            "firms",
            t0(),
            Payload::Fires(vec![fire("N-ok", 36.0, -120.0, 5), bad_fire, bad_intensity]),
        ),
        ProviderRecord::ok(
            "weather",
            t0(),
            Payload::Weather(vec![station("good", 25.0, 30.0, 5.0), station("wet", 25.0, 150.0, 5.0)]),
        ),
        ProviderRecord::ok(
            "terrain",
            t0(),
            Payload::Terrain(vec![TerrainSample {
                latitude: 36.0,
                longitude: -120.0,
                elevation_m: 12_000.0,
                slope_deg: 10.0,
            }]),
        ),
    ]);
    let out = processor::merge(&recs, &BoundingBox::default(), t0());
    let s = &out.snapshot;

    assert_eq!(s.fires.len(), 1);
    assert_eq!(s.fires[0].id, "N-ok");
    assert_eq!(s.weather.station_count, 1);
    assert!(s.is_synthetic(SnapshotSection::Terrain), "only sample was invalid");
    assert_eq!(out.dropped.len(), 4);
    assert!(out
        .dropped
        .iter()
        .any(|e| e.section == "weather" && e.field == "relative_humidity_pct"));
    assert_eq!(s.quality, QualityLevel::Degraded);
}

#[test]
fn weather_and_terrain_with_bad_coordinates_are_dropped() {
    let mut nan_station = station("nan", 25.0, 30.0, 5.0);
    nan_station.latitude = f64::NAN;
    let mut off_globe = station("off", 25.0, 30.0, 5.0);
    off_globe.longitude = 200.0;

    let recs = records(vec![
        ProviderRecord::ok("firms", t0(), fires_payload()),
        ProviderRecord::ok(
            "weather",
            t0(),
            Payload::Weather(vec![station("good", 25.0, 30.0, 5.0), nan_station, off_globe]),
        ),
        ProviderRecord::ok(
            "terrain",
            t0(),
            Payload::Terrain(vec![TerrainSample {
                latitude: 36.0,
                longitude: f64::INFINITY,
                elevation_m: 800.0,
                slope_deg: 4.0,
            }]),
        ),
    ]);
    let out = processor::merge(&recs, &BoundingBox::default(), t0());

    assert_eq!(out.snapshot.weather.station_count, 1);
    assert!(out.snapshot.is_synthetic(SnapshotSection::Terrain));
    assert!(out.snapshot.weather.mean_temperature_c.is_finite());
    let fields: Vec<_> = out.dropped.iter().map(|e| (e.section, e.field)).collect();
    assert!(fields.contains(&("weather", "latitude")));
    assert!(fields.contains(&("weather", "longitude")));
    assert!(fields.contains(&("terrain", "longitude")));
}

#[test]
fn duplicate_fire_ids_are_kept_once() {
    let recs = records(vec![
        ProviderRecord::ok("firms", t0(), fires_payload()),
        ProviderRecord::ok("firms-modis", t0(), fires_payload()),
    ]);
    let s = processor::merge(&recs, &BoundingBox::default(), t0()).snapshot;
    assert_eq!(s.fires.len(), 2);
}

#[test]
fn merge_is_pure() {
    let a = processor::merge(&live_all(), &BoundingBox::default(), t0()).snapshot;
    let b = processor::merge(&live_all(), &BoundingBox::default(), t0()).snapshot;
    assert_eq!(a, b);
}

#[test]
fn randomized_records_always_yield_a_consistent_snapshot() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5eed);
    let bounds = BoundingBox::default();

    for round in 0..200 {
        let mut list = Vec::new();
        for (id, kind) in [
            ("firms", SourceKind::Fires),
            ("weather", SourceKind::Weather),
            ("terrain", SourceKind::Terrain),
        ] {
            let status = match rng.random_range(0..3) {
                0 => RecordStatus::Ok,
                1 => RecordStatus::Degraded,
                _ => RecordStatus::Failed,
            };
            if status == RecordStatus::Failed {
                list.push(synthetic(id, kind));
                continue;
            }
            let n = rng.random_range(0..6);
            let payload = match kind {
                SourceKind::Fires => Payload::Fires(
                    (0..n)
                        .map(|i| {
                            let mut f = fire(
                                &format!("f{round}-{i}"),
                                rng.random_range(30.0..44.0),
                                rng.random_range(-126.0..-112.0),
                                rng.random_range(0..120),
                            );
                            f.intensity = rng.random_range(-0.2..1.2);
                            f
                        })
                        .collect(),
                ),
                SourceKind::Weather => Payload::Weather(
                    (0..n)
                        .map(|i| {
                            station(
                                &format!("s{i}"),
                                rng.random_range(-20.0..70.0),
                                rng.random_range(-10.0..110.0),
                                rng.random_range(0.0..30.0),
                            )
                        })
                        .collect(),
                ),
                SourceKind::Terrain => Payload::Terrain(
                    (0..n)
                        .map(|_| TerrainSample {
                            latitude: 36.0,
                            longitude: -120.0,
                            elevation_m: rng.random_range(-1_000.0..10_000.0),
                            slope_deg: rng.random_range(0.0..60.0),
                        })
                        .collect(),
                ),
            };
            let mut rec = ProviderRecord::ok(id, t0(), payload);
            rec.status = status;
            list.push(rec);
        }

        let recs = records(list);
        let s = processor::merge(&recs, &bounds, t0()).snapshot;

        assert!(s.fires.iter().all(|f| bounds.contains(f.latitude, f.longitude)));
        assert!(s.fires.iter().all(|f| (0.0..=1.0).contains(&f.intensity)));
        assert!(s
            .fires
            .windows(2)
            .all(|w| w[0].detected_at >= w[1].detected_at));
        assert!((0.0..=100.0).contains(&s.derived.fire_weather_index));
        assert!((0.0..=1.0).contains(&s.derived.spread_potential));
        assert!((0.0..=100.0).contains(&s.weather.mean_relative_humidity_pct));

        let all_failed = recs.values().all(|r| r.status == RecordStatus::Failed);
        assert_eq!(all_failed, s.quality == QualityLevel::Fallback, "round {round}");
        if s.quality == QualityLevel::High {
            assert!(s.synthetic_sections.is_empty());
            assert!(recs.values().all(|r| r.status == RecordStatus::Ok));
        }
        if s.is_synthetic(SnapshotSection::Weather) {
            assert_eq!(s.weather, default_weather());
        }
    }
}

use super::*;

#[test]
fn defaults_match_documented_values() {
    let cfg = BenchConfig::default();
    assert_eq!(cfg.strategy, StrategyKind::Sequential);
    assert_eq!(cfg.scheduling, SchedulingMode::Unconstrained);
    assert_eq!(cfg.tiles, TileGrid { columns: 2, rows: 2 });
    assert_eq!(cfg.pending_surfaces, 2);
    assert_eq!(cfg.pipeline_pool_size, 10);
    assert_eq!(cfg.working_size, Extent::new(4000, 2000));
    assert_eq!(cfg.layer_count, 50);
    assert_eq!(cfg.device_lanes, 2);
    assert_eq!(cfg.presentable(), cfg.working_size);
    cfg.validate().unwrap();
}

#[test]
fn json_fills_missing_fields_with_defaults() {
    let json = r#"{
        "strategy": "tile-memory",
        "scheduling": "serial",
        "tiles": { "columns": 4, "rows": 1 },
        "working_size": { "width": 64, "height": 32 }
    }"#;
    let cfg = BenchConfig::from_reader(json.as_bytes()).unwrap();
    assert_eq!(cfg.strategy, StrategyKind::TileMemory);
    assert_eq!(cfg.scheduling, SchedulingMode::Serial);
    assert_eq!(cfg.tiles.count(), 4);
    assert_eq!(cfg.layer_count, 50);
    assert_eq!(cfg.strategy_opts().working, Extent::new(64, 32));
}

#[test]
fn unknown_fields_are_rejected() {
    let err = BenchConfig::from_reader(r#"{ "stratgy": "fused" }"#.as_bytes()).unwrap_err();
    assert!(matches!(err, BlendError::Serde(_)), "{err}");
}

#[test]
fn validation_catches_bad_values() {
    let bad = [
        BenchConfig {
            pending_surfaces: 1,
            ..BenchConfig::default()
        },
        BenchConfig {
            pipeline_pool_size: 0,
            ..BenchConfig::default()
        },
        BenchConfig {
            layer_count: 0,
            ..BenchConfig::default()
        },
        BenchConfig {
            tiles: TileGrid { columns: 3, rows: 2 },
            working_size: Extent::new(100, 100),
            ..BenchConfig::default()
        },
        BenchConfig {
            tiles: TileGrid { columns: 0, rows: 2 },
            ..BenchConfig::default()
        },
    ];
    for cfg in bad {
        assert!(matches!(cfg.validate(), Err(BlendError::Config(_))), "{cfg:?}");
    }
}

#[test]
fn missing_file_is_reported() {
    let err = BenchConfig::from_path("/nonexistent/blendbench.json").unwrap_err();
    assert!(err.to_string().contains("open config JSON"));
}

// ==========================================
// 进度引擎性质测试
// ==========================================
// 测试目标: 目录合法性 / 百分比范围 / 幂等 / 规范化 / 类别分解 /
//           事件回放对账 / 回退识别 / 典型场景
// ==========================================

mod test_helpers;

use construction_progress::domain::{
    ComponentType, DeltaMode, DimensionKind, MilestoneDefinition, MilestoneKind, MilestoneSpec,
    StandardCategory,
};
use construction_progress::engine::{
    CatalogError, DeltaEngine, EarnedManhoursAggregator, MilestoneCatalog,
    MilestoneValueNormalizer, PercentCompleteCalculator, PercentSource,
};
use serde_json::json;
use test_helpers::{event, state, ComponentBuilder};

fn scenario_catalog() -> MilestoneCatalog {
    let mut defs = MilestoneCatalog::builtin_definitions();
    defs.retain(|d| d.component_type != ComponentType::FieldWeld);
    defs.push(MilestoneDefinition::new(
        ComponentType::FieldWeld,
        2,
        vec![
            MilestoneSpec::new("Fit-up", 40.0, MilestoneKind::Discrete, StandardCategory::Install),
            MilestoneSpec::new(
                "Weld Complete",
                60.0,
                MilestoneKind::Discrete,
                StandardCategory::Install,
            )
            .with_aliases(&["Weld Made"]),
        ],
    ));
    MilestoneCatalog::load("scenario", defs).unwrap()
}

#[test]
fn test_builtin_weights_sum_to_100() {
    for definition in MilestoneCatalog::builtin_definitions() {
        assert!(
            (definition.total_weight() - 100.0).abs() < 1e-6,
            "{} 权重合计 {}",
            definition.component_type,
            definition.total_weight()
        );
    }
    assert!(MilestoneCatalog::builtin().is_ok());
}

#[test]
fn test_invalid_catalog_refused_at_load() {
    let defs = vec![MilestoneDefinition::new(
        ComponentType::Valve,
        1,
        vec![
            MilestoneSpec::new("Install", 60.0, MilestoneKind::Discrete, StandardCategory::Install),
            MilestoneSpec::new("Test", 30.0, MilestoneKind::Discrete, StandardCategory::Test),
        ],
    )];
    assert!(matches!(
        MilestoneCatalog::load("bad", defs),
        Err(CatalogError::WeightSumMismatch { .. })
    ));
}

#[test]
fn test_percent_always_within_bounds() {
    let catalog = MilestoneCatalog::builtin().unwrap();
    let samples = vec![
        state(&[("Receive", json!(true)), ("Install", json!(250))]),
        state(&[("Receive", json!(-3)), ("Punch", json!("abc"))]),
        state(&[("Fabricate", json!(100)), ("Install", json!(100)), ("Erect", json!(1))]),
        state(&[]),
    ];
    for component_type in ComponentType::ALL {
        for milestones in &samples {
            let pct = PercentCompleteCalculator::calculate(&catalog, component_type, milestones)
                .unwrap()
                .value;
            assert!((0.0..=100.0).contains(&pct), "{} → {}", component_type, pct);
        }
    }
}

#[test]
fn test_calculate_is_idempotent() {
    let catalog = scenario_catalog();
    let milestones = state(&[("fit up", json!(1)), ("Weld Made", json!("100%"))]);
    let a = PercentCompleteCalculator::calculate(&catalog, ComponentType::FieldWeld, &milestones).unwrap();
    let b = PercentCompleteCalculator::calculate(&catalog, ComponentType::FieldWeld, &milestones).unwrap();
    assert_eq!(a.value, b.value);
    assert_eq!(a.value, 100.0);
}

#[test]
fn test_discrete_normalization_equivalences() {
    let kind = MilestoneKind::Discrete;
    for raw in [json!(true), json!(1), json!(100)] {
        assert_eq!(MilestoneValueNormalizer::fraction(Some(&raw), kind), 1.0, "{}", raw);
    }
    for raw in [json!(false), json!(0)] {
        assert_eq!(MilestoneValueNormalizer::fraction(Some(&raw), kind), 0.0, "{}", raw);
    }
}

#[test]
fn test_category_decomposition_law() {
    let catalog = MilestoneCatalog::builtin().unwrap();
    let cases = vec![
        (ComponentType::Spool, state(&[("Receive", json!(1)), ("Erect", json!(true))])),
        (
            ComponentType::ThreadedPipe,
            state(&[("Fabricate", json!(37.5)), ("Support", json!(0.2)), ("Test", json!(true))]),
        ),
        (ComponentType::Valve, state(&[("Install", json!(1)), ("Restore", json!("1"))])),
    ];
    for (component_type, milestones) in cases {
        let breakdown = PercentCompleteCalculator::breakdown(&catalog, component_type, &milestones).unwrap();
        assert!((breakdown.by_category.total() - breakdown.percent).abs() < 1e-6);
    }
}

#[test]
fn test_field_weld_scenario_returns_40() {
    let catalog = scenario_catalog();
    let milestones = state(&[("Fit-up", json!(true)), ("Weld Complete", json!(false))]);
    let result = PercentCompleteCalculator::calculate(&catalog, ComponentType::FieldWeld, &milestones).unwrap();
    assert_eq!(result.value, 40.0);
    assert!(result.warnings.is_empty());
}

#[test]
fn test_threaded_pipe_scenario_returns_30() {
    let catalog = MilestoneCatalog::builtin().unwrap();
    let milestones = state(&[
        ("Fabricate", json!(100)),
        ("Install", json!(50)),
        ("Erect", json!(0)),
        ("Connect", json!(0)),
        ("Support", json!(0)),
        ("Punch", json!(false)),
        ("Test", json!(false)),
        ("Restore", json!(false)),
    ]);
    let result =
        PercentCompleteCalculator::calculate(&catalog, ComponentType::ThreadedPipe, &milestones).unwrap();
    assert!((result.value - 30.0).abs() < 1e-9);
    assert!(result.warnings.is_empty());
}

#[test]
fn test_aggregation_scenario() {
    let catalog = MilestoneCatalog::builtin().unwrap();
    // Valve: Receive 10 + Install 60 ... 用 Stored 口径直接指定百分比
    let a = ComponentBuilder::new("V1", ComponentType::Valve)
        .budget(Some(10.0))
        .stored_percent(50.0)
        .build();
    let b = ComponentBuilder::new("V2", ComponentType::Valve)
        .budget(Some(20.0))
        .stored_percent(25.0)
        .build();
    let table = EarnedManhoursAggregator::aggregate(
        &catalog,
        &[a, b],
        DimensionKind::Area,
        PercentSource::Stored,
        1e-6,
    );
    let row = table.row("A-100").unwrap();
    assert_eq!(row.budget_mh, 30.0);
    assert_eq!(row.earned_mh, 10.0);
    assert!((row.percent_complete() - 33.333333).abs() < 1e-4);
    assert_eq!(row.component_count, 2);
}

#[test]
fn test_unclassified_milestone_reported_once() {
    let catalog = scenario_catalog();
    let components: Vec<_> = (0..5)
        .map(|i| {
            ComponentBuilder::new(&format!("W{}", i), ComponentType::FieldWeld)
                .milestones(&[("Fit-up", json!(1)), ("Paint", json!(1)), ("PAINT", json!(true))])
                .build()
        })
        .collect();
    let table = EarnedManhoursAggregator::aggregate(
        &catalog,
        &components,
        DimensionKind::Area,
        PercentSource::Recomputed,
        1e-6,
    );
    let gaps = table.gaps.report();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].normalized_name, "paint");
    assert_eq!(gaps[0].component_count, 5);
    // 未分类里程碑不计入: 每个构件 40%
    assert!((table.row("A-100").unwrap().earned_mh - 20.0).abs() < 1e-9);
}

#[test]
fn test_rollback_sequence_nets_zero_with_one_negative_event() {
    let catalog = scenario_catalog();
    let weld = ComponentBuilder::new("W1", ComponentType::FieldWeld).build();
    let events = vec![
        event("e1", &weld, "Fit-up", Some(json!(0)), Some(json!(1)), 10, 1),
        event("e2", &weld, "Fit-up", Some(json!(1)), Some(json!(0)), 20, 2),
    ];
    let result = DeltaEngine::delta(&catalog, &[weld], &events, None, None, DeltaMode::Net);
    assert!(result.earned_delta_mh.abs() < 1e-12);
    assert_eq!(result.rollback_events.len(), 1);
    assert_eq!(result.rollback_events[0].event_id, "e2");
}

#[test]
fn test_lifetime_replay_reconciles_with_current_state() {
    let catalog = scenario_catalog();
    let weld = ComponentBuilder::new("W1", ComponentType::FieldWeld)
        .budget(Some(8.0))
        .milestones(&[("Fit-up", json!(true)), ("Weld Complete", json!(1))])
        .build();
    let events = vec![
        event("e1", &weld, "Fit-up", None, Some(json!(true)), 10, 1),
        event("e2", &weld, "Weld Made", None, Some(json!(100)), 20, 2),
        event("e3", &weld, "Weld Complete", Some(json!(100)), Some(json!(0)), 30, 3),
        event("e4", &weld, "Weld Complete", Some(json!(0)), Some(json!(1)), 40, 4),
    ];
    let outcome = DeltaEngine::replay_lifetime(&catalog, &weld, &events);
    assert!((outcome.current_earned_mh - 8.0).abs() < 1e-9);
    assert!(outcome.reconciles(1e-6));
    assert!(outcome.state_mismatches.is_empty());
}

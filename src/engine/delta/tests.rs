use super::*;
use crate::domain::milestone::MilestoneDefinition;
use crate::domain::types::ComponentType;
use chrono::{Duration, NaiveDate};
use serde_json::json;

// ==========================================
// 测试辅助函数
// ==========================================

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 2)
        .unwrap()
        .and_hms_opt(7, 0, 0)
        .unwrap()
}

fn weld_catalog() -> MilestoneCatalog {
    MilestoneCatalog::load(
        "delta-test",
        vec![MilestoneDefinition::new(
            ComponentType::FieldWeld,
            1,
            vec![
                MilestoneSpec::new("Fit-up", 40.0, MilestoneKind::Discrete, StandardCategory::Install),
                MilestoneSpec::new("Weld Complete", 60.0, MilestoneKind::Discrete, StandardCategory::Install)
                    .with_aliases(&["Weld Made"]),
            ],
        )],
    )
    .unwrap()
}

fn weld(id: &str, budget: f64, state: &[(&str, JsonValue)]) -> Component {
    Component {
        component_id: id.to_string(),
        project_id: "P1".to_string(),
        component_type: ComponentType::FieldWeld,
        identity_key: format!("DWG-1|{}", id),
        budgeted_mh: Some(budget),
        current_milestones: state.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        percent_complete: 0.0,
        is_retired: false,
        area_id: Some("A1".to_string()),
        system_id: None,
        test_package_id: None,
        drawing_id: Some("DWG-1".to_string()),
        welder_id: Some("W07".to_string()),
        created_by: "t".to_string(),
        created_at: t0(),
        updated_at: t0(),
        revision: 0,
    }
}

fn event(
    id: &str,
    component_id: &str,
    milestone: &str,
    prev: Option<JsonValue>,
    new: Option<JsonValue>,
    hours_after: i64,
) -> MilestoneEvent {
    MilestoneEvent {
        event_id: id.to_string(),
        component_id: component_id.to_string(),
        project_id: "P1".to_string(),
        sequence: 0,
        milestone_name: milestone.to_string(),
        previous_value: prev,
        new_value: new,
        delta_mh: 0.0,
        category: None,
        actor: "foreman".to_string(),
        event_ts: t0() + Duration::hours(hours_after),
    }
}

// ==========================================
// 测试用例
// ==========================================

#[test]
fn test_rollback_nets_to_zero_with_one_negative_event() {
    let catalog = weld_catalog();
    let c = weld("FW1", 10.0, &[("Fit-up", json!(0))]);
    let events = vec![
        event("e1", "FW1", "Fit-up", Some(json!(0)), Some(json!(1)), 1),
        event("e2", "FW1", "Fit-up", Some(json!(1)), Some(json!(0)), 2),
    ];

    let net = DeltaEngine::delta(&catalog, &[c.clone()], &events, None, None, DeltaMode::Net);
    assert!(net.earned_delta_mh.abs() < 1e-12);
    assert_eq!(net.rollback_events.len(), 1);
    assert_eq!(net.rollback_events[0].event_id, "e2");
    assert!((net.rollback_mh + 4.0).abs() < 1e-12);

    let forward = DeltaEngine::delta(&catalog, &[c], &events, None, None, DeltaMode::ForwardOnly);
    assert!((forward.earned_delta_mh - 4.0).abs() < 1e-12);
    assert_eq!(forward.rollback_events.len(), 1);
}

#[test]
fn test_window_is_half_open() {
    let catalog = weld_catalog();
    let c = weld("FW1", 10.0, &[]);
    let events = vec![
        event("e1", "FW1", "Fit-up", None, Some(json!(true)), 0),
        event("e2", "FW1", "Weld Complete", None, Some(json!(true)), 5),
    ];

    let r = DeltaEngine::delta(
        &catalog,
        &[c.clone()],
        &events,
        Some(t0()),
        Some(t0() + Duration::hours(5)),
        DeltaMode::Net,
    );
    assert_eq!(r.event_count, 1);
    assert!((r.earned_delta_mh - 4.0).abs() < 1e-12);

    let r = DeltaEngine::delta(
        &catalog,
        &[c],
        &events,
        Some(t0() + Duration::hours(5)),
        None,
        DeltaMode::Net,
    );
    assert_eq!(r.event_count, 1);
    assert!((r.earned_delta_mh - 6.0).abs() < 1e-12);
}

#[test]
fn test_unclassified_events_counted_but_excluded() {
    let catalog = weld_catalog();
    let c = weld("FW1", 10.0, &[]);
    let events = vec![
        event("e1", "FW1", "Paint", None, Some(json!(true)), 1),
        event("e2", "FW1", "paint", Some(json!(true)), Some(json!(false)), 2),
        event("e3", "FW1", "Weld Made", None, Some(json!(1)), 3),
    ];
    let r = DeltaEngine::delta(&catalog, &[c], &events, None, None, DeltaMode::Net);
    assert_eq!(r.event_count, 3);
    assert_eq!(r.unclassified_event_count, 2);
    assert_eq!(r.classified_event_count, 1);
    assert!((r.earned_delta_mh - 6.0).abs() < 1e-12);
    assert!((r.category_delta(StandardCategory::Install) - 6.0).abs() < 1e-12);

    let gaps = r.gaps.report();
    assert_eq!(gaps.len(), 1);
    assert_eq!(gaps[0].event_count, 2);
}

#[test]
fn test_events_for_unknown_components_are_skipped() {
    let catalog = weld_catalog();
    let events = vec![event("e1", "GONE", "Fit-up", None, Some(json!(1)), 1)];
    let r = DeltaEngine::delta(&catalog, &[], &events, None, None, DeltaMode::Net);
    assert_eq!(r.event_count, 1);
    assert_eq!(r.skipped_event_count, 1);
    assert_eq!(r.earned_delta_mh, 0.0);
}

#[test]
fn test_lifetime_replay_reconciles_with_current_state() {
    let catalog = weld_catalog();
    let c = weld("FW1", 12.0, &[("Fit-up", json!(true)), ("Weld Complete", json!(100))]);
    let events = vec![
        event("e1", "FW1", "Fit-up", None, Some(json!(true)), 1),
        event("e2", "FW1", "Weld Complete", None, Some(json!(1)), 2),
        event("e3", "FW1", "Weld Complete", Some(json!(1)), Some(json!(0)), 3),
        event("e4", "FW1", "Weld Complete", Some(json!(0)), Some(json!(100)), 4),
    ];
    let outcome = DeltaEngine::replay_lifetime(&catalog, &c, &events);
    assert_eq!(outcome.event_count, 4);
    assert!(outcome.warnings.is_empty());
    assert!(outcome.state_mismatches.is_empty());
    assert!((outcome.current_earned_mh - 12.0).abs() < 1e-9);
    assert!(outcome.reconciles(1e-9));

    // 全生命周期净增量之和也与当前状态一致
    let net = DeltaEngine::delta(&catalog, &[c], &events, None, None, DeltaMode::Net);
    assert!((net.earned_delta_mh - 12.0).abs() < 1e-9);
}

#[test]
fn test_replay_detects_missing_events() {
    let catalog = weld_catalog();
    // 当前状态已焊完, 但事件只记录了组对
    let c = weld("FW1", 10.0, &[("Fit-up", json!(true)), ("Weld Complete", json!(true))]);
    let events = vec![event("e1", "FW1", "Fit-up", None, Some(json!(true)), 1)];
    let outcome = DeltaEngine::replay_lifetime(&catalog, &c, &events);
    assert!(!outcome.reconciles(1e-6));
    assert_eq!(outcome.state_mismatches, vec!["Weld Complete".to_string()]);
}

#[test]
fn test_replay_flags_chain_break() {
    let catalog = weld_catalog();
    let c = weld("FW1", 10.0, &[("Fit-up", json!(false))]);
    let events = vec![
        event("e1", "FW1", "Fit-up", None, Some(json!(true)), 1),
        // 前值记录为 false, 但回放状态为 true: 中间缺一条事件
        event("e2", "FW1", "Fit-up", Some(json!(false)), Some(json!(false)), 2),
    ];
    let outcome = DeltaEngine::replay_lifetime(&catalog, &c, &events);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(matches!(
        outcome.warnings[0].kind,
        WarningKind::EventChainBreak { .. }
    ));
    // 回放以回放状态为前值, 因此仍与当前状态对账
    assert!(outcome.reconciles(1e-9));
}

#[test]
fn test_replay_orders_by_timestamp_not_input_order() {
    let catalog = weld_catalog();
    let c = weld("FW1", 10.0, &[("Fit-up", json!(false))]);
    let events = vec![
        event("e2", "FW1", "Fit-up", Some(json!(true)), Some(json!(false)), 2),
        event("e1", "FW1", "Fit-up", None, Some(json!(true)), 1),
    ];
    let outcome = DeltaEngine::replay_lifetime(&catalog, &c, &events);
    assert!(outcome.warnings.is_empty());
    assert!(outcome.state_mismatches.is_empty());
}

#[test]
fn test_reported_delta_floor_policy() {
    let catalog = weld_catalog();
    let c = weld("FW1", 10.0, &[("Fit-up", json!(false))]);
    let events = vec![
        event("e1", "FW1", "Fit-up", None, Some(json!(true)), 1),
        event("e2", "FW1", "Fit-up", Some(json!(true)), Some(json!(false)), 10),
        event("e3", "FW1", "Fit-up", Some(json!(false)), Some(json!(true)), 20),
    ];
    let comps = vec![c];

    // 窗口只包含回退
    let start = Some(t0() + Duration::hours(5));
    let end = Some(t0() + Duration::hours(15));
    let actual =
        DeltaEngine::reported_delta(&catalog, &comps, &events, start, end, ReportingPolicy::Actual);
    assert!((actual + 4.0).abs() < 1e-12);
    let floored = DeltaEngine::reported_delta(
        &catalog,
        &comps,
        &events,
        start,
        end,
        ReportingPolicy::FloorAtHistoricalMax,
    );
    assert_eq!(floored, 0.0);

    // 恢复到原最高值时, 地板口径不重复计入
    let start = Some(t0() + Duration::hours(15));
    let floored = DeltaEngine::reported_delta(
        &catalog,
        &comps,
        &events,
        start,
        None,
        ReportingPolicy::FloorAtHistoricalMax,
    );
    assert_eq!(floored, 0.0);
    let actual =
        DeltaEngine::reported_delta(&catalog, &comps, &events, start, None, ReportingPolicy::Actual);
    assert!((actual - 4.0).abs() < 1e-12);
}

#[test]
fn test_merge_of_component_partitions() {
    let catalog = weld_catalog();
    let a = weld("FW1", 10.0, &[]);
    let b = weld("FW2", 20.0, &[]);
    let events = vec![
        event("e1", "FW1", "Fit-up", None, Some(json!(true)), 1),
        event("e2", "FW2", "Fit-up", None, Some(json!(true)), 1),
    ];
    let whole = DeltaEngine::delta(
        &catalog,
        &[a.clone(), b.clone()],
        &events,
        None,
        None,
        DeltaMode::Net,
    );
    let mut merged = DeltaEngine::delta(&catalog, &[a], &events[..1], None, None, DeltaMode::Net);
    merged.merge(DeltaEngine::delta(&catalog, &[b], &events[1..], None, None, DeltaMode::Net));
    assert!((whole.earned_delta_mh - merged.earned_delta_mh).abs() < 1e-12);
    assert_eq!(whole.per_component, merged.per_component);
    assert!((whole.earned_delta_mh - 12.0).abs() < 1e-12);
}

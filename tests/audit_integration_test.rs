// ==========================================
// 一致性审计集成测试
// ==========================================
// 测试目标: 经 ProgressApi 的完整审计流程
//   - 正常写入路径下审计无差异
//   - 缓存百分比陈旧被发现, 限定范围修复后复审干净
//   - 取消与断点续跑
//   - 物化视图陈旧被发现
// ==========================================

mod test_helpers;

use construction_progress::config::EngineConfig;
use construction_progress::domain::{
    AuditCheckpoint, AuditEntity, ComponentType, Discrepancy, DiscrepancyKind, DimensionKind,
};
use construction_progress::engine::{MilestoneUpdate, RepairRequest};
use construction_progress::repository::{InMemoryProgressStore, ProgressDataSink, ProgressDataSource};
use construction_progress::{ApiError, ProgressApi};
use serde_json::json;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use test_helpers::{create_test_store, ts, ComponentBuilder};

fn memory_api(parallelism: usize) -> ProgressApi<InMemoryProgressStore> {
    let config = EngineConfig {
        parallelism,
        ..EngineConfig::default()
    };
    ProgressApi::new(Arc::new(InMemoryProgressStore::new()), config)
}

fn update(component_id: &str, milestone: &str, value: serde_json::Value, minutes: i64) -> MilestoneUpdate {
    MilestoneUpdate {
        component_id: component_id.to_string(),
        milestone_name: milestone.to_string(),
        new_value: Some(value),
        actor: "foreman".to_string(),
        at: ts(minutes),
    }
}

/// 三个区域各一个阀门, 全部经更新路径写入 Receive + Install
async fn seed_three_areas<S>(api: &ProgressApi<S>)
where
    S: ProgressDataSource + ProgressDataSink + 'static,
{
    for (i, area) in ["A-100", "A-200", "A-300"].iter().enumerate() {
        let id = format!("V{}", i + 1);
        let valve = ComponentBuilder::new(&id, ComponentType::Valve)
            .area(Some(area))
            .build();
        api.register_component(valve).await.unwrap();
        api.update_milestone(update(&id, "Receive", json!(true), 10)).await.unwrap();
        api.update_milestone(update(&id, "Install", json!(1), 20)).await.unwrap();
    }
}

#[tokio::test]
async fn test_audit_clean_after_normal_writes() {
    let (_temp_file, store) = create_test_store();
    let api = ProgressApi::new(store, EngineConfig::default());
    seed_three_areas(&api).await;
    api.refresh_materialized_view("P1", DimensionKind::Area).await.unwrap();

    let report = api.run_audit("P1", None, None).await.unwrap();
    assert!(report.is_clean(), "{:?}", report.discrepancies);
    assert!(report.is_complete());
    assert_eq!(report.components_audited, 3);
    assert_eq!(report.completed_keys.len(), 3);
    assert!(report.classification_gaps.is_empty());
    // 完成后断点清除
    assert!(api
        .store()
        .load_audit_checkpoint("P1", DimensionKind::Area)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_stale_percent_found_repaired_and_reaudited() {
    let api = memory_api(4);
    seed_three_areas(&api).await;

    // 绕过 API 直接写入陈旧的缓存值
    let mut stale = api.store().fetch_component("V2").await.unwrap().unwrap();
    assert_eq!(stale.percent_complete, 70.0);
    stale.percent_complete = 90.0;
    api.store().upsert_component(&stale).await.unwrap();

    let report = api.run_audit("P1", None, None).await.unwrap();
    assert_eq!(report.count_by_kind(DiscrepancyKind::StoredVsRecomputed), 1);
    let finding = &report.discrepancies[0];
    assert_eq!(finding.entity, AuditEntity::component("V2"));
    assert_eq!(finding.computed_a, 90.0);
    assert_eq!(finding.computed_b, 70.0);
    // 区域层面: 类别挣值 (里程碑重算) 与缓存百分比折算的挣值不一致
    assert_eq!(report.count_by_kind(DiscrepancyKind::CategoryRollupVsTotal), 1);
    let rollup = &report.discrepancies[1];
    assert_eq!(rollup.entity, AuditEntity::dimension(DimensionKind::Area, "A-200"));
    assert!((rollup.computed_a - 7.0).abs() < 1e-9);
    assert!((rollup.computed_b - 9.0).abs() < 1e-9);

    // 审计只读
    assert_eq!(
        api.store().fetch_component("V2").await.unwrap().unwrap().percent_complete,
        90.0
    );

    let records = api
        .repair_percent_complete(RepairRequest {
            project_id: "P1".to_string(),
            component_ids: vec!["V2".to_string(), "V3".to_string()],
            actor: "qa-lead".to_string(),
            reason: "audit finding".to_string(),
            tolerance_pp: 0.1,
        })
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].component_id, "V2");
    assert_eq!(records[0].old_percent, 90.0);
    assert_eq!(records[0].new_percent, 70.0);
    assert_eq!(api.repair_history("P1").await.unwrap().len(), 1);

    let reaudit = api.run_audit("P1", None, None).await.unwrap();
    assert!(reaudit.is_clean(), "{:?}", reaudit.discrepancies);
}

#[tokio::test]
async fn test_repair_requires_explicit_scope_and_reason() {
    let api = memory_api(4);
    let err = api
        .repair_percent_complete(RepairRequest {
            project_id: "P1".to_string(),
            component_ids: Vec::new(),
            actor: "qa-lead".to_string(),
            reason: "bulk".to_string(),
            tolerance_pp: 0.1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));

    let err = api
        .repair_percent_complete(RepairRequest {
            project_id: "P1".to_string(),
            component_ids: vec!["V1".to_string()],
            actor: "qa-lead".to_string(),
            reason: "  ".to_string(),
            tolerance_pp: 0.1,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));
}

#[tokio::test]
async fn test_cancelled_audit_reports_pending_keys() {
    let api = memory_api(1);
    seed_three_areas(&api).await;

    let cancel = Arc::new(AtomicBool::new(true));
    let report = api.run_audit("P1", None, Some(cancel)).await.unwrap();
    assert!(report.cancelled);
    assert!(!report.is_complete());
    assert!(report.completed_keys.is_empty());
    assert_eq!(report.pending_keys.len(), 3);
    assert_eq!(report.components_audited, 0);

    let rerun = api.run_audit("P1", None, None).await.unwrap();
    assert!(rerun.is_complete());
    assert_eq!(rerun.components_audited, 3);
}

#[tokio::test]
async fn test_audit_resumes_from_checkpoint() {
    let api = memory_api(1);
    seed_three_areas(&api).await;

    // 模拟上一次运行在 A-100 完成后中断
    let carried = Discrepancy::new(
        AuditEntity::component("V1"),
        DiscrepancyKind::StoredVsRecomputed,
        55.0,
        70.0,
        "上次运行".to_string(),
    );
    let checkpoint = AuditCheckpoint {
        run_id: "run-previous".to_string(),
        project_id: "P1".to_string(),
        dimension: DimensionKind::Area,
        tolerance_pp: EngineConfig::default().audit_tolerance_pp,
        completed_keys: ["A-100".to_string()].into_iter().collect(),
        discrepancies: vec![carried.clone()],
        components_audited: 1,
        started_at: ts(0),
        updated_at: ts(1),
    };
    api.store().save_audit_checkpoint(&checkpoint).await.unwrap();

    let report = api.run_audit("P1", None, None).await.unwrap();
    assert_eq!(report.run_id, "run-previous");
    assert!(report.is_complete());
    assert_eq!(report.components_audited, 3);
    assert_eq!(report.discrepancies, vec![carried]);
    assert!(api
        .store()
        .load_audit_checkpoint("P1", DimensionKind::Area)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_checkpoint_with_other_tolerance_is_discarded() {
    let api = memory_api(2);
    seed_three_areas(&api).await;
    let checkpoint = AuditCheckpoint {
        run_id: "run-previous".to_string(),
        project_id: "P1".to_string(),
        dimension: DimensionKind::Area,
        tolerance_pp: 5.0,
        completed_keys: ["A-100".to_string(), "A-200".to_string()].into_iter().collect(),
        discrepancies: Vec::new(),
        components_audited: 2,
        started_at: ts(0),
        updated_at: ts(1),
    };
    api.store().save_audit_checkpoint(&checkpoint).await.unwrap();

    let report = api.run_audit("P1", None, None).await.unwrap();
    assert_ne!(report.run_id, "run-previous");
    assert_eq!(report.components_audited, 3);
}

#[tokio::test]
async fn test_stale_materialized_view_detected() {
    let api = memory_api(4);
    seed_three_areas(&api).await;
    api.refresh_materialized_view("P1", DimensionKind::Area).await.unwrap();

    // 视图刷新后继续施工, 视图未刷新
    api.update_milestone(update("V3", "Punch", json!(true), 30)).await.unwrap();

    let report = api.run_audit("P1", None, None).await.unwrap();
    assert_eq!(report.count_by_kind(DiscrepancyKind::MaterializedViewVsRecomputed), 1);
    let finding = report
        .discrepancies
        .iter()
        .find(|d| d.kind == DiscrepancyKind::MaterializedViewVsRecomputed)
        .unwrap();
    assert_eq!(finding.entity, AuditEntity::dimension(DimensionKind::Area, "A-300"));
    assert!((finding.computed_a - 7.0).abs() < 1e-9);
    assert!((finding.computed_b - 8.0).abs() < 1e-9);

    api.refresh_materialized_view("P1", DimensionKind::Area).await.unwrap();
    assert!(api.run_audit("P1", None, None).await.unwrap().is_clean());
}

#[tokio::test]
async fn test_invalid_tolerance_rejected() {
    let api = memory_api(4);
    let err = api.run_audit("P1", Some(-1.0), None).await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidInput(_)));
}

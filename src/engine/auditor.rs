// ==========================================
// 管道施工进度引擎 - 一致性审计
// ==========================================
// 职责: 比对相互独立的计算路径并报告差异
//   1. 缓存 percent_complete vs 里程碑重算
//   2. 类别合计 (里程碑重算) vs 整体挣值 (缓存百分比 / 物化视图整体列)
//   3. 物化视图 vs 重算汇总
//   4. 事件全生命周期回放 vs 当前状态挣值
// 红线: 审计只读, 绝不修改任何状态
// 红线: 整项目审计按维度键分段, 每段完成后可落断点
// ==========================================

use crate::domain::audit::{
    AuditCheckpoint, AuditEntity, AuditReport, ClassificationGap, Discrepancy, DiscrepancyKind,
};
use crate::domain::component::Component;
use crate::domain::dimension::MaterializedViewRow;
use crate::domain::milestone::MilestoneEvent;
use crate::domain::types::DimensionKind;
use crate::domain::warning::{EngineWarning, WarningKind};
use crate::engine::aggregator::{EarnedManhoursAggregator, PercentSource};
use crate::engine::calculator::PercentCompleteCalculator;
use crate::engine::catalog::{ClassificationGapTracker, MilestoneCatalog};
use crate::engine::delta::DeltaEngine;
use crate::engine::error::EngineError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 工时比对的最小容差
const MIN_MH_TOLERANCE: f64 = 1e-6;

// ==========================================
// AuditSettings - 审计参数
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AuditSettings {
    /// 百分比容差 (百分点)
    pub tolerance_pp: f64,
    /// 类别分解容差 (相对 max(1, 挣值))
    pub decomposition_tolerance: f64,
    /// 分段维度
    pub dimension: DimensionKind,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            tolerance_pp: 0.1,
            decomposition_tolerance: 1e-6,
            dimension: DimensionKind::Area,
        }
    }
}

impl AuditSettings {
    /// 百分点容差换算为某一预算下的工时容差
    fn mh_tolerance(&self, budget_mh: f64) -> f64 {
        (self.tolerance_pp * budget_mh / 100.0).max(MIN_MH_TOLERANCE)
    }
}

// ==========================================
// PartitionAudit - 单个维度键的审计结果
// ==========================================
#[derive(Debug, Clone)]
pub struct PartitionAudit {
    pub key: String,
    pub components_audited: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub warnings: Vec<EngineWarning>,
    pub gaps: ClassificationGapTracker,
}

// ==========================================
// ConsistencyAuditor
// ==========================================
pub struct ConsistencyAuditor;

impl ConsistencyAuditor {
    /// 单个构件的比对 (缓存值 / 取值范围 / 事件回放)
    pub fn audit_component(
        catalog: &MilestoneCatalog,
        component: &Component,
        events: &[MilestoneEvent],
        settings: &AuditSettings,
    ) -> (Vec<Discrepancy>, Vec<EngineWarning>) {
        let id = component.component_id.as_str();
        let entity = AuditEntity::component(id);
        let mut discrepancies = Vec::new();
        let mut warnings = Vec::new();
        let stored = component.percent_complete;

        if !(0.0..=100.0).contains(&stored) || !stored.is_finite() {
            discrepancies.push(Discrepancy::new(
                entity.clone(),
                DiscrepancyKind::PercentOutOfRange,
                stored,
                stored.clamp(0.0, 100.0),
                "缓存完成百分比超出 [0,100]".to_string(),
            ));
        }

        let recomputed = match PercentCompleteCalculator::calculate_component(catalog, component) {
            Ok(r) => r,
            Err(EngineError::MissingDefinition(component_type)) => {
                warnings.push(EngineWarning::for_component(
                    id,
                    WarningKind::UncatalogedComponentType { component_type },
                ));
                return (discrepancies, warnings);
            }
            Err(e) => {
                warn!(component_id = id, error = %e, "构件重算失败, 跳过比对");
                return (discrepancies, warnings);
            }
        };
        warnings.extend(recomputed.warnings);

        if (stored - recomputed.value).abs() > settings.tolerance_pp {
            debug!(
                component_id = id,
                stored = stored,
                recomputed = recomputed.value,
                "缓存百分比与重算不一致"
            );
            discrepancies.push(Discrepancy::new(
                entity.clone(),
                DiscrepancyKind::StoredVsRecomputed,
                stored,
                recomputed.value,
                format!("容差 {} 百分点", settings.tolerance_pp),
            ));
        }

        let replay = DeltaEngine::replay_lifetime(catalog, component, events);
        warnings.extend(replay.warnings.iter().cloned());
        if !replay.reconciles(settings.mh_tolerance(component.budget_mh())) {
            discrepancies.push(Discrepancy::new(
                entity.clone(),
                DiscrepancyKind::ReplayVsCurrentEarned,
                replay.net_earned_mh,
                replay.current_earned_mh,
                format!("回放 {} 条事件", replay.event_count),
            ));
        }
        if !replay.state_mismatches.is_empty() {
            discrepancies.push(Discrepancy::new(
                entity,
                DiscrepancyKind::ReplayStateMismatch,
                replay.state_mismatches.len() as f64,
                0.0,
                replay.state_mismatches.join(", "),
            ));
        }

        (discrepancies, warnings)
    }

    /// 单个维度键的审计
    ///
    /// # 参数
    /// - `components`: 该维度键下的构件 (含退役, 内部跳过)
    /// - `events`: 这些构件的事件
    /// - `view_row`: 该键的物化视图行, `None` 表示不比对视图
    pub fn audit_partition(
        catalog: &MilestoneCatalog,
        key: &str,
        components: &[Component],
        events: &[MilestoneEvent],
        view_row: Option<&MaterializedViewRow>,
        settings: &AuditSettings,
    ) -> PartitionAudit {
        let mut events_by_component: HashMap<&str, Vec<MilestoneEvent>> = HashMap::new();
        for event in events {
            events_by_component
                .entry(event.component_id.as_str())
                .or_default()
                .push(event.clone());
        }

        let mut discrepancies = Vec::new();
        let mut warnings = Vec::new();
        let mut audited = 0;
        let mut gaps = ClassificationGapTracker::new();

        for component in components.iter().filter(|c| !c.is_retired) {
            audited += 1;
            let own_events = events_by_component
                .get(component.component_id.as_str())
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            for event in own_events {
                if catalog
                    .resolve(component.component_type, &event.milestone_name)
                    .is_none()
                    && catalog.definition(component.component_type).is_some()
                {
                    gaps.record_event(component.component_type, &event.milestone_name);
                }
            }
            let (d, w) = Self::audit_component(catalog, component, own_events, settings);
            discrepancies.extend(d);
            warnings.extend(w);
        }

        // 类别挣值 (里程碑重算) 与整体挣值 (缓存百分比) 走两条独立路径
        let dimension = settings.dimension;
        let recomputed = EarnedManhoursAggregator::aggregate_with(
            catalog,
            components,
            dimension,
            PercentSource::Recomputed,
            settings.decomposition_tolerance,
            |_| Some(key.to_string()),
        );
        let stored = EarnedManhoursAggregator::aggregate_with(
            catalog,
            components,
            dimension,
            PercentSource::Stored,
            settings.decomposition_tolerance,
            |_| Some(key.to_string()),
        );
        gaps.merge(recomputed.gaps);
        for failure in &recomputed.cross_check_failures {
            discrepancies.push(Discrepancy::new(
                AuditEntity::component(&failure.component_id),
                DiscrepancyKind::CategoryRollupVsTotal,
                failure.category_sum_mh,
                failure.total_earned_mh,
                "构件类别挣值合计与整体挣值不一致".to_string(),
            ));
        }

        let (earned, category_sum, budget) = recomputed
            .rows
            .get(key)
            .map(|t| (t.earned_mh, t.earned_by_category.total(), t.budget_mh))
            .unwrap_or((0.0, 0.0, 0.0));
        let stored_earned = stored.rows.get(key).map_or(0.0, |t| t.earned_mh);
        if (category_sum - stored_earned).abs() > settings.mh_tolerance(budget) {
            discrepancies.push(Discrepancy::new(
                AuditEntity::dimension(dimension, key),
                DiscrepancyKind::CategoryRollupVsTotal,
                category_sum,
                stored_earned,
                "维度类别挣值合计与缓存百分比折算的整体挣值不一致".to_string(),
            ));
        }

        // 物化视图 vs 重算; 视图类别列 vs 视图整体列
        if let Some(view) = view_row {
            let view_earned = view.totals.earned_mh;
            let view_tolerance = settings.mh_tolerance(budget.max(view.totals.budget_mh));
            if (view_earned - earned).abs() > view_tolerance {
                discrepancies.push(Discrepancy::new(
                    AuditEntity::dimension(dimension, key),
                    DiscrepancyKind::MaterializedViewVsRecomputed,
                    view_earned,
                    earned,
                    format!("视图刷新于 {}", view.refreshed_at),
                ));
            }
            let view_category_sum = view.totals.earned_by_category.total();
            if (view_category_sum - view_earned).abs() > view_tolerance {
                discrepancies.push(Discrepancy::new(
                    AuditEntity::dimension(dimension, key),
                    DiscrepancyKind::CategoryRollupVsTotal,
                    view_category_sum,
                    view_earned,
                    "物化视图类别列合计与整体挣值列不一致".to_string(),
                ));
            }
        }

        PartitionAudit {
            key: key.to_string(),
            components_audited: audited,
            discrepancies,
            warnings,
            gaps,
        }
    }

    /// 按维度键分组 (未分配归入 UNASSIGNED)
    pub fn partition<'a>(
        components: &'a [Component],
        dimension: DimensionKind,
    ) -> BTreeMap<String, Vec<&'a Component>> {
        let mut groups: BTreeMap<String, Vec<&Component>> = BTreeMap::new();
        for component in components {
            groups
                .entry(component.dimension_key_or_unassigned(dimension))
                .or_default()
                .push(component);
        }
        groups
    }

    /// 整项目审计 (顺序执行, 支持断点与取消)
    ///
    /// # 参数
    /// - `views`: 物化视图行, `None` 表示不比对视图
    /// - `checkpoint`: 断点, 已完成的维度键跳过
    /// - `cancel`: 取消标志, 在维度键之间检查
    #[allow(clippy::too_many_arguments)]
    pub fn audit(
        catalog: &MilestoneCatalog,
        project_id: &str,
        components: &[Component],
        events: &[MilestoneEvent],
        views: Option<&[MaterializedViewRow]>,
        settings: &AuditSettings,
        checkpoint: Option<AuditCheckpoint>,
        cancel: Option<&AtomicBool>,
    ) -> AuditReport {
        let groups = Self::partition(components, settings.dimension);
        let keys: BTreeSet<String> = groups
            .keys()
            .cloned()
            .chain(views.into_iter().flatten().map(|v| v.totals.key.clone()))
            .collect();
        let mut run = AuditRun::start(project_id, settings, checkpoint, keys);

        let component_ids: HashMap<&str, String> = components
            .iter()
            .map(|c| {
                (
                    c.component_id.as_str(),
                    c.dimension_key_or_unassigned(settings.dimension),
                )
            })
            .collect();
        let mut events_by_key: HashMap<&str, Vec<MilestoneEvent>> = HashMap::new();
        for event in events {
            if let Some(key) = component_ids.get(event.component_id.as_str()) {
                events_by_key.entry(key.as_str()).or_default().push(event.clone());
            }
        }
        let view_by_key: HashMap<&str, &MaterializedViewRow> = views
            .into_iter()
            .flatten()
            .map(|v| (v.totals.key.as_str(), v))
            .collect();

        for key in run.pending_keys() {
            if cancel.map_or(false, |c| c.load(Ordering::SeqCst)) {
                info!(project_id = project_id, run_id = %run.run_id(), "审计已取消");
                return run.finish(true);
            }
            let members: Vec<Component> = groups
                .get(&key)
                .map(|v| v.iter().map(|c| (*c).clone()).collect())
                .unwrap_or_default();
            let partition_events = events_by_key.get(key.as_str()).map(|v| v.as_slice()).unwrap_or(&[]);
            let result = Self::audit_partition(
                catalog,
                &key,
                &members,
                partition_events,
                view_by_key.get(key.as_str()).copied(),
                settings,
            );
            run.record(result);
        }

        run.finish(false)
    }
}

// ==========================================
// AuditRun - 审计运行状态 (断点续跑)
// ==========================================
#[derive(Debug, Clone)]
pub struct AuditRun {
    checkpoint: AuditCheckpoint,
    all_keys: BTreeSet<String>,
    warnings: Vec<EngineWarning>,
    gaps: ClassificationGapTracker,
}

impl AuditRun {
    /// 新建或从断点恢复
    ///
    /// 断点的项目、维度或容差与本次不一致时丢弃断点重新开始
    pub fn start(
        project_id: &str,
        settings: &AuditSettings,
        checkpoint: Option<AuditCheckpoint>,
        all_keys: BTreeSet<String>,
    ) -> Self {
        let now = chrono::Local::now().naive_local();
        let checkpoint = match checkpoint {
            Some(cp)
                if cp.project_id == project_id
                    && cp.dimension == settings.dimension
                    && (cp.tolerance_pp - settings.tolerance_pp).abs() < f64::EPSILON =>
            {
                info!(
                    run_id = %cp.run_id,
                    completed = cp.completed_keys.len(),
                    "从断点恢复审计"
                );
                cp
            }
            other => {
                if let Some(cp) = other {
                    warn!(run_id = %cp.run_id, "断点参数与本次审计不一致, 重新开始");
                }
                AuditCheckpoint {
                    run_id: Uuid::new_v4().to_string(),
                    project_id: project_id.to_string(),
                    dimension: settings.dimension,
                    tolerance_pp: settings.tolerance_pp,
                    completed_keys: BTreeSet::new(),
                    discrepancies: Vec::new(),
                    components_audited: 0,
                    started_at: now,
                    updated_at: now,
                }
            }
        };
        Self {
            checkpoint,
            all_keys,
            warnings: Vec::new(),
            gaps: ClassificationGapTracker::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.checkpoint.run_id
    }

    /// 尚未完成的维度键
    pub fn pending_keys(&self) -> Vec<String> {
        self.all_keys
            .difference(&self.checkpoint.completed_keys)
            .cloned()
            .collect()
    }

    /// 记录一个维度键的结果
    pub fn record(&mut self, partition: PartitionAudit) {
        debug!(
            dimension_key = %partition.key,
            components = partition.components_audited,
            discrepancies = partition.discrepancies.len(),
            "维度键审计完成"
        );
        self.checkpoint.completed_keys.insert(partition.key);
        self.checkpoint.components_audited += partition.components_audited;
        self.checkpoint.discrepancies.extend(partition.discrepancies);
        self.checkpoint.updated_at = chrono::Local::now().naive_local();
        self.warnings.extend(partition.warnings);
        self.gaps.merge(partition.gaps);
    }

    /// 当前断点快照
    pub fn checkpoint(&self) -> AuditCheckpoint {
        self.checkpoint.clone()
    }

    pub fn finish(self, cancelled: bool) -> AuditReport {
        let pending: BTreeSet<String> = self
            .all_keys
            .difference(&self.checkpoint.completed_keys)
            .cloned()
            .collect();
        let classification_gaps: Vec<ClassificationGap> = self.gaps.report();
        let mut discrepancies = self.checkpoint.discrepancies;
        discrepancies.sort_by(|a, b| a.entity.cmp(&b.entity).then(a.kind.cmp(&b.kind)));

        info!(
            run_id = %self.checkpoint.run_id,
            project_id = %self.checkpoint.project_id,
            discrepancies = discrepancies.len(),
            gaps = classification_gaps.len(),
            cancelled = cancelled,
            "审计结束"
        );

        AuditReport {
            run_id: self.checkpoint.run_id,
            project_id: self.checkpoint.project_id,
            tolerance_pp: self.checkpoint.tolerance_pp,
            partition_dimension: self.checkpoint.dimension,
            components_audited: self.checkpoint.components_audited,
            discrepancies,
            classification_gaps,
            warnings: self.warnings,
            completed_keys: self.checkpoint.completed_keys,
            pending_keys: pending,
            cancelled,
            started_at: self.checkpoint.started_at,
            finished_at: if cancelled {
                None
            } else {
                Some(chrono::Local::now().naive_local())
            },
        }
    }
}

// ==========================================
// 管道施工进度引擎 - 进度 API
// ==========================================
// 职责: 对外暴露的进度操作
//   - 完成百分比 / 维度汇总 / 时间窗增量 / 一致性审计
//   - 里程碑更新 / 物化视图刷新 / 人工修复 / 管理员删除
// 约束: 取数后引擎只做纯计算; 分片经 spawn_blocking 并发, 结果以求和合并
// 红线: 审计只读; 修复必须显式、限定范围、留痕
// ==========================================

use crate::api::dto::{AggregateReport, AggregateRow, DeltaReport};
use crate::api::error::{ApiError, ApiResult};
use crate::config::engine_config::EngineConfig;
use crate::domain::audit::{AuditReport, RepairRecord};
use crate::domain::component::{Component, ComponentFilter};
use crate::domain::dimension::MaterializedViewRow;
use crate::domain::milestone::{EventScope, MilestoneDefinition, MilestoneEvent};
use crate::domain::types::{DeltaMode, DimensionKind};
use crate::domain::warning::Calculated;
use crate::engine::aggregator::{AggregationTable, EarnedManhoursAggregator, PercentSource};
use crate::engine::auditor::{AuditRun, ConsistencyAuditor};
use crate::engine::calculator::PercentCompleteCalculator;
use crate::engine::catalog::MilestoneCatalog;
use crate::engine::delta::{DeltaEngine, DeltaResult};
use crate::engine::milestone_update::{MilestoneUpdate, MilestoneUpdateOutcome, MilestoneUpdater};
use crate::engine::repair::{RepairPlanner, RepairRequest};
use crate::repository::progress_source::{ProgressDataSink, ProgressDataSource};
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

fn join_error(e: JoinError) -> ApiError {
    ApiError::InternalError(format!("计算任务失败: {}", e))
}

/// 均分为至多 parts 个分片
fn split_into<T>(items: Vec<T>, parts: usize) -> Vec<Vec<T>> {
    if items.is_empty() {
        return Vec::new();
    }
    let size = items.len().div_ceil(parts.max(1));
    let mut chunks = Vec::new();
    let mut current = Vec::with_capacity(size);
    for item in items {
        current.push(item);
        if current.len() == size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// ==========================================
// ProgressApi
// ==========================================
pub struct ProgressApi<S> {
    store: Arc<S>,
    config: EngineConfig,
    pinned_catalog: Option<Arc<MilestoneCatalog>>,
}

impl<S> ProgressApi<S>
where
    S: ProgressDataSource + ProgressDataSink + 'static,
{
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            pinned_catalog: None,
        }
    }

    /// 固定使用给定目录 (例如 CSV 文件加载的目录), 不再从数据源读取
    pub fn with_catalog(mut self, catalog: MilestoneCatalog) -> Self {
        self.pinned_catalog = Some(Arc::new(catalog));
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ==========================================
    // 目录
    // ==========================================

    /// 当前生效的目录
    ///
    /// 数据源中无定义时使用内置目录
    pub async fn catalog(&self) -> ApiResult<Arc<MilestoneCatalog>> {
        if let Some(catalog) = &self.pinned_catalog {
            return Ok(catalog.clone());
        }
        let definitions = self
            .store
            .fetch_milestone_catalog(None, self.config.catalog_version)
            .await?;
        if definitions.is_empty() {
            debug!("数据源无里程碑目录, 使用内置目录");
            return Ok(Arc::new(MilestoneCatalog::builtin()?));
        }
        let label = match self.config.catalog_version {
            Some(v) => format!("db@v{}", v),
            None => "db@latest".to_string(),
        };
        let catalog =
            MilestoneCatalog::load_with_tolerance(&label, definitions, self.config.weight_sum_tolerance)?;
        Ok(Arc::new(catalog))
    }

    /// 校验并保存一组里程碑定义
    ///
    /// 任一定义无效时一条都不保存
    pub async fn install_catalog(&self, definitions: Vec<MilestoneDefinition>) -> ApiResult<usize> {
        MilestoneCatalog::load_with_tolerance(
            "install",
            definitions.clone(),
            self.config.weight_sum_tolerance,
        )?;
        for definition in &definitions {
            self.store.save_milestone_definition(definition).await?;
        }
        info!(count = definitions.len(), "里程碑目录已保存");
        Ok(definitions.len())
    }

    // ==========================================
    // 构件登记
    // ==========================================

    /// 登记新构件
    ///
    /// # 说明
    /// - 初始里程碑状态逐项写成种子事件, 与构件同一事务落库
    /// - 缓存百分比按目录重算, 调用方传入的值不采用
    /// - component_id 已存在时拒绝 (状态只经里程碑更新修改)
    pub async fn register_component(&self, component: Component) -> ApiResult<Calculated<Component>> {
        if component.created_by.trim().is_empty() {
            return Err(ApiError::InvalidInput("created_by 不能为空".to_string()));
        }
        let catalog = self.catalog().await?;
        let seed = MilestoneUpdater::seed(&catalog, &component)?;
        self.store
            .insert_component(&seed.component, &seed.events)
            .await?;
        info!(
            component_id = %seed.component.component_id,
            seed_events = seed.events.len(),
            percent = seed.component.percent_complete,
            "构件已登记"
        );
        Ok(Calculated::new(seed.component, seed.warnings))
    }

    // ==========================================
    // 完成百分比
    // ==========================================

    pub async fn compute_percent_complete(&self, component: &Component) -> ApiResult<Calculated<f64>> {
        let catalog = self.catalog().await?;
        Ok(PercentCompleteCalculator::calculate_component(&catalog, component)?)
    }

    pub async fn compute_percent_complete_by_id(&self, component_id: &str) -> ApiResult<Calculated<f64>> {
        let component = self.require_component(component_id).await?;
        self.compute_percent_complete(&component).await
    }

    async fn require_component(&self, component_id: &str) -> ApiResult<Component> {
        self.store
            .fetch_component(component_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Component(id={})不存在", component_id)))
    }

    // ==========================================
    // 维度汇总
    // ==========================================

    /// 按维度汇总挣值工时 (重算口径)
    pub async fn compute_aggregates(
        &self,
        project_id: &str,
        dimension: DimensionKind,
    ) -> ApiResult<AggregateReport> {
        let catalog = self.catalog().await?;
        let components = self
            .store
            .fetch_components(project_id, &ComponentFilter::active())
            .await?;
        let metadata = self.store.fetch_dimension_metadata(project_id).await?;

        let table = self
            .aggregate_parallel(catalog.clone(), components, dimension)
            .await?;

        let mut rows: Vec<AggregateRow> = Vec::with_capacity(table.rows.len());
        for (key, totals) in &table.rows {
            let mut row = AggregateRow::from(totals);
            row.label = metadata.label(dimension, key).map(str::to_string);
            rows.push(row);
        }
        let mut total = AggregateRow::from(&table.grand_total());
        total.key = project_id.to_string();

        if !table.cross_check_failures.is_empty() {
            warn!(
                project_id = project_id,
                failures = table.cross_check_failures.len(),
                "类别挣值交叉校验失败"
            );
        }

        Ok(AggregateReport {
            project_id: project_id.to_string(),
            dimension,
            catalog_version: catalog.version_label().to_string(),
            rows,
            total,
            warnings: table.warnings,
            classification_gaps: table.gaps.report(),
            cross_check_failures: table.cross_check_failures,
        })
    }

    async fn aggregate_parallel(
        &self,
        catalog: Arc<MilestoneCatalog>,
        components: Vec<Component>,
        dimension: DimensionKind,
    ) -> ApiResult<AggregationTable> {
        let tolerance = self.config.decomposition_tolerance;
        let tasks = split_into(components, self.config.effective_parallelism())
            .into_iter()
            .map(|chunk| {
                let catalog = catalog.clone();
                tokio::task::spawn_blocking(move || {
                    EarnedManhoursAggregator::aggregate(
                        &catalog,
                        &chunk,
                        dimension,
                        PercentSource::Recomputed,
                        tolerance,
                    )
                })
            });

        let mut table = AggregationTable::new(dimension);
        for partial in join_all(tasks).await {
            table.merge(partial.map_err(join_error)?);
        }
        Ok(table)
    }

    // ==========================================
    // 时间窗增量
    // ==========================================

    /// 时间窗挣值增量
    ///
    /// # 参数
    /// - `mode`: None 时使用配置的默认口径
    pub async fn compute_delta(
        &self,
        scope: &EventScope,
        start: Option<chrono::NaiveDateTime>,
        end: Option<chrono::NaiveDateTime>,
        mode: Option<DeltaMode>,
    ) -> ApiResult<DeltaReport> {
        let mode = mode.unwrap_or(self.config.default_delta_mode);
        let catalog = self.catalog().await?;
        let components = self.scope_components(scope).await?;
        // 报告口径需要窗口之前的历史, 一次取到 end 为止
        let events = self.store.fetch_milestone_events(scope, None, end).await?;

        let mut events_by_component: HashMap<String, Vec<MilestoneEvent>> = HashMap::new();
        for event in &events {
            events_by_component
                .entry(event.component_id.clone())
                .or_default()
                .push(event.clone());
        }
        let known: BTreeSet<&str> = components.iter().map(|c| c.component_id.as_str()).collect();
        let orphan_events: Vec<MilestoneEvent> = events
            .iter()
            .filter(|e| !known.contains(e.component_id.as_str()))
            .cloned()
            .collect();

        let tasks = split_into(components.clone(), self.config.effective_parallelism())
            .into_iter()
            .map(|chunk| {
                let catalog = catalog.clone();
                let chunk_events: Vec<MilestoneEvent> = chunk
                    .iter()
                    .flat_map(|c| {
                        events_by_component
                            .get(&c.component_id)
                            .cloned()
                            .unwrap_or_default()
                    })
                    .collect();
                tokio::task::spawn_blocking(move || {
                    DeltaEngine::delta(&catalog, &chunk, &chunk_events, start, end, mode)
                })
            })
            .collect::<Vec<_>>();

        // 快照外构件的事件只计数
        let mut result: DeltaResult = DeltaEngine::delta(&catalog, &[], &orphan_events, start, end, mode);
        for partial in join_all(tasks).await {
            result.merge(partial.map_err(join_error)?);
        }

        let policy = self.config.reporting_policy;
        let reported_delta_mh =
            DeltaEngine::reported_delta(&catalog, &components, &events, start, end, policy);

        info!(
            scope = %scope.describe(),
            mode = %mode,
            earned_delta_mh = result.earned_delta_mh,
            reported_delta_mh = reported_delta_mh,
            rollback_events = result.rollback_events.len(),
            "时间窗增量计算完成"
        );

        Ok(DeltaReport {
            scope: scope.clone(),
            catalog_version: catalog.version_label().to_string(),
            policy,
            classification_gaps: result.gaps.report(),
            result,
            reported_delta_mh,
        })
    }

    async fn scope_components(&self, scope: &EventScope) -> ApiResult<Vec<Component>> {
        match scope {
            EventScope::Component(id) => Ok(self
                .store
                .fetch_component(id)
                .await?
                .filter(|c| !c.is_retired)
                .into_iter()
                .collect()),
            EventScope::Project(project_id) => Ok(self
                .store
                .fetch_components(project_id, &ComponentFilter::active())
                .await?),
            EventScope::Dimension {
                project_id,
                dimension,
                key,
            } => {
                let filter = ComponentFilter {
                    dimension: Some((*dimension, key.clone())),
                    ..ComponentFilter::default()
                };
                Ok(self.store.fetch_components(project_id, &filter).await?)
            }
        }
    }

    // ==========================================
    // 一致性审计
    // ==========================================

    /// 整项目审计
    ///
    /// # 参数
    /// - `tolerance_pp`: None 时使用配置的容差
    /// - `cancel`: 取消标志, 每批维度键之间检查
    ///
    /// # 说明
    /// - 每批完成后落断点; 取消后再次调用从断点继续
    /// - 全部完成后清除断点
    pub async fn run_audit(
        &self,
        project_id: &str,
        tolerance_pp: Option<f64>,
        cancel: Option<Arc<AtomicBool>>,
    ) -> ApiResult<AuditReport> {
        let mut settings = self.config.to_audit_settings();
        if let Some(tol) = tolerance_pp {
            if !tol.is_finite() || tol < 0.0 {
                return Err(ApiError::InvalidInput(format!("审计容差无效: {}", tol)));
            }
            settings.tolerance_pp = tol;
        }
        let dimension = settings.dimension;

        let catalog = self.catalog().await?;
        let components = self
            .store
            .fetch_components(project_id, &ComponentFilter::active())
            .await?;
        let events = self
            .store
            .fetch_milestone_events(&EventScope::Project(project_id.to_string()), None, None)
            .await?;
        let views = self.store.fetch_materialized_view(project_id, dimension).await?;
        let checkpoint = self.store.load_audit_checkpoint(project_id, dimension).await?;

        // 按维度键切分构件、事件与视图行
        let mut groups: BTreeMap<String, Vec<Component>> = BTreeMap::new();
        for (key, members) in ConsistencyAuditor::partition(&components, dimension) {
            groups.insert(key, members.into_iter().cloned().collect());
        }
        let key_of: HashMap<&str, String> = components
            .iter()
            .map(|c| (c.component_id.as_str(), c.dimension_key_or_unassigned(dimension)))
            .collect();
        let mut events_by_key: HashMap<String, Vec<MilestoneEvent>> = HashMap::new();
        for event in events {
            if let Some(key) = key_of.get(event.component_id.as_str()) {
                events_by_key.entry(key.clone()).or_default().push(event);
            }
        }
        let mut view_by_key: HashMap<String, MaterializedViewRow> = views
            .into_iter()
            .map(|v| (v.totals.key.clone(), v))
            .collect();

        let all_keys: BTreeSet<String> = groups
            .keys()
            .cloned()
            .chain(view_by_key.keys().cloned())
            .collect();
        let mut run = AuditRun::start(project_id, &settings, checkpoint, all_keys);
        info!(
            project_id = project_id,
            run_id = %run.run_id(),
            pending = run.pending_keys().len(),
            "开始一致性审计"
        );

        let pending = run.pending_keys();
        for batch in pending.chunks(self.config.effective_parallelism()) {
            if cancel.as_ref().map_or(false, |c| c.load(Ordering::SeqCst)) {
                info!(project_id = project_id, run_id = %run.run_id(), "审计已取消, 断点已保存");
                return Ok(run.finish(true));
            }

            let tasks = batch
                .iter()
                .map(|key| {
                    let catalog = catalog.clone();
                    let key = key.clone();
                    let members = groups.remove(&key).unwrap_or_default();
                    let partition_events = events_by_key.remove(&key).unwrap_or_default();
                    let view = view_by_key.remove(&key);
                    tokio::task::spawn_blocking(move || {
                        ConsistencyAuditor::audit_partition(
                            &catalog,
                            &key,
                            &members,
                            &partition_events,
                            view.as_ref(),
                            &settings,
                        )
                    })
                })
                .collect::<Vec<_>>();

            for partition in join_all(tasks).await {
                run.record(partition.map_err(join_error)?);
            }
            self.store.save_audit_checkpoint(&run.checkpoint()).await?;
        }

        self.store.clear_audit_checkpoint(project_id, dimension).await?;
        Ok(run.finish(false))
    }

    // ==========================================
    // 里程碑更新
    // ==========================================

    /// 更新单个里程碑: 写状态 + 重算百分比 + 追加事件 (原子)
    ///
    /// 读取后构件被其他更新修改时返回 `OptimisticLockFailure`, 不写入任何内容
    pub async fn update_milestone(&self, update: MilestoneUpdate) -> ApiResult<MilestoneUpdateOutcome> {
        if update.actor.trim().is_empty() {
            return Err(ApiError::InvalidInput("actor 不能为空".to_string()));
        }
        let catalog = self.catalog().await?;
        let component = self.require_component(&update.component_id).await?;
        let next_sequence = self.store.next_event_sequence(&component.component_id).await?;

        let mut outcome = MilestoneUpdater::apply(&catalog, &component, &update, next_sequence)?;
        if let Some(event) = &outcome.event {
            self.store
                .apply_milestone_update(&outcome.component, event)
                .await?;
            outcome.component.revision += 1;
        }
        Ok(outcome)
    }

    // ==========================================
    // 物化视图
    // ==========================================

    /// 重算并整体替换某维度的物化视图
    pub async fn refresh_materialized_view(
        &self,
        project_id: &str,
        dimension: DimensionKind,
    ) -> ApiResult<Vec<MaterializedViewRow>> {
        let catalog = self.catalog().await?;
        let components = self
            .store
            .fetch_components(project_id, &ComponentFilter::active())
            .await?;
        let metadata = self.store.fetch_dimension_metadata(project_id).await?;
        let table = self.aggregate_parallel(catalog, components, dimension).await?;

        let refreshed_at = chrono::Local::now().naive_local();
        let rows: Vec<MaterializedViewRow> = table
            .rows
            .into_values()
            .map(|mut totals| {
                totals.label = metadata.label(dimension, &totals.key).map(str::to_string);
                MaterializedViewRow {
                    project_id: project_id.to_string(),
                    totals,
                    refreshed_at,
                }
            })
            .collect();

        let count = self
            .store
            .replace_materialized_view(project_id, dimension, &rows)
            .await?;
        info!(project_id = project_id, dimension = %dimension, rows = count, "物化视图已刷新");
        Ok(rows)
    }

    // ==========================================
    // 人工修复
    // ==========================================

    /// 重写超出容差的缓存百分比并留痕
    ///
    /// # 返回
    /// - 实际修复的记录 (无需修复时为空)
    pub async fn repair_percent_complete(&self, request: RepairRequest) -> ApiResult<Vec<RepairRecord>> {
        request.validate()?;
        let catalog = self.catalog().await?;
        let components = self
            .store
            .fetch_components(
                &request.project_id,
                &ComponentFilter::with_ids(request.component_ids.clone()),
            )
            .await?;

        let at = chrono::Local::now().naive_local();
        let records = RepairPlanner::plan(&catalog, &request, &components, at)?;
        if records.is_empty() {
            info!(project_id = %request.project_id, "范围内无需修复的构件");
            return Ok(records);
        }
        self.store.apply_repair(&records).await?;
        Ok(records)
    }

    pub async fn repair_history(&self, project_id: &str) -> ApiResult<Vec<RepairRecord>> {
        Ok(self.store.find_repairs(project_id).await?)
    }

    // ==========================================
    // 管理员删除
    // ==========================================

    /// 删除构件及其事件历史
    pub async fn delete_component(&self, component_id: &str, actor: &str) -> ApiResult<bool> {
        if actor.trim().is_empty() {
            return Err(ApiError::InvalidInput("actor 不能为空".to_string()));
        }
        let removed = self.store.delete_component(component_id).await?;
        if removed {
            warn!(component_id = component_id, actor = actor, "构件已被管理员删除 (含事件历史)");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::split_into;

    #[test]
    fn test_split_into_keeps_every_item() {
        let chunks = split_into((0..10).collect::<Vec<_>>(), 4);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), 10);
        assert!(split_into(Vec::<i32>::new(), 4).is_empty());
        assert_eq!(split_into(vec![1, 2], 8).len(), 2);
    }
}

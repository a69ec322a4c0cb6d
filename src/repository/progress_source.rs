// ==========================================
// 管道施工进度引擎 - 数据协作方接口
// ==========================================
// 职责: 定义引擎所需的取数接口与写回接口 (不包含业务逻辑)
// 实现者: SqliteProgressStore (rusqlite) / InMemoryProgressStore
// 红线: 超时与重试属于实现方, 引擎只消费已取回的快照
// ==========================================

use crate::domain::audit::{AuditCheckpoint, RepairRecord};
use crate::domain::component::{Component, ComponentFilter};
use crate::domain::dimension::{DimensionMetadata, MaterializedViewRow};
use crate::domain::milestone::{EventScope, MilestoneDefinition, MilestoneEvent};
use crate::domain::types::{ComponentType, DimensionKind};
use crate::repository::error::RepositoryResult;
use async_trait::async_trait;
use chrono::NaiveDateTime;

// ==========================================
// ProgressDataSource - 取数接口
// ==========================================
#[async_trait]
pub trait ProgressDataSource: Send + Sync {
    /// 按项目取构件 (支持类型 / 退役标记 / 维度键过滤)
    async fn fetch_components(
        &self,
        project_id: &str,
        filter: &ComponentFilter,
    ) -> RepositoryResult<Vec<Component>>;

    async fn fetch_component(&self, component_id: &str) -> RepositoryResult<Option<Component>>;

    /// 取里程碑目录
    ///
    /// # 参数
    /// - `component_type`: None 表示全部类型
    /// - `version`: None 表示最新; Some(v) 表示每个类型 ≤ v 的最高版本
    async fn fetch_milestone_catalog(
        &self,
        component_type: Option<ComponentType>,
        version: Option<i32>,
    ) -> RepositoryResult<Vec<MilestoneDefinition>>;

    /// 取事件, 窗口 [start, end), 按 (event_ts, sequence) 排序
    async fn fetch_milestone_events(
        &self,
        scope: &EventScope,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> RepositoryResult<Vec<MilestoneEvent>>;

    async fn fetch_dimension_metadata(&self, project_id: &str) -> RepositoryResult<DimensionMetadata>;

    async fn fetch_materialized_view(
        &self,
        project_id: &str,
        dimension: DimensionKind,
    ) -> RepositoryResult<Vec<MaterializedViewRow>>;

    /// 构件下一条事件的序号
    async fn next_event_sequence(&self, component_id: &str) -> RepositoryResult<i64>;
}

// ==========================================
// ProgressDataSink - 写回接口
// ==========================================
#[async_trait]
pub trait ProgressDataSink: Send + Sync {
    /// 登记或更新构件主数据
    ///
    /// 已存在的构件保留里程碑状态与 revision
    async fn upsert_component(&self, component: &Component) -> RepositoryResult<()>;

    /// 原子写入: 新构件 + 初始状态的种子事件
    ///
    /// component_id 已存在时返回 `UniqueConstraintViolation`, 不做任何修改
    async fn insert_component(
        &self,
        component: &Component,
        seed_events: &[MilestoneEvent],
    ) -> RepositoryResult<()>;

    async fn save_milestone_definition(&self, definition: &MilestoneDefinition) -> RepositoryResult<()>;

    async fn upsert_dimension_label(
        &self,
        project_id: &str,
        dimension: DimensionKind,
        key: &str,
        label: &str,
    ) -> RepositoryResult<()>;

    /// 原子写入: 新里程碑状态 + 重算百分比 + 事件
    ///
    /// `component.revision` 须等于库内当前版本, 否则返回 `OptimisticLockFailure`;
    /// 同一构件的事件序号重复时返回 `UniqueConstraintViolation`
    async fn apply_milestone_update(
        &self,
        component: &Component,
        event: &MilestoneEvent,
    ) -> RepositoryResult<()>;

    /// 原子写入: 缓存百分比 + 修复日志
    async fn apply_repair(&self, records: &[RepairRecord]) -> RepositoryResult<usize>;

    async fn find_repairs(&self, project_id: &str) -> RepositoryResult<Vec<RepairRecord>>;

    async fn replace_materialized_view(
        &self,
        project_id: &str,
        dimension: DimensionKind,
        rows: &[MaterializedViewRow],
    ) -> RepositoryResult<usize>;

    async fn save_audit_checkpoint(&self, checkpoint: &AuditCheckpoint) -> RepositoryResult<()>;

    async fn load_audit_checkpoint(
        &self,
        project_id: &str,
        dimension: DimensionKind,
    ) -> RepositoryResult<Option<AuditCheckpoint>>;

    async fn clear_audit_checkpoint(&self, project_id: &str, dimension: DimensionKind) -> RepositoryResult<()>;

    /// 管理员删除构件, 事件历史一并删除
    async fn delete_component(&self, component_id: &str) -> RepositoryResult<bool>;
}

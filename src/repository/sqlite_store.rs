// ==========================================
// 管道施工进度引擎 - SQLite 数据协作方
// ==========================================
// 职责: 以 rusqlite 实现 ProgressDataSource / ProgressDataSink
// 约束: 所有仓储共享同一连接; 需要原子性的写入在一个事务内完成
// ==========================================

use crate::db::{init_schema, open_sqlite_connection};
use crate::domain::audit::{AuditCheckpoint, RepairRecord};
use crate::domain::component::{Component, ComponentFilter};
use crate::domain::dimension::{DimensionMetadata, MaterializedViewRow};
use crate::domain::milestone::{EventScope, MilestoneDefinition, MilestoneEvent};
use crate::domain::types::{ComponentType, DimensionKind};
use crate::repository::audit_repo::AuditRepository;
use crate::repository::catalog_repo::MilestoneDefinitionRepository;
use crate::repository::component_repo::ComponentRepository;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::event_repo::MilestoneEventRepository;
use crate::repository::progress_source::{ProgressDataSink, ProgressDataSource};
use crate::repository::view_repo::{DimensionLabelRepository, ProgressViewRepository};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub struct SqliteProgressStore {
    conn: Arc<Mutex<Connection>>,
    components: ComponentRepository,
    definitions: MilestoneDefinitionRepository,
    events: MilestoneEventRepository,
    views: ProgressViewRepository,
    labels: DimensionLabelRepository,
    audits: AuditRepository,
}

impl SqliteProgressStore {
    /// 基于已有连接创建 (调用方负责建表)
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            components: ComponentRepository::new(conn.clone()),
            definitions: MilestoneDefinitionRepository::new(conn.clone()),
            events: MilestoneEventRepository::new(conn.clone()),
            views: ProgressViewRepository::new(conn.clone()),
            labels: DimensionLabelRepository::new(conn.clone()),
            audits: AuditRepository::new(conn.clone()),
            conn,
        }
    }

    /// 打开数据库文件并初始化 schema
    pub fn open(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        init_schema(&conn)?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// 共享连接 (供 ConfigManager 等复用)
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }
}

#[async_trait]
impl ProgressDataSource for SqliteProgressStore {
    async fn fetch_components(
        &self,
        project_id: &str,
        filter: &ComponentFilter,
    ) -> RepositoryResult<Vec<Component>> {
        self.components.find_by_project(project_id, filter)
    }

    async fn fetch_component(&self, component_id: &str) -> RepositoryResult<Option<Component>> {
        self.components.find_by_id(component_id)
    }

    async fn fetch_milestone_catalog(
        &self,
        component_type: Option<ComponentType>,
        version: Option<i32>,
    ) -> RepositoryResult<Vec<MilestoneDefinition>> {
        self.definitions.find(component_type, version)
    }

    async fn fetch_milestone_events(
        &self,
        scope: &EventScope,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> RepositoryResult<Vec<MilestoneEvent>> {
        let events = self.events.find_by_scope(scope, start, end)?;
        debug!(scope = %scope.describe(), count = events.len(), "已读取里程碑事件");
        Ok(events)
    }

    async fn fetch_dimension_metadata(&self, project_id: &str) -> RepositoryResult<DimensionMetadata> {
        self.labels.find_by_project(project_id)
    }

    async fn fetch_materialized_view(
        &self,
        project_id: &str,
        dimension: DimensionKind,
    ) -> RepositoryResult<Vec<MaterializedViewRow>> {
        self.views.find(project_id, dimension)
    }

    async fn next_event_sequence(&self, component_id: &str) -> RepositoryResult<i64> {
        self.events.next_sequence(component_id)
    }
}

#[async_trait]
impl ProgressDataSink for SqliteProgressStore {
    async fn upsert_component(&self, component: &Component) -> RepositoryResult<()> {
        self.components.upsert(component)
    }

    async fn insert_component(
        &self,
        component: &Component,
        seed_events: &[MilestoneEvent],
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        ComponentRepository::insert_on(&tx, component)?;
        for event in seed_events {
            MilestoneEventRepository::insert_on(&tx, event)?;
        }
        tx.commit()?;
        debug!(
            component_id = %component.component_id,
            seed_events = seed_events.len(),
            "构件已登记"
        );
        Ok(())
    }

    async fn save_milestone_definition(&self, definition: &MilestoneDefinition) -> RepositoryResult<()> {
        self.definitions.save(definition).map(|_| ())
    }

    async fn upsert_dimension_label(
        &self,
        project_id: &str,
        dimension: DimensionKind,
        key: &str,
        label: &str,
    ) -> RepositoryResult<()> {
        self.labels.upsert(project_id, dimension, key, label)
    }

    async fn apply_milestone_update(
        &self,
        component: &Component,
        event: &MilestoneEvent,
    ) -> RepositoryResult<()> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        ComponentRepository::update_progress_on(&tx, component)?;
        MilestoneEventRepository::insert_on(&tx, event)?;
        tx.commit()?;
        Ok(())
    }

    async fn apply_repair(&self, records: &[RepairRecord]) -> RepositoryResult<usize> {
        self.audits.apply_repairs(records)
    }

    async fn find_repairs(&self, project_id: &str) -> RepositoryResult<Vec<RepairRecord>> {
        self.audits.find_repairs(project_id)
    }

    async fn replace_materialized_view(
        &self,
        project_id: &str,
        dimension: DimensionKind,
        rows: &[MaterializedViewRow],
    ) -> RepositoryResult<usize> {
        self.views.replace(project_id, dimension, rows)
    }

    async fn save_audit_checkpoint(&self, checkpoint: &AuditCheckpoint) -> RepositoryResult<()> {
        self.audits.save_checkpoint(checkpoint)
    }

    async fn load_audit_checkpoint(
        &self,
        project_id: &str,
        dimension: DimensionKind,
    ) -> RepositoryResult<Option<AuditCheckpoint>> {
        self.audits.load_checkpoint(project_id, dimension)
    }

    async fn clear_audit_checkpoint(&self, project_id: &str, dimension: DimensionKind) -> RepositoryResult<()> {
        self.audits.clear_checkpoint(project_id, dimension)
    }

    async fn delete_component(&self, component_id: &str) -> RepositoryResult<bool> {
        self.components.delete(component_id)
    }
}

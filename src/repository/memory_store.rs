// ==========================================
// 管道施工进度引擎 - 内存数据协作方
// ==========================================
// 职责: 无数据库场景 (库调用方 / 测试) 的 ProgressDataSource / ProgressDataSink 实现
// 语义与 SqliteProgressStore 保持一致: 事件按 (event_ts, sequence) 排序, 删除构件级联删除事件
// ==========================================

use crate::domain::audit::{AuditCheckpoint, RepairRecord};
use crate::domain::component::{Component, ComponentFilter};
use crate::domain::dimension::{DimensionMetadata, MaterializedViewRow};
use crate::domain::milestone::{EventScope, MilestoneDefinition, MilestoneEvent};
use crate::domain::types::{ComponentType, DimensionKind};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::progress_source::{ProgressDataSink, ProgressDataSource};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
    components: BTreeMap<String, Component>,
    definitions: BTreeMap<(ComponentType, i32), MilestoneDefinition>,
    events: Vec<MilestoneEvent>,
    labels: HashMap<String, DimensionMetadata>,
    views: HashMap<(String, DimensionKind), Vec<MaterializedViewRow>>,
    checkpoints: HashMap<(String, DimensionKind), AuditCheckpoint>,
    repairs: Vec<RepairRecord>,
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    state: Mutex<MemoryState>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 直接追加事件 (导入历史事件用, 不经过里程碑更新)
    pub fn append_events(&self, events: Vec<MilestoneEvent>) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        for event in &events {
            check_sequence_free(&state, event)?;
        }
        state.events.extend(events);
        Ok(())
    }
}

/// (component_id, sequence) 唯一
fn check_sequence_free(state: &MemoryState, event: &MilestoneEvent) -> RepositoryResult<()> {
    let taken = state
        .events
        .iter()
        .any(|e| e.component_id == event.component_id && e.sequence == event.sequence);
    if taken {
        return Err(RepositoryError::UniqueConstraintViolation(format!(
            "milestone_event.component_id={}, sequence={}",
            event.component_id, event.sequence
        )));
    }
    Ok(())
}

fn event_in_scope(state: &MemoryState, event: &MilestoneEvent, scope: &EventScope) -> bool {
    match scope {
        EventScope::Component(id) => event.component_id == *id,
        EventScope::Project(project_id) => event.project_id == *project_id,
        EventScope::Dimension {
            project_id,
            dimension,
            key,
        } => {
            event.project_id == *project_id
                && state
                    .components
                    .get(&event.component_id)
                    .map_or(false, |c| c.dimension_key_or_unassigned(*dimension) == *key)
        }
    }
}

#[async_trait]
impl ProgressDataSource for InMemoryProgressStore {
    async fn fetch_components(
        &self,
        project_id: &str,
        filter: &ComponentFilter,
    ) -> RepositoryResult<Vec<Component>> {
        let state = self.lock()?;
        Ok(state
            .components
            .values()
            .filter(|c| c.project_id == project_id && filter.matches(c))
            .cloned()
            .collect())
    }

    async fn fetch_component(&self, component_id: &str) -> RepositoryResult<Option<Component>> {
        Ok(self.lock()?.components.get(component_id).cloned())
    }

    async fn fetch_milestone_catalog(
        &self,
        component_type: Option<ComponentType>,
        version: Option<i32>,
    ) -> RepositoryResult<Vec<MilestoneDefinition>> {
        let state = self.lock()?;
        let mut latest: BTreeMap<ComponentType, MilestoneDefinition> = BTreeMap::new();
        for ((ct, v), definition) in &state.definitions {
            if component_type.map_or(false, |t| t != *ct) || version.map_or(false, |max| *v > max) {
                continue;
            }
            latest.insert(*ct, definition.clone());
        }
        Ok(latest.into_values().collect())
    }

    async fn fetch_milestone_events(
        &self,
        scope: &EventScope,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> RepositoryResult<Vec<MilestoneEvent>> {
        let state = self.lock()?;
        let mut events: Vec<MilestoneEvent> = state
            .events
            .iter()
            .filter(|e| event_in_scope(&state, e, scope))
            .filter(|e| start.map_or(true, |s| e.event_ts >= s) && end.map_or(true, |x| e.event_ts < x))
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.order_key()
                .cmp(&b.order_key())
                .then_with(|| a.component_id.cmp(&b.component_id))
        });
        Ok(events)
    }

    async fn fetch_dimension_metadata(&self, project_id: &str) -> RepositoryResult<DimensionMetadata> {
        Ok(self.lock()?.labels.get(project_id).cloned().unwrap_or_default())
    }

    async fn fetch_materialized_view(
        &self,
        project_id: &str,
        dimension: DimensionKind,
    ) -> RepositoryResult<Vec<MaterializedViewRow>> {
        Ok(self
            .lock()?
            .views
            .get(&(project_id.to_string(), dimension))
            .cloned()
            .unwrap_or_default())
    }

    async fn next_event_sequence(&self, component_id: &str) -> RepositoryResult<i64> {
        let state = self.lock()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.component_id == component_id)
            .map(|e| e.sequence)
            .max()
            .map_or(1, |m| m + 1))
    }
}

#[async_trait]
impl ProgressDataSink for InMemoryProgressStore {
    async fn upsert_component(&self, component: &Component) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        let mut incoming = component.clone();
        if let Some(existing) = state.components.get(&component.component_id) {
            incoming.current_milestones = existing.current_milestones.clone();
            incoming.revision = existing.revision;
            incoming.created_by = existing.created_by.clone();
            incoming.created_at = existing.created_at;
        }
        state
            .components
            .insert(component.component_id.clone(), incoming);
        Ok(())
    }

    async fn insert_component(
        &self,
        component: &Component,
        seed_events: &[MilestoneEvent],
    ) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        if state.components.contains_key(&component.component_id) {
            return Err(RepositoryError::UniqueConstraintViolation(format!(
                "component.component_id={}",
                component.component_id
            )));
        }
        for event in seed_events {
            check_sequence_free(&state, event)?;
        }
        state
            .components
            .insert(component.component_id.clone(), component.clone());
        state.events.extend(seed_events.iter().cloned());
        Ok(())
    }

    async fn save_milestone_definition(&self, definition: &MilestoneDefinition) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        state.definitions.insert(
            (definition.component_type, definition.version),
            definition.clone(),
        );
        Ok(())
    }

    async fn upsert_dimension_label(
        &self,
        project_id: &str,
        dimension: DimensionKind,
        key: &str,
        label: &str,
    ) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        state
            .labels
            .entry(project_id.to_string())
            .or_default()
            .insert(dimension, key, label);
        Ok(())
    }

    async fn apply_milestone_update(
        &self,
        component: &Component,
        event: &MilestoneEvent,
    ) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        let actual = state
            .components
            .get(&component.component_id)
            .map(|c| c.revision)
            .ok_or_else(|| RepositoryError::NotFound {
                entity: "Component".to_string(),
                id: component.component_id.clone(),
            })?;
        if actual != component.revision {
            return Err(RepositoryError::OptimisticLockFailure {
                component_id: component.component_id.clone(),
                expected: component.revision,
                actual,
            });
        }
        check_sequence_free(&state, event)?;

        if let Some(stored) = state.components.get_mut(&component.component_id) {
            stored.current_milestones = component.current_milestones.clone();
            stored.percent_complete = component.percent_complete;
            stored.updated_at = component.updated_at;
            stored.revision = actual + 1;
        }
        state.events.push(event.clone());
        Ok(())
    }

    async fn apply_repair(&self, records: &[RepairRecord]) -> RepositoryResult<usize> {
        let mut state = self.lock()?;
        // 先校验全部构件存在, 保证全有或全无
        for record in records {
            if !state.components.contains_key(&record.component_id) {
                return Err(RepositoryError::NotFound {
                    entity: "Component".to_string(),
                    id: record.component_id.clone(),
                });
            }
        }
        for record in records {
            if let Some(c) = state.components.get_mut(&record.component_id) {
                c.percent_complete = record.new_percent;
            }
            state.repairs.push(record.clone());
        }
        Ok(records.len())
    }

    async fn find_repairs(&self, project_id: &str) -> RepositoryResult<Vec<RepairRecord>> {
        Ok(self
            .lock()?
            .repairs
            .iter()
            .filter(|r| r.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn replace_materialized_view(
        &self,
        project_id: &str,
        dimension: DimensionKind,
        rows: &[MaterializedViewRow],
    ) -> RepositoryResult<usize> {
        let mut state = self.lock()?;
        state
            .views
            .insert((project_id.to_string(), dimension), rows.to_vec());
        Ok(rows.len())
    }

    async fn save_audit_checkpoint(&self, checkpoint: &AuditCheckpoint) -> RepositoryResult<()> {
        let mut state = self.lock()?;
        state.checkpoints.insert(
            (checkpoint.project_id.clone(), checkpoint.dimension),
            checkpoint.clone(),
        );
        Ok(())
    }

    async fn load_audit_checkpoint(
        &self,
        project_id: &str,
        dimension: DimensionKind,
    ) -> RepositoryResult<Option<AuditCheckpoint>> {
        Ok(self
            .lock()?
            .checkpoints
            .get(&(project_id.to_string(), dimension))
            .cloned())
    }

    async fn clear_audit_checkpoint(&self, project_id: &str, dimension: DimensionKind) -> RepositoryResult<()> {
        self.lock()?
            .checkpoints
            .remove(&(project_id.to_string(), dimension));
        Ok(())
    }

    async fn delete_component(&self, component_id: &str) -> RepositoryResult<bool> {
        let mut state = self.lock()?;
        let removed = state.components.remove(component_id).is_some();
        if removed {
            state.events.retain(|e| e.component_id != component_id);
        }
        Ok(removed)
    }
}

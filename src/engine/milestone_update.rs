// ==========================================
// 管道施工进度引擎 - 里程碑更新
// ==========================================
// 职责: 一次里程碑取值变更 → 新状态 + 重算百分比 + 不可变事件
// 红线: 里程碑状态只能经由本路径修改, 每次修改必有一条事件
// 红线: 取值未变化不产生事件; 已退役构件拒绝更新
// ==========================================

use crate::domain::component::Component;
use crate::domain::milestone::MilestoneEvent;
use crate::domain::warning::{EngineWarning, WarningKind};
use crate::engine::calculator::PercentCompleteCalculator;
use crate::engine::catalog::{normalize_milestone_name, MilestoneCatalog};
use crate::engine::delta::DeltaEngine;
use crate::engine::error::{EngineError, EngineResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};
use uuid::Uuid;

/// 里程碑更新请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneUpdate {
    pub component_id: String,
    pub milestone_name: String,
    /// None 表示移除该里程碑
    pub new_value: Option<JsonValue>,
    pub actor: String,
    pub at: NaiveDateTime,
}

/// 里程碑更新结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneUpdateOutcome {
    /// 更新后的构件 (未变化时与输入相同)
    pub component: Component,
    /// 未变化时为 None
    pub event: Option<MilestoneEvent>,
    pub previous_percent: f64,
    pub new_percent: f64,
    pub warnings: Vec<EngineWarning>,
}

impl MilestoneUpdateOutcome {
    pub fn changed(&self) -> bool {
        self.event.is_some()
    }
}

/// 登记结果: 初始状态逐项折算出的种子事件
#[derive(Debug, Clone)]
pub struct RegistrationSeed {
    pub component: Component,
    pub events: Vec<MilestoneEvent>,
    pub warnings: Vec<EngineWarning>,
}

// ==========================================
// MilestoneUpdater
// ==========================================
pub struct MilestoneUpdater;

impl MilestoneUpdater {
    /// 新构件的初始里程碑状态 → 种子事件
    ///
    /// 从空状态起按名称顺序逐项应用更新 (操作人 = created_by, 时间 = created_at),
    /// 回放种子事件即得到登记后的状态
    ///
    /// # 返回
    /// - `Err(MissingDefinition)`: 构件类型无目录
    pub fn seed(catalog: &MilestoneCatalog, component: &Component) -> EngineResult<RegistrationSeed> {
        let mut current = component.clone();
        current.current_milestones.clear();
        current.percent_complete = 0.0;
        current.is_retired = false;
        current.revision = 0;

        let mut events = Vec::new();
        for (name, value) in &component.current_milestones {
            let update = MilestoneUpdate {
                component_id: component.component_id.clone(),
                milestone_name: name.clone(),
                new_value: Some(value.clone()),
                actor: component.created_by.clone(),
                at: component.created_at,
            };
            let outcome = Self::apply(catalog, &current, &update, events.len() as i64 + 1)?;
            events.extend(outcome.event);
            current = outcome.component;
        }

        let recalculated = PercentCompleteCalculator::calculate_component(catalog, &current)?;
        current.percent_complete = recalculated.value;
        current.is_retired = component.is_retired;
        current.updated_at = component.updated_at;

        debug!(
            component_id = %component.component_id,
            seed_events = events.len(),
            percent = current.percent_complete,
            "初始里程碑状态已折算为种子事件"
        );
        Ok(RegistrationSeed {
            component: current,
            events,
            warnings: recalculated.warnings,
        })
    }

    /// 应用一次里程碑更新
    ///
    /// # 参数
    /// - `next_sequence`: 该构件下一条事件的序号
    ///
    /// # 返回
    /// - `Err(RetiredComponent)`: 构件已退役
    /// - `Err(MissingDefinition)`: 构件类型无目录, 无法重算百分比
    pub fn apply(
        catalog: &MilestoneCatalog,
        component: &Component,
        update: &MilestoneUpdate,
        next_sequence: i64,
    ) -> EngineResult<MilestoneUpdateOutcome> {
        if component.is_retired {
            return Err(EngineError::RetiredComponent(component.component_id.clone()));
        }
        let ct = component.component_type;
        if catalog.definition(ct).is_none() {
            return Err(EngineError::MissingDefinition(ct));
        }

        let id = component.component_id.as_str();
        let mut warnings = Vec::new();

        // 1. 名称解析: 别名 / 大小写变体统一为规范名称
        let spec = catalog.resolve(ct, &update.milestone_name);
        let stored_name = match spec {
            Some(s) => s.name.clone(),
            None => {
                warnings.push(EngineWarning::for_component(
                    id,
                    WarningKind::ClassificationGap {
                        component_type: ct,
                        milestone: update.milestone_name.clone(),
                    },
                ));
                update.milestone_name.clone()
            }
        };

        // 2. 找出状态中指向同一里程碑的全部键
        let target = normalize_milestone_name(&stored_name);
        let variant_keys: Vec<String> = component
            .current_milestones
            .keys()
            .filter(|k| {
                let resolved = catalog.canonical_name(ct, k).unwrap_or(k.as_str());
                normalize_milestone_name(resolved) == target
            })
            .cloned()
            .collect();
        let previous_value = component
            .current_milestones
            .get(&stored_name)
            .or_else(|| {
                variant_keys
                    .first()
                    .and_then(|k| component.current_milestones.get(k))
            })
            .cloned();

        let previous_percent = component.percent_complete;
        if same_raw_value(previous_value.as_ref(), update.new_value.as_ref())
            && variant_keys.iter().all(|k| *k == stored_name)
        {
            debug!(component_id = id, milestone = %stored_name, "里程碑取值未变化, 不产生事件");
            return Ok(MilestoneUpdateOutcome {
                component: component.clone(),
                event: None,
                previous_percent,
                new_percent: previous_percent,
                warnings,
            });
        }

        // 3. 新状态
        let mut updated = component.clone();
        for key in &variant_keys {
            updated.current_milestones.remove(key);
        }
        if let Some(value) = &update.new_value {
            updated
                .current_milestones
                .insert(stored_name.clone(), value.clone());
        }

        // 4. 事件 (增量按更新前预算计)
        let mut event = MilestoneEvent {
            event_id: Uuid::new_v4().to_string(),
            component_id: id.to_string(),
            project_id: component.project_id.clone(),
            sequence: next_sequence,
            milestone_name: stored_name.clone(),
            previous_value,
            new_value: update.new_value.clone(),
            delta_mh: 0.0,
            category: spec.map(|s| s.category),
            actor: update.actor.clone(),
            event_ts: update.at,
        };
        if let Some(contribution) = DeltaEngine::event_contribution(catalog, component, &event) {
            event.delta_mh = contribution.signed_mh;
        }

        // 5. 重算百分比
        let recalculated = PercentCompleteCalculator::calculate_component(catalog, &updated)?;
        warnings.extend(recalculated.warnings);
        updated.percent_complete = recalculated.value;
        updated.updated_at = update.at;

        info!(
            component_id = id,
            milestone = %stored_name,
            actor = %update.actor,
            delta_mh = event.delta_mh,
            previous_percent = previous_percent,
            new_percent = updated.percent_complete,
            "里程碑已更新"
        );

        Ok(MilestoneUpdateOutcome {
            new_percent: updated.percent_complete,
            component: updated,
            event: Some(event),
            previous_percent,
            warnings,
        })
    }
}

/// 原始值是否相同 (JSON 相等或数值相等)
fn same_raw_value(a: Option<&JsonValue>, b: Option<&JsonValue>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => {
            x == y
                || matches!((x.as_f64(), y.as_f64()), (Some(fx), Some(fy)) if (fx - fy).abs() < 1e-12)
        }
        _ => false,
    }
}

// ==========================================
// 管道施工进度引擎 - 缓存百分比修复
// ==========================================
// 职责: 对显式范围内的构件重新审计, 生成修复记录
// 红线: 修复必须由人发起, 必须有操作人、原因与明确范围
// 红线: 只重写超出容差的缓存值, 里程碑状态与事件不动
// ==========================================

use crate::domain::audit::RepairRecord;
use crate::domain::component::Component;
use crate::engine::calculator::PercentCompleteCalculator;
use crate::engine::catalog::MilestoneCatalog;
use crate::engine::error::{EngineError, EngineResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{info, warn};
use uuid::Uuid;

/// 修复请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairRequest {
    pub project_id: String,
    pub component_ids: Vec<String>,
    pub actor: String,
    pub reason: String,
    pub tolerance_pp: f64,
}

impl RepairRequest {
    /// 校验请求
    pub fn validate(&self) -> EngineResult<()> {
        if self.actor.trim().is_empty() {
            return Err(EngineError::InvalidRepairRequest("缺少操作人".to_string()));
        }
        if self.reason.trim().is_empty() {
            return Err(EngineError::InvalidRepairRequest("缺少修复原因".to_string()));
        }
        if self.component_ids.is_empty() {
            return Err(EngineError::InvalidRepairRequest(
                "必须指定构件范围, 不允许全项目修复".to_string(),
            ));
        }
        if !self.tolerance_pp.is_finite() || self.tolerance_pp < 0.0 {
            return Err(EngineError::InvalidRepairRequest(format!(
                "容差无效: {}",
                self.tolerance_pp
            )));
        }
        Ok(())
    }
}

pub struct RepairPlanner;

impl RepairPlanner {
    /// 生成修复记录 (不落库)
    ///
    /// # 参数
    /// - `components`: 至少包含请求范围内的构件, 范围外的忽略
    pub fn plan(
        catalog: &MilestoneCatalog,
        request: &RepairRequest,
        components: &[Component],
        at: NaiveDateTime,
    ) -> EngineResult<Vec<RepairRecord>> {
        request.validate()?;
        let scope: BTreeSet<&str> = request.component_ids.iter().map(|s| s.as_str()).collect();

        let mut records = Vec::new();
        let mut seen = BTreeSet::new();
        for component in components {
            let id = component.component_id.as_str();
            if !scope.contains(id) || component.project_id != request.project_id {
                continue;
            }
            seen.insert(id);
            if component.is_retired {
                continue;
            }

            let recomputed = match PercentCompleteCalculator::calculate_component(catalog, component) {
                Ok(r) => r.value,
                Err(EngineError::MissingDefinition(ct)) => {
                    warn!(component_id = id, component_type = %ct, "构件类型无目录, 无法修复");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let stored = component.percent_complete;
            let out_of_range = !stored.is_finite() || !(0.0..=100.0).contains(&stored);
            if !out_of_range && (stored - recomputed).abs() <= request.tolerance_pp {
                continue;
            }

            info!(
                component_id = id,
                actor = %request.actor,
                reason = %request.reason,
                old_percent = stored,
                new_percent = recomputed,
                "计划修复缓存完成百分比"
            );
            records.push(RepairRecord {
                repair_id: Uuid::new_v4().to_string(),
                project_id: request.project_id.clone(),
                component_id: id.to_string(),
                old_percent: stored,
                new_percent: recomputed,
                actor: request.actor.clone(),
                reason: request.reason.clone(),
                repaired_at: at,
            });
        }

        for missing in scope.difference(&seen) {
            warn!(component_id = *missing, "修复范围内的构件不存在");
        }
        Ok(records)
    }
}

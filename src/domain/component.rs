// ==========================================
// 管道施工进度引擎 - 构件领域模型
// ==========================================
// 红线: percent_complete 是缓存投影, 不是事实来源
// 红线: 已退役构件不计入任何汇总
// ==========================================

use crate::domain::types::{ComponentType, DimensionKind};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// 未分配维度时使用的分组键
pub const UNASSIGNED_DIMENSION_KEY: &str = "UNASSIGNED";

/// 里程碑原始状态: 名称 → 原始值 (bool / 0-1 / 0-100 / 字符串)
pub type MilestoneState = BTreeMap<String, JsonValue>;

// ==========================================
// Component - 构件
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Component {
    // ===== 标识 =====
    pub component_id: String,
    pub project_id: String,
    pub component_type: ComponentType,
    pub identity_key: String, // 类型相关的复合键, 例如 "P-101|W-12"

    // ===== 工时与进度 =====
    pub budgeted_mh: Option<f64>,            // 预算工时, 未设置视为 0
    pub current_milestones: MilestoneState,  // 当前里程碑状态
    pub percent_complete: f64,               // 缓存的完成百分比 0-100
    pub is_retired: bool,                    // 退役标记

    // ===== 维度关联 =====
    pub area_id: Option<String>,
    pub system_id: Option<String>,
    pub test_package_id: Option<String>,
    pub drawing_id: Option<String>,
    pub welder_id: Option<String>,

    // ===== 审计 =====
    pub created_by: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(default)]
    pub revision: i32, // 乐观锁版本, 每次里程碑写入 +1
}

impl Component {
    /// 预算工时 (未设置按 0 处理)
    pub fn budget_mh(&self) -> f64 {
        match self.budgeted_mh {
            Some(v) if v.is_finite() && v > 0.0 => v,
            _ => 0.0,
        }
    }

    /// 按维度取分组键
    ///
    /// # 返回
    /// - `Some(key)`: 已分配
    /// - `None`: 未分配 (项目维度总是返回项目 ID)
    pub fn dimension_key(&self, dimension: DimensionKind) -> Option<&str> {
        let key = match dimension {
            DimensionKind::Area => self.area_id.as_deref(),
            DimensionKind::System => self.system_id.as_deref(),
            DimensionKind::TestPackage => self.test_package_id.as_deref(),
            DimensionKind::Welder => self.welder_id.as_deref(),
            DimensionKind::Project => Some(self.project_id.as_str()),
        };
        key.filter(|k| !k.trim().is_empty())
    }

    /// 分组键, 未分配时归入 UNASSIGNED
    pub fn dimension_key_or_unassigned(&self, dimension: DimensionKind) -> String {
        self.dimension_key(dimension)
            .unwrap_or(UNASSIGNED_DIMENSION_KEY)
            .to_string()
    }
}

// ==========================================
// ComponentFilter - 构件查询过滤
// ==========================================
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentFilter {
    pub component_types: Option<Vec<ComponentType>>,
    pub include_retired: bool,
    pub dimension: Option<(DimensionKind, String)>,
    pub component_ids: Option<Vec<String>>,
}

impl ComponentFilter {
    /// 仅活动构件 (默认)
    pub fn active() -> Self {
        Self::default()
    }

    pub fn with_ids(ids: Vec<String>) -> Self {
        Self {
            component_ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn matches(&self, component: &Component) -> bool {
        if !self.include_retired && component.is_retired {
            return false;
        }
        if let Some(types) = &self.component_types {
            if !types.contains(&component.component_type) {
                return false;
            }
        }
        if let Some((dimension, key)) = &self.dimension {
            if component.dimension_key_or_unassigned(*dimension) != *key {
                return false;
            }
        }
        if let Some(ids) = &self.component_ids {
            if !ids.iter().any(|id| id == &component.component_id) {
                return false;
            }
        }
        true
    }
}

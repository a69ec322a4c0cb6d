// ==========================================
// 管道施工进度引擎 - 里程碑领域模型
// ==========================================
// 职责: 里程碑定义 (按构件类型、带版本) 与里程碑事件
// 红线: 事件只追加, 不修改; 按时间戳全序
// ==========================================

use crate::domain::types::{ComponentType, DimensionKind, MilestoneKind, StandardCategory};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// MilestoneSpec - 单个里程碑定义
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneSpec {
    pub name: String,                 // 规范名称
    pub weight: f64,                  // 权重 (同类型合计 100)
    pub kind: MilestoneKind,          // 离散 / 部分
    pub category: StandardCategory,   // 标准类别
    #[serde(default)]
    pub aliases: Vec<String>,         // 历史别名, 例如 "Weld Made" → "Weld Complete"
}

impl MilestoneSpec {
    pub fn new(name: &str, weight: f64, kind: MilestoneKind, category: StandardCategory) -> Self {
        Self {
            name: name.to_string(),
            weight,
            kind,
            category,
            aliases: Vec::new(),
        }
    }

    pub fn with_aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }
}

// ==========================================
// MilestoneDefinition - 构件类型的里程碑集合 (带版本)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneDefinition {
    pub component_type: ComponentType,
    pub version: i32,
    pub milestones: Vec<MilestoneSpec>, // 有序
}

impl MilestoneDefinition {
    pub fn new(component_type: ComponentType, version: i32, milestones: Vec<MilestoneSpec>) -> Self {
        Self {
            component_type,
            version,
            milestones,
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.milestones.iter().map(|m| m.weight).sum()
    }
}

// ==========================================
// MilestoneEvent - 里程碑变更事件
// ==========================================
// 回放全部事件必须能还原构件当前里程碑状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneEvent {
    pub event_id: String,
    pub component_id: String,
    pub project_id: String,
    pub sequence: i64,                         // 同一时间戳内的次序
    pub milestone_name: String,
    pub previous_value: Option<JsonValue>,     // None 表示此前不存在
    pub new_value: Option<JsonValue>,          // None 表示移除
    pub delta_mh: f64,                         // 写入时推导的工时增量 (负值为回退)
    pub category: Option<StandardCategory>,    // 事件发生时的标准类别, 未分类为 None
    pub actor: String,
    pub event_ts: NaiveDateTime,
}

impl MilestoneEvent {
    /// 排序键: (时间戳, 序号)
    pub fn order_key(&self) -> (NaiveDateTime, i64) {
        (self.event_ts, self.sequence)
    }
}

// ==========================================
// EventScope - 事件查询范围
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventScope {
    Component(String),
    Dimension {
        project_id: String,
        dimension: DimensionKind,
        key: String,
    },
    Project(String),
}

impl EventScope {
    pub fn describe(&self) -> String {
        match self {
            EventScope::Component(id) => format!("component:{}", id),
            EventScope::Dimension {
                project_id,
                dimension,
                key,
            } => format!("{}:{}:{}", project_id, dimension, key),
            EventScope::Project(id) => format!("project:{}", id),
        }
    }
}

// ==========================================
// 管道施工进度引擎 - 计算告警
// ==========================================
// 红线: 非致命问题只告警, 不中断整体计算
// 计算请求总是返回 "数值 + 告警列表"
// ==========================================

use crate::domain::types::ComponentType;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// 告警类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WarningKind {
    /// 里程碑名称不在目录中 (分类缺口)
    ClassificationGap {
        component_type: ComponentType,
        milestone: String,
    },
    /// 离散里程碑收到部分完成值
    AmbiguousDiscreteValue { milestone: String, raw: JsonValue },
    /// 无法解析的原始值 (null / 非数字字符串等)
    UnparseableValue { milestone: String, raw: JsonValue },
    /// 数值超出有效范围, 已截断
    OutOfRangeValue { milestone: String, raw: JsonValue },
    /// 加权和超出 [0,100], 已截断
    PercentClamped { raw_percent: f64 },
    /// 预算工时缺失
    MissingBudget,
    /// 维度键缺失
    MissingDimension { dimension: String },
    /// 构件类型无目录定义
    UncatalogedComponentType { component_type: ComponentType },
    /// 事件链断裂: 事件的前值与回放状态不一致
    EventChainBreak {
        milestone: String,
        expected: Option<JsonValue>,
        recorded: Option<JsonValue>,
    },
}

/// 引擎告警
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineWarning {
    pub component_id: Option<String>,
    #[serde(flatten)]
    pub kind: WarningKind,
}

impl EngineWarning {
    pub fn new(kind: WarningKind) -> Self {
        Self {
            component_id: None,
            kind,
        }
    }

    pub fn for_component(component_id: &str, kind: WarningKind) -> Self {
        Self {
            component_id: Some(component_id.to_string()),
            kind,
        }
    }

    /// 补充构件 ID (计算器本身不知道构件 ID)
    pub fn attach_component(mut self, component_id: &str) -> Self {
        if self.component_id.is_none() {
            self.component_id = Some(component_id.to_string());
        }
        self
    }
}

impl fmt::Display for EngineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = self.component_id.as_deref().unwrap_or("-");
        match &self.kind {
            WarningKind::ClassificationGap {
                component_type,
                milestone,
            } => write!(f, "[{}] 未分类里程碑: {}/{}", who, component_type, milestone),
            WarningKind::AmbiguousDiscreteValue { milestone, raw } => {
                write!(f, "[{}] 离散里程碑 {} 收到部分值 {}", who, milestone, raw)
            }
            WarningKind::UnparseableValue { milestone, raw } => {
                write!(f, "[{}] 里程碑 {} 的值无法解析: {}", who, milestone, raw)
            }
            WarningKind::OutOfRangeValue { milestone, raw } => {
                write!(f, "[{}] 里程碑 {} 的值超出范围: {}", who, milestone, raw)
            }
            WarningKind::PercentClamped { raw_percent } => {
                write!(f, "[{}] 加权和 {:.4} 超出 [0,100], 已截断", who, raw_percent)
            }
            WarningKind::MissingBudget => write!(f, "[{}] 预算工时缺失", who),
            WarningKind::MissingDimension { dimension } => {
                write!(f, "[{}] 维度 {} 未分配", who, dimension)
            }
            WarningKind::UncatalogedComponentType { component_type } => {
                write!(f, "[{}] 构件类型 {} 无里程碑目录", who, component_type)
            }
            WarningKind::EventChainBreak { milestone, .. } => {
                write!(f, "[{}] 里程碑 {} 事件链断裂", who, milestone)
            }
        }
    }
}

// ==========================================
// Calculated - 带告警的计算结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Calculated<T> {
    pub value: T,
    pub warnings: Vec<EngineWarning>,
}

impl<T> Calculated<T> {
    pub fn new(value: T, warnings: Vec<EngineWarning>) -> Self {
        Self { value, warnings }
    }

    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Calculated<U> {
        Calculated {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}

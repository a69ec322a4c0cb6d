// ==========================================
// 管道施工进度引擎 - 领域类型定义
// ==========================================
// 职责: 构件类型、标准类别、里程碑类型、汇总维度等枚举
// 序列化格式: 构件类型 snake_case, 其余 SCREAMING_SNAKE_CASE
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 构件类型 (Component Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Spool,        // 预制管段
    FieldWeld,    // 现场焊口
    ThreadedPipe, // 螺纹管
    Valve,        // 阀门
    Support,      // 支吊架
    Instrument,   // 仪表
}

impl ComponentType {
    pub const ALL: [ComponentType; 6] = [
        ComponentType::Spool,
        ComponentType::FieldWeld,
        ComponentType::ThreadedPipe,
        ComponentType::Valve,
        ComponentType::Support,
        ComponentType::Instrument,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentType::Spool => "spool",
            ComponentType::FieldWeld => "field_weld",
            ComponentType::ThreadedPipe => "threaded_pipe",
            ComponentType::Valve => "valve",
            ComponentType::Support => "support",
            ComponentType::Instrument => "instrument",
        }
    }

    /// 从字符串解析构件类型（容忍大小写与连字符）
    pub fn from_str(s: &str) -> Option<Self> {
        let key = s.trim().to_lowercase().replace(['-', ' '], "_");
        match key.as_str() {
            "spool" => Some(ComponentType::Spool),
            "field_weld" => Some(ComponentType::FieldWeld),
            "threaded_pipe" => Some(ComponentType::ThreadedPipe),
            "valve" => Some(ComponentType::Valve),
            "support" => Some(ComponentType::Support),
            "instrument" => Some(ComponentType::Instrument),
            _ => None,
        }
    }
}

impl fmt::Display for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 标准类别 (Standard Category)
// ==========================================
// 跨构件类型的里程碑分组, 用于类别汇总
// 顺序: 与施工流程一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StandardCategory {
    Receive, // 到货
    Install, // 安装
    Punch,   // 尾项
    Test,    // 试压
    Restore, // 复位
}

impl StandardCategory {
    pub const ALL: [StandardCategory; 5] = [
        StandardCategory::Receive,
        StandardCategory::Install,
        StandardCategory::Punch,
        StandardCategory::Test,
        StandardCategory::Restore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StandardCategory::Receive => "RECEIVE",
            StandardCategory::Install => "INSTALL",
            StandardCategory::Punch => "PUNCH",
            StandardCategory::Test => "TEST",
            StandardCategory::Restore => "RESTORE",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "RECEIVE" => Some(StandardCategory::Receive),
            "INSTALL" => Some(StandardCategory::Install),
            "PUNCH" => Some(StandardCategory::Punch),
            "TEST" => Some(StandardCategory::Test),
            "RESTORE" => Some(StandardCategory::Restore),
            _ => None,
        }
    }
}

impl fmt::Display for StandardCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 里程碑完成方式 (Milestone Kind)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MilestoneKind {
    Discrete, // 离散: 0% 或 100%
    Partial,  // 部分: 按完成比例贡献
}

impl MilestoneKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneKind::Discrete => "DISCRETE",
            MilestoneKind::Partial => "PARTIAL",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "DISCRETE" => Some(MilestoneKind::Discrete),
            "PARTIAL" => Some(MilestoneKind::Partial),
            _ => None,
        }
    }
}

impl fmt::Display for MilestoneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 汇总维度 (Aggregation Dimension)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DimensionKind {
    Area,        // 区域
    System,      // 系统
    TestPackage, // 试压包
    Welder,      // 焊工
    Project,     // 项目 (不分组)
}

impl DimensionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DimensionKind::Area => "AREA",
            DimensionKind::System => "SYSTEM",
            DimensionKind::TestPackage => "TEST_PACKAGE",
            DimensionKind::Welder => "WELDER",
            DimensionKind::Project => "PROJECT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace('-', "_").as_str() {
            "AREA" => Some(DimensionKind::Area),
            "SYSTEM" => Some(DimensionKind::System),
            "TEST_PACKAGE" => Some(DimensionKind::TestPackage),
            "WELDER" => Some(DimensionKind::Welder),
            "PROJECT" | "NONE" => Some(DimensionKind::Project),
            _ => None,
        }
    }
}

impl fmt::Display for DimensionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 增量口径 (Delta Mode)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeltaMode {
    ForwardOnly, // 只计正向进度, 回退记 0
    Net,         // 净变化, 回退记负值
}

impl DeltaMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaMode::ForwardOnly => "FORWARD_ONLY",
            DeltaMode::Net => "NET",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "FORWARD_ONLY" | "FORWARD" => Some(DeltaMode::ForwardOnly),
            "NET" | "SIGNED" => Some(DeltaMode::Net),
            _ => None,
        }
    }
}

impl fmt::Display for DeltaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 回退对外报告口径 (Reporting Policy)
// ==========================================
// ACTUAL: 如实报告回退
// FLOOR_AT_HISTORICAL_MAX: 对外报告不低于历史最高值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportingPolicy {
    Actual,
    FloorAtHistoricalMax,
}

impl ReportingPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportingPolicy::Actual => "ACTUAL",
            ReportingPolicy::FloorAtHistoricalMax => "FLOOR_AT_HISTORICAL_MAX",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "ACTUAL" => Some(ReportingPolicy::Actual),
            "FLOOR_AT_HISTORICAL_MAX" | "FLOOR_AT_MAX" => {
                Some(ReportingPolicy::FloorAtHistoricalMax)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ReportingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_type_from_str_tolerant() {
        assert_eq!(ComponentType::from_str("field_weld"), Some(ComponentType::FieldWeld));
        assert_eq!(ComponentType::from_str("Field-Weld"), Some(ComponentType::FieldWeld));
        assert_eq!(ComponentType::from_str("threaded pipe"), Some(ComponentType::ThreadedPipe));
        assert_eq!(ComponentType::from_str("gasket"), None);
    }

    #[test]
    fn test_enum_display_matches_serde() {
        assert_eq!(
            serde_json::to_string(&StandardCategory::Restore).unwrap(),
            format!("\"{}\"", StandardCategory::Restore)
        );
        assert_eq!(
            serde_json::to_string(&DimensionKind::TestPackage).unwrap(),
            format!("\"{}\"", DimensionKind::TestPackage)
        );
        assert_eq!(
            serde_json::to_string(&ComponentType::ThreadedPipe).unwrap(),
            "\"threaded_pipe\""
        );
    }

    #[test]
    fn test_policy_aliases() {
        assert_eq!(
            ReportingPolicy::from_str("floor_at_max"),
            Some(ReportingPolicy::FloorAtHistoricalMax)
        );
        assert_eq!(DeltaMode::from_str("signed"), Some(DeltaMode::Net));
        assert_eq!(DimensionKind::from_str("none"), Some(DimensionKind::Project));
    }
}

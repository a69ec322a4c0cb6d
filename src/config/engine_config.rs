// ==========================================
// 管道施工进度引擎 - 引擎配置
// ==========================================
// 职责: 容差、默认口径、审计分段维度、并发度、目录版本
// 来源: 默认值 / config_kv 表 (见 ConfigManager)
// ==========================================

use crate::domain::types::{DeltaMode, DimensionKind, ReportingPolicy};
use crate::engine::auditor::AuditSettings;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 审计百分比容差 (百分点)
    pub audit_tolerance_pp: f64,
    /// 类别分解交叉校验容差 (相对 max(1, 挣值))
    pub decomposition_tolerance: f64,
    /// 目录权重合计容差
    pub weight_sum_tolerance: f64,
    pub default_delta_mode: DeltaMode,
    /// 回退对外报告口径
    pub reporting_policy: ReportingPolicy,
    /// 审计断点粒度
    pub audit_dimension: DimensionKind,
    /// 分片并发度
    pub parallelism: usize,
    /// 目录版本, None 表示最新
    pub catalog_version: Option<i32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audit_tolerance_pp: 0.1,
            decomposition_tolerance: 1e-6,
            weight_sum_tolerance: 1e-6,
            default_delta_mode: DeltaMode::Net,
            reporting_policy: ReportingPolicy::Actual,
            audit_dimension: DimensionKind::Area,
            parallelism: 4,
            catalog_version: None,
        }
    }
}

impl EngineConfig {
    pub fn to_audit_settings(&self) -> AuditSettings {
        AuditSettings {
            tolerance_pp: self.audit_tolerance_pp,
            decomposition_tolerance: self.decomposition_tolerance,
            dimension: self.audit_dimension,
        }
    }

    /// 并发度下限为 1
    pub fn effective_parallelism(&self) -> usize {
        self.parallelism.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.audit_tolerance_pp, 0.1);
        assert_eq!(config.default_delta_mode, DeltaMode::Net);
        assert_eq!(config.reporting_policy, ReportingPolicy::Actual);
        assert_eq!(config.audit_dimension, DimensionKind::Area);
        assert_eq!(config.catalog_version, None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"reporting_policy":"FLOOR_AT_HISTORICAL_MAX","parallelism":0}"#)
                .unwrap();
        assert_eq!(config.reporting_policy, ReportingPolicy::FloorAtHistoricalMax);
        assert_eq!(config.effective_parallelism(), 1);
        assert_eq!(config.weight_sum_tolerance, 1e-6);

        let settings = config.to_audit_settings();
        assert_eq!(settings.tolerance_pp, 0.1);
        assert_eq!(settings.dimension, DimensionKind::Area);
    }
}

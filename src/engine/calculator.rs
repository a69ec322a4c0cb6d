// ==========================================
// 管道施工进度引擎 - 完成百分比计算器
// ==========================================
// 职责: 里程碑状态 + 目录权重 → 单一完成百分比
// 红线: 纯函数, 相同输入必得相同输出 (缓存值与视图的校验基准)
// 红线: 目录外里程碑不计入, 并单独报告为未分类
// ==========================================

use crate::domain::component::{Component, MilestoneState};
use crate::domain::dimension::CategoryAmounts;
use crate::domain::types::{ComponentType, MilestoneKind, StandardCategory};
use crate::domain::warning::{Calculated, EngineWarning, WarningKind};
use crate::engine::catalog::{log_zero_weight, normalize_milestone_name, MilestoneCatalog};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::normalizer::MilestoneValueNormalizer;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

// ==========================================
// 计算明细
// ==========================================

/// 单个里程碑的贡献 (百分点)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneContribution {
    pub name: String,
    pub category: StandardCategory,
    pub kind: MilestoneKind,
    pub weight: f64,
    pub fraction: f64,
    pub contribution: f64,
}

/// 完成百分比计算明细
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PercentBreakdown {
    pub component_type: ComponentType,
    /// 截断到 [0,100] 后的百分比
    pub percent: f64,
    /// 截断前的加权和
    pub raw_percent: f64,
    pub contributions: Vec<MilestoneContribution>,
    /// 各标准类别贡献 (百分点), 合计等于 percent
    pub by_category: CategoryAmounts,
    /// 目录外的里程碑原始名称
    pub unclassified: Vec<String>,
    pub warnings: Vec<EngineWarning>,
}

// ==========================================
// PercentCompleteCalculator
// ==========================================
pub struct PercentCompleteCalculator;

impl PercentCompleteCalculator {
    /// 计算完成百分比
    ///
    /// # 返回
    /// - `Ok(Calculated<f64>)`: 百分比 + 告警
    /// - `Err(MissingDefinition)`: 构件类型无目录定义
    pub fn calculate(
        catalog: &MilestoneCatalog,
        component_type: ComponentType,
        milestones: &MilestoneState,
    ) -> EngineResult<Calculated<f64>> {
        let breakdown = Self::breakdown(catalog, component_type, milestones)?;
        Ok(Calculated::new(breakdown.percent, breakdown.warnings))
    }

    /// 计算单个构件, 告警带构件 ID
    pub fn calculate_component(
        catalog: &MilestoneCatalog,
        component: &Component,
    ) -> EngineResult<Calculated<f64>> {
        let result = Self::calculate(catalog, component.component_type, &component.current_milestones)?;
        let id = component.component_id.as_str();
        Ok(Calculated::new(
            result.value,
            result
                .warnings
                .into_iter()
                .map(|w| w.attach_component(id))
                .collect(),
        ))
    }

    /// 计算明细 (逐里程碑 + 逐类别)
    pub fn breakdown(
        catalog: &MilestoneCatalog,
        component_type: ComponentType,
        milestones: &MilestoneState,
    ) -> EngineResult<PercentBreakdown> {
        let definition = catalog
            .definition(component_type)
            .ok_or(EngineError::MissingDefinition(component_type))?;

        let mut warnings = Vec::new();
        let mut unclassified = Vec::new();

        // 1. 原始键 → 目录里程碑 (经别名解析)
        let mut matched: HashMap<String, (&str, &JsonValue)> = HashMap::new();
        for (raw_name, raw_value) in milestones {
            match catalog.canonical_name(component_type, raw_name) {
                Some(canonical) => {
                    let key = normalize_milestone_name(canonical);
                    let exact = raw_name == canonical;
                    // 同一里程碑出现多种写法时, 优先规范名称
                    let replace = match matched.get(&key) {
                        None => true,
                        Some((existing, _)) => exact && *existing != canonical,
                    };
                    if replace {
                        matched.insert(key, (raw_name.as_str(), raw_value));
                    }
                }
                None => {
                    unclassified.push(raw_name.clone());
                    warnings.push(EngineWarning::new(WarningKind::ClassificationGap {
                        component_type,
                        milestone: raw_name.clone(),
                    }));
                }
            }
        }

        // 2. 加权求和
        let mut contributions = Vec::with_capacity(definition.milestones.len());
        let mut by_category = CategoryAmounts::default();
        let mut raw_percent = 0.0;

        for spec in &definition.milestones {
            let raw = matched
                .get(&normalize_milestone_name(&spec.name))
                .map(|(_, v)| *v);
            let normalized = MilestoneValueNormalizer::normalize(raw, spec.kind, &spec.name);
            if let Some(kind) = normalized.warning {
                warnings.push(EngineWarning::new(kind));
            }
            if spec.weight == 0.0 && raw.is_some() {
                log_zero_weight(component_type, spec);
            }

            let contribution = spec.weight * normalized.fraction;
            raw_percent += contribution;
            by_category.add(spec.category, contribution);
            contributions.push(MilestoneContribution {
                name: spec.name.clone(),
                category: spec.category,
                kind: spec.kind,
                weight: spec.weight,
                fraction: normalized.fraction,
                contribution,
            });
        }

        // 3. 截断到 [0,100], 类别按比例缩放以保持分解关系
        let mut percent = raw_percent;
        if raw_percent > 100.0 {
            percent = 100.0;
            by_category = by_category.scaled(100.0 / raw_percent);
            warnings.push(EngineWarning::new(WarningKind::PercentClamped { raw_percent }));
        } else if raw_percent < 0.0 {
            percent = 0.0;
            by_category = CategoryAmounts::default();
            warnings.push(EngineWarning::new(WarningKind::PercentClamped { raw_percent }));
        }

        Ok(PercentBreakdown {
            component_type,
            percent,
            raw_percent,
            contributions,
            by_category,
            unclassified,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::milestone::{MilestoneDefinition, MilestoneSpec};
    use serde_json::json;

    fn state(pairs: &[(&str, JsonValue)]) -> MilestoneState {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn scenario_catalog() -> MilestoneCatalog {
        let mut defs = MilestoneCatalog::builtin_definitions();
        defs.retain(|d| d.component_type != ComponentType::FieldWeld);
        defs.push(MilestoneDefinition::new(
            ComponentType::FieldWeld,
            1,
            vec![
                MilestoneSpec::new("Fit-up", 40.0, MilestoneKind::Discrete, StandardCategory::Install),
                MilestoneSpec::new("Weld Complete", 60.0, MilestoneKind::Discrete, StandardCategory::Install)
                    .with_aliases(&["Weld Made"]),
            ],
        ));
        MilestoneCatalog::load("scenario", defs).unwrap()
    }

    #[test]
    fn test_field_weld_scenario() {
        let catalog = scenario_catalog();
        let milestones = state(&[("Fit-up", json!(true)), ("Weld Complete", json!(false))]);
        let result =
            PercentCompleteCalculator::calculate(&catalog, ComponentType::FieldWeld, &milestones).unwrap();
        assert_eq!(result.value, 40.0);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_threaded_pipe_scenario() {
        let catalog = scenario_catalog();
        let milestones = state(&[
            ("Fabricate", json!(100)),
            ("Install", json!(50)),
            ("Erect", json!(0)),
            ("Connect", json!(0)),
            ("Support", json!(0)),
            ("Punch", json!(false)),
            ("Test", json!(false)),
            ("Restore", json!(false)),
        ]);
        let result =
            PercentCompleteCalculator::calculate(&catalog, ComponentType::ThreadedPipe, &milestones).unwrap();
        assert!((result.value - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weight_milestone_complete_does_not_contribute() {
        let catalog = scenario_catalog();
        let milestones = state(&[("Punch", json!(true)), ("Test", json!(1)), ("Restore", json!(100))]);
        let breakdown =
            PercentCompleteCalculator::breakdown(&catalog, ComponentType::ThreadedPipe, &milestones).unwrap();
        assert_eq!(breakdown.percent, 0.0);
        assert!(breakdown.unclassified.is_empty());
        assert!(breakdown.warnings.is_empty());
    }

    #[test]
    fn test_unclassified_excluded_and_reported() {
        let catalog = scenario_catalog();
        let milestones = state(&[("Fit-up", json!(1)), ("Paint", json!(true))]);
        let breakdown =
            PercentCompleteCalculator::breakdown(&catalog, ComponentType::FieldWeld, &milestones).unwrap();
        assert_eq!(breakdown.percent, 40.0);
        assert_eq!(breakdown.unclassified, vec!["Paint".to_string()]);
        assert!(breakdown
            .warnings
            .iter()
            .any(|w| matches!(&w.kind, WarningKind::ClassificationGap { milestone, .. } if milestone == "Paint")));
    }

    #[test]
    fn test_aliases_and_casing_resolve() {
        let catalog = scenario_catalog();
        let milestones = state(&[("Fit-Up", json!(100)), ("Weld Made", json!(1))]);
        let result =
            PercentCompleteCalculator::calculate(&catalog, ComponentType::FieldWeld, &milestones).unwrap();
        assert_eq!(result.value, 100.0);
    }

    #[test]
    fn test_canonical_spelling_wins_over_variant() {
        let catalog = scenario_catalog();
        let milestones = state(&[("Fit-Up", json!(false)), ("Fit-up", json!(true))]);
        let result =
            PercentCompleteCalculator::calculate(&catalog, ComponentType::FieldWeld, &milestones).unwrap();
        assert_eq!(result.value, 40.0);
    }

    #[test]
    fn test_category_decomposition_law() {
        let catalog = MilestoneCatalog::builtin().unwrap();
        let milestones = state(&[
            ("Receive", json!(true)),
            ("Erect", json!(1)),
            ("Connect", json!("100")),
            ("Punch", json!(0)),
        ]);
        let breakdown =
            PercentCompleteCalculator::breakdown(&catalog, ComponentType::Spool, &milestones).unwrap();
        assert!((breakdown.by_category.total() - breakdown.percent).abs() < 1e-6);
        assert_eq!(breakdown.percent, 85.0);
        assert_eq!(breakdown.by_category.receive, 5.0);
        assert_eq!(breakdown.by_category.install, 80.0);
    }

    #[test]
    fn test_pure_and_bounded() {
        let catalog = MilestoneCatalog::builtin().unwrap();
        let milestones = state(&[
            ("Fabricate", json!(250)),
            ("Install", json!(-3)),
            ("Erect", json!("garbage")),
            ("Connect", json!(null)),
            ("Support", json!(0.9)),
        ]);
        let a = PercentCompleteCalculator::calculate(&catalog, ComponentType::ThreadedPipe, &milestones).unwrap();
        let b = PercentCompleteCalculator::calculate(&catalog, ComponentType::ThreadedPipe, &milestones).unwrap();
        assert_eq!(a.value, b.value);
        assert!(a.value >= 0.0 && a.value <= 100.0);
        assert!((a.value - 38.0).abs() < 1e-9);
        assert_eq!(a.warnings.len(), 4);
    }

    #[test]
    fn test_missing_definition_is_error() {
        let catalog = MilestoneCatalog::load(
            "spool-only",
            MilestoneCatalog::builtin_definitions()
                .into_iter()
                .filter(|d| d.component_type == ComponentType::Spool)
                .collect(),
        )
        .unwrap();
        let result = PercentCompleteCalculator::calculate(&catalog, ComponentType::Valve, &MilestoneState::new());
        assert!(matches!(result, Err(EngineError::MissingDefinition(ComponentType::Valve))));
    }
}

// ==========================================
// 管道施工进度引擎 - 里程碑目录
// ==========================================
// 职责: (构件类型, 里程碑名称) → 标准类别 / 权重
// 红线: 名称查找容忍大小写与标点差异, 别名显式维护
// 红线: 权重合计不为 100 在加载时失败, 不在计算时失败
// ==========================================
// 注: 查找未命中不是错误, 而是"分类缺口", 必须可观测
// ==========================================

use crate::domain::audit::ClassificationGap;
use crate::domain::milestone::{MilestoneDefinition, MilestoneSpec};
use crate::domain::types::{ComponentType, MilestoneKind, StandardCategory};
use crate::engine::error::CatalogError;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// 权重合计默认容差
pub const DEFAULT_WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// 里程碑名称规范化
///
/// 规则: 转小写; `-` `_` `/` `.` 视为空格; 合并连续空白
/// 例如 "Fit-up" / "Fit-Up" / "fit  up" → "fit up"
pub fn normalize_milestone_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| match c {
            '-' | '_' | '/' | '.' => ' ',
            other => other,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ==========================================
// 单个构件类型的目录条目
// ==========================================
#[derive(Debug, Clone)]
struct TypeEntry {
    definition: MilestoneDefinition,
    // 规范化名称或别名 → milestones 下标
    lookup: HashMap<String, usize>,
}

// ==========================================
// MilestoneCatalog - 里程碑目录 (带版本的显式配置对象)
// ==========================================
#[derive(Debug, Clone)]
pub struct MilestoneCatalog {
    version_label: String,
    entries: BTreeMap<ComponentType, TypeEntry>,
}

impl MilestoneCatalog {
    /// 加载并校验目录
    ///
    /// # 参数
    /// - `version_label`: 目录版本标签 (用于审计 / 历史重算)
    /// - `definitions`: 各构件类型的里程碑定义, 每个类型只能有一个
    ///
    /// # 返回
    /// - `Err(CatalogError)`: 任一定义无效, 整个目录拒绝加载
    pub fn load(
        version_label: &str,
        definitions: Vec<MilestoneDefinition>,
    ) -> Result<Self, CatalogError> {
        Self::load_with_tolerance(version_label, definitions, DEFAULT_WEIGHT_SUM_TOLERANCE)
    }

    pub fn load_with_tolerance(
        version_label: &str,
        definitions: Vec<MilestoneDefinition>,
        weight_sum_tolerance: f64,
    ) -> Result<Self, CatalogError> {
        let mut entries = BTreeMap::new();

        for definition in definitions {
            if entries.contains_key(&definition.component_type) {
                return Err(CatalogError::DuplicateDefinition {
                    component_type: definition.component_type,
                    version: definition.version,
                });
            }
            let entry = Self::validate_definition(definition, weight_sum_tolerance)?;
            entries.insert(entry.definition.component_type, entry);
        }

        info!(
            catalog_version = version_label,
            component_types = entries.len(),
            "里程碑目录加载完成"
        );

        Ok(Self {
            version_label: version_label.to_string(),
            entries,
        })
    }

    /// 校验单个定义并建立查找表
    fn validate_definition(
        definition: MilestoneDefinition,
        weight_sum_tolerance: f64,
    ) -> Result<TypeEntry, CatalogError> {
        let component_type = definition.component_type;

        if definition.milestones.is_empty() {
            return Err(CatalogError::EmptyDefinition {
                component_type,
                version: definition.version,
            });
        }

        let mut lookup: HashMap<String, usize> = HashMap::new();

        // 1. 规范名称: 权重有效 + 不重复
        for (idx, spec) in definition.milestones.iter().enumerate() {
            if !spec.weight.is_finite() || spec.weight < 0.0 {
                return Err(CatalogError::InvalidWeight {
                    component_type,
                    name: spec.name.clone(),
                    weight: spec.weight,
                });
            }
            let key = normalize_milestone_name(&spec.name);
            if key.is_empty() || lookup.insert(key, idx).is_some() {
                return Err(CatalogError::DuplicateMilestone {
                    component_type,
                    name: spec.name.clone(),
                });
            }
        }

        // 2. 别名: 不能指向其他里程碑
        for (idx, spec) in definition.milestones.iter().enumerate() {
            for alias in &spec.aliases {
                let key = normalize_milestone_name(alias);
                match lookup.get(&key) {
                    Some(existing) if *existing == idx => {} // 与自身规范名同形
                    Some(_) => {
                        return Err(CatalogError::AliasConflict {
                            component_type,
                            alias: alias.clone(),
                        })
                    }
                    None => {
                        lookup.insert(key, idx);
                    }
                }
            }
        }

        // 3. 权重合计
        let sum = definition.total_weight();
        if (sum - 100.0).abs() > weight_sum_tolerance {
            warn!(
                component_type = %component_type,
                version = definition.version,
                sum = sum,
                "里程碑权重合计不等于 100"
            );
            return Err(CatalogError::WeightSumMismatch {
                component_type,
                version: definition.version,
                sum,
            });
        }

        Ok(TypeEntry { definition, lookup })
    }

    // ==========================================
    // 查询
    // ==========================================

    pub fn version_label(&self) -> &str {
        &self.version_label
    }

    pub fn component_types(&self) -> impl Iterator<Item = ComponentType> + '_ {
        self.entries.keys().copied()
    }

    pub fn definition(&self, component_type: ComponentType) -> Option<&MilestoneDefinition> {
        self.entries.get(&component_type).map(|e| &e.definition)
    }

    /// 按名称 (含别名) 解析里程碑定义
    pub fn resolve(&self, component_type: ComponentType, milestone_name: &str) -> Option<&MilestoneSpec> {
        let entry = self.entries.get(&component_type)?;
        let idx = entry.lookup.get(&normalize_milestone_name(milestone_name))?;
        entry.definition.milestones.get(*idx)
    }

    pub fn resolve_category(
        &self,
        component_type: ComponentType,
        milestone_name: &str,
    ) -> Option<StandardCategory> {
        self.resolve(component_type, milestone_name).map(|s| s.category)
    }

    pub fn resolve_weight(&self, component_type: ComponentType, milestone_name: &str) -> Option<f64> {
        self.resolve(component_type, milestone_name).map(|s| s.weight)
    }

    /// 别名 → 规范名称
    pub fn canonical_name(&self, component_type: ComponentType, milestone_name: &str) -> Option<&str> {
        self.resolve(component_type, milestone_name)
            .map(|s| s.name.as_str())
    }

    // ==========================================
    // 内置目录
    // ==========================================

    /// 内置默认目录 (version 1)
    pub fn builtin_definitions() -> Vec<MilestoneDefinition> {
        use MilestoneKind::{Discrete, Partial};
        use StandardCategory::{Install, Punch, Receive, Restore, Test};

        vec![
            MilestoneDefinition::new(
                ComponentType::Spool,
                1,
                vec![
                    MilestoneSpec::new("Receive", 5.0, Discrete, Receive),
                    MilestoneSpec::new("Erect", 40.0, Discrete, Install),
                    MilestoneSpec::new("Connect", 40.0, Discrete, Install),
                    MilestoneSpec::new("Punch", 5.0, Discrete, Punch),
                    MilestoneSpec::new("Test", 5.0, Discrete, Test),
                    MilestoneSpec::new("Restore", 5.0, Discrete, Restore),
                ],
            ),
            MilestoneDefinition::new(
                ComponentType::FieldWeld,
                1,
                vec![
                    MilestoneSpec::new("Fit-up", 10.0, Discrete, Install).with_aliases(&["Fitup"]),
                    MilestoneSpec::new("Weld Complete", 60.0, Discrete, Install)
                        .with_aliases(&["Weld Made", "Welded"]),
                    MilestoneSpec::new("Punch", 10.0, Discrete, Punch),
                    MilestoneSpec::new("Test", 15.0, Discrete, Test),
                    MilestoneSpec::new("Restore", 5.0, Discrete, Restore),
                ],
            ),
            MilestoneDefinition::new(
                ComponentType::ThreadedPipe,
                1,
                vec![
                    MilestoneSpec::new("Fabricate", 20.0, Partial, Install),
                    MilestoneSpec::new("Install", 20.0, Partial, Install),
                    MilestoneSpec::new("Erect", 20.0, Partial, Install),
                    MilestoneSpec::new("Connect", 20.0, Partial, Install),
                    MilestoneSpec::new("Support", 20.0, Partial, Install),
                    MilestoneSpec::new("Punch", 0.0, Discrete, Punch),
                    MilestoneSpec::new("Test", 0.0, Discrete, Test),
                    MilestoneSpec::new("Restore", 0.0, Discrete, Restore),
                ],
            ),
            MilestoneDefinition::new(
                ComponentType::Valve,
                1,
                vec![
                    MilestoneSpec::new("Receive", 10.0, Discrete, Receive),
                    MilestoneSpec::new("Install", 60.0, Discrete, Install),
                    MilestoneSpec::new("Punch", 10.0, Discrete, Punch),
                    MilestoneSpec::new("Test", 10.0, Discrete, Test),
                    MilestoneSpec::new("Restore", 10.0, Discrete, Restore),
                ],
            ),
            MilestoneDefinition::new(
                ComponentType::Support,
                1,
                vec![
                    MilestoneSpec::new("Receive", 10.0, Discrete, Receive),
                    MilestoneSpec::new("Install", 60.0, Discrete, Install),
                    MilestoneSpec::new("Punch", 10.0, Discrete, Punch),
                    MilestoneSpec::new("Test", 15.0, Discrete, Test),
                    MilestoneSpec::new("Restore", 5.0, Discrete, Restore),
                ],
            ),
            MilestoneDefinition::new(
                ComponentType::Instrument,
                1,
                vec![
                    MilestoneSpec::new("Receive", 10.0, Discrete, Receive),
                    MilestoneSpec::new("Install", 60.0, Discrete, Install),
                    MilestoneSpec::new("Punch", 10.0, Discrete, Punch),
                    MilestoneSpec::new("Test", 15.0, Discrete, Test),
                    MilestoneSpec::new("Restore", 5.0, Discrete, Restore),
                ],
            ),
        ]
    }

    /// 内置默认目录
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::load("builtin-v1", Self::builtin_definitions())
    }
}

// ==========================================
// ClassificationGapTracker - 分类缺口收集器
// ==========================================
// 每个 (构件类型, 规范化名称) 只记录一次, 首次发现时告警
#[derive(Debug, Clone, Default)]
pub struct ClassificationGapTracker {
    gaps: BTreeMap<(ComponentType, String), GapAccumulator>,
}

#[derive(Debug, Clone, Default)]
struct GapAccumulator {
    raw_names: BTreeSet<String>,
    components: BTreeSet<String>,
    event_count: usize,
}

impl ClassificationGapTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&mut self, component_type: ComponentType, raw_name: &str) -> &mut GapAccumulator {
        let key = (component_type, normalize_milestone_name(raw_name));
        if !self.gaps.contains_key(&key) {
            warn!(
                component_type = %component_type,
                milestone = raw_name,
                "发现未分类里程碑 (目录缺口)"
            );
        }
        let acc = self.gaps.entry(key).or_default();
        acc.raw_names.insert(raw_name.to_string());
        acc
    }

    /// 记录构件当前状态中的未分类里程碑
    pub fn record_state(&mut self, component_type: ComponentType, raw_name: &str, component_id: &str) {
        self.entry(component_type, raw_name)
            .components
            .insert(component_id.to_string());
    }

    /// 记录未分类里程碑的事件
    pub fn record_event(&mut self, component_type: ComponentType, raw_name: &str) {
        self.entry(component_type, raw_name).event_count += 1;
    }

    pub fn merge(&mut self, other: ClassificationGapTracker) {
        for (key, acc) in other.gaps {
            let target = self.gaps.entry(key).or_default();
            target.raw_names.extend(acc.raw_names);
            target.components.extend(acc.components);
            target.event_count += acc.event_count;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.gaps.is_empty()
    }

    pub fn report(&self) -> Vec<ClassificationGap> {
        self.gaps
            .iter()
            .map(|((component_type, name), acc)| ClassificationGap {
                component_type: *component_type,
                normalized_name: name.clone(),
                raw_names: acc.raw_names.clone(),
                component_count: acc.components.len(),
                event_count: acc.event_count,
            })
            .collect()
    }
}

/// 记录权重为 0 的里程碑 (有意不计入), 与分类缺口区分
pub(crate) fn log_zero_weight(component_type: ComponentType, spec: &MilestoneSpec) {
    debug!(
        component_type = %component_type,
        milestone = %spec.name,
        "里程碑权重为 0, 仅跟踪不计入进度"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_weld_catalog() -> MilestoneCatalog {
        MilestoneCatalog::load(
            "test",
            vec![MilestoneDefinition::new(
                ComponentType::FieldWeld,
                1,
                vec![
                    MilestoneSpec::new("Fit-up", 40.0, MilestoneKind::Discrete, StandardCategory::Install),
                    MilestoneSpec::new("Weld Complete", 60.0, MilestoneKind::Discrete, StandardCategory::Install)
                        .with_aliases(&["Weld Made"]),
                ],
            )],
        )
        .unwrap()
    }

    #[test]
    fn test_normalize_milestone_name() {
        assert_eq!(normalize_milestone_name("Fit-up"), "fit up");
        assert_eq!(normalize_milestone_name("Fit-Up"), "fit up");
        assert_eq!(normalize_milestone_name("  fit__UP "), "fit up");
        assert_eq!(normalize_milestone_name("Weld  Complete"), "weld complete");
    }

    #[test]
    fn test_builtin_catalog_is_valid() {
        let catalog = MilestoneCatalog::builtin().unwrap();
        for ct in ComponentType::ALL {
            let def = catalog.definition(ct).unwrap();
            assert!((def.total_weight() - 100.0).abs() < 1e-9, "{} 权重合计", ct);
        }
    }

    #[test]
    fn test_resolve_is_case_and_punctuation_tolerant() {
        let catalog = field_weld_catalog();
        assert_eq!(catalog.resolve_weight(ComponentType::FieldWeld, "Fit-Up"), Some(40.0));
        assert_eq!(catalog.resolve_weight(ComponentType::FieldWeld, "fit up"), Some(40.0));
        assert_eq!(
            catalog.canonical_name(ComponentType::FieldWeld, "Weld Made"),
            Some("Weld Complete")
        );
        assert_eq!(
            catalog.resolve_category(ComponentType::FieldWeld, "WELD-COMPLETE"),
            Some(StandardCategory::Install)
        );
    }

    #[test]
    fn test_resolve_miss_is_not_error() {
        let catalog = field_weld_catalog();
        assert_eq!(catalog.resolve_weight(ComponentType::FieldWeld, "Paint"), None);
        assert_eq!(catalog.resolve_category(ComponentType::Spool, "Fit-up"), None);
    }

    #[test]
    fn test_weight_sum_mismatch_fails_at_load() {
        let result = MilestoneCatalog::load(
            "bad",
            vec![MilestoneDefinition::new(
                ComponentType::Valve,
                2,
                vec![
                    MilestoneSpec::new("Receive", 10.0, MilestoneKind::Discrete, StandardCategory::Receive),
                    MilestoneSpec::new("Install", 80.0, MilestoneKind::Discrete, StandardCategory::Install),
                ],
            )],
        );
        assert!(matches!(
            result,
            Err(CatalogError::WeightSumMismatch { sum, .. }) if (sum - 90.0).abs() < 1e-9
        ));
    }

    #[test]
    fn test_duplicate_after_normalization_fails() {
        let result = MilestoneCatalog::load(
            "bad",
            vec![MilestoneDefinition::new(
                ComponentType::FieldWeld,
                1,
                vec![
                    MilestoneSpec::new("Fit-up", 50.0, MilestoneKind::Discrete, StandardCategory::Install),
                    MilestoneSpec::new("Fit-Up", 50.0, MilestoneKind::Discrete, StandardCategory::Install),
                ],
            )],
        );
        assert!(matches!(result, Err(CatalogError::DuplicateMilestone { .. })));
    }

    #[test]
    fn test_alias_pointing_at_other_milestone_fails() {
        let result = MilestoneCatalog::load(
            "bad",
            vec![MilestoneDefinition::new(
                ComponentType::FieldWeld,
                1,
                vec![
                    MilestoneSpec::new("Fit-up", 50.0, MilestoneKind::Discrete, StandardCategory::Install),
                    MilestoneSpec::new("Weld Complete", 50.0, MilestoneKind::Discrete, StandardCategory::Install)
                        .with_aliases(&["fit up"]),
                ],
            )],
        );
        assert!(matches!(result, Err(CatalogError::AliasConflict { .. })));
    }

    #[test]
    fn test_negative_weight_fails() {
        let result = MilestoneCatalog::load(
            "bad",
            vec![MilestoneDefinition::new(
                ComponentType::Support,
                1,
                vec![
                    MilestoneSpec::new("Install", 110.0, MilestoneKind::Discrete, StandardCategory::Install),
                    MilestoneSpec::new("Test", -10.0, MilestoneKind::Discrete, StandardCategory::Test),
                ],
            )],
        );
        assert!(matches!(result, Err(CatalogError::InvalidWeight { .. })));
    }

    #[test]
    fn test_gap_tracker_dedups_by_type_and_name() {
        let mut tracker = ClassificationGapTracker::new();
        tracker.record_state(ComponentType::Spool, "Paint", "C1");
        tracker.record_state(ComponentType::Spool, "PAINT", "C2");
        for _ in 0..50 {
            tracker.record_event(ComponentType::Spool, "paint");
        }
        tracker.record_state(ComponentType::Valve, "Paint", "C3");

        let report = tracker.report();
        assert_eq!(report.len(), 2);
        let spool = report
            .iter()
            .find(|g| g.component_type == ComponentType::Spool)
            .unwrap();
        assert_eq!(spool.normalized_name, "paint");
        assert_eq!(spool.component_count, 2);
        assert_eq!(spool.event_count, 50);
        assert_eq!(spool.raw_names.len(), 3);
    }
}

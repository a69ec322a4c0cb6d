// ==========================================
// 管道施工进度引擎 - 挣值工时汇总
// ==========================================
// 职责: 预算工时 × 完成百分比, 按维度 (区域/系统/试压包/焊工/项目) 汇总
// 红线: 退役构件不计入
// 红线: 类别挣值合计必须等于整体挣值 (强制交叉校验)
// 红线: 预算缺失按 0 计, 仍计入构件数
// ==========================================
// 合并规则: 求和, 满足结合律与交换律, 可分片并行后合并
// ==========================================

use crate::domain::component::{Component, UNASSIGNED_DIMENSION_KEY};
use crate::domain::dimension::{CategoryAmounts, DimensionTotals};
use crate::domain::types::DimensionKind;
use crate::domain::warning::{EngineWarning, WarningKind};
use crate::engine::calculator::PercentCompleteCalculator;
use crate::engine::catalog::{ClassificationGapTracker, MilestoneCatalog};
use crate::engine::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// 整体挣值使用哪一个百分比
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PercentSource {
    /// 由里程碑重算 (对外报表口径)
    Recomputed,
    /// 构件上缓存的 percent_complete (审计比对口径)
    Stored,
}

/// 交叉校验失败: 类别合计 ≠ 整体挣值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossCheckFailure {
    pub component_id: String,
    pub dimension_key: String,
    pub total_earned_mh: f64,
    pub category_sum_mh: f64,
}

// ==========================================
// AggregationTable - 汇总结果
// ==========================================
#[derive(Debug, Clone)]
pub struct AggregationTable {
    pub dimension: DimensionKind,
    pub rows: BTreeMap<String, DimensionTotals>,
    pub warnings: Vec<EngineWarning>,
    pub cross_check_failures: Vec<CrossCheckFailure>,
    pub gaps: ClassificationGapTracker,
    pub retired_skipped: usize,
}

impl AggregationTable {
    pub fn new(dimension: DimensionKind) -> Self {
        Self {
            dimension,
            rows: BTreeMap::new(),
            warnings: Vec::new(),
            cross_check_failures: Vec::new(),
            gaps: ClassificationGapTracker::new(),
            retired_skipped: 0,
        }
    }

    /// 合并分片结果
    pub fn merge(&mut self, other: AggregationTable) {
        for (key, totals) in other.rows {
            self.rows
                .entry(key.clone())
                .or_insert_with(|| DimensionTotals::empty(self.dimension, &key))
                .merge(&totals);
        }
        self.warnings.extend(other.warnings);
        self.cross_check_failures.extend(other.cross_check_failures);
        self.gaps.merge(other.gaps);
        self.retired_skipped += other.retired_skipped;
    }

    /// 全部维度键的总计
    pub fn grand_total(&self) -> DimensionTotals {
        let mut total = DimensionTotals::empty(DimensionKind::Project, "TOTAL");
        for row in self.rows.values() {
            total.merge(row);
        }
        total.label = None;
        total
    }

    pub fn row(&self, key: &str) -> Option<&DimensionTotals> {
        self.rows.get(key)
    }
}

// ==========================================
// EarnedManhoursAggregator
// ==========================================
pub struct EarnedManhoursAggregator;

impl EarnedManhoursAggregator {
    /// 按维度汇总 (构件自带维度键)
    pub fn aggregate(
        catalog: &MilestoneCatalog,
        components: &[Component],
        dimension: DimensionKind,
        source: PercentSource,
        tolerance: f64,
    ) -> AggregationTable {
        Self::aggregate_with(catalog, components, dimension, source, tolerance, |c| {
            c.dimension_key(dimension).map(|k| k.to_string())
        })
    }

    /// 按自定义分组函数汇总
    ///
    /// # 参数
    /// - `key_fn`: 构件 → 分组键, `None` 归入 UNASSIGNED
    /// - `tolerance`: 交叉校验容差 (工时, 相对 max(1, 挣值))
    pub fn aggregate_with<F>(
        catalog: &MilestoneCatalog,
        components: &[Component],
        dimension: DimensionKind,
        source: PercentSource,
        tolerance: f64,
        key_fn: F,
    ) -> AggregationTable
    where
        F: Fn(&Component) -> Option<String>,
    {
        let mut table = AggregationTable::new(dimension);

        for component in components {
            if component.is_retired {
                table.retired_skipped += 1;
                continue;
            }
            let id = component.component_id.as_str();

            let key = match key_fn(component) {
                Some(k) => k,
                None => {
                    if dimension != DimensionKind::Project {
                        table.warnings.push(EngineWarning::for_component(
                            id,
                            WarningKind::MissingDimension {
                                dimension: dimension.to_string(),
                            },
                        ));
                    }
                    UNASSIGNED_DIMENSION_KEY.to_string()
                }
            };

            if component.budgeted_mh.is_none() {
                table
                    .warnings
                    .push(EngineWarning::for_component(id, WarningKind::MissingBudget));
            }
            let budget = component.budget_mh();

            let row = table
                .rows
                .entry(key.clone())
                .or_insert_with(|| DimensionTotals::empty(dimension, &key));
            row.component_count += 1;
            row.budget_mh += budget;

            let breakdown = match PercentCompleteCalculator::breakdown(
                catalog,
                component.component_type,
                &component.current_milestones,
            ) {
                Ok(b) => b,
                Err(EngineError::MissingDefinition(component_type)) => {
                    warn!(component_id = id, component_type = %component_type, "构件类型无目录定义, 挣值按 0 计");
                    table.warnings.push(EngineWarning::for_component(
                        id,
                        WarningKind::UncatalogedComponentType { component_type },
                    ));
                    continue;
                }
                Err(e) => {
                    warn!(component_id = id, error = %e, "构件计算失败, 挣值按 0 计");
                    continue;
                }
            };

            for name in &breakdown.unclassified {
                table.gaps.record_state(component.component_type, name, id);
            }
            table.warnings.extend(
                breakdown
                    .warnings
                    .iter()
                    .cloned()
                    .map(|w| w.attach_component(id)),
            );

            let percent = match source {
                PercentSource::Recomputed => breakdown.percent,
                PercentSource::Stored => component.percent_complete,
            };
            let earned = budget * percent / 100.0;
            let by_category: CategoryAmounts = breakdown.by_category.scaled(budget / 100.0);

            let category_sum = by_category.total();
            if (category_sum - earned).abs() > tolerance * earned.abs().max(1.0) {
                debug!(
                    component_id = id,
                    earned = earned,
                    category_sum = category_sum,
                    "类别挣值合计与整体挣值不一致"
                );
                table.cross_check_failures.push(CrossCheckFailure {
                    component_id: id.to_string(),
                    dimension_key: key.clone(),
                    total_earned_mh: earned,
                    category_sum_mh: category_sum,
                });
            }

            row.earned_mh += earned;
            row.earned_by_category.merge(&by_category);
        }

        table
    }
}

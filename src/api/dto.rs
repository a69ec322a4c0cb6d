// ==========================================
// 管道施工进度引擎 - API 数据传输对象
// ==========================================
// 列契约: 预算 / 各标准类别挣值 (每类一列) / 挣值合计 / 完成百分比
// 调用方对类别列求和应在容差内等于挣值合计
// ==========================================

use crate::domain::audit::ClassificationGap;
use crate::domain::dimension::DimensionTotals;
use crate::domain::milestone::EventScope;
use crate::domain::types::{DimensionKind, ReportingPolicy};
use crate::domain::warning::EngineWarning;
use crate::engine::aggregator::CrossCheckFailure;
use crate::engine::delta::DeltaResult;
use serde::{Deserialize, Serialize};

// ==========================================
// AggregateRow - 汇总表的一行
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub key: String,
    pub label: Option<String>,
    pub component_count: usize,
    pub budget_mh: f64,
    pub earned_receive_mh: f64,
    pub earned_install_mh: f64,
    pub earned_punch_mh: f64,
    pub earned_test_mh: f64,
    pub earned_restore_mh: f64,
    pub total_earned_mh: f64,
    pub percent_complete: f64,
}

impl AggregateRow {
    pub fn category_sum_mh(&self) -> f64 {
        self.earned_receive_mh
            + self.earned_install_mh
            + self.earned_punch_mh
            + self.earned_test_mh
            + self.earned_restore_mh
    }
}

impl From<&DimensionTotals> for AggregateRow {
    fn from(t: &DimensionTotals) -> Self {
        let c = &t.earned_by_category;
        Self {
            key: t.key.clone(),
            label: t.label.clone(),
            component_count: t.component_count,
            budget_mh: t.budget_mh,
            earned_receive_mh: c.receive,
            earned_install_mh: c.install,
            earned_punch_mh: c.punch,
            earned_test_mh: c.test,
            earned_restore_mh: c.restore,
            total_earned_mh: t.earned_mh,
            percent_complete: t.percent_complete(),
        }
    }
}

// ==========================================
// AggregateReport - 按维度的汇总结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub project_id: String,
    pub dimension: DimensionKind,
    pub catalog_version: String,
    pub rows: Vec<AggregateRow>,
    pub total: AggregateRow,
    pub warnings: Vec<EngineWarning>,
    pub classification_gaps: Vec<ClassificationGap>,
    pub cross_check_failures: Vec<CrossCheckFailure>,
}

impl AggregateReport {
    pub fn row(&self, key: &str) -> Option<&AggregateRow> {
        self.rows.iter().find(|r| r.key == key)
    }
}

// ==========================================
// DeltaReport - 时间窗增量结果
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaReport {
    pub scope: EventScope,
    pub catalog_version: String,
    pub policy: ReportingPolicy,
    /// 引擎口径结果 (FORWARD_ONLY / NET)
    pub result: DeltaResult,
    /// 对外报告口径的净增量
    pub reported_delta_mh: f64,
    pub classification_gaps: Vec<ClassificationGap>,
}

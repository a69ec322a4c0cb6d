// ==========================================
// 管道施工进度引擎 - 一致性审计模型
// ==========================================
// 红线: 审计只报告, 不修正
// 红线: 修复是独立、显式、可追溯的人工操作
// ==========================================

use crate::domain::types::{ComponentType, DimensionKind};
use crate::domain::warning::EngineWarning;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ==========================================
// AuditEntity - 差异所属实体
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEntity {
    Component { component_id: String },
    Dimension { dimension: DimensionKind, key: String },
}

impl AuditEntity {
    pub fn component(component_id: &str) -> Self {
        AuditEntity::Component {
            component_id: component_id.to_string(),
        }
    }

    pub fn dimension(dimension: DimensionKind, key: &str) -> Self {
        AuditEntity::Dimension {
            dimension,
            key: key.to_string(),
        }
    }

    pub fn component_id(&self) -> Option<&str> {
        match self {
            AuditEntity::Component { component_id } => Some(component_id.as_str()),
            AuditEntity::Dimension { .. } => None,
        }
    }
}

// ==========================================
// DiscrepancyKind - 差异类型 (对应比对路径)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscrepancyKind {
    /// 缓存百分比 vs 里程碑重算 (百分点)
    StoredVsRecomputed,
    /// 缓存百分比超出 [0,100] (百分点)
    PercentOutOfRange,
    /// 类别合计 vs 整体挣值 (工时)
    CategoryRollupVsTotal,
    /// 物化视图 vs 重算合计 (工时)
    MaterializedViewVsRecomputed,
    /// 全生命周期事件回放挣值 vs 当前状态挣值 (工时)
    ReplayVsCurrentEarned,
    /// 事件回放状态与当前里程碑状态不一致 (不一致的里程碑个数)
    ReplayStateMismatch,
}

impl DiscrepancyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscrepancyKind::StoredVsRecomputed => "STORED_VS_RECOMPUTED",
            DiscrepancyKind::PercentOutOfRange => "PERCENT_OUT_OF_RANGE",
            DiscrepancyKind::CategoryRollupVsTotal => "CATEGORY_ROLLUP_VS_TOTAL",
            DiscrepancyKind::MaterializedViewVsRecomputed => "MATERIALIZED_VIEW_VS_RECOMPUTED",
            DiscrepancyKind::ReplayVsCurrentEarned => "REPLAY_VS_CURRENT_EARNED",
            DiscrepancyKind::ReplayStateMismatch => "REPLAY_STATE_MISMATCH",
        }
    }

    /// 能否通过重写缓存百分比修复
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            DiscrepancyKind::StoredVsRecomputed | DiscrepancyKind::PercentOutOfRange
        )
    }
}

// ==========================================
// Discrepancy - 差异记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub entity: AuditEntity,
    pub kind: DiscrepancyKind,
    pub computed_a: f64,
    pub computed_b: f64,
    pub delta: f64,
    pub detail: String,
}

impl Discrepancy {
    pub fn new(
        entity: AuditEntity,
        kind: DiscrepancyKind,
        computed_a: f64,
        computed_b: f64,
        detail: String,
    ) -> Self {
        Self {
            entity,
            kind,
            computed_a,
            computed_b,
            delta: computed_a - computed_b,
            detail,
        }
    }
}

// ==========================================
// ClassificationGap - 分类缺口
// ==========================================
// 每个 (构件类型, 规范化名称) 只出现一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationGap {
    pub component_type: ComponentType,
    pub normalized_name: String,
    pub raw_names: BTreeSet<String>,
    pub component_count: usize,
    pub event_count: usize,
}

// ==========================================
// AuditReport - 审计报告
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub run_id: String,
    pub project_id: String,
    pub tolerance_pp: f64,
    pub partition_dimension: DimensionKind,
    pub components_audited: usize,
    pub discrepancies: Vec<Discrepancy>,
    pub classification_gaps: Vec<ClassificationGap>,
    pub warnings: Vec<EngineWarning>,
    pub completed_keys: BTreeSet<String>,
    pub pending_keys: BTreeSet<String>,
    pub cancelled: bool,
    pub started_at: NaiveDateTime,
    pub finished_at: Option<NaiveDateTime>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        !self.cancelled && self.pending_keys.is_empty()
    }

    pub fn count_by_kind(&self, kind: DiscrepancyKind) -> usize {
        self.discrepancies.iter().filter(|d| d.kind == kind).count()
    }
}

// ==========================================
// AuditCheckpoint - 审计断点
// ==========================================
// 整项目审计按维度键分段, 取消后从最后完成的维度继续
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditCheckpoint {
    pub run_id: String,
    pub project_id: String,
    pub dimension: DimensionKind,
    pub tolerance_pp: f64,
    pub completed_keys: BTreeSet<String>,
    pub discrepancies: Vec<Discrepancy>,
    pub components_audited: usize,
    pub started_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

// ==========================================
// RepairRecord - 修复记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairRecord {
    pub repair_id: String,
    pub project_id: String,
    pub component_id: String,
    pub old_percent: f64,
    pub new_percent: f64,
    pub actor: String,
    pub reason: String,
    pub repaired_at: NaiveDateTime,
}

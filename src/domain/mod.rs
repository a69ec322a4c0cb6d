// ==========================================
// 管道施工进度引擎 - 领域模型层
// ==========================================
// 职责: 定义构件、里程碑、事件、汇总与审计实体
// 红线: 不含数据访问逻辑, 不含引擎逻辑
// ==========================================

pub mod audit;
pub mod component;
pub mod dimension;
pub mod milestone;
pub mod types;
pub mod warning;

// 重导出核心类型
pub use audit::{
    AuditCheckpoint, AuditEntity, AuditReport, ClassificationGap, Discrepancy, DiscrepancyKind,
    RepairRecord,
};
pub use component::{Component, ComponentFilter, MilestoneState, UNASSIGNED_DIMENSION_KEY};
pub use dimension::{CategoryAmounts, DimensionMetadata, DimensionTotals, MaterializedViewRow};
pub use milestone::{EventScope, MilestoneDefinition, MilestoneEvent, MilestoneSpec};
pub use types::{
    ComponentType, DeltaMode, DimensionKind, MilestoneKind, ReportingPolicy, StandardCategory,
};
pub use warning::{Calculated, EngineWarning, WarningKind};

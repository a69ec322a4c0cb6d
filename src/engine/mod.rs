// ==========================================
// 管道施工进度引擎 - 引擎层
// ==========================================
// 职责: 实现进度计算与一致性规则, 不拼 SQL
// 红线: 引擎只接收已取回的快照, 不做 I/O
// 红线: 非致命问题以告警返回, 只有目录配置错误阻止出结果
// ==========================================

pub mod aggregator;
pub mod auditor;
pub mod calculator;
pub mod catalog;
pub mod delta;
pub mod error;
pub mod milestone_update;
pub mod normalizer;
pub mod repair;

// 重导出核心引擎
pub use aggregator::{AggregationTable, CrossCheckFailure, EarnedManhoursAggregator, PercentSource};
pub use auditor::{AuditRun, AuditSettings, ConsistencyAuditor, PartitionAudit};
pub use calculator::{MilestoneContribution, PercentBreakdown, PercentCompleteCalculator};
pub use catalog::{normalize_milestone_name, ClassificationGapTracker, MilestoneCatalog};
pub use delta::{DeltaEngine, DeltaResult, EventContribution, ReplayOutcome};
pub use error::{CatalogError, EngineError, EngineResult};
pub use milestone_update::{MilestoneUpdate, MilestoneUpdateOutcome, MilestoneUpdater, RegistrationSeed};
pub use normalizer::{MilestoneValueNormalizer, NormalizedValue};
pub use repair::{RepairPlanner, RepairRequest};

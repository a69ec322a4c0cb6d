// ==========================================
// 管道施工进度引擎 - 核心库
// ==========================================
// 职责: 里程碑进度 → 完成百分比 → 挣值工时, 多维度汇总、时间窗增量与一致性审计
// 技术栈: Rust + SQLite
// ==========================================

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 引擎层 - 计算规则 (纯函数, 不含 SQL)
pub mod engine;

// 数据仓储层 - 数据访问
pub mod repository;

// 配置层 - 引擎配置与目录文件
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA 统一/建表）
pub mod db;

// 日志系统
pub mod logging;

// API 层 - 对外操作
pub mod api;

// 应用层 - 进程装配
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{
    ComponentType, DeltaMode, DimensionKind, MilestoneKind, ReportingPolicy, StandardCategory,
};

// 领域实体
pub use domain::{
    AuditReport, Calculated, Component, Discrepancy, DiscrepancyKind, EngineWarning,
    MilestoneDefinition, MilestoneEvent, MilestoneSpec,
};

// 引擎
pub use engine::{
    ConsistencyAuditor, DeltaEngine, EarnedManhoursAggregator, MilestoneCatalog,
    MilestoneValueNormalizer, PercentCompleteCalculator,
};

// API
pub use api::{ApiError, ProgressApi};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "管道施工进度引擎";

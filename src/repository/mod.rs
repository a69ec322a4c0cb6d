// ==========================================
// 管道施工进度引擎 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口, 屏蔽数据库细节
// 约束: 所有查询使用参数化, 防止 SQL 注入
// ==========================================

pub mod audit_repo;
pub mod catalog_repo;
pub mod component_repo;
pub mod error;
pub mod event_repo;
pub mod memory_store;
pub mod progress_source;
pub mod row_codec;
pub mod sqlite_store;
pub mod view_repo;

// 重导出核心仓储
pub use audit_repo::AuditRepository;
pub use catalog_repo::MilestoneDefinitionRepository;
pub use component_repo::ComponentRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use event_repo::MilestoneEventRepository;
pub use memory_store::InMemoryProgressStore;
pub use progress_source::{ProgressDataSink, ProgressDataSource};
pub use sqlite_store::SqliteProgressStore;
pub use view_repo::{DimensionLabelRepository, ProgressViewRepository};

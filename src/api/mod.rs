// ==========================================
// 管道施工进度引擎 - API 层
// ==========================================
// 职责: 提供进度操作接口, 供库调用方与命令行入口使用
// ==========================================

pub mod dto;
pub mod error;
pub mod progress_api;

// 重导出核心类型
pub use dto::{AggregateReport, AggregateRow, DeltaReport};
pub use error::{ApiError, ApiResult};
pub use progress_api::ProgressApi;

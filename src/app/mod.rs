// ==========================================
// 管道施工进度引擎 - 应用层
// ==========================================
// 职责: 进程级装配 (数据库 / 配置 / API)
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};

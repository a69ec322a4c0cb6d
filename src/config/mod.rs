// ==========================================
// 管道施工进度引擎 - 配置层
// ==========================================
// 职责: 引擎配置 (config_kv 覆写默认值) 与里程碑目录文件
// 存储: config_kv 表
// ==========================================

pub mod catalog_file;
pub mod config_manager;
pub mod engine_config;

// 重导出核心配置
pub use catalog_file::{load_catalog_file, read_catalog_definitions, select_version};
pub use config_manager::{config_keys, ConfigManager};
pub use engine_config::EngineConfig;

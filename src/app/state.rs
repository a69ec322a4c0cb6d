// ==========================================
// 管道施工进度引擎 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享状态和API实例
// ==========================================

use std::sync::Arc;

use crate::api::ProgressApi;
use crate::config::catalog_file::load_catalog_file;
use crate::config::config_manager::ConfigManager;
use crate::config::engine_config::EngineConfig;
use crate::repository::SqliteProgressStore;

/// 应用状态
///
/// 包含数据库连接、配置与 API 实例
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 生效的引擎配置
    pub engine_config: EngineConfig,

    /// 配置管理器 (与数据协作方共享连接)
    pub config_manager: Arc<ConfigManager>,

    /// 进度API
    pub progress_api: Arc<ProgressApi<SqliteProgressStore>>,
}

impl AppState {
    /// 创建新的AppState实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    ///
    /// # 说明
    /// 该方法会：
    /// 1. 打开数据库并初始化 schema
    /// 2. 从 config_kv 加载引擎配置
    /// 3. 创建 API 实例
    pub fn new(db_path: String) -> anyhow::Result<Self> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let store = Arc::new(SqliteProgressStore::open(&db_path)?);
        let config_manager = Arc::new(ConfigManager::from_connection(store.connection())?);
        let engine_config = config_manager.load_engine_config()?;
        tracing::debug!(config = ?engine_config, "引擎配置已加载");

        let progress_api = Arc::new(ProgressApi::new(store, engine_config.clone()));

        Ok(Self {
            db_path,
            engine_config,
            config_manager,
            progress_api,
        })
    }

    /// 使用 CSV 目录文件替代数据库中的目录
    pub fn with_catalog_file(db_path: String, catalog_path: &std::path::Path) -> anyhow::Result<Self> {
        let state = Self::new(db_path)?;
        let catalog = load_catalog_file(
            catalog_path,
            state.engine_config.catalog_version,
            state.engine_config.weight_sum_tolerance,
        )?;
        let store = state.progress_api.store().clone();
        let progress_api = Arc::new(
            ProgressApi::new(store, state.engine_config.clone()).with_catalog(catalog),
        );
        Ok(Self {
            progress_api,
            ..state
        })
    }
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 CONSTRUCTION_PROGRESS_DB_PATH > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    // 允许通过环境变量显式指定 DB 路径（便于调试/测试/CI）
    if let Ok(path) = std::env::var("CONSTRUCTION_PROGRESS_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./construction_progress.db");

    if let Some(data_dir) = dirs::data_dir() {
        // 开发环境使用独立目录，避免污染生产数据
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("construction-progress-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("construction-progress");
        }

        // 确保目录存在
        std::fs::create_dir_all(&path).ok();
        path = path.join("construction_progress.db");
    }

    path.to_string_lossy().to_string()
}

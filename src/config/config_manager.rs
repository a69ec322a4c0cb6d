// ==========================================
// 管道施工进度引擎 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// 红线: 配置值格式错误时回退默认值并告警, 不阻断计算
// ==========================================

use crate::config::engine_config::EngineConfig;
use crate::db::{configure_sqlite_connection, init_schema, open_sqlite_connection};
use crate::domain::types::{DeltaMode, DimensionKind, ReportingPolicy};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::warn;

const GLOBAL_SCOPE: &str = "global";

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = open_sqlite_connection(db_path)
            .map_err(|e| RepositoryError::DatabaseConnectionError(e.to_string()))?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> RepositoryResult<Self> {
        {
            let guard = conn
                .lock()
                .map_err(|e| RepositoryError::LockError(e.to_string()))?;
            configure_sqlite_connection(&guard)?;
        }
        Ok(Self { conn })
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 读取 global scope 的配置值
    ///
    /// # 返回
    /// - Some(String): 配置值
    /// - None: 配置不存在
    pub fn get_global_config_value(&self, key: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = ?1 AND key = ?2",
            params![GLOBAL_SCOPE, key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 写入 global scope 的配置值 (UPSERT)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"
            INSERT INTO config_kv (scope_id, key, value, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT (scope_id, key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![GLOBAL_SCOPE, key, value],
        )?;
        Ok(())
    }

    /// 读取配置并解析, 缺失或格式错误时返回默认值
    fn get_parsed_or_default<T, F>(&self, key: &str, default: T, parse: F) -> RepositoryResult<T>
    where
        F: Fn(&str) -> Option<T>,
    {
        let Some(raw) = self.get_global_config_value(key)? else {
            return Ok(default);
        };
        match parse(raw.trim()) {
            Some(value) => Ok(value),
            None => {
                warn!(key = key, value = %raw, "配置值格式错误, 使用默认值");
                Ok(default)
            }
        }
    }

    // ===== 引擎配置 =====

    /// 加载引擎配置 (config_kv 覆写默认值)
    pub fn load_engine_config(&self) -> RepositoryResult<EngineConfig> {
        let defaults = EngineConfig::default();
        let finite = |s: &str| s.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0);

        Ok(EngineConfig {
            audit_tolerance_pp: self.get_parsed_or_default(
                config_keys::AUDIT_TOLERANCE_PP,
                defaults.audit_tolerance_pp,
                finite,
            )?,
            decomposition_tolerance: self.get_parsed_or_default(
                config_keys::DECOMPOSITION_TOLERANCE,
                defaults.decomposition_tolerance,
                finite,
            )?,
            weight_sum_tolerance: self.get_parsed_or_default(
                config_keys::WEIGHT_SUM_TOLERANCE,
                defaults.weight_sum_tolerance,
                finite,
            )?,
            default_delta_mode: self.get_parsed_or_default(
                config_keys::DEFAULT_DELTA_MODE,
                defaults.default_delta_mode,
                DeltaMode::from_str,
            )?,
            reporting_policy: self.get_parsed_or_default(
                config_keys::REPORTING_POLICY,
                defaults.reporting_policy,
                ReportingPolicy::from_str,
            )?,
            audit_dimension: self.get_parsed_or_default(
                config_keys::AUDIT_DIMENSION,
                defaults.audit_dimension,
                DimensionKind::from_str,
            )?,
            parallelism: self.get_parsed_or_default(
                config_keys::PARALLELISM,
                defaults.parallelism,
                |s| s.parse::<usize>().ok().filter(|v| *v > 0),
            )?,
            catalog_version: self.get_parsed_or_default(
                config_keys::CATALOG_VERSION,
                defaults.catalog_version,
                |s| {
                    if s.is_empty() || s.eq_ignore_ascii_case("latest") {
                        Some(None)
                    } else {
                        s.parse::<i32>().ok().map(Some)
                    }
                },
            )?,
        })
    }

    /// 保存引擎配置 (逐键写入)
    pub fn save_engine_config(&self, config: &EngineConfig) -> RepositoryResult<()> {
        let entries = [
            (config_keys::AUDIT_TOLERANCE_PP, config.audit_tolerance_pp.to_string()),
            (config_keys::DECOMPOSITION_TOLERANCE, config.decomposition_tolerance.to_string()),
            (config_keys::WEIGHT_SUM_TOLERANCE, config.weight_sum_tolerance.to_string()),
            (config_keys::DEFAULT_DELTA_MODE, config.default_delta_mode.as_str().to_string()),
            (config_keys::REPORTING_POLICY, config.reporting_policy.as_str().to_string()),
            (config_keys::AUDIT_DIMENSION, config.audit_dimension.as_str().to_string()),
            (config_keys::PARALLELISM, config.parallelism.to_string()),
            (
                config_keys::CATALOG_VERSION,
                config
                    .catalog_version
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "latest".to_string()),
            ),
        ];
        for (key, value) in entries {
            self.set_global_config_value(key, &value)?;
        }
        Ok(())
    }

    /// 获取所有配置的快照（JSON格式）
    ///
    /// # 用途
    /// - 审计报告随附当时的配置
    pub fn get_config_snapshot(&self) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = ?1 ORDER BY key")?;
        let rows = stmt.query_map(params![GLOBAL_SCOPE], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }
        Ok(serde_json::to_string(&config_map)?)
    }

    /// 从配置快照恢复配置
    ///
    /// # 返回
    /// - Ok(usize): 恢复的配置项数量
    pub fn restore_config_from_snapshot(&self, snapshot_json: &str) -> RepositoryResult<usize> {
        let config_map: BTreeMap<String, String> = serde_json::from_str(snapshot_json)?;

        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;
        for (key, value) in &config_map {
            count += tx.execute(
                r#"
                INSERT INTO config_kv (scope_id, key, value, updated_at)
                VALUES (?1, ?2, ?3, datetime('now'))
                ON CONFLICT (scope_id, key) DO UPDATE SET value = excluded.value
                "#,
                params![GLOBAL_SCOPE, key, value],
            )?;
        }
        tx.commit()?;
        Ok(count)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 审计
    pub const AUDIT_TOLERANCE_PP: &str = "audit_tolerance_pp";
    pub const DECOMPOSITION_TOLERANCE: &str = "decomposition_tolerance";
    pub const AUDIT_DIMENSION: &str = "audit_dimension";

    // 目录
    pub const WEIGHT_SUM_TOLERANCE: &str = "weight_sum_tolerance";
    pub const CATALOG_VERSION: &str = "catalog_version"; // 整数或 "latest"

    // 增量与报告口径
    pub const DEFAULT_DELTA_MODE: &str = "default_delta_mode";
    pub const REPORTING_POLICY: &str = "reporting_policy";

    // 并发
    pub const PARALLELISM: &str = "parallelism";
}

// ==========================================
// 管道施工进度引擎 - 引擎层错误类型
// ==========================================
// 红线: 只有配置错误阻止返回结果
// 工具: thiserror 派生宏
// ==========================================

use crate::domain::types::ComponentType;
use thiserror::Error;

/// 目录配置错误 (加载时致命)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("权重合计不等于 100: type={component_type}, version={version}, sum={sum}")]
    WeightSumMismatch {
        component_type: ComponentType,
        version: i32,
        sum: f64,
    },

    #[error("里程碑名称重复: type={component_type}, name={name}")]
    DuplicateMilestone {
        component_type: ComponentType,
        name: String,
    },

    #[error("权重无效: type={component_type}, milestone={name}, weight={weight}")]
    InvalidWeight {
        component_type: ComponentType,
        name: String,
        weight: f64,
    },

    #[error("里程碑定义为空: type={component_type}, version={version}")]
    EmptyDefinition {
        component_type: ComponentType,
        version: i32,
    },

    #[error("别名冲突: type={component_type}, alias={alias}")]
    AliasConflict {
        component_type: ComponentType,
        alias: String,
    },

    #[error("同一构件类型定义重复: type={component_type}, version={version}")]
    DuplicateDefinition {
        component_type: ComponentType,
        version: i32,
    },

    #[error("目录字段无效 (行 {row}, 字段 {field}): {value}")]
    InvalidField {
        row: usize,
        field: String,
        value: String,
    },

    #[error("目录文件读取失败: {0}")]
    Source(String),
}

/// 引擎层错误
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("目录配置错误: {0}")]
    Catalog(#[from] CatalogError),

    #[error("构件类型无里程碑目录: {0}")]
    MissingDefinition(ComponentType),

    #[error("构件已退役: {0}")]
    RetiredComponent(String),

    #[error("修复请求无效: {0}")]
    InvalidRepairRequest(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

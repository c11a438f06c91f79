//! # Ring Export Sync
//!
//! 定时登录账户站点、请求数据导出、等待生成、下载并交给导入方的后台自动化程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有稀缺资源（Page），只暴露能力
//! - `PageDriver` - 页面操作能力（导航、查询、填写、点击、下载、导出会话）
//! - `JsExecutor` - chromiumoxide 上的实现
//! - `selectors` - 集中管理的候选选择器表
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `SessionManager` - 唯一的浏览器会话持有者（启动、快照、清理）
//! - `AuthFlow` - 登录状态机，遇到验证码就停下
//! - `Ingestor` - 把下载好的文件交给下游
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一次导出"的完整处理流程
//! - `RunCtx` - 上下文封装（运行编号 + 触发方式）
//! - `ExportOrchestrator` - 流程编排（导航 → 请求 → 等待生成 → 下载）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/automator` - 准入控制、会话资源、收尾，面向调用方的操作
//! - `orchestrator/scheduler` - 每分钟一个 tick 的后台调度循环
//!
//! 状态记录（`store/`）是调度循环与调用方之间唯一的协调机制。
//!
//! ## 模块结构

pub mod browser;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod store;
pub mod utils;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

// 重新导出常用类型
pub use browser::ChromiumBackend;
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{JsExecutor, PageDriver};
pub use models::{AutomationStatus, StatusRecord};
pub use orchestrator::{Automator, ExportRunner, PasscodeFollowUp, RunOutcome, Scheduler};
pub use services::{InboxIngestor, Ingestor, SessionManager};
pub use store::StatusStore;
pub use workflow::{ExportOrchestrator, RunCtx, RunKind};

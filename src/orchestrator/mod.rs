//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责运行的准入与调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `automator` - 自动化运行器
//! - 准入控制（进程内标志 + 状态存储的原子检查）
//! - 独占持有会话管理器，负责每次运行后的清理
//! - 下载完成后调用导入方，把结果写回状态存储
//! - 面向调用方的操作（登录、提交验证码、请求导出、清除会话、修改设置）
//!
//! ### `scheduler` - 后台调度循环
//! - 每个 tick 读取状态记录
//! - 到达计划时间时触发定时运行
//! - 挂起在等待状态时按间隔触发恢复运行
//!
//! ## 层次关系
//!
//! ```text
//! scheduler (每分钟一个 tick)
//!     ↓
//! automator (准入 / 会话 / 收尾)
//!     ↓
//! workflow::ExportOrchestrator (一次导出)
//!     ↓
//! services (能力层：session / auth / ingestion)
//!     ↓
//! infrastructure (基础设施：PageDriver)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一入口**：调度器和调用方都经由 automator 启动运行
//! 2. **资源隔离**：只有 automator 持有会话管理器
//! 3. **向下依赖**：编排层 → workflow → services → infrastructure
//! 4. **拒绝而不排队**：已有运行时新的请求直接返回 Busy

pub mod automator;
pub mod scheduler;

// 重新导出主要类型
pub use automator::{
    Automator, ExportRunner, PasscodeFollowUp, RunOutcome, RunPlan, RunTicket, SettingsUpdate,
};
pub use scheduler::{Scheduler, TickAction};

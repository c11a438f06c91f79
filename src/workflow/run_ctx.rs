//! 运行上下文
//!
//! 封装"这是第几次运行、由谁触发"这一信息，只用于日志前缀

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// 运行的触发方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    /// 每日定时触发
    Scheduled,
    /// 调用方手动触发
    Manual,
    /// 调度器恢复一个挂起的运行
    Resume,
}

impl RunKind {
    fn label(self) -> &'static str {
        match self {
            RunKind::Scheduled => "定时",
            RunKind::Manual => "手动",
            RunKind::Resume => "恢复",
        }
    }
}

/// 运行上下文
#[derive(Debug, Clone)]
pub struct RunCtx {
    /// 进程内递增的运行编号
    pub run_id: u64,

    pub kind: RunKind,
}

impl RunCtx {
    /// 创建新的运行上下文（分配新的编号）
    pub fn new(kind: RunKind) -> Self {
        Self {
            run_id: NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed),
            kind,
        }
    }
}

impl Display for RunCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[运行 #{} {}]", self.run_id, self.kind.label())
    }
}

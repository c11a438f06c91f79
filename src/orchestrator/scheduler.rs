//! 后台调度循环 - 编排层
//!
//! 每个 tick 读取状态记录并决定要做的事：
//!
//! 1. 自动运行关闭 → 什么也不做
//! 2. 到了每日计划时间且没有挂起的运行 → 定时全量运行
//! 3. 挂起在等待状态（验证码 / 导出生成）且到了轮询分钟 → 恢复运行
//!
//! 运行都在独立任务里执行，tick 循环本身从不阻塞；重叠的运行由
//! [`Automator`](crate::orchestrator::Automator) 的准入检查拒绝。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{AutomationStatus, ScheduleConfig, StatusUpdate};
use crate::orchestrator::{ExportRunner, RunOutcome};
use crate::store::StatusStore;

/// 一个 tick 的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    Idle,
    FullRun,
    Resume,
}

/// 根据当前状态和调度配置决定本分钟要做什么
pub fn decide(
    status: AutomationStatus,
    schedule: &ScheduleConfig,
    now: NaiveDateTime,
    poll_minutes: u32,
) -> TickAction {
    if !schedule.is_active {
        return TickAction::Idle;
    }

    let waiting = status.is_waiting();
    let due = schedule
        .schedule_time
        .is_some_and(|t| t.matches_minute(now));

    if due && !waiting {
        TickAction::FullRun
    } else if waiting && poll_minutes > 0 && now.minute() % poll_minutes == 0 {
        TickAction::Resume
    } else {
        TickAction::Idle
    }
}

pub struct Scheduler {
    runner: Arc<dyn ExportRunner>,
    store: Arc<StatusStore>,
    tick_interval: Duration,
    poll_minutes: u32,
    /// 上一次触发运行的分钟，同一分钟内不重复触发
    last_fired: Mutex<Option<NaiveDateTime>>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn ExportRunner>, store: Arc<StatusStore>, config: &Config) -> Self {
        Self {
            runner,
            store,
            tick_interval: config.timings.tick_interval(),
            poll_minutes: config.timings.passcode_poll_minutes,
            last_fired: Mutex::new(None),
        }
    }

    /// 计算本 tick 的决定，并刷新状态记录里的下一次执行时间
    pub fn tick(&self, now: NaiveDateTime) -> AppResult<TickAction> {
        let record = self.store.get();

        let schedule = ScheduleConfig::from_record(&record);

        match schedule.schedule_time {
            Some(time) => {
                let next_run = time.next_run_after(now);
                if record.next_run != Some(next_run) {
                    self.store.update(StatusUpdate::default().with_next_run(next_run))?;
                }
            }
            None => warn!("⚠️ 计划时间 '{}' 无效，跳过定时运行", record.schedule_time),
        }

        let action = decide(record.status, &schedule, now, self.poll_minutes);
        if action == TickAction::Idle {
            return Ok(action);
        }

        let minute = truncate_to_minute(now);
        let mut last_fired = self
            .last_fired
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *last_fired == Some(minute) {
            debug!("本分钟已触发过运行，跳过");
            return Ok(TickAction::Idle);
        }
        *last_fired = Some(minute);
        Ok(action)
    }

    /// 在独立任务里执行决定的运行
    pub fn dispatch(&self, action: TickAction) -> Option<JoinHandle<()>> {
        let runner = self.runner.clone();
        match action {
            TickAction::Idle => None,
            TickAction::FullRun => {
                info!("⏰ 到达计划时间，开始定时运行");
                Some(tokio::spawn(async move {
                    report("定时运行", runner.run_scheduled().await);
                }))
            }
            TickAction::Resume => {
                info!("🔁 检查挂起的运行");
                Some(tokio::spawn(async move {
                    report("恢复运行", runner.run_resume().await);
                }))
            }
        }
    }

    /// 执行一个 tick
    pub fn run_tick(&self, now: NaiveDateTime) -> Option<JoinHandle<()>> {
        match self.tick(now) {
            Ok(action) => self.dispatch(action),
            Err(e) => {
                error!("❌ 调度 tick 失败: {}", e);
                None
            }
        }
    }

    /// 启动后台循环
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("🕒 调度循环已启动 (间隔 {:?})", self.tick_interval);
            let mut ticker = interval(self.tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_tick(Local::now().naive_local());
            }
        })
    }
}

fn truncate_to_minute(now: NaiveDateTime) -> NaiveDateTime {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}

fn report(label: &str, result: AppResult<RunOutcome>) {
    match result {
        Ok(RunOutcome::Skipped) => debug!("{}: 自动运行已关闭", label),
        Ok(outcome) => info!("{}结束: {:?}", label, outcome),
        Err(AppError::Busy(status)) => info!("{}跳过: 已有运行 (状态 {})", label, status),
        Err(e) => error!("❌ {}失败: {}", label, e),
    }
}

//! 每日计划时间

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};

use crate::error::AppError;
use crate::models::StatusRecord;

/// 每日执行时间（本地时间，精确到分钟）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTime {
    time: NaiveTime,
}

impl ScheduleTime {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(|time| Self { time })
    }

    pub fn hour(&self) -> u32 {
        self.time.hour()
    }

    pub fn minute(&self) -> u32 {
        self.time.minute()
    }

    /// 下一次执行时间：今天的计划时间还没过就是今天，否则是明天
    pub fn next_run_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let today = now.date().and_time(self.time);
        if now > today {
            today + Duration::days(1)
        } else {
            today
        }
    }

    /// 当前分钟是否就是计划时间
    pub fn matches_minute(&self, now: NaiveDateTime) -> bool {
        now.hour() == self.hour() && now.minute() == self.minute()
    }
}

impl FromStr for ScheduleTime {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(|time| Self { time })
            .map_err(|_| AppError::Configuration(format!("无效的计划时间 '{}'，应为 HH:MM", s)))
    }
}

impl fmt::Display for ScheduleTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

/// 调度配置（每个 tick 从状态记录读取）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// 计划时间无效时为 None：不再定时运行，但挂起的运行照常恢复
    pub schedule_time: Option<ScheduleTime>,
    pub is_active: bool,
}

impl ScheduleConfig {
    pub fn from_record(record: &StatusRecord) -> Self {
        Self {
            schedule_time: record.schedule_time.parse().ok(),
            is_active: record.is_active,
        }
    }
}

//! 状态存储
//!
//! 进程内唯一的 [`StatusRecord`]，缓存在内存中，每次修改都原子写回状态文件。
//! 所有读写都经过同一把锁，`try_begin` 因此是一个原子的"检查并设置"。

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{AutomationStatus, StatusRecord, StatusUpdate};
use crate::utils::fs::write_atomic;

/// 运行的准入方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// 全量/手动运行：只能从 Idle 或 Error 开始
    Fresh,
    /// 恢复运行：只能从等待状态开始
    Resume,
    /// 交互式登录：Idle / Error，或者重新发起等待中的验证码登录
    Login,
}

impl Admission {
    pub fn admits(self, status: AutomationStatus) -> bool {
        match self {
            Admission::Fresh => status.can_start(),
            Admission::Resume => status.is_waiting(),
            Admission::Login => status.can_start() || status == AutomationStatus::AwaitingOtp,
        }
    }
}

pub struct StatusStore {
    path: PathBuf,
    record: Mutex<StatusRecord>,
}

impl StatusStore {
    /// 打开状态文件
    ///
    /// 文件不存在时以默认值创建；文件损坏时记录错误并用默认值覆盖。
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let path = path.into();

        let record = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<StatusRecord>(&bytes) {
                Ok(record) => {
                    debug!("📂 已加载状态文件: {}", path.display());
                    Some(record)
                }
                Err(e) => {
                    error!("❌ 状态文件无法解析，使用默认值覆盖 ({}): {}", path.display(), e);
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("📄 状态文件不存在，创建默认状态: {}", path.display());
                None
            }
            Err(e) => return Err(AppError::store(path.display().to_string(), e)),
        };

        let store = Self {
            record: Mutex::new(StatusRecord::default()),
            path,
        };

        match record {
            Some(record) => *store.lock() = record,
            None => {
                let guard = store.lock();
                store.persist(&guard)?;
            }
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 当前状态记录的快照
    pub fn get(&self) -> StatusRecord {
        self.lock().clone()
    }

    /// 合并更新并持久化，返回更新后的记录
    pub fn update(&self, update: StatusUpdate) -> AppResult<StatusRecord> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        next.apply(update);
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    /// 便捷方法：只更新状态和消息
    pub fn update_status(
        &self,
        status: AutomationStatus,
        message: impl Into<String>,
    ) -> AppResult<StatusRecord> {
        let message = message.into();
        debug!("📝 状态 -> {} ({})", status, message);
        self.update(StatusUpdate::status(status, message))
    }

    /// 原子地检查状态并写入 `Initializing`
    ///
    /// 返回进入前的记录（恢复运行需要它判断从哪一步继续）。状态不允许开始时返回
    /// [`AppError::Busy`]，不排队。
    pub fn try_begin(
        &self,
        admission: Admission,
        message: impl Into<String>,
    ) -> AppResult<StatusRecord> {
        let mut guard = self.lock();
        if !admission.admits(guard.status) {
            return Err(AppError::Busy(guard.status));
        }

        let prior = guard.clone();
        let mut next = prior.clone();
        next.apply(StatusUpdate::status(AutomationStatus::Initializing, message));
        self.persist(&next)?;
        *guard = next;
        Ok(prior)
    }

    /// 启动恢复：把崩溃进程遗留的执行中状态重置为 Idle
    ///
    /// 等待状态保留，由调度器继续恢复。返回是否做了重置。
    pub fn reset_in_flight(&self) -> AppResult<bool> {
        let mut guard = self.lock();
        if !guard.status.is_in_flight() {
            return Ok(false);
        }

        warn!("⚠️ 检测到上次进程遗留的状态 {}，重置为 Idle", guard.status);
        let mut next = guard.clone();
        next.apply(StatusUpdate::status(
            AutomationStatus::Idle,
            format!("Reset after restart (was {})", guard.status),
        ));
        self.persist(&next)?;
        *guard = next;
        Ok(true)
    }

    fn lock(&self) -> MutexGuard<'_, StatusRecord> {
        // 持锁期间不会 panic（只有序列化和文件写入），中毒时直接取回数据
        self.record.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, record: &StatusRecord) -> AppResult<()> {
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&self.path, &json)
            .map_err(|e| AppError::store(self.path.display().to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_in(dir: &tempfile::TempDir) -> StatusStore {
        StatusStore::open(dir.path().join("automation_status.json")).unwrap()
    }

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir);

        assert!(store.path().exists());
        assert_eq!(store.get(), StatusRecord::default());
    }

    #[test]
    fn test_corrupt_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("automation_status.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = StatusStore::open(&path).unwrap();
        assert_eq!(store.get().status, AutomationStatus::Idle);

        let on_disk: StatusRecord =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk, StatusRecord::default());
    }

    #[test]
    fn test_update_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_in(&dir);
            store
                .update(StatusUpdate {
                    email: Some("someone@example.com".into()),
                    schedule_time: Some("07:30".into()),
                    ..Default::default()
                })
                .unwrap();
            store
                .update_status(AutomationStatus::AwaitingOtp, "Waiting for OTP...")
                .unwrap();
        }

        let store = open_in(&dir);
        let record = store.get();
        assert_eq!(record.email, "someone@example.com");
        assert_eq!(record.schedule_time, "07:30");
        assert_eq!(record.status, AutomationStatus::AwaitingOtp);
        assert_eq!(record.message, "Waiting for OTP...");
    }

    #[test]
    fn test_try_begin_rejects_second_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir);

        let prior = store.try_begin(Admission::Fresh, "Starting full sync...").unwrap();
        assert_eq!(prior.status, AutomationStatus::Idle);
        assert_eq!(store.get().status, AutomationStatus::Initializing);

        match store.try_begin(Admission::Fresh, "again") {
            Err(AppError::Busy(status)) => assert_eq!(status, AutomationStatus::Initializing),
            other => panic!("expected Busy, got {other:?}"),
        }
    }

    #[test]
    fn test_try_begin_from_error_is_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir);
        store.update_status(AutomationStatus::Error, "boom").unwrap();

        assert!(store.try_begin(Admission::Fresh, "retry").is_ok());
    }

    #[test]
    fn test_resume_admission_only_from_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir);

        assert!(matches!(
            store.try_begin(Admission::Resume, "poll"),
            Err(AppError::Busy(AutomationStatus::Idle))
        ));

        store
            .update_status(AutomationStatus::WaitingForGeneration, "waiting")
            .unwrap();
        let prior = store.try_begin(Admission::Resume, "poll").unwrap();
        assert_eq!(prior.status, AutomationStatus::WaitingForGeneration);
        assert!(matches!(
            store.try_begin(Admission::Fresh, "full"),
            Err(AppError::Busy(AutomationStatus::Initializing))
        ));
    }

    #[test]
    fn test_reset_in_flight_keeps_waiting_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir);

        store.update_status(AutomationStatus::Downloading, "x").unwrap();
        assert!(store.reset_in_flight().unwrap());
        assert_eq!(store.get().status, AutomationStatus::Idle);

        store.update_status(AutomationStatus::AwaitingOtp, "Waiting for OTP...").unwrap();
        assert!(!store.reset_in_flight().unwrap());
        assert_eq!(store.get().status, AutomationStatus::AwaitingOtp);
    }

    #[test]
    fn test_concurrent_try_begin_admits_exactly_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(open_in(&dir));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || store.try_begin(Admission::Fresh, "race").is_ok())
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}

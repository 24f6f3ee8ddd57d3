//! 检查点存储 - 基础设施层
//!
//! 唯一持有输出目录的模块，负责队列 / 结果 / 错误 / 批次句柄的持久化。
//!
//! 目录结构：
//!
//! ```text
//! <processed_data>/<output_folder>/
//!     pair_queue.json     组合队列
//!     results.json        成功结果（只追加）
//!     errors.json         失败记录（只追加）
//!     batch_handle.json   未完成的批次（最多一个）
//!     status.json         队列摘要，供 has_pending_work 快速判断
//! ```
//!
//! 所有写入都是"写临时文件 → fsync → rename"，进程中途崩溃不会留下半截文件。

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::CheckpointError;
use crate::models::records::Keyed;
use crate::models::{BatchHandle, ErrorRecord, PairQueue, QueueCounts, ResultRecord};

const QUEUE_FILE: &str = "pair_queue.json";
const RESULTS_FILE: &str = "results.json";
const ERRORS_FILE: &str = "errors.json";
const HANDLE_FILE: &str = "batch_handle.json";
const STATUS_FILE: &str = "status.json";

/// 队列摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    pub counts: QueueCounts,
    pub complete: bool,
    pub updated_at: DateTime<Utc>,
}

impl QueueSummary {
    pub fn of(queue: &PairQueue) -> Self {
        Self {
            counts: queue.counts(),
            complete: queue.is_complete(),
            updated_at: Utc::now(),
        }
    }
}

/// 检查点存储
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    folder: PathBuf,
}

impl CheckpointStore {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    /// `<processed_data_dir>/<output_folder>`
    pub fn for_output(processed_data_dir: impl AsRef<Path>, output_folder: &str) -> Self {
        Self::new(processed_data_dir.as_ref().join(output_folder))
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    // ========== 组合队列 ==========

    /// 队列文件存在且非空
    pub fn queue_exists(&self) -> bool {
        fs::metadata(self.path(QUEUE_FILE))
            .map(|meta| meta.len() > 0)
            .unwrap_or(false)
    }

    /// 加载队列；首次运行（文件不存在）时返回 `None`
    pub fn load_queue(&self) -> Result<Option<PairQueue>, CheckpointError> {
        self.read_artifact(QUEUE_FILE)
    }

    /// 保存队列，并同步刷新摘要
    pub fn save_queue(&self, queue: &PairQueue) -> Result<(), CheckpointError> {
        self.write_artifact(QUEUE_FILE, queue)?;
        self.write_artifact(STATUS_FILE, &QueueSummary::of(queue))?;
        debug!("队列已保存: {} 个工作项", queue.len());
        Ok(())
    }

    pub fn load_summary(&self) -> Result<Option<QueueSummary>, CheckpointError> {
        self.read_artifact(STATUS_FILE)
    }

    /// 是否还有未完成的工作
    ///
    /// 只读取摘要文件；摘要缺失时才回退到加载整个队列。
    pub fn has_pending_work(&self) -> Result<bool, CheckpointError> {
        if !self.queue_exists() {
            return Ok(true);
        }
        if let Some(summary) = self.load_summary()? {
            return Ok(!summary.complete);
        }
        Ok(self.load_queue()?.map_or(true, |queue| !queue.is_complete()))
    }

    // ========== 结果 / 错误 ==========

    pub fn load_results(&self) -> Result<Vec<ResultRecord>, CheckpointError> {
        Ok(self.read_artifact(RESULTS_FILE)?.unwrap_or_default())
    }

    pub fn save_results(&self, results: &[ResultRecord]) -> Result<(), CheckpointError> {
        self.write_artifact(RESULTS_FILE, &results)
    }

    pub fn load_errors(&self) -> Result<Vec<ErrorRecord>, CheckpointError> {
        Ok(self.read_artifact(ERRORS_FILE)?.unwrap_or_default())
    }

    pub fn save_errors(&self, errors: &[ErrorRecord]) -> Result<(), CheckpointError> {
        self.write_artifact(ERRORS_FILE, &errors)
    }

    /// 追加新结果，已存在的主键会被跳过；返回实际追加的条数
    pub fn append_results(&self, new: &[ResultRecord]) -> Result<usize, CheckpointError> {
        self.append_unique(RESULTS_FILE, new)
    }

    /// 追加新错误，已存在的主键会被跳过；返回实际追加的条数
    pub fn append_errors(&self, new: &[ErrorRecord]) -> Result<usize, CheckpointError> {
        self.append_unique(ERRORS_FILE, new)
    }

    // ========== 批次句柄 ==========

    pub fn load_batch_handle(&self) -> Result<Option<BatchHandle>, CheckpointError> {
        self.read_artifact(HANDLE_FILE)
    }

    pub fn save_batch_handle(&self, handle: &BatchHandle) -> Result<(), CheckpointError> {
        self.write_artifact(HANDLE_FILE, handle)
    }

    pub fn clear_batch_handle(&self) -> Result<(), CheckpointError> {
        let path = self.path(HANDLE_FILE);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CheckpointError::io(path.display().to_string(), e)),
        }
    }

    // ========== 内部辅助 ==========

    fn path(&self, name: &str) -> PathBuf {
        self.folder.join(name)
    }

    fn append_unique<T>(&self, name: &str, new: &[T]) -> Result<usize, CheckpointError>
    where
        T: Keyed + Clone + Serialize + DeserializeOwned,
    {
        if new.is_empty() {
            return Ok(0);
        }

        let mut existing: Vec<T> = self.read_artifact(name)?.unwrap_or_default();
        let mut seen: HashSet<_> = existing.iter().map(Keyed::key).collect();
        let before = existing.len();

        for record in new {
            if seen.insert(record.key()) {
                existing.push(record.clone());
            }
        }

        let added = existing.len() - before;
        if added > 0 {
            self.write_artifact(name, &existing)?;
        }
        Ok(added)
    }

    fn read_artifact<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, CheckpointError> {
        let path = self.path(name);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CheckpointError::io(path.display().to_string(), e)),
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CheckpointError::corrupt(path.display().to_string(), e))
    }

    fn write_artifact<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
    ) -> Result<(), CheckpointError> {
        let path = self.path(name);
        fs::create_dir_all(&self.folder)
            .map_err(|e| CheckpointError::io(self.folder.display().to_string(), e))?;

        let bytes = serde_json::to_vec(value).map_err(|source| CheckpointError::Serialize {
            path: path.display().to_string(),
            source,
        })?;

        atomic_write_bytes(&path, &bytes)
            .map_err(|e| CheckpointError::io(path.display().to_string(), e))
    }
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Outcome, WorkItemKey};

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn result(entity: &str, question: &str, payload: &str) -> ResultRecord {
        ResultRecord {
            entity_id: entity.to_string(),
            question_id: question.to_string(),
            payload: payload.to_string(),
            batch_id: "b1".to_string(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_run_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::for_output(dir.path(), "run_a");

        assert!(!store.queue_exists());
        assert!(store.load_queue().unwrap().is_none());
        assert!(store.load_results().unwrap().is_empty());
        assert!(store.load_errors().unwrap().is_empty());
        assert!(store.load_batch_handle().unwrap().is_none());
        assert!(store.has_pending_work().unwrap());
        // 清除不存在的句柄不是错误
        store.clear_batch_handle().unwrap();
    }

    #[test]
    fn test_queue_round_trip_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("run"));

        let mut queue = PairQueue::build(&ids(&["M1", "M2"]), &ids(&["Q1", "Q2"]), &[]);
        let keys = vec![WorkItemKey::new("M1", "Q1"), WorkItemKey::new("M1", "Q2")];
        queue.mark_submitted(&keys, "b1").unwrap();
        queue.apply_outcome(&keys[0], Outcome::success("yes")).unwrap();
        queue.apply_outcome(&keys[1], Outcome::failure("timeout")).unwrap();
        queue
            .mark_submitted(&[WorkItemKey::new("M2", "Q1")], "b2")
            .unwrap();

        store.save_queue(&queue).unwrap();
        let restored = store.load_queue().unwrap().unwrap();
        assert_eq!(restored, queue);

        let summary = store.load_summary().unwrap().unwrap();
        assert_eq!(summary.counts, queue.counts());
        assert!(!summary.complete);
        assert!(store.has_pending_work().unwrap());

        // 不应残留临时文件
        assert!(!store.folder().join("pair_queue.json.tmp").exists());
    }

    #[test]
    fn test_has_pending_work_false_once_complete() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let mut queue = PairQueue::build(&ids(&["M1"]), &ids(&["Q1"]), &[]);
        let key = WorkItemKey::new("M1", "Q1");
        queue.mark_submitted(&[key.clone()], "b1").unwrap();
        queue.apply_outcome(&key, Outcome::success("yes")).unwrap();
        store.save_queue(&queue).unwrap();
        assert!(!store.has_pending_work().unwrap());

        // 摘要丢失时回退到读取队列
        fs::remove_file(dir.path().join(STATUS_FILE)).unwrap();
        assert!(!store.has_pending_work().unwrap());
    }

    #[test]
    fn test_corrupt_queue_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        fs::write(dir.path().join(QUEUE_FILE), b"{not json").unwrap();

        let err = store.load_queue().unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }

    #[test]
    fn test_corrupt_handle_is_fatal_but_empty_file_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        fs::write(dir.path().join(HANDLE_FILE), b"").unwrap();
        assert!(store.load_batch_handle().unwrap().is_none());

        fs::write(dir.path().join(HANDLE_FILE), b"garbage").unwrap();
        assert!(matches!(
            store.load_batch_handle(),
            Err(CheckpointError::Corrupt { .. })
        ));
    }

    #[test]
    fn test_batch_handle_save_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        let handle = BatchHandle::new("batch_abc", vec![WorkItemKey::new("M1", "Q1")]);
        store.save_batch_handle(&handle).unwrap();
        assert_eq!(store.load_batch_handle().unwrap(), Some(handle));

        store.clear_batch_handle().unwrap();
        assert!(store.load_batch_handle().unwrap().is_none());
    }

    #[test]
    fn test_append_results_skips_existing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());

        assert_eq!(store.append_results(&[result("M1", "Q1", "yes")]).unwrap(), 1);
        assert_eq!(
            store
                .append_results(&[result("M1", "Q1", "yes"), result("M2", "Q1", "no")])
                .unwrap(),
            1
        );
        assert_eq!(store.append_results(&[]).unwrap(), 0);

        let results = store.load_results().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].payload, "no");
    }
}

//! 结果合并服务
//!
//! 把一个批次的结果写回组合队列，生成本次新增的结果 / 错误记录。
//! 对同一组结果重复合并是安全的：已进入终态的工作项会被跳过。

use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::error::TransitionError;
use crate::models::{
    BatchHandle, ErrorRecord, Outcome, PairQueue, ResultRecord, WorkItemKey, WorkStatus,
};

/// 批次结果中缺失某个工作项时记录的错误信息
pub const MISSING_RESULT_DETAIL: &str = "missing result";

/// 单次合并的产出
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeReport {
    /// 本次新完成的结果
    pub new_results: Vec<ResultRecord>,
    /// 本次新增的错误（含结果缺失）
    pub new_errors: Vec<ErrorRecord>,
    /// 被跳过的结果条数（已是终态 / 不在队列中 / 重复）
    pub skipped: usize,
    /// 因结果缺失而标记为失败的条数
    pub missing: usize,
}

impl MergeReport {
    pub fn is_empty(&self) -> bool {
        self.new_results.is_empty() && self.new_errors.is_empty()
    }
}

/// 合并批次结果
///
/// # 参数
/// - `queue`: 组合队列（原地更新）
/// - `handle`: 结果所属的批次；其中仍为 Submitted 且结果缺失的工作项标记为 "missing result"
/// - `outcomes`: 服务端返回的结果
///
/// # 返回
/// 只返回本次新产生的记录，不包含历史记录
pub fn merge(
    queue: &mut PairQueue,
    handle: &BatchHandle,
    outcomes: Vec<(WorkItemKey, Outcome)>,
) -> Result<MergeReport, TransitionError> {
    let mut report = MergeReport::default();
    let mut answered: HashSet<WorkItemKey> = HashSet::with_capacity(outcomes.len());

    for (key, outcome) in outcomes {
        answered.insert(key.clone());
        match queue.get(&key).map(|item| item.status()) {
            Some(WorkStatus::Submitted) => {
                apply(queue, &handle.batch_id, &key, outcome, &mut report)?;
            }
            Some(status) => {
                debug!("跳过 {}: 当前状态 {}", key, status);
                report.skipped += 1;
            }
            None => {
                warn!("⚠️ 批次 {} 返回了队列中不存在的工作项 {}", handle.batch_id, key);
                report.skipped += 1;
            }
        }
    }

    for key in &handle.keys {
        if answered.contains(key) {
            continue;
        }
        let still_submitted = queue
            .get(key)
            .is_some_and(|item| item.status() == WorkStatus::Submitted);
        if still_submitted {
            apply(
                queue,
                &handle.batch_id,
                key,
                Outcome::failure(MISSING_RESULT_DETAIL),
                &mut report,
            )?;
            report.missing += 1;
        }
    }

    if report.missing > 0 {
        warn!(
            "⚠️ 批次 {} 中有 {} 个工作项没有返回结果",
            handle.batch_id, report.missing
        );
    }

    Ok(report)
}

fn apply(
    queue: &mut PairQueue,
    batch_id: &str,
    key: &WorkItemKey,
    outcome: Outcome,
    report: &mut MergeReport,
) -> Result<(), TransitionError> {
    queue.apply_outcome(key, outcome.clone())?;

    let recorded_at = Utc::now();
    match outcome {
        Outcome::Success { payload } => report.new_results.push(ResultRecord {
            entity_id: key.entity_id.clone(),
            question_id: key.question_id.clone(),
            payload,
            batch_id: batch_id.to_string(),
            recorded_at,
        }),
        Outcome::Failure { detail } => report.new_errors.push(ErrorRecord {
            entity_id: key.entity_id.clone(),
            question_id: key.question_id.clone(),
            detail,
            batch_id: batch_id.to_string(),
            recorded_at,
        }),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn key(entity: &str, question: &str) -> WorkItemKey {
        WorkItemKey::new(entity, question)
    }

    fn submitted_queue() -> (PairQueue, BatchHandle) {
        let mut queue = PairQueue::build(&ids(&["M1", "M2"]), &ids(&["Q1", "Q2"]), &[]);
        let keys: Vec<_> = queue.items().iter().map(|i| i.key()).collect();
        queue.mark_submitted(&keys, "batch_1").unwrap();
        (queue, BatchHandle::new("batch_1", keys))
    }

    fn scenario_outcomes() -> Vec<(WorkItemKey, Outcome)> {
        vec![
            (key("M1", "Q1"), Outcome::success("yes")),
            (key("M1", "Q2"), Outcome::failure("timeout")),
            (key("M2", "Q1"), Outcome::success("no")),
        ]
    }

    #[test]
    fn test_merge_with_missing_outcome() {
        let (mut queue, handle) = submitted_queue();

        let report = merge(&mut queue, &handle, scenario_outcomes()).unwrap();

        assert_eq!(report.new_results.len(), 2);
        assert_eq!(report.new_errors.len(), 2);
        assert_eq!(report.missing, 1);

        let m2q2 = queue.get(&key("M2", "Q2")).unwrap();
        assert_eq!(m2q2.status(), WorkStatus::Errored);
        assert_eq!(m2q2.error_detail(), Some(MISSING_RESULT_DETAIL));
        assert_eq!(
            queue.get(&key("M1", "Q2")).unwrap().error_detail(),
            Some("timeout")
        );
        assert_eq!(queue.get(&key("M2", "Q1")).unwrap().payload(), Some("no"));
        assert!(queue.is_complete());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let (mut queue, handle) = submitted_queue();
        merge(&mut queue, &handle, scenario_outcomes()).unwrap();
        let after_first = queue.clone();

        let report = merge(&mut queue, &handle, scenario_outcomes()).unwrap();

        assert!(report.is_empty());
        assert_eq!(report.skipped, 3);
        assert_eq!(report.missing, 0);
        assert_eq!(queue, after_first);
    }

    #[test]
    fn test_terminal_items_never_regress() {
        let (mut queue, handle) = submitted_queue();
        merge(&mut queue, &handle, scenario_outcomes()).unwrap();

        // 同一批次稍后又报告了不同的结果
        let late = vec![
            (key("M1", "Q1"), Outcome::failure("late failure")),
            (key("M2", "Q2"), Outcome::success("late answer")),
        ];
        merge(&mut queue, &handle, late).unwrap();

        assert_eq!(queue.get(&key("M1", "Q1")).unwrap().status(), WorkStatus::Completed);
        assert_eq!(queue.get(&key("M2", "Q2")).unwrap().status(), WorkStatus::Errored);
    }

    #[test]
    fn test_unknown_and_duplicate_outcomes_are_skipped() {
        let (mut queue, handle) = submitted_queue();
        let outcomes = vec![
            (key("M9", "Q1"), Outcome::success("stray")),
            (key("M1", "Q1"), Outcome::success("first")),
            (key("M1", "Q1"), Outcome::success("second")),
        ];

        let report = merge(&mut queue, &handle, outcomes).unwrap();

        assert_eq!(report.skipped, 2);
        assert_eq!(queue.get(&key("M1", "Q1")).unwrap().payload(), Some("first"));
        assert_eq!(report.missing, 3);
    }
}

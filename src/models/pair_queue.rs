//! 组合队列
//!
//! 持有全部（市镇, 问题）工作项及其状态，是检查点中最核心的数据。

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::TransitionError;
use crate::models::work_item::{Outcome, WorkItem, WorkItemKey, WorkStatus};

/// 各状态的数量统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub submitted: usize,
    pub completed: usize,
    pub errored: usize,
}

impl QueueCounts {
    pub fn total(&self) -> usize {
        self.pending + self.submitted + self.completed + self.errored
    }

    pub fn is_complete(&self) -> bool {
        self.pending == 0 && self.submitted == 0
    }
}

/// 组合队列
///
/// 序列化为工作项数组；反序列化时重建索引，并拒绝重复主键或状态字段不一致的数据。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<WorkItem>", into = "Vec<WorkItem>")]
pub struct PairQueue {
    items: Vec<WorkItem>,
    index: HashMap<WorkItemKey, usize>,
}

impl PairQueue {
    /// 构建市镇 × （问题 − 排除项）的完整组合，全部为 Pending
    ///
    /// 顺序为市镇优先；输入中的重复 ID 不会产生重复工作项。
    pub fn build(entities: &[String], questions: &[String], exclusions: &[String]) -> Self {
        let excluded: HashSet<&str> = exclusions.iter().map(String::as_str).collect();
        let mut queue = Self::default();

        for entity_id in entities {
            for question_id in questions {
                if excluded.contains(question_id.as_str()) {
                    continue;
                }
                let key = WorkItemKey::new(entity_id.clone(), question_id.clone());
                if queue.index.contains_key(&key) {
                    continue;
                }
                queue.index.insert(key.clone(), queue.items.len());
                queue.items.push(WorkItem::pending(key));
            }
        }

        queue
    }

    /// 按顺序返回所有 Pending 工作项
    pub fn select_pending(&self) -> Vec<&WorkItem> {
        self.items
            .iter()
            .filter(|item| item.status() == WorkStatus::Pending)
            .collect()
    }

    /// 将一组工作项标记为已提交
    ///
    /// 先校验全部主键，任意一个不是 Pending 时整体失败，队列保持不变。
    pub fn mark_submitted(
        &mut self,
        keys: &[WorkItemKey],
        batch_id: &str,
    ) -> Result<(), TransitionError> {
        let mut positions = Vec::with_capacity(keys.len());
        for key in keys {
            let pos = self.position(key)?;
            self.items[pos].check_submit()?;
            positions.push(pos);
        }

        for pos in positions {
            self.items[pos].submit(batch_id)?;
        }
        Ok(())
    }

    /// 应用单个结果：Submitted → Completed / Errored
    pub fn apply_outcome(
        &mut self,
        key: &WorkItemKey,
        outcome: Outcome,
    ) -> Result<(), TransitionError> {
        let pos = self.position(key)?;
        self.items[pos].resolve(outcome)
    }

    /// 没有任何 Pending 或 Submitted 工作项
    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|item| item.status().is_terminal())
    }

    pub fn get(&self, key: &WorkItemKey) -> Option<&WorkItem> {
        self.index.get(key).map(|&pos| &self.items[pos])
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn submitted_keys(&self) -> Vec<WorkItemKey> {
        self.items
            .iter()
            .filter(|item| item.status() == WorkStatus::Submitted)
            .map(WorkItem::key)
            .collect()
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for item in &self.items {
            match item.status() {
                WorkStatus::Pending => counts.pending += 1,
                WorkStatus::Submitted => counts.submitted += 1,
                WorkStatus::Completed => counts.completed += 1,
                WorkStatus::Errored => counts.errored += 1,
            }
        }
        counts
    }

    fn position(&self, key: &WorkItemKey) -> Result<usize, TransitionError> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| TransitionError::UnknownKey { key: key.clone() })
    }
}

impl TryFrom<Vec<WorkItem>> for PairQueue {
    type Error = String;

    fn try_from(items: Vec<WorkItem>) -> Result<Self, Self::Error> {
        let mut index = HashMap::with_capacity(items.len());
        for (pos, item) in items.iter().enumerate() {
            if !item.is_consistent() {
                return Err(format!(
                    "工作项 {} 的字段与状态 {} 不一致",
                    item.key(),
                    item.status()
                ));
            }
            if index.insert(item.key(), pos).is_some() {
                return Err(format!("重复的工作项 {}", item.key()));
            }
        }
        Ok(Self { items, index })
    }
}

impl From<PairQueue> for Vec<WorkItem> {
    fn from(queue: PairQueue) -> Self {
        queue.items
    }
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

    #[test]
    fn test_build_cross_product_without_exclusions() {
        let queue = PairQueue::build(&ids(&["M1", "M2"]), &ids(&["Q1", "Q2"]), &[]);

        assert_eq!(queue.len(), 4);
        assert!(queue.items().iter().all(|i| i.status() == WorkStatus::Pending));
        let keys: Vec<_> = queue.items().iter().map(WorkItem::key).collect();
        assert_eq!(
            keys,
            vec![key("M1", "Q1"), key("M1", "Q2"), key("M2", "Q1"), key("M2", "Q2")]
        );
    }

    #[test]
    fn test_build_skips_excluded_and_duplicate_ids() {
        let queue = PairQueue::build(
            &ids(&["M1", "M2", "M1"]),
            &ids(&["10", "11", "12", "13", "15", "13"]),
            &ids(&["11", "12", "15"]),
        );

        assert_eq!(queue.len(), 4);
        let mut seen = HashSet::new();
        for item in queue.items() {
            assert!(seen.insert(item.key()), "重复工作项 {}", item.key());
            assert!(!["11", "12", "15"].contains(&item.question_id()));
        }
    }

    #[test]
    fn test_mark_submitted_is_all_or_nothing() {
        let mut queue = PairQueue::build(&ids(&["M1"]), &ids(&["Q1", "Q2"]), &[]);
        queue.mark_submitted(&[key("M1", "Q1")], "b1").unwrap();

        let err = queue
            .mark_submitted(&[key("M1", "Q2"), key("M1", "Q1")], "b2")
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
        assert_eq!(queue.get(&key("M1", "Q2")).unwrap().status(), WorkStatus::Pending);
        assert_eq!(queue.get(&key("M1", "Q1")).unwrap().batch_id(), Some("b1"));

        let err = queue.mark_submitted(&[key("M9", "Q1")], "b2").unwrap_err();
        assert_eq!(err, TransitionError::UnknownKey { key: key("M9", "Q1") });
    }

    #[test]
    fn test_apply_outcome_requires_submitted() {
        let mut queue = PairQueue::build(&ids(&["M1"]), &ids(&["Q1"]), &[]);
        assert!(queue
            .apply_outcome(&key("M1", "Q1"), Outcome::success("yes"))
            .is_err());

        queue.mark_submitted(&[key("M1", "Q1")], "b1").unwrap();
        queue
            .apply_outcome(&key("M1", "Q1"), Outcome::success("yes"))
            .unwrap();

        // 终态不可再变
        let err = queue
            .apply_outcome(&key("M1", "Q1"), Outcome::failure("late"))
            .unwrap_err();
        assert!(matches!(
            err,
            TransitionError::InvalidTransition {
                from: WorkStatus::Completed,
                ..
            }
        ));
        assert_eq!(queue.get(&key("M1", "Q1")).unwrap().payload(), Some("yes"));
    }

    #[test]
    fn test_is_complete_and_counts() {
        let mut queue = PairQueue::build(&ids(&["M1"]), &ids(&["Q1", "Q2"]), &[]);
        assert!(!queue.is_complete());
        assert_eq!(queue.select_pending().len(), 2);

        let keys = vec![key("M1", "Q1"), key("M1", "Q2")];
        queue.mark_submitted(&keys, "b1").unwrap();
        assert!(!queue.is_complete());
        assert!(queue.select_pending().is_empty());
        assert_eq!(queue.submitted_keys(), keys);

        queue.apply_outcome(&keys[0], Outcome::success("yes")).unwrap();
        queue.apply_outcome(&keys[1], Outcome::failure("timeout")).unwrap();
        assert!(queue.is_complete());
        assert_eq!(
            queue.counts(),
            QueueCounts {
                pending: 0,
                submitted: 0,
                completed: 1,
                errored: 1
            }
        );
    }

    #[test]
    fn test_empty_queue_is_complete() {
        let queue = PairQueue::build(&[], &ids(&["Q1"]), &[]);
        assert!(queue.is_empty());
        assert!(queue.is_complete());
    }

    #[test]
    fn test_json_round_trip_with_mixed_statuses() {
        let mut queue = PairQueue::build(&ids(&["M1", "M2"]), &ids(&["Q1", "Q2"]), &[]);
        queue
            .mark_submitted(&[key("M1", "Q1"), key("M1", "Q2"), key("M2", "Q1")], "b1")
            .unwrap();
        queue.apply_outcome(&key("M1", "Q1"), Outcome::success("yes")).unwrap();
        queue.apply_outcome(&key("M1", "Q2"), Outcome::failure("timeout")).unwrap();

        let json = serde_json::to_string(&queue).unwrap();
        let restored: PairQueue = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, queue);
        assert_eq!(restored.get(&key("M2", "Q1")).unwrap().status(), WorkStatus::Submitted);
        assert_eq!(restored.get(&key("M2", "Q2")).unwrap().status(), WorkStatus::Pending);
    }

    #[test]
    fn test_deserialize_rejects_duplicates() {
        let json = r#"[
            {"entity_id": "M1", "question_id": "Q1", "status": "pending"},
            {"entity_id": "M1", "question_id": "Q1", "status": "pending"}
        ]"#;
        let err = serde_json::from_str::<PairQueue>(json).unwrap_err();
        assert!(err.to_string().contains("重复"));
    }

    #[test]
    fn test_deserialize_rejects_inconsistent_item() {
        let json = r#"[{"entity_id": "M1", "question_id": "Q1", "status": "completed"}]"#;
        assert!(serde_json::from_str::<PairQueue>(json).is_err());
    }
}

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use chronoforge_core::models::{RunResult, TaskExecutionRecord, TaskSpec, TaskState};
use chronoforge_core::{SchedulerError, SchedulerResult};

/// 任务生命周期状态机
///
/// 合法的状态转换：
///
/// ```text
/// Idle      → Scheduled
/// Scheduled → Running | Idle
/// Running   → Succeeded | PartiallyFailed | Failed
/// Succeeded | PartiallyFailed | Failed → Idle
/// 任意非 Running 状态 → Removed
/// ```
#[derive(Debug, Clone)]
pub struct TaskStateMachine {
    state: TaskState,
}

impl TaskStateMachine {
    pub fn new() -> Self {
        Self {
            state: TaskState::Idle,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn can_transition(from: TaskState, to: TaskState) -> bool {
        use TaskState::*;
        match (from, to) {
            (Idle, Scheduled) => true,
            (Scheduled, Running) | (Scheduled, Idle) => true,
            (Running, Succeeded) | (Running, PartiallyFailed) | (Running, Failed) => true,
            (Succeeded, Idle) | (PartiallyFailed, Idle) | (Failed, Idle) => true,
            (Removed, _) => false,
            (Running, Removed) => false,
            (_, Removed) => true,
            _ => false,
        }
    }

    /// 执行状态转换，返回转换前的状态
    pub fn transition(&mut self, to: TaskState) -> SchedulerResult<TaskState> {
        let from = self.state;
        if !Self::can_transition(from, to) {
            return Err(SchedulerError::InvalidState(format!(
                "非法的状态转换: {from} -> {to}"
            )));
        }
        self.state = to;
        Ok(from)
    }
}

impl Default for TaskStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

/// 触发去重标记：记录最近一次已消费的触发时刻（点触发时刻或窗口起点）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotTracker {
    pub last_fired_ms: Option<i64>,
}

impl SlotTracker {
    pub fn has_fired(&self, occurrence_ms: i64) -> bool {
        self.last_fired_ms.is_some_and(|last| last >= occurrence_ms)
    }

    pub fn mark_fired(&mut self, occurrence_ms: i64) {
        self.last_fired_ms = Some(occurrence_ms);
    }
}

/// 任务表中的一项
#[derive(Debug, Clone)]
pub struct TaskEntry {
    spec: Arc<TaskSpec>,
    machine: TaskStateMachine,
    pub tracker: SlotTracker,
    history: VecDeque<TaskExecutionRecord>,
    history_capacity: usize,
    run_count: u64,
    last_result: Option<RunResult>,
    pub next_fire_ms: Option<i64>,
}

impl TaskEntry {
    pub fn new(spec: TaskSpec, history_capacity: usize) -> Self {
        Self {
            spec: Arc::new(spec),
            machine: TaskStateMachine::new(),
            tracker: SlotTracker::default(),
            history: VecDeque::with_capacity(history_capacity),
            history_capacity: history_capacity.max(1),
            run_count: 0,
            last_result: None,
            next_fire_ms: None,
        }
    }

    pub fn spec(&self) -> &Arc<TaskSpec> {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn state(&self) -> TaskState {
        self.machine.state()
    }

    pub fn transition(&mut self, to: TaskState) -> SchedulerResult<TaskState> {
        let from = self.machine.transition(to)?;
        debug!(task.name = %self.spec.name, from = %from, to = %to, "任务状态转换");
        Ok(from)
    }

    /// 运行结束后回到 Idle，等待下一次触发
    pub fn settle(&mut self) {
        if self.state().is_run_terminal() {
            // 终止状态到 Idle 总是合法的
            let _ = self.transition(TaskState::Idle);
        }
    }

    /// 保存执行记录；跳过记录不计入运行次数
    pub fn push_record(&mut self, record: TaskExecutionRecord) {
        if record.result != RunResult::Skipped {
            self.run_count += 1;
            self.last_result = Some(record.result);
        }
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    /// 最近的执行记录，最新的在前
    pub fn recent_runs(&self) -> Vec<TaskExecutionRecord> {
        self.history.iter().rev().cloned().collect()
    }

    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    pub fn last_result(&self) -> Option<RunResult> {
        self.last_result
    }
}

/// 调度器的任务表，按任务名排序
#[derive(Debug, Clone)]
pub struct TaskTable {
    entries: BTreeMap<String, TaskEntry>,
    history_capacity: usize,
}

impl TaskTable {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            history_capacity,
        }
    }

    pub fn insert(&mut self, spec: TaskSpec) -> SchedulerResult<&TaskEntry> {
        let name = spec.name.clone();
        if self.entries.contains_key(&name) {
            return Err(SchedulerError::TaskAlreadyExists { name });
        }
        let capacity = self.history_capacity;
        Ok(self
            .entries
            .entry(name)
            .or_insert_with(|| TaskEntry::new(spec, capacity)))
    }

    /// 替换任务定义；保留执行历史与去重标记，运行中的任务不允许替换
    pub fn replace(&mut self, spec: TaskSpec) -> SchedulerResult<()> {
        let entry = self
            .entries
            .get_mut(&spec.name)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                name: spec.name.clone(),
            })?;
        if entry.state().is_busy() {
            return Err(SchedulerError::TaskRunning {
                name: spec.name.clone(),
            });
        }
        if entry.spec.time_slot != spec.time_slot {
            entry.tracker = SlotTracker::default();
            entry.next_fire_ms = None;
        }
        entry.spec = Arc::new(spec);
        Ok(())
    }

    /// 删除任务；Running 状态的任务拒绝删除
    pub fn remove(&mut self, name: &str) -> SchedulerResult<TaskEntry> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| SchedulerError::TaskNotFound {
                name: name.to_string(),
            })?;
        if entry.state() == TaskState::Running {
            return Err(SchedulerError::TaskRunning {
                name: name.to_string(),
            });
        }
        entry.transition(TaskState::Removed)?;
        self.entries
            .remove(name)
            .ok_or_else(|| SchedulerError::Internal(format!("任务表不一致: {name}")))
    }

    pub fn get(&self, name: &str) -> Option<&TaskEntry> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TaskEntry> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskEntry> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TaskEntry> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! The MapReduce coordinator.
//!
//! The coordinator is passive: workers drive every state change by
//! calling `GetTask` and `ReportTask`. All bookkeeping lives in a
//! [`TaskTable`] guarded by one mutex; handlers take the lock, make a
//! transition, and release it without doing any I/O in between.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Result;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use crate::intermediate_file;
use crate::rpc::coordinator_server::{Coordinator, CoordinatorServer};
use crate::rpc::{GetTaskReply, GetTaskRequest, ReportTaskReply, ReportTaskRequest, TaskType};

/// How long a dispatched task may go unreported before it is handed
/// back to the idle pool. Must comfortably exceed the runtime of any
/// single task in the target workload.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the serving loop checks whether the job has finished.
const DONE_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Grace period after completion so draining workers can still pick
/// up their `Exit` replies before the endpoint disappears.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Lifecycle of a single task. The dispatch timestamp only exists
/// while the task is actually out with a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Idle,
    InProgress { since: Instant },
    Completed,
}

/// Which task table a completion report refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Map,
    Reduce,
}

/// A work order handed to a worker in reply to `GetTask`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Map {
        task_id: u32,
        file: String,
        n_reduce: u32,
    },
    Reduce {
        task_id: u32,
        files: Vec<String>,
        n_reduce: u32,
    },
    Wait,
    Exit,
}

/// Bookkeeping for every map and reduce task of one job.
///
/// Reduce tasks are only dispatched once every map task has completed,
/// and `all_done` never goes back to `false` once set.
pub struct TaskTable {
    input_files: Vec<String>,
    map_tasks: Vec<TaskState>,
    reduce_tasks: Vec<TaskState>,
    n_reduce: u32,
    map_done: bool,
    all_done: bool,
}

impl TaskTable {
    /// One map task per input file, `n_reduce` reduce tasks.
    pub fn new(input_files: Vec<String>, n_reduce: u32) -> Self {
        let map_tasks = vec![TaskState::Idle; input_files.len()];
        let mut reduce_tasks = vec![TaskState::Idle; n_reduce as usize];
        let map_done = input_files.is_empty();
        let mut all_done = false;
        if map_done {
            // Nothing to map means there is nothing for any reducer to
            // consume either; the job is vacuously complete.
            reduce_tasks.fill(TaskState::Completed);
            all_done = true;
        }
        Self {
            input_files,
            map_tasks,
            reduce_tasks,
            n_reduce,
            map_done,
            all_done,
        }
    }

    /// Pick the next piece of work for a worker asking at time `now`.
    ///
    /// Stalled assignments are reaped first, then idle map tasks are
    /// handed out in index order. Reduce tasks only become eligible
    /// once every map task has completed.
    pub fn assign(&mut self, now: Instant) -> Assignment {
        reap_stalled(&mut self.map_tasks, "map", now);
        reap_stalled(&mut self.reduce_tasks, "reduce", now);

        if !self.map_done {
            if let Some(id) = first_idle(&self.map_tasks) {
                self.map_tasks[id] = TaskState::InProgress { since: now };
                return Assignment::Map {
                    task_id: id as u32,
                    file: self.input_files[id].clone(),
                    n_reduce: self.n_reduce,
                };
            }
            if self.map_tasks.iter().all(|t| *t == TaskState::Completed) {
                self.map_done = true;
                info!("map phase complete, dispatching reduce tasks");
            } else {
                return Assignment::Wait;
            }
        }

        if let Some(id) = first_idle(&self.reduce_tasks) {
            self.reduce_tasks[id] = TaskState::InProgress { since: now };
            let files = (0..self.input_files.len())
                .map(|m| intermediate_file(m as u32, id as u32))
                .collect();
            return Assignment::Reduce {
                task_id: id as u32,
                files,
                n_reduce: self.n_reduce,
            };
        }

        if self.reduce_tasks.iter().all(|t| *t == TaskState::Completed) {
            self.all_done = true;
            Assignment::Exit
        } else {
            Assignment::Wait
        }
    }

    /// Record a worker's completion report.
    ///
    /// Success always marks the task completed: even a report from a
    /// worker whose assignment was reaped proves the output file now
    /// exists, so it is honored (and duplicates are no-ops). Failure
    /// only requeues a task that is still out with a worker; a
    /// completed task stays completed.
    pub fn report(&mut self, kind: TaskKind, task_id: u32, success: bool) {
        let tasks = match kind {
            TaskKind::Map => &mut self.map_tasks,
            TaskKind::Reduce => &mut self.reduce_tasks,
        };
        let Some(task) = tasks.get_mut(task_id as usize) else {
            warn!("ignoring report for out-of-range {kind:?} task {task_id}");
            return;
        };

        match (*task, success) {
            (_, true) => *task = TaskState::Completed,
            (TaskState::InProgress { .. }, false) => {
                warn!("{kind:?} task {task_id} failed, returning it to the pool");
                *task = TaskState::Idle;
            }
            // A failure report for a task that is not in progress is
            // stale (the stall reaper or another worker got there
            // first) and carries no information.
            (_, false) => {}
        }

        if kind == TaskKind::Reduce
            && !self.all_done
            && self.reduce_tasks.iter().all(|t| *t == TaskState::Completed)
        {
            self.all_done = true;
            info!("all reduce tasks complete");
        }
    }

    /// Whether every reduce task has completed. Monotone: once true,
    /// stays true.
    pub fn done(&self) -> bool {
        self.all_done
    }
}

fn first_idle(tasks: &[TaskState]) -> Option<usize> {
    tasks.iter().position(|t| *t == TaskState::Idle)
}

fn reap_stalled(tasks: &mut [TaskState], kind: &str, now: Instant) {
    for (id, task) in tasks.iter_mut().enumerate() {
        if let TaskState::InProgress { since } = *task {
            if now.duration_since(since) > STALL_TIMEOUT {
                warn!("{kind} task {id} stalled, returning it to the pool");
                *task = TaskState::Idle;
            }
        }
    }
}

/// The gRPC surface workers talk to. All handlers serialize through
/// the one table mutex.
pub struct CoordinatorService {
    table: Arc<Mutex<TaskTable>>,
}

impl CoordinatorService {
    pub fn new(input_files: Vec<String>, n_reduce: u32) -> Self {
        Self {
            table: Arc::new(Mutex::new(TaskTable::new(input_files, n_reduce))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[tonic::async_trait]
impl Coordinator for CoordinatorService {
    async fn get_task(
        &self,
        _request: Request<GetTaskRequest>,
    ) -> Result<Response<GetTaskReply>, Status> {
        let assignment = self.lock().assign(Instant::now());
        let reply = match assignment {
            Assignment::Map {
                task_id,
                file,
                n_reduce,
            } => {
                info!("dispatching map task {task_id} ({file})");
                GetTaskReply {
                    task_type: TaskType::Map as i32,
                    task_id,
                    file,
                    n_reduce,
                    ..Default::default()
                }
            }
            Assignment::Reduce {
                task_id,
                files,
                n_reduce,
            } => {
                info!("dispatching reduce task {task_id}");
                GetTaskReply {
                    task_type: TaskType::Reduce as i32,
                    task_id,
                    files,
                    n_reduce,
                    ..Default::default()
                }
            }
            Assignment::Wait => GetTaskReply {
                task_type: TaskType::Wait as i32,
                ..Default::default()
            },
            Assignment::Exit => GetTaskReply {
                task_type: TaskType::Exit as i32,
                ..Default::default()
            },
        };
        Ok(Response::new(reply))
    }

    async fn report_task(
        &self,
        request: Request<ReportTaskRequest>,
    ) -> Result<Response<ReportTaskReply>, Status> {
        let req = request.into_inner();
        let kind = match req.task_type() {
            TaskType::Map => TaskKind::Map,
            TaskType::Reduce => TaskKind::Reduce,
            // Only map and reduce tasks are reportable.
            _ => return Ok(Response::new(ReportTaskReply {})),
        };
        self.lock().report(kind, req.task_id, req.success);
        Ok(Response::new(ReportTaskReply {}))
    }
}

/// Serve the coordinator on `listener` until every reduce task has
/// completed, then drain briefly and shut down. Returns once the
/// server has stopped.
pub async fn serve(listener: TcpListener, input_files: Vec<String>, n_reduce: u32) -> Result<()> {
    let service = CoordinatorService::new(input_files, n_reduce);
    let table = Arc::clone(&service.table);

    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        loop {
            if table.lock().unwrap_or_else(|e| e.into_inner()).done() {
                let _ = tx.send(());
                break;
            }
            tokio::time::sleep(DONE_POLL_INTERVAL).await;
        }
    });

    info!("coordinator listening on {}", listener.local_addr()?);
    Server::builder()
        .add_service(CoordinatorServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
            rx.await.ok();
            info!("job complete, shutting down");
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(n_map: usize, n_reduce: u32) -> TaskTable {
        let files = (0..n_map).map(|i| format!("in-{i}.txt")).collect();
        TaskTable::new(files, n_reduce)
    }

    fn complete_all_maps(table: &mut TaskTable, n_map: usize, now: Instant) {
        for id in 0..n_map {
            assert!(matches!(table.assign(now), Assignment::Map { .. }));
            table.report(TaskKind::Map, id as u32, true);
        }
    }

    #[test]
    fn maps_dispatched_in_index_order() {
        let mut t = table(3, 2);
        let now = Instant::now();
        for expect in 0..3u32 {
            match t.assign(now) {
                Assignment::Map {
                    task_id,
                    file,
                    n_reduce,
                } => {
                    assert_eq!(task_id, expect);
                    assert_eq!(file, format!("in-{expect}.txt"));
                    assert_eq!(n_reduce, 2);
                }
                other => panic!("expected a map task, got {other:?}"),
            }
        }
        // Everything is out with workers now; newcomers wait.
        assert_eq!(t.assign(now), Assignment::Wait);
    }

    #[test]
    fn no_reduce_until_every_map_completes() {
        let mut t = table(2, 2);
        let now = Instant::now();
        assert!(matches!(t.assign(now), Assignment::Map { .. }));
        assert!(matches!(t.assign(now), Assignment::Map { .. }));

        t.report(TaskKind::Map, 0, true);
        assert_eq!(t.assign(now), Assignment::Wait);

        t.report(TaskKind::Map, 1, true);
        match t.assign(now) {
            Assignment::Reduce {
                task_id,
                files,
                n_reduce,
            } => {
                assert_eq!(task_id, 0);
                assert_eq!(files, vec!["mr-0-0".to_string(), "mr-1-0".to_string()]);
                assert_eq!(n_reduce, 2);
            }
            other => panic!("expected a reduce task, got {other:?}"),
        }
    }

    #[test]
    fn in_flight_task_is_not_double_dispatched() {
        let mut t = table(1, 1);
        let now = Instant::now();
        assert!(matches!(t.assign(now), Assignment::Map { task_id: 0, .. }));
        assert_eq!(t.assign(now), Assignment::Wait);
    }

    #[test]
    fn stalled_task_is_reaped_and_reassigned() {
        let mut t = table(1, 1);
        let t0 = Instant::now();
        assert!(matches!(t.assign(t0), Assignment::Map { task_id: 0, .. }));

        // Still within the stall window: nothing to hand out.
        assert_eq!(t.assign(t0 + Duration::from_secs(5)), Assignment::Wait);

        // Past the window: the same task goes out again.
        let late = t0 + STALL_TIMEOUT + Duration::from_secs(1);
        assert!(matches!(t.assign(late), Assignment::Map { task_id: 0, .. }));
    }

    #[test]
    fn late_success_after_reassignment_is_honored() {
        let mut t = table(1, 1);
        let t0 = Instant::now();
        t.assign(t0);

        let late = t0 + STALL_TIMEOUT + Duration::from_secs(1);
        assert!(matches!(t.assign(late), Assignment::Map { task_id: 0, .. }));

        // The reaped worker finally reports; the output file exists,
        // so the completion counts.
        t.report(TaskKind::Map, 0, true);
        assert!(matches!(t.assign(late), Assignment::Reduce { .. }));

        // The reassigned worker's duplicate success is a no-op.
        t.report(TaskKind::Map, 0, true);
        t.report(TaskKind::Reduce, 0, true);
        assert!(t.done());
    }

    #[test]
    fn failure_report_requeues_the_task() {
        let mut t = table(1, 1);
        let now = Instant::now();
        assert!(matches!(t.assign(now), Assignment::Map { task_id: 0, .. }));
        t.report(TaskKind::Map, 0, false);
        assert!(matches!(t.assign(now), Assignment::Map { task_id: 0, .. }));
    }

    #[test]
    fn failure_after_completion_is_ignored() {
        let mut t = table(1, 1);
        let now = Instant::now();
        t.assign(now);
        t.report(TaskKind::Map, 0, true);

        // A straggler's stale failure must not resurrect the task.
        t.report(TaskKind::Map, 0, false);
        assert!(matches!(t.assign(now), Assignment::Reduce { .. }));
    }

    #[test]
    fn out_of_range_reports_are_ignored() {
        let mut t = table(1, 1);
        let now = Instant::now();
        t.report(TaskKind::Map, 99, true);
        t.report(TaskKind::Reduce, 99, false);
        assert!(matches!(t.assign(now), Assignment::Map { task_id: 0, .. }));
    }

    #[test]
    fn exit_only_after_every_reduce_completes() {
        let mut t = table(2, 2);
        let now = Instant::now();
        complete_all_maps(&mut t, 2, now);

        assert!(matches!(t.assign(now), Assignment::Reduce { task_id: 0, .. }));
        assert!(matches!(t.assign(now), Assignment::Reduce { task_id: 1, .. }));
        assert_eq!(t.assign(now), Assignment::Wait);
        assert!(!t.done());

        t.report(TaskKind::Reduce, 0, true);
        assert_eq!(t.assign(now), Assignment::Wait);
        assert!(!t.done());

        t.report(TaskKind::Reduce, 1, true);
        assert!(t.done());
        assert_eq!(t.assign(now), Assignment::Exit);

        // Done is monotone; further polls keep getting Exit.
        assert_eq!(t.assign(now), Assignment::Exit);
        assert!(t.done());
    }

    #[test]
    fn empty_input_exits_immediately() {
        let mut t = table(0, 3);
        assert!(t.done());
        assert_eq!(t.assign(Instant::now()), Assignment::Exit);
    }

    #[test]
    fn zero_reduce_fanout_finishes_after_maps() {
        let mut t = table(1, 0);
        let now = Instant::now();
        complete_all_maps(&mut t, 1, now);
        assert_eq!(t.assign(now), Assignment::Exit);
        assert!(t.done());
    }
}

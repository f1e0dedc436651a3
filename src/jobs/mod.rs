//! Job Management
//!
//! Tracks every launched pipeline as a job: process-group signaling,
//! foreground bookkeeping, recency ordering for `%+` / `%-`, status
//! events, and a low-rate background monitor that reaps jobs whose
//! processes have disappeared.
//!
//! The job table is owned here; other components hold job ids only.
//! All state transitions flow through the public operations so that
//! events for one job are always emitted in transition order.

pub mod designator;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local};
use indexmap::IndexMap;
use tokio::task::JoinHandle;

pub use designator::resolve_designator;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Stopped,
    Done,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "Running",
            JobStatus::Stopped => "Stopped",
            JobStatus::Done => "Done",
        }
    }
}

/// One tracked job. `pgid` equals the pipeline leader's pid.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: u32,
    pub pid: i32,
    pub pgid: i32,
    pub command: String,
    pub status: JobStatus,
    pub background: bool,
    pub start_time: DateTime<Local>,
    pub end_time: Option<DateTime<Local>>,
    pub exit_code: Option<i32>,
    pub signal: Option<i32>,
}

/// Notifications emitted on job transitions.
#[derive(Debug, Clone)]
pub enum JobEvent {
    Added(u32),
    StatusChanged { id: u32, status: JobStatus },
    Suspended(u32),
    Resumed(u32),
    Done { id: u32, exit_code: Option<i32>, signal: Option<i32> },
}

type Listener = Box<dyn Fn(&JobEvent) + Send + Sync>;

#[derive(Default)]
struct JobTable {
    jobs: IndexMap<u32, Job>,
    next_id: u32,
    foreground: Option<u32>,
    /// Interaction order, most recent last. `%+` is the last entry,
    /// `%-` the one before it.
    recency: Vec<u32>,
    monitor_running: bool,
}

impl JobTable {
    fn touch_recency(&mut self, id: u32) {
        self.recency.retain(|existing| *existing != id);
        self.recency.push(id);
    }

    fn drop_job(&mut self, id: u32) {
        self.jobs.shift_remove(&id);
        self.recency.retain(|existing| *existing != id);
        if self.foreground == Some(id) {
            self.foreground = None;
        }
    }
}

/// Process-group-aware job tracker. Cheap to clone; clones share the
/// same table.
#[derive(Clone)]
pub struct JobManager {
    table: Arc<Mutex<JobTable>>,
    listeners: Arc<Mutex<Vec<(u64, Listener)>>>,
    next_listener_id: Arc<AtomicU64>,
    signal_tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    monitor_enabled: bool,
    monitor_interval_ms: u64,
}

impl JobManager {
    /// `monitor_enabled = false` (test mode) never starts the poller.
    pub fn new(monitor_enabled: bool, monitor_interval_ms: u64) -> Self {
        Self {
            table: Arc::new(Mutex::new(JobTable::default())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: Arc::new(AtomicU64::new(1)),
            signal_tasks: Arc::new(Mutex::new(Vec::new())),
            monitor_enabled,
            monitor_interval_ms: monitor_interval_ms.max(100),
        }
    }

    // ---- Event listeners -------------------------------------------------

    pub fn on_event(&self, listener: Listener) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().unwrap().push((id, listener));
        id
    }

    pub fn off_event(&self, id: u64) -> bool {
        let mut listeners = self.listeners.lock().unwrap();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn emit(&self, event: JobEvent) {
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in listeners.iter() {
            // A listener must never take the shell down with it.
            let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&event)));
        }
    }

    // ---- Core operations -------------------------------------------------

    /// Register a launched pipeline. The leader's pid doubles as the
    /// process group id.
    pub fn add_job(&self, command: &str, pid: i32, background: bool) -> u32 {
        let id = {
            let mut table = self.table.lock().unwrap();
            table.next_id += 1;
            let id = table.next_id;
            table.jobs.insert(
                id,
                Job {
                    id,
                    pid,
                    pgid: pid,
                    command: command.to_string(),
                    status: JobStatus::Running,
                    background,
                    start_time: Local::now(),
                    end_time: None,
                    exit_code: None,
                    signal: None,
                },
            );
            table.touch_recency(id);
            if !background {
                table.foreground = Some(id);
            }
            id
        };
        self.ensure_monitor();
        self.emit(JobEvent::Added(id));
        id
    }

    /// Stop a running job with SIGSTOP to its process group.
    pub fn suspend_job(&self, id: u32) -> Result<(), String> {
        {
            let mut table = self.table.lock().unwrap();
            let job = table.jobs.get(&id).ok_or_else(|| format!("no such job: {}", id))?;
            if job.status != JobStatus::Running {
                return Err(format!("job {} is not running", id));
            }
            send_signal(-job.pgid, libc::SIGSTOP)?;
            let job = table.jobs.get_mut(&id).unwrap();
            job.status = JobStatus::Stopped;
            job.background = true;
            if table.foreground == Some(id) {
                table.foreground = None;
            }
            table.touch_recency(id);
        }
        self.emit(JobEvent::StatusChanged { id, status: JobStatus::Stopped });
        self.emit(JobEvent::Suspended(id));
        Ok(())
    }

    /// Continue a stopped job in the background.
    pub fn resume_job_background(&self, id: u32) -> Result<(), String> {
        {
            let mut table = self.table.lock().unwrap();
            let job = table.jobs.get(&id).ok_or_else(|| format!("no such job: {}", id))?;
            if job.status != JobStatus::Stopped {
                return Err(format!("job {} is not stopped", id));
            }
            send_signal(-job.pgid, libc::SIGCONT)?;
            let job = table.jobs.get_mut(&id).unwrap();
            job.status = JobStatus::Running;
            job.background = true;
            if table.foreground == Some(id) {
                table.foreground = None;
            }
            table.touch_recency(id);
        }
        self.ensure_monitor();
        self.emit(JobEvent::StatusChanged { id, status: JobStatus::Running });
        self.emit(JobEvent::Resumed(id));
        Ok(())
    }

    /// Bring a job to the foreground. A stopped job gets SIGCONT first;
    /// a running background job just flips, no signal needed.
    pub fn resume_job_foreground(&self, id: u32) -> Result<(), String> {
        let resumed = {
            let mut table = self.table.lock().unwrap();
            let job = table.jobs.get(&id).ok_or_else(|| format!("no such job: {}", id))?;
            match (job.status, job.background) {
                (JobStatus::Stopped, _) => {
                    send_signal(-job.pgid, libc::SIGCONT)?;
                    let job = table.jobs.get_mut(&id).unwrap();
                    job.status = JobStatus::Running;
                    job.background = false;
                    table.foreground = Some(id);
                    table.touch_recency(id);
                    true
                }
                (JobStatus::Running, true) => {
                    let job = table.jobs.get_mut(&id).unwrap();
                    job.background = false;
                    table.foreground = Some(id);
                    table.touch_recency(id);
                    false
                }
                (JobStatus::Running, false) => {
                    return Err(format!("job {} is already in the foreground", id));
                }
                (JobStatus::Done, _) => {
                    return Err(format!("job {} has terminated", id));
                }
            }
        };
        if resumed {
            self.emit(JobEvent::StatusChanged { id, status: JobStatus::Running });
            self.emit(JobEvent::Resumed(id));
        }
        Ok(())
    }

    /// Signal a job's process group, SIGTERM by default.
    pub fn terminate_job(&self, id: u32, signal: Option<i32>) -> Result<(), String> {
        let mut table = self.table.lock().unwrap();
        let job = table.jobs.get(&id).ok_or_else(|| format!("no such job: {}", id))?;
        if job.status == JobStatus::Done {
            return Err(format!("job {} has terminated", id));
        }
        send_signal(-job.pgid, signal.unwrap_or(libc::SIGTERM))?;
        if table.foreground == Some(id) {
            table.foreground = None;
        }
        // The exit path records completion once the process is gone.
        Ok(())
    }

    /// Record completion. Called from the child exit path or the
    /// monitor.
    pub fn mark_done(&self, id: u32, exit_code: Option<i32>, signal: Option<i32>) {
        let background = {
            let mut table = self.table.lock().unwrap();
            let Some(job) = table.jobs.get_mut(&id) else { return };
            if job.status == JobStatus::Done {
                return;
            }
            job.status = JobStatus::Done;
            job.end_time = Some(Local::now());
            job.exit_code = exit_code;
            job.signal = signal;
            let background = job.background;
            if table.foreground == Some(id) {
                table.foreground = None;
            }
            background
        };
        self.emit(JobEvent::StatusChanged { id, status: JobStatus::Done });
        self.emit(JobEvent::Done { id, exit_code, signal });
        if background {
            match exit_code {
                Some(0) | None => log::info!("[{}] Done", id),
                Some(code) => log::info!("[{}] exited with code {}", id, code),
            }
        }
    }

    /// Remove a finished job. Running or stopped jobs survive unless
    /// `force` is set.
    pub fn remove_job(&self, id: u32, force: bool) -> bool {
        let mut table = self.table.lock().unwrap();
        match table.jobs.get(&id) {
            Some(job) if job.status == JobStatus::Done || force => {
                table.drop_job(id);
                true
            }
            _ => false,
        }
    }

    /// Delete every finished job; returns how many were removed.
    pub fn cleanup_jobs(&self) -> usize {
        let mut table = self.table.lock().unwrap();
        let done: Vec<u32> = table
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Done)
            .map(|j| j.id)
            .collect();
        for id in &done {
            table.drop_job(*id);
        }
        done.len()
    }

    /// Record an interaction with a job without changing its state.
    pub fn note_recency(&self, id: u32) {
        let mut table = self.table.lock().unwrap();
        if table.jobs.contains_key(&id) {
            table.touch_recency(id);
        }
    }

    // ---- Queries ---------------------------------------------------------

    pub fn get(&self, id: u32) -> Option<Job> {
        self.table.lock().unwrap().jobs.get(&id).cloned()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.table.lock().unwrap().jobs.values().cloned().collect()
    }

    pub fn foreground_id(&self) -> Option<u32> {
        self.table.lock().unwrap().foreground
    }

    pub fn foreground_job(&self) -> Option<Job> {
        let table = self.table.lock().unwrap();
        table.foreground.and_then(|id| table.jobs.get(&id).cloned())
    }

    /// `%+`: the most recently touched live job.
    pub fn current_job(&self) -> Option<u32> {
        self.table.lock().unwrap().recency.last().copied()
    }

    /// `%-`: the one touched before the current job.
    pub fn previous_job(&self) -> Option<u32> {
        let table = self.table.lock().unwrap();
        table.recency.iter().rev().nth(1).copied()
    }

    pub fn resolve_job_designator(&self, token: &str) -> Option<u32> {
        let id = resolve_designator(token, self.current_job(), self.previous_job())?;
        self.get(id).map(|job| job.id)
    }

    // ---- Exit paths ------------------------------------------------------

    /// Watch a child handle and record its exit.
    pub fn watch_exit(&self, id: u32, mut child: tokio::process::Child) {
        let manager = self.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    let (code, signal) = decompose_status(&status);
                    manager.mark_done(id, code, signal);
                }
                Err(e) => {
                    log::warn!("wait for job {} failed: {}", id, e);
                    manager.mark_done(id, None, None);
                }
            }
        });
    }

    /// One monitor pass: probe every live job with signal 0 and reap
    /// the ones whose process group is gone. Returns whether live jobs
    /// remain.
    pub fn poll_once(&self) -> bool {
        let live: Vec<(u32, i32)> = {
            let table = self.table.lock().unwrap();
            table
                .jobs
                .values()
                .filter(|j| j.status != JobStatus::Done)
                .map(|j| (j.id, j.pid))
                .collect()
        };
        let mut remaining = false;
        for (id, pid) in live {
            if process_gone(pid) {
                self.mark_done(id, None, None);
            } else {
                remaining = true;
            }
        }
        remaining
    }

    /// Start the low-rate poller unless it is already running or
    /// disabled. It stops by itself when no live jobs remain.
    fn ensure_monitor(&self) {
        if !self.monitor_enabled {
            return;
        }
        {
            let mut table = self.table.lock().unwrap();
            if table.monitor_running {
                return;
            }
            table.monitor_running = true;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(manager.monitor_interval_ms)).await;
                if !manager.poll_once() {
                    break;
                }
            }
            manager.table.lock().unwrap().monitor_running = false;
        });
    }

    // ---- Signal plumbing -------------------------------------------------

    /// Route terminal signals to the foreground job and use SIGCHLD as
    /// a reap hint.
    #[cfg(unix)]
    pub fn install_signal_handlers(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut tasks = self.signal_tasks.lock().unwrap();

        let manager = self.clone();
        if let Ok(mut interrupts) = signal(SignalKind::interrupt()) {
            tasks.push(tokio::spawn(async move {
                loop {
                    interrupts.recv().await;
                    if let Some(job) = manager.foreground_job() {
                        let _ = send_signal(-job.pgid, libc::SIGINT);
                    }
                }
            }));
        }

        let manager = self.clone();
        if let Ok(mut stops) = signal(SignalKind::from_raw(libc::SIGTSTP)) {
            tasks.push(tokio::spawn(async move {
                loop {
                    stops.recv().await;
                    if let Some(job) = manager.foreground_job() {
                        let _ = manager.suspend_job(job.id);
                    }
                }
            }));
        }

        let manager = self.clone();
        if let Ok(mut children) = signal(SignalKind::child()) {
            tasks.push(tokio::spawn(async move {
                loop {
                    children.recv().await;
                    manager.poll_once();
                }
            }));
        }
    }

    #[cfg(not(unix))]
    pub fn install_signal_handlers(&self) {}

    /// Tear down: drop signal listeners and SIGTERM every live job.
    /// Errors from already-gone processes are swallowed.
    pub fn shutdown(&self) {
        for task in self.signal_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        let live: Vec<i32> = {
            let table = self.table.lock().unwrap();
            table
                .jobs
                .values()
                .filter(|j| j.status != JobStatus::Done)
                .map(|j| j.pgid)
                .collect()
        };
        for pgid in live {
            let _ = send_signal(-pgid, libc::SIGTERM);
        }
    }
}

/// Signal a pid (positive) or process group (negative).
#[cfg(unix)]
pub fn send_signal(target: i32, signal: i32) -> Result<(), String> {
    let rc = unsafe { libc::kill(target, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error().to_string())
    }
}

#[cfg(not(unix))]
pub fn send_signal(_target: i32, _signal: i32) -> Result<(), String> {
    Err("signals are not supported on this platform".into())
}

/// Probe with signal 0: ESRCH means the process no longer exists.
#[cfg(unix)]
fn process_gone(pid: i32) -> bool {
    let rc = unsafe { libc::kill(pid, 0) };
    rc != 0 && std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
}

#[cfg(not(unix))]
fn process_gone(_pid: i32) -> bool {
    false
}

/// Split an exit status into (exit code, terminating signal).
#[cfg(unix)]
pub fn decompose_status(status: &std::process::ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => (Some(code), None),
        None => (status.signal().map(|s| 128 + s), status.signal()),
    }
}

#[cfg(not(unix))]
pub fn decompose_status(status: &std::process::ExitStatus) -> (Option<i32>, Option<i32>) {
    (status.code(), None)
}

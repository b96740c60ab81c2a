//! Worker lifecycle: dependency ordering, scheduling, graceful stop.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use duff_core::error::WalletError;
use duff_core::events::{AccountEvent, WorkerEvent, WorkerEventKind};

use super::{Worker, WorkerContext, WorkerDescriptor};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not scheduled.
    Stopped,
    /// Running its start-up execution.
    Starting,
    /// Scheduled on its interval.
    Running,
}

struct Scheduled {
    shutdown: watch::Sender<bool>,
    /// Held for the duration of every execution.
    exec_lock: Arc<tokio::sync::Mutex<()>>,
    handle: JoinHandle<()>,
}

struct Entry {
    worker: Arc<dyn Worker>,
    descriptor: WorkerDescriptor,
    state: WorkerState,
    scheduled: Option<Scheduled>,
}

/// Starts, schedules and stops an account's workers.
pub struct Supervisor {
    ctx: Arc<WorkerContext>,
    /// Topological order: dependencies first.
    order: Vec<String>,
    entries: HashMap<String, Entry>,
    events: broadcast::Sender<AccountEvent>,
}

impl Supervisor {
    /// Register `workers` and resolve their dependency graph.
    ///
    /// Fails with [`WalletError::UnknownPlugin`] on a dependency that is not
    /// registered and [`WalletError::Validation`] on a duplicate name or a
    /// dependency cycle.
    pub fn new(
        ctx: Arc<WorkerContext>,
        workers: Vec<Arc<dyn Worker>>,
        events: broadcast::Sender<AccountEvent>,
    ) -> Result<Self, WalletError> {
        let mut registration = Vec::with_capacity(workers.len());
        let mut entries = HashMap::with_capacity(workers.len());
        for worker in workers {
            let descriptor = worker.descriptor();
            if entries.contains_key(&descriptor.name) {
                return Err(WalletError::Validation(format!(
                    "worker {} registered twice",
                    descriptor.name
                )));
            }
            registration.push(descriptor.clone());
            entries.insert(
                descriptor.name.clone(),
                Entry {
                    worker,
                    descriptor,
                    state: WorkerState::Stopped,
                    scheduled: None,
                },
            );
        }
        let order = topological_order(&registration)?;
        debug!(order = ?order, "worker order resolved");
        Ok(Self {
            ctx,
            order,
            entries,
            events,
        })
    }

    /// Worker names, dependencies first.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// State of a worker.
    pub fn state(&self, name: &str) -> Option<WorkerState> {
        self.entries.get(name).map(|e| e.state)
    }

    /// Start every worker in dependency order.
    pub async fn start_all(&mut self) -> Result<(), WalletError> {
        for name in self.order.clone() {
            self.start_worker(&name).await?;
        }
        Ok(())
    }

    /// Stop every worker, dependents first.
    pub async fn stop_all(&mut self) {
        for name in self.order.clone().into_iter().rev() {
            if let Err(e) = self.stop_worker(&name).await {
                error!(worker = %name, error = %e, "failed to stop worker");
            }
        }
    }

    /// Start one worker. Its dependencies must already be running.
    ///
    /// With `execute_on_start` the first run completes before this returns.
    pub async fn start_worker(&mut self, name: &str) -> Result<(), WalletError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| WalletError::UnknownPlugin(name.to_string()))?;
        if entry.state != WorkerState::Stopped {
            return Ok(());
        }
        if let Some(dep) = entry
            .descriptor
            .dependencies
            .iter()
            .find(|dep| self.state(dep) != Some(WorkerState::Running))
        {
            return Err(WalletError::Validation(format!(
                "worker {name} needs {dep} to be running"
            )));
        }

        let worker = Arc::clone(&entry.worker);
        let descriptor = entry.descriptor.clone();
        self.set_state(name, WorkerState::Starting);
        info!(worker = %name, interval_ms = descriptor.interval.as_millis() as u64, "starting worker");
        emit(&self.events, name, WorkerEventKind::Started);

        if descriptor.execute_on_start {
            run_once(worker.as_ref(), name, &self.ctx, &self.events).await;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let exec_lock = Arc::new(tokio::sync::Mutex::new(()));
        let handle = tokio::spawn(run_loop(
            worker,
            name.to_string(),
            Arc::clone(&self.ctx),
            self.events.clone(),
            Arc::clone(&exec_lock),
            shutdown_rx,
            descriptor.interval,
        ));
        if let Some(entry) = self.entries.get_mut(name) {
            entry.scheduled = Some(Scheduled {
                shutdown,
                exec_lock,
                handle,
            });
            entry.state = WorkerState::Running;
        }
        Ok(())
    }

    /// Stop one worker.
    ///
    /// Cancels the next scheduled run and waits for one already executing;
    /// no execution is in flight once this returns.
    pub async fn stop_worker(&mut self, name: &str) -> Result<(), WalletError> {
        let entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| WalletError::UnknownPlugin(name.to_string()))?;
        let Some(scheduled) = entry.scheduled.take() else {
            return Ok(());
        };
        let _ = scheduled.shutdown.send(true);
        drop(scheduled.exec_lock.lock().await);
        if let Err(e) = scheduled.handle.await {
            error!(worker = %name, error = %e, "worker task ended abnormally");
        }
        entry.state = WorkerState::Stopped;
        info!(worker = %name, "worker stopped");
        emit(&self.events, name, WorkerEventKind::Stopped);
        Ok(())
    }

    /// Run a worker once now, serialized with its scheduled runs.
    pub async fn execute(&self, name: &str) -> Result<(), WalletError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| WalletError::UnknownPlugin(name.to_string()))?;
        let _guard = match &entry.scheduled {
            Some(scheduled) => Some(scheduled.exec_lock.lock().await),
            None => None,
        };
        run_once(entry.worker.as_ref(), name, &self.ctx, &self.events).await;
        Ok(())
    }

    fn set_state(&mut self, name: &str, state: WorkerState) {
        if let Some(entry) = self.entries.get_mut(name) {
            entry.state = state;
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        for entry in self.entries.values_mut() {
            if let Some(scheduled) = entry.scheduled.take() {
                let _ = scheduled.shutdown.send(true);
            }
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// Kahn's algorithm, ties broken by registration order.
fn topological_order(descriptors: &[WorkerDescriptor]) -> Result<Vec<String>, WalletError> {
    let position: HashMap<&str, usize> = descriptors
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();
    let mut indegree = vec![0usize; descriptors.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];
    for (i, descriptor) in descriptors.iter().enumerate() {
        for dep in &descriptor.dependencies {
            let &d = position
                .get(dep.as_str())
                .ok_or_else(|| WalletError::UnknownPlugin(dep.clone()))?;
            indegree[i] += 1;
            dependents[d].push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..descriptors.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(descriptors.len());
    while let Some(i) = ready.pop_front() {
        order.push(descriptors[i].name.clone());
        for &next in &dependents[i] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                ready.push_back(next);
            }
        }
    }
    if order.len() != descriptors.len() {
        let stuck: Vec<&str> = descriptors
            .iter()
            .enumerate()
            .filter(|(i, _)| indegree[*i] > 0)
            .map(|(_, d)| d.name.as_str())
            .collect();
        return Err(WalletError::Validation(format!(
            "worker dependency cycle among {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

fn emit(events: &broadcast::Sender<AccountEvent>, name: &str, kind: WorkerEventKind) {
    let _ = events.send(AccountEvent::Worker(WorkerEvent {
        name: name.to_string(),
        kind,
    }));
}

async fn run_once(
    worker: &dyn Worker,
    name: &str,
    ctx: &WorkerContext,
    events: &broadcast::Sender<AccountEvent>,
) {
    match worker.execute(ctx).await {
        Ok(()) => {
            debug!(worker = %name, "worker executed");
            emit(events, name, WorkerEventKind::Executed);
        }
        Err(e) => {
            warn!(worker = %name, error = %e, "worker execution failed");
            emit(events, name, WorkerEventKind::Failed(e.to_string()));
        }
    }
}

async fn run_loop(
    worker: Arc<dyn Worker>,
    name: String,
    ctx: Arc<WorkerContext>,
    events: broadcast::Sender<AccountEvent>,
    exec_lock: Arc<tokio::sync::Mutex<()>>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) {
    let period = interval.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                let _guard = exec_lock.lock().await;
                if *shutdown.borrow() {
                    break;
                }
                run_once(worker.as_ref(), &name, &ctx, &events).await;
            }
        }
    }
    debug!(worker = %name, "worker loop exited");
}

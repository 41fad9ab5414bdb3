//! In-memory doubles for the engine, object store and notifier traits
//!
//! Available to this crate's tests and, through the `testing` feature, to
//! other crates' tests.

use crate::engine::{EngineError, EngineResult, JobHandle, QueryEngine, ResultSet};
use crate::notifier::{Notification, NotifyError, Notifier};
use crate::object_store::{ObjectStore, StoreError, StoreResult};
use async_trait::async_trait;
use ferry_core::CompiledJob;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Scripted behaviour of one submitted job
#[derive(Debug, Clone)]
pub struct ScriptedJob {
    /// Number of status refreshes reporting the job as running, `None` for ever
    running_polls: Option<u32>,
    cancel: EngineResult<bool>,
    result: EngineResult<ResultSet>,
    /// Time a fetch takes beyond its wait bound, `None` to answer at once
    fetch_overrun: Option<Duration>,
    cancel_delay: Duration,
}

impl ScriptedJob {
    /// Job that finishes immediately with `result`
    pub fn finishes_with(result: ResultSet) -> Self {
        Self {
            running_polls: Some(0),
            cancel: Ok(true),
            result: Ok(result),
            fetch_overrun: None,
            cancel_delay: Duration::ZERO,
        }
    }

    /// Job whose result fetch fails with `error`
    pub fn fails_with(error: EngineError) -> Self {
        Self {
            running_polls: Some(0),
            cancel: Ok(true),
            result: Err(error),
            fetch_overrun: None,
            cancel_delay: Duration::ZERO,
        }
    }

    /// Row count probe returning `count`
    pub fn counting(count: u64) -> Self {
        Self::finishes_with(ResultSet::scalar(
            ferry_core::ROW_COUNT_COLUMN,
            count.to_string(),
        ))
    }

    pub fn running_for(mut self, polls: u32) -> Self {
        self.running_polls = Some(polls);
        self
    }

    pub fn running_forever(mut self) -> Self {
        self.running_polls = None;
        self
    }

    pub fn cancel_acknowledged(mut self, acknowledged: bool) -> Self {
        self.cancel = Ok(acknowledged);
        self
    }

    pub fn cancel_fails_with(mut self, error: EngineError) -> Self {
        self.cancel = Err(error);
        self
    }

    /// Answer every fetch only after its wait bound plus `overrun`, as an
    /// HTTP client granting extra time on top of the server-side wait does
    pub fn slow_fetch(mut self, overrun: Duration) -> Self {
        self.fetch_overrun = Some(overrun);
        self
    }

    pub fn slow_cancel(mut self, delay: Duration) -> Self {
        self.cancel_delay = delay;
        self
    }
}

#[derive(Debug, Default)]
struct EngineState {
    queue: VecDeque<ScriptedJob>,
    jobs: HashMap<String, ScriptedJob>,
    submitted: Vec<CompiledJob>,
    status_polls: HashMap<String, u32>,
    cancels: Vec<String>,
    fetches: Vec<(String, Duration)>,
}

/// Query engine replaying scripted jobs in submission order
#[derive(Debug, Default)]
pub struct ScriptedEngine {
    state: Mutex<EngineState>,
}

impl ScriptedEngine {
    pub fn new(jobs: impl IntoIterator<Item = ScriptedJob>) -> Self {
        Self {
            state: Mutex::new(EngineState {
                queue: jobs.into_iter().collect(),
                ..Default::default()
            }),
        }
    }

    /// Jobs submitted so far
    pub fn submitted(&self) -> Vec<CompiledJob> {
        lock(&self.state).submitted.clone()
    }

    /// Job ids for which cancellation was requested, one entry per request
    pub fn cancel_requests(&self) -> Vec<String> {
        lock(&self.state).cancels.clone()
    }

    /// Job ids and wait bounds of every result fetch
    pub fn fetches(&self) -> Vec<(String, Duration)> {
        lock(&self.state).fetches.clone()
    }

    pub fn status_polls(&self, job_id: &str) -> u32 {
        lock(&self.state)
            .status_polls
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }

    fn job(state: &EngineState, handle: &JobHandle) -> EngineResult<ScriptedJob> {
        state
            .jobs
            .get(&handle.job_id)
            .cloned()
            .ok_or_else(|| EngineError::Unexpected(format!("unknown job {}", handle.job_id)))
    }
}

#[async_trait]
impl QueryEngine for ScriptedEngine {
    async fn submit(&self, job: &CompiledJob) -> EngineResult<JobHandle> {
        let mut state = lock(&self.state);
        let scripted = state
            .queue
            .pop_front()
            .ok_or_else(|| EngineError::Unexpected("no scripted job left".to_string()))?;

        let job_id = format!("job-{}", state.submitted.len() + 1);
        state.submitted.push(job.clone());
        state.jobs.insert(job_id.clone(), scripted);

        Ok(JobHandle::new(job_id, job.location.clone()))
    }

    async fn is_running(&self, handle: &JobHandle) -> EngineResult<bool> {
        let mut state = lock(&self.state);
        let job = Self::job(&state, handle)?;
        let polls = state.status_polls.entry(handle.job_id.clone()).or_insert(0);
        *polls += 1;

        Ok(match job.running_polls {
            None => true,
            Some(limit) => *polls <= limit,
        })
    }

    async fn cancel(&self, handle: &JobHandle) -> EngineResult<bool> {
        let job = {
            let mut state = lock(&self.state);
            let job = Self::job(&state, handle)?;
            state.cancels.push(handle.job_id.clone());
            job
        };

        if !job.cancel_delay.is_zero() {
            tokio::time::sleep(job.cancel_delay).await;
        }
        job.cancel
    }

    async fn fetch_result(&self, handle: &JobHandle, wait: Duration) -> EngineResult<ResultSet> {
        let job = {
            let mut state = lock(&self.state);
            let job = Self::job(&state, handle)?;
            state.fetches.push((handle.job_id.clone(), wait));
            job
        };

        if let Some(overrun) = job.fetch_overrun {
            tokio::time::sleep(wait + overrun).await;
        }
        job.result
    }
}

/// Object store backed by a map
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    failure: Mutex<Option<StoreError>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, object: &str, content: impl Into<Vec<u8>>) -> Self {
        self.put(bucket, object, content);
        self
    }

    pub fn put(&self, bucket: &str, object: &str, content: impl Into<Vec<u8>>) {
        lock(&self.objects).insert((bucket.to_string(), object.to_string()), content.into());
    }

    /// Make every subsequent call fail with `error`
    pub fn fail_with(&self, error: StoreError) {
        *lock(&self.failure) = Some(error);
    }

    fn check_failure(&self) -> StoreResult<()> {
        match lock(&self.failure).clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn read_object(&self, bucket: &str, object: &str) -> StoreResult<Vec<u8>> {
        self.check_failure()?;
        lock(&self.objects)
            .get(&(bucket.to_string(), object.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                bucket: bucket.to_string(),
                object: object.to_string(),
            })
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<String>> {
        self.check_failure()?;
        Ok(lock(&self.objects)
            .keys()
            .filter(|(b, name)| b == bucket && name.starts_with(prefix))
            .map(|(_, name)| name.clone())
            .collect())
    }
}

/// Notifier recording every published message
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    published: Mutex<Vec<(String, Notification)>>,
    failing: Mutex<bool>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail
    pub fn fail_publishing(&self) {
        *lock(&self.failing) = true;
    }

    /// Published messages as (topic, notification) pairs
    pub fn published(&self) -> Vec<(String, Notification)> {
        lock(&self.published).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn publish(
        &self,
        topic: &str,
        notification: &Notification,
    ) -> Result<String, NotifyError> {
        if *lock(&self.failing) {
            return Err(NotifyError::Publish("topic unavailable".to_string()));
        }

        let mut published = lock(&self.published);
        published.push((topic.to_string(), notification.clone()));
        Ok(format!("msg-{}", published.len()))
    }
}

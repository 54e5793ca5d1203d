#![allow(dead_code)]

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actors::{
    AreaBasedEstimator, BudgetWorkerConfig, NotificationWorkerConfig, PipelineDeps, PoolConfig,
};
use db::Database;
use db::repositories::{BriefingRepository, OfficeRepository, TriggerRepository, UserRepository};
use futures_util::future::BoxFuture;
use pipeline_core::ports::{
    BriefingAnalyzer, BriefingSource, EmailMessage, EmailTransport, RealtimePublisher, TriggerSink,
};
use pipeline_core::{
    Briefing, OfficeConfig, PortError, PortResult, ProjectData, RealtimeMessage, UserContact,
};

pub type TestResult = Result<(), Box<dyn Error>>;

pub const USER: &str = "user-1";
pub const OFFICE: &str = "office-1";

/// Records every publish; fails on demand.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(String, RealtimeMessage)>>,
    pub fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn count(&self) -> usize {
        self.published.lock().unwrap().len()
    }
}

impl RealtimePublisher for RecordingPublisher {
    fn publish<'a>(&'a self, channel: &'a str, message: RealtimeMessage) -> BoxFuture<'a, PortResult<()>> {
        Box::pin(async move {
            if self.fail.load(Ordering::SeqCst) {
                return Err(PortError::failed("socket closed"));
            }
            self.published.lock().unwrap().push((channel.to_string(), message));
            Ok(())
        })
    }
}

/// Records every email; fails on demand.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<EmailMessage>>,
    pub fail: AtomicBool,
    pub attempts: AtomicUsize,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            fail: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl EmailTransport for RecordingMailer {
    fn send(&self, email: EmailMessage) -> BoxFuture<'_, PortResult<()>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(PortError::failed("smtp unavailable"));
            }
            self.sent.lock().unwrap().push(email);
            Ok(())
        })
    }
}

/// Analyzer that always reports an error.
pub struct FailingAnalyzer;

impl BriefingAnalyzer for FailingAnalyzer {
    fn analyze<'a>(&'a self, _briefing: &'a Briefing) -> BoxFuture<'a, PortResult<ProjectData>> {
        Box::pin(async { Err(PortError::failed("analysis service unavailable")) })
    }
}

/// Analyzer that panics mid-job.
pub struct PanickingAnalyzer;

impl BriefingAnalyzer for PanickingAnalyzer {
    fn analyze<'a>(&'a self, _briefing: &'a Briefing) -> BoxFuture<'a, PortResult<ProjectData>> {
        Box::pin(async { panic!("analyzer exploded") })
    }
}

/// Analyzer that takes `delay` before answering.
pub struct SlowAnalyzer(pub Duration);

impl BriefingAnalyzer for SlowAnalyzer {
    fn analyze<'a>(&'a self, briefing: &'a Briefing) -> BoxFuture<'a, PortResult<ProjectData>> {
        Box::pin(async move {
            tokio::time::sleep(self.0).await;
            AreaBasedEstimator::project_data(briefing)
        })
    }
}

/// Trigger sink whose first `failures` generated triggers error out.
pub struct FlakyTriggers {
    pub inner: TriggerRepository,
    pub failures: AtomicUsize,
}

impl FlakyTriggers {
    pub fn new(db: &Database, failures: usize) -> Self {
        Self {
            inner: TriggerRepository::new(db.clone()),
            failures: AtomicUsize::new(failures),
        }
    }
}

impl TriggerSink for FlakyTriggers {
    fn on_budget_generated<'a>(
        &'a self,
        budget_id: &'a str,
        briefing_id: &'a str,
    ) -> BoxFuture<'a, PortResult<()>> {
        Box::pin(async move {
            if take_failure(&self.failures) {
                return Err(PortError::failed("audit service down"));
            }
            self.inner.on_budget_generated(budget_id, briefing_id).await
        })
    }

    fn on_budget_failed<'a>(&'a self, briefing_id: &'a str, error: &'a str) -> BoxFuture<'a, PortResult<()>> {
        self.inner.on_budget_failed(briefing_id, error)
    }
}

/// Briefing source whose first `failures` budget write-backs error out.
pub struct FlakyBriefings {
    pub inner: BriefingRepository,
    pub failures: AtomicUsize,
}

impl FlakyBriefings {
    pub fn new(db: &Database, failures: usize) -> Self {
        Self {
            inner: BriefingRepository::new(db.clone()),
            failures: AtomicUsize::new(failures),
        }
    }
}

impl BriefingSource for FlakyBriefings {
    fn get_briefing<'a>(&'a self, briefing_id: &'a str) -> BoxFuture<'a, PortResult<Option<Briefing>>> {
        self.inner.get_briefing(briefing_id)
    }

    fn record_budget<'a>(
        &'a self,
        briefing_id: &'a str,
        budget_id: &'a str,
        analysis: &'a ProjectData,
    ) -> BoxFuture<'a, PortResult<()>> {
        Box::pin(async move {
            if take_failure(&self.failures) {
                return Err(PortError::failed("briefing store timeout"));
            }
            self.inner.record_budget(briefing_id, budget_id, analysis).await
        })
    }
}

fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Database plus deps wired with recording fakes.
pub struct Harness {
    pub db: Database,
    pub deps: PipelineDeps,
    pub realtime: Arc<RecordingPublisher>,
}

impl Harness {
    pub async fn new() -> Result<Self, Box<dyn Error>> {
        let db = Database::memory().await?;
        let realtime = Arc::new(RecordingPublisher::default());
        let deps = PipelineDeps::from_database(
            &db,
            Arc::new(AreaBasedEstimator),
            Arc::new(AreaBasedEstimator),
            realtime.clone(),
        );

        OfficeRepository::new(db.clone()).save(office()).await?;
        UserRepository::new(db.clone())
            .save(UserContact {
                id: USER.to_string(),
                name: "Ana".to_string(),
                email: Some("ana@example.com".to_string()),
            })
            .await?;

        Ok(Self { db, deps, realtime })
    }

    pub fn with_mailer(mut self, mailer: Arc<RecordingMailer>) -> Self {
        self.deps = self.deps.with_email(mailer);
        self
    }

    pub async fn seed_briefing(&self, briefing_id: &str) -> Result<(), Box<dyn Error>> {
        BriefingRepository::new(self.db.clone())
            .save(briefing(briefing_id))
            .await?;
        Ok(())
    }
}

pub fn briefing(id: &str) -> Briefing {
    Briefing {
        id: id.to_string(),
        office_id: OFFICE.to_string(),
        user_id: USER.to_string(),
        project_name: format!("Project {id}"),
        answers: serde_json::json!({ "area_m2": 100.0, "disciplines": ["architecture"] }),
        budget_generated: false,
        budget_id: None,
        last_analysis: None,
    }
}

pub fn office() -> OfficeConfig {
    OfficeConfig {
        office_id: OFFICE.to_string(),
        currency: "BRL".to_string(),
        default_hourly_rate: 200.0,
        default_hours_per_m2: 0.5,
        discipline_rates: Vec::new(),
    }
}

/// Worker settings with short timings for tests.
pub fn worker_config() -> BudgetWorkerConfig {
    BudgetWorkerConfig {
        idle_interval: Duration::from_millis(20),
        error_backoff: Duration::from_millis(50),
        job_timeout: Duration::from_secs(5),
        lease_duration: Duration::from_secs(30),
        ..Default::default()
    }
}

pub fn notification_config() -> NotificationWorkerConfig {
    NotificationWorkerConfig {
        poll_interval: Duration::from_millis(20),
        error_backoff: Duration::from_millis(50),
        max_delivery_attempts: 3,
        ..Default::default()
    }
}

pub fn pool_config() -> PoolConfig {
    PoolConfig::builder()
        .budget_worker_count(2)
        .shutdown_grace(Duration::from_secs(5))
        .maintenance_interval(Duration::from_millis(200))
        .budget_worker(worker_config())
        .notification_worker(notification_config())
        .build()
}

/// Poll `check` until it returns true or `timeout` elapses.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> Result<bool, Box<dyn Error>>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool, Box<dyn Error>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await? {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

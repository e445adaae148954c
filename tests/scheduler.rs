use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use gratiday::{
    auth::Role,
    models::*,
    quote::{self, QuoteFields},
    repo::{inmem::InMemRepo, CategoryRepo, QuoteRepo, RepoError, RepoResult, UserRepo},
    scheduler::{publish_due, Scheduler, SchedulerState},
};

/// Delegates to an in-memory store. Optionally fails every write to one quote,
/// slows down the due query, or drafts a quote right after the due query ran.
#[derive(Default)]
struct DoubleRepo {
    inner: InMemRepo,
    broken: Option<Id>,
    find_delay: Option<StdDuration>,
    drafted_after_find: Option<Id>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl DoubleRepo {
    fn over(inner: &InMemRepo) -> Self {
        DoubleRepo { inner: inner.clone(), ..Default::default() }
    }
}

#[async_trait]
impl QuoteRepo for DoubleRepo {
    async fn list_quotes(&self, f: &QuoteFilter, limit: i64, offset: i64) -> RepoResult<Vec<Quote>> {
        self.inner.list_quotes(f, limit, offset).await
    }
    async fn count_quotes(&self, f: &QuoteFilter) -> RepoResult<i64> {
        self.inner.count_quotes(f).await
    }
    async fn random_quotes(&self, count: i64, category_id: Option<Id>) -> RepoResult<Vec<Quote>> {
        self.inner.random_quotes(count, category_id).await
    }
    async fn get_quote(&self, id: Id) -> RepoResult<Quote> {
        self.inner.get_quote(id).await
    }
    async fn create_quote(&self, created_by: Id, fields: &QuoteFields) -> RepoResult<Quote> {
        self.inner.create_quote(created_by, fields).await
    }
    async fn save_quote(&self, id: Id, fields: &QuoteFields) -> RepoResult<Quote> {
        if Some(id) == self.broken {
            return Err(RepoError::Unavailable("connection reset".into()));
        }
        self.inner.save_quote(id, fields).await
    }
    async fn delete_quote(&self, id: Id) -> RepoResult<()> {
        self.inner.delete_quote(id).await
    }
    async fn find_due_quotes(&self, now: DateTime<Utc>) -> RepoResult<Vec<Quote>> {
        let running = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.find_delay {
            tokio::time::sleep(delay).await;
        }
        let due = self.inner.find_due_quotes(now).await;
        if let Some(id) = self.drafted_after_find {
            quote::draft(&self.inner, id, Utc::now()).await.unwrap();
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        due
    }
    async fn quote_stats(&self, scope: StatsScope) -> RepoResult<QuoteStats> {
        self.inner.quote_stats(scope).await
    }
    async fn global_stats(&self) -> RepoResult<GlobalStats> {
        self.inner.global_stats().await
    }
}

async fn seeded() -> (InMemRepo, Id, Id) {
    let r = InMemRepo::new();
    let u = r
        .create_user(&UserRecord { name: "Ana".into(), email: "ana@example.com".into(), password_hash: "x".into(), role: Role::Admin })
        .await
        .unwrap();
    let c = r.create_category(&NewCategory { name: "Motivación".into(), description: None }).await.unwrap();
    (r, u.id, c.id)
}

fn scheduled(category_id: Id, at: DateTime<Utc>) -> QuoteFields {
    QuoteFields {
        text: "Gratitude opens every door".into(),
        author: None,
        scheduled_at: Some(at),
        status: QuoteStatus::Scheduled,
        category_id,
    }
}

#[tokio::test]
async fn publishes_exactly_the_due_quotes() {
    let (r, user, cat) = seeded().await;
    let now = Utc::now();
    let mut due = Vec::new();
    for minutes in [1, 30, 600] {
        due.push(r.insert_quote_unchecked(user, scheduled(cat, now - Duration::minutes(minutes))).unwrap().id);
    }
    let mut future = Vec::new();
    for hours in [1, 48] {
        future.push(r.insert_quote_unchecked(user, scheduled(cat, now + Duration::hours(hours))).unwrap().id);
    }

    let summary = publish_due(&r, now).await.unwrap();
    assert_eq!((summary.due, summary.published, summary.failed), (3, 3, 0));

    for id in due {
        let q = r.get_quote(id).await.unwrap();
        assert_eq!((q.status, q.scheduled_at), (QuoteStatus::Published, None));
    }
    for id in future {
        assert_eq!(r.get_quote(id).await.unwrap().status, QuoteStatus::Scheduled);
    }
}

#[tokio::test]
async fn one_failure_does_not_abort_the_batch() {
    let (r, user, cat) = seeded().await;
    let now = Utc::now();
    let first = r.insert_quote_unchecked(user, scheduled(cat, now - Duration::minutes(3))).unwrap();
    let broken = r.insert_quote_unchecked(user, scheduled(cat, now - Duration::minutes(2))).unwrap();
    let last = r.insert_quote_unchecked(user, scheduled(cat, now - Duration::minutes(1))).unwrap();

    let flaky = DoubleRepo { broken: Some(broken.id), ..DoubleRepo::over(&r) };
    let summary = publish_due(&flaky, now).await.unwrap();
    assert_eq!((summary.due, summary.published, summary.failed), (3, 2, 1));

    assert_eq!(r.get_quote(first.id).await.unwrap().status, QuoteStatus::Published);
    assert_eq!(r.get_quote(last.id).await.unwrap().status, QuoteStatus::Published);
    // left for the next poll
    assert_eq!(r.get_quote(broken.id).await.unwrap().status, QuoteStatus::Scheduled);
}

#[tokio::test]
async fn quote_scheduled_one_second_ahead_is_published_after_it_falls_due() {
    let (r, user, cat) = seeded().await;
    let new = NewQuote {
        text: "Gratitude opens every door".into(),
        author: None,
        scheduled_at: Some(Utc::now() + Duration::seconds(1)),
        status: Some(QuoteStatus::Scheduled),
        category_id: cat,
    };
    let q = quote::create(&r, user, new, Utc::now()).await.unwrap();
    assert_eq!(q.status, QuoteStatus::Scheduled);

    tokio::time::sleep(StdDuration::from_secs(2)).await;
    let scheduler = Scheduler::new(Arc::new(r.clone()), 5);
    let summary = scheduler.run_check().await.unwrap();
    assert_eq!(summary.published, 1);

    let q = r.get_quote(q.id).await.unwrap();
    assert_eq!(q.status, QuoteStatus::Published);
    assert_eq!(q.scheduled_at, None);
    assert_eq!(scheduler.status().last_check.unwrap().published, 1);
}

#[tokio::test]
async fn second_start_is_a_noop() {
    let (r, _, _) = seeded().await;
    let scheduler = Scheduler::new(Arc::new(r), 5);
    assert!(scheduler.start());
    assert!(!scheduler.start());

    let status = scheduler.status();
    assert_eq!(status.state, SchedulerState::Running);
    assert!(status.running);
    assert_eq!(status.interval_minutes, 5);

    assert!(scheduler.stop());
    assert!(!scheduler.stop());
    assert_eq!(scheduler.status().state, SchedulerState::Stopped);

    // restartable after a stop
    assert!(scheduler.start());
    scheduler.stop();
}

#[tokio::test]
async fn running_task_sweeps_on_start() {
    let (r, user, cat) = seeded().await;
    let q = r.insert_quote_unchecked(user, scheduled(cat, Utc::now() - Duration::minutes(1))).unwrap();

    let scheduler = Scheduler::with_interval(Arc::new(r.clone()), StdDuration::from_millis(50));
    scheduler.start();
    let mut published = false;
    for _ in 0..40 {
        tokio::time::sleep(StdDuration::from_millis(25)).await;
        if r.get_quote(q.id).await.unwrap().status == QuoteStatus::Published {
            published = true;
            break;
        }
    }
    scheduler.stop();
    assert!(published, "first sweep should run immediately on start");
}

#[tokio::test]
async fn restart_waits_for_the_sweep_in_flight() {
    let (r, _, _) = seeded().await;
    let slow = Arc::new(DoubleRepo { find_delay: Some(StdDuration::from_millis(300)), ..DoubleRepo::over(&r) });
    let scheduler = Scheduler::with_interval(slow.clone(), StdDuration::from_secs(60));

    assert!(scheduler.start());
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert!(scheduler.stop());
    assert!(scheduler.start());
    tokio::time::sleep(StdDuration::from_millis(800)).await;
    scheduler.stop();

    assert_eq!(slow.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn manual_check_waits_for_the_timer_sweep() {
    let (r, user, cat) = seeded().await;
    let q = r.insert_quote_unchecked(user, scheduled(cat, Utc::now() - Duration::minutes(1))).unwrap();
    let slow = Arc::new(DoubleRepo { find_delay: Some(StdDuration::from_millis(300)), ..DoubleRepo::over(&r) });
    let scheduler = Scheduler::with_interval(slow.clone(), StdDuration::from_secs(60));

    scheduler.start();
    tokio::time::sleep(StdDuration::from_millis(50)).await;
    let manual = scheduler.run_check().await.unwrap();
    scheduler.stop();

    assert_eq!(slow.peak.load(Ordering::SeqCst), 1);
    // the timer sweep already took it
    assert_eq!((manual.due, manual.published), (0, 0));
    assert_eq!(r.get_quote(q.id).await.unwrap().status, QuoteStatus::Published);
}

#[tokio::test]
async fn quote_drafted_mid_sweep_is_not_published() {
    let (r, user, cat) = seeded().await;
    let now = Utc::now();
    let kept = r.insert_quote_unchecked(user, scheduled(cat, now - Duration::minutes(2))).unwrap();
    let drafted = r.insert_quote_unchecked(user, scheduled(cat, now - Duration::minutes(1))).unwrap();

    let racing = DoubleRepo { drafted_after_find: Some(drafted.id), ..DoubleRepo::over(&r) };
    let summary = publish_due(&racing, now).await.unwrap();
    assert_eq!((summary.due, summary.published, summary.skipped, summary.failed), (2, 1, 1, 0));

    assert_eq!(r.get_quote(kept.id).await.unwrap().status, QuoteStatus::Published);
    let q = r.get_quote(drafted.id).await.unwrap();
    assert_eq!((q.status, q.scheduled_at), (QuoteStatus::Draft, None));
}

use chrono::{Duration, Utc};
use gratiday::{
    auth::Role,
    models::{NewCategory, NewQuote, QuotePatch, QuoteStatus, UserRecord},
    quote::{self, QuoteError},
    repo::{inmem::InMemRepo, CategoryRepo, QuoteRepo, UserRepo},
};

async fn seeded() -> (InMemRepo, i64, i64) {
    let r = InMemRepo::new();
    let u = r
        .create_user(&UserRecord { name: "Ana".into(), email: "ana@example.com".into(), password_hash: "x".into(), role: Role::User })
        .await
        .unwrap();
    let c = r.create_category(&NewCategory { name: "Motivación".into(), description: None }).await.unwrap();
    (r, u.id, c.id)
}

fn new_quote(category_id: i64) -> NewQuote {
    NewQuote {
        text: "Gratitude opens every door".into(),
        author: None,
        scheduled_at: None,
        status: None,
        category_id,
    }
}

#[tokio::test]
async fn created_as_draft_by_default() {
    let (r, user, cat) = seeded().await;
    let q = quote::create(&r, user, new_quote(cat), Utc::now()).await.unwrap();
    assert_eq!(q.status, QuoteStatus::Draft);
    assert_eq!(q.scheduled_at, None);
    assert_eq!(q.created_by, user);
}

#[tokio::test]
async fn invalid_quote_never_reaches_the_store() {
    let (r, user, cat) = seeded().await;
    let mut bad = new_quote(cat);
    bad.text = "too short".into();
    bad.status = Some(QuoteStatus::Scheduled);
    let err = quote::create(&r, user, bad, Utc::now()).await.unwrap_err();
    let QuoteError::Invalid(rules) = err else { panic!("expected validation failure") };
    assert_eq!(rules.len(), 2, "{rules:?}");
    assert_eq!(r.count_quotes(&Default::default()).await.unwrap(), 0);
}

#[tokio::test]
async fn schedule_requires_a_future_date() {
    let (r, user, cat) = seeded().await;
    let now = Utc::now();
    let q = quote::create(&r, user, new_quote(cat), now).await.unwrap();

    assert!(matches!(quote::schedule(&r, q.id, now, now).await, Err(QuoteError::Invalid(_))));
    assert!(matches!(
        quote::schedule(&r, q.id, now - Duration::seconds(1), now).await,
        Err(QuoteError::Invalid(_))
    ));

    let at = now + Duration::hours(1);
    let s = quote::schedule(&r, q.id, at, now).await.unwrap();
    assert_eq!(s.status, QuoteStatus::Scheduled);
    assert_eq!(s.scheduled_at, Some(at));
}

#[tokio::test]
async fn publish_clears_the_schedule_and_is_idempotent() {
    let (r, user, cat) = seeded().await;
    let now = Utc::now();
    let mut scheduled = new_quote(cat);
    scheduled.status = Some(QuoteStatus::Scheduled);
    scheduled.scheduled_at = Some(now + Duration::days(1));
    let q = quote::create(&r, user, scheduled, now).await.unwrap();

    let p = quote::publish(&r, q.id, now).await.unwrap();
    assert_eq!((p.status, p.scheduled_at), (QuoteStatus::Published, None));

    let again = quote::publish(&r, q.id, now).await.unwrap();
    assert_eq!((again.status, again.scheduled_at), (QuoteStatus::Published, None));

    let d = quote::draft(&r, q.id, now).await.unwrap();
    assert_eq!((d.status, d.scheduled_at), (QuoteStatus::Draft, None));
}

#[tokio::test]
async fn partial_update_revalidates_the_whole_quote() {
    let (r, user, cat) = seeded().await;
    let now = Utc::now();
    let q = quote::create(&r, user, new_quote(cat), now).await.unwrap();

    // switching to scheduled without a date is rejected
    let patch = QuotePatch { status: Some(QuoteStatus::Scheduled), ..Default::default() };
    assert!(matches!(quote::update(&r, q.id, patch, now).await, Err(QuoteError::Invalid(_))));

    let patch = QuotePatch { author: Some("Séneca".into()), ..Default::default() };
    let updated = quote::update(&r, q.id, patch, now).await.unwrap();
    assert_eq!(updated.author.as_deref(), Some("Séneca"));
    assert_eq!(updated.text, q.text);
    assert_eq!(updated.created_at, q.created_at);
}

#[tokio::test]
async fn missing_quote_is_not_found() {
    let (r, _, _) = seeded().await;
    let err = quote::publish(&r, 404, Utc::now()).await.unwrap_err();
    assert!(matches!(err, QuoteError::Repo(gratiday::repo::RepoError::NotFound("quote"))));
}

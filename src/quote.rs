//! Quote lifecycle: field rules, the draft/scheduled/published state machine, and the
//! model operations the HTTP layer and the scheduler share.
//!
//! Every write goes through [`QuoteFields::check`] first, so a rejected request never
//! reaches the store. Each operation ends in a single-row insert or update.

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::models::{validation_messages, Id, NewQuote, Quote, QuotePatch, QuoteStatus, ReplaceQuote};
use crate::repo::{QuoteRepo, RepoError};

#[derive(thiserror::Error, Debug)]
pub enum QuoteError {
    #[error("invalid quote: {}", .0.join(", "))]
    Invalid(Vec<String>),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub type QuoteResult<T> = Result<T, QuoteError>;

/// The mutable part of a quote, as written to the store.
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct QuoteFields {
    #[validate(custom(function = "crate::quote::validate_text"))]
    pub text: String,
    #[validate(length(max = 120, message = "author cannot exceed 120 characters"))]
    pub author: Option<String>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: QuoteStatus,
    #[validate(range(min = 1, message = "a category must be given"))]
    pub category_id: Id,
}

pub(crate) fn validate_text(text: &str) -> Result<(), validator::ValidationError> {
    let mut err = validator::ValidationError::new("text_length");
    if text.trim().chars().count() < 10 {
        err.message = Some("text must have at least 10 characters".into());
        return Err(err);
    }
    if text.chars().count() > 1000 {
        err.message = Some("text cannot exceed 1000 characters".into());
        return Err(err);
    }
    Ok(())
}

fn normalize_author(author: Option<String>) -> Option<String> {
    author.and_then(|a| {
        let trimmed = a.trim();
        if trimmed.is_empty() { None } else { Some(trimmed.to_string()) }
    })
}

impl QuoteFields {
    pub fn from_new(new: NewQuote) -> Self {
        QuoteFields {
            text: new.text,
            author: normalize_author(new.author),
            scheduled_at: new.scheduled_at,
            status: new.status.unwrap_or_default(),
            category_id: new.category_id,
        }
    }

    pub fn of(quote: &Quote) -> Self {
        QuoteFields {
            text: quote.text.clone(),
            author: quote.author.clone(),
            scheduled_at: quote.scheduled_at,
            status: quote.status,
            category_id: quote.category_id,
        }
    }

    /// A full restatement: nothing falls back to the stored row, so a scheduled
    /// status without a date fails the check.
    pub fn replace(r: ReplaceQuote) -> Self {
        QuoteFields {
            text: r.text,
            author: normalize_author(r.author),
            scheduled_at: r.scheduled_at,
            status: r.status,
            category_id: r.category_id,
        }
    }

    /// Overlay a partial update. Leaving the scheduled state without naming a new
    /// date drops the old one.
    pub fn merge(&self, patch: QuotePatch) -> Self {
        let status = patch.status.unwrap_or(self.status);
        let scheduled_at = match patch.scheduled_at {
            Some(t) => Some(t),
            None if status == QuoteStatus::Scheduled => self.scheduled_at,
            None => None,
        };
        QuoteFields {
            text: patch.text.unwrap_or_else(|| self.text.clone()),
            author: match patch.author {
                Some(a) => normalize_author(Some(a)),
                None => self.author.clone(),
            },
            scheduled_at,
            status,
            category_id: patch.category_id.unwrap_or(self.category_id),
        }
    }

    /// Field bounds plus the state invariant. `previous_schedule` is the stored date,
    /// which is exempt from the future check so a due quote can still be edited.
    pub fn check(&self, previous_schedule: Option<DateTime<Utc>>, now: DateTime<Utc>) -> QuoteResult<()> {
        let mut rules = match self.validate() {
            Ok(()) => Vec::new(),
            Err(e) => validation_messages(&e),
        };
        match (self.status, self.scheduled_at) {
            (QuoteStatus::Scheduled, None) => {
                rules.push("scheduled quotes need a publication date".into());
            }
            (QuoteStatus::Scheduled, Some(t)) => {
                if Some(t) != previous_schedule && t <= now {
                    rules.push("scheduled_at must be in the future".into());
                }
            }
            (_, Some(_)) => {
                rules.push("scheduled_at is only allowed for scheduled quotes".into());
            }
            (_, None) => {}
        }
        if rules.is_empty() { Ok(()) } else { Err(QuoteError::Invalid(rules)) }
    }
}

/// Explicit state changes. Any state may move to any other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Publish,
    Schedule(DateTime<Utc>),
    Draft,
}

impl Transition {
    pub fn apply(self, fields: &QuoteFields, now: DateTime<Utc>) -> QuoteResult<QuoteFields> {
        let mut next = fields.clone();
        match self {
            Transition::Publish => {
                next.status = QuoteStatus::Published;
                next.scheduled_at = None;
            }
            Transition::Draft => {
                next.status = QuoteStatus::Draft;
                next.scheduled_at = None;
            }
            Transition::Schedule(t) => {
                if t <= now {
                    return Err(QuoteError::Invalid(vec!["scheduled_at must be in the future".into()]));
                }
                next.status = QuoteStatus::Scheduled;
                next.scheduled_at = Some(t);
            }
        }
        Ok(next)
    }
}

/// Validate and insert a quote owned by `created_by`.
pub async fn create(repo: &dyn QuoteRepo, created_by: Id, new: NewQuote, now: DateTime<Utc>) -> QuoteResult<Quote> {
    let fields = QuoteFields::from_new(new);
    fields.check(None, now)?;
    Ok(repo.create_quote(created_by, &fields).await?)
}

/// Partial update; the merged state is re-validated as a whole.
pub async fn update(repo: &dyn QuoteRepo, id: Id, patch: QuotePatch, now: DateTime<Utc>) -> QuoteResult<Quote> {
    let current = repo.get_quote(id).await?;
    let after = QuoteFields::of(&current).merge(patch);
    store(repo, current, after, now).await
}

/// Full update from a restated body.
pub async fn replace(repo: &dyn QuoteRepo, id: Id, body: ReplaceQuote, now: DateTime<Utc>) -> QuoteResult<Quote> {
    let current = repo.get_quote(id).await?;
    store(repo, current, QuoteFields::replace(body), now).await
}

async fn store(repo: &dyn QuoteRepo, current: Quote, after: QuoteFields, now: DateTime<Utc>) -> QuoteResult<Quote> {
    after.check(current.scheduled_at, now)?;
    if after == QuoteFields::of(&current) {
        return Ok(current);
    }
    Ok(repo.save_quote(current.id, &after).await?)
}

pub async fn transition(repo: &dyn QuoteRepo, id: Id, t: Transition, now: DateTime<Utc>) -> QuoteResult<Quote> {
    let current = repo.get_quote(id).await?;
    let before = QuoteFields::of(&current);
    let after = t.apply(&before, now)?;
    after.check(current.scheduled_at, now)?;
    // publishing twice (admin racing the scheduler) lands here
    if after == before {
        return Ok(current);
    }
    Ok(repo.save_quote(id, &after).await?)
}

pub async fn publish(repo: &dyn QuoteRepo, id: Id, now: DateTime<Utc>) -> QuoteResult<Quote> {
    transition(repo, id, Transition::Publish, now).await
}

/// The automatic scheduled→published step. The row is re-read and left alone
/// (`Ok(None)`) unless it is still scheduled with a date at or before `now`.
pub async fn publish_if_due(repo: &dyn QuoteRepo, id: Id, now: DateTime<Utc>) -> QuoteResult<Option<Quote>> {
    let current = match repo.get_quote(id).await {
        Ok(q) => q,
        Err(RepoError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let due = current.status == QuoteStatus::Scheduled && current.scheduled_at.is_some_and(|t| t <= now);
    if !due {
        return Ok(None);
    }
    let after = Transition::Publish.apply(&QuoteFields::of(&current), now)?;
    Ok(Some(repo.save_quote(id, &after).await?))
}

pub async fn schedule(repo: &dyn QuoteRepo, id: Id, at: DateTime<Utc>, now: DateTime<Utc>) -> QuoteResult<Quote> {
    transition(repo, id, Transition::Schedule(at), now).await
}

pub async fn draft(repo: &dyn QuoteRepo, id: Id, now: DateTime<Utc>) -> QuoteResult<Quote> {
    transition(repo, id, Transition::Draft, now).await
}

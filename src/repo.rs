use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::auth::Role;
use crate::models::*;
use crate::quote::QuoteFields;

#[derive(thiserror::Error, Debug, Clone)]
pub enum RepoError {
    #[error("{0} not found")] NotFound(&'static str),
    #[error("conflict: {0}")] Conflict(String),
    #[error("invalid reference: {0}")] Reference(String),
    #[error("store unavailable: {0}")] Unavailable(String),
    #[error("store error: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

pub(crate) const CATEGORY_NAME_TAKEN: &str = "a category with that name already exists";
pub(crate) const EMAIL_TAKEN: &str = "email address already registered";
pub(crate) const CATEGORY_IN_USE: &str = "category still has quotes; use ?force=true to delete them too";
pub(crate) const USER_OWNS_QUOTES: &str = "user still owns quotes";
pub(crate) const MISSING_REFERENCE: &str = "referenced user or category does not exist";

#[async_trait]
pub trait CategoryRepo: Send + Sync {
    async fn list_categories(&self, limit: i64, offset: i64) -> RepoResult<Vec<Category>>;
    async fn count_categories(&self) -> RepoResult<i64>;
    async fn search_categories(&self, term: &str, limit: i64, offset: i64) -> RepoResult<Vec<Category>>;
    async fn get_category(&self, id: Id) -> RepoResult<Category>;
    async fn find_category_by_name(&self, name: &str) -> RepoResult<Option<Category>>;
    async fn create_category(&self, new: &NewCategory) -> RepoResult<Category>;
    async fn update_category(&self, id: Id, values: &NewCategory) -> RepoResult<Category>;
    /// Without `force` a category that still has quotes is a conflict; with it the
    /// quotes go too.
    async fn delete_category(&self, id: Id, force: bool) -> RepoResult<()>;
}

#[async_trait]
pub trait QuoteRepo: Send + Sync {
    async fn list_quotes(&self, filter: &QuoteFilter, limit: i64, offset: i64) -> RepoResult<Vec<Quote>>;
    async fn count_quotes(&self, filter: &QuoteFilter) -> RepoResult<i64>;
    async fn random_quotes(&self, count: i64, category_id: Option<Id>) -> RepoResult<Vec<Quote>>;
    async fn get_quote(&self, id: Id) -> RepoResult<Quote>;
    async fn create_quote(&self, created_by: Id, fields: &QuoteFields) -> RepoResult<Quote>;
    async fn save_quote(&self, id: Id, fields: &QuoteFields) -> RepoResult<Quote>;
    async fn delete_quote(&self, id: Id) -> RepoResult<()>;
    /// Scheduled quotes with `scheduled_at <= now`, earliest first.
    async fn find_due_quotes(&self, now: DateTime<Utc>) -> RepoResult<Vec<Quote>>;
    async fn quote_stats(&self, scope: StatsScope) -> RepoResult<QuoteStats>;
    async fn global_stats(&self) -> RepoResult<GlobalStats>;
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn list_users(&self, limit: i64, offset: i64) -> RepoResult<Vec<User>>;
    async fn count_users(&self) -> RepoResult<i64>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn create_user(&self, rec: &UserRecord) -> RepoResult<User>;
    async fn update_user(&self, id: Id, name: &str, email: &str, role: Role) -> RepoResult<User>;
    async fn update_password(&self, id: Id, password_hash: &str) -> RepoResult<()>;
    /// Refused while the user still owns quotes.
    async fn delete_user(&self, id: Id) -> RepoResult<()>;
}

pub trait Repo: CategoryRepo + QuoteRepo + UserRepo {
    fn as_quotes(&self) -> &dyn QuoteRepo;
}

impl<T> Repo for T
where
    T: CategoryRepo + QuoteRepo + UserRepo,
{
    fn as_quotes(&self) -> &dyn QuoteRepo {
        self
    }
}

pub mod inmem {
    use super::*;
    use rand::seq::SliceRandom;
    use std::collections::BTreeMap;
    use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

    #[derive(Debug, Clone)]
    struct QuoteRow {
        id: Id,
        fields: QuoteFields,
        created_at: DateTime<Utc>,
        created_by: Id,
    }

    #[derive(Default)]
    struct State {
        categories: BTreeMap<Id, Category>,
        quotes: BTreeMap<Id, QuoteRow>,
        users: BTreeMap<Id, User>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        // join the creator and category names the way the SQL store does
        fn expand(&self, row: &QuoteRow) -> Quote {
            Quote {
                id: row.id,
                text: row.fields.text.clone(),
                author: row.fields.author.clone(),
                created_at: row.created_at,
                scheduled_at: row.fields.scheduled_at,
                status: row.fields.status,
                created_by: row.created_by,
                category_id: row.fields.category_id,
                created_by_name: self.users.get(&row.created_by).map(|u| u.name.clone()).unwrap_or_default(),
                category_name: self.categories.get(&row.fields.category_id).map(|c| c.name.clone()).unwrap_or_default(),
            }
        }

        fn matching<'a>(&'a self, filter: &'a QuoteFilter) -> impl Iterator<Item = &'a QuoteRow> + 'a {
            let needle = filter.search.as_ref().map(|s| s.to_lowercase());
            self.quotes.values().filter(move |q| {
                filter.status.map_or(true, |s| q.fields.status == s)
                    && filter.category_id.map_or(true, |c| q.fields.category_id == c)
                    && filter.created_by.map_or(true, |u| q.created_by == u)
                    && needle.as_ref().map_or(true, |n| {
                        q.fields.text.to_lowercase().contains(n)
                            || q.fields.author.as_ref().is_some_and(|a| a.to_lowercase().contains(n))
                    })
            })
        }

        fn stats<'a>(rows: impl Iterator<Item = &'a QuoteRow>) -> QuoteStats {
            let mut s = QuoteStats::default();
            for r in rows {
                s.total += 1;
                match r.fields.status {
                    QuoteStatus::Draft => s.draft += 1,
                    QuoteStatus::Scheduled => s.scheduled += 1,
                    QuoteStatus::Published => s.published += 1,
                }
            }
            s
        }

        fn check_refs(&self, created_by: Id, category_id: Id) -> RepoResult<()> {
            if !self.users.contains_key(&created_by) || !self.categories.contains_key(&category_id) {
                return Err(RepoError::Reference(MISSING_REFERENCE.into()));
            }
            Ok(())
        }
    }

    fn page<T: Clone>(items: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
        items.skip(offset.max(0) as usize).take(limit.max(0) as usize).collect()
    }

    /// Process-local store. Used by the test suite and when no `DATABASE_URL` is set.
    #[derive(Clone, Default)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self::default()
        }

        fn read(&self) -> RepoResult<RwLockReadGuard<'_, State>> {
            self.state.read().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        fn write(&self) -> RepoResult<RwLockWriteGuard<'_, State>> {
            self.state.write().map_err(|_| RepoError::Internal("state lock poisoned".into()))
        }

        /// Insert a quote row as-is, skipping the model checks. Lets tests seed
        /// quotes whose schedule already lies in the past.
        pub fn insert_quote_unchecked(&self, created_by: Id, fields: QuoteFields) -> RepoResult<Quote> {
            let mut s = self.write()?;
            s.check_refs(created_by, fields.category_id)?;
            let id = s.next_id();
            let row = QuoteRow { id, fields, created_at: Utc::now(), created_by };
            let quote = s.expand(&row);
            s.quotes.insert(id, row);
            Ok(quote)
        }
    }

    #[async_trait]
    impl CategoryRepo for InMemRepo {
        async fn list_categories(&self, limit: i64, offset: i64) -> RepoResult<Vec<Category>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.categories.values().cloned().collect();
            v.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(page(v.into_iter(), limit, offset))
        }
        async fn count_categories(&self) -> RepoResult<i64> {
            Ok(self.read()?.categories.len() as i64)
        }
        async fn search_categories(&self, term: &str, limit: i64, offset: i64) -> RepoResult<Vec<Category>> {
            let s = self.read()?;
            let needle = term.to_lowercase();
            let mut v: Vec<_> = s
                .categories
                .values()
                .filter(|c| {
                    c.name.to_lowercase().contains(&needle)
                        || c.description.as_ref().is_some_and(|d| d.to_lowercase().contains(&needle))
                })
                .cloned()
                .collect();
            v.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(page(v.into_iter(), limit, offset))
        }
        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            self.read()?.categories.get(&id).cloned().ok_or(RepoError::NotFound("category"))
        }
        async fn find_category_by_name(&self, name: &str) -> RepoResult<Option<Category>> {
            Ok(self.read()?.categories.values().find(|c| c.name == name).cloned())
        }
        async fn create_category(&self, new: &NewCategory) -> RepoResult<Category> {
            let mut s = self.write()?;
            // unique constraint
            if s.categories.values().any(|c| c.name == new.name) {
                return Err(RepoError::Conflict(CATEGORY_NAME_TAKEN.into()));
            }
            let id = s.next_id();
            let category = Category { id, name: new.name.clone(), description: new.description.clone() };
            s.categories.insert(id, category.clone());
            Ok(category)
        }
        async fn update_category(&self, id: Id, values: &NewCategory) -> RepoResult<Category> {
            let mut s = self.write()?;
            if s.categories.values().any(|c| c.name == values.name && c.id != id) {
                return Err(RepoError::Conflict(CATEGORY_NAME_TAKEN.into()));
            }
            let category = s.categories.get_mut(&id).ok_or(RepoError::NotFound("category"))?;
            category.name = values.name.clone();
            category.description = values.description.clone();
            Ok(category.clone())
        }
        async fn delete_category(&self, id: Id, force: bool) -> RepoResult<()> {
            let mut s = self.write()?;
            if !s.categories.contains_key(&id) {
                return Err(RepoError::NotFound("category"));
            }
            let in_use = s.quotes.values().any(|q| q.fields.category_id == id);
            if in_use && !force {
                return Err(RepoError::Conflict(CATEGORY_IN_USE.into()));
            }
            s.quotes.retain(|_, q| q.fields.category_id != id);
            s.categories.remove(&id);
            Ok(())
        }
    }

    #[async_trait]
    impl QuoteRepo for InMemRepo {
        async fn list_quotes(&self, filter: &QuoteFilter, limit: i64, offset: i64) -> RepoResult<Vec<Quote>> {
            let s = self.read()?;
            let mut rows: Vec<_> = s.matching(filter).collect();
            rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id))); // newest first
            Ok(page(rows.into_iter().map(|r| s.expand(r)), limit, offset))
        }
        async fn count_quotes(&self, filter: &QuoteFilter) -> RepoResult<i64> {
            Ok(self.read()?.matching(filter).count() as i64)
        }
        async fn random_quotes(&self, count: i64, category_id: Option<Id>) -> RepoResult<Vec<Quote>> {
            let s = self.read()?;
            let filter = QuoteFilter { status: Some(QuoteStatus::Published), category_id, ..Default::default() };
            let mut rows: Vec<_> = s.matching(&filter).collect();
            rows.shuffle(&mut rand::thread_rng());
            Ok(page(rows.into_iter().map(|r| s.expand(r)), count, 0))
        }
        async fn get_quote(&self, id: Id) -> RepoResult<Quote> {
            let s = self.read()?;
            s.quotes.get(&id).map(|r| s.expand(r)).ok_or(RepoError::NotFound("quote"))
        }
        async fn create_quote(&self, created_by: Id, fields: &QuoteFields) -> RepoResult<Quote> {
            self.insert_quote_unchecked(created_by, fields.clone())
        }
        async fn save_quote(&self, id: Id, fields: &QuoteFields) -> RepoResult<Quote> {
            let mut s = self.write()?;
            let created_by = s.quotes.get(&id).ok_or(RepoError::NotFound("quote"))?.created_by;
            s.check_refs(created_by, fields.category_id)?;
            let row = s.quotes.get_mut(&id).ok_or(RepoError::NotFound("quote"))?;
            row.fields = fields.clone();
            let row = row.clone();
            Ok(s.expand(&row))
        }
        async fn delete_quote(&self, id: Id) -> RepoResult<()> {
            self.write()?.quotes.remove(&id).map(|_| ()).ok_or(RepoError::NotFound("quote"))
        }
        async fn find_due_quotes(&self, now: DateTime<Utc>) -> RepoResult<Vec<Quote>> {
            let s = self.read()?;
            let mut due: Vec<_> = s
                .quotes
                .values()
                .filter(|q| q.fields.status == QuoteStatus::Scheduled && q.fields.scheduled_at.is_some_and(|t| t <= now))
                .collect();
            due.sort_by_key(|q| (q.fields.scheduled_at, q.id));
            Ok(due.into_iter().map(|r| s.expand(r)).collect())
        }
        async fn quote_stats(&self, scope: StatsScope) -> RepoResult<QuoteStats> {
            let s = self.read()?;
            let rows = s.quotes.values().filter(|q| match scope {
                StatsScope::All => true,
                StatsScope::User(u) => q.created_by == u,
                StatsScope::Category(c) => q.fields.category_id == c,
            });
            Ok(State::stats(rows))
        }
        async fn global_stats(&self) -> RepoResult<GlobalStats> {
            let s = self.read()?;
            let users: std::collections::BTreeSet<_> = s.quotes.values().map(|q| q.created_by).collect();
            let cats: std::collections::BTreeSet<_> = s.quotes.values().map(|q| q.fields.category_id).collect();
            Ok(GlobalStats {
                quotes: State::stats(s.quotes.values()),
                active_users: users.len() as i64,
                categories_used: cats.len() as i64,
            })
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn list_users(&self, limit: i64, offset: i64) -> RepoResult<Vec<User>> {
            let s = self.read()?;
            let mut v: Vec<_> = s.users.values().cloned().collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
            Ok(page(v.into_iter(), limit, offset))
        }
        async fn count_users(&self) -> RepoResult<i64> {
            Ok(self.read()?.users.len() as i64)
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            self.read()?.users.get(&id).cloned().ok_or(RepoError::NotFound("user"))
        }
        async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
            Ok(self.read()?.users.values().find(|u| u.email == email).cloned())
        }
        async fn create_user(&self, rec: &UserRecord) -> RepoResult<User> {
            let mut s = self.write()?;
            if s.users.values().any(|u| u.email == rec.email) {
                return Err(RepoError::Conflict(EMAIL_TAKEN.into()));
            }
            let id = s.next_id();
            let user = User {
                id,
                name: rec.name.clone(),
                email: rec.email.clone(),
                password_hash: rec.password_hash.clone(),
                created_at: Utc::now(),
                role: rec.role,
            };
            s.users.insert(id, user.clone());
            Ok(user)
        }
        async fn update_user(&self, id: Id, name: &str, email: &str, role: Role) -> RepoResult<User> {
            let mut s = self.write()?;
            if s.users.values().any(|u| u.email == email && u.id != id) {
                return Err(RepoError::Conflict(EMAIL_TAKEN.into()));
            }
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound("user"))?;
            user.name = name.to_string();
            user.email = email.to_string();
            user.role = role;
            Ok(user.clone())
        }
        async fn update_password(&self, id: Id, password_hash: &str) -> RepoResult<()> {
            let mut s = self.write()?;
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound("user"))?;
            user.password_hash = password_hash.to_string();
            Ok(())
        }
        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            let mut s = self.write()?;
            if !s.users.contains_key(&id) {
                return Err(RepoError::NotFound("user"));
            }
            if s.quotes.values().any(|q| q.created_by == id) {
                return Err(RepoError::Conflict(USER_OWNS_QUOTES.into()));
            }
            s.users.remove(&id);
            Ok(())
        }
    }
}

/// Postgres implementation.
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres, QueryBuilder};

    const QUOTE_COLUMNS: &str = r#"
        q.id, q.text, q.author, q.created_at, q.scheduled_at, q.status, q.created_by, q.category_id,
        u.name AS created_by_name, c.name AS category_name"#;

    const QUOTE_JOINS: &str = r#"
        JOIN users u ON u.id = q.created_by
        JOIN categories c ON c.id = q.category_id"#;

    const USER_COLUMNS: &str = "id, name, email, password_hash, created_at, role";

    fn quote_select() -> String {
        format!("SELECT {QUOTE_COLUMNS} FROM quotes q {QUOTE_JOINS}")
    }

    /// Translate driver errors into the store-neutral taxonomy.
    pub(crate) fn map_err(e: sqlx::Error) -> RepoError {
        match &e {
            sqlx::Error::RowNotFound => RepoError::NotFound("row"),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => match db.constraint() {
                    Some("categories_name_key") => RepoError::Conflict(CATEGORY_NAME_TAKEN.into()),
                    Some("users_email_key") => RepoError::Conflict(EMAIL_TAKEN.into()),
                    _ => RepoError::Conflict(db.message().to_string()),
                },
                Some("23503") => RepoError::Reference(MISSING_REFERENCE.into()),
                _ => RepoError::Internal(db.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                RepoError::Unavailable(e.to_string())
            }
            _ => RepoError::Internal(e.to_string()),
        }
    }

    fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, f: &QuoteFilter) {
        qb.push(" WHERE TRUE");
        if let Some(status) = f.status {
            qb.push(" AND q.status = ").push_bind(status.as_str());
        }
        if let Some(category_id) = f.category_id {
            qb.push(" AND q.category_id = ").push_bind(category_id);
        }
        if let Some(created_by) = f.created_by {
            qb.push(" AND q.created_by = ").push_bind(created_by);
        }
        if let Some(term) = &f.search {
            let pattern = format!("%{term}%");
            qb.push(" AND (q.text ILIKE ")
                .push_bind(pattern.clone())
                .push(" OR q.author ILIKE ")
                .push_bind(pattern)
                .push(")");
        }
    }

    #[derive(Clone)]
    pub struct PgRepo { pool: Pool<Postgres> }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self { Self { pool } }
    }

    #[async_trait]
    impl CategoryRepo for PgRepo {
        async fn list_categories(&self, limit: i64, offset: i64) -> RepoResult<Vec<Category>> {
            sqlx::query_as::<_, Category>("SELECT id, name, description FROM categories ORDER BY name ASC LIMIT $1 OFFSET $2")
                .bind(limit).bind(offset)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn count_categories(&self) -> RepoResult<i64> {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM categories")
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn search_categories(&self, term: &str, limit: i64, offset: i64) -> RepoResult<Vec<Category>> {
            sqlx::query_as::<_, Category>(
                "SELECT id, name, description FROM categories WHERE name ILIKE $1 OR description ILIKE $1 ORDER BY name ASC LIMIT $2 OFFSET $3"
            )
            .bind(format!("%{term}%")).bind(limit).bind(offset)
            .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn get_category(&self, id: Id) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>("SELECT id, name, description FROM categories WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(map_err)?
                .ok_or(RepoError::NotFound("category"))
        }
        async fn find_category_by_name(&self, name: &str) -> RepoResult<Option<Category>> {
            sqlx::query_as::<_, Category>("SELECT id, name, description FROM categories WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool).await.map_err(map_err)
        }
        async fn create_category(&self, new: &NewCategory) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>("INSERT INTO categories (name, description) VALUES ($1, $2) RETURNING id, name, description")
                .bind(&new.name).bind(&new.description)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn update_category(&self, id: Id, values: &NewCategory) -> RepoResult<Category> {
            sqlx::query_as::<_, Category>(
                "UPDATE categories SET name = $2, description = $3 WHERE id = $1 RETURNING id, name, description"
            )
            .bind(id).bind(&values.name).bind(&values.description)
            .fetch_optional(&self.pool).await.map_err(map_err)?
            .ok_or(RepoError::NotFound("category"))
        }
        async fn delete_category(&self, id: Id, force: bool) -> RepoResult<()> {
            let mut tx = self.pool.begin().await.map_err(map_err)?;
            if !force {
                let in_use: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM quotes WHERE category_id = $1")
                    .bind(id)
                    .fetch_one(&mut *tx).await.map_err(map_err)?;
                if in_use > 0 {
                    return Err(RepoError::Conflict(CATEGORY_IN_USE.into()));
                }
            }
            // quotes.category_id cascades
            let res = sqlx::query("DELETE FROM categories WHERE id = $1")
                .bind(id)
                .execute(&mut *tx).await.map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound("category"));
            }
            tx.commit().await.map_err(map_err)
        }
    }

    #[async_trait]
    impl QuoteRepo for PgRepo {
        async fn list_quotes(&self, filter: &QuoteFilter, limit: i64, offset: i64) -> RepoResult<Vec<Quote>> {
            let mut qb = QueryBuilder::<Postgres>::new(quote_select());
            push_filter(&mut qb, filter);
            qb.push(" ORDER BY q.created_at DESC, q.id DESC LIMIT ").push_bind(limit)
                .push(" OFFSET ").push_bind(offset);
            qb.build_query_as::<Quote>().fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn count_quotes(&self, filter: &QuoteFilter) -> RepoResult<i64> {
            let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM quotes q");
            push_filter(&mut qb, filter);
            qb.build_query_scalar::<i64>().fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn random_quotes(&self, count: i64, category_id: Option<Id>) -> RepoResult<Vec<Quote>> {
            let sql = format!(
                "{} WHERE q.status = 'published' AND ($1::BIGINT IS NULL OR q.category_id = $1) ORDER BY random() LIMIT $2",
                quote_select()
            );
            sqlx::query_as::<_, Quote>(&sql)
                .bind(category_id).bind(count)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn get_quote(&self, id: Id) -> RepoResult<Quote> {
            let sql = format!("{} WHERE q.id = $1", quote_select());
            sqlx::query_as::<_, Quote>(&sql)
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(map_err)?
                .ok_or(RepoError::NotFound("quote"))
        }
        async fn create_quote(&self, created_by: Id, fields: &QuoteFields) -> RepoResult<Quote> {
            let sql = format!(r#"
                WITH q AS (
                    INSERT INTO quotes (text, author, scheduled_at, status, created_by, category_id)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING *
                )
                SELECT {QUOTE_COLUMNS} FROM q {QUOTE_JOINS}
            "#);
            sqlx::query_as::<_, Quote>(&sql)
                .bind(&fields.text)
                .bind(&fields.author)
                .bind(fields.scheduled_at)
                .bind(fields.status.as_str())
                .bind(created_by)
                .bind(fields.category_id)
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn save_quote(&self, id: Id, fields: &QuoteFields) -> RepoResult<Quote> {
            let sql = format!(r#"
                WITH q AS (
                    UPDATE quotes
                    SET text = $2, author = $3, scheduled_at = $4, status = $5, category_id = $6
                    WHERE id = $1
                    RETURNING *
                )
                SELECT {QUOTE_COLUMNS} FROM q {QUOTE_JOINS}
            "#);
            sqlx::query_as::<_, Quote>(&sql)
                .bind(id)
                .bind(&fields.text)
                .bind(&fields.author)
                .bind(fields.scheduled_at)
                .bind(fields.status.as_str())
                .bind(fields.category_id)
                .fetch_optional(&self.pool).await.map_err(map_err)?
                .ok_or(RepoError::NotFound("quote"))
        }
        async fn delete_quote(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM quotes WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await.map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound("quote"));
            }
            Ok(())
        }
        async fn find_due_quotes(&self, now: DateTime<Utc>) -> RepoResult<Vec<Quote>> {
            let sql = format!(
                "{} WHERE q.status = 'scheduled' AND q.scheduled_at <= $1 ORDER BY q.scheduled_at ASC, q.id ASC",
                quote_select()
            );
            sqlx::query_as::<_, Quote>(&sql)
                .bind(now)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn quote_stats(&self, scope: StatsScope) -> RepoResult<QuoteStats> {
            let (clause, id) = match scope {
                StatsScope::All => ("TRUE", None),
                StatsScope::User(u) => ("created_by = $1", Some(u)),
                StatsScope::Category(c) => ("category_id = $1", Some(c)),
            };
            let sql = format!(r#"
                SELECT COUNT(*) AS total,
                       COUNT(*) FILTER (WHERE status = 'published') AS published,
                       COUNT(*) FILTER (WHERE status = 'draft') AS draft,
                       COUNT(*) FILTER (WHERE status = 'scheduled') AS scheduled
                FROM quotes WHERE {clause}
            "#);
            let mut query = sqlx::query_as::<_, QuoteStats>(&sql);
            if let Some(id) = id {
                query = query.bind(id);
            }
            query.fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn global_stats(&self) -> RepoResult<GlobalStats> {
            sqlx::query_as::<_, GlobalStats>(r#"
                SELECT COUNT(*) AS total,
                       COUNT(*) FILTER (WHERE status = 'published') AS published,
                       COUNT(*) FILTER (WHERE status = 'draft') AS draft,
                       COUNT(*) FILTER (WHERE status = 'scheduled') AS scheduled,
                       COUNT(DISTINCT created_by) AS active_users,
                       COUNT(DISTINCT category_id) AS categories_used
                FROM quotes
            "#)
            .fetch_one(&self.pool).await.map_err(map_err)
        }
    }

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn list_users(&self, limit: i64, offset: i64) -> RepoResult<Vec<User>> {
            let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2");
            sqlx::query_as::<_, User>(&sql)
                .bind(limit).bind(offset)
                .fetch_all(&self.pool).await.map_err(map_err)
        }
        async fn count_users(&self) -> RepoResult<i64> {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
            sqlx::query_as::<_, User>(&sql)
                .bind(id)
                .fetch_optional(&self.pool).await.map_err(map_err)?
                .ok_or(RepoError::NotFound("user"))
        }
        async fn find_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
            sqlx::query_as::<_, User>(&sql)
                .bind(email)
                .fetch_optional(&self.pool).await.map_err(map_err)
        }
        async fn create_user(&self, rec: &UserRecord) -> RepoResult<User> {
            let sql = format!("INSERT INTO users (name, email, password_hash, role) VALUES ($1, $2, $3, $4) RETURNING {USER_COLUMNS}");
            sqlx::query_as::<_, User>(&sql)
                .bind(&rec.name).bind(&rec.email).bind(&rec.password_hash).bind(rec.role.as_str())
                .fetch_one(&self.pool).await.map_err(map_err)
        }
        async fn update_user(&self, id: Id, name: &str, email: &str, role: Role) -> RepoResult<User> {
            let sql = format!("UPDATE users SET name = $2, email = $3, role = $4 WHERE id = $1 RETURNING {USER_COLUMNS}");
            sqlx::query_as::<_, User>(&sql)
                .bind(id).bind(name).bind(email).bind(role.as_str())
                .fetch_optional(&self.pool).await.map_err(map_err)?
                .ok_or(RepoError::NotFound("user"))
        }
        async fn update_password(&self, id: Id, password_hash: &str) -> RepoResult<()> {
            let res = sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
                .bind(id).bind(password_hash)
                .execute(&self.pool).await.map_err(map_err)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound("user"));
            }
            Ok(())
        }
        async fn delete_user(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM users WHERE id = $1")
                .bind(id)
                .execute(&self.pool).await
                .map_err(|e| match map_err(e) {
                    // quotes.created_by is ON DELETE RESTRICT
                    RepoError::Reference(_) => RepoError::Conflict(USER_OWNS_QUOTES.into()),
                    other => other,
                })?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound("user"));
            }
            Ok(())
        }
    }
}

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use chrono::Utc;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::{create_jwt, Auth, Role};
use crate::error::{ApiError, ApiErrorBody};
use crate::models::*;
use crate::password::{hash_password, verify_password};
use crate::policy::{authorize, Action};
use crate::quote::{self, Transition};
use crate::repo::{Repo, CATEGORY_NAME_TAKEN, EMAIL_TAKEN};
use crate::require_permission;
use crate::scheduler::{CheckSummary, Scheduler, SchedulerStatus};

const MAX_RANDOM: i64 = 50;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _| ApiError::BadRequest(err.to_string()).into()))
        .app_data(web::QueryConfig::default().error_handler(|err, _| ApiError::BadRequest(err.to_string()).into()))
        .app_data(web::PathConfig::default().error_handler(|err, _| ApiError::BadRequest(err.to_string()).into()));

    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/auth/register").route(web::post().to(register)))
            .service(web::resource("/auth/login").route(web::post().to(login)))
            .service(web::resource("/auth/me").route(web::get().to(auth_me)))
            .service(web::resource("/auth/refresh").route(web::post().to(refresh_token)))
            .service(
                web::resource("/usuarios")
                    .route(web::get().to(list_users))
                    .route(web::post().to(create_user)),
            )
            .service(
                web::resource("/usuarios/{id}")
                    .route(web::get().to(get_user))
                    .route(web::put().to(replace_user))
                    .route(web::patch().to(patch_user))
                    .route(web::delete().to(delete_user)),
            )
            .service(
                web::resource("/categorias")
                    .route(web::get().to(list_categories))
                    .route(web::post().to(create_category)),
            )
            .service(web::resource("/categorias/search").route(web::get().to(search_categories)))
            .service(
                web::resource("/categorias/{id}")
                    .route(web::get().to(get_category))
                    .route(web::put().to(replace_category))
                    .route(web::patch().to(patch_category))
                    .route(web::delete().to(delete_category)),
            )
            .service(web::resource("/categorias/{id}/frases").route(web::get().to(category_quotes)))
            .service(web::resource("/categorias/{id}/estadisticas").route(web::get().to(category_stats)))
            // static segments before /frases/{id}
            .service(
                web::resource("/frases")
                    .route(web::get().to(list_quotes))
                    .route(web::post().to(create_quote)),
            )
            .service(web::resource("/frases/publicadas").route(web::get().to(published_quotes)))
            .service(web::resource("/frases/aleatorias").route(web::get().to(random_quotes)))
            .service(web::resource("/frases/estadisticas").route(web::get().to(global_stats)))
            .service(web::resource("/frases/estadisticas/usuario/{id}").route(web::get().to(user_stats)))
            .service(web::resource("/frases/scheduler/estado").route(web::get().to(scheduler_status)))
            .service(web::resource("/frases/scheduler/iniciar").route(web::post().to(scheduler_start)))
            .service(web::resource("/frases/scheduler/detener").route(web::post().to(scheduler_stop)))
            .service(web::resource("/frases/scheduler/ejecutar").route(web::post().to(scheduler_run)))
            .service(
                web::resource("/frases/{id}")
                    .route(web::get().to(get_quote))
                    .route(web::put().to(replace_quote))
                    .route(web::patch().to(patch_quote))
                    .route(web::delete().to(delete_quote)),
            )
            .service(web::resource("/frases/{id}/publicar").route(web::patch().to(publish_quote)))
            .service(web::resource("/frases/{id}/programar").route(web::patch().to(schedule_quote)))
            .service(web::resource("/frases/{id}/borrador").route(web::patch().to(draft_quote))),
    );
    cfg.route("/", web::get().to(welcome));
    cfg.route("/metrics", web::get().to(render_metrics));
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub scheduler: Arc<Scheduler>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Wire one store into both the handlers and the scheduler.
    pub fn new<R: Repo + 'static>(repo: R, scheduler_interval: std::time::Duration) -> Self {
        let repo = Arc::new(repo);
        let scheduler = Arc::new(Scheduler::with_interval(repo.clone(), scheduler_interval));
        AppState { repo, scheduler, metrics: None }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// JSON 404 for anything the route table does not know.
pub async fn not_found() -> HttpResponse {
    HttpResponse::NotFound().json(ApiErrorBody {
        error: "not_found".into(),
        message: "route not found".into(),
        details: None,
    })
}

pub async fn welcome() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "message": "GratiDay API",
        "version": env!("CARGO_PKG_VERSION"),
        "docs": "/docs",
        "api": "/api/v1",
    }))
}

pub async fn render_metrics(data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let handle = data.metrics.as_ref().ok_or_else(|| ApiError::NotFound("metrics exporter not installed".into()))?;
    Ok(HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render()))
}

fn page<T>(data: Vec<T>, total: i64, params: &PageParams) -> Page<T> {
    Page { data, total, limit: params.limit(), offset: params.offset() }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

// ───────────────────────────── auth ─────────────────────────────

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = NewUser,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid data"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(data: web::Data<AppState>, payload: web::Json<NewUser>) -> Result<HttpResponse, ApiError> {
    let mut new = payload.into_inner();
    new.email = normalize_email(&new.email);
    new.validate()?;
    if data.repo.find_user_by_email(&new.email).await?.is_some() {
        return Err(ApiError::Conflict(EMAIL_TAKEN.into()));
    }
    // self-service sign-up never grants admin
    let user = data
        .repo
        .create_user(&UserRecord {
            name: new.name.trim().to_string(),
            email: new.email,
            password_hash: hash_password(&new.password)?,
            role: Role::User,
        })
        .await?;
    tracing::info!(user_id = user.id, "user registered");
    let token = create_jwt(user.id, &user.email, user.role)?;
    Ok(HttpResponse::Created().json(AuthResponse { token, user }))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Token issued", body = AuthResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login(data: web::Data<AppState>, payload: web::Json<LoginRequest>) -> Result<HttpResponse, ApiError> {
    let LoginRequest { email, password } = payload.into_inner();
    let invalid = || ApiError::Unauthorized("invalid credentials".into());
    let user = data.repo.find_user_by_email(&normalize_email(&email)).await?.ok_or_else(invalid)?;
    if !verify_password(&password, &user.password_hash)? {
        return Err(invalid());
    }
    let token = create_jwt(user.id, &user.email, user.role)?;
    Ok(HttpResponse::Ok().json(AuthResponse { token, user }))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current user", body = User),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn auth_me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = data.repo.get_user(auth.user_id()?).await?;
    Ok(HttpResponse::Ok().json(user))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    responses(
        (status = 200, description = "Fresh token"),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn refresh_token(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    // re-read the account so a role change takes effect
    let user = data.repo.get_user(auth.user_id()?).await?;
    let token = create_jwt(user.id, &user.email, user.role)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "token": token })))
}

// ───────────────────────────── users ─────────────────────────────

#[utoipa::path(
    get,
    path = "/api/v1/usuarios",
    params(
        ("limit" = Option<i64>, Query, description = "Page size (1-200, default 50)"),
        ("offset" = Option<i64>, Query, description = "Rows to skip")
    ),
    responses(
        (status = 200, description = "Users, newest first", body = UserPage),
        (status = 403, description = "Admins only")
    )
)]
pub async fn list_users(auth: Auth, data: web::Data<AppState>, q: web::Query<PageParams>) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageUsers);
    let users = data.repo.list_users(q.limit(), q.offset()).await?;
    let total = data.repo.count_users().await?;
    Ok(HttpResponse::Ok().json(page(users, total, &q)))
}

#[utoipa::path(
    get,
    path = "/api/v1/usuarios/{id}",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 403, description = "Admins or the user themself"),
        (status = 404, description = "User not found")
    )
)]
pub async fn get_user(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    require_permission!(auth, Action::ViewUser { own: id == auth.user_id()? });
    Ok(HttpResponse::Ok().json(data.repo.get_user(id).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/usuarios",
    request_body = NewUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 403, description = "Admins only"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn create_user(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewUser>) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageUsers);
    let mut new = payload.into_inner();
    new.email = normalize_email(&new.email);
    new.validate()?;
    if data.repo.find_user_by_email(&new.email).await?.is_some() {
        return Err(ApiError::Conflict(EMAIL_TAKEN.into()));
    }
    let user = data
        .repo
        .create_user(&UserRecord {
            name: new.name.trim().to_string(),
            email: new.email,
            password_hash: hash_password(&new.password)?,
            role: new.role.unwrap_or(Role::User),
        })
        .await?;
    Ok(HttpResponse::Created().json(user))
}

async fn save_user(data: &AppState, id: Id, changes: UpdateUser) -> Result<User, ApiError> {
    let current = data.repo.get_user(id).await?;
    let name = changes.name.map(|n| n.trim().to_string()).unwrap_or(current.name);
    let email = changes.email.map(|e| normalize_email(&e)).unwrap_or(current.email);
    if let Some(other) = data.repo.find_user_by_email(&email).await? {
        if other.id != id {
            return Err(ApiError::Conflict(EMAIL_TAKEN.into()));
        }
    }
    let user = data.repo.update_user(id, &name, &email, changes.role.unwrap_or(current.role)).await?;
    if let Some(password) = changes.password {
        data.repo.update_password(id, &hash_password(&password)?).await?;
    }
    Ok(user)
}

#[utoipa::path(
    put,
    path = "/api/v1/usuarios/{id}",
    params(("id" = Id, Path, description = "User id")),
    request_body = NewUser,
    responses(
        (status = 200, description = "User replaced", body = User),
        (status = 403, description = "Admins only"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn replace_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewUser>,
) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageUsers);
    let new = payload.into_inner();
    new.validate()?;
    let changes = UpdateUser {
        name: Some(new.name),
        email: Some(new.email),
        role: new.role,
        password: Some(new.password),
    };
    Ok(HttpResponse::Ok().json(save_user(&data, path.into_inner(), changes).await?))
}

#[utoipa::path(
    patch,
    path = "/api/v1/usuarios/{id}",
    params(("id" = Id, Path, description = "User id")),
    request_body = UpdateUser,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 403, description = "Admins only"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn patch_user(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateUser>,
) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageUsers);
    let changes = payload.into_inner();
    changes.validate()?;
    Ok(HttpResponse::Ok().json(save_user(&data, path.into_inner(), changes).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/usuarios/{id}",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "User not found"),
        (status = 409, description = "User still owns quotes")
    )
)]
pub async fn delete_user(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageUsers);
    let id = path.into_inner();
    data.repo.delete_user(id).await?;
    tracing::info!(user_id = id, by = %auth.0.sub, "user deleted");
    Ok(HttpResponse::NoContent().finish())
}

// ─────────────────────────── categories ───────────────────────────

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteCategoryQuery {
    #[serde(default)]
    pub force: bool,
}

#[utoipa::path(
    get,
    path = "/api/v1/categorias",
    params(
        ("limit" = Option<i64>, Query, description = "Page size (1-200, default 50)"),
        ("offset" = Option<i64>, Query, description = "Rows to skip")
    ),
    responses((status = 200, description = "Categories by name", body = CategoryPage))
)]
pub async fn list_categories(data: web::Data<AppState>, q: web::Query<PageParams>) -> Result<HttpResponse, ApiError> {
    let categories = data.repo.list_categories(q.limit(), q.offset()).await?;
    let total = data.repo.count_categories().await?;
    Ok(HttpResponse::Ok().json(page(categories, total, &q)))
}

#[utoipa::path(
    get,
    path = "/api/v1/categorias/search",
    params(
        ("q" = String, Query, description = "Substring of name or description"),
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("offset" = Option<i64>, Query, description = "Rows to skip")
    ),
    responses(
        (status = 200, description = "Matching categories", body = [Category]),
        (status = 400, description = "Missing search term")
    )
)]
pub async fn search_categories(data: web::Data<AppState>, q: web::Query<SearchQuery>) -> Result<HttpResponse, ApiError> {
    let term = q.q.as_deref().map(str::trim).filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("search term 'q' is required".into()))?;
    let params = PageParams { limit: q.limit, offset: q.offset };
    let found = data.repo.search_categories(term, params.limit(), params.offset()).await?;
    Ok(HttpResponse::Ok().json(found))
}

#[utoipa::path(
    get,
    path = "/api/v1/categorias/{id}",
    params(("id" = Id, Path, description = "Category id")),
    responses(
        (status = 200, description = "Category with its quote count", body = CategoryDetail),
        (status = 404, description = "Category not found")
    )
)]
pub async fn get_category(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let category = data.repo.get_category(id).await?;
    let filter = QuoteFilter { category_id: Some(id), ..Default::default() };
    let quote_count = data.repo.count_quotes(&filter).await?;
    Ok(HttpResponse::Ok().json(CategoryDetail { category, quote_count }))
}

#[utoipa::path(
    get,
    path = "/api/v1/categorias/{id}/frases",
    params(
        ("id" = Id, Path, description = "Category id"),
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("offset" = Option<i64>, Query, description = "Rows to skip")
    ),
    responses(
        (status = 200, description = "Quotes of the category", body = QuotePage),
        (status = 404, description = "Category not found")
    )
)]
pub async fn category_quotes(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    q: web::Query<PageParams>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.repo.get_category(id).await?;
    let mut filter = QuoteFilter { category_id: Some(id), ..Default::default() };
    restrict_visibility(auth.as_ref(), &mut filter);
    let quotes = data.repo.list_quotes(&filter, q.limit(), q.offset()).await?;
    let total = data.repo.count_quotes(&filter).await?;
    Ok(HttpResponse::Ok().json(page(quotes, total, &q)))
}

#[utoipa::path(
    get,
    path = "/api/v1/categorias/{id}/estadisticas",
    params(("id" = Id, Path, description = "Category id")),
    responses(
        (status = 200, description = "Quote counts by status", body = QuoteStats),
        (status = 404, description = "Category not found")
    )
)]
pub async fn category_stats(data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    data.repo.get_category(id).await?;
    Ok(HttpResponse::Ok().json(data.repo.quote_stats(StatsScope::Category(id)).await?))
}

async fn save_category(data: &AppState, id: Option<Id>, mut values: NewCategory) -> Result<Category, ApiError> {
    values.name = values.name.trim().to_string();
    values.validate()?;
    if let Some(existing) = data.repo.find_category_by_name(&values.name).await? {
        if Some(existing.id) != id {
            return Err(ApiError::Conflict(CATEGORY_NAME_TAKEN.into()));
        }
    }
    Ok(match id {
        Some(id) => data.repo.update_category(id, &values).await?,
        None => data.repo.create_category(&values).await?,
    })
}

#[utoipa::path(
    post,
    path = "/api/v1/categorias",
    request_body = NewCategory,
    responses(
        (status = 201, description = "Category created", body = Category),
        (status = 400, description = "Invalid data"),
        (status = 403, description = "Admins only"),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn create_category(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewCategory>) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageCategories);
    let category = save_category(&data, None, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(category))
}

#[utoipa::path(
    put,
    path = "/api/v1/categorias/{id}",
    params(("id" = Id, Path, description = "Category id")),
    request_body = NewCategory,
    responses(
        (status = 200, description = "Category replaced", body = Category),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Category not found"),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn replace_category(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<NewCategory>,
) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageCategories);
    let category = save_category(&data, Some(path.into_inner()), payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(category))
}

#[utoipa::path(
    patch,
    path = "/api/v1/categorias/{id}",
    params(("id" = Id, Path, description = "Category id")),
    request_body = UpdateCategory,
    responses(
        (status = 200, description = "Category updated", body = Category),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Category not found"),
        (status = 409, description = "Name already taken")
    )
)]
pub async fn patch_category(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateCategory>,
) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageCategories);
    let id = path.into_inner();
    let current = data.repo.get_category(id).await?;
    let patch = payload.into_inner();
    let values = NewCategory {
        name: patch.name.unwrap_or(current.name),
        // an empty description clears it
        description: match patch.description {
            Some(d) if d.trim().is_empty() => None,
            Some(d) => Some(d),
            None => current.description,
        },
    };
    Ok(HttpResponse::Ok().json(save_category(&data, Some(id), values).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/categorias/{id}",
    params(
        ("id" = Id, Path, description = "Category id"),
        ("force" = Option<bool>, Query, description = "Also delete the category's quotes")
    ),
    responses(
        (status = 204, description = "Category deleted"),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Category not found"),
        (status = 409, description = "Category still has quotes")
    )
)]
pub async fn delete_category(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    q: web::Query<DeleteCategoryQuery>,
) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageCategories);
    let id = path.into_inner();
    data.repo.delete_category(id, q.force).await?;
    tracing::info!(category_id = id, force = q.force, "category deleted");
    Ok(HttpResponse::NoContent().finish())
}

// ───────────────────────────── quotes ─────────────────────────────

/// Query string of `GET /frases`.
#[derive(Debug, Default, Deserialize)]
pub struct QuoteQuery {
    pub status: Option<QuoteStatus>,
    pub categoria_id: Option<Id>,
    pub creado_por: Option<Id>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RandomQuery {
    pub count: Option<i64>,
    pub categoria_id: Option<Id>,
}

/// Callers without [`Action::ViewUnpublished`] only ever see published quotes.
fn restrict_visibility(auth: Option<&Auth>, filter: &mut QuoteFilter) {
    let privileged = auth.is_some_and(|a| authorize(a.role(), Action::ViewUnpublished));
    if !privileged {
        filter.status = Some(QuoteStatus::Published);
    }
}

async fn ensure_category(data: &AppState, id: Id) -> Result<(), ApiError> {
    data.repo.get_category(id).await?;
    Ok(())
}

/// Load a quote the caller is allowed to modify.
async fn editable_quote(data: &AppState, auth: &Auth, id: Id) -> Result<Quote, ApiError> {
    let quote = data.repo.get_quote(id).await?;
    require_permission!(auth, Action::EditQuote { own: quote.created_by == auth.user_id()? });
    Ok(quote)
}

#[utoipa::path(
    get,
    path = "/api/v1/frases",
    params(
        ("status" = Option<QuoteStatus>, Query, description = "Admins only; others always get published"),
        ("categoria_id" = Option<Id>, Query, description = "Category filter"),
        ("creado_por" = Option<Id>, Query, description = "Creator filter"),
        ("search" = Option<String>, Query, description = "Substring of text or author"),
        ("limit" = Option<i64>, Query, description = "Page size (1-200, default 50)"),
        ("offset" = Option<i64>, Query, description = "Rows to skip")
    ),
    responses((status = 200, description = "Quotes, newest first", body = QuotePage))
)]
pub async fn list_quotes(auth: Option<Auth>, data: web::Data<AppState>, q: web::Query<QuoteQuery>) -> Result<HttpResponse, ApiError> {
    let q = q.into_inner();
    let mut filter = QuoteFilter {
        status: q.status,
        category_id: q.categoria_id,
        created_by: q.creado_por,
        search: q.search.filter(|s| !s.trim().is_empty()),
    };
    restrict_visibility(auth.as_ref(), &mut filter);
    let params = PageParams { limit: q.limit, offset: q.offset };
    let quotes = data.repo.list_quotes(&filter, params.limit(), params.offset()).await?;
    let total = data.repo.count_quotes(&filter).await?;
    Ok(HttpResponse::Ok().json(page(quotes, total, &params)))
}

#[utoipa::path(
    get,
    path = "/api/v1/frases/publicadas",
    params(
        ("limit" = Option<i64>, Query, description = "Page size"),
        ("offset" = Option<i64>, Query, description = "Rows to skip")
    ),
    responses((status = 200, description = "Published quotes", body = QuotePage))
)]
pub async fn published_quotes(data: web::Data<AppState>, q: web::Query<PageParams>) -> Result<HttpResponse, ApiError> {
    let filter = QuoteFilter { status: Some(QuoteStatus::Published), ..Default::default() };
    let quotes = data.repo.list_quotes(&filter, q.limit(), q.offset()).await?;
    let total = data.repo.count_quotes(&filter).await?;
    Ok(HttpResponse::Ok().json(page(quotes, total, &q)))
}

#[utoipa::path(
    get,
    path = "/api/v1/frases/aleatorias",
    params(
        ("count" = Option<i64>, Query, description = "How many (1-50, default 1)"),
        ("categoria_id" = Option<Id>, Query, description = "Restrict to one category")
    ),
    responses((status = 200, description = "Random published quotes", body = [Quote]))
)]
pub async fn random_quotes(data: web::Data<AppState>, q: web::Query<RandomQuery>) -> Result<HttpResponse, ApiError> {
    let count = q.count.unwrap_or(1).clamp(1, MAX_RANDOM);
    Ok(HttpResponse::Ok().json(data.repo.random_quotes(count, q.categoria_id).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/frases/estadisticas",
    responses(
        (status = 200, description = "Global counts", body = GlobalStats),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn global_stats(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ViewGlobalStats);
    Ok(HttpResponse::Ok().json(data.repo.global_stats().await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/frases/estadisticas/usuario/{id}",
    params(("id" = Id, Path, description = "User id")),
    responses(
        (status = 200, description = "Counts for one creator", body = QuoteStats),
        (status = 403, description = "Admins or the user themself"),
        (status = 404, description = "User not found")
    )
)]
pub async fn user_stats(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    require_permission!(auth, Action::ViewUserStats { own: id == auth.user_id()? });
    data.repo.get_user(id).await?;
    Ok(HttpResponse::Ok().json(data.repo.quote_stats(StatsScope::User(id)).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/frases/{id}",
    params(("id" = Id, Path, description = "Quote id")),
    responses(
        (status = 200, description = "Quote", body = Quote),
        (status = 404, description = "Quote not found or not visible")
    )
)]
pub async fn get_quote(auth: Option<Auth>, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let quote = data.repo.get_quote(path.into_inner()).await?;
    if quote.status != QuoteStatus::Published {
        // unpublished quotes are visible to whoever may edit them
        let visible = match &auth {
            Some(a) => authorize(a.role(), Action::EditQuote { own: a.user_id().is_ok_and(|me| me == quote.created_by) }),
            None => false,
        };
        if !visible {
            return Err(ApiError::NotFound("quote not found".into()));
        }
    }
    Ok(HttpResponse::Ok().json(quote))
}

#[utoipa::path(
    post,
    path = "/api/v1/frases",
    request_body = NewQuote,
    responses(
        (status = 201, description = "Quote created", body = Quote),
        (status = 400, description = "Invalid data"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Category not found")
    )
)]
pub async fn create_quote(auth: Auth, data: web::Data<AppState>, payload: web::Json<NewQuote>) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::CreateQuote);
    let new = payload.into_inner();
    ensure_category(&data, new.category_id).await?;
    let created = quote::create(data.repo.as_quotes(), auth.user_id()?, new, Utc::now()).await?;
    tracing::info!(quote_id = created.id, status = created.status.as_str(), "quote created");
    Ok(HttpResponse::Created().json(created))
}

/// Ownership check plus, when the category changes, its existence.
async fn check_edit(data: &AppState, auth: &Auth, id: Id, category_id: Option<Id>) -> Result<(), ApiError> {
    let current = editable_quote(data, auth, id).await?;
    if let Some(category_id) = category_id.filter(|c| *c != current.category_id) {
        ensure_category(data, category_id).await?;
    }
    Ok(())
}

#[utoipa::path(
    put,
    path = "/api/v1/frases/{id}",
    params(("id" = Id, Path, description = "Quote id")),
    request_body = ReplaceQuote,
    responses(
        (status = 200, description = "Quote replaced", body = Quote),
        (status = 400, description = "Invalid data"),
        (status = 403, description = "Not your quote"),
        (status = 404, description = "Quote or category not found")
    )
)]
pub async fn replace_quote(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ReplaceQuote>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let body = payload.into_inner();
    check_edit(&data, &auth, id, Some(body.category_id)).await?;
    let updated = quote::replace(data.repo.as_quotes(), id, body, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    patch,
    path = "/api/v1/frases/{id}",
    params(("id" = Id, Path, description = "Quote id")),
    request_body = QuotePatch,
    responses(
        (status = 200, description = "Quote updated", body = Quote),
        (status = 400, description = "Invalid data"),
        (status = 403, description = "Not your quote"),
        (status = 404, description = "Quote or category not found")
    )
)]
pub async fn patch_quote(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<QuotePatch>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let patch = payload.into_inner();
    check_edit(&data, &auth, id, patch.category_id).await?;
    let updated = quote::update(data.repo.as_quotes(), id, patch, Utc::now()).await?;
    Ok(HttpResponse::Ok().json(updated))
}

async fn apply_transition(data: &AppState, auth: &Auth, id: Id, t: Transition) -> Result<HttpResponse, ApiError> {
    editable_quote(data, auth, id).await?;
    let quote = quote::transition(data.repo.as_quotes(), id, t, Utc::now()).await?;
    tracing::info!(quote_id = id, status = quote.status.as_str(), by = %auth.0.sub, "quote transitioned");
    Ok(HttpResponse::Ok().json(quote))
}

#[utoipa::path(
    patch,
    path = "/api/v1/frases/{id}/publicar",
    params(("id" = Id, Path, description = "Quote id")),
    responses(
        (status = 200, description = "Quote published", body = Quote),
        (status = 403, description = "Not your quote"),
        (status = 404, description = "Quote not found")
    )
)]
pub async fn publish_quote(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    apply_transition(&data, &auth, path.into_inner(), Transition::Publish).await
}

#[utoipa::path(
    patch,
    path = "/api/v1/frases/{id}/programar",
    params(("id" = Id, Path, description = "Quote id")),
    request_body = ScheduleRequest,
    responses(
        (status = 200, description = "Quote scheduled", body = Quote),
        (status = 400, description = "Date not in the future"),
        (status = 403, description = "Not your quote"),
        (status = 404, description = "Quote not found")
    )
)]
pub async fn schedule_quote(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<ScheduleRequest>,
) -> Result<HttpResponse, ApiError> {
    apply_transition(&data, &auth, path.into_inner(), Transition::Schedule(payload.scheduled_at)).await
}

#[utoipa::path(
    patch,
    path = "/api/v1/frases/{id}/borrador",
    params(("id" = Id, Path, description = "Quote id")),
    responses(
        (status = 200, description = "Quote back to draft", body = Quote),
        (status = 403, description = "Not your quote"),
        (status = 404, description = "Quote not found")
    )
)]
pub async fn draft_quote(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    apply_transition(&data, &auth, path.into_inner(), Transition::Draft).await
}

#[utoipa::path(
    delete,
    path = "/api/v1/frases/{id}",
    params(("id" = Id, Path, description = "Quote id")),
    responses(
        (status = 204, description = "Quote deleted"),
        (status = 403, description = "Not your quote"),
        (status = 404, description = "Quote not found")
    )
)]
pub async fn delete_quote(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    editable_quote(&data, &auth, id).await?;
    data.repo.delete_quote(id).await?;
    Ok(HttpResponse::NoContent().finish())
}

// ─────────────────────────── scheduler ───────────────────────────

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SchedulerCommandResponse {
    /// Whether the command changed anything.
    pub changed: bool,
    pub status: SchedulerStatus,
}

#[utoipa::path(
    get,
    path = "/api/v1/frases/scheduler/estado",
    responses(
        (status = 200, description = "Scheduler state", body = SchedulerStatus),
        (status = 403, description = "Admins only")
    )
)]
pub async fn scheduler_status(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageScheduler);
    Ok(HttpResponse::Ok().json(data.scheduler.status()))
}

#[utoipa::path(
    post,
    path = "/api/v1/frases/scheduler/iniciar",
    responses(
        (status = 200, description = "Started, or already running", body = SchedulerCommandResponse),
        (status = 403, description = "Admins only")
    )
)]
pub async fn scheduler_start(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageScheduler);
    let changed = data.scheduler.start();
    Ok(HttpResponse::Ok().json(SchedulerCommandResponse { changed, status: data.scheduler.status() }))
}

#[utoipa::path(
    post,
    path = "/api/v1/frases/scheduler/detener",
    responses(
        (status = 200, description = "Stopped, or already stopped", body = SchedulerCommandResponse),
        (status = 403, description = "Admins only")
    )
)]
pub async fn scheduler_stop(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageScheduler);
    let changed = data.scheduler.stop();
    Ok(HttpResponse::Ok().json(SchedulerCommandResponse { changed, status: data.scheduler.status() }))
}

#[utoipa::path(
    post,
    path = "/api/v1/frases/scheduler/ejecutar",
    responses(
        (status = 200, description = "One check ran now", body = CheckSummary),
        (status = 403, description = "Admins only")
    )
)]
pub async fn scheduler_run(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    require_permission!(auth, Action::ManageScheduler);
    Ok(HttpResponse::Ok().json(data.scheduler.run_check().await?))
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::Role;

// Postgres BIGSERIAL everywhere
pub type Id = i64;

/// Publication state of a quote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum QuoteStatus {
    #[default]
    Draft,
    Scheduled,
    Published,
}

impl QuoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteStatus::Draft => "draft",
            QuoteStatus::Scheduled => "scheduled",
            QuoteStatus::Published => "published",
        }
    }
}

impl std::str::FromStr for QuoteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(QuoteStatus::Draft),
            "scheduled" => Ok(QuoteStatus::Scheduled),
            "published" => Ok(QuoteStatus::Published),
            other => Err(format!("unknown quote status '{other}'")),
        }
    }
}

impl TryFrom<String> for QuoteStatus {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> { s.parse() }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Quote {
    #[serde(rename = "id_quote")]
    pub id: Id,
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "autor")]
    pub author: Option<String>,
    #[serde(rename = "fecha_creacion")]
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[sqlx(try_from = "String")]
    pub status: QuoteStatus,
    #[serde(rename = "creado_por")]
    pub created_by: Id,
    #[serde(rename = "categoria_id")]
    pub category_id: Id,
    // denormalised for read convenience
    #[serde(rename = "creado_por_nombre")]
    pub created_by_name: String,
    #[serde(rename = "categoria_nombre")]
    pub category_name: String,
}

/// Body of `POST /frases`. The creator comes from the token, never the body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewQuote {
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "autor", default)]
    pub author: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<QuoteStatus>,
    #[serde(rename = "categoria_id")]
    pub category_id: Id,
}

/// Body of `PUT /frases/{id}`: every mutable field is restated.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReplaceQuote {
    #[serde(rename = "texto")]
    pub text: String,
    #[serde(rename = "autor", default)]
    pub author: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: QuoteStatus,
    #[serde(rename = "categoria_id")]
    pub category_id: Id,
}

/// Body of `PATCH /frases/{id}`. Absent fields keep their stored value; an empty
/// `autor` clears the author.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct QuotePatch {
    #[serde(rename = "texto", default)]
    pub text: Option<String>,
    #[serde(rename = "autor", default)]
    pub author: Option<String>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<QuoteStatus>,
    #[serde(rename = "categoria_id", default)]
    pub category_id: Option<Id>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScheduleRequest {
    pub scheduled_at: DateTime<Utc>,
}

/// Listing filters; all optional and combined with AND.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuoteFilter {
    pub status: Option<QuoteStatus>,
    #[serde(rename = "categoria_id")]
    pub category_id: Option<Id>,
    #[serde(rename = "creado_por")]
    pub created_by: Option<Id>,
    /// substring match on text or author
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct Category {
    #[serde(rename = "id_category")]
    pub id: Id,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "descripcion")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct NewCategory {
    #[serde(rename = "nombre")]
    #[validate(custom(function = "crate::models::validate_category_name"))]
    pub name: String,
    #[serde(rename = "descripcion", default)]
    #[validate(length(max = 255, message = "description cannot exceed 255 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct UpdateCategory {
    #[serde(rename = "nombre", default)]
    pub name: Option<String>,
    #[serde(rename = "descripcion", default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CategoryDetail {
    #[serde(flatten)]
    pub category: Category,
    #[serde(rename = "frases_count")]
    pub quote_count: i64,
}

pub(crate) fn validate_category_name(name: &str) -> Result<(), validator::ValidationError> {
    let len = name.trim().chars().count();
    if len < 2 {
        return Err(rule("name_length", "name must have at least 2 characters"));
    }
    if name.chars().count() > 80 {
        return Err(rule("name_length", "name cannot exceed 80 characters"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct User {
    #[serde(rename = "id_user")]
    pub id: Id,
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "correo_electronico")]
    pub email: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    #[serde(rename = "fecha_creacion")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "rol")]
    #[sqlx(try_from = "String")]
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct NewUser {
    #[serde(rename = "nombre")]
    #[validate(custom(function = "crate::models::validate_user_name"))]
    pub name: String,
    #[serde(rename = "correo_electronico")]
    #[validate(email(message = "email address is not valid"))]
    pub email: String,
    #[validate(length(min = 6, message = "password must have at least 6 characters"))]
    pub password: String,
    #[serde(rename = "rol", default)]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, Validate)]
pub struct UpdateUser {
    #[serde(rename = "nombre", default)]
    #[validate(length(min = 2, message = "name must have at least 2 characters"))]
    pub name: Option<String>,
    #[serde(rename = "correo_electronico", default)]
    #[validate(email(message = "email address is not valid"))]
    pub email: Option<String>,
    #[serde(rename = "rol", default)]
    pub role: Option<Role>,
    #[serde(default)]
    #[validate(length(min = 6, message = "password must have at least 6 characters"))]
    pub password: Option<String>,
}

/// What the store needs to insert a user; the password is already hashed.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

pub(crate) fn validate_user_name(name: &str) -> Result<(), validator::ValidationError> {
    if name.trim().chars().count() < 2 {
        return Err(rule("name_length", "name must have at least 2 characters"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[serde(rename = "correo_electronico")]
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    #[serde(rename = "usuario")]
    pub user: User,
}

/// Quote counts by status for some scope (user, category or everything).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct QuoteStats {
    #[serde(rename = "total_frases")]
    pub total: i64,
    #[serde(rename = "frases_publicadas")]
    pub published: i64,
    #[serde(rename = "frases_borrador")]
    pub draft: i64,
    #[serde(rename = "frases_programadas")]
    pub scheduled: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct GlobalStats {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub quotes: QuoteStats,
    #[serde(rename = "usuarios_activos")]
    pub active_users: i64,
    #[serde(rename = "categorias_usadas")]
    pub categories_used: i64,
}

#[derive(Debug, Clone, Copy)]
pub enum StatsScope {
    All,
    User(Id),
    Category(Id),
}

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl PageParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[aliases(QuotePage = Page<Quote>, CategoryPage = Page<Category>, UserPage = Page<User>)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

fn rule(code: &'static str, message: &'static str) -> validator::ValidationError {
    let mut err = validator::ValidationError::new(code);
    err.message = Some(message.into());
    err
}

/// Flatten validator output into sorted human-readable rules.
pub fn validation_messages(errors: &validator::ValidationErrors) -> Vec<String> {
    let mut out: Vec<String> = errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{field} is invalid"))
            })
        })
        .collect();
    out.sort();
    out
}

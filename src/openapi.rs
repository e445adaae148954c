use crate::auth::Role;
use crate::models::{
    AuthResponse, Category, CategoryDetail, CategoryPage, GlobalStats, LoginRequest, NewCategory, NewQuote, NewUser,
    Quote, QuotePage, QuotePatch, QuoteStats, QuoteStatus, ReplaceQuote, ScheduleRequest, UpdateCategory, UpdateUser,
    User, UserPage,
};
use crate::scheduler::{CheckSummary, SchedulerState, SchedulerStatus};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::auth_me,
        crate::routes::refresh_token,
        crate::routes::list_users,
        crate::routes::get_user,
        crate::routes::create_user,
        crate::routes::replace_user,
        crate::routes::patch_user,
        crate::routes::delete_user,
        crate::routes::list_categories,
        crate::routes::search_categories,
        crate::routes::get_category,
        crate::routes::category_quotes,
        crate::routes::category_stats,
        crate::routes::create_category,
        crate::routes::replace_category,
        crate::routes::patch_category,
        crate::routes::delete_category,
        crate::routes::list_quotes,
        crate::routes::published_quotes,
        crate::routes::random_quotes,
        crate::routes::global_stats,
        crate::routes::user_stats,
        crate::routes::get_quote,
        crate::routes::create_quote,
        crate::routes::replace_quote,
        crate::routes::patch_quote,
        crate::routes::publish_quote,
        crate::routes::schedule_quote,
        crate::routes::draft_quote,
        crate::routes::delete_quote,
        crate::routes::scheduler_status,
        crate::routes::scheduler_start,
        crate::routes::scheduler_stop,
        crate::routes::scheduler_run,
    ),
    components(schemas(
        Quote, QuoteStatus, NewQuote, ReplaceQuote, QuotePatch, ScheduleRequest, QuotePage,
        Category, NewCategory, UpdateCategory, CategoryDetail, CategoryPage,
        User, NewUser, UpdateUser, UserPage, Role, LoginRequest, AuthResponse,
        QuoteStats, GlobalStats,
        SchedulerState, SchedulerStatus, CheckSummary, crate::routes::SchedulerCommandResponse,
    )),
    tags(
        (name = "auth", description = "Registration and tokens"),
        (name = "usuarios", description = "User administration"),
        (name = "categorias", description = "Quote categories"),
        (name = "frases", description = "Quotes and their publication lifecycle"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_lifecycle_paths() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;
        assert!(paths.contains_key("/api/v1/frases/{id}/programar"));
        assert!(paths.contains_key("/api/v1/frases/scheduler/estado"));
        assert!(paths.contains_key("/api/v1/categorias/{id}"));
    }
}

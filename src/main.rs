use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Compress, web, App, HttpServer};
use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{info, warn, Level};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi; // bring trait into scope for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

use gratiday::auth::Role;
use gratiday::config::{AppConfig, BootstrapAdmin};
use gratiday::models::UserRecord;
use gratiday::openapi::ApiDoc;
use gratiday::password::hash_password;
use gratiday::repo::{inmem::InMemRepo, pg::PgRepo, Repo};
use gratiday::{config, not_found, AppState};

/// Make sure the configured admin account exists and really is an admin.
async fn ensure_admin(repo: &dyn Repo, admin: &BootstrapAdmin) -> anyhow::Result<()> {
    let email = admin.email.trim().to_lowercase();
    match repo.find_user_by_email(&email).await? {
        Some(user) if user.role == Role::Admin => {}
        Some(user) => {
            repo.update_user(user.id, &user.name, &user.email, Role::Admin).await?;
            info!(user_id = user.id, "bootstrap account promoted to admin");
        }
        None => {
            let user = repo
                .create_user(&UserRecord {
                    name: admin.name.clone(),
                    email,
                    password_hash: hash_password(&admin.password)?,
                    role: Role::Admin,
                })
                .await?;
            info!(user_id = user.id, "bootstrap admin created");
        }
    }
    Ok(())
}

async fn build_state(cfg: &AppConfig) -> anyhow::Result<AppState> {
    let interval = Duration::from_secs(cfg.scheduler_interval_minutes * 60);
    let state = match &cfg.database_url {
        Some(url) => {
            use sqlx::postgres::PgPoolOptions;
            let pool = PgPoolOptions::new()
                .max_connections(cfg.db_max_connections)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await
                .context("connecting to Postgres")?;
            sqlx::migrate!("./migrations").run(&pool).await.context("running migrations")?;
            info!("Using Postgres repository backend");
            AppState::new(PgRepo::new(pool), interval)
        }
        None => {
            warn!("DATABASE_URL not set; using the in-memory repository (data is lost on restart)");
            AppState::new(InMemRepo::new(), interval)
        }
    };
    if let Some(admin) = &cfg.bootstrap_admin {
        ensure_admin(state.repo.as_ref(), admin).await?;
    }
    Ok(state)
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env automatically only in debug builds to reduce manual setup overhead.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    // Structured logging initialisation
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let cfg = AppConfig::from_env().context("invalid configuration")?;
    gratiday::auth::install(cfg.jwt_settings());
    info!(
        frontend = %cfg.frontend_url,
        scheduler_enabled = cfg.scheduler_enabled,
        interval_minutes = cfg.scheduler_interval_minutes,
        "Bootstrapping GratiDay API"
    );

    let mut state = build_state(&cfg).await?;
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => state = state.with_metrics(handle),
        Err(e) => warn!(error = %e, "prometheus recorder not installed"),
    }

    if cfg.scheduler_enabled {
        state.scheduler.start();
    } else {
        info!("scheduler disabled by configuration");
    }

    let openapi = ApiDoc::openapi();
    let scheduler = state.scheduler.clone();
    let frontend_url = cfg.frontend_url.clone();

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            // during local dev allow React/Vite default ports
            .allowed_origin("http://localhost:5173")
            .allowed_origin("http://127.0.0.1:5173")
            .allowed_origin(&frontend_url)
            .allow_any_header()
            .allowed_methods(["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
            .max_age(3600);

        App::new()
            .wrap(TracingLogger::default())
            .wrap(Compress::default())
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .configure(config)
            .service(SwaggerUi::new("/docs/{_:.*}").url("/docs/openapi.json", openapi.clone()))
            .default_service(web::to(not_found))
    })
    .bind((cfg.bind_addr.as_str(), cfg.port))
    .with_context(|| format!("binding {}:{}", cfg.bind_addr, cfg.port))?;

    info!("Listening on http://{}:{}", cfg.bind_addr, cfg.port);
    server.run().await?;

    scheduler.stop();
    info!("server stopped");
    Ok(())
}

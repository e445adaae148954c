use std::time::Duration;

use actix_web::{test, web, App};
use gratiday::{
    auth::{create_jwt, Role},
    models::UserRecord,
    not_found,
    repo::{inmem::InMemRepo, UserRepo},
    routes::{config, AppState},
};
use serde_json::{json, Value};
use serial_test::serial;

// Helper to ensure JWT secret present
fn setup_env() {
    std::env::set_var("JWT_SECRET", "test-secret-must-be-32-bytes-long!!");
}

/// Fresh store with one admin account; returns the admin's token.
async fn seeded_state() -> (AppState, String) {
    setup_env();
    let repo = InMemRepo::new();
    let admin = repo
        .create_user(&UserRecord {
            name: "Admin".into(),
            email: "admin@gratiday.app".into(),
            password_hash: "unused".into(),
            role: Role::Admin,
        })
        .await
        .unwrap();
    let token = create_jwt(admin.id, &admin.email, Role::Admin).unwrap();
    (AppState::new(repo, Duration::from_secs(300)), token)
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(config)
                .default_service(web::to(not_found)),
        )
        .await
    };
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}

#[actix_web::test]
#[serial]
async fn register_login_and_me() {
    let (state, _) = seeded_state().await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"nombre": "Ana", "correo_electronico": "Ana@Example.com", "password": "gracias123", "rol": "admin"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let body: Value = test::read_body_json(resp).await;
    // public sign-up never grants admin
    assert_eq!(body["usuario"]["rol"], "user");
    assert_eq!(body["usuario"]["correo_electronico"], "ana@example.com");
    assert!(body["usuario"].get("password_hash").is_none());

    // duplicate email
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"nombre": "Ana", "correo_electronico": "ana@example.com", "password": "gracias123"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);

    // wrong password
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({"correo_electronico": "ana@example.com", "password": "nope"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 401);

    let req = test::TestRequest::post()
        .uri("/api/v1/auth/login")
        .set_json(json!({"correo_electronico": "ana@example.com", "password": "gracias123"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 200);
    let body: Value = test::read_body_json(resp).await;
    let token = body["token"].as_str().unwrap().to_string();

    let req = test::TestRequest::get().uri("/api/v1/auth/me").insert_header(bearer(&token)).to_request();
    let me: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(me["nombre"], "Ana");

    let req = test::TestRequest::get().uri("/api/v1/auth/me").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 401);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "unauthorized");
}

#[actix_web::test]
#[serial]
async fn registration_reports_every_broken_rule() {
    let (state, _) = seeded_state().await;
    let app = app!(state);
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"nombre": "A", "correo_electronico": "nope", "password": "1"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["details"].as_array().unwrap().len(), 3);
}

#[actix_web::test]
#[serial]
async fn category_admin_flow() {
    let (state, admin) = seeded_state().await;
    let app = app!(state);
    let user = create_jwt(99, "someone@example.com", Role::User).unwrap();

    // users cannot manage categories
    let req = test::TestRequest::post()
        .uri("/api/v1/categorias")
        .insert_header(bearer(&user))
        .set_json(json!({"nombre": "Motivación"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::post()
        .uri("/api/v1/categorias")
        .insert_header(bearer(&admin))
        .set_json(json!({"nombre": "Motivación", "descripcion": "Para empezar el día"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let cat: Value = test::read_body_json(resp).await;
    let cat_id = cat["id_category"].as_i64().unwrap();

    let req = test::TestRequest::post()
        .uri("/api/v1/categorias")
        .insert_header(bearer(&admin))
        .set_json(json!({"nombre": "Motivación"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 409);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "conflict");

    let req = test::TestRequest::get().uri(&format!("/api/v1/categorias/{cat_id}")).to_request();
    let detail: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(detail["nombre"], "Motivación");
    assert_eq!(detail["frases_count"], 0);

    let req = test::TestRequest::get().uri("/api/v1/categorias/search?q=motiv").to_request();
    let found: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(found.as_array().unwrap().len(), 1);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/categorias/{cat_id}"))
        .insert_header(bearer(&admin))
        .set_json(json!({"descripcion": "Nueva"}))
        .to_request();
    let patched: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(patched["nombre"], "Motivación");
    assert_eq!(patched["descripcion"], "Nueva");

    // an empty description clears it
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/categorias/{cat_id}"))
        .insert_header(bearer(&admin))
        .set_json(json!({"descripcion": ""}))
        .to_request();
    let cleared: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(cleared["nombre"], "Motivación");
    assert!(cleared["descripcion"].is_null());

    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/categorias/{cat_id}"))
        .insert_header(bearer(&admin))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
}

#[actix_web::test]
#[serial]
async fn quote_visibility_and_lifecycle() {
    let (state, admin) = seeded_state().await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/categorias")
        .insert_header(bearer(&admin))
        .set_json(json!({"nombre": "Motivación"}))
        .to_request();
    let cat: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let cat_id = cat["id_category"].as_i64().unwrap();

    // plain user signs up and writes a draft
    let req = test::TestRequest::post()
        .uri("/api/v1/auth/register")
        .set_json(json!({"nombre": "Luis", "correo_electronico": "luis@example.com", "password": "gracias123"}))
        .to_request();
    let body: Value = test::read_body_json(test::call_service(&app, req).await).await;
    let luis = body["token"].as_str().unwrap().to_string();

    let req = test::TestRequest::post()
        .uri("/api/v1/frases")
        .insert_header(bearer(&luis))
        .set_json(json!({"texto": "Gratitude opens every door", "categoria_id": cat_id}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let quote: Value = test::read_body_json(resp).await;
    assert_eq!(quote["status"], "draft");
    assert_eq!(quote["creado_por_nombre"], "Luis");
    assert_eq!(quote["categoria_nombre"], "Motivación");
    let quote_id = quote["id_quote"].as_i64().unwrap();

    // unknown category
    let req = test::TestRequest::post()
        .uri("/api/v1/frases")
        .insert_header(bearer(&luis))
        .set_json(json!({"texto": "Gratitude opens every door", "categoria_id": 999}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    // drafts are hidden from listings for non-admins
    let req = test::TestRequest::get().uri("/api/v1/frases?status=draft").insert_header(bearer(&luis)).to_request();
    let page: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(page["total"], 0);
    assert_eq!(page["limit"], 50);

    let req = test::TestRequest::get().uri("/api/v1/frases?status=draft").insert_header(bearer(&admin)).to_request();
    let page: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(page["total"], 1);

    // anonymous readers cannot open the draft either
    let req = test::TestRequest::get().uri(&format!("/api/v1/frases/{quote_id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);

    // scheduling in the past is a validation error
    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/frases/{quote_id}/programar"))
        .insert_header(bearer(&luis))
        .set_json(json!({"scheduled_at": "2000-01-01T00:00:00Z"}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/frases/{quote_id}/programar"))
        .insert_header(bearer(&luis))
        .set_json(json!({"scheduled_at": "2999-01-01T00:00:00Z"}))
        .to_request();
    let scheduled: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(scheduled["status"], "scheduled");

    // a full replace must restate the date of a scheduled quote
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/frases/{quote_id}"))
        .insert_header(bearer(&luis))
        .set_json(json!({"texto": "Gratitude opens every door", "status": "scheduled", "categoria_id": cat_id}))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 400);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/frases/{quote_id}/publicar"))
        .insert_header(bearer(&admin))
        .to_request();
    let published: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(published["status"], "published");
    assert!(published["scheduled_at"].is_null());

    let req = test::TestRequest::get().uri("/api/v1/frases/publicadas").to_request();
    let page: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(page["total"], 1);

    let req = test::TestRequest::get().uri("/api/v1/frases/aleatorias?count=3").to_request();
    let random: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(random.as_array().unwrap().len(), 1);

    // another user may not touch it
    let other = create_jwt(12345, "other@example.com", Role::User).unwrap();
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/frases/{quote_id}"))
        .insert_header(bearer(&other))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::get().uri("/api/v1/frases/estadisticas").insert_header(bearer(&luis)).to_request();
    let stats: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(stats["total_frases"], 1);
    assert_eq!(stats["frases_publicadas"], 1);
    assert_eq!(stats["usuarios_activos"], 1);

    // the category now refuses a plain delete
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/categorias/{cat_id}"))
        .insert_header(bearer(&admin))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 409);
    let req = test::TestRequest::delete()
        .uri(&format!("/api/v1/categorias/{cat_id}?force=true"))
        .insert_header(bearer(&admin))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    let req = test::TestRequest::get().uri(&format!("/api/v1/frases/{quote_id}")).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn scheduler_endpoints_are_admin_only() {
    let (state, admin) = seeded_state().await;
    let app = app!(state);
    let user = create_jwt(77, "someone@example.com", Role::User).unwrap();

    let req = test::TestRequest::get().uri("/api/v1/frases/scheduler/estado").insert_header(bearer(&user)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::get().uri("/api/v1/frases/scheduler/estado").insert_header(bearer(&admin)).to_request();
    let status: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(status["running"], false);
    assert_eq!(status["intervalMinutes"], 5);

    let req = test::TestRequest::post().uri("/api/v1/frases/scheduler/iniciar").insert_header(bearer(&admin)).to_request();
    let started: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(started["changed"], true);
    assert_eq!(started["status"]["state"], "running");

    let req = test::TestRequest::post().uri("/api/v1/frases/scheduler/iniciar").insert_header(bearer(&admin)).to_request();
    let again: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(again["changed"], false);

    let req = test::TestRequest::post().uri("/api/v1/frases/scheduler/ejecutar").insert_header(bearer(&admin)).to_request();
    let summary: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(summary["due"], 0);

    let req = test::TestRequest::post().uri("/api/v1/frases/scheduler/detener").insert_header(bearer(&admin)).to_request();
    let stopped: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(stopped["changed"], true);
    assert_eq!(stopped["status"]["running"], false);
}

#[actix_web::test]
#[serial]
async fn users_are_admin_managed() {
    let (state, admin) = seeded_state().await;
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/usuarios")
        .insert_header(bearer(&admin))
        .set_json(json!({"nombre": "Editora", "correo_electronico": "editora@example.com", "password": "gracias123", "rol": "admin"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 201);
    let created: Value = test::read_body_json(resp).await;
    assert_eq!(created["rol"], "admin");
    let id = created["id_user"].as_i64().unwrap();

    let req = test::TestRequest::get().uri("/api/v1/usuarios?limit=1").insert_header(bearer(&admin)).to_request();
    let page: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(page["total"], 2);
    assert_eq!(page["data"].as_array().unwrap().len(), 1);

    let req = test::TestRequest::patch()
        .uri(&format!("/api/v1/usuarios/{id}"))
        .insert_header(bearer(&admin))
        .set_json(json!({"rol": "user"}))
        .to_request();
    let patched: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(patched["rol"], "user");
    assert_eq!(patched["nombre"], "Editora");

    // a user may read themself but not the list
    let own = create_jwt(id, "editora@example.com", Role::User).unwrap();
    let req = test::TestRequest::get().uri(&format!("/api/v1/usuarios/{id}")).insert_header(bearer(&own)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 200);
    let req = test::TestRequest::get().uri("/api/v1/usuarios").insert_header(bearer(&own)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 403);

    let req = test::TestRequest::delete().uri(&format!("/api/v1/usuarios/{id}")).insert_header(bearer(&admin)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 204);
    let req = test::TestRequest::get().uri(&format!("/api/v1/usuarios/{id}")).insert_header(bearer(&admin)).to_request();
    assert_eq!(test::call_service(&app, req).await.status(), 404);
}

#[actix_web::test]
#[serial]
async fn unknown_routes_get_json_404() {
    let (state, _) = seeded_state().await;
    let app = app!(state);
    let req = test::TestRequest::get().uri("/api/v1/nada").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "not_found");

    let req = test::TestRequest::get().uri("/").to_request();
    let welcome: Value = test::read_body_json(test::call_service(&app, req).await).await;
    assert_eq!(welcome["message"], "GratiDay API");
}

/// HTTP server factory and configuration.
/// Provides reusable functions to create and configure the HTTP server
/// for use in both the main binary and tests.
use crate::db::{self, DbPool};
use crate::handlers::{
    create_room, delete_room, get_password, get_qr, get_room, health, join_room, json_config,
    query_config, ws_connect, ServerConfig, SessionRouter,
};
use crate::rooms::RoomService;
use crate::tokens::{TokenService, DEFAULT_TOKEN_TTL_DAYS};
use actix_web::{middleware, web, App, HttpServer};
use chrono::Utc;
use std::time::Duration;

/// Shared application state handed to every worker
#[derive(Clone)]
pub struct AppState {
    pub rooms: web::Data<RoomService>,
    pub router: web::Data<SessionRouter>,
    pub config: web::Data<ServerConfig>,
}

impl AppState {
    pub fn new(pool: DbPool, tokens: TokenService, config: ServerConfig) -> Self {
        let rooms = web::Data::new(RoomService::new(pool, std::sync::Arc::new(tokens)));
        let router = web::Data::new(SessionRouter::new(rooms.clone().into_inner()));

        AppState {
            rooms,
            router,
            config: web::Data::new(config),
        }
    }

    /// In-memory database, random signing secret, default limits
    pub fn for_tests() -> Self {
        let tokens =
            TokenService::with_random_secret(chrono::Duration::days(DEFAULT_TOKEN_TTL_DAYS));
        AppState::new(db::create_test_pool(), tokens, ServerConfig::default())
    }
}

/// Register state, extractor configs and routes on an app
pub fn configure_app(state: &AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    let state = state.clone();
    move |cfg: &mut web::ServiceConfig| {
        cfg.app_data(state.rooms)
            .app_data(state.router)
            .app_data(state.config)
            .app_data(json_config())
            .app_data(query_config())
            // REST endpoints
            .route("/health", web::get().to(health))
            .route("/api/rooms/create", web::post().to(create_room))
            .route("/api/rooms/join", web::post().to(join_room))
            .route("/api/rooms/{code}", web::get().to(get_room))
            .route("/api/rooms/{code}", web::delete().to(delete_room))
            .route("/api/rooms/{code}/password", web::get().to(get_password))
            .route("/api/rooms/{code}/qr", web::get().to(get_qr))
            // WebSocket endpoint
            .route("/ws", web::get().to(ws_connect));
    }
}

/// Create a configured HTTP server
///
/// # Example
/// ```ignore
/// let state = AppState::new(db::create_pool("tempchat.db")?, tokens, ServerConfig::default());
/// let server = server::create_http_server(state, "127.0.0.1:4000")?;
/// server.await?;
/// ```
pub fn create_http_server(
    state: AppState,
    bind_addr: &str,
) -> std::io::Result<actix_web::dev::Server> {
    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .configure(configure_app(&state))
    })
    .bind(bind_addr)?
    .run();

    Ok(server)
}

/// Create a test HTTP server on a random port around the given state
///
/// # Returns
/// A tuple of (server, bind_address) where bind_address can be used to make requests
pub fn create_test_http_server_with_state(
    state: AppState,
) -> std::io::Result<(actix_web::dev::Server, String)> {
    // Bind to 127.0.0.1:0 to get a random available port
    let server = HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .configure(configure_app(&state))
    })
    .workers(1)
    .bind("127.0.0.1:0")?;

    let addr_str = server
        .addrs()
        .first()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "No bind address found"))?
        .to_string();

    Ok((server.run(), addr_str))
}

/// Create a test HTTP server with an in-memory database
///
/// # Example
/// ```ignore
/// let (server, addr) = server::create_test_http_server()?;
/// tokio::spawn(server);
/// let resp = reqwest::get(format!("http://{}/health", addr)).await?;
/// ```
pub fn create_test_http_server() -> std::io::Result<(actix_web::dev::Server, String)> {
    create_test_http_server_with_state(AppState::for_tests())
}

/// Periodically prune lapsed members and delete abandoned rooms.
/// Sessions still bound to a collected room are told it was deleted.
pub fn spawn_garbage_collector(state: &AppState, every: Duration) {
    let rooms = state.rooms.clone();
    let router = state.router.clone();

    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match rooms.collect_garbage(Utc::now()).await {
                Ok(report) => {
                    for room_code in &report.rooms_deleted {
                        router.close_room(room_code).await;
                    }
                }
                Err(e) => log::error!("Garbage collection failed: {}", e),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_create_http_server_invalid_address() {
        let result = create_http_server(AppState::for_tests(), "invalid_address:99999");
        assert!(result.is_err(), "create_http_server should fail with invalid address");
    }

    #[tokio::test]
    async fn test_create_test_http_server() {
        let (_server, addr) = create_test_http_server().expect("server creation should succeed");
        assert!(addr.contains("127.0.0.1:"), "Address should contain 127.0.0.1:");
        let port_part = addr.split(':').nth(1).unwrap_or("");
        assert!(!port_part.is_empty(), "Port should be assigned");
    }

    #[actix_web::test]
    async fn test_health_endpoint() {
        let app = test::init_service(App::new().configure(configure_app(&AppState::for_tests()))).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[actix_web::test]
    async fn test_create_and_join_endpoints() {
        let app = test::init_service(App::new().configure(configure_app(&AppState::for_tests()))).await;

        let req = test::TestRequest::post()
            .uri("/api/rooms/create")
            .set_json(json!({"deviceId": "device_a", "autoDelete": "1m"}))
            .to_request();
        let created: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(created["autoDelete"], "1m");
        let code = created["roomCode"].as_str().unwrap().to_string();
        let password = created["password"].as_str().unwrap().to_string();

        let req = test::TestRequest::post()
            .uri("/api/rooms/join")
            .set_json(json!({"roomCode": code.to_lowercase(), "password": password}))
            .to_request();
        let joined: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(joined["roomCode"], code.as_str());
        assert_eq!(joined["isOwner"], false);
        assert_ne!(joined["token"], created["token"]);

        let req = test::TestRequest::get()
            .uri(&format!("/api/rooms/{}", code))
            .to_request();
        let info: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(info["memberCount"], 2);
        assert_eq!(info["isOwner"], false);
    }

    #[actix_web::test]
    async fn test_rejected_upgrade_leaves_no_session() {
        let state = AppState::for_tests();
        let app = test::init_service(App::new().configure(configure_app(&state))).await;

        // Plain GETs without upgrade headers fail the handshake
        for _ in 0..3 {
            let req = test::TestRequest::get().uri("/ws").to_request();
            let resp = test::call_service(&app, req).await;
            assert!(resp.status().is_client_error());
        }

        assert_eq!(state.router.session_count().await, 0);
    }

    #[actix_web::test]
    async fn test_malformed_body_is_validation_error() {
        let app = test::init_service(App::new().configure(configure_app(&AppState::for_tests()))).await;

        let req = test::TestRequest::post()
            .uri("/api/rooms/create")
            .set_json(json!({"deviceId": "device_a", "autoDelete": "5m"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "validation_error");
    }

    #[actix_web::test]
    async fn test_unknown_room_returns_404() {
        let app = test::init_service(App::new().configure(configure_app(&AppState::for_tests()))).await;

        let req = test::TestRequest::get().uri("/api/rooms/NOPE00").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 404);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "not_found");
    }

    #[actix_web::test]
    async fn test_qr_uses_public_origin() {
        let mut state = AppState::for_tests();
        state.config = web::Data::new(ServerConfig {
            public_origin: Some("https://chat.example".to_string()),
            ..ServerConfig::default()
        });
        let created = state
            .rooms
            .create("device_a", Default::default(), Some("123456"))
            .await
            .unwrap();
        let app = test::init_service(App::new().configure(configure_app(&state))).await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/rooms/{}/qr", created.room_code))
            .to_request();
        let qr: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            qr["url"],
            format!("https://chat.example/?room={}&password=123456", created.room_code)
        );
        assert!(qr["qrCode"].as_str().unwrap().starts_with("data:image/png;base64,"));
        let expires_in = qr["expiresIn"].as_i64().unwrap();
        assert!(expires_in > 0 && expires_in <= 120_000);
    }
}

/// REST API handlers for HTTP endpoints.
/// Handles room creation, joins, owner operations and the QR join link.
use crate::db::models::*;
use crate::error::RoomError;
use crate::handlers::websocket::SessionRouter;
use crate::handlers::ServerConfig;
use crate::rooms::{normalize_room_code, RoomService};
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde_json::json;

type HandlerResult = Result<HttpResponse, RoomError>;

/// Health check
/// GET /health
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

/// Create a room owned by the calling device
/// POST /api/rooms/create
pub async fn create_room(
    rooms: web::Data<RoomService>,
    req: web::Json<CreateRoomRequest>,
) -> HandlerResult {
    let req = req.into_inner();
    let created = rooms
        .create(
            &req.device_id,
            req.auto_delete.unwrap_or_default(),
            req.password.as_deref(),
        )
        .await?;

    Ok(HttpResponse::Ok().json(CreateRoomResponse {
        room_code: created.room_code,
        password: created.password,
        token: created.token,
        auto_delete: created.auto_delete,
    }))
}

/// Join a room with its code and password
/// POST /api/rooms/join
pub async fn join_room(
    rooms: web::Data<RoomService>,
    req: web::Json<JoinRoomRequest>,
) -> HandlerResult {
    let joined = rooms
        .join(&req.room_code, &req.password, req.device_id.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(JoinRoomResponse {
        token: joined.token,
        room_code: joined.room_code,
        auto_delete: joined.auto_delete,
        is_owner: joined.is_owner,
    }))
}

/// GET /api/rooms/:code
pub async fn get_room(
    rooms: web::Data<RoomService>,
    room_code: web::Path<String>,
    query: web::Query<TokenQuery>,
) -> HandlerResult {
    let info = rooms
        .room_info(&room_code, query.token.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(RoomInfoResponse {
        room_code: info.room_code,
        auto_delete: info.auto_delete,
        member_count: info.member_count,
        is_owner: info.is_owner,
    }))
}

/// Owner-only password lookup
/// GET /api/rooms/:code/password
pub async fn get_password(
    rooms: web::Data<RoomService>,
    room_code: web::Path<String>,
    query: web::Query<TokenQuery>,
) -> HandlerResult {
    let password = rooms.password(&room_code, query.token.as_deref()).await?;
    Ok(HttpResponse::Ok().json(PasswordResponse { password }))
}

/// Short-lived QR join link
/// GET /api/rooms/:code/qr
pub async fn get_qr(
    req: HttpRequest,
    rooms: web::Data<RoomService>,
    config: web::Data<ServerConfig>,
    room_code: web::Path<String>,
) -> HandlerResult {
    let origin = match &config.public_origin {
        Some(origin) => origin.clone(),
        None => {
            let info = req.connection_info();
            format!("{}://{}", info.scheme(), info.host())
        }
    };

    let now = Utc::now();
    let artifact = rooms.qr_at(&room_code, &origin, now).await?;
    let expires_in = (artifact.expires_at - now.timestamp_millis()).max(0);

    Ok(HttpResponse::Ok().json(QrResponse {
        qr_code: artifact.image,
        url: artifact.url,
        expires_at: artifact.expires_at,
        expires_in,
    }))
}

/// Owner-only deletion; bound sessions are told and unbound
/// DELETE /api/rooms/:code
pub async fn delete_room(
    rooms: web::Data<RoomService>,
    router: web::Data<SessionRouter>,
    room_code: web::Path<String>,
    query: web::Query<TokenQuery>,
) -> HandlerResult {
    let room_code = normalize_room_code(&room_code);
    rooms.delete(&room_code, query.token.as_deref()).await?;
    router.close_room(&room_code).await;

    Ok(HttpResponse::Ok().json(DeleteRoomResponse { success: true }))
}

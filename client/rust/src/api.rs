//! Server API client for REST endpoints

use crate::error::{ClientError, Result};
use crate::models::{
    ApiErrorBody, AutoDeletePolicy, CreateRoomRequest, CreateRoomResponse, JoinRoomRequest,
    JoinRoomResponse, QrCode, RoomInfo,
};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

/// Room API client
#[derive(Clone)]
pub struct RoomApi {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct PasswordResponse {
    password: String,
}

impl RoomApi {
    /// Create a new room API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Decode a success body, or turn an error body into `ClientError::Api`
    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiErrorBody>(&text) {
            Ok(body) => Err(ClientError::Api {
                kind: body.error,
                message: body.message,
            }),
            Err(_) => Err(ClientError::ServerError(format!(
                "Request failed with status {}",
                status
            ))),
        }
    }

    /// Check if the server is healthy
    pub async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ClientError::ServerError(format!(
                "Health check failed: {}",
                response.status()
            )))
        }
    }

    /// Create a room owned by this device
    pub async fn create_room(
        &self,
        device_id: &str,
        auto_delete: AutoDeletePolicy,
        password: Option<&str>,
    ) -> Result<CreateRoomResponse> {
        let request = CreateRoomRequest {
            device_id: device_id.to_string(),
            auto_delete,
            password: password.map(str::to_string),
        };

        let response = self
            .client
            .post(format!("{}/api/rooms/create", self.base_url))
            .json(&request)
            .send()
            .await?;

        let created: CreateRoomResponse = Self::decode(response).await?;
        log::info!("Created room {}", created.room_code);
        Ok(created)
    }

    /// Join a room with its code and password
    pub async fn join_room(
        &self,
        room_code: &str,
        password: &str,
        device_id: &str,
    ) -> Result<JoinRoomResponse> {
        let request = JoinRoomRequest {
            room_code: room_code.to_string(),
            password: password.to_string(),
            device_id: device_id.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/api/rooms/join", self.base_url))
            .json(&request)
            .send()
            .await?;

        let joined: JoinRoomResponse = Self::decode(response).await?;
        log::info!(
            "Joined room {}{}",
            joined.room_code,
            if joined.is_owner { " as owner" } else { "" }
        );
        Ok(joined)
    }

    pub async fn room_info(&self, room_code: &str, token: Option<&str>) -> Result<RoomInfo> {
        let mut request = self
            .client
            .get(format!("{}/api/rooms/{}", self.base_url, room_code));
        if let Some(token) = token {
            request = request.query(&[("token", token)]);
        }

        Self::decode(request.send().await?).await
    }

    /// Owner-only password lookup
    pub async fn password(&self, room_code: &str, token: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/api/rooms/{}/password", self.base_url, room_code))
            .query(&[("token", token)])
            .send()
            .await?;

        let body: PasswordResponse = Self::decode(response).await?;
        Ok(body.password)
    }

    /// Current QR join link for a room
    pub async fn qr(&self, room_code: &str) -> Result<QrCode> {
        let response = self
            .client
            .get(format!("{}/api/rooms/{}/qr", self.base_url, room_code))
            .send()
            .await?;

        Self::decode(response).await
    }

    /// Owner-only deletion
    pub async fn delete_room(&self, room_code: &str, token: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/api/rooms/{}", self.base_url, room_code))
            .query(&[("token", token)])
            .send()
            .await?;

        #[derive(Deserialize)]
        struct DeleteResponse {
            success: bool,
        }

        let body: DeleteResponse = Self::decode(response).await?;
        if body.success {
            log::info!("Deleted room {}", room_code);
            Ok(())
        } else {
            Err(ClientError::ServerError(format!(
                "Server refused to delete room {}",
                room_code
            )))
        }
    }
}

//! HTTP API client for the chat backend.
//!
//! Socket-preferred operations (reactions, read receipts) fall back to
//! these endpoints when the chat socket is down; everything else is
//! REST-only.

use std::sync::Arc;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use intrachat_shared::{
    AddMembersRequest, ApiError, AttachmentUploadResponse, ChangeRoleRequest, CreateThreadRequest,
    EditMessageRequest, Message, MessagePage, ReactionRequest, RemoveMemberRequest,
    SendMessageRequest, Thread, ThreadFilters, ThreadListResponse, UpdateGroupSettingsRequest,
};

use crate::token::TokenProvider;

/// HTTP client carrying bearer auth from the token provider.
#[derive(Clone)]
pub struct ChatApi {
    client: Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl ChatApi {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        format!("{base}/{path}")
    }

    fn authed(&self, rb: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.tokens.access_token() {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    async fn send<TRes: DeserializeOwned>(
        &self,
        rb: reqwest::RequestBuilder,
    ) -> Result<TRes, ApiError> {
        let resp = self
            .authed(rb)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        let is_success = resp.status().is_success();
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;

        if !is_success {
            return Err(ApiError::Http { status, body: text });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::Deserialize(e.to_string()))
    }

    /// For endpoints answering 204 or an empty body.
    async fn send_no_content(&self, rb: reqwest::RequestBuilder) -> Result<(), ApiError> {
        let resp = self
            .authed(rb)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(());
        }
        let text = resp
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("failed to read body: {e}")))?;
        Err(ApiError::Http { status, body: text })
    }

    async fn get_json<TRes: DeserializeOwned>(&self, path: &str) -> Result<TRes, ApiError> {
        self.send(self.client.get(self.url(path))).await
    }

    async fn post_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        self.send(self.client.post(self.url(path)).json(body)).await
    }

    async fn patch_json<TReq: Serialize, TRes: DeserializeOwned>(
        &self,
        path: &str,
        body: &TReq,
    ) -> Result<TRes, ApiError> {
        self.send(self.client.patch(self.url(path)).json(body))
            .await
    }

    // --- Threads ---

    pub async fn list_threads(&self, filters: &ThreadFilters) -> Result<ThreadListResponse, ApiError> {
        let mut query = Vec::new();
        if let Some(search) = &filters.search {
            if !search.is_empty() {
                query.push(format!("search={}", urlencoding::encode(search)));
            }
        }
        if let Some(page) = filters.page {
            query.push(format!("page={page}"));
        }
        let path = if query.is_empty() {
            "/api/internal-chat/threads/".to_string()
        } else {
            format!("/api/internal-chat/threads/?{}", query.join("&"))
        };
        self.get_json(&path).await
    }

    pub async fn create_thread(&self, req: &CreateThreadRequest) -> Result<Thread, ApiError> {
        self.post_json("/api/internal-chat/threads/", req).await
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Thread, ApiError> {
        self.get_json(&format!("/api/internal-chat/threads/{thread_id}/"))
            .await
    }

    pub async fn leave_thread(&self, thread_id: &str) -> Result<(), ApiError> {
        self.send_no_content(
            self.client
                .post(self.url(&format!("/api/internal-chat/threads/{thread_id}/leave/"))),
        )
        .await
    }

    pub async fn add_members(
        &self,
        thread_id: &str,
        req: &AddMembersRequest,
    ) -> Result<Thread, ApiError> {
        self.post_json(&format!("/api/internal-chat/threads/{thread_id}/members/"), req)
            .await
    }

    pub async fn remove_member(
        &self,
        thread_id: &str,
        req: &RemoveMemberRequest,
    ) -> Result<Thread, ApiError> {
        self.post_json(
            &format!("/api/internal-chat/threads/{thread_id}/members/remove/"),
            req,
        )
        .await
    }

    pub async fn change_role(
        &self,
        thread_id: &str,
        req: &ChangeRoleRequest,
    ) -> Result<Thread, ApiError> {
        self.post_json(
            &format!("/api/internal-chat/threads/{thread_id}/members/role/"),
            req,
        )
        .await
    }

    pub async fn update_group_settings(
        &self,
        thread_id: &str,
        req: &UpdateGroupSettingsRequest,
    ) -> Result<Thread, ApiError> {
        self.patch_json(
            &format!("/api/internal-chat/threads/{thread_id}/settings/"),
            req,
        )
        .await
    }

    pub async fn mark_thread_read(&self, thread_id: &str) -> Result<(), ApiError> {
        self.send_no_content(
            self.client
                .post(self.url(&format!("/api/internal-chat/threads/{thread_id}/read/"))),
        )
        .await
    }

    // --- Messages ---

    /// Fetch a newest-first page. `cursor` comes from a previous page's
    /// `next` field.
    pub async fn list_messages(
        &self,
        thread_id: &str,
        cursor: Option<&str>,
    ) -> Result<MessagePage, ApiError> {
        let path = match cursor {
            Some(cursor) => format!(
                "/api/internal-chat/threads/{thread_id}/messages/?cursor={}",
                urlencoding::encode(cursor)
            ),
            None => format!("/api/internal-chat/threads/{thread_id}/messages/"),
        };
        self.get_json(&path).await
    }

    pub async fn send_message(
        &self,
        thread_id: &str,
        req: &SendMessageRequest,
    ) -> Result<Message, ApiError> {
        self.post_json(&format!("/api/internal-chat/threads/{thread_id}/messages/"), req)
            .await
    }

    pub async fn edit_message(
        &self,
        message_id: &str,
        req: &EditMessageRequest,
    ) -> Result<Message, ApiError> {
        self.patch_json(&format!("/api/internal-chat/messages/{message_id}/"), req)
            .await
    }

    pub async fn delete_message(&self, message_id: &str) -> Result<(), ApiError> {
        self.send_no_content(
            self.client
                .delete(self.url(&format!("/api/internal-chat/messages/{message_id}/"))),
        )
        .await
    }

    /// REST fallback for reactions; the response is the full refreshed
    /// message.
    pub async fn add_reaction(
        &self,
        message_id: &str,
        req: &ReactionRequest,
    ) -> Result<Message, ApiError> {
        self.post_json(
            &format!("/api/internal-chat/messages/{message_id}/reactions/"),
            req,
        )
        .await
    }

    pub async fn remove_reaction(
        &self,
        message_id: &str,
        req: &ReactionRequest,
    ) -> Result<Message, ApiError> {
        self.send(
            self.client
                .delete(self.url(&format!(
                    "/api/internal-chat/messages/{message_id}/reactions/"
                )))
                .json(req),
        )
        .await
    }

    // --- Attachments ---

    pub async fn upload_attachment(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<AttachmentUploadResponse, ApiError> {
        let mut part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        if let Some(content_type) = content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| ApiError::Network(e.to_string()))?;
        }
        let form = reqwest::multipart::Form::new().part("file", part);

        self.send(
            self.client
                .post(self.url("/api/internal-chat/attachments/"))
                .multipart(form),
        )
        .await
    }
}

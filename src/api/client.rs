use std::time::Duration;

use log::debug;
use reqwest::{Client as HttpClient, Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use crate::api::ChatApi;
use crate::api::models::{
    AuthResponse, Bid, BidDraft, Conversation, LoginRequest, Message, MessageType, ProfileUpdate,
    Project, ProjectDraft, ProjectFilters, ProjectStatus, RegisterRequest, User,
};
use crate::error::ApiError;
use crate::utils::normalize_url;

#[derive(Deserialize)]
struct ChatsBody {
    chats: Option<Vec<Conversation>>,
}

#[derive(Deserialize)]
struct ChatBody {
    chat: Conversation,
}

#[derive(Deserialize)]
struct MessagesBody {
    messages: Option<Vec<Message>>,
}

#[derive(Deserialize)]
struct MessageBody {
    message: Message,
}

#[derive(Deserialize)]
struct UnreadBody {
    unread_count: u64,
}

#[derive(Deserialize)]
struct UserBody {
    user: User,
}

#[derive(Deserialize)]
struct ProjectsBody {
    projects: Option<Vec<Project>>,
}

#[derive(Deserialize)]
struct ProjectBody {
    project: Project,
}

#[derive(Deserialize)]
struct BidsBody {
    bids: Option<Vec<Bid>>,
}

#[derive(Deserialize)]
struct BidBody {
    bid: Bid,
}

/// reqwest-backed client for the marketplace REST API.
pub struct HttpApi {
    http: HttpClient,
    base: Url,
    token: Option<String>,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base = Self::base_api(base_url)?;
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base,
            token: None,
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn set_token(&mut self, token: impl Into<String>) {
        self.token = Some(token.into());
    }

    /// API root, always ending in `/api/`.
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn base_api(base_url: &str) -> Result<Url, ApiError> {
        let normalized = normalize_url(base_url);
        let trimmed = normalized.trim_end_matches('/');
        let api = if trimmed.ends_with("/api") {
            format!("{trimmed}/")
        } else {
            format!("{trimmed}/api/")
        };
        Url::parse(&api).map_err(|e| ApiError::validation(format!("invalid server URL: {e}")))
    }

    fn with_auth(req: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| ApiError::validation(format!("invalid endpoint '{path}': {e}")))?;
        debug!("{method} {url}");
        Ok(Self::with_auth(
            self.http.request(method, url),
            self.token.as_deref(),
        ))
    }

    async fn execute<T: DeserializeOwned>(req: RequestBuilder) -> Result<T, ApiError> {
        let resp = Self::checked(req).await?;
        resp.json::<T>()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    async fn execute_ack(req: RequestBuilder) -> Result<(), ApiError> {
        Self::checked(req).await.map(|_| ())
    }

    async fn checked(req: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let message = body
            .get("error")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .unwrap_or_else(|| format!("HTTP {status}"));
        Err(ApiError::from_status(status.as_u16(), message))
    }

    /// Exchange credentials for a session token. The token is not stored here.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<AuthResponse, ApiError> {
        credentials.validate()?;
        let req = self.request(Method::POST, "auth/login")?.json(credentials);
        Self::execute(req).await
    }

    /// Create an account; the response carries a token like `login`.
    pub async fn register(&self, account: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        account.validate()?;
        let req = self.request(Method::POST, "auth/register")?.json(account);
        Self::execute(req).await
    }

    /// The token is dropped locally even when the server call fails.
    pub async fn logout(&mut self) -> Result<(), ApiError> {
        let req = self.request(Method::POST, "auth/logout")?;
        self.token = None;
        Self::execute_ack(req).await
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        let req = self.request(Method::GET, "auth/me")?;
        Ok(Self::execute::<UserBody>(req).await?.user)
    }

    pub async fn update_profile(&self, fields: &ProfileUpdate) -> Result<User, ApiError> {
        fields.validate()?;
        let req = self.request(Method::PUT, "auth/profile")?.json(fields);
        Ok(Self::execute::<UserBody>(req).await?.user)
    }

    pub async fn list_projects(&self, filters: &ProjectFilters) -> Result<Vec<Project>, ApiError> {
        let req = self.request(Method::GET, "projects")?.query(filters);
        Ok(Self::execute::<ProjectsBody>(req)
            .await?
            .projects
            .unwrap_or_default())
    }

    pub async fn get_project(&self, project_id: u64) -> Result<Project, ApiError> {
        let req = self.request(Method::GET, &format!("projects/{project_id}"))?;
        Ok(Self::execute::<ProjectBody>(req).await?.project)
    }

    pub async fn create_project(&self, draft: &ProjectDraft) -> Result<Project, ApiError> {
        draft.validate()?;
        let req = self.request(Method::POST, "projects")?.json(draft);
        Ok(Self::execute::<ProjectBody>(req).await?.project)
    }

    pub async fn update_project(
        &self,
        project_id: u64,
        draft: &ProjectDraft,
    ) -> Result<Project, ApiError> {
        draft.validate()?;
        let req = self
            .request(Method::PUT, &format!("projects/{project_id}"))?
            .json(draft);
        Ok(Self::execute::<ProjectBody>(req).await?.project)
    }

    pub async fn delete_project(&self, project_id: u64) -> Result<(), ApiError> {
        let req = self.request(Method::DELETE, &format!("projects/{project_id}"))?;
        Self::execute_ack(req).await
    }

    pub async fn set_project_status(
        &self,
        project_id: u64,
        status: ProjectStatus,
    ) -> Result<Project, ApiError> {
        if status == ProjectStatus::Deleted {
            return Err(ApiError::validation(
                "Valid statuses are: open, in_progress, completed, cancelled",
            ));
        }
        let req = self
            .request(Method::PUT, &format!("projects/{project_id}/status"))?
            .json(&json!({ "status": status }));
        Ok(Self::execute::<ProjectBody>(req).await?.project)
    }

    pub async fn list_bids(&self, project_id: u64) -> Result<Vec<Bid>, ApiError> {
        let req = self.request(Method::GET, &format!("projects/{project_id}/bids"))?;
        Ok(Self::execute::<BidsBody>(req).await?.bids.unwrap_or_default())
    }

    pub async fn create_bid(&self, draft: &BidDraft) -> Result<Bid, ApiError> {
        draft.validate()?;
        let req = self.request(Method::POST, "bids")?.json(draft);
        Ok(Self::execute::<BidBody>(req).await?.bid)
    }
}

impl ChatApi for HttpApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        let req = self.request(Method::GET, "chats")?;
        Ok(Self::execute::<ChatsBody>(req).await?.chats.unwrap_or_default())
    }

    async fn create_conversation(
        &self,
        project_id: u64,
        freelancer_id: u64,
    ) -> Result<Conversation, ApiError> {
        let body = json!({
            "project_id": project_id,
            "freelancer_id": freelancer_id,
        });
        let req = self.request(Method::POST, "chats")?.json(&body);
        Ok(Self::execute::<ChatBody>(req).await?.chat)
    }

    async fn delete_conversation(&self, conversation_id: u64) -> Result<(), ApiError> {
        let req = self.request(Method::DELETE, &format!("chats/{conversation_id}"))?;
        Self::execute_ack(req).await
    }

    async fn list_messages(&self, conversation_id: u64) -> Result<Vec<Message>, ApiError> {
        let req = self.request(Method::GET, &format!("chats/{conversation_id}/messages"))?;
        Ok(Self::execute::<MessagesBody>(req)
            .await?
            .messages
            .unwrap_or_default())
    }

    async fn send_message(
        &self,
        conversation_id: u64,
        content: String,
        kind: MessageType,
    ) -> Result<Message, ApiError> {
        if content.trim().is_empty() {
            return Err(ApiError::validation("Message cannot be empty"));
        }
        let body = json!({
            "chat_id": conversation_id,
            "content": content,
            "type": kind,
        });
        let req = self.request(Method::POST, "messages")?.json(&body);
        Ok(Self::execute::<MessageBody>(req).await?.message)
    }

    async fn mark_read(&self, conversation_id: u64) -> Result<(), ApiError> {
        let req = self.request(Method::PUT, &format!("chats/{conversation_id}/read"))?;
        Self::execute_ack(req).await
    }

    async fn unread_count(&self) -> Result<u64, ApiError> {
        let req = self.request(Method::GET, "messages/unread-count")?;
        Ok(Self::execute::<UnreadBody>(req).await?.unread_count)
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    #[default]
    Freelancer,
}

/// Participant summary embedded in conversations.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct UserRef {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub avatar: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ProjectRef {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: u64,
    pub project_id: u64,
    #[serde(default)]
    pub project: Option<ProjectRef>,
    pub client_id: u64,
    #[serde(default)]
    pub client: Option<UserRef>,
    pub freelancer_id: u64,
    #[serde(default)]
    pub freelancer: Option<UserRef>,
    #[serde(default)]
    pub unread_count: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn involves(&self, user_id: u64) -> bool {
        self.client_id == user_id || self.freelancer_id == user_id
    }

    /// The participant that is not `viewer_id`.
    pub fn counterpart(&self, viewer_id: u64) -> Option<&UserRef> {
        if self.client_id == viewer_id {
            self.freelancer.as_ref()
        } else if self.freelancer_id == viewer_id {
            self.client.as_ref()
        } else {
            None
        }
    }

    pub fn title(&self) -> &str {
        self.project
            .as_ref()
            .map(|p| p.title.as_str())
            .filter(|t| !t.is_empty())
            .unwrap_or("Project")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    System,
    File,
    Image,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: u64,
    #[serde(rename = "chat_id")]
    pub conversation_id: u64,
    pub sender_id: u64,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_url: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct User {
    pub id: u64,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub skills: String,
    #[serde(default)]
    pub rating: f64,
    #[serde(default)]
    pub completed_projects: u32,
    #[serde(default)]
    pub profession: String,
    #[serde(default)]
    pub experience: String,
    #[serde(default)]
    pub portfolio: String,
    #[serde(default)]
    pub hourly_rate: u32,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub website: String,
    #[serde(default)]
    pub linkedin: String,
    #[serde(default)]
    pub github: String,
}

/// Fields sent to the profile endpoint; `None` leaves the field untouched.
#[derive(Debug, Serialize, Clone, PartialEq, Default)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skills: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profession: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experience: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub portfolio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<String>,
}

impl ProfileUpdate {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ApiError::validation("Name cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    #[default]
    Open,
    InProgress,
    Completed,
    Cancelled,
    /// Soft-deleted; only ever returned by the server.
    Deleted,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub budget_min: u32,
    pub budget_max: u32,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub skills: String,
    #[serde(default)]
    pub requirements: String,
    #[serde(default)]
    pub urgency: String,
    #[serde(default)]
    pub status: ProjectStatus,
    pub client_id: u64,
    #[serde(default)]
    pub freelancer_id: Option<u64>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Query parameters for the project listing.
#[derive(Debug, Serialize, Clone, PartialEq, Eq, Default)]
pub struct ProjectFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_budget: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_budget: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Only the viewer's own projects, any status except deleted.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub my_projects: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

/// Body for project creation and update.
#[derive(Debug, Serialize, Clone, PartialEq, Eq, Default)]
pub struct ProjectDraft {
    pub title: String,
    pub description: String,
    pub budget_min: u32,
    pub budget_max: u32,
    pub category: String,
    pub location: String,
    pub skills: String,
    pub requirements: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub urgency: String,
}

impl ProjectDraft {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::validation("Title is required"));
        }
        if self.category.trim().is_empty() {
            return Err(ApiError::validation("Category is required"));
        }
        if self.location.trim().is_empty() {
            return Err(ApiError::validation("Location is required"));
        }
        if self.budget_min == 0 || self.budget_max == 0 {
            return Err(ApiError::validation("Budget must be greater than zero"));
        }
        if self.budget_min > self.budget_max {
            return Err(ApiError::validation(
                "Budget minimum must be less than maximum",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Bid {
    pub id: u64,
    pub project_id: u64,
    pub freelancer_id: u64,
    #[serde(default)]
    pub freelancer: Option<UserRef>,
    pub amount: u32,
    #[serde(default)]
    pub proposal: String,
    #[serde(default)]
    pub timeline: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct BidDraft {
    pub project_id: u64,
    pub amount: u32,
    pub proposal: String,
    pub timeline: String,
}

impl BidDraft {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.amount == 0 {
            return Err(ApiError::validation("Bid amount must be greater than zero"));
        }
        if self.proposal.trim().is_empty() {
            return Err(ApiError::validation("Proposal is required"));
        }
        if self.timeline.trim().is_empty() {
            return Err(ApiError::validation("Timeline is required"));
        }
        Ok(())
    }

    /// Like [`BidDraft::validate`], plus the project's budget range.
    pub fn validate_for(&self, project: &Project) -> Result<(), ApiError> {
        self.validate()?;
        if self.project_id != project.id {
            return Err(ApiError::validation("Bid does not belong to this project"));
        }
        if self.amount < project.budget_min || self.amount > project.budget_max {
            return Err(ApiError::validation(
                "Bid amount must be within project budget range",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.email.trim().is_empty() {
            return Err(ApiError::validation("Email is required"));
        }
        if self.password.chars().count() < 6 {
            return Err(ApiError::validation(
                "Password must be at least 6 characters",
            ));
        }
        Ok(())
    }
}

/// New account. The server defaults a missing role to freelancer; here it is explicit.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.name.trim().is_empty() {
            return Err(ApiError::validation("Name is required"));
        }
        let email = self.email.trim();
        if email.is_empty() {
            return Err(ApiError::validation("Email is required"));
        }
        if !email.contains('@') {
            return Err(ApiError::validation("Email address is invalid"));
        }
        if self.password.chars().count() < 6 {
            return Err(ApiError::validation(
                "Password must be at least 6 characters",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

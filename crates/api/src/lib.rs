//! Shared API types, crypto, and SQL builders for TaskFlow Pro
//!
//! This crate is the **single source of truth** for all API request/response types.
//! TypeScript types are auto-generated via `ts-rs` and consumed by the frontend.
//!
//! To regenerate TypeScript types:
//!   cargo test -p taskflow-api --features ts -- export_typescript --nocapture

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[cfg(feature = "backend")]
pub mod crypto;
#[cfg(feature = "backend")]
pub mod db;
pub mod deploy;
#[cfg(feature = "backend")]
pub mod service;

// ─── Shared Enums ────────────────────────────────────────────────────────────

/// Declare a wire enum with fixed string values, `as_str`, `parse`, and `Display`.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "ts", derive(ts_rs::TS))]
        #[cfg_attr(feature = "ts", ts(export))]
        pub enum $name {
            $(
                #[serde(rename = $wire)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($wire => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Lifecycle of a task. Transitions are direct field writes.
    pub enum TaskStatus {
        Pending => "PENDING",
        InProgress => "IN_PROGRESS",
        Completed => "COMPLETED",
        Cancelled => "CANCELLED",
        Overdue => "OVERDUE",
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

string_enum! {
    pub enum Priority {
        Low => "LOW",
        Medium => "MEDIUM",
        High => "HIGH",
        Urgent => "URGENT",
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl Priority {
    /// Severity rank used when sorting by priority.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Urgent => 3,
        }
    }
}

string_enum! {
    pub enum ReminderType {
        TaskDue => "TASK_DUE",
        TaskOverdue => "TASK_OVERDUE",
        TaskAssigned => "TASK_ASSIGNED",
        Custom => "CUSTOM",
    }
}

string_enum! {
    pub enum ReminderStatus {
        Pending => "PENDING",
        Sent => "SENT",
        Failed => "FAILED",
        Cancelled => "CANCELLED",
    }
}

string_enum! {
    /// Delivery channel for a reminder.
    pub enum Channel {
        Email => "EMAIL",
        Sms => "SMS",
        Whatsapp => "WHATSAPP",
    }
}

string_enum! {
    /// Outcome of a single delivery attempt.
    pub enum DeliveryStatus {
        Sent => "SENT",
        Failed => "FAILED",
    }
}

string_enum! {
    pub enum RecurrencePattern {
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
    }
}

string_enum! {
    /// Purpose of a one-time verification token.
    pub enum VerificationType {
        Email => "EMAIL",
        Phone => "PHONE",
        PasswordReset => "PASSWORD_RESET",
    }
}

string_enum! {
    pub enum SortOrder {
        Asc => "asc",
        Desc => "desc",
    }
}

// ─── Pagination ──────────────────────────────────────────────────────────────

/// Page metadata attached to every paginated listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
    pub pages: i64,
}

impl Pagination {
    pub fn new(page: u32, limit: u32, total: i64) -> Self {
        let limit_i = i64::from(limit.max(1));
        Self {
            page,
            limit,
            total,
            pages: (total + limit_i - 1) / limit_i,
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

/// Normalize `(page, limit)` into `(page, limit, offset)`.
pub fn page_window(page: u32, limit: u32) -> (u32, u32, u64) {
    let page = page.max(1);
    let limit = limit.clamp(1, MAX_PAGE_LIMIT);
    let offset = u64::from(page - 1) * u64::from(limit);
    (page, limit, offset)
}

// ─── Auth ────────────────────────────────────────────────────────────────────

/// Email + password registration.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Email + password login.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Public user profile. Never carries password material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub phone: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub is_email_verified: bool,
    pub is_phone_verified: bool,
    pub is_active: bool,
    pub last_login_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Returned on successful register / login.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct AuthResponse {
    pub user: UserProfile,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// Returned on refresh (token rotation).
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// Refresh token request.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Logout request (invalidate refresh token).
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct LogoutRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct VerifyTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct VerifyResponse {
    pub user: UserProfile,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct RequestPasswordResetRequest {
    pub email: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

/// Change password request.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// Generic success response for operations that don't return data.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct OkResponse {
    pub ok: bool,
}

/// Human-readable confirmation (`{"message": "..."}`).
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ─── Users ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UserStats {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub pending_tasks: i64,
    pub total_stakeholders: i64,
    pub completion_rate: f64,
}

// ─── Tasks ───────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default)]
    pub stakeholder_ids: Option<Vec<String>>,
}

/// Task dictated through the voice UI. Same fields plus transcription metadata.
#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct VoiceTaskRequest {
    #[serde(flatten)]
    pub task: CreateTaskRequest,
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "Record<string, unknown> | null"))]
    pub voice_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub due_date: Option<String>,
    /// When present, replaces the full set of linked stakeholders.
    #[serde(default)]
    pub stakeholder_ids: Option<Vec<String>>,
}

/// Query parameters for `GET /api/v1/tasks` — pagination, filtering, sorting.
#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TaskListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    /// Substring match on title or description.
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub due_date_from: Option<String>,
    pub due_date_to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpcomingQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Task {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Priority,
    pub status: TaskStatus,
    pub due_date: Option<String>,
    pub completed_at: Option<String>,
    pub is_voice_created: bool,
    #[cfg_attr(feature = "ts", ts(type = "Record<string, unknown> | null"))]
    pub voice_metadata: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

/// Compact task projection embedded in reminders and calendar events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub due_date: Option<String>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            status: task.status,
            priority: task.priority,
            due_date: task.due_date.clone(),
        }
    }
}

/// Link between a task and one of the owner's stakeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TaskStakeholder {
    pub id: String,
    pub task_id: String,
    pub stakeholder_id: String,
    pub role: String,
    pub created_at: String,
    pub stakeholder: Stakeholder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TaskWithStakeholders {
    #[serde(flatten)]
    pub task: Task,
    pub stakeholders: Vec<TaskStakeholder>,
}

/// Full task returned by `GET /api/v1/tasks/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub stakeholders: Vec<TaskStakeholder>,
    pub reminders: Vec<Reminder>,
    pub calendar_events: Vec<CalendarEvent>,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TaskListResponse {
    pub tasks: Vec<TaskWithStakeholders>,
    pub pagination: Pagination,
}

/// Count of live tasks per status. Every status is present, zero included.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TaskStatsResponse {
    pub by_status: BTreeMap<TaskStatus, i64>,
    pub total: i64,
}

// ─── Stakeholders ────────────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CreateStakeholderRequest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UpdateStakeholderRequest {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

/// Contact import (device address book, CSV).
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct BulkCreateStakeholdersRequest {
    pub stakeholders: Vec<CreateStakeholderRequest>,
}

/// An import entry that was not applied, by position in the request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SkippedContact {
    pub index: u32,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct BulkImportResponse {
    pub created: Vec<Stakeholder>,
    pub updated: Vec<Stakeholder>,
    pub skipped: Vec<SkippedContact>,
}

/// Query parameters for `GET /api/v1/stakeholders`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct StakeholderListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    /// Substring match on first/last name, email, or phone.
    pub search: Option<String>,
    pub organization: Option<String>,
    /// Comma-separated; a stakeholder matches if it carries any of them.
    pub tags: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Deserialize)]
pub struct ContactSearchQuery {
    pub contact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Stakeholder {
    pub id: String,
    pub user_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub tags: Vec<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Stakeholder {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct StakeholderSummary {
    #[serde(flatten)]
    pub stakeholder: Stakeholder,
    pub task_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct StakeholderListResponse {
    pub stakeholders: Vec<StakeholderSummary>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct StakeholderDetail {
    #[serde(flatten)]
    pub stakeholder: Stakeholder,
    pub tasks: Vec<Task>,
    pub reminder_logs: Vec<ReminderLog>,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct StakeholderStats {
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub pending_tasks: i64,
    pub overdue_tasks: i64,
    pub completion_rate: f64,
}

// ─── Reminders ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CreateReminderRequest {
    pub task_id: String,
    #[serde(rename = "type")]
    pub reminder_type: ReminderType,
    pub scheduled_at: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    #[serde(default)]
    pub is_recurring: Option<bool>,
    #[serde(default)]
    pub recurring_pattern: Option<RecurrencePattern>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UpdateReminderRequest {
    #[serde(default, rename = "type")]
    pub reminder_type: Option<ReminderType>,
    #[serde(default)]
    pub scheduled_at: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub channels: Option<Vec<Channel>>,
    #[serde(default)]
    pub is_recurring: Option<bool>,
    #[serde(default)]
    pub recurring_pattern: Option<RecurrencePattern>,
}

/// Query parameters for `GET /api/v1/reminders`.
#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ReminderListQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub status: Option<ReminderStatus>,
    #[serde(rename = "type")]
    pub reminder_type: Option<ReminderType>,
    pub task_id: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<SortOrder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct Reminder {
    pub id: String,
    pub task_id: String,
    #[serde(rename = "type")]
    pub reminder_type: ReminderType,
    pub status: ReminderStatus,
    pub scheduled_at: String,
    pub message: Option<String>,
    pub channels: Vec<Channel>,
    pub is_recurring: bool,
    pub recurring_pattern: Option<RecurrencePattern>,
    pub sent_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One delivery attempt of a reminder to one recipient on one channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ReminderLog {
    pub id: String,
    pub reminder_id: String,
    pub stakeholder_id: Option<String>,
    pub channel: Channel,
    pub status: DeliveryStatus,
    pub error: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ReminderListItem {
    #[serde(flatten)]
    pub reminder: Reminder,
    pub task: TaskSummary,
    pub recent_logs: Vec<ReminderLog>,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ReminderListResponse {
    pub reminders: Vec<ReminderListItem>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ReminderDetail {
    #[serde(flatten)]
    pub reminder: Reminder,
    pub task: TaskWithStakeholders,
    pub logs: Vec<ReminderLog>,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ReminderStats {
    pub total_reminders: i64,
    pub sent_reminders: i64,
    pub pending_reminders: i64,
    pub failed_reminders: i64,
    pub success_rate: f64,
}

// ─── Calendar ────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CreateCalendarEventRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub is_all_day: Option<bool>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct UpdateCalendarEventRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub is_all_day: Option<bool>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CalendarQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WeekQuery {
    pub start_date: String,
}

#[derive(Debug, Deserialize)]
pub struct DayQuery {
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CalendarEvent {
    pub id: String,
    pub user_id: String,
    pub task_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub is_all_day: bool,
    pub location: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CalendarEventWithTask {
    #[serde(flatten)]
    pub event: CalendarEvent,
    pub task: Option<TaskSummary>,
}

/// Events of one month keyed by start day (`YYYY-MM-DD`).
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct MonthView {
    pub year: i32,
    pub month: u32,
    pub events: BTreeMap<String, Vec<CalendarEventWithTask>>,
    pub total_events: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct WeekView {
    pub start_date: String,
    pub end_date: String,
    pub events: Vec<CalendarEventWithTask>,
    pub total_events: u32,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct DayView {
    pub date: String,
    pub events: Vec<CalendarEventWithTask>,
    pub total_events: u32,
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TestEmailRequest {
    pub to: String,
    #[serde(default)]
    pub subject: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TestMessageRequest {
    pub to: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct TestSendResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ProviderStatus {
    pub channel: Channel,
    pub provider: String,
    pub configured: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct NotificationStatusResponse {
    pub services: Vec<ProviderStatus>,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SmsBalanceResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "ts", ts(type = "unknown"))]
    pub balance: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ─── Health ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CheckStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct HealthChecks {
    pub database: CheckStatus,
}

/// `GET /api/v1/health`. Always served with 200; details live in the body.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub environment: String,
    pub checks: HealthChecks,
}

// ─── Service Error ───────────────────────────────────────────────────────────

/// Framework-agnostic service error.
///
/// Each variant maps to an HTTP status code. Both the Axum server and
/// background jobs produce these from shared business logic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl ServiceError {
    /// HTTP status code as a `u16`.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Internal(_) => 500,
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m)
            | Self::Unauthorized(m)
            | Self::Forbidden(m)
            | Self::NotFound(m)
            | Self::Conflict(m)
            | Self::Internal(m) => m,
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ServiceError {}

// ─── Error (JSON shape) ──────────────────────────────────────────────────────

/// JSON error shape `{ "error": "..." }` returned by all error responses.
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct ApiError {
    pub error: String,
}


// ─── TypeScript generation ───────────────────────────────────────────────────

#[cfg(all(test, feature = "ts"))]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use ts_rs::TS;

    /// Run with: cargo test -p taskflow-api --features ts -- export_typescript --nocapture
    #[test]
    fn export_typescript() {
        let out_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("../../frontend/src/types/api.generated.ts");

        let cfg = ts_rs::Config::new().with_large_int("number");
        let mut parts: Vec<String> = Vec::new();
        parts.push("// AUTO-GENERATED by taskflow-api — DO NOT EDIT".to_string());
        parts.push(
            "// Regenerate with: cargo test -p taskflow-api --features ts -- export_typescript"
                .to_string(),
        );
        parts.push(String::new());

        // Structs: `type X = {...}` → `export interface X {...}`
        // Enums/unions: `type X = "a" | "b"` → `export type X = "a" | "b"`
        macro_rules! collect_ts {
            ($($t:ty),+ $(,)?) => {
                $(
                    let decl = <$t>::decl(&cfg);
                    let decl = if decl.contains(" = {") {
                        decl
                            .replacen("type ", "export interface ", 1)
                            .replace(" = {", " {")
                            .trim_end_matches(';')
                            .to_string()
                    } else {
                        decl
                            .replacen("type ", "export type ", 1)
                            .trim_end_matches(';')
                            .to_string()
                    };
                    parts.push(decl);
                    parts.push(String::new());
                )+
            };
        }

        collect_ts!(
            // Shared enums
            TaskStatus,
            Priority,
            ReminderType,
            ReminderStatus,
            Channel,
            DeliveryStatus,
            RecurrencePattern,
            VerificationType,
            SortOrder,
            Pagination,
            // Auth
            RegisterRequest,
            LoginRequest,
            UserProfile,
            AuthResponse,
            TokenPairResponse,
            RefreshRequest,
            LogoutRequest,
            VerifyTokenRequest,
            VerifyResponse,
            RequestPasswordResetRequest,
            ResetPasswordRequest,
            ChangePasswordRequest,
            OkResponse,
            MessageResponse,
            // Users
            UpdateUserRequest,
            UserStats,
            // Tasks
            CreateTaskRequest,
            UpdateTaskRequest,
            TaskListQuery,
            Task,
            TaskSummary,
            TaskStakeholder,
            TaskListResponse,
            TaskStatsResponse,
            // Stakeholders
            CreateStakeholderRequest,
            UpdateStakeholderRequest,
            BulkCreateStakeholdersRequest,
            SkippedContact,
            BulkImportResponse,
            StakeholderListQuery,
            Stakeholder,
            StakeholderListResponse,
            StakeholderStats,
            // Reminders
            CreateReminderRequest,
            UpdateReminderRequest,
            ReminderListQuery,
            Reminder,
            ReminderLog,
            ReminderListResponse,
            ReminderStats,
            // Calendar
            CreateCalendarEventRequest,
            UpdateCalendarEventRequest,
            CalendarQuery,
            CalendarEvent,
            MonthView,
            WeekView,
            DayView,
            // Notifications / health
            TestEmailRequest,
            TestMessageRequest,
            TestSendResponse,
            NotificationStatusResponse,
            SmsBalanceResponse,
            HealthResponse,
            ApiError,
        );

        let content = parts.join("\n");
        if let Some(parent) = out_dir.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let mut file = std::fs::File::create(&out_dir)
            .unwrap_or_else(|e| panic!("Failed to create {}: {}", out_dir.display(), e));
        file.write_all(content.as_bytes())
            .unwrap_or_else(|e| panic!("Failed to write {}: {}", out_dir.display(), e));

        println!("Generated TypeScript types at: {}", out_dir.display());
    }
}

//! Shared business logic — framework-agnostic pure functions.
//!
//! Route handlers stay thin adapters: they call these to validate input,
//! compute time windows, and plan writes, then run the SQL built in [`crate::db`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::{
    Channel, CreateStakeholderRequest, RecurrencePattern, ServiceError, SkippedContact,
    SortOrder, Stakeholder, TaskStatus,
};

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));
static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[1-9]\d{6,14}$").expect("valid phone regex"));

const PASSWORD_SPECIALS: &str = "@$!%*?&";

pub const TITLE_MAX: usize = 200;
pub const DESCRIPTION_MAX: usize = 1000;
pub const NAME_MAX: usize = 50;
pub const ORGANIZATION_MAX: usize = 100;
pub const LOCATION_MAX: usize = 200;
pub const MESSAGE_MAX: usize = 500;
pub const TAG_MAX: usize = 50;

// ─── Validation ─────────────────────────────────────────────────────────────

/// Validate and normalize an email address. Returns the lowercased, trimmed email.
pub fn validate_email(email: &str) -> Result<String, ServiceError> {
    let email = email.trim().to_lowercase();
    if email.len() > 254 || !EMAIL_RE.is_match(&email) {
        return Err(ServiceError::BadRequest("invalid email address".into()));
    }
    Ok(email)
}

/// Validate password complexity: 8-128 characters with a lowercase letter,
/// an uppercase letter, a digit, and one of `@$!%*?&`.
pub fn validate_password(password: &str) -> Result<(), ServiceError> {
    let len = password.chars().count();
    if !(8..=128).contains(&len) {
        return Err(ServiceError::BadRequest(
            "password must be 8-128 characters".into(),
        ));
    }
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_special = password.chars().any(|c| PASSWORD_SPECIALS.contains(c));
    if !(has_lower && has_upper && has_digit && has_special) {
        return Err(ServiceError::BadRequest(format!(
            "password must contain an uppercase letter, a lowercase letter, a digit and one of {PASSWORD_SPECIALS}"
        )));
    }
    Ok(())
}

/// Normalize a phone number to E.164-ish digits. Spaces, dashes, dots and
/// parentheses are dropped; a leading `+` is kept.
pub fn validate_phone(phone: &str) -> Result<String, ServiceError> {
    let cleaned: String = phone
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();
    if !PHONE_RE.is_match(&cleaned) {
        return Err(ServiceError::BadRequest("invalid phone number".into()));
    }
    Ok(cleaned)
}

/// Trim a required text field and check its length (1..=max characters).
pub fn validate_required(field: &str, value: &str, max: usize) -> Result<String, ServiceError> {
    let trimmed = value.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > max {
        return Err(ServiceError::BadRequest(format!(
            "{field} must be 1-{max} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Trim an optional text field. Blank collapses to `None`.
pub fn validate_optional(
    field: &str,
    value: Option<&str>,
    max: usize,
) -> Result<Option<String>, ServiceError> {
    let Some(trimmed) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > max {
        return Err(ServiceError::BadRequest(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

/// Optional email: blank collapses to `None`, otherwise validated.
pub fn validate_optional_email(value: Option<&str>) -> Result<Option<String>, ServiceError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(email) => validate_email(email).map(Some),
        None => Ok(None),
    }
}

/// Optional phone: blank collapses to `None`, otherwise validated.
pub fn validate_optional_phone(value: Option<&str>) -> Result<Option<String>, ServiceError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(phone) => validate_phone(phone).map(Some),
        None => Ok(None),
    }
}

/// Trim tags, drop blanks and duplicates, keep first-seen order.
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>, ServiceError> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if tag.chars().count() > TAG_MAX {
            return Err(ServiceError::BadRequest(format!(
                "tags must be at most {TAG_MAX} characters"
            )));
        }
        if seen.insert(tag.to_string()) {
            out.push(tag.to_string());
        }
    }
    Ok(out)
}

/// Split a comma-separated `tags` query value.
pub fn parse_tag_filter(raw: Option<&str>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

/// Drop duplicate ids, keep first-seen order.
pub fn dedupe_ids(ids: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty() && seen.insert(id.to_string()))
        .map(str::to_string)
        .collect()
}

/// Sorted unique tags across many stakeholders.
pub fn collect_tags<I>(tag_lists: I) -> Vec<String>
where
    I: IntoIterator<Item = Vec<String>>,
{
    tag_lists
        .into_iter()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Percentage of `part` in `total`, rounded to two decimals. Zero when empty.
pub fn rate(part: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}

// ─── Time ───────────────────────────────────────────────────────────────────

/// Storage format for every timestamp column. Sorts chronologically as text.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

pub fn format_ts(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_ts() -> String {
    format_ts(Utc::now())
}

pub fn now_unix() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

/// Parse a client-supplied date-time: RFC 3339, naive `YYYY-MM-DDTHH:MM:SS`
/// (UTC), or bare `YYYY-MM-DD` (midnight UTC).
pub fn parse_datetime(field: &str, raw: &str) -> Result<DateTime<Utc>, ServiceError> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    parse_date(field, raw).map(start_of_day)
}

/// Parse a client date-time and render it in storage format.
pub fn normalize_datetime(field: &str, raw: &str) -> Result<String, ServiceError> {
    parse_datetime(field, raw).map(format_ts)
}

/// Parse a `YYYY-MM-DD` day (a full date-time is truncated to its day).
pub fn parse_date(field: &str, raw: &str) -> Result<NaiveDate, ServiceError> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|at| at.with_timezone(&Utc).date_naive()))
        .map_err(|_| ServiceError::BadRequest(format!("{field} must be a valid date")))
}

/// Parse a timestamp read back from storage.
pub fn parse_stored(raw: &str) -> Option<DateTime<Utc>> {
    parse_datetime("timestamp", raw).ok()
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&day.and_time(chrono::NaiveTime::MIN))
}

fn end_of_day(day: NaiveDate) -> DateTime<Utc> {
    start_of_day(day) + Duration::days(1) - Duration::seconds(1)
}

// ─── Tasks ──────────────────────────────────────────────────────────────────

pub const UPCOMING_DEFAULT_DAYS: i64 = 7;

/// `completed_at` value implied by a status write.
pub fn completed_at_for(status: TaskStatus, now: &str) -> Option<String> {
    (status == TaskStatus::Completed).then(|| now.to_string())
}

/// `[now, now + days]` window for upcoming tasks. `days` is clamped to 1..=365.
pub fn upcoming_window(now: DateTime<Utc>, days: Option<i64>) -> (String, String) {
    let days = days.unwrap_or(UPCOMING_DEFAULT_DAYS).clamp(1, 365);
    (format_ts(now), format_ts(now + Duration::days(days)))
}

/// Sortable task columns accepted by `sort_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    DueDate,
    Title,
    Priority,
    Status,
}

impl TaskSort {
    pub fn parse(raw: Option<&str>) -> Result<Self, ServiceError> {
        Ok(match raw.map(str::trim).filter(|v| !v.is_empty()) {
            None | Some("created_at") => Self::CreatedAt,
            Some("updated_at") => Self::UpdatedAt,
            Some("due_date") => Self::DueDate,
            Some("title") => Self::Title,
            Some("priority") => Self::Priority,
            Some("status") => Self::Status,
            Some(other) => return Err(invalid_sort(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StakeholderSort {
    #[default]
    CreatedAt,
    UpdatedAt,
    FirstName,
    LastName,
    Organization,
}

impl StakeholderSort {
    pub fn parse(raw: Option<&str>) -> Result<Self, ServiceError> {
        Ok(match raw.map(str::trim).filter(|v| !v.is_empty()) {
            None | Some("created_at") => Self::CreatedAt,
            Some("updated_at") => Self::UpdatedAt,
            Some("first_name") => Self::FirstName,
            Some("last_name") => Self::LastName,
            Some("organization") => Self::Organization,
            Some(other) => return Err(invalid_sort(other)),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReminderSort {
    #[default]
    ScheduledAt,
    CreatedAt,
    UpdatedAt,
    Type,
    Status,
}

impl ReminderSort {
    pub fn parse(raw: Option<&str>) -> Result<Self, ServiceError> {
        Ok(match raw.map(str::trim).filter(|v| !v.is_empty()) {
            None | Some("scheduled_at") => Self::ScheduledAt,
            Some("created_at") => Self::CreatedAt,
            Some("updated_at") => Self::UpdatedAt,
            Some("type") => Self::Type,
            Some("status") => Self::Status,
            Some(other) => return Err(invalid_sort(other)),
        })
    }
}

fn invalid_sort(field: &str) -> ServiceError {
    ServiceError::BadRequest(format!("cannot sort by '{field}'"))
}

/// Whether a sort order is ascending, falling back to the listing's default.
pub fn is_ascending(order: Option<SortOrder>, default: SortOrder) -> bool {
    order.unwrap_or(default) == SortOrder::Asc
}

// ─── Reminders ──────────────────────────────────────────────────────────────

/// Window for `GET /reminders/pending`: everything due within the next 24 h.
pub const PENDING_HORIZON_HOURS: i64 = 24;

/// De-duplicate requested channels. Absent means email only; empty is rejected.
pub fn normalize_channels(channels: Option<&[Channel]>) -> Result<Vec<Channel>, ServiceError> {
    let Some(channels) = channels else {
        return Ok(vec![Channel::Email]);
    };
    let mut out: Vec<Channel> = Vec::with_capacity(channels.len());
    for channel in channels {
        if !out.contains(channel) {
            out.push(*channel);
        }
    }
    if out.is_empty() {
        return Err(ServiceError::BadRequest(
            "at least one channel is required".into(),
        ));
    }
    Ok(out)
}

/// A recurring reminder needs a pattern; a pattern without recurrence is dropped.
pub fn validate_recurrence(
    is_recurring: bool,
    pattern: Option<RecurrencePattern>,
) -> Result<Option<RecurrencePattern>, ServiceError> {
    match (is_recurring, pattern) {
        (true, None) => Err(ServiceError::BadRequest(
            "recurring reminders need a recurring_pattern (daily, weekly or monthly)".into(),
        )),
        (true, Some(pattern)) => Ok(Some(pattern)),
        (false, _) => Ok(None),
    }
}

/// First occurrence of a recurring reminder strictly after `after`, so a
/// backlog of missed periods yields a single future occurrence. Steps are
/// counted from `scheduled_at`; monthly clamps to the last day of shorter
/// months.
pub fn next_occurrence(
    scheduled_at: DateTime<Utc>,
    pattern: RecurrencePattern,
    after: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    (1u32..)
        .map_while(|n| nth_occurrence(scheduled_at, pattern, n))
        .find(|at| *at > after)
}

fn nth_occurrence(
    anchor: DateTime<Utc>,
    pattern: RecurrencePattern,
    n: u32,
) -> Option<DateTime<Utc>> {
    match pattern {
        RecurrencePattern::Daily => anchor.checked_add_signed(Duration::days(n.into())),
        RecurrencePattern::Weekly => anchor.checked_add_signed(Duration::weeks(n.into())),
        RecurrencePattern::Monthly => anchor.checked_add_months(Months::new(n)),
    }
}

// ─── Calendar ───────────────────────────────────────────────────────────────

/// Inclusive `(start, end)` of a calendar window, in storage format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

impl DateRange {
    fn from_days(first: NaiveDate, last: NaiveDate) -> Self {
        Self {
            start: format_ts(start_of_day(first)),
            end: format_ts(end_of_day(last)),
        }
    }
}

/// Whole month, first day 00:00:00 to last day 23:59:59.
pub fn month_range(year: i32, month: u32) -> Result<DateRange, ServiceError> {
    if !(1..=12).contains(&month) {
        return Err(ServiceError::BadRequest("month must be 1-12".into()));
    }
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| ServiceError::BadRequest("invalid year".into()))?;
    let last = first
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .ok_or_else(|| ServiceError::BadRequest("invalid year".into()))?;
    Ok(DateRange::from_days(first, last))
}

/// Seven days starting at `start_date`, ending 23:59:59 of the seventh day.
pub fn week_range(start_date: &str) -> Result<DateRange, ServiceError> {
    let first = parse_date("start_date", start_date)?;
    let last = first
        .checked_add_signed(Duration::days(6))
        .ok_or_else(|| ServiceError::BadRequest("start_date out of range".into()))?;
    Ok(DateRange::from_days(first, last))
}

pub fn day_range(date: &str) -> Result<DateRange, ServiceError> {
    let day = parse_date("date", date)?;
    Ok(DateRange::from_days(day, day))
}

/// Open-ended listing window. Missing bounds leave that side unbounded.
pub fn listing_range(
    start_date: Option<&str>,
    end_date: Option<&str>,
) -> Result<(Option<String>, Option<String>), ServiceError> {
    let start = start_date
        .map(|raw| normalize_datetime("start_date", raw))
        .transpose()?;
    let end = end_date
        .map(|raw| match parse_date("end_date", raw) {
            // A bare day includes the whole day.
            Ok(day) if raw.trim().len() == 10 => Ok(format_ts(end_of_day(day))),
            _ => normalize_datetime("end_date", raw),
        })
        .transpose()?;
    Ok((start, end))
}

/// Reject events that end before they start.
pub fn validate_event_range(start: &str, end: &str) -> Result<(), ServiceError> {
    if end < start {
        return Err(ServiceError::BadRequest(
            "end_date must not be before start_date".into(),
        ));
    }
    Ok(())
}

/// Group items by start day (`YYYY-MM-DD`), clipping starts before the range
/// to its first day.
pub fn group_by_day<T, F>(items: Vec<T>, range: &DateRange, start_of: F) -> BTreeMap<String, Vec<T>>
where
    F: Fn(&T) -> &str,
{
    let mut grouped: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for item in items {
        let start = start_of(&item);
        let clipped = if start < range.start.as_str() {
            range.start.as_str()
        } else {
            start
        };
        let day = clipped.get(..10).unwrap_or(clipped).to_string();
        grouped.entry(day).or_default().push(item);
    }
    grouped
}

/// All-day event window for a task due date: that day, 00:00:00 to 23:59:59.
pub fn all_day_window(due_date: &str) -> Result<DateRange, ServiceError> {
    let day = parse_date("due_date", due_date)?;
    Ok(DateRange::from_days(day, day))
}

// ─── Bulk contact import ────────────────────────────────────────────────────

/// Contact fields after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactFields {
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub organization: Option<String>,
    pub tags: Vec<String>,
}

impl ContactFields {
    pub fn validate(req: &CreateStakeholderRequest) -> Result<Self, ServiceError> {
        Ok(Self {
            first_name: validate_required("first_name", &req.first_name, NAME_MAX)?,
            last_name: validate_required("last_name", &req.last_name, NAME_MAX)?,
            email: validate_optional_email(req.email.as_deref())?,
            phone: validate_optional_phone(req.phone.as_deref())?,
            organization: validate_optional(
                "organization",
                req.organization.as_deref(),
                ORGANIZATION_MAX,
            )?,
            tags: normalize_tags(req.tags.as_deref().unwrap_or_default())?,
        })
    }

    fn from_existing(s: &Stakeholder) -> Self {
        Self {
            first_name: s.first_name.clone(),
            last_name: s.last_name.clone(),
            email: s.email.clone(),
            phone: s.phone.clone(),
            organization: s.organization.clone(),
            tags: s.tags.clone(),
        }
    }

    /// Overlay `other` onto `self`: names replace, optional fields replace
    /// only when present, tags are unioned.
    fn merge(&mut self, other: ContactFields) {
        self.first_name = other.first_name;
        self.last_name = other.last_name;
        if other.email.is_some() {
            self.email = other.email;
        }
        if other.phone.is_some() {
            self.phone = other.phone;
        }
        if other.organization.is_some() {
            self.organization = other.organization;
        }
        for tag in other.tags {
            if !self.tags.contains(&tag) {
                self.tags.push(tag);
            }
        }
    }
}

/// One write planned by [`plan_bulk_import`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportAction {
    Create(ContactFields),
    Update {
        stakeholder_id: String,
        fields: ContactFields,
    },
}

#[derive(Debug, Default)]
pub struct ImportPlan {
    pub actions: Vec<ImportAction>,
    pub skipped: Vec<SkippedContact>,
}

#[derive(Clone, Copy)]
enum Target {
    Existing(usize),
    Planned(usize),
}

/// Plan a contact import against the user's live contacts.
///
/// Entries match by lowercased email first, then phone, both against existing
/// contacts and earlier entries of the same batch. A match merges into the
/// matched contact instead of creating a second one. Invalid entries are
/// reported in `skipped` and never abort the batch.
pub fn plan_bulk_import(existing: &[Stakeholder], incoming: &[CreateStakeholderRequest]) -> ImportPlan {
    let mut by_email: HashMap<String, Target> = HashMap::new();
    let mut by_phone: HashMap<String, Target> = HashMap::new();
    for (idx, s) in existing.iter().enumerate() {
        if let Some(email) = &s.email {
            by_email.entry(email.to_lowercase()).or_insert(Target::Existing(idx));
        }
        if let Some(phone) = &s.phone {
            by_phone.entry(phone.clone()).or_insert(Target::Existing(idx));
        }
    }

    let mut plan = ImportPlan::default();
    // Which planned action already updates an existing contact.
    let mut planned_for_existing: HashMap<usize, usize> = HashMap::new();
    // Request position of the entry that created each planned action.
    let mut action_origin: Vec<usize> = Vec::new();

    for (index, req) in incoming.iter().enumerate() {
        let fields = match ContactFields::validate(req) {
            Ok(fields) => fields,
            Err(e) => {
                plan.skipped.push(SkippedContact {
                    index: index as u32,
                    reason: e.message().to_string(),
                });
                continue;
            }
        };

        let matched = fields
            .email
            .as_ref()
            .and_then(|email| by_email.get(email).copied())
            .or_else(|| fields.phone.as_ref().and_then(|p| by_phone.get(p).copied()));

        let action_idx = match matched {
            Some(Target::Planned(action_idx)) => {
                merge_into(&mut plan.actions[action_idx], fields.clone());
                plan.skipped.push(SkippedContact {
                    index: index as u32,
                    reason: format!("duplicate of entry {}, merged", action_origin[action_idx]),
                });
                action_idx
            }
            Some(Target::Existing(existing_idx)) => {
                if let Some(&action_idx) = planned_for_existing.get(&existing_idx) {
                    merge_into(&mut plan.actions[action_idx], fields.clone());
                    plan.skipped.push(SkippedContact {
                        index: index as u32,
                        reason: format!(
                            "duplicate of entry {}, merged",
                            action_origin[action_idx]
                        ),
                    });
                    action_idx
                } else {
                    let contact = &existing[existing_idx];
                    let mut merged = ContactFields::from_existing(contact);
                    merged.merge(fields.clone());
                    plan.actions.push(ImportAction::Update {
                        stakeholder_id: contact.id.clone(),
                        fields: merged,
                    });
                    action_origin.push(index);
                    planned_for_existing.insert(existing_idx, plan.actions.len() - 1);
                    plan.actions.len() - 1
                }
            }
            None => {
                plan.actions.push(ImportAction::Create(fields.clone()));
                action_origin.push(index);
                plan.actions.len() - 1
            }
        };

        if let Some(email) = fields.email {
            by_email.entry(email).or_insert(Target::Planned(action_idx));
        }
        if let Some(phone) = fields.phone {
            by_phone.entry(phone).or_insert(Target::Planned(action_idx));
        }
    }

    plan
}

fn merge_into(action: &mut ImportAction, fields: ContactFields) {
    match action {
        ImportAction::Create(existing) | ImportAction::Update { fields: existing, .. } => {
            existing.merge(fields)
        }
    }
}

// ─── Auth ───────────────────────────────────────────────────────────────────

/// Extract the token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, ServiceError> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("missing or invalid authorization header".into()))
}

/// Resolve a bearer header into the authenticated user id.
pub fn resolve_auth_token(
    header: Option<&str>,
    jwt_secret: &str,
    now_unix: u64,
) -> Result<String, ServiceError> {
    let token = bearer_token(header)?;
    crate::crypto::verify_jwt(token, jwt_secret, now_unix)
}

/// Pre-computed access + refresh token pair.
///
/// The caller only needs to insert the refresh token row.
pub struct TokenBundle {
    pub access_token: String,
    /// Raw refresh token (sent to the client).
    pub refresh_token: String,
    /// SHA-256 hash of the refresh token (stored in DB).
    pub token_hash: String,
    pub token_id: String,
    pub expires_at: String,
    pub expires_in: u64,
}

pub fn prepare_token_bundle(
    jwt_secret: &str,
    user_id: &str,
    now_unix: u64,
) -> Result<TokenBundle, ServiceError> {
    use crate::crypto;

    let refresh_token = crypto::generate_token()?;
    Ok(TokenBundle {
        access_token: crypto::sign_jwt(user_id, jwt_secret, now_unix),
        token_hash: crypto::hash_token(&refresh_token),
        refresh_token,
        token_id: uuid::Uuid::new_v4().to_string(),
        expires_at: unix_plus(now_unix, crypto::REFRESH_EXPIRY_SECS)?,
        expires_in: crypto::JWT_EXPIRY_SECS,
    })
}

/// Verification token row ready to insert.
pub struct VerificationBundle {
    pub id: String,
    pub token: String,
    pub expires_at: String,
}

pub fn prepare_verification_token(now_unix: u64) -> Result<VerificationBundle, ServiceError> {
    use crate::crypto;

    Ok(VerificationBundle {
        id: uuid::Uuid::new_v4().to_string(),
        token: crypto::generate_token()?,
        expires_at: unix_plus(now_unix, crypto::VERIFICATION_EXPIRY_SECS)?,
    })
}

fn unix_plus(now_unix: u64, secs: u64) -> Result<String, ServiceError> {
    let at = i64::try_from(now_unix.saturating_add(secs))
        .ok()
        .and_then(|ts| DateTime::from_timestamp(ts, 0))
        .ok_or_else(|| ServiceError::Internal("timestamp overflow".into()))?;
    Ok(format_ts(at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> DateTime<Utc> {
        parse_datetime("t", raw).unwrap()
    }

    fn contact(first: &str, email: Option<&str>, phone: Option<&str>) -> CreateStakeholderRequest {
        CreateStakeholderRequest {
            first_name: first.into(),
            last_name: "Doe".into(),
            email: email.map(Into::into),
            phone: phone.map(Into::into),
            organization: None,
            tags: None,
        }
    }

    fn existing(id: &str, email: Option<&str>, phone: Option<&str>, tags: &[&str]) -> Stakeholder {
        Stakeholder {
            id: id.into(),
            user_id: "u1".into(),
            first_name: "Old".into(),
            last_name: "Name".into(),
            email: email.map(Into::into),
            phone: phone.map(Into::into),
            organization: Some("Acme".into()),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            is_active: true,
            created_at: "2025-01-01T00:00:00Z".into(),
            updated_at: "2025-01-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_validate_email() {
        assert_eq!(validate_email("  Alice@Example.COM ").unwrap(), "alice@example.com");
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a b@c.com").is_err());
    }

    #[test]
    fn test_validate_password_complexity() {
        assert!(validate_password("Demo123!").is_ok());
        assert!(validate_password("Sh0rt!").is_err());
        assert!(validate_password("alllower1!").is_err());
        assert!(validate_password("ALLUPPER1!").is_err());
        assert!(validate_password("NoDigits!!").is_err());
        assert!(validate_password("NoSpecial12").is_err());
        assert!(validate_password(&format!("Aa1!{}", "x".repeat(125))).is_err());
    }

    #[test]
    fn test_validate_phone() {
        assert_eq!(validate_phone("+91 98765-43210").unwrap(), "+919876543210");
        assert_eq!(validate_phone("(415) 555.0100").unwrap(), "4155550100");
        assert!(validate_phone("+0123456").is_err());
        assert!(validate_phone("12ab").is_err());
    }

    #[test]
    fn test_required_and_optional_text() {
        assert_eq!(validate_required("title", "  Ship it ", 200).unwrap(), "Ship it");
        assert!(validate_required("title", "   ", 200).is_err());
        assert!(validate_required("title", &"x".repeat(201), 200).is_err());
        assert_eq!(validate_optional("description", Some("  "), 10).unwrap(), None);
        assert!(validate_optional("description", Some("12345678901"), 10).is_err());
    }

    #[test]
    fn test_tags_and_ids_dedupe() {
        let tags = vec![" vip ".to_string(), "client".into(), "vip".into(), "".into()];
        assert_eq!(normalize_tags(&tags).unwrap(), vec!["vip", "client"]);
        assert_eq!(parse_tag_filter(Some("a, b,,c")), vec!["a", "b", "c"]);
        assert!(parse_tag_filter(None).is_empty());
        let ids = vec!["a".to_string(), "b".into(), "a".into()];
        assert_eq!(dedupe_ids(&ids), vec!["a", "b"]);
        assert_eq!(
            collect_tags(vec![vec!["z".into(), "a".into()], vec!["a".into()]]),
            vec!["a", "z"]
        );
    }

    #[test]
    fn test_rate_rounds_to_two_decimals() {
        assert_eq!(rate(0, 0), 0.0);
        assert_eq!(rate(1, 3), 33.33);
        assert_eq!(rate(3, 3), 100.0);
    }

    #[test]
    fn test_parse_datetime_variants() {
        assert_eq!(format_ts(ts("2025-03-01T10:00:00+05:30")), "2025-03-01T04:30:00Z");
        assert_eq!(format_ts(ts("2025-03-01T10:00:00.123")), "2025-03-01T10:00:00Z");
        assert_eq!(format_ts(ts("2025-03-01")), "2025-03-01T00:00:00Z");
        assert!(parse_datetime("due_date", "next tuesday").is_err());
    }

    #[test]
    fn test_completed_at_follows_status() {
        let now = "2025-03-02T00:00:00Z";
        assert_eq!(completed_at_for(TaskStatus::Completed, now).as_deref(), Some(now));
        assert_eq!(completed_at_for(TaskStatus::InProgress, now), None);
    }

    #[test]
    fn test_upcoming_window_clamps_days() {
        let now = ts("2025-03-01T00:00:00Z");
        assert_eq!(upcoming_window(now, None).1, "2025-03-08T00:00:00Z");
        assert_eq!(upcoming_window(now, Some(0)).1, "2025-03-02T00:00:00Z");
        assert_eq!(upcoming_window(now, Some(1000)).1, "2026-03-01T00:00:00Z");
    }

    #[test]
    fn test_sort_whitelists() {
        assert_eq!(TaskSort::parse(None).unwrap(), TaskSort::CreatedAt);
        assert_eq!(TaskSort::parse(Some("priority")).unwrap(), TaskSort::Priority);
        assert!(TaskSort::parse(Some("password_hash")).is_err());
        assert_eq!(ReminderSort::parse(Some("type")).unwrap(), ReminderSort::Type);
        assert!(StakeholderSort::parse(Some("tags")).is_err());
        assert!(is_ascending(None, SortOrder::Asc));
        assert!(!is_ascending(Some(SortOrder::Desc), SortOrder::Asc));
    }

    #[test]
    fn test_channels_and_recurrence() {
        assert_eq!(normalize_channels(None).unwrap(), vec![Channel::Email]);
        assert_eq!(
            normalize_channels(Some(&[Channel::Sms, Channel::Sms, Channel::Email])).unwrap(),
            vec![Channel::Sms, Channel::Email]
        );
        assert!(normalize_channels(Some(&[])).is_err());
        assert!(validate_recurrence(true, None).is_err());
        assert_eq!(validate_recurrence(false, Some(RecurrencePattern::Daily)).unwrap(), None);
    }

    #[test]
    fn test_next_occurrence() {
        let at = ts("2025-01-31T09:00:00Z");
        let next = |p| format_ts(next_occurrence(at, p, at).unwrap());
        assert_eq!(next(RecurrencePattern::Daily), "2025-02-01T09:00:00Z");
        assert_eq!(next(RecurrencePattern::Weekly), "2025-02-07T09:00:00Z");
        assert_eq!(next(RecurrencePattern::Monthly), "2025-02-28T09:00:00Z");
    }

    #[test]
    fn test_next_occurrence_skips_missed_periods() {
        let at = ts("2025-01-01T09:00:00Z");
        let now = ts("2025-01-31T12:00:00Z");
        let next = |p| format_ts(next_occurrence(at, p, now).unwrap());
        assert_eq!(next(RecurrencePattern::Daily), "2025-02-01T09:00:00Z");
        assert_eq!(next(RecurrencePattern::Weekly), "2025-02-05T09:00:00Z");
        assert_eq!(next(RecurrencePattern::Monthly), "2025-02-01T09:00:00Z");

        // Counted from the anchor, so a month-end series keeps its day.
        let month_end = ts("2025-01-31T09:00:00Z");
        let after_feb = ts("2025-03-01T00:00:00Z");
        assert_eq!(
            format_ts(next_occurrence(month_end, RecurrencePattern::Monthly, after_feb).unwrap()),
            "2025-03-31T09:00:00Z"
        );
    }

    #[test]
    fn test_calendar_ranges() {
        let feb = month_range(2024, 2).unwrap();
        assert_eq!(feb.start, "2024-02-01T00:00:00Z");
        assert_eq!(feb.end, "2024-02-29T23:59:59Z");
        assert!(month_range(2024, 13).is_err());

        let dec = month_range(2025, 12).unwrap();
        assert_eq!(dec.end, "2025-12-31T23:59:59Z");

        let week = week_range("2025-03-03").unwrap();
        assert_eq!(week.end, "2025-03-09T23:59:59Z");

        let day = day_range("2025-03-03").unwrap();
        assert_eq!(day.start, "2025-03-03T00:00:00Z");
        assert_eq!(day.end, "2025-03-03T23:59:59Z");
    }

    #[test]
    fn test_listing_range_extends_bare_end_day() {
        let (start, end) = listing_range(Some("2025-03-01"), Some("2025-03-31")).unwrap();
        assert_eq!(start.as_deref(), Some("2025-03-01T00:00:00Z"));
        assert_eq!(end.as_deref(), Some("2025-03-31T23:59:59Z"));
        assert_eq!(listing_range(None, None).unwrap(), (None, None));
    }

    #[test]
    fn test_group_by_day_clips_to_range() {
        let range = month_range(2025, 3).unwrap();
        let events = vec![
            ("a", "2025-02-27T10:00:00Z"),
            ("b", "2025-03-05T10:00:00Z"),
            ("c", "2025-03-05T18:00:00Z"),
        ];
        let grouped = group_by_day(events, &range, |e| e.1);
        assert_eq!(grouped["2025-03-01"].len(), 1);
        assert_eq!(grouped["2025-03-05"].len(), 2);
    }

    #[test]
    fn test_event_range_validation() {
        assert!(validate_event_range("2025-03-01T10:00:00Z", "2025-03-01T10:00:00Z").is_ok());
        assert!(validate_event_range("2025-03-01T10:00:00Z", "2025-03-01T09:00:00Z").is_err());
    }

    #[test]
    fn test_bulk_import_dedupes_within_batch() {
        let incoming = vec![
            contact("Ann", Some("ann@x.com"), None),
            contact("Ann", Some("ANN@x.com"), Some("+15550001111")),
            contact("Bob", None, Some("+15550001111")),
            contact("", Some("bad@x.com"), None),
        ];
        let plan = plan_bulk_import(&[], &incoming);
        assert_eq!(plan.actions.len(), 1);
        let ImportAction::Create(fields) = &plan.actions[0] else {
            panic!("expected create");
        };
        assert_eq!(fields.email.as_deref(), Some("ann@x.com"));
        assert_eq!(fields.phone.as_deref(), Some("+15550001111"));
        assert_eq!(plan.skipped.len(), 3);
        assert_eq!(plan.skipped[2].index, 3);
    }

    #[test]
    fn test_bulk_import_updates_existing_and_merges_tags() {
        let current = vec![existing("s1", Some("ann@x.com"), None, &["vip"])];
        let mut req = contact("Ann", Some("Ann@X.com"), Some("+15550002222"));
        req.tags = Some(vec!["client".into(), "vip".into()]);
        let plan = plan_bulk_import(&current, &[req, contact("Cy", None, Some("+15550002222"))]);

        assert_eq!(plan.actions.len(), 1);
        let ImportAction::Update { stakeholder_id, fields } = &plan.actions[0] else {
            panic!("expected update");
        };
        assert_eq!(stakeholder_id, "s1");
        assert_eq!(fields.tags, vec!["vip", "client"]);
        assert_eq!(fields.organization.as_deref(), Some("Acme"));
        assert_eq!(fields.first_name, "Cy");
        assert_eq!(plan.skipped.len(), 1);
    }

    #[test]
    fn test_bulk_import_creates_contacts_without_keys() {
        let plan = plan_bulk_import(&[], &[contact("A", None, None), contact("B", None, None)]);
        assert_eq!(plan.actions.len(), 2);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc")).unwrap(), "abc");
        assert!(bearer_token(Some("Basic abc")).is_err());
        assert!(bearer_token(Some("Bearer ")).is_err());
        assert!(bearer_token(None).is_err());
    }

    #[test]
    fn test_token_bundle_expiry() {
        let bundle = prepare_token_bundle("secret", "u1", 0).unwrap();
        assert_eq!(bundle.expires_at, "1970-01-08T00:00:00Z");
        assert_eq!(bundle.expires_in, 3600);
        assert_eq!(crate::crypto::hash_token(&bundle.refresh_token), bundle.token_hash);
        assert_eq!(
            resolve_auth_token(Some(format!("Bearer {}", bundle.access_token).as_str()), "secret", 10)
                .unwrap(),
            "u1"
        );
        let verification = prepare_verification_token(0).unwrap();
        assert_eq!(verification.expires_at, "1970-01-02T00:00:00Z");
    }
}

//! Compile-time–checked column identifiers for all tables.

use sea_query::Iden;

#[derive(Iden)]
pub enum Users {
    Table,
    Id,
    Email,
    Phone,
    FirstName,
    LastName,
    PasswordHash,
    PasswordSalt,
    IsEmailVerified,
    IsPhoneVerified,
    IsActive,
    LastLoginAt,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
pub enum RefreshTokens {
    Table,
    Id,
    UserId,
    TokenHash,
    ExpiresAt,
    CreatedAt,
}

#[derive(Iden)]
pub enum VerificationTokens {
    Table,
    Id,
    UserId,
    Token,
    Type,
    ExpiresAt,
    IsUsed,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum Tasks {
    Table,
    Id,
    UserId,
    Title,
    Description,
    Priority,
    Status,
    DueDate,
    CompletedAt,
    IsVoiceCreated,
    VoiceMetadata,
    IsDeleted,
    DeletedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum Stakeholders {
    Table,
    Id,
    UserId,
    FirstName,
    LastName,
    Email,
    Phone,
    Organization,
    Tags,
    IsActive,
    CreatedAt,
    UpdatedAt,
    DeletedAt,
}

#[derive(Iden)]
pub enum TaskStakeholders {
    Table,
    Id,
    TaskId,
    StakeholderId,
    Role,
    CreatedAt,
}

#[derive(Iden)]
pub enum Reminders {
    Table,
    Id,
    TaskId,
    Type,
    Status,
    ScheduledAt,
    Message,
    Channels,
    IsRecurring,
    RecurringPattern,
    SentAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum ReminderLogs {
    Table,
    Id,
    ReminderId,
    StakeholderId,
    Channel,
    Status,
    Error,
    CreatedAt,
}

#[derive(Iden)]
pub enum CalendarEvents {
    Table,
    Id,
    UserId,
    TaskId,
    Title,
    Description,
    StartDate,
    EndDate,
    IsAllDay,
    Location,
    CreatedAt,
    UpdatedAt,
}

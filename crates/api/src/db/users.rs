//! User / auth query builders.

use sea_query::{Asterisk, Expr, Func, Query, SelectStatement, SqliteQueryBuilder};

use super::Built;
use super::tables::{RefreshTokens, Users};

// ── Helpers ────────────────────────────────────────────────────────────────

/// Public profile columns, in `UserProfile` field order:
/// id, email, phone, first_name, last_name, is_email_verified,
/// is_phone_verified, is_active, last_login_at, created_at, updated_at.
fn profile_columns(q: &mut SelectStatement) -> &mut SelectStatement {
    q.columns([
        Users::Id,
        Users::Email,
        Users::Phone,
        Users::FirstName,
        Users::LastName,
        Users::IsEmailVerified,
        Users::IsPhoneVerified,
        Users::IsActive,
        Users::LastLoginAt,
        Users::CreatedAt,
        Users::UpdatedAt,
    ])
}

// ── User lookups ───────────────────────────────────────────────────────────

/// Profile of an active (not deactivated) user.
pub fn get_active(user_id: &str) -> Built {
    let mut q = Query::select();
    profile_columns(&mut q)
        .from(Users::Table)
        .and_where(Expr::col(Users::Id).eq(user_id))
        .and_where(Expr::col(Users::IsActive).eq(true))
        .and_where(Expr::col(Users::DeletedAt).is_null())
        .build(SqliteQueryBuilder)
}

/// Login material for an email: id, password_hash, password_salt, is_active.
pub fn get_by_email_for_login(email: &str) -> Built {
    Query::select()
        .columns([
            Users::Id,
            Users::PasswordHash,
            Users::PasswordSalt,
            Users::IsActive,
        ])
        .from(Users::Table)
        .and_where(Expr::col(Users::Email).eq(email))
        .build(SqliteQueryBuilder)
}

/// Id and first name of an active user by email (password reset).
pub fn get_active_by_email(email: &str) -> Built {
    Query::select()
        .columns([Users::Id, Users::FirstName])
        .from(Users::Table)
        .and_where(Expr::col(Users::Email).eq(email))
        .and_where(Expr::col(Users::IsActive).eq(true))
        .build(SqliteQueryBuilder)
}

/// Check email existence.
pub fn email_exists(email: &str) -> Built {
    Query::select()
        .expr(Expr::expr(Func::count(Expr::col(Asterisk))).gt(0))
        .from(Users::Table)
        .and_where(Expr::col(Users::Email).eq(email))
        .build(SqliteQueryBuilder)
}

/// Check whether a phone number is taken, optionally ignoring one user.
pub fn phone_exists(phone: &str, except_user: Option<&str>) -> Built {
    let mut q = Query::select()
        .expr(Expr::expr(Func::count(Expr::col(Asterisk))).gt(0))
        .from(Users::Table)
        .and_where(Expr::col(Users::Phone).eq(phone))
        .to_owned();
    if let Some(user_id) = except_user {
        q.and_where(Expr::col(Users::Id).ne(user_id));
    }
    q.build(SqliteQueryBuilder)
}

/// password_hash, password_salt for a user.
pub fn get_password_fields(user_id: &str) -> Built {
    Query::select()
        .columns([Users::PasswordHash, Users::PasswordSalt])
        .from(Users::Table)
        .and_where(Expr::col(Users::Id).eq(user_id))
        .build(SqliteQueryBuilder)
}

/// Dashboard counters: total, completed, pending tasks and stakeholders.
pub fn stats(user_id: &str) -> Built {
    let sql = concat!(
        "SELECT ",
        "(SELECT COUNT(*) FROM \"tasks\" WHERE \"user_id\" = ? AND \"is_deleted\" = 0), ",
        "(SELECT COUNT(*) FROM \"tasks\" WHERE \"user_id\" = ? AND \"is_deleted\" = 0 AND \"status\" = 'COMPLETED'), ",
        "(SELECT COUNT(*) FROM \"tasks\" WHERE \"user_id\" = ? AND \"is_deleted\" = 0 AND \"status\" = 'PENDING'), ",
        "(SELECT COUNT(*) FROM \"stakeholders\" WHERE \"user_id\" = ? AND \"deleted_at\" IS NULL)",
    )
    .to_string();
    let values = sea_query::Values(vec![
        user_id.into(),
        user_id.into(),
        user_id.into(),
        user_id.into(),
    ]);
    (sql, values)
}

// ── User writes ────────────────────────────────────────────────────────────

pub struct InsertParams<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub password_hash: &'a str,
    pub password_salt: &'a str,
}

/// Insert user with email/password.
pub fn insert(p: &InsertParams<'_>) -> Built {
    Query::insert()
        .into_table(Users::Table)
        .columns([
            Users::Id,
            Users::Email,
            Users::Phone,
            Users::FirstName,
            Users::LastName,
            Users::PasswordHash,
            Users::PasswordSalt,
        ])
        .values_panic([
            p.id.into(),
            p.email.into(),
            p.phone.map(str::to_string).into(),
            p.first_name.into(),
            p.last_name.into(),
            p.password_hash.into(),
            p.password_salt.into(),
        ])
        .build(SqliteQueryBuilder)
}

pub fn touch_last_login(user_id: &str, now: &str) -> Built {
    Query::update()
        .table(Users::Table)
        .value(Users::LastLoginAt, now)
        .and_where(Expr::col(Users::Id).eq(user_id))
        .build(SqliteQueryBuilder)
}

/// Partial profile update. `phone: Some(None)` clears the phone.
#[derive(Default)]
pub struct ProfilePatch<'a> {
    pub phone: Option<Option<&'a str>>,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
}

pub fn update_profile(user_id: &str, patch: &ProfilePatch<'_>, now: &str) -> Built {
    let mut q = Query::update();
    q.table(Users::Table).value(Users::UpdatedAt, now);
    if let Some(phone) = patch.phone {
        q.value(Users::Phone, phone.map(str::to_string));
        // A new number has not been verified yet.
        q.value(Users::IsPhoneVerified, false);
    }
    if let Some(first_name) = patch.first_name {
        q.value(Users::FirstName, first_name);
    }
    if let Some(last_name) = patch.last_name {
        q.value(Users::LastName, last_name);
    }
    q.and_where(Expr::col(Users::Id).eq(user_id))
        .build(SqliteQueryBuilder)
}

pub fn update_password(user_id: &str, password_hash: &str, password_salt: &str, now: &str) -> Built {
    Query::update()
        .table(Users::Table)
        .value(Users::PasswordHash, password_hash)
        .value(Users::PasswordSalt, password_salt)
        .value(Users::UpdatedAt, now)
        .and_where(Expr::col(Users::Id).eq(user_id))
        .build(SqliteQueryBuilder)
}

pub fn set_email_verified(user_id: &str, now: &str) -> Built {
    Query::update()
        .table(Users::Table)
        .value(Users::IsEmailVerified, true)
        .value(Users::UpdatedAt, now)
        .and_where(Expr::col(Users::Id).eq(user_id))
        .build(SqliteQueryBuilder)
}

pub fn set_phone_verified(user_id: &str, now: &str) -> Built {
    Query::update()
        .table(Users::Table)
        .value(Users::IsPhoneVerified, true)
        .value(Users::UpdatedAt, now)
        .and_where(Expr::col(Users::Id).eq(user_id))
        .build(SqliteQueryBuilder)
}

/// Deactivate an account. Deactivated users can no longer authenticate.
pub fn deactivate(user_id: &str, now: &str) -> Built {
    Query::update()
        .table(Users::Table)
        .value(Users::IsActive, false)
        .value(Users::DeletedAt, now)
        .value(Users::UpdatedAt, now)
        .and_where(Expr::col(Users::Id).eq(user_id))
        .build(SqliteQueryBuilder)
}

// ── Refresh tokens ─────────────────────────────────────────────────────────

pub fn insert_refresh_token(id: &str, user_id: &str, token_hash: &str, expires_at: &str) -> Built {
    Query::insert()
        .into_table(RefreshTokens::Table)
        .columns([
            RefreshTokens::Id,
            RefreshTokens::UserId,
            RefreshTokens::TokenHash,
            RefreshTokens::ExpiresAt,
        ])
        .values_panic([
            id.into(),
            user_id.into(),
            token_hash.into(),
            expires_at.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// Refresh token lookup restricted to active users: id, user_id, expires_at.
pub fn lookup_refresh_token(token_hash: &str) -> Built {
    Query::select()
        .column((RefreshTokens::Table, RefreshTokens::Id))
        .column((RefreshTokens::Table, RefreshTokens::UserId))
        .column((RefreshTokens::Table, RefreshTokens::ExpiresAt))
        .from(RefreshTokens::Table)
        .inner_join(
            Users::Table,
            Expr::col((Users::Table, Users::Id))
                .equals((RefreshTokens::Table, RefreshTokens::UserId)),
        )
        .and_where(Expr::col((RefreshTokens::Table, RefreshTokens::TokenHash)).eq(token_hash))
        .and_where(Expr::col((Users::Table, Users::IsActive)).eq(true))
        .build(SqliteQueryBuilder)
}

pub fn delete_refresh_token(token_hash: &str) -> Built {
    Query::delete()
        .from_table(RefreshTokens::Table)
        .and_where(Expr::col(RefreshTokens::TokenHash).eq(token_hash))
        .build(SqliteQueryBuilder)
}

pub fn delete_refresh_token_by_id(id: &str) -> Built {
    Query::delete()
        .from_table(RefreshTokens::Table)
        .and_where(Expr::col(RefreshTokens::Id).eq(id))
        .build(SqliteQueryBuilder)
}

/// Revoke every refresh token of a user.
pub fn delete_refresh_tokens_for_user(user_id: &str) -> Built {
    Query::delete()
        .from_table(RefreshTokens::Table)
        .and_where(Expr::col(RefreshTokens::UserId).eq(user_id))
        .build(SqliteQueryBuilder)
}

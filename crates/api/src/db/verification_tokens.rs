//! One-time verification token query builders.

use sea_query::{Expr, Query, SqliteQueryBuilder};

use super::Built;
use super::tables::VerificationTokens;
use crate::VerificationType;

pub fn insert(
    id: &str,
    user_id: &str,
    token: &str,
    kind: VerificationType,
    expires_at: &str,
) -> Built {
    Query::insert()
        .into_table(VerificationTokens::Table)
        .columns([
            VerificationTokens::Id,
            VerificationTokens::UserId,
            VerificationTokens::Token,
            VerificationTokens::Type,
            VerificationTokens::ExpiresAt,
        ])
        .values_panic([
            id.into(),
            user_id.into(),
            token.into(),
            kind.as_str().into(),
            expires_at.into(),
        ])
        .build(SqliteQueryBuilder)
}

/// id, user_id, type, expires_at, is_used for a token.
pub fn lookup(token: &str) -> Built {
    Query::select()
        .columns([
            VerificationTokens::Id,
            VerificationTokens::UserId,
            VerificationTokens::Type,
            VerificationTokens::ExpiresAt,
            VerificationTokens::IsUsed,
        ])
        .from(VerificationTokens::Table)
        .and_where(Expr::col(VerificationTokens::Token).eq(token))
        .build(SqliteQueryBuilder)
}

/// Consume a token. Matches only while it is still unused.
pub fn mark_used(id: &str, now: &str) -> Built {
    Query::update()
        .table(VerificationTokens::Table)
        .value(VerificationTokens::IsUsed, true)
        .value(VerificationTokens::UpdatedAt, now)
        .and_where(Expr::col(VerificationTokens::Id).eq(id))
        .and_where(Expr::col(VerificationTokens::IsUsed).eq(false))
        .build(SqliteQueryBuilder)
}

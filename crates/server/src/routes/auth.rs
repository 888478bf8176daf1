use axum::{
    Json,
    extract::{FromRef, FromRequestParts, State},
    http::{StatusCode, header, request::Parts},
};
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use taskflow_api::service::{self, NAME_MAX, TokenBundle};
use taskflow_api::{
    AuthResponse, ChangePasswordRequest, LoginRequest, LogoutRequest, MessageResponse,
    OkResponse, RefreshRequest, RegisterRequest, RequestPasswordResetRequest,
    ResetPasswordRequest, TokenPairResponse, UserProfile, VerificationType, VerifyResponse,
    VerifyTokenRequest, crypto, db,
};

use crate::config::AppConfig;
use crate::error::ApiErr;
use crate::notify::{NotificationService, templates};
use crate::storage::{Db, is_constraint_violation, sq_execute, sq_query_row, user_from_row};

// ---------------------------------------------------------------------------
// Auth extractor
// ---------------------------------------------------------------------------

/// Authenticated user extracted from the `Authorization: Bearer <jwt>` header.
///
/// Deactivated accounts are rejected even while their token is still valid.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub profile: UserProfile,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    Db: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiErr;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let db = Db::from_ref(state);
        let config = AppConfig::from_ref(state);

        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let user_id =
            service::resolve_auth_token(header, &config.jwt_secret, service::now_unix())?;

        let conn = db.conn();
        let profile = sq_query_row(&conn, db::users::get_active(&user_id), user_from_row)
            .optional()
            .map_err(ApiErr::from_db("auth user lookup"))?
            .ok_or_else(|| ApiErr::unauthorized("account not found or deactivated"))?;

        Ok(AuthUser { user_id, profile })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Create an access token and persist a fresh refresh token.
fn issue_tokens(conn: &Connection, config: &AppConfig, user_id: &str) -> Result<TokenBundle, ApiErr> {
    let bundle = service::prepare_token_bundle(&config.jwt_secret, user_id, service::now_unix())?;
    sq_execute(
        conn,
        db::users::insert_refresh_token(
            &bundle.token_id,
            user_id,
            &bundle.token_hash,
            &bundle.expires_at,
        ),
    )
    .map_err(ApiErr::from_db("insert refresh token"))?;
    Ok(bundle)
}

/// PBKDF2 hashing on the blocking pool so it does not stall async workers.
async fn hash_password(password: &str) -> Result<(String, String), ApiErr> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || crypto::hash_password(&password))
        .await
        .map_err(ApiErr::from_db("password hashing task"))?
        .map_err(ApiErr::from)
}

/// PBKDF2 verification on the blocking pool.
async fn verify_password(password: &str, hash: String, salt: String) -> Result<bool, ApiErr> {
    let password = password.to_owned();
    tokio::task::spawn_blocking(move || crypto::verify_password(&password, &hash, &salt))
        .await
        .map_err(ApiErr::from_db("password verification task"))
}

fn auth_response(user: UserProfile, tokens: TokenBundle) -> AuthResponse {
    AuthResponse {
        user,
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.expires_in,
    }
}

/// A verification token row: id, user_id, type, expires_at, is_used.
struct TokenRow {
    id: String,
    user_id: String,
    kind: String,
    expires_at: String,
    is_used: bool,
}

/// Look up a one-time token that is unused, unexpired and of `accepted` type.
fn usable_token(
    conn: &Connection,
    token: &str,
    accepted: &[VerificationType],
) -> Result<TokenRow, ApiErr> {
    let row = sq_query_row(conn, db::verification_tokens::lookup(token.trim()), |row| {
        Ok(TokenRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            kind: row.get(2)?,
            expires_at: row.get(3)?,
            is_used: row.get(4)?,
        })
    })
    .optional()
    .map_err(ApiErr::from_db("lookup verification token"))?;

    row.filter(|t| !t.is_used && t.expires_at.as_str() > service::now_ts().as_str())
        .filter(|t| {
            VerificationType::parse(&t.kind).is_some_and(|kind| accepted.contains(&kind))
        })
        .ok_or_else(|| ApiErr::bad_request("invalid or expired token"))
}

// ---------------------------------------------------------------------------
// Register / login
// ---------------------------------------------------------------------------

/// POST /api/v1/auth/register — create an account and sign in.
pub async fn register(
    State(db): State<Db>,
    State(config): State<AppConfig>,
    State(notifier): State<NotificationService>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiErr> {
    let email = service::validate_email(&req.email)?;
    service::validate_password(&req.password)?;
    let first_name = service::validate_required("first_name", &req.first_name, NAME_MAX)?;
    let last_name = service::validate_required("last_name", &req.last_name, NAME_MAX)?;
    let phone = service::validate_optional_phone(req.phone.as_deref())?;

    let (password_hash, password_salt) = hash_password(&req.password).await?;
    let user_id = Uuid::new_v4().to_string();
    let now_unix = service::now_unix();
    let email_token = service::prepare_verification_token(now_unix)?;
    let phone_token = phone
        .as_ref()
        .map(|_| service::prepare_verification_token(now_unix))
        .transpose()?;

    let (profile, tokens) = {
        let mut conn = db.conn();

        let email_taken: bool = sq_query_row(&conn, db::users::email_exists(&email), |r| r.get(0))
            .map_err(ApiErr::from_db("check email"))?;
        if email_taken {
            return Err(ApiErr::conflict("email already registered"));
        }
        if let Some(phone) = &phone {
            let phone_taken: bool =
                sq_query_row(&conn, db::users::phone_exists(phone, None), |r| r.get(0))
                    .map_err(ApiErr::from_db("check phone"))?;
            if phone_taken {
                return Err(ApiErr::conflict("phone number already registered"));
            }
        }

        let tx = conn
            .transaction()
            .map_err(ApiErr::from_db("begin register"))?;
        sq_execute(
            &tx,
            db::users::insert(&db::users::InsertParams {
                id: &user_id,
                email: &email,
                phone: phone.as_deref(),
                first_name: &first_name,
                last_name: &last_name,
                password_hash: &password_hash,
                password_salt: &password_salt,
            }),
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                ApiErr::conflict("email or phone number already registered")
            } else {
                ApiErr::from_db("insert user")(e)
            }
        })?;

        let mut pending = vec![(&email_token, VerificationType::Email)];
        if let Some(token) = &phone_token {
            pending.push((token, VerificationType::Phone));
        }
        for (token, kind) in pending {
            sq_execute(
                &tx,
                db::verification_tokens::insert(
                    &token.id,
                    &user_id,
                    &token.token,
                    kind,
                    &token.expires_at,
                ),
            )
            .map_err(ApiErr::from_db("insert verification token"))?;
        }

        let tokens = issue_tokens(&tx, &config, &user_id)?;
        let profile = sq_query_row(&tx, db::users::get_active(&user_id), user_from_row)
            .map_err(ApiErr::from_db("load new user"))?;
        tx.commit().map_err(ApiErr::from_db("commit register"))?;
        (profile, tokens)
    };

    tracing::info!("registered user {user_id}");
    let verify_url = format!(
        "{}/verify-email?token={}",
        config.frontend_url, email_token.token
    );
    notifier.spawn_email(
        profile.email.clone(),
        templates::verification(&profile.first_name, &verify_url),
    );

    Ok((StatusCode::CREATED, Json(auth_response(profile, tokens))))
}

/// POST /api/v1/auth/login — email + password sign in.
pub async fn login(
    State(db): State<Db>,
    State(config): State<AppConfig>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiErr> {
    let email = req.email.trim().to_lowercase();

    let row: Option<(String, String, String, bool)> = {
        let conn = db.conn();
        sq_query_row(&conn, db::users::get_by_email_for_login(&email), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .optional()
        .map_err(ApiErr::from_db("lookup user for login"))?
    };
    let (user_id, hash, salt, is_active) =
        row.ok_or_else(|| ApiErr::unauthorized("invalid credentials"))?;

    // Hashing runs without the connection lock.
    if !is_active || !verify_password(&req.password, hash, salt).await? {
        return Err(ApiErr::unauthorized("invalid credentials"));
    }

    let conn = db.conn();
    sq_execute(&conn, db::users::touch_last_login(&user_id, &service::now_ts()))
        .map_err(ApiErr::from_db("touch last login"))?;
    let tokens = issue_tokens(&conn, &config, &user_id)?;
    let profile = sq_query_row(&conn, db::users::get_active(&user_id), user_from_row)
        .map_err(ApiErr::from_db("load user"))?;

    Ok(Json(auth_response(profile, tokens)))
}

// ---------------------------------------------------------------------------
// Refresh / logout
// ---------------------------------------------------------------------------

/// POST /api/v1/auth/refresh — rotate a refresh token.
pub async fn refresh(
    State(db): State<Db>,
    State(config): State<AppConfig>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, ApiErr> {
    let token_hash = crypto::hash_token(req.refresh_token.trim());
    let conn = db.conn();

    let (token_id, user_id, expires_at): (String, String, String) =
        sq_query_row(&conn, db::users::lookup_refresh_token(&token_hash), |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .optional()
        .map_err(ApiErr::from_db("lookup refresh token"))?
        .ok_or_else(|| ApiErr::unauthorized("invalid refresh token"))?;

    sq_execute(&conn, db::users::delete_refresh_token_by_id(&token_id))
        .map_err(ApiErr::from_db("delete refresh token"))?;
    if expires_at <= service::now_ts() {
        return Err(ApiErr::unauthorized("refresh token expired"));
    }

    let tokens = issue_tokens(&conn, &config, &user_id)?;
    Ok(Json(TokenPairResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.expires_in,
    }))
}

/// POST /api/v1/auth/logout — revoke a refresh token. Unknown tokens are ignored.
pub async fn logout(
    State(db): State<Db>,
    Json(req): Json<LogoutRequest>,
) -> Result<Json<OkResponse>, ApiErr> {
    let token_hash = crypto::hash_token(req.refresh_token.trim());
    let conn = db.conn();
    sq_execute(&conn, db::users::delete_refresh_token(&token_hash))
        .map_err(ApiErr::from_db("delete refresh token"))?;
    Ok(Json(OkResponse { ok: true }))
}

// ---------------------------------------------------------------------------
// Verification
// ---------------------------------------------------------------------------

/// POST /api/v1/auth/verify — consume an EMAIL or PHONE verification token.
pub async fn verify(
    State(db): State<Db>,
    Json(req): Json<VerifyTokenRequest>,
) -> Result<Json<VerifyResponse>, ApiErr> {
    let mut conn = db.conn();
    let token = usable_token(
        &conn,
        &req.token,
        &[VerificationType::Email, VerificationType::Phone],
    )?;
    let now = service::now_ts();

    let tx = conn.transaction().map_err(ApiErr::from_db("begin verify"))?;
    let consumed = sq_execute(&tx, db::verification_tokens::mark_used(&token.id, &now))
        .map_err(ApiErr::from_db("consume token"))?;
    if consumed == 0 {
        return Err(ApiErr::bad_request("invalid or expired token"));
    }
    let (update, message) = match VerificationType::parse(&token.kind) {
        Some(VerificationType::Phone) => (
            db::users::set_phone_verified(&token.user_id, &now),
            "phone number verified",
        ),
        _ => (
            db::users::set_email_verified(&token.user_id, &now),
            "email verified",
        ),
    };
    sq_execute(&tx, update).map_err(ApiErr::from_db("mark verified"))?;
    let user = sq_query_row(&tx, db::users::get_active(&token.user_id), user_from_row)
        .optional()
        .map_err(ApiErr::from_db("load verified user"))?
        .ok_or_else(|| ApiErr::bad_request("invalid or expired token"))?;
    tx.commit().map_err(ApiErr::from_db("commit verify"))?;

    Ok(Json(VerifyResponse {
        user,
        message: message.to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Passwords
// ---------------------------------------------------------------------------

const RESET_REQUESTED: &str =
    "if an account exists for that email, a password reset link has been sent";

/// POST /api/v1/auth/request-password-reset — always answers the same way.
pub async fn request_password_reset(
    State(db): State<Db>,
    State(config): State<AppConfig>,
    State(notifier): State<NotificationService>,
    Json(req): Json<RequestPasswordResetRequest>,
) -> Result<Json<MessageResponse>, ApiErr> {
    let email = req.email.trim().to_lowercase();

    let token = {
        let conn = db.conn();
        let user: Option<String> =
            sq_query_row(&conn, db::users::get_active_by_email(&email), |row| row.get(0))
                .optional()
                .map_err(ApiErr::from_db("lookup user for reset"))?;
        match user {
            Some(user_id) => {
                let token = service::prepare_verification_token(service::now_unix())?;
                sq_execute(
                    &conn,
                    db::verification_tokens::insert(
                        &token.id,
                        &user_id,
                        &token.token,
                        VerificationType::PasswordReset,
                        &token.expires_at,
                    ),
                )
                .map_err(ApiErr::from_db("insert reset token"))?;
                Some(token)
            }
            None => None,
        }
    };

    if let Some(token) = token {
        let reset_url = format!(
            "{}/reset-password?token={}",
            config.frontend_url, token.token
        );
        notifier.spawn_email(email, templates::password_reset(&reset_url));
    }

    Ok(Json(MessageResponse::new(RESET_REQUESTED)))
}

/// POST /api/v1/auth/reset-password — set a new password with a reset token.
pub async fn reset_password(
    State(db): State<Db>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, ApiErr> {
    service::validate_password(&req.new_password)?;
    {
        let conn = db.conn();
        usable_token(&conn, &req.token, &[VerificationType::PasswordReset])?;
    }
    let (hash, salt) = hash_password(&req.new_password).await?;

    let mut conn = db.conn();
    // Re-check under the lock the transaction runs with.
    let token = usable_token(&conn, &req.token, &[VerificationType::PasswordReset])?;
    let now = service::now_ts();
    let tx = conn.transaction().map_err(ApiErr::from_db("begin reset"))?;
    let consumed = sq_execute(&tx, db::verification_tokens::mark_used(&token.id, &now))
        .map_err(ApiErr::from_db("consume reset token"))?;
    if consumed == 0 {
        return Err(ApiErr::bad_request("invalid or expired token"));
    }
    sq_execute(&tx, db::users::update_password(&token.user_id, &hash, &salt, &now))
        .map_err(ApiErr::from_db("update password"))?;
    sq_execute(&tx, db::users::delete_refresh_tokens_for_user(&token.user_id))
        .map_err(ApiErr::from_db("revoke refresh tokens"))?;
    tx.commit().map_err(ApiErr::from_db("commit reset"))?;

    tracing::info!("password reset for user {}", token.user_id);
    Ok(Json(MessageResponse::new("password has been reset")))
}

/// PUT /api/v1/auth/password — change password (authenticated).
pub async fn change_password(
    State(db): State<Db>,
    user: AuthUser,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, ApiErr> {
    service::validate_password(&req.new_password)?;

    let (hash, salt): (String, String) = {
        let conn = db.conn();
        sq_query_row(&conn, db::users::get_password_fields(&user.user_id), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .map_err(ApiErr::from_db("load password"))?
    };
    if !verify_password(&req.current_password, hash, salt).await? {
        return Err(ApiErr::unauthorized("current password is incorrect"));
    }
    let (new_hash, new_salt) = hash_password(&req.new_password).await?;

    let conn = db.conn();
    sq_execute(
        &conn,
        db::users::update_password(&user.user_id, &new_hash, &new_salt, &service::now_ts()),
    )
    .map_err(ApiErr::from_db("update password"))?;

    Ok(Json(MessageResponse::new("password changed")))
}

use anyhow::{Result, ensure};
use uuid::Uuid;

use taskflow_api::{
    AuthResponse, LoginRequest, RefreshRequest, RegisterRequest, TokenPairResponse, UserProfile,
};

use crate::client::{TEST_PASSWORD, TestContext};

/// POST /api/v1/auth/register → 201 with a token pair and profile.
pub async fn register(ctx: &TestContext) -> Result<()> {
    let user = ctx.register_user().await?;
    ensure!(!user.access_token.is_empty(), "expected access_token");
    ensure!(!user.refresh_token.is_empty(), "expected refresh_token");

    let resp = ctx.get_authed("/users/me", &user.access_token).await?;
    ensure!(resp.status() == 200, "expected 200, got {}", resp.status());
    let me: UserProfile = resp.json().await?;
    ensure!(me.id == user.user_id);
    ensure!(me.email == user.email);
    Ok(())
}

/// Same email → 409.
pub async fn register_duplicate_email(ctx: &TestContext) -> Result<()> {
    let user = ctx.register_user().await?;
    let resp = ctx
        .post_json(
            "/auth/register",
            &RegisterRequest {
                email: user.email.to_uppercase(),
                password: TEST_PASSWORD.into(),
                first_name: "Dup".into(),
                last_name: "User".into(),
                phone: None,
            },
        )
        .await?;
    ensure!(resp.status() == 409, "expected 409, got {}", resp.status());
    Ok(())
}

/// Missing character classes or too short → 400.
pub async fn register_weak_password(ctx: &TestContext) -> Result<()> {
    for password in ["Sh0rt!", "alllowercase1!", "NoDigitsHere!", "NoSpecial123"] {
        let resp = ctx
            .post_json(
                "/auth/register",
                &RegisterRequest {
                    email: format!("weak-{}@e2e.local", Uuid::new_v4()),
                    password: password.into(),
                    first_name: "Weak".into(),
                    last_name: "Password".into(),
                    phone: None,
                },
            )
            .await?;
        ensure!(
            resp.status() == 400,
            "expected 400 for {password:?}, got {}",
            resp.status()
        );
    }
    Ok(())
}

/// POST /api/v1/auth/login → tokens; wrong password → 401.
pub async fn login(ctx: &TestContext) -> Result<()> {
    let user = ctx.register_user().await?;

    let resp = ctx
        .post_json(
            "/auth/login",
            &LoginRequest {
                email: user.email.clone(),
                password: user.password.clone(),
            },
        )
        .await?;
    ensure!(resp.status() == 200, "expected 200, got {}", resp.status());
    let auth: AuthResponse = resp.json().await?;
    ensure!(!auth.access_token.is_empty());
    ensure!(auth.user.id == user.user_id);
    ensure!(auth.user.last_login_at.is_some(), "expected last_login_at");

    let resp = ctx
        .post_json(
            "/auth/login",
            &LoginRequest {
                email: user.email.clone(),
                password: "Wrong-pass1!".into(),
            },
        )
        .await?;
    ensure!(
        resp.status() == 401,
        "expected 401 for wrong pw, got {}",
        resp.status()
    );
    Ok(())
}

/// POST /api/v1/auth/refresh → new pair; the old refresh token is spent.
pub async fn refresh_rotates_token(ctx: &TestContext) -> Result<()> {
    let user = ctx.register_user().await?;
    let request = RefreshRequest {
        refresh_token: user.refresh_token.clone(),
    };

    let resp = ctx.post_json("/auth/refresh", &request).await?;
    ensure!(resp.status() == 200, "expected 200, got {}", resp.status());
    let pair: TokenPairResponse = resp.json().await?;
    ensure!(pair.refresh_token != user.refresh_token, "expected rotation");

    let resp = ctx.get_authed("/users/me", &pair.access_token).await?;
    ensure!(resp.status() == 200, "new access token rejected");

    let resp = ctx.post_json("/auth/refresh", &request).await?;
    ensure!(
        resp.status() == 401,
        "expected 401 on reuse, got {}",
        resp.status()
    );
    Ok(())
}

/// Protected routes without a valid bearer token → 401.
pub async fn requires_bearer_token(ctx: &TestContext) -> Result<()> {
    let resp = ctx.get("/tasks").await?;
    ensure!(resp.status() == 401, "expected 401, got {}", resp.status());

    let resp = ctx.get_authed("/tasks", "not-a-jwt").await?;
    ensure!(resp.status() == 401, "expected 401, got {}", resp.status());
    Ok(())
}

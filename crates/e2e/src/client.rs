use anyhow::{Result, anyhow};
use serde::Serialize;
use uuid::Uuid;

use taskflow_api::{AuthResponse, RegisterRequest};

/// Password that satisfies the server's complexity rules.
pub const TEST_PASSWORD: &str = "E2eTest9!";

/// Holds connection info for a test run.
pub struct TestContext {
    client: reqwest::Client,
    base_url: String,
}

/// A registered test user with credentials.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user_id: String,
    pub email: String,
    pub password: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl TestContext {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn reqwest_client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Build a full API URL from a path like `/health`.
    pub fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    /// Register a fresh user with a unique email.
    pub async fn register_user(&self) -> Result<TestUser> {
        let id = Uuid::new_v4();
        let email = format!("test-{id}@e2e.local");
        let password = TEST_PASSWORD.to_string();

        let resp = self
            .post_json(
                "/auth/register",
                &RegisterRequest {
                    email: email.clone(),
                    password: password.clone(),
                    first_name: "E2E".into(),
                    last_name: id.simple().to_string()[..8].to_string(),
                    phone: None,
                },
            )
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("register failed ({status}): {body}"));
        }
        let auth: AuthResponse = resp.json().await?;

        Ok(TestUser {
            user_id: auth.user.id,
            email,
            password,
            access_token: auth.access_token,
            refresh_token: auth.refresh_token,
        })
    }

    // ── HTTP convenience methods ──────────────────────────────────────

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self.client.get(self.url(path)).send().await?)
    }

    pub async fn post_json<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        Ok(self.client.post(self.url(path)).json(body).send().await?)
    }

    pub async fn get_authed(&self, path: &str, token: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await?)
    }

    pub async fn post_json_authed<T: Serialize>(
        &self,
        path: &str,
        token: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        Ok(self
            .client
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?)
    }

    pub async fn patch_json_authed<T: Serialize>(
        &self,
        path: &str,
        token: &str,
        body: &T,
    ) -> Result<reqwest::Response> {
        Ok(self
            .client
            .patch(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?)
    }

    pub async fn delete_authed(&self, path: &str, token: &str) -> Result<reqwest::Response> {
        Ok(self
            .client
            .delete(self.url(path))
            .bearer_auth(token)
            .send()
            .await?)
    }
}

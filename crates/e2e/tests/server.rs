use taskflow_e2e::client::TestContext;

fn get_ctx() -> TestContext {
    let base_url = std::env::var("BASE_URL")
        .or_else(|_| std::env::var("TASKFLOW_BASE_URL"))
        .unwrap_or_else(|_| "http://localhost:3000".into());
    TestContext::new(base_url)
}

macro_rules! e2e_test {
    ($module:ident :: $name:ident) => {
        #[tokio::test]
        async fn $name() {
            let ctx = get_ctx();
            taskflow_e2e::specs::$module::$name(&ctx).await.unwrap();
        }
    };
}

taskflow_e2e::for_each_spec!(e2e_test);

#[tokio::test]
async fn docs_are_served_as_markdown_on_request() {
    let ctx = get_ctx();
    let docs_url = ctx.url("/health").replace("/api/v1/health", "/docs");
    let resp = ctx
        .reqwest_client()
        .get(docs_url)
        .header("accept", "text/markdown")
        .send()
        .await
        .expect("request failed");

    // Hidden entirely when the server runs in production.
    if resp.status().as_u16() == 404 {
        return;
    }
    assert_eq!(resp.status().as_u16(), 200);
    let body = resp.text().await.expect("docs body");
    assert!(body.contains("`/tasks`"), "docs should list task routes");
}

#[tokio::test]
async fn unknown_routes_return_not_found() {
    let ctx = get_ctx();
    for path in ["/projects", "/teams", "/nope"] {
        let resp = ctx.get(path).await.expect("request failed");
        assert_eq!(
            resp.status().as_u16(),
            404,
            "expected 404 for unknown endpoint {path}"
        );
    }
}

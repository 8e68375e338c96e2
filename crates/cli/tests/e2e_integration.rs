//! End-to-end flow across the workspace crates: ingest documents, search
//! them, then serve a cited chat answer over HTTP.

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use cmp_config::AppConfig;
use cmp_context::ContextResolver;
use cmp_core::MemoryStore;
use cmp_gateway::{CHAT_ROUTE, GatewayState, build_router};
use cmp_memory::{StoreConfig, open_store};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn seed_project(root: &Path) {
    write(
        root,
        "contexts/base/base.ctx",
        "name: base\nversion: 1.0.0\nrole:\n  persona: generic assistant\n  capabilities: [answer_questions]\nguardrails:\n  max_tokens: 200\n",
    );
    write(
        root,
        "contexts/SupportBot/supportbot.ctx",
        "extends: ../base/base.ctx\nname: SupportBot\nversion: 1.2.0\nrole:\n  persona: support agent for Acme\n",
    );
    write(
        root,
        "prompts/SupportBot/agent_response.md",
        "You are a {{ context.role.persona }}.\n{% for r in results %}- {{ r.content }}\n{% endfor %}Sources: {% for r in results %}{{ r.id }} {% endfor %}",
    );
}

fn store_config(config: &AppConfig) -> StoreConfig {
    StoreConfig::new(config.project_root.clone(), "SupportBot")
        .with_tenant("acme")
        .with_embedding(&config.memory.embedding_model, config.memory.embedding_dim)
}

#[tokio::test]
async fn ingest_search_and_chat() {
    let dir = tempfile::tempdir().unwrap();
    seed_project(dir.path());
    let mut config = AppConfig::with_root(dir.path());
    config.security.require_citation = true;
    config.memory.default_top_k = 2;

    // Ingest
    let store = open_store(store_config(&config)).await.unwrap();
    let docs = vec![
        "Refunds are processed within five business days.".to_string(),
        "Orders ship from the Berlin warehouse.".to_string(),
        "Gift cards cannot be refunded.".to_string(),
    ];
    let version = store.ingest_documents(&docs).await.unwrap();
    store.close().await.unwrap();

    // Search
    let store = open_store(store_config(&config)).await.unwrap();
    let results = store.search("how are refunds processed", 2).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].content.starts_with("Refunds are processed"));
    assert!(results[0].id.starts_with(&version));
    assert!(results[0].score >= results[1].score);

    // Context resolves through `extends`
    let resolver = ContextResolver::new(dir.path());
    let ctx = resolver.resolve("acme", "SupportBot").await.unwrap();
    assert_eq!(ctx.version, "1.2.0");
    assert_eq!(ctx.role.capabilities, vec!["answer_questions"]);

    // Chat
    let state = Arc::new(GatewayState::with_env(config, |_| None).unwrap());
    let body = json!({
        "tenant_id": "acme",
        "context": "SupportBot",
        "component": "SupportBot",
        "query": "how are refunds processed",
        "action": "answer_questions",
    });
    let req = Request::builder()
        .method("POST")
        .uri(CHAT_ROUTE)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = build_router(state.clone()).oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let reply: Value = serde_json::from_slice(&bytes).unwrap();
    let rendered = reply["rendered"].as_str().unwrap();
    assert!(rendered.starts_with("You are a support agent for Acme."), "{rendered}");
    assert!(rendered.contains("- Refunds are processed within five business days."));
    assert!(rendered.contains("Sources: "));

    let metrics = state.metrics.encode().unwrap();
    assert!(metrics.contains(r#"cmp_memory_search_duration_seconds_count{component="SupportBot"} 1"#));
}

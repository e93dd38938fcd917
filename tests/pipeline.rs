//! End-to-end tests: service and HTTP API over a temporary SQLite database,
//! the in-memory vector store, and in-process fake providers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use mindmenu::config::Config;
use mindmenu::embedding::Embedder;
use mindmenu::generation::Generator;
use mindmenu::models::ChatbotStatus;
use mindmenu::prompt::NO_INFORMATION_RESPONSE;
use mindmenu::service::{
    CreateChatbot, NewBranch, NewRestaurant, QueryRequest, ReindexRequest, Service,
};
use mindmenu::vector_store::InMemoryVectorStore;
use mindmenu::{db, migrate, server};

const DIMS: usize = 16;

/// Bag-of-words embedder: each lowercase token bumps one of `DIMS` buckets.
struct WordEmbedder {
    calls: AtomicUsize,
}

fn bucket(token: &str) -> usize {
    token.bytes().map(|b| b as usize).sum::<usize>() % DIMS
}

#[async_trait]
impl Embedder for WordEmbedder {
    fn model_name(&self) -> &str {
        "word-buckets"
    }
    fn dims(&self) -> usize {
        DIMS
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMS];
                for token in text
                    .to_lowercase()
                    .split(|c: char| !c.is_alphanumeric())
                    .filter(|t| !t.is_empty())
                {
                    v[bucket(token)] += 1.0;
                }
                v
            })
            .collect())
    }
}

/// Records every prompt; optionally fails.
struct ScriptedGenerator {
    prompts: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if self.fail {
            anyhow::bail!("no response candidates generated");
        }
        Ok("We are open from 9am to 5pm.".to_string())
    }
}

struct Harness {
    _dir: TempDir,
    service: Arc<Service>,
    generator: Arc<ScriptedGenerator>,
    embedder: Arc<WordEmbedder>,
    vectors: Arc<InMemoryVectorStore>,
}

fn test_config(dir: &TempDir) -> Config {
    let text = format!(
        r#"
[db]
path = "{}/mm.sqlite"

[server]
bind = "127.0.0.1:0"

[embedding]
provider = "disabled"

[vector_store]
provider = "memory"
batch_size = 2
"#,
        dir.path().display()
    );
    toml::from_str(&text).unwrap()
}

async fn harness(generator_fails: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);
    let pool = db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let embedder = Arc::new(WordEmbedder {
        calls: AtomicUsize::new(0),
    });
    let generator = Arc::new(ScriptedGenerator {
        prompts: Mutex::new(Vec::new()),
        fail: generator_fails,
    });
    let vectors = Arc::new(InMemoryVectorStore::new());
    let service = Arc::new(Service::new(
        pool,
        vectors.clone(),
        embedder.clone(),
        generator.clone(),
        &config,
    ));

    Harness {
        _dir: dir,
        service,
        generator,
        embedder,
        vectors,
    }
}

fn menu() -> Value {
    json!({
        "hours": "9am-5pm",
        "appetizers": ["Soup", "Salad"],
        "drinks": {"coffee": "Espresso", "tea": "Jasmine"}
    })
}

/// Create a restaurant and branch, returning `(restaurant_id, branch_id)`.
async fn seed_branch(service: &Service, branch_name: &str) -> (String, String) {
    let restaurant = service
        .create_restaurant(NewRestaurant {
            name: "Casa Verde".to_string(),
            description: String::new(),
            owner_id: "owner-1".to_string(),
        })
        .await
        .unwrap();
    let branch = service
        .create_branch(NewBranch {
            restaurant_id: restaurant.id.clone(),
            name: branch_name.to_string(),
            address: String::new(),
        })
        .await
        .unwrap();
    (restaurant.id, branch.id)
}

async fn index(service: &Service, branch_id: &str, content: Option<Value>) -> String {
    let submission = service
        .create_chatbot(CreateChatbot {
            branch_id: branch_id.to_string(),
            content,
            prune: false,
        })
        .await
        .unwrap();
    submission.done.await.unwrap().unwrap();
    submission.chatbot.id
}

fn question(q: &str, session: Option<&str>) -> QueryRequest {
    QueryRequest {
        question: q.to_string(),
        session_id: session.map(str::to_string),
        language: None,
    }
}

#[tokio::test]
async fn test_index_then_query_answers_from_context() {
    let h = harness(false).await;
    let (restaurant_id, branch_id) = seed_branch(&h.service, "Main Street").await;
    let chatbot_id = index(&h.service, &branch_id, Some(menu())).await;

    let bot = h.service.get_chatbot(&chatbot_id).await.unwrap();
    assert_eq!(bot.status, ChatbotStatus::Active);
    assert_eq!(bot.version, 1);

    let namespace = format!("{}_Main_Street", restaurant_id);
    assert_eq!(h.vectors.len(&namespace), 5);

    let answer = h
        .service
        .query(&branch_id, question("What are your hours?", None), false)
        .await
        .unwrap();
    assert_eq!(answer.response, "We are open from 9am to 5pm.");
    assert_eq!(answer.debug.namespace, namespace);
    assert_eq!(answer.debug.matches, 5);
    assert!(answer.context.contains(&"hours: 9am-5pm".to_string()));
    assert!(answer.debug.history_count.is_none());
    assert!(!answer.session_id.is_empty());

    let prompts = h.generator.prompts.lock().unwrap();
    assert!(prompts[0].contains("Respond in English."));
    assert!(prompts[0].contains("This is the start of a new conversation."));
}

#[tokio::test]
async fn test_resubmitting_same_content_embeds_nothing() {
    let h = harness(false).await;
    let (_, branch_id) = seed_branch(&h.service, "Main").await;
    let chatbot_id = index(&h.service, &branch_id, Some(menu())).await;
    let embedded = h.embedder.calls.load(Ordering::SeqCst);
    assert_eq!(embedded, 5);

    // Reindex from the latest snapshot: same document, same version.
    let submission = h
        .service
        .reindex(&chatbot_id, ReindexRequest::default())
        .await
        .unwrap();
    let report = submission.done.await.unwrap().unwrap();
    assert_eq!(report.sync.unchanged, 5);
    assert_eq!(report.sync.upserted, 0);
    assert_eq!(report.version, 1);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), embedded);

    // One edited value: one chunk re-embedded, version bumps.
    let mut edited = menu();
    edited["hours"] = json!("10am-6pm");
    let submission = h
        .service
        .reindex(
            &chatbot_id,
            ReindexRequest {
                content: Some(edited),
                prune: false,
            },
        )
        .await
        .unwrap();
    let report = submission.done.await.unwrap().unwrap();
    assert_eq!(report.sync.updated, 1);
    assert_eq!(report.version, 2);
    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), embedded + 1);
}

#[tokio::test]
async fn test_history_is_bounded_to_last_five_turns() {
    let h = harness(false).await;
    let (_, branch_id) = seed_branch(&h.service, "Main").await;
    index(&h.service, &branch_id, Some(menu())).await;

    for i in 1..=7 {
        h.service
            .query(&branch_id, question(&format!("question {}", i), Some("s-1")), true)
            .await
            .unwrap();
    }
    let answer = h
        .service
        .query(&branch_id, question("final question", Some("s-1")), true)
        .await
        .unwrap();
    assert_eq!(answer.session_id, "s-1");
    assert_eq!(answer.debug.history_count, Some(5));
    assert_eq!(answer.debug.language.as_deref(), Some("en"));

    let prompts = h.generator.prompts.lock().unwrap();
    let last = prompts.last().unwrap();
    assert!(!last.contains("User: question 1\n"));
    assert!(!last.contains("User: question 2\n"));
    for i in 3..=7 {
        assert!(last.contains(&format!("User: question {}\n", i)));
    }
}

#[tokio::test]
async fn test_generation_failure_returns_context() {
    let h = harness(true).await;
    let (_, branch_id) = seed_branch(&h.service, "Main").await;
    index(&h.service, &branch_id, Some(json!({"hours": "9am-5pm"}))).await;

    let answer = h
        .service
        .query(&branch_id, question("hours?", None), false)
        .await
        .unwrap();
    assert_eq!(
        answer.response,
        "I found some information but couldn't generate a proper response. Here's what I found: hours: 9am-5pm"
    );
}

#[tokio::test]
async fn test_unindexed_branch_gets_no_information_reply() {
    let h = harness(false).await;
    let (_, branch_id) = seed_branch(&h.service, "Main").await;

    let answer = h
        .service
        .query(&branch_id, question("anything?", None), false)
        .await
        .unwrap();
    assert_eq!(answer.response, NO_INFORMATION_RESPONSE);
    assert!(answer.context.is_empty());
    assert!(h.generator.prompts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_branches_do_not_see_each_other() {
    let h = harness(false).await;
    let (_, main) = seed_branch(&h.service, "Main").await;
    let (_, harbor) = seed_branch(&h.service, "Harbor").await;
    index(&h.service, &main, Some(json!({"hours": "9am-5pm"}))).await;
    index(&h.service, &harbor, Some(json!({"special": "Oysters"}))).await;

    let answer = h
        .service
        .query(&harbor, question("hours?", None), false)
        .await
        .unwrap();
    assert_eq!(answer.context, vec!["special: Oysters".to_string()]);
}

#[tokio::test]
async fn test_reindex_without_snapshot_is_rejected() {
    let h = harness(false).await;
    let (_, branch_id) = seed_branch(&h.service, "Main").await;
    let err = h
        .service
        .create_chatbot(CreateChatbot {
            branch_id,
            content: None,
            prune: false,
        })
        .await
        .err()
        .unwrap();
    assert_eq!(err.code(), "bad_request");
}

#[tokio::test]
async fn test_branch_names_sharing_a_namespace_are_rejected() {
    let h = harness(false).await;
    let (restaurant_id, _) = seed_branch(&h.service, "Main Street").await;

    for clashing in ["Main_Street", "Main Street"] {
        let err = h
            .service
            .create_branch(NewBranch {
                restaurant_id: restaurant_id.clone(),
                name: clashing.to_string(),
                address: String::new(),
            })
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), "conflict", "{} should clash", clashing);
    }

    // Same name under another restaurant has its own namespace.
    seed_branch(&h.service, "Main Street").await;
    let branches = h.service.list_branches(Some(&restaurant_id)).await.unwrap();
    assert_eq!(branches.len(), 1);
}

#[tokio::test]
async fn test_concurrent_chatbot_requests_share_one_chatbot() {
    let h = harness(false).await;
    let (_, branch_id) = seed_branch(&h.service, "Main").await;
    let request = || CreateChatbot {
        branch_id: branch_id.clone(),
        content: Some(menu()),
        prune: false,
    };

    let (first, second) = tokio::join!(
        h.service.create_chatbot(request()),
        h.service.create_chatbot(request())
    );
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first.chatbot.id, second.chatbot.id);

    first.done.await.unwrap().unwrap();
    second.done.await.unwrap().unwrap();
    let bot = h.service.get_chatbot(&first.chatbot.id).await.unwrap();
    assert_eq!(bot.status, ChatbotStatus::Active);
    assert_eq!(bot.version, 1);
}

// ============ HTTP ============

async fn spawn_server(service: Arc<Service>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, server::router(service)).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_http_flow() {
    let h = harness(false).await;
    let base = spawn_server(h.service.clone()).await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(format!("{}/health", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let resp = client
        .post(format!("{}/restaurants", base))
        .json(&json!({"name": "Casa Verde", "owner_id": "owner-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let restaurant: Value = resp.json().await.unwrap();
    let restaurant_id = restaurant["id"].as_str().unwrap().to_string();

    let branch: Value = client
        .post(format!("{}/branches", base))
        .json(&json!({"restaurant_id": restaurant_id, "name": "Main Street"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let branch_id = branch["id"].as_str().unwrap().to_string();

    let listed: Value = client
        .get(format!("{}/restaurants/{}/branches", base, restaurant_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["count"], 1);

    let resp = client
        .post(format!("{}/chatbots", base))
        .json(&json!({"branch_id": branch_id, "content": menu()}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let accepted: Value = resp.json().await.unwrap();
    assert_eq!(accepted["status"], "building");
    let chatbot_id = accepted["chatbot_id"].as_str().unwrap().to_string();

    let mut status = String::new();
    for _ in 0..100 {
        let bot: Value = client
            .get(format!("{}/chatbots/{}", base, chatbot_id))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        status = bot["status"].as_str().unwrap().to_string();
        if status != "building" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, "active");

    let answer: Value = client
        .post(format!("{}/branches/{}/query", base, branch_id))
        .json(&json!({"question": "What are your hours?"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(answer["response"], "We are open from 9am to 5pm.");
    assert_eq!(
        answer["debug"]["namespace"],
        format!("{}_Main_Street", restaurant_id)
    );

    let snapshots: Value = client
        .get(format!("{}/branches/{}/snapshots", base, branch_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshots["count"], 1);
}

#[tokio::test]
async fn test_http_error_contract() {
    let h = harness(false).await;
    let base = spawn_server(h.service.clone()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/branches/missing/query", base))
        .json(&json!({"question": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "not_found");

    let (restaurant_id, branch_id) = seed_branch(&h.service, "Main").await;
    let resp = client
        .post(format!("{}/branches/{}/query-with-history", base, branch_id))
        .json(&json!({"question": "hi"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("session_id"));

    let resp = client
        .post(format!("{}/branches", base))
        .json(&json!({"restaurant_id": "nope", "name": "X"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/branches", base))
        .json(&json!({"restaurant_id": restaurant_id, "name": "Main"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "conflict");

    let resp = client
        .post(format!("{}/restaurants", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

//! Test fixtures
//!
//! A fake NCBI E-utilities server so the real PubMed adapter can run without
//! network access, plus test-only tools for exercising session lifecycle.

use super::constants::*;
use axum::{extract::Query, extract::State, routing::get, Json, Router};
use medtools_server::mcp::registry::RegisteredTool;
use medtools_server::mcp::ToolBuilder;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Fake E-utilities endpoint counting how often it is searched.
pub struct FakeUpstream {
    pub base_url: String,
    search_hits: Arc<AtomicUsize>,
    _shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

async fn esearch(
    State(hits): State<Arc<AtomicUsize>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    hits.fetch_add(1, Ordering::SeqCst);
    let term = params.get("term").cloned().unwrap_or_default();
    Json(json!({
        "esearchresult": {
            "count": "1",
            "idlist": [PUBMED_PMID],
            "querytranslation": term,
        }
    }))
}

async fn esummary() -> Json<Value> {
    Json(json!({
        "result": {
            "uids": [PUBMED_PMID],
            PUBMED_PMID: {
                "uid": PUBMED_PMID,
                "title": PUBMED_TITLE,
                "fulljournalname": PUBMED_JOURNAL,
                "source": "Pediatr Pulmonol",
                "pubdate": "2019 Nov",
                "authors": [{"name": "Doe J"}, {"name": "Roe R"}],
                "articleids": [{"idtype": "doi", "value": "10.1002/ppul.24500"}],
            }
        }
    }))
}

impl FakeUpstream {
    pub async fn spawn() -> Self {
        let search_hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route("/esearch.fcgi", get(esearch))
            .route("/esummary.fcgi", get(esummary))
            .with_state(search_hits.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake upstream");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Fake upstream failed");
        });

        Self {
            base_url: format!("http://127.0.0.1:{}", port),
            search_hits,
            _shutdown_tx: shutdown_tx,
        }
    }

    /// Number of `esearch` requests served, i.e. real collaborator runs.
    pub fn search_hits(&self) -> usize {
        self.search_hits.load(Ordering::SeqCst)
    }
}

/// Tool that signals when it starts and then waits to be released.
#[derive(Clone, Default)]
pub struct SlowTool {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl SlowTool {
    pub fn tool(&self) -> RegisteredTool {
        let started = self.started.clone();
        let release = self.release.clone();
        ToolBuilder::new(SLOW_TOOL)
            .description("Blocks until the test releases it")
            .cacheable(false)
            .build_fn(move |_| {
                let started = started.clone();
                let release = release.clone();
                async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(json!({"released": true}))
                }
            })
    }
}

pub fn panic_tool() -> RegisteredTool {
    ToolBuilder::new(PANIC_TOOL)
        .description("Always panics")
        .cacheable(false)
        .build_fn(|_| async move {
            if true {
                panic!("collaborator blew up");
            }
            Ok(Value::Null)
        })
}

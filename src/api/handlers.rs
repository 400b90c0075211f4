use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ApiError, AppState};
use crate::engine::pagination::{clamp_limit, paginate, Cursor, PageResponse};
use crate::worker::run_once;

#[derive(Debug, Default, Deserialize)]
pub struct TokensQuery {
    pub cursor: Option<String>,
    /// Kept as text so a malformed limit falls back to the default page size.
    pub limit: Option<String>,
}

pub async fn list_tokens(
    State(state): State<AppState>,
    Query(query): Query<TokensQuery>,
) -> Result<Json<PageResponse>, ApiError> {
    let cursor = Cursor::parse(query.cursor.as_deref())?;
    let limit = clamp_limit(query.limit.as_deref().and_then(|l| l.trim().parse::<i64>().ok()));
    let snapshot = state.cache.read().await?;
    Ok(Json(paginate(&snapshot, cursor, limit).into()))
}

pub async fn refresh(State(state): State<AppState>) -> Response {
    let summary = run_once(&state.cache, &state.broadcaster).await;
    let status = if summary.success { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(summary)).into_response()
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Health {
    pub status: String,
    pub state: String,
    pub generation: Option<u64>,
    pub age_ms: Option<u64>,
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    let current = state.cache.current();
    let now = state.cache.now_ms();
    Json(Health {
        status: if current.is_some() { "ok" } else { "warming" }.to_string(),
        state: state.cache.state().as_str().to_string(),
        generation: current.as_ref().map(|s| s.generation),
        age_ms: current.as_ref().map(|s| s.age_ms(now)),
    })
}

pub async fn updates_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> Result<Response, ApiError> {
    let updates = state
        .kv
        .subscribe(state.broadcaster.topic())
        .await
        .map_err(|e| ApiError::ServiceUnavailable(e.to_string()))?;
    Ok(ws.on_upgrade(move |socket| forward_updates(socket, updates)))
}

/// Relay each delta batch as a text frame until either side goes away.
async fn forward_updates(mut socket: WebSocket, mut updates: BoxStream<'static, Vec<u8>>) {
    loop {
        tokio::select! {
            batch = updates.next() => {
                let Some(bytes) = batch else { break };
                let text = match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "dropping non-utf8 update");
                        continue;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("update subscriber detached");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::create_router;
    use crate::cache::{CacheConfig, SnapshotCache};
    use crate::clock::ManualClock;
    use crate::engine::types::{AssetRecord, Snapshot, SourceId};
    use crate::market_data::adapters::http::tests::serve;
    use crate::market_data::delta::{BroadcastConfig, DeltaBroadcaster};
    use crate::market_data::router::{AggregationError, SnapshotSource};
    use crate::persist::memory::MemoryStore;
    use crate::persist::{KvStore, UPDATES_TOPIC};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    struct Fixed {
        count: usize,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl SnapshotSource for Fixed {
        async fn run_cycle(&self) -> Result<Snapshot, AggregationError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AggregationError::AllSourcesFailed(2));
            }
            let records = (0..self.count)
                .map(|i| AssetRecord {
                    address: format!("T{i:02}"),
                    name: "Token".into(),
                    ticker: "TKN".into(),
                    price_usd: 1.0,
                    price_native: 0.01,
                    market_cap_native: 0.0,
                    volume_usd: (self.count - i) as f64,
                    volume_native: 0.0,
                    liquidity_native: 0.0,
                    transaction_count: 0,
                    price_change_1h: 0.0,
                    price_change_24h: 0.0,
                    price_change_7d: 0.0,
                    venue: "raydium".into(),
                    chain_id: "solana".into(),
                    last_updated: 0,
                    logo_url: None,
                    sources: [SourceId::from("DexScreener")].into_iter().collect(),
                })
                .collect();
            Ok(Snapshot { generation: 1, created_at: 1_000, sources: vec![], records })
        }
    }

    async fn served(count: usize, fail: bool) -> (String, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let kv = Arc::new(MemoryStore::new(clock.clone()));
        let source = Arc::new(Fixed { count, fail: AtomicBool::new(fail) });
        let cache = Arc::new(SnapshotCache::new(source, kv.clone(), clock, CacheConfig::default()));
        let broadcaster = Arc::new(DeltaBroadcaster::new(kv.clone(), BroadcastConfig::default()));
        let base = serve(create_router(AppState::new(cache, kv.clone(), broadcaster))).await;
        (base, kv)
    }

    async fn app(count: usize, fail: bool) -> String {
        served(count, fail).await.0
    }

    #[tokio::test]
    async fn test_list_tokens_pages() {
        let base = app(30, false).await;

        let page: PageResponse = reqwest::get(format!("{base}/api/tokens?cursor=20&limit=20"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(page.tokens.len(), 10);
        assert_eq!(page.tokens[0].address, "T20");
        assert_eq!(page.next_cursor, None);
        assert_eq!(page.total, 30);
    }

    #[tokio::test]
    async fn test_list_tokens_defaults_and_camel_case() {
        let base = app(30, false).await;

        let body: serde_json::Value = reqwest::get(format!("{base}/api/tokens?limit=abc")).await.unwrap().json().await.unwrap();

        assert_eq!(body["tokens"].as_array().unwrap().len(), 25);
        assert_eq!(body["nextCursor"], "25");
        assert_eq!(body["total"], 30);
    }

    #[tokio::test]
    async fn test_bad_cursor_is_400() {
        let base = app(3, false).await;

        let resp = reqwest::get(format!("{base}/api/tokens?cursor=-1")).await.unwrap();

        assert_eq!(resp.status(), 400);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "INVALID_CURSOR");
    }

    #[tokio::test]
    async fn test_aggregation_failure_is_503() {
        let base = app(3, true).await;

        let resp = reqwest::get(format!("{base}/api/tokens")).await.unwrap();

        assert_eq!(resp.status(), 503);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "AGGREGATION_FAILURE");
    }

    #[tokio::test]
    async fn test_refresh_and_health() {
        let base = app(4, false).await;
        let client = reqwest::Client::new();

        let health: Health = client.get(format!("{base}/health")).send().await.unwrap().json().await.unwrap();
        assert_eq!(health.status, "warming");
        assert_eq!(health.generation, None);

        let summary: serde_json::Value =
            client.post(format!("{base}/api/refresh")).send().await.unwrap().json().await.unwrap();
        assert_eq!(summary["success"], true);
        assert_eq!(summary["tokensCount"], 4);

        let health: Health = client.get(format!("{base}/health")).send().await.unwrap().json().await.unwrap();
        assert_eq!(health.status, "ok");
        assert_eq!(health.generation, Some(1));
        assert_eq!(health.age_ms, Some(0));
    }

    #[tokio::test]
    async fn test_updates_relay_live_batches_without_replay() {
        let (base, kv) = served(1, false).await;
        let url = format!("{}/api/updates", base.replacen("http://", "ws://", 1));

        let (mut first, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        kv.publish(UPDATES_TOPIC, br#"[{"address":"A"}]"#.to_vec()).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), first.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(frame, WsMessage::Text(r#"[{"address":"A"}]"#.into()));
        first.close(None).await.unwrap();

        // published while nobody new is listening
        kv.publish(UPDATES_TOPIC, b"[\"missed\"]".to_vec()).await.unwrap();

        let (mut second, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
        kv.publish(UPDATES_TOPIC, b"[]".to_vec()).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(5), second.next()).await.unwrap().unwrap().unwrap();
        assert_eq!(frame, WsMessage::Text("[]".into()));
    }
}

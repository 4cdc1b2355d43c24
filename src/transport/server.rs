//! Axum server exposing a [`ChunkStore`] over the chunk protocol.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::model::{RootEnvelope, SessionResult};

use super::{ApiResponse, ChunkStore, RecordSink, RecordsUpload, SessionSource, TransportError};

/// Largest accepted request body.
pub const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// Server configuration options.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Host address to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Allow any origin, so recorders embedded in other sites can upload.
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_permissive: true,
        }
    }
}

/// Transport failures rendered as a `{code: -1, msg}` envelope.
struct ApiError(TransportError);

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            TransportError::NotFound(_) => StatusCode::NOT_FOUND,
            TransportError::Rejected(_) => StatusCode::BAD_REQUEST,
            TransportError::Gap { .. } => StatusCode::CONFLICT,
            TransportError::Io(_) | TransportError::Json(_) | TransportError::Http(_) => {
                tracing::error!(error = %self.0, "chunk server failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(ApiResponse::<()>::error(self.0.to_string()));
        (status, body).into_response()
    }
}

type StoreState = Arc<ChunkStore>;

#[derive(Debug, Default, Deserialize)]
struct FetchQuery {
    #[serde(default)]
    lenient: bool,
}

async fn submit_root(
    State(store): State<StoreState>,
    Json(root): Json<RootEnvelope>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    store.submit_root(&root).await?;
    tracing::info!(session_id = %root.session_id, nodes = root.root.node_count(), "session started");
    Ok(Json(ApiResponse::ok(None, "")))
}

async fn submit_records(
    State(store): State<StoreState>,
    Json(upload): Json<RecordsUpload>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    store.submit_records(&upload.session_id, upload.records).await?;
    Ok(Json(ApiResponse::ok(None, "")))
}

async fn fetch_session(
    State(store): State<StoreState>,
    Path(session_id): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Result<Json<ApiResponse<SessionResult>>, ApiError> {
    let session = store.fetch_session(&session_id, query.lenient).await?;
    let msg = if session.lost_records > 0 {
        format!("Lost {} records", session.lost_records)
    } else {
        String::new()
    };
    Ok(Json(ApiResponse::ok(Some(session), msg)))
}

/// Build the router for `store`.
pub fn build_router(store: StoreState, cors_permissive: bool) -> Router {
    let cors = if cors_permissive {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([header::CONTENT_TYPE])
    };

    Router::new()
        .route("/ubm", post(submit_root))
        .route("/ubm/", post(submit_root))
        .route("/ubm/records", post(submit_records))
        .route("/ubm/{session_id}", get(fetch_session))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/// Run the chunk server until it is shut down.
pub async fn run_server(store: ChunkStore, config: ServerConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tokio::fs::create_dir_all(store.dir()).await?;
    tracing::info!(store = %store.dir().display(), "Starting chunk server at http://{}", addr);

    let app = build_router(Arc::new(store), config.cors_permissive);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Record, RecordKind, RootMeta, SnapshotNode};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path());
        (build_router(Arc::new(store), true), dir)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn root_json(session_id: &str) -> serde_json::Value {
        serde_json::to_value(RootEnvelope {
            session_id: session_id.into(),
            location: "https://example.com/".into(),
            meta_info: RootMeta { base_timestamp: 1_700_000_000_000 },
            root: SnapshotNode::document(1),
        })
        .unwrap()
    }

    fn records_json(session_id: &str, ids: std::ops::Range<u64>) -> serde_json::Value {
        let records: Vec<Record> = ids
            .map(|id| Record::new(id, id * 10, RecordKind::PointerMove { left: 1.0, top: 2.0 }))
            .collect();
        serde_json::to_value(RecordsUpload {
            session_id: session_id.into(),
            records,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_upload_and_fetch_session() {
        let (app, _dir) = test_router();

        let response = app.clone().oneshot(post_json("/ubm/", root_json("s1"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["code"], 0);

        for range in [0..3, 3..5] {
            let response = app
                .clone()
                .oneshot(post_json("/ubm/records", records_json("s1", range)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app.oneshot(get("/ubm/s1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["code"], 0);
        assert_eq!(json["data"]["sessionId"], "s1");
        assert_eq!(json["data"]["recordItems"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_gap_is_rejected_unless_lenient() {
        let (app, _dir) = test_router();
        app.clone().oneshot(post_json("/ubm", root_json("s2"))).await.unwrap();
        for range in [0..2, 4..6] {
            app.clone()
                .oneshot(post_json("/ubm/records", records_json("s2", range)))
                .await
                .unwrap();
        }

        let response = app.clone().oneshot(get("/ubm/s2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(response).await["code"], -1);

        let response = app.oneshot(get("/ubm/s2?lenient=true")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["msg"], "Lost 4 records");
        assert_eq!(json["data"]["recordItems"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_new_root_replaces_session() {
        let (app, _dir) = test_router();
        app.clone().oneshot(post_json("/ubm/", root_json("s3"))).await.unwrap();
        app.clone()
            .oneshot(post_json("/ubm/records", records_json("s3", 0..4)))
            .await
            .unwrap();
        app.clone().oneshot(post_json("/ubm/", root_json("s3"))).await.unwrap();

        let json = json_body(app.oneshot(get("/ubm/s3")).await.unwrap()).await;
        assert_eq!(json["data"]["recordItems"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_unknown_session_not_found() {
        let (app, _dir) = test_router();
        let response = app.oneshot(get("/ubm/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = json_body(response).await;
        assert_eq!(json["code"], -1);
        assert!(json.get("data").is_none());
    }
}

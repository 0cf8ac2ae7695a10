//! JSON HTTP surface over [`Flixcache`].

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::codes::CodeKind;
use crate::types::{Category, Feed};
use crate::Flixcache;

pub type ApiResult<T> = Result<T, ApiError>;

/// Error rendered as `{ "erro": message }` with its status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    pub fn bad_request(message: impl Into<String>) -> Self { Self::new(StatusCode::BAD_REQUEST, message) }
    pub fn not_found(message: impl Into<String>) -> Self { Self::new(StatusCode::NOT_FOUND, message) }
    pub fn internal(message: impl Into<String>) -> Self { Self::new(StatusCode::INTERNAL_SERVER_ERROR, message) }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "erro": self.message }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct WaitQuery {
    wait: Option<String>,
}

impl WaitQuery {
    fn wait(&self) -> bool {
        self.wait.as_deref().is_some_and(|w| w.trim().eq_ignore_ascii_case("true"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    pagina: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IdQuery {
    id: Option<String>,
}

/// Page numbers that are missing, non-numeric or below 1 read as 1.
pub fn parse_page(raw: Option<&str>) -> usize {
    raw.and_then(|p| p.trim().parse::<i64>().ok()).map(|p| p.max(1) as usize).unwrap_or(1)
}

/// Ids are non-empty, alphanumeric and at most 50 characters.
pub fn valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().count() <= 50 && id.chars().all(char::is_alphanumeric)
}

pub fn router(app: Arc<Flixcache>) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/filmes/home", get(home))
        .route("/filmes/novos", get(new_movies))
        .route("/filmes/pagina", get(movies_page))
        .route("/filmes/pagina/atualizar", get(refresh_movies_page))
        .route("/series", get(series))
        .route("/series/pagina", get(series_page))
        .route("/animes", get(refresh_animes))
        .route("/animes/pagina", get(animes_page))
        .route("/filme/detalhes", get(movie_details))
        .route("/serie/detalhes", get(series_details))
        .route("/codigos/filmes", get(movie_codes))
        .route("/codigos/series", get(series_codes))
        .layer(middleware::map_response(security_headers))
        .with_state(app)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(app: Arc<Flixcache>, addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, router(app)).await?;
    Ok(())
}

async fn security_headers(mut res: Response) -> Response {
    let headers = res.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    res
}

async fn health() -> Json<Value> {
    Json(json!({ "mensagem": "API Superflix está online 🚀" }))
}

async fn home(State(app): State<Arc<Flixcache>>) -> Json<Value> {
    Json(json!(app.snapshot(Feed::Home).await.items))
}

async fn refresh_feed(app: &Flixcache, feed: Feed, q: &WaitQuery) -> Json<Value> {
    Json(json!(app.refresh(feed, q.wait()).await))
}

async fn new_movies(State(app): State<Arc<Flixcache>>, Query(q): Query<WaitQuery>) -> Json<Value> {
    refresh_feed(&app, Feed::NewMovies, &q).await
}

async fn refresh_movies_page(State(app): State<Arc<Flixcache>>, Query(q): Query<WaitQuery>) -> Json<Value> {
    refresh_feed(&app, Feed::Catalog(Category::Filmes), &q).await
}

async fn series(State(app): State<Arc<Flixcache>>, Query(q): Query<WaitQuery>) -> Json<Value> {
    refresh_feed(&app, Feed::Series, &q).await
}

async fn refresh_animes(State(app): State<Arc<Flixcache>>, Query(q): Query<WaitQuery>) -> Json<Value> {
    refresh_feed(&app, Feed::Catalog(Category::Animes), &q).await
}

async fn catalog_page(app: &Flixcache, category: Category, q: &PageQuery) -> Json<Value> {
    let page = app.page(category, parse_page(q.pagina.as_deref())).await;
    let mut body = Map::new();
    body.insert(category.as_str().to_string(), json!(page.items));
    body.insert("total_itens".into(), json!(page.total_itens));
    body.insert("total_paginas".into(), json!(page.total_paginas));
    body.insert("pagina_atual".into(), json!(page.pagina_atual));
    Json(Value::Object(body))
}

async fn movies_page(State(app): State<Arc<Flixcache>>, Query(q): Query<PageQuery>) -> Json<Value> {
    catalog_page(&app, Category::Filmes, &q).await
}

async fn series_page(State(app): State<Arc<Flixcache>>, Query(q): Query<PageQuery>) -> Json<Value> {
    catalog_page(&app, Category::Series, &q).await
}

async fn animes_page(State(app): State<Arc<Flixcache>>, Query(q): Query<PageQuery>) -> Json<Value> {
    catalog_page(&app, Category::Animes, &q).await
}

async fn details(app: &Flixcache, category: Category, q: &IdQuery, missing: &str) -> ApiResult<Json<Value>> {
    let id = q.id.as_deref().unwrap_or_default();
    if !valid_id(id) {
        warn!(%category, %id, "invalid id");
        return Err(ApiError::bad_request("ID inválido"));
    }
    match app.find(category, id).await {
        Some(item) => Ok(Json(json!(item))),
        None => Err(ApiError::not_found(missing)),
    }
}

async fn movie_details(State(app): State<Arc<Flixcache>>, Query(q): Query<IdQuery>) -> ApiResult<Json<Value>> {
    details(&app, Category::Filmes, &q, "Filme não encontrado").await
}

async fn series_details(State(app): State<Arc<Flixcache>>, Query(q): Query<IdQuery>) -> ApiResult<Json<Value>> {
    details(&app, Category::Series, &q, "Série não encontrada").await
}

async fn codes(app: &Flixcache, kind: CodeKind) -> ApiResult<Json<Value>> {
    match app.codes(kind).await {
        Ok(list) => Ok(Json(json!({ "codigos": list.joined() }))),
        Err(e) => {
            error!(%kind, error = %format!("{e:#}"), "code list unavailable");
            Err(ApiError::internal(format!("Não foi possível carregar os códigos de {kind}")))
        }
    }
}

async fn movie_codes(State(app): State<Arc<Flixcache>>) -> ApiResult<Json<Value>> {
    codes(&app, CodeKind::Filmes).await
}

async fn series_codes(State(app): State<Arc<Flixcache>>) -> ApiResult<Json<Value>> {
    codes(&app, CodeKind::Series).await
}

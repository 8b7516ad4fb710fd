use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use lister_core::entries::SortSpec;
use lister_core::error::ListerError;
use lister_core::render::{DirectoryLister, PageVars};

/// Shared caching policy for the `?css` and `?js` assets: two days,
/// and proxies must revalidate.
const ASSET_CACHE_CONTROL: &str = "max-age=172800, proxy-revalidate";

const SORT_COOKIE: &str = "sort";

/// The HTTP front of the lister: owns the listener and a shutdown
/// handle, serving every path through one fallback handler.
pub struct Server {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Server {
    pub async fn start(lister: DirectoryLister, bind: &str) -> Result<Self> {
        let state = Arc::new(lister);
        let app = router(state);

        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("failed to bind {}", bind))?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
        });

        Ok(Server {
            addr,
            shutdown: Some(shutdown_tx),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

pub fn router(state: Arc<DirectoryLister>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    Router::new()
        .fallback(handle)
        .with_state(state)
        .layer(cors)
}

async fn handle(
    axum::extract::State(lister): axum::extract::State<Arc<DirectoryLister>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let query = parse_query(uri.query().unwrap_or(""));
    // the css/js/get asset endpoints exist only at the root path
    if uri.path() == "/" {
        if query_flag(&query, "css") {
            return finish(
                &method,
                asset_response("text/css; charset=utf-8", lister.css().to_string()),
            );
        }
        if query_flag(&query, "js") {
            return finish(
                &method,
                asset_response(
                    "application/javascript; charset=utf-8",
                    lister.js().to_string(),
                ),
            );
        }
        if let (Some(name), Some(resources)) =
            (query_value(&query, "get"), lister.resources_directory())
        {
            if name.contains("../") || name.starts_with('/') {
                return StatusCode::BAD_REQUEST.into_response();
            }
            let path = resources.join(name);
            let worker = tokio::task::spawn_blocking(move || read_resource(&path));
            if let Ok(Some(response)) = worker.await {
                return finish(&method, response);
            }
            // unreadable resource: fall through to the root index
        }
    }

    let no_cookies = query_flag(&query, "no-cookies");
    let (sort, sort_from_query) = resolve_sort(&query, &headers, no_cookies);
    let wants_hashes = query_flag(&query, "hashes");

    let raw_path = uri.path().to_string();
    let decoded_path = urlencoding::decode(&raw_path)
        .map(|p| p.into_owned())
        .unwrap_or_else(|_| raw_path.clone());

    // links must replay the selection when the client refused the
    // sort cookie
    let end_url = if no_cookies {
        format!("?sort={}&no-cookies", sort.encode())
    } else {
        String::new()
    };

    let worker = tokio::task::spawn_blocking(move || {
        respond(
            &lister,
            &raw_path,
            &decoded_path,
            sort,
            &end_url,
            no_cookies,
            wants_hashes,
        )
    });
    let mut response = match worker.await {
        Ok(response) => response,
        Err(e) => {
            warn!("request worker panicked: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    };

    if sort_from_query && !no_cookies {
        let cookie = format!("{}={}; Path=/", SORT_COOKIE, sort.encode());
        if let Ok(value) = header::HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(header::SET_COOKIE, value);
        }
    }
    finish(&method, response)
}

/// Classify the request against the filesystem and build the full
/// response. Runs on the blocking pool; everything here is sync IO.
fn respond(
    lister: &DirectoryLister,
    raw_path: &str,
    decoded_path: &str,
    sort: SortSpec,
    end_url: &str,
    no_cookies: bool,
    wants_hashes: bool,
) -> Response {
    // directory renders always arrive with a trailing slash thanks to
    // the redirect, so the request path displays as-is
    let vars = PageVars {
        current_directory: decoded_path,
        end_url,
        cookies_allowed: !no_cookies,
    };

    let fs_path = match lister.resolve(decoded_path) {
        Ok(path) => path,
        Err(e) => return error_page(lister, &e, sort, &vars),
    };
    let meta = match std::fs::metadata(&fs_path) {
        Ok(meta) => meta,
        Err(_) => return error_page(lister, &ListerError::NotFound, sort, &vars),
    };

    let is_root = decoded_path.trim_matches('/').is_empty();
    if !is_root && lister.access_denied(&fs_path, meta.is_dir()) {
        return error_page(lister, &ListerError::NotFound, sort, &vars);
    }

    if meta.is_dir() {
        // canonical directory URLs end with a slash so relative links
        // resolve inside the directory
        if !raw_path.ends_with('/') {
            let location = format!("{}/{}", raw_path, end_url);
            return redirect_response(&location);
        }
        return match lister.render_directory(&fs_path, sort, &vars) {
            Ok(html) => html_response(StatusCode::OK, html),
            Err(e) => error_page(lister, &e, sort, &vars),
        };
    }

    if wants_hashes {
        return match lister.file_digests(&fs_path) {
            Ok(digests) => json_response(
                StatusCode::OK,
                serde_json::json!({ "md5": digests.md5, "sha1": digests.sha1 }),
            ),
            Err(e) => {
                let status = match e.hash_error_code() {
                    Some(_) => StatusCode::FORBIDDEN,
                    None => StatusCode::NOT_FOUND,
                };
                json_response(
                    status,
                    serde_json::json!({ "message": e.to_string(), "code": e.hash_error_code() }),
                )
            }
        };
    }

    serve_file(lister, &fs_path, &meta, sort, &vars)
}

fn serve_file(
    lister: &DirectoryLister,
    path: &std::path::Path,
    meta: &std::fs::Metadata,
    sort: SortSpec,
    vars: &PageVars<'_>,
) -> Response {
    let body = match std::fs::read(path) {
        Ok(body) => body,
        Err(_) => return error_page(lister, &ListerError::NotFound, sort, vars),
    };
    file_response(path, meta, body)
}

/// Raw bytes of a file from the resources directory. `None` falls
/// through to normal handling of the root path.
fn read_resource(path: &std::path::Path) -> Option<Response> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    let body = std::fs::read(path).ok()?;
    Some(file_response(path, &meta, body))
}

fn file_response(path: &std::path::Path, meta: &std::fs::Metadata, body: Vec<u8>) -> Response {
    let mime = lister_core::mime::mime_for_path(path);
    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CONTENT_LENGTH, body.len().to_string()),
        ],
        body,
    )
        .into_response();
    if let Some(stamp) = meta.modified().ok().map(http_date) {
        if let Ok(value) = header::HeaderValue::from_str(&stamp) {
            response.headers_mut().insert(header::LAST_MODIFIED, value);
        }
    }
    response
}

fn error_page(
    lister: &DirectoryLister,
    error: &ListerError,
    sort: SortSpec,
    vars: &PageVars<'_>,
) -> Response {
    info!("{}: {}", vars.current_directory, error);
    html_response(
        StatusCode::NOT_FOUND,
        lister.render_error_page(error, sort, vars),
    )
}

fn html_response(status: StatusCode, html: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        value.to_string(),
    )
        .into_response()
}

fn asset_response(content_type: &'static str, body: String) -> Response {
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, ASSET_CACHE_CONTROL),
        ],
        body,
    )
        .into_response()
}

fn redirect_response(location: &str) -> Response {
    let mut response = StatusCode::MOVED_PERMANENTLY.into_response();
    if let Ok(value) = header::HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

fn finish(method: &Method, mut response: Response) -> Response {
    if method == Method::HEAD {
        *response.body_mut() = Body::empty();
    }
    response
}

fn http_date(time: std::time::SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Decode `a=b&flag` query strings into decoded pairs; flags carry no
/// value.
fn parse_query(raw: &str) -> Vec<(String, Option<String>)> {
    raw.split('&')
        .filter(|part| !part.is_empty())
        .map(|part| match part.split_once('=') {
            Some((key, value)) => (decode_component(key), Some(decode_component(value))),
            None => (decode_component(part), None),
        })
        .collect()
}

fn decode_component(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

fn query_flag(query: &[(String, Option<String>)], name: &str) -> bool {
    query.iter().any(|(key, _)| key == name)
}

fn query_value<'a>(query: &'a [(String, Option<String>)], name: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| value.as_deref())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

/// The query parameter wins over the cookie; the cookie is ignored
/// entirely when the client opted out of cookies.
fn resolve_sort(
    query: &[(String, Option<String>)],
    headers: &HeaderMap,
    no_cookies: bool,
) -> (SortSpec, bool) {
    if let Some(raw) = query_value(query, SORT_COOKIE) {
        return (SortSpec::parse(raw), true);
    }
    if !no_cookies {
        if let Some(raw) = cookie_value(headers, SORT_COOKIE) {
            return (SortSpec::parse(&raw), false);
        }
    }
    (SortSpec::default(), false)
}

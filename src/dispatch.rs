//! Prefix dispatch to resource groups.
//!
//! Groups are registered in order under a path prefix. A request goes to
//! the first group whose prefix matches on a segment boundary, ignoring
//! ASCII case (`/api/v1/users` matches `/api/v1/users`, `/API/v1/Users`
//! and `/api/v1/users/42`, not `/api/v1/usersX`). The group sees the path
//! with the prefix stripped.
//!
//! Requests no group claims, and requests a group claims but cannot route,
//! become the operational 404 `can not find {originalUrl} on this server`.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::Router;
use axum::body::Body;
use axum::extract::OriginalUri;
use axum::http::uri::PathAndQuery;
use axum::http::{Request, Response, Uri};
use axum::response::IntoResponse;
use tower::{Service, ServiceExt};
use tracing::trace;

use crate::error::{AppError, AppResult};

struct Mount {
    prefix: String,
    router: Router,
}

/// Ordered set of prefix-mounted groups, usable as a router fallback.
#[derive(Clone, Default)]
pub struct Dispatcher {
    mounts: Arc<Vec<Mount>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.mounts.iter().map(|m| &m.prefix))
            .finish()
    }
}

/// Builder collecting groups before the dispatcher is frozen.
#[derive(Default)]
pub struct DispatcherBuilder {
    mounts: Vec<Mount>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `router` under `prefix`. Earlier registrations win.
    ///
    /// # Errors
    ///
    /// `ConfigError` if the prefix does not start with `/`, ends with `/`,
    /// or is already registered.
    pub fn mount(mut self, prefix: &str, router: Router) -> AppResult<Self> {
        if !prefix.starts_with('/') || prefix.len() < 2 || prefix.ends_with('/') {
            return Err(AppError::ConfigError(format!(
                "route prefix '{prefix}' must start with '/' and must not end with '/'"
            )));
        }
        if self
            .mounts
            .iter()
            .any(|m| m.prefix.eq_ignore_ascii_case(prefix))
        {
            return Err(AppError::ConfigError(format!(
                "route prefix '{prefix}' is registered twice"
            )));
        }

        let router = router
            .fallback(not_found)
            .method_not_allowed_fallback(not_found);

        self.mounts.push(Mount {
            prefix: prefix.to_owned(),
            router,
        });
        Ok(self)
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            mounts: Arc::new(self.mounts),
        }
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.mounts.iter().map(|m| m.prefix.as_str())
    }

    /// First mount claiming `path`, with the remainder for the group.
    fn resolve<'a>(&self, path: &'a str) -> Option<(&Mount, &'a str)> {
        self.mounts.iter().find_map(|mount| {
            let split = mount.prefix.len();
            let head = path.get(..split)?;
            let rest = path.get(split..)?;
            (head.eq_ignore_ascii_case(&mount.prefix) && (rest.is_empty() || rest.starts_with('/')))
                .then_some((mount, rest))
        })
    }
}

impl Service<Request<Body>> for Dispatcher {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        if req.extensions().get::<OriginalUri>().is_none() {
            let uri = req.uri().clone();
            req.extensions_mut().insert(OriginalUri(uri));
        }

        let path = req.uri().path().to_owned();
        let Some((mount, rest)) = self.resolve(&path) else {
            let response = not_found_response(&req);
            return Box::pin(async move { Ok(response) });
        };

        trace!(prefix = %mount.prefix, rest, "Dispatching to resource group");

        match strip_to(req.uri(), rest) {
            Ok(uri) => *req.uri_mut() = uri,
            Err(err) => return Box::pin(async move { Ok(err.into_response()) }),
        }

        let router = mount.router.clone();
        Box::pin(async move { router.oneshot(req).await })
    }
}

/// `uri` with its path replaced by `rest` (`/` when empty), query kept.
fn strip_to(uri: &Uri, rest: &str) -> AppResult<Uri> {
    let path = if rest.is_empty() { "/" } else { rest };
    let path_and_query = match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_owned(),
    };

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(
        PathAndQuery::try_from(path_and_query)
            .map_err(|e| AppError::Internal(format!("failed to rebuild routed URI: {e}")))?,
    );
    Uri::from_parts(parts).map_err(|e| AppError::Internal(format!("failed to rebuild routed URI: {e}")))
}

fn original_url<B>(req: &Request<B>) -> String {
    let uri = req
        .extensions()
        .get::<OriginalUri>()
        .map_or_else(|| req.uri(), |OriginalUri(uri)| uri);

    uri.path_and_query()
        .map_or_else(|| uri.path().to_owned(), |pq| pq.as_str().to_owned())
}

fn not_found_response<B>(req: &Request<B>) -> Response<Body> {
    AppError::route_not_found(&original_url(req)).into_response()
}

/// Fallback for group routers: the path reached a group but no route.
pub async fn not_found(OriginalUri(uri): OriginalUri) -> AppError {
    let url = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_owned(), |pq| pq.as_str().to_owned());
    AppError::route_not_found(&url)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;

    fn dispatcher() -> Dispatcher {
        Dispatcher::builder()
            .mount(
                "/api/v1/users",
                Router::new()
                    .route("/", get(|| async { "users" }))
                    .route("/{id}", get(|| async { "one user" })),
            )
            .unwrap()
            .mount(
                "/api/v1/users/admins",
                Router::new().route("/", get(|| async { "shadowed" })),
            )
            .unwrap()
            .build()
    }

    async fn get_text(dispatcher: &Dispatcher, uri: &str) -> (StatusCode, String) {
        let response = dispatcher
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn test_prefix_validation() {
        assert!(Dispatcher::builder().mount("api", Router::new()).is_err());
        assert!(Dispatcher::builder().mount("/api/", Router::new()).is_err());
        assert!(Dispatcher::builder().mount("/", Router::new()).is_err());

        let duplicate = Dispatcher::builder()
            .mount("/api", Router::new())
            .unwrap()
            .mount("/api", Router::new());
        assert!(duplicate.is_err());

        let differs_in_case = Dispatcher::builder()
            .mount("/api", Router::new())
            .unwrap()
            .mount("/API", Router::new());
        assert!(differs_in_case.is_err());
    }

    #[test]
    fn test_segment_boundary_matching() {
        let dispatcher = dispatcher();

        let (mount, rest) = dispatcher.resolve("/api/v1/users").unwrap();
        assert_eq!((mount.prefix.as_str(), rest), ("/api/v1/users", ""));

        let (_, rest) = dispatcher.resolve("/api/v1/users/42").unwrap();
        assert_eq!(rest, "/42");

        assert!(dispatcher.resolve("/api/v1/usersX").is_none());
        assert!(dispatcher.resolve("/api/v1").is_none());
    }

    #[tokio::test]
    async fn test_prefix_match_ignores_case() {
        let dispatcher = dispatcher();

        let (mount, rest) = dispatcher.resolve("/API/V1/Users/42").unwrap();
        assert_eq!((mount.prefix.as_str(), rest), ("/api/v1/users", "/42"));

        let (status, body) = get_text(&dispatcher, "/Api/v1/USERS").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "users");
    }

    #[tokio::test]
    async fn test_first_registered_prefix_wins() {
        let dispatcher = dispatcher();

        // `/api/v1/users` claims the request before the longer prefix
        let (status, body) = get_text(&dispatcher, "/api/v1/users/admins").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "one user");
    }

    #[tokio::test]
    async fn test_prefix_stripped() {
        let dispatcher = dispatcher();

        assert_eq!(get_text(&dispatcher, "/api/v1/users").await.1, "users");
        assert_eq!(get_text(&dispatcher, "/api/v1/users/").await.1, "users");
        assert_eq!(get_text(&dispatcher, "/api/v1/users/7?x=1").await.1, "one user");
    }

    #[tokio::test]
    async fn test_unmatched_is_operational_404() {
        let dispatcher = dispatcher();

        let (status, body) = get_text(&dispatcher, "/api/v2/things?sort=asc").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["status"], "fail");
        assert_eq!(
            body["message"],
            "can not find /api/v2/things?sort=asc on this server"
        );
    }

    #[tokio::test]
    async fn test_unrouted_inside_group_uses_original_url() {
        let dispatcher = dispatcher();

        let (status, body) = get_text(&dispatcher, "/api/v1/users/7/orders").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("can not find /api/v1/users/7/orders on this server"));
    }
}

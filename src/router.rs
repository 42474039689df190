//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. Every registration
//! composes the router's current middleware list and the handler into one
//! [`Onion`] and stores it in the tree next to the route's name. At request
//! time the router derives a context from its base context, binds the
//! matched path parameters into it, wraps the sink in a fresh
//! [`ResponseWriter`] and runs the onion.
//!
//! Route templates use `:name` for one segment and `*name` for the rest of
//! the path:
//!
//! ```rust,no_run
//! # use strata::{Context, Request, ResponseWriter, Router};
//! # fn get_user(ctx: Context, _: &mut ResponseWriter<'_>, _: &Request) -> Context { ctx }
//! # fn create_user(ctx: Context, _: &mut ResponseWriter<'_>, _: &Request) -> Context { ctx }
//! Router::new()
//!     .get("/users/:id", "user", get_user)
//!     .post("/users", "create_user", create_user);
//! ```

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use http::Method;
use matchit::Router as MatchitRouter;
use tracing::{debug, error, warn};

use crate::context::{Context, ContextKey};
use crate::handler::{self, Handler, Terminal};
use crate::middleware::{Middleware, Onion};
use crate::request::Request;
use crate::response::{ContentType, ResponseSink, ResponseWriter};
use crate::reverse::{ASSETS_ROUTE, FALLBACK_PATH, NamedRoutes, clean_path};

const PARAMS_KEY: ContextKey = ContextKey::internal("route.params");
const ROUTES_KEY: ContextKey = ContextKey::internal("route.names");

// ── Params ────────────────────────────────────────────────────────────────────

/// Path parameters captured by the matched route, in template order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize { self.0.len() }
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// All path parameters of the current request, if the route had any.
pub fn params(ctx: &Context) -> Option<&Params> {
    ctx.value::<Params>(&PARAMS_KEY)
}

/// A named path parameter, or `""` when the request has no such parameter.
///
/// For a route `/users/:id`, `param(&ctx, "id")` on `/users/42` returns `"42"`.
pub fn param(ctx: &Context, key: &str) -> String {
    params(ctx).and_then(|p| p.get(key)).unwrap_or_default().to_owned()
}

/// Reverse-routes `name` using the registry of the router serving `ctx`.
pub fn reverse(ctx: &Context, name: &str, values: &[&dyn Display]) -> String {
    match ctx.value::<Arc<NamedRoutes>>(&ROUTES_KEY) {
        Some(routes) => routes.reverse(name, values),
        None => {
            warn!(name, "reverse routing outside a routed request");
            FALLBACK_PATH.to_owned()
        }
    }
}

/// Path of a static asset, using the registry of the router serving `ctx`.
pub fn assets(ctx: &Context, path: &str) -> String {
    match ctx.value::<Arc<NamedRoutes>>(&ROUTES_KEY) {
        Some(routes) => routes.assets(path),
        None => {
            warn!(path, "asset lookup outside a routed request");
            FALLBACK_PATH.to_owned()
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The application router.
///
/// Build it once at startup; pass it to [`Server::serve`](crate::Server::serve).
/// Every builder method returns `self` so registrations chain naturally.
///
/// Middleware applies to the routes registered *after* it, in registration
/// order. Register middleware first.
pub struct Router {
    base: Context,
    routes: HashMap<Method, MatchitRouter<Onion>>,
    names: Arc<NamedRoutes>,
    middlewares: Vec<Arc<dyn Middleware>>,
    not_found: OnceLock<Onion>,
}

impl Router {
    pub fn new() -> Self {
        Self::with_context(Context::background())
    }

    /// A router whose requests all start from `base`: put shared handles
    /// (database pools, configuration) here.
    pub fn with_context(base: Context) -> Self {
        Self {
            base,
            routes: HashMap::new(),
            names: Arc::new(NamedRoutes::default()),
            middlewares: Vec::new(),
            not_found: OnceLock::new(),
        }
    }

    /// Appends a middleware. It becomes the innermost layer so far of every
    /// route registered from now on.
    pub fn middleware(mut self, ware: impl Middleware) -> Self {
        self.middlewares.push(Arc::new(ware));
        self
    }

    /// Appends several middlewares, outermost first.
    pub fn middlewares(mut self, wares: impl IntoIterator<Item = Arc<dyn Middleware>>) -> Self {
        self.middlewares.extend(wares);
        self
    }

    /// Registers `handler` for `method` + `path` under `name`.
    ///
    /// A pattern the tree rejects (malformed, or conflicting with an earlier
    /// route) is logged and skipped; the earlier route stays in place.
    pub fn on(mut self, method: Method, path: &str, name: &str, handler: impl Handler) -> Self {
        let onion = self.onion(handler);
        let inserted = self.routes.entry(method.clone()).or_default().insert(to_matchit(path), onion);
        if let Err(e) = inserted {
            error!(%method, path, name, "route not registered: {e}");
            return self;
        }
        Arc::make_mut(&mut self.names).insert(name, path);
        debug!(%method, path, name, "route registered");
        self
    }

    pub fn get(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.on(Method::GET, path, name, handler)
    }

    pub fn post(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.on(Method::POST, path, name, handler)
    }

    pub fn put(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.on(Method::PUT, path, name, handler)
    }

    pub fn patch(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.on(Method::PATCH, path, name, handler)
    }

    pub fn delete(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.on(Method::DELETE, path, name, handler)
    }

    pub fn head(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.on(Method::HEAD, path, name, handler)
    }

    pub fn options(self, path: &str, name: &str, handler: impl Handler) -> Self {
        self.on(Method::OPTIONS, path, name, handler)
    }

    /// Handler for requests no route matches. Runs through the same
    /// middleware as a route registered at this point, without path
    /// parameters. Defaults to a plain `404`.
    pub fn not_found(mut self, handler: impl Handler) -> Self {
        self.not_found = OnceLock::from(self.onion(handler));
        self
    }

    /// Serves files under `root` at `mount`, which must end in a wildcard
    /// segment such as `/static/*filepath`. The mount becomes the target of
    /// [`Router::assets`].
    pub fn files(self, mount: &str, root: impl Into<PathBuf>) -> Self {
        let Some(param) = mount.rsplit('/').next().and_then(|last| last.strip_prefix('*')) else {
            error!(mount, "file mount must end in a `/*name` segment");
            return self;
        };
        let server = FileServer { root: root.into(), param: param.to_owned() };
        self.on(Method::GET, mount, ASSETS_ROUTE, server)
    }

    /// Maps asset paths to their published names (e.g. content-hashed).
    pub fn enable_extra_assets_mapping(mut self, mapping: HashMap<String, String>) -> Self {
        Arc::make_mut(&mut self.names).set_assets_mapping(mapping);
        self
    }

    pub fn named_routes(&self) -> &NamedRoutes {
        &self.names
    }

    /// See [`NamedRoutes::reverse`].
    pub fn reverse(&self, name: &str, values: &[&dyn Display]) -> String {
        self.names.reverse(name, values)
    }

    /// See [`NamedRoutes::assets`].
    pub fn assets(&self, path: &str) -> String {
        self.names.assets(path)
    }

    /// Routes one request into `sink` and returns the context the onion
    /// handed back. Panics escape unless a [`RecoveryWare`](crate::middleware::RecoveryWare)
    /// is installed.
    pub fn dispatch(&self, req: &Request, sink: &mut dyn ResponseSink) -> Context {
        let mut ctx = self.base.with_value(ROUTES_KEY, Arc::clone(&self.names));
        let onion = match self.lookup(req.method(), req.path()) {
            Some((onion, params)) => {
                if !params.is_empty() {
                    ctx = ctx.with_value(PARAMS_KEY, params);
                }
                onion
            }
            None => self.not_found.get_or_init(|| self.onion(handler::not_found)),
        };

        let mut w = ResponseWriter::new(sink);
        let ctx = onion.serve(ctx, &mut w, req);
        w.finish();
        ctx
    }

    fn onion(&self, handler: impl Handler) -> Onion {
        let terminal: Arc<dyn Middleware> = Arc::new(Terminal(handler));
        Onion::new(self.middlewares.iter().cloned().chain([terminal]))
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(&Onion, Params)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), decode_param(v)))
            .collect();
        Some((matched.value, Params(params)))
    }
}

/// Percent-decodes a matched value. Values that do not decode to UTF-8 are
/// kept as matched.
fn decode_param(raw: &str) -> String {
    urlencoding::decode(raw).map_or_else(|_| raw.to_owned(), Cow::into_owned)
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

/// Translates `:name` / `*name` segments into the tree's `{name}` / `{*name}`.
fn to_matchit(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if let Some(name) = segment.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = segment.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                segment.replace('{', "{{").replace('}', "}}")
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

// ── Static files ──────────────────────────────────────────────────────────────

/// Serves files below `root`; the wildcard parameter names the file.
struct FileServer {
    root: PathBuf,
    param: String,
}

impl Handler for FileServer {
    fn call(&self, ctx: Context, w: &mut ResponseWriter<'_>, req: &Request) -> Context {
        // clean_path resolves `..` against the virtual root, so the join
        // below never leaves `self.root`.
        let relative = clean_path(&param(&ctx, &self.param));
        let file = self.root.join(relative.trim_start_matches('/'));

        match std::fs::read(&file) {
            Ok(body) => {
                let content_type = file
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .and_then(ContentType::from_extension)
                    .unwrap_or(ContentType::OctetStream);
                let _ = w.send(content_type, &body);
                ctx
            }
            Err(e) => {
                debug!(file = %file.display(), "static file unavailable: {e}");
                handler::not_found(ctx, w, req)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::StatusCode;
    use http::header::CONTENT_TYPE;
    use tracing::Level;

    use super::*;
    use crate::middleware::from_fn;
    use crate::testing::Recorder;
    use crate::testing::logs::{at, capture};

    const DB: ContextKey = ContextKey::new("db");

    fn hello(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
        let _ = w.text(&format!("Hello, {}", param(&ctx, "name")));
        ctx
    }

    fn links(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
        let _ = w.text(&format!("{} {}", reverse(&ctx, "hello", &[&"bob"]), reverse(&ctx, "nope", &[])));
        ctx
    }

    fn db_name(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
        let name = ctx.value::<&str>(&DB).copied().unwrap_or("none");
        let _ = w.text(name);
        ctx
    }

    fn serve(router: &Router, req: Request) -> (Recorder, Context) {
        let mut rec = Recorder::new();
        let ctx = router.dispatch(&req, &mut rec);
        (rec, ctx)
    }

    #[test]
    fn path_parameters_reach_the_handler() {
        let router = Router::new().get("/hello/:name", "hello", hello);
        let (rec, ctx) = serve(&router, Request::get("/hello/alice"));

        assert_eq!(rec.status(), Some(StatusCode::OK));
        assert_eq!(rec.body_str(), "Hello, alice");
        assert_eq!(param(&ctx, "name"), "alice");
        assert_eq!(param(&ctx, "missing"), "");
    }

    #[test]
    fn encoded_parameters_are_decoded() {
        let router = Router::new().get("/hello/:name", "hello", hello);
        let (rec, ctx) = serve(&router, Request::get("/hello/J%C3%BCrgen%20X"));

        assert_eq!(rec.body_str(), "Hello, Jürgen X");
        assert_eq!(param(&ctx, "name"), "Jürgen X");
    }

    #[test]
    fn undecodable_parameters_stay_raw() {
        assert_eq!(decode_param("a%FFb"), "a%FFb");
        assert_eq!(decode_param("a%2Fb"), "a/b");
        assert_eq!(decode_param("plain"), "plain");
    }

    #[test]
    fn routes_without_parameters_bind_none() {
        let router = Router::new().get("/hello", "hello", hello);
        let (rec, ctx) = serve(&router, Request::get("/hello"));

        assert_eq!(rec.body_str(), "Hello, ");
        assert!(params(&ctx).is_none());
    }

    #[test]
    fn wildcard_captures_the_rest() {
        fn rest(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
            let _ = w.text(&param(&ctx, "path"));
            ctx
        }
        let router = Router::new().get("/files/*path", "files", rest);
        let (rec, _) = serve(&router, Request::get("/files/a/b.txt"));
        assert_eq!(rec.body_str(), "a/b.txt");
    }

    #[test]
    fn base_context_is_visible_to_every_request() {
        let router = Router::with_context(Context::background().with_value(DB, "primary")).get("/", "home", db_name);
        let (rec, _) = serve(&router, Request::get("/"));
        assert_eq!(rec.body_str(), "primary");
    }

    #[test]
    fn method_must_match() {
        let router = Router::new().post("/users", "create", hello);
        let (rec, _) = serve(&router, Request::get("/users"));
        assert_eq!(rec.status(), Some(StatusCode::NOT_FOUND));
    }

    #[test]
    fn default_not_found_runs_through_middleware() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let router = Router::new().middleware(from_fn(move |ctx, w, req, next| {
            counter.fetch_add(1, Ordering::SeqCst);
            next.run(ctx, w, req)
        }));
        let (rec, ctx) = serve(&router, Request::get("/nowhere"));

        assert_eq!(rec.status(), Some(StatusCode::NOT_FOUND));
        assert_eq!(rec.body_str(), "404 page not found\n");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(params(&ctx).is_none());
    }

    #[test]
    fn custom_not_found() {
        fn gone(ctx: Context, w: &mut ResponseWriter<'_>, _req: &Request) -> Context {
            w.set_status(StatusCode::GONE);
            ctx
        }
        let router = Router::new().not_found(gone);
        let (rec, _) = serve(&router, Request::get("/old"));
        assert_eq!(rec.status(), Some(StatusCode::GONE));
    }

    #[test]
    fn middleware_applies_to_later_routes_only() {
        let tag = || from_fn(|ctx, w: &mut ResponseWriter<'_>, req, next| {
            w.headers_mut().insert("x-tagged", http::HeaderValue::from_static("1"));
            next.run(ctx, w, req)
        });
        let router = Router::new()
            .get("/before", "before", hello)
            .middleware(tag())
            .get("/after", "after", hello);

        let (before, _) = serve(&router, Request::get("/before"));
        let (after, _) = serve(&router, Request::get("/after"));
        assert!(before.headers().get("x-tagged").is_none());
        assert!(after.headers().get("x-tagged").is_some());
    }

    #[test]
    fn handlers_can_reverse_routes_through_the_context() {
        let router = Router::new()
            .get("/hello/:name", "hello", hello)
            .get("/links", "links", links);
        let (rec, _) = serve(&router, Request::get("/links"));

        assert_eq!(rec.body_str(), format!("/hello/bob {FALLBACK_PATH}"));
        assert_eq!(router.reverse("hello", &[&"carol"]), "/hello/carol");
        assert_eq!(reverse(&Context::background(), "hello", &[]), FALLBACK_PATH);
    }

    #[test]
    fn reversing_an_unknown_name_in_a_handler_warns() {
        let router = Router::new()
            .get("/hello/:name", "hello", hello)
            .get("/links", "links", links);
        let (_, events) = capture(|| serve(&router, Request::get("/links")));

        let warnings = at(&events, Level::WARN);
        assert_eq!(warnings.len(), 1, "{events:?}");
        assert!(warnings[0].contains("nope"));
    }

    #[test]
    fn conflicting_pattern_is_skipped_not_fatal() {
        let router = Router::new()
            .get("/users/:id", "user", hello)
            .get("/users/:name", "user_by_name", hello);

        assert_eq!(router.named_routes().get("user"), Some("/users/:id"));
        assert_eq!(router.named_routes().get("user_by_name"), None);
        let (rec, _) = serve(&router, Request::get("/users/7"));
        assert_eq!(rec.status(), Some(StatusCode::OK));
    }

    #[test]
    fn templates_translate_to_tree_syntax() {
        assert_eq!(to_matchit("/users/:id/files/*path"), "/users/{id}/files/{*path}");
        assert_eq!(to_matchit("/"), "/");
        assert_eq!(to_matchit("/lit/{x}"), "/lit/{{x}}");
    }

    #[test]
    fn files_are_served_from_root_and_confined_to_it() {
        let dir = std::env::temp_dir().join(format!("strata-files-{}", std::process::id()));
        let public = dir.join("public");
        std::fs::create_dir_all(public.join("css")).unwrap();
        std::fs::write(public.join("css/site.css"), "body{}").unwrap();
        std::fs::write(public.join("css/my file.css"), "p{}").unwrap();
        std::fs::write(dir.join("secret.txt"), "nope").unwrap();

        let router = Router::new()
            .files("/static/*filepath", &public)
            .enable_extra_assets_mapping(HashMap::from([("site.css".to_owned(), "css/site.css".to_owned())]));

        let (rec, _) = serve(&router, Request::get("/static/css/site.css"));
        assert_eq!(rec.status(), Some(StatusCode::OK));
        assert_eq!(rec.body_str(), "body{}");
        assert_eq!(rec.headers().get(CONTENT_TYPE).unwrap(), "text/css; charset=utf-8");

        let (rec, _) = serve(&router, Request::get("/static/css/my%20file.css"));
        assert_eq!(rec.status(), Some(StatusCode::OK));
        assert_eq!(rec.body_str(), "p{}");

        let (rec, _) = serve(&router, Request::get("/static/..%2Fsecret.txt"));
        assert_eq!(rec.status(), Some(StatusCode::NOT_FOUND));

        let (rec, _) = serve(&router, Request::get("/static/../secret.txt"));
        assert_eq!(rec.status(), Some(StatusCode::NOT_FOUND));

        assert_eq!(router.assets("site.css"), "/static/css/site.css");

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn file_mount_without_wildcard_is_rejected() {
        let router = Router::new().files("/static", "/tmp");
        assert_eq!(router.assets("x.js"), FALLBACK_PATH);
    }
}

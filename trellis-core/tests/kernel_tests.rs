//! Integration tests for the HTTP kernel lifecycle

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use trellis_core::*;

type Log = Arc<Mutex<Vec<String>>>;

/// Records the order middleware runs in, and its termination
struct Tag {
    label: String,
    log: Log,
}

#[async_trait]
impl Pipe<HttpRequest, HttpResponse> for Tag {
    async fn handle(
        &self,
        req: HttpRequest,
        next: Next,
        _parameters: &[String],
    ) -> Result<HttpResponse, Error> {
        self.log.lock().push(self.label.clone());
        next(req).await
    }

    async fn terminate(&self, _req: &HttpRequest, _res: &HttpResponse) -> Result<(), Error> {
        self.log.lock().push(format!("terminate {}", self.label));
        if self.label == "failing" {
            return Err(Error::Internal("terminate failed".into()));
        }
        Ok(())
    }
}

fn tag(container: &Container, id: &str, log: &Log) {
    let label = id.to_string();
    let log = log.clone();
    container.middleware(id.to_string(), move |_| {
        Ok(Tag {
            label: label.clone(),
            log: log.clone(),
        })
    });
}

/// Counts report and render calls, delegating to the default handler
#[derive(Clone, Default)]
struct CountingHandler {
    reports: Arc<AtomicUsize>,
    renders: Arc<AtomicUsize>,
}

#[async_trait]
impl ExceptionHandler for CountingHandler {
    fn report(&self, error: &Error, request: &HttpRequest) {
        self.reports.fetch_add(1, Ordering::SeqCst);
        Handler::new().report(error, request);
    }

    async fn render(&self, error: &Error, request: &HttpRequest, container: &Container) -> HttpResponse {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Handler::new().render(error, request, container).await
    }
}

/// Numbered per construction so scopes can be told apart
struct Visit(usize);

struct VisitController {
    visit: Arc<Visit>,
}

impl Injectable for VisitController {
    fn parameters() -> Vec<Parameter> {
        vec![Parameter::service("visit", "visit")]
    }

    fn construct(arguments: &Arguments) -> Result<Self, Error> {
        Ok(Self {
            visit: arguments.service("visit")?,
        })
    }
}

#[async_trait]
impl Controller for VisitController {
    fn action_parameters(&self, action: &str) -> Option<Vec<Parameter>> {
        match action {
            "show" => Some(vec![Parameter::service("again", "visit")]),
            "explode" => Some(vec![]),
            _ => None,
        }
    }

    async fn call(
        &self,
        action: &str,
        _request: HttpRequest,
        arguments: &Arguments,
    ) -> Result<HttpResponse, Error> {
        match action {
            "show" => {
                let again = arguments.service::<Visit>("again")?;
                Ok(HttpResponse::text(format!(
                    "{} {}",
                    self.visit.0,
                    Arc::ptr_eq(&self.visit, &again)
                )))
            }
            _ => Err(Error::Internal("controller exploded".into())),
        }
    }
}

fn visit_container() -> Container {
    let container = Container::new();
    let counter = Arc::new(AtomicUsize::new(0));
    container.singleton(
        "visit",
        Concrete::factory(move |_, _| Ok(Visit(counter.fetch_add(1, Ordering::SeqCst) + 1))),
    );
    container.controller_as::<VisitController>("VisitController");
    container
}

fn hello() -> RouteAction {
    RouteAction::closure(|_req| async { Ok(HttpResponse::text("hello")) })
}

#[tokio::test]
async fn test_handles_matched_route() {
    let kernel = Kernel::new(Container::new()).routes(|router| {
        router.get("/", hello())?;
        Ok(())
    });

    let response = kernel.handle(HttpRequest::new("GET", "/")).await;
    assert_eq!(response.status, 200);
    assert_eq!(response.body_text(), "hello");
}

#[tokio::test]
async fn test_not_found_is_rendered() {
    let kernel = Kernel::new(Container::new()).routes(|router| {
        router.get("/", hello())?;
        Ok(())
    });

    let response = kernel.handle(HttpRequest::new("GET", "/missing")).await;
    assert_eq!(response.status, 404);

    let response = kernel
        .handle(HttpRequest::new("GET", "/missing").with_header("Accept", "application/json"))
        .await;
    assert_eq!(response.status, 404);
    let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(body["message"], "Not Found");
}

#[tokio::test]
async fn test_method_not_allowed_sets_allow_header() {
    let kernel = Kernel::new(Container::new()).routes(|router| {
        router.get("/users", hello())?;
        router.post("/users", hello())?;
        Ok(())
    });

    let response = kernel.handle(HttpRequest::new("DELETE", "/users")).await;
    assert_eq!(response.status, 405);
    assert_eq!(response.header("allow"), Some("GET, HEAD, POST"));
}

#[tokio::test]
async fn test_head_requests_get_no_body() {
    let kernel = Kernel::new(Container::new()).routes(|router| {
        router.get("/", hello())?;
        Ok(())
    });

    let response = kernel.handle(HttpRequest::new("HEAD", "/")).await;
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn test_errors_are_reported_and_rendered_once() {
    let handler = CountingHandler::default();
    let kernel = Kernel::new(visit_container())
        .exception_handler(handler.clone())
        .routes(|router| {
            router.get("/boom", RouteAction::controller("VisitController", "explode"))?;
            Ok(())
        });

    let response = kernel.handle(HttpRequest::new("GET", "/boom")).await;
    assert_eq!(response.status, 500);
    assert!(!response.body_text().contains("controller exploded"));
    assert_eq!(handler.reports.load(Ordering::SeqCst), 1);
    assert_eq!(handler.renders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_debug_mode_reveals_error_details() {
    let container = visit_container();
    container.instance(
        APP_CONFIG,
        AppConfig {
            debug: true,
            ..AppConfig::default()
        },
    );
    let kernel = Kernel::new(container).routes(|router| {
        router.get("/boom", RouteAction::controller("VisitController", "explode"))?;
        Ok(())
    });

    let response = kernel.handle(HttpRequest::new("GET", "/boom")).await;
    assert_eq!(response.status, 500);
    assert!(response.body_text().contains("controller exploded"));
}

#[tokio::test]
async fn test_shared_instances_are_scoped_per_request() {
    let kernel = Kernel::new(visit_container()).routes(|router| {
        router.get("/visit", RouteAction::controller("VisitController", "show"))?;
        Ok(())
    });

    let first = kernel.handle(HttpRequest::new("GET", "/visit")).await;
    let second = kernel.handle(HttpRequest::new("GET", "/visit")).await;

    // Same instance within a request, a fresh one for the next request
    assert_eq!(first.body_text(), "1 true");
    assert_eq!(second.body_text(), "2 true");
}

#[tokio::test]
async fn test_middleware_order_global_groups_route() {
    let container = Container::new();
    let log: Log = Arc::default();
    for id in ["global", "web.one", "web.two", "route", "excluded"] {
        tag(&container, id, &log);
    }

    let kernel = Kernel::new(container)
        .middleware("global")
        .middleware_group("web", vec!["web.one".into(), "web.two".into()])
        .alias_middleware("skip", "excluded")
        .routes(|router| {
            router.add(
                Route::get("/", hello())
                    .middleware("route")
                    .middleware("web")
                    .middleware("global")
                    .middleware("excluded")
                    .without_middleware("skip"),
            )?;
            Ok(())
        });

    let response = kernel.handle(HttpRequest::new("GET", "/")).await;
    assert_eq!(response.status, 200);
    assert_eq!(*log.lock(), vec!["global", "web.one", "web.two", "route"]);
}

#[tokio::test]
async fn test_builtin_aliases_apply_auth() {
    let container = Container::new();
    container.instance(DEFAULT_GUARD, Arc::new(BearerTokenGuard) as Arc<dyn AuthGuard>);

    let kernel = Kernel::new(container)
        .middleware("request_id")
        .routes(|router| {
            router.add(Route::get("/dashboard", hello()).middleware("auth"))?;
            Ok(())
        });

    let guest = kernel.handle(HttpRequest::new("GET", "/dashboard")).await;
    assert_eq!(guest.status, 302);
    assert_eq!(guest.header("location"), Some("/login"));
    assert!(guest.header("x-request-id").is_some());

    let user = kernel
        .handle(HttpRequest::new("GET", "/dashboard").with_header("Authorization", "Bearer t0ken"))
        .await;
    assert_eq!(user.status, 200);
}

#[tokio::test]
async fn test_terminate_runs_middleware_then_callbacks() {
    let container = Container::new();
    let log: Log = Arc::default();
    tag(&container, "global", &log);
    tag(&container, "failing", &log);

    let callback_log = log.clone();
    let kernel = Kernel::new(container)
        .middleware("global")
        .terminating(move |_req, res, _container| {
            callback_log.lock().push(format!("callback {}", res.status));
            Ok(())
        })
        .terminating(|_req, _res, _container| Err(Error::Internal("callback failed".into())))
        .routes(|router| {
            router.add(Route::get("/", hello()).middleware("failing"))?;
            Ok(())
        });

    let request = HttpRequest::new("GET", "/");
    let response = kernel.handle(request.clone()).await;
    log.lock().clear();

    kernel.terminate(&request, &response).await;
    assert_eq!(
        *log.lock(),
        vec!["terminate global", "terminate failing", "callback 200"]
    );
}

#[tokio::test]
async fn test_terminate_without_matching_route_uses_global_middleware() {
    let container = Container::new();
    let log: Log = Arc::default();
    tag(&container, "global", &log);

    let kernel = Kernel::new(container).middleware("global");
    let request = HttpRequest::new("GET", "/nowhere");
    let response = kernel.handle(request.clone()).await;
    assert_eq!(response.status, 404);

    kernel.terminate(&request, &response).await;
    assert_eq!(*log.lock(), vec!["terminate global"]);
}

/// Request-shared state written by middleware
#[derive(Default)]
struct Session {
    flashed: Mutex<Vec<String>>,
}

/// Flashes into the session while handling, then checks its own state on terminate
struct Flash {
    session: Arc<Session>,
    handled: Mutex<bool>,
    log: Log,
}

#[async_trait]
impl Pipe<HttpRequest, HttpResponse> for Flash {
    async fn handle(
        &self,
        req: HttpRequest,
        next: Next,
        _parameters: &[String],
    ) -> Result<HttpResponse, Error> {
        self.session.flashed.lock().push("flash".into());
        *self.handled.lock() = true;
        next(req).await
    }

    async fn terminate(&self, _req: &HttpRequest, _res: &HttpResponse) -> Result<(), Error> {
        self.log.lock().push(format!("terminate handled={}", *self.handled.lock()));
        Ok(())
    }
}

fn session_kernel(sessions: &Arc<AtomicUsize>, flashes: &Arc<AtomicUsize>, log: &Log) -> Kernel {
    let container = Container::new();
    let built = sessions.clone();
    container.singleton(
        "session",
        Concrete::factory(move |_, _| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Session::default())
        }),
    );
    let built = flashes.clone();
    let flash_log = log.clone();
    container.middleware("flash", move |scope| {
        built.fetch_add(1, Ordering::SeqCst);
        Ok(Flash {
            session: scope.make_as::<Session>("session")?,
            handled: Mutex::new(false),
            log: flash_log.clone(),
        })
    });

    let callback_log = log.clone();
    Kernel::new(container)
        .middleware("flash")
        .terminating(move |_req, _res, scope| {
            let session = scope.make_as::<Session>("session")?;
            callback_log.lock().extend(session.flashed.lock().iter().cloned());
            Ok(())
        })
        .routes(|router| {
            router.get("/", hello())?;
            Ok(())
        })
}

#[tokio::test]
async fn test_terminate_sees_state_written_during_the_request() {
    let sessions = Arc::new(AtomicUsize::new(0));
    let flashes = Arc::new(AtomicUsize::new(0));
    let log: Log = Arc::default();
    let kernel = session_kernel(&sessions, &flashes, &log);

    let request = HttpRequest::new("GET", "/");
    let response = kernel.handle(request.clone()).await;
    kernel.terminate(&request, &response).await;

    assert_eq!(*log.lock(), vec!["terminate handled=true", "flash"]);
    assert_eq!(sessions.load(Ordering::SeqCst), 1);
    assert_eq!(flashes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_requests_do_not_share_terminate_state() {
    let sessions = Arc::new(AtomicUsize::new(0));
    let flashes = Arc::new(AtomicUsize::new(0));
    let log: Log = Arc::default();
    let kernel = session_kernel(&sessions, &flashes, &log);

    let request = HttpRequest::new("GET", "/");
    let first = kernel.handle(request.clone()).await;
    let second = kernel.handle(request.clone()).await;
    kernel.terminate(&request, &first).await;
    kernel.terminate(&request, &second).await;

    assert_eq!(
        *log.lock(),
        vec![
            "terminate handled=true",
            "flash",
            "terminate handled=true",
            "flash"
        ]
    );
    assert_eq!(sessions.load(Ordering::SeqCst), 2);
    assert_eq!(flashes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_terminate_of_a_foreign_response_uses_a_fresh_scope() {
    let sessions = Arc::new(AtomicUsize::new(0));
    let flashes = Arc::new(AtomicUsize::new(0));
    let log: Log = Arc::default();
    let kernel = session_kernel(&sessions, &flashes, &log);
    kernel.bootstrap().unwrap();

    let request = HttpRequest::new("GET", "/");
    kernel.terminate(&request, &HttpResponse::ok()).await;

    // Nothing ran the middleware, so nothing was flashed
    assert_eq!(*log.lock(), vec!["terminate handled=false"]);
    assert_eq!(sessions.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_bootstrappers_run_once() {
    struct Counting(Arc<AtomicUsize>);

    impl Bootstrapper for Counting {
        fn bootstrap(&self, container: &Container) -> Result<(), Error> {
            self.0.fetch_add(1, Ordering::SeqCst);
            container.instance("booted", true);
            Ok(())
        }
    }

    let runs = Arc::new(AtomicUsize::new(0));
    let kernel = Kernel::new(Container::new())
        .bootstrapper(Counting(runs.clone()))
        .routes(|router| {
            router.get("/", hello())?;
            Ok(())
        });

    kernel.handle(HttpRequest::new("GET", "/")).await;
    kernel.handle(HttpRequest::new("GET", "/")).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(kernel.container().has("booted"));
    assert!(kernel.container().has(ROUTER));
}

#[tokio::test]
async fn test_failed_bootstrap_is_rendered() {
    struct Broken;

    impl Bootstrapper for Broken {
        fn bootstrap(&self, _container: &Container) -> Result<(), Error> {
            Err(Error::Internal("missing configuration".into()))
        }
    }

    let kernel = Kernel::new(Container::new()).bootstrapper(Broken);
    let response = kernel.handle(HttpRequest::new("GET", "/")).await;
    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn test_route_cache_replaces_live_registration() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("routes.json");

    let cached_kernel = Kernel::new(visit_container()).routes(|router| {
        router.get("/visit", RouteAction::controller("VisitController", "show"))?;
        Ok(())
    });
    assert_eq!(cached_kernel.cache_routes(&path).unwrap(), 1);

    // The live registrar knows nothing about /visit; the cache does
    let kernel = Kernel::new(visit_container())
        .route_cache(&path)
        .routes(|router| {
            router.get("/live", hello())?;
            Ok(())
        });
    let response = kernel.handle(HttpRequest::new("GET", "/visit")).await;
    assert_eq!(response.status, 200);
    assert_eq!(kernel.handle(HttpRequest::new("GET", "/live")).await.status, 404);
}

#[tokio::test]
async fn test_invalid_route_cache_falls_back_to_live_routes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("routes.json");
    std::fs::write(&path, b"{\"version\": 99, \"routes\": []}").unwrap();

    let container = Container::new();
    container.instance(
        APP_CONFIG,
        AppConfig {
            route_cache: Some(path.to_string_lossy().into_owned()),
            ..AppConfig::default()
        },
    );
    let kernel = Kernel::new(container).routes(|router| {
        router.get("/live", hello())?;
        Ok(())
    });

    assert_eq!(kernel.route_cache_path(), Some(path.clone()));
    assert_eq!(kernel.handle(HttpRequest::new("GET", "/live")).await.status, 200);
}

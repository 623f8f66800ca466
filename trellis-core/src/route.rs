// Route definitions and pattern compilation

use crate::middleware::MiddlewareRef;
use crate::pipeline::BoxFuture;
use crate::route_constraint::{Constraint, validate_pattern};
use crate::route_group::RouteGroup;
use crate::{Error, HttpMethod, HttpRequest, HttpResponse};
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

/// Segment pattern used when a parameter has no constraint
pub const DEFAULT_SEGMENT: &str = "[^/]+";

/// Closure route handler
pub type HandlerFn =
    Arc<dyn Fn(HttpRequest) -> BoxFuture<'static, Result<HttpResponse, Error>> + Send + Sync>;

/// What a matched route runs
#[derive(Clone)]
pub enum RouteAction {
    Closure(HandlerFn),
    Controller { controller: String, method: String },
}

impl RouteAction {
    pub fn closure<F, Fut>(f: F) -> Self
    where
        F: Fn(HttpRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HttpResponse, Error>> + Send + 'static,
    {
        RouteAction::Closure(Arc::new(
            move |req| -> BoxFuture<'static, Result<HttpResponse, Error>> { Box::pin(f(req)) },
        ))
    }

    /// Controller action by container id and method name
    pub fn controller(controller: impl Into<String>, method: impl Into<String>) -> Self {
        RouteAction::Controller {
            controller: controller.into(),
            method: method.into(),
        }
    }

    /// Controller action for a controller registered under its type name
    pub fn controller_of<C: ?Sized + 'static>(method: impl Into<String>) -> Self {
        Self::controller(std::any::type_name::<C>(), method)
    }

    /// Parse `"Controller@method"`
    pub fn parse(action: &str) -> Option<Self> {
        let (controller, method) = action.rsplit_once('@')?;
        if controller.is_empty() || method.is_empty() {
            return None;
        }
        Some(Self::controller(controller, method))
    }

    pub fn is_closure(&self) -> bool {
        matches!(self, RouteAction::Closure(_))
    }

    /// `"Closure"` or `"Controller@method"`, as printed by route listings
    pub fn describe(&self) -> String {
        match self {
            RouteAction::Closure(_) => "Closure".to_string(),
            RouteAction::Controller { controller, method } => format!("{}@{}", controller, method),
        }
    }
}

impl std::fmt::Debug for RouteAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Compiled, anchored form of a route URI
#[derive(Debug, Clone)]
pub struct CompiledRoute {
    regex: Regex,
    parameters: Vec<String>,
}

fn is_valid_parameter_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

impl CompiledRoute {
    /// Compile `uri` with the given per-parameter constraints.
    ///
    /// `{name}` captures one segment, `{name?}` makes the preceding `/` and
    /// the segment optional.
    pub fn compile(uri: &str, wheres: &BTreeMap<String, String>) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::InvalidRoute(format!("[{}] {}", uri, reason));

        let mut pattern = String::from("^");
        let mut parameters: Vec<String> = Vec::new();
        let mut rest = uri;

        while let Some(open) = rest.find('{') {
            let close = rest[open..]
                .find('}')
                .map(|offset| open + offset)
                .ok_or_else(|| invalid("has an unclosed parameter"))?;
            let literal = &rest[..open];
            if literal.contains('}') {
                return Err(invalid("has an unmatched '}'"));
            }

            let token = &rest[open + 1..close];
            let (name, optional) = match token.strip_suffix('?') {
                Some(name) => (name, true),
                None => (token, false),
            };
            if !is_valid_parameter_name(name) {
                return Err(invalid(&format!("has an invalid parameter name '{}'", name)));
            }
            if parameters.iter().any(|p| p == name) {
                return Err(invalid(&format!("declares parameter '{}' twice", name)));
            }

            let constraint = match wheres.get(name) {
                Some(custom) => {
                    validate_pattern(name, custom)?;
                    custom.as_str()
                }
                None => DEFAULT_SEGMENT,
            };

            match (optional, literal.strip_suffix('/')) {
                (true, Some(before)) => {
                    pattern.push_str(&regex::escape(before));
                    pattern.push_str(&format!("(?:/(?P<{}>{}))?", name, constraint));
                }
                (true, None) => {
                    pattern.push_str(&regex::escape(literal));
                    pattern.push_str(&format!("(?P<{}>{})?", name, constraint));
                }
                (false, _) => {
                    pattern.push_str(&regex::escape(literal));
                    pattern.push_str(&format!("(?P<{}>{})", name, constraint));
                }
            }

            parameters.push(name.to_string());
            rest = &rest[close + 1..];
        }

        if rest.contains('}') {
            return Err(invalid("has an unmatched '}'"));
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| invalid(&e.to_string()))?;
        Ok(Self { regex, parameters })
    }

    /// Rebuild from a stored pattern, checking capture names line up with `parameters`
    pub fn from_parts(pattern: &str, parameters: Vec<String>) -> Result<Self, Error> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::InvalidRoute(format!("stored pattern does not compile: {}", e)))?;
        let captures: Vec<&str> = regex.capture_names().flatten().collect();
        if captures != parameters.iter().map(String::as_str).collect::<Vec<_>>() {
            return Err(Error::InvalidRoute(format!(
                "stored pattern {} captures {:?}, expected {:?}",
                pattern, captures, parameters
            )));
        }
        Ok(Self { regex, parameters })
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }

    /// Parameter names in capture order
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }
}

/// Normalise to a leading `/` and no trailing `/`
pub fn normalize_uri(uri: &str) -> String {
    let trimmed = uri.trim().trim_matches('/');
    format!("/{}", trimmed)
}

/// A registered route
#[derive(Clone)]
pub struct Route {
    methods: Vec<HttpMethod>,
    uri: String,
    wheres: BTreeMap<String, String>,
    defaults: BTreeMap<String, String>,
    name: Option<String>,
    action: RouteAction,
    middleware: Vec<MiddlewareRef>,
    without_middleware: Vec<String>,
    compiled: Option<CompiledRoute>,
}

impl Route {
    /// A route answering `methods`; GET routes also answer HEAD
    pub fn new(methods: Vec<HttpMethod>, uri: &str, action: RouteAction) -> Self {
        let mut unique: Vec<HttpMethod> = Vec::with_capacity(methods.len() + 1);
        for method in methods {
            if !unique.contains(&method) {
                unique.push(method);
            }
        }
        if unique.contains(&HttpMethod::GET) && !unique.contains(&HttpMethod::HEAD) {
            unique.push(HttpMethod::HEAD);
        }

        Self {
            methods: unique,
            uri: normalize_uri(uri),
            wheres: BTreeMap::new(),
            defaults: BTreeMap::new(),
            name: None,
            action,
            middleware: Vec::new(),
            without_middleware: Vec::new(),
            compiled: None,
        }
    }

    pub fn get(uri: &str, action: RouteAction) -> Self {
        Self::new(vec![HttpMethod::GET], uri, action)
    }

    pub fn post(uri: &str, action: RouteAction) -> Self {
        Self::new(vec![HttpMethod::POST], uri, action)
    }

    pub fn put(uri: &str, action: RouteAction) -> Self {
        Self::new(vec![HttpMethod::PUT], uri, action)
    }

    pub fn patch(uri: &str, action: RouteAction) -> Self {
        Self::new(vec![HttpMethod::PATCH], uri, action)
    }

    pub fn delete(uri: &str, action: RouteAction) -> Self {
        Self::new(vec![HttpMethod::DELETE], uri, action)
    }

    pub fn options(uri: &str, action: RouteAction) -> Self {
        Self::new(vec![HttpMethod::OPTIONS], uri, action)
    }

    pub fn any(uri: &str, action: RouteAction) -> Self {
        Self::new(HttpMethod::ALL.to_vec(), uri, action)
    }

    pub fn matching(methods: &[HttpMethod], uri: &str, action: RouteAction) -> Self {
        Self::new(methods.to_vec(), uri, action)
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn middleware(mut self, middleware: impl Into<MiddlewareRef>) -> Self {
        self.middleware.push(middleware.into());
        self
    }

    /// Exclude a middleware (by identifier) that a group or the kernel would add
    pub fn without_middleware(mut self, identifier: impl Into<String>) -> Self {
        self.without_middleware.push(identifier.into());
        self
    }

    pub fn where_constraint(mut self, parameter: impl Into<String>, constraint: Constraint) -> Self {
        self.wheres.insert(parameter.into(), constraint.pattern());
        self
    }

    pub fn where_number(self, parameter: impl Into<String>) -> Self {
        self.where_constraint(parameter, Constraint::Number)
    }

    pub fn where_alpha(self, parameter: impl Into<String>) -> Self {
        self.where_constraint(parameter, Constraint::Alpha)
    }

    pub fn where_alpha_numeric(self, parameter: impl Into<String>) -> Self {
        self.where_constraint(parameter, Constraint::AlphaNumeric)
    }

    pub fn where_uuid(self, parameter: impl Into<String>) -> Self {
        self.where_constraint(parameter, Constraint::Uuid)
    }

    pub fn where_in<I, S>(self, parameter: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.where_constraint(parameter, Constraint::In(values))
    }

    pub fn where_pattern(self, parameter: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.where_constraint(parameter, Constraint::Pattern(pattern.into()))
    }

    /// Value used when an optional parameter is absent from the URI
    pub fn defaults(mut self, parameter: impl Into<String>, value: impl Into<String>) -> Self {
        self.defaults.insert(parameter.into(), value.into());
        self
    }

    /// Fold an enclosing group's prefix, name prefix and middleware into this route
    pub(crate) fn apply_group(&mut self, group: &RouteGroup) {
        self.uri = normalize_uri(&group.apply_prefix(&self.uri));
        if let Some(name) = &self.name {
            self.name = Some(format!("{}{}", group.get_name_prefix(), name));
        }
        let mut middleware: Vec<MiddlewareRef> = group.get_middleware().to_vec();
        middleware.append(&mut self.middleware);
        self.middleware = middleware;
        self.compiled = None;
    }

    pub(crate) fn set_compiled(&mut self, compiled: CompiledRoute) {
        self.compiled = Some(compiled);
    }

    /// Compile the URI unless already compiled
    pub fn compile(&mut self) -> Result<&CompiledRoute, Error> {
        if self.compiled.is_none() {
            self.compiled = Some(CompiledRoute::compile(&self.uri, &self.wheres)?);
        }
        self.compiled
            .as_ref()
            .ok_or_else(|| Error::InvalidRoute(self.uri.clone()))
    }

    /// Match a normalised request path, returning the parameters on success.
    /// Route defaults fill in anything the URI did not capture.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let compiled = self.compiled.as_ref()?;
        let captures = compiled.regex.captures(path).or_else(|| {
            if path == "/" {
                compiled.regex.captures("")
            } else {
                None
            }
        })?;

        let mut parameters = HashMap::with_capacity(compiled.parameters.len());
        for name in &compiled.parameters {
            if let Some(value) = captures.name(name) {
                let raw = value.as_str();
                let decoded = urlencoding::decode(raw)
                    .map(|v| v.into_owned())
                    .unwrap_or_else(|_| raw.to_string());
                parameters.insert(name.clone(), decoded);
            }
        }
        for (name, default) in &self.defaults {
            parameters
                .entry(name.clone())
                .or_insert_with(|| default.clone());
        }
        Some(parameters)
    }

    pub fn answers(&self, method: HttpMethod) -> bool {
        self.methods.contains(&method)
    }

    pub fn methods(&self) -> &[HttpMethod] {
        &self.methods
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn get_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn action(&self) -> &RouteAction {
        &self.action
    }

    pub fn get_middleware(&self) -> &[MiddlewareRef] {
        &self.middleware
    }

    pub fn excluded_middleware(&self) -> &[String] {
        &self.without_middleware
    }

    pub fn wheres(&self) -> &BTreeMap<String, String> {
        &self.wheres
    }

    pub fn get_defaults(&self) -> &BTreeMap<String, String> {
        &self.defaults
    }

    pub fn compiled(&self) -> Option<&CompiledRoute> {
        self.compiled.as_ref()
    }

    /// Parameter names in URI order
    pub fn parameter_names(&self) -> Vec<String> {
        match &self.compiled {
            Some(compiled) => compiled.parameters.clone(),
            None => CompiledRoute::compile(&self.uri, &self.wheres)
                .map(|c| c.parameters)
                .unwrap_or_default(),
        }
    }
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("methods", &self.methods)
            .field("uri", &self.uri)
            .field("name", &self.name)
            .field("action", &self.action)
            .field("middleware", &self.middleware)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(uri: &str) -> CompiledRoute {
        CompiledRoute::compile(uri, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn test_literal_text_is_escaped() {
        let compiled = compile("/files/report.pdf");
        assert_eq!(compiled.pattern(), r"^/files/report\.pdf$");
    }

    #[test]
    fn test_required_and_optional_parameters() {
        let compiled = compile("/posts/{post}/comments/{comment?}");
        assert_eq!(
            compiled.pattern(),
            "^/posts/(?P<post>[^/]+)/comments(?:/(?P<comment>[^/]+))?$"
        );
        assert_eq!(compiled.parameters(), &["post".to_string(), "comment".to_string()]);
    }

    #[test]
    fn test_constraint_narrows_group() {
        let mut wheres = BTreeMap::new();
        wheres.insert("id".to_string(), "[0-9]+".to_string());
        let compiled = CompiledRoute::compile("/users/{id}", &wheres).unwrap();
        assert_eq!(compiled.pattern(), "^/users/(?P<id>[0-9]+)$");
    }

    #[test]
    fn test_invalid_routes() {
        let empty = BTreeMap::new();
        assert!(matches!(
            CompiledRoute::compile("/a/{id}/{id}", &empty),
            Err(Error::InvalidRoute(_))
        ));
        assert!(matches!(
            CompiledRoute::compile("/a/{id", &empty),
            Err(Error::InvalidRoute(_))
        ));
        assert!(matches!(
            CompiledRoute::compile("/a/{1st}", &empty),
            Err(Error::InvalidRoute(_))
        ));

        let mut bad = BTreeMap::new();
        bad.insert("id".to_string(), "[0-9".to_string());
        assert!(matches!(
            CompiledRoute::compile("/a/{id}", &bad),
            Err(Error::InvalidRoute(_))
        ));
    }

    #[test]
    fn test_from_parts_checks_capture_names() {
        assert!(CompiledRoute::from_parts("^/u/(?P<id>[^/]+)$", vec!["id".into()]).is_ok());
        assert!(CompiledRoute::from_parts("^/u/(?P<id>[^/]+)$", vec!["user".into()]).is_err());
        assert!(CompiledRoute::from_parts("^/u/(?P<id>[^/]+$", vec!["id".into()]).is_err());
    }

    #[test]
    fn test_uri_normalization() {
        assert_eq!(normalize_uri("users/"), "/users");
        assert_eq!(normalize_uri("/"), "/");
        assert_eq!(normalize_uri(""), "/");
    }

    #[test]
    fn test_get_routes_answer_head() {
        let route = Route::get("/", RouteAction::controller("Home", "index"));
        assert!(route.answers(HttpMethod::HEAD));
        assert!(!route.answers(HttpMethod::POST));
    }

    #[test]
    fn test_optional_parameter_default() {
        let mut route = Route::get("/blog/{page?}", RouteAction::controller("Blog", "index"))
            .where_number("page")
            .defaults("page", "1");
        route.compile().unwrap();

        assert_eq!(route.matches("/blog").unwrap().get("page"), Some(&"1".to_string()));
        assert_eq!(route.matches("/blog/3").unwrap().get("page"), Some(&"3".to_string()));
        assert!(route.matches("/blog/three").is_none());
    }

    #[test]
    fn test_root_optional_parameter() {
        let mut route = Route::get("/{locale?}", RouteAction::controller("Home", "index"));
        route.compile().unwrap();
        assert!(route.matches("/").unwrap().is_empty());
        assert_eq!(route.matches("/en").unwrap().get("locale"), Some(&"en".to_string()));
    }

    #[test]
    fn test_parameters_are_percent_decoded() {
        let mut route = Route::get("/tags/{tag}", RouteAction::controller("Tags", "show"));
        route.compile().unwrap();
        let params = route.matches("/tags/rust%20lang").unwrap();
        assert_eq!(params.get("tag"), Some(&"rust lang".to_string()));
    }

    #[test]
    fn test_parse_action() {
        let action = RouteAction::parse("app::UserController@show").unwrap();
        assert_eq!(action.describe(), "app::UserController@show");
        assert!(RouteAction::parse("NoMethod").is_none());
        assert!(RouteAction::parse("Ctrl@").is_none());
    }
}

// Controllers and action invocation

use crate::container::{Argument, Arguments, Concrete, Injectable, Instance, Parameter, Parameters};
use crate::logging::trace;
use crate::{Container, Error, HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// An HTTP controller.
///
/// `action_parameters` plays the role of each action's signature: route
/// parameters bind to it by name and service parameters are resolved from the
/// request's container.
///
/// ```ignore
/// struct UserController { users: Arc<UserRepository> }
///
/// #[async_trait]
/// impl Controller for UserController {
///     fn action_parameters(&self, action: &str) -> Option<Vec<Parameter>> {
///         match action {
///             "index" => Some(vec![]),
///             "show" => Some(vec![Parameter::value("id")]),
///             _ => None,
///         }
///     }
///
///     async fn call(&self, action: &str, _req: HttpRequest, args: &Arguments)
///         -> Result<HttpResponse, Error>
///     {
///         match action {
///             "show" => HttpResponse::json(&self.users.find(args.value::<u64>("id")?)),
///             _ => HttpResponse::json(&self.users.all()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait Controller: Send + Sync {
    /// Declared parameters of `action`, or `None` when the action does not exist
    fn action_parameters(&self, action: &str) -> Option<Vec<Parameter>>;

    async fn call(
        &self,
        action: &str,
        request: HttpRequest,
        arguments: &Arguments,
    ) -> Result<HttpResponse, Error>;
}

impl Container {
    /// Register an autowired controller under its type name
    pub fn controller<C: Controller + Injectable>(&self) {
        self.controller_as::<C>(std::any::type_name::<C>());
    }

    /// Register an autowired controller under an explicit id
    pub fn controller_as<C: Controller + Injectable>(&self, id: impl Into<String>) {
        self.autowire::<C>();
        let type_name = std::any::type_name::<C>();
        self.bind(
            id,
            Concrete::Factory(Arc::new(move |container, parameters| {
                let built = container.build(type_name, parameters)?;
                let controller = built.downcast::<C>().map_err(|_| {
                    Error::BindingResolution(format!("[{}] did not build a controller", type_name))
                })?;
                Ok(Arc::new(controller as Arc<dyn Controller>) as Instance)
            })),
            false,
        );
    }
}

/// Resolve `controller_id`, bind the request's route parameters and run `action`
pub async fn call_action(
    container: &Container,
    controller_id: &str,
    action: &str,
    request: HttpRequest,
) -> Result<HttpResponse, Error> {
    let controller = container
        .make_as::<Arc<dyn Controller>>(controller_id)?
        .as_ref()
        .clone();
    let declaring = format!("{}@{}", controller_id, action);

    let declared = controller.action_parameters(action).ok_or_else(|| {
        Error::BindingResolution(format!("Method {} does not exist", declaring))
    })?;

    let mut supplied = Parameters::new();
    for parameter in &declared {
        if let Some(value) = request.path_params.get(&parameter.name) {
            supplied.insert(
                parameter.name.clone(),
                Argument::Value(Value::String(value.clone())),
            );
        }
    }

    let arguments = container.resolve_arguments(&declaring, &declared, &supplied)?;
    trace!(action = %declaring, "Invoking controller action");
    controller.call(action, request, &arguments).await
}

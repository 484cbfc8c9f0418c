use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use super::Service;
use crate::error::{ControlPointError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Argument {
    pub name: String,
    pub direction: Direction,
    pub related_state_variable: String,
}

/// An action declared in a service's SCPD.
pub struct Action {
    pub(crate) service: Weak<Service>,
    pub(crate) name: String,
    pub(crate) arguments: Vec<Argument>,
}

impl Action {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service(&self) -> Option<Arc<Service>> {
        self.service.upgrade()
    }

    pub fn arguments(&self) -> &[Argument] {
        &self.arguments
    }

    pub fn input_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter().filter(|argument| argument.direction == Direction::In)
    }

    pub fn output_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter().filter(|argument| argument.direction == Direction::Out)
    }

    pub fn find_argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|argument| argument.name == name)
    }

    /// Invoke the action over SOAP and return its out arguments.
    ///
    /// Input arguments are sent in declaration order. One that is not given
    /// takes its related state variable's default value, or the empty string.
    pub fn invoke(&self, arguments: &[(&str, &str)]) -> Result<HashMap<String, String>> {
        let service = self.service().ok_or(ControlPointError::Unavailable("service"))?;

        for (name, _) in arguments {
            if !self.input_arguments().any(|argument| argument.name == *name) {
                return Err(ControlPointError::UnknownArgument {
                    action: self.name.clone(),
                    argument: name.to_string(),
                });
            }
        }

        let values: Vec<(String, String)> = self
            .input_arguments()
            .map(|argument| {
                let value = arguments
                    .iter()
                    .find(|(name, _)| *name == argument.name)
                    .map(|(_, value)| value.to_string())
                    .or_else(|| {
                        service
                            .find_state_variable(&argument.related_state_variable)
                            .and_then(|variable| variable.default_value.clone())
                    })
                    .unwrap_or_default();
                (argument.name.clone(), value)
            })
            .collect();

        let control_url = service.control_url_absolute()?;
        tracing::debug!(action = %self.name, %control_url, "invoking action");

        let output = service
            .context
            .invoker
            .invoke(&control_url, service.service_type(), &self.name, &values)?;
        Ok(output.into_iter().collect())
    }

    /// [`Action::invoke`] on the IO lane; `on_complete` runs on the callback lane.
    pub fn invoke_async<F>(self: &Arc<Self>, arguments: Vec<(String, String)>, on_complete: F) -> bool
    where
        F: FnOnce(Result<HashMap<String, String>>) + Send + 'static,
    {
        let Some(service) = self.service() else {
            return false;
        };
        let action = self.clone();
        let executor = service.context.executor.clone();
        service.context.executor.io(move || {
            let borrowed: Vec<(&str, &str)> = arguments
                .iter()
                .map(|(name, value)| (name.as_str(), value.as_str()))
                .collect();
            let result = action.invoke(&borrowed);
            executor.callback(move || on_complete(result));
        })
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.name)
            .field("arguments", &self.arguments)
            .finish()
    }
}

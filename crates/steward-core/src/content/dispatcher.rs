//! Fans content operations out to handlers and folds the results into one
//! [`Report`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, instrument, warn};

use super::container::HandlerContainer;
use super::handler::{ContentHandler, HandlerError, HandlerReport};
use super::report::{RebootStatus, Report};
use super::unit::{ContentUnit, Options};
use crate::domain::{Args, CallableRef, Kwargs, Task, TaskFailure};
use crate::error::Result;
use crate::runtime::{Callable, TaskContext};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Type id whose handler issues reboots.
    pub system_type: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            system_type: "system".into(),
        }
    }
}

/// Unit-level operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Install,
    Update,
    Uninstall,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Install => "install",
            Operation::Update => "update",
            Operation::Uninstall => "uninstall",
        }
    }

    async fn invoke(
        self,
        handler: &dyn ContentHandler,
        units: &[ContentUnit],
        options: &Options,
    ) -> std::result::Result<HandlerReport, HandlerError> {
        match self {
            Operation::Install => handler.install(units, options).await,
            Operation::Update => handler.update(units, options).await,
            Operation::Uninstall => handler.uninstall(units, options).await,
        }
    }
}

/// A dispatcher call, in a form that can be carried by a [`Task`].
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchRequest {
    Apply {
        operation: Operation,
        units: Vec<ContentUnit>,
        options: Options,
    },
    Profile {
        type_ids: Vec<String>,
    },
    Reboot,
}

impl DispatchRequest {
    pub fn install(units: Vec<ContentUnit>, options: Options) -> Self {
        Self::Apply {
            operation: Operation::Install,
            units,
            options,
        }
    }

    pub fn update(units: Vec<ContentUnit>, options: Options) -> Self {
        Self::Apply {
            operation: Operation::Update,
            units,
            options,
        }
    }

    pub fn uninstall(units: Vec<ContentUnit>, options: Options) -> Self {
        Self::Apply {
            operation: Operation::Uninstall,
            units,
            options,
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            Self::Apply { operation, .. } => operation.as_str(),
            Self::Profile { .. } => "profile",
            Self::Reboot => "reboot",
        }
    }
}

/// Stateless coordinator over one [`HandlerContainer`].
pub struct Dispatcher {
    container: Arc<HandlerContainer>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(container: Arc<HandlerContainer>) -> Self {
        Self::with_config(container, DispatcherConfig::default())
    }

    pub fn with_config(container: Arc<HandlerContainer>, config: DispatcherConfig) -> Self {
        Self { container, config }
    }

    pub fn container(&self) -> &HandlerContainer {
        &self.container
    }

    pub async fn install(&self, units: &[ContentUnit], options: &Options) -> Result<Report> {
        self.apply(Operation::Install, units, options).await
    }

    pub async fn update(&self, units: &[ContentUnit], options: &Options) -> Result<Report> {
        self.apply(Operation::Update, units, options).await
    }

    pub async fn uninstall(&self, units: &[ContentUnit], options: &Options) -> Result<Report> {
        self.apply(Operation::Uninstall, units, options).await
    }

    /// Group units by type, run each group through its handler, merge.
    ///
    /// Only malformed units fail the call; handler trouble ends up in
    /// `details[type_id]`.
    #[instrument(skip(self, units, options), fields(op = operation.as_str(), units = units.len()))]
    pub async fn apply(
        &self,
        operation: Operation,
        units: &[ContentUnit],
        options: &Options,
    ) -> Result<Report> {
        for (index, unit) in units.iter().enumerate() {
            unit.validate(index)?;
        }

        let mut report = Report::new();
        for (type_id, group) in group_by_type(units) {
            let Some(handler) = self.container.find(&type_id) else {
                warn!(type_id = %type_id, "no handler for content type");
                report.merge(
                    &type_id,
                    HandlerReport::failed(format!("handler for type '{type_id}' not found")),
                );
                continue;
            };

            let part = match operation.invoke(handler.as_ref(), &group, options).await {
                Ok(part) => part,
                Err(err) => {
                    error!(type_id = %type_id, error = %err, "handler failed");
                    HandlerReport::failed(err.to_string())
                }
            };
            report.merge(&type_id, part);
        }

        if (options.reboot && report.chgcnt > 0) || report.reboot_requested() {
            report.reboot = self.issue_reboot(options).await;
        }

        info!(status = report.status, chgcnt = report.chgcnt, reboot = report.reboot.scheduled, "dispatch complete");
        Ok(report)
    }

    /// Installed-state per type. Never changes anything; `chgcnt` is 0.
    #[instrument(skip(self))]
    pub async fn profile(&self, type_ids: &[String]) -> Report {
        let mut report = Report::new();
        let mut seen = std::collections::HashSet::new();

        for type_id in type_ids.iter().filter(|t| seen.insert(t.as_str())) {
            let part = match self.container.find(type_id) {
                None => HandlerReport::failed(format!("handler for type '{type_id}' not found")),
                Some(handler) => match handler.profile().await {
                    Ok(part) => part,
                    Err(err) => {
                        error!(type_id = %type_id, error = %err, "profile failed");
                        HandlerReport::failed(err.to_string())
                    }
                },
            };
            report.merge(type_id.as_str(), HandlerReport { chgcnt: 0, ..part });
        }
        report
    }

    /// Issue a reboot through the system handler.
    #[instrument(skip(self))]
    pub async fn reboot(&self) -> Report {
        let reboot = self.issue_reboot(&Options::default()).await;
        Report {
            status: reboot.scheduled,
            chgcnt: 0,
            reboot,
            ..Report::new()
        }
    }

    async fn issue_reboot(&self, options: &Options) -> RebootStatus {
        let system_type = &self.config.system_type;
        let Some(handler) = self.container.find(system_type) else {
            warn!(system_type = %system_type, "reboot due but no system handler loaded");
            return RebootStatus {
                scheduled: false,
                details: json!({ "message": format!("no handler for type '{system_type}'") }),
            };
        };

        match handler.reboot(options).await {
            Ok(part) => {
                info!(scheduled = part.status, "reboot issued");
                RebootStatus {
                    scheduled: part.status,
                    details: part.details,
                }
            }
            Err(err) => {
                error!(error = %err, "reboot failed");
                RebootStatus {
                    scheduled: false,
                    details: json!({ "message": err.to_string() }),
                }
            }
        }
    }

    /// Run `request` and return its report as JSON.
    pub async fn execute(&self, request: &DispatchRequest) -> Result<Value> {
        let report = match request {
            DispatchRequest::Apply {
                operation,
                units,
                options,
            } => self.apply(*operation, units, options).await?,
            DispatchRequest::Profile { type_ids } => self.profile(type_ids).await,
            DispatchRequest::Reboot => self.reboot().await,
        };
        Ok(serde_json::to_value(report)?)
    }

    /// Wrap `request` in a task whose result is the serialized [`Report`].
    ///
    /// The task is named `Dispatcher.<op>` with the units as its only
    /// positional argument and the options (or type ids) as kwargs, so
    /// equal requests are duplicates for `enqueue(.., unique = true)`.
    pub fn task(self: &Arc<Self>, request: DispatchRequest) -> Result<Task> {
        let method = request.method_name();
        let (args, kwargs): (Args, Kwargs) = match &request {
            DispatchRequest::Apply { units, options, .. } => (
                vec![serde_json::to_value(units)?],
                Kwargs::from([("options".to_string(), serde_json::to_value(options)?)]),
            ),
            DispatchRequest::Profile { type_ids } => (
                Args::new(),
                Kwargs::from([("type_ids".to_string(), serde_json::to_value(type_ids)?)]),
            ),
            DispatchRequest::Reboot => (Args::new(), Kwargs::new()),
        };

        let call = DispatchCall {
            dispatcher: Arc::clone(self),
            method,
        };
        Ok(Task::new(Arc::new(call)).args(args).kwargs(kwargs))
    }
}

/// Group units by type id: groups in first-seen order, units in input order.
fn group_by_type(units: &[ContentUnit]) -> Vec<(String, Vec<ContentUnit>)> {
    let mut groups: Vec<(String, Vec<ContentUnit>)> = Vec::new();
    for unit in units {
        match groups.iter_mut().find(|(t, _)| *t == unit.type_id) {
            Some((_, group)) => group.push(unit.clone()),
            None => groups.push((unit.type_id.clone(), vec![unit.clone()])),
        }
    }
    groups
}

/// Task body that decodes its arguments back into a [`DispatchRequest`].
struct DispatchCall {
    dispatcher: Arc<Dispatcher>,
    method: &'static str,
}

impl DispatchCall {
    fn decode(&self, args: &[Value], kwargs: &Kwargs) -> std::result::Result<DispatchRequest, TaskFailure> {
        let options = || -> std::result::Result<Options, TaskFailure> {
            match kwargs.get("options") {
                Some(raw) => Ok(serde_json::from_value(raw.clone())?),
                None => Ok(Options::default()),
            }
        };
        let units = || -> std::result::Result<Vec<ContentUnit>, TaskFailure> {
            let raw = args
                .first()
                .ok_or_else(|| TaskFailure::msg("missing units argument"))?;
            Ok(ContentUnit::parse_batch(raw)?)
        };

        let operation = match self.method {
            "install" => Operation::Install,
            "update" => Operation::Update,
            "uninstall" => Operation::Uninstall,
            "profile" => {
                let type_ids = match kwargs.get("type_ids") {
                    Some(raw) => serde_json::from_value(raw.clone())?,
                    None => Vec::new(),
                };
                return Ok(DispatchRequest::Profile { type_ids });
            }
            "reboot" => return Ok(DispatchRequest::Reboot),
            other => return Err(TaskFailure::msg(format!("unknown dispatch method '{other}'"))),
        };
        Ok(DispatchRequest::Apply {
            operation,
            units: units()?,
            options: options()?,
        })
    }
}

#[async_trait]
impl Callable for DispatchCall {
    fn callable_ref(&self) -> CallableRef {
        CallableRef::method("Dispatcher", self.method)
    }

    async fn call(
        &self,
        _ctx: &TaskContext,
        args: &[Value],
        kwargs: &Kwargs,
    ) -> std::result::Result<Value, TaskFailure> {
        let request = self.decode(args, kwargs)?;
        Ok(self.dispatcher.execute(&request).await?)
    }
}

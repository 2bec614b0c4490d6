//! Content-handler layer: units, the handler contract, the container that
//! resolves type ids to handlers, and the dispatcher that drives them.

pub mod container;
pub mod dispatcher;
pub mod handler;
pub mod report;
pub mod unit;

pub use container::{ContainerConfig, HandlerContainer, HandlerDescriptor, HandlerFactory, LoadSummary};
pub use dispatcher::{DispatchRequest, Dispatcher, DispatcherConfig, Operation};
pub use handler::{ContentHandler, HandlerError, HandlerReport};
pub use report::{RebootStatus, Report};
pub use unit::{ContentUnit, Options};

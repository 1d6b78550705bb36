pub mod context;
pub mod descriptor;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod interface;
pub mod library;
pub mod registry;
pub mod request;
pub mod scope;
pub mod scope_tree;
pub mod transport;

pub use context::RequestContext;
pub use dispatcher::{DeclineReason, DispatchOutcome, Dispatcher};
pub use interface::{HandlerInterface, Namespace, Outcome};
pub use library::{LibraryDescriptor, LibraryRole};
pub use registry::{LibraryRegistry, merge_registries};
pub use request::{HostRequest, HostResponse};
pub use scope::{ConfigurationScope, LoadedHandler, ScopeType};
pub use scope_tree::{ResolvedLocation, ScopeTree};

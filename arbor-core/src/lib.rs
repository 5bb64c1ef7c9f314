// Core library for the Arbor dispatch engine
// Handler tree, parameter validation, request context and the router

pub mod context;
pub mod error;
pub mod form;
pub mod guard;
pub mod latin1;
pub mod logging;
pub mod node;
pub mod parameter;
pub mod registry;
pub mod router;

// Re-export commonly used types
pub use context::{RequestContext, split_path};
pub use error::{Cause, Error, ErrorCode, Origin, Recoverability, Result, codes};
pub use form::{Attachment, MultipartParser, Part};
pub use guard::{AllowAll, Authorizer, CustomAuthorizer, DenyAll, GrantSet};
pub use node::{
    Composite, Execute, FnExecute, Handler, HandlerBuilder, HandlerDescription, HandlerKind,
    Leaf, NodeKind, NodeRef, OwnerKey, from_fn,
};
pub use parameter::{Check, Parameter, ParameterDescription, Resolved, ValidationError};
pub use registry::Registry;
pub use router::{BoxFuture, Call, Outcome, Router};

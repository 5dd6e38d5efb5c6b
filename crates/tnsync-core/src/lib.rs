//! Declarative reconcilers between `tnsync-api` and the CLI.
//!
//! - **[`Middleware`]** wraps a transport with typed helpers (`query`,
//!   `query_one`, `job`) and maps wire errors into [`CoreError`].
//!
//! - **[`Session`]** owns one middleware connection and memoizes the
//!   appliance [`Dialect`] on first use.
//!
//! - **Reconcilers** ([`resources`]) observe one resource, diff it against
//!   the desired spec, and emit a [`reconcile::Plan`]. [`converge`] runs
//!   the plan, or only describes it under [`Mode::Check`].

pub mod config;
pub mod dialect;
pub mod error;
pub mod facts;
pub mod input;
pub mod middleware;
pub mod reconcile;
pub mod resources;
pub mod session;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{AuthCredentials, MiddlewareConfig, TransportMethod};
pub use dialect::{Capabilities, Dialect, Version};
pub use error::CoreError;
pub use facts::Facts;
pub use middleware::Middleware;
pub use reconcile::{ChangeReport, Mode, Reconciler, converge};
pub use resources::{Presence, ResourceKind};
pub use session::Session;

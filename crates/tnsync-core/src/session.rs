// ── Session ──
//
// One middleware connection plus the lazily resolved dialect. A session
// lives for a single invocation; nothing is cached beyond it.

use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::dialect::{Capabilities, Dialect};
use crate::error::CoreError;
use crate::middleware::Middleware;

/// Product name assumed when `system.product_name` does not exist.
const FALLBACK_PRODUCT_NAME: &str = "TrueNAS";

/// Default interval for polls that wait on remote state.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct Session {
    middleware: Middleware,
    dialect: OnceCell<Dialect>,
    poll_interval: Duration,
}

impl Session {
    pub fn new(middleware: Middleware) -> Self {
        Self {
            middleware,
            dialect: OnceCell::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Start a session with a dialect already known (skips detection).
    pub fn with_dialect(middleware: Middleware, dialect: Dialect) -> Self {
        Self {
            dialect: OnceCell::new_with(Some(dialect)),
            ..Self::new(middleware)
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// How long to wait between polls of a settling resource.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn middleware(&self) -> &Middleware {
        &self.middleware
    }

    /// Product name, type and version, queried on first use.
    ///
    /// Failures propagate; there is no default dialect.
    pub async fn dialect(&self) -> Result<&Dialect, CoreError> {
        self.dialect.get_or_try_init(|| detect(&self.middleware)).await
    }

    pub async fn capabilities(&self) -> Result<Capabilities, CoreError> {
        Ok(self.dialect().await?.capabilities())
    }
}

async fn detect(mw: &Middleware) -> Result<Dialect, CoreError> {
    let product_name = match mw.call_str("system.product_name", &[]).await {
        Ok(name) => name,
        Err(e) if e.is_method_not_found() => {
            warn!("system.product_name not available, assuming {FALLBACK_PRODUCT_NAME}");
            FALLBACK_PRODUCT_NAME.to_owned()
        }
        Err(e) => return Err(e),
    };
    let product_type = mw.call_str("system.product_type", &[]).await?;
    let sys_version = mw.call_str("system.version", &[]).await?;

    let dialect = Dialect::from_parts(&product_name, &product_type, &sys_version);
    debug!(%dialect, "detected middleware dialect");
    Ok(dialect)
}

//! CLI configuration: a thin layer over `tnsync_config` that applies the
//! `--profile`, `--method` and `--uri` flags.

use tnsync_config::{Profile, process_env};
use tnsync_core::{Middleware, MiddlewareConfig, Session};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Overlay flags on a profile. Flags beat environment, which beats the
/// config file.
pub fn apply_flags(profile: &mut Profile, global: &GlobalOpts) {
    if let Some(method) = &global.method {
        profile.method = Some(method.clone());
    }
    if let Some(uri) = &global.uri {
        profile.uri = Some(uri.clone());
    }
}

pub fn resolve(global: &GlobalOpts) -> Result<MiddlewareConfig, CliError> {
    let cfg = tnsync_config::load_config()?;
    let (name, mut profile) = cfg.select(global.profile.as_deref())?;
    profile.apply_env(&process_env);
    apply_flags(&mut profile, global);
    Ok(tnsync_config::to_middleware_config(&profile, &name, &process_env)?)
}

/// Build the session for one invocation. Nothing connects yet.
pub fn build_session(global: &GlobalOpts) -> Result<Session, CliError> {
    let config = resolve(global)?;
    tracing::debug!(method = %config.method, uri = %config.uri, "middleware configured");
    let poll = config.job_poll_interval;
    Ok(Session::new(Middleware::from_config(&config)).with_poll_interval(poll))
}

use serde_json::Value;
use tnsync_api::Output;
use tnsync_core::{CoreError, Session};

use crate::cli::{CallArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

/// Parse each positional argument as a JSON document.
pub fn parse_args(args: &[String]) -> Result<Vec<Value>, CliError> {
    args.iter()
        .map(|arg| {
            serde_json::from_str(arg).map_err(|e| CliError::BadArgument {
                arg: arg.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

pub async fn handle(args: CallArgs, session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let params = parse_args(&args.args)?;
    let transport = session.middleware().transport();
    tracing::info!(method = %args.method, job = args.job, "raw call");

    let result = if args.job {
        transport.job(&args.method, &params).await
    } else if args.raw {
        transport.call(&args.method, &params, Output::Str).await
    } else {
        transport.call(&args.method, &params, Output::Json).await
    }
    .map_err(CoreError::from)?;

    if let (true, Value::String(text)) = (args.raw, &result) {
        output::print_output(text);
        return Ok(());
    }
    output::print_output(&output::render_value(global.output, &result)?);
    Ok(())
}

// ── Tests ────────────────────────────────────────────────────────────

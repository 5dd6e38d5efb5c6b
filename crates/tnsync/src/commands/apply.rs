use std::io::{self, IsTerminal};
use std::path::Path;

use tnsync_core::{Mode, ResourceKind, Session, converge};

use crate::cli::{ApplyArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

/// Parameters from `-f FILE`, or stdin for `-f -` and when piped.
fn read_params(file: Option<&Path>) -> Result<String, CliError> {
    match file {
        Some(path) if path != Path::new("-") => Ok(std::fs::read_to_string(path)?),
        Some(_) => Ok(io::read_to_string(io::stdin())?),
        None if io::stdin().is_terminal() => Err(CliError::Validation {
            message: "no parameters given; pass -f FILE or pipe YAML/JSON on stdin".into(),
        }),
        None => Ok(io::read_to_string(io::stdin())?),
    }
}

pub async fn handle(args: ApplyArgs, session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let kind = ResourceKind::parse(&args.kind).map_err(|_| CliError::UnknownKind {
        kind: args.kind.clone(),
    })?;
    let text = read_params(args.file.as_deref())?;

    // File inputs (certificate src, private_keyfile) resolve against the
    // working directory.
    let reconciler = tnsync_core::input::load(kind, &text, Path::new("."))?;

    let mode = if args.check { Mode::Check } else { Mode::Apply };
    let report = converge(reconciler.as_ref(), session, mode).await?;

    output::print_output(&output::render_report(global.output, &report)?);
    if !global.quiet {
        output::print_status(&report, args.check, output::should_color(global.color));
    }
    Ok(())
}

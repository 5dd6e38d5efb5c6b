// midclt subprocess transport
//
// Runs `midclt call [opts] <method> <json-arg>...` for every request.
// Each argument is serialized as its own JSON document on the command line.
// Jobs use `-job -jp description`, which prints progress lines followed by
// the job result on the final line.

use std::path::PathBuf;
use std::process::Output as ProcessOutput;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::error::Error;
use crate::transport::{Output, Transport, parse_json, render_output};

/// Default program name, resolved through `PATH`.
pub const MIDCLT_CMD: &str = "midclt";

const JOB_OPTS: [&str; 3] = ["-job", "-jp", "description"];

/// Transport that shells out to `midclt` for every call.
#[derive(Debug, Clone)]
pub struct Midclt {
    program: PathBuf,
}

impl Default for Midclt {
    fn default() -> Self {
        Self::new()
    }
}

impl Midclt {
    pub fn new() -> Self {
        Self {
            program: PathBuf::from(MIDCLT_CMD),
        }
    }

    /// Use a specific `midclt` binary instead of the one on `PATH`.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    /// Build the argument vector passed to `midclt`.
    fn command_args(opts: &[&str], method: &str, args: &[Value]) -> Vec<String> {
        let mut argv = Vec::with_capacity(2 + opts.len() + args.len());
        argv.push("call".to_owned());
        argv.extend(opts.iter().map(|o| (*o).to_owned()));
        argv.push(method.to_owned());
        argv.extend(args.iter().map(Value::to_string));
        argv
    }

    async fn run(&self, opts: &[&str], method: &str, args: &[Value]) -> Result<ProcessOutput, Error> {
        let argv = Self::command_args(opts, method, args);
        debug!(program = %self.program.display(), method, nargs = args.len(), "midclt call");

        Command::new(&self.program)
            .args(&argv)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::Spawn {
                program: self.program.display().to_string(),
                source,
            })
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }
}

/// Merge stdout and stderr the way a terminal would show them.
fn combined(out: &ProcessOutput) -> String {
    let mut text = String::from_utf8_lossy(&out.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&out.stderr));
    text
}

fn method_not_found(method: &str, text: &str) -> Option<Error> {
    text.trim_start().starts_with("[ENOMETHOD]").then(|| Error::MethodNotFound {
        method: method.to_owned(),
        detail: text.trim().to_owned(),
    })
}

#[async_trait]
impl Transport for Midclt {
    fn name(&self) -> &'static str {
        "midclt"
    }

    async fn call(&self, method: &str, args: &[Value], output: Output) -> Result<Value, Error> {
        let out = self.run(&[], method, args).await?;

        if !out.status.success() {
            let text = combined(&out);
            if let Some(err) = method_not_found(method, &text) {
                return Err(err);
            }
            return Err(Error::Transport {
                program: self.program_name(),
                status: out.status.code().unwrap_or(-1),
                output: text.trim_end().to_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&out.stdout);
        render_output(method, &stdout, output)
    }

    async fn job(&self, method: &str, args: &[Value]) -> Result<Value, Error> {
        let out = self.run(&JOB_OPTS, method, args).await?;

        if !out.status.success() {
            let text = combined(&out);
            if let Some(err) = method_not_found(method, &text) {
                return Err(err);
            }
            let last = text
                .lines()
                .rev()
                .find(|l| !l.trim().is_empty())
                .map(str::to_owned);
            return Err(Error::Job {
                method: method.to_owned(),
                state: "FAILED".to_owned(),
                error: last,
                exception: Some(text.trim_end().to_owned()),
                progress: None,
            });
        }

        let stdout = String::from_utf8_lossy(&out.stdout);
        let last = stdout.trim_end().lines().last().unwrap_or_default();
        parse_json(method, last)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

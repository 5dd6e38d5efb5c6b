pub mod apply;
pub mod call;
pub mod facts;
pub mod kinds;

use tnsync_core::Session;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Route a command that needs a middleware session.
pub async fn dispatch(cmd: Command, session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Apply(args) => apply::handle(args, session, global).await,
        Command::Facts => facts::handle(session, global).await,
        Command::Call(args) => call::handle(args, session, global).await,
        Command::Kinds | Command::Completions(_) => Ok(()),
    }
}

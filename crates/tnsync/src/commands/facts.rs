use tnsync_core::Session;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

pub async fn handle(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let facts = tnsync_core::facts::gather(session).await?;
    output::print_output(&output::render_value(global.output, &facts)?);
    Ok(())
}

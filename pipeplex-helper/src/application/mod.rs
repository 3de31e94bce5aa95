pub mod handlers;

use crate::presentation::cli::Cli;
use pipeplex_core::agent::Session;
use pipeplex_core::error::Result;

pub fn run(cli: Cli, session: &Session) -> Result<()> {
    let oids = handlers::load_oids(cli.oid, cli.oid_file.as_deref())?;
    if cli.backup_agent {
        handlers::handle_backup(&cli, session, &oids)
    } else {
        handlers::handle_restore(&cli, session, &oids)
    }
}

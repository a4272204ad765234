use clap::{Parser, Subcommand};
use muxkit::error::MuxError;
use muxkit::handlers;

mod cli_exit {
    /// §6 "Exit codes": 0 on success, 255 on protocol mismatch, socket
    /// errors, or session-not-found encountered outside an attach attempt.
    /// Attach-not-found is handled inline in `handlers::handle_attach` and
    /// always exits 0 per §8 scenario S5.
    pub const PROTOCOL_OR_SOCKET_FAILURE: i32 = 255;
}

#[derive(Parser)]
#[command(name = "mux")]
#[command(about = "muxkit: a terminal multiplexer with a detached session server", long_about = None)]
#[command(version)]
struct Cli {
    /// List sessions and exit.
    #[arg(short = 'l', long = "list", visible_short_alias = 'L')]
    list: bool,

    /// Attach to a detached session by id.
    #[arg(short = 's', long = "session", visible_short_alias = 'S', value_name = "ID")]
    session: Option<u32>,

    /// Kill a session by id.
    #[arg(short = 'k', long = "kill", visible_short_alias = 'K', value_name = "ID")]
    kill: Option<u32>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Rename a detached session (recovered feature, not in the closed wire
    /// catalog — carried over `COMMAND`).
    Rename { id: u32, new_name: String },

    /// Print the server's recent session history log.
    History,
}

fn main() {
    let cli = Cli::parse();
    let result = dispatch(cli);
    match result {
        Ok(()) => {}
        Err(e) => {
            eprintln!("mux: {e}");
            std::process::exit(cli_exit::PROTOCOL_OR_SOCKET_FAILURE);
        }
    }
}

fn dispatch(cli: Cli) -> Result<(), MuxError> {
    if cli.list {
        return handlers::handle_list();
    }
    if let Some(id) = cli.kill {
        return handlers::handle_kill(id);
    }
    if let Some(id) = cli.session {
        return handlers::handle_attach(id);
    }
    match cli.command {
        Some(Commands::Rename { id, new_name }) => handlers::handle_rename(id, &new_name),
        Some(Commands::History) => handlers::handle_history(),
        None => handlers::handle_default_session(),
    }
}

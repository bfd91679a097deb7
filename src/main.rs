mod cli;
mod daemon;
mod globals;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{LogLevel, Verbosity};
use macros_rs::{str, string};
use update_informer::{registry, Check};

#[derive(Copy, Clone, Debug, Default)]
struct NoneLevel;
impl LogLevel for NoneLevel {
    fn default() -> Option<log::Level> {
        None
    }
}

#[derive(Parser)]
#[command(version = str!(cli::get_version(false)))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[clap(flatten)]
    verbose: Verbosity<NoneLevel>,
}

#[derive(Subcommand)]
enum Server {
    /// Start daemon
    Start,
    /// Stop daemon
    #[command(visible_alias = "kill")]
    Stop,
    /// Restart daemon
    Restart {
        /// Daemon api
        #[arg(long)]
        api: bool,
        /// WebUI using api
        #[arg(long)]
        webui: bool,
    },
    /// Check daemon health
    #[command(visible_alias = "info", visible_alias = "status")]
    Health {
        /// Format output
        #[arg(long, default_value_t = string!("default"))]
        format: String,
    },
    /// Setup systemd service to start the daemon automatically
    #[command(visible_alias = "install")]
    Setup,
}

#[derive(Subcommand)]
enum User {
    /// Create a dashboard user
    Add {
        /// Username
        username: String,
        /// Grant the admin role
        #[arg(long)]
        admin: bool,
    },
    /// Remove a dashboard user
    #[command(visible_alias = "rm", visible_alias = "del")]
    Remove {
        /// Username
        username: String,
    },
    /// Reset a user's password
    Passwd {
        /// Username
        username: String,
    },
    /// List dashboard users
    #[command(visible_alias = "ls")]
    List,
}

#[derive(Subcommand)]
enum Commands {
    /// Daemon management
    #[command(visible_alias = "daemon")]
    Server {
        #[command(subcommand)]
        command: Server,
    },
    /// List scripts with their live status
    #[command(visible_alias = "ls")]
    List {
        /// Format output
        #[arg(long, default_value_t = string!("default"))]
        format: String,
    },
    /// Print the tail of a script log
    Logs {
        /// Script id
        id: String,
        #[arg(
            long,
            default_value_t = 15,
            help = "Number of lines to display from the end of the log file"
        )]
        lines: usize,
    },
    /// Truncate a script log
    #[command(visible_alias = "clean")]
    Flush {
        /// Script id
        id: String,
    },
    /// Dashboard user management
    User {
        #[command(subcommand)]
        command: User,
    },
}

fn main() {
    let cli = Cli::parse();
    let mut env = env_logger::Builder::new();
    let level = cli.verbose.log_level_filter();
    let informer = update_informer::new(registry::Crates, "srvman", env!("CARGO_PKG_VERSION"));

    if let Some(version) = informer.check_version().ok().flatten() {
        println!("{} New version is available: {version}", *srvman::helpers::WARN);
    }

    globals::init();
    env.filter_level(level).init();

    match &cli.command {
        Commands::Server { command } => match command {
            Server::Start => daemon::start(level.as_str() != "OFF"),
            Server::Stop => daemon::stop(level.as_str() != "OFF"),
            Server::Restart { api, webui } => daemon::restart(api, webui, level.as_str() != "OFF"),
            Server::Health { format } => daemon::health(format),
            Server::Setup => daemon::setup(),
        },
        Commands::List { format } => cli::list(format),
        Commands::Logs { id, lines } => cli::logs(id, *lines),
        Commands::Flush { id } => cli::flush(id),
        Commands::User { command } => match command {
            User::Add { username, admin } => cli::user_add(username, *admin),
            User::Remove { username } => cli::user_remove(username),
            User::Passwd { username } => cli::user_passwd(username),
            User::List => cli::user_list(),
        },
    };

    if !matches!(&cli.command, Commands::Server { .. }) && !matches!(&cli.command, Commands::User { .. }) {
        // When auto-starting the daemon, read API/WebUI settings from config
        if !daemon::pid::exists() {
            let config = srvman::config::read();
            daemon::restart(&config.daemon.web.api, &config.daemon.web.ui, false);
        }
    }
}

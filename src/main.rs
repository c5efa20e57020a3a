use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::EnvFilter;

mod commands;

/// socketpm - Install sockets into a tenant
#[derive(Parser)]
#[command(name = "socketpm")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Tenant to operate on
    #[arg(short, long, global = true, default_value = "default")]
    tenant: String,

    /// Verbose logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a new socket
    Install {
        /// Socket name
        name: String,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        options: InstallArgs,
    },

    /// Replace a socket's bundle, or re-fetch it from its URL
    Update {
        /// Socket name
        name: String,

        #[command(flatten)]
        source: SourceArgs,

        #[command(flatten)]
        options: InstallArgs,
    },

    /// Set config variables of a socket (key=value)
    Config {
        /// Socket name
        name: String,

        /// Variables; values are parsed as JSON when possible
        #[arg(required = true)]
        values: Vec<String>,

        /// Leave the socket queued instead of processing it now
        #[arg(long)]
        defer: bool,
    },

    /// List sockets
    List,

    /// Show a socket
    Show {
        /// Socket name
        name: String,
    },

    /// Delete a socket and everything it installed
    Delete {
        /// Socket name
        name: String,
    },

    /// Process queued sockets and environments
    Process,

    /// Zip a socket directory into a bundle
    Pack {
        /// Socket directory (defaults to current directory)
        path: Option<String>,

        /// Output file (defaults to <dir>.zip)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Manage socket environments
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(clap::Args)]
pub struct SourceArgs {
    /// Bundle zip file
    #[arg(short, long, conflicts_with = "url")]
    bundle: Option<String>,

    /// URL to download the bundle from
    #[arg(short, long)]
    url: Option<String>,
}

#[derive(clap::Args)]
pub struct InstallArgs {
    /// Config variables (key=value)
    #[arg(short, long = "config")]
    config: Vec<String>,

    /// Install only these files (partial update; "*" keeps every file)
    #[arg(short, long = "file-list")]
    file_list: Vec<String>,

    /// Ask before classes or fields are deleted
    #[arg(long)]
    class_nodelete: bool,

    /// Environment to bind the socket to
    #[arg(short, long)]
    environment: Option<String>,

    /// Leave the socket queued instead of processing it now
    #[arg(long)]
    defer: bool,
}

#[derive(Subcommand)]
pub enum EnvAction {
    /// Upload and process an environment archive (.tar.gz)
    Add {
        /// Environment name
        name: String,

        /// Path to the archive
        archive: String,

        #[arg(short, long, default_value = "")]
        description: String,

        /// Expected SHA256 of the archive
        #[arg(long)]
        checksum: Option<String>,
    },

    /// List environments
    List,

    /// Delete an unused environment
    Delete {
        /// Environment name
        name: String,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "socketpm=debug" } else { "socketpm=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let tenant = cli.tenant;

    let result = match cli.command {
        Commands::Install { name, source, options } => commands::install::run(&tenant, name, source, options),
        Commands::Update { name, source, options } => commands::update::run(&tenant, name, source, options),
        Commands::Config { name, values, defer } => commands::config::run(&tenant, name, values, defer),
        Commands::List => commands::list::run(&tenant),
        Commands::Show { name } => commands::show::run(&tenant, name),
        Commands::Delete { name } => commands::delete::run(&tenant, name),
        Commands::Process => commands::process::run(&tenant),
        Commands::Pack { path, output } => commands::pack::run(path, output),
        Commands::Env { action } => commands::env::run(&tenant, action),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "socketpm", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

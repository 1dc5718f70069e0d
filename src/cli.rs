use clap::{Args, Parser, Subcommand};
use clap_complete::aot::Shell;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "vibekit",
    version,
    about = "Containerized sandboxes for AI coding agents"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Use a specific vibekit home directory
    #[arg(long = "home", global = true, env = "VIBEKIT_HOME")]
    pub home: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage OAuth provider credentials
    Auth {
        #[command(subcommand)]
        command: AuthCommands,
    },

    /// Manage local sandboxes
    Local {
        #[command(subcommand)]
        command: LocalCommands,
    },

    /// Check host dependencies and pre-build agent images
    Setup {
        /// Agents to warm (comma-separated; all when omitted)
        #[arg(long)]
        agents: Option<String>,

        /// Skip the image pre-build step
        #[arg(long)]
        skip_prebuild: bool,

        /// Registry to use (dockerhub, github, aws)
        #[arg(long)]
        registry: Option<String>,

        /// Upload locally-built agent images after the pre-build
        #[arg(long)]
        upload: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Subcommand)]
pub enum AuthCommands {
    /// Authenticate with a provider via OAuth
    Login {
        /// Provider name (e.g. anthropic)
        provider: String,
    },

    /// Remove stored credentials for a provider
    Logout {
        provider: String,
    },

    /// Show stored credential state
    Status {
        /// Provider to inspect (all when omitted)
        provider: Option<String>,
    },

    /// Check that the stored token is usable, refreshing if needed
    Verify {
        provider: String,
    },

    /// Print stored credentials in a chosen format
    Export {
        provider: String,

        /// Output format: env, json, full, or refresh
        #[arg(long)]
        format: String,
    },

    /// Store credentials from a token, refresh token, env var, or file
    Import {
        provider: String,

        /// Read the token from the provider's env var
        #[arg(long)]
        env: bool,

        /// Access token to store directly
        #[arg(long)]
        token: Option<String>,

        /// Refresh token to exchange and store
        #[arg(long)]
        refresh: Option<String>,

        /// Token record file (as produced by export --format full)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum LocalCommands {
    /// Create a sandbox
    Create {
        /// Sandbox name (generated when omitted)
        #[arg(long)]
        name: Option<String>,

        /// Agent kind (claude, codex, opencode, gemini, grok)
        #[arg(long)]
        agent: Option<String>,

        /// Working directory inside the sandbox
        #[arg(long = "working-directory")]
        working_directory: Option<String>,

        /// Environment variables as K=V,K2=V2
        #[arg(long)]
        env: Option<String>,
    },

    /// List sandboxes
    List {
        /// Filter by status (running, stopped)
        #[arg(long)]
        status: Option<String>,

        /// Filter by agent kind
        #[arg(long)]
        agent: Option<String>,

        /// Filter by git branch
        #[arg(long)]
        branch: Option<String>,

        /// Output JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Delete sandboxes
    Delete {
        /// Sandbox names to delete
        names: Vec<String>,

        /// Do not ask for confirmation
        #[arg(long)]
        force: bool,

        /// Delete every vibekit sandbox
        #[arg(long)]
        all: bool,

        /// Confirm each sandbox interactively
        #[arg(long)]
        interactive: bool,
    },

    /// Run a command in a sandbox
    Run {
        /// Existing sandbox id (a fresh sandbox is created when omitted)
        #[arg(long)]
        sandbox: Option<String>,

        /// Command to execute
        #[arg(long)]
        command: String,

        /// Agent kind for a fresh sandbox
        #[arg(long)]
        agent: Option<String>,

        /// Stream output as it arrives
        #[arg(long)]
        streaming: bool,
    },
}

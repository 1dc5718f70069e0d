use clap::{CommandFactory, Parser};
use vibekit::cli::{AuthCommands, Cli, Commands, LocalCommands};
use vibekit::commands;

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber with env-filter support.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let home = cli.global.home.as_deref();

    let result = match cli.command {
        Commands::Auth { command } => match command {
            AuthCommands::Login { provider } => commands::auth::login(home, &provider).await,
            AuthCommands::Logout { provider } => commands::auth::logout(home, &provider),
            AuthCommands::Status { provider } => commands::auth::status(home, provider),
            AuthCommands::Verify { provider } => commands::auth::verify(home, &provider).await,
            AuthCommands::Export { provider, format } => {
                commands::auth::export(home, &provider, &format)
            }
            AuthCommands::Import {
                provider,
                env,
                token,
                refresh,
                file,
            } => commands::auth::import(home, &provider, env, token, refresh, file).await,
        },
        Commands::Local { command } => match command {
            LocalCommands::Create {
                name,
                agent,
                working_directory,
                env,
            } => commands::local::create(home, name, agent, working_directory, env).await,
            LocalCommands::List {
                status,
                agent,
                branch,
                json,
            } => commands::local::list(home, status, agent, branch, json).await,
            LocalCommands::Delete {
                names,
                force,
                all,
                interactive,
            } => commands::local::delete(home, names, force, all, interactive).await,
            LocalCommands::Run {
                sandbox,
                command,
                agent,
                streaming,
            } => commands::local::run(home, sandbox, command, agent, streaming).await,
        },
        Commands::Setup {
            agents,
            skip_prebuild,
            registry,
            upload,
        } => commands::setup_cmd::run(home, agents, skip_prebuild, registry, upload).await,
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            let name = command.get_name().to_string();
            clap_complete::generate(shell, &mut command, name, &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

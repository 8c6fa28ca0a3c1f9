use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use buildserver_core::{
    parse_dependencies, parse_properties, BuildListQuery, BuildServerClient, BuildServerError,
    ErrorKind, NewBuild, TransportConfig,
};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod output;

use output::{render_build, render_build_list, OutputFormat};

const DEFAULT_LOG_FILTER: &str = "teamcityctl=info,buildserver_core=info";
const DEFAULT_TIMEOUT_SECS: u64 = 5;
const LIST_TIMEOUT_SECS: u64 = 15;

#[derive(Parser)]
#[command(name = "teamcityctl", version, about = "Drive a TeamCity build server from the command line")]
struct Cli {
    /// TeamCity server URL
    #[arg(long, visible_alias = "serverURL", env = "TEAMCITY_SERVER")]
    server: String,

    /// Auth token to talk to the build server
    #[arg(long, env = "TEAMCITY_TOKEN", hide_env_values = true)]
    token: String,

    /// Skip TLS certificate verification
    #[arg(long)]
    insecure: bool,

    /// Request, dial and TLS handshake timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a build by adding it to the build queue
    StartBuild(StartBuildArgs),
    /// Get details of a build
    GetBuild(GetBuildArgs),
    /// List builds matching a query
    GetBuilds(GetBuildsArgs),
    /// Cancel a queued build that is not yet running or finished
    CancelBuild(StopArgs),
    /// Stop a running build
    StopBuild(StopArgs),
    /// Fetch an artifact file of a build
    FetchArtifact(FetchArtifactArgs),
}

#[derive(Args)]
struct StartBuildArgs {
    /// Build pipeline ID
    #[arg(long, visible_alias = "buildPipeline")]
    pipeline: String,

    /// Branch to build
    #[arg(long)]
    branch: String,

    /// Build parameter as KEY=VALUE, repeatable
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,

    /// Snapshot dependency as PIPELINE_ID=BUILD_ID, repeatable
    #[arg(long = "snapshot-dependency", value_name = "PIPELINE_ID=BUILD_ID")]
    snapshot_dependencies: Vec<String>,

    /// Artifact dependency as PIPELINE_ID=BUILD_ID, repeatable
    #[arg(long = "artifact-dependency", value_name = "PIPELINE_ID=BUILD_ID")]
    artifact_dependencies: Vec<String>,

    #[arg(long, default_value = "Build started by teamcityctl CLI")]
    comment: String,
}

#[derive(Args)]
struct GetBuildArgs {
    #[arg(long)]
    id: u64,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Args)]
struct GetBuildsArgs {
    /// Only builds of this pipeline
    #[arg(long)]
    pipeline: Option<String>,

    /// Only builds triggered by this user
    #[arg(long)]
    user: Option<String>,

    /// Only builds on this branch
    #[arg(long)]
    branch: Option<String>,

    /// Only builds with this status: SUCCESS, FAILURE or UNKNOWN
    #[arg(long)]
    status: Option<String>,

    /// Only running builds
    #[arg(long)]
    running: bool,

    /// Only cancelled builds
    #[arg(long)]
    cancelled: bool,

    /// Page number, starting at 1
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Builds per page
    #[arg(long, default_value_t = 100)]
    count: u32,

    #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
    format: OutputFormat,
}

#[derive(Args)]
struct StopArgs {
    #[arg(long)]
    id: u64,

    #[arg(long)]
    comment: Option<String>,
}

#[derive(Args)]
struct FetchArtifactArgs {
    #[arg(long)]
    id: u64,

    /// Artifact path relative to the build's artifacts directory
    #[arg(long)]
    path: String,

    /// Write the content to this file instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}

/// 2 for input the user can correct, 1 for everything else.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<BuildServerError>() {
        Some(e) if e.kind() == ErrorKind::InvalidArgument => 2,
        _ => 1,
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let timeout = match cli.command {
        Command::GetBuilds(_) => cli.timeout.max(LIST_TIMEOUT_SECS),
        _ => cli.timeout,
    };
    let config = TransportConfig::new(cli.server, cli.token)
        .with_timeouts(Duration::from_secs(timeout))
        .with_insecure(cli.insecure);
    let client = BuildServerClient::connect(&config)?;

    match cli.command {
        Command::StartBuild(args) => start_build(&client, args),
        Command::GetBuild(args) => {
            let details = client.get_build(args.id)?;
            print!("{}", render_build(&details, args.format)?);
            Ok(())
        }
        Command::GetBuilds(args) => {
            let query = list_query(&args)?;
            let list = client.list_builds(&query)?;
            print!("{}", render_build_list(&list, args.format)?);
            Ok(())
        }
        Command::CancelBuild(args) => {
            let comment = args
                .comment
                .unwrap_or_else(|| "Build cancelled by teamcityctl CLI".to_string());
            client.cancel_queued_build(args.id, Some(&comment))?;
            println!("Cancelled queued build {}", args.id);
            Ok(())
        }
        Command::StopBuild(args) => {
            let comment = args
                .comment
                .unwrap_or_else(|| "Build stopped by teamcityctl CLI".to_string());
            client.stop_build(args.id, Some(&comment))?;
            println!("Stopped build {}", args.id);
            Ok(())
        }
        Command::FetchArtifact(args) => fetch_artifact(&client, args),
    }
}

fn new_build(args: StartBuildArgs) -> anyhow::Result<NewBuild> {
    Ok(NewBuild::new(args.pipeline)
        .branch(args.branch)
        .comment(args.comment)
        .properties(parse_properties(&args.params)?)
        .snapshot_dependencies(parse_dependencies(&args.snapshot_dependencies)?)
        .artifact_dependencies(parse_dependencies(&args.artifact_dependencies)?))
}

fn start_build(client: &BuildServerClient, args: StartBuildArgs) -> anyhow::Result<()> {
    let input = new_build(args)?;
    let id = client.start_build(&input)?;
    println!("Started build with ID: {id}");
    Ok(())
}

fn list_query(args: &GetBuildsArgs) -> anyhow::Result<BuildListQuery> {
    let mut query = BuildListQuery::new()
        .running(args.running)
        .cancelled(args.cancelled)
        .with_page(args.page, args.count);
    if let Some(pipeline) = &args.pipeline {
        query = query.pipeline(pipeline);
    }
    if let Some(branch) = &args.branch {
        query = query.branch(branch);
    }
    if let Some(user) = &args.user {
        query = query.user(user);
    }
    if let Some(status) = &args.status {
        query = query.status(status)?;
    }
    Ok(query)
}

fn fetch_artifact(client: &BuildServerClient, args: FetchArtifactArgs) -> anyhow::Result<()> {
    let artifact = client.get_artifact_text_file(&args.path, args.id)?;
    info!(
        id = args.id,
        path = %args.path,
        bytes = artifact.content.len(),
        content_type = artifact.content_type.as_deref().unwrap_or("-"),
        "fetched artifact"
    );
    match args.output {
        Some(file) => fs::write(&file, &artifact.content)
            .with_context(|| format!("failed to write {}", file.display()))?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&artifact.content)?;
            stdout.flush()?;
        }
    }
    Ok(())
}

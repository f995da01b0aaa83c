use anyhow::{Context, Result};
use deploy_builder::cli::{Args, BuildConfig, ConfigDiscovery, ExecutionMode};
use deploy_builder::container::{EngineCall, MemoryEngine, OutputSink};
use deploy_builder::{BuildSystem, load_build_options};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("deploy_builder=info")),
        )
        .init();

    let args = Args::parse();
    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    match mode {
        ExecutionMode::Build(config) => run_build(config).await,
        ExecutionMode::ShowConfig => {
            ConfigDiscovery::show_discovery_info();
            Ok(())
        }
        ExecutionMode::InitConfig => {
            let path = ConfigDiscovery::create_default_user_config()?;
            println!("Configuration file: {:?}", path);
            Ok(())
        }
    }
}

async fn run_build(config: BuildConfig) -> Result<()> {
    info!("Building {} with sources {:?}", config.app, config.source);

    let builder_config = ConfigDiscovery::discover_config(config.config_override.as_deref())
        .context("Failed to load configuration")?;
    if config.verbose {
        println!("Container engine: {:?}", builder_config.docker);
        println!("Action limit: {:?}", builder_config.limit);
        println!("Deploy: {:?}", builder_config.deploy);
    }

    let options = load_build_options(&config.source, config.tag.clone(), config.dockerfile).await?;
    let log = OutputSink::stdout();

    if config.dry_run {
        println!("Dry run mode - engine calls are recorded, nothing is executed");
        let engine = Arc::new(MemoryEngine::new());
        let system = BuildSystem::new(builder_config, engine.clone())?;
        let result = system.build(&config.app, options, &log).await;

        println!("Engine calls:");
        for call in engine.calls() {
            println!("  {}", describe(&call));
        }
        return report(result);
    }

    let system = BuildSystem::connect(builder_config).await?;
    report(system.build(&config.app, options, &log).await)
}

fn report(result: Result<String, deploy_builder::BuildError>) -> Result<()> {
    match result {
        Ok(image) => {
            info!("Build finished: {}", image);
            println!("{}", image);
            Ok(())
        }
        Err(e) => {
            error!("Build failed: {}", e);
            Err(e.into())
        }
    }
}

fn describe(call: &EngineCall) -> String {
    match call {
        EngineCall::Create(spec) => match &spec.cmd {
            Some(cmd) => format!("create {} -> {}", spec.image, cmd.join(" ")),
            None => format!("create {}", spec.image),
        },
        EngineCall::Attach(id) => format!("attach {}", id),
        EngineCall::Start(id) => format!("start {}", id),
        EngineCall::Remove { id, force } => format!("remove {} (force: {})", id, force),
        EngineCall::Commit(spec) => {
            format!("commit {} as {}:{}", spec.container, spec.repository, spec.tag)
        }
        EngineCall::Download { id, path } => format!("download {}:{}", id, path),
        EngineCall::Upload { id, path, size } => format!("upload {} bytes to {}:{}", size, id, path),
        EngineCall::Tag {
            image,
            repository,
            tag,
        } => format!("tag {} as {}:{}", image, repository, tag),
    }
}

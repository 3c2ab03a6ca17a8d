use std::error::Error;

use clap::Parser;

use recipefetch::{
    cli::args::{CliArgs, Command},
    config::RecipefetchConfig,
    LockMode, Recipefetch,
};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // The whole run is one cancellable unit: on interrupt every partially
    // built graph and store is dropped.
    let code = tokio::select! {
        result = run() => match result {
            Ok(()) => 0,
            Err(error) => {
                log::error!("{}", error);
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, discarding partial resolution state");
            130
        }
    };
    std::process::exit(code);
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli_args: CliArgs = CliArgs::parse();
    let config = RecipefetchConfig::load()?;

    let mut builder = Recipefetch::builder()
        .manifest_file_name(&cli_args.manifest_location)
        .closure_file_name(&cli_args.closure_location);

    if let Some(cache_directory) = cli_args.cache_directory.or(config.cache_dir) {
        builder = builder.cache_directory(cache_directory);
    }
    if let Some(protocol) = config.default_protocol {
        builder = builder.default_protocol(protocol);
    }

    let recipefetch = builder.try_build()?;

    match cli_args.cmd {
        Command::Fetch { locked, relock } => {
            recipefetch.fetch(lock_mode(locked, relock)).await?;
        }
        Command::Resolve { locked, relock } => {
            recipefetch.resolve(lock_mode(locked, relock)).await?;
        }
        Command::Plan => recipefetch.plan().await?,
        Command::Init { name } => recipefetch.init(name)?,
        Command::Clean => recipefetch.clean()?,
        Command::ClearCache => recipefetch.clear_cache()?,
    }

    Ok(())
}

fn lock_mode(locked: bool, relock: bool) -> LockMode {
    if locked {
        LockMode::Locked
    } else if relock {
        LockMode::Recreate
    } else {
        LockMode::Update
    }
}

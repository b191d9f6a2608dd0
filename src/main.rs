use std::path::Path;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use esi_cluster::cli::{
    context_add, context_current, context_delete, context_list, context_use,
    format_cluster_list, format_cluster_report, format_context_list, format_current_context,
    format_install_outcome, format_install_undeploy, format_undeploy_report,
    format_validation_result, list_clusters, openshift_orchestrate, openshift_undeploy,
    orchestrate_cluster, report_failures, services_from_config, undeploy_cluster,
    validate_cluster_file, Cli, CommandError, Commands, ContextAction, OpenshiftAction,
};
use esi_cluster::config::install::api_token_from_env;
use esi_cluster::context::{
    default_config_path, expand_path, load_config_from, save_config_to, Context,
};
use esi_cluster::installer::AssistedInstallerClient;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = cli.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping at the next status check");
            let _ = shutdown_tx.send(true);
        }
    });

    if let Err(e) = run(cli, shutdown_rx).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(cli: Cli, shutdown: watch::Receiver<bool>) -> Result<()> {
    let config_path = cli
        .config
        .as_deref()
        .map(|p| expand_path(&p.to_string_lossy()))
        .unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Context(args) => handle_context(args.action, &config_path)?,

        Commands::Validate(args) => {
            let result = validate_cluster_file(&args.file);
            print!(
                "{}",
                format_validation_result(&result, &args.file.display().to_string())
            );
            if !result.valid {
                bail!("{} is invalid", args.file.display());
            }
        }

        Commands::Orchestrate(args) => {
            let services = services_from_config(&load_config_from(&config_path)?)?;
            let report = orchestrate_cluster(&services, &args.file, args.concurrency).await?;
            print!("{}", format_cluster_report(&report));
            report_failures(&report)?;
        }

        Commands::Undeploy(args) => {
            let services = services_from_config(&load_config_from(&config_path)?)?;
            let report = undeploy_cluster(&services, &args.cluster_id).await?;
            print!("{}", format_undeploy_report(&report));
        }

        Commands::List => {
            let services = services_from_config(&load_config_from(&config_path)?)?;
            let clusters = list_clusters(&services).await?;
            print!("{}", format_cluster_list(&clusters));
        }

        Commands::Openshift(args) => {
            let services = services_from_config(&load_config_from(&config_path)?)?;
            match args.action {
                OpenshiftAction::Orchestrate(args) => {
                    let api = Arc::new(AssistedInstallerClient::new(api_token_from_env()));
                    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
                    let printer = tokio::spawn(async move {
                        while let Some(event) = events_rx.recv().await {
                            println!("{}", event);
                        }
                    });

                    let result =
                        openshift_orchestrate(services, api, &args, shutdown, events_tx).await;
                    let _ = printer.await;

                    match result {
                        Ok(outcome) => print!("{}", format_install_outcome(&outcome)),
                        Err(e) => {
                            if let CommandError::Installer(ref err) = e {
                                if let Some(text) = err.diagnostic() {
                                    print!("{}", text);
                                }
                            }
                            return Err(e.into());
                        }
                    }
                }
                OpenshiftAction::Undeploy { file } => {
                    let report = openshift_undeploy(&services, &file).await?;
                    print!("{}", format_install_undeploy(&report));
                }
            }
        }
    }
    Ok(())
}

fn handle_context(action: ContextAction, path: &Path) -> Result<()> {
    let mut config = load_config_from(path)?;

    match action {
        ContextAction::List => print!("{}", format_context_list(&context_list(&config))),

        ContextAction::Current => {
            let (name, url) = context_current(&config)?;
            print!("{}", format_current_context(&name, &url));
        }

        ContextAction::Use { name } => {
            context_use(&mut config, &name)?;
            save_config_to(&config, path)?;
            println!("Switched to context \"{}\"", name);
        }

        ContextAction::Add {
            name,
            baremetal_url,
            network_url,
            image_url,
            token,
            description,
        } => {
            let mut ctx = Context::new(name.clone(), baremetal_url, network_url, image_url);
            if let Some(token) = token {
                ctx = ctx.with_token(token);
            }
            if let Some(description) = description {
                ctx = ctx.with_description(description);
            }
            context_add(&mut config, ctx)?;
            save_config_to(&config, path)?;
            println!("Context \"{}\" added", name);
        }

        ContextAction::Delete { name } => {
            if !context_delete(&mut config, &name)? {
                bail!("Context '{}' not found", name);
            }
            save_config_to(&config, path)?;
            println!("Context \"{}\" deleted", name);
        }
    }
    Ok(())
}

//! assist binary entry point

use std::io::{self, Write};

use assist_rs::{
    cli::{Cli, Commands, RequestArgs},
    config::Config,
    services::{
        api::{ServiceClient, ServiceReply},
        http::{handler_fn, CancellableOperation, FetchClient, FetchOutput, RequestOptions, StreamHandler},
        streaming::StreamItem,
    },
};
use color_eyre::Result;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Install error handler
    color_eyre::install()?;
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("assist_rs=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let mut config = Config::load()?;
    if let Some(base_url) = cli.base_url {
        config.settings.base_url = Some(base_url);
    }

    // Handle commands
    match cli.command {
        Some(Commands::Fetch { url, request }) => {
            let client = FetchClient::new(&config)?;
            let output = until_interrupted(client.execute(&url, build_options(&request)?)).await?;
            print_output(output).await?;
        }
        Some(Commands::Call { path, request, raw }) => {
            let client = ServiceClient::from_config(&config)?;
            let options = build_options(&request)?;
            let operation = if raw {
                client.call_raw(&path, options)
            } else {
                client.call(&path, options)
            };
            match until_interrupted(operation).await? {
                ServiceReply::Streamed(summary) => {
                    debug!(last_event_id = ?summary.state.last_event_id, "stream finished");
                }
                ServiceReply::Data(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            }
        }
        Some(Commands::Config) => {
            println!("# global:  {}", Config::global_config_path().display());
            println!("# project: {}", Config::project_config_path().display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Some(Commands::Version) => {
            println!("assist version {}", env!("CARGO_PKG_VERSION"));
        }
        None => {
            println!("Use --help for more information");
        }
    }

    Ok(())
}

fn build_options(args: &RequestArgs) -> assist_rs::Result<RequestOptions> {
    let options = args.to_options()?;
    Ok(match args.message_type() {
        Some(message_type) => options.stream_as(message_type, print_handler()),
        None => options,
    })
}

/// Prints messages as they arrive
fn print_handler() -> impl StreamHandler + 'static {
    handler_fn(|item| match item {
        StreamItem::Event(message) if message.event.is_empty() => println!("{}", message.data),
        StreamItem::Event(message) => println!("{}: {}", message.event, message.data),
        StreamItem::Text(text) => {
            print!("{text}");
            io::stdout().flush().ok();
        }
    })
}

/// Await `operation`, cancelling it on Ctrl-C
async fn until_interrupted<T>(mut operation: CancellableOperation<T>) -> assist_rs::Result<T> {
    tokio::select! {
        result = &mut operation => result,
        _ = tokio::signal::ctrl_c() => {
            operation.cancel_with("interrupted");
            operation.await
        }
    }
}

async fn print_output(output: FetchOutput) -> Result<()> {
    match output {
        FetchOutput::Json(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        FetchOutput::Response(response) => {
            eprintln!("{}", response.status());
            println!("{}", response.text().await?);
        }
        FetchOutput::Streamed(summary) => {
            println!();
            debug!(
                status = %summary.head.status,
                last_event_id = ?summary.state.last_event_id,
                retry_ms = summary.state.retry.as_millis(),
                "stream finished"
            );
        }
    }
    Ok(())
}

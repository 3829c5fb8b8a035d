use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use datarows::execution::row_source::for_each_row;
use datarows::{
    BoxedRowSource, DataProvider, ProgressSink, ProviderRegistry, Row, RowLimit, Settings,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "datarows")]
#[command(version, about = "Preview and import rows from data providers", long_about = None)]
struct Cli {
    /// Settings file (TOML). `DATAROWS__*` environment variables take precedence.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the registered providers
    Providers,
    /// Show the effective properties of a provider
    Properties(ProviderArgs),
    /// Check whether the provider's source can be reached
    Check(ProviderArgs),
    /// Validate the provider's configuration
    Validate(ProviderArgs),
    /// Print the first rows
    Preview {
        #[command(flatten)]
        provider: ProviderArgs,

        /// Maximum number of rows; negative for no limit
        #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
        limit: i64,
    },
    /// Stream every row, reporting progress
    Import(ProviderArgs),
}

#[derive(Args)]
struct ProviderArgs {
    /// Provider name, see `datarows providers`
    provider: String,

    /// Property override. May be repeated.
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    overrides: Vec<(String, String)>,
}

fn parse_assignment(arg: &str) -> Result<(String, String), String> {
    arg.split_once('=')
        .map(|(name, value)| (name.trim().to_string(), value.to_string()))
        .ok_or_else(|| format!("expected NAME=VALUE, got `{arg}`"))
}

fn build_provider(
    registry: &ProviderRegistry,
    settings: &Settings,
    args: &ProviderArgs,
) -> anyhow::Result<Arc<dyn DataProvider>> {
    let mut properties = registry.configured_properties(&args.provider, settings)?;
    properties
        .apply_strings(args.overrides.iter().map(|(name, value)| (name, value)))
        .with_context(|| format!("configuring `{}`", args.provider))?;
    Ok(registry.build(&args.provider, properties)?)
}

fn format_row(row: &Row) -> String {
    row.values()
        .iter()
        .map(|v| v.as_deref().unwrap_or("\\N"))
        .collect::<Vec<_>>()
        .join("\t")
}

/// Prints the header line, then every row. Always closes `rows`.
async fn print_rows(mut rows: BoxedRowSource, bar: Option<&ProgressBar>) -> anyhow::Result<u64> {
    let headers = match rows.headers().await {
        Ok(headers) => headers,
        Err(err) => {
            rows.close().await;
            return Err(err.into());
        }
    };
    let print = |line: String| match bar {
        Some(bar) => bar.suspend(|| println!("{line}")),
        None => println!("{line}"),
    };
    print(headers.join("\t"));
    let count = for_each_row(rows, |row| {
        print(format_row(&row));
        Ok(())
    })
    .await?;
    Ok(count)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let registry = ProviderRegistry::with_builtin_factories(&settings)?;

    match &cli.command {
        Command::Providers => {
            for factory in registry.factories() {
                println!("{}\t{}", factory.name(), factory.display_name());
            }
        }
        Command::Properties(args) => {
            let provider = build_provider(&registry, &settings, args)?;
            print!("{}", provider.properties().describe());
        }
        Command::Check(args) => {
            let provider = build_provider(&registry, &settings, args)?;
            if !provider.check_availability().await {
                println!("{} is not available", args.provider);
                return Ok(ExitCode::FAILURE);
            }
            println!("{} is available", args.provider);
        }
        Command::Validate(args) => {
            let provider = build_provider(&registry, &settings, args)?;
            let errors = provider.validate().await;
            if !errors.is_empty() {
                for error in &errors {
                    println!("{error}");
                }
                return Ok(ExitCode::FAILURE);
            }
            println!("Configuration of {} is valid", args.provider);
        }
        Command::Preview { provider, limit } => {
            let source = build_provider(&registry, &settings, provider)?
                .preview_rows(RowLimit::from_i64(*limit))
                .await?;
            print_rows(source, None).await?;
        }
        Command::Import(args) => {
            let provider = build_provider(&registry, &settings, args)?;
            let bar = ProgressBar::new(100);
            bar.set_style(ProgressStyle::with_template("{bar:40} {pos:>3}%")?);
            let sink: Arc<dyn ProgressSink> = Arc::new(bar.clone());
            let source = provider.import_rows(Some(sink)).await?;
            let count = print_rows(source, Some(&bar)).await?;
            bar.finish_and_clear();
            info!("Imported {count} rows from {}", args.provider);
        }
    }
    Ok(ExitCode::SUCCESS)
}

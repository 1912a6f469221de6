use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use esgf_downloader::app::{Action, App, RunOptions, RunResult};
use esgf_downloader::auth::{Credentials, Session};
use esgf_downloader::cancel::CancellationToken;
use esgf_downloader::catalog::EsgfSearchClient;
use esgf_downloader::config::{ConfigLoader, ConfigOverrides};
use esgf_downloader::download::HttpTransport;
use esgf_downloader::error::EsgfError;
use esgf_downloader::output::{JsonOutput, LogSink, OutputMode};
use esgf_downloader::tui::Tui;

const INTERRUPTED_EXIT: u8 = 130;

#[derive(Parser)]
#[command(name = "esgf-dl")]
#[command(about = "Batch downloader for CMIP climate model output published on ESGF")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Resolve and download every configured dataset")]
    Fetch(FetchArgs),
}

#[derive(Args, Clone, Default)]
struct FetchArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    max_workers: Option<usize>,

    #[arg(long)]
    extensions_2300: bool,

    #[arg(long)]
    data_home: Option<Utf8PathBuf>,

    #[arg(long)]
    dry_run: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::from(INTERRUPTED_EXIT),
        Ok(false) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<EsgfError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &EsgfError) -> u8 {
    match error {
        EsgfError::MissingConfig
        | EsgfError::ConfigRead(_)
        | EsgfError::ConfigParse(_)
        | EsgfError::InvalidConfig(_)
        | EsgfError::MissingTableId(_)
        | EsgfError::MissingCredentials
        | EsgfError::InvalidIdentityHost(_) => 2,
        EsgfError::SearchHttp(_)
        | EsgfError::SearchStatus { .. }
        | EsgfError::SearchResponse(_)
        | EsgfError::TransferHttp(_)
        | EsgfError::TransferStatus { .. } => 3,
        _ => 1,
    }
}

/// Returns whether the run was interrupted by the operator.
fn run() -> miette::Result<bool> {
    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let filter = match output_mode {
        OutputMode::NonInteractive => {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
        }
        OutputMode::Interactive => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = match cli.command {
        Some(Commands::Fetch(args)) => args,
        None => FetchArgs::default(),
    };
    run_fetch(args, output_mode)
}

fn run_fetch(args: FetchArgs, output_mode: OutputMode) -> miette::Result<bool> {
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    config.apply(&ConfigOverrides {
        max_workers: args.max_workers,
        extensions_2300: args.extensions_2300,
        data_home: args.data_home.clone(),
    })?;

    let credentials = Credentials::from_env()?;
    let mut session = Session::establish(credentials, &config.myproxy_host)?;
    if let Some(node) = &config.data_node_preference {
        session = session.trust(node)?;
    }

    let catalog = EsgfSearchClient::new(&config.search_node)?;
    let transport = HttpTransport::new(session)?;
    let token = CancellationToken::new();
    let app = App::new(catalog, transport, token.clone());
    let options = RunOptions {
        dry_run: args.dry_run,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let handler_token = token.clone();
            ctrlc::set_handler(move || handler_token.cancel()).into_diagnostic()?;
            let result = app.run(&config, options, &LogSink)?;
            JsonOutput::print_run(&result).into_diagnostic()?;
            Ok(result.interrupted)
        }
        OutputMode::Interactive => {
            let mut tui = Tui::new(token);
            let result = tui.run(move |sink| app.run(&config, options, sink))?;
            print_run_summary(&result);
            Ok(result.interrupted)
        }
    }
}

fn print_run_summary(result: &RunResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    let count = |action: Action| result.items.iter().filter(|i| i.action == action).count();
    println!("{cyan}ESGF-DL summary{reset}");
    println!(
        "{green}downloaded: {}  already present: {}{reset}",
        count(Action::Downloaded),
        count(Action::Exists)
    );
    println!(
        "{yellow}not found: {}  no extension: {}  empty: {}{reset}",
        count(Action::NotFound),
        count(Action::NoExtension),
        count(Action::Empty)
    );

    for item in &result.items {
        let color = match item.action {
            Action::Downloaded | Action::Exists | Action::Planned => green,
            Action::Error | Action::Interrupted => red,
            _ => yellow,
        };
        let target = item.dataset_id.as_deref().unwrap_or("-");
        println!(
            "{color}{:?} {}, {}, {}: {target}{reset}",
            item.action, item.scenario, item.model, item.variable
        );
        if let Some(report) = &item.report {
            for failure in &report.failures {
                println!("{red}   {} {}{reset}", failure.filename, failure.detail);
            }
        }
        if let Some(error) = &item.error {
            println!("{red}   {error}{reset}");
        }
    }

    if result.interrupted {
        println!("{red}interrupted; partially downloaded files were removed{reset}");
    }
}

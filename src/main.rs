use clap::Parser;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();

    let cli = fda_events::cli::Cli::parse();
    let config = fda_events::config::Config::load();
    match fda_events::cli::run(cli, &config).await {
        Ok(output) => {
            println!("{}", output.text.trim_end_matches('\n'));
            if output.success {
                std::process::ExitCode::SUCCESS
            } else {
                std::process::ExitCode::from(1)
            }
        }
        Err(err) => {
            if let Some(fda_err) = err.downcast_ref::<fda_events::error::FdaError>() {
                eprintln!("Error: {fda_err}");
            } else {
                eprintln!("Error: {err}");
            }
            std::process::ExitCode::from(1)
        }
    }
}

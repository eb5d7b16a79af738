use std::env;

use clap::Parser;
use nestegg::api::Cli;

const USAGE: &str = "Usage:\n  nestegg serve [port]\n  nestegg run [--flags]   (see `nestegg run --help`)";

#[tokio::main]
async fn main() {
    nestegg::telemetry::init_tracing();

    let raw_args: Vec<String> = env::args().collect();
    match raw_args.get(1).map(|s| s.as_str()) {
        Some("serve") => {
            let port = raw_args
                .get(2)
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or(8080);
            if let Err(e) = nestegg::api::run_http_server(port).await {
                eprintln!("Server error: {e}");
                std::process::exit(1);
            }
        }
        Some("run") => {
            let cli = Cli::parse_from(raw_args.iter().skip(1));
            match nestegg::api::run_cli(cli) {
                Ok(report) => println!("{report}"),
                Err(e) => {
                    eprintln!("Error: {e}");
                    std::process::exit(2);
                }
            }
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(1);
        }
    }
}

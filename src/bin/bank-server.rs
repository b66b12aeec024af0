//! Bank server binary.
//!
//! Usage: `bank-server <offices> <admin_password>`
//!
//! Runs until an admin shutdown request completes the drain protocol. Log
//! verbosity follows `RUST_LOG` (default `info`).

use securebank::config::ServerConfig;
use securebank::BankServer;
use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("usage: bank-server <offices> <admin_password>");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> securebank::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [offices, admin_password] = args.as_slice() else {
        usage();
    };
    let Ok(offices) = offices.parse::<usize>() else {
        usage();
    };

    let config = ServerConfig::new(offices, admin_password.clone());
    let server = match BankServer::bootstrap(config).await {
        Ok(server) => server,
        Err(e) => {
            eprintln!("bank-server: {e}");
            std::process::exit(1);
        }
    };
    server.run().await
}

//! Startup banner and endpoint display

use super::config::AppConfig;
use super::constants::APP_NAME;

/// Print the startup banner with endpoints
pub fn print_banner(config: &AppConfig) {
    let display_host = display_host(&config.server.host);
    // Label width: "OTLP gRPC receiver:" is 19 chars, pad to 21 for alignment
    const W: usize = 21;

    println!();
    println!(
        "  \x1b[1m\x1b[36m{}\x1b[0m \x1b[90mv{}\x1b[0m",
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    );
    println!();
    println!(
        "  \x1b[32m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m http://{}:{}/api/v1",
        "HTTP API:", display_host, config.server.port
    );

    if config.receiver.enabled {
        println!(
            "  \x1b[33m➜\x1b[0m  \x1b[1m{:<W$}\x1b[0m {}:{}",
            "OTLP gRPC receiver:", config.server.host, config.receiver.port
        );
    } else {
        println!(
            "  \x1b[90m➜  {:<W$} disabled (--receiver true to enable)\x1b[0m",
            "OTLP gRPC receiver:"
        );
    }

    println!(
        "  \x1b[90m➜  {:<W$} expiry {}ms, root expiry {}ms, tick {}ms\x1b[0m",
        "Trace store:", config.store.expiry_ms, config.store.root_expiry_ms, config.store.tick_ms
    );
    println!();
}

/// Use localhost for display when binding to all interfaces
fn display_host(host: &str) -> &str {
    if host == "0.0.0.0" || host == "::" {
        "localhost"
    } else {
        host
    }
}

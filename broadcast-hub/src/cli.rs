use std::{net::IpAddr, time::Duration};

use clap::{Args, Parser, builder::RangedU64ValueParser};

use crate::{
    hub::MIN_QUEUE_CAPACITY,
    server::{DEFAULT_QUEUE_CAPACITY, ServerConfig},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long)]
    pub debug: bool,

    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Address the server should bind to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: IpAddr,

    /// Port to listen on. Use 0 for an ephemeral port.
    #[arg(long, default_value_t = 5000)]
    pub port: u16,

    /// Origin allowed to make cross-origin requests. Repeat for several;
    /// omit (or pass `*`) to accept any origin.
    #[arg(long = "allowed-origin", value_name = "ORIGIN")]
    pub allowed_origins: Vec<String>,

    /// Messages buffered per client before further ones are dropped.
    #[arg(
        long,
        default_value_t = DEFAULT_QUEUE_CAPACITY,
        value_parser = RangedU64ValueParser::<usize>::new().range(MIN_QUEUE_CAPACITY as u64..),
    )]
    pub queue_capacity: usize,

    /// Milliseconds between periodic updates.
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    pub update_interval_ms: u64,
}

impl From<ServeArgs> for ServerConfig {
    fn from(args: ServeArgs) -> Self {
        Self {
            listen: (args.host, args.port).into(),
            allowed_origins: args.allowed_origins,
            queue_capacity: args.queue_capacity,
            update_interval: Duration::from_millis(args.update_interval_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_surface() {
        let cli = Cli::parse_from(["broadcast-hub"]);
        assert!(!cli.debug);

        let config = ServerConfig::from(cli.serve);
        assert_eq!(config.listen.to_string(), "127.0.0.1:5000");
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
        assert_eq!(config.update_interval, Duration::from_secs(1));
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::parse_from([
            "broadcast-hub",
            "--debug",
            "--host",
            "0.0.0.0",
            "--port",
            "0",
            "--allowed-origin",
            "http://localhost:3000",
            "--allowed-origin",
            "https://example.com",
        ]);
        assert!(cli.debug);

        let config = ServerConfig::from(cli.serve);
        assert_eq!(config.listen.port(), 0);
        assert_eq!(
            config.allowed_origins,
            vec!["http://localhost:3000", "https://example.com"]
        );
    }

    #[test]
    fn rejects_zero_update_interval() {
        let result = Cli::try_parse_from(["broadcast-hub", "--update-interval-ms", "0"]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_queue_too_small_for_welcome_and_join() {
        for capacity in ["0", "1"] {
            let result = Cli::try_parse_from(["broadcast-hub", "--queue-capacity", capacity]);
            assert!(result.is_err(), "capacity {capacity} accepted");
        }
        let cli = Cli::try_parse_from(["broadcast-hub", "--queue-capacity", "2"])
            .expect("two slots is enough");
        assert_eq!(cli.serve.queue_capacity, MIN_QUEUE_CAPACITY);
    }
}

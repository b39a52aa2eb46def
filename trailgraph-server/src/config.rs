//! Command line and environment configuration

use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings for the server and its flush worker
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub bind: SocketAddr,
    pub private_key: PathBuf,
    pub public_key: PathBuf,
    /// Lifetime of identity tokens and their signing secrets
    pub token_ttl: Duration,
    pub session_ttl: Duration,
    pub flush_interval: Duration,
    pub flush_timeout: Duration,
    pub request_timeout: Duration,
    pub log_json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            data_dir: PathBuf::from("./data"),
            bind: SocketAddr::from(([127, 0, 0, 1], 3100)),
            private_key: PathBuf::from("private.pem"),
            public_key: PathBuf::from("public.pem"),
            token_ttl: Duration::from_secs(24 * 60 * 60),
            session_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            flush_interval: Duration::from_secs(10),
            flush_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(5),
            log_json: false,
        }
    }
}

impl ServerConfig {
    /// Read settings parsed by [`command`]
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let defaults = ServerConfig::default();
        let secs = |name: &str, default: Duration| {
            matches
                .get_one::<u64>(name)
                .map(|s| Duration::from_secs(*s))
                .unwrap_or(default)
        };

        ServerConfig {
            data_dir: matches
                .get_one::<PathBuf>("data-dir")
                .cloned()
                .unwrap_or(defaults.data_dir),
            bind: matches
                .get_one::<SocketAddr>("bind")
                .copied()
                .unwrap_or(defaults.bind),
            private_key: matches
                .get_one::<PathBuf>("private-key")
                .cloned()
                .unwrap_or(defaults.private_key),
            public_key: matches
                .get_one::<PathBuf>("public-key")
                .cloned()
                .unwrap_or(defaults.public_key),
            token_ttl: secs("token-ttl-secs", defaults.token_ttl),
            session_ttl: secs("session-ttl-secs", defaults.session_ttl),
            flush_interval: secs("flush-interval-secs", defaults.flush_interval),
            flush_timeout: secs("flush-timeout-secs", defaults.flush_timeout),
            request_timeout: secs("request-timeout-secs", defaults.request_timeout),
            log_json: matches.get_flag("log-json"),
        }
    }
}

fn seconds_arg(name: &'static str, env: &'static str, default: &'static str, help: &'static str) -> Arg {
    Arg::new(name)
        .long(name)
        .env(env)
        .value_name("SECS")
        .value_parser(value_parser!(u64).range(1..))
        .default_value(default)
        .help(help)
}

/// Command line definition: `serve` flags at the top level, plus `keygen`
pub fn command() -> Command {
    Command::new("trailgraph-server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Authenticated activity ingestion into a social graph")
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .env("TRAILGRAPH_DATA_DIR")
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .default_value("./data")
                .help("Data directory path"),
        )
        .arg(
            Arg::new("bind")
                .long("bind")
                .env("TRAILGRAPH_BIND")
                .value_name("ADDR")
                .value_parser(value_parser!(SocketAddr))
                .default_value("127.0.0.1:3100")
                .help("Bind address"),
        )
        .arg(
            Arg::new("private-key")
                .long("private-key")
                .env("TRAILGRAPH_PRIVATE_KEY")
                .value_name("PEM")
                .value_parser(value_parser!(PathBuf))
                .default_value("private.pem")
                .help("Ed25519 private key used to sign identity tokens"),
        )
        .arg(
            Arg::new("public-key")
                .long("public-key")
                .env("TRAILGRAPH_PUBLIC_KEY")
                .value_name("PEM")
                .value_parser(value_parser!(PathBuf))
                .default_value("public.pem")
                .help("Ed25519 public key used to verify identity tokens"),
        )
        .arg(seconds_arg(
            "token-ttl-secs",
            "TRAILGRAPH_TOKEN_TTL_SECS",
            "86400",
            "Identity token and signing secret lifetime",
        ))
        .arg(seconds_arg(
            "session-ttl-secs",
            "TRAILGRAPH_SESSION_TTL_SECS",
            "604800",
            "Browser session lifetime",
        ))
        .arg(seconds_arg(
            "flush-interval-secs",
            "TRAILGRAPH_FLUSH_INTERVAL_SECS",
            "10",
            "Interval between buffer flushes",
        ))
        .arg(seconds_arg(
            "flush-timeout-secs",
            "TRAILGRAPH_FLUSH_TIMEOUT_SECS",
            "15",
            "Deadline for one flush batch",
        ))
        .arg(seconds_arg(
            "request-timeout-secs",
            "TRAILGRAPH_REQUEST_TIMEOUT_SECS",
            "5",
            "Deadline for store calls made by a request",
        ))
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .env("TRAILGRAPH_LOG_JSON")
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .subcommand(
            Command::new("keygen")
                .about("Generate an Ed25519 key pair for token signing")
                .arg(
                    Arg::new("out-dir")
                        .long("out-dir")
                        .value_name("DIR")
                        .value_parser(value_parser!(PathBuf))
                        .default_value(".")
                        .help("Directory receiving private.pem and public.pem"),
                ),
        )
}

//! Command-line surface

use bridgeup_client::DEFAULT_STUN_SERVER;
use bridgeup_proto::{ConnType, DEFAULT_DISCONNECT_TIMEOUT_SECS};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{
    default_config_path, default_runtime_dir, local_hostname, BootstrapConfig, DEFAULT_LOCAL_PORT,
    DEFAULT_LOCAL_TYPE,
};
use crate::update::DEFAULT_RELEASES_URL;

/// Bridgeup - attach this machine to a bridge server
#[derive(Parser, Debug, Clone)]
#[command(name = "bridgeup")]
#[command(about = "Expose local services through a remote bridge server", long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Bridge server address (host:port)
    #[arg(long, env = "NPC_SERVER_ADDR")]
    pub server: Option<String>,

    /// Verify key identifying this agent
    #[arg(long, env = "NPC_SERVER_VKEY")]
    pub vkey: Option<String>,

    /// Agent configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Bridge transport (tcp, kcp)
    #[arg(long = "type", default_value = "tcp")]
    pub conn_type: ConnType,

    /// SOCKS5 proxy for bridge connections (socks5://[user:pass@]host:port)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Log level: a tracing filter (info, bridgeup=debug) or 0-7
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Log file used when --debug is false
    #[arg(long)]
    pub log_path: Option<PathBuf>,

    /// Local port of the secret/p2p server
    #[arg(long, default_value_t = DEFAULT_LOCAL_PORT)]
    pub local_port: u16,

    /// Secret/p2p password; selects the local server mode
    #[arg(long)]
    pub password: Option<String>,

    /// Secret/p2p target address
    #[arg(long)]
    pub target: Option<String>,

    /// Secret/p2p local server type (p2p, secret)
    #[arg(long, default_value = DEFAULT_LOCAL_TYPE)]
    pub local_type: String,

    /// Log to stdout (true) or to --log-path (false)
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub debug: bool,

    /// STUN server for the nat command
    #[arg(long, default_value = DEFAULT_STUN_SERVER)]
    pub stun_addr: String,

    /// Seconds without bridge traffic before the session is dropped
    #[arg(long, default_value_t = DEFAULT_DISCONNECT_TIMEOUT_SECS)]
    pub disconnect_timeout: u64,

    /// Comma separated local targets the bridge may open (empty allows all)
    #[arg(long)]
    pub allowed_targets: Option<String>,

    /// Register the verify key with the admin API, deriving one if empty
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub auto_add_client: bool,

    /// Delete the registered client on exit
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub del_client: bool,

    /// Admin API address (host:port)
    #[arg(long)]
    pub api: Option<String>,

    /// TCP tunnels, e.g. "8080->127.0.0.1:80,2222->127.0.0.1:22"
    #[arg(long)]
    pub tcp_tunnel: Option<String>,

    /// UDP tunnels, e.g. "5353->127.0.0.1:53"
    #[arg(long)]
    pub udp_tunnel: Option<String>,

    /// Validity of an ip registration in hours
    #[arg(long, default_value_t = 2)]
    pub time: u32,

    /// Serve debug endpoints on this address (ip:port)
    #[arg(long)]
    pub pprof: Option<String>,

    /// Release index queried by the update command
    #[arg(long, default_value = DEFAULT_RELEASES_URL, hide = true)]
    pub releases_url: String,

    /// Print version information
    #[arg(short = 'V', long)]
    pub version: bool,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Show the installed service and configured tunnels
    Status,
    /// Register this host's public IP with the bridge
    Register,
    /// Discover the public address via STUN
    Nat,
    /// Install as a system service
    Install,
    /// Start the installed service
    Start,
    /// Stop the installed service
    Stop,
    /// Restart the installed service
    Restart,
    /// Uninstall the system service
    Uninstall,
    /// Replace this binary with the latest release
    Update,
}

fn text(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

/// Tunnel descriptors stay byte-for-byte as given; they seed the derived key
fn raw(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

impl Cli {
    /// Build the immutable run configuration, resolving host facts
    pub fn bootstrap_config(&self) -> BootstrapConfig {
        BootstrapConfig {
            server_addr: text(&self.server),
            verify_key: text(&self.vkey),
            conn_type: self.conn_type,
            proxy_url: text(&self.proxy),
            api_addr: text(&self.api),
            config_path: self.config.clone(),
            tcp_tunnel: raw(&self.tcp_tunnel),
            udp_tunnel: raw(&self.udp_tunnel),
            auto_add_client: self.auto_add_client,
            delete_on_exit: self.del_client,
            disconnect_timeout: self.disconnect_timeout,
            allowed_targets: text(&self.allowed_targets),
            password: text(&self.password),
            target: text(&self.target),
            local_type: self.local_type.clone(),
            local_port: self.local_port,
            hostname: local_hostname(),
            default_config_path: default_config_path(),
            runtime_dir: default_runtime_dir(),
        }
    }

    /// Config file the `status` command reads
    pub fn status_config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_path)
    }

    /// Arguments the installed service runs with: this invocation's run
    /// flags followed by `--debug false`
    pub fn service_arguments(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: String| {
            args.push(format!("--{}", flag));
            args.push(value);
        };

        let optional = [
            ("server", &self.server),
            ("vkey", &self.vkey),
            ("proxy", &self.proxy),
            ("password", &self.password),
            ("target", &self.target),
            ("allowed-targets", &self.allowed_targets),
            ("api", &self.api),
            ("tcp-tunnel", &self.tcp_tunnel),
            ("udp-tunnel", &self.udp_tunnel),
            ("pprof", &self.pprof),
        ];
        for (flag, value) in optional {
            if let Some(value) = value.as_deref().filter(|v| !v.trim().is_empty()) {
                push(flag, value.to_string());
            }
        }

        if let Some(config) = &self.config {
            push("config", config.display().to_string());
        }
        if let Some(log_path) = &self.log_path {
            push("log-path", log_path.display().to_string());
        }
        if self.conn_type != ConnType::default() {
            push("type", self.conn_type.to_string());
        }
        if self.log_level != "info" {
            push("log-level", self.log_level.clone());
        }
        if self.local_port != DEFAULT_LOCAL_PORT {
            push("local-port", self.local_port.to_string());
        }
        if self.local_type != DEFAULT_LOCAL_TYPE {
            push("local-type", self.local_type.clone());
        }
        if self.disconnect_timeout != DEFAULT_DISCONNECT_TIMEOUT_SECS {
            push("disconnect-timeout", self.disconnect_timeout.to_string());
        }
        if !self.auto_add_client {
            push("auto-add-client", "false".to_string());
        }
        if !self.del_client {
            push("del-client", "false".to_string());
        }
        push("debug", "false".to_string());

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("bridgeup").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert!(cli.command.is_none());
        assert_eq!(cli.conn_type, ConnType::Tcp);
        assert_eq!(cli.local_port, 2000);
        assert_eq!(cli.disconnect_timeout, 60);
        assert_eq!(cli.time, 2);
        assert!(cli.debug);
        assert!(cli.auto_add_client);
        assert!(cli.del_client);
    }

    #[test]
    fn test_tunnel_descriptors_keep_padding() {
        let cli = parse(&["--api", "10.0.0.1:8080", "--tcp-tunnel", " 8080->127.0.0.1:80 "]);
        let config = cli.bootstrap_config();
        assert_eq!(config.tcp_tunnel, " 8080->127.0.0.1:80 ");
        assert_eq!(config.api_addr, "10.0.0.1:8080");

        let padded = crate::bootstrap::derive_verify_key("h", &config.tcp_tunnel, "");
        let trimmed = crate::bootstrap::derive_verify_key("h", "8080->127.0.0.1:80", "");
        assert_eq!(padded, format!("{:x}", md5::compute("h 8080->127.0.0.1:80 ")));
        assert_ne!(padded, trimmed);
    }

    #[test]
    fn test_update_and_pprof() {
        let cli = parse(&["--pprof", "127.0.0.1:6060", "update"]);
        assert_eq!(cli.command, Some(Command::Update));
        assert_eq!(cli.pprof.as_deref(), Some("127.0.0.1:6060"));
        assert_eq!(cli.releases_url, DEFAULT_RELEASES_URL);

        let args = cli.service_arguments();
        let at = args.iter().position(|arg| arg == "--pprof").unwrap();
        assert_eq!(args[at + 1], "127.0.0.1:6060");
    }

    #[test]
    fn test_boolean_flags_take_values() {
        let cli = parse(&["--debug", "false", "--del-client", "false"]);
        assert!(!cli.debug);
        assert!(!cli.del_client);
        assert!(cli.auto_add_client);
    }

    #[test]
    fn test_subcommand_after_flags() {
        let cli = parse(&["--server", "1.2.3.4:8024", "--vkey", "abc", "install"]);
        assert_eq!(cli.command, Some(Command::Install));
        assert_eq!(cli.server.as_deref(), Some("1.2.3.4:8024"));
    }

    #[test]
    fn test_kcp_transport() {
        let cli = parse(&["--type", "kcp"]);
        assert_eq!(cli.conn_type, ConnType::Kcp);
        assert!(Cli::try_parse_from(["bridgeup", "--type", "quic"]).is_err());
    }

    #[test]
    fn test_bootstrap_config_trims_values() {
        let cli = parse(&[
            "--server",
            " 1.2.3.4:8024 ",
            "--vkey",
            "abc",
            "--allowed-targets",
            "127.0.0.1:22",
            "--del-client",
            "false",
        ]);
        let config = cli.bootstrap_config();
        assert_eq!(config.server_addr, "1.2.3.4:8024");
        assert_eq!(config.verify_key, "abc");
        assert_eq!(config.allowed_targets, "127.0.0.1:22");
        assert!(!config.delete_on_exit);
        assert!(config.password.is_empty());
    }

    #[test]
    fn test_service_arguments() {
        let cli = parse(&[
            "--api",
            "10.0.0.1:8080",
            "--tcp-tunnel",
            "8080->127.0.0.1:80",
            "--disconnect-timeout",
            "30",
            "install",
        ]);
        assert_eq!(
            cli.service_arguments(),
            vec![
                "--api",
                "10.0.0.1:8080",
                "--tcp-tunnel",
                "8080->127.0.0.1:80",
                "--disconnect-timeout",
                "30",
                "--debug",
                "false",
            ]
        );
    }

    #[test]
    fn test_service_arguments_replace_debug() {
        let cli = parse(&["--debug", "true", "--vkey", "k"]);
        let args = cli.service_arguments();
        assert_eq!(args.iter().filter(|a| *a == "--debug").count(), 1);
        assert_eq!(args.last().map(String::as_str), Some("false"));
    }
}

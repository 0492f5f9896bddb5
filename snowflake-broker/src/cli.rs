use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use snowflake_core::broker::TlsMode;

#[derive(Parser)]
#[command(
    name = "snowflake-broker",
    about = "Snowflake signaling broker - matches clients with volunteer proxies",
    version = env!("CARGO_PKG_VERSION")
)]
pub struct Cli {
    /// Address to listen on
    #[arg(long, env = "BROKER_ADDR", default_value = "0.0.0.0:443")]
    pub addr: SocketAddr,

    /// ACME account email address
    #[arg(long, conflicts_with_all = ["cert", "key"])]
    pub acme_email: Option<String>,

    /// Comma-separated hostnames for ACME TLS provisioning
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["cert", "key"])]
    pub acme_hostnames: Vec<String>,

    /// Directory for the ACME certificate cache
    #[arg(long, default_value = "acme-cert-cache")]
    pub acme_cert_cache: PathBuf,

    /// TLS certificate file (PEM), used together with --key
    #[arg(long, requires = "key")]
    pub cert: Option<PathBuf>,

    /// TLS private key file (PEM), used together with --cert
    #[arg(long, requires = "cert")]
    pub key: Option<PathBuf>,

    /// Serve plain HTTP instead of TLS
    #[arg(long)]
    pub disable_tls: bool,

    /// Path of the IPv4 GeoIP database
    #[arg(long, default_value = "/usr/share/tor/geoip")]
    pub geoip_database: PathBuf,

    /// Path of the IPv6 GeoIP database
    #[arg(long, default_value = "/usr/share/tor/geoip6")]
    pub geoip6_database: PathBuf,

    /// Skip loading the GeoIP databases
    #[arg(long)]
    pub disable_geoip: bool,

    /// Path of the metrics log file, served on /metrics
    #[arg(long)]
    pub metrics_log: Option<PathBuf>,

    /// Log IP addresses unredacted
    #[arg(long)]
    pub unsafe_logging: bool,
}

impl Cli {
    /// Resolve the mutually exclusive TLS options.
    pub fn tls_mode(&self) -> anyhow::Result<TlsMode> {
        if !self.acme_hostnames.is_empty() {
            return Ok(TlsMode::Acme {
                hostnames: self.acme_hostnames.clone(),
                email: self.acme_email.clone(),
                cache_dir: self.acme_cert_cache.clone(),
            });
        }
        if let (Some(cert), Some(key)) = (&self.cert, &self.key) {
            return Ok(TlsMode::CertFiles {
                cert: cert.clone(),
                key: key.clone(),
            });
        }
        if self.disable_tls {
            return Ok(TlsMode::Disabled);
        }
        anyhow::bail!("one of --acme-hostnames, --cert and --key, or --disable-tls is required")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_mode_requires_a_choice() {
        let cli = Cli::parse_from(["snowflake-broker"]);
        assert!(cli.tls_mode().is_err());

        let cli = Cli::parse_from(["snowflake-broker", "--disable-tls"]);
        assert!(matches!(cli.tls_mode(), Ok(TlsMode::Disabled)));
    }

    #[test]
    fn acme_flags_conflict_with_cert_files() {
        let result = Cli::try_parse_from([
            "snowflake-broker",
            "--acme-hostnames",
            "broker.example.com",
            "--cert",
            "cert.pem",
            "--key",
            "key.pem",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn acme_hostnames_split_on_commas() {
        let cli = Cli::parse_from([
            "snowflake-broker",
            "--acme-hostnames",
            "a.example.com,b.example.com",
        ]);
        match cli.tls_mode() {
            Ok(TlsMode::Acme { hostnames, .. }) => {
                assert_eq!(hostnames, ["a.example.com", "b.example.com"]);
            }
            other => panic!("expected ACME mode, got {:?}", other.is_ok()),
        }
    }
}

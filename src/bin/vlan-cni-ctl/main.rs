use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use vlan_cni::config::{Installer, IpamConfig, NetConf, VlanCniConfig};

/// A command line tool to generate and install VLAN CNI configurations
#[derive(Parser)]
#[command(name = "vlan-cni-ctl", version, about)]
struct Cli {
    /// Path to the CNI config directory
    #[arg(long, default_value = "/etc/cni/net.d")]
    conf_dir: PathBuf,

    /// Path to the CNI bin directory
    #[arg(long, default_value = "/opt/cni/bin")]
    bin_dir: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a VLAN network configuration
    Generate {
        /// VLAN ID (0-4094)
        #[arg(long)]
        id: u16,

        /// Master interface
        #[arg(long)]
        master: String,

        /// Interface MTU
        #[arg(long)]
        mtu: Option<u32>,

        /// Network name
        #[arg(long, default_value = "vlan-network")]
        name: String,

        /// IPAM delegate type
        #[arg(long, default_value = "host-local")]
        ipam: String,

        /// IPAM subnet (CIDR notation)
        #[arg(long)]
        subnet: Option<String>,

        /// IPAM gateway
        #[arg(long)]
        gateway: Option<String>,

        /// Output file path; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Install a generated conflist under the CNI config directory
    Install {
        /// VLAN ID (0-4094)
        #[arg(long)]
        id: u16,

        /// Master interface
        #[arg(long)]
        master: String,

        /// Interface MTU
        #[arg(long)]
        mtu: Option<u32>,

        /// Network name
        #[arg(long, default_value = "vlan-network")]
        name: String,

        /// IPAM delegate type
        #[arg(long, default_value = "host-local")]
        ipam: String,

        /// IPAM subnet (CIDR notation)
        #[arg(long)]
        subnet: Option<String>,
    },
}

fn build_conf(
    name: &str,
    master: &str,
    id: u16,
    mtu: Option<u32>,
    ipam: &str,
    subnet: Option<String>,
    gateway: Option<String>,
) -> NetConf {
    let mut conf = NetConf::generate(name, master, id, mtu);
    conf.ipam = Some(IpamConfig {
        ipam_type: ipam.to_string(),
        subnet,
        gateway,
        routes: None,
    });
    conf
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        Commands::Generate {
            id,
            master,
            mtu,
            name,
            ipam,
            subnet,
            gateway,
            output,
        } => {
            let conf = build_conf(&name, &master, id, mtu, &ipam, subnet, gateway);
            match output {
                Some(path) => {
                    conf.save(path.clone())
                        .with_context(|| format!("failed to write {}", path.display()))?;
                    info!("wrote netconf to {}", path.display());
                }
                None => {
                    let json = serde_json::to_string_pretty(&conf)?;
                    println!("{json}");
                }
            }
        }
        Commands::Install {
            id,
            master,
            mtu,
            name,
            ipam,
            subnet,
        } => {
            let conf = build_conf(&name, &master, id, mtu, &ipam, subnet, None);
            let installer = Installer::new(VlanCniConfig {
                cni_bin_dir: cli.bin_dir,
                cni_conf_dir: cli.conf_dir,
                default_master: master,
                default_mtu: mtu,
            });
            let path = installer
                .install(&conf)
                .context("failed to install conflist")?;
            let written = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            info!("installed {} ({} bytes)", path.display(), written);
            println!("{}", path.display());
        }
    }

    Ok(())
}

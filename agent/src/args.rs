// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

pub use clap::Parser;
use clap::ValueEnum;
use overlay_backend::ipsec::{
    DEFAULT_CHILD_SA_REKEY_INTERVAL, DEFAULT_IKE_SA_REKEY_INTERVAL, DEFAULT_REPLAY_WINDOW_SIZE,
};
use overlay_net::CidrV4;
use overlay_store::metadata::HttpMetadataClient;
use std::path::PathBuf;
use std::str::FromStr;

/// Which overlay transport this agent programs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// IPsec/ESP transport driven through the IKE daemon.
    Ipsec,
    /// VXLAN encapsulation through the tunnel link.
    Vxlan,
}

#[derive(Parser, Debug)]
#[command(name = "overlayd")]
#[command(about = "Control-plane agent connecting container addresses across hosts", long_about = None)]
#[allow(clippy::struct_excessive_bools)]
pub struct CmdArgs {
    /// Append agent logs to this file instead of stderr.
    #[arg(long, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Write the agent PID here at startup.
    #[arg(long, value_name = "FILE")]
    pub pid_file: Option<PathBuf>,

    /// Entries file backing the file store.
    #[arg(long, short = 'f', default_value = "config.json", value_name = "FILE")]
    pub file: PathBuf,

    /// Configuration directory (psk.txt and the connection templates).
    #[arg(long, short = 'c', default_value = ".", value_name = "DIR")]
    pub ipsec_config: PathBuf,

    /// GCM cipher proposals supported.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, value_name = "BOOL")]
    pub gcm: bool,

    /// Redirect the IKE daemon's output to this file.
    #[arg(long, value_name = "FILE")]
    pub charon_log: Option<PathBuf>,

    /// Launch the IKE daemon instead of attaching to a running one.
    #[arg(long)]
    pub charon_launch: bool,

    /// Probe the IKE daemon's control socket and exit.
    #[arg(long)]
    pub test_charon: bool,

    /// Debug logging.
    #[arg(long)]
    pub debug: bool,

    /// Admin endpoint listen address, `:PORT` or `ADDR:PORT`.
    #[arg(long, default_value = ":8111", value_name = "ADDR")]
    pub listen: String,

    /// Override the self entry's overlay address (file store only).
    #[arg(long, short = 'i', value_parser = CidrV4::from_str, value_name = "CIDR")]
    pub local_ip: Option<CidrV4>,

    /// Backend to use.
    #[arg(long, value_enum, default_value_t = BackendKind::Ipsec, env = "OVERLAY_NET_BACKEND")]
    pub backend: BackendKind,

    /// Metadata service address.
    #[arg(
        long,
        default_value = HttpMetadataClient::DEFAULT_ADDRESS,
        env = "OVERLAY_METADATA_ADDRESS",
        value_name = "ADDR"
    )]
    pub metadata_address: String,

    /// IKE SA rekey interval.
    #[arg(
        long,
        default_value = DEFAULT_IKE_SA_REKEY_INTERVAL,
        env = "IPSEC_IKE_SA_REKEY_INTERVAL",
        value_name = "INTERVAL"
    )]
    pub ipsec_ike_sa_rekey_interval: String,

    /// Child SA rekey interval.
    #[arg(
        long,
        default_value = DEFAULT_CHILD_SA_REKEY_INTERVAL,
        env = "IPSEC_CHILD_SA_REKEY_INTERVAL",
        value_name = "INTERVAL"
    )]
    pub ipsec_child_sa_rekey_interval: String,

    /// Read inventory from the metadata service instead of the entries file.
    #[arg(long, env = "OVERLAY_NET_USE_METADATA")]
    pub use_metadata: bool,

    /// ESP replay window size.
    #[arg(
        long,
        default_value = DEFAULT_REPLAY_WINDOW_SIZE,
        env = "IPSEC_REPLAY_WINDOW_SIZE",
        value_name = "SIZE"
    )]
    pub ipsec_replay_window_size: String,

    /// Tunnel link MTU.
    #[arg(long, default_value_t = 1500, env = "VXLAN_VTEP_MTU", value_name = "MTU")]
    pub vxlan_vtep_mtu: u32,
}

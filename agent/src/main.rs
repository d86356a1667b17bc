// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The overlay agent supervisor: wires the store, the active backend, the
//! ARP responder, the metadata change handler and the admin endpoint, then
//! drains their errors and exits on the first terminal one.

mod admin;
mod args;
mod error;
mod store;
mod watch;

use args::{BackendKind, CmdArgs, Parser};
use error::AgentError;
use overlay_backend::ipsec::{IpsecConfig, IpsecOverlay};
use overlay_backend::vxlan::{VxlanConfig, VxlanOverlay};
use overlay_backend::Backend;
use overlay_ike::ControlClient;
use overlay_kernel::xfrm::XfrmSocket;
use overlay_kernel::Netlink;
use overlay_store::metadata::HttpMetadataClient;
use overlay_store::{MetadataStore, SimpleStore};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use store::AnyStore;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Interface ARP requests are captured on and overlay frames leave through.
const HOST_INTERFACE: &str = "eth0";

/// How often the change handler polls the metadata version for IPsec.
const IPSEC_CHANGE_INTERVAL: Duration = Duration::from_secs(2);

/// How often the change handler polls the metadata version for VXLAN.
const VXLAN_CHANGE_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> ExitCode {
    let args = CmdArgs::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("overlayd: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(args: &CmdArgs) -> Result<(), AgentError> {
    let level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let builder = tracing_subscriber::fmt().with_max_level(level).with_target(true);
    match &args.log {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.init(),
    }
    Ok(())
}

fn run(args: CmdArgs) -> Result<(), AgentError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    if args.test_charon {
        return runtime.block_on(async {
            ControlClient::new(overlay_ike::DEFAULT_SOCKET_PATH)
                .probe()
                .await
                .map_err(AgentError::from)
        });
    }

    init_logging(&args)?;

    if let Some(pid_file) = &args.pid_file {
        let pid = std::process::id();
        info!("writing pid {pid} to {}", pid_file.display());
        std::fs::write(pid_file, pid.to_string())?;
    }

    info!("using backend: {:?}", args.backend);
    info!("using metadata: {}", args.use_metadata);

    runtime.block_on(supervise(args))
}

async fn wait_for_file(path: &Path) -> Result<(), AgentError> {
    for _ in 0..60 {
        if path.exists() {
            return Ok(());
        }
        info!("waiting for file {}", path.display());
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    Err(AgentError::Config(format!(
        "failed to find {}",
        path.display()
    )))
}

async fn build_store(args: &CmdArgs) -> Result<AnyStore, AgentError> {
    // the vxlan backend projects peer membership from service links, which
    // only the metadata service carries
    if args.use_metadata || args.backend == BackendKind::Vxlan {
        info!("reading info from metadata");
        let client = HttpMetadataClient::new(&args.metadata_address)?;
        Ok(AnyStore::Metadata(MetadataStore::new(client)))
    } else {
        info!("reading info from config file");
        wait_for_file(&args.file).await?;
        Ok(AnyStore::File(SimpleStore::new(&args.file, args.local_ip)))
    }
}

async fn supervise(args: CmdArgs) -> Result<(), AgentError> {
    let store = build_store(&args).await?;

    let backend = match args.backend {
        BackendKind::Vxlan => {
            let kernel = Netlink::connect()?;
            let config = VxlanConfig::with_mtu(args.vxlan_vtep_mtu)?;
            Arc::new(Backend::Vxlan(VxlanOverlay::new(store, kernel, config)))
        }
        BackendKind::Ipsec => {
            let mut config = IpsecConfig::new(&args.ipsec_config);
            if !args.gcm {
                config.blacklist = vec!["aes128gcm16".to_string()];
            }
            config.ike_sa_rekey_interval = args.ipsec_ike_sa_rekey_interval.clone();
            config.child_sa_rekey_interval = args.ipsec_child_sa_rekey_interval.clone();
            config.replay_window_size = args.ipsec_replay_window_size.clone();
            let control = ControlClient::new(overlay_ike::DEFAULT_SOCKET_PATH);
            Arc::new(Backend::Ipsec(IpsecOverlay::new(
                store,
                XfrmSocket::new(),
                control,
                config,
            )))
        }
    };

    let (done_tx, mut done_rx) = mpsc::channel::<AgentError>(16);

    // backend-owned tasks report on their own channel, drained below
    let (backend_tx, mut backend_rx) = mpsc::channel(1);
    backend
        .start(args.charon_launch, args.charon_log.clone(), backend_tx)
        .await?;
    {
        let done = done_tx.clone();
        tokio::spawn(async move {
            if let Some(e) = backend_rx.recv().await {
                let _ = done.send(AgentError::Backend(e)).await;
            }
        });
    }

    // ARP responder, answering from whichever classifier the backend keeps
    {
        let done = done_tx.clone();
        match backend.as_ref() {
            Backend::Vxlan(overlay) => {
                let classifier = overlay.classifier().reader();
                tokio::spawn(async move {
                    let e = match overlay_arp::serve(HOST_INTERFACE, classifier).await {
                        Ok(never) => match never {},
                        Err(e) => e,
                    };
                    let _ = done.send(AgentError::Arp(e)).await;
                });
            }
            Backend::Ipsec(_) => {
                let classifier = BackendClassify(backend.clone());
                tokio::spawn(async move {
                    let e = match overlay_arp::serve(HOST_INTERFACE, classifier).await {
                        Ok(never) => match never {},
                        Err(e) => e,
                    };
                    let _ = done.send(AgentError::Arp(e)).await;
                });
            }
        }
    }

    // admin endpoint
    {
        let done = done_tx.clone();
        let listen = args.listen.clone();
        let backend = backend.clone();
        tokio::spawn(async move {
            let result = admin::serve(&listen, backend).await;
            let _ = done
                .send(result.err().unwrap_or_else(|| {
                    AgentError::Config("admin endpoint exited".to_string())
                }))
                .await;
        });
    }

    if let Err(e) = backend.reload().await {
        error!("couldn't reload the overlay: {e}");
        return Err(e.into());
    }

    // change handler: metadata version polling drives reconciliation
    if let Some(client) = backend_metadata_client(&backend) {
        let interval = match args.backend {
            BackendKind::Ipsec => IPSEC_CHANGE_INTERVAL,
            BackendKind::Vxlan => VXLAN_CHANGE_INTERVAL,
        };
        let backend = backend.clone();
        tokio::spawn(watch::run(client, backend, interval));
    }

    match done_rx.recv().await {
        Some(e) => Err(e),
        None => Err(AgentError::Config("supervisor channel closed".to_string())),
    }
}

fn backend_metadata_client(backend: &Arc<Backend<AnyStore>>) -> Option<HttpMetadataClient> {
    let store = match backend.as_ref() {
        Backend::Ipsec(overlay) => overlay.store(),
        Backend::Vxlan(overlay) => overlay.store(),
    };
    store.metadata_client().cloned()
}

/// Store-backed classification for the responder (IPsec path).
struct BackendClassify(Arc<Backend<AnyStore>>);

impl overlay_arp::Classify for BackendClassify {
    fn is_remote(&self, ip: std::net::Ipv4Addr) -> bool {
        self.0.is_remote(ip)
    }
}

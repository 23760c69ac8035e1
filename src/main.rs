// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use enclave_bridge::{
    api::router,
    attestation::{AttestationVerifier, Certificate, LocalAuthority},
    channel::{ClientEndpoint, ClientOptions, ServerAttestation, ServerEndpoint, TaskRequest},
    config::{AttestationMode, ClientConfig, EnclaveConfig, HostConfig, UpstreamConfig},
    crypto::{keys::signing_key_to_pem, KeyExchangeCodec},
    executor::{ChainedExecutor, Executor, ModelExecutor},
    relay::{self, LoopbackRelay, NetworkRelay, TcpConnector},
    state::AppState,
    telemetry::{self, LogFormat},
    workflow::{HttpFetcher, ResearchWorkflow},
};

#[derive(Debug, Parser)]
#[command(name = "enclave-bridge", version, about)]
struct Cli {
    /// Log output format (`pretty` or `json`).
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    role: Role,
}

#[derive(Debug, Subcommand)]
enum Role {
    /// Serve the channel API and the outbound loopback relay inside the enclave.
    Enclave,
    /// Run the SNI relay and the inbound forwarder on the parent host.
    Host,
    /// Send one task to the enclave over an attested channel.
    Client {
        message: String,
        /// Run the multi-stage research flow instead of a single request.
        #[arg(long)]
        research: bool,
    },
    /// Create a root authority key and its certificate for pinning.
    IssueRoot {
        #[arg(long, default_value = "ca-key.pem")]
        key_out: PathBuf,
        #[arg(long, default_value = "root.json")]
        cert_out: PathBuf,
        #[arg(long, default_value = "enclave-bridge root")]
        subject: String,
        #[arg(long, default_value_t = 365)]
        days: i64,
        /// Overwrite existing files.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format).context("failed to install tracing subscriber")?;

    // Install the ring crypto provider for rustls (must be done before any TLS operations)
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        tracing::debug!("rustls crypto provider already installed");
    }

    match cli.role {
        Role::Enclave => run_enclave(EnclaveConfig::from_env()?).await,
        Role::Host => run_host(HostConfig::from_env()?).await,
        Role::Client { message, research } => run_client(ClientConfig::from_env()?, &message, research).await,
        Role::IssueRoot {
            key_out,
            cert_out,
            subject,
            days,
            force,
        } => issue_root(&key_out, &cert_out, &subject, days, force),
    }
}

async fn run_enclave(config: EnclaveConfig) -> anyhow::Result<()> {
    let codec = KeyExchangeCodec::generate();
    let executor: Arc<dyn Executor> = match &config.upstream {
        Some(upstream) => {
            tracing::info!(upstream = %upstream.endpoint, "chaining requests to upstream enclave");
            Arc::new(chained_executor(upstream)?)
        }
        None => Arc::new(ModelExecutor::new(config.providers.clone())?),
    };

    let endpoint = match &config.attestation {
        AttestationMode::Mock => {
            tracing::warn!("serving MOCK attestation; clients cannot verify this enclave");
            ServerEndpoint::mock(codec, executor)
        }
        AttestationMode::Authority { key_path, cert_path } => {
            let pem = std::fs::read_to_string(key_path)
                .with_context(|| format!("failed to read {}", key_path.display()))?;
            let root = Certificate::from_json_file(cert_path)?;
            let authority = LocalAuthority::from_parts(KeyExchangeCodec::from_pem(&pem)?, root)?;

            let document = authority.attest(codec.public_key(), &config.module_id, config.pcrs.clone(), None)?;
            tracing::info!(
                module_id = %config.module_id,
                public_key = %codec.public_key(),
                "attestation document issued"
            );
            ServerEndpoint::new(codec, ServerAttestation::real(document)?, executor)?
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let loopback = LoopbackRelay::new(TcpConnector::new(config.host_proxy_addr.clone()))
        .with_connect_timeout(config.connect_timeout);
    let loopback_listener = bind(&config.loopback_addr()).await?;
    let relay_task = tokio::spawn(relay::serve(loopback_listener, Arc::new(loopback), shutdown.clone()));

    let api_listener = bind(&config.api_addr()).await?;
    tracing::info!(addr = %config.api_addr(), "enclave API listening (docs at /docs)");

    axum::serve(api_listener, router(AppState::new(endpoint)))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await
        .context("API server failed")?;

    shutdown.cancel();
    relay_task.await??;
    Ok(())
}

async fn run_host(config: HostConfig) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let network = NetworkRelay::tcp(config.relay.clone());
    let inbound = LoopbackRelay::new(TcpConnector::new(config.enclave_addr.clone()))
        .with_connect_timeout(config.relay.connect_timeout);

    let proxy_listener = bind(&config.proxy_addr()).await?;
    let server_listener = bind(&config.server_addr()).await?;

    tokio::try_join!(
        relay::serve(proxy_listener, Arc::new(network), shutdown.clone()),
        relay::serve(server_listener, Arc::new(inbound), shutdown.clone()),
    )?;
    Ok(())
}

fn chained_executor(config: &UpstreamConfig) -> anyhow::Result<ChainedExecutor> {
    let verifier = match &config.root_ca_path {
        Some(path) => AttestationVerifier::new(Certificate::from_json_file(path)?),
        #[cfg(feature = "mock-attestation")]
        None => AttestationVerifier::unpinned(),
        #[cfg(not(feature = "mock-attestation"))]
        None => bail!("UPSTREAM_ROOT_CA_PATH must be set"),
    };
    let options = ClientOptions::new(config.endpoint.clone()).with_timeout(config.timeout);
    Ok(ChainedExecutor::new(options, verifier, Arc::new(HttpFetcher::new()?)))
}

async fn run_client(config: ClientConfig, message: &str, research: bool) -> anyhow::Result<()> {
    let verifier = match &config.root_ca_path {
        Some(path) => {
            let verifier = AttestationVerifier::new(Certificate::from_json_file(path)?)
                .with_policy(config.policy.clone());
            match config.max_age {
                Some(max_age) => verifier.with_max_age(max_age),
                None => verifier,
            }
        }
        #[cfg(feature = "mock-attestation")]
        None => AttestationVerifier::unpinned(),
        #[cfg(not(feature = "mock-attestation"))]
        None => bail!("ROOT_CA_PATH must be set"),
    };

    let options = ClientOptions::new(config.endpoint.clone()).with_timeout(config.timeout);
    let channel = ClientEndpoint::init(options, KeyExchangeCodec::generate(), &verifier).await?;
    let task = TaskRequest::new(config.api_key.clone(), message).with_model(&config.platform, &config.model);

    if research {
        let workflow = ResearchWorkflow::new(&channel, HttpFetcher::new()?, task);
        let report = workflow.run(message).await?;
        for source in &report.sources {
            println!("[{}]\n{}\n", source.url, source.summary);
        }
        println!("{}", report.answer);
        return Ok(());
    }

    let (output, _) = channel.send(&task).await?.trusted_output()?;
    println!("{}", output.response);
    Ok(())
}

fn issue_root(key_out: &Path, cert_out: &Path, subject: &str, days: i64, force: bool) -> anyhow::Result<()> {
    if days <= 0 {
        bail!("--days must be positive");
    }

    let authority = LocalAuthority::generate(subject, chrono::Duration::days(days));
    let key_pem = signing_key_to_pem(authority.codec().signing_key())?;
    let cert_json = authority.root_certificate().to_json_pretty()?;

    write_new(key_out, key_pem.as_bytes(), force)?;
    write_new(cert_out, cert_json.as_bytes(), force)?;

    tracing::info!(
        subject,
        public_key = %authority.codec().public_key(),
        key = %key_out.display(),
        certificate = %cert_out.display(),
        "root authority issued"
    );
    Ok(())
}

fn write_new(path: &Path, contents: &[u8], force: bool) -> anyhow::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true);
    if force {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(contents)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

async fn bind(addr: &str) -> anyhow::Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
    token.cancel();
}

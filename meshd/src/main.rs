// SPDX-License-Identifier: GPL-3.0-or-later

mod config;
mod context;
mod node;
mod ports;
mod rib;
mod rpc;
mod snapshot;
mod version;

use std::io;
use std::time::Duration;

use clap::Parser;
use config::Config;
use daemonize::Daemonize;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone)]
pub enum LoggingOutput {
    Stdout,
    Syslog,
    File(String),
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Arg {
    #[arg(short, long, help = "Configuration file path")]
    config: Option<String>,

    #[arg(short, long, help = "Run as daemon in background")]
    daemon: bool,
}

fn tracing_set(daemon_mode: bool) {
    if daemon_mode {
        // In daemon mode, use syslog by default
        setup_tracing(LoggingOutput::Syslog).unwrap_or_else(|e| {
            eprintln!("Failed to setup syslog logging: {}, falling back to file", e);
            setup_tracing(LoggingOutput::File("meshd.log".to_string())).unwrap_or_else(|e| {
                eprintln!("Failed to setup file logging: {}, discarding logs", e);
                tracing_subscriber::fmt()
                    .with_max_level(Level::INFO)
                    .with_writer(std::io::sink)
                    .init();
            });
        });
    } else {
        setup_tracing(LoggingOutput::Stdout).unwrap_or_else(|e| {
            eprintln!("Failed to setup stdout logging: {}", e);
            tracing_subscriber::fmt().with_max_level(Level::INFO).init();
        });
    }
}

pub fn setup_tracing(output: LoggingOutput) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match output {
        LoggingOutput::Stdout => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .init();
        }
        LoggingOutput::Syslog => {
            #[cfg(unix)]
            {
                use std::io::Write;
                use std::sync::Mutex;
                use syslog::{Facility, Formatter3164};

                struct SyslogWriter {
                    logger: Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>,
                }

                impl SyslogWriter {
                    fn new() -> anyhow::Result<Self> {
                        let formatter = Formatter3164 {
                            facility: Facility::LOG_DAEMON,
                            hostname: None,
                            process: "meshd".to_string(),
                            pid: std::process::id(),
                        };
                        let logger = syslog::unix(formatter)
                            .map_err(|e| anyhow::anyhow!("Failed to connect to syslog: {}", e))?;
                        Ok(SyslogWriter {
                            logger: Mutex::new(logger),
                        })
                    }
                }

                impl Write for SyslogWriter {
                    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                        if let Ok(mut logger) = self.logger.lock() {
                            let msg_cow = String::from_utf8_lossy(buf);
                            let msg = msg_cow.trim();
                            let _ = logger.info(msg);
                        }
                        Ok(buf.len())
                    }

                    fn flush(&mut self) -> io::Result<()> {
                        Ok(())
                    }
                }

                let syslog_writer = SyslogWriter::new()?;
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(syslog_writer))
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_ansi(false);

                tracing_subscriber::registry().with(filter).with(layer).init();
            }
            #[cfg(not(unix))]
            {
                return Err(anyhow::anyhow!("Syslog is only supported on Unix systems"));
            }
        }
        LoggingOutput::File(path) => {
            let log_path = std::path::Path::new(&path);
            let log_dir = log_path
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let log_filename = log_path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log filename"))?;
            if !log_dir.exists() {
                std::fs::create_dir_all(log_dir).map_err(|e| {
                    anyhow::anyhow!("Failed to create log directory {}: {}", log_dir.display(), e)
                })?;
            }

            let writer = rolling::never(log_dir, log_filename);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false);

            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
    Ok(())
}

fn daemonize() -> anyhow::Result<()> {
    let daemonize = Daemonize::new()
        .pid_file("/var/run/meshd.pid")
        .chown_pid_file(true)
        .working_directory("/")
        .umask(0o027);

    match daemonize.start() {
        Ok(_) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Failed to daemonize: {}", e)),
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let arg = Arg::parse();

    let config = match config::config_path(arg.config.as_deref()) {
        Some(path) => Config::load(&path)?,
        None => {
            if let Some(path) = &arg.config {
                anyhow::bail!("config file {} not found", path);
            }
            Config::default()
        }
    };

    if arg.daemon {
        daemonize()?;
    }
    tracing_set(arg.daemon);

    let version = version::VersionInfo::current();
    tracing::info!("{} started, node {}", version.short_version(), config.node.name);
    if config.orchestrator.ibgp.secret.is_none() {
        tracing::warn!("no ibgp secret configured, accepting any peer token");
    }

    let node = node::Node::new(&config);
    let handle = node.handle();
    node::serve(node);

    let _rpc = rpc::serve(&config, handle.clone()).await?;

    shutdown_signal().await;
    tracing::info!("signal received, draining");
    handle.shutdown().await;
    // Give in-flight close notifications a moment to reach peers.
    tokio::time::sleep(Duration::from_millis(200)).await;

    Ok(())
}

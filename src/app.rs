use std::{sync::Arc, time::Duration};

use anyhow::Result;
use reqwest::Client;
use tokio::{io::BufReader, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    ai::HttpClassifier,
    config::AppConfig,
    detection::{Collaborators, Orchestrator},
    host::{spawn_writer, HostBridge, HostPage, HostUi, Outbox},
    infrastructure::{
        activity::HttpActivitySink,
        auth::HostAuth,
        directories::ResolvedPaths,
        settings_store::FileSettingsStore,
        shutdown::{Shutdown, ShutdownReason},
    },
    page::BroadcastFeed,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct MediaGuardApp {
    _paths: ResolvedPaths,
    bridge: HostBridge,
    orchestrator: Arc<Orchestrator>,
    writer_handle: JoinHandle<()>,
    writer_cancel: CancellationToken,
    shutdown: Shutdown,
}

impl MediaGuardApp {
    pub async fn initialize(
        config: AppConfig,
        paths: ResolvedPaths,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let http_client = Client::builder()
            .user_agent(format!("media-guard/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        let classifier = Arc::new(HttpClassifier::new(
            http_client.clone(),
            config.classifier.clone(),
        ));
        let activity = Arc::new(HttpActivitySink::new(
            http_client.clone(),
            &config.classifier.base_url,
            config.classifier.api_token.clone(),
        ));
        let settings = Arc::new(FileSettingsStore::new(paths.settings_path.clone()));
        let auth = Arc::new(HostAuth::new(config.classifier.api_token.is_some()));

        let page = Arc::new(HostPage::new(http_client));
        let changes = Arc::new(BroadcastFeed::new());
        let visibility = Arc::new(BroadcastFeed::new());

        let (outbox, outbound) = Outbox::new();
        let writer_cancel = CancellationToken::new();
        let writer_handle = spawn_writer(outbound, writer_cancel.clone());

        let orchestrator = Orchestrator::new(
            Collaborators {
                page: page.clone(),
                changes: changes.clone(),
                visibility: visibility.clone(),
                classifier,
                settings,
                auth: auth.clone(),
                activity,
                ui: Arc::new(HostUi::new(outbox.clone())),
            },
            &config.pipeline,
        );
        let bridge = HostBridge::new(
            page,
            changes,
            visibility,
            auth,
            orchestrator.clone(),
            outbox,
        );

        Ok(Self {
            _paths: paths,
            bridge,
            orchestrator,
            writer_handle,
            writer_cancel,
            shutdown,
        })
    }

    pub async fn run(self) -> Result<()> {
        let MediaGuardApp {
            _paths: _,
            bridge,
            orchestrator,
            mut writer_handle,
            writer_cancel,
            shutdown,
        } = self;

        tracing::info!(version = env!("CARGO_PKG_VERSION"), "media guard started");
        bridge.announce();

        let outcome = orchestrator.init().await;
        tracing::info!(target: "orchestrator", ?outcome, "initial start");

        let mut shutdown_listener = shutdown.subscribe();
        let stdin = BufReader::new(tokio::io::stdin());
        tokio::select! {
            reason = shutdown_listener.notified() => {
                tracing::info!(?reason, "shutdown requested");
            }
            res = bridge.run(stdin) => {
                if let Err(err) = res {
                    tracing::error!(target: "host", ?err, "host bridge failed");
                }
                shutdown.trigger(ShutdownReason::HostDisconnected);
            }
        }

        orchestrator.stop();
        writer_cancel.cancel();

        let writer_sleep = tokio::time::sleep(SHUTDOWN_TIMEOUT);
        tokio::pin!(writer_sleep);
        tokio::select! {
            res = &mut writer_handle => {
                if let Err(err) = res {
                    if err.is_panic() {
                        tracing::error!(target: "host", "outbound writer panicked");
                    }
                }
            }
            _ = &mut writer_sleep => {
                tracing::warn!(
                    target: "host",
                    "outbound writer did not finish within {:?}; aborting",
                    SHUTDOWN_TIMEOUT
                );
                writer_handle.abort();
            }
        }

        tracing::info!(reason = ?shutdown.subscribe().reason(), "media guard stopped");
        Ok(())
    }
}

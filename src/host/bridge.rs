use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::{
    detection::Orchestrator,
    domain::NodeId,
    infrastructure::auth::HostAuth,
    page::{BroadcastFeed, DomChange},
};

use super::{
    page::HostPage,
    protocol::{parse_line, Command, Inbound, Outbound, ProtocolError},
    ui::Outbox,
};

/// Turns host messages into page mirror updates, feed events and
/// orchestrator calls.
pub struct HostBridge {
    page: Arc<HostPage>,
    changes: Arc<BroadcastFeed<DomChange>>,
    visibility: Arc<BroadcastFeed<NodeId>>,
    auth: Arc<HostAuth>,
    orchestrator: Arc<Orchestrator>,
    outbox: Outbox,
}

impl HostBridge {
    pub fn new(
        page: Arc<HostPage>,
        changes: Arc<BroadcastFeed<DomChange>>,
        visibility: Arc<BroadcastFeed<NodeId>>,
        auth: Arc<HostAuth>,
        orchestrator: Arc<Orchestrator>,
        outbox: Outbox,
    ) -> Self {
        Self {
            page,
            changes,
            visibility,
            auth,
            orchestrator,
            outbox,
        }
    }

    pub fn announce(&self) {
        self.outbox.send(Outbound::Ready {
            version: env!("CARGO_PKG_VERSION"),
        });
    }

    /// Processes lines until the host closes its end.
    pub async fn run<R>(&self, reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines
            .next_line()
            .await
            .context("failed to read from host")?
        {
            match parse_line(&line) {
                Ok(message) => self.dispatch(message).await,
                Err(ProtocolError::Empty) => {}
                Err(err) => {
                    tracing::warn!(target: "host", error = %err, "ignoring malformed host message");
                }
            }
        }
        tracing::info!(target: "host", "host closed the connection");
        Ok(())
    }

    pub async fn dispatch(&self, message: Inbound) {
        match message {
            Inbound::ElementsInserted { elements } => {
                let nodes: Vec<NodeId> = elements.iter().map(|element| element.node).collect();
                for element in elements {
                    self.page.upsert(element.node, element.snapshot);
                }
                self.changes.publish(DomChange::Inserted(nodes));
            }
            Inbound::ElementUpdated { element } => self.page.upsert(element.node, element.snapshot),
            Inbound::ElementRemoved { node } => {
                self.page.remove(node);
                self.changes.publish(DomChange::Removed(node));
            }
            Inbound::SourceChanged { node, source } => {
                self.page.set_source(node, source);
                self.changes.publish(DomChange::SourceChanged(node));
            }
            Inbound::EnteredViewport { node } => {
                self.visibility.publish(node);
            }
            Inbound::Playback { node, state } => {
                self.page.set_playback(node, state);
                self.changes.publish(DomChange::Playback(node, state));
            }
            Inbound::Frame { node, data_url } => self.page.store_frame(node, data_url),
            Inbound::Navigate { url } => {
                tracing::info!(target: "host", %url, "page navigated");
                self.page.navigate(&url);
                self.orchestrator.on_navigated();
            }
            Inbound::PageVisibility { visible } => {
                self.orchestrator.on_page_visibility(visible).await;
            }
            Inbound::Auth { authenticated } => {
                self.auth.set(authenticated);
                self.orchestrator.on_auth_changed(authenticated).await;
            }
            Inbound::Settings { settings } => {
                let outcome = self.orchestrator.on_settings_updated(settings).await;
                tracing::info!(target: "host", ?outcome, "settings applied");
            }
            Inbound::Command { command } => self.command(command).await,
            Inbound::ModalAction { action } => {
                if let Err(err) = self.orchestrator.enforcement().act(action) {
                    tracing::warn!(target: "host", error = %err, "modal action rejected");
                }
            }
            Inbound::ModalOutsideClick => {
                self.orchestrator.enforcement().outside_click();
            }
            Inbound::ModalEscape => {
                self.orchestrator.enforcement().escape();
            }
        }
    }

    async fn command(&self, command: Command) {
        match command {
            Command::Start => {
                let outcome = self.orchestrator.start().await;
                tracing::info!(target: "host", ?outcome, "start requested");
            }
            Command::Stop => self.orchestrator.stop(),
            Command::Reset => self.orchestrator.reset(),
            Command::Status => {}
        }
        self.outbox.send(Outbound::Status {
            status: self.orchestrator.status(),
        });
    }
}

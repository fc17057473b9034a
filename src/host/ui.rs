use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{detection::ModalView, page::EnforcementUi};

use super::protocol::{encode, Outbound};

/// Queue of messages for the host. Sending never blocks the pipeline.
#[derive(Clone)]
pub struct Outbox {
    sender: mpsc::UnboundedSender<Outbound>,
}

impl Outbox {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    pub fn send(&self, message: Outbound) {
        if self.sender.send(message).is_err() {
            tracing::debug!(target: "host", "outbox closed; message dropped");
        }
    }
}

pub fn spawn_writer(
    receiver: mpsc::UnboundedReceiver<Outbound>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(write_outbound(receiver, tokio::io::stdout(), cancel))
}

/// Writes one JSON line per message. After cancellation the backlog is
/// flushed before returning.
pub async fn write_outbound<W>(
    mut receiver: mpsc::UnboundedReceiver<Outbound>,
    mut writer: W,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin,
{
    loop {
        let message = tokio::select! {
            message = receiver.recv() => message,
            _ = cancel.cancelled() => break,
        };
        let Some(message) = message else {
            return;
        };
        if let Err(err) = write_line(&mut writer, &message).await {
            tracing::error!(target: "host", error = %err, "failed to write to host");
            return;
        }
    }

    while let Ok(message) = receiver.try_recv() {
        if write_line(&mut writer, &message).await.is_err() {
            break;
        }
    }
}

async fn write_line<W>(writer: &mut W, message: &Outbound) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = encode(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}

pub struct HostUi {
    outbox: Outbox,
}

impl HostUi {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }
}

impl EnforcementUi for HostUi {
    fn present(&self, view: &ModalView) {
        self.outbox.send(Outbound::Modal { view: view.clone() });
    }

    fn dismiss(&self) {
        self.outbox.send(Outbound::ModalClosed);
    }

    fn close_tab(&self) {
        self.outbox.send(Outbound::CloseTab);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn flushes_backlog_after_cancellation() {
        let (outbox, receiver) = Outbox::new();
        let cancel = CancellationToken::new();
        outbox.send(Outbound::ModalClosed);
        outbox.send(Outbound::CloseTab);
        cancel.cancel();

        let mut written = Vec::new();
        write_outbound(receiver, &mut written, cancel).await;
        let text = String::from_utf8(written).unwrap();
        assert_eq!(
            text.lines().collect::<Vec<_>>(),
            vec![r#"{"type":"modal_closed"}"#, r#"{"type":"close_tab"}"#]
        );
    }
}

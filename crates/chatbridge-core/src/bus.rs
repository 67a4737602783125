//! In-process message bus between isolated contexts.
//!
//! A context is reachable only through a [`ContextPort`]. Sending is either a
//! request (the sender awaits one reply through a oneshot) or a notification
//! (no reply). When the receiving context has gone away, the sender gets a
//! `Transport` error instead of hanging.

use tokio::sync::{mpsc, oneshot};

use crate::error::{BridgeError, Result};
use crate::protocol::{BridgeMessage, BridgeResponse, ExtractorAck, ExtractorCommand};

/// Port into a Coordinator or Scanner context.
pub type BridgePort = ContextPort<BridgeMessage, BridgeResponse>;
pub type BridgeMailbox = Mailbox<BridgeMessage, BridgeResponse>;
pub type BridgeEnvelope = Envelope<BridgeMessage, BridgeResponse>;

/// Port into an Answer Extractor context.
pub type ExtractorPort = ContextPort<ExtractorCommand, ExtractorAck>;
pub type ExtractorMailbox = Mailbox<ExtractorCommand, ExtractorAck>;
pub type ExtractorEnvelope = Envelope<ExtractorCommand, ExtractorAck>;

/// A message plus the optional reply callback.
#[derive(Debug)]
pub struct Envelope<M, R> {
    pub message: M,
    reply: Option<oneshot::Sender<R>>,
}

impl<M, R> Envelope<M, R> {
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answer the sender. A no-op for notifications or if the sender gave up.
    pub fn respond(&mut self, response: R) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(response);
        }
    }

    /// Split into the message and a standalone responder.
    pub fn into_parts(self) -> (M, Responder<R>) {
        (self.message, Responder { reply: self.reply })
    }
}

/// Reply half of an [`Envelope`], movable into a spawned task.
#[derive(Debug)]
pub struct Responder<R> {
    reply: Option<oneshot::Sender<R>>,
}

impl<R> Responder<R> {
    pub fn respond(mut self, response: R) {
        if let Some(tx) = self.reply.take() {
            let _ = tx.send(response);
        }
    }
}

/// Sending half of a context's mailbox.
#[derive(Debug)]
pub struct ContextPort<M, R> {
    name: String,
    tx: mpsc::Sender<Envelope<M, R>>,
}

impl<M, R> Clone for ContextPort<M, R> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), tx: self.tx.clone() }
    }
}

impl<M, R> ContextPort<M, R> {
    /// Create a context mailbox and the port that feeds it.
    pub fn channel(name: impl Into<String>, capacity: usize) -> (Self, Mailbox<M, R>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { name: name.into(), tx }, Mailbox { rx })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Send and wait for the single reply.
    pub async fn request(&self, message: M) -> Result<R> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Envelope { message, reply: Some(reply_tx) })
            .await
            .map_err(|_| self.gone())?;
        reply_rx.await.map_err(|_| {
            BridgeError::Transport(format!(
                "{}: the message port closed before a response was received",
                self.name
            ))
        })
    }

    /// Fire-and-forget.
    pub async fn notify(&self, message: M) -> Result<()> {
        self.tx
            .send(Envelope { message, reply: None })
            .await
            .map_err(|_| self.gone())
    }

    fn gone(&self) -> BridgeError {
        BridgeError::Transport(format!(
            "{}: could not establish connection, receiving end does not exist",
            self.name
        ))
    }
}

/// Receiving half owned by the context's event loop.
#[derive(Debug)]
pub struct Mailbox<M, R> {
    rx: mpsc::Receiver<Envelope<M, R>>,
}

impl<M, R> Mailbox<M, R> {
    pub async fn recv(&mut self) -> Option<Envelope<M, R>> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_reply() {
        let (port, mut mailbox) = BridgePort::channel("coordinator", 8);
        tokio::spawn(async move {
            while let Some(mut env) = mailbox.recv().await {
                assert!(env.expects_reply());
                env.respond(BridgeResponse::status("ok"));
            }
        });
        let reply = port.request(BridgeMessage::GetSettings).await.unwrap();
        assert_eq!(reply, BridgeResponse::status("ok"));
    }

    #[tokio::test]
    async fn test_closed_receiver_is_transport_error() {
        let (port, mailbox) = BridgePort::channel("scanner", 1);
        drop(mailbox);
        assert!(port.is_closed());
        let err = port.notify(BridgeMessage::SettingsUpdated).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert!(err.to_string().contains("scanner"));
    }

    #[tokio::test]
    async fn test_dropped_envelope_is_transport_error() {
        let (port, mut mailbox) = ExtractorPort::channel("extractor", 1);
        tokio::spawn(async move {
            let env = mailbox.recv().await;
            drop(env);
        });
        let err = port
            .request(ExtractorCommand::AskQuestion { request_id: "r".into(), question: "q".into() })
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
    }

    #[tokio::test]
    async fn test_notification_has_no_reply() {
        let (port, mut mailbox) = BridgePort::channel("scanner", 1);
        port.notify(BridgeMessage::ResetCaches).await.unwrap();
        let env = mailbox.recv().await.unwrap();
        assert!(!env.expects_reply());
        let (msg, responder) = env.into_parts();
        assert_eq!(msg, BridgeMessage::ResetCaches);
        responder.respond(BridgeResponse::status("ignored"));
    }
}

//! Cross-context message channel.
//!
//! Models a browsing context that can open another one and exchange
//! origin-tagged messages with it. Delivery is asynchronous and unordered with
//! respect to closure: a context can close at any time and messages to a
//! closed context are lost.
//!
//! [`local`] provides an in-process implementation over tokio channels.

use uuid::Uuid;

use crate::protocol::messages::ProtocolMessage;

/// Wildcard target origin.
pub const ANY_ORIGIN: &str = "*";

/// Identity of a browsing context.
pub type ContextId = Uuid;

/// A message as received by a context.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Context that posted the message.
    pub source: ContextId,
    /// Origin of the sending context, stamped by the channel.
    pub origin: String,
    pub data: serde_json::Value,
}

/// The relying side's handle to the verifier context it opened.
pub trait VerifierHandle: Send + Sync {
    fn id(&self) -> ContextId;

    /// Post `message`; dropped unless the verifier's origin matches
    /// `target_origin` (or it is [`ANY_ORIGIN`]).
    fn post(&self, message: &ProtocolMessage, target_origin: &str);

    fn is_closed(&self) -> bool;

    fn close(&self);
}

/// Opens verifier contexts.
pub trait ContextOpener: Send + Sync {
    type Handle: VerifierHandle;

    /// Open `url`. `None` means the open was refused (e.g. a popup blocker).
    fn open(&self, url: &str) -> Option<Self::Handle>;
}

/// The verifier side's handle to the context that opened it.
pub trait OpenerHandle: Send + Sync {
    fn id(&self) -> ContextId;

    fn post(&self, message: &ProtocolMessage, target_origin: &str);
}

pub mod local {
    //! In-process contexts connected by unbounded tokio channels.

    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
    use uuid::Uuid;

    use super::{ANY_ORIGIN, ContextId, ContextOpener, InboundMessage, OpenerHandle, VerifierHandle};
    use crate::protocol::messages::ProtocolMessage;

    /// An addressable context. Clones refer to the same context.
    #[derive(Debug, Clone)]
    pub struct LocalWindow {
        id: ContextId,
        origin: String,
        tx: UnboundedSender<InboundMessage>,
        closed: Arc<AtomicBool>,
    }

    impl LocalWindow {
        /// Create a context at `origin` and return its inbox.
        pub fn new(origin: impl Into<String>) -> (Self, UnboundedReceiver<InboundMessage>) {
            let (tx, rx) = unbounded_channel();
            let window = Self {
                id: Uuid::new_v4(),
                origin: origin.into(),
                tx,
                closed: Arc::new(AtomicBool::new(false)),
            };
            (window, rx)
        }

        pub fn id(&self) -> ContextId {
            self.id
        }

        pub fn origin(&self) -> &str {
            &self.origin
        }

        pub fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }

        pub fn close(&self) {
            if !self.closed.swap(true, Ordering::SeqCst) {
                tracing::debug!(context = %self.id, "Context closed");
            }
        }

        /// Deliver raw `data` from `from`, subject to the target origin check.
        pub fn deliver_raw(&self, from: &LocalWindow, data: serde_json::Value, target_origin: &str) {
            if self.is_closed() {
                tracing::trace!(context = %self.id, "Dropping message to closed context");
                return;
            }
            if target_origin != ANY_ORIGIN && target_origin != self.origin {
                tracing::trace!(
                    target_origin,
                    actual = %self.origin,
                    "Dropping message for another origin"
                );
                return;
            }
            // A dropped receiver means nobody listens any more
            let _ = self.tx.send(InboundMessage {
                source: from.id,
                origin: from.origin.clone(),
                data,
            });
        }

        pub fn deliver(&self, from: &LocalWindow, message: &ProtocolMessage, target_origin: &str) {
            self.deliver_raw(from, message.to_value(), target_origin);
        }
    }

    /// Relying-side handle to a local verifier context.
    #[derive(Debug, Clone)]
    pub struct LocalVerifierHandle {
        relying: LocalWindow,
        verifier: LocalWindow,
    }

    impl VerifierHandle for LocalVerifierHandle {
        fn id(&self) -> ContextId {
            self.verifier.id
        }

        fn post(&self, message: &ProtocolMessage, target_origin: &str) {
            self.verifier.deliver(&self.relying, message, target_origin);
        }

        fn is_closed(&self) -> bool {
            self.verifier.is_closed()
        }

        fn close(&self) {
            self.verifier.close();
        }
    }

    /// Verifier-side handle back to the relying context.
    #[derive(Debug, Clone)]
    pub struct LocalOpenerHandle {
        verifier: LocalWindow,
        relying: LocalWindow,
    }

    impl OpenerHandle for LocalOpenerHandle {
        fn id(&self) -> ContextId {
            self.relying.id
        }

        fn post(&self, message: &ProtocolMessage, target_origin: &str) {
            self.relying.deliver(&self.verifier, message, target_origin);
        }
    }

    /// Everything a freshly opened verifier context gets.
    #[derive(Debug)]
    pub struct VerifierEnd {
        pub url: String,
        pub window: LocalWindow,
        pub opener: LocalOpenerHandle,
        pub inbox: UnboundedReceiver<InboundMessage>,
    }

    /// Opens local verifier contexts and hands them to whoever drives them.
    #[derive(Debug, Clone)]
    pub struct LocalOpener {
        relying: LocalWindow,
        verifier_origin: String,
        launches: Option<UnboundedSender<VerifierEnd>>,
    }

    impl LocalOpener {
        /// Opener for `relying`; each opened verifier arrives on the returned receiver.
        pub fn new(
            relying: LocalWindow,
            verifier_origin: impl Into<String>,
        ) -> (Self, UnboundedReceiver<VerifierEnd>) {
            let (tx, rx) = unbounded_channel();
            let opener = Self {
                relying,
                verifier_origin: verifier_origin.into(),
                launches: Some(tx),
            };
            (opener, rx)
        }

        /// Opener whose every open is refused.
        pub fn blocked(relying: LocalWindow) -> Self {
            Self {
                relying,
                verifier_origin: String::new(),
                launches: None,
            }
        }
    }

    impl ContextOpener for LocalOpener {
        type Handle = LocalVerifierHandle;

        fn open(&self, url: &str) -> Option<LocalVerifierHandle> {
            let launches = self.launches.as_ref()?;
            let (verifier, inbox) = LocalWindow::new(self.verifier_origin.clone());

            let end = VerifierEnd {
                url: url.to_string(),
                window: verifier.clone(),
                opener: LocalOpenerHandle {
                    verifier: verifier.clone(),
                    relying: self.relying.clone(),
                },
                inbox,
            };
            launches.send(end).ok()?;

            Some(LocalVerifierHandle {
                relying: self.relying.clone(),
                verifier,
            })
        }
    }

}

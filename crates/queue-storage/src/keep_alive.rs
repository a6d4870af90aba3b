//! Keep-alive handle for long-running message processing.
//!
//! A [`KeepAliveMessageHandle`] owns one retrieved message and renews its
//! invisibility on a background task until the message is finalized. The
//! renewal loop is stopped, and awaited, before any terminal operation runs,
//! so a late renewal never races the finalization. Dropping a handle that was
//! not finalized abandons the message.

use crate::error::QueueError;
use crate::message::{MessageTicket, PutOptions, ReceivedMessage};
use crate::queue_storage::QueueStorageProvider;
use crate::serializer::{DataSerializer, JsonDataSerializer};
use crate::settings::QueueStorageSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "keep_alive_tests.rs"]
mod tests;

/// Timing of the renewal loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveOptions {
    /// Wait before the first renewal
    pub initial_delay: Duration,
    /// Wait between renewals
    pub period: Duration,
}

impl KeepAliveOptions {
    pub fn from_settings(settings: &QueueStorageSettings) -> Self {
        Self {
            initial_delay: settings.keep_alive_initial_delay(),
            period: settings.keep_alive_period(),
        }
    }
}

impl Default for KeepAliveOptions {
    fn default() -> Self {
        Self::from_settings(&QueueStorageSettings::default())
    }
}

struct RenewalLoop {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RenewalLoop {
    async fn stop(self) {
        // The task may already have ended on its own.
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            warn!(error = %e, "Keep-alive task ended abnormally");
        }
    }
}

/// A retrieved message whose visibility is renewed until it is finalized
pub struct KeepAliveMessageHandle<T, S: DataSerializer = JsonDataSerializer> {
    provider: Arc<QueueStorageProvider<S>>,
    message: ReceivedMessage<T>,
    renewal: Option<RenewalLoop>,
}

impl<T, S: DataSerializer> KeepAliveMessageHandle<T, S> {
    /// Start renewing a message with the provider's keep-alive settings
    pub fn new(provider: Arc<QueueStorageProvider<S>>, message: ReceivedMessage<T>) -> Self {
        let options = KeepAliveOptions::from_settings(provider.settings());
        Self::with_options(provider, message, options)
    }

    /// Start renewing a message with explicit timing
    ///
    /// Must be called within a tokio runtime.
    pub fn with_options(
        provider: Arc<QueueStorageProvider<S>>,
        message: ReceivedMessage<T>,
        options: KeepAliveOptions,
    ) -> Self {
        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(renew(
            Arc::clone(&provider),
            message.ticket.clone(),
            options,
            stopped,
        ));

        Self {
            provider,
            message,
            renewal: Some(RenewalLoop { stop, task }),
        }
    }

    /// The message being kept alive
    pub fn message(&self) -> &ReceivedMessage<T> {
        &self.message
    }

    pub fn ticket(&self) -> &MessageTicket {
        &self.message.ticket
    }

    /// Stop renewing and delete the message
    pub async fn delete(mut self) -> Result<bool, QueueError> {
        self.stop_renewal().await;
        self.provider.delete(&self.message.ticket).await
    }

    /// Stop renewing and put the message back on its queue
    pub async fn abandon(mut self, options: PutOptions) -> Result<bool, QueueError> {
        self.stop_renewal().await;
        self.provider.abandon(&self.message.ticket, options).await
    }

    /// Stop renewing and put the message back without counting this delivery
    pub async fn resume_later(mut self, options: PutOptions) -> Result<bool, QueueError> {
        self.stop_renewal().await;
        self.provider.resume_later(&self.message.ticket, options).await
    }

    async fn stop_renewal(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.stop().await;
        }
    }
}

impl<T, S: DataSerializer> Drop for KeepAliveMessageHandle<T, S> {
    fn drop(&mut self) {
        let Some(renewal) = self.renewal.take() else {
            return;
        };

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                ticket = %self.message.ticket,
                "Keep-alive handle dropped outside a runtime, message left to time out"
            );
            renewal.task.abort();
            return;
        };

        let provider = Arc::clone(&self.provider);
        let ticket = self.message.ticket.clone();
        runtime.spawn(async move {
            renewal.stop().await;
            match provider.abandon(&ticket, PutOptions::default()).await {
                Ok(abandoned) => debug!(
                    ticket = %ticket,
                    abandoned = abandoned,
                    "Dropped keep-alive handle abandoned its message"
                ),
                Err(e) => warn!(
                    ticket = %ticket,
                    error = %e,
                    "Failed to abandon message of dropped keep-alive handle"
                ),
            }
        });
    }
}

async fn renew<S: DataSerializer>(
    provider: Arc<QueueStorageProvider<S>>,
    ticket: MessageTicket,
    options: KeepAliveOptions,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut wait = options.initial_delay;
    loop {
        tokio::select! {
            _ = &mut stopped => break,
            _ = tokio::time::sleep(wait) => {}
        }

        match provider.keep_alive(&ticket).await {
            Ok(Some(total)) => {
                debug!(
                    ticket = %ticket,
                    total_visibility_ms = total.as_millis() as u64,
                    "Keep-alive renewed"
                );
            }
            Ok(None) => {
                debug!(ticket = %ticket, "Keep-alive no longer accepted, stopping renewal");
                break;
            }
            Err(e) => {
                warn!(ticket = %ticket, error = %e, "Keep-alive renewal failed");
            }
        }

        wait = options.period;
    }
}

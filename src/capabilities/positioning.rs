use crux_core::capability::{Capability, CapabilityContext, Operation};
use futures::StreamExt;
use serde::{Deserialize, Serialize};

/// One fix from the device positioning subsystem. Ephemeral; consumed
/// immediately, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported ground speed, when the device provides one.
    pub speed_mps: Option<f64>,
    pub timestamp_ms: u64,
}

/// Identifies one subscription so late samples from a cancelled
/// subscription can be told apart from the live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositioningOperation {
    Subscribe { subscription: SubscriptionId },
    Cancel { subscription: SubscriptionId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositioningOutput {
    Sample(LocationSample),
    /// The subsystem errored or access was revoked. The shell emits no
    /// further samples for this subscription.
    Failed { reason: String },
}

impl Operation for PositioningOperation {
    type Output = PositioningOutput;
}

#[derive(Debug)]
pub struct Positioning<Ev> {
    context: CapabilityContext<PositioningOperation, Ev>,
}

impl<Ev> Clone for Positioning<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Capability<Ev> for Positioning<Ev> {
    type Operation = PositioningOperation;
    type MappedSelf<MappedEv> = Positioning<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + Copy + 'static,
        Ev: 'static,
        NewEv: 'static,
    {
        Positioning::new(self.context.map_event(f))
    }
}

impl<Ev> Positioning<Ev>
where
    Ev: 'static,
{
    #[must_use]
    pub fn new(context: CapabilityContext<PositioningOperation, Ev>) -> Self {
        Self { context }
    }

    /// Open a positioning subscription. Every sample (or the terminal
    /// failure) is delivered to the update loop via `make_event`. The
    /// stream ends when the shell closes it after [`Self::cancel`], or
    /// after a failure.
    pub fn subscribe<F>(&self, subscription: SubscriptionId, make_event: F)
    where
        F: Fn(PositioningOutput) -> Ev + Send + Sync + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let mut samples =
                context.stream_from_shell(PositioningOperation::Subscribe { subscription });

            while let Some(output) = samples.next().await {
                let failed = matches!(output, PositioningOutput::Failed { .. });
                context.update_app(make_event(output));
                if failed {
                    break;
                }
            }
        });
    }

    /// Release the subscription. The shell guarantees no samples are
    /// emitted after the cancellation is processed.
    pub fn cancel(&self, subscription: SubscriptionId) {
        let context = self.context.clone();
        self.context.spawn(async move {
            context
                .notify_shell(PositioningOperation::Cancel { subscription })
                .await;
        });
    }
}

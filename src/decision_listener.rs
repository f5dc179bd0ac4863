use crate::events::DecisionNotification;

/// Receives a notification for every decision the [`Client`](crate::Client) makes.
pub trait DecisionListener {
    fn on_decision(&self, notification: DecisionNotification);
}

pub(crate) struct NoopDecisionListener;
impl DecisionListener for NoopDecisionListener {
    fn on_decision(&self, _notification: DecisionNotification) {}
}

impl<T: Fn(DecisionNotification)> DecisionListener for T {
    fn on_decision(&self, notification: DecisionNotification) {
        self(notification);
    }
}

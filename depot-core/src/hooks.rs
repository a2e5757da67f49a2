//! Session side effects the dispatcher triggers but does not implement.

use crate::envelope::Envelope;

/// Tears down UI-level session state and routes the user to a login surface.
///
/// Invoked at most once per terminal-failure episode. A new episode begins
/// when a credential is stored again (login or successful refresh).
pub trait LogoutHandler: Send + Sync {
    fn on_logout(&self);
}

impl<F> LogoutHandler for F
where
    F: Fn() + Send + Sync,
{
    fn on_logout(&self) {
        self()
    }
}

/// Shows a failure to the user.
///
/// Only called for failure envelopes allowed by the notification rules:
/// never for rate-limited calls or calls marked silent.
pub trait Notifier: Send + Sync {
    fn notify(&self, envelope: &Envelope);
}

impl<F> Notifier for F
where
    F: Fn(&Envelope) + Send + Sync,
{
    fn notify(&self, envelope: &Envelope) {
        self(envelope)
    }
}

/// Hook that does nothing; the default for both collaborators.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl LogoutHandler for NoopHooks {
    fn on_logout(&self) {}
}

impl Notifier for NoopHooks {
    fn notify(&self, _envelope: &Envelope) {}
}

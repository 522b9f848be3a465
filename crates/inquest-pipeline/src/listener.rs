use inquest_core::LogIdentity;

/// Notifications raised by the orchestrators, e.g. to refresh a view.
/// All methods default to doing nothing.
pub trait LogListener: Send + Sync {
    /// New encounter metadata (folder or display name) was recorded.
    fn on_new_meta(&self) {}

    /// A log advanced its state.
    fn on_new_log(&self, identity: &LogIdentity) {
        let _ = identity;
    }

    /// The upload service issued a user token for this installation.
    fn on_user_token(&self, token: &str) {
        let _ = token;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl LogListener for NoopListener {}

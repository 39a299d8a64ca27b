//! Provider adapters: mail API, repo CLI, OS file opener, triage monitor.
//!
//! Each provider is a trait with a live adapter and an always-absent stub;
//! absence is a normal, non-fatal condition. Provider failures are returned
//! to the assistant as successful tool results carrying a structured
//! `{success:false, error, message}` payload, so callers see actionable
//! text rather than an RPC error.

mod error;
pub mod mail;
pub mod monitor;
pub mod opener;
pub mod repo;

pub use error::ProviderError;
pub use mail::{AbsentMail, GmailClient, MailProvider};
pub use monitor::{AbsentMonitor, InboxMonitor, TriageMonitor};
pub use opener::{FileOpener, PlatformOpener};
pub use repo::{AbsentRepo, GhCli, RepoProvider};

use std::sync::Arc;
use std::sync::OnceLock;

/// The bridge's provider adapters, selected once at startup.
pub struct ProviderSet {
    pub mail: Arc<dyn MailProvider>,
    pub repo: Arc<dyn RepoProvider>,
    pub opener: Arc<dyn FileOpener>,
    monitor: OnceLock<Arc<dyn TriageMonitor>>,
}

impl ProviderSet {
    /// Probe the environment and select live adapters where configured,
    /// absent stubs otherwise.
    pub fn from_env() -> Self {
        let mail: Arc<dyn MailProvider> = match GmailClient::from_env() {
            Some(client) => Arc::new(client),
            None => Arc::new(AbsentMail),
        };
        let repo: Arc<dyn RepoProvider> = if GhCli::installed() {
            Arc::new(GhCli::new())
        } else {
            Arc::new(AbsentRepo)
        };
        Self {
            mail,
            repo,
            opener: Arc::new(PlatformOpener),
            monitor: OnceLock::new(),
        }
    }

    /// All stubs; the bridge runs fine with every provider absent.
    pub fn absent() -> Self {
        Self {
            mail: Arc::new(AbsentMail),
            repo: Arc::new(AbsentRepo),
            opener: Arc::new(PlatformOpener),
            monitor: OnceLock::new(),
        }
    }

    pub fn with_mail(mut self, mail: Arc<dyn MailProvider>) -> Self {
        self.mail = mail;
        self
    }

    pub fn with_repo(mut self, repo: Arc<dyn RepoProvider>) -> Self {
        self.repo = repo;
        self
    }

    pub fn with_opener(mut self, opener: Arc<dyn FileOpener>) -> Self {
        self.opener = opener;
        self
    }

    /// The triage monitor, initialized on first use. It rides on the mail
    /// provider, so it is absent whenever mail is.
    pub fn monitor(&self) -> Arc<dyn TriageMonitor> {
        self.monitor
            .get_or_init(|| {
                if self.mail.is_configured() {
                    Arc::new(InboxMonitor::new(Arc::clone(&self.mail))) as Arc<dyn TriageMonitor>
                } else {
                    Arc::new(AbsentMonitor)
                }
            })
            .clone()
    }
}

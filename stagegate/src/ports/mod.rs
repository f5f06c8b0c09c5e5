//! Ports to the outside world.
//!
//! The engine only ever talks to these traits. Production implementations
//! shell out or speak HTTP; the [`testing`](crate::testing) module provides
//! scripted ones.

mod artifacts;
mod command;
mod container;
mod notify;
mod probe;

pub use artifacts::{digest, save_best_effort, ArtifactStore, FsArtifactStore, InMemoryArtifactStore};
pub use command::{CommandOutput, CommandRunner, ShellCommandRunner};
pub use container::{shell_quote, ComposeContainerService, ContainerService};
pub use notify::{CollectingNotifier, LoggingNotifier, NotificationSink};
#[cfg(feature = "http-probe")]
pub use probe::HttpProber;
pub use probe::{CommandProbe, ContentMatches, EndpointReachable, Prober};

#[cfg(test)]
pub use artifacts::MockArtifactStore;
#[cfg(test)]
pub use command::MockCommandRunner;
#[cfg(test)]
pub use notify::MockNotificationSink;
#[cfg(test)]
pub use probe::MockProber;

use std::sync::Arc;

/// The collaborators the deploy pipeline needs.
#[derive(Clone)]
pub struct DeployPorts {
    /// Runs shell commands (build steps, the test suite).
    pub commands: Arc<dyn CommandRunner>,
    /// Manages the dependent services.
    pub containers: Arc<dyn ContainerService>,
    /// Persists logs and reports.
    pub artifacts: Arc<dyn ArtifactStore>,
    /// Receives human-readable status lines.
    pub notifier: Arc<dyn NotificationSink>,
    /// Checks endpoints over HTTP.
    pub prober: Arc<dyn Prober>,
}

impl std::fmt::Debug for DeployPorts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployPorts").finish_non_exhaustive()
    }
}

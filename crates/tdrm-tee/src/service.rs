//! The service side of the boundary.

use tdrm_proto::{Command, CommandId, OpenRequest, TeeError};
use tracing::{debug, warn};

use crate::identity::ClientIdentity;

/// Fast-path handler that serves a command's memory region without entering
/// the service's command dispatcher.
pub trait UpdateShortcut: Send {
    /// Transform `data` in place.
    fn update(&mut self, data: &mut [u8]) -> Result<(), TeeError>;
}

/// How the secure world treats shortcut activation requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShortcutPolicy {
    /// Shortcuts are installed and serve their command.
    #[default]
    Enabled,
    /// Activation fails.
    Refused,
    /// Activation reports success but the command still reaches the service.
    Bypassed,
}

/// Collects the shortcut a service asks for while opening a session.
pub struct ShortcutRegistrar {
    policy: ShortcutPolicy,
    installed: Option<(CommandId, Box<dyn UpdateShortcut>)>,
}

impl ShortcutRegistrar {
    pub fn new(policy: ShortcutPolicy) -> Self {
        ShortcutRegistrar {
            policy,
            installed: None,
        }
    }

    /// Route future `command` invocations on this session to `shortcut`.
    ///
    /// A session holds at most one shortcut.
    pub fn activate(
        &mut self,
        command: CommandId,
        shortcut: Box<dyn UpdateShortcut>,
    ) -> Result<(), TeeError> {
        if self.installed.is_some() {
            return Err(TeeError::BadState);
        }
        match self.policy {
            ShortcutPolicy::Enabled => {
                debug!(?command, "update shortcut activated");
                self.installed = Some((command, shortcut));
                Ok(())
            }
            ShortcutPolicy::Refused => {
                warn!(?command, "update shortcut refused");
                Err(TeeError::Generic)
            }
            ShortcutPolicy::Bypassed => {
                debug!(?command, "update shortcut accepted but not installed");
                Ok(())
            }
        }
    }

    pub fn is_active(&self, command: CommandId) -> bool {
        matches!(&self.installed, Some((c, _)) if *c == command)
    }

    pub fn into_installed(self) -> Option<(CommandId, Box<dyn UpdateShortcut>)> {
        self.installed
    }
}

impl std::fmt::Debug for ShortcutRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShortcutRegistrar")
            .field("policy", &self.policy)
            .field("installed", &self.installed.as_ref().map(|(c, _)| *c))
            .finish()
    }
}

/// A service hosted in the secure world.
///
/// The host calls `create` once before the first session and `destroy` once
/// after the last. Calls on one session are serialized by the host; calls on
/// different sessions may run concurrently.
pub trait TrustedService: Send + Sync + 'static {
    /// Per-session context.
    type Session: Send + 'static;

    fn create(&self) -> Result<(), TeeError>;

    fn destroy(&self);

    fn open_session(
        &self,
        client: &ClientIdentity,
        request: OpenRequest<'_>,
        shortcuts: &mut ShortcutRegistrar,
    ) -> Result<Self::Session, TeeError>;

    fn invoke_command(&self, session: &mut Self::Session, command: Command) -> Result<(), TeeError>;

    fn close_session(&self, session: Self::Session);
}

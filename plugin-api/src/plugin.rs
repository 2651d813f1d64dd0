//! Audio source plugin contract.
//!
//! A plugin wraps whatever actually produces audio for one source: a streaming
//! receiver daemon, a pairing daemon, a media player. The core never looks
//! inside; it only starts the plugin against a [`DeviceBinding`], stops it, and
//! watches the status it reports.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;

use crate::binding::DeviceBinding;
use crate::error::PluginError;
use crate::source::{PluginState, SourceId};

/// Opaque per-source metadata (track info, playback position, ...)
pub type Metadata = Map<String, Value>;

/// Trait implemented by every audio source backend.
///
/// # Status reporting
///
/// `start` only has to *begin* bringing the source up. Progress is reported
/// through the watch channel returned by [`subscribe`](Self::subscribe):
/// `Starting` → `Connecting` → `Connected`, or `Error` at any point. The core
/// subscribes before calling `start`, so a plugin that reports `Connected`
/// synchronously inside `start` is observed correctly.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; they are shared behind `Arc` and
/// called from async tasks.
///
/// # Example
///
/// ```rust,ignore
/// use plugin_api::{AudioPlugin, DeviceBinding, PluginError, PluginState, SourceId};
///
/// struct RadioPlugin { status: watch::Sender<PluginState> }
///
/// #[async_trait]
/// impl AudioPlugin for RadioPlugin {
///     fn source_id(&self) -> SourceId { SourceId::Radio }
///
///     async fn start(&self, binding: &DeviceBinding) -> Result<(), PluginError> {
///         self.status.send_replace(PluginState::Starting);
///         // launch the player with `--device <binding>` ...
///         Ok(())
///     }
///
///     async fn stop(&self) -> Result<(), PluginError> {
///         self.status.send_replace(PluginState::Inactive);
///         Ok(())
///     }
///
///     fn status(&self) -> PluginState { *self.status.borrow() }
///
///     fn subscribe(&self) -> watch::Receiver<PluginState> { self.status.subscribe() }
/// }
/// ```
#[async_trait]
pub trait AudioPlugin: Send + Sync {
    /// The source this plugin backs
    fn source_id(&self) -> SourceId;

    /// Begin playback routed to `binding`
    async fn start(&self, binding: &DeviceBinding) -> Result<(), PluginError>;

    /// Stop playback. Best-effort: the core logs failures and carries on.
    async fn stop(&self) -> Result<(), PluginError>;

    /// Current status
    fn status(&self) -> PluginState;

    /// Subscribe to status changes
    fn subscribe(&self) -> watch::Receiver<PluginState>;

    /// Current metadata, relayed verbatim by the core
    fn metadata(&self) -> Metadata {
        Metadata::new()
    }
}

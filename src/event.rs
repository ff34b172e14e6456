/// Engine events
///
/// Published by the connectivity observer, the write queue surface, and the
/// sync coordinator; consumed by the engine's event loop (and any UI that
/// wants badges).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
  /// Connectivity transitioned to online.
  Online,
  /// Connectivity transitioned to offline.
  Offline,
  /// Periodic poll round; carries the probe's current reading so the
  /// engine's view converges even when no transition was ever emitted.
  Tick { online: bool },
  /// An entry was appended to the write queue.
  QueueChanged,
  /// A drain pass started.
  SyncStarted,
  /// A drain pass finished.
  SyncFinished { synced: usize, failed: usize },
}

use log::error;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::scenario::PlaybackId;

use super::state::MixerState;

/// Observer of mixer and playback lifecycle events.
///
/// Callbacks run on the thread that caused the event, often the mixer's
/// worker, and should return quickly. A panicking listener is logged and
/// skipped.
pub trait MixerListener: Send + Sync {
    fn state_changed(&self, _from: MixerState, _to: MixerState) {}

    /// First audio of a playback was queued.
    fn scenario_started(&self, _id: PlaybackId) {}

    /// A playback looped back to the start of its resource.
    fn scenario_restarted(&self, _id: PlaybackId) {}

    /// A playback ended and was removed.
    fn scenario_stopped(&self, _id: PlaybackId) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MixerEvent {
    StateChanged { from: MixerState, to: MixerState },
    ScenarioStarted(PlaybackId),
    ScenarioRestarted(PlaybackId),
    ScenarioStopped(PlaybackId),
}

#[derive(Default)]
pub(crate) struct Listeners {
    list: Mutex<Vec<Arc<dyn MixerListener>>>,
}

impl Listeners {
    pub fn add(&self, listener: Arc<dyn MixerListener>) {
        self.list.lock().unwrap().push(listener);
    }

    pub fn emit(&self, event: MixerEvent) {
        let listeners = self.list.lock().unwrap().clone();
        for listener in listeners {
            let delivered = panic::catch_unwind(AssertUnwindSafe(|| match event {
                MixerEvent::StateChanged { from, to } => listener.state_changed(from, to),
                MixerEvent::ScenarioStarted(id) => listener.scenario_started(id),
                MixerEvent::ScenarioRestarted(id) => listener.scenario_restarted(id),
                MixerEvent::ScenarioStopped(id) => listener.scenario_stopped(id),
            }));
            if delivered.is_err() {
                error!("mixer listener panicked handling {:?}", event);
            }
        }
    }
}

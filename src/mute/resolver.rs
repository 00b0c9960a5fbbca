// PID to audio-process-object translation
//
// The audio subsystem addresses processes by its own opaque object ids,
// not by OS pid. A process only has such an object while the subsystem
// has adopted it, so the association can appear and disappear between
// calls; nothing here is cached.

use std::sync::Arc;

use tracing::debug;

use super::platform::AudioHost;
use super::types::{AudioProcessObject, Pid};

/// Pure lookup from OS pids to audio process objects. No state, no side
/// effects.
pub struct ProcessResolver {
    host: Arc<dyn AudioHost>,
}

impl ProcessResolver {
    pub fn new(host: Arc<dyn AudioHost>) -> Self {
        Self { host }
    }

    /// `None` means the process has no audio object right now. Callers
    /// must treat that as an empty result, not a failure.
    pub fn resolve(&self, pid: Pid) -> Option<AudioProcessObject> {
        self.host.audio_object_for_pid(pid)
    }

    /// Resolve a pid set, tolerating partial resolution. Pids without an
    /// audio object are skipped; duplicates collapse to one object.
    pub fn resolve_all(&self, pids: &[Pid]) -> Vec<AudioProcessObject> {
        let mut objects = Vec::with_capacity(pids.len());
        for &pid in pids {
            match self.resolve(pid) {
                Some(object) if !objects.contains(&object) => objects.push(object),
                Some(_) => {}
                None => debug!(pid, "skipping pid without an audio object"),
            }
        }
        objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mute::platform::MockAudioHost;

    #[test]
    fn resolve_passes_through_the_host() {
        let mut host = MockAudioHost::new();
        host.expect_audio_object_for_pid()
            .withf(|pid| *pid == 77)
            .return_const(Some(AudioProcessObject(4001)));

        let resolver = ProcessResolver::new(Arc::new(host));
        assert_eq!(resolver.resolve(77), Some(AudioProcessObject(4001)));
    }

    #[test]
    fn resolve_all_tolerates_partial_resolution() {
        let mut host = MockAudioHost::new();
        host.expect_audio_object_for_pid()
            .returning(|pid| match pid {
                1 => Some(AudioProcessObject(100)),
                3 => Some(AudioProcessObject(300)),
                _ => None,
            });

        let resolver = ProcessResolver::new(Arc::new(host));
        let objects = resolver.resolve_all(&[1, 2, 3, 4]);
        assert_eq!(objects, vec![AudioProcessObject(100), AudioProcessObject(300)]);
    }

    #[test]
    fn resolve_all_dedupes_objects() {
        let mut host = MockAudioHost::new();
        host.expect_audio_object_for_pid()
            .returning(|_| Some(AudioProcessObject(9)));

        let resolver = ProcessResolver::new(Arc::new(host));
        assert_eq!(resolver.resolve_all(&[10, 11]).len(), 1);
    }
}

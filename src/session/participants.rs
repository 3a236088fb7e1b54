use std::collections::HashMap;

use crate::rtc::{MediaKind, RemoteTrack, Uid};

/// Remote tracks held for one peer
#[derive(Default)]
pub(crate) struct RemoteParticipant {
    audio: Option<Box<dyn RemoteTrack>>,
    video: Option<Box<dyn RemoteTrack>>,
}

impl RemoteParticipant {
    fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// Remote peers with at least one published track
#[derive(Default)]
pub(crate) struct ParticipantSet {
    remote: HashMap<Uid, RemoteParticipant>,
}

impl ParticipantSet {
    /// Attach a subscribed track; audio starts playing immediately
    pub fn attach(&mut self, uid: Uid, track: Box<dyn RemoteTrack>) {
        let participant = self.remote.entry(uid).or_default();
        let slot = match track.kind() {
            MediaKind::Audio => {
                track.play();
                &mut participant.audio
            }
            MediaKind::Video => &mut participant.video,
        };
        if let Some(old) = slot.replace(track) {
            old.stop();
        }
    }

    /// Drop one track; the peer leaves the set when nothing is left
    pub fn detach(&mut self, uid: Uid, kind: MediaKind) {
        let Some(participant) = self.remote.get_mut(&uid) else {
            return;
        };
        let removed = match kind {
            MediaKind::Audio => participant.audio.take(),
            MediaKind::Video => participant.video.take(),
        };
        if let Some(track) = removed {
            track.stop();
        }
        if participant.is_empty() {
            self.remote.remove(&uid);
        }
    }

    pub fn remote_count(&self) -> usize {
        self.remote.len()
    }

    pub fn uids(&self) -> Vec<Uid> {
        let mut uids: Vec<Uid> = self.remote.keys().copied().collect();
        uids.sort_unstable();
        uids
    }

    /// Stop every remote track and forget all peers
    pub fn clear(&mut self) {
        for (_, participant) in self.remote.drain() {
            if let Some(track) = participant.audio {
                track.stop();
            }
            if let Some(track) = participant.video {
                track.stop();
            }
        }
    }
}

//! Feed bookkeeping for the subscriber connection
//!
//! The gateway identifies remote media by publisher id and media-line
//! index at signalling time, while the local peer connection only exposes
//! transceivers by position after negotiation. This module keeps the
//! mapping between the two and converges it to whatever stream set the
//! gateway last pushed - server truth wins, even over feeds that still
//! have traffic arriving.

use crate::peer::MediaKind;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Last reported render resolution of a feed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// One remote publisher's media on the subscriber connection
#[derive(Debug, Clone)]
pub struct Feed {
    /// Remote publisher identity
    pub id: u64,
    /// Display name announced by the publisher
    pub display: String,
    /// Media-line indices this feed occupies
    pub mids: BTreeSet<usize>,
    /// Updated by render-frame callbacks from the presentation layer
    pub resolution: Resolution,
    /// Remote track ids keyed by media kind
    pub tracks: HashMap<MediaKind, String>,
}

impl Feed {
    fn new(id: u64) -> Self {
        Feed {
            id,
            display: format!("feed_id:{}", id),
            mids: BTreeSet::new(),
            resolution: Resolution::default(),
            tracks: HashMap::new(),
        }
    }
}

/// Presentation-layer view of a feed
#[derive(Debug, Clone, Serialize)]
pub struct FeedSnapshot {
    pub feed_id: u64,
    pub display_name: String,
    pub resolution: Resolution,
}

/// Feeds keyed by publisher id, converged to the gateway's latest push
#[derive(Debug, Default)]
pub struct FeedRegistry {
    feeds: BTreeMap<u64, Feed>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Converge bookkeeping to exactly the given stream list.
    ///
    /// Each entry is one gateway stream object carrying `feed_id`,
    /// `mindex` and optionally `feed_display`; the caller has already
    /// filtered out inactive streams. Feeds absent from the list are
    /// pruned and every surviving feed's mid set is rebuilt, so repeated
    /// syncs are idempotent. Display names, resolutions and attached
    /// tracks survive across syncs.
    pub fn sync(&mut self, streams: &[Value]) {
        let mut mids_by_feed: BTreeMap<u64, BTreeSet<usize>> = BTreeMap::new();
        let mut displays: HashMap<u64, String> = HashMap::new();

        for stream in streams {
            let Some(feed_id) = stream.get("feed_id").and_then(Value::as_u64) else {
                continue;
            };
            let mids = mids_by_feed.entry(feed_id).or_default();
            if let Some(mindex) = stream.get("mindex").and_then(Value::as_u64) {
                mids.insert(mindex as usize);
            }
            if let Some(display) = stream.get("feed_display").and_then(Value::as_str) {
                displays.insert(feed_id, display.to_string());
            }
        }

        self.feeds.retain(|id, _| mids_by_feed.contains_key(id));
        for (feed_id, mids) in mids_by_feed {
            let feed = self.feeds.entry(feed_id).or_insert_with(|| Feed::new(feed_id));
            feed.mids = mids;
            if let Some(display) = displays.remove(&feed_id) {
                feed.display = display;
            }
        }
    }

    /// Resolve the feed occupying the given transceiver position
    pub fn feed_for_transceiver(&self, index: usize) -> Option<u64> {
        self.feeds
            .values()
            .find(|feed| feed.mids.contains(&index))
            .map(|feed| feed.id)
    }

    /// Record a remote track on a feed, keyed by its media kind
    pub fn attach_track(&mut self, feed_id: u64, kind: MediaKind, track_id: String) -> bool {
        match self.feeds.get_mut(&feed_id) {
            Some(feed) => {
                feed.tracks.insert(kind, track_id);
                true
            }
            None => false,
        }
    }

    /// Update a feed's render resolution
    pub fn set_resolution(&mut self, feed_id: u64, width: u32, height: u32) -> bool {
        match self.feeds.get_mut(&feed_id) {
            Some(feed) => {
                feed.resolution = Resolution { width, height };
                true
            }
            None => false,
        }
    }

    pub fn get(&self, feed_id: u64) -> Option<&Feed> {
        self.feeds.get(&feed_id)
    }

    pub fn len(&self) -> usize {
        self.feeds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }

    /// Ordered snapshot for the presentation layer
    pub fn snapshot(&self) -> Vec<FeedSnapshot> {
        self.feeds
            .values()
            .map(|feed| FeedSnapshot {
                feed_id: feed.id,
                display_name: feed.display.clone(),
                resolution: feed.resolution,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stream(feed_id: u64, mindex: u64) -> Value {
        json!({ "feed_id": feed_id, "mindex": mindex, "active": true })
    }

    #[test]
    fn sync_builds_mid_sets_per_feed() {
        let mut registry = FeedRegistry::new();
        registry.sync(&[stream(7, 0), stream(7, 1), stream(9, 2)]);

        let feed = registry.get(7).unwrap();
        assert_eq!(feed.mids.iter().copied().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(registry.get(9).unwrap().mids.len(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn sync_prunes_absent_feeds() {
        let mut registry = FeedRegistry::new();
        registry.sync(&[stream(7, 0), stream(7, 1), stream(9, 2)]);
        registry.sync(&[stream(7, 0), stream(7, 1)]);

        assert!(registry.get(9).is_none());
        assert!(registry.get(7).is_some());
    }

    #[test]
    fn sync_converges_to_latest_push() {
        let mut registry = FeedRegistry::new();
        registry.sync(&[stream(7, 0), stream(7, 1)]);
        registry.sync(&[stream(7, 0)]);

        let feed = registry.get(7).unwrap();
        assert_eq!(feed.mids.iter().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn sync_keeps_display_and_resolution() {
        let mut registry = FeedRegistry::new();
        registry.sync(&[json!({ "feed_id": 7, "mindex": 0, "feed_display": "alice" })]);
        registry.set_resolution(7, 640, 480);

        registry.sync(&[stream(7, 0), stream(7, 1)]);
        let feed = registry.get(7).unwrap();
        assert_eq!(feed.display, "alice");
        assert_eq!(feed.resolution, Resolution { width: 640, height: 480 });
    }

    #[test]
    fn missing_display_gets_feed_id_placeholder() {
        let mut registry = FeedRegistry::new();
        registry.sync(&[stream(7, 0)]);
        assert_eq!(registry.get(7).unwrap().display, "feed_id:7");
    }

    #[test]
    fn transceiver_lookup_matches_mid_sets() {
        let mut registry = FeedRegistry::new();
        registry.sync(&[stream(7, 0), stream(7, 1), stream(9, 2)]);

        assert_eq!(registry.feed_for_transceiver(0), Some(7));
        assert_eq!(registry.feed_for_transceiver(1), Some(7));
        assert_eq!(registry.feed_for_transceiver(2), Some(9));
        assert_eq!(registry.feed_for_transceiver(3), None);
    }

    #[test]
    fn attach_track_keyed_by_kind() {
        let mut registry = FeedRegistry::new();
        registry.sync(&[stream(7, 0)]);

        assert!(registry.attach_track(7, MediaKind::Video, "track-v".to_string()));
        assert!(registry.attach_track(7, MediaKind::Audio, "track-a".to_string()));
        assert!(!registry.attach_track(9, MediaKind::Video, "nope".to_string()));

        let feed = registry.get(7).unwrap();
        assert_eq!(feed.tracks[&MediaKind::Video], "track-v");
        assert_eq!(feed.tracks[&MediaKind::Audio], "track-a");
    }

    #[test]
    fn snapshot_is_ordered_by_feed_id() {
        let mut registry = FeedRegistry::new();
        registry.sync(&[stream(9, 1), stream(7, 0)]);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].feed_id, 7);
        assert_eq!(snapshot[1].feed_id, 9);
    }
}

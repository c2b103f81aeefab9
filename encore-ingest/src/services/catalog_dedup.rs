//! Studio catalog filtering and deduplication
//!
//! Live recordings are dropped, then tracks are grouped by recording id and
//! one track per group survives: highest popularity, then earliest release
//! date (unknown dates last), then whichever was seen first.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::clients::Track;

/// Result of [`select_studio_tracks`]
#[derive(Debug, Default)]
pub struct StudioSelection {
    /// One track per recording id, in first-seen order
    pub kept: Vec<Track>,
    /// Tracks dropped for liveness above the threshold
    pub live_filtered: usize,
    /// Tracks dropped because the catalog gave no recording id
    pub missing_recording_id: usize,
    /// Tracks that lost to a better track with the same recording id
    pub duplicates: usize,
}

/// Liveness strictly above the threshold marks a live recording
pub fn is_live(track: &Track, threshold: f64) -> bool {
    track.liveness.is_some_and(|liveness| liveness > threshold)
}

/// Ordering of two tracks for the same recording; `Greater` means `a` wins
pub fn compare_candidates(a: &Track, b: &Track) -> Ordering {
    a.popularity
        .cmp(&b.popularity)
        .then_with(|| match (a.release_date, b.release_date) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        })
}

pub fn select_studio_tracks<I>(tracks: I, liveness_threshold: f64) -> StudioSelection
where
    I: IntoIterator<Item = Track>,
{
    let mut selection = StudioSelection::default();
    let mut index_by_recording: HashMap<String, usize> = HashMap::new();

    for track in tracks {
        if is_live(&track, liveness_threshold) {
            selection.live_filtered += 1;
            continue;
        }

        let Some(recording_id) = track.recording_id.clone() else {
            selection.missing_recording_id += 1;
            continue;
        };

        match index_by_recording.get(&recording_id) {
            Some(&index) => {
                selection.duplicates += 1;
                // Strictly better only: ties keep the first-seen track
                if compare_candidates(&track, &selection.kept[index]) == Ordering::Greater {
                    selection.kept[index] = track;
                }
            }
            None => {
                index_by_recording.insert(recording_id, selection.kept.len());
                selection.kept.push(track);
            }
        }
    }

    selection
}

//! Rekordbox export schema: `DJ_PLAYLISTS` > `COLLECTION` > `TRACK` elements
//! keyed by numeric `TrackID`, with per-field attributes and nested `TEMPO`
//! elements for the beatgrid. Positions are seconds, bpm uses 2 decimals,
//! keys are free text in `Tonality`.

use std::path::PathBuf;

use crate::library::xml::{XmlDocument, XmlElement};
use crate::{LibraryError, Result, TempoMarker, Track, TrackSource};

pub const DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\"?>";

pub fn parse_tracks(doc: &XmlDocument) -> Result<Vec<Track>> {
    let collection = doc
        .root
        .child("COLLECTION")
        .ok_or_else(|| LibraryError::UnsupportedDocument("missing COLLECTION".into()))?;

    let mut tracks = Vec::new();
    for element in collection.elements_named("TRACK") {
        match track_from_element(element) {
            Some(track) => tracks.push(track),
            None => log::warn!("skipping TRACK element without TrackID"),
        }
    }
    Ok(tracks)
}

fn track_from_element(el: &XmlElement) -> Option<Track> {
    let native_id = el.attr_text("TrackID")?;
    let mut track = Track::new(TrackSource::Rekordbox, native_id);

    track.title = el.attr_text("Name").map(str::to_string);
    track.artist = el.attr_text("Artist").map(str::to_string);
    track.album = el.attr_text("Album").map(str::to_string);
    track.genre = el.attr_text("Genre").map(str::to_string);
    track.composer = el.attr_text("Composer").map(str::to_string);
    track.label = el.attr_text("Label").map(str::to_string);
    track.comment = el.attr_text("Comments").map(str::to_string);
    track.year = el.parse_attr::<i32>("Year").filter(|y| *y > 0);
    track.rating = el.parse_attr::<u8>("Rating").filter(|r| *r > 0);
    track.duration_secs = el.parse_attr::<f64>("TotalTime").filter(|d| *d > 0.0);
    track.stored_bpm = el.parse_attr::<f64>("AverageBpm").filter(|b| *b > 0.0);
    track.stored_key = el.attr_text("Tonality").map(str::to_string);
    track.bitrate = el.parse_attr::<u32>("BitRate").filter(|b| *b > 0);
    track.sample_rate = el.parse_attr::<u32>("SampleRate").filter(|r| *r > 0);
    track.file_size = el.parse_attr::<u64>("Size").filter(|s| *s > 0);
    track.file_type = el.attr_text("Kind").map(str::to_string);
    track.location = el.attr_text("Location").map(location_path);

    for tempo in el.elements_named("TEMPO") {
        let (Some(position), Some(bpm)) =
            (tempo.parse_attr::<f64>("Inizio"), tempo.parse_attr::<f64>("Bpm"))
        else {
            continue;
        };
        track.beatgrid.push(TempoMarker {
            position_secs: position,
            bpm,
            meter: tempo
                .attr_text("Metro")
                .unwrap_or("4/4")
                .to_string(),
            beat: tempo.parse_attr::<u32>("Battito").unwrap_or(1),
        });
    }

    Some(track)
}

fn location_path(value: &str) -> PathBuf {
    let stripped = value
        .strip_prefix("file://localhost")
        .unwrap_or(value);
    PathBuf::from(stripped)
}

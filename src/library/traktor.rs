//! Traktor NML schema: `NML` > `COLLECTION` > `ENTRY` elements keyed by
//! `AUDIO_ID` (falling back to `TITLE`), with metadata spread over child
//! elements. Cue positions are milliseconds, bpm uses 6 decimals, keys are
//! the 0-23 `MUSICAL_KEY@VALUE` enumeration. The `CUE_V2` element with
//! `TYPE="4"` anchors the beatgrid.

use std::path::PathBuf;

use crate::keys::MusicalKey;
use crate::library::xml::{XmlDocument, XmlElement};
use crate::{LibraryError, Result, TempoMarker, Track, TrackSource};

pub const DECLARATION: &str =
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>";

/// Grid anchor cue type.
pub const GRID_CUE_TYPE: &str = "4";

pub fn parse_tracks(doc: &XmlDocument) -> Result<Vec<Track>> {
    let collection = doc
        .root
        .child("COLLECTION")
        .ok_or_else(|| LibraryError::UnsupportedDocument("missing COLLECTION".into()))?;

    let mut tracks = Vec::new();
    for element in collection.elements_named("ENTRY") {
        match track_from_element(element) {
            Some(track) => tracks.push(track),
            None => log::warn!("skipping ENTRY element without AUDIO_ID or TITLE"),
        }
    }
    Ok(tracks)
}

pub fn native_id(el: &XmlElement) -> Option<&str> {
    el.attr_text("AUDIO_ID").or_else(|| el.attr_text("TITLE"))
}

fn track_from_element(el: &XmlElement) -> Option<Track> {
    let mut track = Track::new(TrackSource::Traktor, native_id(el)?);

    track.title = el.attr_text("TITLE").map(str::to_string);
    track.artist = el.attr_text("ARTIST").map(str::to_string);
    track.album = el
        .child("ALBUM")
        .and_then(|a| a.attr_text("TITLE"))
        .map(str::to_string);

    if let Some(info) = el.child("INFO") {
        track.genre = info.attr_text("GENRE").map(str::to_string);
        track.comment = info.attr_text("COMMENT").map(str::to_string);
        track.label = info.attr_text("LABEL").map(str::to_string);
        track.rating = info.parse_attr::<u8>("RANKING").filter(|r| *r > 0);
        track.duration_secs = info
            .parse_attr::<f64>("PLAYTIME_FLOAT")
            .or_else(|| info.parse_attr::<f64>("PLAYTIME"))
            .filter(|d| *d > 0.0);
        track.year = info
            .attr_text("RELEASE_DATE")
            .and_then(|d| d.split('/').next())
            .and_then(|y| y.trim().parse::<i32>().ok())
            .filter(|y| *y > 0);
        track.bitrate = info
            .parse_attr::<u32>("BITRATE")
            .map(|b| if b >= 10_000 { b / 1000 } else { b })
            .filter(|b| *b > 0);
        // FILESIZE is kilobytes in NML.
        track.file_size = info
            .parse_attr::<u64>("FILESIZE")
            .map(|kb| kb * 1024)
            .filter(|s| *s > 0);
        track.stored_key = info.attr_text("KEY").map(str::to_string);
    }

    if let Some(key) = el
        .child("MUSICAL_KEY")
        .and_then(|k| k.parse_attr::<u8>("VALUE"))
        .and_then(MusicalKey::from_numeric)
    {
        track.stored_key = Some(key.name());
    }

    if let Some(location) = el.child("LOCATION") {
        let dir = location.attr_text("DIR").unwrap_or("");
        let file = location.attr_text("FILE").unwrap_or("");
        if !file.is_empty() {
            let volume = location.attr_text("VOLUME").unwrap_or("");
            track.location = Some(PathBuf::from(format!(
                "{}{}{}",
                volume,
                dir.replace(':', "/"),
                file
            )));
            track.file_type = file
                .rsplit('.')
                .next()
                .filter(|ext| ext.len() <= 5)
                .map(str::to_uppercase);
        }
    }

    let bpm = el.child("TEMPO").and_then(|t| t.parse_attr::<f64>("BPM"));
    track.stored_bpm = bpm.filter(|b| *b > 0.0);

    if let Some(bpm) = track.stored_bpm {
        for cue in el.elements_named("CUE_V2") {
            if cue.attr("TYPE") != Some(GRID_CUE_TYPE) {
                continue;
            }
            let Some(start_ms) = cue.parse_attr::<f64>("START") else {
                continue;
            };
            track.beatgrid.push(TempoMarker {
                position_secs: start_ms / 1000.0,
                bpm,
                meter: "4/4".to_string(),
                beat: 1,
            });
        }
    }

    Some(track)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::xml;
    use pretty_assertions::assert_eq;

    const EXPORT: &str = concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n",
        "<NML VERSION=\"19\">\n",
        "  <HEAD COMPANY=\"www.native-instruments.com\" PROGRAM=\"Traktor\"/>\n",
        "  <COLLECTION ENTRIES=\"1\">\n",
        "    <ENTRY TITLE=\"One\" ARTIST=\"DJ A\" AUDIO_ID=\"AbCd==\">\n",
        "      <LOCATION DIR=\":Music:House:\" FILE=\"one.flac\" VOLUME=\"Macintosh HD\"/>\n",
        "      <ALBUM TITLE=\"Singles\"/>\n",
        "      <INFO BITRATE=\"1411000\" GENRE=\"House\" PLAYTIME=\"361\"",
        " PLAYTIME_FLOAT=\"360.832000\" RANKING=\"153\" RELEASE_DATE=\"2019/1/1\"",
        " FILESIZE=\"63000\"/>\n",
        "      <TEMPO BPM=\"127.999878\" BPM_QUALITY=\"100.000000\"/>\n",
        "      <MUSICAL_KEY VALUE=\"21\"/>\n",
        "      <CUE_V2 NAME=\"AutoGrid\" DISPL_ORDER=\"0\" TYPE=\"4\" START=\"230.000000\"",
        " LEN=\"0.000000\" REPEATS=\"-1\" HOTCUE=\"0\"/>\n",
        "    </ENTRY>\n",
        "  </COLLECTION>\n",
        "</NML>"
    );

    #[test]
    fn parses_entry_fields() {
        let doc = xml::parse(EXPORT).unwrap();
        let tracks = parse_tracks(&doc).unwrap();
        assert_eq!(tracks.len(), 1);

        let track = &tracks[0];
        assert_eq!(track.id, "traktor:AbCd==");
        assert_eq!(track.artist.as_deref(), Some("DJ A"));
        assert_eq!(track.album.as_deref(), Some("Singles"));
        assert_eq!(track.genre.as_deref(), Some("House"));
        assert_eq!(track.duration_secs, Some(360.832));
        assert_eq!(track.year, Some(2019));
        assert_eq!(track.bitrate, Some(1411));
        assert_eq!(track.file_size, Some(63_000 * 1024));
        // MUSICAL_KEY enumeration wins over free text: 21 = A minor.
        assert_eq!(track.stored_key.as_deref(), Some("Am"));
        assert_eq!(track.stored_bpm, Some(127.999878));
        assert_eq!(
            track.location.as_deref(),
            Some(std::path::Path::new("Macintosh HD/Music/House/one.flac"))
        );
        assert_eq!(track.file_type.as_deref(), Some("FLAC"));
        assert_eq!(track.beatgrid.len(), 1);
        assert!((track.beatgrid[0].position_secs - 0.23).abs() < 1e-9);
        assert_eq!(track.beatgrid[0].bpm, 127.999878);
    }
}

//! Raw audio folder ingestion: walk a directory tree, probe each file with
//! symphonia for duration/bitrate/tags, and synthesize tracks with stable
//! hash-derived ids.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;

use rayon::prelude::*;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, StandardTagKey};
use symphonia::core::probe::Hint;

use crate::{LibraryError, Result, Track, TrackSource};

const AUDIO_EXTENSIONS: [&str; 3] = ["mp3", "wav", "flac"];

pub fn scan(dir: impl AsRef<Path>) -> Result<Vec<Track>> {
    let dir = dir.as_ref();
    let entries = collect_audio_files(dir);
    log::info!(
        "found {} audio files under {}",
        entries.len(),
        dir.display()
    );

    let mut tracks: Vec<Track> = entries
        .par_iter()
        .filter_map(|entry| match track_from_file(entry.path()) {
            Ok(track) => Some(track),
            Err(e) => {
                log::warn!("skipping {}: {}", entry.path().display(), e);
                None
            }
        })
        .collect();
    // Deterministic order regardless of thread scheduling.
    tracks.sort_by(|a, b| a.location.cmp(&b.location));
    Ok(tracks)
}

fn collect_audio_files(dir: &Path) -> Vec<walkdir::DirEntry> {
    walkdir::WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("cannot access entry: {}", e);
                None
            }
        })
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                    .unwrap_or(false)
        })
        .collect()
}

fn track_from_file(path: &Path) -> Result<Track> {
    let file = std::fs::File::open(path)?;
    let file_size = file.metadata()?.len();

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| LibraryError::UnsupportedDocument(e.to_string()))?;
    let mut format = probed.format;

    let mut track = Track::new(TrackSource::Folder, path_id(path));
    track.location = Some(path.to_path_buf());
    track.file_size = Some(file_size);
    track.file_type = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_uppercase);

    if let Some(audio_track) = format.default_track() {
        let params = &audio_track.codec_params;
        track.sample_rate = params.sample_rate;
        if let (Some(time_base), Some(n_frames)) = (params.time_base, params.n_frames) {
            let time = time_base.calc_time(n_frames);
            track.duration_secs =
                Some(time.seconds as f64 + time.frac as f64 / 1_000_000_000.0);
        }
        // Bitrate from size over duration, as kbps.
        if let Some(duration) = track.duration_secs.filter(|d| *d > 0.0) {
            track.bitrate = Some(((file_size * 8) as f64 / duration / 1000.0) as u32);
        }
    }

    if let Some(metadata) = format.metadata().current() {
        for tag in metadata.tags() {
            let value = tag.value.to_string();
            if value.trim().is_empty() {
                continue;
            }
            match tag.std_key {
                Some(StandardTagKey::TrackTitle) => track.title = Some(value),
                Some(StandardTagKey::Artist) => track.artist = Some(value),
                Some(StandardTagKey::Album) => track.album = Some(value),
                Some(StandardTagKey::Genre) => track.genre = Some(value),
                Some(StandardTagKey::Composer) => track.composer = Some(value),
                Some(StandardTagKey::Label) => track.label = Some(value),
                Some(StandardTagKey::Comment) => track.comment = Some(value),
                Some(StandardTagKey::Date) => {
                    track.year = value
                        .get(..4)
                        .and_then(|y| y.parse::<i32>().ok())
                        .filter(|y| *y > 0);
                }
                Some(StandardTagKey::Bpm) => {
                    track.stored_bpm = value.trim().parse::<f64>().ok().filter(|b| *b > 0.0);
                }
                _ => {}
            }
        }
    }

    // Fall back to "Artist - Title" filename parsing when tags are missing.
    if track.title.is_none() {
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            match stem.split_once(" - ") {
                Some((artist, title)) => {
                    if track.artist.is_none() {
                        track.artist = Some(artist.trim().to_string());
                    }
                    track.title = Some(title.trim().to_string());
                }
                None => track.title = Some(stem.trim().to_string()),
            }
        }
    }

    Ok(track)
}

fn path_id(path: &Path) -> String {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::adapters::{DecodeError, DecodedAudio, Decoder};

/// Symphonia-backed decoder for mp3/wav/flac, producing planar f32 PCM.
pub struct SymphoniaDecoder;

impl Decoder for SymphoniaDecoder {
    fn decode(&self, path: &Path) -> std::result::Result<DecodedAudio, DecodeError> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        // Create hint to help with format detection
        let mut hint = Hint::new();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if !extension.is_empty() {
            hint.with_extension(&extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|_| DecodeError::UnsupportedCodec {
                codec: extension.clone(),
                fallback_available: false,
            })?;

        let mut format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;
        let track_id = track.id;

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|_| DecodeError::UnsupportedCodec {
                codec: extension.clone(),
                fallback_available: true,
            })?;

        let mut channels: Vec<Vec<f32>> = Vec::new();
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
        let mut sample_buf: Option<SampleBuffer<f32>> = None;

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
            };
            if packet.track_id() != track_id {
                continue;
            }
            let decoded = match decoder.decode(&packet) {
                Ok(decoded) => decoded,
                // An undecodable packet is recoverable; drop it and move on.
                Err(SymphoniaError::DecodeError(e)) => {
                    log::debug!("dropping bad packet in {}: {}", path.display(), e);
                    continue;
                }
                Err(e) => return Err(DecodeError::Corrupt(e.to_string())),
            };

            let spec = *decoded.spec();
            sample_rate = spec.rate;
            let channel_count = spec.channels.count();
            if channels.len() < channel_count {
                channels.resize_with(channel_count, Vec::new);
            }
            let needed = decoded.frames() * channel_count;
            if sample_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
            }
            let buf = sample_buf.as_mut().unwrap();
            buf.copy_interleaved_ref(decoded);

            let interleaved = buf.samples();
            for frame in interleaved.chunks_exact(channel_count) {
                for (channel, &sample) in channels.iter_mut().zip(frame) {
                    channel.push(sample);
                }
            }
        }

        if channels.iter().all(|c| c.is_empty()) {
            return Err(DecodeError::Corrupt("no audio frames decoded".into()));
        }

        Ok(DecodedAudio {
            channels,
            sample_rate,
        })
    }

    fn name(&self) -> &'static str {
        "symphonia"
    }
}

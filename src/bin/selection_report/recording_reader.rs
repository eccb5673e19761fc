use std::path::Path;

use claxon::FlacReader;

/// A voice recording decoded to mono `f32` in `[-1, 1]`.
pub struct Recording {
    pub sample_rate_hz: u32,
    pub samples: Vec<f32>,
}

pub fn read_recording(path: &Path) -> Result<Recording, String> {
    let extension = path
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "wav" => read_wav(path),
        "flac" => read_flac(path),
        _ => Err(format!(
            "Unsupported recording format '{}': expected .wav or .flac",
            path.display()
        )),
    }
}

fn read_wav(path: &Path) -> Result<Recording, String> {
    let mut reader = hound::WavReader::open(path)
        .map_err(|err| format!("Failed to open WAV '{}': {err}", path.display()))?;
    let spec = reader.spec();
    let read_error = |err: hound::Error| format!("Corrupt WAV data in '{}': {err}", path.display());

    let mut mixer = MonoMixer::new(spec.channels as usize, reader.len() as usize, path)?;
    match spec.sample_format {
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                mixer.push(sample.map_err(read_error)?);
            }
        }
        hound::SampleFormat::Int => {
            let scale = full_scale(u32::from(spec.bits_per_sample));
            for sample in reader.samples::<i32>() {
                mixer.push(sample.map_err(read_error)? as f32 / scale);
            }
        }
    }
    Ok(Recording {
        sample_rate_hz: spec.sample_rate,
        samples: mixer.finish(),
    })
}

fn read_flac(path: &Path) -> Result<Recording, String> {
    let mut reader = FlacReader::open(path)
        .map_err(|err| format!("Failed to open FLAC '{}': {err}", path.display()))?;
    let info = reader.streaminfo();
    let scale = full_scale(info.bits_per_sample);
    let expected = info.samples.unwrap_or(0) as usize * info.channels as usize;

    let mut mixer = MonoMixer::new(info.channels as usize, expected, path)?;
    for sample in reader.samples() {
        let sample =
            sample.map_err(|err| format!("Corrupt FLAC data in '{}': {err}", path.display()))?;
        mixer.push(sample as f32 / scale);
    }
    Ok(Recording {
        sample_rate_hz: info.sample_rate,
        samples: mixer.finish(),
    })
}

/// Largest positive integer sample for the bit depth.
fn full_scale(bits_per_sample: u32) -> f32 {
    match bits_per_sample {
        0 | 1 => 1.0,
        bits => ((1_i64 << (bits.min(32) - 1)) - 1) as f32,
    }
}

/// Averages interleaved channels frame by frame while decoding.
struct MonoMixer {
    channels: usize,
    frame_sum: f32,
    in_frame: usize,
    mono: Vec<f32>,
}

impl MonoMixer {
    fn new(channels: usize, interleaved_len: usize, path: &Path) -> Result<Self, String> {
        if channels == 0 {
            return Err(format!("Recording has zero channels: {}", path.display()));
        }
        Ok(Self {
            channels,
            frame_sum: 0.0,
            in_frame: 0,
            mono: Vec::with_capacity(interleaved_len / channels),
        })
    }

    fn push(&mut self, sample: f32) {
        self.frame_sum += sample;
        self.in_frame += 1;
        if self.in_frame == self.channels {
            self.mono.push(self.frame_sum / self.channels as f32);
            self.frame_sum = 0.0;
            self.in_frame = 0;
        }
    }

    /// A trailing partial frame is dropped.
    fn finish(self) -> Vec<f32> {
        self.mono
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_frames_are_averaged_and_a_partial_frame_is_dropped() {
        let mut mixer = MonoMixer::new(2, 5, Path::new("voice.wav")).unwrap();
        for sample in [0.5, -0.5, 1.0, 0.0, 0.25] {
            mixer.push(sample);
        }
        assert_eq!(mixer.finish(), vec![0.0, 0.5]);
    }

    #[test]
    fn zero_channel_recordings_are_rejected() {
        let err = MonoMixer::new(0, 0, Path::new("voice.flac")).err().unwrap();
        assert!(err.contains("zero channels"));
    }

    #[test]
    fn sixteen_bit_full_scale_maps_to_unity() {
        assert_eq!(full_scale(16), 32767.0);
        assert_eq!(full_scale(1), 1.0);
    }

    #[test]
    fn unknown_extension_is_rejected_before_opening() {
        let err = match read_recording(Path::new("voice.mp3")) {
            Ok(_) => panic!("mp3 must be rejected"),
            Err(err) => err,
        };
        assert!(err.contains("Unsupported recording format"));
    }
}

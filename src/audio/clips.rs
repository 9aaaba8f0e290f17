//! Notification clips.
//!
//! Each clip is a short chime rendered to 16-bit interleaved PCM in the
//! device's playback format.

use crate::config::AudioConfig;

/// Boot / welcome chime (also the fallback for `play_pcm` without an id).
pub const CLIP_DEFAULT: u8 = 1;
/// Entering provisioning mode.
pub const CLIP_PROVISIONING: u8 = 2;
/// Credentials saved.
pub const CLIP_CONFIG_SAVED: u8 = 3;
/// Control channel connected.
pub const CLIP_CONNECTED: u8 = 4;

const FADE_MS: u32 = 5;
const AMPLITUDE: f32 = 0.3 * i16::MAX as f32;

/// (frequency Hz, duration ms) per note; 0 Hz is a rest.
fn notes(id: u8) -> Option<&'static [(u32, u32)]> {
    match id {
        CLIP_DEFAULT => Some(&[(523, 150), (659, 150), (784, 250)]),
        CLIP_PROVISIONING => Some(&[(784, 200), (523, 200), (0, 100), (784, 200), (523, 200)]),
        CLIP_CONFIG_SAVED => Some(&[(659, 120), (784, 120), (1047, 300)]),
        CLIP_CONNECTED => Some(&[(880, 120), (1175, 200)]),
        _ => None,
    }
}

/// Check whether `id` names a clip.
pub fn exists(id: u8) -> bool {
    notes(id).is_some()
}

/// Render clip `id` for `config`. `None` for unknown ids.
pub fn render(id: u8, config: &AudioConfig) -> Option<Vec<u8>> {
    let notes = notes(id)?;
    let rate = config.sample_rate;
    let channels = config.channels.max(1) as usize;

    let total_frames: usize = notes
        .iter()
        .map(|&(_, ms)| (rate * ms / 1000) as usize)
        .sum();
    let mut pcm = Vec::with_capacity(total_frames * channels * 2);

    for &(freq, ms) in notes {
        let frames = rate * ms / 1000;
        let fade = (rate * FADE_MS / 1000).max(1);
        for n in 0..frames {
            let sample = if freq == 0 {
                0
            } else {
                let t = n as f32 / rate as f32;
                let edge = n.min(frames - 1 - n);
                let envelope = (edge as f32 / fade as f32).min(1.0);
                let value = (2.0 * std::f32::consts::PI * freq as f32 * t).sin();
                (value * AMPLITUDE * envelope) as i16
            };
            for _ in 0..channels {
                pcm.extend_from_slice(&sample.to_le_bytes());
            }
        }
    }

    Some(pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_clips() {
        for id in 1..=4 {
            assert!(exists(id));
        }
        assert!(!exists(0));
        assert!(!exists(5));
    }

    #[test]
    fn test_render_length_matches_format() {
        let config = AudioConfig::default();
        let pcm = render(CLIP_CONNECTED, &config).unwrap();
        // 320 ms of 16 kHz stereo 16-bit audio.
        assert_eq!(pcm.len(), 16_000 * 320 / 1000 * 2 * 2);
    }

    #[test]
    fn test_render_starts_silent_and_is_not_flat() {
        let pcm = render(CLIP_DEFAULT, &AudioConfig::default()).unwrap();
        assert_eq!(&pcm[..4], &[0, 0, 0, 0]);
        assert!(pcm.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_unknown_clip() {
        assert!(render(42, &AudioConfig::default()).is_none());
    }
}

//! Audio input for shaders that sample `iChannel0`.
//!
//! Capture and analysis live outside the engine. A producer publishes ready
//! frames through [`AudioPublisher`]; the render thread reads the newest one
//! through an [`AudioSource`] and uploads it into a 512x2 texture (row 0 is
//! the spectrum, row 1 the waveform).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

/// Texels per row of the audio texture.
pub const AUDIO_TEXTURE_WIDTH: usize = 512;
/// Rows in the audio texture: spectrum, then waveform.
pub const AUDIO_TEXTURE_ROWS: usize = 2;

const WAVEFORM_CENTRE: f32 = 0.5;

/// One analysed block of audio, normalised to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    spectrum: Vec<f32>,
    waveform: Vec<f32>,
}

impl AudioFrame {
    /// Builds a frame from arbitrary-length inputs.
    ///
    /// Inputs are clamped to `[0, 1]`, truncated to the texture width, and
    /// padded with silence (0 for magnitudes, 0.5 for samples).
    pub fn new(spectrum: &[f32], waveform: &[f32]) -> Self {
        Self {
            spectrum: fit_row(spectrum, 0.0),
            waveform: fit_row(waveform, WAVEFORM_CENTRE),
        }
    }

    pub fn silent() -> Self {
        Self::new(&[], &[])
    }

    pub fn spectrum(&self) -> &[f32] {
        &self.spectrum
    }

    pub fn waveform(&self) -> &[f32] {
        &self.waveform
    }

    /// Row-major texel data for the texture upload.
    pub fn texels(&self) -> Vec<f32> {
        let mut texels = Vec::with_capacity(AUDIO_TEXTURE_WIDTH * AUDIO_TEXTURE_ROWS);
        texels.extend_from_slice(&self.spectrum);
        texels.extend_from_slice(&self.waveform);
        texels
    }
}

fn fit_row(values: &[f32], fill: f32) -> Vec<f32> {
    let mut row: Vec<f32> = values
        .iter()
        .take(AUDIO_TEXTURE_WIDTH)
        .map(|value| if value.is_finite() { value.clamp(0.0, 1.0) } else { fill })
        .collect();
    row.resize(AUDIO_TEXTURE_WIDTH, fill);
    row
}

/// Where the engine gets audio from.
pub trait AudioSource: Send {
    /// The newest frame published since the last call, if any.
    fn latest(&mut self) -> Option<AudioFrame>;

    /// Whether a capture device is currently delivering audio.
    fn is_available(&self) -> bool;

    /// Asks the producer to look for a capture device again.
    fn request_retry(&mut self);
}

/// Source used when no capture backend is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentAudio;

impl AudioSource for SilentAudio {
    fn latest(&mut self) -> Option<AudioFrame> {
        None
    }

    fn is_available(&self) -> bool {
        false
    }

    fn request_retry(&mut self) {}
}

#[derive(Debug, Default)]
struct FeedFlags {
    available: AtomicBool,
    retry: AtomicBool,
}

/// Creates a bounded feed; the producer drops frames while the render thread lags.
pub fn feed(capacity: usize) -> (AudioPublisher, AudioFeed) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let flags = Arc::new(FeedFlags::default());
    (
        AudioPublisher {
            tx,
            flags: Arc::clone(&flags),
        },
        AudioFeed { rx, flags },
    )
}

/// Producer half, owned by the capture thread.
#[derive(Debug, Clone)]
pub struct AudioPublisher {
    tx: Sender<AudioFrame>,
    flags: Arc<FeedFlags>,
}

impl AudioPublisher {
    /// Non-blocking; returns false when the frame was dropped.
    pub fn publish(&self, frame: AudioFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    pub fn set_available(&self, available: bool) {
        self.flags.available.store(available, Ordering::Release);
    }

    /// Consumes a pending retry request from the render side.
    pub fn take_retry_request(&self) -> bool {
        self.flags.retry.swap(false, Ordering::AcqRel)
    }
}

/// Render-thread half of [`feed`].
#[derive(Debug)]
pub struct AudioFeed {
    rx: Receiver<AudioFrame>,
    flags: Arc<FeedFlags>,
}

impl AudioSource for AudioFeed {
    fn latest(&mut self) -> Option<AudioFrame> {
        self.rx.try_iter().last()
    }

    fn is_available(&self) -> bool {
        self.flags.available.load(Ordering::Acquire)
    }

    fn request_retry(&mut self) {
        self.flags.retry.store(true, Ordering::Release);
    }
}

/// Decides what, if anything, to upload into the audio texture each frame.
#[derive(Debug, Default)]
pub struct AudioUploads {
    silence_uploaded: bool,
}

impl AudioUploads {
    pub fn next(&mut self, source: &mut dyn AudioSource) -> Option<AudioFrame> {
        if let Some(frame) = source.latest() {
            self.silence_uploaded = false;
            return Some(frame);
        }
        if !source.is_available() && !self.silence_uploaded {
            self.silence_uploaded = true;
            return Some(AudioFrame::silent());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_fitted_to_texture_rows() {
        let frame = AudioFrame::new(&[2.0, 0.25, f32::NAN], &vec![0.1; 600]);
        assert_eq!(frame.spectrum().len(), AUDIO_TEXTURE_WIDTH);
        assert_eq!(frame.spectrum()[..3], [1.0, 0.25, 0.0]);
        assert_eq!(frame.spectrum()[511], 0.0);
        assert_eq!(frame.waveform().len(), AUDIO_TEXTURE_WIDTH);
        assert_eq!(frame.texels().len(), 1024);

        let silent = AudioFrame::silent();
        assert!(silent.spectrum().iter().all(|v| *v == 0.0));
        assert!(silent.waveform().iter().all(|v| *v == 0.5));
    }

    #[test]
    fn feed_keeps_only_the_newest_frame() {
        let (publisher, mut feed) = feed(4);
        publisher.publish(AudioFrame::new(&[0.1], &[]));
        publisher.publish(AudioFrame::new(&[0.9], &[]));
        let latest = feed.latest().unwrap();
        assert_eq!(latest.spectrum()[0], 0.9);
        assert!(feed.latest().is_none());
    }

    #[test]
    fn full_feed_drops_frames() {
        let (publisher, _feed) = feed(1);
        assert!(publisher.publish(AudioFrame::silent()));
        assert!(!publisher.publish(AudioFrame::silent()));
    }

    #[test]
    fn retry_requests_reach_the_producer() {
        let (publisher, mut feed) = feed(1);
        assert!(!publisher.take_retry_request());
        feed.request_retry();
        assert!(publisher.take_retry_request());
        assert!(!publisher.take_retry_request());
    }

    #[test]
    fn silence_is_uploaded_once_while_unavailable() {
        let (publisher, mut feed) = feed(2);
        let mut uploads = AudioUploads::default();
        assert_eq!(uploads.next(&mut feed), Some(AudioFrame::silent()));
        assert_eq!(uploads.next(&mut feed), None);

        publisher.set_available(true);
        publisher.publish(AudioFrame::new(&[0.5], &[]));
        assert!(uploads.next(&mut feed).is_some());
        assert_eq!(uploads.next(&mut feed), None);

        publisher.set_available(false);
        assert_eq!(uploads.next(&mut feed), Some(AudioFrame::silent()));
    }
}

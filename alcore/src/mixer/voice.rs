use crate::math::Vec3;
use crate::state::{ListenerState, PlayState, SourceState};
use std::sync::Arc;

/// Fastest a voice may advance through its data, in source frames per output frame
const MAX_STEP: f64 = 16.0;

/// Decoded buffer contents, interleaved f32.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleData {
    samples: Vec<f32>,
    channels: u16,
    frequency: u32,
}

impl SampleData {
    pub fn new(samples: Vec<f32>, channels: u16, frequency: u32) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            frequency,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frequency(&self) -> u32 {
        self.frequency
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    /// Sample of `channel` at a fractional frame position, linearly interpolated.
    fn sample_at(&self, frame: usize, fraction: f32, channel: usize) -> f32 {
        let channels = self.channels as usize;
        let last = self.frames().saturating_sub(1);
        let current = self.samples[frame.min(last) * channels + channel];
        let next = self.samples[(frame + 1).min(last) * channels + channel];
        current + (next - current) * fraction
    }
}

/// Per-block mixing parameters of one voice.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixParams {
    /// Left/right gains for a mono source; a mono output only uses the first
    pub pan: [f32; 2],
    /// Overall gain for sources with more than one channel (not panned)
    pub gain: f32,
    /// Pitch times doppler shift
    pub step: f64,
}

impl MixParams {
    /// Positions a source relative to the listener.
    pub fn spatialize(source: &SourceState, listener: &ListenerState, output_channels: u16) -> Self {
        let offset = if source.relative {
            source.position
        } else {
            source.position - listener.position
        };
        let distance = offset.length();

        let mut gain = source.gain
            * listener.distance_model.attenuate(
                distance,
                source.reference_distance,
                source.rolloff_factor,
                source.max_distance,
            )
            * cone_gain(source, -offset);
        gain = gain.clamp(source.min_gain, source.max_gain.max(source.min_gain)) * listener.gain;

        let pan = if output_channels < 2 {
            [gain, 0.0]
        } else {
            let right = listener.orientation.right();
            let x = if distance > f32::EPSILON {
                (offset / distance).dot(right).clamp(-1.0, 1.0)
            } else {
                0.0
            };
            // Equal-power pan, x = -1 is hard left
            let theta = (x + 1.0) * std::f32::consts::FRAC_PI_4;
            [gain * theta.cos(), gain * theta.sin()]
        };

        Self {
            pan,
            gain,
            step: source.pitch as f64 * doppler_shift(source, listener, offset) as f64,
        }
    }
}

/// Cone attenuation for a listener at `to_listener` from the source.
fn cone_gain(source: &SourceState, to_listener: Vec3) -> f32 {
    let direction = source.direction.normalize_or_zero();
    let to_listener = to_listener.normalize_or_zero();
    if direction == Vec3::ZERO || to_listener == Vec3::ZERO || source.cone_inner_angle >= 360.0 {
        return 1.0;
    }

    let angle = direction.dot(to_listener).clamp(-1.0, 1.0).acos().to_degrees();
    let inner = source.cone_inner_angle / 2.0;
    let outer = (source.cone_outer_angle / 2.0).max(inner);
    if angle <= inner {
        1.0
    } else if angle >= outer {
        source.cone_outer_gain
    } else {
        let t = (angle - inner) / (outer - inner);
        1.0 + (source.cone_outer_gain - 1.0) * t
    }
}

fn doppler_shift(source: &SourceState, listener: &ListenerState, offset: Vec3) -> f32 {
    let factor = listener.doppler_factor;
    let distance = offset.length();
    if factor <= 0.0 || distance <= f32::EPSILON {
        return 1.0;
    }

    let speed = listener.speed_of_sound;
    let limit = speed / factor;
    // Offset points from listener to source
    let listener_velocity = if source.relative {
        Vec3::ZERO
    } else {
        listener.velocity
    };
    let towards_listener = -offset / distance;
    let vls = listener_velocity.dot(towards_listener).min(limit);
    let vss = source.velocity.dot(towards_listener).min(limit);

    let shift = (speed - factor * vls) / (speed - factor * vss);
    if shift.is_finite() && shift > 0.0 { shift } else { 1.0 }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Cursor {
    entry: usize,
    position: f64,
}

/// Backend copy of a source: its committed state plus where playback is.
#[derive(Debug)]
pub struct Voice {
    context: u64,
    state: SourceState,
    queue: Vec<u64>,
    cursor: Cursor,
    finished: bool,
}

impl Voice {
    pub fn new(context: u64) -> Self {
        Self {
            context,
            state: SourceState::default(),
            queue: Vec::new(),
            cursor: Cursor::default(),
            finished: false,
        }
    }

    pub fn context(&self) -> u64 {
        self.context
    }

    pub fn state(&self) -> &SourceState {
        &self.state
    }

    /// Takes over a committed source state.
    ///
    /// Stopping or rewinding resets the playback cursor, as does a new start
    /// request or replacing the queue rather than appending to it.
    pub fn update(&mut self, state: SourceState, queue: Vec<u64>) {
        let restart = state.start_count != self.state.start_count
            || matches!(state.play_state, PlayState::Initial | PlayState::Stopped)
            || !queue.starts_with(&self.queue);

        if restart {
            self.cursor = Cursor::default();
            self.finished = false;
        } else if self.finished && queue.len() > self.queue.len() {
            // Underrun streaming queue picks up at the first new buffer
            self.cursor = Cursor {
                entry: self.queue.len(),
                position: 0.0,
            };
            self.finished = false;
        }
        self.state = state;
        self.queue = queue;
    }

    pub fn is_playing(&self) -> bool {
        self.state.play_state == PlayState::Playing && !self.finished && !self.queue.is_empty()
    }

    /// Mixes this voice into `mix` (interleaved, `channels` wide).
    ///
    /// `lookup` resolves a buffer id to its active data; missing or empty
    /// buffers are skipped. Returns the number of frames produced.
    pub fn render(
        &mut self,
        mix: &mut [f32],
        channels: usize,
        params: &MixParams,
        output_frequency: u32,
        lookup: impl Fn(u64) -> Option<Arc<SampleData>>,
    ) -> usize {
        if !self.is_playing() || channels == 0 {
            return 0;
        }

        let frames = mix.len() / channels;
        let mut frame = 0;
        let mut skipped = 0;

        while frame < frames {
            if self.cursor.entry >= self.queue.len() {
                if self.state.looping {
                    self.cursor.entry = 0;
                } else {
                    self.finished = true;
                    break;
                }
            }

            let data = lookup(self.queue[self.cursor.entry]).filter(|data| data.frames() > 0);
            let Some(data) = data else {
                self.cursor = Cursor {
                    entry: self.cursor.entry + 1,
                    position: 0.0,
                };
                skipped += 1;
                if skipped > self.queue.len() {
                    // Nothing in the queue holds audio
                    self.finished = true;
                    break;
                }
                continue;
            };
            skipped = 0;

            let step = (params.step * data.frequency() as f64 / output_frequency.max(1) as f64)
                .max(0.0)
                .min(MAX_STEP);
            let length = data.frames();
            let source_channels = data.channels() as usize;

            while frame < frames {
                let index = self.cursor.position as usize;
                if index >= length {
                    break;
                }
                let fraction = (self.cursor.position - index as f64) as f32;
                let out = &mut mix[frame * channels..(frame + 1) * channels];

                if source_channels == 1 {
                    let sample = data.sample_at(index, fraction, 0);
                    for (slot, gain) in out.iter_mut().zip(params.pan) {
                        *slot += sample * gain;
                    }
                } else if channels == 1 {
                    let sum: f32 = (0..source_channels)
                        .map(|ch| data.sample_at(index, fraction, ch))
                        .sum();
                    out[0] += sum / source_channels as f32 * params.gain;
                } else {
                    for (ch, slot) in out.iter_mut().enumerate().take(source_channels) {
                        *slot += data.sample_at(index, fraction, ch) * params.gain;
                    }
                }

                frame += 1;
                self.cursor.position += step;
            }

            if self.cursor.position as usize >= length {
                self.cursor.position -= length as f64;
                self.cursor.entry += 1;
            }
        }

        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Orientation;
    use crate::state::DistanceModel;
    use std::collections::HashMap;

    fn ramp(frames: usize) -> Arc<SampleData> {
        Arc::new(SampleData::new(
            (0..frames).map(|i| i as f32 / frames as f32).collect(),
            1,
            48000,
        ))
    }

    fn playing(queue: Vec<u64>, looping: bool) -> Voice {
        let mut voice = Voice::new(1);
        voice.update(
            SourceState {
                play_state: PlayState::Playing,
                looping,
                ..Default::default()
            },
            queue,
        );
        voice
    }

    const UNITY: MixParams = MixParams {
        pan: [1.0, 1.0],
        gain: 1.0,
        step: 1.0,
    };

    #[test]
    fn test_plays_queue_in_order_then_finishes() {
        let buffers: HashMap<u64, Arc<SampleData>> = [(10, ramp(4)), (11, ramp(2))].into();
        let mut voice = playing(vec![10, 11], false);

        let mut mix = vec![0.0; 16];
        let frames = voice.render(&mut mix, 2, &UNITY, 48000, |id| buffers.get(&id).cloned());

        assert_eq!(frames, 6);
        assert!(voice.finished);
        assert!(!voice.is_playing());
        assert_eq!(&mix[..8], &[0.0, 0.0, 0.25, 0.25, 0.5, 0.5, 0.75, 0.75]);
        assert_eq!(&mix[8..12], &[0.0, 0.0, 0.5, 0.5]);
        assert!(mix[12..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_looping_wraps_around() {
        let buffers: HashMap<u64, Arc<SampleData>> = [(1, ramp(3))].into();
        let mut voice = playing(vec![1], true);

        let mut mix = vec![0.0; 7];
        assert_eq!(voice.render(&mut mix, 1, &UNITY, 48000, |id| buffers.get(&id).cloned()), 7);
        assert!(voice.is_playing());
        assert!((mix[3] - mix[0]).abs() < 1e-6);
    }

    #[test]
    fn test_missing_buffers_are_silent() {
        let mut voice = playing(vec![5, 6], true);
        let mut mix = vec![0.0; 8];
        assert_eq!(voice.render(&mut mix, 2, &UNITY, 48000, |_| None), 0);
        assert!(voice.finished);
    }

    #[test]
    fn test_pitch_steps_fractionally() {
        let buffers: HashMap<u64, Arc<SampleData>> = [(1, ramp(8))].into();
        let mut voice = playing(vec![1], false);
        let params = MixParams {
            step: 0.5,
            ..UNITY
        };

        let mut mix = vec![0.0; 3];
        voice.render(&mut mix, 1, &params, 48000, |id| buffers.get(&id).cloned());
        assert_eq!(mix, vec![0.0, 0.0625, 0.125]);
    }

    #[test]
    fn test_pause_keeps_position_and_stop_rewinds() {
        let buffers: HashMap<u64, Arc<SampleData>> = [(1, ramp(8))].into();
        let lookup = |id: u64| buffers.get(&id).cloned();
        let mut voice = playing(vec![1], false);
        let mut mix = vec![0.0; 2];
        voice.render(&mut mix, 1, &UNITY, 48000, lookup);

        let mut state = voice.state().clone();
        state.play_state = PlayState::Paused;
        voice.update(state.clone(), vec![1]);
        assert_eq!(voice.render(&mut mix, 1, &UNITY, 48000, lookup), 0);

        state.play_state = PlayState::Playing;
        voice.update(state.clone(), vec![1]);
        let mut mix = vec![0.0; 1];
        voice.render(&mut mix, 1, &UNITY, 48000, lookup);
        assert_eq!(mix[0], 0.25);

        state.play_state = PlayState::Stopped;
        voice.update(state.clone(), vec![1]);
        state.play_state = PlayState::Playing;
        voice.update(state, vec![1]);
        let mut mix = vec![0.0; 1];
        voice.render(&mut mix, 1, &UNITY, 48000, lookup);
        assert_eq!(mix[0], 0.0);
    }

    #[test]
    fn test_underrun_resumes_on_append() {
        let buffers: HashMap<u64, Arc<SampleData>> = [(1, ramp(2)), (2, ramp(4))].into();
        let lookup = |id: u64| buffers.get(&id).cloned();
        let mut voice = playing(vec![1], false);

        let mut mix = vec![0.0; 4];
        assert_eq!(voice.render(&mut mix, 1, &UNITY, 48000, lookup), 2);
        assert!(voice.finished);

        voice.update(voice.state().clone(), vec![1, 2]);
        let mut mix = vec![0.0; 4];
        assert_eq!(voice.render(&mut mix, 1, &UNITY, 48000, lookup), 4);
        assert_eq!(mix[1], 0.25);
    }

    #[test]
    fn test_new_start_request_replays_finished_voice() {
        let buffers: HashMap<u64, Arc<SampleData>> = [(1, ramp(2))].into();
        let lookup = |id: u64| buffers.get(&id).cloned();
        let mut voice = playing(vec![1], false);
        let mut mix = vec![0.0; 4];
        assert_eq!(voice.render(&mut mix, 1, &UNITY, 48000, lookup), 2);
        assert!(!voice.is_playing());

        // Same play state, new start request
        let mut state = voice.state().clone();
        state.start_count += 1;
        voice.update(state.clone(), vec![1]);
        assert!(voice.is_playing());
        let mut mix = vec![0.0; 4];
        assert_eq!(voice.render(&mut mix, 1, &UNITY, 48000, lookup), 2);
        assert_eq!(&mix[..2], &[0.0, 0.5]);

        // A plain parameter update leaves the finished voice alone
        state.gain = 0.5;
        voice.update(state, vec![1]);
        assert!(!voice.is_playing());
    }

    #[test]
    fn test_huge_step_is_clamped() {
        let buffers: HashMap<u64, Arc<SampleData>> = [(1, ramp(3))].into();
        let mut voice = playing(vec![1], true);
        let params = MixParams {
            step: 1e30,
            ..UNITY
        };

        let mut mix = vec![0.0; 64];
        let frames = voice.render(&mut mix, 1, &params, 48000, |id| buffers.get(&id).cloned());
        assert_eq!(frames, 64);
        assert!(voice.is_playing());
        assert!(voice.cursor.position < 3.0 + MAX_STEP);
    }

    #[test]
    fn test_spatialize_pans_towards_source() {
        let listener = ListenerState::default();
        let source = SourceState {
            position: Vec3::new(1.0, 0.0, 0.0),
            ..Default::default()
        };

        let params = MixParams::spatialize(&source, &listener, 2);
        assert!(params.pan[1] > 0.99);
        assert!(params.pan[0].abs() < 1e-3);

        // Turning around swaps the sides
        let listener = ListenerState {
            orientation: Orientation::new(Vec3::Z, Vec3::Y),
            ..Default::default()
        };
        let params = MixParams::spatialize(&source, &listener, 2);
        assert!(params.pan[0] > 0.99);
    }

    #[test]
    fn test_spatialize_attenuates_with_distance() {
        let listener = ListenerState {
            distance_model: DistanceModel::InverseClamped,
            ..Default::default()
        };
        let source = SourceState {
            position: Vec3::new(0.0, 0.0, -4.0),
            ..Default::default()
        };

        let params = MixParams::spatialize(&source, &listener, 1);
        assert!((params.gain - 0.25).abs() < 1e-6);
        assert_eq!(params.pan[0], params.gain);
    }

    #[test]
    fn test_cone_attenuation() {
        let source = SourceState {
            direction: Vec3::X,
            cone_inner_angle: 90.0,
            cone_outer_angle: 180.0,
            cone_outer_gain: 0.2,
            ..Default::default()
        };
        assert_eq!(cone_gain(&source, Vec3::X), 1.0);
        assert!((cone_gain(&source, -Vec3::X) - 0.2).abs() < 1e-6);
        assert!((cone_gain(&source, Vec3::new(1.0, 1.0, 0.0).normalize()) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_doppler_approaching_source_raises_pitch() {
        let listener = ListenerState::default();
        let source = SourceState {
            position: Vec3::new(0.0, 0.0, -10.0),
            velocity: Vec3::new(0.0, 0.0, 30.0),
            ..Default::default()
        };
        let params = MixParams::spatialize(&source, &listener, 2);
        assert!(params.step > 1.0);
    }
}

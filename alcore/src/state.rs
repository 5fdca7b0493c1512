//! Application-visible state of sources, listeners and buffers.
//!
//! These blocks are what the commit cycle copies into snapshots for the backend.

use crate::error::{AlError, Result};
use crate::format::BufferFormat;
use crate::math::{Orientation, Vec3};

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn raw(self) -> u32 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

name_type!(
    /// Handle of a context on its device.
    ContextId
);
name_type!(
    /// Name of a source, unique on its device.
    SourceName
);
name_type!(
    /// Name of a buffer in the device-wide buffer pool.
    BufferName
);

/// Requested playback state of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlayState {
    #[default]
    Initial,
    Playing,
    Paused,
    Stopped,
}

/// Distance attenuation model of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DistanceModel {
    None,
    Inverse,
    #[default]
    InverseClamped,
    Linear,
    LinearClamped,
    Exponent,
    ExponentClamped,
}

impl DistanceModel {
    /// Gain factor for a source `distance` away from the listener.
    pub fn attenuate(
        self,
        distance: f32,
        reference_distance: f32,
        rolloff_factor: f32,
        max_distance: f32,
    ) -> f32 {
        let clamped = || {
            if max_distance < reference_distance {
                reference_distance
            } else {
                distance.clamp(reference_distance, max_distance)
            }
        };

        let gain = match self {
            Self::None => 1.0,
            Self::Inverse => inverse(distance, reference_distance, rolloff_factor),
            Self::InverseClamped => inverse(clamped(), reference_distance, rolloff_factor),
            Self::Linear => linear(distance, reference_distance, rolloff_factor, max_distance),
            Self::LinearClamped => {
                linear(clamped(), reference_distance, rolloff_factor, max_distance)
            }
            Self::Exponent => exponent(distance, reference_distance, rolloff_factor),
            Self::ExponentClamped => exponent(clamped(), reference_distance, rolloff_factor),
        };

        gain.max(0.0)
    }
}

fn inverse(distance: f32, reference: f32, rolloff: f32) -> f32 {
    let denominator = reference + rolloff * (distance - reference);
    if denominator <= 0.0 {
        1.0
    } else {
        reference / denominator
    }
}

fn linear(distance: f32, reference: f32, rolloff: f32, max: f32) -> f32 {
    if max <= reference {
        return 1.0;
    }
    let distance = distance.min(max);
    1.0 - rolloff * (distance - reference) / (max - reference)
}

fn exponent(distance: f32, reference: f32, rolloff: f32) -> f32 {
    if reference <= 0.0 || distance <= 0.0 {
        return 1.0;
    }
    (distance / reference).powf(-rolloff)
}

/// Complete mutable state of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceState {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Zero means omnidirectional
    pub direction: Vec3,
    pub gain: f32,
    pub min_gain: f32,
    pub max_gain: f32,
    pub pitch: f32,
    pub looping: bool,
    /// Position is relative to the listener
    pub relative: bool,
    pub reference_distance: f32,
    pub rolloff_factor: f32,
    pub max_distance: f32,
    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub cone_outer_gain: f32,
    /// Attached buffers in play order. A static buffer is a queue of one.
    pub queue: Vec<BufferName>,
    pub play_state: PlayState,
    /// Bumped each time a play request starts the source from the top, so a
    /// replay of a source that is already `Playing` still reaches the backend.
    pub start_count: u32,
}

impl Default for SourceState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            direction: Vec3::ZERO,
            gain: 1.0,
            min_gain: 0.0,
            max_gain: 1.0,
            pitch: 1.0,
            looping: false,
            relative: false,
            reference_distance: 1.0,
            rolloff_factor: 1.0,
            max_distance: f32::MAX,
            cone_inner_angle: 360.0,
            cone_outer_angle: 360.0,
            cone_outer_gain: 0.0,
            queue: Vec::new(),
            play_state: PlayState::Initial,
            start_count: 0,
        }
    }
}

/// Single-field update of a source.
///
/// Buffer attachment and play-state transitions have their own operations on
/// [`Device`](crate::Device) because they touch other objects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceParam {
    Position(Vec3),
    Velocity(Vec3),
    Direction(Vec3),
    Gain(f32),
    MinGain(f32),
    MaxGain(f32),
    Pitch(f32),
    Looping(bool),
    Relative(bool),
    ReferenceDistance(f32),
    RolloffFactor(f32),
    MaxDistance(f32),
    ConeInnerAngle(f32),
    ConeOuterAngle(f32),
    ConeOuterGain(f32),
}

impl SourceState {
    /// Applies `param`. Returns whether the state changed.
    pub fn apply(&mut self, param: SourceParam) -> Result<bool> {
        let before = self.clone();

        match param {
            SourceParam::Position(v) => self.position = finite_vec("position", v)?,
            SourceParam::Velocity(v) => self.velocity = finite_vec("velocity", v)?,
            SourceParam::Direction(v) => self.direction = finite_vec("direction", v)?,
            SourceParam::Gain(g) => self.gain = non_negative("gain", g)?,
            SourceParam::MinGain(g) => self.min_gain = unit_range("min gain", g)?,
            SourceParam::MaxGain(g) => self.max_gain = unit_range("max gain", g)?,
            SourceParam::Pitch(p) => {
                if !p.is_finite() || p <= 0.0 {
                    return Err(AlError::InvalidValue(format!(
                        "pitch must be positive, got {}",
                        p
                    )));
                }
                self.pitch = p;
            }
            SourceParam::Looping(looping) => self.looping = looping,
            SourceParam::Relative(relative) => self.relative = relative,
            SourceParam::ReferenceDistance(d) => {
                self.reference_distance = non_negative("reference distance", d)?
            }
            SourceParam::RolloffFactor(r) => self.rolloff_factor = non_negative("rolloff", r)?,
            SourceParam::MaxDistance(d) => self.max_distance = non_negative("max distance", d)?,
            SourceParam::ConeInnerAngle(a) => self.cone_inner_angle = angle("cone inner", a)?,
            SourceParam::ConeOuterAngle(a) => self.cone_outer_angle = angle("cone outer", a)?,
            SourceParam::ConeOuterGain(g) => self.cone_outer_gain = unit_range("cone gain", g)?,
        }

        Ok(*self != before)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.play_state, PlayState::Playing | PlayState::Paused)
    }
}

/// Listener block plus the context-wide parameters that go with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerState {
    pub position: Vec3,
    pub velocity: Vec3,
    pub orientation: Orientation,
    pub gain: f32,
    pub distance_model: DistanceModel,
    pub doppler_factor: f32,
    pub speed_of_sound: f32,
}

impl Default for ListenerState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            velocity: Vec3::ZERO,
            orientation: Orientation::default(),
            gain: 1.0,
            distance_model: DistanceModel::default(),
            doppler_factor: 1.0,
            speed_of_sound: 343.3,
        }
    }
}

/// Single-field update of a context's listener block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ListenerParam {
    Position(Vec3),
    Velocity(Vec3),
    Orientation(Orientation),
    Gain(f32),
    DistanceModel(DistanceModel),
    DopplerFactor(f32),
    SpeedOfSound(f32),
}

impl ListenerState {
    /// Applies `param`. Returns whether the state changed.
    pub fn apply(&mut self, param: ListenerParam) -> Result<bool> {
        let before = self.clone();

        match param {
            ListenerParam::Position(v) => self.position = finite_vec("listener position", v)?,
            ListenerParam::Velocity(v) => self.velocity = finite_vec("listener velocity", v)?,
            ListenerParam::Orientation(o) => {
                if !o.is_finite() {
                    return Err(AlError::InvalidValue("orientation must be finite".into()));
                }
                self.orientation = o;
            }
            ListenerParam::Gain(g) => self.gain = non_negative("listener gain", g)?,
            ListenerParam::DistanceModel(model) => self.distance_model = model,
            ListenerParam::DopplerFactor(f) => self.doppler_factor = non_negative("doppler", f)?,
            ListenerParam::SpeedOfSound(s) => {
                if !s.is_finite() || s <= 0.0 {
                    return Err(AlError::InvalidValue(format!(
                        "speed of sound must be positive, got {}",
                        s
                    )));
                }
                self.speed_of_sound = s;
            }
        }

        Ok(*self != before)
    }
}

/// Metadata of the data last uploaded into a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferState {
    /// `None` until the first successful upload
    pub format: Option<BufferFormat>,
    pub frequency: u32,
    /// Size of the uploaded data in bytes
    pub size: usize,
}

impl BufferState {
    pub fn frames(&self) -> usize {
        self.format.map(|f| f.frames(self.size)).unwrap_or(0)
    }

    pub fn channels(&self) -> u16 {
        self.format.map(BufferFormat::channels).unwrap_or(0)
    }

    pub fn bits(&self) -> u16 {
        self.format.map(BufferFormat::bits).unwrap_or(0)
    }
}

fn finite_vec(what: &str, v: Vec3) -> Result<Vec3> {
    if !v.is_finite() {
        return Err(AlError::InvalidValue(format!("{} must be finite", what)));
    }
    Ok(v)
}

fn non_negative(what: &str, value: f32) -> Result<f32> {
    if !value.is_finite() || value < 0.0 {
        return Err(AlError::InvalidValue(format!(
            "{} must be non-negative, got {}",
            what, value
        )));
    }
    Ok(value)
}

fn unit_range(what: &str, value: f32) -> Result<f32> {
    if !(0.0..=1.0).contains(&value) {
        return Err(AlError::InvalidValue(format!(
            "{} must be within [0, 1], got {}",
            what, value
        )));
    }
    Ok(value)
}

fn angle(what: &str, value: f32) -> Result<f32> {
    if !(0.0..=360.0).contains(&value) {
        return Err(AlError::InvalidValue(format!(
            "{} angle must be within [0, 360], got {}",
            what, value
        )));
    }
    Ok(value)
}

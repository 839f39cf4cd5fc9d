//! Acoustic environment effects.
//!
//! `EffectsChain` wraps a decoded source and renders it through a fixed
//! two-path graph: the dry signal in parallel with high-pass → low-pass →
//! 3-band EQ → compressor → waveshaping distortion → convolution reverb,
//! mixed by independent dry/wet gains plus a makeup gain, with a synthetic
//! noise bed that sounds only while the clip does. All parameters come from
//! a named `EnvironmentPreset`; the chain is rebuilt from the preset each
//! time a clip starts, which also regenerates the reverb impulse.

use rodio::Source;
use std::time::Duration;

// Fixed EQ band centers; presets control only the band gains.
const EQ_LOW_SHELF_HZ: f32 = 250.0;
const EQ_MID_PEAK_HZ: f32 = 1000.0;
const EQ_HIGH_SHELF_HZ: f32 = 4000.0;
const EQ_MID_Q: f32 = 1.0;
const FILTER_Q: f32 = 0.707;

/// Every node parameter of the effects graph for one named environment.
/// Pure data; applying a preset is one atomic snapshot of this row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentPreset {
    pub name: &'static str,
    pub highpass_hz: f32,
    pub lowpass_hz: f32,
    pub eq_low_db: f32,
    pub eq_mid_db: f32,
    pub eq_high_db: f32,
    pub comp_threshold_db: f32,
    pub comp_knee_db: f32,
    pub comp_ratio: f32,
    pub comp_attack_secs: f32,
    pub comp_release_secs: f32,
    pub distortion: f32,
    pub reverb_secs: f32,
    pub reverb_decay: f32,
    pub dry_gain: f32,
    pub wet_gain: f32,
    pub makeup_gain: f32,
    pub noise_level: f32,
}

pub const PRESETS: &[EnvironmentPreset] = &[
    EnvironmentPreset {
        name: "standard",
        highpass_hz: 80.0,
        lowpass_hz: 12000.0,
        eq_low_db: 0.0,
        eq_mid_db: 0.0,
        eq_high_db: 0.0,
        comp_threshold_db: -24.0,
        comp_knee_db: 30.0,
        comp_ratio: 3.0,
        comp_attack_secs: 0.003,
        comp_release_secs: 0.25,
        distortion: 0.0,
        reverb_secs: 0.6,
        reverb_decay: 2.0,
        dry_gain: 0.9,
        wet_gain: 0.2,
        makeup_gain: 1.0,
        noise_level: 0.0,
    },
    EnvironmentPreset {
        name: "vacant-hall",
        highpass_hz: 120.0,
        lowpass_hz: 8000.0,
        eq_low_db: -2.0,
        eq_mid_db: 1.0,
        eq_high_db: -1.0,
        comp_threshold_db: -30.0,
        comp_knee_db: 20.0,
        comp_ratio: 4.0,
        comp_attack_secs: 0.005,
        comp_release_secs: 0.3,
        distortion: 2.0,
        reverb_secs: 3.5,
        reverb_decay: 1.6,
        dry_gain: 0.55,
        wet_gain: 0.6,
        makeup_gain: 1.1,
        noise_level: 0.008,
    },
    EnvironmentPreset {
        name: "underground",
        highpass_hz: 150.0,
        lowpass_hz: 4500.0,
        eq_low_db: -4.0,
        eq_mid_db: 3.0,
        eq_high_db: -3.0,
        comp_threshold_db: -35.0,
        comp_knee_db: 15.0,
        comp_ratio: 6.0,
        comp_attack_secs: 0.002,
        comp_release_secs: 0.4,
        distortion: 8.0,
        reverb_secs: 2.8,
        reverb_decay: 1.2,
        dry_gain: 0.5,
        wet_gain: 0.7,
        makeup_gain: 1.2,
        noise_level: 0.02,
    },
    EnvironmentPreset {
        name: "express",
        highpass_hz: 100.0,
        lowpass_hz: 6000.0,
        eq_low_db: -1.0,
        eq_mid_db: 2.0,
        eq_high_db: -2.0,
        comp_threshold_db: -28.0,
        comp_knee_db: 25.0,
        comp_ratio: 5.0,
        comp_attack_secs: 0.004,
        comp_release_secs: 0.25,
        distortion: 4.0,
        reverb_secs: 1.2,
        reverb_decay: 2.4,
        dry_gain: 0.65,
        wet_gain: 0.4,
        makeup_gain: 1.15,
        noise_level: 0.035,
    },
    EnvironmentPreset {
        name: "platform",
        highpass_hz: 200.0,
        lowpass_hz: 5000.0,
        eq_low_db: -5.0,
        eq_mid_db: 4.0,
        eq_high_db: -1.0,
        comp_threshold_db: -32.0,
        comp_knee_db: 18.0,
        comp_ratio: 5.0,
        comp_attack_secs: 0.003,
        comp_release_secs: 0.3,
        distortion: 10.0,
        reverb_secs: 1.8,
        reverb_decay: 1.4,
        dry_gain: 0.45,
        wet_gain: 0.75,
        makeup_gain: 1.25,
        noise_level: 0.015,
    },
    EnvironmentPreset {
        name: "radio",
        highpass_hz: 300.0,
        lowpass_hz: 3400.0,
        eq_low_db: -8.0,
        eq_mid_db: 5.0,
        eq_high_db: -6.0,
        comp_threshold_db: -20.0,
        comp_knee_db: 10.0,
        comp_ratio: 8.0,
        comp_attack_secs: 0.001,
        comp_release_secs: 0.15,
        distortion: 18.0,
        reverb_secs: 0.15,
        reverb_decay: 3.2,
        dry_gain: 0.8,
        wet_gain: 0.2,
        makeup_gain: 1.3,
        noise_level: 0.01,
    },
    EnvironmentPreset {
        name: "tunnel",
        highpass_hz: 180.0,
        lowpass_hz: 3800.0,
        eq_low_db: -3.0,
        eq_mid_db: 2.0,
        eq_high_db: -4.0,
        comp_threshold_db: -34.0,
        comp_knee_db: 16.0,
        comp_ratio: 6.0,
        comp_attack_secs: 0.002,
        comp_release_secs: 0.5,
        distortion: 12.0,
        reverb_secs: 3.2,
        reverb_decay: 1.1,
        dry_gain: 0.4,
        wet_gain: 0.85,
        makeup_gain: 1.2,
        noise_level: 0.025,
    },
    EnvironmentPreset {
        name: "commuter",
        highpass_hz: 110.0,
        lowpass_hz: 7000.0,
        eq_low_db: -2.0,
        eq_mid_db: 2.0,
        eq_high_db: -1.0,
        comp_threshold_db: -29.0,
        comp_knee_db: 22.0,
        comp_ratio: 4.0,
        comp_attack_secs: 0.004,
        comp_release_secs: 0.3,
        distortion: 5.0,
        reverb_secs: 1.5,
        reverb_decay: 1.8,
        dry_gain: 0.6,
        wet_gain: 0.5,
        makeup_gain: 1.1,
        noise_level: 0.018,
    },
    EnvironmentPreset {
        name: "first-class",
        highpass_hz: 90.0,
        lowpass_hz: 10000.0,
        eq_low_db: 1.0,
        eq_mid_db: 0.0,
        eq_high_db: 1.0,
        comp_threshold_db: -26.0,
        comp_knee_db: 28.0,
        comp_ratio: 3.0,
        comp_attack_secs: 0.006,
        comp_release_secs: 0.35,
        distortion: 1.0,
        reverb_secs: 2.2,
        reverb_decay: 2.0,
        dry_gain: 0.7,
        wet_gain: 0.35,
        makeup_gain: 1.05,
        noise_level: 0.004,
    },
];

/// Look up a preset by name (case-insensitive).
pub fn preset_by_name(name: &str) -> Option<&'static EnvironmentPreset> {
    PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

pub fn preset_names() -> Vec<&'static str> {
    PRESETS.iter().map(|p| p.name).collect()
}

fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

// ── Biquad filters ───────────────────────────────────────────────────────────

/// RBJ audio-EQ-cookbook coefficients, normalized by a0.
#[derive(Debug, Clone, Copy)]
struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    fn normalized(b0: f32, b1: f32, b2: f32, a0: f32, a1: f32, a2: f32) -> Self {
        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    fn lowpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * (freq / sample_rate).min(0.499);
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::normalized(
            (1.0 - cos) / 2.0,
            1.0 - cos,
            (1.0 - cos) / 2.0,
            1.0 + alpha,
            -2.0 * cos,
            1.0 - alpha,
        )
    }

    fn highpass(sample_rate: f32, freq: f32, q: f32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * (freq / sample_rate).min(0.499);
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::normalized(
            (1.0 + cos) / 2.0,
            -(1.0 + cos),
            (1.0 + cos) / 2.0,
            1.0 + alpha,
            -2.0 * cos,
            1.0 - alpha,
        )
    }

    fn peaking(sample_rate: f32, freq: f32, q: f32, gain_db: f32) -> Self {
        let a = 10.0f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * (freq / sample_rate).min(0.499);
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        Self::normalized(
            1.0 + alpha * a,
            -2.0 * cos,
            1.0 - alpha * a,
            1.0 + alpha / a,
            -2.0 * cos,
            1.0 - alpha / a,
        )
    }

    fn low_shelf(sample_rate: f32, freq: f32, gain_db: f32) -> Self {
        let a = 10.0f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * (freq / sample_rate).min(0.499);
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * FILTER_Q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
        Self::normalized(
            a * ((a + 1.0) - (a - 1.0) * cos + two_sqrt_a_alpha),
            2.0 * a * ((a - 1.0) - (a + 1.0) * cos),
            a * ((a + 1.0) - (a - 1.0) * cos - two_sqrt_a_alpha),
            (a + 1.0) + (a - 1.0) * cos + two_sqrt_a_alpha,
            -2.0 * ((a - 1.0) + (a + 1.0) * cos),
            (a + 1.0) + (a - 1.0) * cos - two_sqrt_a_alpha,
        )
    }

    fn high_shelf(sample_rate: f32, freq: f32, gain_db: f32) -> Self {
        let a = 10.0f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * (freq / sample_rate).min(0.499);
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * FILTER_Q);
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha;
        Self::normalized(
            a * ((a + 1.0) + (a - 1.0) * cos + two_sqrt_a_alpha),
            -2.0 * a * ((a - 1.0) + (a + 1.0) * cos),
            a * ((a + 1.0) + (a - 1.0) * cos - two_sqrt_a_alpha),
            (a + 1.0) - (a - 1.0) * cos + two_sqrt_a_alpha,
            2.0 * ((a - 1.0) - (a + 1.0) * cos),
            (a + 1.0) - (a - 1.0) * cos - two_sqrt_a_alpha,
        )
    }
}

/// Direct-form-I state, one per channel.
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadState {
    fn process(&mut self, c: &BiquadCoeffs, x: f32) -> f32 {
        let y = c.b0 * x + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

// ── Compressor ───────────────────────────────────────────────────────────────

/// Feed-forward dynamics compressor with a soft knee. The level envelope is
/// shared across channels so stereo images do not wander.
#[derive(Debug)]
struct Compressor {
    threshold_db: f32,
    knee_db: f32,
    ratio: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope_db: f32,
}

impl Compressor {
    fn new(
        sample_rate: f32,
        threshold_db: f32,
        knee_db: f32,
        ratio: f32,
        attack_secs: f32,
        release_secs: f32,
    ) -> Self {
        let coeff = |secs: f32| (-1.0 / (sample_rate * secs.max(1e-4))).exp();
        Compressor {
            threshold_db,
            knee_db: knee_db.max(0.0),
            ratio: ratio.max(1.0),
            attack_coeff: coeff(attack_secs),
            release_coeff: coeff(release_secs),
            envelope_db: -120.0,
        }
    }

    /// Track the input level and return the linear gain to apply.
    fn gain_for(&mut self, sample: f32) -> f32 {
        let level_db = 20.0 * sample.abs().max(1e-6).log10();
        let coeff = if level_db > self.envelope_db {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope_db = coeff * self.envelope_db + (1.0 - coeff) * level_db;

        let over = self.envelope_db - self.threshold_db;
        let reduction_db = if 2.0 * over < -self.knee_db {
            0.0
        } else if 2.0 * over.abs() <= self.knee_db {
            let t = over + self.knee_db / 2.0;
            (1.0 / self.ratio - 1.0) * t * t / (2.0 * self.knee_db.max(1e-6))
        } else {
            (1.0 / self.ratio - 1.0) * over
        };
        db_to_linear(reduction_db)
    }
}

// ── Distortion ───────────────────────────────────────────────────────────────

/// Soft-saturating waveshaper. Amount 0 is the identity; larger amounts bend
/// the curve harder while staying bounded for |x| <= 1.
fn waveshape(x: f32, amount: f32) -> f32 {
    if amount <= 0.0 {
        x
    } else {
        ((1.0 + amount) * x) / (1.0 + amount * x.abs())
    }
}

// ── Convolution reverb ───────────────────────────────────────────────────────

/// Synthetic impulse response: white noise under a polynomial decay window,
/// parameterized by duration and decay exponent.
pub fn generate_impulse(
    sample_rate: u32,
    duration_secs: f32,
    decay: f32,
    rng: &mut fastrand::Rng,
) -> Vec<f32> {
    let len = ((sample_rate as f32 * duration_secs.max(0.01)) as usize).max(1);
    (0..len)
        .map(|i| {
            let window = 1.0 - i as f32 / len as f32;
            (rng.f32() * 2.0 - 1.0) * window.powf(decay.max(0.0))
        })
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct ReverbTap {
    delay: usize,
    gain: f32,
}

// A dense full-length FIR does not run in real time on the audio thread;
// long impulses are applied as strided taps with energy compensation.
const MAX_REVERB_TAPS: usize = 256;

fn plan_taps(impulse: &[f32]) -> Vec<ReverbTap> {
    if impulse.len() <= MAX_REVERB_TAPS {
        return impulse
            .iter()
            .enumerate()
            .map(|(i, g)| ReverbTap { delay: i, gain: *g })
            .collect();
    }
    let stride = impulse.len().div_ceil(MAX_REVERB_TAPS);
    let compensation = (stride as f32).sqrt();
    (0..impulse.len())
        .step_by(stride)
        .map(|i| ReverbTap {
            delay: i,
            gain: impulse[i] * compensation,
        })
        .collect()
}

/// Tapped-delay convolution against the generated impulse, with an
/// independent ring buffer per channel.
struct Reverb {
    taps: Vec<ReverbTap>,
    rings: Vec<Vec<f32>>,
    positions: Vec<usize>,
    mask: usize,
}

impl Reverb {
    fn new(impulse: &[f32], channels: usize) -> Self {
        let taps = plan_taps(impulse);
        let max_delay = taps.last().map(|t| t.delay).unwrap_or(0);
        let size = (max_delay + 1).next_power_of_two();
        Reverb {
            taps,
            rings: vec![vec![0.0; size]; channels],
            positions: vec![0; channels],
            mask: size - 1,
        }
    }

    fn process(&mut self, channel: usize, x: f32) -> f32 {
        let ring = &mut self.rings[channel];
        let pos = self.positions[channel];
        ring[pos & self.mask] = x;
        let mut out = 0.0;
        for tap in &self.taps {
            out += tap.gain * ring[(pos.wrapping_sub(tap.delay)) & self.mask];
        }
        self.positions[channel] = pos.wrapping_add(1);
        out
    }
}

// ── Chain ────────────────────────────────────────────────────────────────────

/// A Source wrapper rendering the full environment graph. Sample count,
/// channel layout and sample rate pass through unchanged; the noise bed is
/// gated by the inner source, so it stops with the transport.
pub struct EffectsChain<S> {
    inner: S,
    channels: usize,
    channel_cursor: usize,
    hp: BiquadCoeffs,
    lp: BiquadCoeffs,
    eq_low: BiquadCoeffs,
    eq_mid: BiquadCoeffs,
    eq_high: BiquadCoeffs,
    hp_state: Vec<BiquadState>,
    lp_state: Vec<BiquadState>,
    eq_low_state: Vec<BiquadState>,
    eq_mid_state: Vec<BiquadState>,
    eq_high_state: Vec<BiquadState>,
    compressor: Compressor,
    distortion: f32,
    reverb: Reverb,
    dry_gain: f32,
    wet_gain: f32,
    makeup_gain: f32,
    noise_level: f32,
    rng: fastrand::Rng,
}

impl<S> EffectsChain<S>
where
    S: Source<Item = f32>,
{
    pub fn new(source: S, preset: &EnvironmentPreset) -> Self {
        Self::with_rng(source, preset, fastrand::Rng::new())
    }

    /// Seedable constructor for deterministic tests.
    pub fn with_rng(source: S, preset: &EnvironmentPreset, mut rng: fastrand::Rng) -> Self {
        let rate = source.sample_rate() as f32;
        let channels = source.channels().max(1) as usize;
        let impulse =
            generate_impulse(source.sample_rate(), preset.reverb_secs, preset.reverb_decay, &mut rng);
        EffectsChain {
            channels,
            channel_cursor: 0,
            hp: BiquadCoeffs::highpass(rate, preset.highpass_hz, FILTER_Q),
            lp: BiquadCoeffs::lowpass(rate, preset.lowpass_hz, FILTER_Q),
            eq_low: BiquadCoeffs::low_shelf(rate, EQ_LOW_SHELF_HZ, preset.eq_low_db),
            eq_mid: BiquadCoeffs::peaking(rate, EQ_MID_PEAK_HZ, EQ_MID_Q, preset.eq_mid_db),
            eq_high: BiquadCoeffs::high_shelf(rate, EQ_HIGH_SHELF_HZ, preset.eq_high_db),
            hp_state: vec![BiquadState::default(); channels],
            lp_state: vec![BiquadState::default(); channels],
            eq_low_state: vec![BiquadState::default(); channels],
            eq_mid_state: vec![BiquadState::default(); channels],
            eq_high_state: vec![BiquadState::default(); channels],
            compressor: Compressor::new(
                rate,
                preset.comp_threshold_db,
                preset.comp_knee_db,
                preset.comp_ratio,
                preset.comp_attack_secs,
                preset.comp_release_secs,
            ),
            distortion: preset.distortion,
            reverb: Reverb::new(&impulse, channels),
            dry_gain: preset.dry_gain,
            wet_gain: preset.wet_gain,
            makeup_gain: preset.makeup_gain,
            noise_level: preset.noise_level,
            rng,
            inner: source,
        }
    }
}

impl<S> Iterator for EffectsChain<S>
where
    S: Source<Item = f32>,
{
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        let dry = self.inner.next()?;
        let ch = self.channel_cursor;
        self.channel_cursor = (ch + 1) % self.channels;

        let mut wet = self.hp_state[ch].process(&self.hp, dry);
        wet = self.lp_state[ch].process(&self.lp, wet);
        wet = self.eq_low_state[ch].process(&self.eq_low, wet);
        wet = self.eq_mid_state[ch].process(&self.eq_mid, wet);
        wet = self.eq_high_state[ch].process(&self.eq_high, wet);
        wet *= self.compressor.gain_for(wet);
        wet = waveshape(wet, self.distortion);
        wet = self.reverb.process(ch, wet);

        let noise = (self.rng.f32() * 2.0 - 1.0) * self.noise_level;
        Some((dry * self.dry_gain + wet * self.wet_gain) * self.makeup_gain + noise)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<S> Source for EffectsChain<S>
where
    S: Source<Item = f32>,
{
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}

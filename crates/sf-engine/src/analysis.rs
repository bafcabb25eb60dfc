//! Frequency / waveform / level analysis of the primary clip
//!
//! Fed once per frame, either from the live stream's most recent output or from
//! the bytes captured for export. Keeps:
//! - Hann-windowed magnitude spectrum (`fft_size / 2` bins)
//! - Mono waveform of the latest `waveform_size` samples
//! - Peak level of the latest block

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use sf_core::AudioConfig;

/// Spectrum, waveform and level of the primary clip
pub struct AudioAnalysis {
    fft_size: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    /// Most recent mono samples, oldest first (at most `fft_size`)
    history: Vec<f32>,
    spectrum: Vec<f32>,
    waveform: Vec<f32>,
    waveform_size: usize,
    level: f32,
}

impl AudioAnalysis {
    pub fn new(fft_size: usize, waveform_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Hann window
        let window: Vec<f32> = (0..fft_size)
            .map(|i| {
                let phase = 2.0 * std::f32::consts::PI * i as f32 / fft_size as f32;
                0.5 * (1.0 - phase.cos())
            })
            .collect();

        Self {
            fft_size,
            fft,
            window,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            history: Vec::with_capacity(fft_size),
            spectrum: vec![0.0; fft_size / 2],
            waveform: Vec::with_capacity(waveform_size),
            waveform_size,
            level: 0.0,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(config.fft_size, config.waveform_size)
    }

    /// Analyse one block of interleaved float samples
    pub fn process_interleaved(&mut self, samples: &[f32], channels: usize) {
        let channels = channels.max(1);
        let mono: Vec<f32> = samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();

        self.level = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));

        self.history.extend_from_slice(&mono);
        if self.history.len() > self.fft_size {
            let excess = self.history.len() - self.fft_size;
            self.history.drain(..excess);
        }

        let start = mono.len().saturating_sub(self.waveform_size);
        self.waveform.clear();
        self.waveform.extend_from_slice(&mono[start..]);

        self.compute_spectrum();
    }

    fn compute_spectrum(&mut self) {
        // Right-align history in the window, zero-pad the front
        let offset = self.fft_size - self.history.len();
        for (i, bin) in self.scratch.iter_mut().enumerate() {
            let sample = if i >= offset {
                self.history[i - offset]
            } else {
                0.0
            };
            *bin = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let scale = 2.0 / self.fft_size as f32;
        for (out, bin) in self.spectrum.iter_mut().zip(self.scratch.iter()) {
            *out = bin.norm() * scale;
        }
    }

    /// Magnitude spectrum, `fft_size / 2` bins
    pub fn spectrum(&self) -> &[f32] {
        &self.spectrum
    }

    pub fn waveform(&self) -> &[f32] {
        &self.waveform
    }

    /// Peak of the last analysed block
    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.waveform.clear();
        self.spectrum.iter_mut().for_each(|s| *s = 0.0);
        self.level = 0.0;
    }
}

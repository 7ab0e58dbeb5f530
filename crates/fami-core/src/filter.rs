//! Audio output filters
//!
//! First-order IIR sections approximating the console's analog output
//! stage. [`FilterChain::nes`] builds the standard cascade of two high-pass
//! stages (90 Hz, 440 Hz) and one low-pass stage (14 kHz).

use std::f32::consts::PI;

/// A sample-in, sample-out filter
pub trait Filter {
    fn step(&mut self, x: f32) -> f32;
}

/// y[n] = b0*x[n] + b1*x[n-1] - a1*y[n-1]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FirstOrderFilter {
    b0: f32,
    b1: f32,
    a1: f32,
    prev_x: f32,
    prev_y: f32,
}

impl FirstOrderFilter {
    pub fn low_pass(sample_rate: f32, cutoff: f32) -> Self {
        let c = sample_rate / PI / cutoff;
        let a0i = 1.0 / (1.0 + c);
        Self {
            b0: a0i,
            b1: a0i,
            a1: (1.0 - c) * a0i,
            ..Self::default()
        }
    }

    pub fn high_pass(sample_rate: f32, cutoff: f32) -> Self {
        let c = sample_rate / PI / cutoff;
        let a0i = 1.0 / (1.0 + c);
        Self {
            b0: c * a0i,
            b1: -c * a0i,
            a1: (1.0 - c) * a0i,
            ..Self::default()
        }
    }
}

impl Filter for FirstOrderFilter {
    fn step(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.prev_x - self.a1 * self.prev_y;
        self.prev_y = y;
        self.prev_x = x;
        y
    }
}

/// Filters applied in sequence. An empty chain passes samples through.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterChain {
    filters: Vec<FirstOrderFilter>,
}

impl FilterChain {
    pub fn new(filters: Vec<FirstOrderFilter>) -> Self {
        Self { filters }
    }

    /// Output stage for a host sample rate; empty when the rate is zero
    pub fn nes(sample_rate: f32) -> Self {
        if sample_rate <= 0.0 {
            return Self::default();
        }
        Self::new(vec![
            FirstOrderFilter::high_pass(sample_rate, 90.0),
            FirstOrderFilter::high_pass(sample_rate, 440.0),
            FirstOrderFilter::low_pass(sample_rate, 14_000.0),
        ])
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Filter for FilterChain {
    fn step(&mut self, x: f32) -> f32 {
        self.filters.iter_mut().fold(x, |x, filter| filter.step(x))
    }
}

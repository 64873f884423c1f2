//! Fourier bases on periodic intervals.
//!
//! Coefficients use the complex-exponential convention
//! f(x) = Σ_n c_n exp(i k_n (x - x₀)),  k_n = 2π n / L.
//!
//! A real basis keeps n = 0 .. N/2-1 and implies c_{-n} = conj(c_n); the
//! Nyquist mode is dropped. A complex basis keeps all N modes in FFT order.
//! The grid has round(dealias · N) uniformly spaced points, so products of
//! two band-limited fields can be formed without aliasing for dealias ≥ 3/2.

use super::{Basis, Dtype, grid_size_for};
use super::coords::Coord;
use crate::error::BasisError;
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::fmt;
use std::sync::Arc;

/// Fourier basis on [x₀, x₁).
#[derive(Clone)]
pub struct FourierBasis {
    coord: Coord,
    size: usize,
    bounds: (f64, f64),
    dealias: f64,
    dtype: Dtype,
    grid_size: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for FourierBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FourierBasis")
            .field("coord", &self.coord.name())
            .field("size", &self.size)
            .field("bounds", &self.bounds)
            .field("dealias", &self.dealias)
            .field("dtype", &self.dtype)
            .finish()
    }
}

impl FourierBasis {
    /// Create a Fourier basis.
    ///
    /// `size` must be even and positive; `dealias` must be at least 1.
    pub fn new(
        coord: Coord,
        size: usize,
        bounds: (f64, f64),
        dealias: f64,
        dtype: Dtype,
    ) -> Result<Self, BasisError> {
        if size == 0 || size % 2 != 0 {
            return Err(BasisError::InvalidParameter(format!(
                "Fourier size must be even and positive, got {size}"
            )));
        }
        if bounds.1 <= bounds.0 {
            return Err(BasisError::InvalidParameter(format!(
                "Fourier bounds must be increasing, got {bounds:?}"
            )));
        }
        let grid_size = grid_size_for(size, dealias)?;
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(grid_size);
        let inverse = planner.plan_fft_inverse(grid_size);
        Ok(Self {
            coord,
            size,
            bounds,
            dealias,
            dtype,
            grid_size,
            forward,
            inverse,
        })
    }

    /// Real Fourier basis (half spectrum).
    pub fn real(coord: Coord, size: usize, bounds: (f64, f64), dealias: f64) -> Result<Self, BasisError> {
        Self::new(coord, size, bounds, dealias, Dtype::Real)
    }

    /// Complex Fourier basis (full spectrum).
    pub fn complex(coord: Coord, size: usize, bounds: (f64, f64), dealias: f64) -> Result<Self, BasisError> {
        Self::new(coord, size, bounds, dealias, Dtype::Complex)
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    pub fn bounds(&self) -> (f64, f64) {
        self.bounds
    }

    pub fn length(&self) -> f64 {
        self.bounds.1 - self.bounds.0
    }

    /// Integer mode numbers n of the stored coefficients.
    pub fn modes(&self) -> Vec<i64> {
        let n = self.size as i64;
        match self.dtype {
            Dtype::Real => (0..n / 2).collect(),
            Dtype::Complex => (0..n).map(|i| if i < n / 2 { i } else { i - n }).collect(),
        }
    }

    /// Wavenumbers k_n = 2π n / L of the stored coefficients.
    pub fn wavenumbers(&self) -> Vec<f64> {
        let scale = 2.0 * PI / self.length();
        self.modes().into_iter().map(|n| scale * n as f64).collect()
    }

    /// Uniform grid points x₀ + L j / N_grid.
    pub fn grid(&self) -> Vec<f64> {
        let dx = self.length() / self.grid_size as f64;
        (0..self.grid_size).map(|j| self.bounds.0 + dx * j as f64).collect()
    }

    fn spectrum_index(&self, n: i64) -> usize {
        if n >= 0 {
            n as usize
        } else {
            (self.grid_size as i64 + n) as usize
        }
    }

    /// Evaluate a coefficient vector at an arbitrary point.
    pub fn interpolate(&self, coeffs: &[Complex64], x: f64) -> Result<Complex64, BasisError> {
        check_len("Fourier interpolate", self.coeff_size(), coeffs.len())?;
        let mut sum = Complex64::new(0.0, 0.0);
        for (c, k) in coeffs.iter().zip(self.wavenumbers()) {
            let phase = Complex64::from_polar(1.0, k * (x - self.bounds.0));
            sum += c * phase;
            if self.dtype == Dtype::Real && k > 0.0 {
                sum += c.conj() * phase.conj();
            }
        }
        Ok(sum)
    }
}

impl Basis for FourierBasis {
    fn coord(&self) -> &Coord {
        &self.coord
    }

    fn size(&self) -> usize {
        self.size
    }

    fn coeff_size(&self) -> usize {
        match self.dtype {
            Dtype::Real => self.size / 2,
            Dtype::Complex => self.size,
        }
    }

    fn grid_size(&self) -> usize {
        self.grid_size
    }

    fn dealias(&self) -> f64 {
        self.dealias
    }

    fn to_grid(&self, coeffs: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
        check_len("Fourier to_grid", self.coeff_size(), coeffs.len())?;
        let mut spectrum = vec![Complex64::new(0.0, 0.0); self.grid_size];
        for (c, n) in coeffs.iter().zip(self.modes()) {
            spectrum[self.spectrum_index(n)] += c;
            if self.dtype == Dtype::Real && n > 0 {
                spectrum[self.spectrum_index(-n)] += c.conj();
            }
        }
        self.inverse.process(&mut spectrum);
        if self.dtype == Dtype::Real {
            for v in &mut spectrum {
                v.im = 0.0;
            }
        }
        Ok(spectrum)
    }

    fn to_coeff(&self, grid: &[Complex64]) -> Result<Vec<Complex64>, BasisError> {
        check_len("Fourier to_coeff", self.grid_size, grid.len())?;
        let mut buffer = grid.to_vec();
        self.forward.process(&mut buffer);
        let scale = 1.0 / self.grid_size as f64;
        Ok(self
            .modes()
            .into_iter()
            .map(|n| buffer[self.spectrum_index(n)] * scale)
            .collect())
    }

    fn differentiate(&self, coeffs: &[Complex64], order: usize) -> Result<Vec<Complex64>, BasisError> {
        check_len("Fourier differentiate", self.coeff_size(), coeffs.len())?;
        Ok(coeffs
            .iter()
            .zip(self.wavenumbers())
            .map(|(c, k)| c * Complex64::new(0.0, k).powu(order as u32))
            .collect())
    }
}

pub(crate) fn check_len(context: &'static str, expected: usize, actual: usize) -> Result<(), BasisError> {
    if expected != actual {
        return Err(BasisError::ShapeMismatch {
            context,
            expected,
            actual,
        });
    }
    Ok(())
}

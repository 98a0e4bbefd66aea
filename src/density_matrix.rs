use num_complex::Complex;
use rayon::prelude::*;

use crate::circuit::{Observable, Operation};

/// A mixed state of `n` qubits stored as a dense `2^n x 2^n` matrix.
pub struct DensityMatrix {
    n: u32,
    /// The matrix, `ρ`, in row-major order, such that `ρ[r][c]` is found at index `r * 2^n + c`.
    ///
    /// Qubit 0 is the most significant bit of both `r` and `c`.
    /// Seen as a single index, the row bits lie above the column bits,
    /// so the bit of qubit `q` is found at position `2n - 1 - q` for the row
    /// and at position `n - 1 - q` for the column.
    entries: Vec<Complex<f64>>,
}
impl DensityMatrix {
    /// Initialize `|0...0><0...0|` on `n` qubits.
    ///
    /// The caller bounds `n`, see [`simulate_circuit`](crate::simulate_circuit).
    pub(crate) fn zero(n: u32) -> Self {
        let mut entries = vec![Complex::ZERO; 1 << (2 * n)];
        entries[0] = Complex::ONE;
        DensityMatrix { n, entries }
    }

    pub fn qubits(&self) -> u32 {
        self.n
    }

    /// The side length of the matrix.
    pub fn dim(&self) -> usize {
        1 << self.n
    }

    /// `ρ[row][col]`, or `None` outside of the matrix.
    pub fn entry(&self, row: usize, col: usize) -> Option<Complex<f64>> {
        let dim = self.dim();
        if row >= dim || col >= dim {
            return None;
        }
        Some(self.entries[row * dim + col])
    }

    /// Operations must only refer to qubits below [`Self::qubits`].
    pub(crate) fn apply_operation(&mut self, operation: Operation) {
        match operation {
            Operation::H(a) => self.apply_h_gate(a),
            Operation::X(a) => self.apply_x_gate(a),
            Operation::Cnot(a, b) => self.apply_cnot_gate(a, b),
            Operation::PhaseDamping(a, p) => self.apply_phase_damping(a, p),
        }
    }

    /// `ρ -> HρH`
    pub(crate) fn apply_h_gate(&mut self, a: u32) {
        let s = std::f64::consts::FRAC_1_SQRT_2;
        // H is real, so the right multiplication with H† acts on the column bits in the same way.
        for bit in [self.row_bit(a), self.col_bit(a)] {
            self.for_each_pair(bit, |_, x, y| {
                let (x0, y0) = (*x, *y);
                *x = (x0 + y0) * s;
                *y = (x0 - y0) * s;
            });
        }
    }

    /// `ρ -> XρX`
    pub(crate) fn apply_x_gate(&mut self, a: u32) {
        for bit in [self.row_bit(a), self.col_bit(a)] {
            self.for_each_pair(bit, |_, x, y| std::mem::swap(x, y));
        }
    }

    /// `ρ -> CNOT ρ CNOT`
    pub(crate) fn apply_cnot_gate(&mut self, a: u32, b: u32) {
        debug_assert_ne!(a, b);
        for (control, target) in [
            (self.row_bit(a), self.row_bit(b)),
            (self.col_bit(a), self.col_bit(b)),
        ] {
            self.for_each_pair(target, |i, x, y| {
                if i & (1 << control) != 0 {
                    std::mem::swap(x, y);
                }
            });
        }
    }

    /// Apply the phase damping channel with probability `p` to qubit `a`.
    ///
    /// Populations are left untouched while coherences between `|0>` and `|1>` of qubit `a`
    /// are scaled by `√(1-p)`.
    pub(crate) fn apply_phase_damping(&mut self, a: u32, p: f64) {
        debug_assert!((0.0..=1.0).contains(&p));
        let factor = (1.0 - p).sqrt();
        let row = self.row_bit(a);
        let col = self.col_bit(a);
        self.entries.par_iter_mut().enumerate().for_each(|(i, x)| {
            if (i >> row) & 1 != (i >> col) & 1 {
                *x *= factor;
            }
        });
    }

    pub fn trace(&self) -> f64 {
        let dim = self.dim();
        (0..dim)
            .into_par_iter()
            .map(|i| self.entries[i * dim + i].re)
            .sum()
    }

    /// The probability of measuring qubit `a` as `|1>`.
    pub(crate) fn probability_one(&self, a: u32) -> f64 {
        debug_assert!(a < self.n);
        let dim = self.dim();
        let bit = self.n - 1 - a;
        (0..dim)
            .into_par_iter()
            .filter(|i| (i >> bit) & 1 == 1)
            .map(|i| self.entries[i * dim + i].re)
            .sum()
    }

    /// The exact expectation value, `Tr(ρO)`.
    ///
    /// `None` if the observable acts on a qubit outside of the matrix.
    pub fn expectation(&self, observable: Observable) -> Option<f64> {
        if observable.qubit() >= self.n {
            return None;
        }
        match observable {
            Observable::PauliZ(a) => Some(self.trace() - 2.0 * self.probability_one(a)),
        }
    }

    fn row_bit(&self, a: u32) -> u32 {
        debug_assert!(a < self.n);
        2 * self.n - 1 - a
    }
    fn col_bit(&self, a: u32) -> u32 {
        debug_assert!(a < self.n);
        self.n - 1 - a
    }

    /// Call `f` on every pair of entries whose indices differ only in `bit`.
    /// `f` receives the index of the entry where `bit` is unset.
    fn for_each_pair<F>(&mut self, bit: u32, f: F)
    where
        F: Fn(usize, &mut Complex<f64>, &mut Complex<f64>) + Sync,
    {
        let half = 1 << bit;
        let block = half << 1;
        let blocks = self.entries.len() / block;
        if blocks >= num_cpus::get() {
            // Enough blocks to keep every thread busy.
            self.entries
                .par_chunks_mut(block)
                .enumerate()
                .for_each(|(i, chunk)| {
                    let base = i * block;
                    let (lo, hi) = chunk.split_at_mut(half);
                    for (j, (x, y)) in lo.iter_mut().zip(hi).enumerate() {
                        f(base + j, x, y);
                    }
                });
        } else {
            for (i, chunk) in self.entries.chunks_mut(block).enumerate() {
                let base = i * block;
                let (lo, hi) = chunk.split_at_mut(half);
                lo.par_iter_mut()
                    .zip(hi.par_iter_mut())
                    .enumerate()
                    .for_each(|(j, (x, y))| f(base + j, x, y));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_almost_eq(result: Option<Complex<f64>>, expected: Complex<f64>) {
        let result = result.unwrap();
        assert!(
            (result - expected).norm() < 1e-12,
            "result={result:?}\nexpected={expected:?}",
        );
    }

    #[test]
    fn plus_state() {
        let mut rho = DensityMatrix::zero(2);
        rho.apply_h_gate(0);
        for (r, c) in [(0b00, 0b00), (0b00, 0b10), (0b10, 0b00), (0b10, 0b10)] {
            assert_almost_eq(rho.entry(r, c), Complex::new(0.5, 0.0));
        }
        assert_almost_eq(rho.entry(0b01, 0b01), Complex::ZERO);
        assert!((rho.trace() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn bell_state_dephasing() {
        let mut rho = DensityMatrix::zero(2);
        rho.apply_h_gate(0);
        rho.apply_cnot_gate(0, 1);
        rho.apply_phase_damping(0, 0.36);

        assert_almost_eq(rho.entry(0b00, 0b00), Complex::new(0.5, 0.0));
        assert_almost_eq(rho.entry(0b11, 0b11), Complex::new(0.5, 0.0));
        assert_almost_eq(rho.entry(0b00, 0b11), Complex::new(0.4, 0.0));
        assert_almost_eq(rho.entry(0b11, 0b00), Complex::new(0.4, 0.0));
        assert_almost_eq(rho.entry(0b01, 0b01), Complex::ZERO);
    }

    #[test]
    fn flipped_last_qubit() {
        let mut rho = DensityMatrix::zero(3);
        rho.apply_x_gate(2);
        assert_almost_eq(rho.entry(0b001, 0b001), Complex::ONE);
        assert!((rho.expectation(Observable::PauliZ(2)).unwrap() + 1.0).abs() < 1e-12);
        assert!((rho.expectation(Observable::PauliZ(0)).unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn full_dephasing_kills_coherence() {
        let mut rho = DensityMatrix::zero(1);
        rho.apply_h_gate(0);
        rho.apply_phase_damping(0, 1.0);
        rho.apply_h_gate(0);
        // The maximally mixed state is invariant under H.
        assert_almost_eq(rho.entry(0, 0), Complex::new(0.5, 0.0));
        assert_almost_eq(rho.entry(0, 1), Complex::ZERO);
    }

    #[test]
    fn out_of_range() {
        let rho = DensityMatrix::zero(2);
        assert_eq!(rho.entry(4, 0), None);
        assert_eq!(rho.entry(0, 4), None);
        assert_eq!(rho.expectation(Observable::PauliZ(2)), None);
        assert_eq!(rho.expectation(Observable::PauliZ(1)), Some(1.0));
    }
}

//! Gauss–Hermite quadrature rules.

use candle_core::Result;

const EPS: f64 = 3.0e-14;
const MAX_ITER: usize = 10;
/// π^(-1/4)
const PIM4: f64 = 0.751_125_544_464_942_5;

/// Nodes and weights for `∫ exp(-x²) f(x) dx ≈ Σ_i w_i f(x_i)`
///
/// Roots of the Hermite polynomial are found by Newton's method, one
/// symmetric pair at a time, starting from the largest.
///
/// # Returns `(nodes, weights)`, each of length `n`
pub fn gauss_hermite(n: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    if n == 0 {
        candle_core::bail!("need at least one quadrature node");
    }

    let nf = n as f64;
    let mut nodes = vec![0.0; n];
    let mut weights = vec![0.0; n];
    let mut z = 0.0;

    for i in 0..n.div_ceil(2) {
        z = match i {
            0 => (2.0 * nf + 1.0).sqrt() - 1.85575 * (2.0 * nf + 1.0).powf(-0.16667),
            1 => z - 1.14 * nf.powf(0.426) / z,
            2 => 1.86 * z - 0.86 * nodes[0],
            3 => 1.91 * z - 0.91 * nodes[1],
            _ => 2.0 * z - nodes[i - 2],
        };

        let mut converged = false;
        let mut pp = 0.0;
        for _ in 0..MAX_ITER {
            // orthonormal Hermite recurrence
            let mut p1 = PIM4;
            let mut p2 = 0.0;
            for j in 0..n {
                let jf = j as f64;
                let p3 = p2;
                p2 = p1;
                p1 = z * (2.0 / (jf + 1.0)).sqrt() * p2 - (jf / (jf + 1.0)).sqrt() * p3;
            }
            pp = (2.0 * nf).sqrt() * p2;
            let z1 = z;
            z = z1 - p1 / pp;
            if (z - z1).abs() <= EPS {
                converged = true;
                break;
            }
        }
        if !converged {
            candle_core::bail!("Gauss-Hermite root {} of {} did not converge", i, n);
        }

        nodes[i] = z;
        nodes[n - 1 - i] = -z;
        weights[i] = 2.0 / (pp * pp);
        weights[n - 1 - i] = weights[i];
    }

    Ok((nodes, weights))
}

//! Lennard-Jones pair potential and a steepest descent optimizer.
//!
//! Everything here is in atomic units: hartree and bohr.

/// Pair potential parameters.
#[derive(Debug, Clone, Copy)]
pub struct PairPotential {
    pub epsilon: f64,
    pub sigma: f64,
}

/// Outcome of a geometry optimization.
pub struct Optimized {
    pub coords: Vec<[f64; 3]>,
    pub energy: f64,
    pub gradients: Vec<[f64; 3]>,
    pub iterations: usize,
    pub converged: bool,
}

/// Convergence controls of [`PairPotential::optimize`].
#[derive(Debug, Clone, Copy)]
pub struct Convergence {
    pub max_iterations: usize,
    pub energy: f64,
    pub gradients: f64,
    pub step: f64,
}

impl Default for Convergence {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            energy: 1e-8,
            gradients: 1e-5,
            step: 1e-4,
        }
    }
}

/// Largest displacement of any atom in one optimizer step.
const MAX_STEP: f64 = 0.3;

/// Finite difference displacement for the Hessian.
const HESSIAN_DELTA: f64 = 1e-4;

impl PairPotential {
    /// Energy and gradients. Fails if two atoms sit on top of each other.
    pub fn evaluate(&self, coords: &[[f64; 3]]) -> Result<(f64, Vec<[f64; 3]>), String> {
        let mut energy = 0.0;
        let mut gradients = vec![[0.0; 3]; coords.len()];

        for i in 0..coords.len() {
            for j in (i + 1)..coords.len() {
                let d = [
                    coords[i][0] - coords[j][0],
                    coords[i][1] - coords[j][1],
                    coords[i][2] - coords[j][2],
                ];
                let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
                if r2 < 1e-12 {
                    return Err(format!("atoms {} and {} overlap", i + 1, j + 1));
                }
                let s6 = (self.sigma * self.sigma / r2).powi(3);
                energy += 4.0 * self.epsilon * (s6 * s6 - s6);

                // dE/dr divided by r
                let de_over_r = 4.0 * self.epsilon * (6.0 * s6 - 12.0 * s6 * s6) / r2;
                for k in 0..3 {
                    gradients[i][k] += de_over_r * d[k];
                    gradients[j][k] -= de_over_r * d[k];
                }
            }
        }
        Ok((energy, gradients))
    }

    /// Hessian by central differences of the analytic gradients, `3n x 3n`.
    pub fn hessian(&self, coords: &[[f64; 3]]) -> Result<Vec<f64>, String> {
        let n = coords.len() * 3;
        let mut hessian = vec![0.0; n * n];
        let mut displaced = coords.to_vec();

        for a in 0..coords.len() {
            for k in 0..3 {
                displaced[a][k] = coords[a][k] + HESSIAN_DELTA;
                let (_, plus) = self.evaluate(&displaced)?;
                displaced[a][k] = coords[a][k] - HESSIAN_DELTA;
                let (_, minus) = self.evaluate(&displaced)?;
                displaced[a][k] = coords[a][k];

                let row = a * 3 + k;
                for b in 0..coords.len() {
                    for l in 0..3 {
                        hessian[row * n + b * 3 + l] =
                            (plus[b][l] - minus[b][l]) / (2.0 * HESSIAN_DELTA);
                    }
                }
            }
        }
        Ok(hessian)
    }

    /// Steepest descent with an adaptive step length.
    pub fn optimize(
        &self,
        start: &[[f64; 3]],
        conv: &Convergence,
        mut progress: impl FnMut(usize, f64, f64),
    ) -> Result<Optimized, String> {
        let mut coords = start.to_vec();
        let (mut energy, mut gradients) = self.evaluate(&coords)?;
        let mut alpha = 1.0;

        for iteration in 0..conv.max_iterations {
            let gmax = max_norm(&gradients);
            progress(iteration, energy, gmax);
            if gmax < conv.gradients {
                return Ok(Optimized {
                    coords,
                    energy,
                    gradients,
                    iterations: iteration,
                    converged: true,
                });
            }

            let mut accepted = false;
            while alpha > 1e-12 {
                let scale = (MAX_STEP / (alpha * gmax)).min(1.0);
                let trial: Vec<[f64; 3]> = coords
                    .iter()
                    .zip(&gradients)
                    .map(|(x, g)| {
                        [
                            x[0] - alpha * scale * g[0],
                            x[1] - alpha * scale * g[1],
                            x[2] - alpha * scale * g[2],
                        ]
                    })
                    .collect();
                let (trial_energy, trial_gradients) = match self.evaluate(&trial) {
                    Ok(result) => result,
                    Err(_) => {
                        alpha *= 0.5;
                        continue;
                    }
                };
                if trial_energy < energy {
                    let step = alpha * scale * gmax;
                    let delta = energy - trial_energy;
                    coords = trial;
                    energy = trial_energy;
                    gradients = trial_gradients;
                    alpha *= 1.5;
                    accepted = true;
                    if delta < conv.energy && step < conv.step {
                        return Ok(Optimized {
                            coords,
                            energy,
                            gradients,
                            iterations: iteration + 1,
                            converged: true,
                        });
                    }
                    break;
                }
                alpha *= 0.5;
            }
            if !accepted {
                break;
            }
        }

        Ok(Optimized {
            coords,
            energy,
            gradients,
            iterations: conv.max_iterations,
            converged: false,
        })
    }
}

fn max_norm(gradients: &[[f64; 3]]) -> f64 {
    gradients
        .iter()
        .flat_map(|g| g.iter())
        .fold(0.0_f64, |acc, x| acc.max(x.abs()))
}

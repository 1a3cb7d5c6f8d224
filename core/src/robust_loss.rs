//! Geman-McClure robust kernel for graduated non-convexity
//!
//! The kernel is used through its Black-Rangarajan line-process form: every
//! residual gets a weight `l = (mu / (mu + r^2))^2` and the pose is refit by
//! weighted least squares. Large `mu` makes the objective close to a plain
//! quadratic; shrinking `mu` sharpens it toward the robust cost.

/// Scaled Geman-McClure: rho(r) = mu * r^2 / (mu + r^2)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GemanMcClure {
    pub mu: f64,
}

impl GemanMcClure {
    pub fn new(mu: f64) -> Self {
        Self { mu }
    }

    /// Evaluate the loss rho(r)
    pub fn evaluate(&self, residual: f64) -> f64 {
        let r2 = residual * residual;
        self.mu * r2 / (self.mu + r2)
    }

    /// Optimal line-process weight for a residual of squared norm `r2`.
    pub fn weight_squared(&self, r2: f64) -> f64 {
        let l = self.mu / (self.mu + r2);
        l * l
    }

    pub fn weight(&self, residual: f64) -> f64 {
        self.weight_squared(residual * residual)
    }

    /// Shrink `mu` by `div_factor`, never going below `floor`.
    ///
    /// Returns true while the kernel is still being sharpened.
    pub fn anneal(&mut self, div_factor: f64, floor: f64) -> bool {
        if self.mu <= floor {
            self.mu = floor;
            return false;
        }
        self.mu = (self.mu / div_factor).max(floor);
        true
    }
}

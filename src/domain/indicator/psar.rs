//! Parabolic SAR (stop and reverse).
//!
//! Starts long with SAR at the first low and the extreme point at the first
//! high. Each bar: SAR += AF * (EP - SAR), clamped so it never enters the
//! range of the two prior bars. A bar that crosses the SAR reverses the
//! trend: SAR jumps to the old extreme point and AF resets. A new extreme
//! raises AF by one step up to the maximum.

#[derive(Debug, Clone, PartialEq)]
pub struct PsarState {
    step: f64,
    maximum: f64,
    is_long: bool,
    af: f64,
    ep: f64,
    sar: Option<f64>,
    prev: Option<(f64, f64)>,
    prev2: Option<(f64, f64)>,
}

impl PsarState {
    pub fn new(step: f64, maximum: f64) -> Self {
        PsarState {
            step,
            maximum,
            is_long: true,
            af: step,
            ep: 0.0,
            sar: None,
            prev: None,
            prev2: None,
        }
    }

    pub fn is_long(&self) -> bool {
        self.is_long
    }

    pub fn update(&mut self, high: f64, low: f64) -> f64 {
        let Some(sar) = self.sar else {
            self.is_long = true;
            self.af = self.step;
            self.ep = high;
            self.sar = Some(low);
            self.prev = Some((high, low));
            return low;
        };

        let mut next = sar + self.af * (self.ep - sar);
        for (prev_high, prev_low) in [self.prev, self.prev2].into_iter().flatten() {
            next = if self.is_long {
                next.min(prev_low)
            } else {
                next.max(prev_high)
            };
        }

        let reversed = if self.is_long { low < next } else { high > next };
        if reversed {
            self.is_long = !self.is_long;
            next = self.ep;
            self.ep = if self.is_long { high } else { low };
            self.af = self.step;
        } else {
            let new_extreme = if self.is_long { high > self.ep } else { low < self.ep };
            if new_extreme {
                self.ep = if self.is_long { high } else { low };
                self.af = (self.af + self.step).min(self.maximum);
            }
        }

        self.prev2 = self.prev;
        self.prev = Some((high, low));
        self.sar = Some(next);
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rising_then_reversal() {
        let mut psar = PsarState::new(0.02, 0.2);
        let bars = [(10.0, 9.0), (11.0, 10.0), (12.0, 11.0), (13.0, 12.0), (9.0, 8.0)];
        let values: Vec<f64> = bars.iter().map(|&(h, l)| psar.update(h, l)).collect();

        assert_relative_eq!(values[0], 9.0);
        // 9.02 clamped to the prior low
        assert_relative_eq!(values[1], 9.0);
        assert_relative_eq!(values[2], 9.0);
        // 9 + 0.06 * (12 - 9)
        assert_relative_eq!(values[3], 9.18, epsilon = 1e-12);
        // low 8 crosses 9.4856: reverse to the extreme point
        assert_relative_eq!(values[4], 13.0);
        assert!(!psar.is_long());
    }

    #[test]
    fn acceleration_capped() {
        let mut psar = PsarState::new(0.1, 0.2);
        for i in 0..10 {
            let base = 100.0 + i as f64 * 5.0;
            psar.update(base + 1.0, base);
        }
        assert!(psar.is_long());
        assert_relative_eq!(psar.af, 0.2);
    }
}

use crate::rational::Rational;

/// Synthetic presentation clock: the n-th frame is stamped `n / frame_rate`.
/// No wall-clock time is sampled.
#[derive(Clone, Debug)]
pub struct PresentationClock {
    frame_duration: Rational,
    frames: u64,
}

impl PresentationClock {
    /// Returns `None` unless `frame_rate` is strictly positive.
    pub fn new(frame_rate: Rational) -> Option<Self> {
        if !frame_rate.is_positive() {
            return None;
        }
        Some(Self {
            frame_duration: frame_rate.recip()?,
            frames: 0,
        })
    }

    pub fn frame_duration(&self) -> Rational {
        self.frame_duration
    }

    /// Timestamp for the next frame, then advances.
    pub fn next(&mut self) -> Rational {
        let pts = self.frame_duration * self.frames as i64;
        self.frames += 1;
        pts
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamps_are_exact_multiples() {
        let mut clock = PresentationClock::new(Rational::from_integer(30)).unwrap();
        for n in 0..300 {
            assert_eq!(clock.next(), Rational::new(n, 30).unwrap());
        }
        assert_eq!(clock.frames(), 300);
    }

    #[test]
    fn test_ntsc_rate_does_not_drift() {
        let mut clock = PresentationClock::new("30000/1001".parse().unwrap()).unwrap();
        let mut last = Rational::ZERO;
        for _ in 0..30000 {
            last = clock.next();
        }
        assert_eq!(last, Rational::new(29999 * 1001, 30000).unwrap());
    }

    #[test]
    fn test_rejects_non_positive_rate() {
        assert!(PresentationClock::new(Rational::ZERO).is_none());
        assert!(PresentationClock::new(Rational::from_integer(-25)).is_none());
    }
}

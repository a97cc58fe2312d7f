use std::{
    cmp::Ordering,
    fmt::{Display, Formatter},
    hash::{Hash, Hasher},
    ops::Mul,
    str::FromStr,
};

use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::{self, Visitor},
};

/// Exact fraction used for frame rates, frame durations and timestamps.
///
/// Values are kept as given (`2/30` stays `2/30`); comparison and hashing go by
/// value, so `2/30 == 1/15`. The denominator is always positive.
#[derive(Clone, Copy, Debug)]
pub struct Rational {
    num: i64,
    den: i64,
}

impl Rational {
    pub const ZERO: Rational = Rational { num: 0, den: 1 };

    /// Returns `None` when `den` is zero.
    pub fn new(num: i64, den: i64) -> Option<Self> {
        match den {
            0 => None,
            d if d < 0 => Some(Self {
                num: num.checked_neg()?,
                den: d.checked_neg()?,
            }),
            _ => Some(Self { num, den }),
        }
    }

    pub const fn from_integer(value: i64) -> Self {
        Self { num: value, den: 1 }
    }

    pub fn numerator(&self) -> i64 {
        self.num
    }

    pub fn denominator(&self) -> i64 {
        self.den
    }

    pub fn is_positive(&self) -> bool {
        self.num > 0
    }

    pub fn recip(&self) -> Option<Self> {
        Self::new(self.den, self.num)
    }

    pub fn reduced(&self) -> Self {
        let g = gcd(self.num.unsigned_abs().into(), self.den.unsigned_abs().into()).max(1) as i64;
        Self {
            num: self.num / g,
            den: self.den / g,
        }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl PartialEq for Rational {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Rational {}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.num as i128 * other.den as i128).cmp(&(other.num as i128 * self.den as i128))
    }
}

impl Hash for Rational {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let r = self.reduced();
        r.num.hash(state);
        r.den.hash(state);
    }
}

impl Mul<i64> for Rational {
    type Output = Rational;

    fn mul(self, rhs: i64) -> Rational {
        debug_assert!(
            self.num.checked_mul(rhs).is_some(),
            "rational overflow: {} * {}",
            self,
            rhs
        );
        Rational {
            num: self.num.saturating_mul(rhs),
            den: self.den,
        }
    }
}

impl Display for Rational {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl FromStr for Rational {
    type Err = String;

    /// Accepts `"30"` or `"30000/1001"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (num, den) = match s.split_once('/') {
            Some((n, d)) => (n.trim(), d.trim()),
            None => (s, "1"),
        };
        let num: i64 = num
            .parse()
            .map_err(|_| format!("invalid rational numerator in {s:?}"))?;
        let den: i64 = den
            .parse()
            .map_err(|_| format!("invalid rational denominator in {s:?}"))?;
        Rational::new(num, den).ok_or_else(|| format!("zero denominator in {s:?}"))
    }
}

impl Serialize for Rational {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Accepts a plain integer (`30`) or a string (`"30"`, `"30000/1001"`).
impl<'de> Deserialize<'de> for Rational {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(RationalVisitor)
    }
}

struct RationalVisitor;

impl Visitor<'_> for RationalVisitor {
    type Value = Rational;

    fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("an integer or a \"num/den\" string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Rational, E> {
        Ok(Rational::from_integer(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Rational, E> {
        i64::try_from(v)
            .map(Rational::from_integer)
            .map_err(|_| E::custom(format!("{} is out of range", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Rational, E> {
        v.parse().map_err(E::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::Rational;

    #[test]
    fn test_equality_is_by_value() {
        assert_eq!(Rational::new(2, 30).unwrap(), Rational::new(1, 15).unwrap());
        assert_ne!(Rational::new(1, 30).unwrap(), Rational::new(1, 25).unwrap());
        assert!(Rational::new(1, 30).unwrap() < Rational::new(2, 30).unwrap());
    }

    #[test]
    fn test_negative_denominator_is_normalized() {
        let r = Rational::new(1, -2).unwrap();
        assert_eq!(r.numerator(), -1);
        assert_eq!(r.denominator(), 2);
        assert!(Rational::new(1, 0).is_none());
    }

    #[test]
    fn test_parse() {
        assert_eq!("30".parse::<Rational>().unwrap(), Rational::from_integer(30));
        let ntsc: Rational = "30000/1001".parse().unwrap();
        assert_eq!(ntsc.numerator(), 30000);
        assert_eq!(ntsc.denominator(), 1001);
        assert!("30/0".parse::<Rational>().is_err());
        assert!("abc".parse::<Rational>().is_err());
    }

    #[test]
    fn test_mul_and_recip() {
        let a = Rational::new(1, 30).unwrap();
        assert_eq!(a * 15, Rational::new(1, 2).unwrap());
        assert_eq!(Rational::from_integer(30).recip().unwrap(), a);
        assert!(Rational::ZERO.recip().is_none());
    }

    #[test]
    fn test_deserialize_from_number_or_string() {
        let from_int: Rational = serde_json::from_str("30").unwrap();
        assert_eq!(from_int, Rational::from_integer(30));
        let from_str: Rational = serde_json::from_str(r#""30000/1001""#).unwrap();
        assert_eq!(from_str, Rational::new(30000, 1001).unwrap());
        let from_int_str: Rational = serde_json::from_str(r#""25""#).unwrap();
        assert_eq!(from_int_str, Rational::from_integer(25));
        assert!(serde_json::from_str::<Rational>("29.97").is_err());
        assert!(serde_json::from_str::<Rational>(r#""30/0""#).is_err());
    }
}

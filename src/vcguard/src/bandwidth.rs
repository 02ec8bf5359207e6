use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum BandwidthUnit {
    Kbps = 1000,
    Mbps = 1_000_000,
    Gbps = 1_000_000_000,
}

pub const MAX: Bandwidth = Bandwidth {
    val: u64::MAX,
    unit: BandwidthUnit::Gbps,
};
pub const MIN: Bandwidth = Bandwidth {
    val: u64::MIN,
    unit: BandwidthUnit::Mbps,
};

impl std::fmt::Display for BandwidthUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use BandwidthUnit::*;
        match self {
            Kbps => write!(f, "Kb/s"),
            Mbps => write!(f, "Mb/s"),
            Gbps => write!(f, "Gb/s"),
        }
    }
}

pub trait BandwidthTrait {
    fn kbps(self) -> Bandwidth;
    fn mbps(self) -> Bandwidth;
    fn gbps(self) -> Bandwidth;
}

/// A bandwidth amount in bits per second. The unit only affects how the value is displayed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bandwidth {
    val: u64,
    unit: BandwidthUnit,
}

impl Default for Bandwidth {
    fn default() -> Self {
        MIN
    }
}

impl Bandwidth {
    #[inline]
    pub fn zero() -> Self {
        MIN
    }

    #[inline]
    pub fn val(&self) -> u64 {
        self.val
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.val == 0
    }

    #[inline]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Bandwidth {
            val: self.val.saturating_sub(rhs.val),
            unit: self.unit,
        }
    }

    #[inline]
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.val.checked_sub(rhs.val).map(|val| Bandwidth {
            val,
            unit: self.unit,
        })
    }

    /// The value in Mb/s, handy for solvers that work on floats.
    #[inline]
    pub fn as_mbps_f64(&self) -> f64 {
        self.val as f64 / BandwidthUnit::Mbps as u64 as f64
    }
}

impl BandwidthTrait for Bandwidth {
    fn kbps(self) -> Bandwidth {
        Bandwidth {
            val: self.val(),
            unit: BandwidthUnit::Kbps,
        }
    }
    fn mbps(self) -> Bandwidth {
        Bandwidth {
            val: self.val(),
            unit: BandwidthUnit::Mbps,
        }
    }
    fn gbps(self) -> Bandwidth {
        Bandwidth {
            val: self.val(),
            unit: BandwidthUnit::Gbps,
        }
    }
}

impl std::fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}",
            self.val as f64 / self.unit as u64 as f64,
            self.unit
        )
    }
}

impl std::iter::Sum for Bandwidth {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Bandwidth::zero(), |s, b| s + b)
    }
}

impl<'a> std::iter::Sum<&'a Bandwidth> for Bandwidth {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Bandwidth::zero(), |s, &b| s + b)
    }
}

impl std::cmp::PartialEq for Bandwidth {
    fn eq(&self, other: &Self) -> bool {
        self.val().eq(&other.val())
    }
}

impl Eq for Bandwidth {}

impl std::hash::Hash for Bandwidth {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.val.hash(state);
    }
}

impl std::cmp::PartialOrd for Bandwidth {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::cmp::Ord for Bandwidth {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.val().cmp(&other.val())
    }
}

// Integer scaling is exact, hose bounds like `min(k, n - k) * B` rely on that.
macro_rules! impl_bandwidth_mul_for_int {
    ($($ty:ty),+ $(,)?) => (
        $(impl std::ops::Mul<$ty> for Bandwidth {
            type Output = Self;
            fn mul(self, rhs: $ty) -> Self::Output {
                Bandwidth {
                    val: self.val * rhs as u64,
                    unit: self.unit,
                }
            }
        }
        impl std::ops::Div<$ty> for Bandwidth {
            type Output = Self;
            fn div(self, rhs: $ty) -> Self::Output {
                Bandwidth {
                    val: self.val / rhs as u64,
                    unit: self.unit,
                }
            }
        })+
    )
}

impl_bandwidth_mul_for_int!(u8, u16, u32, u64, usize);

impl std::ops::Mul<f64> for Bandwidth {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self::Output {
        Bandwidth {
            val: ((self.val as f64) * rhs) as u64,
            unit: self.unit,
        }
    }
}

impl std::ops::Sub for Bandwidth {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self::Output {
        Bandwidth {
            val: self.val - rhs.val,
            unit: self.unit,
        }
    }
}

impl std::ops::Add for Bandwidth {
    type Output = Self;
    fn add(self, rhs: Self) -> Self::Output {
        Bandwidth {
            val: self.val + rhs.val,
            unit: self.unit,
        }
    }
}

impl std::ops::AddAssign for Bandwidth {
    fn add_assign(&mut self, rhs: Self) {
        self.val += rhs.val;
    }
}

impl std::ops::SubAssign for Bandwidth {
    fn sub_assign(&mut self, rhs: Self) {
        self.val -= rhs.val;
    }
}

macro_rules! impl_bandwidth_trait_for {
    ($($ty:ty),+ $(,)?) => (
        $(impl BandwidthTrait for $ty
        {
            fn kbps(self) -> Bandwidth {
                let unit = BandwidthUnit::Kbps;
                Bandwidth {
                    val: (self as f64 * unit as u64 as f64) as u64,
                    unit,
                }
            }
            fn mbps(self) -> Bandwidth {
                let unit = BandwidthUnit::Mbps;
                Bandwidth {
                    val: (self as f64 * unit as u64 as f64) as u64,
                    unit,
                }
            }
            fn gbps(self) -> Bandwidth {
                let unit = BandwidthUnit::Gbps;
                Bandwidth {
                    val: (self as f64 * unit as u64 as f64) as u64,
                    unit,
                }
            }
        })+
    )
}

impl_bandwidth_trait_for!(u8, u16, u32, u64, i32, i64, f32, f64, usize);

//! Fault/warning bitmasks and edge-triggered updates.
//!
//! Device state machines keep their fault and warning sets in a
//! [`FaultState`]. An update only reports the bits that actually changed,
//! so repeating an identical state never produces a second notification.

use std::fmt;

/// Operations the edge-triggered update needs from a bitmask type.
pub trait FaultBits: Copy + Eq + Default + fmt::Debug {
    fn union(self, other: Self) -> Self;

    fn intersection(self, other: Self) -> Self;

    fn difference(self, other: Self) -> Self;

    fn is_empty(self) -> bool;
}

/// Declares a bitmask newtype with named flags.
///
/// ```
/// gds::fault_flags! {
///     pub struct DoorFaults: u8 {
///         const OPEN = 1 << 0;
///         const FORCED = 1 << 1;
///     }
/// }
///
/// let faults = DoorFaults::OPEN | DoorFaults::FORCED;
/// assert!(faults.contains(DoorFaults::OPEN));
/// assert_eq!(format!("{faults:?}"), "DoorFaults(OPEN | FORCED)");
/// ```
#[macro_export]
macro_rules! fault_flags {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident: $repr:ty {
            $(
                $(#[$flag_meta:meta])*
                const $flag:ident = $value:expr;
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
        $vis struct $name($repr);

        impl $name {
            $(
                $(#[$flag_meta])*
                pub const $flag: Self = Self($value);
            )*

            const NAMED: &'static [(&'static str, Self)] = &[$((stringify!($flag), Self::$flag)),*];

            pub const fn empty() -> Self {
                Self(0)
            }

            pub const fn all() -> Self {
                Self(0 $(| $value)*)
            }

            pub const fn bits(self) -> $repr {
                self.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            pub fn insert(&mut self, other: Self) {
                self.0 |= other.0;
            }

            pub fn remove(&mut self, other: Self) {
                self.0 &= !other.0;
            }

            /// `other` when `present`, otherwise empty.
            pub const fn when(other: Self, present: bool) -> Self {
                if present { other } else { Self(0) }
            }

            /// Names of the set flags, in declaration order.
            pub fn names(self) -> impl Iterator<Item = &'static str> {
                Self::NAMED
                    .iter()
                    .filter(move |(_, flag)| self.contains(*flag))
                    .map(|(name, _)| *name)
            }
        }

        impl ::std::ops::BitOr for $name {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl ::std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl ::std::ops::BitAnd for $name {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                for (i, name) in self.names().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    f.write_str(name)?;
                }
                f.write_str(")")
            }
        }

        impl $crate::faults::FaultBits for $name {
            fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            fn intersection(self, other: Self) -> Self {
                Self(self.0 & other.0)
            }

            fn difference(self, other: Self) -> Self {
                Self(self.0 & !other.0)
            }

            fn is_empty(self) -> bool {
                self.0 == 0
            }
        }
    };
}

/// A non-empty change in a fault/warning set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge<T> {
    Occurred(T),
    Cleared(T),
}

/// Current fault/warning bits owned by one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultState<T> {
    current: T,
}

impl<T: FaultBits> FaultState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> T {
        self.current
    }

    /// Set (`present = true`) or clear `bits`, returning the actual delta.
    ///
    /// Returns `None` when no bit changes state.
    pub fn update(&mut self, bits: T, present: bool) -> Option<Edge<T>> {
        if present {
            let delta = bits.difference(self.current);
            if delta.is_empty() {
                return None;
            }
            self.current = self.current.union(delta);
            Some(Edge::Occurred(delta))
        } else {
            let delta = bits.intersection(self.current);
            if delta.is_empty() {
                return None;
            }
            self.current = self.current.difference(delta);
            Some(Edge::Cleared(delta))
        }
    }

    /// Clear every set bit.
    pub fn clear_all(&mut self) -> Option<Edge<T>> {
        let all = self.current;
        self.update(all, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::fault_flags! {
        struct TestFaults: u8 {
            const A = 1 << 0;
            const B = 1 << 1;
            const C = 1 << 2;
        }
    }

    #[test]
    fn repeated_set_reports_once() {
        let mut state = FaultState::<TestFaults>::new();
        assert_eq!(state.update(TestFaults::A, true), Some(Edge::Occurred(TestFaults::A)));
        assert_eq!(state.update(TestFaults::A, true), None);
        assert_eq!(state.current(), TestFaults::A);
    }

    #[test]
    fn clearing_absent_bit_is_silent() {
        let mut state = FaultState::<TestFaults>::new();
        assert_eq!(state.update(TestFaults::B, false), None);
    }

    #[test]
    fn delta_excludes_bits_already_in_state() {
        let mut state = FaultState::<TestFaults>::new();
        state.update(TestFaults::A, true);
        assert_eq!(
            state.update(TestFaults::A | TestFaults::C, true),
            Some(Edge::Occurred(TestFaults::C))
        );
        assert_eq!(
            state.update(TestFaults::B | TestFaults::C, false),
            Some(Edge::Cleared(TestFaults::C))
        );
        assert_eq!(state.current(), TestFaults::A);
    }

    #[test]
    fn clear_all_reports_everything_set() {
        let mut state = FaultState::<TestFaults>::new();
        state.update(TestFaults::A | TestFaults::B, true);
        assert_eq!(
            state.clear_all(),
            Some(Edge::Cleared(TestFaults::A | TestFaults::B))
        );
        assert_eq!(state.clear_all(), None);
    }

    #[test]
    fn debug_lists_names() {
        assert_eq!(format!("{:?}", TestFaults::empty()), "TestFaults()");
        assert_eq!(format!("{:?}", TestFaults::all()), "TestFaults(A | B | C)");
        assert!(TestFaults::all().intersects(TestFaults::B));
        assert_eq!(TestFaults::when(TestFaults::C, false), TestFaults::empty());
    }
}

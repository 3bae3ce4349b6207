//! Internal helpers: the logging shim, debug formatting wrappers and the `enum_with_unknown!`
//! macro.

use core::fmt;

// Logging is optional: with the `log` feature enabled the macros below forward to the `log`
// crate, without it they compile to nothing while still type-checking their arguments. The
// stack's conventions: PDU hex dumps and per-event chatter at `trace!`, connection lifecycle
// and LLCP traffic at `debug!`/`info!`, protocol violations and dropped frames at
// `warn!`/`error!`. Logging stays off the T_IFS-critical stretch of a connection event; the
// event loop only logs once the radio is back in standby.

macro_rules! error {
    ($($t:tt)*) => {{
        #[cfg(feature = "log")]
        log::error!($($t)*);
        #[cfg(not(feature = "log"))]
        {
            format_args!($($t)*);
        }
    }};
}

macro_rules! warn {
    ($($t:tt)*) => {{
        #[cfg(feature = "log")]
        log::warn!($($t)*);
        #[cfg(not(feature = "log"))]
        {
            format_args!($($t)*);
        }
    }};
}

macro_rules! info {
    ($($t:tt)*) => {{
        #[cfg(feature = "log")]
        log::info!($($t)*);
        #[cfg(not(feature = "log"))]
        {
            format_args!($($t)*);
        }
    }};
}

macro_rules! debug {
    ($($t:tt)*) => {{
        #[cfg(feature = "log")]
        log::debug!($($t)*);
        #[cfg(not(feature = "log"))]
        {
            format_args!($($t)*);
        }
    }};
}

macro_rules! trace {
    ($($t:tt)*) => {{
        #[cfg(feature = "log")]
        log::trace!($($t)*);
        #[cfg(not(feature = "log"))]
        {
            format_args!($($t)*);
        }
    }};
}

/// Creates an enum that can be converted from and to a primitive type, with invalid values becoming
/// a catch-all `Unknown` variant.
///
/// This is copied almost verbatim from [smoltcp].
///
/// [smoltcp]: https://github.com/m-labs/smoltcp/blob/cd893e6ab60f094d684b37be7bc013bf79f0459d/src/macros.rs
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        $v:vis enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr $(,)*
            ),*
        }
    ) => {
        $( #[$enum_attr] )*
        $v enum $name {
            $(
              $( #[$variant_attr] )*
              $variant,
            )*
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant, )*
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value, )*
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

/// `Debug`-formats its contents as a hexadecimal byte slice.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct HexSlice<T>(pub T)
where
    T: AsRef<[u8]>;

impl<T: AsRef<[u8]>> fmt::Debug for HexSlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, byte) in self.0.as_ref().iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        f.write_str("]")
    }
}

impl<T: AsRef<[u8]>> AsRef<T> for HexSlice<T> {
    fn as_ref(&self) -> &T {
        &self.0
    }
}

/// `Debug`-formats its contents in hexadecimal.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Hex<T>(pub T)
where
    T: fmt::LowerHex;

impl<T: fmt::LowerHex> fmt::Debug for Hex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

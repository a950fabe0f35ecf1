//! Macro for implementing string conversions on status-like enums
//!
//! Queue statuses and operation kinds are persisted as text columns and
//! shown to operators, so each enum needs the same trio: `as_str`,
//! `Display` and a case-insensitive `FromStr`.
//!
//! # Example
//!
//! ```rust
//! use offsync_domain::impl_domain_status_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Phase {
//!     Queued,
//!     Running,
//! }
//!
//! impl_domain_status_conversions!(Phase {
//!     Queued => "queued",
//!     Running => "running",
//! });
//!
//! assert_eq!(Phase::Running.as_str(), "running");
//! assert_eq!("QUEUED".parse::<Phase>().unwrap(), Phase::Queued);
//! ```

/// Implements `as_str`, `ALL`, Display and FromStr for status enums
///
/// # Arguments
///
/// * `$enum_name` - The name of the enum type
/// * `$variant => $str` - Mapping of enum variants to their string
///   representations (lowercase)
#[macro_export]
macro_rules! impl_domain_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// Stable string form used for storage and display.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

//! Macros for domain enums.
//!
//! [`impl_domain_enum_conversions!`] generates matching `Display` and
//! `FromStr` implementations from a single variant/string table.
//!
//! # Example
//!
//! ```rust
//! use bulwark_domain::impl_domain_enum_conversions;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! enum Mode {
//!     Fast,
//!     Safe,
//! }
//!
//! impl_domain_enum_conversions!(Mode {
//!     Fast => "fast",
//!     Safe => "safe",
//! });
//!
//! assert_eq!(Mode::Fast.to_string(), "fast");
//! assert_eq!("SAFE".parse::<Mode>(), Ok(Mode::Safe));
//! ```
//!
//! # Features
//!
//! - Case-insensitive parsing with surrounding whitespace ignored
//! - Display always prints the canonical lowercase string
//! - Error messages name the enum and the rejected input

#[macro_export]
macro_rules! impl_domain_enum_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => f.write_str($str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Signal {
        Green,
        Amber,
        Red,
    }

    impl_domain_enum_conversions!(Signal {
        Green => "green",
        Amber => "amber",
        Red => "red",
    });

    #[test]
    fn test_display_uses_canonical_string() {
        assert_eq!(Signal::Green.to_string(), "green");
        assert_eq!(Signal::Red.to_string(), "red");
    }

    #[test]
    fn test_fromstr_ignores_case_and_whitespace() {
        assert_eq!(Signal::from_str("AMBER").unwrap(), Signal::Amber);
        assert_eq!(Signal::from_str(" Red ").unwrap(), Signal::Red);
    }

    #[test]
    fn test_fromstr_rejects_unknown() {
        let err = Signal::from_str("blue").unwrap_err();
        assert!(err.contains("Invalid Signal: blue"));
        assert!(Signal::from_str("").is_err());
    }
}

use std::borrow::Borrow;
use std::fmt;

use serde::Serialize;

/// Declares a cheap string newtype identifier, borrowable as `&str` so it can
/// key a `BTreeMap` and be looked up without an allocation.
macro_rules! string_id {
    ($name:ident) => {
        #[derive(
            Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(Jid);
string_id!(QueueName);
string_id!(ResourceId);
string_id!(WorkerId);

/// Priority, higher sorts first. Signed so callers can push a job below the
/// default of 0 without a separate "lowest" sentinel.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Priority(pub i64);

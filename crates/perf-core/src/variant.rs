//! Configuration variants a sweep can run under. The variant decides the
//! tool's concurrency flag, how saved trace files are named, and the column
//! prefix used by comparison output.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Variant {
    /// Tool runs with its internal thread pool enabled.
    pub multithreading: bool,
    /// Timing was captured with background file-scanning disabled. This is an
    /// operator-provided fact about the machine, not a tool flag.
    pub scanner_disabled: bool,
}

impl Variant {
    pub const BASE: Variant = Variant {
        multithreading: true,
        scanner_disabled: false,
    };
    pub const NO_MT: Variant = Variant {
        multithreading: false,
        scanner_disabled: false,
    };
    pub const NO_DEFENDER: Variant = Variant {
        multithreading: true,
        scanner_disabled: true,
    };

    pub fn label(&self) -> String {
        match (self.multithreading, self.scanner_disabled) {
            (true, false) => "base".to_string(),
            (false, false) => "no_mt".to_string(),
            (true, true) => "no_defender".to_string(),
            (false, true) => "no_mt_no_defender".to_string(),
        }
    }

    /// Column prefix for comparison output, e.g. `no_mt_infer_s`.
    pub fn prefix(&self) -> String {
        format!("{}_", self.label())
    }

    /// Suffix spliced into trace file names, e.g. `perf_trace_no_defender.json`.
    /// Empty for the baseline.
    pub fn file_suffix(&self) -> String {
        let mt = if self.multithreading { "" } else { "_no_mt" };
        let scanner = if self.scanner_disabled {
            "_no_defender"
        } else {
            ""
        };
        format!("{}{}", mt, scanner)
    }

    pub fn parse(name: &str) -> Result<Variant> {
        match name {
            "base" => Ok(Variant::BASE),
            "no_mt" => Ok(Variant::NO_MT),
            "no_defender" => Ok(Variant::NO_DEFENDER),
            "no_mt_no_defender" => Ok(Variant {
                multithreading: false,
                scanner_disabled: true,
            }),
            other => Err(Error::Config(format!(
                "unknown variant '{}': expected base|no_mt|no_defender|no_mt_no_defender",
                other
            ))),
        }
    }
}

impl Serialize for Variant {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for Variant {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Variant::parse(&name).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_and_suffixes_agree_with_presets() {
        assert_eq!(Variant::BASE.label(), "base");
        assert_eq!(Variant::BASE.file_suffix(), "");
        assert_eq!(Variant::NO_MT.prefix(), "no_mt_");
        assert_eq!(Variant::NO_MT.file_suffix(), "_no_mt");
        assert_eq!(Variant::NO_DEFENDER.file_suffix(), "_no_defender");
    }

    #[test]
    fn parse_round_trips_every_combination() {
        for variant in [
            Variant::BASE,
            Variant::NO_MT,
            Variant::NO_DEFENDER,
            Variant {
                multithreading: false,
                scanner_disabled: true,
            },
        ] {
            assert_eq!(Variant::parse(&variant.label()).expect("parse"), variant);
        }
        assert!(Variant::parse("fastest").is_err());
    }
}

use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::core::error::FitError;
use crate::core::potential::{PotentialSpec, SpeciesPair};

/// Which Buckingham coefficient a label addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuckinghamTerm {
    A,
    Rho,
    C,
}

impl BuckinghamTerm {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuckinghamTerm::A => "a",
            BuckinghamTerm::Rho => "rho",
            BuckinghamTerm::C => "c",
        }
    }
}

/// A parsed free-parameter name.
///
/// Vocabulary:
/// * `dq_<X>` - charge moved from shell to core of X
/// * `q_scaling` - global multiplier on every charge
/// * `<X>-<X> spring` - quadratic core-shell spring constant of X
/// * `<A>_<B>_{a|rho|c}` - one Buckingham coefficient of the A-B pair
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParamLabel {
    ChargeSeparation(String),
    ChargeScaling,
    Spring(SpeciesPair),
    Pair { pair: SpeciesPair, term: BuckinghamTerm },
}

fn dq_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^dq_([A-Za-z][A-Za-z0-9]*)$").expect("static regex"))
}

fn spring_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z][A-Za-z0-9]*)-([A-Za-z][A-Za-z0-9]*) spring$").expect("static regex")
    })
}

fn pair_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z][A-Za-z0-9]*)_([A-Za-z][A-Za-z0-9]*)_(a|rho|c)$").expect("static regex")
    })
}

impl FromStr for ParamLabel {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "q_scaling" {
            return Ok(ParamLabel::ChargeScaling);
        }
        if let Some(caps) = dq_pattern().captures(s) {
            return Ok(ParamLabel::ChargeSeparation(caps[1].to_string()));
        }
        if let Some(caps) = spring_pattern().captures(s) {
            return Ok(ParamLabel::Spring(SpeciesPair::new(&caps[1], &caps[2])));
        }
        if let Some(caps) = pair_pattern().captures(s) {
            let term = match &caps[3] {
                "a" => BuckinghamTerm::A,
                "rho" => BuckinghamTerm::Rho,
                _ => BuckinghamTerm::C,
            };
            return Ok(ParamLabel::Pair { pair: SpeciesPair::new(&caps[1], &caps[2]), term });
        }
        Err(FitError::invalid_label(
            s,
            "not one of dq_<X>, q_scaling, '<X>-<X> spring' or <A>_<B>_{a|rho|c}",
        ))
    }
}

impl fmt::Display for ParamLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamLabel::ChargeSeparation(x) => write!(f, "dq_{}", x),
            ParamLabel::ChargeScaling => write!(f, "q_scaling"),
            ParamLabel::Spring(pair) => write!(f, "{} spring", pair),
            ParamLabel::Pair { pair, term } => {
                write!(f, "{}_{}_{}", pair.first(), pair.second(), term.as_str())
            }
        }
    }
}

impl ParamLabel {
    /// Checks that the label refers to something present in `base`.
    /// Returns a human-readable reason on failure.
    pub fn resolve(&self, base: &PotentialSpec) -> Result<(), String> {
        match self {
            ParamLabel::ChargeSeparation(x) => {
                if !base.has_species(x) {
                    Err(format!("species {} is not in the potential", x))
                } else if !base.is_core_shell(x) {
                    Err(format!("dq_ labels apply to core-shell species; {} is a rigid ion", x))
                } else {
                    Ok(())
                }
            }
            ParamLabel::ChargeScaling => {
                if base.has_charged_species() {
                    Ok(())
                } else {
                    Err("no species carries a charge to scale".to_string())
                }
            }
            ParamLabel::Spring(pair) => {
                if !pair.is_homonuclear() {
                    Err(format!("spring {} must join a species to its own shell", pair))
                } else if base.spring(pair.first()).is_none() {
                    Err(format!("no core-shell spring defined for {}", pair))
                } else {
                    Ok(())
                }
            }
            ParamLabel::Pair { pair, .. } => {
                if base.pair(pair).is_some() {
                    Ok(())
                } else {
                    Err(format!("no Buckingham potential defined for {}", pair))
                }
            }
        }
    }

    /// Parses and resolves a list of labels, failing on the first bad one.
    pub fn parse_all(labels: &[String], base: &PotentialSpec) -> Result<Vec<ParamLabel>, FitError> {
        labels
            .iter()
            .map(|raw| {
                let label: ParamLabel = raw.parse()?;
                label.resolve(base).map_err(|reason| FitError::invalid_label(raw, reason))?;
                Ok(label)
            })
            .collect()
    }
}

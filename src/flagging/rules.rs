// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Flagging rules.
//!
//! A rule is a named test with some thresholds. Matrix and vector views have
//! their own catalogues of rules; both are deserialised from a `name` tag, e.g.
//! in toml:
//!
//! ```toml
//! [[rules]]
//! name = "outlier"
//! limit = 8.0
//! minsample = 5
//! ```

use std::str::FromStr;

use itertools::Itertools;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};
use vec1::Vec1;

use super::error::RuleError;

/// Every kind of rule. This doubles as the reason attached to a flag command.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumIter,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    MaxAbs,
    MinAbs,
    Nmedian,
    Outlier,
    HighOutlier,
    LowOutlier,
    TooManyFlags,
    TooManyEntirelyFlagged,
    BadAntenna,
    BadQuadrant,
    Edges,
    Sharps,
    Diffmad,
    Tmf,
}

impl RuleKind {
    /// Can this kind of rule be used on views of this catalogue?
    pub fn in_catalogue(self, catalogue: Catalogue) -> bool {
        use RuleKind::*;
        match catalogue {
            Catalogue::Matrix => matches!(
                self,
                MaxAbs
                    | MinAbs
                    | Nmedian
                    | Outlier
                    | HighOutlier
                    | LowOutlier
                    | TooManyFlags
                    | TooManyEntirelyFlagged
                    | BadAntenna
                    | BadQuadrant
            ),
            Catalogue::Vector => matches!(
                self,
                Edges | MaxAbs | MinAbs | Nmedian | Outlier | Sharps | Diffmad | Tmf
            ),
        }
    }
}

/// The kind of view a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Catalogue {
    Matrix,
    Vector,
}

/// A row or column of a matrix view. A row has a fixed `x` coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Line {
    Row,
    Column,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum MatrixTest {
    /// Flag values whose magnitude is above `limit`.
    MaxAbs { limit: f64 },

    /// Flag values whose magnitude is below `limit`.
    MinAbs { limit: f64 },

    /// Flag values below `lo_limit` times the median or above `hi_limit` times
    /// the median.
    Nmedian {
        #[serde(default)]
        lo_limit: Option<f64>,
        #[serde(default)]
        hi_limit: Option<f64>,
    },

    /// Flag values more than `limit` MADs from the median.
    Outlier { limit: f64 },

    /// Flag values more than `limit` MADs above the median.
    HighOutlier { limit: f64 },

    /// Flag values more than `limit` MADs below the median.
    LowOutlier { limit: f64 },

    /// Flag whole rows or columns that are already too flagged, either by
    /// fraction or by having more flags than the median count plus
    /// `excess_limit`.
    TooManyFlags {
        axis: Line,
        #[serde(default)]
        limit: Option<f64>,
        #[serde(default)]
        excess_limit: Option<usize>,
    },

    /// Flag everything if the fraction of entirely-flagged rows or columns
    /// reaches `limit`.
    TooManyEntirelyFlagged { axis: Line, limit: f64 },

    /// Flag antennas with too many low outliers.
    BadAntenna {
        limit: f64,
        #[serde(default)]
        frac_limit: Option<f64>,
        #[serde(default)]
        number_limit: Option<usize>,
    },

    /// Flag channel quadrants of antennas (or baselines) with too many
    /// outliers.
    BadQuadrant {
        limit: f64,
        frac_limit: f64,
        baseline_frac_limit: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum VectorTest {
    /// Trim channels from each end of the spectrum until the channel-to-channel
    /// difference falls below `limit` times the median difference.
    Edges { limit: f64 },

    MaxAbs { limit: f64 },

    MinAbs { limit: f64 },

    Nmedian {
        #[serde(default)]
        lo_limit: Option<f64>,
        #[serde(default)]
        hi_limit: Option<f64>,
    },

    Outlier { limit: f64 },

    /// Flag channels where the absolute derivative exceeds `limit`, broadened
    /// into neighbouring channels with a large derivative.
    Sharps { limit: f64 },

    /// Flag channels whose derivative is more than `limit` MADs from the
    /// median derivative. If at least `nchan_limit` derivatives are outliers,
    /// the whole spectrum is flagged instead.
    Diffmad { limit: f64, nchan_limit: usize },

    /// "Too many flagged": flag the whole spectrum if it is already flagged
    /// more than `frac_limit` or in more than `nchan_limit` channels.
    Tmf {
        #[serde(default)]
        frac_limit: Option<f64>,
        #[serde(default)]
        nchan_limit: Option<usize>,
    },
}

/// A rule for matrix views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixRule {
    #[serde(flatten)]
    pub test: MatrixTest,

    /// The rule is skipped if there are fewer valid samples than this.
    #[serde(default)]
    pub minsample: usize,
}

/// A rule for vector views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRule {
    #[serde(flatten)]
    pub test: VectorTest,

    #[serde(default)]
    pub minsample: usize,
}

impl MatrixRule {
    pub fn new(test: MatrixTest) -> MatrixRule {
        MatrixRule { test, minsample: 0 }
    }

    pub fn with_minsample(self, minsample: usize) -> MatrixRule {
        MatrixRule { minsample, ..self }
    }
}

impl VectorRule {
    pub fn new(test: VectorTest) -> VectorRule {
        VectorRule { test, minsample: 0 }
    }

    pub fn with_minsample(self, minsample: usize) -> VectorRule {
        VectorRule { minsample, ..self }
    }
}

/// Behaviour common to all rules.
pub trait Rule: Clone + DeserializeOwned {
    const CATALOGUE: Catalogue;

    fn kind(&self) -> RuleKind;

    fn minsample(&self) -> usize;

    /// Check that the rule's parameters make sense.
    fn validate(&self) -> Result<(), RuleError>;
}

fn check_non_negative(kind: RuleKind, param: &str, value: f64) -> Result<(), RuleError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(RuleError::InvalidParameter {
            name: kind.to_string(),
            reason: format!("{param} must be a non-negative number (got {value})"),
        })
    }
}

fn check_fraction(kind: RuleKind, param: &str, value: f64) -> Result<(), RuleError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RuleError::InvalidParameter {
            name: kind.to_string(),
            reason: format!("{param} must be a fraction between 0 and 1 (got {value})"),
        })
    }
}

fn check_nmedian(
    kind: RuleKind,
    lo_limit: Option<f64>,
    hi_limit: Option<f64>,
) -> Result<(), RuleError> {
    match (lo_limit, hi_limit) {
        (None, None) => Err(RuleError::InvalidParameter {
            name: kind.to_string(),
            reason: "at least one of lo_limit and hi_limit must be specified".to_string(),
        }),
        (Some(lo), Some(hi)) if lo > hi => Err(RuleError::InvalidParameter {
            name: kind.to_string(),
            reason: format!("lo_limit ({lo}) is bigger than hi_limit ({hi})"),
        }),
        _ => Ok(()),
    }
}

impl Rule for MatrixRule {
    const CATALOGUE: Catalogue = Catalogue::Matrix;

    fn kind(&self) -> RuleKind {
        match self.test {
            MatrixTest::MaxAbs { .. } => RuleKind::MaxAbs,
            MatrixTest::MinAbs { .. } => RuleKind::MinAbs,
            MatrixTest::Nmedian { .. } => RuleKind::Nmedian,
            MatrixTest::Outlier { .. } => RuleKind::Outlier,
            MatrixTest::HighOutlier { .. } => RuleKind::HighOutlier,
            MatrixTest::LowOutlier { .. } => RuleKind::LowOutlier,
            MatrixTest::TooManyFlags { .. } => RuleKind::TooManyFlags,
            MatrixTest::TooManyEntirelyFlagged { .. } => RuleKind::TooManyEntirelyFlagged,
            MatrixTest::BadAntenna { .. } => RuleKind::BadAntenna,
            MatrixTest::BadQuadrant { .. } => RuleKind::BadQuadrant,
        }
    }

    fn minsample(&self) -> usize {
        self.minsample
    }

    fn validate(&self) -> Result<(), RuleError> {
        let kind = self.kind();
        match self.test {
            MatrixTest::MaxAbs { limit }
            | MatrixTest::MinAbs { limit }
            | MatrixTest::Outlier { limit }
            | MatrixTest::HighOutlier { limit }
            | MatrixTest::LowOutlier { limit } => check_non_negative(kind, "limit", limit),

            MatrixTest::Nmedian { lo_limit, hi_limit } => check_nmedian(kind, lo_limit, hi_limit),

            MatrixTest::TooManyFlags {
                limit,
                excess_limit,
                ..
            } => {
                if limit.is_none() && excess_limit.is_none() {
                    return Err(RuleError::InvalidParameter {
                        name: kind.to_string(),
                        reason: "at least one of limit and excess_limit must be specified"
                            .to_string(),
                    });
                }
                match limit {
                    Some(l) => check_fraction(kind, "limit", l),
                    None => Ok(()),
                }
            }

            MatrixTest::TooManyEntirelyFlagged { limit, .. } => {
                check_fraction(kind, "limit", limit)?;
                if limit == 0.0 {
                    return Err(RuleError::InvalidParameter {
                        name: kind.to_string(),
                        reason: "limit must be bigger than 0".to_string(),
                    });
                }
                Ok(())
            }

            MatrixTest::BadAntenna {
                limit,
                frac_limit,
                number_limit,
            } => {
                check_non_negative(kind, "limit", limit)?;
                match (frac_limit, number_limit) {
                    (None, None) => Err(RuleError::InvalidParameter {
                        name: kind.to_string(),
                        reason: "at least one of frac_limit and number_limit must be specified"
                            .to_string(),
                    }),
                    (Some(f), _) => check_fraction(kind, "frac_limit", f),
                    _ => Ok(()),
                }
            }

            MatrixTest::BadQuadrant {
                limit,
                frac_limit,
                baseline_frac_limit,
            } => {
                check_non_negative(kind, "limit", limit)?;
                check_fraction(kind, "frac_limit", frac_limit)?;
                check_fraction(kind, "baseline_frac_limit", baseline_frac_limit)
            }
        }
    }
}

impl Rule for VectorRule {
    const CATALOGUE: Catalogue = Catalogue::Vector;

    fn kind(&self) -> RuleKind {
        match self.test {
            VectorTest::Edges { .. } => RuleKind::Edges,
            VectorTest::MaxAbs { .. } => RuleKind::MaxAbs,
            VectorTest::MinAbs { .. } => RuleKind::MinAbs,
            VectorTest::Nmedian { .. } => RuleKind::Nmedian,
            VectorTest::Outlier { .. } => RuleKind::Outlier,
            VectorTest::Sharps { .. } => RuleKind::Sharps,
            VectorTest::Diffmad { .. } => RuleKind::Diffmad,
            VectorTest::Tmf { .. } => RuleKind::Tmf,
        }
    }

    fn minsample(&self) -> usize {
        self.minsample
    }

    fn validate(&self) -> Result<(), RuleError> {
        let kind = self.kind();
        match self.test {
            VectorTest::Edges { limit }
            | VectorTest::MaxAbs { limit }
            | VectorTest::MinAbs { limit }
            | VectorTest::Outlier { limit }
            | VectorTest::Sharps { limit } => check_non_negative(kind, "limit", limit),

            VectorTest::Nmedian { lo_limit, hi_limit } => check_nmedian(kind, lo_limit, hi_limit),

            VectorTest::Diffmad { limit, nchan_limit } => {
                check_non_negative(kind, "limit", limit)?;
                if nchan_limit == 0 {
                    return Err(RuleError::InvalidParameter {
                        name: kind.to_string(),
                        reason: "nchan_limit must be bigger than 0".to_string(),
                    });
                }
                Ok(())
            }

            VectorTest::Tmf {
                frac_limit,
                nchan_limit,
            } => match (frac_limit, nchan_limit) {
                (None, None) => Err(RuleError::InvalidParameter {
                    name: kind.to_string(),
                    reason: "at least one of frac_limit and nchan_limit must be specified"
                        .to_string(),
                }),
                (Some(f), _) => check_fraction(kind, "frac_limit", f),
                _ => Ok(()),
            },
        }
    }
}

/// Parse rules from generic (e.g. toml- or json-derived) values. Each value
/// must have a `name` key naming a rule in `R`'s catalogue. Order is preserved,
/// as it is significant.
pub fn parse_rules<R: Rule>(values: &[serde_json::Value]) -> Result<Vec1<R>, RuleError> {
    let mut rules = Vec::with_capacity(values.len());
    for (num, value) in values.iter().enumerate() {
        let name = value
            .get("name")
            .and_then(|n| n.as_str())
            .ok_or(RuleError::MissingName { num: num + 1 })?;
        let kind = RuleKind::from_str(name).map_err(|_| RuleError::Unknown {
            name: name.to_string(),
            valid: RuleKind::iter()
                .filter(|k| k.in_catalogue(R::CATALOGUE))
                .join(", "),
        })?;
        if !kind.in_catalogue(R::CATALOGUE) {
            return Err(RuleError::WrongCatalogue {
                name: name.to_string(),
                catalogue: R::CATALOGUE,
            });
        }
        let rule: R = serde_json::from_value(value.clone()).map_err(|e| RuleError::Parse {
            name: name.to_string(),
            err: e.to_string(),
        })?;
        rule.validate()?;
        rules.push(rule);
    }
    Vec1::try_from_vec(rules).map_err(|_| RuleError::NoRules)
}

//! Archive dependency graph.
//!
//! Holt-Winters archives reference each other by index. The graph is
//! resolved once when a file is opened; every edge also records whether the
//! referenced archive has already been updated when the dependent one runs.
//! Archives are updated in index order, so a lower index is always fresher.

use crate::error::{Result, RrdError};
use crate::format::defs::{ArchiveDef, CfName};

/// Whether a dependency has already been updated in the current round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// The dependency has a lower index and already holds this round's
    /// values; its previous values live in the `last_*` fields.
    AlreadyUpdated,
    /// The dependency has a higher index and still holds the previous
    /// round's values.
    Pending,
}

impl Freshness {
    /// Freshness of `dependency` as seen from `dependent`.
    pub fn of(dependency: usize, dependent: usize) -> Self {
        if dependency < dependent {
            Freshness::AlreadyUpdated
        } else {
            Freshness::Pending
        }
    }
}

/// A dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    /// Index of the referenced archive.
    pub index: usize,
    /// Update order relative to the dependent archive.
    pub freshness: Freshness,
}

impl Dependency {
    fn new(index: usize, dependent: usize) -> Self {
        Self {
            index,
            freshness: Freshness::of(index, dependent),
        }
    }
}

/// What an archive reads from the rest of the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveRole {
    /// AVERAGE, MIN, MAX, LAST: no dependencies.
    Basic,
    /// HWPREDICT or MHWPREDICT.
    Predictor {
        /// SEASONAL archive.
        seasonal: Dependency,
    },
    /// SEASONAL.
    Seasonal {
        /// Predictor archive.
        predictor: Dependency,
    },
    /// DEVSEASONAL.
    DevSeasonal {
        /// Predictor archive.
        predictor: Dependency,
        /// The predictor's SEASONAL archive.
        seasonal: Dependency,
    },
    /// DEVPREDICT.
    DevPredict {
        /// DEVSEASONAL archive.
        devseasonal: Dependency,
    },
    /// FAILURES.
    Failures {
        /// DEVSEASONAL archive.
        devseasonal: Dependency,
        /// Predictor behind the DEVSEASONAL archive.
        predictor: Dependency,
        /// SEASONAL archive behind the predictor.
        seasonal: Dependency,
    },
}

/// Resolved dependencies of every archive of a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveGraph {
    roles: Vec<ArchiveRole>,
}

impl ArchiveGraph {
    /// Resolves and checks all dependency indices.
    ///
    /// # Errors
    ///
    /// Returns `RrdError::InvalidLayout` if an index is out of range or
    /// names an archive of the wrong kind.
    pub fn resolve(archives: &[ArchiveDef]) -> Result<Self> {
        let kind_of = |owner: usize, index: usize, expected: &[CfName]| -> Result<()> {
            let found = archives.get(index).map(|a| a.cf.cf_name());
            match found {
                Some(cf) if expected.contains(&cf) => Ok(()),
                _ => Err(RrdError::InvalidLayout(format!(
                    "archive {} ({}) depends on archive {} which is {}",
                    owner,
                    archives[owner].cf.cf_name(),
                    index,
                    found.map_or("missing".to_string(), |cf| cf.to_string()),
                ))),
            }
        };
        let dependency_of = |index: usize| archives[index].cf.dependency().unwrap_or(usize::MAX);
        const PREDICTORS: &[CfName] = &[CfName::HwPredict, CfName::MhwPredict];

        let mut roles = Vec::with_capacity(archives.len());
        for (i, archive) in archives.iter().enumerate() {
            let role = match archive.cf.cf_name() {
                CfName::Average | CfName::Minimum | CfName::Maximum | CfName::Last => {
                    ArchiveRole::Basic
                }
                CfName::HwPredict | CfName::MhwPredict => {
                    let seasonal = dependency_of(i);
                    kind_of(i, seasonal, &[CfName::Seasonal])?;
                    ArchiveRole::Predictor {
                        seasonal: Dependency::new(seasonal, i),
                    }
                }
                CfName::Seasonal => {
                    let predictor = dependency_of(i);
                    kind_of(i, predictor, PREDICTORS)?;
                    ArchiveRole::Seasonal {
                        predictor: Dependency::new(predictor, i),
                    }
                }
                CfName::DevSeasonal => {
                    let predictor = dependency_of(i);
                    kind_of(i, predictor, PREDICTORS)?;
                    let seasonal = dependency_of(predictor);
                    kind_of(predictor, seasonal, &[CfName::Seasonal])?;
                    ArchiveRole::DevSeasonal {
                        predictor: Dependency::new(predictor, i),
                        seasonal: Dependency::new(seasonal, i),
                    }
                }
                CfName::DevPredict => {
                    let devseasonal = dependency_of(i);
                    kind_of(i, devseasonal, &[CfName::DevSeasonal])?;
                    ArchiveRole::DevPredict {
                        devseasonal: Dependency::new(devseasonal, i),
                    }
                }
                CfName::Failures => {
                    let devseasonal = dependency_of(i);
                    kind_of(i, devseasonal, &[CfName::DevSeasonal])?;
                    let predictor = dependency_of(devseasonal);
                    kind_of(devseasonal, predictor, PREDICTORS)?;
                    let seasonal = dependency_of(predictor);
                    kind_of(predictor, seasonal, &[CfName::Seasonal])?;
                    ArchiveRole::Failures {
                        devseasonal: Dependency::new(devseasonal, i),
                        predictor: Dependency::new(predictor, i),
                        seasonal: Dependency::new(seasonal, i),
                    }
                }
            };
            roles.push(role);
        }
        Ok(Self { roles })
    }

    /// Role of archive `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn role(&self, index: usize) -> ArchiveRole {
        self.roles[index]
    }

    /// Number of archives.
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// Returns true if there are no archives.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::defs::{
        Consolidation, DevPredictParams, FailuresParams, PredictParams, SeasonalParams,
    };

    fn hw(cf: Consolidation) -> ArchiveDef {
        ArchiveDef {
            cf,
            pdp_count: 1,
            row_count: 10,
        }
    }

    fn seasonal(predictor: usize) -> SeasonalParams {
        SeasonalParams {
            gamma: 0.1,
            smoothing_window: 0.05,
            smooth_index: 0,
            predictor,
        }
    }

    fn chain() -> Vec<ArchiveDef> {
        vec![
            ArchiveDef::basic(CfName::Average, 0.5, 1, 10).unwrap(),
            hw(Consolidation::HwPredict(PredictParams {
                alpha: 0.1,
                beta: 0.01,
                seasonal: 2,
            })),
            hw(Consolidation::Seasonal(seasonal(1))),
            hw(Consolidation::DevSeasonal(seasonal(1))),
            hw(Consolidation::DevPredict(DevPredictParams { devseasonal: 3 })),
            hw(Consolidation::Failures(FailuresParams {
                delta_pos: 2.0,
                delta_neg: 2.0,
                window_len: 9,
                threshold: 7,
                devseasonal: 3,
            })),
        ]
    }

    #[test]
    fn test_resolve_chain() {
        let graph = ArchiveGraph::resolve(&chain()).unwrap();
        assert_eq!(graph.role(0), ArchiveRole::Basic);
        assert_eq!(
            graph.role(1),
            ArchiveRole::Predictor {
                seasonal: Dependency {
                    index: 2,
                    freshness: Freshness::Pending
                }
            }
        );
        assert_eq!(
            graph.role(2),
            ArchiveRole::Seasonal {
                predictor: Dependency {
                    index: 1,
                    freshness: Freshness::AlreadyUpdated
                }
            }
        );
        match graph.role(5) {
            ArchiveRole::Failures {
                devseasonal,
                predictor,
                seasonal,
            } => {
                assert_eq!(devseasonal.index, 3);
                assert_eq!(predictor.index, 1);
                assert_eq!(seasonal.index, 2);
                assert_eq!(seasonal.freshness, Freshness::AlreadyUpdated);
            }
            other => panic!("unexpected role {:?}", other),
        }
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let mut archives = chain();
        archives[4] = hw(Consolidation::DevPredict(DevPredictParams { devseasonal: 2 }));
        let err = ArchiveGraph::resolve(&archives).unwrap_err();
        assert!(matches!(err, RrdError::InvalidLayout(_)));
    }

    #[test]
    fn test_out_of_range_rejected() {
        let mut archives = chain();
        archives[1] = hw(Consolidation::HwPredict(PredictParams {
            alpha: 0.1,
            beta: 0.01,
            seasonal: 42,
        }));
        assert!(ArchiveGraph::resolve(&archives).is_err());
    }

    #[test]
    fn test_freshness() {
        assert_eq!(Freshness::of(1, 2), Freshness::AlreadyUpdated);
        assert_eq!(Freshness::of(3, 2), Freshness::Pending);
    }
}

//! Similarity lookup over past estimates
//!
//! A past vote is "similar" to a candidate value `v` when it was cast by the
//! same competence on a finalized story of the same room and its points lie
//! in `[v * (1 - tolerance), v * (1 + tolerance)]`, bounds inclusive.

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Competence;
use crate::voting::validate_points;

/// Default relative tolerance around the candidate value
pub const DEFAULT_TOLERANCE: f64 = 0.2;

/// Default maximum number of results
pub const DEFAULT_LIMIT: u32 = 10;

/// A validated similarity query
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityQuery {
    pub room_id: Uuid,
    pub candidate: f64,
    pub competence: Competence,
    pub limit: u32,
    pub tolerance: f64,
}

impl SimilarityQuery {
    pub fn new(room_id: Uuid, candidate: f64, competence: Competence) -> Result<Self> {
        Ok(Self {
            room_id,
            candidate: validate_points(candidate, "vote_value")?,
            competence,
            limit: DEFAULT_LIMIT,
            tolerance: DEFAULT_TOLERANCE,
        })
    }

    pub fn with_limit(mut self, limit: u32) -> Result<Self> {
        if limit == 0 {
            return Err(Error::InvalidInput("limit must be at least 1".into()));
        }
        self.limit = limit;
        Ok(self)
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&tolerance) {
            return Err(Error::InvalidInput(
                "tolerance must be within [0, 1)".into(),
            ));
        }
        self.tolerance = tolerance;
        Ok(self)
    }

    /// Inclusive `(low, high)` bounds on points
    pub fn bounds(&self) -> (f64, f64) {
        (
            self.candidate * (1.0 - self.tolerance),
            self.candidate * (1.0 + self.tolerance),
        )
    }

    pub fn matches(&self, points: f64) -> bool {
        let (low, high) = self.bounds();
        points >= low && points <= high
    }
}

//! The DECIDE stage: score the candidate answer and pick resolve or escalate.
//!
//! Scoring is the only non-deterministic step in a run. The randomness comes from a
//! [`ScoreSource`] handed in by the caller, so tests and replays can pin it.

use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::domain::ticket::TicketStatus;

pub const AUTO_SOLVE_THRESHOLD: u8 = 90;
/// Score band used when the knowledge lookup produced an answer.
pub const ANSWERED_BAND: RangeInclusive<u8> = 90..=100;
/// Score band used when it did not.
pub const UNANSWERED_BAND: RangeInclusive<u8> = 60..=80;

pub trait ScoreSource {
    /// Draws a score meant to fall inside `band`.
    fn draw(&mut self, band: RangeInclusive<u8>) -> u8;
}

/// Uniform draws from any `rand` generator.
#[derive(Clone, Debug)]
pub struct RngScoreSource<R> {
    rng: R,
}

pub type SeededScoreSource = RngScoreSource<StdRng>;

impl<R> RngScoreSource<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

impl RngScoreSource<StdRng> {
    pub fn seeded(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }

    pub fn from_entropy() -> Self {
        Self::new(StdRng::from_entropy())
    }
}

impl<R> ScoreSource for RngScoreSource<R>
where
    R: Rng,
{
    fn draw(&mut self, band: RangeInclusive<u8>) -> u8 {
        self.rng.gen_range(band)
    }
}

/// Replays a fixed sequence of scores, cycling when it runs out.
#[derive(Clone, Debug)]
pub struct FixedScoreSource {
    scores: Vec<u8>,
    cursor: usize,
}

impl FixedScoreSource {
    pub fn new(scores: Vec<u8>) -> Self {
        Self { scores, cursor: 0 }
    }

    pub fn always(score: u8) -> Self {
        Self::new(vec![score])
    }
}

impl ScoreSource for FixedScoreSource {
    fn draw(&mut self, band: RangeInclusive<u8>) -> u8 {
        if self.scores.is_empty() {
            return *band.start();
        }
        let score = self.scores[self.cursor % self.scores.len()];
        self.cursor += 1;
        score
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBranch {
    AutoSolve,
    Escalate,
}

impl DecisionBranch {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoSolve => "auto_solve",
            Self::Escalate => "escalate",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub score: u8,
    pub branch: DecisionBranch,
}

impl Decision {
    pub fn from_score(score: u8) -> Self {
        let branch = if score >= AUTO_SOLVE_THRESHOLD {
            DecisionBranch::AutoSolve
        } else {
            DecisionBranch::Escalate
        };
        Self { score, branch }
    }

    pub fn can_auto_solve(&self) -> bool {
        matches!(self.branch, DecisionBranch::AutoSolve)
    }

    pub fn status(&self) -> TicketStatus {
        match self.branch {
            DecisionBranch::AutoSolve => TicketStatus::Resolved,
            DecisionBranch::Escalate => TicketStatus::Escalated,
        }
    }
}

pub fn score_band(has_answer: bool) -> RangeInclusive<u8> {
    if has_answer {
        ANSWERED_BAND
    } else {
        UNANSWERED_BAND
    }
}

/// Draws a score for the current knowledge answer and derives the branch from it.
///
/// Draws outside the applicable band are clamped into it, so a ticket with an answer is
/// always auto-solved and one without is always escalated.
pub fn evaluate<S>(kb_answer: Option<&str>, source: &mut S) -> Decision
where
    S: ScoreSource + ?Sized,
{
    let band = score_band(kb_answer.is_some());
    let score = source.draw(band.clone()).clamp(*band.start(), *band.end());
    Decision::from_score(score)
}

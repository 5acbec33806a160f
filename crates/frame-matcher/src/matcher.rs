//! Coarse-to-fine frame matching.
//!
//! Every source fingerprint is compared against the whole target pool. The
//! best candidate is classified by its distance and its margin over the
//! runner-up; near-ties are settled by refinement, which compares frames
//! around the comment against dense target windows around each candidate.

use crate::decoder::Decoder;
use crate::error::Result;
use crate::extractor::FrameExtractor;
use crate::hash::{similarity_from_distance, DHash, FrameHash, HASH_BITS};
use crate::types::VideoSource;
use serde::{Deserialize, Serialize};
use shared::config::MatchingConfig;
use shared::SourceComment;
use std::collections::HashMap;
use tracing::{debug, info};

/// How far a match can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceTier::High => write!(f, "high"),
            ConfidenceTier::Medium => write!(f, "medium"),
            ConfidenceTier::Low => write!(f, "low"),
        }
    }
}

/// Decision taken on a coarse match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Skip,
    Transfer(ConfidenceTier),
    NeedsRefinement,
}

/// Span of contiguous pool samples showing one held shot, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotRun {
    pub start: f64,
    pub end: f64,
}

impl ShotRun {
    /// A run made of a single sample
    pub fn single(timestamp: f64) -> Self {
        Self {
            start: timestamp,
            end: timestamp,
        }
    }

    /// Seconds between the two spans, zero when they overlap
    pub fn gap_to(&self, other: &ShotRun) -> f64 {
        (self.start.max(other.start) - self.end.min(other.end)).max(0.0)
    }
}

/// A target position considered for one source frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub frame_number: u64,
    pub timestamp: f64,
    pub distance: u32,
    /// The shot the candidate sample belongs to
    pub run: ShotRun,
}

/// Distinct candidates for one source frame, best first
#[derive(Debug, Clone, PartialEq)]
pub struct CoarseMatch {
    pub candidates: Vec<Candidate>,
}

impl CoarseMatch {
    pub fn best(&self) -> Option<&Candidate> {
        self.candidates.first()
    }

    pub fn runner_up(&self) -> Option<&Candidate> {
        self.candidates.get(1)
    }
}

/// Where a source comment lands on the target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub comment: SourceComment,
    pub target_frame_number: u64,
    pub target_timestamp: f64,
    pub bit_distance: u32,
    pub similarity: f64,
    pub confidence: ConfidenceTier,
    pub reason: String,
}

impl MatchResult {
    fn new(
        comment: &SourceComment,
        target_frame_number: u64,
        target_timestamp: f64,
        bit_distance: u32,
        confidence: ConfidenceTier,
        reason: String,
    ) -> Self {
        Self {
            comment: comment.clone(),
            target_frame_number,
            target_timestamp,
            bit_distance,
            similarity: similarity_from_distance(bit_distance),
            confidence,
            reason,
        }
    }
}

/// Matcher verdict for one comment
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    Matched(MatchResult),
    Skipped { comment: SourceComment, reason: String },
}

impl MatchOutcome {
    pub fn comment(&self) -> &SourceComment {
        match self {
            MatchOutcome::Matched(m) => &m.comment,
            MatchOutcome::Skipped { comment, .. } => comment,
        }
    }

    pub fn as_match(&self) -> Option<&MatchResult> {
        match self {
            MatchOutcome::Matched(m) => Some(m),
            MatchOutcome::Skipped { .. } => None,
        }
    }
}

/// A source frame near the comment, relative to the comment's own frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetCheck {
    pub delta_seconds: f64,
    pub hash: DHash,
}

/// Result of voting across offset checks
#[derive(Debug, Clone, PartialEq)]
pub enum RefinementVerdict {
    Resolved {
        candidate: usize,
        timestamp: f64,
        distance: u32,
        votes: usize,
        checks: usize,
    },
    Unresolved {
        reason: String,
    },
}

/// Confidence-gated frame matcher
#[derive(Debug, Clone)]
pub struct FrameMatcher {
    config: MatchingConfig,
}

impl FrameMatcher {
    pub fn new(config: MatchingConfig) -> Self {
        Self { config }
    }

    /// Scan the whole pool and keep the best distinct candidates.
    ///
    /// Contiguous samples within `run_distance` of a candidate's own hash
    /// are one held shot and yield a single candidate; a runner-up has to
    /// come from another shot that is also more than `distinct_gap_seconds`
    /// away from every kept one.
    pub fn coarse(&self, source: DHash, pool: &[FrameHash], target_fps: f64) -> CoarseMatch {
        let mut samples: Vec<(f64, u64, DHash)> = pool
            .iter()
            .map(|h| {
                (
                    h.position.timestamp(target_fps),
                    h.position.frame_number(target_fps),
                    h.bits,
                )
            })
            .collect();
        samples.sort_by(|a, b| a.0.total_cmp(&b.0));

        let distances: Vec<u32> = samples.iter().map(|s| s.2.distance(&source)).collect();
        // Index order is time order, so ties go to the earliest sample
        let mut order: Vec<usize> = (0..samples.len()).collect();
        order.sort_by(|&a, &b| distances[a].cmp(&distances[b]).then(a.cmp(&b)));

        let keep = self.config.retained_candidates.max(2);
        let gap = self.config.distinct_gap_seconds;
        let mut claimed = vec![false; samples.len()];
        let mut candidates: Vec<Candidate> = Vec::with_capacity(keep);

        for seed in order {
            if candidates.len() >= keep {
                break;
            }
            if claimed[seed] {
                continue;
            }

            let (first, last) = {
                let seed_bits = samples[seed].2;
                let same_shot = |i: usize| {
                    !claimed[i] && samples[i].2.distance(&seed_bits) <= self.config.run_distance
                };
                let mut first = seed;
                while first > 0 && same_shot(first - 1) {
                    first -= 1;
                }
                let mut last = seed;
                while last + 1 < samples.len() && same_shot(last + 1) {
                    last += 1;
                }
                (first, last)
            };
            claimed[first..=last].fill(true);

            let run = ShotRun {
                start: samples[first].0,
                end: samples[last].0,
            };
            if candidates.iter().all(|kept| kept.run.gap_to(&run) > gap) {
                candidates.push(Candidate {
                    frame_number: samples[seed].1,
                    timestamp: samples[seed].0,
                    distance: distances[seed],
                    run,
                });
            }
        }

        CoarseMatch { candidates }
    }

    /// Classify a best distance against the runner-up's
    pub fn classify(&self, best: Option<u32>, runner_up: Option<u32>) -> Classification {
        let Some(best) = best else {
            return Classification::Skip;
        };
        if best > self.config.loose_distance {
            return Classification::Skip;
        }

        match runner_up {
            Some(runner_up) if runner_up.saturating_sub(best) < self.config.tie_gap => {
                Classification::NeedsRefinement
            }
            _ if best <= self.config.strict_distance => {
                Classification::Transfer(ConfidenceTier::High)
            }
            _ => Classification::Transfer(ConfidenceTier::Low),
        }
    }

    /// Match every comment against the target pool.
    ///
    /// `source_hashes` maps source frame numbers to their fingerprints.
    /// Returns one outcome per comment; near-ties are refined before returning.
    pub async fn match_comments<D: Decoder>(
        &self,
        extractor: &FrameExtractor<D>,
        source: &VideoSource,
        target: &VideoSource,
        comments: &[SourceComment],
        source_hashes: &HashMap<u64, DHash>,
        pool: &[FrameHash],
    ) -> Result<Vec<MatchOutcome>> {
        let mut outcomes: Vec<Option<MatchOutcome>> = vec![None; comments.len()];
        let mut ambiguous = Vec::new();

        for (index, comment) in comments.iter().enumerate() {
            let Some(hash) = source_hashes.get(&comment.source_frame_number) else {
                outcomes[index] = Some(MatchOutcome::Skipped {
                    comment: comment.clone(),
                    reason: format!(
                        "source frame {} could not be extracted",
                        comment.source_frame_number
                    ),
                });
                continue;
            };

            let coarse = self.coarse(*hash, pool, target.metadata.fps);
            let best = coarse.best().copied();
            let runner_up = coarse.runner_up().copied();
            let classification =
                self.classify(best.map(|c| c.distance), runner_up.map(|c| c.distance));

            debug!(
                comment_id = %comment.id,
                best = ?best.map(|c| c.distance),
                runner_up = ?runner_up.map(|c| c.distance),
                classification = ?classification,
                "Coarse match"
            );

            match (classification, best) {
                (Classification::Transfer(tier), Some(best)) => {
                    let reason = match (tier, runner_up) {
                        (ConfidenceTier::High, Some(r)) => format!(
                            "distance {} with margin {} over runner-up",
                            best.distance,
                            r.distance - best.distance
                        ),
                        (ConfidenceTier::High, None) => {
                            format!("distance {} with no other candidate", best.distance)
                        }
                        _ => format!(
                            "distance {} above strict threshold {}",
                            best.distance, self.config.strict_distance
                        ),
                    };
                    let (frame_number, timestamp) = self
                        .place(extractor, source, target, comment.source_frame_number, *hash, &best)
                        .await?;
                    outcomes[index] = Some(MatchOutcome::Matched(MatchResult::new(
                        comment,
                        frame_number,
                        timestamp,
                        best.distance,
                        tier,
                        reason,
                    )));
                }
                (Classification::NeedsRefinement, Some(_)) => {
                    ambiguous.push((index, comment, *hash, coarse))
                }
                _ => {
                    outcomes[index] = Some(MatchOutcome::Skipped {
                        comment: comment.clone(),
                        reason: match best {
                            Some(best) => format!(
                                "best distance {} exceeds {}",
                                best.distance, self.config.loose_distance
                            ),
                            None => "target pool is empty".to_string(),
                        },
                    })
                }
            }
        }

        if !ambiguous.is_empty() {
            info!(count = ambiguous.len(), "Refining near-tie matches");
        }
        for (index, comment, hash, coarse) in ambiguous {
            outcomes[index] = Some(
                self.refine(extractor, source, target, comment, hash, &coarse)
                    .await?,
            );
        }

        Ok(outcomes.into_iter().flatten().collect())
    }

    /// Settle a near-tie by voting across frames around the comment
    async fn refine<D: Decoder>(
        &self,
        extractor: &FrameExtractor<D>,
        source: &VideoSource,
        target: &VideoSource,
        comment: &SourceComment,
        hash: DHash,
        coarse: &CoarseMatch,
    ) -> Result<MatchOutcome> {
        let concurrency = extractor.config().concurrency;
        let source_fps = source.metadata.fps;
        let base = comment.source_frame_number.min(source.metadata.last_frame());
        let last = source.metadata.last_frame() as i64;

        let mut check_frames: Vec<u64> = self
            .config
            .refinement_offsets
            .iter()
            .map(|&offset| (base as i64 + offset).clamp(0, last) as u64)
            .collect();
        check_frames.sort_unstable();
        check_frames.dedup();

        let frames = extractor
            .extract_at_frames(&source.url, &check_frames, source_fps, concurrency)
            .await?;
        let checks: Vec<OffsetCheck> = extractor
            .hash_frames(frames)
            .await?
            .into_iter()
            .map(|h| OffsetCheck {
                delta_seconds: (h.position.frame_number(source_fps) as f64 - base as f64)
                    / source_fps,
                hash: h.bits,
            })
            .collect();

        // The window has to reach the furthest offset around every candidate
        let reach = checks
            .iter()
            .map(|p| p.delta_seconds.abs())
            .fold(0.0, f64::max);
        let target_fps = target.metadata.fps;
        let window = extractor
            .config()
            .refinement_window_seconds
            .max(reach + 1.0 / target_fps);
        let timestamps: Vec<f64> = coarse.candidates.iter().map(|c| c.timestamp).collect();

        let dense_frames = extractor
            .extract_windows(target, &timestamps, window, concurrency)
            .await?;
        let dense: Vec<(f64, DHash)> = extractor
            .hash_frames(dense_frames)
            .await?
            .into_iter()
            .map(|h| (h.position.timestamp(target_fps), h.bits))
            .collect();

        let verdict = refine_votes(
            &checks,
            &coarse.candidates,
            &dense,
            window,
            1.0 / target_fps,
        );

        Ok(match verdict {
            RefinementVerdict::Resolved {
                candidate,
                timestamp,
                distance,
                votes,
                checks,
            } => {
                let tier = if votes == checks && distance <= self.config.strict_distance {
                    ConfidenceTier::High
                } else if votes * 2 > checks {
                    ConfidenceTier::Medium
                } else {
                    ConfidenceTier::Low
                };
                debug!(comment_id = %comment.id, votes, checks, distance, tier = %tier, "Refined match");
                let winner = &coarse.candidates[candidate];
                let (frame_number, timestamp) = if winner.run.end > winner.run.start {
                    self.place(extractor, source, target, base, hash, winner)
                        .await?
                } else {
                    ((timestamp * target_fps).round() as u64, timestamp)
                };
                MatchOutcome::Matched(MatchResult::new(
                    comment,
                    frame_number,
                    timestamp,
                    distance,
                    tier,
                    format!(
                        "refined: {}/{} offsets agree, distance {}",
                        votes, checks, distance
                    ),
                ))
            }
            RefinementVerdict::Unresolved { reason } => {
                debug!(comment_id = %comment.id, reason = %reason, "Refinement inconclusive");
                MatchOutcome::Skipped {
                    comment: comment.clone(),
                    reason,
                }
            }
        })
    }

    /// Target position for `frame` inside the candidate's shot.
    ///
    /// A candidate spanning several samples is a held shot; the comment keeps
    /// its offset from the start of its own source shot, capped at the end
    /// of the target run.
    async fn place<D: Decoder>(
        &self,
        extractor: &FrameExtractor<D>,
        source: &VideoSource,
        target: &VideoSource,
        frame: u64,
        hash: DHash,
        candidate: &Candidate,
    ) -> Result<(u64, f64)> {
        let run = candidate.run;
        if run.end <= run.start {
            return Ok((candidate.frame_number, candidate.timestamp));
        }

        let source_fps = source.metadata.fps;
        let target_fps = target.metadata.fps;
        let reach = ((run.end - run.start) * source_fps).ceil() as u64 + 1;
        let shot_start = self
            .shot_start(extractor, source, frame, hash, reach)
            .await?;

        let offset = (frame - shot_start) as f64 / source_fps;
        let frame_number = ((run.start + offset).min(run.end) * target_fps).round() as u64;
        debug!(frame, shot_start, frame_number, "Aligned within held shot");
        Ok((frame_number, frame_number as f64 / target_fps))
    }

    /// First source frame, at most `reach` frames back, still showing the shot at `frame`
    async fn shot_start<D: Decoder>(
        &self,
        extractor: &FrameExtractor<D>,
        source: &VideoSource,
        frame: u64,
        hash: DHash,
        reach: u64,
    ) -> Result<u64> {
        let mut inside = frame;
        let mut outside = frame.saturating_sub(reach);
        if outside == inside {
            return Ok(inside);
        }
        if self.in_shot(extractor, source, outside, hash).await? {
            return Ok(outside);
        }

        while inside - outside > 1 {
            let mid = outside + (inside - outside) / 2;
            if self.in_shot(extractor, source, mid, hash).await? {
                inside = mid;
            } else {
                outside = mid;
            }
        }
        Ok(inside)
    }

    async fn in_shot<D: Decoder>(
        &self,
        extractor: &FrameExtractor<D>,
        source: &VideoSource,
        frame: u64,
        hash: DHash,
    ) -> Result<bool> {
        let frames = extractor
            .extract_at_frames(&source.url, &[frame], source.metadata.fps, 1)
            .await?;
        let hashes = extractor.hash_frames(frames).await?;
        Ok(hashes
            .first()
            .is_some_and(|h| h.bits.distance(&hash) <= self.config.run_distance))
    }
}

/// Vote across offset checks for the candidate whose neighborhood agrees best.
///
/// For each check, every candidate is scored by the dense target frame
/// nearest to `candidate + delta` (within `tolerance`); the unique lowest
/// distance earns a vote and ties abstain. The winner's final position is
/// the frame in its window closest to the comment's own fingerprint.
pub fn refine_votes(
    checks: &[OffsetCheck],
    candidates: &[Candidate],
    dense: &[(f64, DHash)],
    window: f64,
    tolerance: f64,
) -> RefinementVerdict {
    let mut votes = vec![0usize; candidates.len()];

    for check in checks {
        let distances: Vec<Option<u32>> = candidates
            .iter()
            .map(|c| {
                nearest(dense, c.timestamp, c.timestamp + check.delta_seconds, window, tolerance)
                    .map(|(_, h)| h.distance(&check.hash))
            })
            .collect();

        let Some(min) = distances.iter().flatten().min().copied() else {
            continue;
        };
        let winners: Vec<usize> = distances
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == Some(min))
            .map(|(i, _)| i)
            .collect();
        if let [winner] = winners[..] {
            votes[winner] += 1;
        }
    }

    let top = votes.iter().copied().max().unwrap_or(0);
    if top == 0 {
        return RefinementVerdict::Unresolved {
            reason: "no offset separated the candidates".to_string(),
        };
    }
    let leaders: Vec<usize> = (0..votes.len()).filter(|&i| votes[i] == top).collect();
    let [winner] = leaders[..] else {
        return RefinementVerdict::Unresolved {
            reason: format!("{} candidates tied at {} votes", leaders.len(), top),
        };
    };

    let candidate = candidates[winner];
    let Some(anchor) = checks
        .iter()
        .min_by(|a, b| a.delta_seconds.abs().total_cmp(&b.delta_seconds.abs()))
    else {
        return RefinementVerdict::Unresolved {
            reason: "no source checks".to_string(),
        };
    };

    let (timestamp, distance) = dense
        .iter()
        .filter(|(t, _)| (t - candidate.timestamp).abs() <= window + tolerance / 2.0)
        .map(|&(t, h)| (t, h.distance(&anchor.hash)))
        .min_by(|a, b| {
            a.1.cmp(&b.1).then(
                (a.0 - candidate.timestamp)
                    .abs()
                    .total_cmp(&(b.0 - candidate.timestamp).abs()),
            )
        })
        .unwrap_or((candidate.timestamp, candidate.distance.min(HASH_BITS)));

    RefinementVerdict::Resolved {
        candidate: winner,
        timestamp,
        distance,
        votes: top,
        checks: checks.len(),
    }
}

/// Dense frame within `window` of `center` nearest to `expected`
fn nearest(
    dense: &[(f64, DHash)],
    center: f64,
    expected: f64,
    window: f64,
    tolerance: f64,
) -> Option<(f64, DHash)> {
    dense
        .iter()
        .filter(|(t, _)| (t - center).abs() <= window + tolerance / 2.0)
        .filter(|(t, _)| (t - expected).abs() <= tolerance / 2.0 + 1e-9)
        .min_by(|a, b| (a.0 - expected).abs().total_cmp(&(b.0 - expected).abs()))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedDecoder, ScriptedVideo};
    use crate::types::FramePosition;
    use shared::config::ExtractionConfig;

    fn matcher() -> FrameMatcher {
        FrameMatcher::new(MatchingConfig::default())
    }

    fn candidate(frame: u64, fps: f64, distance: u32) -> Candidate {
        let timestamp = frame as f64 / fps;
        Candidate {
            frame_number: frame,
            timestamp,
            distance,
            run: ShotRun::single(timestamp),
        }
    }

    fn pool_entry(frame: u64, bits: u64) -> FrameHash {
        FrameHash {
            position: FramePosition::Frame(frame),
            bits: DHash(bits),
        }
    }

    #[test]
    fn test_unique_exact_candidate_is_high() {
        let source = DHash(0x0f0f_0f0f_0f0f_0f0f);
        let pool = vec![
            pool_entry(0, !source.0),
            pool_entry(48, source.0),
            pool_entry(96, source.0 ^ 0x00ff_ffff),   // distance 24
            pool_entry(144, source.0 ^ 0xffff_ffff),  // distance 32
        ];

        let coarse = matcher().coarse(source, &pool, 24.0);
        let best = coarse.best().unwrap();
        assert_eq!(best.frame_number, 48);
        assert_eq!(best.distance, 0);
        assert_eq!(coarse.runner_up().unwrap().distance, 24);

        let class = matcher().classify(Some(0), Some(24));
        assert_eq!(class, Classification::Transfer(ConfidenceTier::High));
    }

    #[test]
    fn test_tied_candidates_need_refinement() {
        assert_eq!(
            matcher().classify(Some(4), Some(4)),
            Classification::NeedsRefinement
        );
        assert_eq!(
            matcher().classify(Some(4), Some(6)),
            Classification::NeedsRefinement
        );
    }

    #[test]
    fn test_classification_bounds() {
        let m = matcher();
        assert_eq!(m.classify(None, None), Classification::Skip);
        assert_eq!(m.classify(Some(21), Some(40)), Classification::Skip);
        assert_eq!(
            m.classify(Some(15), Some(40)),
            Classification::Transfer(ConfidenceTier::Low)
        );
        assert_eq!(
            m.classify(Some(10), None),
            Classification::Transfer(ConfidenceTier::High)
        );
    }

    #[test]
    fn test_adjacent_samples_are_not_distinct() {
        let source = DHash(0xabcd);
        // Three samples of one held shot, one distinct shot later
        let pool = vec![
            pool_entry(100, source.0),
            pool_entry(101, source.0),
            pool_entry(102, source.0 ^ 1),
            pool_entry(400, source.0 ^ 0xffff),
        ];

        let coarse = matcher().coarse(source, &pool, 24.0);
        let frames: Vec<u64> = coarse.candidates.iter().map(|c| c.frame_number).collect();
        assert_eq!(frames, vec![100, 400]);
        assert_eq!(
            matcher().classify(
                coarse.best().map(|c| c.distance),
                coarse.runner_up().map(|c| c.distance)
            ),
            Classification::Transfer(ConfidenceTier::High)
        );
    }

    #[test]
    fn test_held_shot_is_one_candidate() {
        let source = DHash(0x00ff_00ff_00ff_00ff);
        // Three seconds of one shot sampled every other frame, with a
        // little noise, then two cuts
        let mut pool: Vec<FrameHash> = (0..36u64)
            .map(|i| pool_entry(i * 2, source.0 ^ (i % 3)))
            .collect();
        pool.extend((36..60u64).map(|i| pool_entry(i * 2, !source.0)));
        pool.extend((60..84u64).map(|i| pool_entry(i * 2, source.0 ^ 0xffff)));

        let coarse = matcher().coarse(source, &pool, 24.0);
        let best = coarse.best().unwrap();
        assert_eq!(best.frame_number, 0);
        assert_eq!(best.run, ShotRun { start: 0.0, end: 70.0 / 24.0 });
        // The shot right after the cut is too close to count as distinct
        let runner_up = coarse.runner_up().unwrap();
        assert_eq!(runner_up.frame_number, 120);
        assert_eq!(runner_up.distance, 16);
        assert_eq!(
            matcher().classify(
                coarse.best().map(|c| c.distance),
                coarse.runner_up().map(|c| c.distance)
            ),
            Classification::Transfer(ConfidenceTier::High)
        );
    }

    #[test]
    fn test_repeated_held_shot_is_still_a_tie() {
        let source = DHash(0x1234_5678);
        let pool: Vec<FrameHash> = (0..240u64)
            .step_by(2)
            .map(|f| {
                let shot_a = f < 48;
                let shot_b = (144..192).contains(&f);
                pool_entry(f, if shot_a || shot_b { source.0 } else { !source.0 })
            })
            .collect();

        let coarse = matcher().coarse(source, &pool, 24.0);
        let frames: Vec<u64> = coarse.candidates.iter().map(|c| c.frame_number).collect();
        assert_eq!(&frames[..2], &[0, 144]);
        assert_eq!(coarse.candidates[1].run, ShotRun { start: 6.0, end: 190.0 / 24.0 });
        assert_eq!(
            matcher().classify(Some(0), Some(coarse.runner_up().unwrap().distance)),
            Classification::NeedsRefinement
        );
    }

    #[test]
    fn test_shot_run_gap() {
        let a = ShotRun { start: 0.0, end: 2.0 };
        let b = ShotRun { start: 3.5, end: 4.0 };
        assert_eq!(a.gap_to(&b), 1.5);
        assert_eq!(b.gap_to(&a), 1.5);
        assert_eq!(a.gap_to(&ShotRun::single(1.0)), 0.0);
    }

    #[test]
    fn test_refine_votes_picks_consistent_neighborhood() {
        let fps = 24.0;
        let at = |frame: u64| frame as f64 / fps;
        let candidates = vec![
            candidate(48, fps, 2),
            candidate(240, fps, 2),
        ];
        // Both candidates look like the comment frame, only the first
        // also matches its neighbors
        let checks = vec![
            OffsetCheck { delta_seconds: -1.0 / fps, hash: DHash(0x11) },
            OffsetCheck { delta_seconds: 0.0, hash: DHash(0x22) },
            OffsetCheck { delta_seconds: 1.0 / fps, hash: DHash(0x33) },
        ];
        let dense = vec![
            (at(47), DHash(0x11)),
            (at(48), DHash(0x22)),
            (at(49), DHash(0x33)),
            (at(239), DHash(0xff00)),
            (at(240), DHash(0x22)),
            (at(241), DHash(0xff00)),
        ];

        let verdict = refine_votes(&checks, &candidates, &dense, 1.0, 1.0 / fps);
        assert_eq!(
            verdict,
            RefinementVerdict::Resolved {
                candidate: 0,
                timestamp: at(48),
                distance: 0,
                votes: 2,
                checks: 3,
            }
        );
    }

    #[test]
    fn test_refine_votes_unresolved_when_neighborhoods_agree() {
        let candidates = vec![
            candidate(0, 24.0, 0),
            candidate(240, 24.0, 0),
        ];
        let checks = vec![OffsetCheck { delta_seconds: 0.0, hash: DHash(7) }];
        let dense = vec![(0.0, DHash(7)), (10.0, DHash(7))];

        let verdict = refine_votes(&checks, &candidates, &dense, 1.0, 1.0 / 24.0);
        assert!(matches!(verdict, RefinementVerdict::Unresolved { .. }));
    }

    #[test]
    fn test_similarity_follows_distance() {
        let comment = SourceComment {
            id: "c1".to_string(),
            text: "fix color".to_string(),
            source_frame_number: 10,
        };
        let result = MatchResult::new(&comment, 12, 0.5, 16, ConfidenceTier::Low, String::new());
        assert_eq!(result.similarity, 0.75);
    }

    fn comment_at(id: &str, frame: u64) -> SourceComment {
        SourceComment {
            id: id.to_string(),
            text: format!("note on {}", frame),
            source_frame_number: frame,
        }
    }

    /// Run the full matching pipeline with a pool sampled every `decimation` frames
    async fn run_pipeline(
        decoder: ScriptedDecoder,
        comments: Vec<SourceComment>,
        decimation: u64,
    ) -> Vec<MatchOutcome> {
        let extractor = FrameExtractor::new(decoder, ExtractionConfig::default());
        let source = extractor.open("source.mp4").await.unwrap();
        let target = extractor.open("target.mp4").await.unwrap();

        let frames: Vec<u64> = comments
            .iter()
            .map(|c| c.source_frame_number)
            .filter(|&f| f < source.metadata.frame_count)
            .collect();
        let extracted = extractor
            .extract_source_frames(&source.url, &frames, source.metadata.fps)
            .await
            .unwrap();
        let source_hashes: HashMap<u64, DHash> = extractor
            .hash_frames(extracted)
            .await
            .unwrap()
            .into_iter()
            .map(|h| (h.position.frame_number(source.metadata.fps), h.bits))
            .collect();
        let pool = extractor.extract_hashed(&target, decimation).await.unwrap();

        matcher()
            .match_comments(&extractor, &source, &target, &comments, &source_hashes, &pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_comment_lands_on_shifted_frame() {
        // The target cut adds two seconds of new material up front
        let decoder = ScriptedDecoder::new()
            .with_video("source.mp4", ScriptedVideo::new(24.0, 121, |f| (f + 48) / 2))
            .with_video("target.mp4", ScriptedVideo::new(24.0, 171, |k| k / 2));

        let outcomes = run_pipeline(decoder, vec![comment_at("c1", 100)], 1).await;
        let matched = outcomes[0].as_match().unwrap();
        assert_eq!(matched.target_frame_number, 148);
        assert_eq!(matched.confidence, ConfidenceTier::High);
        assert_eq!(matched.bit_distance, 0);
        assert_eq!(matched.similarity, 1.0);
    }

    #[tokio::test]
    async fn test_comment_in_held_shot_keeps_its_offset() {
        // Two-second shots; the target cut adds one new shot up front
        fn target(k: u64) -> u64 {
            if k < 48 {
                100
            } else {
                (k - 48) / 48
            }
        }
        let decoder = ScriptedDecoder::new()
            .with_video("source.mp4", ScriptedVideo::new(24.0, 240, |f| f / 48))
            .with_video("target.mp4", ScriptedVideo::new(24.0, 288, target));

        let comments = vec![comment_at("c1", 100), comment_at("c2", 96), comment_at("c3", 143)];
        let outcomes = run_pipeline(decoder, comments, 2).await;

        let frames: Vec<u64> = outcomes
            .iter()
            .map(|o| o.as_match().unwrap().target_frame_number)
            .collect();
        // Frame 143 sits past the last even sample of its target shot
        assert_eq!(frames, vec![148, 144, 190]);
        for outcome in &outcomes {
            let matched = outcome.as_match().unwrap();
            assert_eq!(matched.confidence, ConfidenceTier::High);
            assert_eq!(matched.bit_distance, 0);
        }
    }

    #[tokio::test]
    async fn test_unmatched_comment_is_skipped() {
        let decoder = ScriptedDecoder::new()
            .with_video("source.mp4", ScriptedVideo::new(24.0, 121, |_| 100))
            .with_video("target.mp4", ScriptedVideo::new(24.0, 171, |k| k / 2));

        let outcomes = run_pipeline(decoder, vec![comment_at("c1", 10)], 1).await;
        assert!(matches!(
            &outcomes[0],
            MatchOutcome::Skipped { reason, .. } if reason.contains("exceeds")
        ));
    }

    #[tokio::test]
    async fn test_repeated_shot_is_refined_by_neighbors() {
        // Shot 15 appears twice in the target; only the first occurrence
        // is surrounded by the same shots as in the source
        fn target(k: u64) -> u64 {
            if k < 120 {
                k / 4
            } else if k / 4 == 45 {
                15
            } else {
                64 + (k / 4 - 30)
            }
        }
        let decoder = ScriptedDecoder::new()
            .with_video("source.mp4", ScriptedVideo::new(24.0, 121, |f| f / 4))
            .with_video("target.mp4", ScriptedVideo::new(24.0, 240, target));

        let outcomes = run_pipeline(decoder, vec![comment_at("c1", 60)], 1).await;
        let matched = outcomes[0].as_match().unwrap();
        assert_eq!(matched.target_frame_number, 60);
        assert_eq!(matched.confidence, ConfidenceTier::Medium);
        assert!(matched.reason.starts_with("refined: 3/5"), "{}", matched.reason);
    }

    #[tokio::test]
    async fn test_one_outcome_per_comment() {
        let decoder = ScriptedDecoder::new()
            .with_video("source.mp4", ScriptedVideo::new(24.0, 121, |f| (f + 48) / 2))
            .with_video("target.mp4", ScriptedVideo::new(24.0, 171, |k| k / 2));
        let comments = vec![
            comment_at("a", 10),
            comment_at("b", 100),
            comment_at("c", 500),
        ];

        let outcomes = run_pipeline(decoder, comments, 1).await;
        let ids: Vec<&str> = outcomes.iter().map(|o| o.comment().id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        // Frame 500 is past the end of the source
        assert!(outcomes[2].as_match().is_none());
    }
}

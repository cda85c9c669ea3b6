use std::collections::BTreeMap;

use tracing::debug;
use web_time::Instant;

use crate::{RenditionCatalog, StreamId, StreamIdentity, options::AbrOptions, timer::Timer};

/// Up-switch hysteresis record of one rendition.
///
/// An up-switch to the rendition is only requested once it collected
/// `required_up_votes` consecutive favorable verdicts.
#[derive(Clone, Debug)]
pub struct Trial {
    raw_stream_id: StreamId,
    identity: StreamIdentity,
    consecutive_up_votes: u32,
    required_up_votes: u32,
    decay: Timer,
}

impl Trial {
    fn new(raw_stream_id: StreamId, identity: StreamIdentity, required_up_votes: u32) -> Self {
        Self {
            raw_stream_id,
            identity,
            consecutive_up_votes: 0,
            required_up_votes,
            decay: Timer::default(),
        }
    }

    pub fn raw_stream_id(&self) -> StreamId {
        self.raw_stream_id
    }

    pub fn identity(&self) -> StreamIdentity {
        self.identity
    }

    pub fn consecutive_up_votes(&self) -> u32 {
        self.consecutive_up_votes
    }

    pub fn required_up_votes(&self) -> u32 {
        self.required_up_votes
    }

    /// Whether the residency decay timer is still pending.
    pub fn is_decay_pending(&self) -> bool {
        self.decay.is_armed()
    }
}

/// Trials keyed by raw stream id.
///
/// Keyed by stream rather than rank so a reordered catalog cannot shift
/// counters onto the wrong rendition.
#[derive(Debug)]
pub(crate) struct TrialBook {
    trials: BTreeMap<StreamId, Trial>,
    initial_required: u32,
    max_required: u32,
    penalty: u32,
}

impl TrialBook {
    pub(crate) fn new(opts: &AbrOptions) -> Self {
        Self {
            trials: BTreeMap::new(),
            initial_required: opts.initial_required_up_votes,
            max_required: opts.max_required_up_votes,
            penalty: opts.abandon_penalty,
        }
    }

    /// Align trials with the catalog's actual renditions.
    ///
    /// Rebuilds from scratch when the set of stream identities changed, and
    /// returns `true` in that case. Otherwise keeps the required votes and
    /// zeroes the running votes and pending decays.
    pub(crate) fn sync<C>(&mut self, catalog: &C) -> bool
    where
        C: RenditionCatalog + ?Sized,
    {
        let identities: BTreeMap<StreamId, StreamIdentity> = catalog
            .actual_renditions()
            .iter()
            .map(|r| {
                let identity = catalog.stream(r.raw_stream_id).map_or_else(
                    || {
                        debug!(stream = %r.raw_stream_id, "no stream info, identity from raw id");
                        StreamIdentity(u64::from(r.raw_stream_id.0))
                    },
                    |info| info.identity,
                );
                (r.raw_stream_id, identity)
            })
            .collect();

        let unchanged = identities.len() == self.trials.len()
            && identities
                .iter()
                .all(|(raw, id)| self.trials.get(raw).is_some_and(|t| t.identity == *id));

        if unchanged {
            for trial in self.trials.values_mut() {
                trial.consecutive_up_votes = 0;
                trial.decay.cancel();
            }
            return false;
        }

        self.trials = identities
            .into_iter()
            .map(|(raw, id)| (raw, Trial::new(raw, id, self.initial_required)))
            .collect();
        true
    }

    pub(crate) fn get(&self, raw: StreamId) -> Option<&Trial> {
        self.trials.get(&raw)
    }

    pub(crate) fn len(&self) -> usize {
        self.trials.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Trial> {
        self.trials.values()
    }

    /// Count one favorable verdict; returns `(votes, required)`.
    pub(crate) fn vote_up(&mut self, raw: StreamId) -> Option<(u32, u32)> {
        let trial = self.trials.get_mut(&raw)?;
        trial.consecutive_up_votes = trial.consecutive_up_votes.saturating_add(1);
        Some((trial.consecutive_up_votes, trial.required_up_votes))
    }

    pub(crate) fn clear_votes(&mut self, raw: StreamId) {
        if let Some(trial) = self.trials.get_mut(&raw) {
            trial.consecutive_up_votes = 0;
        }
    }

    pub(crate) fn reset_votes(&mut self) {
        for trial in self.trials.values_mut() {
            trial.consecutive_up_votes = 0;
        }
    }

    /// Penalize a rendition left before its decay fired.
    ///
    /// Returns the new required votes if a penalty was applied.
    pub(crate) fn penalize_if_pending(&mut self, raw: StreamId) -> Option<u32> {
        let trial = self.trials.get_mut(&raw)?;
        if !trial.decay.is_armed() {
            return None;
        }
        trial.decay.cancel();
        trial.required_up_votes = trial
            .required_up_votes
            .saturating_add(self.penalty)
            .min(self.max_required);
        Some(trial.required_up_votes)
    }

    pub(crate) fn arm_decay(&mut self, raw: StreamId, at: Instant) {
        if let Some(trial) = self.trials.get_mut(&raw) {
            trial.decay = Timer::once(at);
        }
    }

    pub(crate) fn cancel_decay(&mut self, raw: StreamId) {
        if let Some(trial) = self.trials.get_mut(&raw) {
            trial.decay.cancel();
        }
    }

    pub(crate) fn cancel_all_decays(&mut self) {
        for trial in self.trials.values_mut() {
            trial.decay.cancel();
        }
    }

    /// Earliest pending decay.
    pub(crate) fn next_decay(&self) -> Option<(StreamId, Instant)> {
        self.trials
            .values()
            .filter_map(|t| t.decay.deadline().map(|d| (t.raw_stream_id, d)))
            .min_by_key(|(_, d)| *d)
    }

    /// Residency reward: one vote fewer is needed next time.
    pub(crate) fn fire_decay(&mut self, raw: StreamId) -> Option<u32> {
        let trial = self.trials.get_mut(&raw)?;
        trial.decay.fire();
        trial.required_up_votes = trial.required_up_votes.saturating_sub(1).max(1);
        Some(trial.required_up_votes)
    }

    pub(crate) fn clear(&mut self) {
        self.trials.clear();
    }
}

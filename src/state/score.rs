use crate::types::*;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// Per-participant running totals for the whole session.
///
/// Each (round, participant) pair is charged at most once, so a repeated
/// answer or a racing timeout cannot move a score twice.
#[derive(Debug)]
pub struct ScoreLedger {
    policy: ScoringPolicy,
    totals: RwLock<HashMap<ParticipantId, i64>>,
    charged: RwLock<HashSet<(u32, ParticipantId)>>,
}

impl ScoreLedger {
    pub fn new(policy: ScoringPolicy) -> Self {
        Self {
            policy,
            totals: RwLock::new(HashMap::new()),
            charged: RwLock::new(HashSet::new()),
        }
    }

    /// Make sure participants show up in reports even before they score
    pub async fn enroll(&self, ids: impl IntoIterator<Item = ParticipantId>) {
        let mut totals = self.totals.write().await;
        for id in ids {
            totals.entry(id).or_insert(0);
        }
    }

    /// Apply an event for a round. Returns the new total, or `None` if this
    /// participant was already charged for the round.
    pub async fn apply(&self, round_no: u32, id: &str, event: ScoreEvent) -> Option<i64> {
        if !self
            .charged
            .write()
            .await
            .insert((round_no, id.to_string()))
        {
            tracing::warn!(
                "Ignoring second {:?} for {} in round {}",
                event,
                id,
                round_no
            );
            return None;
        }

        let delta = event.delta(&self.policy);
        let mut totals = self.totals.write().await;
        let total = totals.entry(id.to_string()).or_insert(0);
        *total += delta;

        tracing::info!(
            "Round {}: {} {:?} ({:+}) -> {}",
            round_no,
            id,
            event,
            delta,
            total
        );
        Some(*total)
    }

    pub async fn score(&self, id: &str) -> i64 {
        self.totals.read().await.get(id).copied().unwrap_or(0)
    }

    /// Totals sorted by score descending, then identity
    pub async fn snapshot(&self) -> Vec<ScoreEntry> {
        let totals = self.totals.read().await;
        let mut entries: Vec<ScoreEntry> = totals
            .iter()
            .map(|(identity, score)| ScoreEntry {
                identity: identity.clone(),
                score: *score,
            })
            .collect();

        entries.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.identity.cmp(&b.identity)));
        entries
    }
}

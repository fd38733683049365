//! Moderation store
//!
//! Case ledger, per-guild case counters, and per-user point state, all held
//! in shared maps and mirrored to YAML files. Every mutation writes the
//! touched collection back to disk before returning; a failed write is
//! rolled back in memory so the maps never drift ahead of the files. The one
//! exception is the case counter, whose increment always stands so an id
//! handed out before a failed write can never be handed out again.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use super::case::{Case, CaseKind};
use super::{ModerationError, ModerationResult};

const COUNTERS_FILE: &str = "case_counters.yaml";
const CASES_FILE: &str = "cases.yaml";
const USER_STATES_FILE: &str = "user_states.yaml";

/// Per-user moderation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserModerationState {
    /// User this state belongs to
    pub user_id: u64,
    /// Current warn point total, never negative
    pub warn_points: u64,
    /// Whether the user is currently muted
    pub is_muted: bool,
    /// Whether the user has already been kicked for crossing the kick threshold
    pub was_warn_kicked: bool,
}

impl UserModerationState {
    /// Create a fresh state for a user with no history
    #[must_use]
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            warn_points: 0,
            is_muted: false,
            was_warn_kicked: false,
        }
    }
}

/// A guild's last issued case id, as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CaseCounter {
    guild_id: u64,
    last_case_id: u64,
}

/// A user's case list, as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserCases {
    user_id: u64,
    cases: Vec<Case>,
}

/// Store for cases, case counters, and user states
#[derive(Clone)]
pub struct ModerationStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    /// Last issued case id per guild
    counters: DashMap<u64, u64>,
    /// Case lists keyed by user id, ordered by issue time
    cases: DashMap<u64, Vec<Case>>,
    /// Point and mute state keyed by user id
    user_states: DashMap<u64, UserModerationState>,
    /// Directory the YAML files live in, None for a memory-only store
    data_dir: Option<PathBuf>,
}

impl Default for ModerationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ModerationStore {
    /// Create a memory-only store that never touches disk
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                counters: DashMap::new(),
                cases: DashMap::new(),
                user_states: DashMap::new(),
                data_dir: None,
            }),
        }
    }

    /// Load a store backed by YAML files under `data_dir`.
    ///
    /// Missing files yield an empty store. Each guild's counter is raised to
    /// the highest case id found in the ledger, so ids stay unique even when
    /// the counter file lags behind the cases file.
    pub async fn load(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        let counters = DashMap::new();
        let cases: DashMap<u64, Vec<Case>> = DashMap::new();
        let user_states = DashMap::new();

        if let Ok(content) = tokio::fs::read_to_string(data_dir.join(COUNTERS_FILE)).await {
            match serde_yaml::from_str::<Vec<CaseCounter>>(&content) {
                Ok(entries) => {
                    for entry in entries {
                        counters.insert(entry.guild_id, entry.last_case_id);
                    }
                }
                Err(e) => warn!("Failed to parse {COUNTERS_FILE}: {e}"),
            }
        }

        if let Ok(content) = tokio::fs::read_to_string(data_dir.join(CASES_FILE)).await {
            match serde_yaml::from_str::<Vec<UserCases>>(&content) {
                Ok(entries) => {
                    for entry in entries {
                        cases.insert(entry.user_id, entry.cases);
                    }
                }
                Err(e) => warn!("Failed to parse {CASES_FILE}: {e}"),
            }
        }

        if let Ok(content) = tokio::fs::read_to_string(data_dir.join(USER_STATES_FILE)).await {
            match serde_yaml::from_str::<Vec<UserModerationState>>(&content) {
                Ok(entries) => {
                    for entry in entries {
                        user_states.insert(entry.user_id, entry);
                    }
                }
                Err(e) => warn!("Failed to parse {USER_STATES_FILE}: {e}"),
            }
        }

        // Reconcile counters against the ledger
        for entry in cases.iter() {
            for case in entry.value() {
                let mut counter = counters.entry(case.guild_id).or_insert(0);
                if case.id > *counter {
                    *counter = case.id;
                }
            }
        }

        Self {
            inner: Arc::new(StoreInner {
                counters,
                cases,
                user_states,
                data_dir: Some(data_dir),
            }),
        }
    }

    /// Issue the next case id for a guild.
    ///
    /// Ids are strictly increasing per guild. The increment stands even when
    /// the write fails, so a caller that abandons the id leaves a gap in the
    /// sequence rather than a duplicate.
    pub async fn next_case_id(&self, guild_id: u64) -> ModerationResult<u64> {
        let id = {
            let mut counter = self.inner.counters.entry(guild_id).or_insert(0);
            *counter += 1;
            *counter
        };

        self.save_counters().await?;
        Ok(id)
    }

    /// The last case id issued for a guild, zero if none
    #[must_use]
    pub fn last_case_id(&self, guild_id: u64) -> u64 {
        self.inner
            .counters
            .get(&guild_id)
            .map_or(0, |counter| *counter)
    }

    /// Append a case to its user's ledger.
    ///
    /// On a failed write the in-memory append is rolled back and the case is
    /// not recorded anywhere.
    pub async fn add_case(&self, case: Case) -> ModerationResult<()> {
        let user_id = case.user_id;
        let case_id = case.id;
        let guild_id = case.guild_id;

        self.inner.cases.entry(user_id).or_default().push(case);

        if let Err(err) = self.save_cases().await {
            if let Some(mut list) = self.inner.cases.get_mut(&user_id) {
                list.retain(|case| case.id != case_id || case.guild_id != guild_id);
            }
            return Err(err);
        }
        Ok(())
    }

    /// Get a user's case by id
    pub fn case(&self, user_id: u64, case_id: u64) -> ModerationResult<Case> {
        self.inner
            .cases
            .get(&user_id)
            .and_then(|list| list.iter().find(|case| case.id == case_id).cloned())
            .ok_or(ModerationError::CaseNotFound { user_id, case_id })
    }

    /// Get all cases for a user in issue order
    #[must_use]
    pub fn cases_for(&self, user_id: u64) -> Vec<Case> {
        self.inner
            .cases
            .get(&user_id)
            .map(|list| list.clone())
            .unwrap_or_default()
    }

    /// Mark a user's warn case lifted.
    ///
    /// Validates that the case exists, is a warn, has not been lifted, and
    /// that returning its points would not push the user's total negative.
    /// The caller still owns the point reversal itself.
    pub async fn lift_warn(
        &self,
        user_id: u64,
        case_id: u64,
        moderator_id: u64,
        moderator_tag: &str,
        reason: &str,
    ) -> ModerationResult<Case> {
        let (lifted, original) = {
            let mut list = self
                .inner
                .cases
                .get_mut(&user_id)
                .ok_or(ModerationError::CaseNotFound { user_id, case_id })?;
            let case = list
                .iter_mut()
                .find(|case| case.id == case_id)
                .ok_or(ModerationError::CaseNotFound { user_id, case_id })?;

            if case.kind != CaseKind::Warn {
                return Err(ModerationError::NotAWarnCase(case_id));
            }
            if case.lifted {
                return Err(ModerationError::AlreadyLifted(case_id));
            }
            let points = case.warn_points()?;
            if self.points(user_id) < points {
                return Err(ModerationError::NegativePoints);
            }

            let original = case.clone();
            case.lift(moderator_id, moderator_tag, reason)?;
            (case.clone(), original)
        };

        if let Err(err) = self.save_cases().await {
            if let Some(mut list) = self.inner.cases.get_mut(&user_id) {
                if let Some(case) = list.iter_mut().find(|case| case.id == case_id) {
                    *case = original;
                }
            }
            return Err(err);
        }
        Ok(lifted)
    }

    /// A user's current state, a fresh default if none is recorded
    #[must_use]
    pub fn user_state(&self, user_id: u64) -> UserModerationState {
        self.inner
            .user_states
            .get(&user_id)
            .map_or_else(|| UserModerationState::new(user_id), |state| state.clone())
    }

    /// A user's current warn point total
    #[must_use]
    pub fn points(&self, user_id: u64) -> u64 {
        self.inner
            .user_states
            .get(&user_id)
            .map_or(0, |state| state.warn_points)
    }

    /// Apply a point delta to a user and return the new total.
    ///
    /// A negative delta larger than the current total is refused without
    /// changing anything. The check and the update happen under the per-user
    /// entry lock, so concurrent deductions cannot both pass the check.
    pub async fn adjust_points(&self, user_id: u64, delta: i64) -> ModerationResult<u64> {
        let (previous, updated) = {
            let mut state = self
                .inner
                .user_states
                .entry(user_id)
                .or_insert_with(|| UserModerationState::new(user_id));
            let previous = state.warn_points;
            let updated = if delta >= 0 {
                previous.saturating_add(delta.unsigned_abs())
            } else {
                previous
                    .checked_sub(delta.unsigned_abs())
                    .ok_or(ModerationError::NegativePoints)?
            };
            state.warn_points = updated;
            (previous, updated)
        };

        if let Err(err) = self.save_user_states().await {
            if let Some(mut state) = self.inner.user_states.get_mut(&user_id) {
                state.warn_points = previous;
            }
            return Err(err);
        }
        Ok(updated)
    }

    /// Record that a user has used up their one threshold kick
    pub async fn set_warn_kicked(&self, user_id: u64) -> ModerationResult<()> {
        let previous = {
            let mut state = self
                .inner
                .user_states
                .entry(user_id)
                .or_insert_with(|| UserModerationState::new(user_id));
            let previous = state.was_warn_kicked;
            state.was_warn_kicked = true;
            previous
        };

        if let Err(err) = self.save_user_states().await {
            if let Some(mut state) = self.inner.user_states.get_mut(&user_id) {
                state.was_warn_kicked = previous;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Set a user's mute flag
    pub async fn set_muted(&self, user_id: u64, muted: bool) -> ModerationResult<()> {
        let previous = {
            let mut state = self
                .inner
                .user_states
                .entry(user_id)
                .or_insert_with(|| UserModerationState::new(user_id));
            let previous = state.is_muted;
            state.is_muted = muted;
            previous
        };

        if let Err(err) = self.save_user_states().await {
            if let Some(mut state) = self.inner.user_states.get_mut(&user_id) {
                state.is_muted = previous;
            }
            return Err(err);
        }
        Ok(())
    }

    /// Whether a user is currently muted
    #[must_use]
    pub fn is_muted(&self, user_id: u64) -> bool {
        self.inner
            .user_states
            .get(&user_id)
            .is_some_and(|state| state.is_muted)
    }

    /// Unmute deadlines that should be re-armed for a guild.
    ///
    /// Covers every muted user whose most recent mute case in the guild
    /// carries an expiry. Deadlines already in the past are included so the
    /// overdue unmute still happens.
    #[must_use]
    pub fn scheduled_unmutes(&self, guild_id: u64) -> Vec<(u64, DateTime<Utc>)> {
        self.inner
            .user_states
            .iter()
            .filter(|entry| entry.value().is_muted)
            .filter_map(|entry| {
                let user_id = entry.value().user_id;
                let expires_at = self
                    .inner
                    .cases
                    .get(&user_id)?
                    .iter()
                    .filter(|case| case.kind == CaseKind::Mute && case.guild_id == guild_id)
                    .max_by_key(|case| case.id)?
                    .expires_at?;
                Some((user_id, expires_at))
            })
            .collect()
    }

    async fn save_counters(&self) -> ModerationResult<()> {
        let Some(dir) = &self.inner.data_dir else {
            return Ok(());
        };

        let entries: Vec<CaseCounter> = self
            .inner
            .counters
            .iter()
            .map(|entry| CaseCounter {
                guild_id: *entry.key(),
                last_case_id: *entry.value(),
            })
            .collect();

        let yaml = serde_yaml::to_string(&entries)?;
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(COUNTERS_FILE), yaml).await?;
        Ok(())
    }

    async fn save_cases(&self) -> ModerationResult<()> {
        let Some(dir) = &self.inner.data_dir else {
            return Ok(());
        };

        let entries: Vec<UserCases> = self
            .inner
            .cases
            .iter()
            .map(|entry| UserCases {
                user_id: *entry.key(),
                cases: entry.value().clone(),
            })
            .collect();

        let yaml = serde_yaml::to_string(&entries)?;
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(CASES_FILE), yaml).await?;
        Ok(())
    }

    async fn save_user_states(&self) -> ModerationResult<()> {
        let Some(dir) = &self.inner.data_dir else {
            return Ok(());
        };

        let entries: Vec<UserModerationState> = self
            .inner
            .user_states
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let yaml = serde_yaml::to_string(&entries)?;
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join(USER_STATES_FILE), yaml).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn warn_case(id: u64, guild_id: u64, user_id: u64, points: u64) -> Case {
        Case::new(id, guild_id, CaseKind::Warn, user_id, 777, "mod#0001", "spam")
            .with_punishment(points.to_string())
    }

    #[tokio::test]
    async fn test_case_ids_are_sequential_per_guild() {
        let store = ModerationStore::new();

        assert_eq!(store.next_case_id(1).await.unwrap(), 1);
        assert_eq!(store.next_case_id(1).await.unwrap(), 2);
        assert_eq!(store.next_case_id(2).await.unwrap(), 1);
        assert_eq!(store.next_case_id(1).await.unwrap(), 3);
        assert_eq!(store.last_case_id(1), 3);
        assert_eq!(store.last_case_id(2), 1);
    }

    #[tokio::test]
    async fn test_concurrent_issuance_never_duplicates_ids() {
        let store = ModerationStore::new();

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.next_case_id(1).await.unwrap() })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }

        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 32);
        assert_eq!(store.last_case_id(1), 32);
    }

    #[tokio::test]
    async fn test_add_and_fetch_cases() {
        let store = ModerationStore::new();

        store.add_case(warn_case(1, 9, 42, 50)).await.unwrap();
        store.add_case(warn_case(2, 9, 42, 100)).await.unwrap();
        store.add_case(warn_case(3, 9, 55, 25)).await.unwrap();

        assert_eq!(store.cases_for(42).len(), 2);
        assert_eq!(store.cases_for(55).len(), 1);
        assert!(store.cases_for(60).is_empty());

        let case = store.case(42, 2).unwrap();
        assert_eq!(case.punishment, "100");

        let err = store.case(42, 99).unwrap_err();
        assert!(matches!(
            err,
            ModerationError::CaseNotFound {
                user_id: 42,
                case_id: 99
            }
        ));
    }

    #[tokio::test]
    async fn test_points_never_go_negative() {
        let store = ModerationStore::new();

        assert_eq!(store.adjust_points(42, 100).await.unwrap(), 100);
        assert_eq!(store.adjust_points(42, -40).await.unwrap(), 60);

        let err = store.adjust_points(42, -61).await.unwrap_err();
        assert!(matches!(err, ModerationError::NegativePoints));
        // The refused deduction changed nothing
        assert_eq!(store.points(42), 60);

        assert_eq!(store.adjust_points(42, -60).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lift_warn_validations() {
        let store = ModerationStore::new();

        store.add_case(warn_case(1, 9, 42, 50)).await.unwrap();
        store
            .add_case(Case::new(2, 9, CaseKind::Kick, 42, 777, "mod#0001", "rude"))
            .await
            .unwrap();
        store.adjust_points(42, 50).await.unwrap();

        // Unknown case
        let err = store.lift_warn(42, 99, 888, "lead#0002", "x").await.unwrap_err();
        assert!(matches!(err, ModerationError::CaseNotFound { .. }));

        // Not a warn
        let err = store.lift_warn(42, 2, 888, "lead#0002", "x").await.unwrap_err();
        assert!(matches!(err, ModerationError::NotAWarnCase(2)));

        // Lift works once
        let lifted = store.lift_warn(42, 1, 888, "lead#0002", "appealed").await.unwrap();
        assert!(lifted.lifted);
        assert_eq!(lifted.lifted_by, Some(888));

        // Second lift refused, stored case still lifted
        let err = store.lift_warn(42, 1, 888, "lead#0002", "x").await.unwrap_err();
        assert!(matches!(err, ModerationError::AlreadyLifted(1)));
        assert!(store.case(42, 1).unwrap().lifted);
    }

    #[tokio::test]
    async fn test_lift_warn_refuses_when_points_would_go_negative() {
        let store = ModerationStore::new();

        store.add_case(warn_case(1, 9, 42, 50)).await.unwrap();
        store.adjust_points(42, 50).await.unwrap();
        // Points drained by a removepoints in between
        store.adjust_points(42, -30).await.unwrap();

        let err = store.lift_warn(42, 1, 888, "lead#0002", "x").await.unwrap_err();
        assert!(matches!(err, ModerationError::NegativePoints));
        assert!(!store.case(42, 1).unwrap().lifted);
    }

    #[tokio::test]
    async fn test_user_state_flags() {
        let store = ModerationStore::new();

        let state = store.user_state(42);
        assert_eq!(state.warn_points, 0);
        assert!(!state.is_muted);
        assert!(!state.was_warn_kicked);

        store.set_warn_kicked(42).await.unwrap();
        store.set_muted(42, true).await.unwrap();

        let state = store.user_state(42);
        assert!(state.was_warn_kicked);
        assert!(state.is_muted);
        assert!(store.is_muted(42));

        store.set_muted(42, false).await.unwrap();
        assert!(!store.is_muted(42));
    }

    #[tokio::test]
    async fn test_scheduled_unmutes_cover_timed_mutes_only() {
        let store = ModerationStore::new();
        let deadline = Utc::now() + Duration::minutes(15);

        // Timed mute, still muted
        store
            .add_case(
                Case::new(1, 9, CaseKind::Mute, 42, 777, "mod#0001", "loud")
                    .with_punishment("15 minutes")
                    .with_expiry(deadline),
            )
            .await
            .unwrap();
        store.set_muted(42, true).await.unwrap();

        // Permanent mute, still muted
        store
            .add_case(
                Case::new(2, 9, CaseKind::Mute, 55, 777, "mod#0001", "loud")
                    .with_punishment(super::super::case::PERMANENT),
            )
            .await
            .unwrap();
        store.set_muted(55, true).await.unwrap();

        // Timed mute already unmuted by hand
        store
            .add_case(
                Case::new(3, 9, CaseKind::Mute, 60, 777, "mod#0001", "loud")
                    .with_punishment("15 minutes")
                    .with_expiry(deadline),
            )
            .await
            .unwrap();

        let pending = store.scheduled_unmutes(9);
        assert_eq!(pending, vec![(42, deadline)]);
    }

    #[tokio::test]
    async fn test_latest_mute_case_wins_for_rehydration() {
        let store = ModerationStore::new();
        let first = Utc::now() + Duration::minutes(5);
        let second = Utc::now() + Duration::minutes(30);

        store
            .add_case(
                Case::new(1, 9, CaseKind::Mute, 42, 777, "mod#0001", "first")
                    .with_punishment("5 minutes")
                    .with_expiry(first),
            )
            .await
            .unwrap();
        store
            .add_case(
                Case::new(2, 9, CaseKind::Mute, 42, 777, "mod#0001", "second")
                    .with_punishment("30 minutes")
                    .with_expiry(second),
            )
            .await
            .unwrap();
        store.set_muted(42, true).await.unwrap();

        assert_eq!(store.scheduled_unmutes(9), vec![(42, second)]);
    }

    #[tokio::test]
    async fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");

        {
            let store = ModerationStore::load(path.clone()).await;
            let id = store.next_case_id(9).await.unwrap();
            store.add_case(warn_case(id, 9, 42, 50)).await.unwrap();
            store.adjust_points(42, 50).await.unwrap();
            store.set_muted(42, true).await.unwrap();
        }

        let reloaded = ModerationStore::load(path).await;
        assert_eq!(reloaded.points(42), 50);
        assert!(reloaded.is_muted(42));
        assert_eq!(reloaded.cases_for(42).len(), 1);
        assert_eq!(reloaded.next_case_id(9).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_reload_reconciles_counter_with_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data");

        {
            let store = ModerationStore::load(path.clone()).await;
            // Ledger entry written without going through the counter
            store.add_case(warn_case(5, 9, 42, 50)).await.unwrap();
        }

        let reloaded = ModerationStore::load(path).await;
        assert_eq!(reloaded.next_case_id(9).await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_failed_write_surfaces_and_rolls_back_the_case() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, "not a directory").await.unwrap();

        // The data dir cannot be created under a regular file
        let store = ModerationStore::load(blocker.join("data")).await;

        let err = store.add_case(warn_case(1, 9, 42, 50)).await.unwrap_err();
        assert!(matches!(err, ModerationError::Persistence(_)));
        assert!(store.cases_for(42).is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_the_counter_increment() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        tokio::fs::write(&blocker, "not a directory").await.unwrap();

        let store = ModerationStore::load(blocker.join("data")).await;

        let err = store.next_case_id(9).await.unwrap_err();
        assert!(matches!(err, ModerationError::Persistence(_)));
        // The id burned by the failed call is gone for good
        assert_eq!(store.last_case_id(9), 1);
    }
}

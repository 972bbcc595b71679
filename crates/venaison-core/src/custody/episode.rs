//! Handoff episodes: one actor's participation in the chain of custody.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::CustodyError;
use crate::identity::Role;

/// One actor's time-bounded participation episode in the chain.
///
/// Opened atomically with the custody confirmation, owned by the acting
/// user until `check_finished_at` closes it, immutable history afterwards.
/// The ordered list of episodes across a fiche, most recent first, is the
/// chain-of-custody trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffEpisode {
    /// Unique id, derived from user, fiche and a time component so the same
    /// actor can appear in the chain more than once.
    pub id: String,
    /// Owning fiche number.
    pub fiche_numero: String,
    /// Role under which the actor participates.
    pub role: Role,
    /// Acting user.
    pub user_id: String,
    /// Acting entity, when the role is organizational.
    pub entity_id: Option<String>,
    /// Closing timestamp of the episode's inspection work.
    pub check_finished_at: Option<DateTime<Utc>>,
    /// Soft-delete timestamp.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl HandoffEpisode {
    /// Opens an episode at custody-confirmation time.
    #[must_use]
    pub fn open(
        fiche_numero: impl Into<String>,
        role: Role,
        user_id: impl Into<String>,
        entity_id: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let fiche_numero = fiche_numero.into();
        let user_id = user_id.into();
        let id = format!("{fiche_numero}:{user_id}:{}", now.timestamp_millis());
        Self {
            id,
            fiche_numero,
            role,
            user_id,
            entity_id,
            check_finished_at: None,
            deleted_at: None,
            created_at: now,
        }
    }

    /// Whether the episode still accepts decision writes.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.check_finished_at.is_none() && self.deleted_at.is_none()
    }

    /// Closes the episode. The caller must have passed the ledger's
    /// close-out gate first.
    ///
    /// # Errors
    ///
    /// Returns [`CustodyError::EpisodeFinished`] when already closed.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Result<(), CustodyError> {
        if self.check_finished_at.is_some() {
            return Err(CustodyError::EpisodeFinished {
                episode_id: self.id.clone(),
            });
        }
        self.check_finished_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn id_derivation_is_unique_per_handoff() {
        let t1 = Utc.timestamp_opt(1000, 0).unwrap();
        let t2 = Utc.timestamp_opt(1001, 0).unwrap();
        let a = HandoffEpisode::open("F-1", Role::Etg, "u-1", None, t1);
        let b = HandoffEpisode::open("F-1", Role::Etg, "u-1", None, t2);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("F-1:u-1:"));
    }

    #[test]
    fn finish_is_one_shot() {
        let now = Utc.timestamp_opt(1000, 0).unwrap();
        let mut episode = HandoffEpisode::open("F-1", Role::Etg, "u-1", None, now);
        assert!(episode.is_open());
        episode.finish(now).unwrap();
        assert!(!episode.is_open());
        let err = episode.finish(now).unwrap_err();
        assert!(matches!(err, CustodyError::EpisodeFinished { .. }));
    }
}

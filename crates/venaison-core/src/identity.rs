//! Custody roles, owner references, and authenticated principals.
//!
//! Every permission check in the system reduces to two questions: which
//! [`Role`] is acting, and does the acting [`Principal`] cover the
//! [`OwnerRef`] recorded on the document. Authentication itself is an
//! external collaborator; the core only consumes its output.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The legal roles a fiche custodian can hold, in chain order.
///
/// `Ccg` (cold-storage depot), `CollecteurPro` (professional collector) and
/// `Etg` (processing establishment) are the intermediary roles; `Svi` is the
/// final veterinary inspection authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// Initial examiner: creates the fiche and the carcasses.
    ExaminateurInitial,
    /// First holder: routes carcasses to downstream recipients.
    PremierDetenteur,
    /// Cold-storage depot.
    Ccg,
    /// Professional collector.
    CollecteurPro,
    /// Processing establishment.
    Etg,
    /// Veterinary inspection authority: closes the fiche.
    Svi,
}

impl Role {
    /// Canonical string form, matching the persisted representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ExaminateurInitial => "EXAMINATEUR_INITIAL",
            Self::PremierDetenteur => "PREMIER_DETENTEUR",
            Self::Ccg => "CCG",
            Self::CollecteurPro => "COLLECTEUR_PRO",
            Self::Etg => "ETG",
            Self::Svi => "SVI",
        }
    }

    /// Whether this role sits between the first holder and the SVI.
    #[must_use]
    pub const fn is_intermediary(self) -> bool {
        matches!(self, Self::Ccg | Self::CollecteurPro | Self::Etg)
    }

    /// Whether confirming custody under this role opens a handoff episode.
    ///
    /// Intermediaries and the SVI record per-carcass decisions, so both get
    /// an episode; the examiner and first holder do not.
    #[must_use]
    pub const fn opens_episode(self) -> bool {
        matches!(self, Self::Ccg | Self::CollecteurPro | Self::Etg | Self::Svi)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown custody role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EXAMINATEUR_INITIAL" => Ok(Self::ExaminateurInitial),
            "PREMIER_DETENTEUR" => Ok(Self::PremierDetenteur),
            "CCG" => Ok(Self::Ccg),
            "COLLECTEUR_PRO" => Ok(Self::CollecteurPro),
            "ETG" => Ok(Self::Etg),
            "SVI" => Ok(Self::Svi),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// A `(role, user and/or entity)` pair identifying one custodian.
///
/// Invariant: once attached to a fiche, an owner reference is fully
/// populated — it names a role and at least one of user id or entity id.
/// [`OwnerRef::is_fully_populated`] is checked by every custody transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRef {
    /// The custody role held.
    pub role: Role,
    /// Acting user, when custody is personal (examiner, hunter).
    pub user_id: Option<String>,
    /// Acting entity, when custody is organizational (depot, ETG, SVI).
    pub entity_id: Option<String>,
}

impl OwnerRef {
    /// Owner reference naming a user.
    #[must_use]
    pub fn for_user(role: Role, user_id: impl Into<String>) -> Self {
        Self {
            role,
            user_id: Some(user_id.into()),
            entity_id: None,
        }
    }

    /// Owner reference naming an entity.
    #[must_use]
    pub fn for_entity(role: Role, entity_id: impl Into<String>) -> Self {
        Self {
            role,
            user_id: None,
            entity_id: Some(entity_id.into()),
        }
    }

    /// True when the reference names a role and at least one concrete id.
    #[must_use]
    pub fn is_fully_populated(&self) -> bool {
        self.user_id.as_deref().is_some_and(|u| !u.is_empty())
            || self.entity_id.as_deref().is_some_and(|e| !e.is_empty())
    }
}

impl fmt::Display for OwnerRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.user_id, &self.entity_id) {
            (Some(u), _) => write!(f, "{}:{u}", self.role),
            (None, Some(e)) => write!(f, "{}:{e}", self.role),
            (None, None) => write!(f, "{}:<empty>", self.role),
        }
    }
}

/// An authenticated actor, as delivered by the identity provider.
///
/// The core treats this as an opaque input to permission checks: it never
/// authenticates, it only answers "does this principal cover that owner
/// reference".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Stable user identifier.
    pub user_id: String,
    /// Entities this user acts for (depot, collector, ETG, SVI service).
    pub entity_ids: Vec<String>,
    /// Roles granted to this user.
    pub roles: Vec<Role>,
    /// Deactivated accounts keep their data but lose all write access.
    pub activated: bool,
}

impl Principal {
    /// A principal with a single role and no entity affiliations.
    #[must_use]
    pub fn user(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            entity_ids: Vec::new(),
            roles: vec![role],
            activated: true,
        }
    }

    /// A principal acting for an entity under a single role.
    #[must_use]
    pub fn entity_member(
        user_id: impl Into<String>,
        entity_id: impl Into<String>,
        role: Role,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            entity_ids: vec![entity_id.into()],
            roles: vec![role],
            activated: true,
        }
    }

    /// Whether this principal holds the given role.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Whether this principal can act as the given owner.
    ///
    /// Requires the owner's role to be granted, plus a match on either the
    /// user id or one of the principal's entity affiliations.
    #[must_use]
    pub fn acts_for(&self, owner: &OwnerRef) -> bool {
        if !self.has_role(owner.role) {
            return false;
        }
        let user_match = owner.user_id.as_deref() == Some(self.user_id.as_str());
        let entity_match = owner
            .entity_id
            .as_ref()
            .is_some_and(|e| self.entity_ids.contains(e));
        user_match || entity_match
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_str() {
        for role in [
            Role::ExaminateurInitial,
            Role::PremierDetenteur,
            Role::Ccg,
            Role::CollecteurPro,
            Role::Etg,
            Role::Svi,
        ] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
    }

    #[test]
    fn role_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&Role::PremierDetenteur).unwrap();
        assert_eq!(json, "\"PREMIER_DETENTEUR\"");
        let json = serde_json::to_string(&Role::CollecteurPro).unwrap();
        assert_eq!(json, "\"COLLECTEUR_PRO\"");
    }

    #[test]
    fn intermediary_roles() {
        assert!(Role::Ccg.is_intermediary());
        assert!(Role::CollecteurPro.is_intermediary());
        assert!(Role::Etg.is_intermediary());
        assert!(!Role::Svi.is_intermediary());
        assert!(!Role::ExaminateurInitial.is_intermediary());
        assert!(Role::Svi.opens_episode());
        assert!(!Role::PremierDetenteur.opens_episode());
    }

    #[test]
    fn owner_ref_population() {
        assert!(OwnerRef::for_user(Role::ExaminateurInitial, "u1").is_fully_populated());
        assert!(OwnerRef::for_entity(Role::Etg, "etg-1").is_fully_populated());
        let empty = OwnerRef {
            role: Role::Etg,
            user_id: None,
            entity_id: None,
        };
        assert!(!empty.is_fully_populated());
        let blank = OwnerRef {
            role: Role::Etg,
            user_id: Some(String::new()),
            entity_id: None,
        };
        assert!(!blank.is_fully_populated());
    }

    #[test]
    fn principal_acts_for_user_or_entity() {
        let p = Principal::entity_member("u1", "etg-1", Role::Etg);
        assert!(p.acts_for(&OwnerRef::for_entity(Role::Etg, "etg-1")));
        assert!(p.acts_for(&OwnerRef::for_user(Role::Etg, "u1")));
        assert!(!p.acts_for(&OwnerRef::for_entity(Role::Etg, "etg-2")));
        // Role mismatch loses even with a matching user id.
        assert!(!p.acts_for(&OwnerRef::for_user(Role::Svi, "u1")));
    }
}

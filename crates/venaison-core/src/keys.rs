//! Immutable business keys addressing every persisted entity.
//!
//! Keys are stable across the offline merge round trip: a client queues a
//! patch against a key while disconnected and the server resolves the same
//! row from it on replay.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Business key of one persisted entity.
///
/// - fiches are addressed by their number;
/// - carcasses by bracelet within a fiche;
/// - inspection records by (fiche, bracelet, handoff episode).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityKey {
    /// A movement document.
    Fiche {
        /// Unique fiche number.
        numero: String,
    },
    /// A carcass or homogeneous small-game lot.
    Carcass {
        /// Owning fiche number.
        fiche_numero: String,
        /// Immutable bracelet number.
        bracelet: String,
    },
    /// One intermediary's decision record about one carcass.
    Inspection {
        /// Owning fiche number.
        fiche_numero: String,
        /// Immutable bracelet number.
        bracelet: String,
        /// Handoff episode the decision belongs to.
        episode_id: String,
    },
}

impl EntityKey {
    /// Key for a fiche.
    #[must_use]
    pub fn fiche(numero: impl Into<String>) -> Self {
        Self::Fiche {
            numero: numero.into(),
        }
    }

    /// Key for a carcass.
    #[must_use]
    pub fn carcass(fiche_numero: impl Into<String>, bracelet: impl Into<String>) -> Self {
        Self::Carcass {
            fiche_numero: fiche_numero.into(),
            bracelet: bracelet.into(),
        }
    }

    /// Key for an inspection record.
    #[must_use]
    pub fn inspection(
        fiche_numero: impl Into<String>,
        bracelet: impl Into<String>,
        episode_id: impl Into<String>,
    ) -> Self {
        Self::Inspection {
            fiche_numero: fiche_numero.into(),
            bracelet: bracelet.into(),
            episode_id: episode_id.into(),
        }
    }

    /// The fiche this key belongs to.
    #[must_use]
    pub fn fiche_numero(&self) -> &str {
        match self {
            Self::Fiche { numero } => numero,
            Self::Carcass { fiche_numero, .. } | Self::Inspection { fiche_numero, .. } => {
                fiche_numero
            }
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fiche { numero } => write!(f, "fiche/{numero}"),
            Self::Carcass {
                fiche_numero,
                bracelet,
            } => write!(f, "carcass/{fiche_numero}/{bracelet}"),
            Self::Inspection {
                fiche_numero,
                bracelet,
                episode_id,
            } => write!(f, "inspection/{fiche_numero}/{bracelet}/{episode_id}"),
        }
    }
}

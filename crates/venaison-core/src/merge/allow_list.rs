//! Per-role field allow-lists.
//!
//! Each role declares the closed set of fields it may write on each entity.
//! The merge step applies only that set; everything else in a submitted
//! patch is dropped. This is the single authoritative statement of "who may
//! edit what" — there is no per-field conditional scattered anywhere else.
//!
//! Custody pointers, mirror fields and row versions are deliberately absent
//! from every list: they are only written by the custody machine, the
//! ledger projection and the store respectively.

use crate::identity::Role;

/// Fiche fields the role may patch.
#[must_use]
pub const fn allowed_fiche_fields(role: Role) -> &'static [&'static str] {
    match role {
        Role::ExaminateurInitial => &[
            "kill_date",
            "kill_commune",
            "first_kill_time",
            "last_evisceration_time",
            "market_release_approved",
            "market_release_signed_at",
        ],
        Role::PremierDetenteur
        | Role::Ccg
        | Role::CollecteurPro
        | Role::Etg
        | Role::Svi => &[],
    }
}

/// Carcass fields the role may patch.
#[must_use]
pub const fn allowed_carcass_fields(role: Role) -> &'static [&'static str] {
    match role {
        Role::ExaminateurInitial => &[
            "species",
            "lot_size",
            "carcass_abnormalities",
            "viscera_abnormalities",
            "no_abnormality",
            "examined_at",
        ],
        Role::PremierDetenteur => &[
            "next_recipient_kind",
            "next_recipient_entity_id",
            "next_recipient_name",
            "depot_kind",
            "depot_entity_id",
            "deposited_on",
            "transport_mode",
            "transport_date",
        ],
        // Intermediaries write through the inspection ledger; the mirror
        // fields on the carcass are projections, not editable.
        Role::Ccg | Role::CollecteurPro | Role::Etg => &[],
        Role::Svi => &["svi_seized", "svi_seizure_reasons", "svi_seizure_comment"],
    }
}

/// Inspection-record fields the role may patch.
#[must_use]
pub const fn allowed_inspection_fields(role: Role) -> &'static [&'static str] {
    match role {
        Role::Ccg | Role::CollecteurPro | Role::Etg | Role::Svi => &["decision", "comment"],
        Role::ExaminateurInitial | Role::PremierDetenteur => &[],
    }
}

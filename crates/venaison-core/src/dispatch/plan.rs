//! Dispatch groups, the exclusivity-preserving assignment operation, and
//! submission planning.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::error::DispatchError;
use crate::carcass::{Carcass, DepotKind, RecipientKind, TransportMode};
use crate::identity::{OwnerRef, Role};

/// The chosen recipient of one dispatch group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientRef {
    /// Entity id of the recipient.
    pub entity_id: String,
    /// Display name, cached on carcasses for offline rendering.
    pub name: String,
}

/// Where a group's carcasses are deposited while awaiting pickup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepotSpec {
    /// Kind of deposit location.
    pub kind: DepotKind,
    /// Entity operating the deposit location.
    pub entity_id: String,
    /// Deposit date; required for CCG deposits under the first holder.
    pub deposited_on: Option<NaiveDate>,
}

/// How a group's carcasses reach the recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSpec {
    /// Who transports.
    pub mode: TransportMode,
    /// Transport date; required when the holder self-transports to a CCG
    /// deposit.
    pub date: Option<NaiveDate>,
}

/// One disjoint subset of the holder's carcasses, routed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchGroup {
    /// Kind of the recipient.
    pub recipient_kind: RecipientKind,
    /// The chosen recipient; `None` until the holder picks one.
    pub recipient: Option<RecipientRef>,
    /// Deposit location, when the recipient kind requires one.
    pub depot: Option<DepotSpec>,
    /// Transport metadata, when the recipient kind requires it.
    pub transport: Option<TransportSpec>,
    /// Bracelets assigned to this group.
    pub bracelets: BTreeSet<String>,
}

impl DispatchGroup {
    /// An empty group routed to a recipient kind.
    #[must_use]
    pub fn new(recipient_kind: RecipientKind) -> Self {
        Self {
            recipient_kind,
            recipient: None,
            depot: None,
            transport: None,
            bracelets: BTreeSet::new(),
        }
    }

    /// The first field still missing for submission, if any.
    ///
    /// This is the per-group completeness rule: a recipient must be chosen;
    /// the group must be non-empty; a deposit location when the recipient
    /// kind requires one (plus a deposit date for CCG deposits under the
    /// first-holder role); a transport mode unless the recipient leaves the
    /// chain; a transport date when the holder self-transports to a CCG
    /// deposit.
    #[must_use]
    pub fn missing_field(&self, holder_role: Role) -> Option<&'static str> {
        if self.recipient.is_none() {
            return Some("recipient");
        }
        if self.bracelets.is_empty() {
            return Some("carcasses");
        }
        if self.recipient_kind.requires_deposit() {
            let Some(depot) = &self.depot else {
                return Some("deposit_location");
            };
            if depot.kind == DepotKind::Ccg
                && holder_role == Role::PremierDetenteur
                && depot.deposited_on.is_none()
            {
                return Some("deposit_date");
            }
        }
        if self.recipient_kind.requires_transport() {
            let Some(transport) = &self.transport else {
                return Some("transport_mode");
            };
            let ccg_deposit = self
                .depot
                .as_ref()
                .is_some_and(|d| d.kind == DepotKind::Ccg);
            if transport.mode == TransportMode::HolderSelf
                && ccg_deposit
                && transport.date.is_none()
            {
                return Some("transport_date");
            }
        }
        None
    }
}

/// Routing fields stamped onto each carcass of a submitted group.
///
/// These are the denormalized "next recipient" caches; the authoritative
/// group membership they are derived from lives in the plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarcassRouting {
    /// Kind of the next recipient.
    pub recipient_kind: RecipientKind,
    /// Entity id of the next recipient.
    pub recipient_entity_id: String,
    /// Display name of the next recipient.
    pub recipient_name: String,
    /// Deposit location kind.
    pub depot_kind: Option<DepotKind>,
    /// Deposit entity.
    pub depot_entity_id: Option<String>,
    /// Deposit date.
    pub deposited_on: Option<NaiveDate>,
    /// Transport mode.
    pub transport_mode: Option<TransportMode>,
    /// Transport date.
    pub transport_date: Option<NaiveDate>,
}

impl CarcassRouting {
    /// Stamps the routing onto a carcass. Idempotent.
    pub fn apply(&self, carcass: &mut Carcass, now: DateTime<Utc>) {
        carcass.next_recipient_kind = Some(self.recipient_kind);
        carcass.next_recipient_entity_id = Some(self.recipient_entity_id.clone());
        carcass.next_recipient_name = Some(self.recipient_name.clone());
        carcass.depot_kind = self.depot_kind;
        carcass.depot_entity_id = self.depot_entity_id.clone();
        carcass.deposited_on = self.deposited_on;
        carcass.transport_mode = self.transport_mode;
        carcass.transport_date = self.transport_date;
        carcass.updated_at = now;
    }
}

/// One group's share of a validated submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSubmission {
    /// Index of the group in the plan.
    pub group_index: usize,
    /// Custody proposal for this group's recipient, when the recipient
    /// stays in the chain.
    pub next_owner: Option<OwnerRef>,
    /// Routing stamped onto every carcass of the group.
    pub routing: CarcassRouting,
    /// The group's bracelets, in stable order.
    pub bracelets: Vec<String>,
}

/// A validated submission, ready to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPlan {
    /// Group 0's custody proposal, mirrored onto the fiche's legacy
    /// single-recipient pointer. `None` when group 0's recipient leaves
    /// the chain.
    pub primary_next_owner: Option<OwnerRef>,
    /// Every group's routing and proposal.
    pub groups: Vec<GroupSubmission>,
}

/// The holder's partition of its carcasses across simultaneous recipients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchPlan {
    /// The groups, in submission order; group 0 is the primary recipient.
    pub groups: Vec<DispatchGroup>,
}

impl DispatchPlan {
    /// An empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a group and returns its index.
    pub fn add_group(&mut self, group: DispatchGroup) -> usize {
        self.groups.push(group);
        self.groups.len() - 1
    }

    /// Assigns a carcass to a group, removing it from any other group.
    ///
    /// Groups stay mutually exclusive by construction: there is no state in
    /// which a bracelet belongs to two groups.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoSuchGroup`] for an out-of-range index.
    pub fn assign(&mut self, bracelet: &str, group_index: usize) -> Result<(), DispatchError> {
        if group_index >= self.groups.len() {
            return Err(DispatchError::NoSuchGroup { index: group_index });
        }
        for group in &mut self.groups {
            group.bracelets.remove(bracelet);
        }
        self.groups[group_index]
            .bracelets
            .insert(bracelet.to_string());
        Ok(())
    }

    /// The group a bracelet is currently assigned to.
    #[must_use]
    pub fn group_of(&self, bracelet: &str) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.bracelets.contains(bracelet))
    }

    /// Bracelets from `all` not assigned to any group.
    #[must_use]
    pub fn unassigned(&self, all: &[String]) -> Vec<String> {
        all.iter()
            .filter(|b| self.group_of(b).is_none())
            .cloned()
            .collect()
    }

    /// The submission precondition check.
    ///
    /// # Errors
    ///
    /// [`DispatchError::NoGroups`] with zero groups;
    /// [`DispatchError::UnassignedCarcasses`] naming every bracelet outside
    /// the partition; [`DispatchError::IncompleteGroup`] naming the first
    /// missing field of the first incomplete group.
    pub fn validate(&self, holder_role: Role, all_bracelets: &[String]) -> Result<(), DispatchError> {
        if self.groups.is_empty() {
            return Err(DispatchError::NoGroups);
        }
        let mut unassigned = self.unassigned(all_bracelets);
        if !unassigned.is_empty() {
            unassigned.sort();
            return Err(DispatchError::UnassignedCarcasses {
                bracelets: unassigned,
            });
        }
        for (index, group) in self.groups.iter().enumerate() {
            if let Some(field) = group.missing_field(holder_role) {
                return Err(DispatchError::IncompleteGroup {
                    group: index,
                    field,
                });
            }
        }
        Ok(())
    }

    /// Validates and turns the plan into an executable submission.
    ///
    /// Each group independently yields a confirm-style custody proposal for
    /// its recipient (when the recipient stays in the chain) and the
    /// routing to stamp on its carcasses. Only group 0's proposal becomes
    /// the fiche's own `next_owner`.
    ///
    /// # Errors
    ///
    /// Same as [`DispatchPlan::validate`].
    pub fn into_submission(
        self,
        holder_role: Role,
        all_bracelets: &[String],
    ) -> Result<SubmissionPlan, DispatchError> {
        self.validate(holder_role, all_bracelets)?;
        let groups: Vec<GroupSubmission> = self
            .groups
            .iter()
            .enumerate()
            .map(|(group_index, group)| {
                let recipient = group
                    .recipient
                    .as_ref()
                    .expect("validated group has a recipient");
                let next_owner = group
                    .recipient_kind
                    .custody_role()
                    .map(|role| OwnerRef::for_entity(role, recipient.entity_id.clone()));
                let routing = CarcassRouting {
                    recipient_kind: group.recipient_kind,
                    recipient_entity_id: recipient.entity_id.clone(),
                    recipient_name: recipient.name.clone(),
                    depot_kind: group.depot.as_ref().map(|d| d.kind),
                    depot_entity_id: group.depot.as_ref().map(|d| d.entity_id.clone()),
                    deposited_on: group.depot.as_ref().and_then(|d| d.deposited_on),
                    transport_mode: group.transport.as_ref().map(|t| t.mode),
                    transport_date: group.transport.as_ref().and_then(|t| t.date),
                };
                GroupSubmission {
                    group_index,
                    next_owner,
                    routing,
                    bracelets: group.bracelets.iter().cloned().collect(),
                }
            })
            .collect();
        let primary_next_owner = groups.first().and_then(|g| g.next_owner.clone());
        Ok(SubmissionPlan {
            primary_next_owner,
            groups,
        })
    }
}
